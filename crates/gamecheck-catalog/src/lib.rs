//! # GameCheck Catalog
//!
//! Game search against an external catalog, fronted by a bounded cache.
//!
//! - [`SteamCatalog`] queries the Steam community app search endpoint
//! - [`SearchCache`] memoizes answers per normalized query with a TTL and
//!   a hard entry limit

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod traits;
mod steam;

pub use cache::{SearchCache, cache_key, normalize_query};
pub use steam::SteamCatalog;
pub use traits::{CatalogError, CatalogProvider, SearchResult};
