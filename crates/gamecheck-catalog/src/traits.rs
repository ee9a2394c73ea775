//! Catalog provider traits.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog errors.
///
/// Every variant except `EmptyQuery` means the fetch failed; none of them
/// are ever cached.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Query was empty after normalization.
    #[error("Search query is empty")]
    EmptyQuery,

    /// Catalog answered with a non-success status.
    #[error("Catalog returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Provider did not answer in time.
    #[error("Catalog request timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A game matching a catalog search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Catalog application ID.
    #[serde(rename = "steamAppId")]
    pub app_id: u64,
    /// Display name.
    pub name: String,
    /// Icon URL (may be empty).
    pub icon: String,
}

/// External game catalog.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Search the catalog by game name.
    ///
    /// An empty result is a successful answer meaning "no matches".
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CatalogError>;
}
