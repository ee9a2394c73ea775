//! CLI command implementations.

pub mod config;
pub mod search;
pub mod serve;

pub use config::run_config;
pub use search::run_search;
pub use serve::run_serve;
