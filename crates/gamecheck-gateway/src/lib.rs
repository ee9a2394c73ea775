//! # GameCheck Gateway
//!
//! HTTP gateway for GameCheck: per route class rate limiting, bearer token
//! identity, catalog search and bounded activity history.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Bearer token authentication.
pub mod auth;
/// Request middleware.
pub mod middleware;
/// Token bucket rate limiting.
pub mod ratelimit;
mod server;

pub use auth::{AuthError, AuthState, JwtManager, RequireAuth};
pub use middleware::resolve_identifier;
pub use ratelimit::{KeyedTokenBucket, RateLimiter, RateLimiterRegistry, RouteClass, SweepHandle};
pub use server::{Gateway, GatewayBuilder, GatewayState, router};

use gamecheck_core::history::HistoryError;

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// History storage error.
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
