//! Bearer token identity for the gateway.
//!
//! Tokens are HS256 JWTs whose `sub` claim is the user ID. Routes that
//! need a caller use [`RequireAuth`]; the rate limiter uses the same
//! validation but treats a bad token as an anonymous request.

mod jwt;
mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{AuthState, RequireAuth, SYSTEM_USER};

use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token error (missing, expired, invalid, etc.).
    #[error("Token error: {0}")]
    TokenError(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}
