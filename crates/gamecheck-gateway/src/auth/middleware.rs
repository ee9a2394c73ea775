//! Authentication extractors for axum.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::AuthError;
use super::jwt::{Claims, JwtManager};
use gamecheck_core::config::AuthConfig;

/// Caller identity used for every request when auth is disabled.
pub const SYSTEM_USER: &str = "system";

/// Shared authentication state.
pub struct AuthState {
    /// Auth configuration.
    pub config: AuthConfig,
    /// JWT manager.
    pub jwt: JwtManager,
}

impl AuthState {
    /// Create a new auth state.
    #[must_use]
    pub const fn new(config: AuthConfig, jwt: JwtManager) -> Self {
        Self { config, jwt }
    }

    /// Initialize auth state, generating a JWT secret if none is configured.
    ///
    /// # Errors
    ///
    /// Returns error if the configured secret is not valid hex.
    pub fn initialize(mut config: AuthConfig) -> Result<Self, AuthError> {
        let jwt_secret = if let Some(secret) = &config.jwt_secret {
            secret.clone()
        } else {
            let secret = JwtManager::generate_hex_secret();
            config.jwt_secret = Some(secret.clone());
            tracing::info!("Generated new JWT secret; tokens will not survive a restart");
            secret
        };

        let jwt = JwtManager::from_hex_secret(&jwt_secret, config.token_expiry())?;
        Ok(Self::new(config, jwt))
    }

    /// Validate a token and return claims.
    ///
    /// # Errors
    ///
    /// Returns error if token is invalid.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.jwt.validate_access_token(token)
    }

    /// User ID carried by the request's bearer token, if it is valid.
    ///
    /// With auth disabled no request carries a user.
    #[must_use]
    pub fn user_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(JwtManager::extract_from_header)?;
        self.validate_token(token).ok().map(|claims| claims.sub)
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("enabled", &self.config.enabled)
            .finish_non_exhaustive()
    }
}

/// Extractor for authenticated requests.
///
/// Use this in handler parameters to require authentication.
#[derive(Debug, Clone)]
pub struct RequireAuth {
    /// The authenticated user's claims.
    pub claims: Claims,
}

impl RequireAuth {
    /// Get the user ID.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }
}

/// Error response for auth failures.
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::TokenError(_) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = AuthErrorResponse {
            error: self.to_string(),
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
    Arc<AuthState>: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = Arc::<AuthState>::from_ref(state);
        extract_auth(parts, &auth_state)
    }
}

fn extract_auth(parts: &Parts, auth_state: &AuthState) -> Result<RequireAuth, Response> {
    if !auth_state.config.enabled {
        return Ok(RequireAuth {
            claims: Claims {
                sub: SYSTEM_USER.to_string(),
                iat: 0,
                exp: i64::MAX,
            },
        });
    }

    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AuthError::TokenError("Missing Authorization header".to_string()).into_response()
        })?;

    let token = JwtManager::extract_from_header(auth_header).ok_or_else(|| {
        AuthError::TokenError("Invalid Authorization header format".to_string()).into_response()
    })?;

    let claims = auth_state
        .validate_token(token)
        .map_err(IntoResponse::into_response)?;

    Ok(RequireAuth { claims })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn auth_state(enabled: bool) -> AuthState {
        AuthState::initialize(AuthConfig {
            enabled,
            ..AuthConfig::default()
        })
        .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_initialize_generates_secret() {
        let state = auth_state(true);
        assert_eq!(state.config.jwt_secret.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_user_from_headers() {
        let state = auth_state(true);
        let (token, _) = state.jwt.create_access_token("7").unwrap();

        assert_eq!(state.user_from_headers(&bearer(&token)), Some("7".to_string()));
        assert_eq!(state.user_from_headers(&bearer("garbage")), None);
        assert_eq!(state.user_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn test_disabled_auth_is_anonymous() {
        let state = auth_state(false);
        let (token, _) = state.jwt.create_access_token("7").unwrap();
        assert_eq!(state.user_from_headers(&bearer(&token)), None);

        let (parts, ()) = Request::builder().body(()).unwrap().into_parts();
        let auth = extract_auth(&parts, &state).unwrap();
        assert_eq!(auth.user_id(), SYSTEM_USER);
    }

    #[test]
    fn test_extract_auth_rejects_missing_header() {
        let state = auth_state(true);
        let (parts, ()) = Request::builder().body(()).unwrap().into_parts();
        let response = extract_auth(&parts, &state).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_extract_auth_accepts_valid_token() {
        let state = auth_state(true);
        let (token, _) = state.jwt.create_access_token("user-9").unwrap();
        let (parts, ()) = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(())
            .unwrap()
            .into_parts();
        let auth = extract_auth(&parts, &state).unwrap();
        assert_eq!(auth.user_id(), "user-9");
    }
}
