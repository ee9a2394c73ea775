//! JWT token management.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::AuthError;

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// JWT manager for creating and validating tokens.
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_expiry: Duration,
}

impl JwtManager {
    /// Create a new JWT manager with a secret key.
    ///
    /// The secret should be at least 32 bytes.
    #[must_use]
    pub fn new(secret: &[u8], access_expiry: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_expiry,
        }
    }

    /// Create a JWT manager from a hex-encoded secret.
    ///
    /// # Errors
    ///
    /// Returns error if hex decoding fails.
    pub fn from_hex_secret(hex_secret: &str, access_expiry: Duration) -> Result<Self, AuthError> {
        let secret = hex::decode(hex_secret)
            .map_err(|e| AuthError::Config(format!("Invalid hex secret: {e}")))?;
        Ok(Self::new(&secret, access_expiry))
    }

    /// Generate a random 256-bit secret as hex string.
    #[must_use]
    pub fn generate_hex_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Create an access token for a user.
    ///
    /// # Errors
    ///
    /// Returns error if token encoding fails.
    pub fn create_access_token(&self, user_id: &str) -> Result<(String, DateTime<Utc>), AuthError> {
        let now = Utc::now();
        let exp = chrono::Duration::from_std(self.access_expiry)
            .ok()
            .and_then(|expiry| now.checked_add_signed(expiry))
            .ok_or_else(|| AuthError::Config("Token expiry out of range".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenError(format!("Encoding failed: {e}")))?;

        Ok((token, exp))
    }

    /// Validate and decode an access token.
    ///
    /// # Errors
    ///
    /// Returns error if token is invalid, expired or has an empty subject.
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let token_data: TokenData<Claims> =
            decode(token, &self.decoding_key, &Validation::default())
                .map_err(|e| AuthError::TokenError(format!("Validation failed: {e}")))?;

        if token_data.claims.sub.is_empty() {
            return Err(AuthError::TokenError("Token has no subject".to_string()));
        }

        Ok(token_data.claims)
    }

    /// Extract token from Authorization header.
    ///
    /// Expects format: "Bearer <token>"
    #[must_use]
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("access_expiry", &self.access_expiry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_manager() -> JwtManager {
        JwtManager::from_hex_secret(&JwtManager::generate_hex_secret(), Duration::from_secs(3600))
            .unwrap()
    }

    #[test]
    fn test_token_roundtrip() {
        let manager = create_manager();
        let (token, expires) = manager.create_access_token("42").unwrap();
        assert!(expires > Utc::now());

        let claims = manager.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, "42");
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let (token, _) = create_manager().create_access_token("42").unwrap();
        assert!(create_manager().validate_access_token(&token).is_err());
    }

    #[test]
    fn test_invalid_token() {
        let manager = create_manager();
        assert!(manager.validate_access_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_expiry_out_of_range() {
        let manager = JwtManager::new(b"0123456789abcdef0123456789abcdef", Duration::MAX);
        assert!(matches!(
            manager.create_access_token("42"),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_hex_secret() {
        assert!(matches!(
            JwtManager::from_hex_secret("not-hex", Duration::from_secs(1)),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_extract_from_header() {
        assert_eq!(
            JwtManager::extract_from_header("Bearer abc123"),
            Some("abc123")
        );
        assert_eq!(
            JwtManager::extract_from_header("bearer abc123"),
            Some("abc123")
        );
        assert_eq!(JwtManager::extract_from_header("Bearer "), None);
        assert_eq!(JwtManager::extract_from_header("abc123"), None);
    }
}
