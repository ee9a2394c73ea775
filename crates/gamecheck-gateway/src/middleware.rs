//! Gateway middleware: governance key resolution and rate limiting.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::auth::AuthState;
use crate::ratelimit::{RateLimiterRegistry, RouteClass};

/// Identifier used when no address information is available at all.
const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate limit key for a request.
///
/// Order: authenticated user (`user:<id>`), then `X-Forwarded-For` if its
/// whole value is one IP address, then `X-Real-IP` under the same rule,
/// then the socket peer address.
#[must_use]
pub fn resolve_identifier(
    user_id: Option<&str>,
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
) -> String {
    if let Some(user_id) = user_id {
        return format!("user:{user_id}");
    }

    for header in ["x-forwarded-for", "x-real-ip"] {
        if let Some(ip) = header_ip(headers, header) {
            return ip.to_string();
        }
    }

    remote.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<IpAddr>()
        .ok()
}

/// State for one rate limited route group.
#[derive(Clone, Debug)]
pub struct RateLimitLayerState {
    /// Limiters by class.
    pub limiters: Arc<RateLimiterRegistry>,
    /// Bearer token validation.
    pub auth: Arc<AuthState>,
    /// Class of the routes behind this layer.
    pub class: RouteClass,
}

/// Body of a rate limit rejection.
#[must_use]
pub fn rate_limited_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "rate limit exceeded" })),
    )
        .into_response()
}

/// Per route class rate limiting middleware.
pub async fn rate_limit(
    State(state): State<RateLimitLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let user_id = state.auth.user_from_headers(request.headers());
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let identifier = resolve_identifier(user_id.as_deref(), request.headers(), remote);

    if state.limiters.check(state.class, &identifier) {
        next.run(request).await
    } else {
        tracing::debug!(class = %state.class, identifier = %identifier, path = %request.uri().path(), "Rate limit exceeded");
        rate_limited_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:54321".parse().unwrap())
    }

    #[test]
    fn test_user_takes_precedence() {
        let h = headers(&[("x-forwarded-for", "203.0.113.5")]);
        assert_eq!(resolve_identifier(Some("42"), &h, peer()), "user:42");
    }

    #[test]
    fn test_forwarded_for_single_ip() {
        let h = headers(&[("x-forwarded-for", "203.0.113.5"), ("x-real-ip", "198.51.100.1")]);
        assert_eq!(resolve_identifier(None, &h, peer()), "203.0.113.5");
    }

    #[test]
    fn test_forwarded_for_chain_falls_through() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.5, 10.0.0.1"),
            ("x-real-ip", "198.51.100.1"),
        ]);
        assert_eq!(resolve_identifier(None, &h, peer()), "198.51.100.1");
    }

    #[test]
    fn test_invalid_headers_use_peer() {
        let h = headers(&[("x-forwarded-for", "nonsense"), ("x-real-ip", "also-bad")]);
        assert_eq!(resolve_identifier(None, &h, peer()), "192.0.2.10");
    }

    #[test]
    fn test_ipv6_header() {
        let h = headers(&[("x-real-ip", "2001:db8::1")]);
        assert_eq!(resolve_identifier(None, &h, None), "2001:db8::1");
    }

    #[test]
    fn test_no_address_information() {
        assert_eq!(resolve_identifier(None, &HeaderMap::new(), None), UNKNOWN_CLIENT);
    }

    #[tokio::test]
    async fn test_rejection_body() {
        let response = rate_limited_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("retry-after").is_none());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "error": "rate limit exceeded" }));
    }
}
