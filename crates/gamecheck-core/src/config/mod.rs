//! Configuration loading and validation.
//!
//! Supports JSON5 format. Config location: `~/.gamecheck/gamecheck.json`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for every configured duration: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bearer token configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per route class rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Catalog search cache.
    #[serde(default)]
    pub search_cache: SearchCacheConfig,

    /// External catalog endpoint.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Activity history retention.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Global settings.
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("gamecheck.json")
    }

    /// Get the `GameCheck` state directory.
    ///
    /// Uses `GAMECHECK_STATE_DIR` env var if set, otherwise `~/.gamecheck`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("GAMECHECK_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".gamecheck")
        } else {
            PathBuf::from(".gamecheck")
        }
    }

    /// Directory holding the history database.
    #[must_use]
    pub fn history_dir() -> PathBuf {
        Self::state_dir().join("history")
    }

    /// Apply environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("GAMECHECK_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }

        if std::env::var("GAMECHECK_AUTH_DISABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            self.auth.enabled = false;
        }

        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        for (class, limits) in self.rate_limits.classes.iter() {
            if limits.tokens_per_interval == 0 || limits.interval_ms == 0 || limits.max_burst == 0
            {
                return Err(ConfigError::Validation(format!(
                    "Rate class '{class}' needs non-zero tokensPerInterval, intervalMs and maxBurst"
                )));
            }
        }

        if self.rate_limits.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "rateLimits.sweepIntervalSecs must be at least 1".to_string(),
            ));
        }

        if self.search_cache.max_entries == 0 || self.search_cache.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "Search cache needs non-zero maxEntries and ttlSecs".to_string(),
            ));
        }

        let durations = [
            ("server.requestTimeoutSecs", self.server.request_timeout_secs),
            ("auth.tokenExpirySecs", self.auth.token_expiry_secs),
            ("rateLimits.sweepIntervalSecs", self.rate_limits.sweep_interval_secs),
            ("rateLimits.idleTimeoutSecs", self.rate_limits.idle_timeout_secs),
            ("searchCache.ttlSecs", self.search_cache.ttl_secs),
            ("searchCache.fetchTimeoutSecs", self.search_cache.fetch_timeout_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Validation(format!(
                    "{name} must be at most {MAX_DURATION_SECS} (one year)"
                )));
            }
        }

        for (class, limits) in self.rate_limits.classes.iter() {
            if limits.interval_ms > MAX_DURATION_SECS * 1000 {
                return Err(ConfigError::Validation(format!(
                    "Rate class '{class}' intervalMs must be at most one year"
                )));
            }
        }

        if self.history.max_per_owner == 0 {
            return Err(ConfigError::Validation(
                "history.maxPerOwner must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Origins allowed by CORS; `"*"` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            request_timeout_secs: default_request_timeout(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

const fn default_port() -> u16 {
    5000
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

/// Bearer token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Whether bearer tokens are checked at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JWT secret (hex-encoded). Generated at startup if not set.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(default = "default_token_expiry")]
    pub token_expiry_secs: u64,
}

impl AuthConfig {
    /// Access token lifetime as a `Duration`.
    #[must_use]
    pub const fn token_expiry(&self) -> Duration {
        Duration::from_secs(self.token_expiry_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: None,
            token_expiry_secs: default_token_expiry(),
        }
    }
}

const fn default_token_expiry() -> u64 {
    86400
}

/// What to do when a route asks for a limiter that was never configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingLimiterPolicy {
    /// Admit the request (fail-open).
    #[default]
    Allow,
    /// Reject the request as rate limited (fail-closed).
    Deny,
}

/// Token bucket parameters for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateClassConfig {
    /// Tokens added per interval.
    pub tokens_per_interval: u32,
    /// Refill interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Bucket capacity.
    pub max_burst: u32,
}

impl RateClassConfig {
    /// Create a new class configuration.
    #[must_use]
    pub fn new(tokens_per_interval: u32, interval: Duration, max_burst: u32) -> Self {
        Self {
            tokens_per_interval,
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            max_burst,
        }
    }

    /// Refill interval as a `Duration`.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

const fn default_interval_ms() -> u64 {
    1000
}

/// Rate class table. A class set to `null` has no limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateClasses {
    /// Mutating writes (add/update game).
    #[serde(default = "default_write_class")]
    pub write: Option<RateClassConfig>,
    /// Reads (feeds, lists, search).
    #[serde(default = "default_read_class")]
    pub read: Option<RateClassConfig>,
    /// Auth-sensitive endpoints.
    #[serde(default = "default_auth_class")]
    pub auth: Option<RateClassConfig>,
    /// Deletes.
    #[serde(default = "default_delete_class")]
    pub delete: Option<RateClassConfig>,
}

impl RateClasses {
    /// Iterate over the configured classes by name.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &RateClassConfig)> {
        [
            ("write", self.write.as_ref()),
            ("read", self.read.as_ref()),
            ("auth", self.auth.as_ref()),
            ("delete", self.delete.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, class)| class.map(|c| (name, c)))
    }
}

impl Default for RateClasses {
    fn default() -> Self {
        Self {
            write: default_write_class(),
            read: default_read_class(),
            auth: default_auth_class(),
            delete: default_delete_class(),
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_write_class() -> Option<RateClassConfig> {
    Some(RateClassConfig::new(1, Duration::from_secs(1), 3))
}

#[allow(clippy::unnecessary_wraps)]
fn default_read_class() -> Option<RateClassConfig> {
    Some(RateClassConfig::new(5, Duration::from_secs(1), 10))
}

#[allow(clippy::unnecessary_wraps)]
fn default_auth_class() -> Option<RateClassConfig> {
    Some(RateClassConfig::new(10, Duration::from_secs(1), 20))
}

#[allow(clippy::unnecessary_wraps)]
fn default_delete_class() -> Option<RateClassConfig> {
    Some(RateClassConfig::new(3, Duration::from_secs(1), 5))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Policy for routes whose class has no limiter.
    #[serde(default)]
    pub missing_policy: MissingLimiterPolicy,

    /// How often idle buckets are swept, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Buckets untouched for this long are evicted, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Per class bucket parameters.
    #[serde(default)]
    pub classes: RateClasses,
}

impl RateLimitConfig {
    /// Sweep interval as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            missing_policy: MissingLimiterPolicy::default(),
            sweep_interval_secs: default_sweep_interval(),
            idle_timeout_secs: default_idle_timeout(),
            classes: RateClasses::default(),
        }
    }
}

const fn default_sweep_interval() -> u64 {
    300
}

const fn default_idle_timeout() -> u64 {
    600
}

/// Search cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCacheConfig {
    /// Entry lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Maximum number of cached queries.
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Upper bound on a single provider call, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl SearchCacheConfig {
    /// Entry lifetime as a `Duration`.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Provider call timeout as a `Duration`.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for SearchCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

const fn default_cache_ttl() -> u64 {
    600
}

const fn default_cache_entries() -> usize {
    400
}

const fn default_fetch_timeout() -> u64 {
    10
}

/// External catalog endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Search endpoint; the encoded query is appended as a path segment.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// User agent sent with catalog requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// `Accept-Language` sent with catalog requests; controls the locale of
    /// returned names.
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
        }
    }
}

fn default_search_url() -> String {
    "https://steamcommunity.com/actions/SearchApps/".to_string()
}

fn default_user_agent() -> String {
    "gamecheck-backend/1.0".to_string()
}

fn default_accept_language() -> String {
    "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}

/// Activity history retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Records kept per user.
    #[serde(default = "default_max_per_owner")]
    pub max_per_owner: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_per_owner: default_max_per_owner(),
        }
    }
}

const fn default_max_per_owner() -> usize {
    30
}

/// Global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.search_cache.max_entries, 400);
        assert_eq!(config.search_cache.ttl(), Duration::from_secs(600));
        assert_eq!(config.history.max_per_owner, 30);
        assert_eq!(config.rate_limits.missing_policy, MissingLimiterPolicy::Allow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_rate_classes() {
        let classes = RateClasses::default();
        assert_eq!(
            classes.write,
            Some(RateClassConfig::new(1, Duration::from_secs(1), 3))
        );
        assert_eq!(
            classes.read,
            Some(RateClassConfig::new(5, Duration::from_secs(1), 10))
        );
        assert_eq!(
            classes.auth,
            Some(RateClassConfig::new(10, Duration::from_secs(1), 20))
        );
        assert_eq!(
            classes.delete,
            Some(RateClassConfig::new(3, Duration::from_secs(1), 5))
        );
        assert_eq!(classes.iter().count(), 4);
    }

    #[test]
    fn test_config_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");

        let mut config = Config::default();
        config.server.port = 8080;
        config.rate_limits.classes.delete = None;

        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.port, 8080);
        assert!(loaded.rate_limits.classes.delete.is_none());
        assert!(loaded.rate_limits.classes.write.is_some());
    }

    #[test]
    fn test_json5_parsing() {
        let json5_content = r#"{
            // This is a comment
            server: { port: 8080 },
            rateLimits: {
                missingPolicy: "deny",
                classes: {
                    read: { tokensPerInterval: 2, maxBurst: 4 },
                    auth: null,
                },
            },
            history: { maxPerOwner: 10, },
        }"#;

        let config: Config = json5::from_str(json5_content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limits.missing_policy, MissingLimiterPolicy::Deny);
        let read = config.rate_limits.classes.read.unwrap();
        assert_eq!(read.tokens_per_interval, 2);
        assert_eq!(read.interval(), Duration::from_secs(1));
        assert!(config.rate_limits.classes.auth.is_none());
        assert!(config.rate_limits.classes.write.is_some());
        assert_eq!(config.history.max_per_owner, 10);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limits.classes.read = Some(RateClassConfig::new(0, Duration::from_secs(1), 1));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.history.max_per_owner = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search_cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_upper_bounds() {
        let mut config = Config::default();
        config.search_cache.ttl_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limits.sweep_interval_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.token_expiry_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limits.classes.write =
            Some(RateClassConfig::new(1, Duration::from_secs(MAX_DURATION_SECS + 1), 1));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search_cache.ttl_secs = MAX_DURATION_SECS;
        config.rate_limits.idle_timeout_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_class_interval_saturates() {
        let class = RateClassConfig::new(1, Duration::MAX, 1);
        assert_eq!(class.interval_ms, u64::MAX);
    }

    #[test]
    fn test_state_dir() {
        let dir = Config::state_dir();
        assert!(dir.to_str().unwrap().contains("gamecheck"));
    }
}
