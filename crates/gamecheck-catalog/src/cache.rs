//! TTL and capacity bounded lookup cache in front of a catalog provider.
//!
//! Queries are normalized before lookup (whitespace trimmed, typographic
//! apostrophes folded to `'`) and keyed case-insensitively. Empty result
//! sets are cached like any other answer; provider failures never are.
//!
//! When a new key arrives and the cache is full, expired entries are swept
//! first. If that frees nothing, the whole cache is cleared.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use unicode_normalization::UnicodeNormalization;

use crate::traits::{CatalogError, CatalogProvider, SearchResult};
use gamecheck_core::config::{MAX_DURATION_SECS, SearchCacheConfig};

/// Apostrophe look-alikes folded to `'`, including the common mojibake
/// renderings of U+2019 and U+2018.
const APOSTROPHE_VARIANTS: [&str; 6] = [
    "\u{2019}",
    "\u{2018}",
    "\u{0432}\u{0402}\u{2122}",
    "\u{0432}\u{0402}\u{02dc}",
    "\u{00e2}\u{20ac}\u{2122}",
    "\u{00e2}\u{20ac}\u{02dc}",
];

/// Normalize a raw user query.
#[must_use]
pub fn normalize_query(raw: &str) -> String {
    let mut query: String = raw.trim().nfc().collect();
    for variant in APOSTROPHE_VARIANTS {
        if query.contains(variant) {
            query = query.replace(variant, "'");
        }
    }
    query
}

/// Cache key for an already normalized query.
#[must_use]
pub fn cache_key(normalized: &str) -> String {
    normalized.to_lowercase()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Arc<Vec<SearchResult>>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Search cache.
pub struct SearchCache {
    provider: Arc<dyn CatalogProvider>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    fetch_timeout: Duration,
}

impl SearchCache {
    /// Create a cache from configuration.
    #[must_use]
    pub fn new(provider: Arc<dyn CatalogProvider>, config: &SearchCacheConfig) -> Self {
        Self::with_settings(
            provider,
            config.ttl(),
            config.max_entries,
            config.fetch_timeout(),
        )
    }

    /// Create a cache with explicit settings.
    ///
    /// `ttl` is capped at one year.
    #[must_use]
    pub fn with_settings(
        provider: Arc<dyn CatalogProvider>,
        ttl: Duration,
        max_entries: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
            ttl: ttl.min(Duration::from_secs(MAX_DURATION_SECS)),
            max_entries: max_entries.max(1),
            fetch_timeout,
        }
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Look up a query, fetching from the provider on a miss.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQuery` if the query is blank after normalization, or
    /// the provider error (including a timeout) on a failed fetch.
    pub async fn get_or_fetch(&self, raw: &str) -> Result<Arc<Vec<SearchResult>>, CatalogError> {
        let normalized = normalize_query(raw);
        if normalized.is_empty() {
            return Err(CatalogError::EmptyQuery);
        }
        let key = cache_key(&normalized);

        if let Some(results) = self.lookup(&key) {
            tracing::debug!(query = %key, hits = results.len(), "Search cache hit");
            return Ok(results);
        }

        tracing::info!(query = %normalized, provider = self.provider.name(), "Fetching from catalog");

        let fetched =
            match tokio::time::timeout(self.fetch_timeout, self.provider.search(&normalized)).await
            {
                Ok(Ok(results)) => Arc::new(results),
                Ok(Err(e)) => {
                    tracing::warn!(query = %normalized, error = %e, "Catalog search failed");
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(query = %normalized, timeout = ?self.fetch_timeout, "Catalog search timed out");
                    return Err(CatalogError::Timeout(self.fetch_timeout));
                }
            };

        if fetched.is_empty() {
            tracing::info!(query = %normalized, "Catalog returned no matches");
        } else {
            tracing::info!(query = %normalized, results = fetched.len(), "Catalog search succeeded");
        }

        self.store(key, Arc::clone(&fetched));
        Ok(fetched)
    }

    /// Look up a query and return at most `limit` results (`0` means all).
    ///
    /// # Errors
    ///
    /// Same as [`SearchCache::get_or_fetch`].
    pub async fn search(&self, raw: &str, limit: usize) -> Result<Vec<SearchResult>, CatalogError> {
        let results = self.get_or_fetch(raw).await?;
        let take = if limit == 0 { results.len() } else { limit };
        Ok(results.iter().take(take).cloned().collect())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<Arc<Vec<SearchResult>>> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(Arc::clone(&entry.results)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, results: Arc<Vec<SearchResult>>) {
        let now = Instant::now();
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| !entry.is_expired(now));
            if entries.len() >= self.max_entries {
                tracing::info!(entries = entries.len(), "Search cache full, clearing");
                entries.clear();
            }
        }

        entries.insert(
            key,
            CacheEntry {
                results,
                expires_at: now + self.ttl,
            },
        );
    }
}
