//! Per-identifier token bucket rate limiting.
//!
//! Each protected route class owns its own [`RateLimiter`]. Buckets are
//! created lazily on first use, refilled continuously on each check, and
//! evicted by a background sweep once they have been idle long enough.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use gamecheck_core::config::{
    MAX_DURATION_SECS, MissingLimiterPolicy, RateClassConfig, RateLimitConfig,
};

/// Token state for one identifier.
#[derive(Debug, Clone, Copy)]
pub struct KeyedTokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl KeyedTokenBucket {
    /// Current (possibly fractional) token count as of the last refill.
    #[must_use]
    pub const fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Time of the last refill.
    #[must_use]
    pub const fn last_refill(&self) -> Instant {
        self.last_refill
    }
}

/// Keyed token bucket limiter.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, KeyedTokenBucket>>,
    tokens_per_interval: f64,
    interval: Duration,
    max_burst: f64,
    idle_timeout: Duration,
}

impl RateLimiter {
    /// Create a limiter refilling `tokens_per_interval` tokens every
    /// `interval`, holding at most `max_burst`.
    #[must_use]
    pub fn new(tokens_per_interval: u32, interval: Duration, max_burst: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            tokens_per_interval: f64::from(tokens_per_interval),
            interval,
            max_burst: f64::from(max_burst.max(1)),
            idle_timeout: Duration::from_secs(600),
        }
    }

    /// Create a limiter from a class configuration.
    #[must_use]
    pub fn from_class(class: &RateClassConfig) -> Self {
        Self::new(class.tokens_per_interval, class.interval(), class.max_burst)
    }

    /// Set how long a bucket may stay untouched before the sweep evicts it.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Decide whether a request from `identifier` may proceed.
    ///
    /// The first request from an unseen identifier is always admitted and
    /// charged one token.
    pub fn allow(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.lock();

        let Some(bucket) = buckets.get_mut(identifier) else {
            buckets.insert(
                identifier.to_string(),
                KeyedTokenBucket {
                    tokens: self.max_burst - 1.0,
                    last_refill: now,
                },
            );
            return true;
        };

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill = if self.interval.is_zero() {
            self.max_burst
        } else {
            self.tokens_per_interval * elapsed.as_secs_f64() / self.interval.as_secs_f64()
        };
        bucket.tokens = (bucket.tokens + refill).min(self.max_burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Snapshot of the bucket for `identifier`, if one exists.
    #[must_use]
    pub fn bucket(&self, identifier: &str) -> Option<KeyedTokenBucket> {
        self.lock().get(identifier).copied()
    }

    /// Remove buckets idle for longer than the idle timeout.
    ///
    /// Returns the number of evicted buckets.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) <= self.idle_timeout);
        before - buckets.len()
    }

    /// Number of tracked identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no identifiers are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Start the periodic idle sweep.
    ///
    /// The task runs until [`SweepHandle::stop`] is called or the handle is
    /// dropped. `interval` is clamped to between one millisecond and one year.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, label: &str) -> SweepHandle {
        let interval = interval.clamp(
            Duration::from_millis(1),
            Duration::from_secs(MAX_DURATION_SECS),
        );
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let limiter = Arc::clone(self);
        let label = label.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(class = %label, ?interval, "Rate limiter sweep started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep_idle();
                        if evicted > 0 {
                            tracing::info!(class = %label, evicted, remaining = limiter.len(), "Evicted idle rate limit buckets");
                        } else {
                            tracing::debug!(class = %label, evicted, "Rate limiter sweep found nothing idle");
                        }
                    }
                }
            }

            tracing::debug!(class = %label, "Rate limiter sweep stopped");
        });

        SweepHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, KeyedTokenBucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tokens_per_interval", &self.tokens_per_interval)
            .field("interval", &self.interval)
            .field("max_burst", &self.max_burst)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// Handle to a running sweep task.
#[derive(Debug)]
pub struct SweepHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signal the sweep to stop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Rate limiter sweep task failed");
            }
        }
    }

    /// Whether the sweep task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Protected route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Mutating writes.
    Write,
    /// Reads.
    Read,
    /// Auth-sensitive endpoints.
    Auth,
    /// Deletes.
    Delete,
}

impl RouteClass {
    /// All classes.
    pub const ALL: [Self; 4] = [Self::Write, Self::Read, Self::Auth, Self::Delete];

    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
            Self::Auth => "auth",
            Self::Delete => "delete",
        }
    }

    fn config(self, config: &RateLimitConfig) -> Option<&RateClassConfig> {
        let classes = &config.classes;
        match self {
            Self::Write => classes.write.as_ref(),
            Self::Read => classes.read.as_ref(),
            Self::Auth => classes.auth.as_ref(),
            Self::Delete => classes.delete.as_ref(),
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One limiter per configured route class, plus their sweep tasks.
pub struct RateLimiterRegistry {
    limiters: HashMap<RouteClass, Arc<RateLimiter>>,
    sweepers: Mutex<Vec<SweepHandle>>,
    missing_policy: MissingLimiterPolicy,
}

impl RateLimiterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(missing_policy: MissingLimiterPolicy) -> Self {
        Self {
            limiters: HashMap::new(),
            sweepers: Mutex::new(Vec::new()),
            missing_policy,
        }
    }

    /// Build limiters for every configured class and start their sweeps.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let mut registry = Self::new(config.missing_policy);
        for class in RouteClass::ALL {
            if let Some(class_config) = class.config(config) {
                let limiter = RateLimiter::from_class(class_config)
                    .with_idle_timeout(config.idle_timeout());
                registry.register(class, limiter, Some(config.sweep_interval()));
            } else {
                tracing::info!(class = %class, "No rate limiter configured for route class");
            }
        }
        registry
    }

    /// Register a limiter for a class, optionally starting its sweep.
    pub fn register(
        &mut self,
        class: RouteClass,
        limiter: RateLimiter,
        sweep_interval: Option<Duration>,
    ) -> Arc<RateLimiter> {
        let limiter = Arc::new(limiter);
        if let Some(interval) = sweep_interval {
            let handle = limiter.spawn_sweeper(interval, class.as_str());
            self.sweepers
                .get_mut()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(handle);
        }
        self.limiters.insert(class, Arc::clone(&limiter));
        limiter
    }

    /// Limiter for a class.
    #[must_use]
    pub fn get(&self, class: RouteClass) -> Option<&Arc<RateLimiter>> {
        self.limiters.get(&class)
    }

    /// Decide whether `identifier` may access a route of `class`.
    pub fn check(&self, class: RouteClass, identifier: &str) -> bool {
        if let Some(limiter) = self.limiters.get(&class) {
            return limiter.allow(identifier);
        }

        match self.missing_policy {
            MissingLimiterPolicy::Allow => {
                tracing::warn!(class = %class, identifier, "No rate limiter for route class, admitting request");
                true
            }
            MissingLimiterPolicy::Deny => {
                tracing::warn!(class = %class, identifier, "No rate limiter for route class, rejecting request");
                false
            }
        }
    }

    /// Stop every sweep task and wait for them to exit.
    pub async fn shutdown(&self) {
        let handles = std::mem::take(
            &mut *self
                .sweepers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in handles {
            handle.stop().await;
        }
    }

    /// Number of running sweep tasks.
    #[must_use]
    pub fn active_sweepers(&self) -> usize {
        self.sweepers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("classes", &self.limiters.keys().collect::<Vec<_>>())
            .field("missing_policy", &self.missing_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamecheck_core::config::RateClasses;

    fn advance(ms: u64) -> impl std::future::Future<Output = ()> {
        tokio::time::advance(Duration::from_millis(ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_bound() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1), 10);
        for _ in 0..10 {
            assert!(limiter.allow("client"));
        }
        assert!(!limiter.allow("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_after_drain() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1), 10);
        for _ in 0..10 {
            limiter.allow("client");
        }
        assert!(!limiter.allow("client"));

        // T / r = 200ms buys exactly one token.
        advance(200).await;
        assert!(limiter.allow("client"));
        assert!(!limiter.allow("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_class_scenario() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), 3);
        assert!(limiter.allow("user:7"));
        assert!(limiter.allow("user:7"));
        assert!(limiter.allow("user:7"));
        assert!(!limiter.allow("user:7"));

        advance(1000).await;
        assert!(limiter.allow("user:7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_refill_accumulates() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), 1);
        assert!(limiter.allow("ip"));

        // Each rejected check still banks the elapsed fraction.
        for _ in 0..3 {
            advance(250).await;
            assert!(!limiter.allow("ip"));
        }
        advance(250).await;
        assert!(limiter.allow("ip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_capped_at_burst() {
        let limiter = RateLimiter::new(10, Duration::from_secs(1), 3);
        limiter.allow("client");
        advance(60_000).await;
        limiter.allow("client");

        let bucket = limiter.bucket("client").unwrap();
        assert!((bucket.tokens() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifiers_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), 1);
        assert!(limiter.allow("user:1"));
        assert!(!limiter.allow("user:1"));
        assert!(limiter.allow("user:2"));
        assert!(limiter.allow("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), 3)
            .with_idle_timeout(Duration::from_secs(600));
        limiter.allow("old");
        advance(300_000).await;
        limiter.allow("recent");
        advance(301_000).await;

        assert_eq!(limiter.sweep_idle(), 1);
        assert!(limiter.bucket("old").is_none());
        assert!(limiter.bucket("recent").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_identifier_starts_fresh() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), 2)
            .with_idle_timeout(Duration::from_secs(1));
        limiter.allow("client");
        limiter.allow("client");
        advance(2000).await;
        assert_eq!(limiter.sweep_idle(), 1);

        assert!(limiter.allow("client"));
        let bucket = limiter.bucket("client").unwrap();
        assert!((bucket.tokens() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_and_stop() {
        let limiter = Arc::new(
            RateLimiter::new(1, Duration::from_secs(1), 3)
                .with_idle_timeout(Duration::from_secs(600)),
        );
        let handle = limiter.spawn_sweeper(Duration::from_secs(300), "write");

        limiter.allow("client");
        tokio::time::sleep(Duration::from_secs(901)).await;
        assert!(limiter.is_empty());

        handle.stop().await;

        limiter.allow("client");
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_extreme_intervals() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(1), 3));

        let slow = limiter.spawn_sweeper(Duration::MAX, "read");
        let fast = limiter.spawn_sweeper(Duration::ZERO, "auth");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!slow.is_finished());
        assert!(!fast.is_finished());

        slow.stop().await;
        fast.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_from_config() {
        let registry = RateLimiterRegistry::from_config(&RateLimitConfig::default());
        for class in RouteClass::ALL {
            assert!(registry.get(class).is_some());
        }
        assert_eq!(registry.active_sweepers(), 4);

        for _ in 0..3 {
            assert!(registry.check(RouteClass::Write, "user:1"));
        }
        assert!(!registry.check(RouteClass::Write, "user:1"));
        // Classes never share identifiers.
        assert!(registry.check(RouteClass::Read, "user:1"));

        registry.shutdown().await;
        assert_eq!(registry.active_sweepers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_limiter_policy() {
        let config = RateLimitConfig {
            classes: RateClasses {
                delete: None,
                ..RateClasses::default()
            },
            ..RateLimitConfig::default()
        };
        let registry = RateLimiterRegistry::from_config(&config);
        assert!(registry.get(RouteClass::Delete).is_none());
        for _ in 0..100 {
            assert!(registry.check(RouteClass::Delete, "user:1"));
        }
        registry.shutdown().await;

        let deny = RateLimiterRegistry::new(MissingLimiterPolicy::Deny);
        assert!(!deny.check(RouteClass::Read, "10.0.0.1"));
    }

    #[test]
    fn test_route_class_names() {
        assert_eq!(RouteClass::Write.to_string(), "write");

        // Class names match the configuration table.
        let configured: Vec<_> = RateClasses::default().iter().map(|(name, _)| name).collect();
        let names: Vec<_> = RouteClass::ALL.iter().map(|class| class.as_str()).collect();
        assert_eq!(configured, names);
    }
}
