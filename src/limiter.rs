//! Distributed sliding-window rate limiter.
//!
//! Workers in separate processes collectively respect one request budget
//! by recording each granted request in a scored window inside the
//! shared store. Every acquire prunes entries older than the window,
//! counts what remains, and inserts itself only if a slot is free.
//!
//! The prune/count/insert sequence is not one atomic unit across
//! concurrent callers, so a simultaneous burst can briefly overshoot the
//! budget; the design accepts that approximation. Store outages fail
//! open: a worker that cannot reach the coordination store proceeds
//! rather than stalling every caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{RemoteStore, StoreError};

/// Configuration for the sliding-window budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed inside one window, across all processes.
    pub max_requests: u64,
    /// Window length.
    #[serde(with = "crate::serde_secs")]
    pub window: Duration,
    /// Prefix for window keys in the shared store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "rate_limit".to_string()
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 8,
            window: Duration::from_secs(1),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_max_requests(mut self, max: u64) -> Self {
        self.max_requests = max;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Observational snapshot of one identifier's window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub current_count: u64,
    pub max_requests: u64,
    pub window: Duration,
    pub available: u64,
    /// In-window count as a percentage of the budget, one decimal.
    pub utilization: f64,
}

enum Attempt {
    Granted,
    Full { count: u64 },
}

/// Sliding-window counter coordinated through the shared store.
pub struct SlidingWindowLimiter {
    store: Arc<dyn RemoteStore>,
    config: RateLimiterConfig,
    fail_open_grants: AtomicU64,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn RemoteStore>, config: RateLimiterConfig) -> Self {
        tracing::info!(
            max_requests = config.max_requests,
            window_secs = config.window.as_secs_f64(),
            "rate limiter initialized"
        );
        Self {
            store,
            config,
            fail_open_grants: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// How many requests were granted because the store was unreachable.
    pub fn fail_open_count(&self) -> u64 {
        self.fail_open_grants.load(Ordering::Relaxed)
    }

    fn window_key(&self, identifier: &str) -> String {
        format!("{}:{}", self.config.key_prefix, identifier)
    }

    fn now_secs() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Try to take a slot for `identifier`.
    ///
    /// Non-blocking mode returns `false` as soon as the window is full.
    /// Blocking mode polls, sleeping roughly until the oldest in-window
    /// entry ages out, and gives up once the cumulative wait exceeds
    /// `timeout`. A store error grants the request (fail-open).
    pub fn acquire(&self, identifier: &str, blocking: bool, timeout: Duration) -> bool {
        let key = self.window_key(identifier);
        let started = Instant::now();

        loop {
            let now = Self::now_secs();
            match self.attempt(&key, now) {
                Ok(Attempt::Granted) => return true,
                Ok(Attempt::Full { count }) => {
                    if !blocking {
                        return false;
                    }
                    if started.elapsed() >= timeout {
                        tracing::warn!(
                            identifier,
                            count,
                            max = self.config.max_requests,
                            timeout_secs = timeout.as_secs_f64(),
                            "rate limit wait timed out"
                        );
                        return false;
                    }
                    match self.next_slot_delay(&key, now) {
                        Ok(delay) => thread::sleep(delay),
                        Err(err) => return self.fail_open(identifier, &err),
                    }
                }
                Err(err) => return self.fail_open(identifier, &err),
            }
        }
    }

    /// Non-blocking convenience for `acquire(id, false, 0)`.
    pub fn try_acquire(&self, identifier: &str) -> bool {
        self.acquire(identifier, false, Duration::ZERO)
    }

    fn attempt(&self, key: &str, now: f64) -> Result<Attempt, StoreError> {
        let window_start = now - self.config.window.as_secs_f64();
        self.store.prune_window(key, window_start)?;
        let count = self.store.window_len(key)?;

        if count < self.config.max_requests {
            let member = format!("{now}:{}", Uuid::new_v4());
            self.store.window_add(key, &member, now)?;
            // Abandoned identifiers must not pile up in the store.
            self.store.touch_expiry(key, self.config.window * 2)?;
            Ok(Attempt::Granted)
        } else {
            Ok(Attempt::Full { count })
        }
    }

    /// Sleep interval until a slot plausibly frees: the oldest entry's
    /// remaining lifetime, floored at 10ms and clipped at 500ms per
    /// iteration.
    fn next_slot_delay(&self, key: &str, now: f64) -> Result<Duration, StoreError> {
        let delay = match self.store.oldest_score(key)? {
            Some(oldest) => {
                let until_free = (oldest + self.config.window.as_secs_f64()) - now;
                until_free.clamp(0.01, 0.5)
            }
            None => 0.1,
        };
        Ok(Duration::from_secs_f64(delay))
    }

    fn fail_open(&self, identifier: &str, err: &StoreError) -> bool {
        self.fail_open_grants.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            identifier,
            error = %err,
            "coordination store unavailable, granting request (fail-open)"
        );
        true
    }

    /// Current window occupancy for `identifier`. Prunes stale entries
    /// but does not take a slot.
    pub fn stats(&self, identifier: &str) -> WindowStats {
        let key = self.window_key(identifier);
        let now = Self::now_secs();
        let window_start = now - self.config.window.as_secs_f64();

        let counted = self
            .store
            .prune_window(&key, window_start)
            .and_then(|_| self.store.window_len(&key));

        let current_count = match counted {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(identifier, error = %err, "rate limiter stats unavailable");
                0
            }
        };

        let utilization = if self.config.max_requests > 0 {
            let raw = current_count as f64 / self.config.max_requests as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        } else {
            0.0
        };

        WindowStats {
            current_count,
            max_requests: self.config.max_requests,
            window: self.config.window,
            available: self.config.max_requests.saturating_sub(current_count),
            utilization,
        }
    }

    /// Drop every recorded entry for `identifier`, freeing the budget.
    pub fn reset(&self, identifier: &str) {
        let key = self.window_key(identifier);
        match self.store.delete_value(&key) {
            Ok(()) => tracing::info!(identifier, "rate limit window reset"),
            Err(err) => {
                tracing::warn!(identifier, error = %err, "rate limit reset failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct BrokenStore;

    impl RemoteStore for BrokenStore {
        fn get_value(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn put_value(&self, _: &str, _: &[u8], _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn delete_value(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn flush(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn prune_window(&self, _: &str, _: f64) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn window_len(&self, _: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn window_add(&self, _: &str, _: &str, _: f64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn oldest_score(&self, _: &str) -> Result<Option<f64>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn touch_expiry(&self, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    fn limiter(max: u64, window: Duration) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimiterConfig::default()
                .with_max_requests(max)
                .with_window(window),
        )
    }

    #[test]
    fn budget_enforced_within_window() {
        let limiter = limiter(1, Duration::from_secs(2));
        assert!(limiter.try_acquire("api"));
        assert!(!limiter.try_acquire("api"));
    }

    #[test]
    fn window_slides_and_frees_slots() {
        let limiter = limiter(1, Duration::from_millis(100));
        assert!(limiter.try_acquire("api"));
        assert!(!limiter.try_acquire("api"));

        std::thread::sleep(Duration::from_millis(150));
        assert!(limiter.try_acquire("api"));
    }

    #[test]
    fn identifiers_have_independent_budgets() {
        let limiter = limiter(1, Duration::from_secs(5));
        assert!(limiter.try_acquire("marketplace"));
        assert!(limiter.try_acquire("cms"));
        assert!(!limiter.try_acquire("marketplace"));
    }

    #[test]
    fn blocking_acquire_waits_for_a_slot() {
        let limiter = limiter(1, Duration::from_millis(80));
        assert!(limiter.try_acquire("api"));

        let started = Instant::now();
        assert!(limiter.acquire("api", true, Duration::from_secs(2)));
        // It had to wait for the first entry to age out of the window.
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn blocking_acquire_times_out() {
        let limiter = limiter(1, Duration::from_secs(30));
        assert!(limiter.try_acquire("api"));
        assert!(!limiter.acquire("api", true, Duration::from_millis(60)));
    }

    #[test]
    fn store_outage_fails_open() {
        let limiter =
            SlidingWindowLimiter::new(Arc::new(BrokenStore), RateLimiterConfig::default());
        assert!(limiter.try_acquire("api"));
        assert!(limiter.acquire("api", true, Duration::from_secs(1)));
        assert_eq!(limiter.fail_open_count(), 2);
    }

    #[test]
    fn reset_frees_the_budget() {
        let limiter = limiter(1, Duration::from_secs(30));
        assert!(limiter.try_acquire("api"));
        assert!(!limiter.try_acquire("api"));

        limiter.reset("api");
        assert!(limiter.try_acquire("api"));
    }

    #[test]
    fn stats_report_occupancy() {
        let limiter = limiter(4, Duration::from_secs(30));
        assert!(limiter.try_acquire("api"));
        assert!(limiter.try_acquire("api"));
        assert!(limiter.try_acquire("api"));

        let stats = limiter.stats("api");
        assert_eq!(stats.current_count, 3);
        assert_eq!(stats.max_requests, 4);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.utilization, 75.0);
    }

    #[test]
    fn stats_on_fresh_identifier_are_empty() {
        let limiter = limiter(8, Duration::from_secs(1));
        let stats = limiter.stats("untouched");
        assert_eq!(stats.current_count, 0);
        assert_eq!(stats.available, 8);
        assert_eq!(stats.utilization, 0.0);
    }
}
