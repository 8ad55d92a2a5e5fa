//! Shared remote store abstraction.
//!
//! The cache's remote tier and the rate limiter both coordinate through
//! one key/value store reachable by every worker process. Only a handful
//! of primitives are required, so the seam is a trait: [`RedisStore`] is
//! the production backend, [`MemoryStore`] a process-local stand-in used
//! as a degraded fallback and by the test suite.

use std::time::Duration;

use thiserror::Error;

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by a store backend.
///
/// These never cross the cache/limiter public API; both components absorb
/// them into statistics counters and degrade instead of propagating.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached (connect/IO/timeout).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The backend answered but the operation failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Primitives the coordination store must offer.
///
/// Two facets: opaque key/value entries with expiry (cache remote tier),
/// and a scored window per identifier (rate limiter). A scored window is
/// a set of unique members ordered by a float score; scores here are
/// always unix-epoch seconds so independent processes agree on time.
pub trait RemoteStore: Send + Sync {
    /// Fetch the payload stored under `key`, if any.
    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`.
    fn put_value(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete_value(&self, key: &str) -> Result<(), StoreError>;

    /// Drop every key held by this store.
    fn flush(&self) -> Result<(), StoreError>;

    /// Cheap liveness probe.
    fn ping(&self) -> Result<(), StoreError>;

    /// Remove window members with a score at or below `min_score`.
    /// Returns how many were removed.
    fn prune_window(&self, key: &str, min_score: f64) -> Result<u64, StoreError>;

    /// Count the members currently recorded in the window.
    fn window_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Record `member` in the window at `score`.
    fn window_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Score of the oldest member still in the window, if any.
    fn oldest_score(&self, key: &str) -> Result<Option<f64>, StoreError>;

    /// Refresh the window key's own expiry so abandoned identifiers are
    /// garbage-collected by the store.
    fn touch_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}
