//! Resilience and coordination primitives for fleets of parallel sync
//! workers calling slow or rate-limited external APIs.
//!
//! Three independent, composable components:
//! - [`TieredCache`]: read-through/write-through cache over memory, a
//!   shared remote store, and local files, degrading tier-by-tier when a
//!   backend is unavailable.
//! - [`CircuitBreaker`]: per-dependency state machine that stops calling
//!   a persistently failing service and probes recovery automatically.
//! - [`SlidingWindowLimiter`]: sliding-window counter coordinated through
//!   a shared store so independent processes respect one global budget.
//!
//! None of the three depends on the others; a caller typically wraps an
//! external call first in [`SlidingWindowLimiter::acquire`], then in
//! [`CircuitBreaker::call`], with cache lookups around the whole
//! operation. [`ResilienceHub`] is the composition root that wires all
//! three to one configuration and one shared store.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod hub;
pub mod limiter;
pub mod serde_secs;
pub mod store;

pub use breaker::{
    BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitError,
    CircuitState,
};
pub use cache::{CacheConfig, CacheStatsSnapshot, SkipTiers, TieredCache};
pub use config::{BallastConfig, ConfigLoadError};
pub use hub::ResilienceHub;
pub use limiter::{RateLimiterConfig, SlidingWindowLimiter, WindowStats};
pub use store::{MemoryStore, RedisStore, RemoteStore, StoreError};
