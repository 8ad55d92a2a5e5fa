//! Composition root wiring the three components to one configuration.
//!
//! Applications build a single [`ResilienceHub`] at startup and hand it
//! to every worker. One shared store instance backs both the cache's
//! remote tier and the rate limiter; breakers are shared by dependency
//! name through the hub's registry instead of hidden module globals.

use std::sync::Arc;

use crate::breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::cache::TieredCache;
use crate::config::BallastConfig;
use crate::limiter::SlidingWindowLimiter;
use crate::store::{MemoryStore, RedisStore, RemoteStore};

pub struct ResilienceHub {
    cache: Arc<TieredCache>,
    breakers: CircuitBreakerRegistry,
    limiter: Arc<SlidingWindowLimiter>,
}

impl ResilienceHub {
    /// Build the hub, connecting to the configured coordination store.
    ///
    /// An unreachable store is not fatal: the cache runs memory+file and
    /// the limiter falls back to a process-local window, so workers keep
    /// operating in degraded mode rather than refusing to start.
    pub fn from_config(config: &BallastConfig) -> Self {
        let remote: Option<Arc<dyn RemoteStore>> = match config.redis_url.as_deref() {
            Some(url) => match RedisStore::connect(url) {
                Ok(store) => Some(Arc::new(store)),
                Err(err) => {
                    tracing::warn!(error = %err, "coordination store unreachable at startup");
                    None
                }
            },
            None => None,
        };
        Self::with_store(config, remote)
    }

    /// Build the hub over an already-constructed store (or none).
    pub fn with_store(config: &BallastConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let cache = Arc::new(TieredCache::new(config.cache.clone(), remote.clone()));

        let limiter_store = remote.unwrap_or_else(|| {
            tracing::warn!("rate limiter coordinating within this process only");
            Arc::new(MemoryStore::new())
        });
        let limiter = Arc::new(SlidingWindowLimiter::new(
            limiter_store,
            config.limiter.clone(),
        ));

        Self {
            cache,
            breakers: CircuitBreakerRegistry::new(config.breaker),
            limiter,
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Shared breaker for a dependency name, created on first use with
    /// the configured default.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(name)
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use std::time::Duration;

    fn test_config(dir: &tempfile::TempDir) -> BallastConfig {
        let mut config = BallastConfig::default();
        config.cache.cache_dir = dir.path().to_path_buf();
        config.limiter.max_requests = 1;
        config.limiter.window = Duration::from_secs(30);
        config
    }

    #[test]
    fn hub_without_store_still_serves_all_components() {
        let dir = tempfile::tempdir().unwrap();
        let hub = ResilienceHub::with_store(&test_config(&dir), None);

        hub.cache().set("k", "products", &7u32, Duration::from_secs(60));
        assert_eq!(hub.cache().get::<u32>("k", "products"), Some(7));

        assert!(hub.limiter().try_acquire("marketplace_api"));
        assert!(!hub.limiter().try_acquire("marketplace_api"));

        assert_eq!(hub.breaker("marketplace_api").state(), CircuitState::Closed);
    }

    #[test]
    fn hub_shares_one_store_between_cache_and_limiter() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let hub = ResilienceHub::with_store(&test_config(&dir), Some(store.clone()));

        hub.cache().set("k", "products", &7u32, Duration::from_secs(60));
        assert!(store.get_value("products:k").unwrap().is_some());

        assert!(hub.limiter().try_acquire("marketplace_api"));
        assert_eq!(store.window_len("rate_limit:marketplace_api").unwrap(), 1);
    }

    #[test]
    fn breakers_are_shared_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let hub = ResilienceHub::with_store(&test_config(&dir), None);

        let first = hub.breaker("cms_api");
        let second = hub.breaker("cms_api");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
