//! Multi-tier cache with automatic degradation.
//!
//! Lookup order: memory (process-local, minutes), remote store (shared
//! across workers, hours), files (local disk, days). A hit in a slower
//! tier is promoted into every faster tier, clamped to each tier's own
//! TTL ceiling. A tier that fails — remote store unreachable, disk
//! trouble, corrupt entry — degrades silently: the operation continues
//! against the remaining tiers and the failure only shows up in the
//! statistics counters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::RemoteStore;

mod file;
mod memory;

use file::{FileLookup, FileTier};
use memory::MemoryTier;

/// Cache construction parameters. All knobs are fixed at construction;
/// there is no runtime reconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for the file tier.
    pub cache_dir: PathBuf,
    pub enable_memory: bool,
    pub enable_remote: bool,
    pub enable_file: bool,
    /// TTL ceiling for the memory tier.
    #[serde(with = "crate::serde_secs")]
    pub memory_max_ttl: Duration,
    /// TTL ceiling for the remote tier.
    #[serde(with = "crate::serde_secs")]
    pub remote_max_ttl: Duration,
    /// TTL ceiling for the file tier.
    #[serde(with = "crate::serde_secs")]
    pub file_max_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            enable_memory: true,
            enable_remote: true,
            enable_file: true,
            memory_max_ttl: Duration::from_secs(5 * 60),
            remote_max_ttl: Duration::from_secs(24 * 60 * 60),
            file_max_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl CacheConfig {
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.enable_memory = enabled;
        self
    }

    pub fn with_remote(mut self, enabled: bool) -> Self {
        self.enable_remote = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.enable_file = enabled;
        self
    }

    pub fn with_memory_max_ttl(mut self, ttl: Duration) -> Self {
        self.memory_max_ttl = ttl;
        self
    }

    pub fn with_remote_max_ttl(mut self, ttl: Duration) -> Self {
        self.remote_max_ttl = ttl;
        self
    }

    pub fn with_file_max_ttl(mut self, ttl: Duration) -> Self {
        self.file_max_ttl = ttl;
        self
    }
}

/// Per-call opt-out of individual tiers on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipTiers {
    pub memory: bool,
    pub remote: bool,
    pub file: bool,
}

#[derive(Debug, Default)]
struct CacheStats {
    memory_hits: AtomicU64,
    remote_hits: AtomicU64,
    file_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub remote_hits: u64,
    pub file_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
}

impl CacheStatsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.memory_hits + self.remote_hits + self.file_hits
    }

    /// Hit percentage over all lookups, 0 when nothing was requested yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits() as f64 / total as f64 * 100.0
        }
    }
}

/// Read-through/write-through cache over up to three tiers.
///
/// Values are serialized with `serde_json`, so anything `Serialize` +
/// `DeserializeOwned` can be cached. Each tier stores its own copy with
/// its own write time; expiry in one tier says nothing about the others.
pub struct TieredCache {
    config: CacheConfig,
    memory: Option<MemoryTier>,
    remote: Option<Arc<dyn RemoteStore>>,
    file: Option<FileTier>,
    stats: CacheStats,
}

impl TieredCache {
    /// Build the cache, probing the remote store once.
    ///
    /// An unreachable remote store permanently disables that tier for
    /// this instance — deliberate fail-open degradation, not an error.
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let memory = config.enable_memory.then(MemoryTier::new);

        let remote = if config.enable_remote {
            remote.and_then(|store| match store.ping() {
                Ok(()) => Some(store),
                Err(err) => {
                    tracing::warn!(error = %err, "remote store unreachable, remote tier disabled");
                    None
                }
            })
        } else {
            None
        };

        let file = if config.enable_file {
            FileTier::open(&config.cache_dir)
        } else {
            None
        };

        tracing::info!(
            memory = memory.is_some(),
            remote = remote.is_some(),
            file = file.is_some(),
            "tiered cache initialized"
        );

        Self {
            config,
            memory,
            remote,
            file,
            stats: CacheStats::default(),
        }
    }

    fn full_key(key: &str, namespace: &str) -> String {
        if namespace.is_empty() {
            key.to_string()
        } else {
            format!("{namespace}:{key}")
        }
    }

    fn count_error(&self) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Look `key` up tier by tier, promoting a hit into faster tiers.
    pub fn get<T: DeserializeOwned>(&self, key: &str, namespace: &str) -> Option<T> {
        let full_key = Self::full_key(key, namespace);

        if let Some(memory) = &self.memory {
            if let Some(bytes) = memory.get(&full_key) {
                match serde_json::from_slice(&bytes) {
                    Ok(value) => {
                        self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(key = %full_key, tier = "memory", "cache hit");
                        return Some(value);
                    }
                    Err(_) => {
                        self.count_error();
                        memory.remove(&full_key);
                    }
                }
            }
        }

        if let Some(remote) = &self.remote {
            match remote.get_value(&full_key) {
                Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                    Ok(value) => {
                        self.stats.remote_hits.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(key = %full_key, tier = "remote", "cache hit");
                        if let Some(memory) = &self.memory {
                            memory.put(&full_key, bytes, self.config.memory_max_ttl);
                        }
                        return Some(value);
                    }
                    Err(_) => self.count_error(),
                },
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(key = %full_key, error = %err, "remote tier read failed");
                    self.count_error();
                }
            }
        }

        if let Some(file) = &self.file {
            if let FileLookup::Hit { data, ttl } = file.get(&full_key) {
                self.stats.file_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %full_key, tier = "file", "cache hit");

                match serde_json::to_vec(&data) {
                    Ok(bytes) => {
                        if let Some(remote) = &self.remote {
                            let remote_ttl = ttl.min(self.config.remote_max_ttl);
                            if let Err(err) = remote.put_value(&full_key, &bytes, remote_ttl) {
                                tracing::debug!(key = %full_key, error = %err, "promotion to remote failed");
                                self.count_error();
                            }
                        }
                        if let Some(memory) = &self.memory {
                            memory.put(&full_key, bytes, ttl.min(self.config.memory_max_ttl));
                        }
                    }
                    Err(_) => self.count_error(),
                }

                match serde_json::from_value(data) {
                    Ok(value) => return Some(value),
                    Err(_) => self.count_error(),
                }
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %full_key, "cache miss");
        None
    }

    /// [`get`](Self::get) with a fallback value on a full miss.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, namespace: &str, default: T) -> T {
        self.get(key, namespace).unwrap_or(default)
    }

    /// Write `value` through every enabled tier, clamping `ttl` to each
    /// tier's ceiling.
    pub fn set<T: Serialize>(&self, key: &str, namespace: &str, value: &T, ttl: Duration) {
        self.set_opt(key, namespace, value, ttl, SkipTiers::default());
    }

    /// [`set`](Self::set) with per-tier opt-outs. Tier writes are fully
    /// independent; one failing does not stop the others.
    pub fn set_opt<T: Serialize>(
        &self,
        key: &str,
        namespace: &str,
        value: &T,
        ttl: Duration,
        skip: SkipTiers,
    ) {
        let full_key = Self::full_key(key, namespace);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);

        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(key = %full_key, error = %err, "unserializable value not cached");
                self.count_error();
                return;
            }
        };
        let bytes = match serde_json::to_vec(&data) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(key = %full_key, error = %err, "unserializable value not cached");
                self.count_error();
                return;
            }
        };

        if !skip.memory {
            if let Some(memory) = &self.memory {
                memory.put(&full_key, bytes.clone(), ttl.min(self.config.memory_max_ttl));
            }
        }

        if !skip.remote {
            if let Some(remote) = &self.remote {
                let remote_ttl = ttl.min(self.config.remote_max_ttl);
                if let Err(err) = remote.put_value(&full_key, &bytes, remote_ttl) {
                    tracing::warn!(key = %full_key, error = %err, "remote tier write failed");
                    self.count_error();
                }
            }
        }

        if !skip.file {
            if let Some(file) = &self.file {
                let file_ttl = ttl.min(self.config.file_max_ttl);
                if let Err(err) = file.put(&full_key, &data, file_ttl) {
                    tracing::warn!(key = %full_key, error = %err, "file tier write failed");
                    self.count_error();
                }
            }
        }
    }

    /// Remove `key` from every tier, best-effort.
    pub fn delete(&self, key: &str, namespace: &str) {
        let full_key = Self::full_key(key, namespace);
        if let Some(memory) = &self.memory {
            memory.remove(&full_key);
        }
        if let Some(remote) = &self.remote {
            let _ = remote.delete_value(&full_key);
        }
        if let Some(file) = &self.file {
            file.remove(&full_key);
        }
    }

    /// Wipe every tier completely.
    ///
    /// Namespace-scoped clearing is not implemented; calling with a
    /// non-empty namespace logs a warning and leaves everything in place.
    pub fn clear(&self, namespace: &str) {
        if !namespace.is_empty() {
            tracing::warn!(namespace, "namespace-scoped clear is not implemented");
            return;
        }
        if let Some(memory) = &self.memory {
            memory.clear();
        }
        if let Some(remote) = &self.remote {
            let _ = remote.flush();
        }
        if let Some(file) = &self.file {
            file.clear();
        }
        tracing::info!("cache cleared");
    }

    /// Sweep the file tier, deleting expired and unreadable entries.
    /// The memory and remote tiers expire lazily or natively instead.
    pub fn cleanup_expired(&self) -> usize {
        self.file.as_ref().map_or(0, FileTier::cleanup_expired)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.stats.memory_hits.load(Ordering::Relaxed),
            remote_hits: self.stats.remote_hits.load(Ordering::Relaxed),
            file_hits: self.stats.file_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn purge_memory(&self) {
        if let Some(memory) = &self.memory {
            memory.clear();
        }
    }
}
