//! Process-local implementation of the coordination store.
//!
//! Offers the same primitives as the Redis backend over mutex-guarded
//! maps. Nothing is shared across processes, so a limiter running on it
//! only coordinates the threads of one worker — that is exactly the
//! degraded mode the hub falls back to when the real store is down, and
//! it keeps the test suite hermetic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{RemoteStore, StoreError};

struct ValueEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

struct WindowEntry {
    /// Members with their scores, kept sorted by score ascending.
    members: Vec<(String, f64)>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, ValueEntry>,
    windows: HashMap<String, WindowEntry>,
}

/// In-process stand-in for the shared store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn live_window(&mut self, key: &str) -> Option<&mut WindowEntry> {
        let expired = self
            .windows
            .get(key)
            .and_then(|w| w.expires_at)
            .is_some_and(|at| Instant::now() >= at);
        if expired {
            self.windows.remove(key);
        }
        self.windows.get_mut(key)
    }
}

impl RemoteStore for MemoryStore {
    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut inner = self.lock();
        let expired = inner
            .values
            .get(key)
            .is_some_and(|entry| Instant::now() >= entry.expires_at);
        if expired {
            inner.values.remove(key);
        }
        Ok(inner.values.get(key).map(|entry| entry.payload.clone()))
    }

    fn put_value(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.values.insert(
            key.to_string(),
            ValueEntry {
                payload: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.values.remove(key);
        inner.windows.remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.values.clear();
        inner.windows.clear();
        Ok(())
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn prune_window(&self, key: &str, min_score: f64) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let Some(window) = inner.live_window(key) else {
            return Ok(0);
        };
        let before = window.members.len();
        window.members.retain(|(_, score)| *score > min_score);
        Ok((before - window.members.len()) as u64)
    }

    fn window_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        Ok(inner.live_window(key).map_or(0, |w| w.members.len() as u64))
    }

    fn window_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let window = inner.windows.entry(key.to_string()).or_insert(WindowEntry {
            members: Vec::new(),
            expires_at: None,
        });
        window.members.retain(|(m, _)| m != member);
        let pos = window
            .members
            .partition_point(|(_, existing)| *existing <= score);
        window.members.insert(pos, (member.to_string(), score));
        Ok(())
    }

    fn oldest_score(&self, key: &str) -> Result<Option<f64>, StoreError> {
        let mut inner = self.lock();
        Ok(inner
            .live_window(key)
            .and_then(|w| w.members.first().map(|(_, score)| *score)))
    }

    fn touch_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let deadline = Instant::now() + ttl;
        if let Some(entry) = inner.values.get_mut(key) {
            entry.expires_at = deadline;
        }
        if let Some(window) = inner.windows.get_mut(key) {
            window.expires_at = Some(deadline);
        }
        Ok(())
    }
}
