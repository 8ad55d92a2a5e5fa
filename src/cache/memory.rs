//! Process-local cache tier.
//!
//! Fastest tier, lost on restart. Entries carry their own write time and
//! TTL and are dropped lazily on the read that finds them expired.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct MemoryEntry {
    payload: Vec<u8>,
    stored_at: Instant,
    ttl: Duration,
}

pub(crate) struct MemoryTier {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryTier {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Vec<u8>> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.stored_at.elapsed() < entry.ttl {
                    return Some(entry.payload.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub(crate) fn put(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                payload,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    pub(crate) fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn roundtrip_and_remove() {
        let tier = MemoryTier::new();
        tier.put("k", b"v".to_vec(), Duration::from_secs(60));
        assert_eq!(tier.get("k"), Some(b"v".to_vec()));

        tier.remove("k");
        assert_eq!(tier.get("k"), None);
    }

    #[test]
    fn expired_entry_is_dropped_on_read() {
        let tier = MemoryTier::new();
        tier.put("k", b"v".to_vec(), Duration::from_millis(20));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(tier.get("k"), None);
        // The read removed it, a fresh put starts a new lifetime.
        tier.put("k", b"w".to_vec(), Duration::from_secs(60));
        assert_eq!(tier.get("k"), Some(b"w".to_vec()));
    }
}
