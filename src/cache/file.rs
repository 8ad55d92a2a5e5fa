//! Persistent file cache tier.
//!
//! One JSON file per key, holding the payload together with its write
//! time and TTL. Slowest tier, survives restarts, not shared across
//! hosts. A file that cannot be read or parsed is treated as expired and
//! deleted; the tier never propagates its own failures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const FILE_PREFIX: &str = "cache_";
const FILE_SUFFIX: &str = ".json";

#[derive(Serialize, Deserialize)]
struct FileEnvelope {
    created_at: f64,
    ttl_secs: f64,
    data: serde_json::Value,
}

pub(crate) enum FileLookup {
    Hit {
        data: serde_json::Value,
        /// TTL the entry was written with, for clamped promotion upward.
        ttl: Duration,
    },
    Miss,
}

pub(crate) struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    /// Prepare the cache directory. Returns `None` (tier disabled) when
    /// the directory cannot be created.
    pub(crate) fn open(dir: &Path) -> Option<Self> {
        if let Err(err) = fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %err, "file cache disabled");
            return None;
        }
        Some(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn now_secs() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Replace anything outside `[A-Za-z0-9._-]` so any namespaced key
    /// maps to a valid filename.
    fn sanitize(full_key: &str) -> String {
        full_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn path_for(&self, full_key: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", Self::sanitize(full_key)))
    }

    pub(crate) fn get(&self, full_key: &str) -> FileLookup {
        let path = self.path_for(full_key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return FileLookup::Miss,
        };

        let envelope: FileEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "corrupted cache file removed");
                let _ = fs::remove_file(&path);
                return FileLookup::Miss;
            }
        };

        if Self::now_secs() - envelope.created_at >= envelope.ttl_secs {
            let _ = fs::remove_file(&path);
            return FileLookup::Miss;
        }

        FileLookup::Hit {
            data: envelope.data,
            ttl: Duration::from_secs_f64(envelope.ttl_secs.max(0.0)),
        }
    }

    pub(crate) fn put(
        &self,
        full_key: &str,
        data: &serde_json::Value,
        ttl: Duration,
    ) -> std::io::Result<()> {
        let envelope = FileEnvelope {
            created_at: Self::now_secs(),
            ttl_secs: ttl.as_secs_f64(),
            data: data.clone(),
        };
        let bytes = serde_json::to_vec(&envelope)?;
        fs::write(self.path_for(full_key), bytes)
    }

    pub(crate) fn remove(&self, full_key: &str) {
        let _ = fs::remove_file(self.path_for(full_key));
    }

    fn entries(&self) -> Vec<PathBuf> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| {
                        name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)
                    })
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        for path in self.entries() {
            let _ = fs::remove_file(path);
        }
    }

    /// Delete every expired entry; unreadable files count as expired.
    /// Returns how many files were removed.
    pub(crate) fn cleanup_expired(&self) -> usize {
        let now = Self::now_secs();
        let mut cleaned = 0;
        for path in self.entries() {
            let expired = match fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<FileEnvelope>(&bytes).ok())
            {
                Some(envelope) => now - envelope.created_at >= envelope.ttl_secs,
                None => true,
            };
            if expired && fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            tracing::info!(cleaned, "expired cache files removed");
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn tier(dir: &tempfile::TempDir) -> FileTier {
        FileTier::open(dir.path()).unwrap()
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(FileTier::sanitize("brands:nike air/max"), "brands_nike_air_max");
        assert_eq!(FileTier::sanitize("plain-key_1.0"), "plain-key_1.0");
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(&dir);
        tier.put("k", &json!({"sku": "A1"}), Duration::from_secs(60))
            .unwrap();

        match tier.get("k") {
            FileLookup::Hit { data, ttl } => {
                assert_eq!(data, json!({"sku": "A1"}));
                assert_eq!(ttl, Duration::from_secs(60));
            }
            FileLookup::Miss => panic!("expected a hit"),
        }
    }

    #[test]
    fn expired_entry_becomes_miss_and_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(&dir);
        tier.put("k", &json!(1), Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(40));

        assert!(matches!(tier.get("k"), FileLookup::Miss));
        assert!(tier.entries().is_empty());
    }

    #[test]
    fn corrupted_file_is_removed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(&dir);
        fs::write(dir.path().join("cache_bad.json"), b"not json").unwrap();

        assert!(matches!(tier.get("bad"), FileLookup::Miss));
        assert!(tier.entries().is_empty());
    }

    #[test]
    fn cleanup_sweeps_expired_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(&dir);
        tier.put("live", &json!(1), Duration::from_secs(60)).unwrap();
        tier.put("dead", &json!(2), Duration::from_millis(10)).unwrap();
        fs::write(dir.path().join("cache_junk.json"), b"{{{{").unwrap();
        // A stray file without the cache prefix is not ours to touch.
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(tier.cleanup_expired(), 2);
        assert!(matches!(tier.get("live"), FileLookup::Hit { .. }));
        assert!(dir.path().join("notes.txt").exists());
    }
}
