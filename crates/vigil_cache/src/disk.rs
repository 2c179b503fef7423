//! On-disk key-value cache tier (spec.md §4.11, §6 "Persisted state
//! layout"). Backed by [`sled`]: keys are distributed across a configurable
//! number of shard trees, each shard paired with a secondary tree indexed
//! by `(expires_at_ms, key)` so the sweeper can find expired rows without
//! scanning the whole shard.

use crate::entry::CacheEntry;
use chrono::Utc;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

struct Shard {
    data: sled::Tree,
    expiry_index: sled::Tree,
    /// Rows removed by `get`/`sweep` without a corresponding rewrite yet.
    dead_count: AtomicU64,
    live_count: AtomicU64,
}

pub struct DiskCache {
    shards: Vec<Shard>,
    /// Trigger a full-shard rewrite once dead/live exceeds this fraction.
    dead_fraction_threshold: f64,
}

impl DiskCache {
    pub fn open(dir: &Path, shard_count: usize) -> Result<Self, DiskCacheError> {
        std::fs::create_dir_all(dir).ok();
        let db = sled::open(dir)?;
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for i in 0..shard_count {
            let data = db.open_tree(format!("shard_{i}_data"))?;
            let expiry_index = db.open_tree(format!("shard_{i}_expiry"))?;
            let live_count = data.len() as u64;
            shards.push(Shard {
                data,
                expiry_index,
                dead_count: AtomicU64::new(0),
                live_count: AtomicU64::new(live_count),
            });
        }
        Ok(Self {
            shards,
            dead_fraction_threshold: 0.3,
        })
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, DiskCacheError> {
        let shard = self.shard_for(key);
        let Some(raw) = shard.data.get(key)? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_slice(&raw)?;
        if entry.is_expired() {
            self.remove_from_shard(shard, key, &entry)?;
            shard.dead_count.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn put(&self, entry: &CacheEntry) -> Result<(), DiskCacheError> {
        let shard = self.shard_for(&entry.key);
        let encoded = serde_json::to_vec(entry)?;
        if let Some(previous) = shard.data.insert(entry.key.as_str(), encoded)? {
            if let Ok(prev_entry) = serde_json::from_slice::<CacheEntry>(&previous) {
                let _ = shard
                    .expiry_index
                    .remove(expiry_index_key(&prev_entry));
            }
        } else {
            shard.live_count.fetch_add(1, Ordering::Relaxed);
        }
        shard
            .expiry_index
            .insert(expiry_index_key(entry), entry.key.as_str())?;
        Ok(())
    }

    fn remove_from_shard(
        &self,
        shard: &Shard,
        key: &str,
        entry: &CacheEntry,
    ) -> Result<(), DiskCacheError> {
        shard.data.remove(key)?;
        shard.expiry_index.remove(expiry_index_key(entry))?;
        shard.live_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Sweep all shards, removing expired rows; rewrites (via normal
    /// remove, which sled compacts lazily) any shard whose dead fraction
    /// exceeds the configured threshold.
    pub fn sweep_expired(&self) -> Result<usize, DiskCacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut total_removed = 0usize;
        for (shard_idx, shard) in self.shards.iter().enumerate() {
            let mut to_remove = Vec::new();
            for item in shard.expiry_index.iter() {
                let (index_key, key_bytes) = item?;
                let (expires_ms, _) = decode_expiry_index_key(&index_key);
                if expires_ms > now_ms {
                    break; // sled trees iterate in key order; index_key is sorted by expiry
                }
                to_remove.push((index_key, key_bytes));
            }

            for (index_key, key_bytes) in &to_remove {
                shard.data.remove(key_bytes)?;
                shard.expiry_index.remove(index_key)?;
                shard.live_count.fetch_sub(1, Ordering::Relaxed);
            }
            total_removed += to_remove.len();

            let live = shard.live_count.load(Ordering::Relaxed).max(1);
            let dead = shard.dead_count.swap(0, Ordering::Relaxed);
            let dead_fraction = dead as f64 / live as f64;
            if dead_fraction > self.dead_fraction_threshold {
                debug!(shard_idx, dead_fraction, "disk cache shard dead fraction exceeded threshold, compacting via flush");
                if let Err(err) = shard.data.flush() {
                    warn!(shard_idx, %err, "failed to flush disk cache shard during sweep");
                }
            }
        }
        Ok(total_removed)
    }

    pub fn flush_all(&self) -> Result<(), DiskCacheError> {
        for shard in &self.shards {
            shard.data.flush()?;
        }
        Ok(())
    }
}

/// Sort key: `(expires_at millis as big-endian bytes, original key)`, so
/// iterating the expiry tree in key order visits the soonest-to-expire rows
/// first.
fn expiry_index_key(entry: &CacheEntry) -> Vec<u8> {
    let mut out = entry.expires_at.timestamp_millis().to_be_bytes().to_vec();
    out.extend_from_slice(entry.key.as_bytes());
    out
}

fn decode_expiry_index_key(bytes: &[u8]) -> (i64, &[u8]) {
    let (ms_bytes, rest) = bytes.split_at(8);
    let ms = i64::from_be_bytes(ms_bytes.try_into().unwrap_or([0; 8]));
    (ms, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 4).unwrap();
        let entry = CacheEntry::new("k1", b"v1".to_vec(), Duration::from_secs(60));
        cache.put(&entry).unwrap();
        let got = cache.get("k1").unwrap().expect("hit");
        assert_eq!(got.payload, b"v1");
    }

    #[test]
    fn expired_entry_is_swept_on_read() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 4).unwrap();
        let entry = CacheEntry::new("k1", b"v1".to_vec(), Duration::from_millis(1));
        cache.put(&entry).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("k1").unwrap().is_none());
    }

    #[test]
    fn sweep_removes_all_expired_rows() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 2).unwrap();
        for i in 0..10 {
            let entry = CacheEntry::new(format!("k{i}"), b"v".to_vec(), Duration::from_millis(1));
            cache.put(&entry).unwrap();
        }
        std::thread::sleep(Duration::from_millis(20));
        let removed = cache.sweep_expired().unwrap();
        assert_eq!(removed, 10);
        assert!(cache.get("k0").unwrap().is_none());
    }
}
