//! Dual-tier cache facade: memory -> disk -> miss on read, memory + disk on
//! write (disk best-effort), and a background sweeper.

use crate::disk::DiskCache;
use crate::entry::CacheEntry;
use crate::memory::MemoryCache;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, warn};

pub struct DualTierCache {
    memory: MemoryCache,
    disk: Arc<DiskCache>,
    shutdown: Arc<Notify>,
}

impl DualTierCache {
    pub fn open(
        disk_dir: &Path,
        shard_count: usize,
        max_memory_entries: u64,
        memory_ttl: Duration,
    ) -> Result<Self, crate::disk::DiskCacheError> {
        let disk = Arc::new(DiskCache::open(disk_dir, shard_count)?);
        Ok(Self {
            memory: MemoryCache::new(max_memory_entries, memory_ttl),
            disk,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Read path: memory -> disk -> miss. A disk hit backfills memory.
    /// Invariant: any entry returned has `expires_at > now` at read time.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key).await {
            return Some(entry);
        }

        match self.disk.get(key) {
            Ok(Some(entry)) => {
                self.memory.put(entry.clone()).await;
                Some(entry)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%key, %err, "disk cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write path: memory write always succeeds; disk write is
    /// best-effort, logged on failure, never propagated.
    pub async fn put(&self, entry: CacheEntry) {
        if let Err(err) = self.disk.put(&entry) {
            error!(key = %entry.key, %err, "disk cache write failed");
        }
        self.memory.put(entry).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.memory.invalidate(key).await;
    }

    /// Spawn the background sweeper, running every `interval` until
    /// `shutdown` is signalled.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match cache.disk.sweep_expired() {
                            Ok(removed) if removed > 0 => {
                                tracing::debug!(removed, "disk cache sweep removed expired rows");
                            }
                            Ok(_) => {}
                            Err(err) => warn!(%err, "disk cache sweep failed"),
                        }
                    }
                    _ = cache.shutdown.notified() => break,
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn disk_hit_backfills_memory() {
        let dir = TempDir::new().unwrap();
        let cache = DualTierCache::open(dir.path(), 2, 100, Duration::from_secs(60)).unwrap();

        let entry = CacheEntry::new("k1", b"v1".to_vec(), Duration::from_secs(60));
        cache.disk.put(&entry).unwrap();
        assert_eq!(cache.memory.entry_count(), 0);

        let got = cache.get("k1").await.expect("disk hit");
        assert_eq!(got.payload, b"v1");
        assert_eq!(cache.memory.entry_count(), 1);
    }

    #[tokio::test]
    async fn miss_when_absent_from_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = DualTierCache::open(dir.path(), 2, 100, Duration::from_secs(60)).unwrap();
        assert!(cache.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn write_then_read_roundtrips_through_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = DualTierCache::open(dir.path(), 2, 100, Duration::from_secs(60)).unwrap();
        let entry = CacheEntry::new("k2", b"v2".to_vec(), Duration::from_secs(60));
        cache.put(entry).await;
        assert_eq!(cache.get("k2").await.unwrap().payload, b"v2");
    }
}
