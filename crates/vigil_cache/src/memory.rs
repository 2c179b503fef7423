//! In-process TTL + LRU cache tier, backed by [`moka`].

use crate::entry::CacheEntry;
use moka::future::Cache;
use std::time::Duration;

#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, CacheEntry>,
}

impl MemoryCache {
    /// `max_capacity` bounds the number of entries (LRU-evicted beyond
    /// that); `default_ttl` is an upper bound moka itself enforces in
    /// addition to the per-entry `expires_at` we check on read.
    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(default_ttl)
            .build();
        Self { inner }
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.inner.get(key).await?;
        if entry.is_expired() {
            self.inner.invalidate(key).await;
            None
        } else {
            Some(entry)
        }
    }

    pub async fn put(&self, entry: CacheEntry) {
        self.inner.insert(entry.key.clone(), entry).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        let entry = CacheEntry::new("k1", b"v1".to_vec(), Duration::from_secs(60));
        cache.put(entry.clone()).await;
        let got = cache.get("k1").await.expect("should hit");
        assert_eq!(got.payload, b"v1");
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        let entry = CacheEntry::new("k1", b"v1".to_vec(), Duration::from_millis(1));
        cache.put(entry).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn miss_on_unknown_key() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        assert!(cache.get("nope").await.is_none());
    }
}
