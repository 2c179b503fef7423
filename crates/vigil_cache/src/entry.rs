//! `CacheEntry` (spec.md §3): composite key, payload bytes, `inserted_at`,
//! `expires_at`. Invariant: `expires_at > inserted_at`, enforced at
//! construction.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Construct a new entry with an explicit TTL. Panics if `ttl` is not
    /// strictly positive, enforcing the invariant at the only place an
    /// entry is created.
    pub fn new(key: impl Into<String>, payload: Vec<u8>, ttl: std::time::Duration) -> Self {
        assert!(!ttl.is_zero(), "cache entry TTL must be positive");
        let inserted_at = Utc::now();
        let expires_at = inserted_at
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(1));
        Self {
            key: key.into(),
            payload,
            inserted_at,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
