//! Rate limiter family (spec.md §4.3): global, per-connection, per-API-key
//! token buckets, plus a sliding-window counter backing statistics.
//!
//! Grounded on the keyed-limiter pattern used for HTTP middleware elsewhere
//! in the corpus (`governor::RateLimiter` behind a `DashMap`, one limiter
//! created lazily per key via the entry API for lock-free concurrent
//! access).

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

type KeyedLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterFamilyConfig {
    pub global_requests_per_minute: u32,
    pub global_burst: u32,
    pub per_connection_requests_per_minute: u32,
    pub per_connection_burst: u32,
}

impl Default for RateLimiterFamilyConfig {
    fn default() -> Self {
        Self {
            global_requests_per_minute: 6000,
            global_burst: 200,
            per_connection_requests_per_minute: 600,
            per_connection_burst: 60,
        }
    }
}

/// Outcome of a rate-limit admission check.
#[derive(Debug, Clone)]
pub enum RateLimitDecision {
    Admit,
    Reject { retry_after: Duration },
}

/// Global + per-connection + per-API-key token buckets, and a one-minute
/// sliding-window request counter per key used purely for statistics and
/// administrator "block this key" decisions (spec.md §4.3).
pub struct RateLimiterFamily {
    global: KeyedLimiter,
    per_connection: DashMap<String, KeyedLimiter>,
    per_api_key: DashMap<String, KeyedLimiter>,
    windows: DashMap<String, Mutex<SlidingWindow>>,
    blocked_keys: DashMap<String, ()>,
    config: RateLimiterFamilyConfig,
}

impl RateLimiterFamily {
    pub fn new(config: RateLimiterFamilyConfig) -> Self {
        Self {
            global: build_limiter(config.global_requests_per_minute, config.global_burst),
            per_connection: DashMap::new(),
            per_api_key: DashMap::new(),
            windows: DashMap::new(),
            blocked_keys: DashMap::new(),
            config,
        }
    }

    /// Administratively block a key regardless of remaining tokens.
    pub fn block_key(&self, api_key_id: &str) {
        self.blocked_keys.insert(api_key_id.to_string(), ());
    }

    pub fn unblock_key(&self, api_key_id: &str) {
        self.blocked_keys.remove(api_key_id);
    }

    /// Admit a request, checking global, per-connection, and (if present)
    /// per-API-key buckets. All applicable buckets must have >= 1 token.
    pub fn check(
        &self,
        connection_id: &str,
        api_key: Option<(&str, u32)>,
    ) -> RateLimitDecision {
        if let Some((key_id, _)) = api_key {
            if self.blocked_keys.contains_key(key_id) {
                return RateLimitDecision::Reject {
                    retry_after: Duration::from_secs(u64::MAX / 2),
                };
            }
        }

        self.record_window(connection_id);
        if let Some((key_id, _)) = api_key {
            self.record_window(key_id);
        }

        // Checked in order, stopping at the first bucket that denies: a
        // `governor` `check()` only consumes a token when it admits, so once
        // one bucket says no we must not call `check()` on any bucket still
        // downstream of it — that would drain a real token from a well-behaved
        // client's own bucket for a request this call was always going to
        // reject anyway (spec.md §4.3 Testable Property #4).
        if let Err(not_until) = self.global.check() {
            return RateLimitDecision::Reject { retry_after: wait_time(&not_until) };
        }

        let conn_limiter = self.per_connection.entry(connection_id.to_string()).or_insert_with(|| {
            build_limiter(
                self.config.per_connection_requests_per_minute,
                self.config.per_connection_burst,
            )
        });
        let conn_result = conn_limiter.check();
        drop(conn_limiter);
        if let Err(not_until) = conn_result {
            return RateLimitDecision::Reject { retry_after: wait_time(&not_until) };
        }

        if let Some((key_id, burst)) = api_key {
            let key_limiter = self
                .per_api_key
                .entry(key_id.to_string())
                .or_insert_with(|| build_limiter(burst.max(1) * 60, burst.max(1)));
            if let Err(not_until) = key_limiter.check() {
                return RateLimitDecision::Reject { retry_after: wait_time(&not_until) };
            }
        }

        RateLimitDecision::Admit
    }

    fn record_window(&self, key: &str) {
        let window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(SlidingWindow::new(Duration::from_secs(60))));
        window.lock().unwrap().record();
    }

    /// Requests observed for `key` within the trailing 60 seconds.
    pub fn window_count(&self, key: &str) -> usize {
        self.windows
            .get(key)
            .map(|w| w.lock().unwrap().count())
            .unwrap_or(0)
    }

    pub fn remove_connection(&self, connection_id: &str) {
        self.per_connection.remove(connection_id);
        self.windows.remove(connection_id);
    }
}

fn build_limiter(requests_per_minute: u32, burst: u32) -> KeyedLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap())
        .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
    RateLimiter::direct(quota)
}

fn wait_time(not_until: &governor::NotUntil<<DefaultClock as Clock>::Instant>) -> Duration {
    not_until.wait_time_from(DefaultClock::default().now())
}

/// Fixed-size sliding window of request instants, used for statistics only
/// (the admission decision is governed entirely by the token buckets).
struct SlidingWindow {
    window: Duration,
    events: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
        }
    }

    fn record(&mut self) {
        let now = Instant::now();
        self.events.push_back(now);
        self.evict_stale(now);
    }

    fn count(&mut self) -> usize {
        self.evict_stale(Instant::now());
        self.events.len()
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_requests_within_burst() {
        let family = RateLimiterFamily::new(RateLimiterFamilyConfig {
            global_requests_per_minute: 600,
            global_burst: 10,
            per_connection_requests_per_minute: 600,
            per_connection_burst: 10,
        });
        for _ in 0..5 {
            assert!(matches!(
                family.check("conn-1", Some(("key-1", 60))),
                RateLimitDecision::Admit
            ));
        }
    }

    #[test]
    fn rejects_once_connection_burst_exhausted() {
        let family = RateLimiterFamily::new(RateLimiterFamilyConfig {
            global_requests_per_minute: 6000,
            global_burst: 1000,
            per_connection_requests_per_minute: 60,
            per_connection_burst: 2,
        });
        assert!(matches!(family.check("conn-1", None), RateLimitDecision::Admit));
        assert!(matches!(family.check("conn-1", None), RateLimitDecision::Admit));
        assert!(matches!(
            family.check("conn-1", None),
            RateLimitDecision::Reject { .. }
        ));
    }

    #[test]
    fn blocked_key_is_always_rejected() {
        let family = RateLimiterFamily::new(RateLimiterFamilyConfig::default());
        family.block_key("evil-key");
        assert!(matches!(
            family.check("conn-1", Some(("evil-key", 1000))),
            RateLimitDecision::Reject { .. }
        ));
    }

    #[test]
    fn a_connection_level_rejection_never_drains_the_api_key_bucket() {
        let family = RateLimiterFamily::new(RateLimiterFamilyConfig {
            global_requests_per_minute: 6000,
            global_burst: 1000,
            per_connection_requests_per_minute: 60,
            per_connection_burst: 1,
        });

        assert!(matches!(
            family.check("conn-1", Some(("key-1", 2))),
            RateLimitDecision::Admit
        ));
        // conn-1's own burst is now exhausted; every one of these must be
        // rejected at the connection bucket, before key-1's bucket is ever
        // consulted.
        for _ in 0..3 {
            assert!(matches!(
                family.check("conn-1", Some(("key-1", 2))),
                RateLimitDecision::Reject { .. }
            ));
        }

        // key-1 only ever spent 1 of its 2 tokens (the first, admitted,
        // call), so a fresh connection using the same key must still be
        // admitted.
        assert!(matches!(
            family.check("conn-2", Some(("key-1", 2))),
            RateLimitDecision::Admit
        ));
    }

    #[test]
    fn window_count_tracks_recent_requests() {
        let family = RateLimiterFamily::new(RateLimiterFamilyConfig::default());
        for _ in 0..3 {
            family.check("conn-a", None);
        }
        assert_eq!(family.window_count("conn-a"), 3);
    }
}
