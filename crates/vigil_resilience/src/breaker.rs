//! Circuit breaker (spec.md §4.4, data model §3 `CircuitBreakerState`).
//!
//! One breaker guards one outbound dependency (the SIEM store, each
//! threat-intel source, the secret store). State transitions:
//!
//! - CLOSED -> OPEN when consecutive failures >= `failure_threshold`.
//! - OPEN -> HALF_OPEN after `cool_down`.
//! - HALF_OPEN -> CLOSED on one success; HALF_OPEN -> OPEN on one failure.
//!
//! While OPEN, `try_acquire` fails fast without letting the caller touch the
//! dependency at all (testable property 5: zero outbound calls while OPEN).
//! In HALF_OPEN, an atomic flag admits exactly one trial request at a time.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("circuit open for {dependency}, retry after {retry_after_ms}ms")]
    Open {
        dependency: String,
        retry_after_ms: u64,
    },
}

/// A guard returned by [`CircuitBreaker::try_acquire`]. The caller MUST call
/// [`Guard::success`] or [`Guard::failure`] exactly once after attempting the
/// protected call, to record the outcome.
#[must_use]
pub struct Guard<'a> {
    breaker: &'a CircuitBreaker,
    was_trial: bool,
}

impl Guard<'_> {
    pub fn success(self) {
        self.breaker.on_success(self.was_trial);
    }

    pub fn failure(self) {
        self.breaker.on_failure(self.was_trial);
    }
}

fn encode(state: BreakerState) -> u32 {
    match state {
        BreakerState::Closed => 0,
        BreakerState::Open => 1,
        BreakerState::HalfOpen => 2,
    }
}

fn decode(value: u32) -> BreakerState {
    match value {
        1 => BreakerState::Open,
        2 => BreakerState::HalfOpen,
        _ => BreakerState::Closed,
    }
}

pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    state: AtomicU32,
    consecutive_failures: AtomicU32,
    open_until_ms: AtomicU64,
    /// Set while a HALF_OPEN trial request is in flight; guarantees at most
    /// one trial is ever outstanding at a time.
    trial_in_flight: AtomicBool,
    last_failure: Mutex<Option<DateTime<Utc>>>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            state: AtomicU32::new(encode(BreakerState::Closed)),
            consecutive_failures: AtomicU32::new(0),
            open_until_ms: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            last_failure: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.reconcile_open_expiry();
        decode(self.state.load(Ordering::Acquire))
    }

    /// If OPEN and the cool-down has elapsed, flip to HALF_OPEN so the next
    /// `try_acquire` can admit exactly one trial request.
    fn reconcile_open_expiry(&self) {
        if decode(self.state.load(Ordering::Acquire)) == BreakerState::Open
            && now_ms() >= self.open_until_ms.load(Ordering::Acquire)
        {
            // Best-effort CAS; if another thread already moved it, fine.
            let _ = self.state.compare_exchange(
                encode(BreakerState::Open),
                encode(BreakerState::HalfOpen),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Attempt to acquire permission to call the dependency. Fails fast with
    /// `BreakerError::Open` while OPEN, without touching the dependency.
    pub fn try_acquire(&self) -> Result<Guard<'_>, BreakerError> {
        self.reconcile_open_expiry();
        let retry_after_ms = || {
            self.open_until_ms
                .load(Ordering::Acquire)
                .saturating_sub(now_ms())
        };

        match decode(self.state.load(Ordering::Acquire)) {
            BreakerState::Closed => Ok(Guard {
                breaker: self,
                was_trial: false,
            }),
            BreakerState::Open => Err(BreakerError::Open {
                dependency: self.dependency.clone(),
                retry_after_ms: retry_after_ms(),
            }),
            BreakerState::HalfOpen => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Ok(Guard {
                        breaker: self,
                        was_trial: true,
                    })
                } else {
                    Err(BreakerError::Open {
                        dependency: self.dependency.clone(),
                        retry_after_ms: retry_after_ms(),
                    })
                }
            }
        }
    }

    fn on_success(&self, was_trial: bool) {
        self.consecutive_failures.store(0, Ordering::Release);
        if was_trial {
            self.state
                .store(encode(BreakerState::Closed), Ordering::Release);
            self.trial_in_flight.store(false, Ordering::Release);
            info!(dependency = %self.dependency, "circuit breaker closed after successful trial");
        }
    }

    fn on_failure(&self, was_trial: bool) {
        *self.last_failure.lock().unwrap() = Some(Utc::now());
        if was_trial {
            self.open();
            self.trial_in_flight.store(false, Ordering::Release);
            warn!(dependency = %self.dependency, "circuit breaker re-opened after failed trial");
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.failure_threshold {
            self.open();
            warn!(
                dependency = %self.dependency,
                failures,
                "circuit breaker opened"
            );
        }
    }

    fn open(&self) {
        let open_until = now_ms() + self.config.cool_down.as_millis() as u64;
        self.open_until_ms.store(open_until, Ordering::Release);
        self.state.store(encode(BreakerState::Open), Ordering::Release);
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_by_default_and_admits_calls() {
        let breaker = CircuitBreaker::new("siem", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), BreakerState::Closed);
        let guard = breaker.try_acquire().expect("should admit");
        guard.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            cool_down: Duration::from_secs(30),
        };
        let breaker = CircuitBreaker::new("intel:otx", config);
        for _ in 0..3 {
            let guard = breaker.try_acquire().expect("closed, should admit");
            guard.failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn half_open_closes_on_trial_success() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            cool_down: Duration::from_millis(1),
        };
        let breaker = CircuitBreaker::new("intel:abuseipdb", config);
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let trial = breaker.try_acquire().expect("trial should be admitted");
        trial.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_reopens_on_trial_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            cool_down: Duration::from_millis(1),
        };
        let breaker = CircuitBreaker::new("secret-store", config);
        breaker.try_acquire().unwrap().failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_admits_only_one_concurrent_trial() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            cool_down: Duration::from_millis(1),
        };
        let breaker = CircuitBreaker::new("siem", config);
        breaker.try_acquire().unwrap().failure();
        std::thread::sleep(Duration::from_millis(5));

        let first = breaker.try_acquire();
        let second = breaker.try_acquire();
        assert!(first.is_ok());
        assert!(second.is_err());
    }
}
