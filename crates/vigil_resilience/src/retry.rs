//! Exponential backoff with jitter for idempotent outbound calls
//! (spec.md §4.4: base 100ms, factor 2, cap 5s, up to 3 attempts). Non-
//! idempotent operations must not use this helper.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2.0,
            cap: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

/// Retry `op` up to `config.max_attempts` times with exponential backoff and
/// full jitter. `op` must be idempotent; `is_retryable` decides whether a
/// given error warrants another attempt at all (malformed input, for
/// instance, should return `false` and fail immediately).
pub async fn retry_idempotent<T, E, F, Fut>(
    config: RetryConfig,
    mut is_retryable: impl FnMut(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(config.base)
        .with_multiplier(config.factor)
        .with_max_interval(config.cap)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = backoff.next_backoff().unwrap_or(config.cap);
                let jittered = jitter(delay);
                debug!(attempt, delay_ms = jittered.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(jittered).await;
            }
        }
    }
}

fn jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.5..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_idempotent(
            RetryConfig {
                base: Duration::from_millis(1),
                ..Default::default()
            },
            |_| true,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_fails() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_idempotent(
            RetryConfig {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(2),
                max_attempts: 3,
                factor: 2.0,
            },
            |_| true,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("transient")
            },
        )
        .await;
        assert_eq!(result, Err("transient"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_idempotent(
            RetryConfig {
                base: Duration::from_millis(1),
                ..Default::default()
            },
            |_| false,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("malformed")
            },
        )
        .await;
        assert_eq!(result, Err("malformed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
