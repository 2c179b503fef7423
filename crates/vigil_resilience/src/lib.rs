//! Resilience primitives: circuit breaker (spec.md §4.4), rate limiter
//! family (spec.md §4.3), and retry/backoff used by every outbound
//! dependency client (`vigil_siem`, `vigil_intel`, the secret store).

pub mod breaker;
pub mod rate_limit;
pub mod retry;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use rate_limit::{RateLimitDecision, RateLimiterFamily, RateLimiterFamilyConfig};
pub use retry::{retry_idempotent, RetryConfig};
