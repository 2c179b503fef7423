//! `ThreatIntelSource` capability trait (spec.md §4.3, §9 redesign note):
//! the orchestrator treats every source uniformly through this seam, so a
//! new intel provider is a new implementation, not a new branch in the
//! orchestrator.

use async_trait::async_trait;
use vigil_domain::{Indicator, SourceResult};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request to {source} failed: {reason}")]
    RequestFailed { source: String, reason: String },
    #[error("{source} returned an unparseable response")]
    BadResponse { source: String },
}

#[async_trait]
pub trait ThreatIntelSource: Send + Sync {
    /// Stable identifier used for cache keys, rate-limit buckets, and
    /// reliability-weight lookups.
    fn name(&self) -> &str;

    /// How much to trust this source relative to others when the
    /// orchestrator combines scores and resolves geo/network conflicts.
    fn reliability_weight(&self) -> f64;

    /// Concurrency cap: how many in-flight lookups this source tolerates at
    /// once, enforced by the orchestrator via a `Semaphore`.
    fn max_concurrent_requests(&self) -> usize;

    /// Steady-state request budget, enforced by the orchestrator via a
    /// `governor` token bucket keyed on this source's name.
    fn requests_per_minute(&self) -> u32;

    async fn lookup(&self, indicator: &Indicator) -> Result<SourceResult, SourceError>;
}
