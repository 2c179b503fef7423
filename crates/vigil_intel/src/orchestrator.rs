//! Threat-intel enrichment orchestrator (spec.md §4.10): checks the
//! dual-tier cache, fans out to every enabled source in parallel under a
//! per-source semaphore and token bucket, combines results with
//! reliability weighting, and optionally writes back to the SIEM store.

use crate::source::ThreatIntelSource;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use vigil_cache::{CacheEntry, DualTierCache};
use vigil_domain::{Indicator, SourceResult, ThreatIntelResult};
use vigil_protocol::VigilError;
use vigil_resilience::{CircuitBreaker, CircuitBreakerConfig};
use vigil_siem::SiemClient;

type SourceLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

struct SourceHandle {
    source: Arc<dyn ThreatIntelSource>,
    semaphore: Arc<Semaphore>,
    limiter: Arc<SourceLimiter>,
    breaker: CircuitBreaker,
}

pub struct OrchestratorConfig {
    pub per_source_timeout: Duration,
    /// When `Some`, successful enrichments are written back to the store's
    /// `enrichment-intel-YYYY.MM` index (spec.md §4.10). Write-back failures
    /// are logged, never propagated.
    pub writeback: Option<Arc<SiemClient>>,
    /// Shared by one `CircuitBreaker` per source; a source that trips stops
    /// receiving outbound calls until its cool-down elapses (spec.md §4.4),
    /// independent of the other configured sources.
    pub breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { per_source_timeout: Duration::from_secs(30), writeback: None, breaker: CircuitBreakerConfig::default() }
    }
}

pub struct EnrichOutcome {
    pub result: ThreatIntelResult,
    pub cache_hit: bool,
}

pub struct ThreatIntelOrchestrator {
    sources: Vec<SourceHandle>,
    cache: Arc<DualTierCache>,
    config: OrchestratorConfig,
}

impl ThreatIntelOrchestrator {
    pub fn new(sources: Vec<Arc<dyn ThreatIntelSource>>, cache: Arc<DualTierCache>, config: OrchestratorConfig) -> Self {
        let handles = sources
            .into_iter()
            .map(|source| {
                let permits = source.max_concurrent_requests().max(1);
                let rpm = NonZeroU32::new(source.requests_per_minute().max(1)).expect("rpm clamped to >=1");
                let limiter = RateLimiter::direct(Quota::per_minute(rpm));
                let breaker = CircuitBreaker::new(source.name().to_string(), config.breaker);
                SourceHandle { source, semaphore: Arc::new(Semaphore::new(permits)), limiter: Arc::new(limiter), breaker }
            })
            .collect();
        Self { sources: handles, cache, config }
    }

    pub async fn enrich(&self, indicator: &Indicator) -> Result<EnrichOutcome, VigilError> {
        let cache_key = format!("{indicator}:comprehensive");
        if let Some(entry) = self.cache.get(&cache_key).await {
            if let Ok(result) = serde_json::from_slice::<ThreatIntelResult>(&entry.payload) {
                return Ok(EnrichOutcome { result, cache_hit: true });
            }
        }

        let lookups = self.sources.iter().map(|handle| {
            let indicator = indicator.clone();
            let timeout = self.config.per_source_timeout;
            async move {
                let name = handle.source.name().to_string();

                let guard = match handle.breaker.try_acquire() {
                    Ok(guard) => guard,
                    Err(e) => return Err(format!("{name}: {e}")),
                };

                let _permit = handle
                    .semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                handle.limiter.until_ready().await;

                match tokio::time::timeout(timeout, handle.source.lookup(&indicator)).await {
                    Ok(Ok(result)) => {
                        guard.success();
                        Ok(result)
                    }
                    Ok(Err(e)) => {
                        guard.failure();
                        Err(format!("{name}: {e}"))
                    }
                    Err(_) => {
                        guard.failure();
                        Err(format!("{name}: timed out after {}s", timeout.as_secs()))
                    }
                }
            }
        });

        let outcomes = futures_util::future::join_all(lookups).await;
        let mut successes = Vec::new();
        let mut diagnostics = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => successes.push(result),
                Err(diag) => diagnostics.push(diag),
            }
        }

        if successes.is_empty() {
            return Err(VigilError::EnrichmentNoSource { diagnostics });
        }

        let weights = self.reliability_weights();
        let result = ThreatIntelResult::combine(indicator.clone(), successes, &weights, diagnostics, Utc::now());

        if let Ok(bytes) = serde_json::to_vec(&result) {
            let entry = CacheEntry::new(cache_key, bytes, Duration::from_secs(3600));
            self.cache.put(entry).await;
        }

        if let Some(store) = &self.config.writeback {
            if let Err(err) = write_back(store, &result).await {
                tracing::warn!(error = %err, "enrichment write-back to SIEM store failed");
            }
        }

        Ok(EnrichOutcome { result, cache_hit: false })
    }

    fn reliability_weights(&self) -> Vec<(String, f64)> {
        self.sources
            .iter()
            .map(|h| (h.source.name().to_string(), h.source.reliability_weight()))
            .collect()
    }

    /// Current breaker state per configured source, for the health probe
    /// registered against each source's dependency name.
    pub fn source_breaker_states(&self) -> Vec<(String, vigil_resilience::BreakerState)> {
        self.sources.iter().map(|h| (h.source.name().to_string(), h.breaker.state())).collect()
    }
}

/// `enrichment-intel-YYYY.MM` naming convention (spec.md §4.10).
fn enrichment_index_name(now: chrono::DateTime<Utc>) -> String {
    format!("enrichment-intel-{}", now.format("%Y.%m"))
}

async fn write_back(store: &SiemClient, result: &ThreatIntelResult) -> Result<(), vigil_siem::SiemError> {
    let index = enrichment_index_name(result.computed_at);
    let document = serde_json::to_value(result).map_err(|e| vigil_siem::SiemError::Deserialize(e.to_string()))?;
    store.index_document(&index, &document).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_domain::GeoMetadata;

    struct FixedSource {
        name: String,
        weight: f64,
        malicious: bool,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ThreatIntelSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }
        fn reliability_weight(&self) -> f64 {
            self.weight
        }
        fn max_concurrent_requests(&self) -> usize {
            4
        }
        fn requests_per_minute(&self) -> u32 {
            6000
        }
        async fn lookup(&self, _indicator: &Indicator) -> Result<SourceResult, crate::source::SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::source::SourceError::RequestFailed {
                    source: self.name.clone(),
                    reason: "boom".into(),
                });
            }
            Ok(SourceResult {
                source_name: self.name.clone(),
                confidence: 0.8,
                malicious: self.malicious,
                geo: Some(GeoMetadata { country_code: Some("US".into()), ..Default::default() }),
                network: None,
                tags: vec!["botnet".into()],
                retrieved_at: Utc::now(),
            })
        }
    }

    fn cache() -> Arc<DualTierCache> {
        let dir = tempfile::tempdir().unwrap();
        // Leaked deliberately: the directory only needs to outlive the
        // cache for the duration of one test process.
        let path = Box::leak(Box::new(dir)).path();
        Arc::new(DualTierCache::open(path, 2, 100, Duration::from_secs(60)).unwrap())
    }

    #[tokio::test]
    async fn enrich_succeeds_when_at_least_one_source_succeeds() {
        let good = Arc::new(FixedSource {
            name: "good".into(),
            weight: 1.0,
            malicious: true,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let bad = Arc::new(FixedSource {
            name: "bad".into(),
            weight: 1.0,
            malicious: false,
            fail: true,
            calls: Arc::new(AtomicUsize::new(0)),
        });

        let orchestrator = ThreatIntelOrchestrator::new(
            vec![good, bad],
            cache(),
            OrchestratorConfig::default(),
        );
        let ind = Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let outcome = orchestrator.enrich(&ind).await.unwrap();
        assert!(outcome.result.malicious);
        assert_eq!(outcome.result.diagnostics.len(), 1);
        assert!(!outcome.cache_hit);
    }

    #[tokio::test]
    async fn enrich_fails_with_enrichment_no_source_when_all_fail() {
        let bad = Arc::new(FixedSource {
            name: "bad".into(),
            weight: 1.0,
            malicious: false,
            fail: true,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let orchestrator = ThreatIntelOrchestrator::new(vec![bad], cache(), OrchestratorConfig::default());
        let ind = Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let err = orchestrator.enrich(&ind).await.unwrap_err();
        assert!(matches!(err, VigilError::EnrichmentNoSource { .. }));
    }

    #[tokio::test]
    async fn second_enrich_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let good = Arc::new(FixedSource {
            name: "good".into(),
            weight: 1.0,
            malicious: false,
            fail: false,
            calls: calls.clone(),
        });
        let orchestrator = ThreatIntelOrchestrator::new(vec![good], cache(), OrchestratorConfig::default());
        let ind = Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));

        orchestrator.enrich(&ind).await.unwrap();
        let second = orchestrator.enrich(&ind).await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enrichment_index_name_uses_year_month_convention() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-07-30T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(enrichment_index_name(now), "enrichment-intel-2026.07");
    }
}
