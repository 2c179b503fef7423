//! Threat-intel enrichment results (spec.md §3, §4.3): the shared shape
//! every `ThreatIntelSource` implementation in `vigil_intel` normalizes its
//! response into, so the orchestrator can combine results from sources it
//! knows nothing else about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoMetadata {
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetadata {
    pub reverse_dns: Option<String>,
    pub open_ports: Vec<u16>,
    pub is_tor_exit_node: bool,
    pub is_known_vpn: bool,
}

/// One source's raw contribution before orchestrator-level combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResult {
    pub source_name: String,
    /// This source's own confidence in its verdict, pre reliability
    /// weighting (spec.md §9 redesign note: sources are weighted by
    /// `reliability_weight` when combined, not treated as equally trustworthy).
    pub confidence: f64,
    pub malicious: bool,
    pub geo: Option<GeoMetadata>,
    pub network: Option<NetworkMetadata>,
    pub tags: Vec<String>,
    pub retrieved_at: DateTime<Utc>,
}

/// The orchestrator's combined verdict for one indicator across every
/// source that responded in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIntelResult {
    pub indicator: crate::indicator::Indicator,
    /// Reliability-weighted mean of contributing sources' confidence.
    pub score: f64,
    pub malicious: bool,
    pub geo: Option<GeoMetadata>,
    pub network: Option<NetworkMetadata>,
    pub tags: Vec<String>,
    pub sources: Vec<SourceResult>,
    /// Sources that were queried but did not return in time, or errored;
    /// surfaced so a caller can tell a quiet "clean" verdict apart from a
    /// partially-failed lookup.
    pub diagnostics: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

impl ThreatIntelResult {
    /// Combine per-source results, weighting each by `reliability_weight`
    /// (source_name, weight) pairs. Sources not present in `weights` default
    /// to a weight of 1.0.
    pub fn combine(
        indicator: crate::indicator::Indicator,
        sources: Vec<SourceResult>,
        weights: &[(String, f64)],
        diagnostics: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let weight_of = |name: &str| -> f64 {
            weights
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, w)| *w)
                .unwrap_or(1.0)
        };

        let (weighted_sum, weight_total) = sources.iter().fold((0.0, 0.0), |(sum, total), s| {
            let w = weight_of(&s.source_name);
            (sum + w * s.confidence, total + w)
        });
        let score = if weight_total == 0.0 { 0.0 } else { weighted_sum / weight_total };

        let malicious = sources.iter().any(|s| s.malicious);
        let tags: Vec<String> = {
            let mut all: Vec<String> = sources.iter().flat_map(|s| s.tags.clone()).collect();
            all.sort();
            all.dedup();
            all
        };

        let geo = resolve_conflict(&sources, weight_of, |s| s.geo.clone());
        let network = resolve_conflict(&sources, weight_of, |s| s.network.clone());

        Self {
            indicator,
            score,
            malicious,
            geo,
            network,
            tags,
            sources,
            diagnostics,
            computed_at: now,
        }
    }
}

/// Reliability-weighted conflict resolution (spec.md §4.10): the most
/// reliable source with a non-null value wins; ties are broken by the
/// latest `retrieved_at`.
fn resolve_conflict<T>(
    sources: &[SourceResult],
    weight_of: impl Fn(&str) -> f64,
    extract: impl Fn(&SourceResult) -> Option<T>,
) -> Option<T> {
    sources
        .iter()
        .filter_map(|s| extract(s).map(|value| (weight_of(&s.source_name), s.retrieved_at, value)))
        .max_by(|(w1, t1, _), (w2, t2, _)| {
            w1.partial_cmp(w2).unwrap_or(std::cmp::Ordering::Equal).then(t1.cmp(t2))
        })
        .map(|(_, _, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn source(name: &str, confidence: f64, malicious: bool) -> SourceResult {
        SourceResult {
            source_name: name.to_string(),
            confidence,
            malicious,
            geo: None,
            network: None,
            tags: vec!["c2".to_string()],
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn combine_weights_sources_by_reliability() {
        let ind = crate::indicator::Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let sources = vec![source("high_trust", 0.9, true), source("low_trust", 0.1, false)];
        let weights = vec![("high_trust".to_string(), 3.0), ("low_trust".to_string(), 1.0)];
        let result = ThreatIntelResult::combine(ind, sources, &weights, vec![], Utc::now());

        let expected = (3.0 * 0.9 + 1.0 * 0.1) / 4.0;
        assert!((result.score - expected).abs() < 1e-9);
        assert!(result.malicious);
    }

    #[test]
    fn combine_defaults_unweighted_sources_to_one() {
        let ind = crate::indicator::Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let sources = vec![source("unknown_source", 0.5, false)];
        let result = ThreatIntelResult::combine(ind, sources, &[], vec!["timeout: other_source".to_string()], Utc::now());
        assert!((result.score - 0.5).abs() < 1e-9);
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn combine_prefers_most_reliable_source_for_geo() {
        let ind = crate::indicator::Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let mut low = source("low_trust", 0.5, false);
        low.geo = Some(GeoMetadata { country_code: Some("XX".into()), ..Default::default() });
        let mut high = source("high_trust", 0.5, false);
        high.geo = Some(GeoMetadata { country_code: Some("US".into()), ..Default::default() });

        let weights = vec![("high_trust".to_string(), 5.0), ("low_trust".to_string(), 1.0)];
        let result = ThreatIntelResult::combine(ind, vec![low, high], &weights, vec![], Utc::now());
        assert_eq!(result.geo.unwrap().country_code.as_deref(), Some("US"));
    }

    #[test]
    fn combine_breaks_geo_tie_by_latest_retrieved_at() {
        let ind = crate::indicator::Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let mut older = source("same_weight_a", 0.5, false);
        older.geo = Some(GeoMetadata { country_code: Some("XX".into()), ..Default::default() });
        older.retrieved_at = earlier;
        let mut newer = source("same_weight_b", 0.5, false);
        newer.geo = Some(GeoMetadata { country_code: Some("US".into()), ..Default::default() });

        let result = ThreatIntelResult::combine(ind, vec![older, newer], &[], vec![], Utc::now());
        assert_eq!(result.geo.unwrap().country_code.as_deref(), Some("US"));
    }
}
