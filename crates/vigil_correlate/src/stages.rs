//! Per-stage query construction and feature extraction for the correlation
//! pipeline (spec.md §4.9). Each fetch stage builds a store query and reads
//! back `Event`s; the behavioral and network stages additionally filter
//! client-side because their matching criteria (feature-set overlap, CIDR
//! membership) aren't expressible as Elasticsearch term queries.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use vigil_domain::{Event, Indicator};
use vigil_siem::{OffsetPage, Query, SiemClient, SiemError};

/// A time-window range filter against the store's timestamp field.
pub fn window_filter(start: DateTime<Utc>, end: DateTime<Utc>) -> Query {
    Query::range("@timestamp", Some(json!(start.to_rfc3339())), Some(json!(end.to_rfc3339())))
}

/// Matches any event whose `source_ip`/`destination_ip` equals an IP
/// indicator, or whose `domain`/`url`/`file_hash` field equals a
/// non-network indicator. Wrapped as a `filter` bool so the inner
/// `should`-only clause requires at least one indicator to match rather
/// than merely influencing score.
pub fn seed_match_query(indicators: &[Indicator]) -> Query {
    let mut inner = Query::bool_query();
    for indicator in indicators {
        inner = match indicator {
            Indicator::Ipv4(addr) => inner
                .should(Query::term("source_ip", addr.to_string()))
                .should(Query::term("destination_ip", addr.to_string())),
            Indicator::Ipv6(addr) => inner
                .should(Query::term("source_ip", addr.to_string()))
                .should(Query::term("destination_ip", addr.to_string())),
            Indicator::Domain(domain) => inner.should(Query::term("domain", domain.clone())),
            Indicator::Url(url) => inner.should(Query::term("url", url.clone())),
            Indicator::FileHash(hash) => inner.should(Query::term("file_hash", hash.clone())),
        };
    }
    inner.build()
}

pub async fn fetch_seed_matches(
    client: &SiemClient,
    indices: &[String],
    indicators: &[Indicator],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_candidates: u32,
) -> Result<Vec<Event>, SiemError> {
    let query = Query::bool_query()
        .filter(seed_match_query(indicators))
        .filter(window_filter(window_start, window_end))
        .build();
    let (events, _) = client.search_offset(indices, &query, OffsetPage::new(0, max_candidates)).await?;
    Ok(events)
}

/// Infrastructure observables pulled out of a set of events (spec.md §4.9
/// stage 2): domains, URL hosts, and TLS fingerprints. `Event` carries these
/// in its open `fields` map rather than as dedicated struct fields.
#[derive(Debug, Default)]
pub struct InfraFeatures {
    pub domains: HashSet<String>,
    pub urls: HashSet<String>,
    pub tls_fingerprints: HashSet<String>,
}

impl InfraFeatures {
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.urls.is_empty() && self.tls_fingerprints.is_empty()
    }
}

pub fn extract_infra_features(events: &[Event]) -> InfraFeatures {
    let mut features = InfraFeatures::default();
    for event in events {
        if let Some(domain) = field_str(event, "domain") {
            features.domains.insert(domain.to_lowercase());
        }
        if let Some(url) = field_str(event, "url") {
            features.urls.insert(url.to_string());
        }
        if let Some(tls) = field_str(event, "tls_fingerprint") {
            features.tls_fingerprints.insert(tls.to_string());
        }
    }
    features
}

pub async fn fetch_infra_matches(
    client: &SiemClient,
    indices: &[String],
    features: &InfraFeatures,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_candidates: u32,
) -> Result<Vec<Event>, SiemError> {
    let mut inner = Query::bool_query();
    for domain in &features.domains {
        inner = inner.should(Query::term("domain", domain.clone()));
    }
    for url in &features.urls {
        inner = inner.should(Query::term("url", url.clone()));
    }
    for tls in &features.tls_fingerprints {
        inner = inner.should(Query::term("tls_fingerprint", tls.clone()));
    }
    let query = Query::bool_query().filter(inner.build()).filter(window_filter(window_start, window_end)).build();
    let (events, _) = client.search_offset(indices, &query, OffsetPage::new(0, max_candidates)).await?;
    Ok(events)
}

/// The behavioral feature set for one event (spec.md §4.9 stage 3):
/// technique, tactic, attack-sequence pattern, user-agent family, and
/// payload signature, whichever of these are present.
pub fn event_behavioral_features(event: &Event) -> HashSet<String> {
    let mut features = HashSet::new();
    if let Some(t) = &event.technique {
        features.insert(format!("technique:{t}"));
    }
    if let Some(t) = &event.tactic {
        features.insert(format!("tactic:{t}"));
    }
    if let Some(v) = field_str(event, "attack_sequence_pattern") {
        features.insert(format!("sequence:{v}"));
    }
    if let Some(v) = field_str(event, "user_agent_family") {
        features.insert(format!("user_agent:{v}"));
    }
    if let Some(v) = field_str(event, "payload_signature") {
        features.insert(format!("payload:{v}"));
    }
    features
}

/// Builds the campaign's aggregate behavioral multiset from every event
/// gathered so far, counting how many events exhibit each feature.
pub fn build_pattern_multiset<'a>(events: impl Iterator<Item = &'a Event>) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for event in events {
        for feature in event_behavioral_features(event) {
            *counts.entry(feature).or_insert(0) += 1;
        }
    }
    counts
}

/// Jaccard overlap between one event's feature set and the campaign's
/// accumulated pattern (spec.md §4.9: "feature overlap exceeds
/// `behavioral_pattern_threshold`").
pub fn feature_overlap(event: &Event, pattern: &HashMap<String, u32>) -> f64 {
    let event_features = event_behavioral_features(event);
    if event_features.is_empty() || pattern.is_empty() {
        return 0.0;
    }
    let pattern_keys: HashSet<&String> = pattern.keys().collect();
    let intersection = event_features.iter().filter(|f| pattern_keys.contains(f)).count();
    let union = event_features.len() + pattern_keys.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

pub async fn fetch_window_candidates(
    client: &SiemClient,
    indices: &[String],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_candidates: u32,
) -> Result<Vec<Event>, SiemError> {
    let query = Query::bool_query().filter(window_filter(window_start, window_end)).build();
    let (events, _) = client.search_offset(indices, &query, OffsetPage::new(0, max_candidates)).await?;
    Ok(events)
}

/// A contiguous run of events where each consecutive pair is within
/// `max_gap` of each other (spec.md §4.9 stage 4).
pub struct TemporalCluster {
    pub events: Vec<Event>,
}

pub fn cluster_by_time(mut events: Vec<Event>, max_gap: chrono::Duration) -> Vec<TemporalCluster> {
    events.sort_by_key(|e| e.timestamp);
    let mut clusters: Vec<TemporalCluster> = Vec::new();
    for event in events {
        match clusters.last_mut() {
            Some(cluster) if event.timestamp - cluster.events.last().unwrap().timestamp <= max_gap => {
                cluster.events.push(event);
            }
            _ => clusters.push(TemporalCluster { events: vec![event] }),
        }
    }
    clusters
}

pub fn source_ips(events: &[Event]) -> HashSet<IpAddr> {
    events.iter().filter_map(|e| e.source_ip).collect()
}

pub async fn fetch_ip_matches(
    client: &SiemClient,
    indices: &[String],
    ips: &HashSet<IpAddr>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_candidates: u32,
) -> Result<Vec<Event>, SiemError> {
    let mut inner = Query::bool_query();
    for ip in ips {
        inner = inner.should(Query::term("source_ip", ip.to_string())).should(Query::term("destination_ip", ip.to_string()));
    }
    let query = Query::bool_query().filter(inner.build()).filter(window_filter(window_start, window_end)).build();
    let (events, _) = client.search_offset(indices, &query, OffsetPage::new(0, max_candidates)).await?;
    Ok(events)
}

/// The set of `/prefix_len` subnets the given IPs fall in (spec.md §4.9
/// stage 6).
pub fn subnets_for(ips: &HashSet<IpAddr>, prefix_len: u8) -> HashSet<String> {
    ips.iter()
        .filter_map(|ip| indicator_for(*ip).subnet(prefix_len))
        .collect()
}

/// Whether an event's source or destination IP falls in any of `subnets`
/// at `prefix_len` — computed client-side since arbitrary CIDR membership
/// isn't a term-query match in the store.
pub fn event_in_subnets(event: &Event, subnets: &HashSet<String>, prefix_len: u8) -> bool {
    [event.source_ip, event.destination_ip].into_iter().flatten().any(|ip| {
        indicator_for(ip).subnet(prefix_len).map(|s| subnets.contains(&s)).unwrap_or(false)
    })
}

fn indicator_for(ip: IpAddr) -> Indicator {
    match ip {
        IpAddr::V4(addr) => Indicator::Ipv4(addr),
        IpAddr::V6(addr) => Indicator::Ipv6(addr),
    }
}

fn field_str<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event.get_field(name).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_domain::EventId;

    fn event(ts_minute: i64, technique: Option<&str>) -> Event {
        Event {
            id: EventId { index: "honeypot-2026.07".into(), document_id: format!("d{ts_minute}") },
            timestamp: DateTime::parse_from_rfc3339("2026-07-30T00:00:00Z").unwrap().with_timezone(&Utc)
                + chrono::Duration::minutes(ts_minute),
            source_ip: Some("203.0.113.10".parse().unwrap()),
            destination_ip: None,
            destination_port: None,
            category: None,
            technique: technique.map(str::to_string),
            tactic: None,
            fields: Default::default(),
        }
    }

    #[test]
    fn cluster_by_time_splits_on_large_gap() {
        let events = vec![event(0, None), event(5, None), event(100, None)];
        let clusters = cluster_by_time(events, chrono::Duration::minutes(30));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].events.len(), 2);
    }

    #[test]
    fn feature_overlap_is_zero_with_empty_pattern() {
        let e = event(0, Some("T1110"));
        assert_eq!(feature_overlap(&e, &HashMap::new()), 0.0);
    }

    #[test]
    fn feature_overlap_is_one_when_identical_single_feature() {
        let e = event(0, Some("T1110"));
        let pattern = build_pattern_multiset(std::iter::once(&e));
        assert!((feature_overlap(&e, &pattern) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn subnets_for_masks_to_configured_prefix() {
        let mut ips = HashSet::new();
        ips.insert("203.0.113.55".parse::<IpAddr>().unwrap());
        let subnets = subnets_for(&ips, 24);
        assert!(subnets.contains("203.0.113.0/24"));
    }
}
