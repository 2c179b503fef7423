//! The 7-stage campaign correlation pipeline (spec.md §4.9): direct-IOC,
//! infrastructure, behavioral, temporal, IP, network, then scoring. Each
//! fetch stage runs under its own timeout; a stage that times out or errors
//! is skipped with a structured warning rather than failing the whole call,
//! as long as the direct-IOC stage itself produced events.
//!
//! The per-stage weights here ({direct 1.0, infra 0.8, behavioral 0.7,
//! temporal 0.5, ip 0.6, network 0.4}) combine per-event, per-stage
//! confidence into this pipeline's own campaign confidence. They are a
//! distinct fixed set from `vigil_domain::RelationshipKind::weight()`,
//! which combines confidence across indicator *relationships* when a
//! `Campaign` is built or merged directly from relationship records. This
//! pipeline computes its own confidence from stage hits and assigns it to
//! `Campaign::confidence` after construction rather than relying on
//! `Campaign::new`'s relationship-weighted-mean, since the two
//! computations answer different questions.

use crate::error::CorrelateError;
use crate::stages::{
    build_pattern_multiset, cluster_by_time, event_in_subnets, extract_infra_features, feature_overlap,
    fetch_infra_matches, fetch_ip_matches, fetch_seed_matches, fetch_window_candidates, source_ips, subnets_for,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;
use vigil_domain::{Campaign, Event, EventId, Indicator};
use vigil_siem::SiemClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stage {
    Direct,
    Infra,
    Behavioral,
    Temporal,
    Ip,
    Network,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::Direct => "direct",
            Stage::Infra => "infra",
            Stage::Behavioral => "behavioral",
            Stage::Temporal => "temporal",
            Stage::Ip => "ip",
            Stage::Network => "network",
        }
    }

    /// Fixed stage weights, spec.md §4.9 step 7.
    fn weight(self) -> f64 {
        match self {
            Stage::Direct => 1.0,
            Stage::Infra => 0.8,
            Stage::Behavioral => 0.7,
            Stage::Temporal => 0.5,
            Stage::Ip => 0.6,
            Stage::Network => 0.4,
        }
    }

    const ALL: [Stage; 6] =
        [Stage::Direct, Stage::Infra, Stage::Behavioral, Stage::Temporal, Stage::Ip, Stage::Network];
}

/// Sum of every stage's weight, the fixed denominator for per-event
/// confidence. Fixed rather than derived from which stages happened to
/// produce a match anywhere in this pipeline run: an event's confidence must
/// depend only on that event's own evidence (spec §3, Testable Property #7),
/// never on what an unrelated stage found for a different event in the same
/// invocation.
fn total_stage_weight() -> f64 {
    Stage::ALL.iter().map(|s| s.weight()).sum()
}

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub behavioral_pattern_threshold: f64,
    pub correlation_window_minutes: i64,
    pub network_prefix_len: u8,
    pub min_confidence: f64,
    pub per_stage_timeout: StdDuration,
    /// Cap on events fetched per stage query; not named in spec.md but
    /// required since every store fetch in this codebase is page-bounded.
    pub max_candidates_per_stage: u32,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            behavioral_pattern_threshold: 0.6,
            correlation_window_minutes: 30,
            network_prefix_len: 24,
            min_confidence: 0.7,
            per_stage_timeout: StdDuration::from_secs(20),
            max_candidates_per_stage: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationRequest {
    pub seed_indicators: Vec<Indicator>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub indices: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StageWarning {
    pub stage: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    pub campaign: Campaign,
    pub warnings: Vec<StageWarning>,
}

async fn with_stage_timeout<T, E: std::fmt::Display>(
    label: &'static str,
    timeout: StdDuration,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, StageWarning> {
    let warning = match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err)) => StageWarning { stage: label, message: err.to_string() },
        Err(_) => StageWarning { stage: label, message: format!("stage exceeded {timeout:?} timeout") },
    };
    tracing::warn!(stage = label, message = %warning.message, "correlation stage skipped");
    Err(warning)
}

/// Accumulates events discovered by each stage, recording which stages hit
/// each event so the scoring stage can combine per-stage confidence.
struct Accumulator {
    store: HashMap<EventId, Event>,
    hits: HashMap<EventId, HashSet<Stage>>,
}

impl Accumulator {
    fn new() -> Self {
        Self { store: HashMap::new(), hits: HashMap::new() }
    }

    fn record(&mut self, stage: Stage, events: Vec<Event>) {
        for event in events {
            self.hits.entry(event.id.clone()).or_default().insert(stage);
            self.store.entry(event.id.clone()).or_insert(event);
        }
    }

    fn events(&self) -> impl Iterator<Item = &Event> {
        self.store.values()
    }
}

/// Runs the full correlation pipeline for one seed indicator set.
pub async fn correlate(
    client: &SiemClient,
    request: CorrelationRequest,
    config: &CorrelatorConfig,
) -> Result<CorrelationOutcome, CorrelateError> {
    let mut warnings = Vec::new();
    let mut acc = Accumulator::new();

    // Stage 1: direct-IOC.
    match with_stage_timeout(
        Stage::Direct.label(),
        config.per_stage_timeout,
        fetch_seed_matches(
            client,
            &request.indices,
            &request.seed_indicators,
            request.window_start,
            request.window_end,
            config.max_candidates_per_stage,
        ),
    )
    .await
    {
        Ok(events) => {
            acc.record(Stage::Direct, events);
        }
        Err(w) => warnings.push(w),
    }

    if acc.store.is_empty() {
        let campaign = Campaign::new(
            uuid::Uuid::new_v4(),
            request.window_start,
            request.window_end,
            dedupe_indicators(request.seed_indicators),
            vec![],
            vec![],
        )?;
        return Ok(CorrelationOutcome { campaign, warnings });
    }

    // Stage 2: infrastructure.
    let infra_features = extract_infra_features(&acc.store.values().cloned().collect::<Vec<_>>());
    let mut discovered_indicators: Vec<Indicator> = Vec::new();
    if !infra_features.is_empty() {
        match with_stage_timeout(
            Stage::Infra.label(),
            config.per_stage_timeout,
            fetch_infra_matches(
                client,
                &request.indices,
                &infra_features,
                request.window_start,
                request.window_end,
                config.max_candidates_per_stage,
            ),
        )
        .await
        {
            Ok(events) => {
                acc.record(Stage::Infra, events);
                discovered_indicators.extend(infra_features.domains.iter().map(|d| Indicator::domain(d)));
            }
            Err(w) => warnings.push(w),
        }
    }

    // Stage 3: behavioral.
    match with_stage_timeout(Stage::Behavioral.label(), config.per_stage_timeout, async {
        let pattern = build_pattern_multiset(acc.events());
        let candidates = fetch_window_candidates(
            client,
            &request.indices,
            request.window_start,
            request.window_end,
            config.max_candidates_per_stage,
        )
        .await?;
        let matches = candidates
            .into_iter()
            .filter(|e| !acc.store.contains_key(&e.id))
            .filter(|e| feature_overlap(e, &pattern) > config.behavioral_pattern_threshold)
            .collect::<Vec<_>>();
        Ok::<_, vigil_siem::SiemError>(matches)
    })
    .await
    {
        Ok(events) => {
            acc.record(Stage::Behavioral, events);
        }
        Err(w) => warnings.push(w),
    }

    // Stage 4: temporal clustering (no store fetch — groups what's already
    // accumulated; only events that land in a multi-event cluster count as
    // temporally corroborated).
    let max_gap = Duration::minutes(config.correlation_window_minutes);
    let all_events: Vec<Event> = acc.events().cloned().collect();
    let clusters = cluster_by_time(all_events, max_gap);
    let mut clustered_events = Vec::new();
    for cluster in &clusters {
        if cluster.events.len() >= 2 {
            clustered_events.extend(cluster.events.iter().cloned());
        }
    }
    if !clustered_events.is_empty() {
        acc.record(Stage::Temporal, clustered_events.clone());
    }

    // Stage 5: IP.
    let ips = source_ips(&clustered_events);
    if !ips.is_empty() {
        match with_stage_timeout(
            Stage::Ip.label(),
            config.per_stage_timeout,
            fetch_ip_matches(
                client,
                &request.indices,
                &ips,
                request.window_start,
                request.window_end,
                config.max_candidates_per_stage,
            ),
        )
        .await
        {
            Ok(events) => {
                acc.record(Stage::Ip, events);
            }
            Err(w) => warnings.push(w),
        }
    }

    // Stage 6: network (client-side CIDR filter, spec.md §4.9 stage 6).
    let subnets = subnets_for(&ips, config.network_prefix_len);
    discovered_indicators.extend(ips.iter().map(|ip| match ip {
        std::net::IpAddr::V4(a) => Indicator::Ipv4(*a),
        std::net::IpAddr::V6(a) => Indicator::Ipv6(*a),
    }));
    if !subnets.is_empty() {
        let prefix_len = config.network_prefix_len;
        match with_stage_timeout(Stage::Network.label(), config.per_stage_timeout, async {
            let candidates = fetch_window_candidates(
                client,
                &request.indices,
                request.window_start,
                request.window_end,
                config.max_candidates_per_stage,
            )
            .await?;
            let matches: Vec<Event> =
                candidates.into_iter().filter(|e| event_in_subnets(e, &subnets, prefix_len)).collect();
            Ok::<_, vigil_siem::SiemError>(matches)
        })
        .await
        {
            Ok(events) => {
                acc.record(Stage::Network, events);
            }
            Err(w) => warnings.push(w),
        }
    }

    // Stage 7: scoring.
    let weight_total = total_stage_weight();
    let mut surviving: Vec<(Event, f64)> = Vec::new();
    for (id, event) in acc.store {
        let hit_stages = acc.hits.get(&id).cloned().unwrap_or_default();
        let weighted_sum: f64 = hit_stages.iter().map(|s| s.weight()).sum();
        let confidence = if weight_total == 0.0 { 0.0 } else { weighted_sum / weight_total };
        if confidence >= config.min_confidence {
            surviving.push((event, confidence));
        }
    }

    let campaign_confidence = if surviving.is_empty() {
        0.0
    } else {
        (surviving.iter().map(|(_, c)| c).sum::<f64>() / surviving.len() as f64).clamp(0.0, 1.0)
    };

    let mut event_ids: Vec<EventId> = surviving.iter().map(|(e, _)| e.id.clone()).collect();
    event_ids.sort_by(|a, b| a.index.cmp(&b.index).then(a.document_id.cmp(&b.document_id)));

    let mut indicators = request.seed_indicators;
    indicators.extend(discovered_indicators);
    let indicators = dedupe_indicators(indicators);

    let mut campaign =
        Campaign::new(uuid::Uuid::new_v4(), request.window_start, request.window_end, indicators, event_ids, vec![])?;
    campaign.confidence = campaign_confidence;

    tracing::debug!(
        campaign_id = %campaign.id,
        events = campaign.counts.event_count,
        confidence = campaign.confidence,
        warnings = warnings.len(),
        "campaign correlation complete"
    );

    Ok(CorrelationOutcome { campaign, warnings })
}

fn dedupe_indicators(indicators: Vec<Indicator>) -> Vec<Indicator> {
    let mut seen = HashSet::new();
    indicators.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Fraction of `other`'s events already present in `campaign` — the
/// event-based overlap this pipeline's merge tie-break uses (spec.md §4.9:
/// "if two candidate campaigns overlap >= 50% in events"), distinct from
/// `Campaign::overlap_fraction`, which compares indicators rather than
/// events.
fn event_overlap_fraction(campaign: &Campaign, other: &Campaign) -> f64 {
    if other.event_ids.is_empty() {
        return 0.0;
    }
    let ours: HashSet<&EventId> = campaign.event_ids.iter().collect();
    let shared = other.event_ids.iter().filter(|id| ours.contains(id)).count();
    shared as f64 / other.event_ids.len() as f64
}

/// Merges a batch of independently-produced campaigns (e.g. from several
/// `correlate` calls over different seed sets) whenever two overlap by 50%
/// or more of their events: union events and indicators, take the max of
/// the two confidences, widen the window to the earliest start / latest
/// end (spec.md §4.9 tie-break). Runs to a fixed point since a merge can
/// create new overlaps.
pub fn merge_overlapping_campaigns(mut campaigns: Vec<Campaign>) -> Vec<Campaign> {
    loop {
        let mut merged_any = false;
        'outer: for i in 0..campaigns.len() {
            for j in (i + 1)..campaigns.len() {
                if event_overlap_fraction(&campaigns[i], &campaigns[j]) >= 0.5
                    || event_overlap_fraction(&campaigns[j], &campaigns[i]) >= 0.5
                {
                    let other = campaigns.remove(j);
                    merge_event_union(&mut campaigns[i], other);
                    merged_any = true;
                    break 'outer;
                }
            }
        }
        if !merged_any {
            break;
        }
    }
    campaigns
}

fn merge_event_union(target: &mut Campaign, other: Campaign) {
    target.window_start = target.window_start.min(other.window_start);
    target.window_end = target.window_end.max(other.window_end);
    target.confidence = target.confidence.max(other.confidence);

    let mut events: HashSet<EventId> = target.event_ids.drain(..).collect();
    events.extend(other.event_ids);
    target.event_ids = events.into_iter().collect();

    let mut indicators: HashSet<Indicator> = target.indicators.drain(..).collect();
    indicators.extend(other.indicators);
    target.indicators = indicators.into_iter().collect();

    target.relationships.extend(other.relationships);
    target.counts.indicator_count = target.indicators.len();
    target.counts.event_count = target.event_ids.len();
    target.counts.relationship_count = target.relationships.len();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn campaign(event_ids: Vec<&str>, confidence: f64) -> Campaign {
        let now = Utc::now();
        Campaign::new(
            uuid::Uuid::new_v4(),
            now,
            now,
            vec![Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1))],
            event_ids
                .into_iter()
                .map(|id| EventId { index: "honeypot-2026.07".into(), document_id: id.into() })
                .collect(),
            vec![],
        )
        .map(|mut c| {
            c.confidence = confidence;
            c
        })
        .unwrap()
    }

    #[test]
    fn merges_campaigns_overlapping_at_least_half() {
        let a = campaign(vec!["e1", "e2"], 0.6);
        let b = campaign(vec!["e2", "e3"], 0.9);
        let merged = merge_overlapping_campaigns(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].event_ids.len(), 3);
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn leaves_non_overlapping_campaigns_separate() {
        let a = campaign(vec!["e1"], 0.6);
        let b = campaign(vec!["e2"], 0.9);
        let merged = merge_overlapping_campaigns(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn dedupe_indicators_removes_duplicates() {
        let ip = Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let deduped = dedupe_indicators(vec![ip.clone(), ip]);
        assert_eq!(deduped.len(), 1);
    }
}
