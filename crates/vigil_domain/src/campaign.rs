//! `Campaign` (spec.md §3, §4.9): a correlated cluster of indicators and
//! events produced by `vigil_correlate`. Confidence is combined as a
//! weighted mean across contributing relationships (SPEC_FULL.md Open
//! Question decision — not noisy-or), so a campaign's confidence can only
//! move as new relationships are folded in via `merge`.

use crate::event::EventId;
use crate::indicator::Indicator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("campaign window end {end} is before start {start}")]
    InvertedWindow { start: DateTime<Utc>, end: DateTime<Utc> },
    #[error("campaign counts inconsistent: {indicator_count} indicators but {distinct} distinct indicators recorded")]
    InconsistentCounts { indicator_count: usize, distinct: usize },
    #[error("confidence {0} outside [0.0, 1.0]")]
    ConfidenceOutOfRange(f64),
    #[error("relationship weight {0} outside [0.0, 1.0]")]
    WeightOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    SharesInfra,
    TemporallyAdjacent,
    SameSubnet,
    SameTtp,
    UsesCredential,
}

impl RelationshipKind {
    /// Fixed stage weights from spec.md §4.9 used to combine per-relationship
    /// confidence into the campaign's overall confidence.
    pub fn weight(self) -> f64 {
        match self {
            RelationshipKind::SharesInfra => 0.30,
            RelationshipKind::SameTtp => 0.25,
            RelationshipKind::TemporallyAdjacent => 0.20,
            RelationshipKind::SameSubnet => 0.15,
            RelationshipKind::UsesCredential => 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorRelationship {
    pub from: Indicator,
    pub to: Indicator,
    pub kind: RelationshipKind,
    /// Confidence in this single relationship, independent of the
    /// campaign-level combined confidence.
    pub confidence: f64,
}

impl IndicatorRelationship {
    pub fn new(
        from: Indicator,
        to: Indicator,
        kind: RelationshipKind,
        confidence: f64,
    ) -> Result<Self, DomainError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DomainError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self { from, to, kind, confidence })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CampaignCounts {
    pub indicator_count: usize,
    pub event_count: usize,
    pub relationship_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub indicators: Vec<Indicator>,
    pub event_ids: Vec<EventId>,
    pub relationships: Vec<IndicatorRelationship>,
    pub counts: CampaignCounts,
    /// Weighted-mean confidence across `relationships`, recomputed on every
    /// mutation so it never drifts out of sync with the relationship list.
    pub confidence: f64,
}

impl Campaign {
    pub fn new(
        id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        indicators: Vec<Indicator>,
        event_ids: Vec<EventId>,
        relationships: Vec<IndicatorRelationship>,
    ) -> Result<Self, DomainError> {
        if window_end < window_start {
            return Err(DomainError::InvertedWindow { start: window_start, end: window_end });
        }
        let distinct: HashSet<&Indicator> = indicators.iter().collect();
        let counts = CampaignCounts {
            indicator_count: indicators.len(),
            event_count: event_ids.len(),
            relationship_count: relationships.len(),
        };
        if counts.indicator_count != distinct.len() {
            return Err(DomainError::InconsistentCounts {
                indicator_count: counts.indicator_count,
                distinct: distinct.len(),
            });
        }
        let confidence = weighted_mean_confidence(&relationships);
        Ok(Self {
            id,
            window_start,
            window_end,
            indicators,
            event_ids,
            relationships,
            counts,
            confidence,
        })
    }

    /// Fraction of `other`'s indicators already present in `self`, used by
    /// the correlator's merge tie-break (spec.md §4.9: merge when two
    /// candidate campaigns overlap by 50% or more).
    pub fn overlap_fraction(&self, other: &Campaign) -> f64 {
        if other.indicators.is_empty() {
            return 0.0;
        }
        let ours: HashSet<&Indicator> = self.indicators.iter().collect();
        let shared = other.indicators.iter().filter(|ind| ours.contains(ind)).count();
        shared as f64 / other.indicators.len() as f64
    }

    /// Fold another campaign's indicators, events, and relationships into
    /// this one, widening the time window and recombining confidence.
    /// Intended for the correlator's 50%-overlap merge tie-break.
    pub fn merge(&mut self, other: Campaign) {
        self.window_start = self.window_start.min(other.window_start);
        self.window_end = self.window_end.max(other.window_end);

        let mut indicators: HashSet<Indicator> = self.indicators.drain(..).collect();
        indicators.extend(other.indicators);
        self.indicators = indicators.into_iter().collect();

        let mut event_ids: HashSet<EventId> = self.event_ids.drain(..).collect();
        event_ids.extend(other.event_ids);
        self.event_ids = event_ids.into_iter().collect();

        self.relationships.extend(other.relationships);
        self.recompute();
    }

    fn recompute(&mut self) {
        self.counts = CampaignCounts {
            indicator_count: self.indicators.len(),
            event_count: self.event_ids.len(),
            relationship_count: self.relationships.len(),
        };
        self.confidence = weighted_mean_confidence(&self.relationships);
    }
}

/// Weighted mean of relationship confidence, weighted by each relationship
/// kind's fixed stage weight. Returns 0.0 for a campaign with no
/// relationships rather than dividing by zero.
fn weighted_mean_confidence(relationships: &[IndicatorRelationship]) -> f64 {
    let (weighted_sum, weight_total) = relationships.iter().fold((0.0, 0.0), |(sum, total), rel| {
        let w = rel.kind.weight();
        (sum + w * rel.confidence, total + w)
    });
    if weight_total == 0.0 {
        0.0
    } else {
        weighted_sum / weight_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn rel(kind: RelationshipKind, confidence: f64) -> IndicatorRelationship {
        IndicatorRelationship::new(
            Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1)),
            Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 2)),
            kind,
            confidence,
        )
        .unwrap()
    }

    #[test]
    fn rejects_inverted_window() {
        let now = Utc::now();
        let err = Campaign::new(Uuid::new_v4(), now, now - chrono::Duration::seconds(1), vec![], vec![], vec![]);
        assert!(matches!(err, Err(DomainError::InvertedWindow { .. })));
    }

    #[test]
    fn rejects_duplicate_indicators() {
        let now = Utc::now();
        let ind = Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let err = Campaign::new(Uuid::new_v4(), now, now, vec![ind.clone(), ind], vec![], vec![]);
        assert!(matches!(err, Err(DomainError::InconsistentCounts { .. })));
    }

    #[test]
    fn confidence_is_weighted_mean_not_noisy_or() {
        let now = Utc::now();
        let relationships = vec![rel(RelationshipKind::SharesInfra, 0.9), rel(RelationshipKind::UsesCredential, 0.1)];
        let campaign = Campaign::new(Uuid::new_v4(), now, now, vec![], vec![], relationships).unwrap();
        let expected = (0.30 * 0.9 + 0.10 * 0.1) / (0.30 + 0.10);
        assert!((campaign.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn merge_widens_window_and_dedupes_indicators() {
        let now = Utc::now();
        let shared = Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let only_b = Indicator::Ipv4(Ipv4Addr::new(198, 51, 100, 1));
        let mut a = Campaign::new(
            Uuid::new_v4(),
            now,
            now + chrono::Duration::hours(1),
            vec![shared.clone()],
            vec![],
            vec![],
        )
        .unwrap();
        let b = Campaign::new(
            Uuid::new_v4(),
            now - chrono::Duration::hours(1),
            now,
            vec![shared, only_b],
            vec![],
            vec![rel(RelationshipKind::SameSubnet, 0.5)],
        )
        .unwrap();

        a.merge(b);

        assert_eq!(a.window_start, now - chrono::Duration::hours(1));
        assert_eq!(a.window_end, now + chrono::Duration::hours(1));
        assert_eq!(a.counts.indicator_count, 2);
        assert_eq!(a.indicators.len(), 2);
    }

    #[test]
    fn overlap_fraction_counts_shared_indicators_against_other_total() {
        let now = Utc::now();
        let shared = Indicator::Ipv4(Ipv4Addr::new(203, 0, 113, 1));
        let only_b = Indicator::Ipv4(Ipv4Addr::new(198, 51, 100, 1));
        let a = Campaign::new(Uuid::new_v4(), now, now, vec![shared.clone()], vec![], vec![]).unwrap();
        let b = Campaign::new(Uuid::new_v4(), now, now, vec![shared, only_b], vec![], vec![]).unwrap();
        assert!((a.overlap_fraction(&b) - 0.5).abs() < 1e-9);
    }
}
