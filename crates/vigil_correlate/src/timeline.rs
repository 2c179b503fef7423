//! Timeline reconstruction (spec.md §4.9): surviving events sorted by
//! timestamp and grouped into caller-chosen, left-closed right-open
//! buckets.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use vigil_domain::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    fn bucket_width(self) -> Duration {
        match self {
            Granularity::Minute => Duration::minutes(1),
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        }
    }

    fn bucket_start(self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Minute => timestamp.date_naive().and_hms_opt(timestamp.time().hour(), timestamp.time().minute(), 0).unwrap().and_utc(),
            Granularity::Hour => timestamp.date_naive().and_hms_opt(timestamp.time().hour(), 0, 0).unwrap().and_utc(),
            Granularity::Day => timestamp.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub event_count: usize,
}

/// Groups events into left-closed, right-open `[start, end)` buckets at the
/// requested granularity. Empty input yields no buckets.
pub fn reconstruct_timeline(events: &[Event], granularity: Granularity) -> Vec<TimelineBucket> {
    let mut sorted: Vec<&Event> = events.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut buckets: Vec<TimelineBucket> = Vec::new();
    for event in sorted {
        let start = granularity.bucket_start(event.timestamp);
        let end = start + granularity.bucket_width();
        match buckets.last_mut() {
            Some(bucket) if bucket.start == start => bucket.event_count += 1,
            _ => buckets.push(TimelineBucket { start, end, event_count: 1 }),
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_domain::EventId;

    fn event(minute: i64) -> Event {
        Event {
            id: EventId { index: "honeypot-2026.07".into(), document_id: format!("d{minute}") },
            timestamp: DateTime::parse_from_rfc3339("2026-07-30T00:00:00Z").unwrap().with_timezone(&Utc)
                + Duration::minutes(minute),
            source_ip: None,
            destination_ip: None,
            destination_port: None,
            category: None,
            technique: None,
            tactic: None,
            fields: Default::default(),
        }
    }

    #[test]
    fn buckets_by_hour_groups_events_within_same_hour() {
        let events = vec![event(0), event(10), event(61)];
        let buckets = reconstruct_timeline(&events, Granularity::Hour);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].event_count, 2);
        assert_eq!(buckets[1].event_count, 1);
    }

    #[test]
    fn bucket_end_is_exclusive_upper_bound() {
        let events = vec![event(0)];
        let buckets = reconstruct_timeline(&events, Granularity::Minute);
        assert_eq!(buckets[0].end - buckets[0].start, Duration::minutes(1));
    }

    #[test]
    fn empty_events_yield_no_buckets() {
        assert!(reconstruct_timeline(&[], Granularity::Day).is_empty());
    }
}
