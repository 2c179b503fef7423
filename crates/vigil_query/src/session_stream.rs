//! Session-aware streaming (spec.md §4.8 `stream_events_with_session_context`):
//! groups a forward-ordered window of events into sessions and emits only
//! complete sessions per chunk, guaranteeing no session is ever split
//! across two chunk responses.

use chrono::{DateTime, Utc};
use vigil_domain::{Event, StreamCursor};
use vigil_siem::{Page, Query, SiemClient, SiemError};

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_key: String,
    pub event_count: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PerfCounters {
    pub candidates_fetched: usize,
    pub sessions_emitted: usize,
    pub events_emitted: usize,
    pub sessions_deferred: usize,
}

#[derive(Debug, Clone)]
pub struct SessionStreamOutcome {
    pub events: Vec<Event>,
    pub next_cursor: Option<StreamCursor>,
    pub sessions: Vec<SessionSummary>,
    pub perf: PerfCounters,
}

struct SessionInstance {
    key: String,
    events: Vec<Event>,
    last_at: DateTime<Utc>,
}

/// Group a time-ordered window of events into session instances, splitting
/// whenever consecutive events sharing a session key are more than
/// `max_gap` apart (spec.md §4.8 step 2).
fn group_into_sessions(events: Vec<Event>, session_fields: &[String], max_gap: chrono::Duration) -> Vec<SessionInstance> {
    let mut instances: Vec<SessionInstance> = Vec::new();
    let mut open_index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for event in events {
        let key = event.session_key(session_fields);
        let reopen = open_index
            .get(&key)
            .map(|&idx| event.timestamp - instances[idx].last_at > max_gap)
            .unwrap_or(true);

        if reopen {
            let idx = instances.len();
            instances.push(SessionInstance { key: key.clone(), events: vec![event.clone()], last_at: event.timestamp });
            open_index.insert(key, idx);
        } else {
            let idx = open_index[&key];
            instances[idx].last_at = event.timestamp;
            instances[idx].events.push(event);
        }
    }

    instances
}

pub async fn stream_events_with_session_context(
    client: &SiemClient,
    indices: &[String],
    query: &Query,
    session_fields: &[String],
    chunk_size: u32,
    max_session_gap_minutes: i64,
    cursor: Option<StreamCursor>,
) -> Result<SessionStreamOutcome, SiemError> {
    let fetch_size = chunk_size.saturating_mul(2).max(1);
    let (candidates, page) = client
        .search_cursor_ascending(indices, query, fetch_size, cursor.as_ref())
        .await?;
    let Page::Cursor { next_cursor: fetched_to } = page else {
        unreachable!("search_cursor_ascending always returns Page::Cursor")
    };

    let candidates_fetched = candidates.len();
    let exhausted = candidates_fetched < fetch_size as usize;
    let max_gap = chrono::Duration::minutes(max_session_gap_minutes);
    let instances = group_into_sessions(candidates, session_fields, max_gap);

    let mut events = Vec::new();
    let mut sessions = Vec::new();
    let mut emitted_count = 0usize;
    let mut deferred = 0usize;
    let mut cut_before: Option<(i64, String)> = None;

    for (idx, instance) in instances.iter().enumerate() {
        let would_overflow = emitted_count + instance.events.len() > chunk_size as usize;
        // Never stall: always emit the very first session even if it alone
        // overflows the chunk, since a session can never be split.
        if would_overflow && idx != 0 {
            let first_deferred_event = &instance.events[0];
            cut_before = Some((first_deferred_event.timestamp.timestamp_millis(), first_deferred_event.id.document_id.clone()));
            deferred = instances.len() - idx;
            break;
        }

        let started_at = instance.events.first().map(|e| e.timestamp).unwrap_or_else(Utc::now);
        let ended_at = instance.last_at;
        emitted_count += instance.events.len();
        sessions.push(SessionSummary {
            session_key: instance.key.clone(),
            event_count: instance.events.len(),
            started_at,
            ended_at,
        });
        events.extend(instance.events.iter().cloned());
    }

    let next_cursor = match cut_before {
        Some((ts, id)) => Some(StreamCursor::new(ts, id)),
        None if exhausted => None,
        None => fetched_to,
    };

    let perf = PerfCounters {
        candidates_fetched,
        sessions_emitted: sessions.len(),
        events_emitted: events.len(),
        sessions_deferred: deferred,
    };

    Ok(SessionStreamOutcome { events, next_cursor, sessions, perf })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_domain::EventId;

    fn event(session: &str, minute: i64) -> Event {
        Event {
            id: EventId { index: "honeypot-2026.07".into(), document_id: format!("{session}-{minute}") },
            timestamp: DateTime::parse_from_rfc3339("2026-07-30T00:00:00Z").unwrap().with_timezone(&Utc)
                + chrono::Duration::minutes(minute),
            source_ip: None,
            destination_ip: None,
            destination_port: None,
            category: None,
            technique: None,
            tactic: None,
            fields: [("session_id".to_string(), serde_json::Value::String(session.into()))].into_iter().collect(),
        }
    }

    #[test]
    fn groups_contiguous_events_by_session_key() {
        let events = vec![event("a", 0), event("a", 1), event("b", 1)];
        let instances = group_into_sessions(events, &["session_id".to_string()], chrono::Duration::minutes(30));
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].events.len(), 2);
        assert_eq!(instances[1].events.len(), 1);
    }

    #[test]
    fn splits_same_key_session_on_large_gap() {
        let events = vec![event("a", 0), event("a", 100)];
        let instances = group_into_sessions(events, &["session_id".to_string()], chrono::Duration::minutes(30));
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].key, instances[1].key);
    }

    #[test]
    fn first_oversized_session_is_emitted_without_stalling() {
        let events: Vec<Event> = (0..5).map(|m| event("huge", m)).collect();
        let instances = group_into_sessions(events, &["session_id".to_string()], chrono::Duration::minutes(30));
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].events.len(), 5);
    }
}
