//! `Event` (spec.md §3): an immutable snapshot of a security record
//! retrieved from the SIEM store. Identity is `(index, document id)`;
//! events are never mutated by the core once constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub index: String,
    pub document_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub source_ip: Option<IpAddr>,
    pub destination_ip: Option<IpAddr>,
    pub destination_port: Option<u16>,
    pub category: Option<String>,
    pub technique: Option<String>,
    pub tactic: Option<String>,
    /// Arbitrary additional fields pulled straight from the index document.
    /// Values are restricted to scalars, arrays, and nested maps (no
    /// functions/dates-as-objects beyond what JSON itself allows).
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

impl Event {
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The composite session-grouping key for this event, given a
    /// configured list of field names (spec.md §3 `Session`). Fields not
    /// present on this event contribute an empty-string component so two
    /// events missing the same fields still group together.
    pub fn session_key(&self, fields: &[String]) -> String {
        fields
            .iter()
            .map(|field| self.session_field_value(field))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    fn session_field_value(&self, field: &str) -> String {
        match field.as_ref() {
            "source_ip" => self.source_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            "destination_ip" => self
                .destination_ip
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            _ => self
                .get_field(field)
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(source_ip: &str, session_id: &str) -> Event {
        Event {
            id: EventId {
                index: "honeypot-2026.07".into(),
                document_id: "doc1".into(),
            },
            timestamp: Utc::now(),
            source_ip: Some(source_ip.parse().unwrap()),
            destination_ip: None,
            destination_port: Some(22),
            category: Some("bruteforce".into()),
            technique: None,
            tactic: None,
            fields: [("session_id".to_string(), Value::String(session_id.into()))]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn session_key_combines_configured_fields() {
        let event = sample_event("203.0.113.10", "sess-1");
        let key = event.session_key(&["source_ip".to_string(), "session_id".to_string()]);
        assert_eq!(key, "203.0.113.10\u{1f}sess-1");
    }

    #[test]
    fn missing_fields_contribute_empty_component() {
        let event = sample_event("203.0.113.10", "sess-1");
        let key = event.session_key(&["destination_ip".to_string()]);
        assert_eq!(key, "");
    }
}
