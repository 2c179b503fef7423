//! Shared helpers for the tool handlers in this module: a small filter
//! struct every event-touching tool accepts, the index-pattern-discovery
//! "diagnostic instead of empty results" pattern (spec.md §4.7), and
//! field-projection/page-meta rendering shared by `query_events` and the
//! streaming tools.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_domain::Event;
use vigil_protocol::error::VigilError;
use vigil_resilience::CircuitBreaker;
use vigil_siem::{IndexPatternRegistry, IndexPatternSpec, Page, SiemError};

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub destination_ip: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub technique: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

/// Defaults an absent window to the 24 hours ending now.
pub fn resolve_window(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> (DateTime<Utc>, DateTime<Utc>) {
    let until = until.unwrap_or_else(Utc::now);
    let since = since.unwrap_or(until - ChronoDuration::hours(24));
    (since, until)
}

pub fn build_query(filter: &EventFilter, since: DateTime<Utc>, until: DateTime<Utc>) -> vigil_siem::Query {
    use vigil_siem::Query;

    let mut builder = Query::bool_query().filter(Query::range(
        "@timestamp",
        Some(json!(since.to_rfc3339())),
        Some(json!(until.to_rfc3339())),
    ));
    if let Some(ip) = &filter.source_ip {
        builder = builder.filter(Query::term("source_ip", json!(ip)));
    }
    if let Some(ip) = &filter.destination_ip {
        builder = builder.filter(Query::term("destination_ip", json!(ip)));
    }
    if let Some(category) = &filter.category {
        builder = builder.filter(Query::term("category", json!(category)));
    }
    if let Some(technique) = &filter.technique {
        builder = builder.filter(Query::term("technique", json!(technique)));
    }
    builder.build()
}

/// Renders an `Event` restricted to `fields`, falling back to the event's
/// `fields` map for anything not among the well-known columns.
pub fn project_event(event: Event, fields: &[String]) -> Value {
    let mut out = serde_json::Map::new();
    for field in fields {
        let value = match field.as_str() {
            "@timestamp" | "timestamp" => json!(event.timestamp.to_rfc3339()),
            "source_ip" => json!(event.source_ip.map(|ip| ip.to_string())),
            "destination_ip" => json!(event.destination_ip.map(|ip| ip.to_string())),
            "destination_port" => json!(event.destination_port),
            "category" => json!(event.category),
            "technique" => json!(event.technique),
            "tactic" => json!(event.tactic),
            other => event.get_field(other).cloned().unwrap_or(Value::Null),
        };
        out.insert(field.clone(), value);
    }
    out.insert("_id".to_string(), json!(event.id.document_id));
    out.insert("_index".to_string(), json!(event.id.index));
    Value::Object(out)
}

pub fn full_event(event: Event) -> Value {
    serde_json::to_value(event).unwrap_or(Value::Null)
}

pub fn page_meta(page: &Page) -> Value {
    match page {
        Page::Offset(meta) => json!({ "total": meta.total, "returned": meta.returned }),
        Page::Cursor { next_cursor } => json!({ "next_cursor": next_cursor.as_ref().map(|c| c.encode()) }),
    }
}

pub enum IndexResolution {
    Resolved(Vec<String>),
    /// The "diagnostic payload enumerating the patterns tried" spec.md §4.7
    /// calls for when no concrete index matches — returned as a successful
    /// tool result, not an error, since an empty data set is not a failure.
    Diagnostic(Value),
}

pub async fn resolve_indices(
    registry: &IndexPatternRegistry,
    breaker: &CircuitBreaker,
    tool: &'static str,
    spec: &IndexPatternSpec,
) -> Result<IndexResolution, VigilError> {
    let guard = breaker
        .try_acquire()
        .map_err(|_| VigilError::CircuitOpen { dependency: breaker.dependency().to_string() })?;
    match registry.resolve(tool, spec).await {
        Ok(indices) => {
            guard.success();
            Ok(IndexResolution::Resolved(indices))
        }
        // A tool's patterns not matching any live index is the store answering
        // correctly, not a dependency failure: counts as a success for the breaker.
        Err(SiemError::NoMatchingIndex { patterns, tool }) => {
            guard.success();
            Ok(IndexResolution::Diagnostic(json!({
                "status": "no_matching_indices",
                "patterns_tried": patterns,
                "tool": tool,
                "message": format!("no index matched any configured pattern for tool '{tool}'; try `get_data_dictionary`"),
            })))
        }
        Err(other) => {
            guard.failure();
            Err(VigilError::internal(other))
        }
    }
}

/// Runs one outbound call against a dependency guarded by `breaker`: fails
/// fast with `VigilError::CircuitOpen` while the breaker is open (testable
/// property 5, spec.md §4.4), otherwise records the call's outcome on the
/// breaker before propagating the result.
pub async fn with_breaker<T, E, F>(breaker: &CircuitBreaker, fut: F) -> Result<T, VigilError>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let guard = breaker
        .try_acquire()
        .map_err(|_| VigilError::CircuitOpen { dependency: breaker.dependency().to_string() })?;
    match fut.await {
        Ok(value) => {
            guard.success();
            Ok(value)
        }
        Err(e) => {
            guard.failure();
            Err(VigilError::internal(e))
        }
    }
}
