//! `stream_events_with_session_context` tool (spec.md §4.8 "Session-context
//! streaming", §3 no-session-split invariant): groups events into sessions
//! by configurable fields before chunking, so a session is never split
//! across responses.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_domain::stream::StreamCursor;
use vigil_protocol::error::VigilError;
use vigil_query::stream_events_with_session_context;
use vigil_resilience::CircuitBreaker;
use vigil_siem::{IndexPatternRegistry, IndexPatternSpec, SiemClient};

use crate::registry::{ToolContext, ToolHandler};
use crate::tools::common::{build_query, full_event, resolve_indices, resolve_window, with_breaker, EventFilter, IndexResolution};

const DEFAULT_CHUNK_SIZE: u32 = 200;
const DEFAULT_MAX_SESSION_GAP_MINUTES: i64 = 30;

/// Default session-grouping fields (spec.md §3 `Session`).
fn default_session_fields() -> Vec<String> {
    vec!["source_ip".to_string(), "destination_ip".to_string(), "user_name".to_string(), "session_id".to_string()]
}

pub struct StreamSessionTool {
    client: Arc<SiemClient>,
    indices: Arc<IndexPatternRegistry>,
    breaker: Arc<CircuitBreaker>,
}

impl StreamSessionTool {
    pub fn new(client: Arc<SiemClient>, indices: Arc<IndexPatternRegistry>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, indices, breaker }
    }

    fn index_spec() -> IndexPatternSpec {
        IndexPatternSpec::with_fallback("siem-events-*", "logs-*", false)
    }
}

#[derive(Debug, Deserialize)]
struct StreamSessionParams {
    #[serde(flatten)]
    filter: EventFilter,
    #[serde(default = "default_chunk_size")]
    chunk_size: u32,
    #[serde(default = "default_session_fields")]
    session_fields: Vec<String>,
    #[serde(default = "default_max_session_gap_minutes")]
    max_session_gap_minutes: i64,
    #[serde(default)]
    cursor: Option<String>,
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_session_gap_minutes() -> i64 {
    DEFAULT_MAX_SESSION_GAP_MINUTES
}

#[async_trait]
impl ToolHandler for StreamSessionTool {
    fn name(&self) -> &'static str {
        "stream_events_with_session_context"
    }

    fn description(&self) -> &'static str {
        "Stream SIEM events grouped into complete sessions; a session is always wholly present or \
         wholly absent from a given chunk, never split across responses."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_ip": { "type": "string" },
                "destination_ip": { "type": "string" },
                "category": { "type": "string" },
                "technique": { "type": "string" },
                "since": { "type": "string", "format": "date-time" },
                "until": { "type": "string", "format": "date-time" },
                "chunk_size": { "type": "integer", "minimum": 1 },
                "session_fields": { "type": "array", "items": { "type": "string" } },
                "max_session_gap_minutes": { "type": "integer", "minimum": 1 },
                "cursor": { "type": "string" }
            }
        })
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("query_events")
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(90)
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        let params: StreamSessionParams =
            serde_json::from_value(args).map_err(|e| VigilError::InvalidParams(e.to_string()))?;
        let (since, until) = resolve_window(params.filter.since, params.filter.until);
        let query = build_query(&params.filter, since, until);

        let indices = match resolve_indices(
            &self.indices,
            &self.breaker,
            "stream_events_with_session_context",
            &Self::index_spec(),
        )
        .await?
        {
            IndexResolution::Resolved(v) => v,
            IndexResolution::Diagnostic(v) => return Ok(v),
        };

        let cursor = match &params.cursor {
            Some(raw) => {
                Some(StreamCursor::decode(raw).map_err(|e| VigilError::InvalidParams(format!("invalid cursor: {e}")))?)
            }
            None => None,
        };

        let outcome = with_breaker(
            &self.breaker,
            stream_events_with_session_context(
                &self.client,
                &indices,
                &query,
                &params.session_fields,
                params.chunk_size,
                params.max_session_gap_minutes,
                cursor,
            ),
        )
        .await?;

        let sessions: Vec<Value> = outcome
            .sessions
            .into_iter()
            .map(|s| {
                json!({
                    "session_key": s.session_key,
                    "event_count": s.event_count,
                    "started_at": s.started_at,
                    "ended_at": s.ended_at,
                })
            })
            .collect();

        Ok(json!({
            "events": outcome.events.into_iter().map(full_event).collect::<Vec<_>>(),
            "next_cursor": outcome.next_cursor.map(|c| c.encode()),
            "sessions": sessions,
            "performance": {
                "candidates_fetched": outcome.perf.candidates_fetched,
                "sessions_emitted": outcome.perf.sessions_emitted,
                "events_emitted": outcome.perf.events_emitted,
                "sessions_deferred": outcome.perf.sessions_deferred,
            },
        }))
    }
}
