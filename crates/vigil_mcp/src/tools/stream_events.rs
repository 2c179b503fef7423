//! `stream_events` tool (spec.md §4.8 "Plain streaming"): fixed-size
//! cursor-paginated chunks with no session semantics, stopping after
//! `max_chunks` or cursor exhaustion.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_domain::stream::StreamCursor;
use vigil_protocol::error::VigilError;
use vigil_query::stream_events;
use vigil_resilience::CircuitBreaker;
use vigil_siem::{IndexPatternRegistry, IndexPatternSpec, SiemClient};

use crate::registry::{ToolContext, ToolHandler};
use crate::tools::common::{build_query, full_event, resolve_indices, resolve_window, with_breaker, EventFilter, IndexResolution};

const DEFAULT_CHUNK_SIZE: u32 = 100;
const DEFAULT_MAX_CHUNKS: u32 = 10;

pub struct StreamEventsTool {
    client: Arc<SiemClient>,
    indices: Arc<IndexPatternRegistry>,
    breaker: Arc<CircuitBreaker>,
}

impl StreamEventsTool {
    pub fn new(client: Arc<SiemClient>, indices: Arc<IndexPatternRegistry>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, indices, breaker }
    }

    fn index_spec() -> IndexPatternSpec {
        IndexPatternSpec::with_fallback("siem-events-*", "logs-*", false)
    }
}

#[derive(Debug, Deserialize)]
struct StreamEventsParams {
    #[serde(flatten)]
    filter: EventFilter,
    #[serde(default = "default_chunk_size")]
    chunk_size: u32,
    #[serde(default = "default_max_chunks")]
    max_chunks: u32,
    #[serde(default)]
    cursor: Option<String>,
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_chunks() -> u32 {
    DEFAULT_MAX_CHUNKS
}

#[async_trait]
impl ToolHandler for StreamEventsTool {
    fn name(&self) -> &'static str {
        "stream_events"
    }

    fn description(&self) -> &'static str {
        "Stream SIEM events in fixed-size, duplicate-free chunks via cursor pagination."
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
                "max_chunks": { "type": "integer", "minimum": 1 },
                "cursor": { "type": "string" }
            }
        })
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("query_events")
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        let params: StreamEventsParams =
            serde_json::from_value(args).map_err(|e| VigilError::InvalidParams(e.to_string()))?;
        let (since, until) = resolve_window(params.filter.since, params.filter.until);
        let query = build_query(&params.filter, since, until);

        let indices = match resolve_indices(&self.indices, &self.breaker, "stream_events", &Self::index_spec()).await? {
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
            stream_events(&self.client, &indices, &query, params.chunk_size, params.max_chunks, cursor),
        )
        .await?;

        Ok(json!({
            "events": outcome.events.into_iter().map(full_event).collect::<Vec<_>>(),
            "next_cursor": outcome.next_cursor.map(|c| c.encode()),
            "chunks_fetched": outcome.chunks_fetched,
        }))
    }
}
