//! `query_events` tool (spec.md §4.6 tool surface, §4.7, §4.8): a bounded
//! search over the SIEM store that runs the cost-estimation ladder before
//! ever issuing the query, generalized from the teacher's single-purpose
//! search tool into one backed by the optimizer and index-pattern registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_protocol::error::VigilError;
use vigil_query::{optimize, OptimizationStep, OptimizerConfig, SearchRequest};
use vigil_resilience::CircuitBreaker;
use vigil_siem::{AggSpec, IndexPatternRegistry, IndexPatternSpec, OffsetPage, SiemClient};

use crate::registry::{ToolContext, ToolHandler};
use crate::tools::common::{build_query, page_meta, project_event, resolve_indices, resolve_window, with_breaker, full_event, EventFilter, IndexResolution};

const PRIORITY_FIELDS: &[&str] = &["@timestamp", "source_ip", "destination_ip", "category"];
const AVERAGE_DOC_BYTES: u64 = 2048;
const TOTAL_FIELDS_ESTIMATE: u32 = 40;

pub struct QueryEventsTool {
    client: Arc<SiemClient>,
    indices: Arc<IndexPatternRegistry>,
    breaker: Arc<CircuitBreaker>,
}

impl QueryEventsTool {
    pub fn new(client: Arc<SiemClient>, indices: Arc<IndexPatternRegistry>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, indices, breaker }
    }

    fn index_spec() -> IndexPatternSpec {
        IndexPatternSpec::with_fallback("siem-events-*", "logs-*", false)
    }
}

#[derive(Debug, Deserialize)]
struct QueryEventsParams {
    #[serde(flatten)]
    filter: EventFilter,
    #[serde(default)]
    fields: Option<Vec<String>>,
    #[serde(default = "default_size")]
    size: u32,
    #[serde(default)]
    from: u32,
    /// Field to bucket by instead of returning raw events, e.g. "top
    /// attackers" -> `top_field: "source_ip"` (spec.md §4.8 step 2). When
    /// present the query is eligible for the optimizer's aggregation-
    /// conversion step; it is executed as a terms aggregation only if the
    /// optimizer actually decides to convert.
    #[serde(default)]
    top_field: Option<String>,
    #[serde(default = "default_top_size")]
    top_size: u32,
}

fn default_size() -> u32 {
    100
}

fn default_top_size() -> u32 {
    10
}

fn step_label(step: &OptimizationStep) -> &'static str {
    match step {
        OptimizationStep::FieldProjection => "projection",
        OptimizationStep::AggregationConversion => "aggregation_conversion",
        OptimizationStep::SizeReduction => "reduce_size",
        OptimizationStep::StreamingFallback => "streaming_fallback",
    }
}

#[async_trait]
impl ToolHandler for QueryEventsTool {
    fn name(&self) -> &'static str {
        "query_events"
    }

    fn description(&self) -> &'static str {
        "Search SIEM events with automatic cost-based optimization: field projection, aggregation \
         conversion, size reduction, and streaming fallback are applied in order until the estimated \
         response fits the byte budget."
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
                "fields": { "type": "array", "items": { "type": "string" } },
                "size": { "type": "integer", "minimum": 1 },
                "from": { "type": "integer", "minimum": 0 },
                "top_field": { "type": "string" },
                "top_size": { "type": "integer", "minimum": 1 }
            }
        })
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("query_events")
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        let params: QueryEventsParams =
            serde_json::from_value(args).map_err(|e| VigilError::InvalidParams(e.to_string()))?;
        let (since, until) = resolve_window(params.filter.since, params.filter.until);
        let query = build_query(&params.filter, since, until);

        let indices = match resolve_indices(&self.indices, &self.breaker, "query_events", &Self::index_spec()).await? {
            IndexResolution::Resolved(v) => v,
            IndexResolution::Diagnostic(v) => return Ok(v),
        };

        let request = SearchRequest {
            size: params.size,
            average_doc_bytes: AVERAGE_DOC_BYTES,
            requested_fields: params.fields.clone(),
            priority_fields: PRIORITY_FIELDS.iter().map(|s| s.to_string()).collect(),
            total_fields_estimate: TOTAL_FIELDS_ESTIMATE,
            aggregation_convertible: params.top_field.is_some(),
        };
        let outcome = optimize(&request, &OptimizerConfig::default());
        let applied: Vec<&'static str> = outcome.steps_applied.iter().map(step_label).collect();

        if outcome.fallback_to_streaming {
            return Ok(json!({
                "status": "fallback_to_streaming",
                "message": "result too large for a single page even after optimization; use stream_events instead",
                "optimization_applied": applied,
            }));
        }

        if outcome.use_aggregation {
            let top_field = params.top_field.clone().expect("aggregation_convertible requires top_field");
            let agg = AggSpec::Terms { name: "top_values".to_string(), field: top_field, size: params.top_size };
            let aggregation = with_breaker(&self.breaker, self.client.aggregate(&indices, &query, &agg)).await?;
            return Ok(json!({
                "status": "aggregated",
                "aggregation": aggregation,
                "optimization_applied": applied,
            }));
        }

        let effective_fields = outcome.projected_fields.clone().or_else(|| params.fields.clone());
        let size = outcome.final_size;
        let page_request = OffsetPage::new(params.from, size);
        let rewritten_to_cursor = page_request.exceeds_deep_pagination_limit();

        let (events, page) = if rewritten_to_cursor {
            with_breaker(&self.breaker, self.client.search_cursor(&indices, &query, size, None)).await?
        } else {
            with_breaker(&self.breaker, self.client.search_offset(&indices, &query, page_request)).await?
        };

        let events: Vec<Value> = match &effective_fields {
            Some(fields) => events.into_iter().map(|e| project_event(e, fields)).collect(),
            None => events.into_iter().map(full_event).collect(),
        };

        Ok(json!({
            "events": events,
            "page": page_meta(&page),
            "optimization_applied": applied,
            "rewritten_to_cursor": rewritten_to_cursor,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_field_defaults_top_size_to_ten_and_is_none_when_absent() {
        let params: QueryEventsParams = serde_json::from_value(json!({ "source_ip": "10.0.0.1" })).unwrap();
        assert_eq!(params.top_field, None);
        assert_eq!(params.top_size, 10);
    }

    #[test]
    fn top_field_and_top_size_deserialize_when_supplied() {
        let params: QueryEventsParams =
            serde_json::from_value(json!({ "top_field": "source_ip", "top_size": 5 })).unwrap();
        assert_eq!(params.top_field, Some("source_ip".to_string()));
        assert_eq!(params.top_size, 5);
    }

    #[test]
    fn a_request_with_top_field_marks_the_optimizer_request_aggregation_convertible() {
        let request = SearchRequest {
            size: 100,
            average_doc_bytes: AVERAGE_DOC_BYTES,
            requested_fields: None,
            priority_fields: PRIORITY_FIELDS.iter().map(|s| s.to_string()).collect(),
            total_fields_estimate: TOTAL_FIELDS_ESTIMATE,
            aggregation_convertible: true,
        };
        let outcome = optimize(&request, &OptimizerConfig::default());
        assert!(outcome.use_aggregation);
        assert!(outcome.steps_applied.contains(&OptimizationStep::AggregationConversion));
    }
}
