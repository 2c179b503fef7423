//! `enrich_indicator` tool (spec.md §4.10): fans out to every enabled
//! threat-intel source through the orchestrator and returns the combined
//! verdict, or -32032 if every source failed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_domain::Indicator;
use vigil_intel::ThreatIntelOrchestrator;
use vigil_protocol::error::VigilError;

use crate::registry::{ToolContext, ToolHandler};

pub struct EnrichIndicatorTool {
    orchestrator: Arc<ThreatIntelOrchestrator>,
}

impl EnrichIndicatorTool {
    pub fn new(orchestrator: Arc<ThreatIntelOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[derive(Debug, Deserialize)]
struct EnrichIndicatorParams {
    indicator: String,
}

#[async_trait]
impl ToolHandler for EnrichIndicatorTool {
    fn name(&self) -> &'static str {
        "enrich_indicator"
    }

    fn description(&self) -> &'static str {
        "Enrich a single indicator (IP, domain, URL, or file hash) via every enabled threat-intel \
         source, combined with reliability weighting. Served from cache when available."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["indicator"],
            "properties": {
                "indicator": { "type": "string" }
            }
        })
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("enrich_indicator")
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(45)
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        let params: EnrichIndicatorParams =
            serde_json::from_value(args).map_err(|e| VigilError::InvalidParams(e.to_string()))?;
        let indicator =
            Indicator::parse(&params.indicator).map_err(|e| VigilError::InvalidParams(e.to_string()))?;

        let outcome = self.orchestrator.enrich(&indicator).await?;

        Ok(json!({
            "indicator": outcome.result.indicator,
            "score": outcome.result.score,
            "malicious": outcome.result.malicious,
            "geo": outcome.result.geo,
            "network": outcome.result.network,
            "tags": outcome.result.tags,
            "sources": outcome.result.sources,
            "diagnostics": outcome.result.diagnostics,
            "computed_at": outcome.result.computed_at,
            "cache_hit": outcome.cache_hit,
        }))
    }
}
