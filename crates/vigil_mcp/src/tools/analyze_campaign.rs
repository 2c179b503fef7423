//! `analyze_campaign` tool (spec.md §4.9): runs the 7-stage correlation
//! pipeline over a seed indicator set and time window, returning the
//! resulting campaign plus any stages that were skipped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_correlate::{correlate, CorrelationRequest, CorrelatorConfig};
use vigil_domain::Indicator;
use vigil_protocol::error::VigilError;
use vigil_resilience::CircuitBreaker;
use vigil_siem::{IndexPatternRegistry, IndexPatternSpec, SiemClient};

use crate::registry::{ToolContext, ToolHandler};
use crate::tools::common::{resolve_indices, with_breaker, IndexResolution};

/// The pipeline's fixed stage labels (pipeline.rs `Stage::label`), needed
/// here because `CorrelationOutcome` only exposes *skipped* stages via
/// `warnings`, not the set that ran. `sources_queried` is derived as this
/// full set minus the warned ones — an approximation documented in
/// DESIGN.md: a stage that is skipped silently because it had nothing to
/// fetch (e.g. no infrastructure features extracted) is indistinguishable
/// here from one that ran and found nothing.
const ALL_STAGE_LABELS: &[&str] = &["direct", "infra", "behavioral", "temporal", "ip", "network"];

pub struct AnalyzeCampaignTool {
    client: Arc<SiemClient>,
    indices: Arc<IndexPatternRegistry>,
    config: CorrelatorConfig,
    breaker: Arc<CircuitBreaker>,
}

impl AnalyzeCampaignTool {
    pub fn new(
        client: Arc<SiemClient>,
        indices: Arc<IndexPatternRegistry>,
        config: CorrelatorConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self { client, indices, config, breaker }
    }

    fn index_spec() -> IndexPatternSpec {
        IndexPatternSpec::with_fallback("siem-events-*", "logs-*", true)
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeCampaignParams {
    seed_indicators: Vec<String>,
    #[serde(default)]
    since: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    until: Option<chrono::DateTime<Utc>>,
}

#[async_trait]
impl ToolHandler for AnalyzeCampaignTool {
    fn name(&self) -> &'static str {
        "analyze_campaign"
    }

    fn description(&self) -> &'static str {
        "Correlate a set of seed indicators into a scored campaign using the 7-stage pipeline \
         (direct IOC, infrastructure, behavioral, temporal, IP, network, scoring)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["seed_indicators"],
            "properties": {
                "seed_indicators": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                "since": { "type": "string", "format": "date-time" },
                "until": { "type": "string", "format": "date-time" }
            }
        })
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("analyze_campaign")
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(180)
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        let params: AnalyzeCampaignParams =
            serde_json::from_value(args).map_err(|e| VigilError::InvalidParams(e.to_string()))?;
        if params.seed_indicators.is_empty() {
            return Err(VigilError::InvalidParams("seed_indicators must not be empty".into()));
        }

        let seed_indicators = params
            .seed_indicators
            .iter()
            .map(|raw| Indicator::parse(raw).map_err(|e| VigilError::InvalidParams(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let until = params.until.unwrap_or_else(Utc::now);
        let since = params.since.unwrap_or(until - chrono::Duration::hours(48));

        let indices = match resolve_indices(&self.indices, &self.breaker, "analyze_campaign", &Self::index_spec()).await? {
            IndexResolution::Resolved(v) => v,
            IndexResolution::Diagnostic(v) => return Ok(v),
        };

        let request = CorrelationRequest { seed_indicators, window_start: since, window_end: until, indices };
        let outcome = with_breaker(&self.breaker, correlate(&self.client, request, &self.config)).await?;

        let warned_stages: std::collections::HashSet<&str> =
            outcome.warnings.iter().map(|w| w.stage).collect();
        let sources_queried: Vec<&str> =
            ALL_STAGE_LABELS.iter().copied().filter(|s| !warned_stages.contains(s)).collect();

        let warnings: Vec<Value> =
            outcome.warnings.iter().map(|w| json!({ "stage": w.stage, "message": w.message })).collect();

        Ok(json!({
            "campaign": {
                "id": outcome.campaign.id,
                "window_start": outcome.campaign.window_start,
                "window_end": outcome.campaign.window_end,
                "indicators": outcome.campaign.indicators,
                "event_ids": outcome.campaign.event_ids,
                "indicator_relationships": outcome.campaign.relationships,
                "counts": outcome.campaign.counts,
                "confidence": outcome.campaign.confidence,
            },
            "sources_queried": sources_queried,
            "warnings": warnings,
        }))
    }
}
