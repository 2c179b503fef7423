//! `get_data_dictionary` tool: lists concrete indices matching a pattern
//! and their field mappings, so a caller can discover what fields exist
//! before building a `query_events`/`stream_events` filter. Has no feature
//! dependency (spec.md §4.5 example: `get_data_dictionary` → {}), so it
//! stays listed even when the SIEM store itself is unhealthy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vigil_protocol::error::VigilError;
use vigil_resilience::CircuitBreaker;
use vigil_siem::SiemClient;

use crate::registry::{ToolContext, ToolHandler};
use crate::tools::common::with_breaker;

const MAX_INDICES_DESCRIBED: usize = 5;

pub struct DataDictionaryTool {
    client: Arc<SiemClient>,
    breaker: Arc<CircuitBreaker>,
}

impl DataDictionaryTool {
    pub fn new(client: Arc<SiemClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, breaker }
    }
}

#[derive(Debug, Deserialize)]
struct DataDictionaryParams {
    #[serde(default = "default_pattern")]
    pattern: String,
}

fn default_pattern() -> String {
    "siem-events-*".to_string()
}

#[async_trait]
impl ToolHandler for DataDictionaryTool {
    fn name(&self) -> &'static str {
        "get_data_dictionary"
    }

    fn description(&self) -> &'static str {
        "List concrete indices matching a pattern and their field mappings."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" }
            }
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        let params: DataDictionaryParams =
            serde_json::from_value(args).map_err(|e| VigilError::InvalidParams(e.to_string()))?;

        let indices = with_breaker(&self.breaker, self.client.list_indices(&params.pattern)).await?;

        let mut mappings = serde_json::Map::new();
        for index in indices.iter().take(MAX_INDICES_DESCRIBED) {
            let mapping = with_breaker(&self.breaker, self.client.mapping(index)).await?;
            mappings.insert(index.clone(), mapping);
        }

        Ok(json!({
            "pattern": params.pattern,
            "indices": indices,
            "mappings": mappings,
            "truncated": indices.len() > MAX_INDICES_DESCRIBED,
        }))
    }
}
