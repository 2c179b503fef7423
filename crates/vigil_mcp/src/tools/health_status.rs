//! `get_health_status` tool: the live dependency health table the Feature
//! Manager (C10) maintains. Has no feature dependency of its own, so it
//! (and `get_data_dictionary`) stay listed and callable through every
//! outage scenario (spec.md §8 S6).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use vigil_protocol::error::VigilError;

use crate::health::FeatureManager;
use crate::registry::{ToolContext, ToolHandler};

pub struct HealthStatusTool {
    features: Arc<FeatureManager>,
}

impl HealthStatusTool {
    pub fn new(features: Arc<FeatureManager>) -> Self {
        Self { features }
    }
}

#[async_trait]
impl ToolHandler for HealthStatusTool {
    fn name(&self) -> &'static str {
        "get_health_status"
    }

    fn description(&self) -> &'static str {
        "Report the health of every dependency the server has probed (SIEM store, threat-intel \
         sources, secret store)."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        let dependencies: Vec<Value> = self
            .features
            .all_states()
            .into_iter()
            .map(|(name, state)| {
                json!({
                    "name": name,
                    "healthy": state.healthy,
                    "last_checked": state.last_checked,
                    "last_error": state.last_error,
                })
            })
            .collect();

        Ok(json!({ "dependencies": dependencies }))
    }
}
