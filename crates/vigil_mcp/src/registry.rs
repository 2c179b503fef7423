//! Tool registry and the `ToolHandler` trait every tool implements
//! (spec.md §4.6, C11). Modeled on the teacher's `ToolRegistry`/`McpTool`
//! pair, generalized from synchronous file-system tools to async handlers
//! over the SIEM/threat-intel/correlation engines, each carrying its own
//! schema, timeout, required permission, and feature dependencies.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vigil_protocol::error::VigilError;
use vigil_protocol::mcp::ToolDefinition;

use crate::health::FeatureRequirement;

/// Per-call context threaded into every handler: cancellation (tripped by
/// client disconnect, `$/cancelRequest`, deadline, or shutdown) and the
/// correlation id used to tie together logs and the error response.
pub struct ToolContext {
    pub cancellation: CancellationToken,
    pub correlation_id: Uuid,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;

    /// Permission key checked against the caller's API key (spec.md §4.6
    /// step 3). `None` means no specific grant is required beyond a valid
    /// session.
    fn required_permission(&self) -> Option<&'static str> {
        None
    }

    /// Per-tool deadline (spec.md §4.6 step 5: default 60s, up to 300s).
    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Dependencies the Feature Manager (C10) must see healthy before this
    /// tool is listed or callable.
    fn feature_requirement(&self) -> FeatureRequirement {
        FeatureRequirement::none()
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, VigilError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ToolHandler>> {
        self.tools.values()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
