//! MCP Dispatcher (spec.md §4.6, C11): the one place that turns a parsed
//! JSON-RPC request into a response. Generalized from the teacher's
//! `McpServer::handle_request`/`handle_tools_call` (registry lookup, method
//! match, `ToolCallResult` wrapping), with one deliberate departure: where
//! the teacher turns a tool failure into a *successful* response carrying
//! `is_error: true`, this dispatcher maps it to an actual JSON-RPC error
//! object via the error taxonomy (§7), since callers here need `code` and
//! `data.correlation_id` to drive retry/backoff decisions, not just a flag.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::timeout;
use uuid::Uuid;

use vigil_protocol::error::VigilError;
use vigil_protocol::jsonrpc::{methods, JsonRpcRequest, JsonRpcResponse, RequestId, JSONRPC_VERSION};
use vigil_protocol::mcp::{
    CallToolParams, InitializeParams, InitializeResult, ServerCapabilities, ServerInfo, ToolCallResult,
    ToolDefinition, ToolsCapability, ToolsListResult, MCP_PROTOCOL_VERSION,
};
use vigil_resilience::RateLimitDecision;
use vigil_security::{ApiKeyValidationCache, AuditLog, SchemaValidator, SecurityError};

use crate::health::FeatureManager;
use crate::registry::{ToolContext, ToolRegistry};
use crate::session::{Session, SessionRegistry};

pub struct Dispatcher {
    tools: ToolRegistry,
    features: Arc<FeatureManager>,
    rate_limiter: Arc<vigil_resilience::RateLimiterFamily>,
    schema: SchemaValidator,
    sessions: Arc<SessionRegistry>,
    key_cache: Arc<ApiKeyValidationCache>,
    audit: Option<Arc<AuditLog>>,
}

impl Dispatcher {
    pub fn new(
        tools: ToolRegistry,
        features: Arc<FeatureManager>,
        rate_limiter: Arc<vigil_resilience::RateLimiterFamily>,
        schema: SchemaValidator,
        sessions: Arc<SessionRegistry>,
        key_cache: Arc<ApiKeyValidationCache>,
        audit: Option<Arc<AuditLog>>,
    ) -> Self {
        Self { tools, features, rate_limiter, schema, sessions, key_cache, audit }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Dispatches one parsed request. Returns `None` for notifications,
    /// which never get a response written back to the transport.
    pub async fn handle_request(&self, session: &Arc<Session>, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let is_notification = request.is_notification();

        let result = if request.jsonrpc != JSONRPC_VERSION {
            Err(VigilError::InvalidRequest("unsupported jsonrpc version".into()))
        } else if !session.is_authenticated() && request.method != methods::AUTH && request.method != methods::PING {
            // Until authenticated, only `auth` and `ping` are admitted (spec.md §4.1).
            Err(VigilError::Auth { reason: "connection is not authenticated".into() })
        } else if session.closing.is_cancelled() && request.method != methods::PING {
            // Key revocation trips the same token a graceful shutdown does
            // (spec.md §4.12 testable property 6): either way, a *new*
            // request on this connection is refused rather than served.
            Err(VigilError::Auth { reason: "connection has been revoked or is shutting down".into() })
        } else {
            self.route(session, &request, id.clone()).await
        };

        if is_notification {
            return None;
        }

        match result {
            Ok(Some(value)) => Some(JsonRpcResponse::success(id, value)),
            Ok(None) => None,
            Err(error) => respond(id, Err(error)),
        }
    }

    async fn route(
        &self,
        session: &Arc<Session>,
        request: &JsonRpcRequest,
        id: Option<RequestId>,
    ) -> Result<Option<Value>, VigilError> {
        match request.method.as_str() {
            methods::AUTH => self.handle_auth(session, request.params.clone()).await.map(Some),
            methods::PING => Ok(Some(json!({ "status": "pong" }))),
            methods::INITIALIZE => self.handle_initialize(request.params.clone()).map(Some),
            methods::INITIALIZED => Ok(None),
            methods::TOOLS_LIST => Ok(Some(self.handle_tools_list())),
            methods::TOOLS_CALL => {
                let req_id = id.clone().unwrap_or(RequestId::Number(0));
                self.handle_tools_call(session, req_id, request.params.clone()).await.map(Some)
            }
            methods::CANCEL_REQUEST => {
                self.handle_cancel_request(session, request.params.clone());
                Ok(None)
            }
            other => Err(VigilError::MethodNotFound(other.to_string())),
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, VigilError> {
        if let Some(v) = params {
            let _params: InitializeParams =
                serde_json::from_value(v).map_err(|e| VigilError::InvalidParams(e.to_string()))?;
        }
        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities { tools: ToolsCapability { list_changed: false } },
            server_info: ServerInfo { name: "vigil-sentry".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
        };
        serde_json::to_value(result).map_err(|e| VigilError::internal(e))
    }

    fn handle_tools_list(&self) -> Value {
        let tools: Vec<ToolDefinition> = self
            .tools
            .all()
            .filter(|t| self.features.is_available(t.name()))
            .map(|t| t.definition())
            .collect();
        serde_json::to_value(ToolsListResult { tools }).unwrap_or(Value::Null)
    }

    async fn handle_auth(&self, session: &Arc<Session>, params: Option<Value>) -> Result<Value, VigilError> {
        #[derive(serde::Deserialize)]
        struct AuthParams {
            api_key: String,
        }

        let correlation_id = Uuid::new_v4();
        let params: AuthParams = match params {
            Some(v) => serde_json::from_value(v).map_err(|e| VigilError::InvalidParams(e.to_string()))?,
            None => return Err(VigilError::Auth { reason: "missing api_key".into() }),
        };

        let key = self
            .key_cache
            .validate(&params.api_key)
            .await
            .map_err(|e| VigilError::internal(anyhow::anyhow!(e.to_string())))?;

        let key = match key {
            Some(k) if k.is_valid_at(Utc::now()) => k,
            _ => {
                self.log_auth(correlation_id, None, false);
                return Err(VigilError::Auth { reason: "invalid, expired, or revoked api key".into() });
            }
        };

        let key_id = key.key_id;
        let expires_at = key.expires_at;
        let permissions = key.permissions.clone();
        session.authenticate(key);
        self.sessions.register(session.clone());
        self.log_auth(correlation_id, Some(&key_id.to_string()), true);

        Ok(json!({
            "session_id": session.connection_id,
            "permissions": permissions,
            "expires_at": expires_at,
        }))
    }

    fn handle_cancel_request(&self, session: &Arc<Session>, params: Option<Value>) {
        #[derive(serde::Deserialize)]
        struct CancelParams {
            id: RequestId,
        }
        if let Some(v) = params {
            if let Ok(p) = serde_json::from_value::<CancelParams>(v) {
                session.cancel_request(&p.id);
            }
        }
    }

    async fn handle_tools_call(
        &self,
        session: &Arc<Session>,
        request_id: RequestId,
        params: Option<Value>,
    ) -> Result<Value, VigilError> {
        let correlation_id = Uuid::new_v4();
        let outcome = self.run_tool_call(session, request_id.clone(), params, correlation_id).await;
        session.end_request(&request_id);
        outcome
    }

    async fn run_tool_call(
        &self,
        session: &Arc<Session>,
        request_id: RequestId,
        params: Option<Value>,
        correlation_id: Uuid,
    ) -> Result<Value, VigilError> {
        let params: CallToolParams = match params {
            Some(v) => serde_json::from_value(v).map_err(|e| VigilError::InvalidParams(e.to_string()))?,
            None => return Err(VigilError::InvalidParams("missing params for tools/call".into())),
        };

        let tool = self
            .tools
            .get(&params.name)
            .ok_or_else(|| VigilError::MethodNotFound(format!("unknown tool: {}", params.name)))?;

        // 1. Rate limit: global + per-connection + per-API-key token buckets.
        let key_id = session.key_id().map(|k| k.to_string());
        let rate_limit_per_minute = session.api_key().map(|k| k.rate_limit_per_minute);
        let decision = self.rate_limiter.check(
            &session.connection_id,
            key_id.as_deref().zip(rate_limit_per_minute),
        );
        if let RateLimitDecision::Reject { retry_after } = decision {
            self.log_rate_limited(correlation_id, &session.connection_id);
            return Err(VigilError::RateLimited { retry_after_secs: retry_after.as_secs().max(1) });
        }

        // 2. Feature availability.
        if let Some(reason) = self.features.availability(tool.name()) {
            return Err(VigilError::FeatureUnavailable { reason });
        }

        // 3. Permission grant on the caller's API key.
        if let Some(required) = tool.required_permission() {
            if !session.has_permission(required) {
                return Err(VigilError::Auth { reason: format!("missing required permission: {required}") });
            }
        }

        // 4. Schema validation.
        self.schema.validate(tool.name(), &params.arguments).map_err(security_error_to_vigil)?;

        // 5. Invoke with a cancellable deadline.
        let cancellation = session.begin_request(request_id);
        let ctx = ToolContext { cancellation: cancellation.clone(), correlation_id };
        let tool_timeout = tool.timeout();

        let call_result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                if session.closing.is_cancelled() {
                    Err(VigilError::ShuttingDown)
                } else {
                    Err(VigilError::ToolDomain { code: -32002, message: "request cancelled".into() })
                }
            }
            outcome = timeout(tool_timeout, tool.call(params.arguments, &ctx)) => {
                match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(VigilError::ToolDomain {
                        code: -32001,
                        message: format!("tool '{}' exceeded {:?} deadline", tool.name(), tool_timeout),
                    }),
                }
            }
        };

        self.log_tool_call(correlation_id, tool.name(), call_result.is_ok());

        // 6. Wrap success into MCP content; failures propagate as VigilError
        // and get mapped to JSON-RPC error objects by the caller.
        let value = call_result?;
        let wrapped = ToolCallResult::json(value);
        serde_json::to_value(wrapped).map_err(|e| VigilError::internal(e))
    }

    fn log_tool_call(&self, correlation_id: Uuid, tool: &str, success: bool) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_tool_call(correlation_id, tool, success, 0) {
                tracing::warn!(error = %e, "failed to write audit log entry");
            }
        }
    }

    fn log_rate_limited(&self, correlation_id: Uuid, connection_id: &str) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_rate_limited(correlation_id, connection_id) {
                tracing::warn!(error = %e, "failed to write audit log entry");
            }
        }
    }

    fn log_auth(&self, correlation_id: Uuid, key_id: Option<&str>, success: bool) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_auth(correlation_id, key_id, success) {
                tracing::warn!(error = %e, "failed to write audit log entry");
            }
        }
    }
}

fn security_error_to_vigil(error: SecurityError) -> VigilError {
    match error {
        SecurityError::SchemaMismatch { reason, .. } => VigilError::InvalidParams(reason),
        SecurityError::UnknownTool(name) => VigilError::MethodNotFound(name),
        other => VigilError::internal(anyhow::anyhow!(other.to_string())),
    }
}

/// Maps `vigil_security::sanitize::validate_frame`'s rejection reasons onto
/// the wire error codes spec.md §4.2 names: size/encoding/nesting problems
/// are a parse failure (-32700); a frame that parses as JSON but isn't a
/// valid JSON-RPC 2.0 request is a request-shape failure (-32600). Used by
/// every transport before a frame ever reaches the dispatcher.
pub fn frame_error_to_vigil(error: SecurityError) -> VigilError {
    match error {
        SecurityError::InvalidJsonRpc(reason) => VigilError::InvalidRequest(reason),
        other => VigilError::Parse(other.to_string()),
    }
}

fn respond(id: Option<RequestId>, result: Result<Value, VigilError>) -> Option<JsonRpcResponse> {
    match result {
        Ok(value) => Some(JsonRpcResponse::success(id, value)),
        Err(error) => {
            let correlation_id = match &error {
                VigilError::Internal { correlation_id, .. } => *correlation_id,
                _ => Uuid::new_v4(),
            };
            Some(JsonRpcResponse::error(id, error.to_jsonrpc_error(correlation_id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FeatureRequirement;
    use crate::session::Session;
    use async_trait::async_trait;
    use vigil_resilience::RateLimiterFamilyConfig;
    use vigil_security::apikey::{InMemorySecretStore, KeyPermissions};
    use std::time::Duration as StdDuration;

    struct EchoTool;

    #[async_trait]
    impl crate::registry::ToolHandler for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echoes input back"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
            Ok(args)
        }
    }

    struct SlowTool;

    #[async_trait]
    impl crate::registry::ToolHandler for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn description(&self) -> &'static str {
            "never finishes before its timeout"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn timeout(&self) -> StdDuration {
            StdDuration::from_millis(10)
        }
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
            tokio::time::sleep(StdDuration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    async fn build_dispatcher(register_echo: bool, register_slow: bool) -> (Dispatcher, Arc<Session>) {
        let mut tools = ToolRegistry::new();
        let mut schema = SchemaValidator::new();
        if register_echo {
            tools.register(Arc::new(EchoTool));
            schema.register("echo", &json!({ "type": "object" })).unwrap();
        }
        if register_slow {
            tools.register(Arc::new(SlowTool));
            schema.register("slow", &json!({ "type": "object" })).unwrap();
        }

        let features = Arc::new(FeatureManager::new());
        features.register_tool("echo", FeatureRequirement::none());
        features.register_tool("slow", FeatureRequirement::none());

        let rate_limiter = Arc::new(vigil_resilience::RateLimiterFamily::new(RateLimiterFamilyConfig::default()));
        let sessions = Arc::new(SessionRegistry::new());
        let store = Arc::new(InMemorySecretStore::new());
        let key_cache = Arc::new(ApiKeyValidationCache::new(store.clone(), StdDuration::from_secs(60)));

        let dispatcher = Dispatcher::new(tools, features, rate_limiter, schema, sessions, key_cache, None);
        let session = Session::new("conn-test");
        (dispatcher, session)
    }

    #[tokio::test]
    async fn unauthenticated_call_is_rejected() {
        let (dispatcher, session) = build_dispatcher(true, false).await;
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(1)),
            method: methods::TOOLS_CALL.to_string(),
            params: Some(json!({ "name": "echo", "arguments": {} })),
        };
        let response = dispatcher.handle_request(&session, request).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32033);
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let (dispatcher, session) = build_dispatcher(false, false).await;
        session.authenticate(sample_key());
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(2)),
            method: "nope".to_string(),
            params: None,
        };
        let response = dispatcher.handle_request(&session, request).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn tool_call_times_out_as_tool_domain_error() {
        let (dispatcher, session) = build_dispatcher(false, true).await;
        session.authenticate(sample_key());
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(3)),
            method: methods::TOOLS_CALL.to_string(),
            params: Some(json!({ "name": "slow", "arguments": {} })),
        };
        let response = dispatcher.handle_request(&session, request).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32001);
    }

    #[tokio::test]
    async fn notifications_never_produce_a_response() {
        let (dispatcher, session) = build_dispatcher(false, false).await;
        session.authenticate(sample_key());
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: methods::INITIALIZED.to_string(),
            params: None,
        };
        assert!(dispatcher.handle_request(&session, request).await.is_none());
    }

    fn sample_key() -> vigil_security::apikey::ApiKey {
        vigil_security::apikey::ApiKey {
            key_id: vigil_security::apikey::ApiKeyId::new(),
            key_value: "vgsk_test".to_string(),
            display_name: "test".to_string(),
            created_at: Utc::now(),
            expires_at: None,
            permissions: KeyPermissions::new(),
            rate_limit_per_minute: 600,
            usage: Default::default(),
            revoked: false,
        }
    }
}
