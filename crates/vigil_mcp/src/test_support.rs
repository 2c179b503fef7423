//! Shared test fixtures for `vigil_mcp`'s own unit tests and for
//! `tests/scenarios.rs`. Not compiled into the production binary.
//!
//! `SiemClient` is a concrete struct wrapping a real `elasticsearch`
//! transport, not a trait — there is no in-process fake for it anywhere in
//! this crate, and no HTTP-mocking crate in the dependency table to build
//! one (DESIGN.md notes this choice explicitly). Scenarios that need a live
//! store's query/session/correlation behavior (spec.md §8 S1-S3) are
//! covered at the crate that owns the pure logic instead
//! (`vigil_query::optimizer`, `vigil_query::session_stream`,
//! `vigil_correlate::pipeline`), against synthetic `Event`/`Campaign`
//! values with no network involved. What this module supports is
//! everything else S4-S6 need: auth, revocation, rate limiting, feature
//! gating, and circuit breaking, none of which touch a SIEM store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use vigil_resilience::{RateLimiterFamily, RateLimiterFamilyConfig};
use vigil_security::apikey::{ApiKey, ApiKeyId, InMemorySecretStore, KeyPermissions};
use vigil_security::{ApiKeyValidationCache, SchemaValidator, SecretStoreProvider};

use crate::dispatcher::Dispatcher;
use crate::health::FeatureManager;
use crate::registry::{ToolContext, ToolHandler, ToolRegistry};
use crate::session::SessionRegistry;
use vigil_protocol::error::VigilError;

/// An `ApiKey` with `permissions` granted, a live TTL, and a fixed rate
/// limit generous enough not to interfere with tests that aren't
/// specifically exercising the limiter.
pub fn sample_api_key(permissions: &[&str]) -> ApiKey {
    let mut map: KeyPermissions = KeyPermissions::new();
    for p in permissions {
        map.insert((*p).to_string(), true);
    }
    ApiKey {
        key_id: ApiKeyId::new(),
        key_value: vigil_security::apikey::generate_key_value(),
        display_name: "test-fixture".to_string(),
        created_at: chrono::Utc::now(),
        expires_at: None,
        permissions: map,
        rate_limit_per_minute: 6000,
        usage: Default::default(),
        revoked: false,
    }
}

/// A `ToolHandler` that returns `args` unchanged, no feature dependency and
/// no permission requirement, for tests only interested in dispatcher
/// plumbing (auth, rate limiting, schema, cancellation) rather than any
/// particular tool's own logic.
pub struct EchoTool {
    name: &'static str,
}

impl EchoTool {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "test fixture: echoes its input back"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, VigilError> {
        Ok(args)
    }
}

/// The moving parts a scenario test needs direct handles to, beyond the
/// `Dispatcher` itself: the backing secret store (to create/revoke keys)
/// and the session registry (to authenticate a connection and trip
/// revocation).
pub struct DispatcherFixture {
    pub dispatcher: Dispatcher,
    pub sessions: Arc<SessionRegistry>,
    pub secret_store: Arc<InMemorySecretStore>,
    pub key_cache: Arc<ApiKeyValidationCache>,
    pub features: Arc<FeatureManager>,
}

/// Builds a `Dispatcher` with `tools` registered (each tool's
/// `input_schema()` registered into the validator too) and a generous
/// default rate limiter, backed by a fresh in-memory secret store.
pub fn build_dispatcher_fixture(tools: Vec<Arc<dyn ToolHandler>>) -> DispatcherFixture {
    let mut registry = ToolRegistry::new();
    let mut schema = SchemaValidator::new();
    let features = Arc::new(FeatureManager::new());
    for tool in tools {
        schema.register(tool.name(), &tool.input_schema()).expect("fixture schema must be valid");
        features.register_tool(tool.name(), tool.feature_requirement());
        registry.register(tool);
    }

    let rate_limiter = Arc::new(RateLimiterFamily::new(RateLimiterFamilyConfig::default()));
    let sessions = Arc::new(SessionRegistry::new());
    let secret_store = Arc::new(InMemorySecretStore::new());
    let key_cache = Arc::new(ApiKeyValidationCache::new(secret_store.clone(), Duration::from_secs(60)));

    let dispatcher = Dispatcher::new(
        registry,
        features.clone(),
        rate_limiter,
        schema,
        sessions.clone(),
        key_cache.clone(),
        None,
    );

    DispatcherFixture { dispatcher, sessions, secret_store, key_cache, features }
}

/// A `SecretStoreProvider` wrapper so `build_dispatcher_fixture`'s store can
/// also be reached as the trait object some call sites expect.
pub fn as_provider(store: Arc<InMemorySecretStore>) -> Arc<dyn SecretStoreProvider> {
    store
}
