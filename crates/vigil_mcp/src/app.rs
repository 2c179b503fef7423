//! Composition root (spec.md §6, C1): wires every dependency client,
//! cache, orchestrator, and registry from a `VigilConfig` into one
//! `Dispatcher`, the way the teacher's `main.rs` builds its tool registry
//! and transport before handing off to `McpServer::run`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use vigil_cache::DualTierCache;
use vigil_correlate::CorrelatorConfig;
use vigil_intel::{HttpThreatIntelSource, OrchestratorConfig, ThreatIntelOrchestrator, ThreatIntelSource};
use vigil_resilience::{BreakerState, CircuitBreaker, CircuitBreakerConfig, RateLimiterFamily, RateLimiterFamilyConfig};
use vigil_security::apikey::InMemorySecretStore;
use vigil_security::{
    ApiKeyValidationCache, AuditLog, FileSecretStore, SchemaValidator, SecretStoreError, SecretStoreProvider,
    SecurityError,
};
use vigil_siem::{IndexPatternRegistry, SiemClient, SiemError};

use crate::config::{resolve_field, ConfigError, EnvSecretProvider, VigilConfig};
use crate::dispatcher::Dispatcher;
use crate::health::{FeatureManager, FeatureRequirement, HealthProbe};
use crate::registry::{ToolHandler, ToolRegistry};
use crate::session::SessionRegistry;
use crate::tools::{
    AnalyzeCampaignTool, DataDictionaryTool, EnrichIndicatorTool, HealthStatusTool, QueryEventsTool,
    StreamEventsTool, StreamSessionTool,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to reach SIEM store: {0}")]
    Siem(#[from] SiemError),
    #[error("failed to open enrichment cache: {0}")]
    Cache(String),
    #[error("failed to open audit log: {0}")]
    Audit(SecurityError),
    #[error("failed to open key store: {0}")]
    KeyStore(SecretStoreError),
    #[error("failed to register schema for tool '{tool}': {reason}")]
    Schema { tool: &'static str, reason: String },
}

/// Everything the binary crate needs to run a transport against.
pub struct App {
    pub dispatcher: Arc<Dispatcher>,
    pub features: Arc<FeatureManager>,
    pub cache: Arc<DualTierCache>,
}

/// Builds the full dependency graph from `config`. Outbound connections
/// (SIEM store, cache directory) are only ever opened here, never probed
/// eagerly beyond what `features.probe_once()` already does at the end.
pub async fn build(config: &VigilConfig) -> Result<App, StartupError> {
    let secrets = EnvSecretProvider;

    let siem_credentials = match (&config.siem_store.username, &config.siem_store.password) {
        (Some(username), Some(password)) => {
            Some((resolve_field(username, &secrets)?, resolve_field(password, &secrets)?))
        }
        _ => None,
    };
    let client = Arc::new(SiemClient::with_credentials(&config.siem_store.url, siem_credentials)?);
    let indices = Arc::new(IndexPatternRegistry::new(client.clone()));

    let cache_dir = PathBuf::from(&config.threat_intel.cache.disk_dir);
    let cache = Arc::new(
        DualTierCache::open(
            &cache_dir,
            config.threat_intel.cache.shard_count,
            config.threat_intel.cache.max_memory_entries,
            Duration::from_secs(config.threat_intel.cache.memory_ttl_secs),
        )
        .map_err(|e| StartupError::Cache(e.to_string()))?,
    );
    cache.spawn_sweeper(Duration::from_secs(60));

    let mut sources: Vec<Arc<dyn ThreatIntelSource>> = Vec::new();
    for source_config in &config.threat_intel.sources {
        let api_key = match &source_config.api_key {
            Some(raw) => Some(resolve_field(raw, &secrets)?),
            None => None,
        };
        sources.push(Arc::new(HttpThreatIntelSource::new(
            source_config.name.clone(),
            source_config.base_url.clone(),
            api_key,
            source_config.reliability_weight,
            source_config.max_concurrent_requests as usize,
            source_config.requests_per_minute,
        )));
    }

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.circuit_breakers.failure_threshold,
        cool_down: Duration::from_secs(config.circuit_breakers.cool_down_secs),
    };

    let writeback = config.threat_intel.writeback.enabled.then(|| client.clone());
    let orchestrator = Arc::new(ThreatIntelOrchestrator::new(
        sources,
        cache.clone(),
        OrchestratorConfig { per_source_timeout: Duration::from_secs(30), writeback, breaker: breaker_config },
    ));

    let rate_limiter = Arc::new(RateLimiterFamily::new(RateLimiterFamilyConfig {
        global_requests_per_minute: config.rate_limits.global_requests_per_minute,
        global_burst: config.rate_limits.global_burst,
        per_connection_requests_per_minute: config.rate_limits.per_connection_requests_per_minute,
        per_connection_burst: config.rate_limits.per_connection_burst,
    }));

    let siem_breaker = Arc::new(CircuitBreaker::new("siem_store", breaker_config));

    let features = Arc::new(FeatureManager::new());
    features.register_dependency("siem_store", Arc::new(SiemHealthProbe { client: client.clone() }));
    let source_names: Vec<String> = config.threat_intel.sources.iter().map(|s| s.name.clone()).collect();
    for name in &source_names {
        features.register_dependency(
            name.clone(),
            Arc::new(IntelSourceHealthProbe { orchestrator: orchestrator.clone(), source: name.clone() }),
        );
    }

    let mut schema = SchemaValidator::new();
    let mut tools = ToolRegistry::new();

    register_tool(
        &mut tools,
        &mut schema,
        &features,
        Arc::new(QueryEventsTool::new(client.clone(), indices.clone(), siem_breaker.clone())),
        FeatureRequirement::requires("siem_store"),
    )?;
    register_tool(
        &mut tools,
        &mut schema,
        &features,
        Arc::new(StreamEventsTool::new(client.clone(), indices.clone(), siem_breaker.clone())),
        FeatureRequirement::requires("siem_store"),
    )?;
    register_tool(
        &mut tools,
        &mut schema,
        &features,
        Arc::new(StreamSessionTool::new(client.clone(), indices.clone(), siem_breaker.clone())),
        FeatureRequirement::requires("siem_store"),
    )?;
    register_tool(
        &mut tools,
        &mut schema,
        &features,
        Arc::new(AnalyzeCampaignTool::new(
            client.clone(),
            indices.clone(),
            CorrelatorConfig::default(),
            siem_breaker.clone(),
        )),
        FeatureRequirement::requires("siem_store"),
    )?;
    register_tool(
        &mut tools,
        &mut schema,
        &features,
        Arc::new(EnrichIndicatorTool::new(orchestrator.clone())),
        FeatureRequirement::requires_any(source_names),
    )?;
    register_tool(
        &mut tools,
        &mut schema,
        &features,
        Arc::new(DataDictionaryTool::new(client.clone(), siem_breaker.clone())),
        FeatureRequirement::none(),
    )?;
    register_tool(
        &mut tools,
        &mut schema,
        &features,
        Arc::new(HealthStatusTool::new(features.clone())),
        FeatureRequirement::none(),
    )?;

    // Startup probe runs before `list_tools`/`call_tool` can ever be
    // reached, so the first caller doesn't see every dependency reported
    // unhealthy for one full probe interval.
    features.probe_once().await;
    if config.strict_startup {
        if let Some((name, _)) = features.all_states().into_iter().find(|(_, state)| !state.healthy) {
            return Err(StartupError::Siem(SiemError::Transport(format!(
                "strict_startup is set and dependency '{name}' failed its initial health probe"
            ))));
        }
    }
    features.spawn_prober(config.features.health_probe_interval());

    let sessions = Arc::new(SessionRegistry::new());
    let store: Arc<dyn SecretStoreProvider> = match &config.api_keys.key_store_path {
        Some(path) => {
            Arc::new(FileSecretStore::open(PathBuf::from(path)).map_err(StartupError::KeyStore)?)
        }
        None => Arc::new(InMemorySecretStore::new()),
    };
    let key_cache = Arc::new(ApiKeyValidationCache::new(store, config.api_keys.validation_cache_ttl()));

    let audit = match &config.api_keys.audit_log_path {
        Some(path) => Some(Arc::new(AuditLog::new(PathBuf::from(path)).map_err(StartupError::Audit)?)),
        None => None,
    };

    let dispatcher =
        Arc::new(Dispatcher::new(tools, features.clone(), rate_limiter, schema, sessions, key_cache, audit));

    Ok(App { dispatcher, features, cache })
}

fn register_tool(
    tools: &mut ToolRegistry,
    schema: &mut SchemaValidator,
    features: &FeatureManager,
    tool: Arc<dyn ToolHandler>,
    requirement: FeatureRequirement,
) -> Result<(), StartupError> {
    schema
        .register(tool.name(), &tool.input_schema())
        .map_err(|e| StartupError::Schema { tool: tool.name(), reason: e.to_string() })?;
    features.register_tool(tool.name(), requirement);
    tools.register(tool);
    Ok(())
}

struct SiemHealthProbe {
    client: Arc<SiemClient>,
}

#[async_trait]
impl HealthProbe for SiemHealthProbe {
    async fn probe(&self) -> Result<(), String> {
        self.client.list_indices("*").await.map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Rather than spend one of a source's rate-limited requests on a
/// dedicated health check, this reads the breaker `ThreatIntelOrchestrator`
/// already maintains per source: open means the source has been failing
/// outbound calls, which is exactly what `enrich_indicator`'s `requires_any`
/// needs to know to decide whether the tool is still worth listing.
struct IntelSourceHealthProbe {
    orchestrator: Arc<ThreatIntelOrchestrator>,
    source: String,
}

#[async_trait]
impl HealthProbe for IntelSourceHealthProbe {
    async fn probe(&self) -> Result<(), String> {
        let state = self
            .orchestrator
            .source_breaker_states()
            .into_iter()
            .find(|(name, _)| name == &self.source)
            .map(|(_, state)| state);
        match state {
            Some(BreakerState::Open) => Err(format!("circuit open for threat-intel source '{}'", self.source)),
            _ => Ok(()),
        }
    }
}
