//! Typed configuration tree and secret resolution (spec.md §6, SPEC_FULL.md
//! C1). Loaded from an optional TOML or JSON file, then overridden by a
//! small set of environment variables. Unknown keys warn, never fail —
//! `VigilConfig` deliberately does not derive `deny_unknown_fields`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: anyhow::Error },
    #[error("secret reference {reference} could not be resolved: {reason}")]
    Secret { reference: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub siem_store: SiemStoreConfig,
    pub threat_intel: ThreatIntelConfig,
    pub rate_limits: RateLimitsConfig,
    pub circuit_breakers: CircuitBreakersConfig,
    pub transport: TransportConfig,
    pub api_keys: ApiKeysConfig,
    pub features: FeaturesConfig,
    /// Fail startup (exit 69) rather than degrade if a mandatory dependency
    /// is unreachable at boot (spec.md §6 exit codes).
    pub strict_startup: bool,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            siem_store: SiemStoreConfig::default(),
            threat_intel: ThreatIntelConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            circuit_breakers: CircuitBreakersConfig::default(),
            transport: TransportConfig::default(),
            api_keys: ApiKeysConfig::default(),
            features: FeaturesConfig::default(),
            strict_startup: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiemStoreConfig {
    pub url: String,
    pub username: Option<String>,
    /// May be a literal value or a `secret://vault/item/field` reference.
    pub password: Option<String>,
}

impl Default for SiemStoreConfig {
    fn default() -> Self {
        Self { url: "https://localhost:9200".to_string(), username: None, password: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatIntelConfig {
    pub sources: Vec<ThreatIntelSourceConfig>,
    pub cache: CacheConfig,
    pub writeback: WritebackConfig,
}

impl Default for ThreatIntelConfig {
    fn default() -> Self {
        Self { sources: Vec::new(), cache: CacheConfig::default(), writeback: WritebackConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIntelSourceConfig {
    pub name: String,
    pub base_url: String,
    /// May be a literal value or a `secret://vault/item/field` reference.
    pub api_key: Option<String>,
    pub reliability_weight: f64,
    pub requests_per_minute: u32,
    pub max_concurrent_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub disk_dir: String,
    pub shard_count: usize,
    pub max_memory_entries: u64,
    pub memory_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disk_dir: "./vigil-cache".to_string(),
            shard_count: 16,
            max_memory_entries: 10_000,
            memory_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WritebackConfig {
    pub enabled: bool,
    pub index_prefix: String,
}

impl Default for WritebackConfig {
    fn default() -> Self {
        Self { enabled: false, index_prefix: "enrichment-intel".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub global_requests_per_minute: u32,
    pub global_burst: u32,
    pub per_connection_requests_per_minute: u32,
    pub per_connection_burst: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            global_requests_per_minute: 6000,
            global_burst: 200,
            per_connection_requests_per_minute: 600,
            per_connection_burst: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakersConfig {
    pub failure_threshold: u32,
    pub cool_down_secs: u64,
}

impl Default for CircuitBreakersConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cool_down_secs: 30 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Stdio,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub tcp_bind: String,
    pub tcp_port: u16,
    pub max_connections: usize,
    pub idle_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stdio,
            tcp_bind: "127.0.0.1".to_string(),
            tcp_port: 3000,
            max_connections: 256,
            idle_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeysConfig {
    pub validation_cache_ttl_secs: u64,
    pub audit_log_path: Option<String>,
    /// Where the default standalone key store persists `ApiKey` records as a
    /// JSON array, shared by `serve` and the `vigil keys` CLI subcommands.
    /// `None` falls back to a purely in-memory store that forgets every key
    /// on process exit (fine for tests, not for a real deployment).
    pub key_store_path: Option<String>,
}

impl Default for ApiKeysConfig {
    fn default() -> Self {
        Self {
            validation_cache_ttl_secs: 60,
            audit_log_path: Some("./vigil-audit.ndjson".to_string()),
            key_store_path: Some("./vigil-keys.json".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub health_probe_interval_secs: u64,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self { health_probe_interval_secs: 30 }
    }
}

impl ApiKeysConfig {
    pub fn validation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.validation_cache_ttl_secs)
    }
}

impl FeaturesConfig {
    pub fn health_probe_interval(&self) -> Duration {
        Duration::from_secs(self.health_probe_interval_secs)
    }
}

impl TransportConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Loads `path` (TOML or JSON, inferred by extension; defaults to TOML) if
/// given, falling back to defaults, then applies the environment-variable
/// overrides named in spec.md §6.
pub fn load_config(path: Option<&Path>) -> Result<VigilConfig, ConfigError> {
    let mut config = match path {
        Some(p) => read_config_file(p)?,
        None => VigilConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<VigilConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e.into() })
    } else {
        toml::from_str(&raw).map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e.into() })
    }
}

fn apply_env_overrides(config: &mut VigilConfig) {
    if let Ok(v) = std::env::var("SIEM_STORE_URL") {
        config.siem_store.url = v;
    }
    if let Ok(v) = std::env::var("SIEM_STORE_USERNAME") {
        config.siem_store.username = Some(v);
    }
    if let Ok(v) = std::env::var("SIEM_STORE_PASSWORD") {
        config.siem_store.password = Some(v);
    }
    if let Ok(v) = std::env::var("TRANSPORT_MODE") {
        config.transport.mode = match v.to_ascii_lowercase().as_str() {
            "tcp" => TransportMode::Tcp,
            _ => TransportMode::Stdio,
        };
    }
    if let Ok(v) = std::env::var("TCP_BIND") {
        config.transport.tcp_bind = v;
    }
    if let Ok(v) = std::env::var("TCP_PORT") {
        if let Ok(port) = v.parse() {
            config.transport.tcp_port = port;
        } else {
            tracing::warn!(value = %v, "ignoring unparsable TCP_PORT override");
        }
    }
}

/// A parsed `secret://vault/item/field` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub vault: String,
    pub item: String,
    pub field: String,
}

impl SecretRef {
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix("secret://")?;
        let mut parts = rest.splitn(3, '/');
        let vault = parts.next()?.to_string();
        let item = parts.next()?.to_string();
        let field = parts.next()?.to_string();
        if vault.is_empty() || item.is_empty() || field.is_empty() {
            return None;
        }
        Some(Self { vault, item, field })
    }
}

/// Resolves `secret://...` references lazily, at first use rather than at
/// config load time, so a transiently-unavailable secret backend doesn't
/// fail startup for fields nothing has read yet.
pub trait SecretProvider: Send + Sync {
    fn resolve(&self, reference: &SecretRef) -> Result<String, ConfigError>;
}

/// Resolves secrets from environment variables named
/// `{VAULT}_{ITEM}_{FIELD}` (uppercased). Stand-in for a real vault
/// integration; adequate for local development and tests.
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn resolve(&self, reference: &SecretRef) -> Result<String, ConfigError> {
        let var_name =
            format!("{}_{}_{}", reference.vault, reference.item, reference.field).to_ascii_uppercase();
        std::env::var(&var_name).map_err(|_| ConfigError::Secret {
            reference: format!("secret://{}/{}/{}", reference.vault, reference.item, reference.field),
            reason: format!("environment variable {var_name} not set"),
        })
    }
}

/// Resolves `value` through `provider` if it looks like a secret reference,
/// otherwise returns it unchanged (a literal value, used directly in dev
/// configs and tests).
pub fn resolve_field(value: &str, provider: &dyn SecretProvider) -> Result<String, ConfigError> {
    match SecretRef::parse(value) {
        Some(reference) => provider.resolve(&reference),
        None => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_secret_reference() {
        let reference = SecretRef::parse("secret://vault/siem/password").unwrap();
        assert_eq!(reference.vault, "vault");
        assert_eq!(reference.item, "siem");
        assert_eq!(reference.field, "password");
    }

    #[test]
    fn non_secret_values_pass_through() {
        assert!(SecretRef::parse("plain-value").is_none());
    }

    #[test]
    fn env_provider_resolves_uppercased_var() {
        std::env::set_var("VAULT_SIEM_PASSWORD", "hunter2");
        let provider = EnvSecretProvider;
        let reference = SecretRef::parse("secret://vault/siem/password").unwrap();
        assert_eq!(provider.resolve(&reference).unwrap(), "hunter2");
        std::env::remove_var("VAULT_SIEM_PASSWORD");
    }

    #[test]
    fn default_config_has_stdio_transport() {
        let config = VigilConfig::default();
        assert_eq!(config.transport.mode, TransportMode::Stdio);
        assert_eq!(config.rate_limits.global_requests_per_minute, 6000);
    }
}
