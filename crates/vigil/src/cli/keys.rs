//! `vigil keys` (spec.md §4.12, SPEC_FULL.md C16): create/list/revoke API
//! keys directly against the configured key store, without standing up the
//! rest of the dependency graph — these commands only ever need
//! `SecretStoreProvider`, never the SIEM/threat-intel clients `serve` and
//! `healthcheck` build.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use thiserror::Error;

use vigil_mcp::config::{load_config, ConfigError};
use vigil_security::apikey::{ApiKeyId, InMemorySecretStore, KeyPermissions};
use vigil_security::{FileSecretStore, SecretStoreError, SecretStoreProvider};

#[derive(Subcommand, Debug)]
pub enum KeysAction {
    /// Create a new API key and print its value once. The value is never
    /// retrievable again after this call.
    Create {
        /// Human-readable label for the key (who/what it's issued to).
        #[arg(long)]
        display_name: String,

        /// Permission to grant, e.g. `query_events`. Repeatable.
        #[arg(long = "permission")]
        permissions: Vec<String>,

        /// Key lifetime in days. Omit for a non-expiring key.
        #[arg(long)]
        expires_days: Option<i64>,

        /// Per-key rate limit, requests per minute.
        #[arg(long, default_value_t = 600)]
        rate_limit_per_minute: u32,

        #[arg(long)]
        json: bool,
    },

    /// List every key in the store (key values are never shown again).
    List {
        #[arg(long)]
        json: bool,
    },

    /// Revoke a key by id. Revocation is immediate and irreversible.
    Revoke {
        key_id: String,
    },
}

#[derive(Debug, Error)]
pub enum KeysError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("key store error: {0}")]
    Store(#[from] SecretStoreError),
    #[error("invalid key id '{0}'")]
    InvalidKeyId(String),
}

pub async fn run(config_path: Option<&Path>, action: KeysAction) -> Result<(), KeysError> {
    let config = load_config(config_path)?;
    let store = open_store(&config.api_keys.key_store_path)?;

    match action {
        KeysAction::Create { display_name, permissions, expires_days, rate_limit_per_minute, json } => {
            let mut perms = KeyPermissions::new();
            for p in permissions {
                perms.insert(p, true);
            }
            let expires_in = expires_days.map(chrono::Duration::days);
            let key = store.create(display_name, perms, expires_in, rate_limit_per_minute).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&key).expect("ApiKey always serializes"));
            } else {
                println!("key_id:     {}", key.key_id);
                println!("key_value:  {}  (shown once, store it now)", key.key_value);
                println!("expires_at: {}", key.expires_at.map(|e| e.to_rfc3339()).unwrap_or_else(|| "never".into()));
            }
        }
        KeysAction::List { json } => {
            let mut keys = store.list().await?;
            keys.sort_by_key(|k| k.created_at);
            if json {
                let redacted: Vec<_> = keys.iter().map(redact).collect();
                println!("{}", serde_json::to_string_pretty(&redacted).expect("redacted keys always serialize"));
            } else {
                for key in &keys {
                    println!(
                        "{}  {}  revoked={}  created={}",
                        key.key_id,
                        key.display_name,
                        key.revoked,
                        key.created_at.to_rfc3339()
                    );
                }
            }
        }
        KeysAction::Revoke { key_id } => {
            let id = parse_key_id(&key_id)?;
            store.delete(id).await?;
            println!("revoked {key_id}");
        }
    }

    Ok(())
}

fn open_store(path: &Option<String>) -> Result<Box<dyn SecretStoreProvider>, KeysError> {
    match path {
        Some(p) => Ok(Box::new(FileSecretStore::open(PathBuf::from(p))?)),
        None => Ok(Box::new(InMemorySecretStore::new())),
    }
}

fn parse_key_id(raw: &str) -> Result<ApiKeyId, KeysError> {
    raw.parse::<uuid::Uuid>().map(ApiKeyId).map_err(|_| KeysError::InvalidKeyId(raw.to_string()))
}

/// Strips `key_value` before printing a key list: the value is
/// credential-equivalent and `list` is a read path, not a recovery path.
fn redact(key: &vigil_security::ApiKey) -> serde_json::Value {
    serde_json::json!({
        "key_id": key.key_id.to_string(),
        "display_name": key.display_name,
        "created_at": key.created_at,
        "expires_at": key.expires_at,
        "permissions": key.permissions,
        "rate_limit_per_minute": key.rate_limit_per_minute,
        "revoked": key.revoked,
    })
}
