//! API-Key Store & Auth (spec.md §4.12, data model §3 `APIKey`).
//!
//! Keys live in an external secret store, reached through the
//! [`SecretStoreProvider`] trait — the real vault adapter is an out-of-scope
//! collaborator; [`InMemorySecretStore`] stands in for it in tests and the
//! default standalone deployment, the way the teacher treats its Control
//! API as a narrow client trait with a direct-DB fallback.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

const KEY_LABEL_PREFIX: &str = "vgsk_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(pub Uuid);

impl ApiKeyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ApiKeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type KeyPermissions = HashMap<String, bool>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyUsageCounters {
    pub total_requests: u64,
    pub total_rejections: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: ApiKeyId,
    /// Opaque, high-entropy key material; never logged or echoed back
    /// after creation.
    pub key_value: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: KeyPermissions,
    pub rate_limit_per_minute: u32,
    pub usage: KeyUsageCounters,
    pub revoked: bool,
}

impl ApiKey {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.get(permission).copied().unwrap_or(false)
    }
}

/// Generate 256 bits of random material, URL-safe base64 encoded, prefixed
/// with a fixed label for identification (spec.md §4.12).
pub fn generate_key_value() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{KEY_LABEL_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("key not found")]
    NotFound,
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Narrow interface onto the external secret store. The real vault-backed
/// adapter is out of scope for this core; this trait is the seam.
#[async_trait]
pub trait SecretStoreProvider: Send + Sync {
    async fn create(
        &self,
        display_name: String,
        permissions: KeyPermissions,
        expires_in: Option<chrono::Duration>,
        rate_limit_per_minute: u32,
    ) -> Result<ApiKey, SecretStoreError>;

    async fn retrieve(&self, key_id: ApiKeyId) -> Result<Option<ApiKey>, SecretStoreError>;

    async fn list(&self) -> Result<Vec<ApiKey>, SecretStoreError>;

    async fn delete(&self, key_id: ApiKeyId) -> Result<(), SecretStoreError>;

    /// Look up a key by its presented value. Returns `None` for keys that
    /// don't exist, are revoked, or are expired (callers don't need to
    /// re-check `is_valid_at` themselves, but may for richer diagnostics).
    async fn validate(&self, key_value: &str) -> Result<Option<ApiKey>, SecretStoreError>;
}

/// In-memory/default-standalone secret store. Good enough for tests and for
/// deployments with no external vault configured; never the production
/// backing store for a multi-tenant deployment.
#[derive(Default)]
pub struct InMemorySecretStore {
    keys: RwLock<HashMap<ApiKeyId, ApiKey>>,
    by_value: RwLock<HashMap<String, ApiKeyId>>,
    sequence: AtomicU64,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStoreProvider for InMemorySecretStore {
    async fn create(
        &self,
        display_name: String,
        permissions: KeyPermissions,
        expires_in: Option<chrono::Duration>,
        rate_limit_per_minute: u32,
    ) -> Result<ApiKey, SecretStoreError> {
        self.sequence.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let key = ApiKey {
            key_id: ApiKeyId::new(),
            key_value: generate_key_value(),
            display_name,
            created_at: now,
            expires_at: expires_in.map(|d| now + d),
            permissions,
            rate_limit_per_minute,
            usage: KeyUsageCounters::default(),
            revoked: false,
        };
        self.by_value
            .write()
            .unwrap()
            .insert(key.key_value.clone(), key.key_id);
        self.keys.write().unwrap().insert(key.key_id, key.clone());
        Ok(key)
    }

    async fn retrieve(&self, key_id: ApiKeyId) -> Result<Option<ApiKey>, SecretStoreError> {
        Ok(self.keys.read().unwrap().get(&key_id).cloned())
    }

    async fn list(&self) -> Result<Vec<ApiKey>, SecretStoreError> {
        Ok(self.keys.read().unwrap().values().cloned().collect())
    }

    async fn delete(&self, key_id: ApiKeyId) -> Result<(), SecretStoreError> {
        let mut keys = self.keys.write().unwrap();
        if let Some(key) = keys.get_mut(&key_id) {
            key.revoked = true;
            self.by_value.write().unwrap().remove(&key.key_value);
            Ok(())
        } else {
            Err(SecretStoreError::NotFound)
        }
    }

    async fn validate(&self, key_value: &str) -> Result<Option<ApiKey>, SecretStoreError> {
        let key_id = match self.by_value.read().unwrap().get(key_value).copied() {
            Some(id) => id,
            None => return Ok(None),
        };
        let keys = self.keys.read().unwrap();
        match keys.get(&key_id) {
            Some(key) if key.is_valid_at(Utc::now()) => Ok(Some(key.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_validate_succeeds() {
        let store = InMemorySecretStore::new();
        let key = store
            .create("ci-runner".into(), KeyPermissions::new(), None, 600)
            .await
            .unwrap();

        let validated = store.validate(&key.key_value).await.unwrap();
        assert!(validated.is_some());
        assert_eq!(validated.unwrap().key_id, key.key_id);
    }

    #[tokio::test]
    async fn delete_revokes_and_invalidates_immediately() {
        let store = InMemorySecretStore::new();
        let key = store
            .create("soc-analyst".into(), KeyPermissions::new(), None, 600)
            .await
            .unwrap();

        store.delete(key.key_id).await.unwrap();
        assert!(store.validate(&key.key_value).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_key_fails_validation() {
        let store = InMemorySecretStore::new();
        let key = store
            .create(
                "short-lived".into(),
                KeyPermissions::new(),
                Some(chrono::Duration::milliseconds(1)),
                600,
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(store.validate(&key.key_value).await.unwrap().is_none());
    }

    #[test]
    fn generated_key_has_expected_prefix() {
        let value = generate_key_value();
        assert!(value.starts_with(KEY_LABEL_PREFIX));
    }
}
