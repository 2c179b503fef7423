//! File-backed `SecretStoreProvider` (spec.md §4.12): the default standalone
//! deployment's key store, persisted as a single JSON array so the `vigil
//! keys` CLI subcommands and a running `serve` process agree on the same
//! keys across restarts. Generalized from [`crate::audit::AuditLog`]'s
//! plain-file persistence; unlike the audit log this rewrites the whole file
//! on every mutation since key count is expected to stay small (tens to low
//! hundreds), not append-only event volume.
//!
//! Every call reloads the file before acting on it rather than trusting the
//! in-process snapshot: `vigil keys revoke` runs as a separate process
//! against the same `key_store_path`, so a live `serve` process only ever
//! observes that revocation if its own `FileSecretStore` rereads the file.
//! This is cheap enough to do unconditionally since [`crate::validation_cache::ApiKeyValidationCache`]
//! already sits in front of `validate()` on the hot path and bounds how
//! often it's actually called to one read per cache TTL, not one per
//! request (spec.md §4.12, Testable Property #6 — revocation timeliness).
//!
//! Not a substitute for a real vault: there is no encryption at rest and no
//! concurrent-writer coordination beyond an in-process lock, matching the
//! scope [`crate::apikey::InMemorySecretStore`] already disclaims — two
//! processes writing at the same instant can still race and one write can
//! clobber the other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::apikey::{
    generate_key_value, ApiKey, ApiKeyId, KeyPermissions, KeyUsageCounters, SecretStoreError, SecretStoreProvider,
};

pub struct FileSecretStore {
    path: PathBuf,
    keys: RwLock<HashMap<ApiKeyId, ApiKey>>,
}

impl FileSecretStore {
    /// Loads `path` if it exists (a JSON array of `ApiKey`), otherwise
    /// starts empty; the file is created on the first mutation.
    pub fn open(path: PathBuf) -> Result<Self, SecretStoreError> {
        let keys = load(&path)?;
        Ok(Self { path, keys: RwLock::new(keys) })
    }

    /// Rereads the backing file into the in-process snapshot, picking up
    /// any write made by another process (e.g. `vigil keys revoke`) since
    /// this store was opened or last reloaded.
    fn reload(&self) -> Result<(), SecretStoreError> {
        let fresh = load(&self.path)?;
        *self.keys.write().unwrap() = fresh;
        Ok(())
    }

    fn persist(&self, keys: &HashMap<ApiKeyId, ApiKey>) -> Result<(), SecretStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SecretStoreError::Unavailable(format!("create dir: {e}")))?;
            }
        }
        let snapshot: Vec<&ApiKey> = keys.values().collect();
        let body = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| SecretStoreError::Unavailable(format!("serialize: {e}")))?;
        std::fs::write(&self.path, body).map_err(|e| SecretStoreError::Unavailable(format!("write: {e}")))
    }
}

fn load(path: &PathBuf) -> Result<HashMap<ApiKeyId, ApiKey>, SecretStoreError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let parsed: Vec<ApiKey> = serde_json::from_str(&raw)
                .map_err(|e| SecretStoreError::Unavailable(format!("parse {}: {e}", path.display())))?;
            Ok(parsed.into_iter().map(|k| (k.key_id, k)).collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(SecretStoreError::Unavailable(format!("read {}: {e}", path.display()))),
    }
}

#[async_trait]
impl SecretStoreProvider for FileSecretStore {
    async fn create(
        &self,
        display_name: String,
        permissions: KeyPermissions,
        expires_in: Option<chrono::Duration>,
        rate_limit_per_minute: u32,
    ) -> Result<ApiKey, SecretStoreError> {
        self.reload()?;
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
        let mut keys = self.keys.write().unwrap();
        keys.insert(key.key_id, key.clone());
        self.persist(&keys)?;
        Ok(key)
    }

    async fn retrieve(&self, key_id: ApiKeyId) -> Result<Option<ApiKey>, SecretStoreError> {
        self.reload()?;
        Ok(self.keys.read().unwrap().get(&key_id).cloned())
    }

    async fn list(&self) -> Result<Vec<ApiKey>, SecretStoreError> {
        self.reload()?;
        Ok(self.keys.read().unwrap().values().cloned().collect())
    }

    async fn delete(&self, key_id: ApiKeyId) -> Result<(), SecretStoreError> {
        self.reload()?;
        let mut keys = self.keys.write().unwrap();
        match keys.get_mut(&key_id) {
            Some(key) => {
                key.revoked = true;
                self.persist(&keys)
            }
            None => Err(SecretStoreError::NotFound),
        }
    }

    async fn validate(&self, key_value: &str) -> Result<Option<ApiKey>, SecretStoreError> {
        self.reload()?;
        let keys = self.keys.read().unwrap();
        Ok(keys.values().find(|k| k.key_value == key_value && k.is_valid_at(Utc::now())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_through_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");

        let created = {
            let store = FileSecretStore::open(path.clone()).unwrap();
            store.create("soc-analyst".into(), KeyPermissions::new(), None, 600).await.unwrap()
        };

        let reopened = FileSecretStore::open(path.clone()).unwrap();
        let fetched = reopened.retrieve(created.key_id).await.unwrap().unwrap();
        assert_eq!(fetched.key_value, created.key_value);
        assert!(reopened.validate(&created.key_value).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_revokes_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        let store = FileSecretStore::open(path.clone()).unwrap();
        let key = store.create("svc".into(), KeyPermissions::new(), None, 60).await.unwrap();

        store.delete(key.key_id).await.unwrap();
        assert!(store.validate(&key.key_value).await.unwrap().is_none());

        let reopened = FileSecretStore::open(path).unwrap();
        let fetched = reopened.retrieve(key.key_id).await.unwrap().unwrap();
        assert!(fetched.revoked);
    }

    #[tokio::test]
    async fn a_revoke_from_a_second_instance_is_observed_without_reopening() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");

        // Simulates a long-running `serve` process (`server`) and a
        // separate `vigil keys revoke` invocation (`cli`) against the same
        // file.
        let server = FileSecretStore::open(path.clone()).unwrap();
        let key = server.create("soc-analyst".into(), KeyPermissions::new(), None, 600).await.unwrap();
        assert!(server.validate(&key.key_value).await.unwrap().is_some());

        let cli = FileSecretStore::open(path).unwrap();
        cli.delete(key.key_id).await.unwrap();

        assert!(server.validate(&key.key_value).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let store = FileSecretStore::open(path).unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
