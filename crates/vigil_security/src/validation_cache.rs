//! Short-TTL cache of API-key validation results (spec.md §4.12) so most
//! requests don't round-trip to the secret store. Deletion invalidates the
//! cache immediately, which is what makes revocation timely (testable
//! property 6).

use crate::apikey::{ApiKey, ApiKeyId, SecretStoreError, SecretStoreProvider};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

pub struct ApiKeyValidationCache {
    store: Arc<dyn SecretStoreProvider>,
    cache: Cache<String, ApiKey>,
}

impl ApiKeyValidationCache {
    pub fn new(store: Arc<dyn SecretStoreProvider>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Cache::builder().time_to_live(ttl).max_capacity(100_000).build(),
        }
    }

    pub async fn validate(&self, key_value: &str) -> Result<Option<ApiKey>, SecretStoreError> {
        if let Some(key) = self.cache.get(key_value).await {
            return Ok(Some(key));
        }

        match self.store.validate(key_value).await? {
            Some(key) => {
                self.cache.insert(key_value.to_string(), key.clone()).await;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Invalidate a cached key immediately, by its value. Used when an
    /// admin deletes the key so the cache doesn't keep admitting it for up
    /// to `ttl` more seconds.
    pub async fn invalidate_value(&self, key_value: &str) {
        self.cache.invalidate(key_value).await;
    }

    /// Delete (revoke) a key at the backing store and invalidate the cache
    /// entry, if any, in one step.
    pub async fn revoke(&self, key_id: ApiKeyId, key_value: &str) -> Result<(), SecretStoreError> {
        self.store.delete(key_id).await?;
        self.invalidate_value(key_value).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apikey::{InMemorySecretStore, KeyPermissions};

    #[tokio::test]
    async fn caches_successful_validation() {
        let store = Arc::new(InMemorySecretStore::new());
        let key = store
            .create("analyst".into(), KeyPermissions::new(), None, 600)
            .await
            .unwrap();
        let cache = ApiKeyValidationCache::new(store, Duration::from_secs(60));

        assert!(cache.validate(&key.key_value).await.unwrap().is_some());
        assert!(cache.validate(&key.key_value).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn revoke_invalidates_cache_immediately() {
        let store = Arc::new(InMemorySecretStore::new());
        let key = store
            .create("analyst".into(), KeyPermissions::new(), None, 600)
            .await
            .unwrap();
        let cache = ApiKeyValidationCache::new(store, Duration::from_secs(60));

        assert!(cache.validate(&key.key_value).await.unwrap().is_some());
        cache.revoke(key.key_id, &key.key_value).await.unwrap();
        assert!(cache.validate(&key.key_value).await.unwrap().is_none());
    }
}
