//! Schema validation & sanitization (spec.md §4.2, C7) and API-key store &
//! auth (spec.md §4.12, C8).

pub mod apikey;
pub mod audit;
pub mod error;
pub mod file_store;
pub mod sanitize;
pub mod schema;
pub mod validation_cache;

pub use apikey::{ApiKey, ApiKeyId, KeyPermissions, SecretStoreError, SecretStoreProvider};
pub use audit::AuditLog;
pub use file_store::FileSecretStore;
pub use error::SecurityError;
pub use sanitize::{sanitize_text, validate_frame, FrameLimits};
pub use schema::SchemaValidator;
pub use validation_cache::ApiKeyValidationCache;
