//! Security-subsystem error type, kept local to this crate; the dispatcher
//! boundary (`vigil_mcp`) is the only place that converts these into
//! `VigilError`/JSON-RPC error objects.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("frame exceeds {max} bytes ({actual} bytes)")]
    FrameTooLarge { actual: usize, max: usize },

    #[error("JSON nesting depth {actual} exceeds limit {max}")]
    NestingTooDeep { actual: usize, max: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON-RPC 2.0 request: {0}")]
    InvalidJsonRpc(String),

    #[error("params do not match schema for tool {tool}: {reason}")]
    SchemaMismatch { tool: String, reason: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("audit log error: {0}")]
    Audit(String),

    #[error("key not found")]
    KeyNotFound,

    #[error("key expired")]
    KeyExpired,

    #[error("key revoked")]
    KeyRevoked,

    #[error("secret store error: {0}")]
    SecretStore(String),
}
