//! Error taxonomy (spec.md §7).
//!
//! `VigilError` is the single place outside `jsonrpc` allowed to know about
//! JSON-RPC error codes. Components return their own `thiserror` error types;
//! the dispatcher boundary converts everything into one of these variants
//! before formatting a `JsonRpcError`.

use crate::jsonrpc::JsonRpcError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Stable error codes from spec.md §7. Tool-specific domain errors use the
/// `ToolDomain(-32000..=-32009)` range; callers pick a value in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    RateLimited,
    CircuitOpen,
    FeatureUnavailable,
    EnrichmentNoSource,
    AuthError,
    ShuttingDown,
    ToolDomain(i32),
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::RateLimited => -32029,
            Self::CircuitOpen => -32030,
            Self::FeatureUnavailable => -32031,
            Self::EnrichmentNoSource => -32032,
            Self::AuthError => -32033,
            Self::ShuttingDown => -32099,
            Self::ToolDomain(code) => code.clamp(-32009, -32000),
        }
    }
}

/// Top-level error type crossing the dispatcher boundary.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown method: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error")]
    Internal {
        correlation_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("dependency unavailable: {dependency}")]
    CircuitOpen { dependency: String },

    #[error("feature unavailable: {reason}")]
    FeatureUnavailable { reason: String },

    #[error("no threat-intel source succeeded")]
    EnrichmentNoSource { diagnostics: Vec<String> },

    #[error("auth error: {reason}")]
    Auth { reason: String },

    #[error("server shutting down")]
    ShuttingDown,

    #[error("{message}")]
    ToolDomain { code: i32, message: String },
}

impl VigilError {
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            correlation_id: Uuid::new_v4(),
            source: source.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::Internal { .. } => ErrorCode::InternalError,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Self::FeatureUnavailable { .. } => ErrorCode::FeatureUnavailable,
            Self::EnrichmentNoSource { .. } => ErrorCode::EnrichmentNoSource,
            Self::Auth { .. } => ErrorCode::AuthError,
            Self::ShuttingDown => ErrorCode::ShuttingDown,
            Self::ToolDomain { code, .. } => ErrorCode::ToolDomain(*code),
        }
    }

    /// Render as the JSON-RPC error object the dispatcher sends on the wire.
    /// Internal errors never leak `source` details to the client, only the
    /// correlation id they were logged under.
    pub fn to_jsonrpc_error(&self, correlation_id: Uuid) -> JsonRpcError {
        let code = self.code().as_i32();
        match self {
            Self::Internal { .. } => JsonRpcError::with_data(
                code,
                "internal error",
                json!({ "correlation_id": correlation_id.to_string() }),
            ),
            Self::RateLimited { retry_after_secs } => JsonRpcError::with_data(
                code,
                self.to_string(),
                json!({
                    "correlation_id": correlation_id.to_string(),
                    "retry_after": retry_after_secs,
                }),
            ),
            Self::FeatureUnavailable { reason } => JsonRpcError::with_data(
                code,
                self.to_string(),
                json!({
                    "correlation_id": correlation_id.to_string(),
                    "reason": reason,
                }),
            ),
            Self::EnrichmentNoSource { diagnostics } => JsonRpcError::with_data(
                code,
                self.to_string(),
                json!({
                    "correlation_id": correlation_id.to_string(),
                    "diagnostics": diagnostics,
                }),
            ),
            _ => JsonRpcError::with_data(
                code,
                self.to_string(),
                json!({ "correlation_id": correlation_id.to_string() }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_hides_source_detail() {
        let err = VigilError::internal(anyhow::anyhow!("database connection string leaked"));
        let rendered = err.to_jsonrpc_error(Uuid::nil());
        assert_eq!(rendered.code, -32603);
        assert_eq!(rendered.message, "internal error");
        assert!(!rendered.message.contains("leaked"));
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = VigilError::RateLimited {
            retry_after_secs: 7,
        };
        let rendered = err.to_jsonrpc_error(Uuid::nil());
        assert_eq!(rendered.code, -32029);
        assert_eq!(rendered.data.unwrap()["retry_after"], 7);
    }

    #[test]
    fn tool_domain_code_is_clamped_to_reserved_range() {
        let err = VigilError::ToolDomain {
            code: -5000,
            message: "bad".into(),
        };
        assert_eq!(err.code().as_i32(), -32000);
    }
}
