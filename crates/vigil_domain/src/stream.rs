//! Streaming/pagination cursor types (spec.md §3, §4.12): an opaque token
//! that lets a caller resume a sorted search after the page it already
//! consumed, and the session-grouping key produced alongside it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Composite sort key a cursor resumes from: `(timestamp millis, document id)`
/// descending, matching the SIEM store's tie-break sort (spec.md §4.12).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    pub last_timestamp_ms: i64,
    pub last_document_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    InvalidEncoding,
    #[error("cursor payload is not valid JSON")]
    InvalidPayload,
}

impl StreamCursor {
    pub fn new(last_timestamp_ms: i64, last_document_id: impl Into<String>) -> Self {
        Self { last_timestamp_ms, last_document_id: last_document_id.into() }
    }

    /// Opaque, base64-url-no-pad-encoded token handed to callers. Callers
    /// must treat it as opaque; the encoding is an implementation detail we
    /// are free to change.
    pub fn encode(&self) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        let json = serde_json::to_vec(self).expect("StreamCursor always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorError::InvalidEncoding)?;
        serde_json::from_slice(&bytes).map_err(|_| CursorError::InvalidPayload)
    }
}

/// A computed session-grouping key plus the field list it was derived from,
/// so a downstream caller can tell two sessions with the same string value
/// but different field configurations apart if it needs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub value: String,
    pub fields: Vec<String>,
}

impl SessionKey {
    pub fn new(value: impl Into<String>, fields: Vec<String>) -> Self {
        Self { value: value.into(), fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips_through_encoding() {
        let cursor = StreamCursor::new(1_700_000_000_000, "doc-42");
        let token = cursor.encode();
        let decoded = StreamCursor::decode(&token).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn decode_rejects_garbage_token() {
        assert!(matches!(StreamCursor::decode("not base64!!"), Err(CursorError::InvalidEncoding)));
    }

    #[test]
    fn decode_rejects_valid_base64_non_json_payload() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        let token = URL_SAFE_NO_PAD.encode(b"not json");
        assert!(matches!(StreamCursor::decode(&token), Err(CursorError::InvalidPayload)));
    }
}
