//! Frame-level validation and free-text sanitization (spec.md §4.2).
//!
//! Every incoming frame is rejected before dispatch if it is too large, too
//! deeply nested, not valid UTF-8, or not a well-formed JSON-RPC 2.0
//! request. String parameters declared free-text are sanitized: control
//! characters and null bytes are stripped, and SQL-style keywords,
//! `<script>` tags, `javascript:` URLs, and `../` path traversal sequences
//! are removed.

use crate::error::SecurityError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_bytes: usize,
    pub max_depth: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_depth: 100,
        }
    }
}

/// Validate a raw frame per spec.md §4.2, returning the parsed JSON-RPC
/// request value on success. No tool handler is invoked if this fails.
pub fn validate_frame(raw: &[u8], limits: FrameLimits) -> Result<Value, SecurityError> {
    if raw.len() > limits.max_bytes {
        return Err(SecurityError::FrameTooLarge {
            actual: raw.len(),
            max: limits.max_bytes,
        });
    }

    let text = std::str::from_utf8(raw).map_err(|_| SecurityError::InvalidUtf8)?;

    let value: Value = serde_json::from_str(text)
        .map_err(|e| SecurityError::InvalidJsonRpc(format!("invalid JSON: {e}")))?;

    let depth = json_depth(&value);
    if depth > limits.max_depth {
        return Err(SecurityError::NestingTooDeep {
            actual: depth,
            max: limits.max_depth,
        });
    }

    validate_jsonrpc_shape(&value)?;

    Ok(value)
}

fn validate_jsonrpc_shape(value: &Value) -> Result<(), SecurityError> {
    let obj = value
        .as_object()
        .ok_or_else(|| SecurityError::InvalidJsonRpc("request must be a JSON object".into()))?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        _ => return Err(SecurityError::InvalidJsonRpc("missing or invalid jsonrpc version".into())),
    }

    if !obj.contains_key("method") || !obj.get("method").map(Value::is_string).unwrap_or(false) {
        return Err(SecurityError::InvalidJsonRpc("missing method".into()));
    }

    if let Some(id) = obj.get("id") {
        if !(id.is_number() || id.is_string() || id.is_null()) {
            return Err(SecurityError::InvalidJsonRpc("id must be a number, string, or null".into()));
        }
    }

    Ok(())
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 1,
    }
}

static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").unwrap());
static SQL_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|UNION|EXEC|--|;--)\b").unwrap()
});
static SCRIPT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*script[^>]*>.*?<\s*/\s*script\s*>").unwrap());
static JAVASCRIPT_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)javascript:").unwrap());
static PATH_TRAVERSAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\./|\.\.\\\\").unwrap());

/// Sanitize a value declared free-text in a tool's schema (spec.md §4.2).
pub fn sanitize_text(input: &str) -> String {
    let stripped = CONTROL_CHARS.replace_all(input, "");
    let no_script = SCRIPT_TAG.replace_all(&stripped, "");
    let no_js_url = JAVASCRIPT_URL.replace_all(&no_script, "");
    let no_sql = SQL_KEYWORDS.replace_all(&no_js_url, "");
    let no_traversal = PATH_TRAVERSAL.replace_all(&no_sql, "");
    no_traversal.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_frame() {
        let limits = FrameLimits {
            max_bytes: 10,
            max_depth: 100,
        };
        let raw = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        assert!(matches!(
            validate_frame(raw, limits),
            Err(SecurityError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let raw = &[0xff, 0xfe, 0xfd];
        assert!(matches!(
            validate_frame(raw, FrameLimits::default()),
            Err(SecurityError::InvalidUtf8)
        ));
    }

    #[test]
    fn rejects_missing_jsonrpc_version() {
        let raw = br#"{"id":1,"method":"ping"}"#;
        assert!(matches!(
            validate_frame(raw, FrameLimits::default()),
            Err(SecurityError::InvalidJsonRpc(_))
        ));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut nested = String::from("1");
        for _ in 0..150 {
            nested = format!("[{nested}]");
        }
        let raw = format!(r#"{{"jsonrpc":"2.0","id":1,"method":"ping","params":{nested}}}"#);
        assert!(matches!(
            validate_frame(raw.as_bytes(), FrameLimits::default()),
            Err(SecurityError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn accepts_well_formed_request() {
        let raw = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        assert!(validate_frame(raw, FrameLimits::default()).is_ok());
    }

    #[test]
    fn sanitize_strips_script_tags_and_control_chars() {
        let input = "hello\x00<script>alert(1)</script>world";
        let out = sanitize_text(input);
        assert!(!out.contains('\x00'));
        assert!(!out.to_lowercase().contains("<script"));
    }

    #[test]
    fn sanitize_strips_path_traversal() {
        let out = sanitize_text("../../etc/passwd");
        assert!(!out.contains(".."));
    }

    #[test]
    fn sanitize_strips_javascript_urls_and_sql_keywords() {
        let out = sanitize_text("javascript:alert(1); SELECT * FROM users");
        assert!(!out.to_lowercase().contains("javascript:"));
        assert!(!out.to_uppercase().contains("SELECT"));
    }
}
