//! Audit logging (spec.md §4.13/C15): NDJSON record of every tool
//! invocation, rate-limit rejection, and circuit-breaker trip, generalized
//! from `casparian_mcp`'s request/response audit log.

use crate::error::SecurityError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Result<Self, SecurityError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SecurityError::Audit(format!("create audit dir: {e}")))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SecurityError::Audit(format!("open audit log: {e}")))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn log_tool_call(
        &self,
        correlation_id: Uuid,
        tool: &str,
        success: bool,
        duration_ms: u64,
    ) -> Result<(), SecurityError> {
        self.write_entry(&AuditEntry::ToolCall {
            ts: Utc::now(),
            correlation_id,
            tool: tool.to_string(),
            success,
            duration_ms,
        })
    }

    pub fn log_rate_limited(&self, correlation_id: Uuid, key: &str) -> Result<(), SecurityError> {
        self.write_entry(&AuditEntry::RateLimited {
            ts: Utc::now(),
            correlation_id,
            key: key.to_string(),
        })
    }

    pub fn log_breaker_trip(&self, dependency: &str) -> Result<(), SecurityError> {
        self.write_entry(&AuditEntry::BreakerTrip {
            ts: Utc::now(),
            dependency: dependency.to_string(),
        })
    }

    pub fn log_auth(&self, correlation_id: Uuid, key_id: Option<&str>, success: bool) -> Result<(), SecurityError> {
        self.write_entry(&AuditEntry::Auth {
            ts: Utc::now(),
            correlation_id,
            key_id: key_id.map(str::to_string),
            success,
        })
    }

    fn write_entry(&self, entry: &AuditEntry) -> Result<(), SecurityError> {
        let line = serde_json::to_string(entry)
            .map_err(|e| SecurityError::Audit(format!("serialize entry: {e}")))?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SecurityError::Audit(format!("lock writer: {e}")))?;
        writeln!(writer, "{line}").map_err(|e| SecurityError::Audit(format!("write entry: {e}")))?;
        writer
            .flush()
            .map_err(|e| SecurityError::Audit(format!("flush entry: {e}")))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum AuditEntry {
    #[serde(rename = "tool_call")]
    ToolCall {
        ts: DateTime<Utc>,
        correlation_id: Uuid,
        tool: String,
        success: bool,
        duration_ms: u64,
    },
    #[serde(rename = "rate_limited")]
    RateLimited {
        ts: DateTime<Utc>,
        correlation_id: Uuid,
        key: String,
    },
    #[serde(rename = "breaker_trip")]
    BreakerTrip {
        ts: DateTime<Utc>,
        dependency: String,
    },
    #[serde(rename = "auth")]
    Auth {
        ts: DateTime<Utc>,
        correlation_id: Uuid,
        key_id: Option<String>,
        success: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_one_ndjson_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.ndjson");
        let log = AuditLog::new(path.clone()).unwrap();

        log.log_tool_call(Uuid::nil(), "query_events", true, 12).unwrap();
        log.log_rate_limited(Uuid::nil(), "conn-1").unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"tool_call\""));
        assert!(contents.contains("\"rate_limited\""));
    }
}
