//! Index-pattern discovery (spec.md §4.7): tools declare a primary pattern
//! and an optional fallback pattern rather than a hard-coded concrete index
//! name. On first use, and periodically, the registry resolves each
//! declared pattern to the concrete indices currently matching it.
//!
//! Union-fallback decision (SPEC_FULL.md Open Question): when a tool
//! declares both a primary and fallback pattern, the resolved index set is
//! the union of whatever each pattern matches whenever the primary alone
//! matches nothing, OR when the tool has opted into `union_fallback`
//! unconditionally. This avoids silently losing matches a fallback pattern
//! would have contributed just because the primary also matched something.

use crate::client::SiemClient;
use crate::error::SiemError;
use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct IndexPatternSpec {
    pub primary: String,
    pub fallback: Option<String>,
    pub union_fallback: bool,
}

impl IndexPatternSpec {
    pub fn primary_only(primary: impl Into<String>) -> Self {
        Self { primary: primary.into(), fallback: None, union_fallback: false }
    }

    pub fn with_fallback(primary: impl Into<String>, fallback: impl Into<String>, union_fallback: bool) -> Self {
        Self { primary: primary.into(), fallback: Some(fallback.into()), union_fallback }
    }
}

pub struct IndexPatternRegistry {
    client: std::sync::Arc<SiemClient>,
    resolved: DashMap<String, Vec<String>>,
}

impl IndexPatternRegistry {
    pub fn new(client: std::sync::Arc<SiemClient>) -> Self {
        Self { client, resolved: DashMap::new() }
    }

    /// Resolve `tool`'s declared pattern(s) to concrete indices, caching the
    /// result under `tool`. Returns `Err(SiemError::NoMatchingIndex)`
    /// enumerating every pattern tried when nothing matches at all.
    pub async fn resolve(&self, tool: &str, spec: &IndexPatternSpec) -> Result<Vec<String>, SiemError> {
        let primary_hits = self.client.list_indices(&spec.primary).await?;

        let mut patterns_tried = vec![spec.primary.clone()];
        let resolved = match &spec.fallback {
            None => primary_hits,
            Some(fallback) => {
                patterns_tried.push(fallback.clone());
                if primary_hits.is_empty() || spec.union_fallback {
                    let fallback_hits = self.client.list_indices(fallback).await?;
                    union(primary_hits, fallback_hits)
                } else {
                    primary_hits
                }
            }
        };

        if resolved.is_empty() {
            return Err(SiemError::NoMatchingIndex { patterns: patterns_tried, tool: tool.to_string() });
        }

        self.resolved.insert(tool.to_string(), resolved.clone());
        Ok(resolved)
    }

    pub fn cached(&self, tool: &str) -> Option<Vec<String>> {
        self.resolved.get(tool).map(|v| v.clone())
    }

    pub fn invalidate(&self, tool: &str) {
        self.resolved.remove(tool);
    }
}

fn union(a: Vec<String>, b: Vec<String>) -> Vec<String> {
    let mut merged = a;
    for item in b {
        if !merged.contains(&item) {
            merged.push(item);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_dedupes_shared_entries() {
        let merged = union(vec!["a".into(), "b".into()], vec!["b".into(), "c".into()]);
        assert_eq!(merged, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn spec_with_fallback_records_union_flag() {
        let spec = IndexPatternSpec::with_fallback("logs-*", "archive-*", true);
        assert!(spec.union_fallback);
        assert_eq!(spec.fallback.as_deref(), Some("archive-*"));
    }
}
