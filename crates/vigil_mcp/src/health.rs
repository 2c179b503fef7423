//! Feature Manager & Health (spec.md §4.5, C10): a static map of tool name
//! to required dependencies, a background prober that polls each registered
//! dependency, and the health state `list_tools` and `call_tool` consult to
//! hide or reject tools whose dependencies are down.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A dependency a tool needs in order to function (e.g. the SIEM store, or
/// a named threat-intel source).
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct HealthState {
    pub healthy: bool,
    pub last_checked: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl HealthState {
    fn unknown() -> Self {
        Self { healthy: false, last_checked: Utc::now(), last_error: Some("not yet probed".to_string()) }
    }
}

/// What a tool needs to be considered available: every dependency in
/// `all_of` healthy, and (if non-empty) at least one of `any_of` healthy —
/// the shape `enrich_indicator`'s "at least one threat-intel source" needs.
#[derive(Debug, Clone, Default)]
pub struct FeatureRequirement {
    pub all_of: Vec<String>,
    pub any_of: Vec<String>,
}

impl FeatureRequirement {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn requires(dependency: impl Into<String>) -> Self {
        Self { all_of: vec![dependency.into()], any_of: Vec::new() }
    }

    pub fn requires_any(dependencies: impl IntoIterator<Item = String>) -> Self {
        Self { all_of: Vec::new(), any_of: dependencies.into_iter().collect() }
    }
}

pub struct FeatureManager {
    probes: DashMap<String, Arc<dyn HealthProbe>>,
    state: DashMap<String, HealthState>,
    requirements: DashMap<String, FeatureRequirement>,
}

impl FeatureManager {
    pub fn new() -> Self {
        Self { probes: DashMap::new(), state: DashMap::new(), requirements: DashMap::new() }
    }

    /// Registers a dependency to be polled. A dependency with no declared
    /// probe (e.g. one that can't be checked out-of-band) is treated as
    /// always healthy.
    pub fn register_dependency(&self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        let name = name.into();
        self.probes.insert(name.clone(), probe);
        self.state.insert(name, HealthState::unknown());
    }

    pub fn register_tool(&self, tool: impl Into<String>, requirement: FeatureRequirement) {
        self.requirements.insert(tool.into(), requirement);
    }

    /// Runs one probe pass over every registered dependency, immediately —
    /// used at startup so the first `list_tools` doesn't report everything
    /// as down for the first probe interval.
    pub async fn probe_once(&self) {
        let targets: Vec<(String, Arc<dyn HealthProbe>)> =
            self.probes.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        for (name, probe) in targets {
            let result = probe.probe().await;
            let now = Utc::now();
            let state = match result {
                Ok(()) => HealthState { healthy: true, last_checked: now, last_error: None },
                Err(reason) => {
                    tracing::warn!(dependency = %name, reason = %reason, "dependency health probe failed");
                    HealthState { healthy: false, last_checked: now, last_error: Some(reason) }
                }
            };
            self.state.insert(name, state);
        }
    }

    pub fn spawn_prober(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; startup already probed once
            loop {
                ticker.tick().await;
                manager.probe_once().await;
            }
        })
    }

    fn dependency_healthy(&self, name: &str) -> bool {
        self.state.get(name).map(|s| s.healthy).unwrap_or(true)
    }

    /// `None` means available; `Some(reason)` names the first unhealthy
    /// dependency blocking the tool.
    pub fn availability(&self, tool: &str) -> Option<String> {
        let requirement = match self.requirements.get(tool) {
            Some(r) => r.clone(),
            None => return None,
        };
        for dep in &requirement.all_of {
            if !self.dependency_healthy(dep) {
                return Some(self.reason(dep));
            }
        }
        if !requirement.any_of.is_empty() && !requirement.any_of.iter().any(|d| self.dependency_healthy(d)) {
            return Some(format!(
                "none of the required dependencies are healthy: {}",
                requirement.any_of.join(", ")
            ));
        }
        None
    }

    pub fn is_available(&self, tool: &str) -> bool {
        self.availability(tool).is_none()
    }

    fn reason(&self, dependency: &str) -> String {
        match self.state.get(dependency).and_then(|s| s.last_error.clone()) {
            Some(error) => format!("dependency '{dependency}' is unhealthy: {error}"),
            None => format!("dependency '{dependency}' is unhealthy"),
        }
    }

    pub fn dependency_state(&self, name: &str) -> Option<HealthState> {
        self.state.get(name).map(|s| s.clone())
    }

    pub fn all_states(&self) -> Vec<(String, HealthState)> {
        self.state.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }
}

impl Default for FeatureManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysHealthy;
    #[async_trait]
    impl HealthProbe for AlwaysHealthy {
        async fn probe(&self) -> Result<(), String> {
            Ok(())
        }
    }

    struct AlwaysDown;
    #[async_trait]
    impl HealthProbe for AlwaysDown {
        async fn probe(&self) -> Result<(), String> {
            Err("connection refused".to_string())
        }
    }

    #[tokio::test]
    async fn tool_with_no_requirement_is_always_available() {
        let manager = FeatureManager::new();
        assert!(manager.is_available("get_data_dictionary"));
    }

    #[tokio::test]
    async fn tool_hidden_when_required_dependency_down() {
        let manager = FeatureManager::new();
        manager.register_dependency("siem_store", Arc::new(AlwaysDown));
        manager.register_tool("query_events", FeatureRequirement::requires("siem_store"));
        manager.probe_once().await;
        assert!(!manager.is_available("query_events"));
        assert!(manager.availability("query_events").unwrap().contains("siem_store"));
    }

    #[tokio::test]
    async fn any_of_requirement_satisfied_by_one_healthy_source() {
        let manager = FeatureManager::new();
        manager.register_dependency("intel_a", Arc::new(AlwaysDown));
        manager.register_dependency("intel_b", Arc::new(AlwaysHealthy));
        manager.register_tool(
            "enrich_indicator",
            FeatureRequirement::requires_any(["intel_a".to_string(), "intel_b".to_string()]),
        );
        manager.probe_once().await;
        assert!(manager.is_available("enrich_indicator"));
    }

    #[tokio::test]
    async fn any_of_requirement_fails_when_all_sources_down() {
        let manager = FeatureManager::new();
        manager.register_dependency("intel_a", Arc::new(AlwaysDown));
        manager.register_tool("enrich_indicator", FeatureRequirement::requires_any(["intel_a".to_string()]));
        manager.probe_once().await;
        assert!(!manager.is_available("enrich_indicator"));
    }
}
