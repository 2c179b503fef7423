//! Threat-intel source clients and the fan-out enrichment orchestrator
//! (spec.md §4.3, §4.10).

pub mod http_source;
pub mod orchestrator;
pub mod source;

pub use http_source::HttpThreatIntelSource;
pub use orchestrator::{EnrichOutcome, OrchestratorConfig, ThreatIntelOrchestrator};
pub use source::{SourceError, ThreatIntelSource};
