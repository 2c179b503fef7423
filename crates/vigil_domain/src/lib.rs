//! Shared security-analysis data model (spec.md §3): events retrieved from
//! the SIEM store, canonical indicators, correlated campaigns, threat-intel
//! results, and the stream-cursor/session types the query engine produces.
//!
//! This crate owns no I/O; it is pure data + invariant-checking logic,
//! shared by `vigil_siem`, `vigil_intel`, `vigil_query`, and
//! `vigil_correlate` so none of them need to depend on each other just to
//! pass a `Campaign` or `Event` around.

pub mod campaign;
pub mod event;
pub mod indicator;
pub mod stream;
pub mod threat_intel;

pub use campaign::{Campaign, CampaignCounts, DomainError, IndicatorRelationship, RelationshipKind};
pub use event::{Event, EventId};
pub use indicator::Indicator;
pub use stream::{SessionKey, StreamCursor};
pub use threat_intel::{GeoMetadata, NetworkMetadata, SourceResult, ThreatIntelResult};
