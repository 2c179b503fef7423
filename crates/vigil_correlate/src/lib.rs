//! Campaign correlation (spec.md §4.9): a 7-stage pipeline that expands a
//! set of seed indicators into a scored `Campaign`, plus timeline
//! reconstruction over the surviving events.

pub mod error;
pub mod pipeline;
mod stages;
pub mod timeline;

pub use error::CorrelateError;
pub use pipeline::{
    merge_overlapping_campaigns, correlate, CorrelationOutcome, CorrelationRequest, CorrelatorConfig, StageWarning,
};
pub use timeline::{reconstruct_timeline, Granularity, TimelineBucket};
