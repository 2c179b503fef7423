//! Query cost estimation/optimization and session-aware streaming
//! (spec.md §4.8). The non-trivial behavior of the system lives here.

pub mod optimizer;
pub mod plain_stream;
pub mod session_stream;

pub use optimizer::{optimize, OptimizationOutcome, OptimizationStep, OptimizerConfig, SearchRequest};
pub use plain_stream::{stream_events, StreamOutcome};
pub use session_stream::{stream_events_with_session_context, PerfCounters, SessionStreamOutcome, SessionSummary};
