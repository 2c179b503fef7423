//! SIEM store client (spec.md §4.7): typed query DSL, offset/cursor
//! pagination, aggregations, and index-pattern discovery, built on the
//! `elasticsearch` crate.

pub mod client;
pub mod error;
pub mod index_discovery;
pub mod pagination;
pub mod query;

pub use client::SiemClient;
pub use error::SiemError;
pub use index_discovery::{IndexPatternRegistry, IndexPatternSpec};
pub use pagination::{OffsetPage, Page, PageMeta, DEEP_PAGINATION_LIMIT, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use query::{AggSpec, Query};
