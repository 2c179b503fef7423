//! MCP dispatcher, transport, feature manager, and tool handlers for Vigil
//! Sentry (spec.md §4, §6). The binary crate (`vigil`) owns the CLI and
//! process lifecycle; everything here is the composable server half.

pub mod app;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod registry;
pub mod session;
pub mod tools;
pub mod transport;

/// Fixture builders shared by this crate's own unit tests and by
/// `tests/scenarios.rs`. Public so the integration-test binary (a separate
/// crate, invisible to `#[cfg(test)]`) can reach it; not part of the
/// server's runtime surface.
pub mod test_support;

pub use app::{App, StartupError};
pub use dispatcher::Dispatcher;
