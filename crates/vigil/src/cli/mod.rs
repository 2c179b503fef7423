//! CLI surface (spec.md §6, SPEC_FULL.md C16): one `clap::Subcommand` per
//! concern, grounded on the teacher's `main.rs` top-level `Commands` enum
//! and its one-module-per-subcommand-family `cli/` layout.

pub mod config_check;
pub mod healthcheck;
pub mod keys;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Vigil Sentry: security-analysis MCP server")]
pub struct Cli {
    /// Path to a TOML or JSON configuration file. Defaults to built-in
    /// defaults overridden by environment variables (spec.md §6).
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the MCP server (STDIO or TCP, per `TRANSPORT_MODE`/config).
    Serve,

    /// Manage API keys in the configured key store.
    Keys {
        #[command(subcommand)]
        action: keys::KeysAction,
    },

    /// Build the full dependency graph and report each dependency's health,
    /// without serving any requests.
    Healthcheck {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration tree, printing the resolved
    /// tree (secrets redacted) without starting anything.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration and print it back (secrets redacted).
    Check {
        #[arg(long)]
        json: bool,
    },
}

/// Process exit codes (spec.md §6): 0 normal shutdown, 64 configuration
/// error, 69 unreachable mandatory dependency at startup, 70 internal
/// unrecoverable error, 130 interrupted.
pub mod exit_code {
    pub const OK: u8 = 0;
    pub const CONFIG_ERROR: u8 = 64;
    pub const DEPENDENCY_UNREACHABLE: u8 = 69;
    pub const INTERNAL_ERROR: u8 = 70;
    pub const INTERRUPTED: u8 = 130;
}
