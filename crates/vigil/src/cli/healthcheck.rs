//! `vigil healthcheck` (spec.md §6, SPEC_FULL.md C16): builds the full
//! dependency graph exactly as `serve` would, then reports every
//! registered dependency's health and exits without serving any requests —
//! useful for a container readiness probe or a pre-deploy smoke test.

use std::path::Path;

use thiserror::Error;

use vigil_mcp::app::{self, StartupError};
use vigil_mcp::config::{load_config, ConfigError};

#[derive(Debug, Error)]
pub enum HealthcheckError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Startup(#[from] StartupError),
}

/// `true` if every registered dependency is healthy.
pub async fn run(config_path: Option<&Path>, json: bool) -> Result<bool, HealthcheckError> {
    let mut config = load_config(config_path)?;
    // Force the lenient startup path regardless of what the configuration
    // says for a long-running `serve` process: this command's whole job is
    // to build successfully and then *report* which dependencies are down,
    // not to fail fast the way `serve`'s `strict_startup=true` would.
    config.strict_startup = false;
    let app = app::build(&config).await?;

    let states = app.features.all_states();
    let all_healthy = states.iter().all(|(_, state)| state.healthy);

    if json {
        let report: Vec<_> = states
            .iter()
            .map(|(name, state)| {
                serde_json::json!({
                    "dependency": name,
                    "healthy": state.healthy,
                    "last_checked": state.last_checked,
                    "last_error": state.last_error,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "healthy": all_healthy, "dependencies": report }))
                .expect("health report always serializes")
        );
    } else {
        for (name, state) in &states {
            let status = if state.healthy { "ok" } else { "DOWN" };
            match &state.last_error {
                Some(reason) => println!("{name}: {status} ({reason})"),
                None => println!("{name}: {status}"),
            }
        }
    }

    Ok(all_healthy)
}
