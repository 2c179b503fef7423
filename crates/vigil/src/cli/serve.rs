//! `vigil serve` (spec.md §6): builds the full dependency graph and runs
//! the configured transport until EOF (STDIO) or a shutdown signal,
//! generalized from the teacher's `run_unified`/`run_sentinel_standalone`
//! signal-handling shape onto a single async transport loop instead of a
//! pair of OS threads.

use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use vigil_mcp::app::{self, StartupError};
use vigil_mcp::config::{load_config, ConfigError, TransportMode};
use vigil_security::FrameLimits;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Startup(#[from] StartupError),
    #[error("tcp transport failed: {0}")]
    Transport(#[from] std::io::Error),
}

/// How the server stopped serving, for `main` to pick an exit code.
pub enum ServeOutcome {
    GracefulShutdown,
    Interrupted,
}

pub async fn run(config_path: Option<&Path>) -> Result<ServeOutcome, ServeError> {
    let config = load_config(config_path)?;
    let app = app::build(&config).await?;

    let shutdown = CancellationToken::new();
    let outcome = tokio::select! {
        biased;
        interrupted = wait_for_shutdown_signal() => {
            shutdown.cancel();
            if interrupted { ServeOutcome::Interrupted } else { ServeOutcome::GracefulShutdown }
        }
        result = serve_transport(&app, &config, shutdown.clone()) => {
            result?;
            ServeOutcome::GracefulShutdown
        }
    };

    Ok(outcome)
}

async fn serve_transport(
    app: &app::App,
    config: &vigil_mcp::config::VigilConfig,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let limits = FrameLimits::default();
    match config.transport.mode {
        TransportMode::Stdio => {
            vigil_mcp::transport::run_stdio(app.dispatcher.clone(), limits, shutdown).await;
            Ok(())
        }
        TransportMode::Tcp => {
            vigil_mcp::transport::run_tcp(app.dispatcher.clone(), config.transport.clone(), limits, shutdown).await
        }
    }
}

/// Resolves once a shutdown signal arrives: `true` for an interrupt
/// (Ctrl+C / SIGINT, spec.md §6 exit code 130), `false` for a graceful
/// termination request (SIGTERM), matching the distinction the teacher's
/// unified launcher draws between a crash/interrupt and an orderly stop.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = sigterm.recv() => false,
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> bool {
    let _ = tokio::signal::ctrl_c().await;
    true
}
