//! Vigil Sentry launcher (spec.md §6, SPEC_FULL.md C16): parses the CLI,
//! wires up logging, and dispatches to the subcommand's own module. Mirrors
//! the teacher's `casparian` binary's shape — layered `tracing-subscriber`
//! (file + console), `clap::Subcommand`, exit-code mapping from the
//! top-level `Result` — generalized from its clipboard of standalone
//! utilities down to this server's much smaller command surface.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use cli::{exit_code, Cli, Commands, ConfigAction};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(exit_code::INTERNAL_ERROR);
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve => match cli::serve::run(config_path).await {
            Ok(cli::serve::ServeOutcome::GracefulShutdown) => {
                tracing::info!("shutdown complete");
                ExitCode::from(exit_code::OK)
            }
            Ok(cli::serve::ServeOutcome::Interrupted) => {
                tracing::warn!("interrupted");
                ExitCode::from(exit_code::INTERRUPTED)
            }
            Err(e) => {
                tracing::error!(error = %e, "serve failed");
                ExitCode::from(exit_code_for_serve_error(&e))
            }
        },

        Commands::Keys { action } => match cli::keys::run(config_path, action).await {
            Ok(()) => ExitCode::from(exit_code::OK),
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(exit_code::CONFIG_ERROR)
            }
        },

        Commands::Healthcheck { json } => match cli::healthcheck::run(config_path, json).await {
            Ok(true) => ExitCode::from(exit_code::OK),
            Ok(false) => ExitCode::from(exit_code::DEPENDENCY_UNREACHABLE),
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(exit_code_for_healthcheck_error(&e))
            }
        },

        Commands::Config { action } => {
            let ConfigAction::Check { json } = action;
            match cli::config_check::run(config_path, json) {
                Ok(()) => ExitCode::from(exit_code::OK),
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::from(exit_code::CONFIG_ERROR)
                }
            }
        }
    }
}

fn exit_code_for_serve_error(e: &cli::serve::ServeError) -> u8 {
    match e {
        cli::serve::ServeError::Config(_) => exit_code::CONFIG_ERROR,
        cli::serve::ServeError::Startup(_) => exit_code::DEPENDENCY_UNREACHABLE,
        cli::serve::ServeError::Transport(_) => exit_code::INTERNAL_ERROR,
    }
}

fn exit_code_for_healthcheck_error(e: &cli::healthcheck::HealthcheckError) -> u8 {
    match e {
        cli::healthcheck::HealthcheckError::Config(_) => exit_code::CONFIG_ERROR,
        cli::healthcheck::HealthcheckError::Startup(_) => exit_code::DEPENDENCY_UNREACHABLE,
    }
}

/// Layered `tracing-subscriber`: an `EnvFilter` driven by `LOG_LEVEL`
/// (falling back to `info`), a daily-rolling file layer under
/// `./vigil-logs/`, and a stderr console layer — stdout is reserved for the
/// STDIO transport's JSON-RPC frames (spec.md §6), so logs never go there.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter_spec = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        tracing_subscriber::EnvFilter::try_new(&filter_spec).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let mut guard = None;
    let file_layer = match std::fs::create_dir_all("./vigil-logs") {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily("./vigil-logs", "vigil.log");
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        }
        Err(e) => {
            eprintln!("warning: failed to create ./vigil-logs: {e}");
            None
        }
    };

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry().with(env_filter).with(file_layer).with(console_layer).init();

    guard
}
