//! Where overseer's own diagnostics go.
//!
//! `overseer run` keeps a daily file under the data directory's `logs/`
//! folder, named `overseer.log.YYYY-MM-DD`, one JSON object per line. Each
//! object carries the supervisor state changes, RCON failures, rewards, and
//! relay errors as structured fields so they can be grepped or fed to `jq`.
//! The same events are echoed to stderr in plain text for whoever runs the
//! daemon in a terminal or under a service manager.
//!
//! One-shot subcommands (`start`, `stop`, `status`, ...) only write to stderr,
//! so they never interleave with the daemon's file. These files are separate
//! from the game server's own logs, which the pipeline tails read-only.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix for the rotated daemon log.
const LOG_FILE_PREFIX: &str = "overseer.log";

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes pending entries and closes the file, so the daemon
/// holds it until exit.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise logging for `overseer run`.
///
/// Writes JSON lines to `{logs_dir}/overseer.log.YYYY-MM-DD` and a
/// human-readable copy to stderr. Level comes from `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise stderr-only logging for one-shot subcommands.
///
/// A second call is ignored.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
