//! Tracing setup: journald when it is reachable, a rolling log file
//! otherwise.
//!
//! The filter comes from the `SHOHIN_LOG` environment variable (standard
//! `EnvFilter` syntax, e.g. `debug` or `shohin=trace`) and defaults to
//! `info`.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Holds the non-blocking writer's flush guard for the process lifetime.
static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Journald is preferred so a service unit
/// gets structured fields for free; anywhere it cannot be reached (other
/// platforms, containers without the socket) logs land as daily files
/// under `log_dir`, or under the local data dir when none is given.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let filter = env_filter();

    if init_journald(filter) {
        tracing::info!("logging to journald");
        return Ok(());
    }

    let dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&dir)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, "shohin.log"));
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    tracing::info!(dir = %dir.display(), "logging to rolling file");
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("SHOHIN_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shohin")
        .join("logs")
}

#[cfg(target_os = "linux")]
fn init_journald(filter: EnvFilter) -> bool {
    let layer = match tracing_journald::layer() {
        Ok(layer) => layer,
        Err(_) => return false,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();
    true
}

#[cfg(not(target_os = "linux"))]
fn init_journald(_filter: EnvFilter) -> bool {
    false
}
