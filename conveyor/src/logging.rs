//! Process-wide `tracing` subscriber setup.
//!
//! The engine only emits events; installing a subscriber is left to the
//! embedding application. These helpers cover the common cases.

use conveyor_shared::ConveyorResult;
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log file prefix inside the directory given to [`init_logging_to`].
pub const LOG_FILE_PREFIX: &str = "conveyor.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing when a global subscriber is already set.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .ok();
}

/// Like [`init_logging`], additionally writing a daily-rolling log file in
/// `dir`. The file writer lives for the rest of the process.
///
/// Only the first call installs anything.
pub fn init_logging_to(dir: impl AsRef<Path>) -> ConveyorResult<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    if FILE_GUARD.get().is_some() {
        return Ok(());
    }

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()
        .is_ok();

    if installed {
        let _ = FILE_GUARD.set(guard);
        tracing::debug!(dir = %dir.display(), "File logging enabled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_to_creates_dir_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs").join("nested");

        init_logging_to(&dir).unwrap();
        init_logging_to(&dir).unwrap();
        init_logging();

        assert!(dir.is_dir());
    }
}
