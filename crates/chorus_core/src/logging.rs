//! Logging bootstrap.
//!
//! One initialization path: a daily-rotating file under the logs directory,
//! plus an optional console layer for interactive use. `RUST_LOG` overrides
//! the filter; otherwise dependencies log at `warn` and the chorus crates at
//! the configured level.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ChorusConfig;

const LOG_FILE_PREFIX: &str = "chorus";

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("warn,chorus_core={level},chorus_ai={level}"))
}

/// Initialize application logging: rotating file plus console, level taken
/// from the config. The returned guard must live as long as the process logs.
pub fn init_logging(config: &ChorusConfig) -> Result<WorkerGuard> {
    init_in(&ChorusConfig::logs_dir()?, &config.log_level, true)
}

/// File-only logging in an explicit directory, for tests and embedded use
/// where `~/.chorus/logs` and console output are unwanted.
pub fn init_logging_to_dir(logs_dir: &Path, level: &str) -> Result<WorkerGuard> {
    init_in(logs_dir, level, false)
}

fn init_in(logs_dir: &Path, level: &str, console: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer),
        )
        .with(console.then(|| fmt::layer().with_target(false).compact()))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Logging already initialized: {e}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_targets_chorus_crates() {
        let rendered = default_filter("debug").to_string();
        assert!(rendered.contains("chorus_core=debug"));
        assert!(rendered.contains("chorus_ai=debug"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    fn init_creates_missing_log_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let logs_dir = tmp.path().join("nested").join("logs");
        // Only one global subscriber can exist per test process; the
        // directory is created regardless of who won that race.
        let _ = init_logging_to_dir(&logs_dir, "info");
        assert!(logs_dir.exists());
    }

    #[test]
    fn second_initialization_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let _ = init_logging_to_dir(&tmp.path().join("a"), "info");
        let second = init_logging_to_dir(&tmp.path().join("b"), "info");
        assert!(second.is_err());
    }
}
