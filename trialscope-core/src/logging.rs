//! Logging setup
//!
//! The library and the admin CLI both log to a daily-rotated file under
//! `$XDG_STATE_HOME/trialscope/` rather than stdout, so CLI output stays
//! parseable. The level comes from the config file; `RUST_LOG` overrides
//! it when set, which is the usual way to turn on `debug` for one run.

use crate::config::{Config, LoggingConfig};
use crate::error::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Keeps the background log writer alive; dropping it flushes pending
/// writes. Hold it for the lifetime of the process.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the global tracing subscriber, writing to the state directory.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = rolling::daily(&log_dir, "trialscope.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(level_filter(config))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!(dir = %log_dir.display(), level = %config.level, "Logging initialized");
    Ok(LoggingGuard { _guard: guard })
}

/// Install a stdout subscriber for tests. Safe to call repeatedly.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Where log lines end up
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

fn level_filter(config: &LoggingConfig) -> EnvFilter {
    // RUST_LOG wins over the config file
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        let path = log_file_path();
        assert!(path.ends_with("trialscope.log"));
    }
}
