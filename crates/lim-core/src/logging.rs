use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::time::{LocalTime, UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::options::Verbosity;
use crate::settings::config_directory;

pub const LOG_ENV_VAR: &str = "LINE_ITEM_MANAGER_LOG";
const LOG_FILE_NAME: &str = "line-item-manager.log";

/// Controls where structured logs are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingDestination {
    /// JSON file under the config directory plus human-readable stderr.
    FileAndStderr,
    /// Stderr only (tests and one-off commands).
    StderrOnly,
}

#[derive(Debug)]
struct LoggingGuards {
    _guard: Option<WorkerGuard>,
    log_path: Option<PathBuf>,
}

static LOGGING_STATE: OnceLock<LoggingGuards> = OnceLock::new();

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to prepare log directory: {0}")]
    Io(#[from] io::Error),
    #[error("invalid logging filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to install logging subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber. The first call wins; later calls return the log path
/// chosen by the first.
pub fn init_logging(
    destination: LoggingDestination,
    verbosity: Verbosity,
) -> Result<Option<&'static PathBuf>, LoggingError> {
    if LOGGING_STATE.get().is_none() {
        let guards = install_logging(destination, verbosity)?;
        if let Err(guards) = LOGGING_STATE.set(guards) {
            drop(guards);
        }
    }

    Ok(current_log_path())
}

pub fn current_log_path() -> Option<&'static PathBuf> {
    LOGGING_STATE
        .get()
        .and_then(|guards| guards.log_path.as_ref())
}

fn install_logging(
    destination: LoggingDestination,
    verbosity: Verbosity,
) -> Result<LoggingGuards, LoggingError> {
    let filter = build_filter(
        env::var(LOG_ENV_VAR).ok(),
        env::var("RUST_LOG").ok(),
        verbosity,
    )?;
    let registry = tracing_subscriber::registry().with(filter);

    let (file_layer, guard, log_path) = match destination {
        LoggingDestination::FileAndStderr => {
            let dir = config_directory().join("logs");
            fs::create_dir_all(&dir)?;
            let path = dir.join(LOG_FILE_NAME);
            let file_appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
            let (writer, worker_guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .event_format(
                    tracing_subscriber::fmt::format()
                        .json()
                        .with_timer(UtcTime::rfc_3339())
                        .with_level(true)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(worker_guard), Some(path))
        }
        LoggingDestination::StderrOnly => (None, None, None),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_timer(LocalTime::rfc_3339())
                .with_level(true)
                .with_target(false)
                .with_ansi(false),
        )
        .with_writer(io::stderr)
        .with_ansi(false);

    registry.with(file_layer).with(stderr_layer).try_init()?;

    if let Some(path) = log_path.as_ref() {
        info!(path = %path.display(), "Structured logging enabled");
    }

    Ok(LoggingGuards {
        _guard: guard,
        log_path,
    })
}

/// Dedicated variable, then `RUST_LOG`, then the run's verbosity.
fn build_filter(
    dedicated: Option<String>,
    rust_log: Option<String>,
    verbosity: Verbosity,
) -> Result<EnvFilter, ParseError> {
    let spec = [dedicated, rust_log]
        .into_iter()
        .flatten()
        .find(|spec| !spec.trim().is_empty())
        .unwrap_or_else(|| verbosity.level().to_string());
    EnvFilter::try_new(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_variable_takes_precedence() {
        let filter = build_filter(
            Some("lim_core=trace".into()),
            Some("warn".into()),
            Verbosity::Normal,
        )
        .unwrap();
        assert_eq!(filter.to_string(), "lim_core=trace");
    }

    #[test]
    fn blank_variables_fall_through_to_verbosity() {
        let filter = build_filter(Some("  ".into()), None, Verbosity::Verbose).unwrap();
        assert_eq!(filter.to_string(), "debug");

        let filter = build_filter(None, Some("error".into()), Verbosity::Trace).unwrap();
        assert_eq!(filter.to_string(), "error");
    }

    #[test]
    fn malformed_filter_is_reported() {
        assert!(build_filter(Some("lim_core=loud".into()), None, Verbosity::Normal).is_err());
    }
}
