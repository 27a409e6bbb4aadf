//! Logging for codeloom
//!
//! The binary logs to `$XDG_STATE_HOME/codeloom/codeloom.log`, rotated daily.
//! `RUST_LOG` overrides the configured level.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Flushes buffered log lines when dropped. Hold it for the life of `main`.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Install the file subscriber described by `config`.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_path = Config::log_path();
    let (Some(dir), Some(file_name)) = (log_path.parent(), log_path.file_name()) else {
        return Err(Error::Config(format!(
            "invalid log path: {}",
            log_path.display()
        )));
    };
    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name.to_string_lossy())
        .max_log_files(config.max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("failed to open log file: {}", e)))?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter_for(&config.level)?)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!(path = %log_path.display(), level = %config.level, "Logging initialized");
    Ok(LoggingGuard { _worker: worker })
}

/// Route events to the test harness's captured output.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// `RUST_LOG` when set, otherwise the configured level.
///
/// A bad configured directive is a config error rather than a silent fallback.
fn filter_for(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid logging.level {:?}: {}", level, e)))
}
