//! Logging initialisation
//!
//! Installs a `tracing` subscriber: an `EnvFilter` built from the configured
//! level (or `RUST_LOG`), a stderr fmt layer, and, when a log directory is
//! configured, a non-blocking daily-rolling file layer.

use crate::common::error::CommonError;
use crate::config::EdcConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name prefix inside the log directory
pub const LOG_FILE_PREFIX: &str = "edc.log";

/// Build the filter from `RUST_LOG` if set, otherwise from the configured level.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held
/// for the lifetime of the process.
pub fn init(config: &EdcConfig) -> Result<Option<WorkerGuard>, CommonError> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

            tracing_subscriber::registry()
                .with(build_filter(&config.log_level))
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| CommonError::Config(format!("Failed to install logger: {}", e)))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(build_filter(&config.log_level))
                .with(stderr_layer)
                .try_init()
                .map_err(|e| CommonError::Config(format!("Failed to install logger: {}", e)))?;
            Ok(None)
        }
    }
}
