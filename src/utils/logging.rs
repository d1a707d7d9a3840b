//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber with an `EnvFilter`; `RUST_LOG`
//! overrides the configured level when set.

use crate::config::LoggingConfig;
use crate::error::{CodecError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging subsystem from `config`
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.log_level.to_string().to_lowercase();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let file = match (&config.log_to_file, &config.log_file_path) {
        (true, Some(path)) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| CodecError::ConfigError(format!("log file {path}: {e}")))?,
        ),
        (true, None) => {
            return Err(CodecError::ConfigError(
                "log_to_file is set without log_file_path".into(),
            ))
        }
        _ => None,
    };

    let result = match (file, config.json_format) {
        (Some(file), true) => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
            .try_init(),
        (Some(file), false) => subscriber
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
            .try_init(),
        (None, true) => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init(),
        (None, false) => subscriber
            .with(
                fmt::layer()
                    .with_ansi(config.log_to_console)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init(),
    };
    result.map_err(|e| CodecError::ConfigError(format!("logging init: {e}")))?;

    tracing::info!(app = %config.app_name, "logging initialized");
    Ok(())
}
