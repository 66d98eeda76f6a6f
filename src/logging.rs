use std::fs;

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::paths::get_log_dir;

/// Default filter when `RUST_LOG` is unset. Audio and socket crates are
/// chatty at info.
const DEFAULT_FILTER: &str = "info,cpal=warn,rodio=warn,tungstenite=warn,tokio_tungstenite=warn,mio=warn";

/// Initialize structured logging.
///
/// - File output: daily rolling `live.log` files in the data directory's
///   `logs/`, keeping the latest 5.
/// - Console output on stderr. stdout carries IPC.
/// - Filter from `RUST_LOG`, defaulting to [`DEFAULT_FILTER`].
///
/// If the log directory cannot be created the console layer still comes up.
pub fn init() -> Result<()> {
    let log_dir = get_log_dir();

    let file_appender = fs::create_dir_all(&log_dir)
        .context("Failed to create log directory")
        .and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("live")
                .filename_suffix("log")
                .max_log_files(5)
                .build(&log_dir)
                .context("Failed to create log file appender")
        });

    let (file_appender, file_error) = match file_appender {
        Ok(appender) => (Some(appender), None),
        Err(e) => (None, Some(e)),
    };

    let file_layer = file_appender.map(|appender| {
        fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logger already initialized")?;

    match file_error {
        None => tracing::info!(log_dir = %log_dir.display(), "Logger initialized"),
        Some(e) => tracing::warn!("File logging disabled: {:#}", e),
    }
    Ok(())
}
