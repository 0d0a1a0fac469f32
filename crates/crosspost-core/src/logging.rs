//! Logging configuration using tracing
//!
//! All output goes to a daily-rotated file; stdout belongs to NDJSON events.

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Log filter directives, e.g. `debug` or `crosspost_host=trace`
pub const LOG_ENV_VAR: &str = "CROSSPOST_LOG";

/// Overrides the log directory
pub const LOG_DIR_ENV_VAR: &str = "CROSSPOST_LOG_DIR";

const LOG_FILE_PREFIX: &str = "crosspost.log";

const DEFAULT_DIRECTIVES: &str =
    "crosspost=info,crosspost_core=info,crosspost_host=info,crosspost_app=info,warn";

/// Install the global subscriber writing to [`log_directory`]
///
/// ```bash
/// CROSSPOST_LOG=debug crosspost detect
/// CROSSPOST_LOG=crosspost_host=trace crosspost publish post.md
/// ```
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;
    install(&log_dir);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        "crosspost starting"
    );
    Ok(())
}

fn install(log_dir: &Path) {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// `$CROSSPOST_LOG_DIR`, else `<data_local_dir>/crosspost/logs`
pub fn log_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV_VAR).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crosspost")
        .join("logs")
}
