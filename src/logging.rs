//! Logging initialization using the `tracing` ecosystem.
//!
//! Console output always; when a log directory is configured, a second
//! layer writes plain-text, daily-rotated files there. `RUST_LOG` overrides
//! the configured level.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rotated log files kept on disk.
const MAX_LOG_FILES: usize = 100;

/// Install the global subscriber. Call once, before anything logs.
pub fn init(level: &str, log_dir: Option<&Path>, file_prefix: &str) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer().with_target(false).with_thread_names(true);

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(file_prefix)
                .max_log_files(MAX_LOG_FILES)
                .build(dir)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            let file = fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(false)
                .with_thread_names(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
        }
    }
    Ok(())
}
