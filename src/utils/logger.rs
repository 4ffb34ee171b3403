//! Logging utilities

use crate::Result;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Initialize logging system
pub fn init<P: AsRef<Path>>(log_level: &str, log_file: P) -> Result<()> {
    // Create log directory if it doesn't exist
    if let Some(parent) = log_file.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Create file appender with daily rotation
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_file.as_ref().parent().unwrap_or(Path::new(".")),
        log_file
            .as_ref()
            .file_name()
            .unwrap_or(std::ffi::OsStr::new("arbitrage.log")),
    );

    let console_layer = fmt::layer().with_target(true);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Log a leg event with structured fields
#[macro_export]
macro_rules! log_leg {
    ($level:ident, $trade:expr, $venue:expr, $status:expr, $($field:tt)*) => {
        tracing::$level!(
            trade = %$trade,
            venue = %$venue,
            status = %$status,
            $($field)*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_logger_init() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("test.log");

        let result = init("info", &log_file);
        assert!(result.is_ok());

        tracing::info!("Test log message");

        // Daily rotation appends the date, so look for any test.log.* file
        let rotated = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("test.log"));
        assert!(rotated);
    }
}
