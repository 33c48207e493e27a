//! Logging initialization for opticache binaries.
//!
//! Wraps the observability package: compact lines on stderr plus structured
//! JSONL in `~/.opticache/logs/<service>.jsonl`.

use crate::{CoreError, CoreResult, Paths};

/// Initialize the logging system for a binary.
///
/// - Structured JSONL output to the service's log file
/// - Log level from RUST_LOG env var or the provided default
/// - Service name included in every JSONL line
///
/// # Example
///
/// ```ignore
/// init_logging(&paths, "opticache-replay", "info")?;
/// tracing::info!("replay started");
/// ```
pub fn init_logging(paths: &Paths, service_name: &str, level: &str) -> CoreResult<()> {
    paths.ensure_dirs()?;
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(paths.log_file(service_name)),
        also_stderr: true,
    })
    .map_err(|e| CoreError::Config(format!("failed to initialize logging: {e}")))
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
