//! Telemetry error types.

use thiserror::Error;

/// Errors raised while configuring logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A level, directive or format string did not parse.
    #[error("invalid logging configuration: {0}")]
    ConfigError(String),

    /// The global subscriber could not be installed (usually because one
    /// already is).
    #[error("failed to initialise logging: {0}")]
    InitError(String),

    /// The log directory or file could not be prepared.
    #[error("log file error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
