//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_executor(config)?;
    validate_permissions(config)?;
    validate_lifecycle(config)?;
    validate_script(config)?;
    validate_logging(config)?;
    Ok(())
}

fn non_zero(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field: field.to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

fn validate_executor(config: &Config) -> ConfigResult<()> {
    if config.executor.lane_capacity_hint == 0 {
        return Err(ConfigError::Invalid {
            field: "executor.lane_capacity_hint".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

fn validate_permissions(config: &Config) -> ConfigResult<()> {
    non_zero(
        "permissions.prompt_timeout_secs",
        config.permissions.prompt_timeout_secs,
    )
}

fn validate_lifecycle(config: &Config) -> ConfigResult<()> {
    non_zero(
        "lifecycle.graceful_dispose_timeout_ms",
        config.lifecycle.graceful_dispose_timeout_ms,
    )
}

fn validate_script(config: &Config) -> ConfigResult<()> {
    non_zero(
        "script.ready_poll_interval_ms",
        config.script.ready_poll_interval_ms,
    )
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::Invalid {
            field: "logging.level".to_owned(),
            message: format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        });
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::Invalid {
            field: "logging.format".to_owned(),
            message: format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        });
    }

    Ok(())
}
