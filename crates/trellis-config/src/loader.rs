//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge `/etc/trellis/config.toml` (system)
//! 3. Merge the user config (`$TRELLIS_HOME/config.toml`, or the platform
//!    config directory)
//! 4. Merge an explicitly requested file
//! 5. Apply `TRELLIS_*` environment overrides
//! 6. Deserialize merged tree → `Config`
//! 7. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Default system-wide config location.
const SYSTEM_CONFIG_PATH: &str = "/etc/trellis/config.toml";

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final, validated configuration.
    pub config: Config,
    /// Files that contributed, in merge order.
    pub loaded_files: Vec<String>,
    /// Number of environment overrides applied.
    pub env_overrides: usize,
}

/// Knobs for [`load`]. The defaults reproduce the standard discovery.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Replace the system config path.
    pub system_file: Option<PathBuf>,
    /// Directory holding the user `config.toml`, bypassing `TRELLIS_HOME`
    /// and platform discovery.
    pub home_dir: Option<PathBuf>,
    /// Extra file merged after the user layer.
    pub explicit_file: Option<PathBuf>,
    /// Environment to read overrides from instead of the process
    /// environment.
    pub env: Option<HashMap<String, String>>,
}

/// Load the configuration with layered file precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, an environment
/// override does not parse, or the final configuration fails validation.
pub fn load(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
    let env_vars = options.env.clone().unwrap_or_else(collect_env_vars);

    // 1. Parse embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::Parse {
            origin: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut loaded_files = Vec::new();

    // 2. System config.
    let system_path = options
        .system_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));
    merge_layer(&mut merged, &system_path, "system", &mut loaded_files)?;

    // 3. User config.
    if let Some(user_path) = user_config_path(options.home_dir.as_deref(), &env_vars) {
        merge_layer(&mut merged, &user_path, "user", &mut loaded_files)?;
    }

    // 4. Explicit file. Unlike the discovered layers, it must exist.
    if let Some(path) = &options.explicit_file {
        let overlay = read_file(path)?;
        deep_merge(&mut merged, &overlay);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded explicit config");
    }

    // 5. Environment overrides.
    let env_overrides = apply_env_overrides(&mut merged, &env_vars)?;
    if env_overrides > 0 {
        debug!(count = env_overrides, "applied environment variable overrides");
    }

    // 6. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                origin: "<merged config>".to_owned(),
                source: e,
            })?;

    // 7. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        loaded_files,
        env_overrides,
    })
}

/// Load a config from a specific file path (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or
/// validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::Parse {
            origin: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    deep_merge(&mut merged, &read_file(path)?);

    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            origin: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

fn merge_layer(
    merged: &mut toml::Value,
    path: &Path,
    layer: &str,
    loaded_files: &mut Vec<String>,
) -> ConfigResult<()> {
    if let Some(overlay) = try_load_file(path)? {
        deep_merge(merged, &overlay);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), layer, "loaded config layer");
    }
    Ok(())
}

fn user_config_path<S: ::std::hash::BuildHasher>(
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> Option<PathBuf> {
    if let Some(home) = home_override {
        return Some(home.join("config.toml"));
    }
    if let Some(home) = env_vars.get("TRELLIS_HOME") {
        return Some(PathBuf::from(home).join("config.toml"));
    }
    directories::ProjectDirs::from("dev", "trellis", "trellis")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Read and parse a file that must exist.
fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_content(path, &content)
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        },
    };
    parse_content(path, &content).map(Some)
}

fn parse_content(path: &Path, content: &str) -> ConfigResult<toml::Value> {
    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
            size: content.len() as u64,
            limit: MAX_CONFIG_FILE_SIZE,
        });
    }

    toml::from_str(content).map_err(|e| ConfigError::Parse {
        origin: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
