//! Environment variable overrides.
//!
//! `TRELLIS_*` variables are applied after every file layer, so they win
//! over anything a config file sets.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Value type a mapped field expects.
#[derive(Clone, Copy)]
enum FieldKind {
    Integer,
    Bool,
    Str,
    List,
}

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: FieldKind,
}

/// All supported `TRELLIS_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "TRELLIS_EXECUTOR_LANE_CAPACITY_HINT",
        field_path: "executor.lane_capacity_hint",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "TRELLIS_PERMISSIONS_PROMPT_TIMEOUT_SECS",
        field_path: "permissions.prompt_timeout_secs",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "TRELLIS_PERMISSIONS_CACHE_DECISIONS",
        field_path: "permissions.cache_decisions",
        kind: FieldKind::Bool,
    },
    EnvMapping {
        var_name: "TRELLIS_LIFECYCLE_GRACEFUL_DISPOSE_TIMEOUT_MS",
        field_path: "lifecycle.graceful_dispose_timeout_ms",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "TRELLIS_SCRIPT_DEFER_UNTIL_READY",
        field_path: "script.defer_until_ready",
        kind: FieldKind::Bool,
    },
    EnvMapping {
        var_name: "TRELLIS_SCRIPT_READY_POLL_INTERVAL_MS",
        field_path: "script.ready_poll_interval_ms",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "TRELLIS_LOG_LEVEL",
        field_path: "logging.level",
        kind: FieldKind::Str,
    },
    EnvMapping {
        var_name: "TRELLIS_LOG_FORMAT",
        field_path: "logging.format",
        kind: FieldKind::Str,
    },
    EnvMapping {
        var_name: "TRELLIS_LOG_DIRECTIVES",
        field_path: "logging.directives",
        kind: FieldKind::List,
    },
];

/// Snapshot the process environment, keeping only `TRELLIS_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("TRELLIS_"))
        .collect()
}

/// Apply every mapped variable present in `env_vars` onto the merged tree.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::Env`] if a numeric or boolean variable does
/// not parse.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var override"
        );
        let value = coerce(mapping, raw)?;
        set_field(merged, mapping.field_path, value);
        count = count.saturating_add(1);
    }

    Ok(count)
}

fn coerce(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    let raw = raw.trim();
    match mapping.kind {
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| ConfigError::Env {
                var: mapping.var_name.to_owned(),
                message: format!("expected an integer: {e}"),
            }),
        FieldKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            other => Err(ConfigError::Env {
                var: mapping.var_name.to_owned(),
                message: format!("expected a boolean, got '{other}'"),
            }),
        },
        FieldKind::Str => Ok(toml::Value::String(raw.to_owned())),
        FieldKind::List => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
    }
}

/// Set a dotted field in the TOML tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = root;
    for segment in segments {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_overrides_are_typed() {
        let mut root: toml::Value = toml::from_str("[permissions]\nprompt_timeout_secs = 60").unwrap();
        let env = vars(&[
            ("TRELLIS_PERMISSIONS_PROMPT_TIMEOUT_SECS", "5"),
            ("TRELLIS_SCRIPT_DEFER_UNTIL_READY", "yes"),
            ("TRELLIS_LOG_DIRECTIVES", "trellis_bridge=debug, tokio=warn"),
        ]);
        let applied = apply_env_overrides(&mut root, &env).unwrap();
        assert_eq!(applied, 3);
        assert_eq!(root["permissions"]["prompt_timeout_secs"].as_integer(), Some(5));
        assert_eq!(root["script"]["defer_until_ready"].as_bool(), Some(true));
        assert_eq!(root["logging"]["directives"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_bad_integer_is_an_error() {
        let mut root = toml::Value::Table(toml::map::Map::new());
        let env = vars(&[("TRELLIS_LIFECYCLE_GRACEFUL_DISPOSE_TIMEOUT_MS", "soon")]);
        let err = apply_env_overrides(&mut root, &env).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_unrelated_vars_are_ignored() {
        let mut root = toml::Value::Table(toml::map::Map::new());
        let env = vars(&[("TRELLIS_UNKNOWN", "1"), ("PATH", "/bin")]);
        assert_eq!(apply_env_overrides(&mut root, &env).unwrap(), 0);
    }
}
