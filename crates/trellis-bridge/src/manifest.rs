//! Feature declarations loaded from TOML manifests.
//!
//! ```toml
//! [[features]]
//! name = "tizen.sensor"
//!
//! [[features.actions]]
//! name = "getValue"
//! mode = "sync"
//!
//! [[features.actions]]
//! name = "watch"
//! mode = "callback"
//! type = "event"
//! permissions = ["sensor.read"]
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};
use trellis_core::FeatureDescriptor;

use crate::error::{BridgeError, BridgeResult};

/// Extension of manifest files picked up by [`load_manifests_from_dir`].
pub const MANIFEST_EXTENSION: &str = "toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(default)]
    features: Vec<FeatureDescriptor>,
}

/// Parse manifest text. `origin` names the source in errors.
///
/// Every returned descriptor has its actions bound to the feature and has
/// passed validation.
///
/// # Errors
///
/// Returns [`BridgeError::Manifest`] if the text is not a valid manifest or
/// a declared feature is malformed.
pub fn parse_manifest(content: &str, origin: &str) -> BridgeResult<Vec<FeatureDescriptor>> {
    let manifest: ManifestFile = toml::from_str(content).map_err(|e| BridgeError::Manifest {
        path: origin.to_owned(),
        message: e.to_string(),
    })?;

    manifest
        .features
        .into_iter()
        .map(|feature| {
            let feature = feature.bound();
            feature.validate().map_err(|e| BridgeError::Manifest {
                path: origin.to_owned(),
                message: e.to_string(),
            })?;
            Ok(feature)
        })
        .collect()
}

/// Load a single manifest file.
///
/// # Errors
///
/// Returns [`BridgeError::Io`] if the file cannot be read, or
/// [`BridgeError::Manifest`] if it does not parse.
pub fn load_manifest(path: &Path) -> BridgeResult<Vec<FeatureDescriptor>> {
    let content = std::fs::read_to_string(path).map_err(|source| BridgeError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let features = parse_manifest(&content, &path.display().to_string())?;
    debug!(path = %path.display(), count = features.len(), "Loaded feature manifest");
    Ok(features)
}

/// Load every `*.toml` manifest directly inside `dir`, in file name order.
///
/// A broken manifest is logged and skipped so the rest still load.
///
/// # Errors
///
/// Returns [`BridgeError::Io`] only if the directory itself cannot be read.
pub fn load_manifests_from_dir(dir: &Path) -> BridgeResult<Vec<FeatureDescriptor>> {
    let io_err = |source| BridgeError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == MANIFEST_EXTENSION)
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut features = Vec::new();
    for path in paths {
        match load_manifest(&path) {
            Ok(found) => features.extend(found),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping feature manifest"),
        }
    }
    info!(dir = %dir.display(), count = features.len(), "Discovered feature declarations");
    Ok(features)
}

#[cfg(test)]
mod tests {
    use trellis_core::{ActionType, Mode, PromptStrategy, ResidentType};

    use super::*;

    const SENSOR: &str = r#"
[[features]]
name = "tizen.sensor"

[[features.actions]]
name = "getValue"
alias = "value"
mode = "sync"

[[features.actions]]
name = "watch"
mode = "callback"
type = "event"
resident = "useable"
permissions = ["sensor.read"]
prompt_strategy = "every_time"
"#;

    #[test]
    fn test_parse_binds_actions() {
        let features = parse_manifest(SENSOR, "inline").unwrap();
        assert_eq!(features.len(), 1);
        let sensor = &features[0];
        assert_eq!(sensor.name(), "tizen.sensor");

        let value = sensor.action("value").unwrap();
        assert_eq!(value.name(), "getValue");
        assert_eq!(value.feature(), "tizen.sensor");
        assert_eq!(value.mode(), Mode::Sync);

        let watch = sensor.action("watch").unwrap();
        assert_eq!(watch.mode(), Mode::Callback);
        assert_eq!(watch.action_type(), ActionType::Event);
        assert_eq!(watch.resident(), ResidentType::Useable);
        assert_eq!(watch.permissions(), ["sensor.read".to_owned()]);
        assert_eq!(watch.prompt_strategy(), PromptStrategy::EveryTime);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let err = parse_manifest("features = 3", "broken.toml").unwrap_err();
        assert!(err.to_string().contains("broken.toml"));

        let unknown_mode = r#"
[[features]]
name = "x"
[[features.actions]]
name = "a"
mode = "eventually"
"#;
        assert!(matches!(
            parse_manifest(unknown_mode, "inline"),
            Err(BridgeError::Manifest { .. })
        ));

        let duplicate = r#"
[[features]]
name = "x"
[[features.actions]]
name = "a"
mode = "sync"
[[features.actions]]
name = "a"
mode = "async"
"#;
        assert!(parse_manifest(duplicate, "inline").is_err());
    }

    #[test]
    fn test_empty_manifest_declares_nothing() {
        assert!(parse_manifest("", "empty").unwrap().is_empty());
    }

    #[test]
    fn test_load_from_dir_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_sensor.toml"), SENSOR).unwrap();
        std::fs::write(dir.path().join("b_broken.toml"), "[[features]]\nname = 1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(
            dir.path().join("c_echo.toml"),
            "[[features]]\nname = \"echo\"\n[[features.actions]]\nname = \"echo\"\nmode = \"sync\"\n",
        )
        .unwrap();

        let features = load_manifests_from_dir(dir.path()).unwrap();
        let names: Vec<_> = features.iter().map(FeatureDescriptor::name).collect();
        assert_eq!(names, vec!["tizen.sensor", "echo"]);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_manifest(&dir.path().join("absent.toml")),
            Err(BridgeError::Io { .. })
        ));
        assert!(load_manifests_from_dir(&dir.path().join("absent")).is_err());
    }
}
