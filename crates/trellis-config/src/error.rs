//! Errors from loading and validating configuration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving the layered bridge configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config layer exists but could not be read.
    #[error("cannot read config layer {}: {source}", path.display())]
    Read {
        /// Layer file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A layer (or the merged result) is not valid TOML for [`crate::Config`].
    #[error("malformed config in {origin}: {source}")]
    Parse {
        /// File path, or a placeholder such as `<embedded defaults>`.
        origin: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A layer file exceeds the size cap.
    #[error("config layer {} is {size} bytes (limit {limit})", path.display())]
    TooLarge {
        /// Layer file.
        path: PathBuf,
        /// Actual size in bytes.
        size: u64,
        /// Maximum accepted size in bytes.
        limit: u64,
    },

    /// A resolved value is out of range.
    #[error("invalid value for '{field}': {message}")]
    Invalid {
        /// Dotted field path, e.g. `permissions.prompt_timeout_secs`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `TRELLIS_*` override could not be coerced.
    #[error("bad override in {var}: {message}")]
    Env {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
