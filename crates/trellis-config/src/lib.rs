#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Layered configuration for the Trellis bridge.
//!
//! This crate provides a single [`Config`] type covering the executor,
//! permission gate, instance lifecycle, script readiness and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use trellis_config::Config;
//!
//! // Load with full precedence chain (defaults → system → user → env).
//! let resolved = Config::load().unwrap();
//! println!("prompt timeout: {}s", resolved.config.permissions.prompt_timeout_secs);
//! ```
//!
//! # Layers
//!
//! Later layers win. Listed strongest first:
//!
//! 1. **Environment variables** (`TRELLIS_*`)
//! 2. **Explicit file** (passed by the embedding host)
//! 3. **User** (`$TRELLIS_HOME/config.toml` or the platform config dir)
//! 4. **System** (`/etc/trellis/config.toml`)
//! 5. **Defaults** (`defaults.toml`, embedded at build time)
//!
//! # Design
//!
//! This crate has **no dependencies on other internal trellis crates**.
//! Conversion from config types to runtime settings happens in the crates
//! that own those settings.

/// Environment variable overrides.
pub mod env;
pub mod error;
/// Layer discovery and the resolve pipeline.
pub mod loader;
/// Layered configuration merging.
pub mod merge;
/// Section structs.
pub mod types;
/// Range checks on the merged result.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{LoadOptions, ResolvedConfig};
pub use types::*;

impl Config {
    /// Resolve every layer from the default locations.
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable or malformed layer, a bad `TRELLIS_*`
    /// override, or an out-of-range value.
    pub fn load() -> ConfigResult<ResolvedConfig> {
        loader::load(&LoadOptions::default())
    }

    /// Like [`Config::load`], with the layer locations and environment
    /// supplied by the caller. See [`loader::load`].
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_with(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
        loader::load(options)
    }

    /// Load a single file over the embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
