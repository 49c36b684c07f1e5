//! Trellis Telemetry - logging setup and request correlation.
//!
//! This crate provides:
//! - [`LogConfig`] and [`setup_logging`] to install a `tracing` subscriber
//!   writing pretty, compact, JSON or full output to stdout, stderr or
//!   rolling files
//! - [`RequestContext`] to correlate a dispatch with the prompts and
//!   deliveries it causes
//! - with the `config` feature, `LogConfig::try_from(&LoggingSection)`
//!
//! # Example
//!
//! ```rust,no_run
//! use trellis_telemetry::{LogConfig, LogFormat, RequestContext, RequestGuard, setup_logging};
//!
//! # fn main() -> Result<(), trellis_telemetry::TelemetryError> {
//! let _guard = setup_logging(
//!     &LogConfig::new("info")
//!         .with_format(LogFormat::Compact)
//!         .with_directive("trellis_bridge=debug"),
//! )?;
//!
//! let _request = RequestGuard::new(
//!     RequestContext::new("dispatch")
//!         .with_app("com.example.notes")
//!         .with_operation("service.ping"),
//! );
//! tracing::info!("dispatching");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
#[cfg(feature = "config")]
mod from_config;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogGuard, LogTarget,
    setup_default_logging, setup_logging,
};
