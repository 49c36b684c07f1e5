//! Convenience re-exports for `use trellis_telemetry::prelude::*`.

pub use crate::{
    LogConfig, LogFormat, LogGuard, LogTarget, RequestContext, RequestGuard, TelemetryError,
    TelemetryResult, setup_logging,
};
