//! Prelude module - commonly used test utilities.
//!
//! Use `use trellis_test::prelude::*;` to import all essential types.

pub use crate::{
    DELIVERY_TIMEOUT, EmitterHandle, MockPermissionHost, Probe, RecordedDelivery,
    RecordingScriptContext, TestBridge, init_test_logging, test_app, test_app_id,
};
