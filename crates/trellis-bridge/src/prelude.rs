//! Prelude module - commonly used types for convenient import.
//!
//! Use `use trellis_bridge::prelude::*;` to import all essential types.

pub use crate::{BridgeBuilder, BridgeError, BridgeResult, BridgeSettings, Dispatcher};

pub use crate::{CallbackSender, Feature, FeatureFactories, FeatureRequest};

pub use crate::{EnvelopeSink, ScriptBridge, ScriptContext};

pub use trellis_core::{CallbackHandle, InvocationRequest, Response, StatusCode};
