//! Prelude module - commonly used types for convenient import.
//!
//! Use `use trellis_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult, FeatureError, FeatureResult};

// Descriptors
pub use crate::{
    Access, ActionDescriptor, ActionType, FeatureDescriptor, Mode, Multiplicity, Normalize,
    PromptStrategy, ResidentType,
};

// Invocation
pub use crate::{AppId, ApplicationContext, CallbackHandle, InvocationRequest, Params, RawParams};

// Responses
pub use crate::{Payload, Response, StatusCode};
