//! Trellis Core - Foundation types for the Trellis host/script feature bridge.
//!
//! This crate provides:
//! - Feature and action descriptors (modes, types, access, permissions)
//! - Invocation requests and normalized parameters
//! - The [`Response`] wire shape and its status codes
//! - Callback handles identifying script-side receivers
//! - Application contexts and their validated identifiers
//! - Error types shared by the runtime crates

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod app;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod request;
pub mod response;

pub use app::{AppId, ApplicationContext};
pub use descriptor::{
    ACTION_INIT, Access, ActionDescriptor, ActionDescriptorBuilder, ActionType,
    FeatureDescriptor, Mode, Multiplicity, Normalize, PromptStrategy, ResidentType,
};
pub use error::{CoreError, CoreResult, FeatureError, FeatureResult};
pub use handle::{CallbackHandle, UNSET_CALLBACK};
pub use request::{InvocationRequest, Params, RawParams, RequestId};
pub use response::{Payload, Response, StatusCode};
