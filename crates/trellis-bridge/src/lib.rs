//! Trellis Bridge - Routes script invocations to native features.
//!
//! A script calls `feature.action(params, callback)`; the bridge resolves the
//! action, checks permissions, finds or builds the feature instance for the
//! calling application and runs it in the action's mode. Results reach the
//! script either as the immediate response or later through its callback
//! handle.
//!
//! The moving parts:
//!
//! - [`ActionRegistry`]: immutable table of declared features and actions
//! - [`ExtensionInstanceManager`]: one instance per feature and application
//! - [`CallbackRegistry`]: live callback handles and ordered delivery
//! - [`AsyncInvocationExecutor`]: work off the script thread
//! - [`Dispatcher`]: the state machine tying them together
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis_bridge::prelude::*;
//! use trellis_core::{ActionDescriptor, AppId, ApplicationContext, FeatureDescriptor, Mode};
//!
//! struct Echo;
//!
//! impl Feature for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn invoke(&self, request: &FeatureRequest) -> trellis_core::FeatureResult<Response> {
//!         Ok(Response::json(request.params().as_json().cloned().unwrap_or_default()))
//!     }
//! }
//!
//! # fn main() -> BridgeResult<()> {
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let mut builder = BridgeBuilder::new();
//! builder.runtime(runtime.handle().clone()).register_feature(
//!     FeatureDescriptor::new("echo").with_action(ActionDescriptor::builder("echo", Mode::Sync).build()),
//!     |_app| Ok(Arc::new(Echo) as Arc<dyn Feature>),
//! )?;
//! let dispatcher = builder.build()?;
//!
//! let app = ApplicationContext::new(AppId::new("com.example.app").expect("valid id"));
//! let script = Arc::new(EnvelopeSink::new(|envelope| println!("{envelope}")));
//! let bridge = dispatcher.attach_app(app, script)?;
//! let response = bridge.dispatch("echo", "echo", r#"{"hello":"world"}"#, None);
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod builder;
pub mod callback;
pub mod dispatcher;
/// Error types and results for the bridge.
pub mod error;
pub mod executor;
pub mod feature;
pub mod instance;
pub mod manifest;
pub mod registry;
pub mod script;

pub use builder::{BridgeBuilder, BridgeSettings};
pub use callback::{CallbackKey, CallbackRegistry, CallbackSender, CallbackSlot, InstanceId};
pub use dispatcher::{DispatchPhase, Dispatcher};
pub use error::{
    BridgeError, BridgeResult, InstanceError, InstanceResult, RegistryError, RegistryResult,
};
pub use executor::{AsyncInvocationExecutor, DelayedTask, LaneId, ReadySignal};
pub use feature::{Feature, FeatureFactories, FeatureFactory, FeatureRequest};
pub use instance::{ExtensionInstance, ExtensionInstanceManager, InstanceLease};
pub use manifest::{load_manifest, load_manifests_from_dir, parse_manifest};
pub use registry::{ActionRegistry, RegistryBuilder};
pub use script::{Delivery, EnvelopeSink, ScriptBridge, ScriptContext, ScriptTarget};
