//! Trellis Permissions - Permission gating for feature invocations.
//!
//! Every action declares the permissions it needs. Before the bridge touches
//! a feature instance it asks the [`PermissionGate`], which answers from
//! three sources in order:
//!
//! 1. Decisions the user asked to remember ([`GrantStore`])
//! 2. The host's own permission state ([`PermissionHost::check_permissions`])
//! 3. A user prompt ([`PermissionHost::prompt_user`]), one dialog at a time
//!
//! The first two are answered immediately. A prompt yields a
//! [`PendingDecision`] that the caller resolves when it is ready to wait.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::{AppId, PromptStrategy};
//! use trellis_permissions::{GateOutcome, HostDecision, PermissionGate, PermissionHost, UserDecision};
//!
//! struct AlwaysGranted;
//!
//! #[async_trait::async_trait]
//! impl PermissionHost for AlwaysGranted {
//!     fn check_permissions(&self, _app: &AppId, permissions: &[String]) -> Vec<HostDecision> {
//!         vec![HostDecision::Granted; permissions.len()]
//!     }
//!
//!     async fn prompt_user(&self, _app: &AppId, _permission: &str) -> Option<UserDecision> {
//!         None
//!     }
//! }
//!
//! let gate = PermissionGate::new(Arc::new(AlwaysGranted));
//! let app = AppId::new("demo").unwrap();
//! let outcome = gate.check(&app, &["location".to_string()], PromptStrategy::FirstTime);
//! assert!(matches!(outcome, GateOutcome::Grant));
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

/// Error types and results for the permission module.
pub mod error;
pub mod gate;
pub mod host;
pub mod store;

pub use error::{PermissionError, PermissionResult};
pub use gate::{GateConfig, GateOutcome, PendingDecision, PermissionGate};
pub use host::{HostDecision, PermissionHost, UserDecision};
pub use store::GrantStore;
