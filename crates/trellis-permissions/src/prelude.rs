//! Prelude module - commonly used types for convenient import.
//!
//! Use `use trellis_permissions::prelude::*;` to import all essential types.

pub use crate::{
    GateConfig, GateOutcome, GrantStore, HostDecision, PendingDecision, PermissionError,
    PermissionGate, PermissionHost, PermissionResult, UserDecision,
};
