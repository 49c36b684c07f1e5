//! The host side of permission handling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trellis_core::AppId;

/// The host's current answer for one permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostDecision {
    /// Already granted.
    Granted,
    /// Refused outright; no prompt will change it.
    Denied,
    /// Unknown; the user must be asked.
    Undetermined,
}

/// The user's answer to a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDecision {
    /// Whether the permission was granted.
    pub granted: bool,
    /// Whether the answer should be reused for later checks.
    pub remember: bool,
}

impl UserDecision {
    /// Grant this once.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            granted: true,
            remember: false,
        }
    }

    /// Grant and remember.
    #[must_use]
    pub const fn allow_always() -> Self {
        Self {
            granted: true,
            remember: true,
        }
    }

    /// Reject this once.
    #[must_use]
    pub const fn deny() -> Self {
        Self {
            granted: false,
            remember: false,
        }
    }

    /// Reject and remember.
    #[must_use]
    pub const fn deny_always() -> Self {
        Self {
            granted: false,
            remember: true,
        }
    }
}

/// Host integration consulted by the [`PermissionGate`](crate::PermissionGate).
///
/// Different platforms implement this with their own permission model and
/// dialog UX.
#[async_trait]
pub trait PermissionHost: Send + Sync {
    /// Current state of each permission, in the order given.
    ///
    /// A shorter result leaves the missing permissions undetermined.
    fn check_permissions(&self, app: &AppId, permissions: &[String]) -> Vec<HostDecision>;

    /// Ask the user about one permission and wait for the answer.
    ///
    /// Returns `None` if the dialog was dismissed.
    async fn prompt_user(&self, app: &AppId, permission: &str) -> Option<UserDecision>;
}
