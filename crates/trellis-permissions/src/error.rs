/// Reasons a permission check refused an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    /// The host or a remembered decision denies the permission.
    #[error("permission denied: {permission}")]
    Denied {
        /// The refused permission.
        permission: String,
    },

    /// The user rejected the prompt.
    #[error("permission rejected by user: {permission}")]
    Rejected {
        /// The refused permission.
        permission: String,
    },

    /// The user dismissed the prompt without answering.
    #[error("permission prompt dismissed: {permission}")]
    Dismissed {
        /// The unanswered permission.
        permission: String,
    },

    /// The prompt was not answered in time.
    #[error("permission prompt timed out after {timeout_secs}s: {permission}")]
    Timeout {
        /// The unanswered permission.
        permission: String,
        /// Configured timeout, in seconds.
        timeout_secs: u64,
    },
}

impl PermissionError {
    /// The permission this error is about.
    #[must_use]
    pub fn permission(&self) -> &str {
        match self {
            Self::Denied { permission }
            | Self::Rejected { permission }
            | Self::Dismissed { permission }
            | Self::Timeout { permission, .. } => permission,
        }
    }
}

/// Result type for permission checks.
pub type PermissionResult<T> = Result<T, PermissionError>;
