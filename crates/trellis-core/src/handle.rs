//! Callback handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token the script side sends when it has no receiver.
pub const UNSET_CALLBACK: &str = "-1";

/// Opaque token naming a script-side receiver.
///
/// An invalid handle (empty or [`UNSET_CALLBACK`]) passed to a CALLBACK
/// action means "unsubscribe", not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(String);

impl CallbackHandle {
    /// Wrap a script-provided token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The unset sentinel.
    #[must_use]
    pub fn unset() -> Self {
        Self(UNSET_CALLBACK.to_string())
    }

    /// The raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Whether this handle names a live receiver.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0 != UNSET_CALLBACK
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallbackHandle {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for CallbackHandle {
    fn from(token: String) -> Self {
        Self(token)
    }
}
