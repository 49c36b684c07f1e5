//! Error types shared across the bridge crates.

use thiserror::Error;

use crate::response::{Response, StatusCode};

/// Errors raised while building or validating core bridge types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An application identifier failed validation.
    #[error("invalid application id: {0}")]
    InvalidAppId(String),

    /// An action descriptor is incoherent.
    #[error("invalid descriptor {feature}.{action}: {reason}")]
    InvalidDescriptor {
        /// Feature the action belongs to.
        feature: String,
        /// The offending action name.
        action: String,
        /// Why the descriptor was rejected.
        reason: String,
    },

    /// A raw parameter payload could not be normalized.
    #[error("malformed parameters: {0}")]
    Serialization(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failures reported by feature implementations.
///
/// The dispatcher converts every variant into a [`Response`]; nothing raised
/// by a feature reaches the script caller as an error.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The request parameters were unusable.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The backing service cannot be reached right now.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Generic failure inside the feature.
    #[error("{0}")]
    Failed(String),

    /// JSON handling inside the feature failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeatureError {
    /// The response status this failure maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::IllegalArgument(_) => StatusCode::IllegalArgument,
            Self::Unavailable(_) => StatusCode::ServiceUnavailable,
            Self::Failed(_) | Self::Json(_) => StatusCode::GenericError,
        }
    }
}

impl From<FeatureError> for Response {
    fn from(err: FeatureError) -> Self {
        Response::error(err.status(), err.to_string())
    }
}

impl From<CoreError> for FeatureError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Serialization(msg) => Self::IllegalArgument(msg),
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Result type for feature implementations.
pub type FeatureResult<T> = Result<T, FeatureError>;
