//! Error types for the bridge.

use thiserror::Error;
use trellis_core::{AppId, CoreError, FeatureError};

/// Registration-time failures. These abort startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The feature name is taken by a different declaration.
    #[error("feature '{feature}' is already registered with a different declaration")]
    ConflictingFeature {
        /// Feature name.
        feature: String,
    },

    /// A descriptor failed validation.
    #[error(transparent)]
    InvalidDescriptor(#[from] CoreError),

    /// A declared feature has nothing to construct it.
    #[error("feature '{feature}' is declared but has no factory")]
    MissingFactory {
        /// Feature name.
        feature: String,
    },

    /// Lookup miss.
    #[error("no action '{action}' on feature '{feature}'")]
    NotFound {
        /// Requested feature.
        feature: String,
        /// Requested action or alias.
        action: String,
    },
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Instance lifecycle failures.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// No factory is known for the feature.
    #[error("feature '{0}' is not registered")]
    FeatureNotRegistered(String),

    /// The factory or one of the setup hooks failed.
    #[error("failed to create '{feature}' for {app}: {source}")]
    Factory {
        /// Feature name.
        feature: String,
        /// Owning application.
        app: AppId,
        /// What went wrong.
        #[source]
        source: FeatureError,
    },

    /// A graceful disposal timed out waiting for calls to finish.
    #[error("'{feature}' for {app} still has {in_flight} call(s) in flight")]
    Busy {
        /// Feature name.
        feature: String,
        /// Owning application.
        app: AppId,
        /// Calls still running when the wait gave up.
        in_flight: usize,
    },
}

/// Result type for instance operations.
pub type InstanceResult<T> = Result<T, InstanceError>;

/// Top-level bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Instance failure.
    #[error(transparent)]
    Instance(#[from] InstanceError),

    /// A feature manifest did not parse.
    #[error("invalid feature manifest {path}: {message}")]
    Manifest {
        /// Manifest path.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A feature manifest could not be read.
    #[error("failed to read feature manifest {path}: {source}")]
    Io {
        /// Manifest path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The application already has a bridge.
    #[error("application '{0}' is already attached")]
    AppAlreadyAttached(AppId),

    /// The application has no bridge.
    #[error("application '{0}' is not attached")]
    UnknownApp(AppId),

    /// No tokio runtime was supplied or found.
    #[error("no tokio runtime available: {0}")]
    Runtime(String),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
