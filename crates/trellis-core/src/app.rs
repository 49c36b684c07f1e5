//! Application identity and context.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Validated application identifier.
///
/// Non-empty, ASCII alphanumerics plus `.`, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AppId(String);

impl<'de> Deserialize<'de> for AppId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl AppId {
    /// Create a validated application id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidAppId`] if the id is empty or contains
    /// characters outside the allowed set.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> CoreResult<()> {
        if id.is_empty() {
            return Err(CoreError::InvalidAppId("app id cannot be empty".into()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(CoreError::InvalidAppId(format!(
                "app id must contain only ASCII alphanumerics, '.', '_' or '-', got: {id}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Everything the bridge knows about the application a script belongs to.
///
/// Shared as `Arc<ApplicationContext>` by the bridge and handed to feature
/// factories and hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationContext {
    app_id: AppId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    declared_features: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    feature_params: HashMap<String, serde_json::Value>,
}

impl ApplicationContext {
    /// A context that declares no feature list, so every feature is usable.
    #[must_use]
    pub fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            declared_features: None,
            feature_params: HashMap::new(),
        }
    }

    /// Restrict the application to the listed features.
    #[must_use]
    pub fn with_declared_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared_features = Some(features.into_iter().map(Into::into).collect());
        self
    }

    /// Attach configuration parameters for one feature.
    #[must_use]
    pub fn with_feature_params(
        mut self,
        feature: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        self.feature_params.insert(feature.into(), params);
        self
    }

    /// Wrap in an `Arc` for sharing.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The application id.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// The declared feature set, if the application restricts it.
    #[must_use]
    pub fn declared_features(&self) -> Option<&BTreeSet<String>> {
        self.declared_features.as_ref()
    }

    /// Whether the application may use `feature`.
    #[must_use]
    pub fn declares(&self, feature: &str) -> bool {
        self.declared_features
            .as_ref()
            .is_none_or(|set| set.contains(feature))
    }

    /// Configuration parameters for `feature`, if any.
    #[must_use]
    pub fn feature_params(&self, feature: &str) -> Option<&serde_json::Value> {
        self.feature_params.get(feature)
    }
}
