//! Invocation requests and parameter normalization.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::app::AppId;
use crate::descriptor::Normalize;
use crate::error::{CoreError, CoreResult, FeatureError, FeatureResult};
use crate::handle::CallbackHandle;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate the next id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Parameters exactly as the script sent them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RawParams {
    /// No parameters.
    #[default]
    None,
    /// A text payload, usually JSON.
    Text(String),
    /// A binary payload.
    Bytes(Vec<u8>),
}

impl From<&str> for RawParams {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RawParams {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for RawParams {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<serde_json::Value> for RawParams {
    fn from(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

impl RawParams {
    /// Convert into [`Params`] according to the action's normalization.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] when JSON normalization is asked
    /// for and the payload is binary or not valid JSON.
    pub fn normalize(self, normalize: Normalize) -> CoreResult<Params> {
        match (normalize, self) {
            (_, Self::None) => Ok(Params::None),
            (Normalize::Raw, Self::Text(text)) => Ok(Params::Text(text)),
            (Normalize::Raw, Self::Bytes(bytes)) => Ok(Params::Bytes(bytes)),
            (Normalize::Json, Self::Text(text)) => {
                if text.trim().is_empty() {
                    return Ok(Params::None);
                }
                serde_json::from_str(&text)
                    .map(Params::Json)
                    .map_err(|e| CoreError::Serialization(e.to_string()))
            },
            (Normalize::Json, Self::Bytes(_)) => Err(CoreError::Serialization(
                "binary payload sent to a JSON action".into(),
            )),
        }
    }
}

/// Parameters after normalization, as features see them.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// No parameters were sent.
    #[default]
    None,
    /// Parsed JSON.
    Json(serde_json::Value),
    /// Raw text, passed through.
    Text(String),
    /// Raw bytes, passed through.
    Bytes(Vec<u8>),
}

impl Params {
    /// The JSON value, if normalized as JSON.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// A field of a JSON object payload.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.as_json().and_then(|value| value.get(key))
    }

    /// Deserialize the parameters into a typed value.
    ///
    /// Missing parameters deserialize from `null`, so `Option<T>` and unit
    /// targets accept them.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::IllegalArgument`] when the payload does not
    /// match `T` or is binary.
    pub fn deserialize<T: DeserializeOwned>(&self) -> FeatureResult<T> {
        let parsed = match self {
            Self::None => serde_json::from_value(serde_json::Value::Null),
            Self::Json(value) => T::deserialize(value),
            Self::Text(text) => serde_json::from_str(text),
            Self::Bytes(_) => {
                return Err(FeatureError::IllegalArgument(
                    "binary parameters cannot be deserialized".into(),
                ));
            },
        };
        parsed.map_err(|e| FeatureError::IllegalArgument(e.to_string()))
    }
}

/// One call from the script context.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    id: RequestId,
    app_id: AppId,
    feature: String,
    action: String,
    params: RawParams,
    callback: Option<CallbackHandle>,
}

impl InvocationRequest {
    /// A request with no parameters and no callback.
    #[must_use]
    pub fn new(app_id: AppId, feature: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            app_id,
            feature: feature.into(),
            action: action.into(),
            params: RawParams::None,
            callback: None,
        }
    }

    /// Attach raw parameters.
    #[must_use]
    pub fn with_params(mut self, params: impl Into<RawParams>) -> Self {
        self.params = params.into();
        self
    }

    /// Attach a callback handle.
    #[must_use]
    pub fn with_callback(mut self, callback: impl Into<CallbackHandle>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    /// Request id.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Owning application.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Target feature.
    #[must_use]
    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Target action or alias.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Raw parameters.
    #[must_use]
    pub fn params(&self) -> &RawParams {
        &self.params
    }

    /// Supplied callback handle, valid or not.
    #[must_use]
    pub fn callback(&self) -> Option<&CallbackHandle> {
        self.callback.as_ref()
    }

    /// Take the raw parameters out, leaving [`RawParams::None`].
    pub fn take_params(&mut self) -> RawParams {
        std::mem::take(&mut self.params)
    }
}
