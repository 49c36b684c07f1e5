//! The script-facing side of the bridge.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use trellis_core::{AppId, CallbackHandle, InvocationRequest, RawParams, Response};

use crate::dispatcher::Dispatcher;
use crate::error::BridgeResult;
use crate::executor::ReadySignal;

/// Receives deferred and repeated deliveries on the script side.
///
/// Called from executor threads, never from inside an async task.
pub trait ScriptContext: Send + Sync {
    /// Hand `response` to the receiver identified by `handle`.
    fn deliver(&self, handle: &CallbackHandle, response: Response);
}

/// The envelope a delivery is serialized as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Callback token.
    pub callback: String,
    /// The delivered response.
    pub data: Response,
}

impl Delivery {
    /// Wrap a response for `handle`.
    #[must_use]
    pub fn new(handle: &CallbackHandle, data: Response) -> Self {
        Self {
            callback: handle.token().to_owned(),
            data,
        }
    }

    /// Serialize to a JSON string.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize delivery");
            format!(
                "{{\"callback\":{:?},\"data\":{}}}",
                self.callback,
                Response::generic_error("delivery serialization failed").to_json()
            )
        })
    }
}

/// A [`ScriptContext`] that forwards each delivery as a JSON envelope
/// string.
pub struct EnvelopeSink<F> {
    sink: F,
}

impl<F> EnvelopeSink<F>
where
    F: Fn(String) + Send + Sync,
{
    /// Forward envelopes to `sink`.
    pub fn new(sink: F) -> Self {
        Self { sink }
    }
}

impl<F> ScriptContext for EnvelopeSink<F>
where
    F: Fn(String) + Send + Sync,
{
    fn deliver(&self, handle: &CallbackHandle, response: Response) {
        (self.sink)(Delivery::new(handle, response).to_json_string());
    }
}

/// Where deliveries for one application go.
#[derive(Clone)]
pub struct ScriptTarget {
    script: Arc<dyn ScriptContext>,
    ready: ReadySignal,
}

impl ScriptTarget {
    /// Pair a script context with its readiness signal.
    #[must_use]
    pub fn new(script: Arc<dyn ScriptContext>, ready: ReadySignal) -> Self {
        Self { script, ready }
    }

    /// The readiness signal.
    #[must_use]
    pub fn ready(&self) -> &ReadySignal {
        &self.ready
    }

    pub(crate) fn deliver(&self, handle: &CallbackHandle, response: Response) {
        self.script.deliver(handle, response);
    }
}

impl fmt::Debug for ScriptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptTarget")
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

/// One application's connection to the dispatcher.
///
/// Created by [`Dispatcher::attach_app`].
pub struct ScriptBridge {
    dispatcher: Arc<Dispatcher>,
    app: AppId,
}

impl ScriptBridge {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, app: AppId) -> Self {
        Self { dispatcher, app }
    }

    /// The bound application.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app
    }

    /// Invoke `feature.action` and return the immediate response.
    ///
    /// Blocks for SYNC actions and for permission prompts on SYNC and
    /// SYNC_CALLBACK actions. Must not be called from inside an async task.
    pub fn dispatch(
        &self,
        feature: &str,
        action: &str,
        params: impl Into<RawParams>,
        callback: Option<CallbackHandle>,
    ) -> Response {
        let mut request =
            InvocationRequest::new(self.app.clone(), feature, action).with_params(params);
        if let Some(callback) = callback {
            request = request.with_callback(callback);
        }
        self.dispatcher.dispatch(request)
    }

    /// Metadata for every feature this application may use.
    #[must_use]
    pub fn feature_map(&self) -> serde_json::Value {
        self.dispatcher.feature_map(&self.app)
    }

    /// Mark the application as backgrounded or foregrounded.
    ///
    /// # Errors
    ///
    /// Fails if the application was detached meanwhile.
    pub fn set_background(&self, background: bool) -> BridgeResult<()> {
        self.dispatcher.set_background(&self.app, background)
    }

    /// Report whether the script context can take deliveries.
    ///
    /// # Errors
    ///
    /// Fails if the application was detached meanwhile.
    pub fn set_ready(&self, ready: bool) -> BridgeResult<()> {
        self.dispatcher.set_ready(&self.app, ready)
    }

    /// Dispose the application's instances and disconnect it.
    ///
    /// Returns the number of instances disposed.
    ///
    /// # Errors
    ///
    /// Fails if a graceful disposal times out.
    pub fn detach(self, force: bool) -> BridgeResult<usize> {
        self.dispatcher.detach_app(&self.app, force)
    }
}

impl fmt::Debug for ScriptBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptBridge")
            .field("app", &self.app)
            .finish_non_exhaustive()
    }
}
