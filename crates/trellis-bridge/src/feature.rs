//! The feature implementation interface and the factory table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use trellis_core::{
    ActionDescriptor, ApplicationContext, FeatureResult, Mode, Params, RequestId, Response,
};

use crate::callback::{CallbackSender, InstanceId};

/// A host capability exposed to scripts.
///
/// One value backs one feature for one application. Hooks other than
/// [`invoke`](Feature::invoke) default to doing nothing. Every hook may fail
/// or panic; the bridge contains both.
pub trait Feature: Send + Sync {
    /// The feature name this implementation serves.
    fn name(&self) -> &str;

    /// Runs once, right after construction and before the first call.
    fn initialize(&self, _app: &ApplicationContext) -> FeatureResult<()> {
        Ok(())
    }

    /// Receives the application's parameters for this feature, if any.
    fn configure(&self, _params: Option<&Value>) -> FeatureResult<()> {
        Ok(())
    }

    /// Execute one action.
    ///
    /// For CALLBACK actions the returned value only matters when it is an
    /// error; results reach the script through
    /// [`FeatureRequest::callback`].
    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response>;

    /// Tear down. `force` means calls may still be running.
    fn dispose(&self, _force: bool) {}
}

/// Builds a feature for an application.
pub type FeatureFactory =
    Arc<dyn Fn(&ApplicationContext) -> FeatureResult<Arc<dyn Feature>> + Send + Sync>;

/// Everything a feature sees about one call.
pub struct FeatureRequest {
    descriptor: Arc<ActionDescriptor>,
    params: Params,
    app: Arc<ApplicationContext>,
    instance: InstanceId,
    request_id: RequestId,
    callback: CallbackSender,
}

impl FeatureRequest {
    pub(crate) fn new(
        descriptor: Arc<ActionDescriptor>,
        params: Params,
        app: Arc<ApplicationContext>,
        instance: InstanceId,
        request_id: RequestId,
        callback: CallbackSender,
    ) -> Self {
        Self {
            descriptor,
            params,
            app,
            instance,
            request_id,
            callback,
        }
    }

    /// Canonical action name, even when the script used the alias.
    #[must_use]
    pub fn action(&self) -> &str {
        self.descriptor.name()
    }

    /// Declared invocation mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.descriptor.mode()
    }

    /// The action's declaration.
    #[must_use]
    pub fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    /// Normalized parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Calling application.
    #[must_use]
    pub fn app(&self) -> &ApplicationContext {
        &self.app
    }

    /// Instance serving the call.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// Id of the originating request.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Sender for deferred or repeated deliveries. Clone it to keep
    /// delivering after `invoke` returns.
    #[must_use]
    pub fn callback(&self) -> &CallbackSender {
        &self.callback
    }
}

impl fmt::Debug for FeatureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRequest")
            .field("feature", &self.descriptor.feature())
            .field("action", &self.action())
            .field("app", self.app.app_id())
            .field("instance", &self.instance)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Maps feature names to their constructors.
#[derive(Clone, Default)]
pub struct FeatureFactories {
    table: HashMap<String, FeatureFactory>,
}

impl FeatureFactories {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the constructor for `feature`, replacing any earlier one.
    pub fn register<F>(&mut self, feature: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ApplicationContext) -> FeatureResult<Arc<dyn Feature>> + Send + Sync + 'static,
    {
        self.table.insert(feature.into(), Arc::new(factory));
        self
    }

    /// The constructor for `feature`.
    #[must_use]
    pub fn get(&self, feature: &str) -> Option<&FeatureFactory> {
        self.table.get(feature)
    }

    /// Whether `feature` has a constructor.
    #[must_use]
    pub fn contains(&self, feature: &str) -> bool {
        self.table.contains_key(feature)
    }

    /// Registered feature names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

impl fmt::Debug for FeatureFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("FeatureFactories")
            .field("features", &names)
            .finish()
    }
}
