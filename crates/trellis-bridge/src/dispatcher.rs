//! The dispatcher: one invocation from request to response.
//!
//! ```text
//! RECEIVED -> PERMISSION_CHECK -> DENIED -> RESPONDED
//!                              -> GRANTED -> RESOLVE_INSTANCE -> EXECUTE -> RESPONDED
//! ```
//!
//! The action is looked up before the permission check since its
//! descriptor names the permissions. The instance is only resolved once the
//! check passes. What EXECUTE does depends on the action's mode:
//!
//! | mode          | where it runs    | immediate response | later deliveries |
//! |---------------|------------------|--------------------|------------------|
//! | SYNC          | calling thread   | the result         | none             |
//! | ASYNC         | executor         | ack                | exactly one      |
//! | CALLBACK      | executor         | ack                | zero or more     |
//! | SYNC_CALLBACK | calling thread   | the result         | zero or more     |

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, error, info, trace, warn};
use trellis_core::{
    ActionDescriptor, AppId, ApplicationContext, CallbackHandle, InvocationRequest, Mode, Params,
    RequestId, ResidentType, Response,
};
use trellis_permissions::{GateOutcome, PendingDecision, PermissionGate};
use trellis_telemetry::{RequestContext, RequestGuard};

use crate::builder::BridgeSettings;
use crate::callback::{CallbackKey, CallbackRegistry, CallbackSender, Closing};
use crate::error::{BridgeError, BridgeResult};
use crate::executor::{AsyncInvocationExecutor, DelayedTask, ReadySignal};
use crate::feature::{Feature, FeatureRequest};
use crate::instance::{ExtensionInstanceManager, InstanceLease, panic_message};
use crate::registry::ActionRegistry;
use crate::script::{ScriptBridge, ScriptContext, ScriptTarget};

/// Dispatch state, traced at `trace` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Request accepted.
    Received,
    /// Asking the permission gate.
    PermissionCheck,
    /// The gate refused.
    Denied,
    /// The gate allowed.
    Granted,
    /// Finding or building the instance.
    ResolveInstance,
    /// Running the feature.
    Execute,
    /// A response was produced.
    Responded,
}

#[derive(Clone)]
struct AppState {
    context: Arc<ApplicationContext>,
    target: ScriptTarget,
    background: Arc<AtomicBool>,
}

/// Everything EXECUTE needs, detached from the request.
struct Call {
    app: AppState,
    descriptor: Arc<ActionDescriptor>,
    params: Params,
    request_id: RequestId,
    callback: Option<CallbackHandle>,
}

impl Call {
    fn feature(&self) -> &str {
        self.descriptor.feature()
    }

    fn action(&self) -> &str {
        self.descriptor.name()
    }

    /// The supplied handle, if it is usable.
    fn live_handle(&self) -> Option<&CallbackHandle> {
        self.callback.as_ref().filter(|h| h.is_valid())
    }
}

/// Routes script invocations to features.
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    gate: Arc<PermissionGate>,
    instances: Arc<ExtensionInstanceManager>,
    callbacks: Arc<CallbackRegistry>,
    executor: Arc<AsyncInvocationExecutor>,
    settings: BridgeSettings,
    apps: DashMap<AppId, AppState>,
    deferred: DashMap<AppId, Vec<DelayedTask>>,
}

impl Dispatcher {
    /// Wire a dispatcher from its parts. [`BridgeBuilder`](crate::BridgeBuilder)
    /// is the usual way to get one.
    #[must_use]
    pub fn new(
        registry: Arc<ActionRegistry>,
        gate: Arc<PermissionGate>,
        instances: Arc<ExtensionInstanceManager>,
        callbacks: Arc<CallbackRegistry>,
        executor: Arc<AsyncInvocationExecutor>,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            gate,
            instances,
            callbacks,
            executor,
            settings,
            apps: DashMap::new(),
            deferred: DashMap::new(),
        })
    }

    /// The action registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// The permission gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    /// The instance manager.
    #[must_use]
    pub fn instances(&self) -> &Arc<ExtensionInstanceManager> {
        &self.instances
    }

    /// The callback registry.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// The executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<AsyncInvocationExecutor> {
        &self.executor
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Connect an application and its script context.
    ///
    /// The application starts ready for deliveries unless
    /// `defer_until_ready` is set, in which case it waits for
    /// [`ScriptBridge::set_ready`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::AppAlreadyAttached`] if the id is in use.
    pub fn attach_app(
        self: &Arc<Self>,
        context: ApplicationContext,
        script: Arc<dyn ScriptContext>,
    ) -> BridgeResult<ScriptBridge> {
        let app_id = context.app_id().clone();
        let ready = ReadySignal::new(!self.settings.defer_until_ready);
        let state = AppState {
            context: context.into_shared(),
            target: ScriptTarget::new(script, ready),
            background: Arc::new(AtomicBool::new(false)),
        };

        match self.apps.entry(app_id.clone()) {
            Entry::Occupied(_) => return Err(BridgeError::AppAlreadyAttached(app_id)),
            Entry::Vacant(slot) => {
                slot.insert(state);
            },
        }
        info!(app = %app_id, "Application attached");
        Ok(ScriptBridge::new(Arc::clone(self), app_id))
    }

    /// Disconnect an application and dispose its instances.
    ///
    /// Pending deferred work for the application is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownApp`] if the application is not
    /// attached, or an instance error if a graceful disposal times out. In
    /// the latter case the application stays attached.
    pub fn detach_app(&self, app: &AppId, force: bool) -> BridgeResult<usize> {
        if !self.apps.contains_key(app) {
            return Err(BridgeError::UnknownApp(app.clone()));
        }
        if let Some((_, tasks)) = self.deferred.remove(app) {
            tasks.iter().for_each(DelayedTask::cancel);
        }
        let disposed = self.instances.dispose_app(app, force)?;
        self.apps.remove(app);
        info!(app = %app, disposed, "Application detached");
        Ok(disposed)
    }

    /// Mark an application as running in the background.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownApp`] if the application is not
    /// attached.
    pub fn set_background(&self, app: &AppId, background: bool) -> BridgeResult<()> {
        let state = self.app(app)?;
        state.background.store(background, Ordering::SeqCst);
        debug!(app = %app, background, "Application residency changed");
        Ok(())
    }

    /// Report whether an application's script context can take deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownApp`] if the application is not
    /// attached.
    pub fn set_ready(&self, app: &AppId, ready: bool) -> BridgeResult<()> {
        self.app(app)?.target.ready().set(ready);
        Ok(())
    }

    /// Feature metadata for an application, limited to what it declares.
    #[must_use]
    pub fn feature_map(&self, app: &AppId) -> serde_json::Value {
        let context = self.apps.get(app).map(|s| Arc::clone(&s.context));
        self.registry.feature_map_json(|feature| {
            context
                .as_ref()
                .is_some_and(|c| c.declares(feature))
        })
    }

    /// Dispose everything and stop the executor.
    ///
    /// # Errors
    ///
    /// Returns the first instance error from a graceful disposal. The
    /// executor is stopped regardless.
    pub fn shutdown(&self, force: bool) -> BridgeResult<usize> {
        for entry in self.deferred.iter() {
            entry.value().iter().for_each(DelayedTask::cancel);
        }
        self.deferred.clear();
        let disposed = self.instances.dispose_all(force);
        self.executor.shutdown();
        info!(force, "Dispatcher shut down");
        disposed.map_err(BridgeError::from)
    }

    /// Handle one invocation and return its immediate response.
    ///
    /// Never panics on feature failure; every failure becomes a response.
    /// Blocks for SYNC actions and for permission prompts on SYNC and
    /// SYNC_CALLBACK actions, so it must not be called from inside an async
    /// task.
    pub fn dispatch(self: &Arc<Self>, mut request: InvocationRequest) -> Response {
        let _request = RequestGuard::new(
            RequestContext::new("dispatch")
                .with_app(request.app_id().as_str())
                .with_operation(format!("{}.{}", request.feature(), request.action()))
                .with_tag("request", request.id().to_string()),
        );
        trace!(phase = ?DispatchPhase::Received);

        let response = self.route(&mut request);
        trace!(phase = ?DispatchPhase::Responded, status = %response.status());
        response
    }

    fn route(self: &Arc<Self>, request: &mut InvocationRequest) -> Response {
        let app = match self.app(request.app_id()) {
            Ok(app) => app,
            Err(e) => return Response::not_found(e.to_string()),
        };

        let descriptor = match self.registry.lookup(request.feature(), request.action()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(error = %e, "Unknown action");
                return Response::not_found(e.to_string());
            },
        };
        debug!(
            feature = %descriptor.feature(),
            action = %descriptor.name(),
            mode = ?descriptor.mode(),
            "Dispatching"
        );

        // An explicitly invalid handle on a CALLBACK action is an
        // unsubscribe. It needs no permission and never builds an instance.
        if descriptor.mode() == Mode::Callback
            && let Some(handle) = request.callback().filter(|h| !h.is_valid())
        {
            return self.unsubscribe(&app, &descriptor, handle);
        }

        if !app.context.declares(descriptor.feature()) {
            return Response::no_permission(format!(
                "feature '{}' is not declared by the application",
                descriptor.feature()
            ));
        }

        if app.background.load(Ordering::SeqCst) && descriptor.resident() == ResidentType::None {
            return Response::no_permission(format!(
                "{}.{} is not available in the background",
                descriptor.feature(),
                descriptor.name()
            ));
        }

        let params = match request.take_params().normalize(descriptor.normalize()) {
            Ok(params) => params,
            Err(e) => return Response::illegal_argument(e.to_string()),
        };

        let call = Call {
            app,
            descriptor,
            params,
            request_id: request.id(),
            callback: request.callback().cloned(),
        };

        trace!(phase = ?DispatchPhase::PermissionCheck);
        match self.gate.check(
            call.app.context.app_id(),
            call.descriptor.permissions(),
            call.descriptor.prompt_strategy(),
        ) {
            GateOutcome::Grant => {
                trace!(phase = ?DispatchPhase::Granted);
                self.execute(call)
            },
            GateOutcome::Deny(e) => {
                trace!(phase = ?DispatchPhase::Denied);
                debug!(error = %e, "Permission denied");
                Response::no_permission(e.to_string())
            },
            GateOutcome::Prompt(pending) => self.await_decision(call, pending),
        }
    }

    fn unsubscribe(
        &self,
        app: &AppState,
        descriptor: &ActionDescriptor,
        handle: &CallbackHandle,
    ) -> Response {
        match self.instances.get(descriptor.feature(), app.context.app_id()) {
            Some(instance) => {
                let key = CallbackKey::subscription(instance.id(), descriptor.name());
                self.callbacks.put(key, handle, &app.target);
            },
            None => trace!("Unsubscribe without an instance ignored"),
        }
        Response::success()
    }

    fn await_decision(self: &Arc<Self>, call: Call, pending: PendingDecision) -> Response {
        match call.descriptor.mode() {
            // The synchronous leg has nowhere else to go: block for the user.
            Mode::Sync | Mode::SyncCallback => match self.executor.block_on(pending.resolve()) {
                Ok(()) => {
                    trace!(phase = ?DispatchPhase::Granted);
                    self.execute(call)
                },
                Err(e) => {
                    trace!(phase = ?DispatchPhase::Denied);
                    Response::no_permission(e.to_string())
                },
            },
            Mode::Async | Mode::Callback => {
                let this = Arc::clone(self);
                let target = call.app.target.clone();
                let spawned = self.executor.spawn(async move {
                    match pending.resolve().await {
                        Ok(()) => {
                            let resumed = Arc::clone(&this);
                            let outcome = tokio::task::spawn_blocking(move || {
                                let handle = call.live_handle().cloned();
                                let response = resumed.execute(call);
                                (handle, response)
                            })
                            .await;
                            match outcome {
                                // The caller already has its ack; a failure to
                                // start the work goes through the handle.
                                Ok((Some(handle), response)) if !response.is_success() => {
                                    this.callbacks.deliver_direct(&target, &handle, response);
                                },
                                Ok(_) => {},
                                Err(e) => warn!(error = %e, "Resumed dispatch failed"),
                            }
                        },
                        Err(e) => {
                            debug!(error = %e, "Permission denied after prompt");
                            if let Some(handle) = call.live_handle() {
                                this.callbacks.deliver_direct(
                                    &call.app.target,
                                    handle,
                                    Response::no_permission(e.to_string()),
                                );
                            }
                        },
                    }
                });
                if !spawned {
                    return Response::service_unavailable("bridge is shutting down");
                }
                Response::ack()
            },
        }
    }

    fn execute(self: &Arc<Self>, call: Call) -> Response {
        trace!(phase = ?DispatchPhase::ResolveInstance);
        let lease = match self.instances.acquire(call.feature(), &call.app.context) {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "Instance unavailable");
                return Response::service_unavailable(e.to_string());
            },
        };

        trace!(phase = ?DispatchPhase::Execute);
        match call.descriptor.mode() {
            Mode::Sync => {
                let request = self.feature_request(&call, &lease, CallbackSender::detached());
                run_invoke(lease.instance().feature().as_ref(), &request).with_terminal(true)
            },
            Mode::Async => self.execute_async(call, lease),
            Mode::Callback => self.execute_callback(call, lease),
            Mode::SyncCallback => self.execute_sync_callback(&call, &lease),
        }
    }

    fn execute_async(self: &Arc<Self>, call: Call, lease: InstanceLease) -> Response {
        let key = CallbackKey::request(lease.instance().id(), call.action(), call.request_id);
        self.register(&call, &lease, key.clone(), Closing::AfterFirst);
        let abandoned = key.clone();

        let request = self.feature_request(&call, &lease, CallbackSender::detached());
        let callbacks = Arc::clone(&self.callbacks);
        let accepted = self.schedule(&call.app, move || {
            let response = run_invoke(lease.instance().feature().as_ref(), &request);
            callbacks.invoke(&key, response);
            drop(lease);
        });
        if !accepted {
            self.callbacks.remove(&abandoned);
            return Response::service_unavailable("bridge is shutting down");
        }
        Response::ack()
    }

    fn execute_callback(self: &Arc<Self>, call: Call, lease: InstanceLease) -> Response {
        let key = CallbackKey::subscription(lease.instance().id(), call.action());
        self.register(&call, &lease, key.clone(), Closing::Never);

        let sender = CallbackSender::bound(Arc::clone(&self.callbacks), key.clone());
        let request = self.feature_request(&call, &lease, sender);
        let callbacks = Arc::clone(&self.callbacks);
        let accepted = self.schedule(&call.app, move || {
            let response = run_invoke(lease.instance().feature().as_ref(), &request);
            if !response.is_success() {
                callbacks.invoke(&key, response);
            }
            drop(lease);
        });
        if !accepted {
            return Response::service_unavailable("bridge is shutting down");
        }
        Response::ack()
    }

    fn execute_sync_callback(&self, call: &Call, lease: &InstanceLease) -> Response {
        let key = CallbackKey::request(lease.instance().id(), call.action(), call.request_id);
        self.register(call, lease, key.clone(), Closing::OnTerminal);

        let sender = CallbackSender::held(Arc::clone(&self.callbacks), key.clone());
        let request = self.feature_request(call, lease, sender.clone());
        let response = run_invoke(lease.instance().feature().as_ref(), &request);
        if !response.is_success() {
            self.callbacks.remove(&key);
        }
        // Deliveries made during the call follow the return value.
        sender.release();
        response
    }

    fn register(&self, call: &Call, lease: &InstanceLease, key: CallbackKey, closing: Closing) {
        let Some(handle) = call.live_handle() else {
            trace!("No live callback handle, deliveries will be dropped");
            return;
        };
        self.callbacks
            .put_closing(key.clone(), handle, &call.app.target, closing);
        // Lost a race with a forced disposal that already purged.
        if lease.instance().is_disposed() {
            self.callbacks.remove(&key);
        }
    }

    /// Returns `false` if the executor refused the work.
    fn schedule<F>(&self, app: &AppState, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.executor.is_shut_down() {
            debug!("Executor shut down, work refused");
            return false;
        }
        let ready = app.target.ready();
        if self.settings.defer_until_ready && !ready.is_ready() {
            let task = self
                .executor
                .defer(ready, Some(self.settings.ready_poll_interval), work);
            let mut pending = self
                .deferred
                .entry(app.context.app_id().clone())
                .or_default();
            pending.retain(DelayedTask::is_pending);
            pending.push(task);
            trace!(deferred = pending.len(), "Work deferred until script ready");
            return true;
        }
        let accepted = self.executor.submit(work);
        if !accepted {
            debug!("Executor shut down, work dropped");
        }
        accepted
    }

    fn feature_request(
        &self,
        call: &Call,
        lease: &InstanceLease,
        sender: CallbackSender,
    ) -> FeatureRequest {
        FeatureRequest::new(
            Arc::clone(&call.descriptor),
            call.params.clone(),
            Arc::clone(&call.app.context),
            lease.instance().id(),
            call.request_id,
            sender,
        )
    }

    fn app(&self, app: &AppId) -> BridgeResult<AppState> {
        self.apps
            .get(app)
            .map(|s| s.clone())
            .ok_or_else(|| BridgeError::UnknownApp(app.clone()))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("features", &self.registry.len())
            .field("apps", &self.apps.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Call the feature, turning errors and panics into responses.
fn run_invoke(feature: &dyn Feature, request: &FeatureRequest) -> Response {
    match catch_unwind(AssertUnwindSafe(|| feature.invoke(request))) {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(
                feature = %request.descriptor().feature(),
                action = %request.action(),
                error = %e,
                "Feature returned an error"
            );
            e.into()
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                feature = %request.descriptor().feature(),
                action = %request.action(),
                error = %message,
                "Feature panicked"
            );
            Response::generic_error(message)
        },
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
