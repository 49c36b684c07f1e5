//! A ready-to-use bridge over the demo features.

use std::sync::Arc;
use std::time::Duration;

use trellis_bridge::{BridgeBuilder, BridgeResult, BridgeSettings, Dispatcher, Feature, ScriptBridge};
use trellis_core::{ApplicationContext, CallbackHandle, RawParams, Response};

use crate::features::{
    EchoFeature, EmitterHandle, EventEmitterFeature, LocationFeature, LongTaskFeature,
    PanickingFeature, Probe, failing_factory,
};
use crate::fixtures::{demo_descriptors, test_app, test_runtime};
use crate::mocks::{MockPermissionHost, RecordingScriptContext};

/// Default time to wait for deliveries in tests.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes for each demo feature.
#[derive(Debug, Clone, Default)]
pub struct DemoProbes {
    /// `echo`
    pub echo: Probe,
    /// `longTask`
    pub long_task: Probe,
    /// `events`
    pub events: Probe,
    /// `location`
    pub location: Probe,
}

/// Register every demo feature and its constructor on `builder`.
///
/// # Errors
///
/// Fails if a demo declaration clashes with one already on the builder.
pub fn register_demo_features(
    builder: &mut BridgeBuilder,
    probes: &DemoProbes,
    emitter: &EmitterHandle,
) -> BridgeResult<()> {
    for descriptor in demo_descriptors() {
        builder.declare(descriptor)?;
    }

    let probe = probes.echo.clone();
    builder.factory("echo", move |_app| {
        Ok(Arc::new(EchoFeature::new(probe.clone())) as Arc<dyn Feature>)
    });
    let probe = probes.long_task.clone();
    builder.factory("longTask", move |_app| {
        Ok(Arc::new(LongTaskFeature::new(probe.clone())) as Arc<dyn Feature>)
    });
    let probe = probes.events.clone();
    let handle = emitter.clone();
    builder.factory("events", move |_app| {
        Ok(Arc::new(EventEmitterFeature::new(probe.clone(), handle.clone())) as Arc<dyn Feature>)
    });
    let probe = probes.location.clone();
    builder.factory("location", move |_app| {
        Ok(Arc::new(LocationFeature::new(probe.clone())) as Arc<dyn Feature>)
    });
    builder.factory("fragile", |_app| {
        Ok(Arc::new(PanickingFeature::default()) as Arc<dyn Feature>)
    });
    builder.factory("camera", failing_factory);
    Ok(())
}

/// A dispatcher over the demo features with one attached application.
///
/// Owns its runtime, so tests stay plain `#[test]` functions and call
/// [`dispatch`](Self::dispatch) from the test thread like a script would.
pub struct TestBridge {
    /// Recorded deliveries for the attached application.
    pub script: RecordingScriptContext,
    /// The permission host behind the gate.
    pub host: MockPermissionHost,
    /// Lifecycle counters.
    pub probes: DemoProbes,
    /// Fires `events.listen` subscriptions.
    pub emitter: EmitterHandle,
    bridge: ScriptBridge,
    dispatcher: Arc<Dispatcher>,
    runtime: tokio::runtime::Runtime,
}

impl TestBridge {
    /// Default settings, a granting host, application `com.example.test`.
    #[must_use]
    pub fn new() -> Self {
        Self::with(
            BridgeSettings::default(),
            MockPermissionHost::granting(),
            test_app("com.example.test"),
        )
    }

    /// Default settings and application with the given host.
    #[must_use]
    pub fn with_host(host: MockPermissionHost) -> Self {
        Self::with(BridgeSettings::default(), host, test_app("com.example.test"))
    }

    /// Fully specified harness.
    ///
    /// # Panics
    ///
    /// Panics if the demo bridge cannot be built or the application
    /// attached.
    #[must_use]
    pub fn with(settings: BridgeSettings, host: MockPermissionHost, app: ApplicationContext) -> Self {
        let runtime = test_runtime();
        let probes = DemoProbes::default();
        let emitter = EmitterHandle::default();

        let mut builder = BridgeBuilder::new();
        builder
            .settings(settings)
            .runtime(runtime.handle().clone())
            .permission_host(Arc::new(host.clone()));
        register_demo_features(&mut builder, &probes, &emitter).expect("demo features register");
        let dispatcher = builder.build().expect("demo bridge builds");

        let script = RecordingScriptContext::new();
        let bridge = dispatcher
            .attach_app(app, Arc::new(script.clone()))
            .expect("application attaches");

        Self {
            script,
            host,
            probes,
            emitter,
            bridge,
            dispatcher,
            runtime,
        }
    }

    /// Invoke `feature.action` for the attached application.
    pub fn dispatch(
        &self,
        feature: &str,
        action: &str,
        params: impl Into<RawParams>,
        callback: Option<&str>,
    ) -> Response {
        self.bridge
            .dispatch(feature, action, params, callback.map(CallbackHandle::new))
    }

    /// The attached application's bridge.
    #[must_use]
    pub fn bridge(&self) -> &ScriptBridge {
        &self.bridge
    }

    /// The dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The runtime driving the executor.
    #[must_use]
    pub fn runtime(&self) -> &tokio::runtime::Runtime {
        &self.runtime
    }

    /// Attach another application with its own recorder.
    ///
    /// # Errors
    ///
    /// Fails if the id is already attached.
    pub fn attach(&self, app: ApplicationContext) -> BridgeResult<(ScriptBridge, RecordingScriptContext)> {
        let script = RecordingScriptContext::new();
        let bridge = self.dispatcher.attach_app(app, Arc::new(script.clone()))?;
        Ok((bridge, script))
    }
}

impl Default for TestBridge {
    fn default() -> Self {
        Self::new()
    }
}
