//! End-to-end walks through each invocation mode.
//!
//! Each test builds its own bridge from scratch, the way a host would.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::Duration;

use serde_json::json;
use trellis_bridge::{BridgeBuilder, Feature, FeatureRequest};
use trellis_core::{
    ActionDescriptor, CallbackHandle, FeatureDescriptor, FeatureResult, Mode, Response,
    StatusCode,
};
use trellis_permissions::HostDecision;
use trellis_test::{
    DELIVERY_TIMEOUT, EmitterHandle, EventEmitterFeature, LongTaskFeature, MockPermissionHost,
    Probe, RecordingScriptContext, test_app, test_runtime,
};

/// Records which thread ran each call.
struct ThreadProbe {
    threads: Arc<std::sync::Mutex<Vec<ThreadId>>>,
}

impl Feature for ThreadProbe {
    fn name(&self) -> &str {
        "service.echo"
    }

    fn invoke(&self, _request: &FeatureRequest) -> FeatureResult<Response> {
        self.threads.lock().unwrap().push(std::thread::current().id());
        Ok(Response::success())
    }
}

/// Counts calls that got past the permission gate.
struct Location {
    calls: Arc<AtomicUsize>,
}

impl Feature for Location {
    fn name(&self) -> &str {
        "geo"
    }

    fn invoke(&self, _request: &FeatureRequest) -> FeatureResult<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::json(json!({"lat": 0.0, "lon": 0.0})))
    }
}

#[test]
fn test_scenario_a_sync_runs_on_calling_thread() {
    let runtime = test_runtime();
    let threads = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut builder = BridgeBuilder::new();
    let seen = Arc::clone(&threads);
    builder
        .runtime(runtime.handle().clone())
        .register_feature(
            FeatureDescriptor::new("service.echo")
                .with_action(ActionDescriptor::builder("ping", Mode::Sync).build()),
            move |_app| {
                Ok(Arc::new(ThreadProbe {
                    threads: Arc::clone(&seen),
                }) as Arc<dyn Feature>)
            },
        )
        .unwrap();
    let dispatcher = builder.build().unwrap();
    let bridge = dispatcher
        .attach_app(test_app("com.example.a"), Arc::new(RecordingScriptContext::new()))
        .unwrap();

    let response = bridge.dispatch("service.echo", "ping", "{}", None);
    assert_eq!(response.status(), StatusCode::Success);
    assert!(response.is_terminal());
    assert_eq!(*threads.lock().unwrap(), vec![std::thread::current().id()]);
}

#[test]
fn test_scenario_b_async_acks_then_delivers_payload() {
    let runtime = test_runtime();
    let probe = Probe::new();

    let mut builder = BridgeBuilder::new();
    let factory_probe = probe.clone();
    builder
        .runtime(runtime.handle().clone())
        .register_feature(
            FeatureDescriptor::new("worker")
                .with_action(ActionDescriptor::builder("longTask", Mode::Async).build()),
            move |_app| Ok(Arc::new(LongTaskFeature::new(factory_probe.clone())) as Arc<dyn Feature>),
        )
        .unwrap();
    let dispatcher = builder.build().unwrap();
    let script = RecordingScriptContext::new();
    let bridge = dispatcher
        .attach_app(test_app("com.example.b"), Arc::new(script.clone()))
        .unwrap();

    let ack = bridge.dispatch(
        "worker",
        "longTask",
        r#"{"ms": 30, "value": {"answer": 42}}"#,
        Some(CallbackHandle::new("cb-b")),
    );
    assert_eq!(ack.status(), StatusCode::Success);
    assert!(!ack.is_terminal());
    assert!(ack.payload().is_none());

    let deliveries = script.wait_for(1, DELIVERY_TIMEOUT);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].token, "cb-b");
    assert!(deliveries[0].response.is_terminal());
    assert_eq!(deliveries[0].json(), Some(&json!({"answer": 42})));
    assert_eq!(probe.invoked(), 1);
}

#[test]
fn test_scenario_c_callback_until_unregistered() {
    let runtime = test_runtime();
    let emitter = EmitterHandle::default();

    let mut builder = BridgeBuilder::new();
    let handle = emitter.clone();
    builder
        .runtime(runtime.handle().clone())
        .register_feature(
            FeatureDescriptor::new("sensor")
                .with_action(ActionDescriptor::builder("listen", Mode::Callback).alias("onEvent").build()),
            move |_app| {
                Ok(Arc::new(EventEmitterFeature::new(Probe::new(), handle.clone())) as Arc<dyn Feature>)
            },
        )
        .unwrap();
    let dispatcher = builder.build().unwrap();
    let script = RecordingScriptContext::new();
    let bridge = dispatcher
        .attach_app(test_app("com.example.c"), Arc::new(script.clone()))
        .unwrap();

    let ack = bridge.dispatch("sensor", "onEvent", "", Some(CallbackHandle::new("cb-c")));
    assert!(ack.is_success());
    // Registration happens on the executor.
    let deadline = std::time::Instant::now() + DELIVERY_TIMEOUT;
    while emitter.listener_count() == 0 {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(emitter.fire(json!("first")), 1);
    assert_eq!(emitter.fire(json!("second")), 1);
    let deliveries = script.wait_for(2, DELIVERY_TIMEOUT);
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.token == "cb-c" && !d.response.is_terminal()));

    let stop = bridge.dispatch("sensor", "onEvent", "", Some(CallbackHandle::unset()));
    assert!(stop.is_success());
    assert_eq!(emitter.fire(json!("third")), 0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(script.count(), 2);
}

#[test]
fn test_scenario_d_denied_permission_never_invokes() {
    let runtime = test_runtime();
    let calls = Arc::new(AtomicUsize::new(0));
    let host = MockPermissionHost::new().with_state("location", HostDecision::Denied);

    let mut builder = BridgeBuilder::new();
    let counted = Arc::clone(&calls);
    builder
        .runtime(runtime.handle().clone())
        .permission_host(Arc::new(host.clone()))
        .register_feature(
            FeatureDescriptor::new("geo").with_action(
                ActionDescriptor::builder("readLocation", Mode::Sync)
                    .permission("location")
                    .build(),
            ),
            move |_app| {
                Ok(Arc::new(Location {
                    calls: Arc::clone(&counted),
                }) as Arc<dyn Feature>)
            },
        )
        .unwrap();
    let dispatcher = builder.build().unwrap();
    let bridge = dispatcher
        .attach_app(test_app("com.example.d"), Arc::new(RecordingScriptContext::new()))
        .unwrap();

    let response = bridge.dispatch("geo", "readLocation", "", None);
    assert_eq!(response.status(), StatusCode::NoPermission);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(host.prompt_count(), 0);
    assert_eq!(dispatcher.instances().live_count(), 0);
}

#[test]
fn test_scenario_e_forced_disposal_drops_late_result() {
    let runtime = test_runtime();
    let probe = Probe::new();

    let mut builder = BridgeBuilder::new();
    let factory_probe = probe.clone();
    builder
        .runtime(runtime.handle().clone())
        .register_feature(
            FeatureDescriptor::new("worker")
                .with_action(ActionDescriptor::builder("longTask", Mode::Async).build()),
            move |_app| Ok(Arc::new(LongTaskFeature::new(factory_probe.clone())) as Arc<dyn Feature>),
        )
        .unwrap();
    let dispatcher = builder.build().unwrap();
    let script = RecordingScriptContext::new();
    let app = test_app("com.example.e");
    let app_id = app.app_id().clone();
    let bridge = dispatcher.attach_app(app, Arc::new(script.clone())).unwrap();

    let ack = bridge.dispatch(
        "worker",
        "longTask",
        r#"{"ms": 150, "value": "late"}"#,
        Some(CallbackHandle::new("cb-e")),
    );
    assert!(ack.is_success());

    // Let the call start, then pull the instance out from under it.
    let deadline = std::time::Instant::now() + DELIVERY_TIMEOUT;
    while probe.invoked() == 0 {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(2));
    }
    let first = dispatcher.instances().get("worker", &app_id).unwrap().id();
    assert!(dispatcher.instances().dispose("worker", &app_id, true).unwrap());
    assert_eq!(probe.forced(), 1);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(script.count(), 0);
    assert!(dispatcher.callbacks().is_empty());

    let shared = test_app("com.example.e").into_shared();
    let second = dispatcher.instances().get_or_create("worker", &shared).unwrap();
    assert_ne!(first, second.id());
    assert_eq!(probe.created(), 2);
}
