use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use trellis_core::{FeatureDescriptor, FeatureError, FeatureResult, StatusCode};
use trellis_permissions::{HostDecision, PermissionHost, UserDecision};

use super::*;
use crate::builder::BridgeBuilder;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Response, Instant)>>,
}

impl ScriptContext for Recorder {
    fn deliver(&self, handle: &CallbackHandle, response: Response) {
        self.seen
            .lock()
            .unwrap()
            .push((handle.token().to_owned(), response, Instant::now()));
    }
}

impl Recorder {
    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn wait_for(&self, n: usize) -> Vec<(String, Response, Instant)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.count() < n {
            assert!(Instant::now() < deadline, "expected {n} deliveries, saw {}", self.count());
            std::thread::sleep(Duration::from_millis(5));
        }
        self.seen.lock().unwrap().clone()
    }
}

struct Host {
    state: HostDecision,
    answer: Option<UserDecision>,
    prompts: AtomicUsize,
}

#[async_trait]
impl PermissionHost for Host {
    fn check_permissions(&self, _app: &AppId, permissions: &[String]) -> Vec<HostDecision> {
        vec![self.state; permissions.len()]
    }

    async fn prompt_user(&self, _app: &AppId, _permission: &str) -> Option<UserDecision> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.answer
    }
}

/// Backs the "echo" feature.
struct Echo {
    calls: Arc<AtomicUsize>,
}

impl Feature for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let params = request.params().as_json().cloned().unwrap_or(Value::Null);
        match request.action() {
            "echo" | "secret" | "secretAsync" => Ok(Response::json(params)),
            "slowEcho" => {
                std::thread::sleep(Duration::from_millis(20));
                Ok(Response::json(params))
            },
            "fail" => Err(FeatureError::IllegalArgument("bad input".into())),
            "explode" => panic!("kaboom"),
            other => Err(FeatureError::Failed(format!("unexpected action {other}"))),
        }
    }
}

/// Backs the "events" feature.
struct Events {
    returned_at: Arc<Mutex<Option<Instant>>>,
}

impl Feature for Events {
    fn name(&self) -> &str {
        "events"
    }

    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response> {
        let sender = request.callback();
        match request.action() {
            "watch" => {
                for n in 0..3 {
                    sender.send(Response::json(json!(n)));
                }
                Ok(Response::success())
            },
            "snapshot" => {
                sender.send(Response::json(json!("first")).with_terminal(false));
                sender.send(Response::json(json!("second")).with_terminal(false));
                sender.send(Response::json(json!("done")));
                std::thread::sleep(Duration::from_millis(20));
                *self.returned_at.lock().unwrap() = Some(Instant::now());
                Ok(Response::json(json!("snapshot")))
            },
            _ => Err(FeatureError::Failed("unknown".into())),
        }
    }
}

fn descriptors() -> Vec<FeatureDescriptor> {
    let echo = FeatureDescriptor::new("echo")
        .with_action(
            ActionDescriptor::builder("echo", Mode::Sync)
                .alias("say")
                .build(),
        )
        .with_action(ActionDescriptor::builder("slowEcho", Mode::Async).build())
        .with_action(ActionDescriptor::builder("fail", Mode::Sync).build())
        .with_action(ActionDescriptor::builder("explode", Mode::Sync).build())
        .with_action(
            ActionDescriptor::builder("secret", Mode::Sync)
                .permission("secret.read")
                .build(),
        )
        .with_action(
            ActionDescriptor::builder("secretAsync", Mode::Async)
                .permission("secret.read")
                .build(),
        );
    let events = FeatureDescriptor::new("events")
        .with_action(
            ActionDescriptor::builder("watch", Mode::Callback)
                .resident(ResidentType::Useable)
                .build(),
        )
        .with_action(ActionDescriptor::builder("snapshot", Mode::SyncCallback).build());
    let broken =
        FeatureDescriptor::new("broken").with_action(ActionDescriptor::builder("use", Mode::Sync).build());
    vec![echo, events, broken]
}

struct Harness {
    _runtime: tokio::runtime::Runtime,
    dispatcher: Arc<Dispatcher>,
    recorder: Arc<Recorder>,
    bridge: ScriptBridge,
    host: Arc<Host>,
    echo_calls: Arc<AtomicUsize>,
    returned_at: Arc<Mutex<Option<Instant>>>,
}

fn harness_with(settings: BridgeSettings, host: Host, app: ApplicationContext) -> Harness {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let host = Arc::new(host);
    let echo_calls = Arc::new(AtomicUsize::new(0));
    let returned_at = Arc::new(Mutex::new(None));

    let mut builder = BridgeBuilder::new();
    builder
        .settings(settings)
        .runtime(runtime.handle().clone())
        .permission_host(host.clone());
    for descriptor in descriptors() {
        builder.declare(descriptor).unwrap();
    }
    {
        let calls = Arc::clone(&echo_calls);
        builder.factory("echo", move |_app| {
            Ok(Arc::new(Echo {
                calls: Arc::clone(&calls),
            }) as Arc<dyn Feature>)
        });
    }
    {
        let returned_at = Arc::clone(&returned_at);
        builder.factory("events", move |_app| {
            Ok(Arc::new(Events {
                returned_at: Arc::clone(&returned_at),
            }) as Arc<dyn Feature>)
        });
    }
    builder.factory("broken", |_app| {
        Err(FeatureError::Unavailable("device missing".into()))
    });
    let dispatcher = builder.build().unwrap();

    let recorder = Arc::new(Recorder::default());
    let bridge = dispatcher.attach_app(app, recorder.clone()).unwrap();
    Harness {
        _runtime: runtime,
        dispatcher,
        recorder,
        bridge,
        host,
        echo_calls,
        returned_at,
    }
}

fn host(state: HostDecision, answer: Option<UserDecision>) -> Host {
    Host {
        state,
        answer,
        prompts: AtomicUsize::new(0),
    }
}

fn app(id: &str) -> ApplicationContext {
    ApplicationContext::new(AppId::new(id).unwrap())
}

fn harness() -> Harness {
    harness_with(
        BridgeSettings::default(),
        host(HostDecision::Granted, None),
        app("com.example.app"),
    )
}

fn cb(token: &str) -> Option<CallbackHandle> {
    Some(CallbackHandle::new(token))
}

#[test]
fn test_sync_returns_result_inline() {
    let h = harness();
    let response = h.bridge.dispatch("echo", "echo", r#"{"a":1}"#, None);
    assert_eq!(response.status(), StatusCode::Success);
    assert!(response.is_terminal());
    assert_eq!(response.payload().and_then(|p| p.as_json()), Some(&json!({"a": 1})));

    let aliased = h.bridge.dispatch("echo", "say", "[1,2]", None);
    assert_eq!(aliased.payload().and_then(|p| p.as_json()), Some(&json!([1, 2])));
    assert_eq!(h.recorder.count(), 0);
}

#[test]
fn test_unknown_targets_are_not_found() {
    let h = harness();
    assert_eq!(h.bridge.dispatch("nope", "echo", "", None).status(), StatusCode::NotFound);
    assert_eq!(h.bridge.dispatch("echo", "nope", "", None).status(), StatusCode::NotFound);

    let stranger = InvocationRequest::new(AppId::new("com.example.other").unwrap(), "echo", "echo");
    assert_eq!(h.dispatcher.dispatch(stranger).status(), StatusCode::NotFound);
    assert_eq!(h.dispatcher.instances().live_count(), 0);
}

#[test]
fn test_undeclared_feature_is_refused() {
    let h = harness_with(
        BridgeSettings::default(),
        host(HostDecision::Granted, None),
        app("com.example.app").with_declared_features(["echo"]),
    );
    assert!(h.bridge.dispatch("echo", "echo", "", None).is_success());
    assert_eq!(
        h.bridge.dispatch("events", "watch", "", cb("w")).status(),
        StatusCode::NoPermission
    );

    let map = h.bridge.feature_map();
    let names: Vec<_> = map
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(names, vec!["echo".to_owned()]);
}

#[test]
fn test_background_refuses_non_resident_actions() {
    let h = harness();
    h.bridge.set_background(true).unwrap();
    assert_eq!(h.bridge.dispatch("echo", "echo", "", None).status(), StatusCode::NoPermission);
    assert!(h.bridge.dispatch("events", "watch", "", cb("w")).is_success());

    h.bridge.set_background(false).unwrap();
    assert!(h.bridge.dispatch("echo", "echo", "", None).is_success());
}

#[test]
fn test_malformed_params_are_illegal_argument() {
    let h = harness();
    let response = h.bridge.dispatch("echo", "echo", "{not json", None);
    assert_eq!(response.status(), StatusCode::IllegalArgument);
    assert_eq!(h.echo_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_async_acks_then_delivers_exactly_once() {
    let h = harness();
    let ack = h.bridge.dispatch("echo", "slowEcho", r#""hi""#, cb("cb1"));
    assert!(ack.is_success());
    assert!(!ack.is_terminal());

    let seen = h.recorder.wait_for(1);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.recorder.count(), 1);
    assert_eq!(seen[0].0, "cb1");
    assert!(seen[0].1.is_terminal());
    assert_eq!(seen[0].1.payload().and_then(|p| p.as_json()), Some(&json!("hi")));
    assert!(h.dispatcher.callbacks().is_empty());
}

#[test]
fn test_async_without_handle_still_runs() {
    let h = harness();
    assert!(h.bridge.dispatch("echo", "slowEcho", "", None).is_success());
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.echo_calls.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(h.recorder.count(), 0);
}

#[test]
fn test_callback_deliveries_keep_order_until_unsubscribed() {
    let h = harness();
    assert!(h.bridge.dispatch("events", "watch", "", cb("w")).is_success());

    let seen = h.recorder.wait_for(3);
    let payloads: Vec<_> = seen
        .iter()
        .map(|(_, r, _)| r.payload().and_then(|p| p.as_json()).cloned())
        .collect();
    assert_eq!(payloads, vec![Some(json!(0)), Some(json!(1)), Some(json!(2))]);
    assert!(seen.iter().all(|(token, r, _)| token == "w" && !r.is_terminal()));
    assert_eq!(h.dispatcher.callbacks().len(), 1);

    let unsubscribed = h
        .bridge
        .dispatch("events", "watch", "", Some(CallbackHandle::unset()));
    assert!(unsubscribed.is_success());
    assert!(h.dispatcher.callbacks().is_empty());
}

#[test]
fn test_unsubscribe_before_subscribe_creates_nothing() {
    let h = harness();
    let response = h
        .bridge
        .dispatch("events", "watch", "", Some(CallbackHandle::new("-1")));
    assert!(response.is_success());
    assert_eq!(h.dispatcher.instances().live_count(), 0);
}

#[test]
fn test_sync_callback_deliveries_follow_return() {
    let h = harness();
    let response = h.bridge.dispatch("events", "snapshot", "", cb("s"));
    assert_eq!(response.payload().and_then(|p| p.as_json()), Some(&json!("snapshot")));

    let seen = h.recorder.wait_for(3);
    let returned_at = h.returned_at.lock().unwrap().unwrap();
    assert!(seen.iter().all(|(_, _, at)| *at >= returned_at));
    let terminal: Vec<_> = seen.iter().map(|(_, r, _)| r.is_terminal()).collect();
    assert_eq!(terminal, vec![false, false, true]);
    assert!(h.dispatcher.callbacks().is_empty());
}

#[test]
fn test_feature_failures_become_responses() {
    let h = harness();
    let failed = h.bridge.dispatch("echo", "fail", "", None);
    assert_eq!(failed.status(), StatusCode::IllegalArgument);
    assert!(failed.message().unwrap().contains("bad input"));

    let panicked = h.bridge.dispatch("echo", "explode", "", None);
    assert_eq!(panicked.status(), StatusCode::GenericError);
    assert!(panicked.message().unwrap().contains("kaboom"));

    // The instance survives a panicking call.
    assert!(h.bridge.dispatch("echo", "echo", "", None).is_success());
    assert_eq!(h.dispatcher.instances().live_count(), 1);
}

#[test]
fn test_construction_failure_is_service_unavailable() {
    let h = harness();
    let response = h.bridge.dispatch("broken", "use", "", None);
    assert_eq!(response.status(), StatusCode::ServiceUnavailable);
}

#[test]
fn test_host_denial_never_builds_instance() {
    let h = harness_with(
        BridgeSettings::default(),
        host(HostDecision::Denied, None),
        app("com.example.app"),
    );
    assert_eq!(h.bridge.dispatch("echo", "secret", "", None).status(), StatusCode::NoPermission);
    assert_eq!(h.dispatcher.instances().live_count(), 0);
    assert_eq!(h.host.prompts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_prompt_blocks_for_answer() {
    let h = harness_with(
        BridgeSettings::default(),
        host(HostDecision::Undetermined, Some(UserDecision::allow_always())),
        app("com.example.app"),
    );
    assert!(h.bridge.dispatch("echo", "secret", "", None).is_success());
    assert!(h.bridge.dispatch("echo", "secret", "", None).is_success());
    // The remembered grant answers the second call.
    assert_eq!(h.host.prompts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_async_prompt_denial_is_delivered() {
    let h = harness_with(
        BridgeSettings::default(),
        host(HostDecision::Undetermined, None),
        app("com.example.app"),
    );
    let ack = h.bridge.dispatch("echo", "secretAsync", "", cb("p"));
    assert!(ack.is_success());

    let seen = h.recorder.wait_for(1);
    assert_eq!(seen[0].0, "p");
    assert_eq!(seen[0].1.status(), StatusCode::NoPermission);
    assert_eq!(h.echo_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_async_prompt_grant_resumes_execution() {
    let h = harness_with(
        BridgeSettings::default(),
        host(HostDecision::Undetermined, Some(UserDecision::allow())),
        app("com.example.app"),
    );
    assert!(h.bridge.dispatch("echo", "secretAsync", "7", cb("p")).is_success());

    let seen = h.recorder.wait_for(1);
    assert!(seen[0].1.is_success());
    assert_eq!(seen[0].1.payload().and_then(|p| p.as_json()), Some(&json!(7)));
}

#[test]
fn test_deferred_until_script_ready() {
    let settings = BridgeSettings {
        defer_until_ready: true,
        ready_poll_interval: Duration::from_millis(5),
        ..BridgeSettings::default()
    };
    let h = harness_with(settings, host(HostDecision::Granted, None), app("com.example.app"));
    assert!(h.bridge.dispatch("echo", "slowEcho", "1", cb("d")).is_success());

    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(h.echo_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.recorder.count(), 0);

    h.bridge.set_ready(true).unwrap();
    let seen = h.recorder.wait_for(1);
    assert_eq!(seen[0].0, "d");
}

#[test]
fn test_attach_twice_and_detach() {
    let h = harness();
    let recorder: Arc<dyn ScriptContext> = Arc::new(Recorder::default());
    assert!(matches!(
        h.dispatcher.attach_app(app("com.example.app"), Arc::clone(&recorder)),
        Err(BridgeError::AppAlreadyAttached(_))
    ));

    assert!(h.bridge.dispatch("events", "watch", "", cb("w")).is_success());
    h.recorder.wait_for(3);
    assert_eq!(h.dispatcher.instances().live_count(), 1);

    let app_id = h.bridge.app_id().clone();
    assert_eq!(h.bridge.detach(true).unwrap(), 1);
    assert_eq!(h.dispatcher.instances().live_count(), 0);
    assert!(h.dispatcher.callbacks().is_empty());
    assert!(matches!(
        h.dispatcher.set_ready(&app_id, true),
        Err(BridgeError::UnknownApp(_))
    ));

    // The id is free again.
    assert!(h.dispatcher.attach_app(app("com.example.app"), recorder).is_ok());
}

#[test]
fn test_shutdown_refuses_new_async_work() {
    let h = harness();
    assert!(h.bridge.dispatch("echo", "echo", "", None).is_success());
    assert_eq!(h.dispatcher.shutdown(true).unwrap(), 1);
    assert!(h.dispatcher.executor().is_shut_down());

    // Refused up front instead of acking work that will never run.
    let response = h.bridge.dispatch("echo", "slowEcho", "", cb("late"));
    assert_eq!(response.status(), StatusCode::ServiceUnavailable);
    assert!(h.dispatcher.callbacks().is_empty());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.recorder.count(), 0);
}
