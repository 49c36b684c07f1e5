//! Small feature implementations for exercising the bridge.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use trellis_bridge::{CallbackSender, Feature, FeatureRequest};
use trellis_core::{ApplicationContext, FeatureError, FeatureResult, Response};

/// Lifecycle counters shared between a feature and the test.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    created: Arc<AtomicUsize>,
    disposed: Arc<AtomicUsize>,
    forced: Arc<AtomicUsize>,
    invoked: Arc<AtomicUsize>,
    configured: Arc<Mutex<Vec<Value>>>,
}

impl Probe {
    /// Fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances constructed.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Instances disposed.
    #[must_use]
    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Instances disposed with `force`.
    #[must_use]
    pub fn forced(&self) -> usize {
        self.forced.load(Ordering::SeqCst)
    }

    /// Calls that reached `invoke`.
    #[must_use]
    pub fn invoked(&self) -> usize {
        self.invoked.load(Ordering::SeqCst)
    }

    /// Parameters passed to `configure`.
    #[must_use]
    pub fn configured(&self) -> Vec<Value> {
        self.configured.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn on_create(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn on_invoke(&self) {
        self.invoked.fetch_add(1, Ordering::SeqCst);
    }

    fn on_configure(&self, params: Option<&Value>) {
        if let (Some(params), Ok(mut guard)) = (params, self.configured.lock()) {
            guard.push(params.clone());
        }
    }

    fn on_dispose(&self, force: bool) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        if force {
            self.forced.fetch_add(1, Ordering::SeqCst);
        }
    }
}

macro_rules! probed_lifecycle {
    () => {
        fn configure(&self, params: Option<&Value>) -> FeatureResult<()> {
            self.probe.on_configure(params);
            Ok(())
        }

        fn dispose(&self, force: bool) {
            self.probe.on_dispose(force);
        }
    };
}

fn params_json(request: &FeatureRequest) -> Value {
    request.params().as_json().cloned().unwrap_or(Value::Null)
}

/// Feature "echo": `echo` returns its parameters, `ping` answers `"pong"`,
/// `fail` reports an illegal argument.
#[derive(Debug)]
pub struct EchoFeature {
    probe: Probe,
}

impl EchoFeature {
    /// Construct, counting the construction on `probe`.
    #[must_use]
    pub fn new(probe: Probe) -> Self {
        probe.on_create();
        Self { probe }
    }
}

impl Feature for EchoFeature {
    fn name(&self) -> &str {
        "echo"
    }

    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response> {
        self.probe.on_invoke();
        match request.action() {
            "echo" => Ok(Response::json(params_json(request))),
            "ping" => Ok(Response::json(json!("pong"))),
            "fail" => Err(FeatureError::IllegalArgument("rejected by echo".into())),
            other => Err(FeatureError::Failed(format!("echo has no action {other}"))),
        }
    }

    probed_lifecycle!();
}

/// Feature "longTask": `run` sleeps for `{"ms": n}` then returns
/// `{"value": ...}` from its parameters.
#[derive(Debug)]
pub struct LongTaskFeature {
    probe: Probe,
}

impl LongTaskFeature {
    /// Construct, counting the construction on `probe`.
    #[must_use]
    pub fn new(probe: Probe) -> Self {
        probe.on_create();
        Self { probe }
    }
}

impl Feature for LongTaskFeature {
    fn name(&self) -> &str {
        "longTask"
    }

    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response> {
        self.probe.on_invoke();
        let ms = request
            .params()
            .get("ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        std::thread::sleep(Duration::from_millis(ms));
        let value = request.params().get("value").cloned().unwrap_or(Value::Null);
        Ok(Response::json(value))
    }

    probed_lifecycle!();
}

/// Fires events at every listener of an [`EventEmitterFeature`].
#[derive(Debug, Clone, Default)]
pub struct EmitterHandle {
    listeners: Arc<Mutex<Vec<CallbackSender>>>,
}

impl EmitterHandle {
    /// Send `event` to every connected listener. Returns how many accepted
    /// it.
    pub fn fire(&self, event: Value) -> usize {
        let Ok(mut listeners) = self.listeners.lock() else {
            return 0;
        };
        listeners.retain(CallbackSender::is_connected);
        listeners
            .iter()
            .filter(|l| l.send(Response::json(event.clone())))
            .count()
    }

    /// Listeners still connected.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .map(|l| l.iter().filter(|s| s.is_connected()).count())
            .unwrap_or_default()
    }

    /// A sender for a key already listening replaces the old one, so a
    /// re-subscription is heard once.
    fn add(&self, sender: CallbackSender) {
        let Ok(mut guard) = self.listeners.lock() else {
            return;
        };
        match guard
            .iter_mut()
            .find(|l| l.key().is_some() && l.key() == sender.key())
        {
            Some(existing) => *existing = sender,
            None => guard.push(sender),
        }
    }
}

/// Feature "events": `listen` subscribes the caller to
/// [`EmitterHandle::fire`]; `snapshot` sends `{"count": n}` progress
/// deliveries plus a final `"done"` while returning `"snapshot"`. With
/// `{"final": false}` the terminal `"done"` is left out.
#[derive(Debug)]
pub struct EventEmitterFeature {
    probe: Probe,
    handle: EmitterHandle,
}

impl EventEmitterFeature {
    /// Construct over a shared handle.
    #[must_use]
    pub fn new(probe: Probe, handle: EmitterHandle) -> Self {
        probe.on_create();
        Self { probe, handle }
    }
}

impl Feature for EventEmitterFeature {
    fn name(&self) -> &str {
        "events"
    }

    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response> {
        self.probe.on_invoke();
        match request.action() {
            "listen" => {
                self.handle.add(request.callback().clone());
                Ok(Response::success())
            },
            "snapshot" => {
                let count = request
                    .params()
                    .get("count")
                    .and_then(Value::as_u64)
                    .unwrap_or(2);
                for n in 0..count {
                    request
                        .callback()
                        .send(Response::json(json!(n)).with_terminal(false));
                }
                let last = request
                    .params()
                    .get("final")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if last {
                    request.callback().send(Response::json(json!("done")));
                }
                Ok(Response::json(json!("snapshot")))
            },
            other => Err(FeatureError::Failed(format!("events has no action {other}"))),
        }
    }

    probed_lifecycle!();
}

/// Feature "location": a permission-guarded position source.
#[derive(Debug)]
pub struct LocationFeature {
    probe: Probe,
}

impl LocationFeature {
    /// Construct, counting the construction on `probe`.
    #[must_use]
    pub fn new(probe: Probe) -> Self {
        probe.on_create();
        Self { probe }
    }
}

impl Feature for LocationFeature {
    fn name(&self) -> &str {
        "location"
    }

    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response> {
        self.probe.on_invoke();
        let position = json!({"lat": 37.57, "lon": 126.98});
        match request.action() {
            "getPosition" | "requestPosition" => Ok(Response::json(position)),
            "watchPosition" => {
                request.callback().send(Response::json(position));
                Ok(Response::success())
            },
            other => Err(FeatureError::Failed(format!("location has no action {other}"))),
        }
    }

    probed_lifecycle!();
}

/// Feature "fragile": `explode` panics, `survive` succeeds.
#[derive(Debug, Default)]
pub struct PanickingFeature {
    exploded: AtomicBool,
}

impl Feature for PanickingFeature {
    fn name(&self) -> &str {
        "fragile"
    }

    fn invoke(&self, request: &FeatureRequest) -> FeatureResult<Response> {
        match request.action() {
            "explode" => {
                self.exploded.store(true, Ordering::SeqCst);
                panic!("fragile feature exploded");
            },
            _ => Ok(Response::json(json!({
                "exploded": self.exploded.load(Ordering::SeqCst)
            }))),
        }
    }

    fn dispose(&self, _force: bool) {
        panic!("fragile feature cannot be disposed cleanly");
    }
}

/// Constructor for a feature that cannot be built.
///
/// # Errors
///
/// Always fails with [`FeatureError::Unavailable`].
pub fn failing_factory(_app: &ApplicationContext) -> FeatureResult<Arc<dyn Feature>> {
    Err(FeatureError::Unavailable("hardware not present".into()))
}
