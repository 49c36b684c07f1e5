//! Declarations and helpers for the demo features.

use trellis_core::{
    ActionDescriptor, ActionType, AppId, ApplicationContext, FeatureDescriptor, Mode,
    PromptStrategy, ResidentType,
};

/// Permission guarding the demo location feature.
pub const LOCATION_PERMISSION: &str = "location.read";

/// Permission guarding `camera.record`.
pub const CAMERA_PERMISSION: &str = "camera.use";

/// Create a test application id.
///
/// # Panics
///
/// Panics if `id` is not a valid application id.
#[must_use]
pub fn test_app_id(id: &str) -> AppId {
    AppId::new(id).expect("test application id must be valid")
}

/// Create a test application context that may use every feature.
#[must_use]
pub fn test_app(id: &str) -> ApplicationContext {
    ApplicationContext::new(test_app_id(id))
}

/// Create a multi-threaded runtime for driving the executor from a plain
/// `#[test]`.
///
/// # Panics
///
/// Panics if the runtime cannot be started.
#[must_use]
pub fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("test runtime must start")
}

/// `echo`: `echo` and `ping` (SYNC), `fail` (SYNC).
#[must_use]
pub fn echo_descriptor() -> FeatureDescriptor {
    FeatureDescriptor::new("echo")
        .with_action(
            ActionDescriptor::builder("echo", Mode::Sync)
                .alias("say")
                .resident(ResidentType::Useable)
                .build(),
        )
        .with_action(ActionDescriptor::builder("ping", Mode::Sync).build())
        .with_action(ActionDescriptor::builder("fail", Mode::Sync).build())
}

/// `longTask`: `run` (ASYNC).
#[must_use]
pub fn long_task_descriptor() -> FeatureDescriptor {
    FeatureDescriptor::new("longTask").with_action(ActionDescriptor::builder("run", Mode::Async).build())
}

/// `events`: `listen` (CALLBACK event) and `snapshot` (SYNC_CALLBACK).
#[must_use]
pub fn events_descriptor() -> FeatureDescriptor {
    FeatureDescriptor::new("events")
        .with_action(
            ActionDescriptor::builder("listen", Mode::Callback)
                .action_type(ActionType::Event)
                .resident(ResidentType::Useable)
                .build(),
        )
        .with_action(ActionDescriptor::builder("snapshot", Mode::SyncCallback).build())
}

/// `location`: guarded by [`LOCATION_PERMISSION`].
///
/// `getPosition` (SYNC, first-time prompt), `requestPosition` (ASYNC,
/// first-time prompt), `watchPosition` (CALLBACK, prompt every time).
#[must_use]
pub fn location_descriptor() -> FeatureDescriptor {
    FeatureDescriptor::new("location")
        .with_action(
            ActionDescriptor::builder("getPosition", Mode::Sync)
                .permission(LOCATION_PERMISSION)
                .build(),
        )
        .with_action(
            ActionDescriptor::builder("requestPosition", Mode::Async)
                .permission(LOCATION_PERMISSION)
                .build(),
        )
        .with_action(
            ActionDescriptor::builder("watchPosition", Mode::Callback)
                .permission(LOCATION_PERMISSION)
                .prompt_strategy(PromptStrategy::EveryTime)
                .build(),
        )
}

/// `fragile`: `explode` and `survive` (SYNC).
#[must_use]
pub fn fragile_descriptor() -> FeatureDescriptor {
    FeatureDescriptor::new("fragile")
        .with_action(ActionDescriptor::builder("explode", Mode::Sync).build())
        .with_action(ActionDescriptor::builder("survive", Mode::Sync).build())
}

/// `camera`: declared but never constructible. `capture` is SYNC and open,
/// `record` is ASYNC behind [`CAMERA_PERMISSION`].
#[must_use]
pub fn unavailable_descriptor() -> FeatureDescriptor {
    FeatureDescriptor::new("camera")
        .with_action(ActionDescriptor::builder("capture", Mode::Sync).build())
        .with_action(
            ActionDescriptor::builder("record", Mode::Async)
                .permission(CAMERA_PERMISSION)
                .build(),
        )
}

/// Every demo feature declaration.
#[must_use]
pub fn demo_descriptors() -> Vec<FeatureDescriptor> {
    vec![
        echo_descriptor(),
        long_task_descriptor(),
        events_descriptor(),
        location_descriptor(),
        fragile_descriptor(),
        unavailable_descriptor(),
    ]
}

/// Install a test-friendly subscriber once. Honors `RUST_LOG`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
