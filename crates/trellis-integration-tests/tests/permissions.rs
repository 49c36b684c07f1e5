//! Permission prompts as seen from the script side.

use std::time::Duration;

use trellis_bridge::BridgeSettings;
use trellis_core::StatusCode;
use trellis_permissions::{GateConfig, HostDecision, UserDecision};
use trellis_test::{
    CAMERA_PERMISSION, DELIVERY_TIMEOUT, LOCATION_PERMISSION, MockPermissionHost, TestBridge,
    test_app,
};

#[test]
fn test_sync_prompt_grant_is_remembered() {
    let bridge = TestBridge::with_host(
        MockPermissionHost::new().with_answer(Some(UserDecision::allow_always())),
    );

    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert_eq!(bridge.host.prompt_count(), 1);
    assert_eq!(bridge.probes.location.invoked(), 2);
}

#[test]
fn test_one_time_grant_prompts_again() {
    let bridge = TestBridge::with_host(
        MockPermissionHost::new().with_default_answer(Some(UserDecision::allow())),
    );

    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert_eq!(bridge.host.prompt_count(), 2);
}

#[test]
fn test_remembered_denial_skips_prompt() {
    let bridge = TestBridge::with_host(
        MockPermissionHost::new().with_answer(Some(UserDecision::deny_always())),
    );

    let first = bridge.dispatch("location", "getPosition", "", None);
    let second = bridge.dispatch("location", "getPosition", "", None);
    assert_eq!(first.status(), StatusCode::NoPermission);
    assert_eq!(second.status(), StatusCode::NoPermission);
    assert_eq!(bridge.host.prompt_count(), 1);
    assert_eq!(bridge.probes.location.invoked(), 0);
}

#[test]
fn test_dismissed_prompt_denies() {
    let bridge = TestBridge::with_host(MockPermissionHost::new());
    let response = bridge.dispatch("location", "getPosition", "", None);
    assert_eq!(response.status(), StatusCode::NoPermission);
    assert_eq!(bridge.host.prompt_count(), 1);
}

#[test]
fn test_prompt_timeout_denies() {
    let settings = BridgeSettings {
        gate: GateConfig {
            prompt_timeout: Duration::from_millis(30),
            cache_decisions: true,
        },
        ..BridgeSettings::default()
    };
    let host = MockPermissionHost::new()
        .with_default_answer(Some(UserDecision::allow_always()))
        .with_prompt_delay(Duration::from_millis(500));
    let bridge = TestBridge::with(settings, host, test_app("com.example.slow"));

    let response = bridge.dispatch("location", "getPosition", "", None);
    assert_eq!(response.status(), StatusCode::NoPermission);
    assert_eq!(bridge.probes.location.invoked(), 0);
}

#[test]
fn test_async_prompt_answers_through_callback() {
    let bridge = TestBridge::with_host(
        MockPermissionHost::new()
            .with_answer(Some(UserDecision::allow()))
            .with_answer(None)
            .with_prompt_delay(Duration::from_millis(20)),
    );

    let granted = bridge.dispatch("location", "requestPosition", "", Some("granted"));
    assert!(granted.is_success());
    assert!(!granted.is_terminal());
    let deliveries = bridge.script.wait_for(1, DELIVERY_TIMEOUT);
    assert_eq!(deliveries[0].token, "granted");
    assert!(deliveries[0].response.is_success());
    assert!(deliveries[0].json().is_some());

    let denied = bridge.dispatch("location", "requestPosition", "", Some("denied"));
    assert!(denied.is_success());
    let deliveries = bridge.script.wait_for(2, DELIVERY_TIMEOUT);
    assert_eq!(deliveries[1].token, "denied");
    assert_eq!(deliveries[1].response.status(), StatusCode::NoPermission);
    assert_eq!(bridge.probes.location.invoked(), 1);
}

#[test]
fn test_granted_prompt_reports_unconstructible_feature_through_callback() {
    let bridge = TestBridge::with_host(
        MockPermissionHost::new()
            .with_answer(Some(UserDecision::allow()))
            .with_prompt_delay(Duration::from_millis(20)),
    );

    let ack = bridge.dispatch("camera", "record", "", Some("rec"));
    assert_eq!(ack.status(), StatusCode::Success);
    let deliveries = bridge.script.wait_for(1, DELIVERY_TIMEOUT);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].token, "rec");
    assert_eq!(deliveries[0].response.status(), StatusCode::ServiceUnavailable);
    let prompted: Vec<_> = bridge.host.prompted().into_iter().map(|(_, p)| p).collect();
    assert_eq!(prompted, vec![CAMERA_PERMISSION.to_owned()]);

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(bridge.script.count(), 1);
}

#[test]
fn test_every_time_strategy_ignores_remembered_grant() {
    let host = MockPermissionHost::new()
        .with_default_state(HostDecision::Granted)
        .with_default_answer(Some(UserDecision::allow_always()));
    let bridge = TestBridge::with_host(host);

    // First-time actions trust the host grant.
    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert_eq!(bridge.host.prompt_count(), 0);

    // Every-time actions always ask.
    for n in 1..=2 {
        assert!(bridge.dispatch("location", "watchPosition", "", Some("w")).is_success());
        assert_eq!(bridge.script.wait_for(n, DELIVERY_TIMEOUT).len(), n);
    }
    assert_eq!(bridge.host.prompt_count(), 2);
}

#[test]
fn test_revoke_forgets_decisions() {
    let bridge = TestBridge::with_host(
        MockPermissionHost::new().with_default_answer(Some(UserDecision::allow_always())),
    );
    let app = bridge.bridge().app_id().clone();

    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert_eq!(bridge.host.prompt_count(), 1);

    bridge.dispatcher().gate().revoke_permission(&app, LOCATION_PERMISSION);
    assert!(bridge.dispatch("location", "getPosition", "", None).is_success());
    assert_eq!(bridge.host.prompt_count(), 2);

    bridge.dispatcher().gate().revoke(&app);
    bridge.host.queue_answer(Some(UserDecision::deny()));
    let response = bridge.dispatch("location", "getPosition", "", None);
    assert_eq!(response.status(), StatusCode::NoPermission);
    assert_eq!(bridge.host.prompt_count(), 3);
}

#[test]
fn test_host_denial_is_final() {
    let host = MockPermissionHost::new()
        .with_state(LOCATION_PERMISSION, HostDecision::Denied)
        .with_default_answer(Some(UserDecision::allow_always()));
    let bridge = TestBridge::with_host(host);

    let response = bridge.dispatch("location", "requestPosition", "", Some("cb"));
    assert_eq!(response.status(), StatusCode::NoPermission);
    assert_eq!(bridge.host.prompt_count(), 0);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(bridge.script.count(), 0);
}
