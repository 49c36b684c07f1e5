//! Delivery order and concurrent instance creation.

use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use serde_json::json;
use trellis_core::StatusCode;
use trellis_test::{DELIVERY_TIMEOUT, TestBridge, test_app};

fn wait_for_listeners(bridge: &TestBridge, n: usize) {
    let deadline = Instant::now() + DELIVERY_TIMEOUT;
    while bridge.emitter.listener_count() < n {
        assert!(Instant::now() < deadline, "listener never registered");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_callback_deliveries_are_fifo() {
    let bridge = TestBridge::new();
    assert!(bridge.dispatch("events", "listen", "", Some("fifo")).is_success());
    wait_for_listeners(&bridge, 1);

    for n in 0..100 {
        bridge.emitter.fire(json!(n));
    }
    let deliveries = bridge.script.wait_for(100, DELIVERY_TIMEOUT);
    let order: Vec<_> = deliveries.iter().filter_map(|d| d.json()?.as_u64()).collect();
    assert_eq!(order, (0..100).collect::<Vec<u64>>());
}

#[test]
fn test_events_fired_from_many_threads_keep_per_thread_order() {
    let bridge = Arc::new(TestBridge::new());
    assert!(bridge.dispatch("events", "listen", "", Some("mt")).is_success());
    wait_for_listeners(&bridge, 1);

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let bridge = Arc::clone(&bridge);
            std::thread::spawn(move || {
                for n in 0..25 {
                    bridge.emitter.fire(json!({"thread": t, "n": n}));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let deliveries = bridge.script.wait_for(100, DELIVERY_TIMEOUT);
    assert_eq!(deliveries.len(), 100);
    for t in 0..4 {
        let seq: Vec<_> = deliveries
            .iter()
            .filter_map(|d| d.json())
            .filter(|v| v["thread"] == t)
            .map(|v| v["n"].as_u64().unwrap())
            .collect();
        assert_eq!(seq, (0..25).collect::<Vec<u64>>());
    }
}

#[test]
fn test_sync_callback_return_value_comes_first() {
    let bridge = TestBridge::new();
    let before = Instant::now();
    let response = bridge.dispatch("events", "snapshot", r#"{"count": 3}"#, Some("snap"));
    let returned = Instant::now();

    assert_eq!(response.status(), StatusCode::Success);
    assert_eq!(
        response.payload().and_then(|p| p.as_json()),
        Some(&json!("snapshot"))
    );
    let deliveries = bridge.script.wait_for(4, DELIVERY_TIMEOUT);
    assert_eq!(deliveries.len(), 4);
    assert!(deliveries.iter().all(|d| d.at >= before));
    let payloads: Vec<_> = deliveries.iter().map(|d| d.json().cloned()).collect();
    assert_eq!(
        payloads,
        vec![Some(json!(0)), Some(json!(1)), Some(json!(2)), Some(json!("done"))]
    );
    assert!(deliveries[3].response.is_terminal());
    assert!(deliveries[..3].iter().all(|d| !d.response.is_terminal()));
    assert!(returned >= before);
    assert!(bridge.dispatcher().callbacks().is_empty());
}

#[test]
fn test_concurrent_first_calls_build_one_instance() {
    let bridge = Arc::new(TestBridge::new());
    let barrier = Arc::new(Barrier::new(16));

    let threads: Vec<_> = (0..16)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                bridge.dispatch("echo", "ping", "", None)
            })
        })
        .collect();
    for thread in threads {
        assert!(thread.join().unwrap().is_success());
    }

    assert_eq!(bridge.probes.echo.created(), 1);
    assert_eq!(bridge.probes.echo.invoked(), 16);
    assert_eq!(bridge.dispatcher().instances().live_count(), 1);
}

#[test]
fn test_applications_get_separate_instances() {
    let bridge = TestBridge::new();
    let (other, other_script) = bridge.attach(test_app("com.example.other")).unwrap();

    assert!(bridge.dispatch("echo", "ping", "", None).is_success());
    assert!(other.dispatch("echo", "ping", "", None).is_success());
    assert_eq!(bridge.probes.echo.created(), 2);

    assert!(other.dispatch("events", "listen", "", Some(trellis_core::CallbackHandle::new("o"))).is_success());
    wait_for_listeners(&bridge, 1);
    bridge.emitter.fire(json!("to-other"));
    let deliveries = other_script.wait_for(1, DELIVERY_TIMEOUT);
    assert_eq!(deliveries[0].token, "o");
    assert_eq!(bridge.script.count(), 0);
}

#[test]
fn test_resubscribing_replaces_the_listener() {
    let bridge = TestBridge::new();
    assert!(bridge.dispatch("events", "listen", "", Some("cb1")).is_success());
    wait_for_listeners(&bridge, 1);
    assert!(bridge.dispatch("events", "listen", "", Some("cb2")).is_success());
    let deadline = Instant::now() + DELIVERY_TIMEOUT;
    while bridge.probes.events.invoked() < 2 {
        assert!(Instant::now() < deadline, "second listen never ran");
        std::thread::sleep(Duration::from_millis(2));
    }
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(bridge.emitter.listener_count(), 1);
    assert_eq!(bridge.emitter.fire(json!("x")), 1);
    let deliveries = bridge.script.wait_for(1, DELIVERY_TIMEOUT);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(bridge.script.count(), 1);
    assert_eq!(deliveries[0].token, "cb2");
    assert!(bridge.script.deliveries_for("cb1").is_empty());
}

#[test]
fn test_sync_callback_without_final_delivery_leaves_no_registration() {
    let bridge = TestBridge::new();
    for n in 0..50 {
        let handle = format!("quiet-{n}");
        let response = bridge.dispatch("events", "snapshot", r#"{"count": 0, "final": false}"#, Some(handle.as_str()));
        assert!(response.is_success());
    }
    assert!(bridge.dispatcher().callbacks().is_empty());

    // Progress sent during the call still arrives after the key closes.
    let response = bridge.dispatch("events", "snapshot", r#"{"count": 2, "final": false}"#, Some("partial"));
    assert!(response.is_success());
    assert!(bridge.dispatcher().callbacks().is_empty());
    let deliveries = bridge.script.wait_for(2, DELIVERY_TIMEOUT);
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.token == "partial"));
}
