//! Endpoint selection, failover and circuit breaking against mock providers.

use crate::mock_infrastructure::{
    test_address, unresponsive_endpoint, ManagerHarness, SolanaRpcMock,
};
use serde_json::json;
use solgate_core::{
    events::ManagerEvent,
    manager::CallError,
    types::Priority,
    upstream::CircuitBreakerConfig,
};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_transient_failure_fails_over_once() {
    let mut primary = SolanaRpcMock::new().await;
    let mut secondary = SolanaRpcMock::new().await;
    let primary_mock = primary.http_status("getSlot", 503).expect(1).create_async().await;
    let secondary_mock = secondary.result("getSlot", &json!(777)).expect(1).create_async().await;

    let harness = ManagerHarness::builder()
        .endpoint("premium", primary.url(), 10)
        .endpoint("public", secondary.url(), 1)
        .build();

    let slot = harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap();
    assert_eq!(slot, 777);

    primary_mock.assert_async().await;
    secondary_mock.assert_async().await;
}

#[tokio::test]
async fn test_second_failure_is_surfaced() {
    let mut primary = SolanaRpcMock::new().await;
    let mut secondary = SolanaRpcMock::new().await;
    let _primary = primary.http_status("getSlot", 503).create_async().await;
    let _secondary = secondary.http_status("getSlot", 502).create_async().await;

    let harness = ManagerHarness::builder()
        .endpoint("premium", primary.url(), 10)
        .endpoint("public", secondary.url(), 1)
        .no_cache()
        .build();

    let err = harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap_err();
    assert!(
        matches!(err, CallError::Transport { ref endpoint, .. } if endpoint == "public"),
        "{err:?}"
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_errors_do_not_fail_over() {
    let mut primary = SolanaRpcMock::new().await;
    let mut secondary = SolanaRpcMock::new().await;
    let primary_mock = primary
        .rpc_error("getBalance", -32602, "Invalid param: WrongSize")
        .expect(1)
        .create_async()
        .await;
    let secondary_mock =
        secondary.contextual("getBalance", &json!(1)).expect(0).create_async().await;

    let harness = ManagerHarness::builder()
        .endpoint("premium", primary.url(), 10)
        .endpoint("public", secondary.url(), 1)
        .build();

    let err = harness
        .manager
        .call("getBalance", json!([test_address(4)]), Priority::NORMAL)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CallError::Upstream {
            endpoint: "premium".to_string(),
            code: -32602,
            message: "Invalid param: WrongSize".to_string()
        }
    );

    // the caller's mistake does not count against the endpoint
    let snapshot = harness.manager.endpoint_snapshots().await;
    let premium = snapshot.iter().find(|endpoint| endpoint.name == "premium").unwrap();
    assert_eq!(premium.consecutive_failures, 0);

    primary_mock.assert_async().await;
    secondary_mock.assert_async().await;
}

#[tokio::test]
async fn test_open_breaker_endpoint_is_skipped() {
    let mut primary = SolanaRpcMock::new().await;
    let mut secondary = SolanaRpcMock::new().await;
    let primary_mock = primary.http_status("getSlot", 500).expect_at_most(2).create_async().await;
    let _secondary = secondary.result("getSlot", &json!(9)).create_async().await;

    let harness = ManagerHarness::builder()
        .endpoint("premium", primary.url(), 10)
        .endpoint("public", secondary.url(), 1)
        .breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            ..CircuitBreakerConfig::default()
        })
        .no_cache()
        .build();
    let mut events = harness.manager.subscribe_events();

    for _ in 0..5 {
        let slot = harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap();
        assert_eq!(slot, 9);
    }
    primary_mock.assert_async().await;

    let mut opened = false;
    while let Ok(event) = events.try_recv() {
        if let ManagerEvent::CircuitStateChanged { endpoint, to, .. } = event {
            opened |= &*endpoint == "premium" && to == "open";
        }
    }
    assert!(opened);
    let premium = harness.manager.registry().get("premium").unwrap();
    assert_eq!(premium.circuit_state().await.as_str(), "open");
}

#[tokio::test]
async fn test_reset_circuit_breaker() {
    let mut rpc = SolanaRpcMock::new().await;
    let _failing = rpc.http_status("getSlot", 500).create_async().await;

    let harness = ManagerHarness::builder()
        .endpoint("only", rpc.url(), 9)
        .breaker(CircuitBreakerConfig { failure_threshold: 1, ..CircuitBreakerConfig::default() })
        .no_cache()
        .build();

    let _ = harness.manager.call("getSlot", json!([]), Priority::NORMAL).await;
    let endpoint = harness.manager.registry().get("only").unwrap();
    assert_eq!(endpoint.circuit_state().await.as_str(), "open");

    assert!(harness.manager.reset_circuit_breaker("only").await);
    assert_eq!(endpoint.circuit_state().await.as_str(), "closed");
    assert!(!harness.manager.reset_circuit_breaker("missing").await);
}

#[tokio::test]
async fn test_no_endpoints_configured() {
    let harness = ManagerHarness::builder().build();
    let err = harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap_err();
    assert_eq!(err, CallError::NoAvailableEndpoints);
}

#[tokio::test]
async fn test_failover_shares_the_original_deadline() {
    let timeout = Duration::from_millis(500);
    let harness = ManagerHarness::builder()
        .endpoint("primary", unresponsive_endpoint().await, 9)
        .endpoint("public", unresponsive_endpoint().await, 1)
        .timeout(timeout)
        .no_cache()
        .build();

    let started = Instant::now();
    let err = harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, CallError::Transport { .. }), "{err:?}");
    // the first attempt used the whole budget, so no fallback was sent
    assert!(elapsed <= timeout + Duration::from_millis(300), "call took {elapsed:?}");
}
