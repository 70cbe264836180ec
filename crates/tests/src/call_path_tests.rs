//! Validation, caching and in-flight deduplication on the `call` path.

use crate::mock_infrastructure::{
    test_address, unresponsive_endpoint, ManagerHarness, SolanaRpcMock,
};
use serde_json::json;
use solgate_core::{
    cache::TtlPolicy,
    manager::CallError,
    security::ValidationError,
    types::Priority,
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

#[tokio::test]
async fn test_concurrent_identical_calls_share_one_upstream_request() {
    let mut rpc = SolanaRpcMock::new().await;
    let balance = rpc.contextual("getBalance", &json!(5_000)).expect(1).create_async().await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let address = test_address(7);

    let calls =
        (0..10).map(|_| harness.manager.call("getBalance", json!([address]), Priority::NORMAL));
    let results = futures::future::join_all(calls).await;

    for result in &results {
        assert_eq!(result.as_ref().unwrap()["value"], 5_000);
    }
    // later callers are served from cache
    let cached =
        harness.manager.call("getBalance", json!([address]), Priority::NORMAL).await.unwrap();
    assert_eq!(cached["value"], 5_000);

    balance.assert_async().await;
}

#[tokio::test]
async fn test_equivalent_params_hit_the_same_cache_entry() {
    let mut rpc = SolanaRpcMock::new().await;
    let account = rpc
        .contextual("getAccountInfo", &json!(crate::mock_infrastructure::account_json(1)))
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let address = test_address(1);

    let first_params = json!([address, {"encoding": "base64", "commitment": "confirmed"}]);
    let first = harness.manager.call("getAccountInfo", first_params, Priority::NORMAL).await;
    // key order differs but the canonical form is identical
    let second_params = json!([address, {"commitment": "confirmed", "encoding": "base64"}]);
    let second = harness.manager.call("getAccountInfo", second_params, Priority::NORMAL).await;

    assert_eq!(first.unwrap(), second.unwrap());
    account.assert_async().await;
}

#[tokio::test]
async fn test_cached_result_expires_after_ttl() {
    let mut rpc = SolanaRpcMock::new().await;
    let balance = rpc.contextual("getBalance", &json!(1)).expect(2).create_async().await;

    let harness = ManagerHarness::builder()
        .endpoint("primary", rpc.url(), 5)
        .ttl(TtlPolicy { account: Duration::from_millis(200), ..TtlPolicy::default() })
        .build();
    let params = json!([test_address(3)]);

    harness.manager.call("getBalance", params.clone(), Priority::NORMAL).await.unwrap();
    harness.manager.call("getBalance", params.clone(), Priority::NORMAL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    harness.manager.call("getBalance", params, Priority::NORMAL).await.unwrap();

    balance.assert_async().await;
}

#[tokio::test]
async fn test_null_results_are_not_cached() {
    let mut rpc = SolanaRpcMock::new().await;
    let transaction = rpc.result("getTransaction", &json!(null)).expect(2).create_async().await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let params = json!([crate::mock_infrastructure::test_signature(0)]);

    for _ in 0..2 {
        let result = harness.manager.call("getTransaction", params.clone(), Priority::NORMAL).await;
        assert!(result.unwrap().is_null());
    }

    transaction.assert_async().await;
}

#[tokio::test]
async fn test_invalid_input_never_reaches_the_network() {
    let mut rpc = SolanaRpcMock::new().await;
    let untouched = rpc.server().mock("POST", mockito::Matcher::Any).expect(0).create_async().await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();

    let err = harness
        .manager
        .call("getBalance", json!(["0OIl-not-base58"]), Priority::NORMAL)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Validation(ValidationError::InvalidAddress(_))));

    let err =
        harness.manager.call("eth_blockNumber", json!([]), Priority::NORMAL).await.unwrap_err();
    assert_eq!(
        err,
        CallError::Validation(ValidationError::MethodNotAllowed("eth_blockNumber".to_string()))
    );
    assert_eq!(err.json_rpc_code(), -32601);

    let err = harness
        .manager
        .call("getAccountInfo", json!([test_address(0), {"encoding": "hex"}]), Priority::NORMAL)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Validation(ValidationError::InvalidEncoding(_))));

    untouched.assert_async().await;
}

#[tokio::test]
async fn test_typed_call_decodes_balance() {
    let mut rpc = SolanaRpcMock::new().await;
    let _balance = rpc.contextual("getBalance", &json!(42)).create_async().await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let result =
        harness.manager.call_typed("getBalance", json!([test_address(2)]), Priority::NORMAL).await;

    match result.unwrap() {
        solgate_core::responses::MethodResult::Balance(balance) => {
            assert_eq!(balance.value, 42);
            assert_eq!(balance.context.slot, crate::mock_infrastructure::rpc_mock::MOCK_SLOT);
        }
        other => panic!("unexpected variant: {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limit_wait_counts_against_the_call_timeout() {
    let timeout = Duration::from_secs(1);
    let harness = ManagerHarness::builder()
        .endpoint("hang", unresponsive_endpoint().await, 5)
        .rate_limit_rps(1)
        .timeout(timeout)
        .no_cache()
        .build();

    // spends the window's only request, then hangs until its own deadline
    let manager = Arc::clone(&harness.manager);
    let first = tokio::spawn(async move {
        manager.call("getBalance", json!([test_address(1)]), Priority::NORMAL).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let second =
        harness.manager.call("getBalance", json!([test_address(2)]), Priority::NORMAL).await;
    let elapsed = started.elapsed();

    assert!(
        matches!(second, Err(CallError::Transport { .. } | CallError::RateLimitExceeded { .. })),
        "{second:?}"
    );
    assert!(elapsed <= timeout + Duration::from_millis(300), "queued call took {elapsed:?}");
    assert!(matches!(first.await.unwrap(), Err(CallError::Transport { .. })));
}
