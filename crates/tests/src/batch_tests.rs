//! Request coalescing through the batch optimizer, observed on the wire.

use crate::mock_infrastructure::{account_json, test_address, ManagerHarness, SolanaRpcMock};
use serde_json::{json, Value};
use solgate_core::{
    batch::BatchConfig,
    manager::CallError,
    responses::DecodeError,
    types::Priority,
};
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_account_reads_become_one_multi_account_call() {
    let mut rpc = SolanaRpcMock::new().await;
    let single = rpc.contextual("getAccountInfo", &json!(null)).expect(0).create_async().await;
    let multi = rpc
        .contextual(
            "getMultipleAccounts",
            &json!([account_json(1), account_json(2), account_json(3)]),
        )
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder()
        .endpoint("primary", rpc.url(), 5)
        .batch(BatchConfig { window: Duration::from_millis(50), ..BatchConfig::default() })
        .build();

    let reads = (0..3).map(|n| {
        harness.manager.call("getAccountInfo", json!([test_address(n)]), Priority::NORMAL)
    });
    let results = futures::future::join_all(reads).await;

    // each caller receives a single account in the usual {context, value} shape
    let lamports: u64 = results
        .iter()
        .map(|result| {
            let payload = result.as_ref().unwrap();
            assert!(payload["context"]["slot"].is_u64());
            payload["value"]["lamports"].as_u64().unwrap()
        })
        .sum();
    assert_eq!(lamports, 6);

    single.assert_async().await;
    multi.assert_async().await;
}

#[tokio::test]
async fn test_different_configs_are_not_merged() {
    let mut rpc = SolanaRpcMock::new().await;
    let base64 = rpc
        .contextual_containing("getMultipleAccounts", r#""base64""#, &json!([account_json(10)]))
        .expect(1)
        .create_async()
        .await;
    let parsed = rpc
        .contextual_containing("getMultipleAccounts", r#""jsonParsed""#, &json!([account_json(20)]))
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();

    let base64_params = json!([test_address(1), {"encoding": "base64"}]);
    let parsed_params = json!([test_address(2), {"encoding": "jsonParsed"}]);
    let (a, b) = tokio::join!(
        harness.manager.call("getAccountInfo", base64_params, Priority::NORMAL),
        harness.manager.call("getAccountInfo", parsed_params, Priority::NORMAL),
    );
    assert_eq!(a.unwrap()["value"]["lamports"], 10);
    assert_eq!(b.unwrap()["value"]["lamports"], 20);

    base64.assert_async().await;
    parsed.assert_async().await;
}

#[tokio::test]
async fn test_large_account_lists_are_chunked() {
    let mut rpc = SolanaRpcMock::new().await;
    let first_needle = format!("\"{}\"", test_address(0));
    let last_needle = format!("\"{}\"", test_address(149));
    let first: Vec<Value> = (0..100).map(|_| account_json(1)).collect();
    let second: Vec<Value> = (0..50).map(|_| account_json(2)).collect();

    let first_chunk = rpc
        .contextual_containing("getMultipleAccounts", &first_needle, &Value::Array(first))
        .expect(1)
        .create_async()
        .await;
    let second_chunk = rpc
        .contextual_containing("getMultipleAccounts", &last_needle, &Value::Array(second))
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let addresses: Vec<String> = (0..150).map(test_address).collect();

    let accounts =
        harness.manager.get_multiple_accounts(&addresses, Priority::NORMAL).await.unwrap();
    assert_eq!(accounts.len(), 150);
    assert!(accounts[..100].iter().all(|account| account.as_ref().unwrap().lamports == 1));
    assert!(accounts[100..].iter().all(|account| account.as_ref().unwrap().lamports == 2));

    first_chunk.assert_async().await;
    second_chunk.assert_async().await;
}

#[tokio::test]
async fn test_batch_error_reaches_every_caller() {
    let mut rpc = SolanaRpcMock::new().await;
    let _failing = rpc.http_status("getMultipleAccounts", 503).create_async().await;

    let harness = ManagerHarness::builder().endpoint("only", rpc.url(), 5).build();

    let reads = (0..4).map(|n| {
        harness.manager.call("getAccountInfo", json!([test_address(n)]), Priority::NORMAL)
    });
    let results = futures::future::join_all(reads).await;

    assert!(results.iter().all(Result::is_err));
    assert!(results.iter().all(|result| result.as_ref().unwrap_err().is_retryable()));
}

#[tokio::test]
async fn test_short_account_list_is_a_decode_error() {
    let mut rpc = SolanaRpcMock::new().await;
    let _short = rpc
        .contextual("getMultipleAccounts", &json!([account_json(1)]))
        .create_async()
        .await;

    let harness = ManagerHarness::builder().endpoint("only", rpc.url(), 5).build();
    let addresses = vec![test_address(1), test_address(2)];

    let err =
        harness.manager.get_multiple_accounts(&addresses, Priority::NORMAL).await.unwrap_err();
    let CallError::Decode(DecodeError::UnexpectedShape { method, .. }) = err else {
        panic!("expected a decode error, got {err:?}");
    };
    assert_eq!(method, "getMultipleAccounts");
}
