//! Bounded program-account streaming.

use crate::mock_infrastructure::{account_json, test_address, ManagerHarness, SolanaRpcMock};
use futures::StreamExt;
use mockito::Matcher;
use serde_json::json;
use solgate_core::{manager::CallError, types::Priority};

#[tokio::test]
async fn test_stream_yields_accounts_then_program_errors() {
    let mut rpc = SolanaRpcMock::new().await;
    let healthy = test_address(10);
    let broken = test_address(11);

    let _healthy = rpc
        .result_containing(
            "getProgramAccounts",
            &format!("\"{healthy}\""),
            &json!([
                { "pubkey": test_address(20), "account": account_json(5) },
                { "pubkey": test_address(21), "account": account_json(6) }
            ]),
        )
        .create_async()
        .await;
    let _broken = rpc
        .server()
        .mock("POST", "/")
        .match_body(Matcher::Regex(format!("\"{broken}\"")))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32602, "message": "Invalid param"}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let mut stream = harness.manager.stream_program_accounts(
        vec![healthy, broken],
        Some(json!({"encoding": "base64"})),
        Priority::LOW,
    );

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.pubkey, test_address(20));
    assert_eq!(first.account.lamports, 5);
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.account.lamports, 6);

    let failure = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(failure, CallError::Upstream { code: -32602, .. }));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_works_as_futures_stream() {
    let mut rpc = SolanaRpcMock::new().await;
    let accounts: Vec<_> = (0..5)
        .map(|n| json!({ "pubkey": test_address(n), "account": account_json(n as u64) }))
        .collect();
    let _program = rpc.result("getProgramAccounts", &json!(accounts)).create_async().await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let stream =
        harness.manager.stream_program_accounts(vec![test_address(30)], None, Priority::NORMAL);

    let lamports: Vec<u64> = stream.map(|item| item.unwrap().account.lamports).collect().await;
    assert_eq!(lamports, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_cancelled_stream_ends() {
    let mut rpc = SolanaRpcMock::new().await;
    let accounts: Vec<_> =
        (0..10).map(|n| json!({ "pubkey": test_address(n), "account": account_json(1) })).collect();
    let _program = rpc.result("getProgramAccounts", &json!(accounts)).create_async().await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let mut stream =
        harness.manager.stream_program_accounts(vec![test_address(31)], None, Priority::NORMAL);

    assert!(stream.next().await.unwrap().is_ok());
    stream.cancel();

    // whatever was buffered drains, then the stream ends
    let mut remaining = 0;
    while stream.next().await.is_some() {
        remaining += 1;
    }
    assert!(remaining < 10);
}
