//! Credential placement, expiry and request signing on outbound calls.

use crate::mock_infrastructure::{ManagerHarness, SolanaRpcMock};
use chrono::Utc;
use mockito::Matcher;
use serde_json::json;
use solgate_core::{
    manager::CallError,
    security::{CredentialPlacement, SecurityError},
    types::Priority,
};

#[tokio::test]
async fn test_query_credential_is_attached() {
    let mut rpc = SolanaRpcMock::new().await;
    let slot = rpc
        .result("getSlot", &json!(1))
        .match_query(Matcher::UrlEncoded("api-key".to_string(), "s3cret".to_string()))
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder()
        .endpoint("helius", rpc.url(), 9)
        .credential("s3cret", CredentialPlacement::Query("api-key".to_string()), Utc::now())
        .build();

    harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap();
    slot.assert_async().await;

    let usage = harness.manager.security().credentials().usage("helius").unwrap();
    assert_eq!(usage.total, 1);
}

#[tokio::test]
async fn test_header_credential_is_attached() {
    let mut rpc = SolanaRpcMock::new().await;
    let slot = rpc
        .result("getSlot", &json!(1))
        .match_header("x-api-key", "s3cret")
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder()
        .endpoint("quicknode", rpc.url(), 9)
        .credential("s3cret", CredentialPlacement::Header("x-api-key".to_string()), Utc::now())
        .build();

    harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap();
    slot.assert_async().await;
}

#[tokio::test]
async fn test_bearer_credential_is_attached() {
    let mut rpc = SolanaRpcMock::new().await;
    let slot = rpc
        .result("getSlot", &json!(1))
        .match_header("authorization", "Bearer s3cret")
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder()
        .endpoint("triton", rpc.url(), 9)
        .credential("s3cret", CredentialPlacement::Bearer, Utc::now())
        .build();

    harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap();
    slot.assert_async().await;
}

#[tokio::test]
async fn test_expired_credential_blocks_dispatch() {
    let mut rpc = SolanaRpcMock::new().await;
    let untouched = rpc.server().mock("POST", Matcher::Any).expect(0).create_async().await;

    let harness = ManagerHarness::builder()
        .endpoint("helius", rpc.url(), 9)
        .credential(
            "old",
            CredentialPlacement::default(),
            Utc::now() - chrono::Duration::days(100),
        )
        .build();

    let err = harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap_err();
    assert!(!err.is_retryable());
    match err {
        CallError::Credential(SecurityError::CredentialExpired { service, max_age_secs, .. }) => {
            assert_eq!(service, "helius");
            assert_eq!(max_age_secs, 90 * 24 * 3600);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    untouched.assert_async().await;
}

#[tokio::test]
async fn test_public_endpoint_needs_no_credential() {
    let mut rpc = SolanaRpcMock::new().await;
    let slot = rpc
        .result("getSlot", &json!(3))
        .match_header("authorization", Matcher::Missing)
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder().endpoint("public", rpc.url(), 1).build();

    assert_eq!(harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap(), 3);
    slot.assert_async().await;
}

#[tokio::test]
async fn test_sensitive_call_is_signed() {
    let mut rpc = SolanaRpcMock::new().await;
    let send = rpc
        .result("sendTransaction", &json!(crate::mock_infrastructure::test_signature(1)))
        .match_header("x-solgate-signature", Matcher::Regex("^[0-9a-f]{64}$".to_string()))
        .match_header("x-solgate-timestamp", Matcher::Regex(r"^\d+$".to_string()))
        .match_header("x-solgate-nonce", Matcher::Regex("^[0-9a-f]+$".to_string()))
        .expect(1)
        .create_async()
        .await;
    let slot = rpc
        .result("getSlot", &json!(1))
        .match_header("x-solgate-signature", Matcher::Missing)
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder()
        .endpoint("jito", rpc.url(), 9)
        .signing_key("hmac-key")
        .build();

    harness
        .manager
        .call(
            "sendTransaction",
            json!(["AQABAgMEBQYH", {"encoding": "base64"}]),
            Priority::CRITICAL,
        )
        .await
        .unwrap();
    // routine reads are not signed
    harness.manager.call("getSlot", json!([]), Priority::NORMAL).await.unwrap();

    send.assert_async().await;
    slot.assert_async().await;
}
