//! Transaction confirmation polling.

use crate::mock_infrastructure::{status_json, test_signature, ManagerHarness, SolanaRpcMock};
use serde_json::json;
use solgate_core::manager::{CallError, ConfirmationOutcome};

#[tokio::test]
async fn test_confirmed_transaction() {
    let mut rpc = SolanaRpcMock::new().await;
    let statuses = rpc
        .contextual("getSignatureStatuses", &json!([status_json(1_234, "confirmed")]))
        .expect(1)
        .create_async()
        .await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let outcome =
        harness.manager.confirm_transaction(&test_signature(0), "confirmed").await.unwrap();

    assert_eq!(
        outcome,
        ConfirmationOutcome::Confirmed { slot: 1_234, status: "confirmed".to_string() }
    );
    statuses.assert_async().await;
}

#[tokio::test]
async fn test_failed_transaction() {
    let mut rpc = SolanaRpcMock::new().await;
    let mut status = status_json(88, "confirmed");
    status["err"] = json!({"InstructionError": [0, {"Custom": 1}]});
    let _statuses = rpc.contextual("getSignatureStatuses", &json!([status])).create_async().await;

    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();
    let outcome =
        harness.manager.confirm_transaction(&test_signature(1), "finalized").await.unwrap();

    match outcome {
        ConfirmationOutcome::Failed { slot, err } => {
            assert_eq!(slot, 88);
            assert_eq!(err["InstructionError"][1]["Custom"], 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_transaction_times_out() {
    let mut rpc = SolanaRpcMock::new().await;
    let statuses =
        rpc.contextual("getSignatureStatuses", &json!([null])).expect(3).create_async().await;

    let harness =
        ManagerHarness::builder().endpoint("primary", rpc.url(), 5).confirm_retries(3).build();
    let signature = test_signature(2);
    let outcome = harness.manager.confirm_transaction(&signature, "confirmed").await.unwrap();

    assert_eq!(outcome, ConfirmationOutcome::Unconfirmed { attempts: 3 });
    assert_eq!(
        outcome.into_result(&signature),
        Err(CallError::TransactionConfirmationTimeout { signature: signature.clone(), attempts: 3 })
    );
    statuses.assert_async().await;
}

#[tokio::test]
async fn test_transient_poll_errors_use_up_attempts() {
    let mut rpc = SolanaRpcMock::new().await;
    let failing = rpc.http_status("getSignatureStatuses", 502).expect(2).create_async().await;

    let harness =
        ManagerHarness::builder().endpoint("primary", rpc.url(), 5).confirm_retries(2).build();
    let outcome =
        harness.manager.confirm_transaction(&test_signature(3), "processed").await.unwrap();

    assert_eq!(outcome, ConfirmationOutcome::Unconfirmed { attempts: 2 });
    failing.assert_async().await;
}

#[tokio::test]
async fn test_invalid_signature_is_rejected() {
    let rpc = SolanaRpcMock::new().await;
    let harness = ManagerHarness::builder().endpoint("primary", rpc.url(), 5).build();

    let err =
        harness.manager.confirm_transaction("not-a-signature", "confirmed").await.unwrap_err();
    assert!(matches!(err, CallError::Validation(_)));
}
