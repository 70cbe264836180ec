use serde_json::{json, Value};

use crate::{
    manager::{errors::CallError, ConnectionManager},
    responses::{MethodResult, SignatureStatus},
    types::Priority,
};

/// Terminal result of polling a transaction's status.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Confirmed { slot: u64, status: String },
    Failed { slot: u64, err: Value },
    /// Retries ran out before the requested commitment was reached.
    Unconfirmed { attempts: u32 },
}

impl ConfirmationOutcome {
    /// For callers that prefer an error over an `Unconfirmed` value.
    ///
    /// # Errors
    ///
    /// [`CallError::TransactionConfirmationTimeout`] for `Unconfirmed`.
    pub fn into_result(self, signature: &str) -> Result<Self, CallError> {
        match self {
            Self::Unconfirmed { attempts } => {
                Err(CallError::TransactionConfirmationTimeout {
                    signature: signature.to_string(),
                    attempts,
                })
            }
            outcome => Ok(outcome),
        }
    }
}

impl ConnectionManager {
    /// Polls `getSignatureStatuses` until `signature` reaches `commitment`, fails, or the
    /// retry budget runs out.
    ///
    /// Transient errors between polls use up an attempt and polling continues.
    ///
    /// # Errors
    ///
    /// Non-retryable call errors such as validation or credential failures.
    pub async fn confirm_transaction(
        &self,
        signature: &str,
        commitment: &str,
    ) -> Result<ConfirmationOutcome, CallError> {
        let max_retries = self.settings().confirm_max_retries.max(1);
        let poll_interval = self.settings().confirm_poll_interval;

        for attempt in 1..=max_retries {
            let params = json!([[signature], { "searchTransactionHistory": true }]);
            match self.call_typed("getSignatureStatuses", params, Priority::HIGH).await {
                Ok(MethodResult::SignatureStatuses(statuses)) => {
                    if let Some(Some(status)) = statuses.value.into_iter().next() {
                        if let Some(outcome) = evaluate(&status, commitment) {
                            tracing::debug!(
                                signature = %signature,
                                attempt = attempt,
                                outcome = ?outcome,
                                "transaction status settled"
                            );
                            return Ok(outcome);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_retryable() || matches!(e, CallError::RateLimitExceeded { .. }) => {
                    tracing::debug!(
                        signature = %signature,
                        attempt = attempt,
                        error = %e,
                        "status poll failed"
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt < max_retries {
                tokio::time::sleep(poll_interval).await;
            }
        }

        tracing::warn!(signature = %signature, attempts = max_retries, "transaction unconfirmed");
        Ok(ConfirmationOutcome::Unconfirmed { attempts: max_retries })
    }
}

fn evaluate(status: &SignatureStatus, commitment: &str) -> Option<ConfirmationOutcome> {
    if let Some(err) = status.err.as_ref().filter(|err| !err.is_null()) {
        return Some(ConfirmationOutcome::Failed { slot: status.slot, err: err.clone() });
    }
    status.satisfies(commitment).then(|| ConfirmationOutcome::Confirmed {
        slot: status.slot,
        status: status.confirmation_status.clone().unwrap_or_else(|| "finalized".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(level: Option<&str>, err: Option<Value>) -> SignatureStatus {
        SignatureStatus {
            slot: 42,
            confirmations: level.map(|_| 1),
            err,
            confirmation_status: level.map(str::to_string),
        }
    }

    #[test]
    fn test_evaluate_waits_for_commitment() {
        assert_eq!(evaluate(&status(Some("processed"), None), "confirmed"), None);
        assert_eq!(
            evaluate(&status(Some("confirmed"), None), "confirmed"),
            Some(ConfirmationOutcome::Confirmed { slot: 42, status: "confirmed".to_string() })
        );
    }

    #[test]
    fn test_evaluate_reports_failure() {
        let err = json!({"InstructionError": [0, "Custom"]});
        assert_eq!(
            evaluate(&status(Some("confirmed"), Some(err.clone())), "finalized"),
            Some(ConfirmationOutcome::Failed { slot: 42, err })
        );
    }

    #[test]
    fn test_unconfirmed_into_result() {
        let err = ConfirmationOutcome::Unconfirmed { attempts: 3 }.into_result("sig").unwrap_err();
        assert_eq!(
            err,
            CallError::TransactionConfirmationTimeout { signature: "sig".to_string(), attempts: 3 }
        );
        let confirmed = ConfirmationOutcome::Confirmed { slot: 1, status: "finalized".into() };
        assert!(confirmed.into_result("sig").is_ok());
    }
}
