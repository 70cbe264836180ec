//! Typed views over provider results.
//!
//! Providers answer with loosely shaped JSON. Callers that want structure use
//! [`MethodResult::decode`], which maps a method's payload onto an explicit variant and
//! reports anything unexpected as a [`DecodeError`] rather than guessing.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected {method} result shape: {reason}")]
    UnexpectedShape { method: String, reason: String },

    #[error("No typed decoder for {0}")]
    Unsupported(String),
}

/// Slot context attached to most account-level results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    pub slot: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// A result wrapped as `{context, value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contextual<T> {
    pub context: ResponseContext,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: String,
    /// Encoded as requested: `[data, encoding]`, or an object for `jsonParsed`.
    pub data: Value,
    pub executable: bool,
    #[serde(default)]
    pub rent_epoch: Option<u64>,
    #[serde(default)]
    pub space: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramAccount {
    pub pubkey: String,
    pub account: AccountInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub confirmation_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: u64,
    /// `None` once the transaction is rooted.
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    /// Whether this status has reached `commitment`. A rooted status (no confirmations
    /// count) satisfies every level.
    #[must_use]
    pub fn satisfies(&self, commitment: &str) -> bool {
        fn rank(level: &str) -> u8 {
            match level {
                "finalized" => 2,
                "confirmed" => 1,
                _ => 0,
            }
        }
        if self.confirmations.is_none() && self.confirmation_status.is_none() {
            return true;
        }
        self.confirmation_status.as_deref().map_or(0, rank) >= rank(commitment)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
    pub transaction: Value,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
}

/// One decoded result per method family.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    Account(Contextual<Option<AccountInfo>>),
    Accounts(Contextual<Vec<Option<AccountInfo>>>),
    ProgramAccounts(Vec<ProgramAccount>),
    TokenAccounts(Contextual<Vec<ProgramAccount>>),
    Signatures(Vec<SignatureInfo>),
    SignatureStatuses(Contextual<Vec<Option<SignatureStatus>>>),
    /// `None` when the transaction is unknown to the provider.
    Transaction(Option<Box<TransactionResult>>),
    Balance(Contextual<u64>),
    Slot(u64),
    /// Methods whose payload is passed through untouched.
    Raw(Value),
}

impl MethodResult {
    /// Decodes `payload` according to the shape `method` returns.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnexpectedShape`] when the payload does not match.
    pub fn decode(method: &str, payload: Value) -> Result<Self, DecodeError> {
        Ok(match method {
            "getAccountInfo" => Self::Account(parse(method, payload)?),
            "getMultipleAccounts" => Self::Accounts(parse(method, payload)?),
            "getProgramAccounts" => {
                // withContext wraps the list
                if payload.get("context").is_some() {
                    let wrapped: Contextual<Vec<ProgramAccount>> = parse(method, payload)?;
                    Self::ProgramAccounts(wrapped.value)
                } else {
                    Self::ProgramAccounts(parse(method, payload)?)
                }
            }
            "getTokenAccountsByOwner" => Self::TokenAccounts(parse(method, payload)?),
            "getSignaturesForAddress" => Self::Signatures(parse(method, payload)?),
            "getSignatureStatuses" => Self::SignatureStatuses(parse(method, payload)?),
            "getTransaction" => {
                let transaction: Option<TransactionResult> = parse(method, payload)?;
                Self::Transaction(transaction.map(Box::new))
            }
            "getBalance" => Self::Balance(parse(method, payload)?),
            "getSlot" | "getBlockHeight" => Self::Slot(parse(method, payload)?),
            _ => Self::Raw(payload),
        })
    }
}

fn parse<T: DeserializeOwned>(method: &str, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|e| DecodeError::UnexpectedShape {
        method: method.to_string(),
        reason: e.to_string(),
    })
}
