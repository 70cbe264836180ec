//! HMAC request signing for sensitive calls, plus replay protection for verifiers.
//!
//! The signed string is `method \n canonical(params) \n timestamp_ms \n nonce`, so two
//! semantically identical parameter objects produce the same signature regardless of key
//! order. Verification checks the timestamp window first, then the MAC in constant time,
//! and only then records the nonce, so forged requests cannot fill the nonce cache.

use dashmap::DashMap;
use ring::{
    hmac,
    rand::{SecureRandom, SystemRandom},
};
use serde_json::Value;
use std::time::Duration;

use super::{validation::is_base58, Secret, SecurityError};
use crate::utils::canonical_string;

pub const SIGNATURE_HEADER: &str = "x-solgate-signature";
pub const TIMESTAMP_HEADER: &str = "x-solgate-timestamp";
pub const NONCE_HEADER: &str = "x-solgate-nonce";

const NONCE_BYTES: usize = 16;
const SEED_PHRASE_LENGTHS: &[usize] = &[12, 15, 18, 21, 24];

/// When a call is considered sensitive, and how long nonces are remembered.
#[derive(Debug, Clone)]
pub struct SigningPolicy {
    /// Account queries over this many addresses are signed.
    pub large_query_threshold: usize,
    /// Accepted clock skew, and how long a seen nonce is remembered.
    pub nonce_window: Duration,
}

impl Default for SigningPolicy {
    fn default() -> Self {
        Self { large_query_threshold: 50, nonce_window: Duration::from_secs(300) }
    }
}

/// The three signature headers as received by a verifier.
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl SignatureHeaders {
    /// Picks the signature headers out of a header list (case-insensitive names).
    #[must_use]
    pub fn from_pairs(headers: &[(String, String)]) -> Option<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        };
        Some(Self {
            signature: find(SIGNATURE_HEADER)?,
            timestamp: find(TIMESTAMP_HEADER)?,
            nonce: find(NONCE_HEADER)?,
        })
    }
}

/// Seen nonces with their expiry (unix ms).
#[derive(Debug, Default)]
pub struct NonceCache {
    seen: DashMap<String, i64>,
}

impl NonceCache {
    /// Records `nonce` until `expires_at_ms`. Returns `false` if it was already present
    /// and has not expired.
    pub fn insert_if_unseen(&self, nonce: &str, now_ms: i64, expires_at_ms: i64) -> bool {
        match self.seen.entry(nonce.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() > now_ms {
                    return false;
                }
                entry.insert(expires_at_ms);
                true
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(expires_at_ms);
                true
            }
        }
    }

    /// Drops nonces whose window has passed. Returns how many were removed.
    pub fn purge(&self, now_ms: i64) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, expires_at| *expires_at > now_ms);
        before.saturating_sub(self.seen.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Per-endpoint HMAC-SHA256 signer and verifier.
pub struct RequestSigner {
    keys: DashMap<String, hmac::Key>,
    rng: SystemRandom,
    nonces: NonceCache,
    policy: SigningPolicy,
}

impl RequestSigner {
    #[must_use]
    pub fn new(policy: SigningPolicy) -> Self {
        Self {
            keys: DashMap::new(),
            rng: SystemRandom::new(),
            nonces: NonceCache::default(),
            policy,
        }
    }

    /// Installs or replaces the signing key for an endpoint.
    pub fn register_key(&self, endpoint: &str, secret: &Secret) {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.expose().as_bytes());
        self.keys.insert(endpoint.to_string(), key);
        tracing::debug!(endpoint = %endpoint, "signing key registered");
    }

    #[must_use]
    pub fn has_key(&self, endpoint: &str) -> bool {
        self.keys.contains_key(endpoint)
    }

    /// Decides whether a call is sensitive enough to sign.
    ///
    /// Sensitive means state-mutating, a large account query, or any string parameter
    /// that looks like a private key or a seed phrase.
    #[must_use]
    pub fn requires_signature(&self, method: &str, params: &Value) -> bool {
        match method {
            "sendTransaction" | "simulateTransaction" => return true,
            "getMultipleAccounts" => {
                let count = params
                    .get(0)
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                if count > self.policy.large_query_threshold {
                    return true;
                }
            }
            _ => {}
        }

        // signature-typed positions legitimately hold 87-88 char base58 strings
        let skip_first = matches!(method, "getTransaction" | "getSignatureStatuses");
        match params.as_array() {
            Some(items) => items
                .iter()
                .enumerate()
                .any(|(index, item)| !(skip_first && index == 0) && contains_secret_shape(item)),
            None => contains_secret_shape(params),
        }
    }

    /// Signs a call with the endpoint's key, returning the three signature headers.
    ///
    /// # Errors
    ///
    /// - [`SecurityError::SigningKeyMissing`] if the endpoint has no key
    /// - [`SecurityError::Randomness`] if the system RNG fails
    pub fn sign(
        &self,
        endpoint: &str,
        method: &str,
        params: &Value,
    ) -> Result<Vec<(String, String)>, SecurityError> {
        let key = self
            .keys
            .get(endpoint)
            .ok_or_else(|| SecurityError::SigningKeyMissing(endpoint.to_string()))?;

        let mut nonce = [0u8; NONCE_BYTES];
        self.rng.fill(&mut nonce).map_err(|_| SecurityError::Randomness)?;
        let nonce = hex::encode(nonce);
        let timestamp = chrono::Utc::now().timestamp_millis();

        let tag = hmac::sign(&key, signing_input(method, params, timestamp, &nonce).as_bytes());

        Ok(vec![
            (SIGNATURE_HEADER.to_string(), hex::encode(tag.as_ref())),
            (TIMESTAMP_HEADER.to_string(), timestamp.to_string()),
            (NONCE_HEADER.to_string(), nonce),
        ])
    }

    /// Verifies a signed call and consumes its nonce.
    ///
    /// # Errors
    ///
    /// - [`SecurityError::SigningKeyMissing`] if the endpoint has no key
    /// - [`SecurityError::StaleTimestamp`] if the timestamp is outside the window
    /// - [`SecurityError::InvalidSignature`] if the MAC does not match
    /// - [`SecurityError::ReplayedNonce`] if the nonce was already used in the window
    pub fn verify(
        &self,
        endpoint: &str,
        method: &str,
        params: &Value,
        headers: &SignatureHeaders,
    ) -> Result<(), SecurityError> {
        let key = self
            .keys
            .get(endpoint)
            .ok_or_else(|| SecurityError::SigningKeyMissing(endpoint.to_string()))?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let window_ms = self.policy.nonce_window.as_millis() as i64;
        let now = chrono::Utc::now().timestamp_millis();
        let timestamp: i64 =
            headers.timestamp.parse().map_err(|_| SecurityError::StaleTimestamp)?;
        if (now - timestamp).abs() > window_ms {
            return Err(SecurityError::StaleTimestamp);
        }

        let provided =
            hex::decode(&headers.signature).map_err(|_| SecurityError::InvalidSignature)?;
        hmac::verify(
            &key,
            signing_input(method, params, timestamp, &headers.nonce).as_bytes(),
            &provided,
        )
        .map_err(|_| SecurityError::InvalidSignature)?;

        if !self.nonces.insert_if_unseen(&headers.nonce, now, now + window_ms) {
            tracing::warn!(endpoint = %endpoint, "replayed nonce rejected");
            return Err(SecurityError::ReplayedNonce);
        }
        Ok(())
    }

    /// Drops expired nonces. Called by the runtime's purge task.
    pub fn purge_nonces(&self) -> usize {
        self.nonces.purge(chrono::Utc::now().timestamp_millis())
    }

    #[must_use]
    pub fn policy(&self) -> &SigningPolicy {
        &self.policy
    }
}

fn signing_input(method: &str, params: &Value, timestamp: i64, nonce: &str) -> String {
    format!("{method}\n{}\n{timestamp}\n{nonce}", canonical_string(params))
}

fn contains_secret_shape(value: &Value) -> bool {
    match value {
        Value::String(text) => is_key_shaped(text) || is_seed_phrase_shaped(text),
        Value::Array(items) => is_byte_array_key(items) || items.iter().any(contains_secret_shape),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "before" | "until"))
            .any(|(_, item)| contains_secret_shape(item)),
        _ => false,
    }
}

fn is_key_shaped(text: &str) -> bool {
    let hex_key = matches!(text.len(), 64 | 128) && text.chars().all(|c| c.is_ascii_hexdigit());
    let base58_key = (86..=88).contains(&text.len()) && is_base58(text);
    hex_key || base58_key
}

fn is_seed_phrase_shaped(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    SEED_PHRASE_LENGTHS.contains(&words.len()) &&
        words.iter().all(|word| !word.is_empty() && word.chars().all(|c| c.is_ascii_lowercase()))
}

fn is_byte_array_key(items: &[Value]) -> bool {
    items.len() == 64 && items.iter().all(|item| item.as_u64().is_some_and(|byte| byte <= 255))
}
