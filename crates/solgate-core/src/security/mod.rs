//! Guards every outbound call: input validation and sanitization, provider credentials,
//! and HMAC signing of sensitive requests.
//!
//! # Order of checks
//!
//! 1. [`RequestValidator`] sanitizes and schema-checks the parameters. Failures never
//!    reach the cache or the network.
//! 2. [`CredentialStore`] produces the provider's auth header or query parameter for the
//!    chosen endpoint, refusing expired credentials.
//! 3. [`RequestSigner`] adds `x-solgate-signature`, `x-solgate-timestamp` and
//!    `x-solgate-nonce` when the call is sensitive and the endpoint has a signing key.

pub mod credentials;
pub mod signing;
pub mod validation;

pub use credentials::{
    CredentialPlacement, CredentialPolicy, CredentialRotator, CredentialStore, CredentialUsage,
};
pub use signing::{RequestSigner, SignatureHeaders, SigningPolicy};
pub use validation::{RequestValidator, ValidationError, ValidationLimits};

use serde::Deserialize;
use serde_json::Value;
use std::{fmt, sync::Arc};
use thiserror::Error;

/// A secret string whose `Debug` output is redacted.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Auth material for one outbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundAuth {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

/// Credential and signing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("No credential stored for {0}")]
    CredentialNotFound(String),

    /// The credential is older than the max age and must be rotated.
    #[error("Credential for {service} expired ({age_secs}s old, max {max_age_secs}s)")]
    CredentialExpired { service: String, age_secs: u64, max_age_secs: u64 },

    #[error("No credential rotator registered for {0}")]
    RotationUnavailable(String),

    #[error("Credential rotation failed for {service}: {reason}")]
    RotationFailed { service: String, reason: String },

    #[error("Invalid credential placement: {0}")]
    InvalidPlacement(String),

    #[error("No signing key for {0}")]
    SigningKeyMissing(String),

    #[error("Invalid request signature")]
    InvalidSignature,

    #[error("Signature timestamp outside the accepted window")]
    StaleTimestamp,

    #[error("Nonce already used")]
    ReplayedNonce,

    #[error("System random number generator failed")]
    Randomness,
}

/// Validation, credentials and signing behind one handle.
pub struct SecurityLayer {
    validator: RequestValidator,
    credentials: Arc<CredentialStore>,
    signer: RequestSigner,
}

impl SecurityLayer {
    #[must_use]
    pub fn new(
        validator: RequestValidator,
        credentials: Arc<CredentialStore>,
        signer: RequestSigner,
    ) -> Self {
        Self { validator, credentials, signer }
    }

    /// Sanitizes and schema-checks a call.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the input is malformed or unsafe.
    pub fn validate(&self, method: &str, params: Value) -> Result<Value, ValidationError> {
        self.validator.validate(method, params)
    }

    /// Builds the credential and, for sensitive calls, signature material for `endpoint`.
    ///
    /// Endpoints without a stored credential (public RPCs) get no auth material.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError`] when the credential is expired or signing fails.
    pub fn outbound_auth(
        &self,
        endpoint: &str,
        method: &str,
        params: &Value,
    ) -> Result<OutboundAuth, SecurityError> {
        let mut auth = if self.credentials.contains(endpoint) {
            self.credentials.get_secure_headers(endpoint)?
        } else {
            OutboundAuth::default()
        };

        if self.signer.requires_signature(method, params) {
            if self.signer.has_key(endpoint) {
                auth.headers.extend(self.signer.sign(endpoint, method, params)?);
            } else {
                tracing::debug!(
                    endpoint = %endpoint,
                    method = %method,
                    "sensitive call to endpoint without signing key"
                );
            }
        }
        Ok(auth)
    }

    /// Checks a signed request as a receiving proxy or provider would.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError`] on a bad MAC, stale timestamp or replayed nonce.
    pub fn verify_signature(
        &self,
        endpoint: &str,
        method: &str,
        params: &Value,
        headers: &SignatureHeaders,
    ) -> Result<(), SecurityError> {
        self.signer.verify(endpoint, method, params, headers)
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    #[must_use]
    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    #[must_use]
    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }
}
