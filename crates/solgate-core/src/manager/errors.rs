use crate::{
    limiter::LimiterError,
    responses::DecodeError,
    security::{SecurityError, ValidationError},
    types::RequestCategory,
    upstream::{
        errors::{RpcErrorCategory, UpstreamError},
        registry::SelectionError,
    },
};

/// Errors surfaced to callers of the connection manager.
///
/// `Clone` so that a single in-flight outcome can be handed to every deduplicated or
/// batched waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Bad or unsafe input. Never sent over the wire and never retried.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rate limit exceeded for {endpoint} ({category})")]
    RateLimitExceeded { endpoint: String, category: RequestCategory },

    #[error("Circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: String },

    /// The provider answered with a JSON-RPC error object.
    #[error("Upstream error from {endpoint}: {code} {message}")]
    Upstream { endpoint: String, code: i32, message: String },

    /// Connection, timeout, HTTP status or malformed response.
    #[error("Transport error from {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Transaction {signature} not confirmed after {attempts} attempts")]
    TransactionConfirmationTimeout { signature: String, attempts: u32 },

    /// Missing or expired credential. The request was not dispatched.
    #[error("Credential error: {0}")]
    Credential(#[from] SecurityError),

    #[error("No available endpoints")]
    NoAvailableEndpoints,

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl CallError {
    /// Maps an endpoint-level error, keeping the endpoint name for the caller.
    #[must_use]
    pub fn from_upstream(endpoint: &str, error: UpstreamError) -> Self {
        if error.is_transport() {
            return Self::Transport { endpoint: endpoint.to_string(), message: error.to_string() };
        }
        match error {
            UpstreamError::RpcError(code, message) => {
                Self::Upstream { endpoint: endpoint.to_string(), code, message }
            }
            _ => Self::CircuitOpen { endpoint: endpoint.to_string() },
        }
    }

    #[must_use]
    pub fn from_limiter(endpoint: &str, error: LimiterError) -> Self {
        match error.category() {
            Some(category) => Self::RateLimitExceeded { endpoint: endpoint.to_string(), category },
            // an endpoint without budgets cannot be used at all
            None => Self::NoAvailableEndpoints,
        }
    }

    /// True when one fallback attempt against another endpoint is warranted.
    ///
    /// Transport failures and provider-side JSON-RPC errors qualify. Client errors would
    /// fail the same way anywhere.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Upstream { code, message, .. } => {
                RpcErrorCategory::from_code_and_message(*code, message).is_transient()
            }
            _ => false,
        }
    }

    /// Stable label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Upstream { .. } => "upstream",
            Self::Transport { .. } => "transport",
            Self::TransactionConfirmationTimeout { .. } => "confirmation_timeout",
            Self::Credential(_) => "credential",
            Self::NoAvailableEndpoints => "no_endpoints",
            Self::Decode(_) => "decode",
        }
    }

    /// JSON-RPC error code for the call surface.
    #[must_use]
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            Self::Validation(ValidationError::MethodNotAllowed(_)) => -32601,
            Self::Validation(_) => -32602,
            Self::Upstream { code, .. } => *code,
            Self::RateLimitExceeded { .. } => -32005,
            _ => -32603,
        }
    }
}

impl From<SelectionError> for CallError {
    fn from(error: SelectionError) -> Self {
        match error {
            SelectionError::NoAvailableEndpoints => Self::NoAvailableEndpoints,
            SelectionError::AllCircuitsOpen { endpoint } => Self::CircuitOpen { endpoint },
        }
    }
}
