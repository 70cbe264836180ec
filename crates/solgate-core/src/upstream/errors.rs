use thiserror::Error;

/// Classification of JSON-RPC errors returned by a provider.
///
/// Different error categories require different handling strategies:
/// - Client errors don't penalize endpoints and are never retried elsewhere
/// - Provider errors trip circuit breakers and are eligible for failover
/// - Rate limits are eligible for failover without penalizing health
/// - Execution errors (preflight failures) belong to the caller's transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCategory {
    /// Invalid request, method not found, invalid params, skipped slots.
    /// These are NOT the endpoint's fault.
    ClientError,
    /// Internal error, unhealthy node, missing block data, lagging context slot.
    ProviderError,
    /// Provider-side throttling surfaced as a JSON-RPC error.
    RateLimit,
    /// Parse error reported by the endpoint.
    ParseError,
    /// Transaction preflight or signature verification failure.
    ExecutionError,
}

impl RpcErrorCategory {
    /// Classifies a JSON-RPC error code into a category.
    ///
    /// Standard and cluster-specific codes:
    /// - -32700: Parse error
    /// - -32600..=-32602: Invalid request / method / params
    /// - -32603: Internal error
    /// - -32002: Transaction preflight failure
    /// - -32003: Transaction signature verification failure
    /// - -32004: Block not available
    /// - -32005: Node unhealthy
    /// - -32007 / -32009: Slot skipped / missing in long-term storage
    /// - -32015: Unsupported transaction version
    /// - -32016: Minimum context slot not reached
    /// - 429 / -32429: Provider rate limiting
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32602..=-32600 | -32007 | -32009 | -32015 => Self::ClientError,
            -32003 | -32002 => Self::ExecutionError,
            429 | -32429 => Self::RateLimit,
            // -32603, -32004, -32005, -32016 and unknown codes are the provider's problem
            _ => Self::ProviderError,
        }
    }

    /// Classifies a code and message, catching throttling reported through generic codes.
    #[must_use]
    pub fn from_code_and_message(code: i32, message: &str) -> Self {
        let category = Self::from_code(code);
        if category == Self::ProviderError {
            let message_lower = message.to_lowercase();
            if message_lower.contains("too many requests") ||
                message_lower.contains("rate limit") ||
                message_lower.contains("credits limit")
            {
                return Self::RateLimit;
            }
        }
        category
    }

    /// Returns `true` if the same request may succeed on another endpoint.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ProviderError)
    }

    #[must_use]
    pub fn should_penalize_upstream(&self) -> bool {
        matches!(self, Self::ProviderError | Self::ParseError)
    }

    /// Returns `true` if this error should count as a circuit breaker failure.
    #[must_use]
    pub fn should_trigger_circuit_breaker(&self) -> bool {
        matches!(self, Self::ProviderError | Self::ParseError)
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::ProviderError => "provider_error",
            Self::RateLimit => "rate_limit",
            Self::ParseError => "parse_error",
            Self::ExecutionError => "execution_error",
        }
    }
}

/// Errors that can occur when talking to one upstream endpoint.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded its category timeout.
    #[error("Request timeout")]
    Timeout,

    /// Failed to establish a connection to the endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-2xx HTTP status. First field is the status code.
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// JSON-RPC error object returned by the provider.
    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    /// Network-level error from the underlying HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response body could not be parsed or was missing `result`.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The endpoint's circuit breaker rejected the call.
    #[error("Circuit breaker is open")]
    CircuitBreakerOpen,

    /// No connection permit became available in time.
    #[error("Concurrency limit reached: {0}")]
    ConcurrencyLimit(String),
}

impl UpstreamError {
    /// Returns the RPC error category if this is an RPC error.
    #[must_use]
    pub fn rpc_category(&self) -> Option<RpcErrorCategory> {
        match self {
            Self::RpcError(code, message) => {
                Some(RpcErrorCategory::from_code_and_message(*code, message))
            }
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and another endpoint may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout |
            Self::Network(_) |
            Self::ConnectionFailed(_) |
            Self::ConcurrencyLimit(_) |
            Self::InvalidResponse(_) => true,
            Self::HttpError(status, _) => (500..=599).contains(status) || *status == 429,
            Self::RpcError(_, _) => self.rpc_category().is_some_and(|cat| cat.is_transient()),
            Self::CircuitBreakerOpen => false,
        }
    }

    /// Returns `true` if this error should count against the endpoint's breaker and health.
    ///
    /// Throttling (HTTP 429 or a rate-limit RPC error) is expected behavior and does not
    /// count. Neither do client or execution errors.
    #[must_use]
    pub fn should_penalize_upstream(&self) -> bool {
        match self {
            Self::Timeout |
            Self::Network(_) |
            Self::ConnectionFailed(_) |
            Self::InvalidResponse(_) => true,
            Self::HttpError(status, _) => (500..=599).contains(status),
            Self::RpcError(_, _) => {
                self.rpc_category().is_some_and(|cat| cat.should_trigger_circuit_breaker())
            }
            Self::CircuitBreakerOpen | Self::ConcurrencyLimit(_) => false,
        }
    }

    /// True for failures that happened below the JSON-RPC layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::RpcError(_, _) | Self::CircuitBreakerOpen)
    }

    /// Stable label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(_, _) => "http_error",
            Self::RpcError(_, _) => self.rpc_category().map_or("rpc_error", |cat| cat.as_str()),
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::CircuitBreakerOpen => "circuit_open",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_category_from_code() {
        assert_eq!(RpcErrorCategory::from_code(-32700), RpcErrorCategory::ParseError);

        assert_eq!(RpcErrorCategory::from_code(-32600), RpcErrorCategory::ClientError);
        assert_eq!(RpcErrorCategory::from_code(-32601), RpcErrorCategory::ClientError);
        assert_eq!(RpcErrorCategory::from_code(-32602), RpcErrorCategory::ClientError);
        assert_eq!(RpcErrorCategory::from_code(-32007), RpcErrorCategory::ClientError);

        assert_eq!(RpcErrorCategory::from_code(-32603), RpcErrorCategory::ProviderError);
        assert_eq!(RpcErrorCategory::from_code(-32005), RpcErrorCategory::ProviderError);
        assert_eq!(RpcErrorCategory::from_code(-32016), RpcErrorCategory::ProviderError);
        assert_eq!(RpcErrorCategory::from_code(-1), RpcErrorCategory::ProviderError);

        assert_eq!(RpcErrorCategory::from_code(-32002), RpcErrorCategory::ExecutionError);
        assert_eq!(RpcErrorCategory::from_code(429), RpcErrorCategory::RateLimit);
    }

    #[test]
    fn test_rate_limit_detected_from_message() {
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32000, "Too Many Requests for this key"),
            RpcErrorCategory::RateLimit
        );
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32000, "node is behind"),
            RpcErrorCategory::ProviderError
        );
        // message inspection never upgrades client errors
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32602, "rate limit"),
            RpcErrorCategory::ClientError
        );
    }

    #[test]
    fn test_category_policies() {
        assert!(RpcErrorCategory::ProviderError.should_trigger_circuit_breaker());
        assert!(RpcErrorCategory::ParseError.should_trigger_circuit_breaker());
        assert!(!RpcErrorCategory::ClientError.should_trigger_circuit_breaker());
        assert!(!RpcErrorCategory::RateLimit.should_trigger_circuit_breaker());
        assert!(!RpcErrorCategory::ExecutionError.should_trigger_circuit_breaker());

        assert!(RpcErrorCategory::RateLimit.is_transient());
        assert!(!RpcErrorCategory::ClientError.is_transient());
    }

    #[test]
    fn test_upstream_error_transient() {
        assert!(UpstreamError::Timeout.is_transient());
        assert!(UpstreamError::ConnectionFailed("refused".into()).is_transient());
        assert!(UpstreamError::HttpError(503, "unavailable".into()).is_transient());
        assert!(UpstreamError::HttpError(429, "slow down".into()).is_transient());
        assert!(!UpstreamError::HttpError(401, "unauthorized".into()).is_transient());
        assert!(UpstreamError::RpcError(-32005, "Node is unhealthy".into()).is_transient());
        assert!(!UpstreamError::RpcError(-32602, "Invalid param".into()).is_transient());
        assert!(!UpstreamError::CircuitBreakerOpen.is_transient());
    }

    #[test]
    fn test_upstream_error_penalizes() {
        assert!(UpstreamError::Timeout.should_penalize_upstream());
        assert!(UpstreamError::HttpError(502, "bad gateway".into()).should_penalize_upstream());
        assert!(!UpstreamError::HttpError(429, "slow down".into()).should_penalize_upstream());
        assert!(UpstreamError::RpcError(-32603, "internal".into()).should_penalize_upstream());
        assert!(!UpstreamError::RpcError(-32602, "invalid".into()).should_penalize_upstream());
        assert!(!UpstreamError::RpcError(-32002, "preflight".into()).should_penalize_upstream());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(UpstreamError::Timeout.kind(), "timeout");
        assert_eq!(UpstreamError::RpcError(-32602, "x".into()).kind(), "client_error");
        assert_eq!(UpstreamError::RpcError(-32005, "x".into()).kind(), "provider_error");
        assert!(UpstreamError::Timeout.is_transport());
        assert!(!UpstreamError::RpcError(-32603, "x".into()).is_transport());
    }
}
