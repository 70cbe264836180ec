use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

use crate::{
    batch::WireDispatch,
    limiter::RateLimiter,
    manager::errors::CallError,
    metrics::MetricsCollector,
    security::SecurityLayer,
    types::{category_for, Priority, RequestCategory},
    upstream::{endpoint::Endpoint, errors::UpstreamError},
};

/// Per-category request timeouts. Each bounds a whole call: the rate-limit wait, the
/// send and any fallback attempt all share one deadline.
#[derive(Debug, Clone)]
pub struct CategoryTimeouts {
    pub discovery: Duration,
    pub token_info: Duration,
    pub transaction: Duration,
    pub account: Duration,
}

impl Default for CategoryTimeouts {
    fn default() -> Self {
        Self {
            discovery: Duration::from_millis(30_000),
            token_info: Duration::from_millis(10_000),
            transaction: Duration::from_millis(15_000),
            account: Duration::from_millis(8_000),
        }
    }
}

impl CategoryTimeouts {
    #[must_use]
    pub fn for_category(&self, category: RequestCategory) -> Duration {
        match category {
            RequestCategory::Discovery => self.discovery,
            RequestCategory::TokenInfo => self.token_info,
            RequestCategory::Transaction => self.transaction,
            RequestCategory::Account => self.account,
        }
    }

    /// The instant by which a call to `method` started now must finish.
    #[must_use]
    pub fn deadline_for(&self, method: &str) -> Instant {
        Instant::now() + self.for_category(category_for(method))
    }
}

/// One wire call against a chosen endpoint: rate-limit capacity, then auth material,
/// then the breaker-wrapped send, with metrics on every outcome.
pub struct Dispatcher {
    limiter: Arc<RateLimiter>,
    security: Arc<SecurityLayer>,
    metrics: Arc<MetricsCollector>,
    timeouts: CategoryTimeouts,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        limiter: Arc<RateLimiter>,
        security: Arc<SecurityLayer>,
        metrics: Arc<MetricsCollector>,
        timeouts: CategoryTimeouts,
    ) -> Self {
        Self { limiter, security, metrics, timeouts }
    }

    #[must_use]
    pub fn timeouts(&self) -> &CategoryTimeouts {
        &self.timeouts
    }

    /// Sends `method` to `endpoint`, finishing by `deadline`.
    ///
    /// The rate-limit wait and the send each get only what is left of the budget.
    ///
    /// # Errors
    ///
    /// - [`CallError::RateLimitExceeded`] when no capacity was granted in time
    /// - [`CallError::Credential`] when auth material could not be produced
    /// - [`CallError::CircuitOpen`], [`CallError::Upstream`] or [`CallError::Transport`]
    ///   from the endpoint, including a timeout once the deadline has passed
    pub async fn send(
        &self,
        endpoint: &Arc<Endpoint>,
        method: &str,
        params: &Value,
        priority: Priority,
        deadline: Instant,
    ) -> Result<Value, CallError> {
        let category = category_for(method);
        let name = endpoint.name();

        let max_wait = deadline.saturating_duration_since(Instant::now());
        if let Err(e) = self.limiter.acquire(name, category, priority, max_wait).await {
            self.metrics.record_rate_limited(name, category);
            return Err(CallError::from_limiter(name, e));
        }

        let auth = self.security.outbound_auth(name, method, params).map_err(|e| {
            tracing::warn!(endpoint = %name, method = %method, error = %e, "refusing to dispatch");
            self.metrics.record_error(name, "credential");
            CallError::Credential(e)
        })?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::debug!(endpoint = %name, method = %method, "deadline passed before send");
            self.metrics.record_error(name, UpstreamError::Timeout.kind());
            return Err(CallError::from_upstream(name, UpstreamError::Timeout));
        }

        let start = Instant::now();
        let result = endpoint.send(method, params, &auth, remaining).await;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                self.metrics.record_request(method, name, true, latency_ms);
                tracing::debug!(
                    endpoint = %name,
                    method = %method,
                    latency_ms = latency_ms,
                    "request completed"
                );
                Ok(value)
            }
            Err(e) => {
                self.metrics.record_request(method, name, false, latency_ms);
                self.metrics.record_error(name, e.kind());
                Err(CallError::from_upstream(name, e))
            }
        }
    }
}

#[async_trait]
impl WireDispatch for Dispatcher {
    async fn dispatch(
        &self,
        endpoint: &Arc<Endpoint>,
        method: &str,
        params: &Value,
        priority: Priority,
        deadline: Instant,
    ) -> Result<Value, CallError> {
        self.send(endpoint, method, params, priority, deadline).await
    }
}
