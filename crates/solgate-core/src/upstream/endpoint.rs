use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use url::Url;

use crate::{
    events::{EventBus, ManagerEvent},
    security::OutboundAuth,
    types::{JsonRpcResponse, JSONRPC_VERSION},
    upstream::{
        circuit_breaker::{
            CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitTransition,
        },
        errors::UpstreamError,
        http_client::HttpClient,
        scoring::{EndpointHealth, HealthUpdate},
    },
};

/// Static identity of one provider.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub name: String,
    pub url: String,
    pub priority: u8,
    pub rate_limit_rps: u32,
}

/// Serializable view of an endpoint for health reports and admin tooling.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub priority: u8,
    pub active: bool,
    pub health: f64,
    pub avg_response_ms: f64,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub circuit_state: &'static str,
    pub in_flight: usize,
    pub active_connections: usize,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// One upstream provider: transport, circuit breaker and adaptive health.
///
/// Health and breaker state are mutated only through [`Endpoint::send`] and the probe
/// path, so every outcome feeds both state machines exactly once.
pub struct Endpoint {
    name: Arc<str>,
    url: Url,
    priority: u8,
    rate_limit_rps: u32,
    circuit_breaker: CircuitBreaker,
    transport: HttpClient,
    health: Mutex<EndpointHealth>,
    in_flight: AtomicUsize,
    next_id: AtomicU64,
    events: EventBus,
}

/// Decrements the in-flight counter however the request future ends.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Endpoint {
    /// Builds an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::ConnectionFailed`] when the URL does not parse.
    pub fn new(
        settings: EndpointSettings,
        breaker: CircuitBreakerConfig,
        transport: HttpClient,
        base_cooldown: Duration,
        events: EventBus,
    ) -> Result<Self, UpstreamError> {
        let url = Url::parse(&settings.url).map_err(|e| {
            UpstreamError::ConnectionFailed(format!("invalid url for {}: {e}", settings.name))
        })?;
        Ok(Self {
            name: Arc::from(settings.name.as_str()),
            url,
            priority: settings.priority,
            rate_limit_rps: settings.rate_limit_rps,
            circuit_breaker: CircuitBreaker::new(breaker),
            transport,
            health: Mutex::new(EndpointHealth::new(settings.priority, base_cooldown)),
            in_flight: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn rate_limit_rps(&self) -> u32 {
        self.rate_limit_rps
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Current health, response time estimate and active flag.
    #[must_use]
    pub fn health(&self) -> (f64, f64, bool) {
        let health = self.health.lock();
        (health.score, health.avg_response_ms, health.active)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.health.lock().active
    }

    /// Reactivates the endpoint if its cooldown has elapsed.
    pub fn try_reactivate(&self) -> bool {
        let reactivated = self.health.lock().try_reactivate(Instant::now());
        if reactivated {
            tracing::info!(endpoint = %self.name, "endpoint reactivated after cooldown");
            self.events.publish(ManagerEvent::EndpointReactivated { endpoint: self.name_arc() });
        }
        reactivated
    }

    /// Sends one JSON-RPC call through the breaker.
    ///
    /// A missing `result` on a successful response is returned as `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::CircuitBreakerOpen`] without touching the network when
    /// the breaker rejects the call, or the transport/provider error otherwise.
    pub async fn send(
        &self,
        method: &str,
        params: &Value,
        auth: &OutboundAuth,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let (admitted, transition) = self.circuit_breaker.admit().await;
        self.publish_transition(transition);
        if !admitted {
            return Err(UpstreamError::CircuitBreakerOpen);
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let _in_flight = InFlightGuard(&self.in_flight);

        let start = Instant::now();
        let result = self.dispatch(method, params, auth, timeout).await;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => self.record_success(latency_ms).await,
            Err(e) if e.should_penalize_upstream() => {
                tracing::debug!(
                    endpoint = %self.name,
                    method = %method,
                    error = %e,
                    latency_ms = latency_ms,
                    "upstream request failed"
                );
                self.record_failure(latency_ms, timeout).await;
            }
            Err(e) => {
                tracing::debug!(
                    endpoint = %self.name,
                    method = %method,
                    error = %e,
                    "upstream returned non-penalized error"
                );
            }
        }
        result
    }

    async fn dispatch(
        &self,
        method: &str,
        params: &Value,
        auth: &OutboundAuth,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_vec(&WireRequest { jsonrpc: JSONRPC_VERSION, id, method, params })
            .map_err(|e| UpstreamError::InvalidResponse(format!("request encode failed: {e}")))?;

        let url = if auth.query.is_empty() {
            self.url.clone()
        } else {
            let mut url = self.url.clone();
            url.query_pairs_mut().extend_pairs(auth.query.iter());
            url
        };

        let raw =
            self.transport.send_request(url.as_str(), &auth.headers, Bytes::from(body), timeout);
        let bytes = tokio::time::timeout(timeout, raw).await.map_err(|_| UpstreamError::Timeout)??;

        let response: JsonRpcResponse = serde_json::from_slice(&bytes).map_err(|e| {
            UpstreamError::InvalidResponse(format!("malformed JSON-RPC response: {e}"))
        })?;

        if let Some(error) = response.error {
            return Err(UpstreamError::RpcError(error.code, error.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Feeds a successful outcome into health and breaker.
    pub async fn record_success(&self, latency_ms: u64) {
        let update = self.health.lock().apply_success(latency_ms);
        self.publish_health(update);
        let transition = self.circuit_breaker.on_success().await;
        self.publish_transition(transition);
    }

    /// Feeds a failed outcome into health and breaker.
    pub async fn record_failure(&self, latency_ms: u64, timeout: Duration) {
        let update = self.health.lock().apply_failure(latency_ms, timeout);
        self.publish_health(update);
        let transition = self.circuit_breaker.on_failure().await;
        self.publish_transition(transition);
    }

    /// Forces the breaker closed.
    pub async fn reset_circuit_breaker(&self) {
        let transition = self.circuit_breaker.reset().await;
        self.publish_transition(transition);
    }

    pub async fn circuit_state(&self) -> CircuitBreakerState {
        self.circuit_breaker.get_state().await
    }

    pub async fn snapshot(&self) -> EndpointSnapshot {
        let circuit_state = self.circuit_breaker.get_state().await.as_str();
        let health = self.health.lock().clone();
        EndpointSnapshot {
            name: self.name.to_string(),
            priority: self.priority,
            active: health.active,
            health: health.score,
            avg_response_ms: health.avg_response_ms,
            consecutive_failures: health.consecutive_failures,
            total_requests: health.total_requests,
            total_failures: health.total_failures,
            circuit_state,
            in_flight: self.in_flight(),
            active_connections: self.transport.active_connections(),
        }
    }

    fn publish_health(&self, update: HealthUpdate) {
        if let Some(cooldown) = update.deactivated {
            #[allow(clippy::cast_possible_truncation)]
            let cooldown_ms = cooldown.as_millis() as u64;
            tracing::warn!(
                endpoint = %self.name,
                health = update.current,
                cooldown_ms = cooldown_ms,
                "endpoint deactivated"
            );
            self.events.publish(ManagerEvent::EndpointDeactivated {
                endpoint: self.name_arc(),
                health: update.current,
                cooldown_ms,
            });
        }
        if update.crossed_band() {
            self.events.publish(ManagerEvent::EndpointHealthChanged {
                endpoint: self.name_arc(),
                previous: update.previous,
                current: update.current,
            });
        }
    }

    fn publish_transition(&self, transition: Option<CircuitTransition>) {
        if let Some(CircuitTransition { from, to }) = transition {
            tracing::debug!(
                endpoint = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit breaker transition"
            );
            self.events.publish(ManagerEvent::CircuitStateChanged {
                endpoint: self.name_arc(),
                from: from.as_str(),
                to: to.as_str(),
            });
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the URL may embed a key in its path, so only the host is shown
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("host", &self.url.host_str())
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
