//! The connection manager: one instance per process, owning every endpoint, cache tier,
//! rate-limit bucket and breaker.
//!
//! # Call path
//!
//! 1. Validate and sanitize the params. Failures return before any cache or network work.
//! 2. For cacheable methods, compute the request key and return a live cache entry, or
//!    join an identical call already in flight.
//! 3. Select the best endpoint for the method's category.
//! 4. Send it, through the batch optimizer for account and status reads, or directly.
//!    Dispatch acquires rate-limit capacity, attaches credentials and signatures, and
//!    goes through the endpoint's circuit breaker.
//! 5. On a transport or provider-side failure, try once more on the next best endpoint.
//! 6. Cache the successful payload and hand it to every joined caller.
//!
//! Steps 3 to 5 share one deadline, set from the method category's timeout when the call
//! starts. A fallback attempt only gets what the first attempt left over.

pub mod confirm;
pub mod dispatch;
pub mod errors;
pub mod stream;

pub use confirm::ConfirmationOutcome;
pub use dispatch::{CategoryTimeouts, Dispatcher};
pub use errors::CallError;
pub use stream::AccountStream;

use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::Instant};

use crate::{
    batch::{is_batchable, BatchConfig, BatchOptimizer},
    cache::{InflightTracker, Join, TieredCache, TtlPolicy},
    events::{EventBus, ManagerEvent},
    limiter::RateLimiter,
    metrics::{HealthSummary, MetricsCollector},
    responses::{AccountInfo, Contextual, DecodeError, MethodResult},
    security::SecurityLayer,
    types::{category_for, Priority, RequestCategory},
    upstream::{
        endpoint::{Endpoint, EndpointSnapshot},
        registry::EndpointRegistry,
    },
    utils::request_key,
};

/// Manager-level behavior that is not owned by a single component.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Mixed into every cache key, typically the cluster name.
    pub cache_context: String,
    pub ttl: TtlPolicy,
    pub confirm_max_retries: u32,
    pub confirm_poll_interval: Duration,
    pub stream_buffer: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            cache_context: "mainnet-beta".to_string(),
            ttl: TtlPolicy::default(),
            confirm_max_retries: 30,
            confirm_poll_interval: Duration::from_millis(2_000),
            stream_buffer: 256,
        }
    }
}

/// Everything the manager is assembled from.
pub struct ManagerComponents {
    pub registry: EndpointRegistry,
    pub cache: Arc<TieredCache>,
    pub limiter: Arc<RateLimiter>,
    pub security: Arc<SecurityLayer>,
    pub metrics: Arc<MetricsCollector>,
    pub events: EventBus,
    pub batch: BatchConfig,
    pub timeouts: CategoryTimeouts,
    pub settings: ManagerSettings,
    pub shutdown: broadcast::Sender<()>,
}

type CachedOutcome = Result<Arc<Value>, CallError>;

pub struct ConnectionManager {
    registry: Arc<EndpointRegistry>,
    cache: Arc<TieredCache>,
    inflight: Arc<InflightTracker<CachedOutcome>>,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<Dispatcher>,
    batcher: Arc<BatchOptimizer>,
    security: Arc<SecurityLayer>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    batch_max_accounts: usize,
    settings: ManagerSettings,
    shutdown: broadcast::Sender<()>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(components: ManagerComponents) -> Self {
        let ManagerComponents {
            registry,
            cache,
            limiter,
            security,
            metrics,
            events,
            batch,
            timeouts,
            settings,
            shutdown,
        } = components;

        for endpoint in registry.all() {
            limiter.register(endpoint.name(), endpoint.rate_limit_rps());
        }

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&limiter),
            Arc::clone(&security),
            Arc::clone(&metrics),
            timeouts,
        ));
        let batch_max_accounts = batch.max_accounts;
        let batcher =
            Arc::new(BatchOptimizer::new(batch, dispatcher.clone(), Arc::clone(&metrics)));

        Self {
            registry: Arc::new(registry),
            cache,
            inflight: Arc::new(InflightTracker::new()),
            limiter,
            dispatcher,
            batcher,
            security,
            metrics,
            events,
            batch_max_accounts,
            settings,
            shutdown,
        }
    }

    /// Executes one JSON-RPC call.
    ///
    /// # Errors
    ///
    /// See [`CallError`]. Validation errors never reach the cache or the network.
    /// Transport and provider-side errors are surfaced only after one fallback attempt,
    /// and only if the call's deadline leaves time for it.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        priority: Priority,
    ) -> Result<Value, CallError> {
        let params = self.security.validate(method, params).inspect_err(|e| {
            tracing::debug!(method = %method, error = %e, "rejected invalid call");
            self.metrics.record_error("local", "validation");
        })?;
        let deadline = self.dispatcher.timeouts().deadline_for(method);

        let Some(ttl) = self.settings.ttl.ttl_for(method) else {
            return self.execute(method, &params, priority, deadline).await;
        };
        let key = request_key(method, &params, &self.settings.cache_context);

        loop {
            if let Some((payload, tier)) = self.cache.get(key) {
                self.metrics.record_cache_hit(tier.as_str());
                return Ok(payload.as_ref().clone());
            }

            match self.inflight.join(key) {
                Join::Leader(guard) => {
                    // a previous leader may have finished between the lookup and the join
                    if let Some((payload, tier)) = self.cache.get(key) {
                        self.metrics.record_cache_hit(tier.as_str());
                        guard.complete(Ok(Arc::clone(&payload)));
                        return Ok(payload.as_ref().clone());
                    }

                    self.metrics.record_cache_miss();
                    let outcome: CachedOutcome =
                        self.execute(method, &params, priority, deadline).await.map(Arc::new);
                    if let Ok(payload) = &outcome {
                        // an unknown transaction or slot may appear later
                        if !payload.is_null() {
                            self.cache.insert(key, Arc::clone(payload), ttl);
                        }
                    }
                    guard.complete(outcome.clone());
                    return outcome.map(|payload| payload.as_ref().clone());
                }
                Join::Follower(follower) => {
                    self.metrics.record_inflight_join();
                    if let Some(outcome) = follower.wait().await {
                        return outcome.map(|payload| payload.as_ref().clone());
                    }
                    tracing::debug!(method = %method, "in-flight leader abandoned, retrying");
                }
            }
        }
    }

    /// Executes a call and decodes the result for its method family.
    ///
    /// # Errors
    ///
    /// Any [`CallError`] from [`ConnectionManager::call`], or [`CallError::Decode`].
    pub async fn call_typed(
        &self,
        method: &str,
        params: Value,
        priority: Priority,
    ) -> Result<MethodResult, CallError> {
        let payload = self.call(method, params, priority).await?;
        Ok(MethodResult::decode(method, payload)?)
    }

    /// Fetches many accounts, split into `getMultipleAccounts` chunks sent concurrently.
    ///
    /// The result lines up with `addresses`; missing accounts are `None`.
    ///
    /// # Errors
    ///
    /// The first chunk error, or [`CallError::Decode`] for an unexpected payload.
    pub async fn get_multiple_accounts(
        &self,
        addresses: &[String],
        priority: Priority,
    ) -> Result<Vec<Option<AccountInfo>>, CallError> {
        const METHOD: &str = "getMultipleAccounts";
        let chunks = addresses.chunks(self.batch_max_accounts.max(1)).map(|chunk| {
            let params = json!([chunk, { "encoding": "base64" }]);
            async move {
                let payload = self.call(METHOD, params, priority).await?;
                let reason = match MethodResult::decode(METHOD, payload)? {
                    MethodResult::Accounts(Contextual { value, .. }) => {
                        if value.len() == chunk.len() {
                            return Ok::<_, CallError>(value);
                        }
                        format!("expected {} accounts, got {}", chunk.len(), value.len())
                    }
                    _ => "result is not an account list".to_string(),
                };
                Err(CallError::Decode(DecodeError::UnexpectedShape {
                    method: METHOD.to_string(),
                    reason,
                }))
            }
        });

        let mut accounts = Vec::with_capacity(addresses.len());
        for chunk in futures::future::join_all(chunks).await {
            accounts.extend(chunk?);
        }
        Ok(accounts)
    }

    async fn execute(
        &self,
        method: &str,
        params: &Value,
        priority: Priority,
        deadline: Instant,
    ) -> Result<Value, CallError> {
        let category = category_for(method);
        let endpoint = self.select(None, category).await?;

        match self.send_via(&endpoint, method, params, priority, deadline).await {
            Err(error) if error.is_retryable() => {
                if Instant::now() >= deadline {
                    tracing::debug!(method = %method, error = %error, "no time left for failover");
                    return Err(error);
                }
                let Ok(fallback) = self.select(Some(endpoint.name()), category).await else {
                    return Err(error);
                };
                tracing::warn!(
                    method = %method,
                    failed = %endpoint.name(),
                    fallback = %fallback.name(),
                    error = %error,
                    "failing over to next endpoint"
                );
                self.send_via(&fallback, method, params, priority, deadline).await
            }
            result => result,
        }
    }

    async fn select(
        &self,
        exclude: Option<&str>,
        category: RequestCategory,
    ) -> Result<Arc<Endpoint>, CallError> {
        let limiter = &self.limiter;
        let endpoint = self
            .registry
            .select_best_endpoint(exclude, |endpoint| {
                endpoint.in_flight() + limiter.queue_depth(endpoint.name(), category)
            })
            .await?;
        Ok(endpoint)
    }

    async fn send_via(
        &self,
        endpoint: &Arc<Endpoint>,
        method: &str,
        params: &Value,
        priority: Priority,
        deadline: Instant,
    ) -> Result<Value, CallError> {
        if is_batchable(method) {
            self.batcher.submit(endpoint, method, params, priority, deadline).await
        } else {
            self.dispatcher.send(endpoint, method, params, priority, deadline).await
        }
    }

    /// Liveness summary with per-endpoint state and a performance snapshot.
    pub async fn health_summary(&self) -> HealthSummary {
        let endpoints = self.endpoint_snapshots().await;
        HealthSummary::from_parts(endpoints, self.metrics.performance(self.cache.len()))
    }

    /// Prometheus text exposition.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.metrics.render()
    }

    pub async fn endpoint_snapshots(&self) -> Vec<EndpointSnapshot> {
        let mut snapshots = Vec::with_capacity(self.registry.len());
        for endpoint in self.registry.all() {
            snapshots.push(endpoint.snapshot().await);
        }
        snapshots
    }

    /// Forces an endpoint's breaker closed. Returns `false` for an unknown endpoint.
    pub async fn reset_circuit_breaker(&self, endpoint: &str) -> bool {
        let Some(endpoint) = self.registry.get(endpoint) else {
            return false;
        };
        endpoint.reset_circuit_breaker().await;
        self.metrics.record_circuit_state(endpoint.name(), endpoint.circuit_state().await);
        true
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn security(&self) -> &Arc<SecurityLayer> {
        &self.security
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub(crate) fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }
}
