//! # Metrics
//!
//! Two paths, both fed by the same `record_*` calls:
//!
//! - **Prometheus**: counters, gauges and histograms through the `metrics` facade,
//!   rendered in text format by [`MetricsCollector::render`]. Recording is lock-free.
//! - **Performance snapshot**: a handful of process-local atomics summarized in the JSON
//!   health report, so the summary works even when another recorder owns the facade.
//!
//! Label values are interned; methods come from a fixed table and endpoint names from
//! configuration, so the interned set is bounded.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    OnceLock,
};

use crate::{
    types::{intern, RequestCategory},
    upstream::{circuit_breaker::CircuitBreakerState, endpoint::EndpointSnapshot},
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Fixed latency buckets in seconds: 5ms to 10s.
pub const LATENCY_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 256.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), LATENCY_BUCKETS)
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Full("solgate_batch_size".to_string()),
                BATCH_SIZE_BUCKETS,
            )
        })
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid histogram buckets, falling back to summaries");
            PrometheusBuilder::new()
        })
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match builder().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install global Prometheus recorder, attempting fallback"
                );
                let recorder = builder().build_recorder();
                tracing::warn!(
                    error = %e,
                    "using fallback Prometheus recorder, metrics may not be globally visible"
                );
                recorder.handle()
            }
        })
        .clone()
}

/// Gauge encoding of breaker state: 0 closed, 1 half-open, 2 open.
#[must_use]
pub fn circuit_state_gauge(state: CircuitBreakerState) -> f64 {
    match state {
        CircuitBreakerState::Closed => 0.0,
        CircuitBreakerState::HalfOpen => 1.0,
        CircuitBreakerState::Open => 2.0,
    }
}

/// Aggregate request and cache statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub inflight_joins: u64,
    pub avg_latency_ms: f64,
    pub cache_entries: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// JSON health report served on `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub endpoints: Vec<EndpointSnapshot>,
    pub performance: PerformanceSnapshot,
}

impl HealthSummary {
    /// Derives the overall status from endpoint snapshots.
    #[must_use]
    pub fn from_parts(endpoints: Vec<EndpointSnapshot>, performance: PerformanceSnapshot) -> Self {
        let status = if !endpoints.iter().any(|endpoint| endpoint.active) {
            HealthStatus::Unhealthy
        } else if endpoints.iter().all(|endpoint| {
            endpoint.active && endpoint.circuit_state == CircuitBreakerState::Closed.as_str()
        }) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self { status, timestamp: Utc::now(), endpoints, performance }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Records every metric the connection manager emits.
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    inflight_joins: AtomicU64,
    latency_sum_ms: AtomicU64,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prometheus_handle: init_prometheus_recorder(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            inflight_joins: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
        }
    }

    /// Records one completed upstream request.
    pub fn record_request(&self, method: &str, endpoint: &str, success: bool, latency_ms: u64) {
        let method = intern(method);
        let endpoint = intern(endpoint);
        let status = if success { "success" } else { "error" };

        counter!(
            "solgate_requests_total",
            "method" => method,
            "endpoint" => endpoint,
            "status" => status
        )
        .increment(1);
        #[allow(clippy::cast_precision_loss)]
        let seconds = latency_ms as f64 / 1000.0;
        histogram!("solgate_request_duration_seconds", "method" => method).record(seconds);

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if !success {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an error by its stable kind label.
    pub fn record_error(&self, endpoint: &str, kind: &'static str) {
        counter!("solgate_errors_total", "endpoint" => intern(endpoint), "kind" => kind)
            .increment(1);
    }

    pub fn record_cache_hit(&self, tier: &'static str) {
        counter!("solgate_cache_hits_total", "tier" => tier).increment(1);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        counter!("solgate_cache_misses_total").increment(1);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller joined another caller's in-flight fetch instead of issuing its own.
    pub fn record_inflight_join(&self) {
        counter!("solgate_inflight_joins_total").increment(1);
        self.inflight_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self, endpoint: &str, category: RequestCategory) {
        counter!(
            "solgate_rate_limited_total",
            "endpoint" => intern(endpoint),
            "category" => category.as_str()
        )
        .increment(1);
    }

    pub fn record_batch(&self, size: usize) {
        #[allow(clippy::cast_precision_loss)]
        let size = size as f64;
        histogram!("solgate_batch_size").record(size);
    }

    pub fn record_circuit_state(&self, endpoint: &str, state: CircuitBreakerState) {
        gauge!("solgate_circuit_breaker_state", "endpoint" => intern(endpoint))
            .set(circuit_state_gauge(state));
    }

    pub fn record_endpoint_gauges(&self, snapshot: &EndpointSnapshot) {
        let endpoint = intern(&snapshot.name);
        #[allow(clippy::cast_precision_loss)]
        let connections = snapshot.active_connections as f64;
        gauge!("solgate_active_connections", "endpoint" => endpoint).set(connections);
        gauge!("solgate_endpoint_health", "endpoint" => endpoint).set(snapshot.health);
    }

    pub fn record_probe(&self, endpoint: &str, success: bool, latency_ms: u64) {
        #[allow(clippy::cast_precision_loss)]
        let seconds = latency_ms as f64 / 1000.0;
        histogram!("solgate_probe_duration_seconds", "endpoint" => intern(endpoint))
            .record(seconds);
        if !success {
            self.record_error(endpoint, "probe_failed");
        }
    }

    /// Prometheus text exposition.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }

    #[must_use]
    pub fn performance(&self, cache_entries: usize) -> PerformanceSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        PerformanceSnapshot {
            total_requests,
            total_errors,
            error_rate: ratio(total_errors, total_requests),
            cache_hits,
            cache_misses,
            cache_hit_rate: ratio(cache_hits, cache_hits + cache_misses),
            inflight_joins: self.inflight_joins.load(Ordering::Relaxed),
            avg_latency_ms: ratio(self.latency_sum_ms.load(Ordering::Relaxed), total_requests),
            cache_entries,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
