use crate::{
    events::{EventBus, ManagerEvent},
    metrics::MetricsCollector,
    security::SecurityLayer,
    upstream::registry::EndpointRegistry,
};

use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    time::{interval, Instant},
};
use tracing::{debug, info, warn};

/// Result of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub endpoint: String,
    pub success: bool,
    pub latency_ms: u64,
}

/// Periodically issues a cheap idempotent call to every active endpoint.
///
/// Probes go through the endpoint's normal send path, so their outcomes update health
/// scores and circuit breakers exactly as organic traffic does. Each tick also brings
/// back endpoints whose reactivation cooldown elapsed.
pub struct HealthProber {
    registry: Arc<EndpointRegistry>,
    security: Arc<SecurityLayer>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    probe_interval: Duration,
    probe_method: String,
    probe_timeout: Duration,
}

impl HealthProber {
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        security: Arc<SecurityLayer>,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
        probe_interval: Duration,
    ) -> Self {
        Self {
            registry,
            security,
            metrics,
            events,
            probe_interval,
            probe_method: "getSlot".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.probe_method = method.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = interval(self.probe_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let results = self.probe_all().await;
                        let failed = results.iter().filter(|result| !result.success).count();
                        if failed > 0 {
                            warn!(
                                probed = results.len(),
                                failed = failed,
                                "health probe round had failures"
                            );
                        } else {
                            debug!(probed = results.len(), "health probe round complete");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("health prober shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probes every active endpoint once and refreshes endpoint gauges.
    pub async fn probe_all(&self) -> Vec<ProbeResult> {
        let reactivated = self.registry.reactivate_due();
        if reactivated > 0 {
            info!(count = reactivated, "endpoints reactivated by prober");
        }

        let probes = self
            .registry
            .all()
            .iter()
            .filter(|endpoint| endpoint.is_active())
            .map(|endpoint| self.probe(endpoint.name()));
        let results: Vec<ProbeResult> =
            futures::future::join_all(probes).await.into_iter().flatten().collect();

        for endpoint in self.registry.all() {
            let snapshot = endpoint.snapshot().await;
            self.metrics.record_endpoint_gauges(&snapshot);
            self.metrics.record_circuit_state(endpoint.name(), endpoint.circuit_state().await);
        }
        results
    }

    /// Probes one endpoint by name. `None` when the endpoint is unknown or has no usable
    /// credential.
    pub async fn probe(&self, name: &str) -> Option<ProbeResult> {
        let endpoint = self.registry.get(name)?;
        let params = json!([]);
        let auth = match self.security.outbound_auth(name, &self.probe_method, &params) {
            Ok(auth) => auth,
            Err(e) => {
                warn!(endpoint = %name, error = %e, "skipping probe without usable credential");
                return None;
            }
        };

        let start = Instant::now();
        let outcome = endpoint.send(&self.probe_method, &params, &auth, self.probe_timeout).await;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as u64;
        let success = outcome.is_ok();

        if let Err(e) = &outcome {
            debug!(endpoint = %name, method = %self.probe_method, error = %e, "probe failed");
        }
        self.metrics.record_probe(name, success, latency_ms);
        self.events.publish(ManagerEvent::ProbeCompleted {
            endpoint: endpoint.name_arc(),
            success,
            latency_ms,
        });

        Some(ProbeResult { endpoint: name.to_string(), success, latency_ms })
    }
}
