//! Typed publish/subscribe bus for cross-cutting notifications.
//!
//! Components publish [`ManagerEvent`]s as state changes happen; alerting, dashboards or
//! tests subscribe. The bus is a bounded `tokio::sync::broadcast` channel, so a slow
//! subscriber observes `RecvError::Lagged` and loses the oldest events instead of
//! blocking the publisher. Publishing with no subscribers is not an error.

use crate::types::RequestCategory;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why a credential was rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    Scheduled,
    Anomaly,
    Manual,
}

/// Kind of suspicious credential usage detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Current hour's usage far above the day's hourly mean.
    UsageSpike,
    /// A long burst of back-to-back uses with sub-threshold spacing.
    RapidRepeat,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// Health score crossed into a different 10-point band.
    EndpointHealthChanged { endpoint: Arc<str>, previous: f64, current: f64 },
    EndpointDeactivated { endpoint: Arc<str>, health: f64, cooldown_ms: u64 },
    EndpointReactivated { endpoint: Arc<str> },
    CircuitStateChanged { endpoint: Arc<str>, from: &'static str, to: &'static str },
    CredentialRotated { service: String, reason: RotationReason },
    CredentialAnomaly { service: String, kind: AnomalyKind },
    RateLimited { endpoint: Arc<str>, category: RequestCategory, priority: u8 },
    ProbeCompleted { endpoint: Arc<str>, success: bool, latency_ms: u64 },
}

/// Cloneable handle to the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Never blocks; dropped silently when nobody listens.
    pub fn publish(&self, event: ManagerEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("event published with no subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
