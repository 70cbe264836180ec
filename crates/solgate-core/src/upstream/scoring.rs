//! Adaptive health scoring and selection scoring for endpoints.
//!
//! Health is a 0-100 rolling measure fed by organic traffic and synthetic probes. Premium
//! endpoints (priority >= 8) gain health faster, lose it more slowly and are deactivated
//! only at a lower floor, so a briefly slow paid provider is not flapped out of rotation.

use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Outcomes remembered for the recent failure rate.
const RECENT_OUTCOMES: usize = 20;
/// EWMA smoothing for response time (20% new sample, 80% history).
const LATENCY_ALPHA: f64 = 0.2;
/// Health an endpoint restarts with after reactivation.
const REACTIVATION_HEALTH: f64 = 50.0;
/// Latency at which the latency factor halves.
const LATENCY_PIVOT_MS: f64 = 250.0;

/// Priority band of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// priority >= 8
    Premium,
    /// priority 4..=7
    Standard,
    /// priority <= 3, typically public endpoints
    Public,
}

impl Tier {
    #[must_use]
    pub fn for_priority(priority: u8) -> Self {
        match priority {
            8.. => Self::Premium,
            4..=7 => Self::Standard,
            _ => Self::Public,
        }
    }

    fn success_increment(self) -> f64 {
        match self {
            Self::Premium => 5.0,
            Self::Standard | Self::Public => 2.0,
        }
    }

    /// (failure-rate weight, latency weight) for the failure penalty.
    fn penalty_weights(self) -> (f64, f64) {
        match self {
            Self::Premium => (0.5, 0.1),
            Self::Standard | Self::Public => (0.7, 0.3),
        }
    }

    /// Health strictly below this deactivates the endpoint.
    #[must_use]
    pub fn deactivation_threshold(self) -> f64 {
        match self {
            Self::Premium => 10.0,
            Self::Standard => 20.0,
            Self::Public => 30.0,
        }
    }
}

/// Weights of the selection score factors.
#[derive(Debug, Clone, Copy)]
pub struct SelectionWeights {
    pub health: f64,
    pub latency: f64,
    pub congestion: f64,
    pub priority: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self { health: 0.40, latency: 0.25, congestion: 0.15, priority: 0.20 }
    }
}

/// Combines health, predicted latency, congestion and priority into one comparable score.
#[must_use]
pub fn selection_score(
    weights: &SelectionWeights,
    health: f64,
    avg_response_ms: f64,
    congestion: usize,
    priority: u8,
) -> f64 {
    let latency_factor = 1.0 / (1.0 + avg_response_ms.max(0.0) / LATENCY_PIVOT_MS);
    #[allow(clippy::cast_precision_loss)]
    let congestion_factor = 1.0 / (1.0 + congestion as f64);
    let priority_factor = f64::from(priority.min(10)) / 10.0;

    weights.health * (health.clamp(0.0, 100.0) / 100.0) +
        weights.latency * latency_factor +
        weights.congestion * congestion_factor +
        weights.priority * priority_factor
}

/// Result of applying one outcome to an endpoint's health.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthUpdate {
    pub previous: f64,
    pub current: f64,
    /// Set when this update deactivated the endpoint; carries the cooldown.
    pub deactivated: Option<Duration>,
}

impl HealthUpdate {
    /// True when the score moved into a different 10-point band.
    #[must_use]
    pub fn crossed_band(&self) -> bool {
        (self.previous / 10.0).floor() != (self.current / 10.0).floor()
    }
}

/// Mutable health state of one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub score: f64,
    pub avg_response_ms: f64,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub active: bool,
    pub reactivate_at: Option<Instant>,
    recent: VecDeque<bool>,
    tier: Tier,
    base_cooldown: Duration,
    priority: u8,
}

impl EndpointHealth {
    #[must_use]
    pub fn new(priority: u8, base_cooldown: Duration) -> Self {
        Self {
            score: 100.0,
            avg_response_ms: 0.0,
            consecutive_failures: 0,
            total_requests: 0,
            total_failures: 0,
            active: true,
            reactivate_at: None,
            recent: VecDeque::with_capacity(RECENT_OUTCOMES),
            tier: Tier::for_priority(priority),
            base_cooldown,
            priority,
        }
    }

    fn remember(&mut self, success: bool) {
        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back(success);
    }

    fn observe_latency(&mut self, latency_ms: f64) {
        self.avg_response_ms = if self.total_requests <= 1 {
            latency_ms
        } else {
            LATENCY_ALPHA * latency_ms + (1.0 - LATENCY_ALPHA) * self.avg_response_ms
        };
    }

    /// Failure rate over the last [`RECENT_OUTCOMES`] outcomes.
    #[must_use]
    pub fn recent_failure_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|ok| !**ok).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = failures as f64 / self.recent.len() as f64;
        rate
    }

    /// Cooldown before a deactivated endpoint is retried, proportional to its priority.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.base_cooldown.saturating_mul(u32::from(self.priority.max(1)))
    }

    pub fn apply_success(&mut self, latency_ms: u64) -> HealthUpdate {
        let previous = self.score;
        self.total_requests += 1;
        #[allow(clippy::cast_precision_loss)]
        let latency = latency_ms as f64;
        self.observe_latency(latency);
        self.remember(true);
        self.consecutive_failures = 0;
        self.score = (self.score + self.tier.success_increment()).min(100.0);
        HealthUpdate { previous, current: self.score, deactivated: None }
    }

    /// Applies a failure. `timeout` normalizes the observed latency.
    pub fn apply_failure(&mut self, latency_ms: u64, timeout: Duration) -> HealthUpdate {
        let previous = self.score;
        self.total_requests += 1;
        self.total_failures += 1;
        #[allow(clippy::cast_precision_loss)]
        let latency = latency_ms as f64;
        self.observe_latency(latency);
        self.remember(false);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let (failure_weight, latency_weight) = self.tier.penalty_weights();
        let timeout_ms = timeout.as_secs_f64().max(0.001) * 1000.0;
        let normalized_latency = (latency / timeout_ms).min(1.0);
        let penalty = (20.0 *
            (failure_weight * self.recent_failure_rate() + latency_weight * normalized_latency))
            .max(1.0);
        self.score = (self.score - penalty).max(0.0);

        let deactivated = if self.active && self.score < self.tier.deactivation_threshold() {
            let cooldown = self.cooldown();
            self.active = false;
            self.reactivate_at = Some(Instant::now() + cooldown);
            Some(cooldown)
        } else {
            None
        };

        HealthUpdate { previous, current: self.score, deactivated }
    }

    /// Reactivates the endpoint if its cooldown has elapsed. Returns `true` on reactivation.
    pub fn try_reactivate(&mut self, now: Instant) -> bool {
        match self.reactivate_at {
            Some(at) if !self.active && now >= at => {
                self.active = true;
                self.reactivate_at = None;
                self.score = REACTIVATION_HEALTH;
                self.consecutive_failures = 0;
                self.recent.clear();
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }
}
