use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{sync::RwLock, time::Instant};

/// Tuning for one circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures inside `monitoring_window` that open the circuit.
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted.
    pub monitoring_window: Duration,
    /// Base wait in `Open` before a `HalfOpen` trial is allowed.
    pub recovery_timeout: Duration,
    /// Factor applied to the wait after each failed `HalfOpen` trial.
    pub backoff_multiplier: f64,
    /// Ceiling for the grown wait.
    pub max_backoff: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            monitoring_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Internal mutable state protected by a single `RwLock`.
///
/// Failure window, state, retry deadline and backoff are updated together within one
/// lock acquisition so a transition can never be observed half-applied.
#[derive(Debug)]
struct CircuitBreakerInternalState {
    /// Timestamps of failures still inside the monitoring window, oldest first.
    failures: VecDeque<Instant>,
    /// Earliest instant at which an `Open` breaker admits a trial call.
    next_attempt: Option<Instant>,
    /// Wait applied the next time the circuit opens.
    current_backoff: Duration,
    state: CircuitBreakerState,
}

impl CircuitBreakerInternalState {
    fn new(base_backoff: Duration) -> Self {
        Self {
            failures: VecDeque::new(),
            next_attempt: None,
            current_backoff: base_backoff,
            state: CircuitBreakerState::Closed,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A state change produced by one breaker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub from: CircuitBreakerState,
    pub to: CircuitBreakerState,
}

/// Per-endpoint failure isolator with windowed failure counting and exponential backoff.
///
/// - `Closed` -> `Open`: `failure_threshold` failures inside `monitoring_window`
/// - `Open` -> `HalfOpen`: first admission check at or after `next_attempt`
/// - `HalfOpen` -> `Closed`: first success; backoff resets to `recovery_timeout`
/// - `HalfOpen` -> `Open`: any failure; backoff multiplies, capped at `max_backoff`
///
/// While `Open` and before `next_attempt`, every admission check fails without the
/// caller touching the network.
pub struct CircuitBreaker {
    inner: Arc<RwLock<CircuitBreakerInternalState>>,
    config: CircuitBreakerConfig,
}

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitBreakerState {
    /// Normal operation, requests are allowed through.
    Closed,
    /// Failures exceeded threshold, requests are blocked.
    Open,
    /// Recovery mode, testing if the endpoint has recovered.
    HalfOpen,
}

impl CircuitBreakerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CircuitBreakerInternalState::new(config.recovery_timeout))),
            config,
        }
    }

    /// Determines whether a call may proceed, moving `Open` to `HalfOpen` when due.
    ///
    /// Uses double-checked locking: the common `Closed`/`HalfOpen` path only takes the
    /// read lock, and the write lock is taken only when a transition may be needed.
    pub async fn admit(&self) -> (bool, Option<CircuitTransition>) {
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => return (true, None),
                CircuitBreakerState::Open => match inner.next_attempt {
                    Some(deadline) if Instant::now() < deadline => return (false, None),
                    _ => {}
                },
            }
        }

        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => (true, None),
            CircuitBreakerState::Open => {
                let due = inner.next_attempt.is_none_or(|deadline| Instant::now() >= deadline);
                if due {
                    inner.state = CircuitBreakerState::HalfOpen;
                    tracing::warn!("circuit breaker transitioning to half-open state");
                    (
                        true,
                        Some(CircuitTransition {
                            from: CircuitBreakerState::Open,
                            to: CircuitBreakerState::HalfOpen,
                        }),
                    )
                } else {
                    (false, None)
                }
            }
        }
    }

    /// Returns `true` if a call may proceed right now.
    pub async fn can_execute(&self) -> bool {
        self.admit().await.0
    }

    /// Read-only admission check that never transitions state.
    pub async fn would_admit(&self) -> bool {
        let inner = self.inner.read().await;
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                inner.next_attempt.is_none_or(|deadline| Instant::now() >= deadline)
            }
        }
    }

    /// Records a successful call. Closes a `HalfOpen` circuit and resets its backoff.
    pub async fn on_success(&self) -> Option<CircuitTransition> {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.state = CircuitBreakerState::Closed;
                inner.failures.clear();
                inner.next_attempt = None;
                inner.current_backoff = self.config.recovery_timeout;
                tracing::info!("circuit breaker closed after successful trial request");
                Some(CircuitTransition {
                    from: CircuitBreakerState::HalfOpen,
                    to: CircuitBreakerState::Closed,
                })
            }
            // Stragglers dispatched before the circuit opened do not close it.
            CircuitBreakerState::Closed | CircuitBreakerState::Open => None,
        }
    }

    /// Records a failed call and opens or re-opens the circuit when warranted.
    pub async fn on_failure(&self) -> Option<CircuitTransition> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        inner.failures.push_back(now);
        inner.prune(now, self.config.monitoring_window);

        match inner.state {
            CircuitBreakerState::Closed => {
                let failures = u32::try_from(inner.failures.len()).unwrap_or(u32::MAX);
                if failures < self.config.failure_threshold {
                    return None;
                }
                inner.state = CircuitBreakerState::Open;
                inner.next_attempt = Some(now + inner.current_backoff);
                tracing::warn!(
                    threshold = self.config.failure_threshold,
                    backoff_ms = inner.current_backoff.as_millis() as u64,
                    "circuit breaker opened after reaching failure threshold"
                );
                Some(CircuitTransition {
                    from: CircuitBreakerState::Closed,
                    to: CircuitBreakerState::Open,
                })
            }
            CircuitBreakerState::HalfOpen => {
                let grown = inner.current_backoff.mul_f64(self.config.backoff_multiplier.max(1.0));
                inner.current_backoff = grown.min(self.config.max_backoff);
                inner.state = CircuitBreakerState::Open;
                inner.next_attempt = Some(now + inner.current_backoff);
                tracing::warn!(
                    backoff_ms = inner.current_backoff.as_millis() as u64,
                    "circuit breaker re-opened after failed trial request"
                );
                Some(CircuitTransition {
                    from: CircuitBreakerState::HalfOpen,
                    to: CircuitBreakerState::Open,
                })
            }
            CircuitBreakerState::Open => None,
        }
    }

    /// Forces the breaker back to `Closed` with a base backoff.
    pub async fn reset(&self) -> Option<CircuitTransition> {
        let mut inner = self.inner.write().await;
        let from = inner.state;
        *inner = CircuitBreakerInternalState::new(self.config.recovery_timeout);
        (from != CircuitBreakerState::Closed)
            .then_some(CircuitTransition { from, to: CircuitBreakerState::Closed })
    }

    pub async fn get_state(&self) -> CircuitBreakerState {
        self.inner.read().await.state
    }

    /// Returns the number of failures inside the monitoring window.
    pub async fn get_failure_count(&self) -> u32 {
        let inner = self.inner.read().await;
        let now = Instant::now();
        let live = inner
            .failures
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < self.config.monitoring_window)
            .count();
        u32::try_from(live).unwrap_or(u32::MAX)
    }

    /// Wait that will be applied the next time the circuit opens.
    pub async fn current_backoff(&self) -> Duration {
        self.inner.read().await.current_backoff
    }

    /// Time remaining until an `Open` breaker admits a trial call.
    pub async fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.read().await;
        match (inner.state, inner.next_attempt) {
            (CircuitBreakerState::Open, Some(deadline)) => {
                Some(deadline.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            monitoring_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker() {
        let breaker = breaker(3);

        assert!(breaker.can_execute().await);
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Closed);

        assert!(breaker.on_failure().await.is_none());
        assert!(breaker.on_failure().await.is_none());
        let transition = breaker.on_failure().await.expect("third failure opens");
        assert_eq!(transition.to, CircuitBreakerState::Open);

        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
        assert!(!breaker.can_execute().await);
        assert!(!breaker.would_admit().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_count() {
        let breaker = breaker(3);

        breaker.on_failure().await;
        breaker.on_failure().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.get_failure_count().await, 0);

        breaker.on_failure().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Closed);
        assert_eq!(breaker.get_failure_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes_and_resets_backoff() {
        let breaker = breaker(2);

        breaker.on_failure().await;
        breaker.on_failure().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!breaker.can_execute().await);

        tokio::time::advance(Duration::from_secs(1)).await;
        let (allowed, transition) = breaker.admit().await;
        assert!(allowed);
        assert_eq!(transition.map(|t| t.to), Some(CircuitBreakerState::HalfOpen));

        // failed trial doubles the wait
        breaker.on_failure().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
        assert_eq!(breaker.current_backoff().await, Duration::from_secs(20));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(breaker.can_execute().await);
        let transition = breaker.on_success().await.expect("trial success closes");
        assert_eq!(transition.to, CircuitBreakerState::Closed);
        assert_eq!(breaker.current_backoff().await, Duration::from_secs(10));
        assert_eq!(breaker.get_failure_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let breaker = breaker(1);
        breaker.on_failure().await;

        for _ in 0..5 {
            let wait = breaker.retry_after().await.expect("open");
            tokio::time::advance(wait).await;
            assert!(breaker.can_execute().await);
            breaker.on_failure().await;
        }
        assert_eq!(breaker.current_backoff().await, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_while_open_is_ignored() {
        let breaker = breaker(1);
        breaker.on_failure().await;
        assert!(breaker.on_success().await.is_none());
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let breaker = breaker(1);
        breaker.on_failure().await;
        let transition = breaker.reset().await.expect("was open");
        assert_eq!(transition.from, CircuitBreakerState::Open);
        assert!(breaker.can_execute().await);
        assert!(breaker.reset().await.is_none());
    }
}
