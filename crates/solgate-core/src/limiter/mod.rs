//! Per-endpoint request budgets split across request categories.
//!
//! Each endpoint's requests-per-second ceiling is divided into fixed shares per
//! [`RequestCategory`] over a fixed window. A request first spends its own category's
//! budget. Once that is exhausted, a request of high enough priority may borrow from
//! another category, but never more than half of that category's unused budget.
//! Everything else waits in a per-(endpoint, category) queue ordered by priority, then
//! arrival, until a window reset frees capacity or its wait deadline passes.
//!
//! Every category gets at least one request per window, so the shares of a slow endpoint
//! can add up to more than its ceiling. Admissions across all categories are therefore
//! also capped at the endpoint's own ceiling for the window.

use dashmap::DashMap;
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, oneshot},
    time::{interval, Instant},
};

use crate::{
    events::{EventBus, ManagerEvent},
    types::{Priority, RequestCategory},
};

const CATEGORIES: usize = RequestCategory::ALL.len();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Endpoint {0} has no rate limit configured")]
    UnknownEndpoint(String),

    #[error("Rate limit queue full for {endpoint} ({category})")]
    QueueFull { endpoint: String, category: RequestCategory },

    #[error("Rate limit wait expired for {endpoint} ({category})")]
    WaitExpired { endpoint: String, category: RequestCategory },
}

impl LimiterError {
    #[must_use]
    pub fn category(&self) -> Option<RequestCategory> {
        match self {
            Self::UnknownEndpoint(_) => None,
            Self::QueueFull { category, .. } | Self::WaitExpired { category, .. } => {
                Some(*category)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub window: Duration,
    /// Fraction of the ceiling per category, indexed by [`RequestCategory::index`].
    pub shares: [f64; CATEGORIES],
    pub borrow_min_priority: u8,
    pub max_queue_depth: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1_000),
            shares: [0.40, 0.20, 0.25, 0.15],
            borrow_min_priority: 7,
            max_queue_depth: 1_000,
        }
    }
}

/// How a request was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Own,
    Borrowed(RequestCategory),
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    ceiling: u32,
    used: u32,
    lent: u32,
    borrowed: u32,
}

impl Bucket {
    fn own_remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.used).saturating_sub(self.lent)
    }

    /// Units this bucket may still lend this window.
    fn lendable(&self) -> u32 {
        (self.ceiling.saturating_sub(self.used) / 2).saturating_sub(self.lent)
    }
}

struct Waiter {
    priority: u8,
    seq: u64,
    tx: oneshot::Sender<Admission>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // max-heap: higher priority first, then lower sequence (earlier arrival)
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct EndpointLimits {
    window_started: Instant,
    /// Admissions allowed across all categories per window.
    ceiling: u32,
    used: u32,
    buckets: [Bucket; CATEGORIES],
    queues: [BinaryHeap<Waiter>; CATEGORIES],
    next_seq: u64,
}

impl EndpointLimits {
    fn new(rps: u32, config: &LimiterConfig) -> Self {
        let window_secs = config.window.as_secs_f64();
        let buckets = std::array::from_fn(|index| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ceiling = (f64::from(rps) * window_secs * config.shares[index]).floor() as u32;
            Bucket { ceiling: ceiling.max(1), ..Bucket::default() }
        });
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ceiling = (f64::from(rps) * window_secs).floor() as u32;
        Self {
            window_started: Instant::now(),
            ceiling: ceiling.max(1),
            used: 0,
            buckets,
            queues: std::array::from_fn(|_| BinaryHeap::new()),
            next_seq: 0,
        }
    }

    /// Resets usage if the window elapsed. Returns whether it did.
    fn roll_window(&mut self, now: Instant, window: Duration) -> bool {
        if now.saturating_duration_since(self.window_started) < window {
            return false;
        }
        self.window_started = now;
        self.used = 0;
        for bucket in &mut self.buckets {
            bucket.used = 0;
            bucket.lent = 0;
            bucket.borrowed = 0;
        }
        true
    }

    fn try_admit(
        &mut self,
        category: usize,
        priority: u8,
        borrow_min_priority: u8,
    ) -> Option<Admission> {
        if self.used >= self.ceiling {
            return None;
        }
        if self.buckets[category].own_remaining() > 0 {
            self.buckets[category].used += 1;
            self.used += 1;
            return Some(Admission::Own);
        }
        if priority < borrow_min_priority {
            return None;
        }

        let lender = (0..CATEGORIES)
            .filter(|&index| index != category)
            .filter(|&index| self.buckets[index].lendable() > 0)
            .max_by_key(|&index| self.buckets[index].lendable())?;

        self.buckets[lender].lent += 1;
        self.buckets[category].borrowed += 1;
        self.buckets[category].used += 1;
        self.used += 1;
        Some(Admission::Borrowed(RequestCategory::ALL[lender]))
    }

    fn refund(&mut self, category: usize, admission: Admission) {
        self.used = self.used.saturating_sub(1);
        let bucket = &mut self.buckets[category];
        bucket.used = bucket.used.saturating_sub(1);
        if let Admission::Borrowed(lender) = admission {
            bucket.borrowed = bucket.borrowed.saturating_sub(1);
            let lender = &mut self.buckets[lender.index()];
            lender.lent = lender.lent.saturating_sub(1);
        }
    }

    /// Grants capacity to queued waiters in priority order.
    fn drain(&mut self, borrow_min_priority: u8) -> usize {
        let mut granted = 0;
        for category in 0..CATEGORIES {
            while let Some(top) = self.queues[category].peek() {
                if top.tx.is_closed() {
                    self.queues[category].pop();
                    continue;
                }
                let priority = top.priority;
                let Some(admission) = self.try_admit(category, priority, borrow_min_priority) else {
                    break;
                };
                let Some(waiter) = self.queues[category].pop() else {
                    break;
                };
                if waiter.tx.send(admission).is_err() {
                    // the caller stopped waiting between the check and the grant
                    self.refund(category, admission);
                } else {
                    granted += 1;
                }
            }
        }
        granted
    }
}

/// Window-based request budgets for every configured endpoint.
pub struct RateLimiter {
    endpoints: DashMap<Arc<str>, EndpointLimits>,
    config: LimiterConfig,
    events: EventBus,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: LimiterConfig, events: EventBus) -> Self {
        Self { endpoints: DashMap::new(), config, events }
    }

    /// Sets up budgets for an endpoint with the given requests-per-second ceiling.
    pub fn register(&self, endpoint: &str, rate_limit_rps: u32) {
        let limits = EndpointLimits::new(rate_limit_rps, &self.config);
        self.endpoints.insert(Arc::from(endpoint), limits);
    }

    #[must_use]
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Waits for a unit of capacity on `endpoint` for `category`.
    ///
    /// Returns immediately when the category (or, for urgent requests, a lender) has
    /// budget and nobody is queued ahead. Otherwise waits in the queue for at most
    /// `max_wait`.
    ///
    /// # Errors
    ///
    /// - [`LimiterError::UnknownEndpoint`] for an unregistered endpoint
    /// - [`LimiterError::QueueFull`] when the wait queue is at `max_queue_depth`
    /// - [`LimiterError::WaitExpired`] when no capacity was granted within `max_wait`
    pub async fn acquire(
        &self,
        endpoint: &str,
        category: RequestCategory,
        priority: Priority,
        max_wait: Duration,
    ) -> Result<Admission, LimiterError> {
        let index = category.index();
        let rx = {
            let mut limits = self
                .endpoints
                .get_mut(endpoint)
                .ok_or_else(|| LimiterError::UnknownEndpoint(endpoint.to_string()))?;

            if limits.roll_window(Instant::now(), self.config.window) {
                limits.drain(self.config.borrow_min_priority);
            }

            if limits.queues[index].is_empty() {
                if let Some(admission) =
                    limits.try_admit(index, priority.value(), self.config.borrow_min_priority)
                {
                    return Ok(admission);
                }
            }

            limits.queues[index].retain(|waiter| !waiter.tx.is_closed());
            if limits.queues[index].len() >= self.config.max_queue_depth {
                drop(limits);
                return Err(self.rejected(
                    endpoint,
                    category,
                    priority,
                    LimiterError::QueueFull { endpoint: endpoint.to_string(), category },
                ));
            }

            let (tx, rx) = oneshot::channel();
            let seq = limits.next_seq;
            limits.next_seq += 1;
            limits.queues[index].push(Waiter { priority: priority.value(), seq, tx });
            tracing::debug!(
                endpoint = %endpoint,
                category = %category,
                priority = priority.value(),
                queued = limits.queues[index].len(),
                "request queued for rate limit capacity"
            );
            rx
        };

        match tokio::time::timeout(max_wait, rx).await {
            Ok(Ok(admission)) => Ok(admission),
            // the sender only disappears when the endpoint is re-registered
            Ok(Err(_)) | Err(_) => Err(self.rejected(
                endpoint,
                category,
                priority,
                LimiterError::WaitExpired { endpoint: endpoint.to_string(), category },
            )),
        }
    }

    fn rejected(
        &self,
        endpoint: &str,
        category: RequestCategory,
        priority: Priority,
        error: LimiterError,
    ) -> LimiterError {
        tracing::warn!(
            endpoint = %endpoint,
            category = %category,
            priority = priority.value(),
            error = %error,
            "rate limit exceeded"
        );
        self.events.publish(ManagerEvent::RateLimited {
            endpoint: Arc::from(endpoint),
            category,
            priority: priority.value(),
        });
        error
    }

    /// Rolls elapsed windows and hands freed capacity to waiters. Returns grants made.
    pub fn tick(&self) -> usize {
        let now = Instant::now();
        let mut granted = 0;
        for mut limits in self.endpoints.iter_mut() {
            limits.roll_window(now, self.config.window);
            granted += limits.drain(self.config.borrow_min_priority);
        }
        granted
    }

    /// Number of requests waiting on `endpoint` for `category`.
    #[must_use]
    pub fn queue_depth(&self, endpoint: &str, category: RequestCategory) -> usize {
        self.endpoints.get(endpoint).map_or(0, |limits| limits.queues[category.index()].len())
    }

    /// Spawns the ticker that resets windows and drains queues every window.
    #[must_use]
    pub fn start_ticker_with_shutdown(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = interval(limiter.config.window);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let granted = limiter.tick();
                        if granted > 0 {
                            tracing::trace!(granted = granted, "rate limit queues drained");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("rate limit ticker shutting down");
                        break;
                    }
                }
            }
        })
    }

    #[cfg(test)]
    fn bucket(&self, endpoint: &str, category: RequestCategory) -> Bucket {
        self.endpoints
            .get(endpoint)
            .map(|limits| limits.buckets[category.index()])
            .unwrap_or_default()
    }
}
