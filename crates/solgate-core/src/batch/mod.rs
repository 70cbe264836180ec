//! Coalesces single-item account and status reads into multi-item wire calls.
//!
//! Calls to `getAccountInfo`, `getMultipleAccounts` and `getSignatureStatuses` that share
//! an endpoint, a method and an identical config object are collected for a short window
//! and sent as one `getMultipleAccounts` or `getSignatureStatuses` request. Each caller
//! gets back `{context, value}` holding just its own slice. A group flushes when its first
//! call has waited out the window, or early when the next call would push it past the
//! method's item ceiling. The wire call runs until the latest deadline in its group, while
//! each caller stops waiting at its own.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    ops::Range,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::oneshot, time::Instant};

use crate::{
    manager::errors::CallError,
    metrics::MetricsCollector,
    responses::DecodeError,
    types::Priority,
    upstream::{endpoint::Endpoint, errors::UpstreamError},
    utils::canonical_string,
};

/// Sends one wire call that must finish by `deadline`. Implemented by the manager's
/// dispatch path, which applies rate limiting, credentials and metrics.
#[async_trait]
pub trait WireDispatch: Send + Sync {
    async fn dispatch(
        &self,
        endpoint: &Arc<Endpoint>,
        method: &str,
        params: &Value,
        priority: Priority,
        deadline: Instant,
    ) -> Result<Value, CallError>;
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub window: Duration,
    pub max_accounts: usize,
    pub max_signatures: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(20), max_accounts: 100, max_signatures: 256 }
    }
}

/// Whether `method` can go through the optimizer.
#[must_use]
pub fn is_batchable(method: &str) -> bool {
    matches!(method, "getAccountInfo" | "getMultipleAccounts" | "getSignatureStatuses")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    endpoint: Arc<str>,
    method: &'static str,
    config: String,
}

enum Share {
    /// A folded `getAccountInfo`: the caller wants the bare element.
    Single(usize),
    Range(Range<usize>),
}

struct Waiting {
    share: Share,
    tx: oneshot::Sender<Result<Value, CallError>>,
}

struct Group {
    id: u64,
    endpoint: Arc<Endpoint>,
    wire_method: &'static str,
    config: Option<Value>,
    items: Vec<Value>,
    waiters: Vec<Waiting>,
    priority: Priority,
    deadline: Instant,
}

/// Window-based request coalescer.
pub struct BatchOptimizer {
    groups: Mutex<AHashMap<GroupKey, Group>>,
    dispatcher: Arc<dyn WireDispatch>,
    metrics: Arc<MetricsCollector>,
    config: BatchConfig,
    next_id: AtomicU64,
}

impl BatchOptimizer {
    #[must_use]
    pub fn new(
        config: BatchConfig,
        dispatcher: Arc<dyn WireDispatch>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            groups: Mutex::new(AHashMap::new()),
            dispatcher,
            metrics,
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of groups currently collecting.
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }

    /// Submits one validated call and waits, until `deadline`, for its share of the
    /// batched result.
    ///
    /// Calls that already exceed the method's ceiling on their own, or methods that are
    /// not batchable, are dispatched directly.
    ///
    /// # Errors
    ///
    /// The batch's error, cloned to every caller in the group, or a transport timeout
    /// when `deadline` passes first.
    pub async fn submit(
        self: &Arc<Self>,
        endpoint: &Arc<Endpoint>,
        method: &str,
        params: &Value,
        priority: Priority,
        deadline: Instant,
    ) -> Result<Value, CallError> {
        let Some((wire_method, items, config, single)) = self.split(method, params) else {
            return self.dispatcher.dispatch(endpoint, method, params, priority, deadline).await;
        };
        let ceiling = self.ceiling(wire_method);
        if items.len() > ceiling || items.is_empty() {
            return self.dispatcher.dispatch(endpoint, method, params, priority, deadline).await;
        }

        let key = GroupKey {
            endpoint: endpoint.name_arc(),
            method: if single { "getAccountInfo" } else { wire_method },
            config: config.as_ref().map(canonical_string).unwrap_or_default(),
        };

        let (tx, rx) = oneshot::channel();
        let mut ready = Vec::new();
        {
            let mut groups = self.groups.lock();

            if groups.get(&key).is_some_and(|group| group.items.len() + items.len() > ceiling) {
                if let Some(full) = groups.remove(&key) {
                    ready.push(full);
                }
            }

            let group = groups.entry(key.clone()).or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.schedule_flush(key.clone(), id);
                Group {
                    id,
                    endpoint: Arc::clone(endpoint),
                    wire_method,
                    config,
                    items: Vec::new(),
                    waiters: Vec::new(),
                    priority,
                    deadline,
                }
            });

            let start = group.items.len();
            group.items.extend(items);
            let share = if single {
                Share::Single(start)
            } else {
                Share::Range(start..group.items.len())
            };
            group.waiters.push(Waiting { share, tx });
            group.priority = group.priority.max(priority);
            group.deadline = group.deadline.max(deadline);

            if group.items.len() >= ceiling {
                if let Some(full) = groups.remove(&key) {
                    ready.push(full);
                }
            }
        }

        for group in ready {
            self.spawn_flush(group);
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::Transport {
                endpoint: endpoint.name().to_string(),
                message: "batch dropped before completion".to_string(),
            }),
            Err(_) => Err(CallError::from_upstream(endpoint.name(), UpstreamError::Timeout)),
        }
    }

    /// Breaks a call into (wire method, items, config, folded single).
    fn split(
        &self,
        method: &str,
        params: &Value,
    ) -> Option<(&'static str, Vec<Value>, Option<Value>, bool)> {
        let params = params.as_array()?;
        let config = params.get(1).filter(|config| !config.is_null()).cloned();
        match method {
            "getAccountInfo" => {
                let address = params.first()?.clone();
                // getAccountInfo defaults to base58 while getMultipleAccounts defaults to base64
                let mut config = config.unwrap_or_else(|| json!({}));
                if let Some(object) = config.as_object_mut() {
                    object.entry("encoding").or_insert_with(|| json!("base58"));
                }
                Some(("getMultipleAccounts", vec![address], Some(config), true))
            }
            "getMultipleAccounts" => {
                Some(("getMultipleAccounts", params.first()?.as_array()?.clone(), config, false))
            }
            "getSignatureStatuses" => {
                Some(("getSignatureStatuses", params.first()?.as_array()?.clone(), config, false))
            }
            _ => None,
        }
    }

    fn ceiling(&self, wire_method: &str) -> usize {
        if wire_method == "getSignatureStatuses" {
            self.config.max_signatures
        } else {
            self.config.max_accounts
        }
    }

    fn schedule_flush(self: &Arc<Self>, key: GroupKey, id: u64) {
        let optimizer = Arc::clone(self);
        let window = self.config.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let group = {
                let mut groups = optimizer.groups.lock();
                // the group may have flushed early and been replaced by a newer one
                if groups.get(&key).is_some_and(|group| group.id == id) {
                    groups.remove(&key)
                } else {
                    None
                }
            };
            if let Some(group) = group {
                optimizer.flush(group).await;
            }
        });
    }

    fn spawn_flush(self: &Arc<Self>, group: Group) {
        let optimizer = Arc::clone(self);
        tokio::spawn(async move { optimizer.flush(group).await });
    }

    async fn flush(&self, group: Group) {
        let Group { endpoint, wire_method, config, items, waiters, priority, deadline, .. } =
            group;
        let size = items.len();
        self.metrics.record_batch(size);
        tracing::debug!(
            endpoint = %endpoint.name(),
            method = wire_method,
            items = size,
            callers = waiters.len(),
            "flushing batch"
        );

        let mut params = vec![Value::Array(items)];
        if let Some(config) = config {
            params.push(config);
        }
        let params = Value::Array(params);
        let result =
            self.dispatcher.dispatch(&endpoint, wire_method, &params, priority, deadline).await;

        match result {
            Ok(payload) => fan_out(wire_method, &payload, size, waiters),
            Err(error) => {
                for waiter in waiters {
                    let _ = waiter.tx.send(Err(error.clone()));
                }
            }
        }
    }
}

fn fan_out(wire_method: &str, payload: &Value, size: usize, waiters: Vec<Waiting>) {
    let context = payload.get("context").cloned().unwrap_or(Value::Null);
    let values = match payload.get("value").and_then(Value::as_array) {
        Some(values) if values.len() == size => values,
        _ => {
            let error = CallError::Decode(DecodeError::UnexpectedShape {
                method: wire_method.to_string(),
                reason: format!("expected {size} values in batched response"),
            });
            for waiter in waiters {
                let _ = waiter.tx.send(Err(error.clone()));
            }
            return;
        }
    };

    for waiter in waiters {
        let value = match waiter.share {
            Share::Single(index) => values[index].clone(),
            Share::Range(range) => Value::Array(values[range].to_vec()),
        };
        // a caller that went away simply misses its slice
        let _ = waiter.tx.send(Ok(json!({ "context": context, "value": value })));
    }
}
