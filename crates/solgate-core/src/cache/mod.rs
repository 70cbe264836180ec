//! Response caching for idempotent reads.
//!
//! Results are stored in a [`TieredCache`] keyed by a hash of the method, the
//! canonicalized params, and a caller supplied context string. The lifetime of an
//! entry is chosen per method by [`TtlPolicy`]; write and status methods are never
//! cached. Concurrent identical misses are collapsed through an [`InflightTracker`] so
//! only one upstream fetch happens per key.
//!
//! Only fully resolved payloads are stored. An in-progress fetch lives in the tracker,
//! never in the cache.

pub mod inflight;
pub mod policy;
pub mod store;

pub use inflight::{FetchGuard, Follower, InflightTracker, Join};
pub use policy::TtlPolicy;
pub use store::{CacheConfig, CacheStats, CacheTier, TieredCache};

use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::interval};

/// Spawns the periodic sweep that drops expired entries and resets access counters.
#[must_use]
pub fn start_sweep_with_shutdown(
    cache: Arc<TieredCache>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(every);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = cache.sweep();
                    if removed > 0 {
                        tracing::debug!(removed = removed, remaining = cache.len(), "cache sweep");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("cache sweeper shutting down");
                    break;
                }
            }
        }
    })
}
