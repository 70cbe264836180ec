use dashmap::DashMap;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

/// Sizing and promotion rules for the two tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub hot_max_entries: usize,
    pub main_max_entries: usize,
    /// Accesses after which a main-tier entry becomes eligible for the hot tier.
    pub promotion_threshold: u32,
    /// Payloads at or above this size stay in the main tier.
    pub small_object_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_max_entries: 1_000,
            main_max_entries: 10_000,
            promotion_threshold: 3,
            small_object_bytes: 10_240,
        }
    }
}

/// Which tier served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Hot,
    Main,
}

impl CacheTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Main => "main",
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Arc<Value>,
    size_bytes: usize,
    inserted_at: Instant,
    ttl: Duration,
    access_count: u32,
    last_access: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// Entry counts per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hot_entries: usize,
    pub main_entries: usize,
}

/// Two-tier TTL store keyed by request hash.
///
/// Lookups check the small hot tier first. A main-tier entry read more than
/// `promotion_threshold` times with a payload under `small_object_bytes` moves to the
/// hot tier. Expired entries are dropped on access and by [`TieredCache::sweep`]. A tier
/// that outgrows its ceiling sheds its least-recently-accessed 10%.
pub struct TieredCache {
    hot: DashMap<u64, CacheEntry>,
    main: DashMap<u64, CacheEntry>,
    config: CacheConfig,
}

impl TieredCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self { hot: DashMap::new(), main: DashMap::new(), config }
    }

    /// Returns a live entry and the tier that held it.
    #[must_use]
    pub fn get(&self, key: u64) -> Option<(Arc<Value>, CacheTier)> {
        let now = Instant::now();

        if let Some(mut entry) = self.hot.get_mut(&key) {
            if !entry.is_expired(now) {
                entry.access_count = entry.access_count.saturating_add(1);
                entry.last_access = now;
                return Some((Arc::clone(&entry.payload), CacheTier::Hot));
            }
            drop(entry);
            self.hot.remove(&key);
            return None;
        }

        let (payload, promote) = {
            let mut entry = self.main.get_mut(&key)?;
            if entry.is_expired(now) {
                drop(entry);
                self.main.remove(&key);
                return None;
            }
            entry.access_count = entry.access_count.saturating_add(1);
            entry.last_access = now;
            let promote = entry.access_count > self.config.promotion_threshold &&
                entry.size_bytes < self.config.small_object_bytes;
            (Arc::clone(&entry.payload), promote)
        };

        if promote {
            if let Some((key, entry)) = self.main.remove(&key) {
                self.hot.insert(key, entry);
                Self::enforce_capacity(&self.hot, self.config.hot_max_entries);
            }
        }
        Some((payload, CacheTier::Main))
    }

    /// Stores a fully resolved payload.
    pub fn insert(&self, key: u64, payload: Arc<Value>, ttl: Duration) {
        let size_bytes =
            serde_json::to_vec(payload.as_ref()).map_or(usize::MAX, |bytes| bytes.len());
        let now = Instant::now();
        let entry = CacheEntry {
            payload,
            size_bytes,
            inserted_at: now,
            ttl,
            access_count: 0,
            last_access: now,
        };

        // a refreshed value restarts in the main tier
        self.hot.remove(&key);
        self.main.insert(key, entry);
        Self::enforce_capacity(&self.main, self.config.main_max_entries);
    }

    pub fn remove(&self, key: u64) {
        self.hot.remove(&key);
        self.main.remove(&key);
    }

    /// Evicts the least-recently-accessed 10% when the tier is over its ceiling.
    fn enforce_capacity(tier: &DashMap<u64, CacheEntry>, max_entries: usize) {
        if tier.len() <= max_entries {
            return;
        }
        let mut by_age: Vec<(u64, Instant)> =
            tier.iter().map(|entry| (*entry.key(), entry.last_access)).collect();
        by_age.sort_unstable_by_key(|(_, last_access)| *last_access);

        let overflow = tier.len().saturating_sub(max_entries);
        let evict = overflow.max(tier.len() / 10).max(1);
        for (key, _) in by_age.into_iter().take(evict) {
            tier.remove(&key);
        }
        tracing::debug!(evicted = evict, remaining = tier.len(), "cache tier evicted lru entries");
    }

    /// Removes expired entries from both tiers and resets access counters.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.len();
        for tier in [&self.hot, &self.main] {
            tier.retain(|_, entry| {
                entry.access_count = 0;
                !entry.is_expired(now)
            });
        }
        before.saturating_sub(self.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hot.len() + self.main.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hot.is_empty() && self.main.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats { hot_entries: self.hot.len(), main_entries: self.main.len() }
    }

    pub fn clear(&self) {
        self.hot.clear();
        self.main.clear();
    }
}
