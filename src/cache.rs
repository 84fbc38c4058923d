//! Two-tier result cache.
//!
//! The **hot** tier is an in-process LRU that starts evicting at 80 %
//! of its capacity; evicted entries demote to the **warm** tier, a
//! TTL map (default 1 h) from which hits promote back to hot.
//!
//! Invalidation is conservative: any write clears all query-result
//! entries, while per-entity entries keyed by id are evicted precisely.
//! Queries carrying metadata filters bypass the cache entirely (the
//! engine never consults it for them), trading hit rate for freshness
//! under concurrent writes.
//!
//! A periodic self-tuning pass observes hit rate and external change
//! rate: a cold cache with memory headroom grows, a corpus changing
//! under replication shortens the warm TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;

/// Default hot-tier capacity when the config selects auto sizing.
const DEFAULT_HOT_CAPACITY: usize = 1024;

/// Upper bound for auto-tune growth.
const MAX_HOT_CAPACITY: usize = 65_536;

/// Floor for auto-tuned warm TTL.
const MIN_WARM_TTL: Duration = Duration::from_secs(60);

/// Hit-rate threshold below which the hot tier grows.
const GROW_HIT_RATE: f64 = 0.3;

/// External-change count per cycle considered "high churn".
const HIGH_CHURN_PER_CYCLE: u64 = 16;

/// Kind of write triggering invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataChange {
    /// Entity created.
    Add,
    /// Entity updated.
    Update,
    /// Entity deleted (soft or hard).
    Delete,
}

/// Cache observability counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from either tier.
    pub hits: u64,
    /// Lookups that missed both tiers.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when idle.
    pub hit_rate: f64,
    /// Entries currently in the hot tier.
    pub hot_len: usize,
    /// Entries currently in the warm tier.
    pub warm_len: usize,
    /// Current hot-tier capacity.
    pub hot_capacity: usize,
    /// Current warm-tier TTL in seconds.
    pub warm_ttl_secs: u64,
}

struct WarmEntry<V> {
    value: V,
    inserted_at: Instant,
}

struct State<V> {
    hot: LruCache<String, V>,
    warm: HashMap<String, WarmEntry<V>>,
    warm_ttl: Duration,
}

/// A hot/warm tiered cache with stable string keys.
pub struct TieredCache<V: Clone> {
    state: Mutex<State<V>>,
    hot_capacity: AtomicUsize,
    evict_ratio: f64,
    auto_tune: bool,
    auto_tune_cycle: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    cycles: AtomicU64,
    external_changes: AtomicU64,
}

impl<V: Clone> TieredCache<V> {
    /// Creates a cache from the tier configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = config.hot_capacity.unwrap_or(DEFAULT_HOT_CAPACITY);
        Self {
            state: Mutex::new(State {
                hot: LruCache::unbounded(),
                warm: HashMap::new(),
                warm_ttl: config.warm_ttl,
            }),
            hot_capacity: AtomicUsize::new(capacity),
            evict_ratio: config.hot_evict_ratio,
            auto_tune: config.auto_tune,
            auto_tune_cycle: config.auto_tune_cycle.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            external_changes: AtomicU64::new(0),
        }
    }

    /// Looks a value up, promoting warm hits back to hot.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock().expect("cache lock");

        if let Some(value) = state.hot.get(key) {
            let value = value.clone();
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        let warm_ttl = state.warm_ttl;
        if let Some(entry) = state.warm.remove(key) {
            if entry.inserted_at.elapsed() < warm_ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let value = entry.value.clone();
                state.hot.push(key.to_string(), entry.value);
                self.trim(&mut state);
                return Some(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Inserts a value into the hot tier.
    pub fn put(&self, key: String, value: V) {
        let mut state = self.state.lock().expect("cache lock");
        state.hot.push(key, value);
        self.trim(&mut state);
    }

    /// Precisely evicts one entry from both tiers.
    pub fn remove(&self, key: &str) {
        let mut state = self.state.lock().expect("cache lock");
        state.hot.pop(key);
        state.warm.remove(key);
    }

    /// Drops every entry in both tiers.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("cache lock");
        state.hot.clear();
        state.warm.clear();
    }

    /// Records a change applied from an external replica feed.
    pub fn note_external_change(&self) {
        self.external_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Advances the update-cycle counter, running the self-tuning pass
    /// on the configured cadence.
    ///
    /// `memory_headroom` gates growth: callers report whether growing
    /// the hot tier is acceptable right now.
    pub fn tick_update_cycle(&self, memory_headroom: bool) {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.auto_tune || cycle % self.auto_tune_cycle != 0 {
            return;
        }

        let hits = self.hits.swap(0, Ordering::Relaxed);
        let misses = self.misses.swap(0, Ordering::Relaxed);
        let external = self.external_changes.swap(0, Ordering::Relaxed);
        let total = hits + misses;

        if total > 0 {
            let hit_rate = hits as f64 / total as f64;
            if hit_rate < GROW_HIT_RATE && memory_headroom {
                let current = self.hot_capacity.load(Ordering::Relaxed);
                let grown = (current * 2).min(MAX_HOT_CAPACITY);
                if grown != current {
                    self.hot_capacity.store(grown, Ordering::Relaxed);
                    debug!(from = current, to = grown, "Grew hot cache tier");
                }
            }
        }

        if external >= HIGH_CHURN_PER_CYCLE {
            let mut state = self.state.lock().expect("cache lock");
            let shortened = (state.warm_ttl / 2).max(MIN_WARM_TTL);
            if shortened != state.warm_ttl {
                debug!(
                    from_secs = state.warm_ttl.as_secs(),
                    to_secs = shortened.as_secs(),
                    "Shortened warm TTL under external churn"
                );
                state.warm_ttl = shortened;
            }
        }
    }

    /// Current counters and sizes.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().expect("cache lock");
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            hot_len: state.hot.len(),
            warm_len: state.warm.len(),
            hot_capacity: self.hot_capacity.load(Ordering::Relaxed),
            warm_ttl_secs: state.warm_ttl.as_secs(),
        }
    }

    /// Demotes LRU hot entries once occupancy crosses the eviction
    /// ratio, and drops expired warm entries on the way.
    fn trim(&self, state: &mut State<V>) {
        let capacity = self.hot_capacity.load(Ordering::Relaxed);
        let threshold = ((capacity as f64) * self.evict_ratio).max(1.0) as usize;
        while state.hot.len() > threshold {
            let Some((key, value)) = state.hot.pop_lru() else {
                break;
            };
            state.warm.insert(
                key,
                WarmEntry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
        }

        let ttl = state.warm_ttl;
        state.warm.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }
}

impl<V: Clone> std::fmt::Debug for TieredCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TieredCache")
            .field("hot_len", &stats.hot_len)
            .field("warm_len", &stats.warm_len)
            .field("hit_rate", &stats.hit_rate)
            .finish_non_exhaustive()
    }
}

/// Builds a stable cache key from labeled parts.
///
/// The key is the SHA-256 of `label=value` pairs joined in call order,
/// so equal query shapes with equal options produce equal keys across
/// processes.
pub fn cache_key<'a>(parts: impl IntoIterator<Item = (&'a str, String)>) -> String {
    let mut hasher = Sha256::new();
    for (label, value) in parts {
        hasher.update(label.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
