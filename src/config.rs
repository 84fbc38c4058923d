//! Configuration types for SynapseDB.
//!
//! The [`Config`] struct controls engine behavior including:
//! - Vector dimension and distance function
//! - Engine mode (normal, read-only, write-only, frozen)
//! - HNSW index tuning, cache sizing, cleanup cadence
//! - Write-pipeline batching, deduplication, and retry policy
//!
//! # Example
//! ```rust
//! use synapsedb::{Config, DistanceKind, Mode};
//!
//! // Use defaults (384 dimensions, cosine distance, normal mode)
//! let config = Config::default();
//!
//! // Customize for streaming ingest
//! let config = Config {
//!     mode: Mode::WriteOnly {
//!         allow_direct_reads: true,
//!     },
//!     auto_create_missing_nouns: true,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::vector::DistanceKind;

/// Hard cap on query and search result limits.
pub const MAX_QUERY_LIMIT: usize = 10_000;

/// Engine configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use synapsedb::Config;
///
/// let config = Config {
///     dimensions: 768,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Vector dimension, locked at storage-root creation.
    ///
    /// All vectors written to or queried against this engine must have
    /// exactly this many components. When an embedding service is attached,
    /// its output dimension is probed at open and must match.
    /// Default: 384
    pub dimensions: usize,

    /// Distance function used by the HNSW index.
    pub distance: DistanceKind,

    /// Engine mode gating reads and writes at the facade.
    pub mode: Mode,

    /// Skip eager HNSW reconstruction on open.
    ///
    /// With lazy loading, graph records are pulled from storage on first
    /// search instead of during `open()`. Useful for very large corpora
    /// where open latency matters more than first-query latency.
    pub lazy_load: bool,

    /// Auto-create placeholder nouns for missing verb endpoints.
    ///
    /// Only honored in write-only mode (streaming ingest). Placeholders
    /// are tagged in the reserved metadata namespace and excluded from
    /// search results.
    pub auto_create_missing_nouns: bool,

    /// Disables the write-ahead log.
    ///
    /// Intended for tests where durability is irrelevant and the WAL
    /// fsync cost dominates.
    pub test_mode: bool,

    /// Service name attributed to writes that don't specify one.
    pub default_service: String,

    /// HNSW vector index parameters.
    pub hnsw: HnswConfig,

    /// Hot/warm cache tier parameters.
    pub cache: CacheConfig,

    /// Tombstone cleanup cadence and age threshold.
    pub cleanup: CleanupConfig,

    /// Write batching parameters.
    pub batch: BatchConfig,

    /// Request deduplication window.
    pub dedup: DedupConfig,

    /// External-id registry sizing.
    pub registry: RegistryConfig,

    /// Retry policy for transient storage failures.
    pub retry: RetryPolicy,

    /// Backoff policy applied when the storage backend throttles.
    pub throttle: ThrottlePolicy,

    /// Per-operation-class timeouts.
    pub timeouts: TimeoutConfig,

    /// How often in-memory metadata index deltas are persisted.
    /// Default: 30 seconds
    pub metadata_flush_interval: Duration,

    /// Rebuild the metadata index from storage during `open()`.
    ///
    /// Off by default; the persisted index snapshot is used when present.
    pub rebuild_metadata_on_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // 384 matches all-MiniLM-class sentence embedding models
            dimensions: 384,
            distance: DistanceKind::Cosine,
            mode: Mode::Normal,
            lazy_load: false,
            auto_create_missing_nouns: false,
            test_mode: false,
            default_service: "default".to_string(),
            hnsw: HnswConfig::default(),
            cache: CacheConfig::default(),
            cleanup: CleanupConfig::default(),
            batch: BatchConfig::default(),
            dedup: DedupConfig::default(),
            registry: RegistryConfig::default(),
            retry: RetryPolicy::default(),
            throttle: ThrottlePolicy::default(),
            timeouts: TimeoutConfig::default(),
            metadata_flush_interval: Duration::from_secs(30),
            rebuild_metadata_on_open: false,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config suited to tests: WAL off, no background cleanup.
    pub fn for_testing() -> Self {
        Self {
            test_mode: true,
            cleanup: CleanupConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `SynapseDB::open()`. You can also call this
    /// explicitly to check configuration before attempting to open.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `dimensions` is 0 or exceeds 4096
    /// - Any HNSW parameter is 0
    /// - Batch, dedup, or registry bounds are 0
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dimensions == 0 {
            return Err(ValidationError::invalid_field(
                "dimensions",
                "must be greater than 0",
            ));
        }
        if self.dimensions > 4096 {
            return Err(ValidationError::invalid_field(
                "dimensions",
                "must not exceed 4096",
            ));
        }

        // Validate HNSW parameters
        if self.hnsw.max_neighbors == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.max_neighbors",
                "must be greater than 0",
            ));
        }
        if self.hnsw.ef_construction == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_construction",
                "must be greater than 0",
            ));
        }
        if self.hnsw.ef_search == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_search",
                "must be greater than 0",
            ));
        }

        if self.batch.max_batch_size == 0 {
            return Err(ValidationError::invalid_field(
                "batch.max_batch_size",
                "must be greater than 0",
            ));
        }
        if self.dedup.max_keys == 0 {
            return Err(ValidationError::invalid_field(
                "dedup.max_keys",
                "must be greater than 0",
            ));
        }
        if self.registry.capacity == 0 {
            return Err(ValidationError::invalid_field(
                "registry.capacity",
                "must be greater than 0",
            ));
        }
        if let Some(capacity) = self.cache.hot_capacity {
            if capacity == 0 {
                return Err(ValidationError::invalid_field(
                    "cache.hot_capacity",
                    "must be greater than 0 when set",
                ));
            }
        }

        Ok(())
    }
}

/// Engine mode gating operations at the facade.
///
/// Read-only and write-only are mutually exclusive by construction: the
/// mode is a single enum value, so the contradictory combination cannot
/// be expressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// All operations permitted.
    #[default]
    Normal,

    /// Mutating operations are rejected with a mode violation.
    ReadOnly,

    /// Search operations are rejected with a mode violation.
    ///
    /// Intended for streaming ingest where the index is written but not
    /// queried. With `allow_direct_reads`, id-based lookups bypass the
    /// HNSW index and remain available.
    WriteOnly {
        /// Permit direct id-based lookups despite write-only mode.
        allow_direct_reads: bool,
    },

    /// Mutations, statistics updates, and index optimizations all rejected.
    Frozen,
}

impl Mode {
    /// Returns true if mutating operations are permitted.
    pub fn allows_writes(&self) -> bool {
        matches!(self, Self::Normal | Self::WriteOnly { .. })
    }

    /// Returns true if search operations are permitted.
    pub fn allows_search(&self) -> bool {
        matches!(self, Self::Normal | Self::ReadOnly | Self::Frozen)
    }

    /// Returns true if direct id-based reads are permitted.
    pub fn allows_direct_reads(&self) -> bool {
        match self {
            Self::WriteOnly { allow_direct_reads } => *allow_direct_reads,
            _ => true,
        }
    }

    /// Returns true if statistics counters may be updated.
    pub fn allows_statistics_updates(&self) -> bool {
        !matches!(self, Self::Frozen)
    }

    /// Human-readable mode name, used in mode violation errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ReadOnly => "read-only",
            Self::WriteOnly { .. } => "write-only",
            Self::Frozen => "frozen",
        }
    }
}

/// Configuration for the HNSW vector index.
///
/// Controls the trade-off between index build time, memory usage,
/// and search accuracy.
///
/// # Tuning Guide
///
/// | Use Case     | M  | ef_construction | ef_search |
/// |--------------|----|-----------------|-----------|
/// | Low memory   |  8 |             100 |        50 |
/// | Balanced     | 16 |             200 |       100 |
/// | High recall  | 32 |             400 |       200 |
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Maximum bidirectional connections per node per layer above 0 (M).
    ///
    /// Layer 0 allows 2M connections. Higher values improve recall but
    /// increase memory and build time.
    /// Default: 16
    pub max_neighbors: usize,

    /// Number of candidates tracked during index construction.
    ///
    /// Higher values produce a better quality graph but slow down insertion.
    /// Rule of thumb: ef_construction >= 2 * max_neighbors.
    /// Default: 200
    pub ef_construction: usize,

    /// Number of candidates tracked during search.
    ///
    /// The effective beam width is `max(ef_search, k)`.
    /// Default: 100
    pub ef_search: usize,

    /// Maximum number of layers in the graph.
    ///
    /// Randomly drawn levels are clamped here. Default 16 handles corpora
    /// up to ~1M vectors with M=16.
    pub max_level: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_neighbors: 16,
            ef_construction: 200,
            ef_search: 100,
            max_level: 16,
        }
    }
}

impl HnswConfig {
    /// Level-selection normalization factor: `1 / ln(M)`.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.max_neighbors as f64).ln()
    }

    /// Connection budget for the given layer (2M at layer 0, M above).
    pub fn max_neighbors_at(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_neighbors * 2
        } else {
            self.max_neighbors
        }
    }
}

/// Cache tier configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Hot (LRU) tier entry capacity. `None` selects an automatic size.
    pub hot_capacity: Option<usize>,

    /// Occupancy ratio at which the hot tier starts evicting.
    /// Default: 0.8
    pub hot_evict_ratio: f64,

    /// Warm tier time-to-live.
    /// Default: 1 hour
    pub warm_ttl: Duration,

    /// Enable the periodic self-tuning pass.
    pub auto_tune: bool,

    /// Number of update cycles between auto-tune observations.
    pub auto_tune_cycle: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: None,
            hot_evict_ratio: 0.8,
            warm_ttl: Duration::from_secs(3600),
            auto_tune: true,
            auto_tune_cycle: 100,
        }
    }
}

/// Tombstone cleanup configuration.
#[derive(Clone, Debug)]
pub struct CleanupConfig {
    /// Whether the background cleanup thread runs at all.
    pub enabled: bool,

    /// How often the cleanup scanner wakes.
    /// Default: 15 minutes
    pub interval: Duration,

    /// Minimum tombstone age before hard removal.
    /// Default: 1 hour
    pub max_age: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15 * 60),
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Write batching configuration.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Maximum operations accumulated before a forced flush.
    /// Default: 1000
    pub max_batch_size: usize,

    /// Maximum time an operation waits in the accumulator.
    /// Default: 100 ms
    pub max_wait: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            max_wait: Duration::from_millis(100),
        }
    }
}

/// Request deduplication configuration.
#[derive(Clone, Debug)]
pub struct DedupConfig {
    /// Window within which identical operations coalesce.
    /// Default: 5 seconds
    pub window: Duration,

    /// Maximum tracked operation keys.
    /// Default: 1000
    pub max_keys: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            max_keys: 1000,
        }
    }
}

/// External-id registry configuration.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Maximum external-id → uuid entries held in memory.
    /// Default: 100 000
    pub capacity: usize,

    /// Entry time-to-live.
    /// Default: 5 minutes
    pub ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Retry policy for transient storage failures.
///
/// Non-retryable errors (validation, dimension mismatch, not-found) fail
/// immediately regardless of this policy.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial failure.
    /// Default: 3
    pub max_retries: u32,

    /// Delay before the first retry.
    /// Default: 1 second
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    /// Default: 10 seconds
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt.
    /// Default: 2.0
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff delay for the given attempt (0-based), without
    /// jitter. The caller adds jitter so tests stay deterministic.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Backoff policy applied when the storage backend throttles (429/503,
/// connection reset, timeout).
#[derive(Clone, Debug)]
pub struct ThrottlePolicy {
    /// Base backoff delay.
    /// Default: 1 second
    pub base_delay: Duration,

    /// Maximum backoff delay.
    /// Default: 30 seconds
    pub max_delay: Duration,

    /// Continuous success duration after which backoff state resets.
    /// Default: 60 seconds
    pub reset_after: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Per-operation-class timeouts.
///
/// These bound how long a caller blocks on the batched-write
/// acknowledgement and deduplication coalescing paths.
#[derive(Clone, Debug)]
pub struct TimeoutConfig {
    /// Timeout for read operations. Default: 30 seconds
    pub get: Duration,

    /// Timeout for insert/update operations. Default: 60 seconds
    pub add: Duration,

    /// Timeout for delete operations. Default: 30 seconds
    pub delete: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            get: Duration::from_secs(30),
            add: Duration::from_secs(60),
            delete: Duration::from_secs(30),
        }
    }
}
