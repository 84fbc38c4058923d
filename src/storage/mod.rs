//! Storage layer abstractions for SynapseDB.
//!
//! This module provides a trait-based abstraction over the storage
//! adapter, allowing different backends to be used (filesystem for
//! production, in-memory for testing).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SynapseDB                               │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │   StorageAdapter    │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                    ▲         ▲                              │
//! │                    │         │                              │
//! │         ┌─────────┴─┐   ┌───┴──────────┐                   │
//! │         │ FsStorage │   │MemoryStorage │                   │
//! │         └───────────┘   └──────────────┘                   │
//! │           (prod)           (test)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The filesystem adapter lays entities out type-partitioned and
//! sharded (see [`layout`]), which keeps "list one type" an O(1)
//! directory walk and per-type counts a fixed-size array.

pub mod blob;
pub mod cow;
pub mod layout;
pub mod throttle;
pub mod wal;

mod fs;
mod memory;

pub use blob::{BlobRef, BlobStore};
pub use cow::{Commit, CommitGraph};
pub use fs::FsStorage;
pub use layout::{is_null_hash, is_valid_hash, NULL_HASH};
pub use memory::MemoryStorage;
pub use throttle::{ThrottleReason, ThrottleTelemetry, ThrottleTracker};
pub use wal::{WalOp, WalRecord, WriteAheadLog};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Config, RetryPolicy};
use crate::error::Result;
use crate::metadata::{MetadataMap, MetadataPredicate};
use crate::noun::{Noun, NounType};
use crate::stats::StatisticsSnapshot;
use crate::types::{EntityRef, NounId, Timestamp, VerbId};
use crate::vector::{HnswNodeRecord, HnswSystemRecord};
use crate::verb::{Verb, VerbType};

/// Pagination parameters for listing operations.
#[derive(Clone, Debug, Default)]
pub struct Pagination {
    /// Number of matching items to skip.
    pub offset: Option<usize>,
    /// Maximum items to return (adapters apply a default when absent).
    pub limit: Option<usize>,
    /// Opaque cursor from a previous page; takes precedence over
    /// `offset` when present.
    pub cursor: Option<String>,
}

/// Options for `get_nouns` / `get_verbs`.
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Pagination window.
    pub pagination: Pagination,
    /// Metadata predicate applied before pagination.
    pub filter: Option<MetadataPredicate>,
    /// Restrict to one noun type partition (ignored by `get_verbs`).
    pub noun_type: Option<NounType>,
    /// Restrict to one verb type partition (ignored by `get_nouns`).
    pub verb_type: Option<VerbType>,
    /// Include soft-deleted entities (excluded by default).
    pub include_deleted: bool,
}

/// One page of listing results.
///
/// `total_count` is best-effort: adapters omit it when computing it
/// would cost a full scan (e.g. filtered listings). Callers must rely
/// on `has_more` / `next_cursor` for iteration.
#[derive(Clone, Debug)]
pub struct Page<T> {
    /// Items in this page.
    pub items: Vec<T>,
    /// Total matching items, when cheaply known.
    pub total_count: Option<u64>,
    /// Whether more items exist past this page.
    pub has_more: bool,
    /// Cursor resuming after this page, when `has_more`.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// An empty page with no continuation.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_count: Some(0),
            has_more: false,
            next_cursor: None,
        }
    }
}

/// Kind of entity a change refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    /// Entity created.
    Add,
    /// Entity updated (data or metadata).
    Update,
    /// Entity removed.
    Delete,
}

/// One entry in the adapter's change feed.
///
/// Adapters that support distributed reads expose these through
/// [`StorageAdapter::get_changes_since`]; the engine applies them in
/// order to reconcile in-memory index state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Change {
    /// What happened.
    pub operation: ChangeOp,
    /// Which entity it happened to.
    pub entity_id: EntityRef,
    /// Serialized entity state for adds and updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// When it happened.
    pub timestamp: Timestamp,
}

/// Adapter health and identity, surfaced through `get_statistics`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageStatus {
    /// Backend kind (`"filesystem"`, `"memory"`).
    pub kind: String,
    /// Storage root path, if the backend has one.
    pub path: Option<String>,
    /// Nouns in storage, including soft-deleted.
    pub noun_count: u64,
    /// Verbs in storage, including soft-deleted.
    pub verb_count: u64,
    /// Current throttle telemetry.
    pub throttle: ThrottleTelemetry,
}

/// Storage adapter contract.
///
/// Implementations must be `Send + Sync`; the engine shares one adapter
/// across its write pipeline and background tasks. All operations are
/// synchronous; the engine layers retry (for transient failures) and
/// batching on top.
pub trait StorageAdapter: Send + Sync {
    // =====================================================================
    // Lifecycle
    // =====================================================================

    /// Storage root path, if the backend has one.
    fn path(&self) -> Option<&Path>;

    /// Adapter health and counts.
    fn status(&self) -> Result<StorageStatus>;

    /// Flushes any buffered writes.
    fn flush(&self) -> Result<()>;

    /// Removes every entity, system document, and blob.
    fn clear(&self) -> Result<()>;

    // =====================================================================
    // Nouns
    // =====================================================================

    /// Persists a noun (metadata record plus vector record).
    ///
    /// Existing graph topology in the vector record (level, neighbor
    /// lists) is preserved; only the vector payload is replaced.
    fn save_noun(&self, noun: &Noun) -> Result<()>;

    /// Loads a noun by id, or `None` if absent.
    fn get_noun(&self, id: NounId) -> Result<Option<Noun>>;

    /// Lists nouns with filtering and pagination.
    fn get_nouns(&self, opts: &GetOptions) -> Result<Page<Noun>>;

    /// Hard-removes a noun's records. Returns `false` if absent.
    fn delete_noun(&self, id: NounId) -> Result<bool>;

    /// Replaces a noun's metadata record. Returns `false` if absent.
    fn save_noun_metadata(&self, id: NounId, metadata: &MetadataMap) -> Result<bool>;

    /// Loads a noun's metadata record.
    fn get_noun_metadata(&self, id: NounId) -> Result<Option<MetadataMap>>;

    /// Number of nouns in storage, including soft-deleted.
    fn count_nouns(&self) -> Result<u64>;

    // =====================================================================
    // Verbs
    // =====================================================================

    /// Persists a verb (metadata record plus vector record when the
    /// verb carries a vector).
    fn save_verb(&self, verb: &Verb) -> Result<()>;

    /// Loads a verb by id, or `None` if absent.
    fn get_verb(&self, id: VerbId) -> Result<Option<Verb>>;

    /// Lists verbs with filtering and pagination.
    fn get_verbs(&self, opts: &GetOptions) -> Result<Page<Verb>>;

    /// All verbs whose source or target is the given noun.
    fn get_verbs_touching(&self, id: NounId) -> Result<Vec<Verb>>;

    /// Hard-removes a verb's records. Returns `false` if absent.
    fn delete_verb(&self, id: VerbId) -> Result<bool>;

    /// Replaces a verb's metadata record. Returns `false` if absent.
    fn save_verb_metadata(&self, id: VerbId, metadata: &MetadataMap) -> Result<bool>;

    /// Loads a verb's metadata record.
    fn get_verb_metadata(&self, id: VerbId) -> Result<Option<MetadataMap>>;

    /// Number of verbs in storage, including soft-deleted.
    fn count_verbs(&self) -> Result<u64>;

    // =====================================================================
    // HNSW graph records
    // =====================================================================

    /// Persists a graph node record (vector, level, neighbor lists).
    fn save_hnsw_node(&self, record: &HnswNodeRecord) -> Result<()>;

    /// Loads a graph node record.
    fn get_hnsw_node(&self, id: &EntityRef) -> Result<Option<HnswNodeRecord>>;

    /// Removes a graph node record. Returns `false` if absent.
    fn delete_hnsw_node(&self, id: &EntityRef) -> Result<bool>;

    /// Loads every graph node record (index reconstruction).
    ///
    /// Gated by the engine's intelligent-load heuristic; adapters
    /// stream from the type-partitioned layout.
    fn all_hnsw_nodes(&self) -> Result<Vec<HnswNodeRecord>>;

    /// Persists the graph-global record (entry point, max level).
    fn save_hnsw_system(&self, record: &HnswSystemRecord) -> Result<()>;

    /// Loads the graph-global record.
    fn get_hnsw_system(&self) -> Result<Option<HnswSystemRecord>>;

    // =====================================================================
    // Statistics and system documents
    // =====================================================================

    /// Persists the statistics snapshot (`_system/statistics.json` and
    /// the fixed-size type-counts document).
    fn save_statistics(&self, snapshot: &StatisticsSnapshot) -> Result<()>;

    /// Loads the statistics snapshot.
    fn get_statistics(&self) -> Result<Option<StatisticsSnapshot>>;

    /// Persists a named system document (registry, index snapshots).
    fn save_system_doc(&self, name: &str, json: &str) -> Result<()>;

    /// Loads a named system document.
    fn get_system_doc(&self, name: &str) -> Result<Option<String>>;

    // =====================================================================
    // Blobs
    // =====================================================================

    /// Stores a content-addressed payload (idempotent by hash).
    fn put_blob(&self, bytes: &[u8]) -> Result<BlobRef>;

    /// Reads a payload, acquiring a reference to it.
    fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>>;

    /// Releases a reference; reclaims the payload at zero.
    fn release_blob(&self, hash: &str) -> Result<bool>;

    // =====================================================================
    // Change feed and throttling
    // =====================================================================

    /// Changes recorded strictly after `since`, oldest first, capped at
    /// `limit`.
    fn get_changes_since(&self, since: Timestamp, limit: usize) -> Result<Vec<Change>>;

    /// Current throttle telemetry.
    fn throttle_telemetry(&self) -> ThrottleTelemetry;
}

/// Opens a storage adapter for the given configuration.
///
/// `Some(path)` opens a [`FsStorage`] rooted there; `None` creates an
/// in-memory adapter (tests, ephemeral workloads).
pub fn open_storage(
    path: Option<&Path>,
    config: &Config,
) -> Result<Box<dyn StorageAdapter>> {
    match path {
        Some(path) => Ok(Box::new(FsStorage::open(path, config)?)),
        None => Ok(Box::new(MemoryStorage::new(config))),
    }
}

/// Runs an operation under the retry policy.
///
/// Transient failures (throttling, timeouts, connection resets) back
/// off exponentially with up to 50% jitter; all other errors, and
/// exhaustion of the retry budget, propagate immediately.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let base = policy.delay_for_attempt(attempt);
                let jitter_cap = (base.as_millis() as u64 / 2).max(1);
                let jitter = Duration::from_millis(rand::random::<u64>() % jitter_cap);
                tracing::debug!(
                    attempt,
                    delay_ms = (base + jitter).as_millis() as u64,
                    error = %err,
                    "Retrying transient storage failure"
                );
                std::thread::sleep(base + jitter);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
