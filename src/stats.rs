//! Statistics registry.
//!
//! Engine-owned counters attributed by caller service: noun, verb, and
//! metadata write counts, the HNSW index size gauge, the field-name
//! registry, and standard field mappings. Counters use relaxed atomic
//! increments on the hot path; the background flusher takes snapshots
//! and persists them as `_system/statistics.json` plus the fixed-size
//! per-type counts document (`_system/type-statistics.json` — 31 + 40
//! `u32` slots, 284 bytes regardless of corpus size).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::noun::NounType;
use crate::types::Timestamp;
use crate::verb::VerbType;

/// Per-service counter snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCounts {
    /// Live nouns created by this service.
    pub nouns: u64,
    /// Live verbs created by this service.
    pub verbs: u64,
    /// Metadata writes issued by this service.
    pub metadata_writes: u64,
}

/// Serializable snapshot of all statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Counters per service name.
    pub services: BTreeMap<String, ServiceCounts>,
    /// Nodes currently in the HNSW index.
    pub hnsw_index_size: u64,
    /// Live noun counts per type (fixed 31 slots).
    pub noun_counts: Vec<u32>,
    /// Live verb counts per type (fixed 40 slots).
    pub verb_counts: Vec<u32>,
    /// Metadata field paths observed across the corpus.
    pub field_names: Vec<String>,
    /// Canonical field aliases (e.g. `title` → `name`).
    pub standard_field_mappings: BTreeMap<String, String>,
    /// When the snapshot was taken.
    pub updated_at: Timestamp,
}

impl StatisticsSnapshot {
    /// Sum of live nouns across all types.
    pub fn total_nouns(&self) -> u64 {
        self.noun_counts.iter().map(|&c| c as u64).sum()
    }

    /// Sum of live verbs across all types.
    pub fn total_verbs(&self) -> u64 {
        self.verb_counts.iter().map(|&c| c as u64).sum()
    }
}

/// The fixed-size per-type counts document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStatistics {
    /// Live noun counts per type (31 slots).
    pub noun_counts: Vec<u32>,
    /// Live verb counts per type (40 slots).
    pub verb_counts: Vec<u32>,
}

#[derive(Default)]
struct ServiceCounters {
    nouns: AtomicU64,
    verbs: AtomicU64,
    metadata_writes: AtomicU64,
}

/// The statistics registry.
///
/// Counts reflect *live, non-deleted* entities: adds increment, soft
/// deletes decrement, restores re-increment; hard cleanup doesn't touch
/// them (the soft delete already did).
pub struct Statistics {
    services: RwLock<BTreeMap<String, ServiceCounters>>,
    noun_counts: [AtomicU32; NounType::COUNT],
    verb_counts: [AtomicU32; VerbType::COUNT],
    hnsw_size: AtomicU64,
    field_names: RwLock<BTreeSet<String>>,
    standard_mappings: RwLock<BTreeMap<String, String>>,
    dirty: AtomicBool,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    /// Creates an empty registry with the default standard mappings.
    pub fn new() -> Self {
        let mut standard = BTreeMap::new();
        // Common aliases normalized across ingest sources
        standard.insert("title".to_string(), "name".to_string());
        standard.insert("description".to_string(), "summary".to_string());
        standard.insert("created".to_string(), "createdAt".to_string());
        standard.insert("modified".to_string(), "updatedAt".to_string());

        Self {
            services: RwLock::new(BTreeMap::new()),
            noun_counts: std::array::from_fn(|_| AtomicU32::new(0)),
            verb_counts: std::array::from_fn(|_| AtomicU32::new(0)),
            hnsw_size: AtomicU64::new(0),
            field_names: RwLock::new(BTreeSet::new()),
            standard_mappings: RwLock::new(standard),
            dirty: AtomicBool::new(false),
        }
    }

    fn with_service<R>(&self, service: &str, f: impl FnOnce(&ServiceCounters) -> R) -> R {
        if let Some(counters) = self.services.read().expect("services lock").get(service) {
            return f(counters);
        }
        let mut services = self.services.write().expect("services lock");
        f(services.entry(service.to_string()).or_default())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    // =====================================================================
    // Counters
    // =====================================================================

    /// Records a noun becoming live (created or restored).
    pub fn noun_added(&self, service: &str, noun_type: NounType) {
        self.with_service(service, |c| c.nouns.fetch_add(1, Ordering::Relaxed));
        self.noun_counts[noun_type.index()].fetch_add(1, Ordering::Relaxed);
        self.mark_dirty();
    }

    /// Records a noun leaving the live set (soft delete).
    pub fn noun_removed(&self, service: &str, noun_type: NounType) {
        self.with_service(service, |c| {
            saturating_dec(&c.nouns);
        });
        saturating_dec_u32(&self.noun_counts[noun_type.index()]);
        self.mark_dirty();
    }

    /// Records a verb becoming live.
    pub fn verb_added(&self, service: &str, verb_type: VerbType) {
        self.with_service(service, |c| c.verbs.fetch_add(1, Ordering::Relaxed));
        self.verb_counts[verb_type.index()].fetch_add(1, Ordering::Relaxed);
        self.mark_dirty();
    }

    /// Records a verb leaving the live set.
    pub fn verb_removed(&self, service: &str, verb_type: VerbType) {
        self.with_service(service, |c| {
            saturating_dec(&c.verbs);
        });
        saturating_dec_u32(&self.verb_counts[verb_type.index()]);
        self.mark_dirty();
    }

    /// Records a metadata write.
    pub fn metadata_written(&self, service: &str) {
        self.with_service(service, |c| {
            c.metadata_writes.fetch_add(1, Ordering::Relaxed)
        });
        self.mark_dirty();
    }

    /// Updates the HNSW index size gauge.
    pub fn set_hnsw_size(&self, size: u64) {
        self.hnsw_size.store(size, Ordering::Relaxed);
        self.mark_dirty();
    }

    /// Current HNSW index size gauge.
    pub fn hnsw_size(&self) -> u64 {
        self.hnsw_size.load(Ordering::Relaxed)
    }

    /// Live noun count for one type.
    pub fn noun_count(&self, noun_type: NounType) -> u32 {
        self.noun_counts[noun_type.index()].load(Ordering::Relaxed)
    }

    /// Live verb count for one type.
    pub fn verb_count(&self, verb_type: VerbType) -> u32 {
        self.verb_counts[verb_type.index()].load(Ordering::Relaxed)
    }

    /// Total live nouns across all types.
    pub fn total_nouns(&self) -> u64 {
        self.noun_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed) as u64)
            .sum()
    }

    /// Total live verbs across all types.
    pub fn total_verbs(&self) -> u64 {
        self.verb_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed) as u64)
            .sum()
    }

    // =====================================================================
    // Field registry
    // =====================================================================

    /// Registers metadata field paths seen during writes.
    pub fn track_field_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut registry = self.field_names.write().expect("field names lock");
        let mut changed = false;
        for name in names {
            changed |= registry.insert(name.to_string());
        }
        if changed {
            self.mark_dirty();
        }
    }

    /// All field paths observed so far.
    pub fn field_names(&self) -> Vec<String> {
        self.field_names
            .read()
            .expect("field names lock")
            .iter()
            .cloned()
            .collect()
    }

    /// Canonical field aliases.
    pub fn standard_field_mappings(&self) -> BTreeMap<String, String> {
        self.standard_mappings
            .read()
            .expect("mappings lock")
            .clone()
    }

    /// Adds or replaces one alias mapping.
    pub fn set_standard_field_mapping(&self, from: impl Into<String>, to: impl Into<String>) {
        self.standard_mappings
            .write()
            .expect("mappings lock")
            .insert(from.into(), to.into());
        self.mark_dirty();
    }

    // =====================================================================
    // Snapshots
    // =====================================================================

    /// Returns and clears the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }

    /// Takes a consistent point-in-time snapshot.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let services = self
            .services
            .read()
            .expect("services lock")
            .iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    ServiceCounts {
                        nouns: c.nouns.load(Ordering::Relaxed),
                        verbs: c.verbs.load(Ordering::Relaxed),
                        metadata_writes: c.metadata_writes.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        StatisticsSnapshot {
            services,
            hnsw_index_size: self.hnsw_size.load(Ordering::Relaxed),
            noun_counts: self
                .noun_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            verb_counts: self
                .verb_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            field_names: self.field_names(),
            standard_field_mappings: self.standard_field_mappings(),
            updated_at: Timestamp::now(),
        }
    }

    /// The fixed-size per-type counts document.
    pub fn type_statistics(&self) -> TypeStatistics {
        TypeStatistics {
            noun_counts: self
                .noun_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            verb_counts: self
                .verb_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }

    /// Restores counters from a persisted snapshot.
    pub fn load_snapshot(&self, snapshot: &StatisticsSnapshot) {
        {
            let mut services = self.services.write().expect("services lock");
            services.clear();
            for (name, counts) in &snapshot.services {
                let counters = ServiceCounters {
                    nouns: AtomicU64::new(counts.nouns),
                    verbs: AtomicU64::new(counts.verbs),
                    metadata_writes: AtomicU64::new(counts.metadata_writes),
                };
                services.insert(name.clone(), counters);
            }
        }
        for (i, counter) in self.noun_counts.iter().enumerate() {
            counter.store(
                snapshot.noun_counts.get(i).copied().unwrap_or(0),
                Ordering::Relaxed,
            );
        }
        for (i, counter) in self.verb_counts.iter().enumerate() {
            counter.store(
                snapshot.verb_counts.get(i).copied().unwrap_or(0),
                Ordering::Relaxed,
            );
        }
        self.hnsw_size
            .store(snapshot.hnsw_index_size, Ordering::Relaxed);
        {
            let mut registry = self.field_names.write().expect("field names lock");
            registry.clear();
            registry.extend(snapshot.field_names.iter().cloned());
        }
        {
            let mut mappings = self.standard_mappings.write().expect("mappings lock");
            mappings.clear();
            mappings.extend(
                snapshot
                    .standard_field_mappings
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        self.dirty.store(false, Ordering::Relaxed);
    }

    /// Resets every counter (restore with `clear_existing`).
    pub fn reset(&self) {
        self.services.write().expect("services lock").clear();
        for c in &self.noun_counts {
            c.store(0, Ordering::Relaxed);
        }
        for c in &self.verb_counts {
            c.store(0, Ordering::Relaxed);
        }
        self.hnsw_size.store(0, Ordering::Relaxed);
        self.field_names.write().expect("field names lock").clear();
        self.mark_dirty();
    }
}

impl std::fmt::Debug for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statistics")
            .field("nouns", &self.total_nouns())
            .field("verbs", &self.total_verbs())
            .field("hnsw_size", &self.hnsw_size())
            .finish_non_exhaustive()
    }
}

fn saturating_dec(counter: &AtomicU64) {
    let mut current = counter.load(Ordering::Relaxed);
    while current > 0 {
        match counter.compare_exchange_weak(
            current,
            current - 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

fn saturating_dec_u32(counter: &AtomicU32) {
    let mut current = counter.load(Ordering::Relaxed);
    while current > 0 {
        match counter.compare_exchange_weak(
            current,
            current - 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}
