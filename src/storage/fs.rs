//! Filesystem storage adapter.
//!
//! The production backend. Entities are JSON files under the
//! type-partitioned sharded layout (see [`super::layout`]); writes go
//! through a temp-file-plus-rename so a crash never leaves a torn
//! record. A `fs2` advisory lock on the storage root makes a second
//! writer process fail fast instead of corrupting state.
//!
//! An in-memory location map (uuid → type) is built from directory
//! names at open, so id-based lookups don't probe 31 type directories;
//! verb endpoints are additionally indexed for O(1) adjacency lookups.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use fs2::FileExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, StorageError, SynapseError, ValidationError};
use crate::metadata::{MetadataMap, SystemMetadata};
use crate::noun::{Noun, NounType};
use crate::query::cursor::{decode_cursor, encode_cursor};
use crate::stats::{StatisticsSnapshot, TypeStatistics};
use crate::types::{EntityRef, NounId, Timestamp, VerbId};
use crate::vector::{HnswNodeRecord, HnswSystemRecord};
use crate::verb::{Verb, VerbType};

use serde::{Deserialize, Serialize};

use super::blob::{BlobRef, BlobStore};
use super::layout::{
    self, noun_path, noun_type_dir, system_doc_path, verb_path, verb_type_dir, RecordKind,
};
use super::throttle::{ThrottleReason, ThrottleTelemetry, ThrottleTracker};
use super::{Change, ChangeOp, GetOptions, Page, StorageAdapter, StorageStatus};

/// Current storage schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Default page size when the caller doesn't specify a limit.
const DEFAULT_PAGE_LIMIT: usize = 100;

/// Bounded change-feed capacity.
const CHANGE_LOG_CAPACITY: usize = 10_000;

const STORAGE_META_DOC: &str = "storage-meta";
const STATISTICS_DOC: &str = "statistics";
const TYPE_STATISTICS_DOC: &str = "type-statistics";
const HNSW_SYSTEM_DOC: &str = "hnsw-system";

/// Root-level metadata validated on every open.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StorageMeta {
    schema_version: u32,
    dimensions: usize,
    created_at: Timestamp,
    last_opened_at: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct NounMetadataRecord {
    id: NounId,
    noun_type: NounType,
    metadata: MetadataMap,
    created_at: Timestamp,
    updated_at: Timestamp,
    created_by: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct VerbMetadataRecord {
    id: VerbId,
    source: NounId,
    target: NounId,
    verb_type: VerbType,
    weight: f32,
    confidence: f32,
    metadata: MetadataMap,
    created_at: Timestamp,
    updated_at: Timestamp,
    created_by: String,
}

#[derive(Default)]
struct Locations {
    nouns: HashMap<Uuid, NounType>,
    verbs: HashMap<Uuid, VerbType>,
    /// Verb ids touching each noun (as source or target).
    adjacency: HashMap<NounId, HashSet<VerbId>>,
}

/// Filesystem storage adapter.
pub struct FsStorage {
    root: PathBuf,
    /// Held for the adapter's lifetime; the OS releases it on drop.
    _lock_file: File,
    default_service: String,
    locations: RwLock<Locations>,
    blobs: BlobStore,
    changes: Mutex<VecDeque<Change>>,
    throttle: ThrottleTracker,
}

impl FsStorage {
    /// Opens or creates a storage root.
    ///
    /// # Errors
    ///
    /// - Another process holds the writer lock
    /// - The schema version doesn't match
    /// - The configured dimension doesn't match an existing root
    #[instrument(skip(config), fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let lock_path = root.join(".lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::DatabaseLocked)?;

        let meta_path = system_doc_path(&root, STORAGE_META_DOC);
        let existing = meta_path.exists();
        if existing {
            let json = fs::read_to_string(&meta_path)?;
            let mut meta: StorageMeta =
                serde_json::from_str(&json).map_err(StorageError::from)?;
            if meta.schema_version != SCHEMA_VERSION {
                return Err(SynapseError::from(StorageError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    found: meta.schema_version,
                }));
            }
            if meta.dimensions != config.dimensions {
                return Err(SynapseError::from(ValidationError::dimension_mismatch(
                    config.dimensions,
                    meta.dimensions,
                )));
            }
            meta.last_opened_at = Timestamp::now();
            write_json_atomic(&meta_path, &meta)?;
            info!("Opened existing storage root");
        } else {
            let now = Timestamp::now();
            let meta = StorageMeta {
                schema_version: SCHEMA_VERSION,
                dimensions: config.dimensions,
                created_at: now,
                last_opened_at: now,
            };
            write_json_atomic(&meta_path, &meta)?;
            info!(
                schema_version = SCHEMA_VERSION,
                dimensions = config.dimensions,
                "Initialized storage root"
            );
        }

        let storage = Self {
            blobs: BlobStore::new(&root),
            default_service: config.default_service.clone(),
            locations: RwLock::new(Locations::default()),
            changes: Mutex::new(VecDeque::new()),
            throttle: ThrottleTracker::new(config.throttle.clone()),
            _lock_file: lock_file,
            root,
        };

        if existing {
            storage.scan_locations()?;
        }

        Ok(storage)
    }

    /// Rebuilds the location map from the directory layout.
    fn scan_locations(&self) -> Result<()> {
        let mut locations = Locations::default();

        for noun_type in NounType::ALL {
            let dir = noun_type_dir(&self.root, noun_type, RecordKind::Metadata);
            for id in list_record_ids(&dir)? {
                locations.nouns.insert(id, noun_type);
            }
        }

        for verb_type in VerbType::ALL {
            let dir = verb_type_dir(&self.root, verb_type, RecordKind::Metadata);
            for id in list_record_ids(&dir)? {
                locations.verbs.insert(id, verb_type);
                // Adjacency needs the endpoints, which live in the record
                let path = verb_path(&self.root, verb_type, RecordKind::Metadata, &id);
                match read_json::<VerbMetadataRecord>(&path)? {
                    Some(record) => {
                        let verb_id = VerbId(id);
                        locations
                            .adjacency
                            .entry(record.source)
                            .or_default()
                            .insert(verb_id);
                        locations
                            .adjacency
                            .entry(record.target)
                            .or_default()
                            .insert(verb_id);
                    }
                    None => warn!(id = %id, "Verb metadata record vanished during scan"),
                }
            }
        }

        debug!(
            nouns = locations.nouns.len(),
            verbs = locations.verbs.len(),
            "Location map built"
        );
        *self.locations.write().expect("locations lock") = locations;
        Ok(())
    }

    fn record_change(&self, operation: ChangeOp, entity_id: EntityRef, data: Option<serde_json::Value>) {
        let mut changes = self.changes.lock().expect("changes lock");
        if changes.len() >= CHANGE_LOG_CAPACITY {
            changes.pop_front();
        }
        changes.push_back(Change {
            operation,
            entity_id,
            data,
            timestamp: Timestamp::now(),
        });
    }

    /// Feeds the throttle tracker from an operation outcome.
    fn note<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.throttle.record_success(),
            Err(SynapseError::Storage(e)) => {
                if let Some(reason) = ThrottleReason::classify(e) {
                    self.throttle.record_failure(reason, &self.default_service);
                }
            }
            Err(_) => {}
        }
        result
    }

    fn noun_type_of(&self, id: NounId) -> Option<NounType> {
        self.locations
            .read()
            .expect("locations lock")
            .nouns
            .get(&id.0)
            .copied()
    }

    fn verb_type_of(&self, id: VerbId) -> Option<VerbType> {
        self.locations
            .read()
            .expect("locations lock")
            .verbs
            .get(&id.0)
            .copied()
    }

    fn load_noun(&self, id: NounId, noun_type: NounType) -> Result<Option<Noun>> {
        let meta_path = noun_path(&self.root, noun_type, RecordKind::Metadata, &id.0);
        let Some(record) = read_json::<NounMetadataRecord>(&meta_path)? else {
            return Ok(None);
        };

        let vec_path = noun_path(&self.root, noun_type, RecordKind::Vectors, &id.0);
        let Some(vector_record) = read_json::<HnswNodeRecord>(&vec_path)? else {
            // A metadata record without its vector record is corruption;
            // surface it instead of fabricating a vector
            return Err(SynapseError::corruption(format!(
                "noun {} has no vector record",
                id
            )));
        };

        Ok(Some(Noun {
            id: record.id,
            noun_type: record.noun_type,
            vector: vector_record.vector,
            metadata: record.metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
            created_by: record.created_by,
        }))
    }

    fn load_verb(&self, id: VerbId, verb_type: VerbType) -> Result<Option<Verb>> {
        let meta_path = verb_path(&self.root, verb_type, RecordKind::Metadata, &id.0);
        let Some(record) = read_json::<VerbMetadataRecord>(&meta_path)? else {
            return Ok(None);
        };

        let vec_path = verb_path(&self.root, verb_type, RecordKind::Vectors, &id.0);
        let vector = read_json::<HnswNodeRecord>(&vec_path)?.map(|r| r.vector);

        Ok(Some(Verb {
            id: record.id,
            source: record.source,
            target: record.target,
            verb_type: record.verb_type,
            weight: record.weight,
            confidence: record.confidence,
            vector,
            metadata: record.metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
            created_by: record.created_by,
        }))
    }

    /// Resolves the page window from pagination options.
    fn page_window(pagination: &super::Pagination) -> (usize, usize) {
        let offset = match &pagination.cursor {
            // Cursor decoding failures degrade to offset 0
            Some(cursor) => decode_cursor(cursor).unwrap_or(0),
            None => pagination.offset.unwrap_or(0),
        };
        let limit = pagination.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        (offset, limit)
    }
}

impl StorageAdapter for FsStorage {
    fn path(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn status(&self) -> Result<StorageStatus> {
        Ok(StorageStatus {
            kind: "filesystem".to_string(),
            path: Some(self.root.display().to_string()),
            noun_count: self.count_nouns()?,
            verb_count: self.count_verbs()?,
            throttle: self.throttle.telemetry(),
        })
    }

    fn flush(&self) -> Result<()> {
        // Writes are synchronous (rename-committed); nothing buffered
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for dir in ["entities", layout::BLOBS_DIR, layout::COMMITS_DIR] {
            let path = self.root.join(dir);
            if path.exists() {
                fs::remove_dir_all(&path)?;
            }
        }
        for doc in [STATISTICS_DOC, TYPE_STATISTICS_DOC, HNSW_SYSTEM_DOC] {
            let path = system_doc_path(&self.root, doc);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        *self.locations.write().expect("locations lock") = Locations::default();
        self.changes.lock().expect("changes lock").clear();
        info!("Storage cleared");
        Ok(())
    }

    // =====================================================================
    // Nouns
    // =====================================================================

    fn save_noun(&self, noun: &Noun) -> Result<()> {
        let result = (|| {
            let existed = self.noun_type_of(noun.id).is_some();

            let record = NounMetadataRecord {
                id: noun.id,
                noun_type: noun.noun_type,
                metadata: noun.metadata.clone(),
                created_at: noun.created_at,
                updated_at: noun.updated_at,
                created_by: noun.created_by.clone(),
            };
            write_json_atomic(
                &noun_path(&self.root, noun.noun_type, RecordKind::Metadata, &noun.id.0),
                &record,
            )?;

            // Preserve graph topology on rewrite; only the vector changes
            let vec_path = noun_path(&self.root, noun.noun_type, RecordKind::Vectors, &noun.id.0);
            let vector_record = match read_json::<HnswNodeRecord>(&vec_path)? {
                Some(mut existing) => {
                    existing.vector = noun.vector.clone();
                    existing
                }
                None => HnswNodeRecord {
                    id: EntityRef::Noun(noun.id),
                    vector: noun.vector.clone(),
                    level: 0,
                    neighbors: Default::default(),
                },
            };
            write_json_atomic(&vec_path, &vector_record)?;

            self.locations
                .write()
                .expect("locations lock")
                .nouns
                .insert(noun.id.0, noun.noun_type);

            let op = if existed { ChangeOp::Update } else { ChangeOp::Add };
            self.record_change(op, EntityRef::Noun(noun.id), serde_json::to_value(noun).ok());
            Ok(())
        })();
        self.note(result)
    }

    fn get_noun(&self, id: NounId) -> Result<Option<Noun>> {
        let Some(noun_type) = self.noun_type_of(id) else {
            return Ok(None);
        };
        let result = self.load_noun(id, noun_type);
        self.note(result)
    }

    fn get_nouns(&self, opts: &GetOptions) -> Result<Page<Noun>> {
        let result = (|| {
            let mut ids: Vec<(Uuid, NounType)> = {
                let locations = self.locations.read().expect("locations lock");
                locations
                    .nouns
                    .iter()
                    .filter(|(_, t)| opts.noun_type.map_or(true, |want| **t == want))
                    .map(|(id, t)| (*id, *t))
                    .collect()
            };
            ids.sort_by_key(|(id, _)| *id);

            let (offset, limit) = Self::page_window(&opts.pagination);
            let unfiltered = opts.filter.is_none() && opts.include_deleted;
            let total_count = unfiltered.then_some(ids.len() as u64);

            let mut items = Vec::new();
            let mut matched = 0usize;
            let mut has_more = false;
            for (id, noun_type) in ids {
                let noun = match self.load_noun(NounId(id), noun_type) {
                    Ok(Some(noun)) => noun,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(id = %id, error = %e, "Skipping unreadable noun record");
                        continue;
                    }
                };
                if !opts.include_deleted && noun.is_deleted() {
                    continue;
                }
                if let Some(filter) = &opts.filter {
                    if !filter.matches(&noun.metadata) {
                        continue;
                    }
                }
                if matched >= offset {
                    if items.len() < limit {
                        items.push(noun);
                    } else {
                        has_more = true;
                        break;
                    }
                }
                matched += 1;
            }

            let next_cursor = has_more.then(|| encode_cursor(offset + items.len()));
            Ok(Page {
                items,
                total_count,
                has_more,
                next_cursor,
            })
        })();
        self.note(result)
    }

    fn delete_noun(&self, id: NounId) -> Result<bool> {
        let Some(noun_type) = self.noun_type_of(id) else {
            return Ok(false);
        };
        remove_if_exists(&noun_path(&self.root, noun_type, RecordKind::Metadata, &id.0))?;
        remove_if_exists(&noun_path(&self.root, noun_type, RecordKind::Vectors, &id.0))?;
        {
            let mut locations = self.locations.write().expect("locations lock");
            locations.nouns.remove(&id.0);
            locations.adjacency.remove(&id);
        }
        self.record_change(ChangeOp::Delete, EntityRef::Noun(id), None);
        Ok(true)
    }

    fn save_noun_metadata(&self, id: NounId, metadata: &MetadataMap) -> Result<bool> {
        let Some(noun_type) = self.noun_type_of(id) else {
            return Ok(false);
        };
        let path = noun_path(&self.root, noun_type, RecordKind::Metadata, &id.0);
        let Some(mut record) = read_json::<NounMetadataRecord>(&path)? else {
            return Ok(false);
        };
        record.metadata = metadata.clone();
        record.updated_at = Timestamp::now();
        write_json_atomic(&path, &record)?;
        self.record_change(
            ChangeOp::Update,
            EntityRef::Noun(id),
            serde_json::to_value(metadata).ok(),
        );
        Ok(true)
    }

    fn get_noun_metadata(&self, id: NounId) -> Result<Option<MetadataMap>> {
        let Some(noun_type) = self.noun_type_of(id) else {
            return Ok(None);
        };
        let path = noun_path(&self.root, noun_type, RecordKind::Metadata, &id.0);
        Ok(read_json::<NounMetadataRecord>(&path)?.map(|r| r.metadata))
    }

    fn count_nouns(&self) -> Result<u64> {
        Ok(self.locations.read().expect("locations lock").nouns.len() as u64)
    }

    // =====================================================================
    // Verbs
    // =====================================================================

    fn save_verb(&self, verb: &Verb) -> Result<()> {
        let result = (|| {
            let existed = self.verb_type_of(verb.id).is_some();

            let record = VerbMetadataRecord {
                id: verb.id,
                source: verb.source,
                target: verb.target,
                verb_type: verb.verb_type,
                weight: verb.weight,
                confidence: verb.confidence,
                metadata: verb.metadata.clone(),
                created_at: verb.created_at,
                updated_at: verb.updated_at,
                created_by: verb.created_by.clone(),
            };
            write_json_atomic(
                &verb_path(&self.root, verb.verb_type, RecordKind::Metadata, &verb.id.0),
                &record,
            )?;

            if let Some(vector) = &verb.vector {
                let vec_path =
                    verb_path(&self.root, verb.verb_type, RecordKind::Vectors, &verb.id.0);
                let vector_record = match read_json::<HnswNodeRecord>(&vec_path)? {
                    Some(mut existing) => {
                        existing.vector = vector.clone();
                        existing
                    }
                    None => HnswNodeRecord {
                        id: EntityRef::Verb(verb.id),
                        vector: vector.clone(),
                        level: 0,
                        neighbors: Default::default(),
                    },
                };
                write_json_atomic(&vec_path, &vector_record)?;
            }

            {
                let mut locations = self.locations.write().expect("locations lock");
                locations.verbs.insert(verb.id.0, verb.verb_type);
                locations
                    .adjacency
                    .entry(verb.source)
                    .or_default()
                    .insert(verb.id);
                locations
                    .adjacency
                    .entry(verb.target)
                    .or_default()
                    .insert(verb.id);
            }

            let op = if existed { ChangeOp::Update } else { ChangeOp::Add };
            self.record_change(op, EntityRef::Verb(verb.id), serde_json::to_value(verb).ok());
            Ok(())
        })();
        self.note(result)
    }

    fn get_verb(&self, id: VerbId) -> Result<Option<Verb>> {
        let Some(verb_type) = self.verb_type_of(id) else {
            return Ok(None);
        };
        let result = self.load_verb(id, verb_type);
        self.note(result)
    }

    fn get_verbs(&self, opts: &GetOptions) -> Result<Page<Verb>> {
        let mut ids: Vec<(Uuid, VerbType)> = {
            let locations = self.locations.read().expect("locations lock");
            locations
                .verbs
                .iter()
                .filter(|(_, t)| opts.verb_type.map_or(true, |want| **t == want))
                .map(|(id, t)| (*id, *t))
                .collect()
        };
        ids.sort_by_key(|(id, _)| *id);

        let (offset, limit) = Self::page_window(&opts.pagination);
        let unfiltered = opts.filter.is_none() && opts.include_deleted;
        let total_count = unfiltered.then_some(ids.len() as u64);

        let mut items = Vec::new();
        let mut matched = 0usize;
        let mut has_more = false;
        for (id, verb_type) in ids {
            let verb = match self.load_verb(VerbId(id), verb_type) {
                Ok(Some(verb)) => verb,
                Ok(None) => continue,
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping unreadable verb record");
                    continue;
                }
            };
            if !opts.include_deleted && verb.is_deleted() {
                continue;
            }
            if let Some(filter) = &opts.filter {
                if !filter.matches(&verb.metadata) {
                    continue;
                }
            }
            if matched >= offset {
                if items.len() < limit {
                    items.push(verb);
                } else {
                    has_more = true;
                    break;
                }
            }
            matched += 1;
        }

        let next_cursor = has_more.then(|| encode_cursor(offset + items.len()));
        Ok(Page {
            items,
            total_count,
            has_more,
            next_cursor,
        })
    }

    fn get_verbs_touching(&self, id: NounId) -> Result<Vec<Verb>> {
        let verb_ids: Vec<VerbId> = {
            let locations = self.locations.read().expect("locations lock");
            locations
                .adjacency
                .get(&id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };

        let mut verbs = Vec::with_capacity(verb_ids.len());
        for verb_id in verb_ids {
            if let Some(verb) = self.get_verb(verb_id)? {
                verbs.push(verb);
            }
        }
        verbs.sort_by_key(|v| v.id);
        Ok(verbs)
    }

    fn delete_verb(&self, id: VerbId) -> Result<bool> {
        let Some(verb_type) = self.verb_type_of(id) else {
            return Ok(false);
        };

        // Endpoints come from the record for adjacency cleanup
        let record_path = verb_path(&self.root, verb_type, RecordKind::Metadata, &id.0);
        let record = read_json::<VerbMetadataRecord>(&record_path)?;

        remove_if_exists(&record_path)?;
        remove_if_exists(&verb_path(&self.root, verb_type, RecordKind::Vectors, &id.0))?;

        {
            let mut locations = self.locations.write().expect("locations lock");
            locations.verbs.remove(&id.0);
            if let Some(record) = &record {
                for endpoint in [record.source, record.target] {
                    if let Some(set) = locations.adjacency.get_mut(&endpoint) {
                        set.remove(&id);
                        if set.is_empty() {
                            locations.adjacency.remove(&endpoint);
                        }
                    }
                }
            }
        }
        self.record_change(ChangeOp::Delete, EntityRef::Verb(id), None);
        Ok(true)
    }

    fn save_verb_metadata(&self, id: VerbId, metadata: &MetadataMap) -> Result<bool> {
        let Some(verb_type) = self.verb_type_of(id) else {
            return Ok(false);
        };
        let path = verb_path(&self.root, verb_type, RecordKind::Metadata, &id.0);
        let Some(mut record) = read_json::<VerbMetadataRecord>(&path)? else {
            return Ok(false);
        };
        record.metadata = metadata.clone();
        record.updated_at = Timestamp::now();
        write_json_atomic(&path, &record)?;
        self.record_change(
            ChangeOp::Update,
            EntityRef::Verb(id),
            serde_json::to_value(metadata).ok(),
        );
        Ok(true)
    }

    fn get_verb_metadata(&self, id: VerbId) -> Result<Option<MetadataMap>> {
        let Some(verb_type) = self.verb_type_of(id) else {
            return Ok(None);
        };
        let path = verb_path(&self.root, verb_type, RecordKind::Metadata, &id.0);
        Ok(read_json::<VerbMetadataRecord>(&path)?.map(|r| r.metadata))
    }

    fn count_verbs(&self) -> Result<u64> {
        Ok(self.locations.read().expect("locations lock").verbs.len() as u64)
    }

    // =====================================================================
    // HNSW graph records
    // =====================================================================

    fn save_hnsw_node(&self, record: &HnswNodeRecord) -> Result<()> {
        let path = match record.id {
            EntityRef::Noun(id) => {
                let Some(noun_type) = self.noun_type_of(id) else {
                    return Err(SynapseError::corruption(format!(
                        "graph record for unknown noun {}",
                        id
                    )));
                };
                noun_path(&self.root, noun_type, RecordKind::Vectors, &id.0)
            }
            EntityRef::Verb(id) => {
                let Some(verb_type) = self.verb_type_of(id) else {
                    return Err(SynapseError::corruption(format!(
                        "graph record for unknown verb {}",
                        id
                    )));
                };
                verb_path(&self.root, verb_type, RecordKind::Vectors, &id.0)
            }
        };
        write_json_atomic(&path, record)
    }

    fn get_hnsw_node(&self, id: &EntityRef) -> Result<Option<HnswNodeRecord>> {
        let path = match id {
            EntityRef::Noun(id) => match self.noun_type_of(*id) {
                Some(t) => noun_path(&self.root, t, RecordKind::Vectors, &id.0),
                None => return Ok(None),
            },
            EntityRef::Verb(id) => match self.verb_type_of(*id) {
                Some(t) => verb_path(&self.root, t, RecordKind::Vectors, &id.0),
                None => return Ok(None),
            },
        };
        read_json(&path)
    }

    fn delete_hnsw_node(&self, id: &EntityRef) -> Result<bool> {
        let path = match id {
            EntityRef::Noun(id) => match self.noun_type_of(*id) {
                Some(t) => noun_path(&self.root, t, RecordKind::Vectors, &id.0),
                None => return Ok(false),
            },
            EntityRef::Verb(id) => match self.verb_type_of(*id) {
                Some(t) => verb_path(&self.root, t, RecordKind::Vectors, &id.0),
                None => return Ok(false),
            },
        };
        remove_if_exists(&path)
    }

    fn all_hnsw_nodes(&self) -> Result<Vec<HnswNodeRecord>> {
        let (nouns, verbs): (Vec<(Uuid, NounType)>, Vec<(Uuid, VerbType)>) = {
            let locations = self.locations.read().expect("locations lock");
            (
                locations.nouns.iter().map(|(id, t)| (*id, *t)).collect(),
                locations.verbs.iter().map(|(id, t)| (*id, *t)).collect(),
            )
        };

        let mut records = Vec::with_capacity(nouns.len());
        for (id, noun_type) in nouns {
            let path = noun_path(&self.root, noun_type, RecordKind::Vectors, &id);
            match read_json::<HnswNodeRecord>(&path)? {
                Some(record) => records.push(record),
                None => warn!(id = %id, "Noun vector record missing during graph load"),
            }
        }
        for (id, verb_type) in verbs {
            let path = verb_path(&self.root, verb_type, RecordKind::Vectors, &id);
            // Vector-less verbs have no record; that's expected
            if let Some(record) = read_json::<HnswNodeRecord>(&path)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn save_hnsw_system(&self, record: &HnswSystemRecord) -> Result<()> {
        write_json_atomic(&system_doc_path(&self.root, HNSW_SYSTEM_DOC), record)
    }

    fn get_hnsw_system(&self) -> Result<Option<HnswSystemRecord>> {
        read_json(&system_doc_path(&self.root, HNSW_SYSTEM_DOC))
    }

    // =====================================================================
    // Statistics and system documents
    // =====================================================================

    fn save_statistics(&self, snapshot: &StatisticsSnapshot) -> Result<()> {
        write_json_atomic(&system_doc_path(&self.root, STATISTICS_DOC), snapshot)?;
        let type_stats = TypeStatistics {
            noun_counts: snapshot.noun_counts.clone(),
            verb_counts: snapshot.verb_counts.clone(),
        };
        write_json_atomic(&system_doc_path(&self.root, TYPE_STATISTICS_DOC), &type_stats)
    }

    fn get_statistics(&self) -> Result<Option<StatisticsSnapshot>> {
        read_json(&system_doc_path(&self.root, STATISTICS_DOC))
    }

    fn save_system_doc(&self, name: &str, json: &str) -> Result<()> {
        let path = system_doc_path(&self.root, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get_system_doc(&self, name: &str) -> Result<Option<String>> {
        let path = system_doc_path(&self.root, name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    // =====================================================================
    // Blobs
    // =====================================================================

    fn put_blob(&self, bytes: &[u8]) -> Result<BlobRef> {
        self.blobs.put(bytes)
    }

    fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        self.blobs.get(hash)
    }

    fn release_blob(&self, hash: &str) -> Result<bool> {
        self.blobs.release(hash)
    }

    // =====================================================================
    // Change feed and throttling
    // =====================================================================

    fn get_changes_since(&self, since: Timestamp, limit: usize) -> Result<Vec<Change>> {
        let changes = self.changes.lock().expect("changes lock");
        Ok(changes
            .iter()
            .filter(|c| c.timestamp > since)
            .take(limit)
            .cloned()
            .collect())
    }

    fn throttle_telemetry(&self) -> ThrottleTelemetry {
        self.throttle.telemetry()
    }
}

impl std::fmt::Debug for FsStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStorage")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// File helpers
// =========================================================================

/// Writes JSON through a temp file and rename, so readers never observe
/// a torn record.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(value).map_err(StorageError::from)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    let value = serde_json::from_str(&json).map_err(|e| {
        StorageError::corrupted(format!("{}: {}", path.display(), e))
    })?;
    Ok(Some(value))
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Record ids under a type directory (filenames, no parsing).
fn list_record_ids(dir: &Path) -> Result<Vec<Uuid>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for shard in fs::read_dir(dir)? {
        let shard = shard?;
        if !shard.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(shard.path())? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = Uuid::parse_str(stem) {
                    out.push(id);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataValue;
    use tempfile::tempdir;

    fn test_noun(dim: usize) -> Noun {
        let mut metadata = MetadataMap::new();
        metadata.insert("label".to_string(), MetadataValue::from("alpha"));
        SystemMetadata::default().apply_to(&mut metadata);
        Noun {
            id: NounId::new(),
            noun_type: NounType::Concept,
            vector: vec![0.5; dim],
            metadata,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        }
    }

    fn test_verb(source: NounId, target: NounId) -> Verb {
        Verb {
            id: VerbId::new(),
            source,
            target,
            verb_type: VerbType::RelatedTo,
            weight: 0.5,
            confidence: 0.5,
            vector: Some(vec![0.25; 4]),
            metadata: MetadataMap::new(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        }
    }

    fn open(dir: &Path) -> FsStorage {
        let config = Config {
            dimensions: 4,
            ..Config::for_testing()
        };
        FsStorage::open(dir, &config).unwrap()
    }

    #[test]
    fn test_noun_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let noun = test_noun(4);
        storage.save_noun(&noun).unwrap();

        let loaded = storage.get_noun(noun.id).unwrap().unwrap();
        assert_eq!(loaded.id, noun.id);
        assert_eq!(loaded.vector, noun.vector);
        assert_eq!(loaded.metadata, noun.metadata);
        assert_eq!(storage.count_nouns().unwrap(), 1);
    }

    #[test]
    fn test_layout_paths_on_disk() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let noun = test_noun(4);
        storage.save_noun(&noun).unwrap();

        let shard = layout::shard_of(&noun.id.0);
        let vectors = dir
            .path()
            .join("entities/nouns/concept/vectors")
            .join(&shard)
            .join(format!("{}.json", noun.id.0));
        let metadata = dir
            .path()
            .join("entities/nouns/concept/metadata")
            .join(&shard)
            .join(format!("{}.json", noun.id.0));
        assert!(vectors.exists());
        assert!(metadata.exists());
    }

    #[test]
    fn test_second_writer_locked_out() {
        let dir = tempdir().unwrap();
        let _storage = open(dir.path());

        let config = Config {
            dimensions: 4,
            ..Config::for_testing()
        };
        let err = FsStorage::open(dir.path(), &config).unwrap_err();
        assert!(matches!(
            err,
            SynapseError::Storage(StorageError::DatabaseLocked)
        ));
    }

    #[test]
    fn test_dimension_mismatch_on_reopen() {
        let dir = tempdir().unwrap();
        drop(open(dir.path()));

        let config = Config {
            dimensions: 8,
            ..Config::for_testing()
        };
        let err = FsStorage::open(dir.path(), &config).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_locations_rebuilt_on_reopen() {
        let dir = tempdir().unwrap();
        let noun = test_noun(4);
        {
            let storage = open(dir.path());
            storage.save_noun(&noun).unwrap();
        }

        let storage = open(dir.path());
        assert_eq!(storage.count_nouns().unwrap(), 1);
        let loaded = storage.get_noun(noun.id).unwrap().unwrap();
        assert_eq!(loaded.id, noun.id);
    }

    #[test]
    fn test_save_preserves_graph_topology() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let mut noun = test_noun(4);
        storage.save_noun(&noun).unwrap();

        // Simulate the index writing topology
        let mut neighbors = std::collections::BTreeMap::new();
        neighbors.insert(0u32, vec![EntityRef::Noun(NounId::new())]);
        let record = HnswNodeRecord {
            id: EntityRef::Noun(noun.id),
            vector: noun.vector.clone(),
            level: 2,
            neighbors: neighbors.clone(),
        };
        storage.save_hnsw_node(&record).unwrap();

        // A metadata-only rewrite must not clobber level/neighbors
        noun.metadata
            .insert("extra".to_string(), MetadataValue::Int(1));
        storage.save_noun(&noun).unwrap();

        let reloaded = storage
            .get_hnsw_node(&EntityRef::Noun(noun.id))
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.level, 2);
        assert_eq!(reloaded.neighbors, neighbors);
    }

    #[test]
    fn test_verb_roundtrip_and_adjacency() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let a = test_noun(4);
        let b = test_noun(4);
        storage.save_noun(&a).unwrap();
        storage.save_noun(&b).unwrap();

        let verb = test_verb(a.id, b.id);
        storage.save_verb(&verb).unwrap();

        let loaded = storage.get_verb(verb.id).unwrap().unwrap();
        assert_eq!(loaded.source, a.id);
        assert_eq!(loaded.target, b.id);
        assert_eq!(loaded.vector, verb.vector);

        let touching_a = storage.get_verbs_touching(a.id).unwrap();
        assert_eq!(touching_a.len(), 1);
        assert_eq!(touching_a[0].id, verb.id);

        storage.delete_verb(verb.id).unwrap();
        assert!(storage.get_verbs_touching(a.id).unwrap().is_empty());
    }

    #[test]
    fn test_adjacency_rebuilt_on_reopen() {
        let dir = tempdir().unwrap();
        let a = test_noun(4);
        let b = test_noun(4);
        let verb = test_verb(a.id, b.id);
        {
            let storage = open(dir.path());
            storage.save_noun(&a).unwrap();
            storage.save_noun(&b).unwrap();
            storage.save_verb(&verb).unwrap();
        }

        let storage = open(dir.path());
        let touching = storage.get_verbs_touching(b.id).unwrap();
        assert_eq!(touching.len(), 1);
        assert_eq!(touching[0].id, verb.id);
    }

    #[test]
    fn test_get_nouns_pagination() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        for _ in 0..7 {
            storage.save_noun(&test_noun(4)).unwrap();
        }

        let opts = GetOptions {
            pagination: super::super::Pagination {
                limit: Some(3),
                ..Default::default()
            },
            ..Default::default()
        };
        let first = storage.get_nouns(&opts).unwrap();
        assert_eq!(first.items.len(), 3);
        assert!(first.has_more);
        let cursor = first.next_cursor.clone().unwrap();

        let opts = GetOptions {
            pagination: super::super::Pagination {
                limit: Some(3),
                cursor: Some(cursor),
                ..Default::default()
            },
            ..Default::default()
        };
        let second = storage.get_nouns(&opts).unwrap();
        assert_eq!(second.items.len(), 3);

        // No overlap between pages
        let first_ids: Vec<NounId> = first.items.iter().map(|n| n.id).collect();
        for noun in &second.items {
            assert!(!first_ids.contains(&noun.id));
        }
    }

    #[test]
    fn test_get_nouns_bad_cursor_degrades_to_start() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());
        for _ in 0..3 {
            storage.save_noun(&test_noun(4)).unwrap();
        }

        let opts = GetOptions {
            pagination: super::super::Pagination {
                limit: Some(10),
                cursor: Some("garbage!!".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let page = storage.get_nouns(&opts).unwrap();
        assert_eq!(page.items.len(), 3);
    }

    #[test]
    fn test_get_nouns_excludes_deleted_by_default() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let live = test_noun(4);
        let mut dead = test_noun(4);
        SystemMetadata {
            deleted: true,
            deleted_at: Some(Timestamp::now()),
            ..Default::default()
        }
        .apply_to(&mut dead.metadata);

        storage.save_noun(&live).unwrap();
        storage.save_noun(&dead).unwrap();

        let page = storage.get_nouns(&GetOptions::default()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, live.id);

        let all = storage
            .get_nouns(&GetOptions {
                include_deleted: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.total_count, Some(2));
    }

    #[test]
    fn test_get_nouns_filter() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let mut a = test_noun(4);
        a.metadata
            .insert("year".to_string(), MetadataValue::Int(2024));
        let b = test_noun(4);
        storage.save_noun(&a).unwrap();
        storage.save_noun(&b).unwrap();

        let page = storage
            .get_nouns(&GetOptions {
                filter: Some(crate::metadata::MetadataPredicate::eq("year", 2024i64)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, a.id);
        assert!(page.total_count.is_none());
    }

    #[test]
    fn test_hnsw_system_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        assert!(storage.get_hnsw_system().unwrap().is_none());

        let record = HnswSystemRecord {
            entry_point_id: Some(EntityRef::Noun(NounId::new())),
            max_level: 3,
        };
        storage.save_hnsw_system(&record).unwrap();

        let loaded = storage.get_hnsw_system().unwrap().unwrap();
        assert_eq!(loaded.entry_point_id, record.entry_point_id);
        assert_eq!(loaded.max_level, 3);
    }

    #[test]
    fn test_statistics_documents() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let stats = crate::stats::Statistics::new();
        stats.noun_added("svc", NounType::Concept);
        storage.save_statistics(&stats.snapshot()).unwrap();

        let loaded = storage.get_statistics().unwrap().unwrap();
        assert_eq!(loaded.total_nouns(), 1);

        // The fixed-size type counts document exists alongside
        assert!(system_doc_path(dir.path(), TYPE_STATISTICS_DOC).exists());
    }

    #[test]
    fn test_system_docs() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        assert!(storage.get_system_doc("registry").unwrap().is_none());
        storage.save_system_doc("registry", r#"{"a":1}"#).unwrap();
        assert_eq!(
            storage.get_system_doc("registry").unwrap().unwrap(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn test_change_feed() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());
        let epoch = Timestamp::from_millis(0);

        let noun = test_noun(4);
        storage.save_noun(&noun).unwrap();
        storage.save_noun(&noun).unwrap(); // update
        storage.delete_noun(noun.id).unwrap();

        let changes = storage.get_changes_since(epoch, 10).unwrap();
        let ops: Vec<ChangeOp> = changes.iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec![ChangeOp::Add, ChangeOp::Update, ChangeOp::Delete]);
        for change in &changes {
            assert_eq!(change.entity_id, EntityRef::Noun(noun.id));
        }

        // Strictly-after filtering
        let last = changes.last().unwrap().timestamp;
        assert!(storage.get_changes_since(last, 10).unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let noun = test_noun(4);
        storage.save_noun(&noun).unwrap();
        storage.put_blob(b"payload").unwrap();
        storage
            .save_hnsw_system(&HnswSystemRecord::default())
            .unwrap();

        storage.clear().unwrap();
        assert_eq!(storage.count_nouns().unwrap(), 0);
        assert!(storage.get_noun(noun.id).unwrap().is_none());
        assert!(storage.get_hnsw_system().unwrap().is_none());

        // Reopenable after clear
        drop(storage);
        let storage = open(dir.path());
        assert_eq!(storage.count_nouns().unwrap(), 0);
    }

    #[test]
    fn test_status() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());
        storage.save_noun(&test_noun(4)).unwrap();

        let status = storage.status().unwrap();
        assert_eq!(status.kind, "filesystem");
        assert_eq!(status.noun_count, 1);
        assert_eq!(status.verb_count, 0);
        assert!(!status.throttle.currently_throttled);
    }
}
