//! In-memory storage adapter.
//!
//! Implements the full [`StorageAdapter`] contract against hash maps.
//! Used for tests and ephemeral workloads; nothing survives drop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{NotFoundError, Result, StorageError, SynapseError};
use crate::metadata::MetadataMap;
use crate::noun::Noun;
use crate::query::cursor::{decode_cursor, encode_cursor};
use crate::stats::StatisticsSnapshot;
use crate::types::{EntityRef, NounId, Timestamp, VerbId};
use crate::vector::{HnswNodeRecord, HnswSystemRecord};
use crate::verb::Verb;

use super::blob::{BlobRef, BlobStore};
use super::throttle::{ThrottleTelemetry, ThrottleTracker};
use super::{Change, ChangeOp, GetOptions, Page, StorageAdapter, StorageStatus};

const DEFAULT_PAGE_LIMIT: usize = 100;
const CHANGE_LOG_CAPACITY: usize = 10_000;

#[derive(Default)]
struct Tables {
    nouns: HashMap<NounId, Noun>,
    verbs: HashMap<VerbId, Verb>,
    adjacency: HashMap<NounId, HashSet<VerbId>>,
    hnsw_nodes: HashMap<EntityRef, HnswNodeRecord>,
    hnsw_system: Option<HnswSystemRecord>,
    statistics: Option<StatisticsSnapshot>,
    system_docs: HashMap<String, String>,
    blobs: HashMap<String, (Vec<u8>, u32)>,
}

/// In-memory storage adapter.
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    changes: Mutex<VecDeque<Change>>,
    throttle: ThrottleTracker,
}

impl MemoryStorage {
    /// Creates an empty in-memory adapter.
    pub fn new(config: &Config) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            changes: Mutex::new(VecDeque::new()),
            throttle: ThrottleTracker::new(config.throttle.clone()),
        }
    }

    fn record_change(
        &self,
        operation: ChangeOp,
        entity_id: EntityRef,
        data: Option<serde_json::Value>,
    ) {
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

    fn page_window(pagination: &super::Pagination) -> (usize, usize) {
        let offset = match &pagination.cursor {
            Some(cursor) => decode_cursor(cursor).unwrap_or(0),
            None => pagination.offset.unwrap_or(0),
        };
        let limit = pagination.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        (offset, limit)
    }
}

impl StorageAdapter for MemoryStorage {
    fn path(&self) -> Option<&Path> {
        None
    }

    fn status(&self) -> Result<StorageStatus> {
        let tables = self.tables.read().expect("tables lock");
        Ok(StorageStatus {
            kind: "memory".to_string(),
            path: None,
            noun_count: tables.nouns.len() as u64,
            verb_count: tables.verbs.len() as u64,
            throttle: self.throttle.telemetry(),
        })
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tables.write().expect("tables lock") = Tables::default();
        self.changes.lock().expect("changes lock").clear();
        Ok(())
    }

    fn save_noun(&self, noun: &Noun) -> Result<()> {
        let mut tables = self.tables.write().expect("tables lock");
        let existed = tables.nouns.contains_key(&noun.id);

        // Mirror the filesystem adapter: the vector payload updates in
        // place, graph topology survives
        let entity = EntityRef::Noun(noun.id);
        match tables.hnsw_nodes.get_mut(&entity) {
            Some(record) => record.vector = noun.vector.clone(),
            None => {
                tables.hnsw_nodes.insert(
                    entity,
                    HnswNodeRecord {
                        id: entity,
                        vector: noun.vector.clone(),
                        level: 0,
                        neighbors: Default::default(),
                    },
                );
            }
        }
        tables.nouns.insert(noun.id, noun.clone());
        drop(tables);

        let op = if existed { ChangeOp::Update } else { ChangeOp::Add };
        self.record_change(op, entity, serde_json::to_value(noun).ok());
        self.throttle.record_success();
        Ok(())
    }

    fn get_noun(&self, id: NounId) -> Result<Option<Noun>> {
        Ok(self.tables.read().expect("tables lock").nouns.get(&id).cloned())
    }

    fn get_nouns(&self, opts: &GetOptions) -> Result<Page<Noun>> {
        let tables = self.tables.read().expect("tables lock");
        let mut candidates: Vec<&Noun> = tables
            .nouns
            .values()
            .filter(|n| opts.noun_type.map_or(true, |t| n.noun_type == t))
            .collect();
        candidates.sort_by_key(|n| n.id);

        let (offset, limit) = Self::page_window(&opts.pagination);
        let unfiltered = opts.filter.is_none() && opts.include_deleted;
        let total_count = unfiltered.then_some(candidates.len() as u64);

        let mut items = Vec::new();
        let mut matched = 0usize;
        let mut has_more = false;
        for noun in candidates {
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
                    items.push(noun.clone());
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

    fn delete_noun(&self, id: NounId) -> Result<bool> {
        let mut tables = self.tables.write().expect("tables lock");
        let removed = tables.nouns.remove(&id).is_some();
        tables.hnsw_nodes.remove(&EntityRef::Noun(id));
        tables.adjacency.remove(&id);
        drop(tables);
        if removed {
            self.record_change(ChangeOp::Delete, EntityRef::Noun(id), None);
        }
        Ok(removed)
    }

    fn save_noun_metadata(&self, id: NounId, metadata: &MetadataMap) -> Result<bool> {
        let mut tables = self.tables.write().expect("tables lock");
        let Some(noun) = tables.nouns.get_mut(&id) else {
            return Ok(false);
        };
        noun.metadata = metadata.clone();
        noun.updated_at = Timestamp::now();
        drop(tables);
        self.record_change(
            ChangeOp::Update,
            EntityRef::Noun(id),
            serde_json::to_value(metadata).ok(),
        );
        Ok(true)
    }

    fn get_noun_metadata(&self, id: NounId) -> Result<Option<MetadataMap>> {
        Ok(self
            .tables
            .read()
            .expect("tables lock")
            .nouns
            .get(&id)
            .map(|n| n.metadata.clone()))
    }

    fn count_nouns(&self) -> Result<u64> {
        Ok(self.tables.read().expect("tables lock").nouns.len() as u64)
    }

    fn save_verb(&self, verb: &Verb) -> Result<()> {
        let mut tables = self.tables.write().expect("tables lock");
        let existed = tables.verbs.contains_key(&verb.id);

        if let Some(vector) = &verb.vector {
            let entity = EntityRef::Verb(verb.id);
            match tables.hnsw_nodes.get_mut(&entity) {
                Some(record) => record.vector = vector.clone(),
                None => {
                    tables.hnsw_nodes.insert(
                        entity,
                        HnswNodeRecord {
                            id: entity,
                            vector: vector.clone(),
                            level: 0,
                            neighbors: Default::default(),
                        },
                    );
                }
            }
        }

        tables
            .adjacency
            .entry(verb.source)
            .or_default()
            .insert(verb.id);
        tables
            .adjacency
            .entry(verb.target)
            .or_default()
            .insert(verb.id);
        tables.verbs.insert(verb.id, verb.clone());
        drop(tables);

        let op = if existed { ChangeOp::Update } else { ChangeOp::Add };
        self.record_change(op, EntityRef::Verb(verb.id), serde_json::to_value(verb).ok());
        Ok(())
    }

    fn get_verb(&self, id: VerbId) -> Result<Option<Verb>> {
        Ok(self.tables.read().expect("tables lock").verbs.get(&id).cloned())
    }

    fn get_verbs(&self, opts: &GetOptions) -> Result<Page<Verb>> {
        let tables = self.tables.read().expect("tables lock");
        let mut candidates: Vec<&Verb> = tables
            .verbs
            .values()
            .filter(|v| opts.verb_type.map_or(true, |t| v.verb_type == t))
            .collect();
        candidates.sort_by_key(|v| v.id);

        let (offset, limit) = Self::page_window(&opts.pagination);
        let unfiltered = opts.filter.is_none() && opts.include_deleted;
        let total_count = unfiltered.then_some(candidates.len() as u64);

        let mut items = Vec::new();
        let mut matched = 0usize;
        let mut has_more = false;
        for verb in candidates {
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
                    items.push(verb.clone());
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
        let tables = self.tables.read().expect("tables lock");
        let mut verbs: Vec<Verb> = tables
            .adjacency
            .get(&id)
            .map(|set| {
                set.iter()
                    .filter_map(|vid| tables.verbs.get(vid).cloned())
                    .collect()
            })
            .unwrap_or_default();
        verbs.sort_by_key(|v| v.id);
        Ok(verbs)
    }

    fn delete_verb(&self, id: VerbId) -> Result<bool> {
        let mut tables = self.tables.write().expect("tables lock");
        let Some(verb) = tables.verbs.remove(&id) else {
            return Ok(false);
        };
        tables.hnsw_nodes.remove(&EntityRef::Verb(id));
        for endpoint in [verb.source, verb.target] {
            if let Some(set) = tables.adjacency.get_mut(&endpoint) {
                set.remove(&id);
                if set.is_empty() {
                    tables.adjacency.remove(&endpoint);
                }
            }
        }
        drop(tables);
        self.record_change(ChangeOp::Delete, EntityRef::Verb(id), None);
        Ok(true)
    }

    fn save_verb_metadata(&self, id: VerbId, metadata: &MetadataMap) -> Result<bool> {
        let mut tables = self.tables.write().expect("tables lock");
        let Some(verb) = tables.verbs.get_mut(&id) else {
            return Ok(false);
        };
        verb.metadata = metadata.clone();
        verb.updated_at = Timestamp::now();
        drop(tables);
        self.record_change(
            ChangeOp::Update,
            EntityRef::Verb(id),
            serde_json::to_value(metadata).ok(),
        );
        Ok(true)
    }

    fn get_verb_metadata(&self, id: VerbId) -> Result<Option<MetadataMap>> {
        Ok(self
            .tables
            .read()
            .expect("tables lock")
            .verbs
            .get(&id)
            .map(|v| v.metadata.clone()))
    }

    fn count_verbs(&self) -> Result<u64> {
        Ok(self.tables.read().expect("tables lock").verbs.len() as u64)
    }

    fn save_hnsw_node(&self, record: &HnswNodeRecord) -> Result<()> {
        let mut tables = self.tables.write().expect("tables lock");
        let known = match record.id {
            EntityRef::Noun(id) => tables.nouns.contains_key(&id),
            EntityRef::Verb(id) => tables.verbs.contains_key(&id),
        };
        if !known {
            return Err(SynapseError::corruption(format!(
                "graph record for unknown entity {}",
                record.id
            )));
        }
        tables.hnsw_nodes.insert(record.id, record.clone());
        Ok(())
    }

    fn get_hnsw_node(&self, id: &EntityRef) -> Result<Option<HnswNodeRecord>> {
        Ok(self
            .tables
            .read()
            .expect("tables lock")
            .hnsw_nodes
            .get(id)
            .cloned())
    }

    fn delete_hnsw_node(&self, id: &EntityRef) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .expect("tables lock")
            .hnsw_nodes
            .remove(id)
            .is_some())
    }

    fn all_hnsw_nodes(&self) -> Result<Vec<HnswNodeRecord>> {
        Ok(self
            .tables
            .read()
            .expect("tables lock")
            .hnsw_nodes
            .values()
            .cloned()
            .collect())
    }

    fn save_hnsw_system(&self, record: &HnswSystemRecord) -> Result<()> {
        self.tables.write().expect("tables lock").hnsw_system = Some(record.clone());
        Ok(())
    }

    fn get_hnsw_system(&self) -> Result<Option<HnswSystemRecord>> {
        Ok(self.tables.read().expect("tables lock").hnsw_system.clone())
    }

    fn save_statistics(&self, snapshot: &StatisticsSnapshot) -> Result<()> {
        self.tables.write().expect("tables lock").statistics = Some(snapshot.clone());
        Ok(())
    }

    fn get_statistics(&self) -> Result<Option<StatisticsSnapshot>> {
        Ok(self.tables.read().expect("tables lock").statistics.clone())
    }

    fn save_system_doc(&self, name: &str, json: &str) -> Result<()> {
        self.tables
            .write()
            .expect("tables lock")
            .system_docs
            .insert(name.to_string(), json.to_string());
        Ok(())
    }

    fn get_system_doc(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .tables
            .read()
            .expect("tables lock")
            .system_docs
            .get(name)
            .cloned())
    }

    fn put_blob(&self, bytes: &[u8]) -> Result<BlobRef> {
        let hash = BlobStore::hash_of(bytes);
        let mut tables = self.tables.write().expect("tables lock");
        let entry = tables
            .blobs
            .entry(hash.clone())
            .or_insert_with(|| (bytes.to_vec(), 0));
        entry.1 += 1;
        Ok(BlobRef {
            kind: "blob".to_string(),
            hash,
            size: bytes.len() as u64,
            compressed: false,
        })
    }

    fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        if !super::layout::is_valid_hash(hash) {
            return Err(SynapseError::from(StorageError::corrupted(format!(
                "invalid blob hash: {}",
                hash
            ))));
        }
        let mut tables = self.tables.write().expect("tables lock");
        match tables.blobs.get_mut(hash) {
            Some((bytes, refcount)) => {
                *refcount += 1;
                Ok(Some(bytes.clone()))
            }
            None => Ok(None),
        }
    }

    fn release_blob(&self, hash: &str) -> Result<bool> {
        let mut tables = self.tables.write().expect("tables lock");
        let Some((_, refcount)) = tables.blobs.get_mut(hash) else {
            return Err(NotFoundError::blob(hash).into());
        };
        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            tables.blobs.remove(hash);
            return Ok(true);
        }
        Ok(false)
    }

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

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().expect("tables lock");
        f.debug_struct("MemoryStorage")
            .field("nouns", &tables.nouns.len())
            .field("verbs", &tables.verbs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataValue, SystemMetadata};
    use crate::noun::NounType;
    use crate::verb::VerbType;

    fn storage() -> MemoryStorage {
        MemoryStorage::new(&Config::for_testing())
    }

    fn test_noun() -> Noun {
        let mut metadata = MetadataMap::new();
        metadata.insert("label".to_string(), MetadataValue::from("alpha"));
        SystemMetadata::default().apply_to(&mut metadata);
        Noun {
            id: NounId::new(),
            noun_type: NounType::Concept,
            vector: vec![0.5; 4],
            metadata,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        }
    }

    #[test]
    fn test_noun_roundtrip() {
        let storage = storage();
        let noun = test_noun();
        storage.save_noun(&noun).unwrap();

        let loaded = storage.get_noun(noun.id).unwrap().unwrap();
        assert_eq!(loaded.id, noun.id);
        assert_eq!(loaded.vector, noun.vector);
        assert_eq!(storage.count_nouns().unwrap(), 1);
    }

    #[test]
    fn test_verb_adjacency() {
        let storage = storage();
        let a = test_noun();
        let b = test_noun();
        storage.save_noun(&a).unwrap();
        storage.save_noun(&b).unwrap();

        let verb = Verb {
            id: VerbId::new(),
            source: a.id,
            target: b.id,
            verb_type: VerbType::Uses,
            weight: 0.5,
            confidence: 0.5,
            vector: None,
            metadata: MetadataMap::new(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        };
        storage.save_verb(&verb).unwrap();

        assert_eq!(storage.get_verbs_touching(a.id).unwrap().len(), 1);
        assert_eq!(storage.get_verbs_touching(b.id).unwrap().len(), 1);

        storage.delete_verb(verb.id).unwrap();
        assert!(storage.get_verbs_touching(a.id).unwrap().is_empty());
    }

    #[test]
    fn test_graph_topology_survives_noun_rewrite() {
        let storage = storage();
        let mut noun = test_noun();
        storage.save_noun(&noun).unwrap();

        let mut neighbors = std::collections::BTreeMap::new();
        neighbors.insert(0u32, vec![EntityRef::Noun(NounId::new())]);
        storage
            .save_hnsw_node(&HnswNodeRecord {
                id: EntityRef::Noun(noun.id),
                vector: noun.vector.clone(),
                level: 1,
                neighbors: neighbors.clone(),
            })
            .unwrap();

        noun.vector = vec![0.9; 4];
        storage.save_noun(&noun).unwrap();

        let record = storage
            .get_hnsw_node(&EntityRef::Noun(noun.id))
            .unwrap()
            .unwrap();
        assert_eq!(record.vector, vec![0.9; 4]);
        assert_eq!(record.level, 1);
        assert_eq!(record.neighbors, neighbors);
    }

    #[test]
    fn test_hnsw_node_for_unknown_entity_rejected() {
        let storage = storage();
        let err = storage
            .save_hnsw_node(&HnswNodeRecord {
                id: EntityRef::Noun(NounId::new()),
                vector: vec![0.1; 4],
                level: 0,
                neighbors: Default::default(),
            })
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_pagination_no_overlap_no_gap() {
        let storage = storage();
        for _ in 0..10 {
            storage.save_noun(&test_noun()).unwrap();
        }

        let all = storage
            .get_nouns(&GetOptions {
                pagination: super::super::Pagination {
                    limit: Some(20),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.items.len(), 10);

        let first = storage
            .get_nouns(&GetOptions {
                pagination: super::super::Pagination {
                    limit: Some(4),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        let second = storage
            .get_nouns(&GetOptions {
                pagination: super::super::Pagination {
                    limit: Some(20),
                    cursor: first.next_cursor.clone(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();

        let mut combined: Vec<NounId> = first.items.iter().map(|n| n.id).collect();
        combined.extend(second.items.iter().map(|n| n.id));
        let expected: Vec<NounId> = all.items.iter().map(|n| n.id).collect();
        assert_eq!(combined, expected);
    }

    #[test]
    fn test_blob_refcounts() {
        let storage = storage();
        let blob = storage.put_blob(b"payload").unwrap();
        storage.get_blob(&blob.hash).unwrap();

        // put (1) + get (1) = 2 refs
        assert!(!storage.release_blob(&blob.hash).unwrap());
        assert!(storage.release_blob(&blob.hash).unwrap());
        assert!(storage.get_blob(&blob.hash).unwrap().is_none());
    }

    #[test]
    fn test_change_feed_order() {
        let storage = storage();
        let noun = test_noun();
        storage.save_noun(&noun).unwrap();
        storage.delete_noun(noun.id).unwrap();

        let changes = storage
            .get_changes_since(Timestamp::from_millis(0), 10)
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].operation, ChangeOp::Add);
        assert_eq!(changes[1].operation, ChangeOp::Delete);
    }

    #[test]
    fn test_clear() {
        let storage = storage();
        storage.save_noun(&test_noun()).unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.count_nouns().unwrap(), 0);
        assert!(storage.all_hnsw_nodes().unwrap().is_empty());
    }
}
