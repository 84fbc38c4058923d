//! Inverted metadata index.
//!
//! Maps (entity-type partition, field, value) to entity-id postings.
//! Equality and membership predicates resolve in O(1) per posting via
//! hash lookup; range predicates scan a sorted tree per field. Postings
//! are partitioned by entity type to align with the storage layout and
//! shrink the per-query working set.
//!
//! # Locking
//!
//! Each field has its own `RwLock`, so writes to different fields
//! proceed in parallel; the outer field map takes a short lock only to
//! resolve or create the field entry.
//!
//! # Persistence
//!
//! The index is a derived structure. In-memory deltas are flushed as a
//! snapshot document on a cadence (default 30 s) and on close; a full
//! rebuild from entity metadata is available but not automatic on open
//! unless opted in.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::noun::NounType;
use crate::types::EntityRef;
use crate::verb::VerbType;

use super::predicate::MetadataPredicate;
use super::value::{flatten, MetadataMap, MetadataValue};

/// Entity-type partition a posting belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    /// Noun partition, keyed by noun type.
    Noun(NounType),
    /// Verb partition, keyed by verb type.
    Verb(VerbType),
}

/// Canonical scalar key for postings.
///
/// Int and Float metadata values canonicalize to the same numeric key,
/// so `{"year": 2024}` and a query for `2024.0` meet in one posting.
/// NaN values are not indexed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IndexKey {
    /// Explicit null.
    Null,
    /// Boolean key.
    Bool(bool),
    /// Numeric key (canonicalized to f64).
    Num(f64),
    /// String key.
    Str(String),
}

impl IndexKey {
    /// Converts a scalar metadata value to its canonical key.
    ///
    /// Returns `None` for non-scalar values and NaN.
    pub fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::Null => Some(Self::Null),
            MetadataValue::Bool(b) => Some(Self::Bool(*b)),
            MetadataValue::Int(i) => Some(Self::Num(*i as f64)),
            MetadataValue::Float(f) if f.is_nan() => None,
            MetadataValue::Float(f) => Some(Self::Num(normalize_zero(*f))),
            MetadataValue::Str(s) => Some(Self::Str(s.clone())),
            MetadataValue::List(_) | MetadataValue::Map(_) => None,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Num(_) => 2,
            Self::Str(_) => 3,
        }
    }
}

fn normalize_zero(f: f64) -> f64 {
    if f == 0.0 {
        0.0
    } else {
        f
    }
}

impl Eq for IndexKey {}

impl std::hash::Hash for IndexKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Num(f) => f.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    /// Total order: Null < Bool < Num < Str, each kind ordered
    /// internally. Keeps each value kind contiguous in the range tree,
    /// so typed bounds scan only their own section.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering as O;
        match (self, other) {
            (Self::Null, Self::Null) => O::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Num(a), Self::Num(b)) => a.partial_cmp(b).unwrap_or(O::Equal),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

/// Per-field postings: exact lookups plus a sorted tree for ranges.
#[derive(Debug, Default)]
struct FieldIndex {
    exact: HashMap<(Partition, IndexKey), HashSet<EntityRef>>,
    sorted: HashMap<Partition, BTreeMap<IndexKey, HashSet<EntityRef>>>,
}

impl FieldIndex {
    fn add(&mut self, partition: Partition, key: IndexKey, id: EntityRef) {
        self.exact
            .entry((partition, key.clone()))
            .or_default()
            .insert(id);
        self.sorted
            .entry(partition)
            .or_default()
            .entry(key)
            .or_default()
            .insert(id);
    }

    fn remove(&mut self, partition: Partition, key: &IndexKey, id: EntityRef) {
        if let Some(set) = self.exact.get_mut(&(partition, key.clone())) {
            set.remove(&id);
            if set.is_empty() {
                self.exact.remove(&(partition, key.clone()));
            }
        }
        if let Some(tree) = self.sorted.get_mut(&partition) {
            if let Some(set) = tree.get_mut(key) {
                set.remove(&id);
                if set.is_empty() {
                    tree.remove(key);
                }
            }
            if tree.is_empty() {
                self.sorted.remove(&partition);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Serializable snapshot of the whole index.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataIndexSnapshot {
    /// Flat posting list: (field, partition, key, members).
    pub postings: Vec<(String, Partition, IndexKey, Vec<EntityRef>)>,
    /// Per-partition membership, the universe for negation queries.
    pub members: Vec<(Partition, Vec<EntityRef>)>,
}

/// The inverted metadata index.
pub struct MetadataIndex {
    fields: RwLock<HashMap<String, Arc<RwLock<FieldIndex>>>>,
    /// All indexed ids per partition; the universe for `Not`.
    members: RwLock<HashMap<Partition, HashSet<EntityRef>>>,
    /// Set when postings changed since the last snapshot flush.
    dirty: AtomicBool,
}

impl Default for MetadataIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            fields: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    fn field(&self, name: &str) -> Arc<RwLock<FieldIndex>> {
        if let Some(f) = self.fields.read().expect("field map lock").get(name) {
            return Arc::clone(f);
        }
        let mut fields = self.fields.write().expect("field map lock");
        Arc::clone(fields.entry(name.to_string()).or_default())
    }

    /// Indexes an entity's metadata under its type partition.
    pub fn index_entity(&self, partition: Partition, id: EntityRef, meta: &MetadataMap) {
        for (path, value) in flatten(meta) {
            let Some(key) = IndexKey::from_value(&value) else {
                continue;
            };
            let field = self.field(&path);
            field.write().expect("field lock").add(partition, key, id);
        }
        self.members
            .write()
            .expect("members lock")
            .entry(partition)
            .or_default()
            .insert(id);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Removes an entity's postings, given the metadata it was indexed
    /// with.
    pub fn unindex_entity(&self, partition: Partition, id: EntityRef, meta: &MetadataMap) {
        for (path, value) in flatten(meta) {
            let Some(key) = IndexKey::from_value(&value) else {
                continue;
            };
            let field = self.field(&path);
            let mut guard = field.write().expect("field lock");
            guard.remove(partition, &key, id);
        }
        if let Some(set) = self.members.write().expect("members lock").get_mut(&partition) {
            set.remove(&id);
        }
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Removes an entity from every posting, without knowing the
    /// metadata it was indexed with.
    ///
    /// Slower than [`unindex_entity`](Self::unindex_entity) (scans all
    /// fields); used when reconciling changes written by another
    /// process, where the old metadata isn't available.
    pub fn purge_entity(&self, partition: Partition, id: EntityRef) {
        let fields: Vec<Arc<RwLock<FieldIndex>>> = self
            .fields
            .read()
            .expect("field map lock")
            .values()
            .map(Arc::clone)
            .collect();
        for field in fields {
            let mut guard = field.write().expect("field lock");
            let keys: Vec<IndexKey> = guard
                .exact
                .iter()
                .filter(|((p, _), ids)| *p == partition && ids.contains(&id))
                .map(|((_, key), _)| key.clone())
                .collect();
            for key in keys {
                guard.remove(partition, &key, id);
            }
        }
        if let Some(set) = self.members.write().expect("members lock").get_mut(&partition) {
            set.remove(&id);
        }
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Replaces an entity's postings after a metadata change.
    pub fn reindex_entity(
        &self,
        partition: Partition,
        id: EntityRef,
        old: &MetadataMap,
        new: &MetadataMap,
    ) {
        self.unindex_entity(partition, id, old);
        self.index_entity(partition, id, new);
    }

    /// Evaluates a predicate, returning matching ids.
    ///
    /// With `partition` set, only that type's postings are consulted;
    /// otherwise postings union across all partitions.
    pub fn query(
        &self,
        predicate: &MetadataPredicate,
        partition: Option<Partition>,
    ) -> HashSet<EntityRef> {
        match predicate {
            MetadataPredicate::Equals { field, value } => {
                let Some(key) = IndexKey::from_value(value) else {
                    return HashSet::new();
                };
                self.lookup_exact(field, &key, partition)
            }
            MetadataPredicate::In { field, values } => {
                let mut out = HashSet::new();
                for value in values {
                    if let Some(key) = IndexKey::from_value(value) {
                        out.extend(self.lookup_exact(field, &key, partition));
                    }
                }
                out
            }
            MetadataPredicate::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => self.lookup_range(
                field,
                lower_bound(gt.as_ref(), gte.as_ref()),
                upper_bound(lt.as_ref(), lte.as_ref()),
                partition,
            ),
            MetadataPredicate::Not(inner) => {
                let matched = self.query(inner, partition);
                let mut universe = self.universe(partition);
                universe.retain(|id| !matched.contains(id));
                universe
            }
            MetadataPredicate::Or(branches) => {
                let mut out = HashSet::new();
                for branch in branches {
                    out.extend(self.query(branch, partition));
                }
                out
            }
            MetadataPredicate::And(branches) => {
                let mut iter = branches.iter();
                let Some(first) = iter.next() else {
                    return self.universe(partition);
                };
                let mut out = self.query(first, partition);
                for branch in iter {
                    if out.is_empty() {
                        break;
                    }
                    let next = self.query(branch, partition);
                    out.retain(|id| next.contains(id));
                }
                out
            }
        }
    }

    /// Estimated result cardinality for planner selectivity decisions.
    pub fn estimate_cardinality(
        &self,
        predicate: &MetadataPredicate,
        partition: Option<Partition>,
    ) -> usize {
        self.query(predicate, partition).len()
    }

    /// All ids indexed under the partition (or all partitions).
    pub fn universe(&self, partition: Option<Partition>) -> HashSet<EntityRef> {
        let members = self.members.read().expect("members lock");
        match partition {
            Some(p) => members.get(&p).cloned().unwrap_or_default(),
            None => members.values().flatten().copied().collect(),
        }
    }

    /// Field paths currently carrying postings.
    pub fn field_names(&self) -> Vec<String> {
        let fields = self.fields.read().expect("field map lock");
        let mut names: Vec<String> = fields
            .iter()
            .filter(|(_, f)| !f.read().expect("field lock").is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Returns and clears the dirty flag; the flusher persists a
    /// snapshot when this reports true.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }

    /// Serializes all postings for the periodic flush.
    pub fn snapshot(&self) -> MetadataIndexSnapshot {
        let fields = self.fields.read().expect("field map lock");
        let mut postings = Vec::new();
        for (name, field) in fields.iter() {
            let guard = field.read().expect("field lock");
            for ((partition, key), ids) in &guard.exact {
                let mut members: Vec<EntityRef> = ids.iter().copied().collect();
                members.sort_unstable();
                postings.push((name.clone(), *partition, key.clone(), members));
            }
        }
        postings.sort_by(|a, b| a.0.cmp(&b.0));

        let members_guard = self.members.read().expect("members lock");
        let mut members: Vec<(Partition, Vec<EntityRef>)> = members_guard
            .iter()
            .map(|(p, ids)| {
                let mut list: Vec<EntityRef> = ids.iter().copied().collect();
                list.sort_unstable();
                (*p, list)
            })
            .collect();
        members.sort_by_key(|(p, _)| format!("{:?}", p));

        MetadataIndexSnapshot { postings, members }
    }

    /// Restores the index from a persisted snapshot, replacing current
    /// contents.
    pub fn load_snapshot(&self, snapshot: MetadataIndexSnapshot) {
        self.clear();
        for (field_name, partition, key, ids) in snapshot.postings {
            let field = self.field(&field_name);
            let mut guard = field.write().expect("field lock");
            for id in ids {
                guard.add(partition, key.clone(), id);
            }
        }
        let mut members = self.members.write().expect("members lock");
        for (partition, ids) in snapshot.members {
            members.entry(partition).or_default().extend(ids);
        }
        self.dirty.store(false, Ordering::Relaxed);
    }

    /// Drops all postings.
    pub fn clear(&self) {
        self.fields.write().expect("field map lock").clear();
        self.members.write().expect("members lock").clear();
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn lookup_exact(
        &self,
        field_name: &str,
        key: &IndexKey,
        partition: Option<Partition>,
    ) -> HashSet<EntityRef> {
        let field = self.field(field_name);
        let guard = field.read().expect("field lock");
        match partition {
            Some(p) => guard
                .exact
                .get(&(p, key.clone()))
                .cloned()
                .unwrap_or_default(),
            None => {
                let mut out = HashSet::new();
                for ((_, k), ids) in &guard.exact {
                    if k == key {
                        out.extend(ids.iter().copied());
                    }
                }
                out
            }
        }
    }

    fn lookup_range(
        &self,
        field_name: &str,
        lower: Bound<IndexKey>,
        upper: Bound<IndexKey>,
        partition: Option<Partition>,
    ) -> HashSet<EntityRef> {
        // A range with no bounds matches nothing rather than everything
        if matches!((&lower, &upper), (Bound::Unbounded, Bound::Unbounded)) {
            return HashSet::new();
        }
        // Inverted or empty ranges match nothing (BTreeMap::range panics
        // on them)
        if let (
            Bound::Included(lo) | Bound::Excluded(lo),
            Bound::Included(hi) | Bound::Excluded(hi),
        ) = (&lower, &upper)
        {
            if lo > hi {
                return HashSet::new();
            }
            if lo == hi
                && matches!(
                    (&lower, &upper),
                    (Bound::Excluded(_), _) | (_, Bound::Excluded(_))
                )
            {
                return HashSet::new();
            }
        }

        let field = self.field(field_name);
        let guard = field.read().expect("field lock");
        let mut out = HashSet::new();
        let mut scan = |tree: &BTreeMap<IndexKey, HashSet<EntityRef>>| {
            for (key, ids) in tree.range((lower.clone(), upper.clone())) {
                // Bounds are typed; skip keys of a different kind that
                // fall inside the cross-kind ordering
                if !same_kind_as_bounds(key, &lower, &upper) {
                    continue;
                }
                out.extend(ids.iter().copied());
            }
        };
        match partition {
            Some(p) => {
                if let Some(tree) = guard.sorted.get(&p) {
                    scan(tree);
                }
            }
            None => {
                for tree in guard.sorted.values() {
                    scan(tree);
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for MetadataIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self.fields.read().map(|f| f.len()).unwrap_or(0);
        f.debug_struct("MetadataIndex")
            .field("fields", &fields)
            .finish_non_exhaustive()
    }
}

fn lower_bound(gt: Option<&MetadataValue>, gte: Option<&MetadataValue>) -> Bound<IndexKey> {
    // When both are present the inclusive bound wins only if tighter;
    // in practice queries set one of the two
    if let Some(v) = gt.and_then(IndexKey::from_value_ref) {
        return Bound::Excluded(v);
    }
    if let Some(v) = gte.and_then(IndexKey::from_value_ref) {
        return Bound::Included(v);
    }
    Bound::Unbounded
}

fn upper_bound(lt: Option<&MetadataValue>, lte: Option<&MetadataValue>) -> Bound<IndexKey> {
    if let Some(v) = lt.and_then(IndexKey::from_value_ref) {
        return Bound::Excluded(v);
    }
    if let Some(v) = lte.and_then(IndexKey::from_value_ref) {
        return Bound::Included(v);
    }
    Bound::Unbounded
}

impl IndexKey {
    fn from_value_ref(value: &MetadataValue) -> Option<IndexKey> {
        IndexKey::from_value(value)
    }
}

fn same_kind_as_bounds(key: &IndexKey, lower: &Bound<IndexKey>, upper: &Bound<IndexKey>) -> bool {
    let bound_rank = match (lower, upper) {
        (Bound::Included(k) | Bound::Excluded(k), _) => k.kind_rank(),
        (_, Bound::Included(k) | Bound::Excluded(k)) => k.kind_rank(),
        (Bound::Unbounded, Bound::Unbounded) => return true,
    };
    key.kind_rank() == bound_rank
}
