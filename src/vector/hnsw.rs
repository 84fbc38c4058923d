//! Hand-maintained HNSW (Hierarchical Navigable Small World) index.
//!
//! The graph is a multi-layer proximity structure: layer 0 contains every
//! vector, higher layers contain progressively fewer, and each node keeps
//! up to M bidirectional links per layer (2M at layer 0). Search greedily
//! descends from the entry point through the sparse upper layers, then
//! runs a beam search at layer 0.
//!
//! Unlike append-only HNSW libraries, this graph is fully mutable: nodes
//! can be removed with local repair (back-edge removal plus re-linking
//! from a radius-2 neighborhood), which the periodic tombstone cleanup
//! relies on.
//!
//! # Thread Safety
//!
//! All mutating methods take `&self` and use interior mutability. The
//! graph lives behind a single `RwLock`: searches share a read guard,
//! mutations take the write guard. When a [`NodeStore`] is attached
//! (optimized variant), searches also take the write guard because
//! traversal may page nodes in.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::HnswConfig;
use crate::error::{Result, SynapseError, ValidationError};
use crate::types::{EntityRef, Vector};

use super::distance::DistanceKind;
use super::pq::{PqConfig, ProductQuantizer};

/// Loader for paging graph nodes from storage (optimized variant).
///
/// When attached, resident nodes beyond the configured budget are
/// evicted LRU and re-fetched through this trait on demand.
pub trait NodeStore: Send + Sync {
    /// Loads the persisted record for a node, or `None` if absent.
    fn load_node(&self, id: &EntityRef) -> Result<Option<HnswNodeRecord>>;
}

/// Persisted form of one graph node.
///
/// This is the record stored per entity under the `vectors/` subtree:
/// identity, exact vector, level, and per-layer neighbor lists keyed by
/// layer number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HnswNodeRecord {
    /// Node identity.
    pub id: EntityRef,
    /// Exact vector.
    pub vector: Vector,
    /// Highest layer this node participates in.
    pub level: usize,
    /// Neighbor lists keyed by layer (0..=level).
    pub neighbors: std::collections::BTreeMap<u32, Vec<EntityRef>>,
}

/// Persisted graph-global state (`_system/hnsw-system.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswSystemRecord {
    /// Current entry point, if the graph is non-empty.
    pub entry_point_id: Option<EntityRef>,
    /// Highest layer in the graph.
    pub max_level: usize,
}

/// A search hit: node identity and its distance to the query.
pub type SearchHit = (EntityRef, f32);

/// In-memory vector storage: full precision or product-quantized codes.
#[derive(Clone, Debug)]
enum StoredVector {
    Full(Vector),
    Quantized(Vec<u8>),
}

#[derive(Clone, Debug)]
struct Node {
    vector: StoredVector,
    level: usize,
    /// One list per layer, index 0..=level.
    neighbors: Vec<Vec<EntityRef>>,
}

impl Node {
    fn new(vector: StoredVector, level: usize) -> Self {
        Self {
            vector,
            level,
            neighbors: vec![Vec::new(); level + 1],
        }
    }
}

struct GraphState {
    nodes: HashMap<EntityRef, Node>,
    entry_point: Option<EntityRef>,
    max_level: usize,
    distance: DistanceKind,
    quantizer: Option<ProductQuantizer>,
    /// Total nodes in the graph, counting evicted (paged-out) nodes.
    total_count: usize,
    store: Option<Arc<dyn NodeStore>>,
    /// Resident-node budget when a store is attached (0 = unbounded).
    budget: usize,
    /// Access recency for eviction; tracked only when a store is attached.
    order: LruCache<EntityRef, ()>,
    /// Nodes mutated since the last `take_dirty()`; pinned from eviction.
    dirty: HashSet<EntityRef>,
}

impl GraphState {
    fn decoded(&self, stored: &StoredVector) -> Vector {
        match stored {
            StoredVector::Full(v) => v.clone(),
            StoredVector::Quantized(codes) => match &self.quantizer {
                Some(pq) => pq.decode(codes),
                // Unreachable by construction: codes only exist with a quantizer
                None => Vec::new(),
            },
        }
    }

    fn node_vector(&self, id: EntityRef) -> Option<Vector> {
        self.nodes.get(&id).map(|n| self.decoded(&n.vector))
    }

    fn distance_to(&self, query: &[f32], id: EntityRef) -> Option<f32> {
        let node = self.nodes.get(&id)?;
        match &node.vector {
            StoredVector::Full(v) => Some(self.distance.distance(query, v)),
            StoredVector::Quantized(_) => {
                let decoded = self.decoded(&node.vector);
                Some(self.distance.distance(query, &decoded))
            }
        }
    }

    fn distance_between(&self, a: EntityRef, b: EntityRef) -> Option<f32> {
        let va = self.node_vector(a)?;
        self.distance_to(&va, b)
    }

    fn mark_dirty(&mut self, id: EntityRef) {
        self.dirty.insert(id);
    }

    /// Pages a node in from the attached store if it isn't resident.
    fn ensure_resident(&mut self, id: EntityRef) -> Result<bool> {
        if self.nodes.contains_key(&id) {
            if self.store.is_some() {
                self.order.push(id, ());
            }
            return Ok(true);
        }
        let Some(store) = self.store.clone() else {
            return Ok(false);
        };
        match store.load_node(&id)? {
            Some(record) => {
                let node = self.node_from_record(record)?;
                self.nodes.insert(id, node);
                self.order.push(id, ());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn node_from_record(&self, record: HnswNodeRecord) -> Result<Node> {
        let mut neighbors = vec![Vec::new(); record.level + 1];
        for (layer, list) in record.neighbors {
            let layer = layer as usize;
            if layer > record.level {
                warn!(
                    layer,
                    level = record.level,
                    "Dropping out-of-range neighbor layer"
                );
                continue;
            }
            neighbors[layer] = list;
        }
        let vector = match &self.quantizer {
            Some(pq) => StoredVector::Quantized(pq.encode(&record.vector)?),
            None => StoredVector::Full(record.vector),
        };
        Ok(Node {
            vector,
            level: record.level,
            neighbors,
        })
    }

    /// Evicts least-recently-used clean nodes above the budget.
    fn evict_excess(&mut self) {
        if self.store.is_none() || self.budget == 0 {
            return;
        }
        let mut kept_back = Vec::new();
        while self.nodes.len() > self.budget {
            let Some((candidate, ())) = self.order.pop_lru() else {
                break;
            };
            let pinned = self.dirty.contains(&candidate) || self.entry_point == Some(candidate);
            if pinned {
                kept_back.push(candidate);
                continue;
            }
            self.nodes.remove(&candidate);
        }
        for id in kept_back {
            self.order.push(id, ());
        }
    }
}

/// Access wrapper so traversal code runs identically over a shared read
/// guard (fully resident graph) and an exclusive guard (paging variant).
enum Access<'a> {
    Read(&'a GraphState),
    Paged(&'a mut GraphState),
}

impl Access<'_> {
    fn state(&self) -> &GraphState {
        match self {
            Access::Read(s) => s,
            Access::Paged(s) => s,
        }
    }

    fn try_distance(&mut self, query: &[f32], id: EntityRef) -> Option<f32> {
        if let Access::Paged(state) = self {
            if !state.ensure_resident(id).unwrap_or(false) {
                return None;
            }
        }
        self.state().distance_to(query, id)
    }

    fn try_neighbors(&mut self, id: EntityRef, layer: usize) -> Option<Vec<EntityRef>> {
        if let Access::Paged(state) = self {
            if !state.ensure_resident(id).unwrap_or(false) {
                return None;
            }
        }
        self.state()
            .nodes
            .get(&id)
            .and_then(|n| n.neighbors.get(layer))
            .cloned()
    }
}

/// Wrapper making f32 orderable for the traversal heaps.
///
/// NaN compares equal, which cannot occur for finite vectors but keeps
/// the ordering total.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedF32(f32);

impl Eq for OrderedF32 {}

impl PartialOrd for OrderedF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// The HNSW index.
///
/// Owns the in-memory graph; persisted node records are the storage
/// engine's responsibility (drain [`take_dirty`](Self::take_dirty) after
/// mutations to learn which records need rewriting).
pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    state: RwLock<GraphState>,
}

impl HnswIndex {
    /// Creates a new empty index.
    pub fn new(dimension: usize, distance: DistanceKind, config: &HnswConfig) -> Self {
        Self {
            config: config.clone(),
            dimension,
            state: RwLock::new(GraphState {
                nodes: HashMap::new(),
                entry_point: None,
                max_level: 0,
                distance,
                quantizer: None,
                total_count: 0,
                store: None,
                budget: 0,
                order: LruCache::unbounded(),
                dirty: HashSet::new(),
            }),
        }
    }

    /// Expected vector dimension.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, GraphState>> {
        self.state
            .read()
            .map_err(|_| SynapseError::index("Graph lock poisoned"))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, GraphState>> {
        self.state
            .write()
            .map_err(|_| SynapseError::index("Graph lock poisoned"))
    }

    /// Attaches a node store and resident budget (optimized variant).
    ///
    /// With a store attached, nodes beyond `budget` are paged out LRU and
    /// re-fetched on demand during traversal. A budget of 0 disables
    /// eviction (store used only to satisfy misses, e.g. after lazy load).
    pub fn attach_store(&self, store: Arc<dyn NodeStore>, budget: usize) -> Result<()> {
        let mut state = self.write_state()?;
        state.store = Some(store);
        state.budget = budget;
        let resident: Vec<EntityRef> = state.nodes.keys().copied().collect();
        for id in resident {
            state.order.push(id, ());
        }
        state.evict_excess();
        Ok(())
    }

    /// Compresses resident vectors with product quantization.
    ///
    /// Trains a codebook on the currently resident vectors and swaps all
    /// node vectors to encoded form; subsequent inserts are encoded on
    /// the way in. Exact vectors stay in storage; a [`NodeStore`] should
    /// be attached so persisted records keep full precision.
    pub fn compress(&self, config: &PqConfig) -> Result<()> {
        let mut state = self.write_state()?;
        if state.quantizer.is_some() {
            return Ok(());
        }
        let sample: Vec<Vector> = state
            .nodes
            .values()
            .map(|n| state.decoded(&n.vector))
            .collect();
        if sample.is_empty() {
            return Err(SynapseError::index(
                "cannot train a quantizer on an empty index",
            ));
        }
        let pq = ProductQuantizer::train(&sample, config)?;
        let ids: Vec<EntityRef> = state.nodes.keys().copied().collect();
        for id in ids {
            let full = state
                .node_vector(id)
                .ok_or_else(|| SynapseError::index("node vanished during compression"))?;
            let codes = pq.encode(&full)?;
            if let Some(node) = state.nodes.get_mut(&id) {
                node.vector = StoredVector::Quantized(codes);
            }
        }
        state.quantizer = Some(pq);
        debug!(nodes = state.nodes.len(), "Compressed index vectors");
        Ok(())
    }

    /// Returns true if vectors are stored product-quantized.
    pub fn is_compressed(&self) -> Result<bool> {
        Ok(self.read_state()?.quantizer.is_some())
    }

    // =====================================================================
    // Mutation
    // =====================================================================

    /// Inserts a vector into the graph.
    ///
    /// Assigns a random level with `P(level) ∝ exp(-level / ln M)`, walks
    /// greedily down to the target level, beam-searches each layer with
    /// `ef_construction` candidates, links to the M nearest, and
    /// reciprocally prunes overfull neighbor sets with the non-dominated
    /// heuristic. Re-inserting an existing ID is a no-op.
    pub fn insert(&self, id: EntityRef, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(ValidationError::dimension_mismatch(self.dimension, vector.len()).into());
        }

        let mut state = self.write_state()?;
        if state.nodes.contains_key(&id) {
            return Ok(());
        }
        // Paged-out nodes count as present too
        if let Some(store) = &state.store {
            if store.load_node(&id)?.is_some() {
                return Ok(());
            }
        }

        let level = self.sample_level();
        let stored = match &state.quantizer {
            Some(pq) => StoredVector::Quantized(pq.encode(vector)?),
            None => StoredVector::Full(vector.to_vec()),
        };

        let Some(entry) = state.entry_point else {
            // First node becomes the entry point
            state.nodes.insert(id, Node::new(stored, level));
            state.entry_point = Some(id);
            state.max_level = level;
            state.total_count += 1;
            state.mark_dirty(id);
            state.order.push(id, ());
            return Ok(());
        };

        let max_level = state.max_level;
        let mut access = Access::Paged(&mut state);

        // Greedy descent through layers above the new node's level
        let mut current = entry;
        for layer in (level + 1..=max_level).rev() {
            current = greedy_descend(&mut access, vector, current, layer);
        }

        // Beam search and link from the node's top layer down to 0
        let mut entry_points = vec![current];
        let mut links_per_layer: Vec<(usize, Vec<EntityRef>)> = Vec::new();
        for layer in (0..=level.min(max_level)).rev() {
            let candidates = search_layer(
                &mut access,
                vector,
                &entry_points,
                self.config.ef_construction,
                layer,
                None,
            );
            let m = self.config.max_neighbors_at(layer);
            // Connect to the M nearest of the candidate set
            let selected: Vec<EntityRef> = candidates.iter().take(m).map(|&(_, n)| n).collect();
            links_per_layer.push((layer, selected));
            entry_points = candidates.into_iter().map(|(_, n)| n).collect();
        }

        // Materialize the new node, then wire reciprocal edges
        let mut node = Node::new(stored, level);
        for (layer, selected) in &links_per_layer {
            node.neighbors[*layer] = selected.clone();
        }
        state.nodes.insert(id, node);
        state.total_count += 1;
        state.mark_dirty(id);
        state.order.push(id, ());

        for (layer, selected) in links_per_layer {
            for neighbor in selected {
                let budget = self.config.max_neighbors_at(layer);
                let overfull = match state.nodes.get_mut(&neighbor) {
                    Some(n) if layer < n.neighbors.len() => {
                        if !n.neighbors[layer].contains(&id) {
                            n.neighbors[layer].push(id);
                        }
                        n.neighbors[layer].len() > budget
                    }
                    _ => false,
                };
                state.mark_dirty(neighbor);
                if overfull {
                    prune_neighbors(&mut state, neighbor, layer, budget);
                }
            }
        }

        // A node above the current max level becomes the new entry point
        if level > state.max_level {
            state.max_level = level;
            state.entry_point = Some(id);
        }

        state.evict_excess();
        Ok(())
    }

    /// Removes a node, repairing its neighborhood.
    ///
    /// Back-edges are dropped, then each orphaned neighbor is offered a
    /// replacement link from a radius-2 scan of its surroundings. If the
    /// removed node was the entry point, its highest-level remaining
    /// neighbor is promoted (falling back to a graph scan when the node
    /// had no neighbors left).
    ///
    /// Returns `false` if the ID was not in the graph.
    pub fn remove(&self, id: EntityRef) -> Result<bool> {
        let mut state = self.write_state()?;

        // Page in before removal so repair sees the node's edges
        if !state.ensure_resident(id)? {
            return Ok(false);
        }
        let Some(node) = state.nodes.remove(&id) else {
            return Ok(false);
        };
        state.total_count -= 1;
        state.dirty.remove(&id);

        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for &neighbor in neighbors {
                state.ensure_resident(neighbor)?;
                let removed_edge = match state.nodes.get_mut(&neighbor) {
                    Some(n) if layer < n.neighbors.len() => {
                        let before = n.neighbors[layer].len();
                        n.neighbors[layer].retain(|&other| other != id);
                        n.neighbors[layer].len() != before
                    }
                    _ => false,
                };
                if removed_edge {
                    state.mark_dirty(neighbor);
                    repair_neighbor(
                        &mut state,
                        neighbor,
                        layer,
                        id,
                        self.config.max_neighbors_at(layer),
                    );
                }
            }
        }

        if state.entry_point == Some(id) {
            // Promote the highest-level remaining neighbor of the removed
            // node; an isolated node falls back to a full scan.
            let candidate = node
                .neighbors
                .iter()
                .flatten()
                .copied()
                .filter(|n| state.nodes.contains_key(n))
                .max_by_key(|n| (state.nodes[n].level, Reverse(*n)))
                .or_else(|| {
                    state
                        .nodes
                        .iter()
                        .max_by_key(|(nid, n)| (n.level, Reverse(**nid)))
                        .map(|(nid, _)| *nid)
                });
            state.entry_point = candidate;
            state.max_level = candidate
                .and_then(|c| state.nodes.get(&c))
                .map(|n| n.level)
                .unwrap_or(0);
        }

        state.evict_excess();
        Ok(true)
    }

    // =====================================================================
    // Search
    // =====================================================================

    /// Searches for the k nearest nodes.
    ///
    /// Returns `(id, distance)` pairs sorted by distance ascending, ties
    /// broken by identifier. An empty graph yields an empty result, not
    /// an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search_filtered(query, k, None)
    }

    /// Searches with a filter predicate applied during traversal.
    ///
    /// Candidates failing the filter stay on the traversal queue (their
    /// edges are still walked) but are excluded from the result set, so
    /// heavily filtered queries still return up to k passing hits.
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&(dyn Fn(&EntityRef) -> bool + Sync)>,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(ValidationError::dimension_mismatch(self.dimension, query.len()).into());
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        // With a store attached, traversal may page nodes in and needs
        // the exclusive guard; otherwise searches share the read guard.
        let paged = self.read_state()?.store.is_some();
        if paged {
            let mut state = self.write_state()?;
            let result = self.search_inner(Access::Paged(&mut state), query, k, filter);
            state.evict_excess();
            result
        } else {
            let state = self.read_state()?;
            self.search_inner(Access::Read(&state), query, k, filter)
        }
    }

    fn search_inner(
        &self,
        mut access: Access<'_>,
        query: &[f32],
        k: usize,
        filter: Option<&(dyn Fn(&EntityRef) -> bool + Sync)>,
    ) -> Result<Vec<SearchHit>> {
        let Some(entry) = access.state().entry_point else {
            return Ok(Vec::new());
        };
        let max_level = access.state().max_level;

        let mut current = entry;
        for layer in (1..=max_level).rev() {
            current = greedy_descend(&mut access, query, current, layer);
        }

        let ef = self.config.ef_search.max(k);
        let hits = search_layer(&mut access, query, &[current], ef, 0, filter);

        Ok(hits.into_iter().take(k).map(|(d, id)| (id, d)).collect())
    }

    // =====================================================================
    // Introspection
    // =====================================================================

    /// Number of nodes in the graph (including paged-out nodes).
    pub fn len(&self) -> usize {
        self.read_state().map(|s| s.total_count).unwrap_or(0)
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the graph contains the given ID.
    ///
    /// Consults the attached store for paged-out nodes.
    pub fn contains(&self, id: EntityRef) -> Result<bool> {
        let state = self.read_state()?;
        if state.nodes.contains_key(&id) {
            return Ok(true);
        }
        match &state.store {
            Some(store) => Ok(store.load_node(&id)?.is_some()),
            None => Ok(false),
        }
    }

    /// Resident node IDs (the full set when no store is attached).
    pub fn ids(&self) -> Vec<EntityRef> {
        self.read_state()
            .map(|s| s.nodes.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Decoded vector for a resident node.
    pub fn vector_of(&self, id: EntityRef) -> Option<Vector> {
        self.read_state().ok()?.node_vector(id)
    }

    /// Current entry point and max level for persistence.
    pub fn system_record(&self) -> HnswSystemRecord {
        self.read_state()
            .map(|s| HnswSystemRecord {
                entry_point_id: s.entry_point,
                max_level: s.max_level,
            })
            .unwrap_or_default()
    }

    /// Persisted record for one node.
    ///
    /// For quantized nodes the exact vector is re-read through the
    /// attached store; without one, the centroid reconstruction is
    /// returned.
    pub fn node_record(&self, id: EntityRef) -> Result<Option<HnswNodeRecord>> {
        let state = self.read_state()?;
        let Some(node) = state.nodes.get(&id) else {
            return Ok(None);
        };

        let vector = match (&node.vector, &state.store) {
            (StoredVector::Full(v), _) => v.clone(),
            (StoredVector::Quantized(_), Some(store)) => match store.load_node(&id)? {
                Some(record) => record.vector,
                None => state.decoded(&node.vector),
            },
            (StoredVector::Quantized(_), None) => state.decoded(&node.vector),
        };

        let neighbors = node
            .neighbors
            .iter()
            .enumerate()
            .map(|(layer, list)| (layer as u32, list.clone()))
            .collect();

        Ok(Some(HnswNodeRecord {
            id,
            vector,
            level: node.level,
            neighbors,
        }))
    }

    /// Drains the set of nodes mutated since the last call.
    ///
    /// The write path persists a fresh record for each drained ID (or
    /// deletes the record if the node is gone).
    pub fn take_dirty(&self) -> Vec<EntityRef> {
        self.write_state()
            .map(|mut s| s.dirty.drain().collect())
            .unwrap_or_default()
    }

    // =====================================================================
    // Load / rebuild
    // =====================================================================

    /// Loads the graph from persisted node records.
    ///
    /// Records are trusted: neighbor lists are installed as-is, with
    /// dangling edges (pointing at IDs absent from the record set)
    /// pruned and logged. The entry point comes from the system record
    /// when valid, otherwise the highest-level node.
    pub fn load(
        &self,
        records: Vec<HnswNodeRecord>,
        system: Option<&HnswSystemRecord>,
    ) -> Result<()> {
        let mut state = self.write_state()?;

        let ids: HashSet<EntityRef> = records.iter().map(|r| r.id).collect();
        state.nodes.clear();
        state.dirty.clear();
        state.order.clear();

        for record in records {
            if record.vector.len() != self.dimension {
                // Mismatched vectors are corrupt; dropping them here
                // mirrors the write-path rejection
                warn!(id = %record.id, got = record.vector.len(), "Dropping node with wrong dimension");
                continue;
            }
            let id = record.id;
            let mut node = state.node_from_record(record)?;
            let mut pruned = 0usize;
            for list in &mut node.neighbors {
                let before = list.len();
                list.retain(|n| ids.contains(n));
                pruned += before - list.len();
            }
            if pruned > 0 {
                debug!(id = %id, pruned, "Pruned dangling edges during load");
                state.dirty.insert(id);
            }
            state.nodes.insert(id, node);
        }

        state.total_count = state.nodes.len();

        let system_entry = system.and_then(|s| s.entry_point_id);
        state.entry_point = match system_entry {
            Some(ep) if state.nodes.contains_key(&ep) => Some(ep),
            _ => state
                .nodes
                .iter()
                .max_by_key(|(id, n)| (n.level, Reverse(**id)))
                .map(|(id, _)| *id),
        };
        state.max_level = state
            .entry_point
            .and_then(|ep| state.nodes.get(&ep))
            .map(|n| n.level)
            .unwrap_or(0);

        Ok(())
    }

    /// Adopts a persisted entry point and max level without loading
    /// node records.
    ///
    /// Used by lazy loading: with a [`NodeStore`] attached, traversal
    /// pages nodes in from storage starting at the adopted entry point.
    /// `total` is the known corpus size (for [`len`](Self::len)).
    pub fn restore_system(&self, system: &HnswSystemRecord, total: usize) -> Result<()> {
        let mut state = self.write_state()?;
        state.entry_point = system.entry_point_id;
        state.max_level = system.max_level;
        state.total_count = total;
        Ok(())
    }

    /// Rebuilds the graph from raw vectors (fresh inserts).
    ///
    /// Used when persisted records are missing or stale; slower than
    /// [`load`](Self::load) but produces a fresh well-formed graph.
    pub fn rebuild_from_vectors(
        &self,
        vectors: impl IntoIterator<Item = (EntityRef, Vector)>,
    ) -> Result<()> {
        {
            let mut state = self.write_state()?;
            state.nodes.clear();
            state.entry_point = None;
            state.max_level = 0;
            state.total_count = 0;
            state.dirty.clear();
            state.order.clear();
        }
        for (id, vector) in vectors {
            self.insert(id, &vector)?;
        }
        Ok(())
    }

    fn sample_level(&self) -> usize {
        let uniform: f64 = rand::random();
        let level =
            (-uniform.max(f64::MIN_POSITIVE).ln() * self.config.level_multiplier()).floor() as usize;
        level.min(self.config.max_level)
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.dimension)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Traversal primitives
// =========================================================================

/// Greedy single-nearest descent within one layer.
fn greedy_descend(
    access: &mut Access<'_>,
    query: &[f32],
    start: EntityRef,
    layer: usize,
) -> EntityRef {
    let mut best = start;
    let mut best_dist = access.try_distance(query, start).unwrap_or(f32::MAX);

    loop {
        let mut improved = false;
        if let Some(neighbors) = access.try_neighbors(best, layer) {
            for neighbor in neighbors {
                if let Some(dist) = access.try_distance(query, neighbor) {
                    if dist < best_dist {
                        best = neighbor;
                        best_dist = dist;
                        improved = true;
                    }
                }
            }
        }
        if !improved {
            return best;
        }
    }
}

/// Beam search within one layer.
///
/// Returns up to `ef` hits sorted by (distance, id) ascending. With a
/// filter, failing nodes are traversed but never enter the result heap.
fn search_layer(
    access: &mut Access<'_>,
    query: &[f32],
    entry_points: &[EntityRef],
    ef: usize,
    layer: usize,
    filter: Option<&(dyn Fn(&EntityRef) -> bool + Sync)>,
) -> Vec<(f32, EntityRef)> {
    let mut visited: HashSet<EntityRef> = HashSet::new();
    // Min-heap of nodes to expand
    let mut candidates: BinaryHeap<Reverse<(OrderedF32, EntityRef)>> = BinaryHeap::new();
    // Max-heap of accepted hits; worst on top for O(log ef) trimming
    let mut results: BinaryHeap<(OrderedF32, EntityRef)> = BinaryHeap::new();

    for &ep in entry_points {
        if visited.insert(ep) {
            if let Some(dist) = access.try_distance(query, ep) {
                candidates.push(Reverse((OrderedF32(dist), ep)));
                if filter.map_or(true, |f| f(&ep)) {
                    results.push((OrderedF32(dist), ep));
                }
            }
        }
    }

    while let Some(Reverse((OrderedF32(dist), id))) = candidates.pop() {
        if results.len() >= ef {
            if let Some(&(OrderedF32(worst), _)) = results.peek() {
                if dist > worst {
                    break;
                }
            }
        }

        let Some(neighbors) = access.try_neighbors(id, layer) else {
            continue;
        };
        for neighbor in neighbors {
            if !visited.insert(neighbor) {
                continue;
            }
            let Some(dist) = access.try_distance(query, neighbor) else {
                continue;
            };
            let worst = results
                .peek()
                .map(|&(OrderedF32(w), _)| w)
                .unwrap_or(f32::MAX);
            if results.len() < ef || dist < worst {
                candidates.push(Reverse((OrderedF32(dist), neighbor)));
                if filter.map_or(true, |f| f(&neighbor)) {
                    results.push((OrderedF32(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }
    }

    let mut out: Vec<(f32, EntityRef)> = results
        .into_iter()
        .map(|(OrderedF32(d), id)| (d, id))
        .collect();
    out.sort_by(|a, b| {
        OrderedF32(a.0)
            .cmp(&OrderedF32(b.0))
            .then_with(|| a.1.cmp(&b.1))
    });
    out
}

/// Prunes an overfull neighbor list with the non-dominated heuristic:
/// walk candidates nearest-first and keep each one only if no closer
/// already-kept neighbor dominates it (is nearer to the candidate than
/// the candidate is to the target).
fn prune_neighbors(state: &mut GraphState, target: EntityRef, layer: usize, m: usize) {
    let Some(target_vec) = state.node_vector(target) else {
        return;
    };
    let current: Vec<EntityRef> = match state.nodes.get(&target) {
        Some(n) if layer < n.neighbors.len() => n.neighbors[layer].clone(),
        _ => return,
    };

    let mut scored: Vec<(f32, EntityRef)> = current
        .into_iter()
        .filter_map(|n| state.distance_to(&target_vec, n).map(|d| (d, n)))
        .collect();
    scored.sort_by(|a, b| {
        OrderedF32(a.0)
            .cmp(&OrderedF32(b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut kept: Vec<(f32, EntityRef)> = Vec::with_capacity(m);
    for (dist, candidate) in scored {
        if kept.len() >= m {
            break;
        }
        let dominated = kept.iter().any(|&(_, s)| {
            state
                .distance_between(candidate, s)
                .map(|d| d < dist)
                .unwrap_or(false)
        });
        if !dominated {
            kept.push((dist, candidate));
        }
    }

    if let Some(node) = state.nodes.get_mut(&target) {
        if layer < node.neighbors.len() {
            node.neighbors[layer] = kept.into_iter().map(|(_, n)| n).collect();
        }
    }
}

/// Offers a replacement link to a neighbor orphaned by a removal.
///
/// Scans a radius-2 neighborhood around the orphan at the given layer
/// and links the nearest non-connected candidate, if any.
fn repair_neighbor(
    state: &mut GraphState,
    orphan: EntityRef,
    layer: usize,
    removed: EntityRef,
    m: usize,
) {
    let (current, orphan_vec) = match state.nodes.get(&orphan) {
        Some(n) if layer < n.neighbors.len() => {
            (n.neighbors[layer].clone(), state.decoded(&n.vector))
        }
        _ => return,
    };
    if current.len() >= m {
        return;
    }

    // Radius-2 scan: direct neighbors plus their neighbors
    let mut candidates: HashSet<EntityRef> = HashSet::new();
    for &first_hop in &current {
        candidates.insert(first_hop);
        if let Some(n) = state.nodes.get(&first_hop) {
            if layer < n.neighbors.len() {
                candidates.extend(n.neighbors[layer].iter().copied());
            }
        }
    }
    candidates.remove(&orphan);
    candidates.remove(&removed);
    for existing in &current {
        candidates.remove(existing);
    }

    let best = candidates
        .into_iter()
        .filter_map(|c| state.distance_to(&orphan_vec, c).map(|d| (OrderedF32(d), c)))
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if let Some((_, replacement)) = best {
        if let Some(n) = state.nodes.get_mut(&orphan) {
            n.neighbors[layer].push(replacement);
        }
        let overfull = match state.nodes.get_mut(&replacement) {
            Some(n) if layer < n.neighbors.len() => {
                if !n.neighbors[layer].contains(&orphan) {
                    n.neighbors[layer].push(orphan);
                }
                n.neighbors[layer].len() > m
            }
            _ => false,
        };
        state.mark_dirty(replacement);
        if overfull {
            prune_neighbors(state, replacement, layer, m);
        }
    }
}
