//! The triple-intelligence query planner.
//!
//! A [`TripleQuery`] combines up to three retrieval clauses: vector
//! similarity (`like`), a metadata predicate (`where`), and graph
//! connectivity (`connected`). The planner chooses an execution shape
//! from what's present:
//!
//! 1. A highly selective predicate (estimated cardinality ≤ limit × 10)
//!    becomes a filter on the HNSW traversal instead of a separate leg.
//! 2. Shallow connectivity (max_depth ≤ 3) expands the frontier first,
//!    intersects with the predicate, then re-ranks by similarity.
//! 3. All three clauses under `Auto` run as parallel legs whose scores
//!    fuse via min-max normalization and weighted sum (see
//!    [`super::fusion`]).
//!
//! Soft-deleted entities are excluded by injecting the canonical
//! tombstone filter unless the caller opts in; placeholder nouns are
//! always excluded. Limits cap at 10 000 and cursors degrade to offset
//! 0 when undecodable.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::config::MAX_QUERY_LIMIT;
use crate::error::{Result, ValidationError};
use crate::metadata::{
    MetadataIndex, MetadataPredicate, Partition, DELETED_KEY, PLACEHOLDER_KEY,
};
use crate::noun::{Noun, NounType};
use crate::storage::StorageAdapter;
use crate::types::{EntityRef, NounId, Vector};
use crate::vector::{DistanceKind, HnswIndex};
use crate::verb::VerbType;

use super::cursor::{decode_cursor, encode_cursor};
use super::fusion::{fuse, Candidate, FusionWeights};
use super::traverse;

/// Default result limit when the caller doesn't specify one.
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Over-fetch multiplier for fused legs, so fusion has candidates to
/// re-rank beyond the requested page.
const LEG_OVERFETCH: usize = 3;

/// Selectivity threshold multiplier for rule 1.
const SELECTIVITY_MULTIPLIER: usize = 10;

/// Graph-first depth threshold for rule 2.
const GRAPH_FIRST_MAX_DEPTH: usize = 3;

/// How a query's similarity clause is expressed.
#[derive(Clone, Debug)]
pub enum LikeClause {
    /// A raw vector of the configured dimension.
    Vector(Vector),
    /// Text to embed via the attached embedding service.
    ///
    /// Resolved to a vector by the engine before planning; the planner
    /// rejects unresolved text.
    Text(String),
    /// Similar to an existing noun's vector.
    Id(NounId),
}

/// Graph connectivity clause.
#[derive(Clone, Debug, Default)]
pub struct ConnectedClause {
    /// Anchor: nouns reachable from this one.
    pub from: Option<NounId>,
    /// Anchor: nouns that reach this one.
    pub to: Option<NounId>,
    /// Restrict traversal to these verb types.
    pub via: Option<Vec<VerbType>>,
    /// Maximum hops from an anchor. Default: 2
    pub max_depth: usize,
}

/// Execution mode override.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryMode {
    /// Planner picks based on the clauses present.
    #[default]
    Auto,
    /// Vector leg only (requires `like`).
    Vector,
    /// Graph leg only (requires `connected`).
    Graph,
    /// Metadata leg only (requires `where`).
    Metadata,
    /// Force parallel legs plus fusion.
    Fusion,
}

/// A structured triple-intelligence query.
#[derive(Clone, Debug)]
pub struct TripleQuery {
    /// Vector similarity clause.
    pub like: Option<LikeClause>,
    /// Metadata predicate clause.
    pub where_clause: Option<MetadataPredicate>,
    /// Graph connectivity clause.
    pub connected: Option<ConnectedClause>,
    /// Execution mode.
    pub mode: QueryMode,
    /// Result limit (capped at 10 000).
    pub limit: usize,
    /// Result offset; superseded by `cursor` when both are set.
    pub offset: Option<usize>,
    /// Continuation cursor from a previous page.
    pub cursor: Option<String>,
    /// Include soft-deleted entities.
    pub include_deleted: bool,
    /// Restrict results to one noun type.
    pub noun_type: Option<NounType>,
    /// Restrict results to an explicit id set.
    pub item_ids: Option<Vec<NounId>>,
    /// Minimum vector similarity for vector-leg hits.
    pub threshold: Option<f32>,
    /// Fusion weights.
    pub weights: FusionWeights,
}

impl Default for TripleQuery {
    fn default() -> Self {
        Self {
            like: None,
            where_clause: None,
            connected: None,
            mode: QueryMode::Auto,
            limit: DEFAULT_QUERY_LIMIT,
            offset: None,
            cursor: None,
            include_deleted: false,
            noun_type: None,
            item_ids: None,
            threshold: None,
            weights: FusionWeights::default(),
        }
    }
}

impl TripleQuery {
    /// An empty query (browse, newest ids first by UUID ordering).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the similarity clause to a raw vector.
    pub fn like_vector(mut self, vector: Vector) -> Self {
        self.like = Some(LikeClause::Vector(vector));
        self
    }

    /// Sets the similarity clause to text for embedding.
    pub fn like_text(mut self, text: impl Into<String>) -> Self {
        self.like = Some(LikeClause::Text(text.into()));
        self
    }

    /// Sets the similarity clause to an existing noun.
    pub fn like_id(mut self, id: NounId) -> Self {
        self.like = Some(LikeClause::Id(id));
        self
    }

    /// Sets the metadata predicate clause.
    pub fn where_clause(mut self, predicate: MetadataPredicate) -> Self {
        self.where_clause = Some(predicate);
        self
    }

    /// Sets the connectivity clause.
    pub fn connected(mut self, clause: ConnectedClause) -> Self {
        self.connected = Some(clause);
        self
    }

    /// Sets the execution mode.
    pub fn mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the result limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the result offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the continuation cursor.
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Restricts results to one noun type.
    pub fn noun_type(mut self, noun_type: NounType) -> Self {
        self.noun_type = Some(noun_type);
        self
    }

    /// Includes soft-deleted entities in results.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// Parser collaborator turning natural-language strings into structured
/// queries. Optional: the engine functions without one, rejecting
/// string queries with a missing-component error.
pub trait QueryParser: Send + Sync {
    /// Parses a natural-language query into a structured one.
    fn parse(&self, query: &str) -> Result<TripleQuery>;
}

/// One ranked result.
#[derive(Clone, Debug)]
pub struct QueryHit {
    /// The matching noun.
    pub noun: Noun,
    /// Fused score (higher is better).
    pub score: f32,
    /// Normalized vector similarity, when the vector leg ran.
    pub vector_similarity: Option<f32>,
    /// Metadata match indicator, when the predicate leg ran.
    pub metadata_match: Option<f32>,
    /// Normalized graph proximity, when the graph leg ran.
    pub graph_proximity: Option<f32>,
}

/// A page of ranked results.
#[derive(Clone, Debug)]
pub struct QueryResults {
    /// Ranked hits, best first.
    pub items: Vec<QueryHit>,
    /// Whether more results exist past this page.
    pub has_more: bool,
    /// Cursor resuming after this page.
    pub next_cursor: Option<String>,
}

/// Components the planner executes against.
pub struct PlannerContext<'a> {
    /// The vector index.
    pub index: &'a HnswIndex,
    /// The metadata index.
    pub metadata_index: &'a MetadataIndex,
    /// The storage adapter (result materialization, graph traversal).
    pub storage: &'a dyn StorageAdapter,
    /// Distance function used by the index.
    pub distance: DistanceKind,
}

/// Executes a structured query.
pub fn execute(ctx: &PlannerContext<'_>, query: &TripleQuery) -> Result<QueryResults> {
    if query.limit > MAX_QUERY_LIMIT {
        return Err(ValidationError::limit_exceeded(query.limit, MAX_QUERY_LIMIT).into());
    }
    let limit = if query.limit == 0 {
        DEFAULT_QUERY_LIMIT
    } else {
        query.limit
    };
    let offset = match &query.cursor {
        Some(cursor) => decode_cursor(cursor).unwrap_or(0),
        None => query.offset.unwrap_or(0),
    };

    let like_vector = resolve_like(ctx, query)?;
    validate_mode(query, like_vector.as_ref())?;

    let partition = query.noun_type.map(Partition::Noun);

    // Exclusions: placeholders always, tombstones unless opted in.
    // Both are O(1) positive postings.
    let mut excluded: HashSet<EntityRef> = ctx
        .metadata_index
        .query(&MetadataPredicate::eq(PLACEHOLDER_KEY, true), None);
    if !query.include_deleted {
        excluded.extend(
            ctx.metadata_index
                .query(&MetadataPredicate::eq(DELETED_KEY, true), None),
        );
    }

    // Metadata leg: evaluated eagerly; it doubles as the selectivity
    // estimate for rule 1
    let meta_hits: Option<HashSet<NounId>> = query.where_clause.as_ref().map(|predicate| {
        ctx.metadata_index
            .query(predicate, partition)
            .into_iter()
            .filter_map(|e| e.as_noun())
            .collect()
    });

    let allowed_ids: Option<HashSet<NounId>> =
        query.item_ids.as_ref().map(|ids| ids.iter().copied().collect());
    let type_members: Option<HashSet<EntityRef>> =
        partition.map(|p| ctx.metadata_index.universe(Some(p)));

    let fetch = (offset + limit).saturating_mul(LEG_OVERFETCH).max(limit);

    // Execution shape
    let candidates = match query.mode {
        QueryMode::Vector => {
            let vector = like_vector.as_ref().expect("validated above");
            let hits = run_vector_leg(
                ctx,
                query,
                vector,
                fetch,
                &excluded,
                meta_hits.as_ref(),
                type_members.as_ref(),
                allowed_ids.as_ref(),
                true,
            )?;
            hits.into_iter()
                .map(|(id, similarity)| Candidate {
                    id,
                    vector_similarity: Some(similarity),
                    metadata_match: None,
                    graph_proximity: None,
                })
                .collect()
        }
        QueryMode::Metadata => metadata_only_candidates(
            meta_hits.as_ref().expect("validated above"),
            &excluded,
            allowed_ids.as_ref(),
        ),
        QueryMode::Graph => {
            let clause = query.connected.as_ref().expect("validated above");
            let frontier = run_graph_leg(ctx, clause)?;
            graph_only_candidates(&frontier, &excluded, allowed_ids.as_ref())
        }
        QueryMode::Auto | QueryMode::Fusion => auto_candidates(
            ctx,
            query,
            like_vector.as_ref(),
            meta_hits.as_ref(),
            fetch,
            limit,
            &excluded,
            type_members.as_ref(),
            allowed_ids.as_ref(),
        )?,
    };

    let scored = fuse(candidates, &query.weights);

    // Paginate, then materialize only the page
    let has_more = scored.len() > offset + limit;
    let page: Vec<_> = scored.into_iter().skip(offset).take(limit).collect();

    let mut items = Vec::with_capacity(page.len());
    for entry in page {
        match ctx.storage.get_noun(entry.id)? {
            Some(noun) => items.push(QueryHit {
                noun,
                score: entry.score,
                vector_similarity: entry.vector_similarity,
                metadata_match: entry.metadata_match,
                graph_proximity: entry.graph_proximity,
            }),
            // Index ahead of storage (in-flight write or repair): skip
            None => warn!(id = %entry.id, "Ranked noun missing from storage"),
        }
    }

    let next_cursor = has_more.then(|| encode_cursor(offset + items.len()));
    Ok(QueryResults {
        items,
        has_more,
        next_cursor,
    })
}

/// Resolves the like clause to a vector, if present.
fn resolve_like(ctx: &PlannerContext<'_>, query: &TripleQuery) -> Result<Option<Vector>> {
    match &query.like {
        None => Ok(None),
        Some(LikeClause::Vector(v)) => Ok(Some(v.clone())),
        Some(LikeClause::Id(id)) => {
            // Prefer the resident graph; fall back to the stored record
            if let Some(vector) = ctx.index.vector_of(EntityRef::Noun(*id)) {
                return Ok(Some(vector));
            }
            match ctx.storage.get_hnsw_node(&EntityRef::Noun(*id))? {
                Some(record) => Ok(Some(record.vector)),
                None => Err(crate::error::NotFoundError::noun(id).into()),
            }
        }
        Some(LikeClause::Text(_)) => Err(ValidationError::missing_component(
            "embedding service",
            "text similarity clauses must be embedded before planning",
        )
        .into()),
    }
}

fn validate_mode(query: &TripleQuery, like_vector: Option<&Vector>) -> Result<()> {
    match query.mode {
        QueryMode::Vector if like_vector.is_none() => Err(ValidationError::invalid_field(
            "mode",
            "vector mode requires a like clause",
        )
        .into()),
        QueryMode::Metadata if query.where_clause.is_none() => Err(
            ValidationError::invalid_field("mode", "metadata mode requires a where clause").into(),
        ),
        QueryMode::Graph
            if query
                .connected
                .as_ref()
                .map_or(true, |c| c.from.is_none() && c.to.is_none()) =>
        {
            Err(ValidationError::invalid_field(
                "mode",
                "graph mode requires a connected clause with an anchor",
            )
            .into())
        }
        _ => Ok(()),
    }
}

/// Runs the vector leg: filtered HNSW search mapped to similarities.
#[allow(clippy::too_many_arguments)]
fn run_vector_leg(
    ctx: &PlannerContext<'_>,
    query: &TripleQuery,
    vector: &Vector,
    fetch: usize,
    excluded: &HashSet<EntityRef>,
    meta_hits: Option<&HashSet<NounId>>,
    type_members: Option<&HashSet<EntityRef>>,
    allowed_ids: Option<&HashSet<NounId>>,
    apply_meta_prefilter: bool,
) -> Result<Vec<(NounId, f32)>> {
    let prefilter = if apply_meta_prefilter { meta_hits } else { None };

    let filter = |candidate: &EntityRef| -> bool {
        let Some(noun_id) = candidate.as_noun() else {
            return false;
        };
        if excluded.contains(candidate) {
            return false;
        }
        if let Some(members) = type_members {
            if !members.contains(candidate) {
                return false;
            }
        }
        if let Some(allowed) = allowed_ids {
            if !allowed.contains(&noun_id) {
                return false;
            }
        }
        if let Some(hits) = prefilter {
            if !hits.contains(&noun_id) {
                return false;
            }
        }
        true
    };

    let hits = ctx.index.search_filtered(vector, fetch, Some(&filter))?;
    let mut out = Vec::with_capacity(hits.len());
    for (entity, distance) in hits {
        let Some(noun_id) = entity.as_noun() else {
            continue;
        };
        let similarity = ctx.distance.to_similarity(distance);
        if let Some(threshold) = query.threshold {
            if similarity < threshold {
                continue;
            }
        }
        out.push((noun_id, similarity));
    }
    Ok(out)
}

/// Runs the graph leg: frontier expansion from the clause anchors.
fn run_graph_leg(
    ctx: &PlannerContext<'_>,
    clause: &ConnectedClause,
) -> Result<HashMap<NounId, usize>> {
    let max_depth = if clause.max_depth == 0 { 2 } else { clause.max_depth };
    let via = clause.via.as_deref();

    let frontier = match (clause.from, clause.to) {
        (Some(from), None) => traverse::expand_frontier(ctx.storage, from, via, max_depth)?,
        (None, Some(to)) => traverse::expand_frontier(ctx.storage, to, via, max_depth)?,
        (Some(from), Some(to)) => {
            let from_frontier = traverse::expand_frontier(ctx.storage, from, via, max_depth)?;
            let to_frontier = traverse::expand_frontier(ctx.storage, to, via, max_depth)?;
            traverse::intersect_frontiers(from_frontier, &to_frontier)
        }
        (None, None) => HashMap::new(),
    };

    Ok(traverse::without_anchors(frontier))
}

fn metadata_only_candidates(
    meta_hits: &HashSet<NounId>,
    excluded: &HashSet<EntityRef>,
    allowed_ids: Option<&HashSet<NounId>>,
) -> Vec<Candidate> {
    let mut ids: Vec<NounId> = meta_hits
        .iter()
        .filter(|id| !excluded.contains(&EntityRef::Noun(**id)))
        .filter(|id| allowed_ids.map_or(true, |a| a.contains(id)))
        .copied()
        .collect();
    ids.sort_unstable();
    ids.into_iter()
        .map(|id| Candidate {
            id,
            vector_similarity: None,
            metadata_match: Some(1.0),
            graph_proximity: None,
        })
        .collect()
}

fn graph_only_candidates(
    frontier: &HashMap<NounId, usize>,
    excluded: &HashSet<EntityRef>,
    allowed_ids: Option<&HashSet<NounId>>,
) -> Vec<Candidate> {
    frontier
        .iter()
        .filter(|(id, _)| !excluded.contains(&EntityRef::Noun(**id)))
        .filter(|(id, _)| allowed_ids.map_or(true, |a| a.contains(id)))
        .map(|(id, depth)| Candidate {
            id: *id,
            vector_similarity: None,
            metadata_match: None,
            graph_proximity: Some(traverse::proximity(*depth)),
        })
        .collect()
}

/// Auto/fusion execution: picks among the planner rules.
#[allow(clippy::too_many_arguments)]
fn auto_candidates(
    ctx: &PlannerContext<'_>,
    query: &TripleQuery,
    like_vector: Option<&Vector>,
    meta_hits: Option<&HashSet<NounId>>,
    fetch: usize,
    limit: usize,
    excluded: &HashSet<EntityRef>,
    type_members: Option<&HashSet<EntityRef>>,
    allowed_ids: Option<&HashSet<NounId>>,
) -> Result<Vec<Candidate>> {
    let forced_fusion = query.mode == QueryMode::Fusion;
    let connected = query.connected.as_ref().filter(|c| c.from.is_some() || c.to.is_some());

    match (like_vector, meta_hits, connected) {
        // Rule 3: all three clauses; the vector and graph legs run in
        // parallel (the metadata leg already ran for the selectivity
        // estimate), then scores fuse
        (Some(vector), Some(meta), Some(clause)) => {
            let selective = meta.len() <= limit * SELECTIVITY_MULTIPLIER;
            let (vector_hits, frontier) = std::thread::scope(|scope| {
                let vector_leg = scope.spawn(|| {
                    run_vector_leg(
                        ctx,
                        query,
                        vector,
                        fetch,
                        excluded,
                        Some(meta),
                        type_members,
                        allowed_ids,
                        selective,
                    )
                });
                let graph_leg = scope.spawn(|| run_graph_leg(ctx, clause));
                (
                    vector_leg.join().expect("vector leg panicked"),
                    graph_leg.join().expect("graph leg panicked"),
                )
            });
            let vector_hits = vector_hits?;
            let frontier = frontier?;
            debug!(
                vector = vector_hits.len(),
                metadata = meta.len(),
                graph = frontier.len(),
                "Fusing three legs"
            );
            Ok(merge_candidates(
                vector_hits,
                Some(meta),
                Some(&frontier),
                excluded,
                allowed_ids,
            ))
        }

        // Rule 2: shallow connectivity runs graph-first, intersects the
        // predicate, then re-ranks by similarity
        (like, meta, Some(clause))
            if !forced_fusion && effective_depth(clause) <= GRAPH_FIRST_MAX_DEPTH =>
        {
            let frontier = run_graph_leg(ctx, clause)?;
            let mut candidates = Vec::new();
            for (id, depth) in &frontier {
                let entity = EntityRef::Noun(*id);
                if excluded.contains(&entity) {
                    continue;
                }
                if let Some(members) = type_members {
                    if !members.contains(&entity) {
                        continue;
                    }
                }
                if let Some(allowed) = allowed_ids {
                    if !allowed.contains(id) {
                        continue;
                    }
                }
                if let Some(meta) = meta {
                    if !meta.contains(id) {
                        continue;
                    }
                }
                let similarity = like.and_then(|v| {
                    ctx.index
                        .vector_of(entity)
                        .map(|stored| ctx.distance.to_similarity(ctx.distance.distance(v, &stored)))
                });
                candidates.push(Candidate {
                    id: *id,
                    vector_similarity: similarity,
                    metadata_match: meta.map(|_| 1.0),
                    graph_proximity: Some(traverse::proximity(*depth)),
                });
            }
            Ok(candidates)
        }

        // Deep connectivity without the other clauses degenerates to the
        // graph leg
        (None, None, Some(clause)) => {
            let frontier = run_graph_leg(ctx, clause)?;
            Ok(graph_only_candidates(&frontier, excluded, allowed_ids))
        }

        // Deep connectivity alongside other clauses: fuse all present legs
        (like, meta, Some(clause)) => {
            let frontier = run_graph_leg(ctx, clause)?;
            let vector_hits = match like {
                Some(vector) => run_vector_leg(
                    ctx,
                    query,
                    vector,
                    fetch,
                    excluded,
                    meta,
                    type_members,
                    allowed_ids,
                    false,
                )?,
                None => Vec::new(),
            };
            Ok(merge_candidates(
                vector_hits,
                meta,
                Some(&frontier),
                excluded,
                allowed_ids,
            ))
        }

        // Rule 1: like + where; a selective predicate becomes the HNSW
        // traversal filter, otherwise both legs fuse
        (Some(vector), Some(meta), None) => {
            let selective = meta.len() <= limit * SELECTIVITY_MULTIPLIER;
            let vector_hits = run_vector_leg(
                ctx,
                query,
                vector,
                fetch,
                excluded,
                Some(meta),
                type_members,
                allowed_ids,
                selective,
            )?;
            if selective && !forced_fusion {
                // Pre-filtered: every hit matches the predicate
                Ok(vector_hits
                    .into_iter()
                    .map(|(id, similarity)| Candidate {
                        id,
                        vector_similarity: Some(similarity),
                        metadata_match: Some(1.0),
                        graph_proximity: None,
                    })
                    .collect())
            } else {
                Ok(merge_candidates(
                    vector_hits,
                    Some(meta),
                    None,
                    excluded,
                    allowed_ids,
                ))
            }
        }

        // Single-clause shapes
        (Some(vector), None, None) => {
            let vector_hits = run_vector_leg(
                ctx,
                query,
                vector,
                fetch,
                excluded,
                None,
                type_members,
                allowed_ids,
                false,
            )?;
            Ok(merge_candidates(
                vector_hits,
                None,
                None,
                excluded,
                allowed_ids,
            ))
        }
        (None, Some(meta), None) => {
            Ok(metadata_only_candidates(meta, excluded, allowed_ids))
        }

        // No clauses at all: browse the live universe in id order
        (None, None, None) => {
            let mut ids: Vec<NounId> = ctx
                .metadata_index
                .universe(query.noun_type.map(Partition::Noun))
                .into_iter()
                .filter(|e| !excluded.contains(e))
                .filter_map(|e| e.as_noun())
                .filter(|id| allowed_ids.map_or(true, |a| a.contains(id)))
                .collect();
            ids.sort_unstable();
            Ok(ids.into_iter().map(Candidate::new).collect())
        }
    }
}

fn effective_depth(clause: &ConnectedClause) -> usize {
    if clause.max_depth == 0 {
        2
    } else {
        clause.max_depth
    }
}

/// Unions leg outputs into one candidate set with per-modality scores.
fn merge_candidates(
    vector_hits: Vec<(NounId, f32)>,
    meta_hits: Option<&HashSet<NounId>>,
    frontier: Option<&HashMap<NounId, usize>>,
    excluded: &HashSet<EntityRef>,
    allowed_ids: Option<&HashSet<NounId>>,
) -> Vec<Candidate> {
    let mut merged: HashMap<NounId, Candidate> = HashMap::new();

    for (id, similarity) in vector_hits {
        merged
            .entry(id)
            .or_insert_with(|| Candidate::new(id))
            .vector_similarity = Some(similarity);
    }
    if let Some(meta) = meta_hits {
        for id in meta {
            if excluded.contains(&EntityRef::Noun(*id)) {
                continue;
            }
            if allowed_ids.map_or(false, |a| !a.contains(id)) {
                continue;
            }
            merged.entry(*id).or_insert_with(|| Candidate::new(*id));
        }
        for candidate in merged.values_mut() {
            candidate.metadata_match = Some(if meta.contains(&candidate.id) { 1.0 } else { 0.0 });
        }
    }
    if let Some(frontier) = frontier {
        for (id, depth) in frontier {
            if excluded.contains(&EntityRef::Noun(*id)) {
                continue;
            }
            if allowed_ids.map_or(false, |a| !a.contains(id)) {
                continue;
            }
            merged
                .entry(*id)
                .or_insert_with(|| Candidate::new(*id))
                .graph_proximity = Some(traverse::proximity(*depth));
        }
    }

    merged.into_values().collect()
}
