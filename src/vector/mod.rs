//! Vector index abstractions for similarity search.
//!
//! This module provides the distance functions, the hand-maintained HNSW
//! graph, and the product quantizer backing the optimized variant.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │         VectorIndex trait         │
//! └──────────┬───────────────────────┘
//!            │
//!    ┌───────┴────────┐
//!    │   HnswIndex    │  (in-crate mutable HNSW graph)
//!    └───────┬────────┘
//!            │ optional
//!    ┌───────┴────────┐   ┌──────────────────┐
//!    │   NodeStore    │   │ ProductQuantizer │
//!    │ (paged nodes)  │   │ (compressed mem) │
//!    └────────────────┘   └──────────────────┘
//! ```
//!
//! Persisted node records in storage are the **source of truth**. The
//! in-memory graph is derived and rebuildable: if records are missing or
//! corrupt, it is reconstructed from stored vectors.

pub mod distance;
mod hnsw;
mod pq;

pub use distance::DistanceKind;
pub use hnsw::{HnswIndex, HnswNodeRecord, HnswSystemRecord, NodeStore, SearchHit};
pub use pq::{PqConfig, ProductQuantizer};

use crate::error::Result;
use crate::types::EntityRef;

/// Vector index trait for approximate nearest neighbor search.
///
/// Implementations must be `Send + Sync`. All mutating methods take
/// `&self` and use interior mutability, so searches proceed concurrently
/// while writes are serialized internally.
pub trait VectorIndex: Send + Sync {
    /// Inserts a vector with the given identity. Re-inserting an
    /// existing ID is a no-op.
    fn insert(&self, id: EntityRef, vector: &[f32]) -> Result<()>;

    /// Removes a node, repairing the surrounding graph.
    ///
    /// Returns `false` if the ID was absent.
    fn remove(&self, id: EntityRef) -> Result<bool>;

    /// Searches for the k nearest nodes.
    ///
    /// Returns `(id, distance)` pairs sorted by distance ascending,
    /// ties broken by identifier. An empty index yields an empty
    /// result, not an error.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Searches with a filter predicate applied during traversal.
    ///
    /// Failing candidates are traversed but excluded from the result
    /// set, so heavily filtered queries still fill up to k hits.
    fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&(dyn Fn(&EntityRef) -> bool + Sync)>,
    ) -> Result<Vec<SearchHit>>;

    /// Returns true if the index contains the given ID.
    fn contains(&self, id: EntityRef) -> Result<bool>;

    /// Number of nodes in the index.
    fn len(&self) -> usize;

    /// Returns true if the index has no nodes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VectorIndex for HnswIndex {
    fn insert(&self, id: EntityRef, vector: &[f32]) -> Result<()> {
        HnswIndex::insert(self, id, vector)
    }

    fn remove(&self, id: EntityRef) -> Result<bool> {
        HnswIndex::remove(self, id)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        HnswIndex::search(self, query, k)
    }

    fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&(dyn Fn(&EntityRef) -> bool + Sync)>,
    ) -> Result<Vec<SearchHit>> {
        HnswIndex::search_filtered(self, query, k, filter)
    }

    fn contains(&self, id: EntityRef) -> Result<bool> {
        HnswIndex::contains(self, id)
    }

    fn len(&self) -> usize {
        HnswIndex::len(self)
    }
}
