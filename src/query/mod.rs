//! The triple-intelligence query layer.
//!
//! Fuses three retrieval modalities over one corpus:
//!
//! - **Vector**: approximate nearest neighbors from the HNSW index
//! - **Graph**: frontier expansion over the verb graph
//! - **Metadata**: O(1)-O(log n) predicate evaluation on the inverted
//!   index
//!
//! [`plan::execute`] picks an execution shape from the clauses present
//! (selective predicates become traversal filters, shallow connectivity
//! runs graph-first, all three fuse via weighted min-max scoring) and
//! materializes a paginated, ranked result set.

pub mod cursor;
pub mod fusion;
pub mod plan;
pub mod traverse;

pub use fusion::FusionWeights;
pub use plan::{
    ConnectedClause, LikeClause, PlannerContext, QueryHit, QueryMode, QueryParser, QueryResults,
    TripleQuery,
};
