//! # SynapseDB
//!
//! Embedded graph-augmented vector database: typed entities ("nouns")
//! with dense vectors and metadata, typed directed relationships
//! ("verbs") between them, and search that fuses approximate nearest
//! neighbors, graph traversal, and metadata filtering.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use synapsedb::{Config, MetadataPredicate, NewNoun, NounType, SynapseDB, TripleQuery};
//!
//! // Open or create a storage root
//! let db = SynapseDB::open("./synapse", Config::default())?;
//!
//! // Add a noun
//! let id = db.add_noun(
//!     NewNoun::from_vector(embedding, NounType::Concept)
//!         .with_metadata_entry("label", "alpha"),
//! )?;
//!
//! // Vector search
//! let hits = db.search_vector(&query_vector, &Default::default())?;
//!
//! // Triple-intelligence query: similarity + metadata + graph
//! let results = db.find(
//!     TripleQuery::new()
//!         .like_vector(query_vector)
//!         .where_clause(MetadataPredicate::eq("year", 2024i64))
//!         .limit(5),
//! )?;
//!
//! // Clean up
//! db.close()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### Nouns and Verbs
//!
//! A **noun** is a typed entity (31 types: Person, Location, Concept,
//! Document, …) carrying a fixed-dimension vector and free-form
//! metadata. A **verb** is a typed, directed relationship between two
//! nouns (40 types: RelatedTo, Owns, Uses, Contains, …) with weight and
//! confidence scores; its optional vector (averaged from its
//! endpoints) shares the noun index.
//!
//! ### Triple Intelligence
//!
//! [`SynapseDB::find`] fuses three retrieval modalities: HNSW vector
//! similarity, verb-graph traversal, and O(1)-O(log n) metadata
//! predicates, combined by min-max-normalized weighted scoring.
//!
//! ### Soft Delete
//!
//! Deletes set a tombstone in the reserved `_brainy.*` metadata
//! namespace; tombstoned entities drop out of query results immediately
//! and are hard-removed by a periodic cleanup task after an age
//! threshold.
//!
//! ## Thread Safety
//!
//! `SynapseDB` is `Send + Sync` and can be shared across threads using
//! `Arc`. Searches share read guards on the index; writes serialize
//! per entity and flow through a batching writer thread, preceded by a
//! write-ahead log record.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod cache;
mod config;
mod db;
mod error;
mod stats;
mod types;

pub mod embedding;
pub mod pipeline;
pub mod query;
pub mod storage;

// Domain modules
pub mod metadata;
pub mod noun;
pub mod verb;

/// Vector index module: distance functions, the HNSW graph, and the
/// product quantizer backing the optimized variant.
pub mod vector;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main engine interface
pub use db::{
    BackupData, RestoreOptions, SearchOptions, StatisticsOptions, StatisticsReport, SynapseDB,
    SynapseDBBuilder,
};

// Configuration
pub use config::{
    BatchConfig, CacheConfig, CleanupConfig, Config, DedupConfig, HnswConfig, Mode,
    RegistryConfig, RetryPolicy, ThrottlePolicy, TimeoutConfig, MAX_QUERY_LIMIT,
};

// Error handling
pub use error::{NotFoundError, Result, StorageError, SynapseError, ValidationError};

// Core types
pub use types::{EntityRef, NounId, ServiceName, Timestamp, Vector, VerbId};

// Domain types
pub use noun::{NewNoun, Noun, NounData, NounType, NounUpdate};
pub use verb::{NewVerb, Verb, VerbDirection, VerbType};

// Metadata model and predicates
pub use metadata::{MetadataMap, MetadataPredicate, MetadataValue, SystemMetadata};

// Queries
pub use query::{
    ConnectedClause, FusionWeights, LikeClause, QueryHit, QueryMode, QueryParser, QueryResults,
    TripleQuery,
};

// Distance selection
pub use vector::DistanceKind;

// Cache observability
pub use cache::CacheStats;

// Statistics (for advanced users)
pub use stats::{ServiceCounts, StatisticsSnapshot, TypeStatistics};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common SynapseDB usage.
///
/// ```rust
/// use synapsedb::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, Mode};
    pub use crate::db::{SearchOptions, SynapseDB};
    pub use crate::error::{Result, SynapseError};
    pub use crate::metadata::{MetadataPredicate, MetadataValue};
    pub use crate::noun::{NewNoun, Noun, NounType};
    pub use crate::query::{ConnectedClause, QueryMode, TripleQuery};
    pub use crate::types::{NounId, Timestamp, VerbId};
    pub use crate::verb::{NewVerb, Verb, VerbType};
}
