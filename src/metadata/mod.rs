//! Metadata model, predicates, and the inverted index.
//!
//! Entity metadata is a tree of typed values ([`MetadataValue`]) with a
//! reserved `_brainy.*` subtree for engine-managed state
//! ([`SystemMetadata`]): tombstones, placeholder markers, and
//! attribution. Queries filter on metadata through
//! [`MetadataPredicate`], answered in O(1)-O(log n) by the
//! [`MetadataIndex`].

mod index;
mod predicate;
mod value;

pub use index::{IndexKey, MetadataIndex, MetadataIndexSnapshot, Partition};
pub use predicate::MetadataPredicate;
pub use value::{
    flatten, get_path, merge_preserving_system, MetadataMap, MetadataValue, SystemMetadata,
    CREATED_BY_KEY, DELETED_AT_KEY, DELETED_KEY, PLACEHOLDER_KEY, SYSTEM_NAMESPACE,
};
