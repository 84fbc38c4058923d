//! Storage layout: paths, shards, and content-hash sentinels.
//!
//! Entities live under type-partitioned, sharded paths:
//!
//! ```text
//! entities/{nouns|verbs}/{type}/{vectors|metadata}/{shard}/{uuid}.json
//! ```
//!
//! Partitioning by type makes "list everything of type X" an O(1)
//! directory walk, and the shard segment (first UUID byte, 256 buckets)
//! keeps per-directory cardinality bounded. System documents live under
//! `_system/`, content-addressed payloads under `blobs/`, and the
//! write-ahead log under `wal/`.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::noun::NounType;
use crate::verb::VerbType;

/// The 64-zero sentinel hash denoting "empty tree / no parent" in the
/// copy-on-write commit graph. Never a valid content hash.
pub const NULL_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Directory for system documents (statistics, index snapshots).
pub const SYSTEM_DIR: &str = "_system";

/// Directory for content-addressed blob payloads.
pub const BLOBS_DIR: &str = "blobs";

/// Directory for write-ahead log segments.
pub const WAL_DIR: &str = "wal";

/// Directory for copy-on-write commits.
pub const COMMITS_DIR: &str = "commits";

/// Returns true if `hash` is the null-hash sentinel.
#[inline]
pub fn is_null_hash(hash: &str) -> bool {
    hash == NULL_HASH
}

/// Returns true if `hash` is a valid content hash: 64 lowercase hex
/// characters and not the null sentinel.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && !is_null_hash(hash)
}

/// Shard bucket for a UUID: two lowercase hex digits of its first byte.
#[inline]
pub fn shard_of(id: &Uuid) -> String {
    format!("{:02x}", id.as_bytes()[0])
}

/// Prefix bucket for a content hash (first two hex digits).
#[inline]
pub fn blob_prefix(hash: &str) -> &str {
    &hash[..2.min(hash.len())]
}

/// Which half of an entity record a path addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    /// The vector record: `{id, vector, level, neighbors}`.
    Vectors,
    /// The metadata record: namespaced metadata plus entity fields.
    Metadata,
}

impl RecordKind {
    const fn segment(&self) -> &'static str {
        match self {
            Self::Vectors => "vectors",
            Self::Metadata => "metadata",
        }
    }
}

/// Path of a noun record.
pub fn noun_path(root: &Path, noun_type: NounType, kind: RecordKind, id: &Uuid) -> PathBuf {
    root.join("entities")
        .join("nouns")
        .join(noun_type.as_str())
        .join(kind.segment())
        .join(shard_of(id))
        .join(format!("{}.json", id))
}

/// Path of a verb record.
pub fn verb_path(root: &Path, verb_type: VerbType, kind: RecordKind, id: &Uuid) -> PathBuf {
    root.join("entities")
        .join("verbs")
        .join(verb_type.as_str())
        .join(kind.segment())
        .join(shard_of(id))
        .join(format!("{}.json", id))
}

/// Directory holding all records of one noun type and record kind.
pub fn noun_type_dir(root: &Path, noun_type: NounType, kind: RecordKind) -> PathBuf {
    root.join("entities")
        .join("nouns")
        .join(noun_type.as_str())
        .join(kind.segment())
}

/// Directory holding all records of one verb type and record kind.
pub fn verb_type_dir(root: &Path, verb_type: VerbType, kind: RecordKind) -> PathBuf {
    root.join("entities")
        .join("verbs")
        .join(verb_type.as_str())
        .join(kind.segment())
}

/// Path of a named system document.
pub fn system_doc_path(root: &Path, name: &str) -> PathBuf {
    root.join(SYSTEM_DIR).join(format!("{}.json", name))
}

/// Path of a blob payload.
pub fn blob_path(root: &Path, hash: &str) -> PathBuf {
    root.join(BLOBS_DIR).join(blob_prefix(hash)).join(hash)
}

/// Path of a blob's refcount sidecar.
pub fn blob_meta_path(root: &Path, hash: &str) -> PathBuf {
    root.join(BLOBS_DIR)
        .join(blob_prefix(hash))
        .join(format!("{}.meta", hash))
}

/// Path of a copy-on-write commit record.
pub fn commit_path(root: &Path, hash: &str) -> PathBuf {
    root.join(COMMITS_DIR)
        .join(blob_prefix(hash))
        .join(format!("{}.json", hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_hash_shape() {
        assert_eq!(NULL_HASH.len(), 64);
        assert!(NULL_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_is_null_hash() {
        assert!(is_null_hash(NULL_HASH));
        assert!(!is_null_hash(&"a".repeat(64)));
    }

    #[test]
    fn test_is_valid_hash_accepts_real_hashes() {
        let hash = "a3f5c9e1d7b2468013579bdf2468ace013579bdf2468ace013579bdf2468ace0";
        assert_eq!(hash.len(), 64);
        assert!(is_valid_hash(hash));
    }

    #[test]
    fn test_is_valid_hash_rejects_null_hash() {
        // The sentinel matches the hex shape but must never validate
        assert!(!is_valid_hash(NULL_HASH));
    }

    #[test]
    fn test_is_valid_hash_rejects_bad_shapes() {
        assert!(!is_valid_hash(""));
        assert!(!is_valid_hash("abc"));
        assert!(!is_valid_hash(&"A".repeat(64))); // uppercase
        assert!(!is_valid_hash(&"g".repeat(64))); // non-hex
        assert!(!is_valid_hash(&"a".repeat(63)));
        assert!(!is_valid_hash(&"a".repeat(65)));
    }

    #[test]
    fn test_shard_of_uses_first_byte() {
        let id = Uuid::from_u128(0xab_000000_0000_0000_0000_000000000000u128);
        assert_eq!(shard_of(&id), "ab");

        let id = Uuid::from_u128(5);
        assert_eq!(shard_of(&id), "00");
    }

    #[test]
    fn test_noun_path_shape() {
        let root = Path::new("/data");
        let id = Uuid::from_u128(0xff_000000_0000_0000_0000_000000000001u128);
        let path = noun_path(root, NounType::Concept, RecordKind::Vectors, &id);
        let expected = format!("/data/entities/nouns/concept/vectors/ff/{}.json", id);
        assert_eq!(path, PathBuf::from(expected));
    }

    #[test]
    fn test_verb_path_shape() {
        let root = Path::new("/data");
        let id = Uuid::from_u128(1);
        let path = verb_path(root, VerbType::RelatedTo, RecordKind::Metadata, &id);
        let expected = format!("/data/entities/verbs/related_to/metadata/00/{}.json", id);
        assert_eq!(path, PathBuf::from(expected));
    }

    #[test]
    fn test_blob_paths() {
        let root = Path::new("/data");
        let hash = "ab".repeat(32);
        assert_eq!(
            blob_path(root, &hash),
            PathBuf::from(format!("/data/blobs/ab/{}", hash))
        );
        assert_eq!(
            blob_meta_path(root, &hash),
            PathBuf::from(format!("/data/blobs/ab/{}.meta", hash))
        );
    }

    #[test]
    fn test_system_doc_path() {
        let root = Path::new("/data");
        assert_eq!(
            system_doc_path(root, "statistics"),
            PathBuf::from("/data/_system/statistics.json")
        );
    }
}
