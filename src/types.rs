//! Core type definitions for SynapseDB identifiers and timestamps.
//!
//! This module defines the fundamental ID types used throughout SynapseDB.
//! All ID types use UUID v7 for time-ordered unique identification.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Noun identifier (UUID v7 for time-ordering).
///
/// Nouns are the typed entities of the graph. Each noun carries a dense
/// vector and free-form metadata, and is addressable by this ID across
/// the storage layout, the HNSW index, and the metadata index.
///
/// # Example
/// ```
/// use synapsedb::NounId;
///
/// let id = NounId::new();
/// println!("Created noun: {}", id);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NounId(pub Uuid);

impl NounId {
    /// Creates a new NounId with a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a nil (all zeros) NounId.
    ///
    /// This is the virtual-filesystem root sentinel
    /// (`00000000-0000-0000-0000-000000000000`), never assigned to a
    /// user-created noun.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns the raw UUID bytes for storage.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Creates a NounId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parses a NounId from its canonical hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for NounId {
    /// Returns a nil (all zeros) NounId.
    ///
    /// For a new unique ID, use [`NounId::new()`].
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for NounId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verb identifier (UUID v7 for time-ordering).
///
/// Verbs are directed, typed relationships between two nouns. A verb's
/// optional vector shares the noun HNSW index, distinguished by this
/// ID kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VerbId(pub Uuid);

impl VerbId {
    /// Creates a new VerbId with a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a nil (all zeros) VerbId.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns the raw UUID bytes for storage.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Creates a VerbId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parses a VerbId from its canonical hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for VerbId {
    /// Returns a nil (all zeros) VerbId.
    ///
    /// For a new unique ID, use [`VerbId::new()`].
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for VerbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to either kind of vector-carrying entity.
///
/// The HNSW index stores noun and verb vectors in a single graph; this
/// enum is the node identity that keeps the two ID spaces distinct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    /// A noun's vector.
    Noun(NounId),
    /// A verb's vector.
    Verb(VerbId),
}

impl EntityRef {
    /// Returns the inner UUID regardless of kind.
    #[inline]
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Noun(id) => id.0,
            Self::Verb(id) => id.0,
        }
    }

    /// Returns the noun ID if this references a noun.
    #[inline]
    pub fn as_noun(&self) -> Option<NounId> {
        match self {
            Self::Noun(id) => Some(*id),
            Self::Verb(_) => None,
        }
    }

    /// Returns the verb ID if this references a verb.
    #[inline]
    pub fn as_verb(&self) -> Option<VerbId> {
        match self {
            Self::Noun(_) => None,
            Self::Verb(id) => Some(*id),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noun(id) => write!(f, "noun:{}", id),
            Self::Verb(id) => write!(f, "verb:{}", id),
        }
    }
}

/// Unix timestamp in milliseconds.
///
/// Using i64 allows representing dates far into the future and past.
/// Millisecond precision is sufficient for write ordering and cleanup
/// age thresholds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    ///
    /// If the system clock is before the Unix epoch (should never happen
    /// in practice), returns a timestamp of 0 (epoch) rather than panicking.
    #[inline]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Creates a timestamp from Unix milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns big-endian bytes for storage (enables lexicographic ordering).
    #[inline]
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Returns the elapsed milliseconds from `earlier` to `self`,
    /// saturating at zero if `earlier` is in the future.
    #[inline]
    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).max(0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vector type alias.
///
/// Vectors are f32 slices of the dimension configured at open time
/// (default 384).
pub type Vector = Vec<f32>;

/// Caller-identified service namespace.
///
/// SynapseDB doesn't handle authentication - callers tag their writes with
/// a service name, which attributes statistics and throttle telemetry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl ServiceName {
    /// Creates a new ServiceName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the service name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServiceName {
    /// The default attribution for untagged writes.
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noun_id_new_is_unique() {
        let id1 = NounId::new();
        let id2 = NounId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_noun_id_nil_is_vfs_root() {
        let id = NounId::nil();
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_noun_id_bytes_roundtrip() {
        let id = NounId::new();
        let bytes = *id.as_bytes();
        let restored = NounId::from_bytes(bytes);
        assert_eq!(id, restored);
    }

    #[test]
    fn test_noun_id_parse_roundtrip() {
        let id = NounId::new();
        let restored = NounId::parse(&id.to_string()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn test_noun_id_parse_rejects_garbage() {
        assert!(NounId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn test_verb_id_new_is_unique() {
        let id1 = VerbId::new();
        let id2 = VerbId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_verb_id_bytes_roundtrip() {
        let id = VerbId::new();
        let bytes = *id.as_bytes();
        let restored = VerbId::from_bytes(bytes);
        assert_eq!(id, restored);
    }

    #[test]
    fn test_entity_ref_kinds_are_distinct() {
        let uuid = uuid::Uuid::now_v7();
        let noun = EntityRef::Noun(NounId(uuid));
        let verb = EntityRef::Verb(VerbId(uuid));
        assert_ne!(noun, verb);
        assert_eq!(noun.uuid(), verb.uuid());
        assert!(noun.as_noun().is_some());
        assert!(noun.as_verb().is_none());
        assert!(verb.as_verb().is_some());
    }

    #[test]
    fn test_entity_ref_serialization() {
        let entity = EntityRef::Noun(NounId::new());
        let json = serde_json::to_string(&entity).unwrap();
        let restored: EntityRef = serde_json::from_str(&json).unwrap();
        assert_eq!(entity, restored);
    }

    #[test]
    fn test_timestamp_now() {
        let t1 = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let t2 = Timestamp::now();
        assert!(t1 < t2, "Timestamps should be ordered");
    }

    #[test]
    fn test_timestamp_ordering() {
        let t1 = Timestamp::from_millis(1000);
        let t2 = Timestamp::from_millis(2000);
        assert!(t1 < t2);
    }

    #[test]
    fn test_timestamp_be_bytes() {
        // Big-endian ensures lexicographic ordering matches numeric ordering
        let t1 = Timestamp::from_millis(100);
        let t2 = Timestamp::from_millis(200);
        assert!(t1.to_be_bytes() < t2.to_be_bytes());
    }

    #[test]
    fn test_timestamp_millis_since_saturates() {
        let earlier = Timestamp::from_millis(1000);
        let later = Timestamp::from_millis(4000);
        assert_eq!(later.millis_since(earlier), 3000);
        assert_eq!(earlier.millis_since(later), 0);
    }

    #[test]
    fn test_service_name() {
        let svc = ServiceName::new("ingest-worker");
        assert_eq!(svc.as_str(), "ingest-worker");
        assert_eq!(format!("{}", svc), "ingest-worker");
        assert_eq!(ServiceName::default().as_str(), "default");
    }
}
