//! Data types for verbs.
//!
//! Verbs are directed: the semantics describe how the **source** noun
//! relates to the **target** noun. A verb may carry its own vector
//! (averaged from its endpoints), stored in the same HNSW index as noun
//! vectors and distinguished by ID kind.

use serde::{Deserialize, Serialize};

use crate::metadata::{MetadataMap, SystemMetadata};
use crate::types::{NounId, Timestamp, Vector, VerbId};

/// The type of a verb.
///
/// Like noun types, verb storage is partitioned by type, and per-type
/// counts live in a fixed `u32[40]` array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerbType {
    /// General relationship with no specific semantics.
    RelatedTo,
    /// Source owns the target.
    Owns,
    /// Source created the target.
    Creates,
    /// Source uses the target.
    Uses,
    /// Source contains the target.
    Contains,
    /// Source is a member of the target.
    MemberOf,
    /// Source is a part of the target.
    PartOf,
    /// Source is located at the target.
    LocatedAt,
    /// Source depends on the target.
    DependsOn,
    /// Source produces the target.
    Produces,
    /// Source consumes the target.
    Consumes,
    /// Source references the target.
    References,
    /// Source was derived from the target.
    DerivedFrom,
    /// Source describes the target.
    Describes,
    /// Source follows the target in a sequence.
    Follows,
    /// Source precedes the target in a sequence.
    Precedes,
    /// Source causes the target.
    Causes,
    /// Source influences the target.
    Influences,
    /// Source supports or reinforces the target.
    Supports,
    /// Source contradicts the target.
    Contradicts,
    /// Source supersedes or replaces the target.
    Supersedes,
    /// Source implements the target.
    Implements,
    /// Source extends the target.
    Extends,
    /// Source requires the target.
    Requires,
    /// Source provides the target.
    Provides,
    /// Source manages the target.
    Manages,
    /// Source reports to the target.
    ReportsTo,
    /// Source works with the target.
    WorksWith,
    /// Source knows the target.
    Knows,
    /// Source likes the target.
    Likes,
    /// Source dislikes the target.
    Dislikes,
    /// Source mentions the target.
    Mentions,
    /// Source is tagged with the target.
    TaggedWith,
    /// Source belongs to the target.
    BelongsTo,
    /// Source attends the target.
    Attends,
    /// Source authored the target.
    AuthoredBy,
    /// Source publishes the target.
    Publishes,
    /// Source subscribes to the target.
    SubscribesTo,
    /// Source transforms the target.
    Transforms,
    /// Anything that doesn't fit the taxonomy.
    Custom,
}

impl VerbType {
    /// All variants, in stable order.
    ///
    /// The index of a variant in this table is its slot in the persisted
    /// per-type counts array, so the order must never change.
    pub const ALL: [VerbType; 40] = [
        VerbType::RelatedTo,
        VerbType::Owns,
        VerbType::Creates,
        VerbType::Uses,
        VerbType::Contains,
        VerbType::MemberOf,
        VerbType::PartOf,
        VerbType::LocatedAt,
        VerbType::DependsOn,
        VerbType::Produces,
        VerbType::Consumes,
        VerbType::References,
        VerbType::DerivedFrom,
        VerbType::Describes,
        VerbType::Follows,
        VerbType::Precedes,
        VerbType::Causes,
        VerbType::Influences,
        VerbType::Supports,
        VerbType::Contradicts,
        VerbType::Supersedes,
        VerbType::Implements,
        VerbType::Extends,
        VerbType::Requires,
        VerbType::Provides,
        VerbType::Manages,
        VerbType::ReportsTo,
        VerbType::WorksWith,
        VerbType::Knows,
        VerbType::Likes,
        VerbType::Dislikes,
        VerbType::Mentions,
        VerbType::TaggedWith,
        VerbType::BelongsTo,
        VerbType::Attends,
        VerbType::AuthoredBy,
        VerbType::Publishes,
        VerbType::SubscribesTo,
        VerbType::Transforms,
        VerbType::Custom,
    ];

    /// Number of variants (the width of the persisted counts array).
    pub const COUNT: usize = Self::ALL.len();

    /// Stable lowercase name, used as the storage directory segment.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RelatedTo => "related_to",
            Self::Owns => "owns",
            Self::Creates => "creates",
            Self::Uses => "uses",
            Self::Contains => "contains",
            Self::MemberOf => "member_of",
            Self::PartOf => "part_of",
            Self::LocatedAt => "located_at",
            Self::DependsOn => "depends_on",
            Self::Produces => "produces",
            Self::Consumes => "consumes",
            Self::References => "references",
            Self::DerivedFrom => "derived_from",
            Self::Describes => "describes",
            Self::Follows => "follows",
            Self::Precedes => "precedes",
            Self::Causes => "causes",
            Self::Influences => "influences",
            Self::Supports => "supports",
            Self::Contradicts => "contradicts",
            Self::Supersedes => "supersedes",
            Self::Implements => "implements",
            Self::Extends => "extends",
            Self::Requires => "requires",
            Self::Provides => "provides",
            Self::Manages => "manages",
            Self::ReportsTo => "reports_to",
            Self::WorksWith => "works_with",
            Self::Knows => "knows",
            Self::Likes => "likes",
            Self::Dislikes => "dislikes",
            Self::Mentions => "mentions",
            Self::TaggedWith => "tagged_with",
            Self::BelongsTo => "belongs_to",
            Self::Attends => "attends",
            Self::AuthoredBy => "authored_by",
            Self::Publishes => "publishes",
            Self::SubscribesTo => "subscribes_to",
            Self::Transforms => "transforms",
            Self::Custom => "custom",
        }
    }

    /// Parses a storage directory segment back to a variant.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Slot of this variant in the persisted counts array.
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|t| t == self)
            .expect("variant present in ALL")
    }
}

impl std::fmt::Display for VerbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction for querying verbs from a given noun.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerbDirection {
    /// Verbs where the noun is the source (source → target).
    Outgoing,
    /// Verbs where the noun is the target (source → target).
    Incoming,
    /// Both outgoing and incoming verbs.
    Both,
}

/// A stored relationship between two nouns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Verb {
    /// Unique identifier (UUID v7).
    pub id: VerbId,

    /// The noun this verb originates from.
    pub source: NounId,

    /// The noun this verb points to.
    pub target: NounId,

    /// Type partition this verb lives in.
    pub verb_type: VerbType,

    /// Strength of the relation (0.0 = weak, 1.0 = strong).
    pub weight: f32,

    /// Confidence in the relation (0.0 - 1.0).
    pub confidence: f32,

    /// Optional vector (averaged from endpoint vectors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vector>,

    /// Free-form metadata, including the reserved `_brainy.*` subtree.
    pub metadata: MetadataMap,

    /// When this verb was created.
    pub created_at: Timestamp,

    /// When this verb was last modified.
    pub updated_at: Timestamp,

    /// Service that created this verb.
    pub created_by: String,
}

impl Verb {
    /// Reads the engine-managed system record out of the metadata.
    pub fn system(&self) -> SystemMetadata {
        SystemMetadata::from_metadata(&self.metadata)
    }

    /// Returns true if this verb carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.system().deleted
    }
}

/// Input for creating a new verb.
///
/// Weight and confidence left `None` are computed by the verb-scoring
/// augmentation from endpoint proximity, pair frequency, and age.
#[derive(Clone, Debug)]
pub struct NewVerb {
    /// The noun this verb originates from.
    pub source: NounId,

    /// The noun this verb points to.
    pub target: NounId,

    /// Type of relationship.
    pub verb_type: VerbType,

    /// Strength of the relation (0.0 - 1.0).
    pub weight: Option<f32>,

    /// Confidence in the relation (0.0 - 1.0).
    pub confidence: Option<f32>,

    /// Initial metadata (reserved-namespace keys are rejected).
    pub metadata: MetadataMap,

    /// Service attribution; falls back to the engine default.
    pub service: Option<String>,
}

impl NewVerb {
    /// Creates input connecting `source` to `target`.
    pub fn new(source: NounId, target: NounId, verb_type: VerbType) -> Self {
        Self {
            source,
            target,
            verb_type,
            weight: None,
            confidence: None,
            metadata: MetadataMap::new(),
            service: None,
        }
    }

    /// Sets an explicit weight.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Sets an explicit confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Replaces the initial metadata wholesale.
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the service attribution.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_type_table_width() {
        assert_eq!(VerbType::ALL.len(), 40);
        assert_eq!(VerbType::COUNT, 40);
    }

    #[test]
    fn test_verb_type_names_unique_and_parseable() {
        let mut seen = std::collections::HashSet::new();
        for t in VerbType::ALL {
            assert!(seen.insert(t.as_str()), "duplicate name {}", t.as_str());
            assert_eq!(VerbType::parse(t.as_str()), Some(t));
        }
        assert_eq!(VerbType::parse("nonsense"), None);
    }

    #[test]
    fn test_verb_type_index_stable() {
        assert_eq!(VerbType::RelatedTo.index(), 0);
        assert_eq!(VerbType::Custom.index(), 39);
        for (i, t) in VerbType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }

    #[test]
    fn test_verb_serde_roundtrip() {
        let verb = Verb {
            id: VerbId::new(),
            source: NounId::new(),
            target: NounId::new(),
            verb_type: VerbType::Supports,
            weight: 0.85,
            confidence: 0.9,
            vector: Some(vec![0.5; 8]),
            metadata: MetadataMap::new(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        };

        let json = serde_json::to_string(&verb).unwrap();
        let restored: Verb = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, verb.id);
        assert_eq!(restored.source, verb.source);
        assert_eq!(restored.target, verb.target);
        assert_eq!(restored.verb_type, verb.verb_type);
        assert_eq!(restored.weight, verb.weight);
        assert_eq!(restored.vector, verb.vector);
    }

    #[test]
    fn test_verb_without_vector_omits_field() {
        let verb = Verb {
            id: VerbId::new(),
            source: NounId::new(),
            target: NounId::new(),
            verb_type: VerbType::RelatedTo,
            weight: 0.5,
            confidence: 0.5,
            vector: None,
            metadata: MetadataMap::new(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        };
        let json = serde_json::to_value(&verb).unwrap();
        assert!(json.get("vector").is_none());
    }

    #[test]
    fn test_new_verb_builders() {
        let source = NounId::new();
        let target = NounId::new();
        let input = NewVerb::new(source, target, VerbType::Uses)
            .with_weight(0.7)
            .with_confidence(0.6)
            .with_service("linker");

        assert_eq!(input.source, source);
        assert_eq!(input.target, target);
        assert_eq!(input.weight, Some(0.7));
        assert_eq!(input.confidence, Some(0.6));
        assert_eq!(input.service.as_deref(), Some("linker"));
    }

    #[test]
    fn test_verb_direction_variants() {
        assert_ne!(VerbDirection::Outgoing, VerbDirection::Incoming);
        assert_ne!(VerbDirection::Outgoing, VerbDirection::Both);
        assert_ne!(VerbDirection::Incoming, VerbDirection::Both);
    }
}
