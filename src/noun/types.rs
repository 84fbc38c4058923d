//! Data types for nouns.
//!
//! A **noun** is a typed entity: a 128-bit identifier, a dense vector, a
//! noun type, and free-form metadata. Nouns are the unit of vector search
//! and the endpoints of the verb graph.

use serde::{Deserialize, Serialize};

use crate::metadata::{MetadataMap, SystemMetadata};
use crate::types::{NounId, Timestamp, Vector};

/// The type of a noun.
///
/// Storage is partitioned by noun type (one directory subtree per
/// variant), which makes listing a type an O(1) directory scan and lets
/// per-type counts live in a fixed `u32[31]` array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NounType {
    /// A human being.
    Person,
    /// A physical or virtual place.
    Location,
    /// A generic object.
    Thing,
    /// Something that happened at a point or span of time.
    Event,
    /// An abstract idea.
    Concept,
    /// A piece of authored content.
    Content,
    /// An ordered or unordered grouping of other nouns.
    Collection,
    /// A company, team, or institution.
    Organization,
    /// A structured document.
    Document,
    /// A procedure or workflow.
    Process,
    /// A condition or status.
    State,
    /// A communication payload.
    Message,
    /// Audio, video, or imagery.
    Media,
    /// A file payload (commonly blob-backed).
    File,
    /// A directory in the virtual filesystem.
    Directory,
    /// A unit of work.
    Task,
    /// A long-running body of work.
    Project,
    /// A subject of discussion.
    Topic,
    /// A classification bucket.
    Category,
    /// A free-form label.
    Tag,
    /// A capability or competency.
    Skill,
    /// An instrument used to do work.
    Tool,
    /// A running capability exposed to callers.
    Service,
    /// A sellable or deliverable item.
    Product,
    /// An authenticated principal.
    User,
    /// A set of principals.
    Group,
    /// A physical or virtual machine.
    Device,
    /// A body of structured records.
    Dataset,
    /// A trained model artifact.
    Model,
    /// An installable program.
    Application,
    /// Anything that doesn't fit the taxonomy.
    Custom,
}

impl NounType {
    /// All variants, in stable order.
    ///
    /// The index of a variant in this table is its slot in the persisted
    /// per-type counts array, so the order must never change.
    pub const ALL: [NounType; 31] = [
        NounType::Person,
        NounType::Location,
        NounType::Thing,
        NounType::Event,
        NounType::Concept,
        NounType::Content,
        NounType::Collection,
        NounType::Organization,
        NounType::Document,
        NounType::Process,
        NounType::State,
        NounType::Message,
        NounType::Media,
        NounType::File,
        NounType::Directory,
        NounType::Task,
        NounType::Project,
        NounType::Topic,
        NounType::Category,
        NounType::Tag,
        NounType::Skill,
        NounType::Tool,
        NounType::Service,
        NounType::Product,
        NounType::User,
        NounType::Group,
        NounType::Device,
        NounType::Dataset,
        NounType::Model,
        NounType::Application,
        NounType::Custom,
    ];

    /// Number of variants (the width of the persisted counts array).
    pub const COUNT: usize = Self::ALL.len();

    /// Stable lowercase name, used as the storage directory segment.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Location => "location",
            Self::Thing => "thing",
            Self::Event => "event",
            Self::Concept => "concept",
            Self::Content => "content",
            Self::Collection => "collection",
            Self::Organization => "organization",
            Self::Document => "document",
            Self::Process => "process",
            Self::State => "state",
            Self::Message => "message",
            Self::Media => "media",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Task => "task",
            Self::Project => "project",
            Self::Topic => "topic",
            Self::Category => "category",
            Self::Tag => "tag",
            Self::Skill => "skill",
            Self::Tool => "tool",
            Self::Service => "service",
            Self::Product => "product",
            Self::User => "user",
            Self::Group => "group",
            Self::Device => "device",
            Self::Dataset => "dataset",
            Self::Model => "model",
            Self::Application => "application",
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

impl std::fmt::Display for NounType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored noun, as returned by lookups and search results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Noun {
    /// Unique identifier (UUID v7).
    pub id: NounId,

    /// Type partition this noun lives in.
    pub noun_type: NounType,

    /// Dense vector of the configured dimension.
    pub vector: Vector,

    /// Free-form metadata, including the reserved `_brainy.*` subtree.
    pub metadata: MetadataMap,

    /// When this noun was created.
    pub created_at: Timestamp,

    /// When this noun was last modified.
    pub updated_at: Timestamp,

    /// Service that created this noun.
    pub created_by: String,
}

impl Noun {
    /// Reads the engine-managed system record out of the metadata.
    pub fn system(&self) -> SystemMetadata {
        SystemMetadata::from_metadata(&self.metadata)
    }

    /// Returns true if this noun carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.system().deleted
    }

    /// Returns true if this noun was auto-created as a verb endpoint
    /// placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.system().placeholder
    }
}

/// The data payload of a new noun: either a pre-computed vector or
/// opaque text handed to the embedding collaborator.
#[derive(Clone, Debug)]
pub enum NounData {
    /// Caller-supplied vector (must match the configured dimension).
    Vector(Vector),
    /// Text to embed via the attached embedding service.
    Text(String),
}

/// Input for creating a new noun.
///
/// # Example
///
/// ```rust,ignore
/// use synapsedb::{NewNoun, NounType};
///
/// let id = db.add_noun(NewNoun::from_vector(vec![0.1; 384], NounType::Concept)
///     .with_metadata_entry("label", "alpha"))?;
/// ```
#[derive(Clone, Debug)]
pub struct NewNoun {
    /// Vector or embeddable payload.
    pub data: NounData,

    /// Type partition for the new noun.
    pub noun_type: NounType,

    /// Initial metadata (reserved-namespace keys are ignored).
    pub metadata: MetadataMap,

    /// Service attribution; falls back to the engine default.
    pub service: Option<String>,

    /// External identifier registered for streaming dedup.
    pub external_id: Option<String>,
}

impl NewNoun {
    /// Creates input from a pre-computed vector.
    pub fn from_vector(vector: Vector, noun_type: NounType) -> Self {
        Self {
            data: NounData::Vector(vector),
            noun_type,
            metadata: MetadataMap::new(),
            service: None,
            external_id: None,
        }
    }

    /// Creates input from text to be embedded.
    pub fn from_text(text: impl Into<String>, noun_type: NounType) -> Self {
        Self {
            data: NounData::Text(text.into()),
            noun_type,
            metadata: MetadataMap::new(),
            service: None,
            external_id: None,
        }
    }

    /// Replaces the initial metadata wholesale.
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds a single metadata entry.
    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::metadata::MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the service attribution.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the external identifier for registry dedup.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// Input for updating an existing noun.
///
/// Fields left `None` are unchanged. A new `data` payload triggers
/// re-embedding (for text) and an index re-link; metadata merges into the
/// existing map with the reserved namespace preserved.
#[derive(Clone, Debug, Default)]
pub struct NounUpdate {
    /// Replacement vector or text payload.
    pub data: Option<NounData>,

    /// Metadata entries to merge (Null removes a key).
    pub metadata: Option<MetadataMap>,
}
