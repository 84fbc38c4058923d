//! Metadata value model.
//!
//! Entity metadata is a tree of [`MetadataValue`] nodes keyed by string
//! paths. The model is a closed tagged union over JSON-compatible shapes,
//! so any metadata written through the API round-trips losslessly through
//! the sharded JSON storage layout.
//!
//! Nested fields are addressed with dotted paths (`"author.name"`). The
//! reserved `_brainy.*` subtree carries engine-managed state (tombstones,
//! placeholder markers, attribution) and is modeled by the typed
//! [`SystemMetadata`] record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Reserved metadata namespace for engine-managed fields.
pub const SYSTEM_NAMESPACE: &str = "_brainy";

/// Key of the tombstone flag (`_brainy.deleted`).
pub const DELETED_KEY: &str = "_brainy.deleted";

/// Key of the tombstone timestamp (`_brainy.deletedAt`).
pub const DELETED_AT_KEY: &str = "_brainy.deletedAt";

/// Key of the placeholder marker (`_brainy.isPlaceholder`).
pub const PLACEHOLDER_KEY: &str = "_brainy.isPlaceholder";

/// Key of the creator-service attribution (`_brainy.createdBy`).
pub const CREATED_BY_KEY: &str = "_brainy.createdBy";

/// A single metadata value.
///
/// Serializes untagged, so metadata files contain natural JSON
/// (`{"label": "alpha", "year": 2024}`) rather than enum wrappers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list of values.
    List(Vec<MetadataValue>),
    /// Nested mapping.
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Returns true for scalar values (indexable leaf nodes).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_)
        )
    }

    /// Returns the boolean payload, if this is a Bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a Str.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric payload widened to f64, if numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Entity metadata: a flat map of dotted-path keys to values.
///
/// Values may themselves be nested maps; [`flatten`] produces the
/// scalar (path, value) pairs the metadata index consumes.
pub type MetadataMap = BTreeMap<String, MetadataValue>;

/// Looks up a value by dotted path, descending through nested maps.
///
/// `get_path(&meta, "author.name")` first tries the literal key
/// `"author.name"`, then walks `meta["author"]["name"]`.
pub fn get_path<'a>(meta: &'a MetadataMap, path: &str) -> Option<&'a MetadataValue> {
    if let Some(v) = meta.get(path) {
        return Some(v);
    }
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = meta.get(first)?;
    for segment in segments {
        match current {
            MetadataValue::Map(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Flattens metadata into scalar (dotted path, value) pairs.
///
/// Nested maps contribute their leaves under joined paths; list elements
/// contribute under the list's own path (so a tag list indexes each tag).
/// Non-scalar leaves (empty maps, nested lists) are skipped.
pub fn flatten(meta: &MetadataMap) -> Vec<(String, MetadataValue)> {
    let mut out = Vec::new();
    for (key, value) in meta {
        flatten_into(key.clone(), value, &mut out);
    }
    out
}

fn flatten_into(path: String, value: &MetadataValue, out: &mut Vec<(String, MetadataValue)>) {
    match value {
        MetadataValue::Map(map) => {
            for (key, nested) in map {
                flatten_into(format!("{}.{}", path, key), nested, out);
            }
        }
        MetadataValue::List(items) => {
            for item in items {
                if item.is_scalar() {
                    out.push((path.clone(), item.clone()));
                }
            }
        }
        scalar => out.push((path, scalar.clone())),
    }
}

/// Merges `update` into `existing`, preserving the reserved namespace.
///
/// Caller-supplied keys under `_brainy.*` are ignored; all other keys
/// overwrite. A `Null` update value removes the key.
pub fn merge_preserving_system(existing: &mut MetadataMap, update: MetadataMap) {
    for (key, value) in update {
        if key == SYSTEM_NAMESPACE || key.starts_with("_brainy.") {
            continue;
        }
        match value {
            MetadataValue::Null => {
                existing.remove(&key);
            }
            other => {
                existing.insert(key, other);
            }
        }
    }
}

/// Engine-managed state stored in the reserved `_brainy.*` namespace.
///
/// Converted losslessly to and from metadata keys so the tombstone and
/// placeholder flags remain visible to the metadata index (which is how
/// soft-deleted entities are excluded from queries).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    /// Tombstone flag. Soft-deleted entities stay in storage and in the
    /// HNSW graph until the cleanup pass hard-removes them.
    pub deleted: bool,

    /// When the tombstone was set.
    pub deleted_at: Option<Timestamp>,

    /// Marks a noun auto-created to satisfy a verb endpoint during
    /// streaming ingest. Placeholders are excluded from search results.
    pub placeholder: bool,

    /// Service that created the entity.
    pub created_by: Option<String>,
}

impl SystemMetadata {
    /// Reads the system record out of an entity's metadata map.
    ///
    /// Absent keys read as defaults; in particular a missing tombstone
    /// flag reads as `deleted = false`.
    pub fn from_metadata(meta: &MetadataMap) -> Self {
        Self {
            deleted: get_path(meta, DELETED_KEY)
                .and_then(MetadataValue::as_bool)
                .unwrap_or(false),
            deleted_at: get_path(meta, DELETED_AT_KEY)
                .and_then(MetadataValue::as_f64)
                .map(|ms| Timestamp::from_millis(ms as i64)),
            placeholder: get_path(meta, PLACEHOLDER_KEY)
                .and_then(MetadataValue::as_bool)
                .unwrap_or(false),
            created_by: get_path(meta, CREATED_BY_KEY)
                .and_then(MetadataValue::as_str)
                .map(str::to_string),
        }
    }

    /// Writes the system record into an entity's metadata map.
    ///
    /// Always writes the tombstone flag (the index relies on a positive
    /// `deleted=false` posting); other keys are written only when set.
    pub fn apply_to(&self, meta: &mut MetadataMap) {
        meta.insert(DELETED_KEY.to_string(), MetadataValue::Bool(self.deleted));
        match self.deleted_at {
            Some(ts) => {
                meta.insert(
                    DELETED_AT_KEY.to_string(),
                    MetadataValue::Int(ts.as_millis()),
                );
            }
            None => {
                meta.remove(DELETED_AT_KEY);
            }
        }
        if self.placeholder {
            meta.insert(PLACEHOLDER_KEY.to_string(), MetadataValue::Bool(true));
        } else {
            meta.remove(PLACEHOLDER_KEY);
        }
        if let Some(ref service) = self.created_by {
            meta.insert(
                CREATED_BY_KEY.to_string(),
                MetadataValue::Str(service.clone()),
            );
        }
    }
}
