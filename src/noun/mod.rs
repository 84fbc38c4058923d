//! Noun management module.
//!
//! A **noun** is a typed entity carrying a dense vector and free-form
//! metadata. Nouns are the unit of vector search and the endpoints of
//! the verb graph.
//!
//! # Operations
//!
//! All noun operations are available on [`SynapseDB`](crate::SynapseDB):
//!
//! - [`add_noun(input)`](crate::SynapseDB::add_noun)
//! - [`get_noun(id)`](crate::SynapseDB::get_noun)
//! - [`update_noun(id, update)`](crate::SynapseDB::update_noun)
//! - [`delete_noun(id)`](crate::SynapseDB::delete_noun) (soft delete)
//! - [`restore_noun(id)`](crate::SynapseDB::restore_noun)
//!
//! # Constraints
//!
//! - Vectors must match the configured dimension exactly
//! - Text payloads require an attached embedding service
//! - The reserved `_brainy.*` metadata namespace is engine-managed

pub mod types;

pub use types::{NewNoun, Noun, NounData, NounType, NounUpdate};

use crate::error::{SynapseError, ValidationError};

/// Validates a [`NewNoun`] before storage.
///
/// # Rules
///
/// - Vector payloads must have exactly `dimensions` components
/// - Text payloads must be non-empty (embedding happens later; the
///   embedding service may still reject them)
/// - Caller metadata must not write into the reserved namespace
pub(crate) fn validate_new_noun(input: &NewNoun, dimensions: usize) -> Result<(), SynapseError> {
    match &input.data {
        NounData::Vector(vector) => {
            if vector.len() != dimensions {
                return Err(
                    ValidationError::dimension_mismatch(dimensions, vector.len()).into(),
                );
            }
            if vector.iter().any(|c| !c.is_finite()) {
                return Err(ValidationError::invalid_field(
                    "data",
                    "vector components must be finite",
                )
                .into());
            }
        }
        NounData::Text(text) => {
            if text.is_empty() {
                return Err(ValidationError::required_field("data").into());
            }
        }
    }

    validate_caller_metadata(&input.metadata)?;

    Ok(())
}

/// Validates a [`NounUpdate`] before applying.
pub(crate) fn validate_noun_update(
    update: &NounUpdate,
    dimensions: usize,
) -> Result<(), SynapseError> {
    if let Some(ref data) = update.data {
        match data {
            NounData::Vector(vector) => {
                if vector.len() != dimensions {
                    return Err(
                        ValidationError::dimension_mismatch(dimensions, vector.len()).into(),
                    );
                }
            }
            NounData::Text(text) => {
                if text.is_empty() {
                    return Err(ValidationError::required_field("data").into());
                }
            }
        }
    }

    if let Some(ref metadata) = update.metadata {
        validate_caller_metadata(metadata)?;
    }

    Ok(())
}

/// Rejects caller writes into the reserved metadata namespace.
///
/// The merge path silently drops such keys; the create/update paths
/// reject them loudly so callers learn about the namespace early.
pub(crate) fn validate_caller_metadata(
    metadata: &crate::metadata::MetadataMap,
) -> Result<(), SynapseError> {
    for key in metadata.keys() {
        if key == crate::metadata::SYSTEM_NAMESPACE || key.starts_with("_brainy.") {
            return Err(ValidationError::invalid_field(
                key.clone(),
                "the _brainy.* namespace is reserved for engine-managed metadata",
            )
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataMap, MetadataValue};

    #[test]
    fn test_valid_vector_noun_passes() {
        let input = NewNoun::from_vector(vec![0.5; 384], NounType::Concept);
        assert!(validate_new_noun(&input, 384).is_ok());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let input = NewNoun::from_vector(vec![0.5, 0.5], NounType::Concept);
        let err = validate_new_noun(&input, 384).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("expected 384, got 2"));
    }

    #[test]
    fn test_non_finite_vector_rejected() {
        let mut vector = vec![0.5; 384];
        vector[7] = f32::NAN;
        let input = NewNoun::from_vector(vector, NounType::Concept);
        assert!(validate_new_noun(&input, 384).is_err());
    }

    #[test]
    fn test_empty_text_rejected() {
        let input = NewNoun::from_text("", NounType::Concept);
        let err = validate_new_noun(&input, 384).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_text_noun_passes_without_dimension_check() {
        let input = NewNoun::from_text("some content", NounType::Document);
        assert!(validate_new_noun(&input, 384).is_ok());
    }

    #[test]
    fn test_reserved_namespace_write_rejected() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "_brainy.deleted".to_string(),
            MetadataValue::Bool(true),
        );
        let input =
            NewNoun::from_vector(vec![0.5; 8], NounType::Concept).with_metadata(metadata);
        let err = validate_new_noun(&input, 8).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_update_empty_passes() {
        assert!(validate_noun_update(&NounUpdate::default(), 384).is_ok());
    }

    #[test]
    fn test_update_vector_dimension_checked() {
        let update = NounUpdate {
            data: Some(NounData::Vector(vec![0.1; 16])),
            metadata: None,
        };
        assert!(validate_noun_update(&update, 384).is_err());
        assert!(validate_noun_update(&update, 16).is_ok());
    }

    #[test]
    fn test_update_reserved_namespace_rejected() {
        let mut metadata = MetadataMap::new();
        metadata.insert("_brainy".to_string(), MetadataValue::Bool(true));
        let update = NounUpdate {
            data: None,
            metadata: Some(metadata),
        };
        assert!(validate_noun_update(&update, 384).is_err());
    }
}
