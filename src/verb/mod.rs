//! Verb management module.
//!
//! A **verb** is a typed, directed relationship between two nouns,
//! forming the graph the triple-intelligence planner traverses.
//!
//! # Operations
//!
//! All verb operations are available on [`SynapseDB`](crate::SynapseDB):
//!
//! - [`add_verb(input)`](crate::SynapseDB::add_verb)
//! - [`get_verb(id)`](crate::SynapseDB::get_verb)
//! - [`get_verbs_for_noun(id, direction)`](crate::SynapseDB::get_verbs_for_noun)
//! - [`delete_verb(id)`](crate::SynapseDB::delete_verb)
//!
//! # Constraints
//!
//! - Verbs cannot be self-referential (`source != target`)
//! - Both endpoints must exist, unless placeholder auto-creation is
//!   enabled under write-only mode
//! - Weight and confidence must be in `[0.0, 1.0]` when supplied

pub mod types;

pub use types::{NewVerb, Verb, VerbDirection, VerbType};

use crate::error::{SynapseError, ValidationError};
use crate::noun::validate_caller_metadata;

/// Validates a new verb before storage.
///
/// Checks:
/// - Source and target are different nouns (no self-relations)
/// - Weight and confidence, when supplied, are in [0.0, 1.0]
/// - Caller metadata stays out of the reserved namespace
///
/// Does NOT check endpoint existence — that requires storage lookups
/// and is handled by the SynapseDB facade (which may also auto-create
/// placeholder endpoints during streaming ingest).
pub(crate) fn validate_new_verb(input: &NewVerb) -> Result<(), SynapseError> {
    // Self-relation check
    if input.source == input.target {
        return Err(ValidationError::invalid_field(
            "target",
            "cannot create a self-relation (source == target)",
        )
        .into());
    }

    // Weight range
    if let Some(weight) = input.weight {
        if !(0.0..=1.0).contains(&weight) {
            return Err(ValidationError::invalid_field(
                "weight",
                format!("must be between 0.0 and 1.0, got {}", weight),
            )
            .into());
        }
    }

    // Confidence range
    if let Some(confidence) = input.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::invalid_field(
                "confidence",
                format!("must be between 0.0 and 1.0, got {}", confidence),
            )
            .into());
        }
    }

    validate_caller_metadata(&input.metadata)?;

    Ok(())
}
