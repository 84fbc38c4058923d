//! Fusion scoring for triple-intelligence results.
//!
//! Each retrieval modality (vector similarity, metadata match, graph
//! proximity) produces raw scores for its candidates. Raw scores are
//! min-max normalized within the returned set of their own modality,
//! then combined as a weighted sum. Ties break toward higher vector
//! similarity, then smaller id.

use serde::{Deserialize, Serialize};

use crate::types::NounId;

/// Weights for the fused score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    /// Weight of normalized vector similarity.
    pub vector: f32,
    /// Weight of the metadata match indicator.
    pub metadata: f32,
    /// Weight of normalized graph proximity.
    pub graph: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.5,
            metadata: 0.3,
            graph: 0.2,
        }
    }
}

/// One candidate with its raw per-modality scores.
///
/// A modality the candidate wasn't retrieved by is `None` and
/// contributes zero to the fused score.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// The candidate noun.
    pub id: NounId,
    /// Raw vector similarity (higher is more similar).
    pub vector_similarity: Option<f32>,
    /// Metadata predicate match indicator (1.0 matched, 0.0 not).
    pub metadata_match: Option<f32>,
    /// Raw graph proximity (higher is closer).
    pub graph_proximity: Option<f32>,
}

impl Candidate {
    /// A candidate with no scores yet.
    pub fn new(id: NounId) -> Self {
        Self {
            id,
            vector_similarity: None,
            metadata_match: None,
            graph_proximity: None,
        }
    }
}

/// A candidate with its fused score.
#[derive(Clone, Debug)]
pub struct Scored {
    /// The candidate noun.
    pub id: NounId,
    /// Weighted fused score.
    pub score: f32,
    /// Normalized vector similarity, when retrieved by vector search.
    pub vector_similarity: Option<f32>,
    /// Metadata match indicator.
    pub metadata_match: Option<f32>,
    /// Normalized graph proximity, when retrieved by traversal.
    pub graph_proximity: Option<f32>,
}

/// Fuses candidates into a ranked list, best first.
pub fn fuse(candidates: Vec<Candidate>, weights: &FusionWeights) -> Vec<Scored> {
    let vector_range = range_of(candidates.iter().filter_map(|c| c.vector_similarity));
    let graph_range = range_of(candidates.iter().filter_map(|c| c.graph_proximity));

    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|c| {
            let vector = c.vector_similarity.map(|v| normalize(v, vector_range));
            let graph = c.graph_proximity.map(|v| normalize(v, graph_range));
            // The match indicator is already in [0, 1]
            let metadata = c.metadata_match;

            let score = weights.vector * vector.unwrap_or(0.0)
                + weights.metadata * metadata.unwrap_or(0.0)
                + weights.graph * graph.unwrap_or(0.0);

            Scored {
                id: c.id,
                score,
                vector_similarity: vector,
                metadata_match: metadata,
                graph_proximity: graph,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            // Tie-break: higher vector similarity first
            .then_with(|| {
                b.vector_similarity
                    .unwrap_or(0.0)
                    .partial_cmp(&a.vector_similarity.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    scored
}

fn range_of(values: impl Iterator<Item = f32>) -> Option<(f32, f32)> {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut seen = false;
    for v in values {
        seen = true;
        min = min.min(v);
        max = max.max(v);
    }
    seen.then_some((min, max))
}

/// Min-max normalization over the modality's returned set.
///
/// A degenerate set (all values equal, or a single value) normalizes
/// to 1.0: the value is the best the modality returned.
fn normalize(value: f32, range: Option<(f32, f32)>) -> f32 {
    match range {
        Some((min, max)) if max > min => (value - min) / (max - min),
        Some(_) => 1.0,
        None => 0.0,
    }
}
