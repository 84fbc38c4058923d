//! Distance functions for vector similarity.
//!
//! All functions return a non-negative distance where lower means more
//! similar, which is the contract the HNSW index and the query planner
//! build on. [`DistanceKind::to_similarity`] maps a distance back into
//! a bounded similarity score for thresholds and fusion scoring.

use serde::{Deserialize, Serialize};

/// Distance function selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Cosine distance: `1 - cos(a, b)`, range [0, 2].
    ///
    /// Best for text embeddings and other direction-encoding vectors.
    #[default]
    Cosine,

    /// Euclidean (L2) distance, range [0, ∞).
    Euclidean,

    /// Manhattan (L1) distance, range [0, ∞).
    Manhattan,

    /// Dot-product distance: `max(0, 1 - a·b)`.
    ///
    /// Assumes unit-normalized vectors, for which it coincides with
    /// cosine distance; clamped so the non-negativity contract holds
    /// for unnormalized inputs.
    DotProduct,
}

impl DistanceKind {
    /// Computes the distance between two vectors of equal dimension.
    ///
    /// Lower is more similar; the result is always non-negative.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vectors must have same dimension");
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
            Self::Manhattan => manhattan_distance(a, b),
            Self::DotProduct => (1.0 - dot_product(a, b)).max(0.0),
        }
    }

    /// Maps a distance to a similarity score in (0, 1].
    ///
    /// Monotone decreasing in the distance, so ordering by similarity
    /// descending equals ordering by distance ascending. Used for
    /// search thresholds and min-max fusion inputs.
    #[inline]
    pub fn to_similarity(&self, distance: f32) -> f32 {
        match self {
            // Cosine distance spans [0, 2]; rescale to [0, 1]
            Self::Cosine | Self::DotProduct => 1.0 - (distance / 2.0).clamp(0.0, 1.0),
            Self::Euclidean | Self::Manhattan => 1.0 / (1.0 + distance.max(0.0)),
        }
    }

    /// Stable name used in config files and statistics output.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
            Self::DotProduct => "dot_product",
        }
    }
}

impl std::fmt::Display for DistanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cosine distance: `1 - cosine_similarity`, in [0, 2].
///
/// Zero-magnitude vectors compare as orthogonal (distance 1).
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let mag = magnitude(a) * magnitude(b);
    if mag == 0.0 {
        return 1.0;
    }
    (1.0 - dot / mag).max(0.0)
}

/// Euclidean (L2) distance.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum::<f32>()
        .sqrt()
}

/// Manhattan (L1) distance.
#[inline]
pub fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Dot product (inner product) of two vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Magnitude (L2 norm) of a vector.
#[inline]
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalizes a vector to unit length in place.
///
/// Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let mag = magnitude(v);
    if mag > 0.0 {
        for x in v.iter_mut() {
            *x /= mag;
        }
    }
}

/// Element-wise mean of two vectors, used for verb vectors averaged
/// from their endpoint nouns.
pub fn average(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect()
}
