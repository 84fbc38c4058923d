//! Intelligent verb scoring augmentation.
//!
//! When a verb arrives without explicit weight or confidence, scores
//! are computed from three signals:
//!
//! - **semantic proximity**: similarity of the endpoint vectors
//! - **historical frequency**: how many verbs already connect the pair
//! - **temporal decay**: endpoint staleness, defaulting to 1 %/day
//!
//! The augmentation sits at priority 10 (last), so earlier interceptors
//! see the request before scoring is applied.

use crate::error::Result;
use crate::noun::Noun;
use crate::types::Timestamp;
use crate::vector::DistanceKind;

use super::{Augmentation, WriteDecision, WriteRequest};

/// Pair frequency at which the frequency signal saturates.
const FREQUENCY_SATURATION: f32 = 10.0;

/// Scoring parameters.
#[derive(Clone, Debug)]
pub struct VerbScoring {
    distance: DistanceKind,
    /// Daily decay rate applied to stale endpoints. Default: 0.01
    decay_per_day: f64,
}

impl VerbScoring {
    /// Creates a scorer with the default 1 %/day decay.
    pub fn new(distance: DistanceKind) -> Self {
        Self {
            distance,
            decay_per_day: 0.01,
        }
    }

    /// Overrides the daily decay rate.
    pub fn with_decay_per_day(mut self, rate: f64) -> Self {
        self.decay_per_day = rate.clamp(0.0, 1.0);
        self
    }

    /// Computes `(weight, confidence)` for a verb between two endpoints.
    ///
    /// `pair_frequency` is the number of verbs already connecting the
    /// pair (in either direction). Both outputs land in [0, 1].
    pub fn score(&self, source: &Noun, target: &Noun, pair_frequency: usize) -> (f32, f32) {
        let similarity = if source.vector.is_empty() || target.vector.is_empty() {
            // Placeholder endpoints carry zero-information vectors
            0.5
        } else {
            let distance = self.distance.distance(&source.vector, &target.vector);
            self.distance.to_similarity(distance)
        };

        let frequency = (pair_frequency as f32 / FREQUENCY_SATURATION).min(1.0);
        let decay = self.decay_factor(source.updated_at.max(target.updated_at));

        let weight = (0.5 * similarity + 0.3 * frequency + 0.2 * decay).clamp(0.0, 1.0);
        let confidence = ((0.5 + 0.5 * similarity) * decay).clamp(0.0, 1.0);
        (weight, confidence)
    }

    /// Decay factor for an endpoint last touched at `updated_at`:
    /// `(1 - rate)^days`, clamped to [0, 1].
    fn decay_factor(&self, updated_at: Timestamp) -> f32 {
        let age_ms = Timestamp::now().millis_since(updated_at);
        let age_days = age_ms as f64 / 86_400_000.0;
        (1.0 - self.decay_per_day).powf(age_days).clamp(0.0, 1.0) as f32
    }
}

impl Augmentation for VerbScoring {
    fn name(&self) -> &'static str {
        "intelligent-verb-scoring"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn before_write(&self, _request: &mut WriteRequest) -> Result<WriteDecision> {
        // Scoring is typed work: the engine invokes `score` directly on
        // the add-verb path when weight/confidence are unspecified
        Ok(WriteDecision::Continue)
    }
}
