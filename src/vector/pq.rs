//! Product quantization for memory-constrained corpora.
//!
//! A [`ProductQuantizer`] splits each vector into `num_subspaces`
//! contiguous subvectors and k-means-clusters each subspace into its own
//! codebook of up to 256 centroids. An encoded vector is one codebook
//! index per subspace (one byte each), a 4 × `sub_dim` compression per
//! subspace at f32 precision.
//!
//! The optimized HNSW variant stores codes instead of full vectors and
//! decodes on demand for distance computation; exact vectors remain in
//! storage and are re-read when precision matters.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynapseError};

/// Product quantization parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PqConfig {
    /// Number of subspaces the vector is split into.
    ///
    /// Must divide the vector dimension evenly.
    /// Default: 8
    pub num_subspaces: usize,

    /// Centroids per subspace codebook (1-256, one byte per code).
    /// Default: 256
    pub codebook_size: usize,

    /// k-means refinement iterations per subspace.
    /// Default: 10
    pub training_iterations: usize,
}

impl Default for PqConfig {
    fn default() -> Self {
        Self {
            num_subspaces: 8,
            codebook_size: 256,
            training_iterations: 10,
        }
    }
}

/// A trained product quantizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    sub_dim: usize,
    /// Per-subspace codebooks: `codebooks[s][c]` is centroid `c` of
    /// subspace `s`, of length `sub_dim`.
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl ProductQuantizer {
    /// Trains a quantizer on a sample of vectors.
    ///
    /// # Errors
    ///
    /// - `num_subspaces` doesn't divide the dimension
    /// - `codebook_size` is 0 or exceeds 256
    /// - The training sample is empty or has inconsistent dimensions
    pub fn train(vectors: &[Vec<f32>], config: &PqConfig) -> Result<Self> {
        if vectors.is_empty() {
            return Err(SynapseError::index(
                "product quantizer training requires at least one vector",
            ));
        }
        if config.codebook_size == 0 || config.codebook_size > 256 {
            return Err(SynapseError::index(
                "codebook_size must be between 1 and 256",
            ));
        }

        let dimension = vectors[0].len();
        if dimension == 0 || config.num_subspaces == 0 || dimension % config.num_subspaces != 0 {
            return Err(SynapseError::index(format!(
                "num_subspaces {} must evenly divide dimension {}",
                config.num_subspaces, dimension
            )));
        }
        if vectors.iter().any(|v| v.len() != dimension) {
            return Err(SynapseError::index(
                "training vectors have inconsistent dimensions",
            ));
        }

        let sub_dim = dimension / config.num_subspaces;
        let k = config.codebook_size.min(vectors.len());

        let mut codebooks = Vec::with_capacity(config.num_subspaces);
        for s in 0..config.num_subspaces {
            let offset = s * sub_dim;
            let slices: Vec<&[f32]> = vectors
                .iter()
                .map(|v| &v[offset..offset + sub_dim])
                .collect();
            codebooks.push(kmeans(&slices, k, config.training_iterations));
        }

        Ok(Self {
            dimension,
            sub_dim,
            codebooks,
        })
    }

    /// The full vector dimension this quantizer was trained for.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of subspaces (bytes per encoded vector).
    #[inline]
    pub fn code_len(&self) -> usize {
        self.codebooks.len()
    }

    /// Encodes a vector into one codebook index per subspace.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.dimension {
            return Err(SynapseError::index(format!(
                "cannot encode vector of dimension {} with quantizer for {}",
                vector.len(),
                self.dimension
            )));
        }

        let mut codes = Vec::with_capacity(self.codebooks.len());
        for (s, codebook) in self.codebooks.iter().enumerate() {
            let offset = s * self.sub_dim;
            let sub = &vector[offset..offset + self.sub_dim];
            codes.push(nearest_centroid(codebook, sub) as u8);
        }
        Ok(codes)
    }

    /// Decodes codes back to the centroid reconstruction.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        for (s, &code) in codes.iter().enumerate().take(self.codebooks.len()) {
            let codebook = &self.codebooks[s];
            let centroid = &codebook[(code as usize).min(codebook.len() - 1)];
            out.extend_from_slice(centroid);
        }
        out
    }

    /// Mean squared reconstruction error over a sample, for tuning.
    pub fn reconstruction_error(&self, vectors: &[Vec<f32>]) -> Result<f32> {
        if vectors.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0f64;
        for v in vectors {
            let decoded = self.decode(&self.encode(v)?);
            let err: f32 = v
                .iter()
                .zip(decoded.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            total += err as f64;
        }
        Ok((total / vectors.len() as f64) as f32)
    }
}

/// Lloyd's k-means over subvector slices.
///
/// Initialization samples evenly across the training set, which is
/// deterministic and spreads centroids over the data's natural order.
/// Empty clusters keep their previous centroid.
fn kmeans(points: &[&[f32]], k: usize, iterations: usize) -> Vec<Vec<f32>> {
    let dim = points[0].len();
    let k = k.min(points.len()).max(1);

    // Evenly spaced initialization
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| points[i * points.len() / k].to_vec())
        .collect();

    let mut assignments = vec![0usize; points.len()];

    for _ in 0..iterations {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let nearest = nearest_centroid(&centroids, p);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0f64; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, p) in points.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (d, &x) in p.iter().enumerate() {
                sums[c][d] += x as f64;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                for d in 0..dim {
                    centroids[c][d] = (sums[c][d] / counts[c] as f64) as f32;
                }
            }
        }

        if !changed {
            break;
        }
    }

    centroids
}

fn nearest_centroid(centroids: &[Vec<f32>], point: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::MAX;
    for (i, c) in centroids.iter().enumerate() {
        let dist: f32 = c
            .iter()
            .zip(point.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}
