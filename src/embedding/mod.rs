//! Embedding collaborator abstractions.
//!
//! The engine treats embedding as an external concern: callers either
//! supply vectors directly or attach an [`EmbeddingService`] that maps
//! opaque text to fixed-dimension vectors. The service's output
//! dimension is probed once at open and must match the configured
//! dimension; after that, every embed call is trusted but re-validated
//! at the index boundary.
//!
//! [`HashedEmbedding`] is a deterministic, dependency-free
//! implementation for tests and smoke runs: not semantically
//! meaningful, but stable and correctly shaped.
//!
//! # Implementing a Custom Provider
//!
//! ```rust,ignore
//! use synapsedb::embedding::EmbeddingService;
//! use synapsedb::{Result, Vector};
//!
//! struct MyEmbeddingService {
//!     client: MyApiClient,
//! }
//!
//! impl EmbeddingService for MyEmbeddingService {
//!     fn embed(&self, text: &str) -> Result<Vector> {
//!         Ok(self.client.get_embedding(text)?)
//!     }
//!
//!     fn dimensions(&self) -> usize {
//!         384
//!     }
//! }
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Result, SynapseError, ValidationError};
use crate::types::Vector;
use crate::vector::distance::normalize;

/// Embedding service trait.
///
/// Implementations must be thread-safe (`Send + Sync`) so the engine
/// can embed from its write path and background tasks.
pub trait EmbeddingService: Send + Sync {
    /// Generates an embedding for a single text.
    ///
    /// # Errors
    ///
    /// Returns `SynapseError::Embedding` if generation fails; failures
    /// propagate to the caller as vectorization errors.
    fn embed(&self, text: &str) -> Result<Vector>;

    /// Generates embeddings for multiple texts in a batch.
    ///
    /// The default delegates to [`embed`](Self::embed) per text;
    /// providers with batch endpoints should override.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vector>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Dimension of embeddings produced by this service.
    fn dimensions(&self) -> usize;
}

/// Probes a service once and validates its output dimension against
/// the engine configuration.
///
/// Called during open, so a misconfigured collaborator fails fast
/// instead of corrupting the first write.
pub fn probe_dimensions(service: &dyn EmbeddingService, expected: usize) -> Result<()> {
    if service.dimensions() != expected {
        return Err(ValidationError::dimension_mismatch(expected, service.dimensions()).into());
    }
    let probe = service
        .embed("dimension probe")
        .map_err(|e| SynapseError::embedding(format!("embedding probe failed: {}", e)))?;
    if probe.len() != expected {
        return Err(ValidationError::dimension_mismatch(expected, probe.len()).into());
    }
    Ok(())
}

/// Deterministic hash-based embedding.
///
/// Expands the SHA-256 of the input (re-hashed in counter mode) into a
/// unit-normalized vector. Equal inputs embed equally; there is no
/// semantic similarity structure beyond that.
#[derive(Clone, Debug)]
pub struct HashedEmbedding {
    dimensions: usize,
}

impl HashedEmbedding {
    /// Creates a hashed embedding of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingService for HashedEmbedding {
    fn embed(&self, text: &str) -> Result<Vector> {
        let mut out = Vec::with_capacity(self.dimensions);
        let mut counter = 0u32;
        while out.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_le_bytes());
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if out.len() >= self.dimensions {
                    break;
                }
                let bits = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
                // Map to [-1, 1]
                out.push((bits as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }
        normalize(&mut out);
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
