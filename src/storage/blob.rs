//! Content-addressed blob storage.
//!
//! Large payloads (file contents attached through the virtual-filesystem
//! collaborator) are stored once under their SHA-256 address at
//! `blobs/{prefix}/{hash}`, with a `.meta` sidecar carrying the
//! reference count. Writes are idempotent by content hash; reads
//! acquire a reference; releases decrement and reclaim the payload when
//! the count reaches zero.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{NotFoundError, Result, StorageError, SynapseError};

use super::layout::{blob_meta_path, blob_path, is_valid_hash};

/// Reference to a stored blob, embedded in entity metadata as
/// `{type: "blob", hash, size, compressed}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Record discriminator, always `"blob"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// SHA-256 of the uncompressed payload, lowercase hex.
    pub hash: String,
    /// Uncompressed payload size in bytes.
    pub size: u64,
    /// Whether the stored payload is compressed.
    pub compressed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
    refcount: u32,
    size: u64,
    compressed: bool,
}

/// Content-addressed, reference-counted blob store rooted at a
/// directory.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens a blob store under the given storage root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Computes the content address of a payload.
    pub fn hash_of(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Stores a payload, returning its reference.
    ///
    /// Idempotent: storing bytes that already exist increments the
    /// reference count instead of rewriting the payload.
    pub fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        let hash = Self::hash_of(bytes);
        let payload_path = blob_path(&self.root, &hash);
        let meta_path = blob_meta_path(&self.root, &hash);

        if payload_path.exists() {
            let mut meta = self.read_meta(&meta_path, &hash)?;
            meta.refcount = meta.refcount.saturating_add(1);
            self.write_meta(&meta_path, &meta)?;
            return Ok(BlobRef {
                kind: "blob".to_string(),
                hash,
                size: meta.size,
                compressed: meta.compressed,
            });
        }

        if let Some(parent) = payload_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&payload_path, bytes)?;
        let meta = BlobMeta {
            refcount: 1,
            size: bytes.len() as u64,
            compressed: false,
        };
        self.write_meta(&meta_path, &meta)?;

        debug!(hash = %hash, size = bytes.len(), "Blob stored");
        Ok(BlobRef {
            kind: "blob".to_string(),
            hash,
            size: meta.size,
            compressed: false,
        })
    }

    /// Reads a payload and acquires a reference to it.
    ///
    /// Returns `None` if the hash is unknown.
    pub fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        self.validate_hash(hash)?;
        let payload_path = blob_path(&self.root, hash);
        if !payload_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&payload_path)?;

        let meta_path = blob_meta_path(&self.root, hash);
        let mut meta = self.read_meta(&meta_path, hash)?;
        meta.refcount = meta.refcount.saturating_add(1);
        self.write_meta(&meta_path, &meta)?;

        Ok(Some(bytes))
    }

    /// Releases one reference; reclaims the payload at zero.
    ///
    /// Returns `true` if the payload was reclaimed.
    pub fn release(&self, hash: &str) -> Result<bool> {
        self.validate_hash(hash)?;
        let meta_path = blob_meta_path(&self.root, hash);
        if !meta_path.exists() {
            return Err(NotFoundError::blob(hash).into());
        }
        let mut meta = self.read_meta(&meta_path, hash)?;
        meta.refcount = meta.refcount.saturating_sub(1);

        if meta.refcount == 0 {
            fs::remove_file(blob_path(&self.root, hash)).ok();
            fs::remove_file(&meta_path)?;
            debug!(hash = %hash, "Blob reclaimed");
            return Ok(true);
        }

        self.write_meta(&meta_path, &meta)?;
        Ok(false)
    }

    /// Current reference count, or `None` if the hash is unknown.
    pub fn refcount(&self, hash: &str) -> Result<Option<u32>> {
        self.validate_hash(hash)?;
        let meta_path = blob_meta_path(&self.root, hash);
        if !meta_path.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_meta(&meta_path, hash)?.refcount))
    }

    fn validate_hash(&self, hash: &str) -> Result<()> {
        if !is_valid_hash(hash) {
            return Err(SynapseError::from(StorageError::corrupted(format!(
                "invalid blob hash: {}",
                hash
            ))));
        }
        Ok(())
    }

    fn read_meta(&self, path: &Path, hash: &str) -> Result<BlobMeta> {
        let json = fs::read_to_string(path).map_err(|e| {
            StorageError::corrupted(format!("missing blob meta for {}: {}", hash, e))
        })?;
        Ok(serde_json::from_str(&json).map_err(StorageError::from)?)
    }

    fn write_meta(&self, path: &Path, meta: &BlobMeta) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(meta).map_err(StorageError::from)?)?;
        Ok(())
    }
}
