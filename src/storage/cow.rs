//! Copy-on-write commit graph.
//!
//! The virtual-filesystem collaborator layers snapshots over entity
//! storage as a git-like DAG: each commit names a tree hash and a parent
//! commit hash, with [`NULL_HASH`] standing for "no parent" on the
//! initial commit. Commits are content-addressed and immutable; the
//! mutable piece is a single head pointer.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StorageError, SynapseError};
use crate::types::Timestamp;

use super::layout::{commit_path, is_null_hash, is_valid_hash, system_doc_path, NULL_HASH};

/// One commit in the copy-on-write DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Content address of this commit.
    pub hash: String,
    /// Hash of the tree this commit snapshots.
    pub tree_hash: String,
    /// Parent commit hash; [`NULL_HASH`] for the initial commit.
    pub parent_hash: String,
    /// When the commit was created.
    pub timestamp: Timestamp,
    /// Optional commit message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Commit {
    /// Returns true if this is an initial commit (no parent).
    pub fn is_root(&self) -> bool {
        is_null_hash(&self.parent_hash)
    }
}

/// The commit store, rooted under the storage directory.
#[derive(Debug)]
pub struct CommitGraph {
    root: PathBuf,
}

const HEAD_DOC: &str = "cow-head";

impl CommitGraph {
    /// Opens a commit graph under the given storage root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a commit for `tree_hash` on top of `parent_hash`.
    ///
    /// `parent_hash` must be [`NULL_HASH`] (initial commit) or an
    /// existing commit. The new commit becomes head.
    pub fn commit(
        &self,
        tree_hash: &str,
        parent_hash: &str,
        message: Option<String>,
    ) -> Result<Commit> {
        if !is_valid_hash(tree_hash) {
            return Err(SynapseError::from(StorageError::corrupted(format!(
                "invalid tree hash: {}",
                tree_hash
            ))));
        }
        if !is_null_hash(parent_hash) {
            if !is_valid_hash(parent_hash) {
                return Err(SynapseError::from(StorageError::corrupted(format!(
                    "invalid parent hash: {}",
                    parent_hash
                ))));
            }
            if self.get(parent_hash)?.is_none() {
                return Err(SynapseError::from(StorageError::corrupted(format!(
                    "parent commit not found: {}",
                    parent_hash
                ))));
            }
        }

        let timestamp = Timestamp::now();
        let identity = format!(
            "{}\n{}\n{}\n{}",
            tree_hash,
            parent_hash,
            timestamp.as_millis(),
            message.as_deref().unwrap_or("")
        );
        let hash = hex::encode(Sha256::digest(identity.as_bytes()));

        let commit = Commit {
            hash: hash.clone(),
            tree_hash: tree_hash.to_string(),
            parent_hash: parent_hash.to_string(),
            timestamp,
            message,
        };

        let path = commit_path(&self.root, &hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&commit).map_err(StorageError::from)?)?;
        self.set_head(&hash)?;

        Ok(commit)
    }

    /// Loads a commit by hash.
    pub fn get(&self, hash: &str) -> Result<Option<Commit>> {
        if !is_valid_hash(hash) {
            return Ok(None);
        }
        let path = commit_path(&self.root, hash);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json).map_err(StorageError::from)?))
    }

    /// Walks the ancestry from `hash` toward the root, inclusive.
    ///
    /// Stops at the initial commit or after `limit` entries. A missing
    /// ancestor is corruption and errors.
    pub fn ancestry(&self, hash: &str, limit: usize) -> Result<Vec<Commit>> {
        let mut out = Vec::new();
        let mut current = hash.to_string();
        while out.len() < limit {
            let Some(commit) = self.get(&current)? else {
                return Err(SynapseError::corruption(format!(
                    "dangling commit reference: {}",
                    current
                )));
            };
            let parent = commit.parent_hash.clone();
            out.push(commit);
            if is_null_hash(&parent) {
                break;
            }
            current = parent;
        }
        Ok(out)
    }

    /// Current head commit hash, if any commits exist.
    pub fn head(&self) -> Result<Option<String>> {
        let path = system_doc_path(&self.root, HEAD_DOC);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let head: String = serde_json::from_str(&json).map_err(StorageError::from)?;
        Ok(Some(head))
    }

    fn set_head(&self, hash: &str) -> Result<()> {
        let path = system_doc_path(&self.root, HEAD_DOC);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string(hash).map_err(StorageError::from)?)?;
        Ok(())
    }
}
