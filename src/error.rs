//! Error types for SynapseDB.
//!
//! SynapseDB uses a hierarchical error system:
//! - `SynapseError` is the top-level error returned by all public APIs
//! - Specific error types (`StorageError`, `ValidationError`) provide detail
//!
//! Validation, not-found, and conflict errors are final: they surface to
//! the caller and are never retried. Transient storage errors (throttling,
//! timeouts, connection resets) are retried under the configured
//! [`RetryPolicy`](crate::config::RetryPolicy) before escalating.
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use synapsedb::{SynapseDB, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let db = SynapseDB::open("./synapse", Config::default())?;
//!     // ... operations that may fail ...
//!     db.close()?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for SynapseDB operations.
pub type Result<T> = std::result::Result<T, SynapseError>;

/// Top-level error enum for all SynapseDB operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum SynapseError {
    /// Storage layer error (I/O, corruption, transactions).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// Requested entity not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Duplicate create where the existing payload differs.
    ///
    /// A duplicate create with an identical payload is treated as success
    /// (idempotent write); this error fires only on a real conflict.
    #[error("Conflict on {entity}: {reason}")]
    Conflict {
        /// Identifier of the conflicting entity.
        entity: String,
        /// How the payloads differ.
        reason: String,
    },

    /// Persisted state that fails integrity checks.
    ///
    /// Raised when self-healing (pruning a dangling edge, deleting a
    /// mismatched vector) is impossible.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Resource exhaustion (out of memory during index load, disk full).
    #[error("Resource exhausted: {0}")]
    Resource(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding generation/validation error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index error (HNSW operations).
    #[error("Vector index error: {0}")]
    Index(String),
}

impl SynapseError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates an embedding error with the given message.
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Creates a vector index error with the given message.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    /// Creates a corruption error with the given message.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Creates a resource exhaustion error with the given message.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Creates a conflict error for the given entity.
    pub fn conflict(entity: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a vector index error.
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    /// Returns true if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if this is a corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }

    /// Returns true if the retry layer may re-attempt the failed operation.
    ///
    /// Only throttling and transient I/O qualify. Validation, not-found,
    /// conflict, corruption, and resource errors fail immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// Storage-related errors.
///
/// These errors indicate problems with the underlying storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Persisted data is corrupted or fails an integrity check.
    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    /// Storage root not found at expected path.
    #[error("Storage root not found: {0}")]
    RootNotFound(PathBuf),

    /// Storage root is locked by another process.
    #[error("Storage root is locked by another writer")]
    DatabaseLocked,

    /// The backing store is rate-limiting requests.
    ///
    /// Maps HTTP 429/503 style conditions from remote-capable adapters;
    /// enters exponential backoff and is retried.
    #[error("Throttled by storage backend: {0}")]
    Throttled(String),

    /// Transient I/O failure (timeout, connection reset).
    #[error("Transient storage I/O failure: {0}")]
    Transient(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Write-ahead log failure (append, segment rotation, replay).
    #[error("Write-ahead log error: {0}")]
    Wal(String),

    /// Storage schema version doesn't match expected version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in storage.
        found: u32,
    },

    /// Unbounded scan requested without the intelligent-load opt-in.
    #[error("Full scan refused: {0}")]
    ScanRefused(String),
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a throttled error with the given message.
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::Throttled(msg.into())
    }

    /// Creates a transient I/O error with the given message.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a write-ahead log error with the given message.
    pub fn wal(msg: impl Into<String>) -> Self {
        Self::Wal(msg.into())
    }

    /// Returns true if the error is retryable under the backoff policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transient(_))
    }
}

// Convert serde_json errors to StorageError (entity/metadata files are JSON)
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Convert bincode errors to StorageError (WAL records are bincode)
impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Also allow direct conversion to SynapseError for convenience
impl From<serde_json::Error> for SynapseError {
    fn from(err: serde_json::Error) -> Self {
        SynapseError::Storage(StorageError::from(err))
    }
}

impl From<bincode::Error> for SynapseError {
    fn from(err: bincode::Error) -> Self {
        SynapseError::Storage(StorageError::from(err))
    }
}

/// Validation errors for input data.
///
/// These errors indicate problems with data provided by the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Vector dimension doesn't match the configured dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from engine configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// Requested limit exceeds the hard cap.
    #[error("Limit {requested} exceeds maximum of {max}")]
    LimitExceeded {
        /// Limit the caller asked for.
        requested: usize,
        /// Hard cap.
        max: usize,
    },

    /// Operation rejected by the current engine mode.
    #[error("Operation '{operation}' rejected: engine is in {mode} mode")]
    ModeViolation {
        /// The rejected operation.
        operation: String,
        /// Human-readable mode name.
        mode: String,
    },

    /// An optional collaborator required by this operation is absent.
    #[error("Missing component '{component}': {reason}")]
    MissingComponent {
        /// Name of the absent collaborator.
        component: String,
        /// Why the operation needs it.
        reason: String,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates a limit exceeded error.
    pub fn limit_exceeded(requested: usize, max: usize) -> Self {
        Self::LimitExceeded { requested, max }
    }

    /// Creates a mode violation error.
    pub fn mode_violation(operation: impl Into<String>, mode: impl Into<String>) -> Self {
        Self::ModeViolation {
            operation: operation.into(),
            mode: mode.into(),
        }
    }

    /// Creates a missing component error.
    pub fn missing_component(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingComponent {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Not found errors for specific entity types.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Noun with given ID not found.
    #[error("Noun not found: {0}")]
    Noun(String),

    /// Verb with given ID not found.
    #[error("Verb not found: {0}")]
    Verb(String),

    /// Blob with given content hash not found.
    #[error("Blob not found: {0}")]
    Blob(String),

    /// Pagination cursor no longer resolves.
    #[error("Cursor is stale or invalid: {0}")]
    Cursor(String),
}

impl NotFoundError {
    /// Creates a noun not found error.
    pub fn noun(id: impl ToString) -> Self {
        Self::Noun(id.to_string())
    }

    /// Creates a verb not found error.
    pub fn verb(id: impl ToString) -> Self {
        Self::Verb(id.to_string())
    }

    /// Creates a blob not found error.
    pub fn blob(hash: impl ToString) -> Self {
        Self::Blob(hash.to_string())
    }

    /// Creates a stale cursor error.
    pub fn cursor(reason: impl ToString) -> Self {
        Self::Cursor(reason.to_string())
    }
}
