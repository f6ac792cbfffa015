//! Storage layer error types
//!
//! All errors that can occur during storage operations are defined here
//! We use `thiserror` for ergonomic error definition and better error messages

use thiserror::Error;

use crate::storage::codec::FormatVersion;
use crate::storage::types::{BranchName, ChunkId, InvalidNameError, RowKey, TableName, TagName};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// a name failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// no chunk is stored under the requested hash
    #[error("chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    /// chunk bytes could not be decoded under the expected codec
    #[error("corrupted chunk {id} ({format}): {reason}")]
    CorruptedChunk {
        id: ChunkId,
        format: FormatVersion,
        reason: String,
    },

    /// the manifest record itself could not be decoded
    #[error("corrupted manifest {id}: {reason}")]
    CorruptedManifest { id: ChunkId, reason: String },

    /// the store has no manifest yet
    #[error("store not initialized")]
    NotInitialized,

    /// the store already has a manifest
    #[error("store already initialized")]
    AlreadyInitialized,

    /// the manifest names a format this build does not know
    #[error("unsupported storage format: {0}")]
    UnsupportedFormat(String),

    #[error("branch not found: {0}")]
    BranchNotFound(BranchName),

    #[error("branch already exists: {0}")]
    BranchAlreadyExists(BranchName),

    #[error("tag not found: {0}")]
    TagNotFound(TagName),

    #[error("tag already exists: {0}")]
    TagAlreadyExists(TagName),

    #[error("working set not found for branch {0}")]
    WorkingSetNotFound(BranchName),

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("table already exists: {0}")]
    TableAlreadyExists(TableName),

    #[error("row not found: table={table}, key={key}")]
    RowNotFound { table: TableName, key: RowKey },

    #[error("row already exists: table={table}, key={key}")]
    RowAlreadyExists { table: TableName, key: RowKey },

    /// the row data doesn't match the expected shape
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// the manifest kept moving under us
    #[error("concurrent modification: manifest changed {attempts} times while applying {operation}")]
    ConcurrentModification { operation: String, attempts: usize },

    #[error("nothing to commit on branch {0}")]
    NothingToCommit(BranchName),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ChunkNotFound(_)
                | StorageError::BranchNotFound(_)
                | StorageError::TagNotFound(_)
                | StorageError::WorkingSetNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::TableNotFound(_)
                | StorageError::RowNotFound { .. }
        )
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::BranchAlreadyExists(_)
                | StorageError::TagAlreadyExists(_)
                | StorageError::TableAlreadyExists(_)
                | StorageError::RowAlreadyExists { .. }
                | StorageError::ConcurrentModification { .. }
        )
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::TableNotFound(TableName::new("users").unwrap());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());

        let conflict = StorageError::RowAlreadyExists {
            table: TableName::new("users").unwrap(),
            key: RowKey::new("123").unwrap(),
        };
        assert!(!conflict.is_not_found());
        assert!(conflict.is_conflict());

        let cas = StorageError::ConcurrentModification {
            operation: "delete branch".into(),
            attempts: 8,
        };
        assert!(cas.is_retriable());
        assert!(cas.is_conflict());
    }
}
