//! Migration errors.

use std::fmt;

use thiserror::Error;

use crate::storage::{BranchName, ChunkId, CommitId, FormatVersion, RefName, RootId, StorageError, TableName};

/// Result type for migrations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// A structural unit of the store, as named in migration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    Commit(CommitId),
    Root(RootId),
    Table { root: RootId, table: TableName },
    WorkingSet(BranchName),
    Ref(RefName),
    /// a chunk met while walking the commit graph
    Chunk(ChunkId),
    /// the ref table or config of the manifest
    Manifest(ChunkId),
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Commit(id) => write!(f, "commit {}", id),
            Unit::Root(id) => write!(f, "root {}", id),
            Unit::Table { root, table } => write!(f, "table {} of root {}", table, root),
            Unit::WorkingSet(branch) => write!(f, "working set of {}", branch),
            Unit::Ref(name) => write!(f, "ref {}", name),
            Unit::Chunk(id) => write!(f, "chunk {}", id),
            Unit::Manifest(id) => write!(f, "manifest {}", id),
        }
    }
}

/// Migration errors.
///
/// Whatever the error, the manifest in place before the migration stays
/// authoritative.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("store is already in format {0}")]
    AlreadyCurrent(FormatVersion),

    #[error("a migration is already in progress on this store")]
    MigrationInProgress,

    /// a unit could not be decoded, re-encoded or written
    #[error("failed to translate {unit}: {source}")]
    Translate {
        unit: Unit,
        #[source]
        source: StorageError,
    },

    /// the translated unit does not match the original
    #[error("verification failed for {unit}: {reason}")]
    Verification { unit: Unit, reason: String },

    /// the manifest moved while the migration was running
    #[error("manifest changed during migration: expected {expected}, found {found:?}")]
    ConcurrentMutation { expected: ChunkId, found: Option<ChunkId> },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MigrationError {
    pub(crate) fn translate(unit: Unit) -> impl FnOnce(StorageError) -> MigrationError {
        move |source| MigrationError::Translate { unit, source }
    }

    /// the unit the migration stopped at, if any
    pub fn unit(&self) -> Option<&Unit> {
        match self {
            MigrationError::Translate { unit, .. } | MigrationError::Verification { unit, .. } => Some(unit),
            _ => None,
        }
    }
}
