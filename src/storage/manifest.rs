//! The manifest record and store-wide configuration.
//!
//! The manifest is the single root of a store: it names the storage format
//! and the two top-level chunks (the ref table and the store config). It is
//! always plain JSON so a reader can learn the format before it picks a codec.

use serde::{Deserialize, Serialize};

use crate::storage::codec::FormatVersion;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, ChunkId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: FormatVersion,
    /// chunk holding the encoded ref table
    pub refs: ChunkId,
    /// chunk holding the encoded [`StoreConfig`]
    pub meta: ChunkId,
}

impl Manifest {
    pub fn new(format: FormatVersion, refs: ChunkId, meta: ChunkId) -> Self {
        Self { format, refs, meta }
    }

    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(id: ChunkId, bytes: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::CorruptedManifest {
            id,
            reason: e.to_string(),
        })
    }
}

/// Mutable per-store settings, visible to every session on its next refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// branch that bare `<db>` identifiers resolve to
    pub default_branch: BranchName,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_branch: BranchName::main(),
        }
    }
}
