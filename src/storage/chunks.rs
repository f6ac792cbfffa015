//! Content-addressed chunk storage.
//!
//! A chunk store holds immutable byte blocks keyed by their hash plus a single
//! mutable pointer, the manifest root, which only moves through
//! compare-and-swap. Everything else in the store is reachable from the
//! manifest.
//!
//! Two backends exist:
//! - [`GitChunkStore`] keeps chunks as blobs in a bare Git repository and the
//!   manifest root in `refs/revdb/manifest`.
//! - [`MemoryChunkStore`] keeps everything in process memory; useful for tests
//!   and scratch databases.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{ErrorCode, Repository};
use parking_lot::{Mutex, RwLock};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::manifest::Manifest;
use crate::storage::types::ChunkId;

/// outcome of a manifest compare-and-swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapResult {
    /// the manifest root now points at the new chunk
    Swapped,
    /// someone else moved the root first; carries the value we lost to
    Conflict(Option<ChunkId>),
}

/// The outgoing storage interface of the store.
pub trait ChunkStore: Send + Sync {
    /// read the bytes stored under `id`
    fn get(&self, id: ChunkId) -> StorageResult<Vec<u8>>;

    /// store `bytes`, returning their content hash; storing twice is a no-op
    fn put(&self, bytes: &[u8]) -> StorageResult<ChunkId>;

    fn contains(&self, id: ChunkId) -> StorageResult<bool>;

    /// the chunk id of the current manifest record, if any
    fn manifest_root(&self) -> StorageResult<Option<ChunkId>>;

    /// move the manifest root from `expected` to `new`, atomically
    fn swap_manifest_root(&self, expected: Option<ChunkId>, new: ChunkId) -> StorageResult<SwapResult>;

    /// read and decode the current manifest
    fn read_manifest(&self) -> StorageResult<Option<(ChunkId, Manifest)>> {
        match self.manifest_root()? {
            Some(id) => {
                let bytes = self.get(id)?;
                Ok(Some((id, Manifest::decode(id, &bytes)?)))
            }
            None => Ok(None),
        }
    }

    /// write `manifest` as a chunk and swap it in
    fn swap_manifest(
        &self,
        expected: Option<ChunkId>,
        manifest: &Manifest,
    ) -> StorageResult<(ChunkId, SwapResult)> {
        let id = self.put(&manifest.encode()?)?;
        let result = self.swap_manifest_root(expected, id)?;
        Ok((id, result))
    }
}

/// Chunk store backed by a bare Git repository.
///
/// `git2::Repository` is not `Sync`, so access is serialized through a mutex
/// held only for the duration of a single object read or write.
pub struct GitChunkStore {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitChunkStore {
    /// ref that points at the current manifest chunk
    pub const MANIFEST_REF: &'static str = "refs/revdb/manifest";

    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open_bare(path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                StorageError::NotInitialized
            } else {
                StorageError::Git(e)
            }
        })?;

        Ok(Self {
            repo: Mutex::new(repo),
            path: path.to_path_buf(),
        })
    }

    /// Initialize a new, empty bare repository.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init_bare(path)?;
        Ok(Self {
            repo: Mutex::new(repo),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn manifest_root_locked(repo: &Repository) -> StorageResult<Option<ChunkId>> {
        match repo.find_reference(Self::MANIFEST_REF) {
            Ok(reference) => Ok(reference.target().map(ChunkId::new)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(StorageError::Git(e)),
        }
    }
}

impl ChunkStore for GitChunkStore {
    fn get(&self, id: ChunkId) -> StorageResult<Vec<u8>> {
        let repo = self.repo.lock();
        let blob = repo.find_blob(id.raw()).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                StorageError::ChunkNotFound(id)
            } else {
                StorageError::Git(e)
            }
        })?;
        Ok(blob.content().to_vec())
    }

    fn put(&self, bytes: &[u8]) -> StorageResult<ChunkId> {
        let repo = self.repo.lock();
        let oid = repo.blob(bytes)?;
        Ok(ChunkId::new(oid))
    }

    fn contains(&self, id: ChunkId) -> StorageResult<bool> {
        let repo = self.repo.lock();
        let odb = repo.odb()?;
        Ok(odb.exists(id.raw()))
    }

    fn manifest_root(&self) -> StorageResult<Option<ChunkId>> {
        let repo = self.repo.lock();
        Self::manifest_root_locked(&repo)
    }

    fn swap_manifest_root(&self, expected: Option<ChunkId>, new: ChunkId) -> StorageResult<SwapResult> {
        let repo = self.repo.lock();
        let current = Self::manifest_root_locked(&repo)?;
        if current != expected {
            return Ok(SwapResult::Conflict(current));
        }

        let message = format!("revdb: manifest {}", new.short());
        // the ref update itself is also conditional, so another process
        // sharing the repository cannot slip in between the check and the write
        let updated = match expected {
            Some(old) => repo.reference_matching(Self::MANIFEST_REF, new.raw(), true, old.raw(), &message),
            None => repo.reference(Self::MANIFEST_REF, new.raw(), false, &message),
        };

        match updated {
            Ok(_) => Ok(SwapResult::Swapped),
            Err(e) if matches!(e.code(), ErrorCode::Modified | ErrorCode::Exists) => {
                Ok(SwapResult::Conflict(Self::manifest_root_locked(&repo)?))
            }
            Err(e) => Err(StorageError::Git(e)),
        }
    }
}

/// In-memory chunk store.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<ChunkId, Arc<[u8]>>>,
    manifest: Mutex<Option<ChunkId>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of distinct chunks stored
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn get(&self, id: ChunkId) -> StorageResult<Vec<u8>> {
        self.chunks
            .read()
            .get(&id)
            .map(|bytes| bytes.to_vec())
            .ok_or(StorageError::ChunkNotFound(id))
    }

    fn put(&self, bytes: &[u8]) -> StorageResult<ChunkId> {
        let id = ChunkId::for_bytes(bytes)?;
        self.chunks.write().entry(id).or_insert_with(|| Arc::from(bytes));
        Ok(id)
    }

    fn contains(&self, id: ChunkId) -> StorageResult<bool> {
        Ok(self.chunks.read().contains_key(&id))
    }

    fn manifest_root(&self) -> StorageResult<Option<ChunkId>> {
        Ok(*self.manifest.lock())
    }

    fn swap_manifest_root(&self, expected: Option<ChunkId>, new: ChunkId) -> StorageResult<SwapResult> {
        if !self.contains(new)? {
            return Err(StorageError::ChunkNotFound(new));
        }
        let mut current = self.manifest.lock();
        if *current != expected {
            return Ok(SwapResult::Conflict(*current));
        }
        *current = Some(new);
        Ok(SwapResult::Swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise_store(store: &dyn ChunkStore) {
        let a = store.put(b"alpha").unwrap();
        let a_again = store.put(b"alpha").unwrap();
        assert_eq!(a, a_again);
        assert_eq!(store.get(a).unwrap(), b"alpha");
        assert!(store.contains(a).unwrap());

        let missing = ChunkId::for_bytes(b"never stored").unwrap();
        assert!(!store.contains(missing).unwrap());
        assert!(matches!(store.get(missing), Err(StorageError::ChunkNotFound(_))));

        let b = store.put(b"beta").unwrap();

        assert_eq!(store.manifest_root().unwrap(), None);
        assert_eq!(store.swap_manifest_root(None, a).unwrap(), SwapResult::Swapped);
        assert_eq!(store.manifest_root().unwrap(), Some(a));

        // stale expectation loses
        assert_eq!(store.swap_manifest_root(None, b).unwrap(), SwapResult::Conflict(Some(a)));
        assert_eq!(store.swap_manifest_root(Some(b), b).unwrap(), SwapResult::Conflict(Some(a)));

        assert_eq!(store.swap_manifest_root(Some(a), b).unwrap(), SwapResult::Swapped);
        assert_eq!(store.manifest_root().unwrap(), Some(b));
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryChunkStore::new());
    }

    #[test]
    fn test_git_store() {
        let dir = TempDir::new().unwrap();
        let store = GitChunkStore::init(dir.path()).unwrap();
        exercise_store(&store);

        drop(store);
        let reopened = GitChunkStore::open(dir.path()).unwrap();
        assert!(reopened.manifest_root().unwrap().is_some());
    }

    #[test]
    fn test_backends_agree_on_hashes() {
        let dir = TempDir::new().unwrap();
        let git = GitChunkStore::init(dir.path()).unwrap();
        let mem = MemoryChunkStore::new();

        let bytes = br#"{"rows":{}}"#;
        assert_eq!(git.put(bytes).unwrap(), mem.put(bytes).unwrap());
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let result = GitChunkStore::open(dir.path().join("nope"));
        assert!(matches!(result, Err(StorageError::NotInitialized)));
    }
}
