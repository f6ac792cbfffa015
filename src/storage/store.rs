//! The store facade.
//!
//! [`Store`] ties a chunk store to the manifest protocol. It is the only
//! component that moves the manifest for ref edits: every branch, tag,
//! working set or config change is a logical edit on a private copy of the
//! ref table, published with compare-and-swap and replayed on a new base
//! when another writer got there first.
//!
//! Readers take a [`StoreState`] (one manifest version, decoded) and a
//! [`Snapshot`] (one table snapshot root) and never observe a torn update.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::storage::chunks::{ChunkStore, MemoryChunkStore, SwapResult};
use crate::storage::codec::{FormatCodec, FormatVersion};
use crate::storage::commit::{CommitInfo, CommitMeta, CommitReader, CommitRecord};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::manifest::{Manifest, StoreConfig};
use crate::storage::refs::RefTable;
use crate::storage::row::{RootValue, Row, TableData};
use crate::storage::types::{BranchName, ChunkId, CommitId, RootId, RowKey, Signature, TableName, TagName};

/// One manifest version, decoded.
#[derive(Debug, Clone)]
pub struct StoreState {
    pub manifest_id: ChunkId,
    pub manifest: Manifest,
    pub refs: RefTable,
    pub config: StoreConfig,
}

impl StoreState {
    pub fn format(&self) -> FormatVersion {
        self.manifest.format
    }

    pub fn codec(&self) -> &'static dyn FormatCodec {
        self.manifest.format.codec()
    }
}

/// A pending ref edit: a private copy of the ref table and config on top of
/// one manifest version.
pub struct RefEdit<'a> {
    pub refs: RefTable,
    pub config: StoreConfig,
    format: FormatVersion,
    chunks: &'a dyn ChunkStore,
}

impl<'a> RefEdit<'a> {
    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn codec(&self) -> &'static dyn FormatCodec {
        self.format.codec()
    }

    pub fn chunks(&self) -> &'a dyn ChunkStore {
        self.chunks
    }

    pub fn commits(&self) -> CommitReader<'a> {
        CommitReader::new(self.chunks, self.format.codec())
    }
}

/// Handle to one database store.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    chunks: Arc<dyn ChunkStore>,
    max_cas_retries: usize,
    signature: Signature,
    /// held for the duration of a format migration
    admin: Mutex<()>,
}

impl Store {
    fn with_chunks(chunks: Arc<dyn ChunkStore>, config: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                chunks,
                max_cas_retries: config.max_cas_retries.max(1),
                signature: config.signature.clone(),
                admin: Mutex::new(()),
            }),
        }
    }

    /// Open a store that already has a manifest.
    pub fn open(chunks: Arc<dyn ChunkStore>, config: &EngineConfig) -> StorageResult<Self> {
        let store = Self::with_chunks(chunks, config);
        let state = store.state()?;
        debug!(format = %state.format(), manifest = %state.manifest_id.short(), "opened store");
        Ok(store)
    }

    /// Initialize an empty chunk store.
    ///
    /// Writes an empty root, an initial commit on the configured default
    /// branch, and the first manifest.
    pub fn init(chunks: Arc<dyn ChunkStore>, config: &EngineConfig) -> StorageResult<Self> {
        if chunks.manifest_root()?.is_some() {
            return Err(StorageError::AlreadyInitialized);
        }

        let codec = config.format.codec();
        let root = RootId::new(chunks.put(&codec.encode_root(&RootValue::default())?)?);
        let commit = CommitRecord {
            parents: Vec::new(),
            root,
            meta: CommitMeta::new(&config.signature, "Initialize data repository"),
        };
        let head = CommitId::new(chunks.put(&codec.encode_commit(&commit)?)?);

        let mut refs = RefTable::new();
        refs.set_branch(&config.default_branch, head);
        refs.set_working_set(&config.default_branch, root);
        let store_config = StoreConfig {
            default_branch: config.default_branch.clone(),
        };

        let manifest = Manifest::new(
            config.format,
            chunks.put(&codec.encode_refs(&refs)?)?,
            chunks.put(&codec.encode_config(&store_config)?)?,
        );
        match chunks.swap_manifest(None, &manifest)? {
            (id, SwapResult::Swapped) => {
                info!(
                    format = %config.format,
                    default_branch = %config.default_branch,
                    manifest = %id.short(),
                    "initialized store"
                );
            }
            (_, SwapResult::Conflict(_)) => return Err(StorageError::AlreadyInitialized),
        }

        Ok(Self::with_chunks(chunks, config))
    }

    /// A fresh store that lives only in memory.
    pub fn in_memory(config: &EngineConfig) -> StorageResult<Self> {
        Self::init(Arc::new(MemoryChunkStore::new()), config)
    }

    pub fn chunks(&self) -> &dyn ChunkStore {
        self.inner.chunks.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    /// id of the current manifest; cheap check for "did anything change"
    pub fn manifest_id(&self) -> StorageResult<ChunkId> {
        self.chunks().manifest_root()?.ok_or(StorageError::NotInitialized)
    }

    /// Read and decode the current manifest, ref table and config.
    pub fn state(&self) -> StorageResult<StoreState> {
        let (manifest_id, manifest) = self
            .chunks()
            .read_manifest()?
            .ok_or(StorageError::NotInitialized)?;
        let codec = manifest.format.codec();
        let refs = codec.decode_refs(manifest.refs, &self.chunks().get(manifest.refs)?)?;
        let config = codec.decode_config(manifest.meta, &self.chunks().get(manifest.meta)?)?;
        Ok(StoreState {
            manifest_id,
            manifest,
            refs,
            config,
        })
    }

    pub fn format(&self) -> StorageResult<FormatVersion> {
        Ok(self.state()?.format())
    }

    /// reader for commits encoded under `format`
    pub fn commits(&self, format: FormatVersion) -> CommitReader<'_> {
        CommitReader::new(self.chunks(), format.codec())
    }

    pub(crate) fn lock_admin(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.admin.try_lock()
    }

    pub(crate) fn swap_manifest(&self, expected: ChunkId, manifest: &Manifest) -> StorageResult<(ChunkId, SwapResult)> {
        self.chunks().swap_manifest(Some(expected), manifest)
    }

    // ==================== Ref Edits ====================

    /// Apply a logical edit to the ref table and publish it.
    ///
    /// The edit runs against a private copy of the current ref table. If the
    /// manifest moved before the swap, the edit is replayed on the new base,
    /// at most `max_cas_retries` times. Edits that change nothing do not
    /// write a manifest.
    pub fn update_refs<T, F>(&self, operation: &str, mut edit: F) -> StorageResult<T>
    where
        F: FnMut(&mut RefEdit<'_>) -> StorageResult<T>,
    {
        let attempts = self.inner.max_cas_retries;
        for attempt in 1..=attempts {
            let base = self.state()?;
            let mut tx = RefEdit {
                refs: base.refs.clone(),
                config: base.config.clone(),
                format: base.format(),
                chunks: self.chunks(),
            };
            let value = edit(&mut tx)?;
            if tx.refs == base.refs && tx.config == base.config {
                return Ok(value);
            }

            let codec = base.codec();
            let manifest = Manifest::new(
                base.format(),
                self.chunks().put(&codec.encode_refs(&tx.refs)?)?,
                self.chunks().put(&codec.encode_config(&tx.config)?)?,
            );
            match self.chunks().swap_manifest(Some(base.manifest_id), &manifest)? {
                (id, SwapResult::Swapped) => {
                    debug!(operation, attempt, manifest = %id.short(), "manifest swapped");
                    return Ok(value);
                }
                (_, SwapResult::Conflict(current)) => {
                    debug!(
                        operation,
                        attempt,
                        current = ?current.map(|id| id.short()),
                        "manifest moved underneath ref edit, replaying"
                    );
                }
            }
        }

        warn!(operation, attempts, "ref edit lost every manifest race");
        Err(StorageError::ConcurrentModification {
            operation: operation.to_string(),
            attempts,
        })
    }

    // ==================== Branch Operations ====================

    /// Create a branch at `start` with a clean working set.
    pub fn create_branch(&self, name: &BranchName, start: CommitId) -> StorageResult<()> {
        self.update_refs("create branch", |tx| {
            if tx.refs.has_branch(name) {
                return Err(StorageError::BranchAlreadyExists(name.clone()));
            }
            let commit = tx.commits().read(start)?;
            tx.refs.set_branch(name, start);
            tx.refs.set_working_set(name, commit.root);
            Ok(())
        })?;
        info!(branch = %name, commit = %start.short(), "created branch");
        Ok(())
    }

    /// Point a branch at `commit`, creating it if needed.
    ///
    /// The working set is reset to the commit's root.
    pub fn set_branch(&self, name: &BranchName, commit: CommitId) -> StorageResult<()> {
        self.update_refs("set branch", |tx| {
            let record = tx.commits().read(commit)?;
            tx.refs.set_branch(name, commit);
            tx.refs.set_working_set(name, record.root);
            Ok(())
        })?;
        info!(branch = %name, commit = %commit.short(), "moved branch");
        Ok(())
    }

    /// Delete a branch and its working set.
    ///
    /// Never blocked by sessions bound to the branch; they fail on their
    /// next operation instead.
    pub fn delete_branch(&self, name: &BranchName) -> StorageResult<CommitId> {
        let (head, was_default) = self.update_refs("delete branch", |tx| {
            let head = tx.refs.delete_branch(name)?;
            Ok((head, &tx.config.default_branch == name))
        })?;
        if was_default {
            warn!(branch = %name, "deleted the default branch");
        } else {
            info!(branch = %name, commit = %head.short(), "deleted branch");
        }
        Ok(head)
    }

    /// Rename a branch. The default branch setting follows the rename.
    pub fn rename_branch(&self, old: &BranchName, new: &BranchName) -> StorageResult<()> {
        self.update_refs("rename branch", |tx| {
            tx.refs.rename_branch(old, new)?;
            if &tx.config.default_branch == old {
                tx.config.default_branch = new.clone();
            }
            Ok(())
        })?;
        info!(from = %old, to = %new, "renamed branch");
        Ok(())
    }

    pub fn resolve_branch(&self, name: &BranchName) -> StorageResult<CommitId> {
        self.state()?
            .refs
            .branch(name)
            .ok_or_else(|| StorageError::BranchNotFound(name.clone()))
    }

    pub fn branch_exists(&self, name: &BranchName) -> StorageResult<bool> {
        Ok(self.state()?.refs.has_branch(name))
    }

    /// List all branches, ordered by name.
    pub fn list_branches(&self) -> StorageResult<Vec<(BranchName, CommitId)>> {
        Ok(self.state()?.refs.branches())
    }

    // ==================== Tag Operations ====================

    pub fn create_tag(&self, name: &TagName, commit: CommitId) -> StorageResult<()> {
        self.update_refs("create tag", |tx| {
            tx.commits().read(commit)?;
            tx.refs.create_tag(name, commit)
        })?;
        info!(tag = %name, commit = %commit.short(), "created tag");
        Ok(())
    }

    pub fn delete_tag(&self, name: &TagName) -> StorageResult<CommitId> {
        let commit = self.update_refs("delete tag", |tx| tx.refs.delete_tag(name))?;
        info!(tag = %name, "deleted tag");
        Ok(commit)
    }

    pub fn list_tags(&self) -> StorageResult<Vec<(TagName, CommitId)>> {
        Ok(self.state()?.refs.tags())
    }

    // ==================== Store Config ====================

    pub fn default_branch(&self) -> StorageResult<BranchName> {
        Ok(self.state()?.config.default_branch)
    }

    /// Change the branch bare database identifiers resolve to.
    ///
    /// The branch must exist when the setting is made.
    pub fn set_default_branch(&self, name: &BranchName) -> StorageResult<()> {
        self.update_refs("set default branch", |tx| {
            if !tx.refs.has_branch(name) {
                return Err(StorageError::BranchNotFound(name.clone()));
            }
            tx.config.default_branch = name.clone();
            Ok(())
        })?;
        info!(branch = %name, "default branch changed");
        Ok(())
    }

    // ==================== Working Sets ====================

    /// Edit the working set of `branch` and publish the new root.
    ///
    /// The edit is replayed against the latest working set if another writer
    /// moved the manifest first.
    pub fn edit_working_set<T, F>(&self, branch: &BranchName, mut edit: F) -> StorageResult<T>
    where
        F: FnMut(&mut RootEditor<'_>) -> StorageResult<T>,
    {
        self.update_refs("write working set", |tx| {
            let root = match tx.refs.working_set(branch) {
                Some(root) => root,
                None if tx.refs.has_branch(branch) => {
                    return Err(StorageError::WorkingSetNotFound(branch.clone()))
                }
                None => return Err(StorageError::BranchNotFound(branch.clone())),
            };

            let mut editor = RootEditor::load(tx.chunks(), tx.codec(), root)?;
            let value = edit(&mut editor)?;
            if editor.is_dirty() {
                let root = editor.write()?;
                tx.refs.set_working_set(branch, root);
            }
            Ok(value)
        })
    }

    /// Fold the working set of `branch` into a new commit and advance the
    /// branch to it.
    pub fn commit(&self, branch: &BranchName, message: &str) -> StorageResult<CommitId> {
        let signature = self.inner.signature.clone();
        self.commit_as(branch, message, &signature)
    }

    pub fn commit_as(&self, branch: &BranchName, message: &str, signature: &Signature) -> StorageResult<CommitId> {
        let meta = CommitMeta::new(signature, message);
        let id = self.update_refs("commit", |tx| {
            let head = tx
                .refs
                .branch(branch)
                .ok_or_else(|| StorageError::BranchNotFound(branch.clone()))?;
            let root = tx
                .refs
                .working_set(branch)
                .ok_or_else(|| StorageError::WorkingSetNotFound(branch.clone()))?;
            if tx.commits().read(head)?.root == root {
                return Err(StorageError::NothingToCommit(branch.clone()));
            }

            let record = CommitRecord {
                parents: vec![head],
                root,
                meta: meta.clone(),
            };
            let id = CommitId::new(tx.chunks().put(&tx.codec().encode_commit(&record)?)?);
            tx.refs.set_branch(branch, id);
            Ok(id)
        })?;
        info!(branch = %branch, commit = %id.short(), summary = meta.summary(), "committed");
        Ok(id)
    }

    // ==================== Reads ====================

    /// Load the table snapshot rooted at `root`, encoded under `format`.
    pub fn snapshot(&self, format: FormatVersion, root: RootId) -> StorageResult<Snapshot> {
        let codec = format.codec();
        let bytes = self.chunks().get(root.chunk())?;
        let value = codec.decode_root(root.chunk(), &bytes)?;
        Ok(Snapshot {
            chunks: Arc::clone(&self.inner.chunks),
            format,
            root_id: root,
            root: value,
        })
    }

    /// Commit history, newest first.
    pub fn history(&self, format: FormatVersion, from: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        let iter = self.commits(format).history(from);
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }
}

/// A read-only view of one table snapshot root.
#[derive(Clone)]
pub struct Snapshot {
    chunks: Arc<dyn ChunkStore>,
    format: FormatVersion,
    root_id: RootId,
    root: RootValue,
}

impl Snapshot {
    pub fn root_id(&self) -> RootId {
        self.root_id
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn list_tables(&self) -> Vec<TableName> {
        self.root.names()
    }

    pub fn table_exists(&self, table: &TableName) -> bool {
        self.root.contains(table)
    }

    pub fn table(&self, table: &TableName) -> StorageResult<TableData> {
        let id = self
            .root
            .table(table)
            .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;
        self.format.codec().read_table(self.chunks.as_ref(), id)
    }

    /// All rows of a table in key order.
    ///
    /// Warning: This reads all rows into memory.
    pub fn scan_table(&self, table: &TableName) -> StorageResult<Vec<Row>> {
        Ok(self.table(table)?.rows.into_values().collect())
    }

    pub fn read_row(&self, table: &TableName, key: &RowKey) -> StorageResult<Option<Row>> {
        Ok(self.table(table)?.rows.remove(key))
    }

    pub fn count_rows(&self, table: &TableName) -> StorageResult<usize> {
        Ok(self.table(table)?.len())
    }
}

/// Mutable view of a root during a working-set edit.
pub struct RootEditor<'a> {
    chunks: &'a dyn ChunkStore,
    codec: &'static dyn FormatCodec,
    root: RootValue,
    dirty: bool,
}

impl<'a> RootEditor<'a> {
    fn load(chunks: &'a dyn ChunkStore, codec: &'static dyn FormatCodec, root: RootId) -> StorageResult<Self> {
        let root = codec.decode_root(root.chunk(), &chunks.get(root.chunk())?)?;
        Ok(Self {
            chunks,
            codec,
            root,
            dirty: false,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn list_tables(&self) -> Vec<TableName> {
        self.root.names()
    }

    pub fn table(&self, table: &TableName) -> StorageResult<TableData> {
        let id = self
            .root
            .table(table)
            .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;
        self.codec.read_table(self.chunks, id)
    }

    pub fn create_table(&mut self, table: &TableName) -> StorageResult<()> {
        if self.root.contains(table) {
            return Err(StorageError::TableAlreadyExists(table.clone()));
        }
        self.put_table(table, &TableData::new())
    }

    pub fn drop_table(&mut self, table: &TableName) -> StorageResult<()> {
        self.root
            .tables
            .remove(table)
            .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;
        self.dirty = true;
        Ok(())
    }

    /// replace the whole contents of a table
    pub fn put_table(&mut self, table: &TableName, data: &TableData) -> StorageResult<()> {
        let id = self.codec.write_table(self.chunks, data)?;
        self.root.tables.insert(table.clone(), id);
        self.dirty = true;
        Ok(())
    }

    pub fn insert_row(&mut self, table: &TableName, row: Row) -> StorageResult<()> {
        let mut data = self.table(table)?;
        data.insert(table, row)?;
        self.put_table(table, &data)
    }

    pub fn upsert_row(&mut self, table: &TableName, row: Row) -> StorageResult<()> {
        let mut data = self.table(table)?;
        data.upsert(row)?;
        self.put_table(table, &data)
    }

    pub fn delete_row(&mut self, table: &TableName, key: &RowKey) -> StorageResult<Row> {
        let mut data = self.table(table)?;
        let row = data.delete(table, key)?;
        self.put_table(table, &data)?;
        Ok(row)
    }

    fn write(&self) -> StorageResult<RootId> {
        let bytes = self.codec.encode_root(&self.root)?;
        Ok(RootId::new(self.chunks.put(&bytes)?))
    }
}
