//! The ref table.
//!
//! Maps names to hashes:
//! - `refs/heads/<branch>` -> commit
//! - `refs/tags/<tag>` -> commit
//! - `refs/workingSets/<branch>` -> table snapshot root
//!
//! A [`RefTable`] is a plain value decoded from one manifest version. Edits
//! are made on a private copy and published through
//! [`Store::update_refs`](crate::storage::Store::update_refs), which swaps the
//! manifest with compare-and-swap and replays the edit if it loses the race.

use std::collections::BTreeMap;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, ChunkId, CommitId, RefName, RootId, TagName};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefTable {
    refs: BTreeMap<RefName, ChunkId>,
}

impl RefTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (RefName, ChunkId)>) -> Self {
        Self {
            refs: entries.into_iter().collect(),
        }
    }

    /// raw lookup of any entry
    pub fn get(&self, name: &RefName) -> Option<ChunkId> {
        self.refs.get(name).copied()
    }

    /// all entries ordered by ref path
    pub fn entries(&self) -> impl Iterator<Item = (&RefName, ChunkId)> {
        self.refs.iter().map(|(name, id)| (name, *id))
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    // ==================== Branches ====================

    pub fn branch(&self, name: &BranchName) -> Option<CommitId> {
        self.get(&RefName::Branch(name.clone())).map(CommitId::new)
    }

    pub fn has_branch(&self, name: &BranchName) -> bool {
        self.refs.contains_key(&RefName::Branch(name.clone()))
    }

    /// branches ordered by name
    pub fn branches(&self) -> Vec<(BranchName, CommitId)> {
        self.refs
            .iter()
            .filter_map(|(name, id)| match name {
                RefName::Branch(b) => Some((b.clone(), CommitId::new(*id))),
                _ => None,
            })
            .collect()
    }

    /// create or move a branch
    pub fn set_branch(&mut self, name: &BranchName, commit: CommitId) {
        self.refs.insert(RefName::Branch(name.clone()), commit.chunk());
    }

    /// remove a branch and its working set
    pub fn delete_branch(&mut self, name: &BranchName) -> StorageResult<CommitId> {
        let removed = self
            .refs
            .remove(&RefName::Branch(name.clone()))
            .ok_or_else(|| StorageError::BranchNotFound(name.clone()))?;
        self.refs.remove(&RefName::WorkingSet(name.clone()));
        Ok(CommitId::new(removed))
    }

    /// rename a branch, carrying its working set along
    pub fn rename_branch(&mut self, old: &BranchName, new: &BranchName) -> StorageResult<()> {
        if !self.has_branch(old) {
            return Err(StorageError::BranchNotFound(old.clone()));
        }
        if old == new {
            return Ok(());
        }
        if self.has_branch(new) {
            return Err(StorageError::BranchAlreadyExists(new.clone()));
        }

        let head = self
            .refs
            .remove(&RefName::Branch(old.clone()))
            .ok_or_else(|| StorageError::BranchNotFound(old.clone()))?;
        self.refs.insert(RefName::Branch(new.clone()), head);
        if let Some(root) = self.refs.remove(&RefName::WorkingSet(old.clone())) {
            self.refs.insert(RefName::WorkingSet(new.clone()), root);
        }
        Ok(())
    }

    // ==================== Working sets ====================

    pub fn working_set(&self, branch: &BranchName) -> Option<RootId> {
        self.get(&RefName::WorkingSet(branch.clone())).map(RootId::new)
    }

    pub fn set_working_set(&mut self, branch: &BranchName, root: RootId) {
        self.refs.insert(RefName::WorkingSet(branch.clone()), root.chunk());
    }

    // ==================== Tags ====================

    pub fn tag(&self, name: &TagName) -> Option<CommitId> {
        self.get(&RefName::Tag(name.clone())).map(CommitId::new)
    }

    pub fn tags(&self) -> Vec<(TagName, CommitId)> {
        self.refs
            .iter()
            .filter_map(|(name, id)| match name {
                RefName::Tag(t) => Some((t.clone(), CommitId::new(*id))),
                _ => None,
            })
            .collect()
    }

    /// tags are immutable: creating an existing tag fails
    pub fn create_tag(&mut self, name: &TagName, commit: CommitId) -> StorageResult<()> {
        let key = RefName::Tag(name.clone());
        if self.refs.contains_key(&key) {
            return Err(StorageError::TagAlreadyExists(name.clone()));
        }
        self.refs.insert(key, commit.chunk());
        Ok(())
    }

    pub fn delete_tag(&mut self, name: &TagName) -> StorageResult<CommitId> {
        self.refs
            .remove(&RefName::Tag(name.clone()))
            .map(CommitId::new)
            .ok_or_else(|| StorageError::TagNotFound(name.clone()))
    }

    /// every commit named by a branch or tag
    pub fn commit_heads(&self) -> Vec<CommitId> {
        self.refs
            .iter()
            .filter(|(name, _)| !matches!(name, RefName::WorkingSet(_)))
            .map(|(_, id)| CommitId::new(*id))
            .collect()
    }
}
