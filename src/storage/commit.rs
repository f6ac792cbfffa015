//! Commit records and commit graph traversal.
//!
//! commits are the atomic units of history:
//! - each commit names its parents and one table snapshot root
//! - a commit's id is the hash of its encoded chunk, so it is never mutated
//! - branches and tags point at commits, working sets point at roots
//!
//! this module handles the logical commit record, ancestry walks, history
//! iteration and reachability

use std::collections::{BinaryHeap, HashSet};

use chrono::{DateTime, Utc};

use crate::storage::chunks::ChunkStore;
use crate::storage::codec::FormatCodec;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, RootId, Signature};

/// commit metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl CommitMeta {
    pub fn new(signature: &Signature, message: impl Into<String>) -> Self {
        Self {
            author_name: signature.name.clone(),
            author_email: signature.email.clone(),
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// the logical content of a commit chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub parents: Vec<CommitId>,
    pub root: RootId,
    pub meta: CommitMeta,
}

impl CommitRecord {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn first_parent(&self) -> Option<CommitId> {
        self.parents.first().copied()
    }
}

/// a commit together with its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub commit: CommitRecord,
}

/// One ancestry modifier of a revision expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AncestryStep {
    /// `~n`: follow the first parent n times
    FirstParent(usize),
    /// `^n`: the n-th parent (1-based); `^0` is the commit itself
    Parent(usize),
}

/// Reads commits of one format out of a chunk store.
#[derive(Clone, Copy)]
pub struct CommitReader<'a> {
    chunks: &'a dyn ChunkStore,
    codec: &'static dyn FormatCodec,
}

impl<'a> CommitReader<'a> {
    pub fn new(chunks: &'a dyn ChunkStore, codec: &'static dyn FormatCodec) -> Self {
        Self { chunks, codec }
    }

    pub fn read(&self, id: CommitId) -> StorageResult<CommitRecord> {
        let bytes = self.chunks.get(id.chunk()).map_err(|e| match e {
            StorageError::ChunkNotFound(_) => StorageError::CommitNotFound(id.to_string()),
            other => other,
        })?;
        self.codec.decode_commit(id.chunk(), &bytes)
    }

    /// read `id` if it names a commit of this reader's format
    ///
    /// missing chunks, chunks of another kind and chunks written under
    /// another format all come back as `None`
    pub fn lookup(&self, id: CommitId) -> StorageResult<Option<CommitRecord>> {
        match self.read(id) {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::CommitNotFound(_) | StorageError::CorruptedChunk { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// apply ancestry modifiers to `start`
    ///
    /// returns `None` when the walk runs off the root of the graph
    pub fn ancestor(&self, start: CommitId, steps: &[AncestryStep]) -> StorageResult<Option<CommitId>> {
        let mut current = start;
        for step in steps {
            let next = match *step {
                AncestryStep::Parent(0) => Some(current),
                AncestryStep::Parent(n) => self.read(current)?.parents.get(n - 1).copied(),
                AncestryStep::FirstParent(n) => {
                    let mut cursor = Some(current);
                    for _ in 0..n {
                        cursor = match cursor {
                            Some(id) => self.read(id)?.first_parent(),
                            None => break,
                        };
                    }
                    cursor
                }
            };
            match next {
                Some(id) => current = id,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// walk history newest first
    pub fn history(&self, start: CommitId) -> HistoryIterator<'a> {
        HistoryIterator::new(*self, start)
    }

    /// every commit reachable from `heads`, parents before children
    pub fn reachable(&self, heads: &[CommitId]) -> StorageResult<Vec<CommitId>> {
        let mut ordered = Vec::new();
        let mut done: HashSet<CommitId> = HashSet::new();
        let mut queued: HashSet<CommitId> = HashSet::new();

        for head in heads {
            // (commit, parents already pushed)
            let mut stack = vec![(*head, false)];
            while let Some((id, expanded)) = stack.pop() {
                if done.contains(&id) {
                    continue;
                }
                if expanded {
                    done.insert(id);
                    ordered.push(id);
                    continue;
                }
                if !queued.insert(id) {
                    continue;
                }
                stack.push((id, true));
                for parent in self.read(id)?.parents.into_iter().rev() {
                    if !done.contains(&parent) {
                        stack.push((parent, false));
                    }
                }
            }
        }

        Ok(ordered)
    }

    /// find the unique commit reachable from `heads` whose hex id starts with `prefix`
    pub fn find_by_prefix(&self, heads: &[CommitId], prefix: &str) -> StorageResult<PrefixMatch> {
        let prefix = prefix.to_ascii_lowercase();
        let mut found = None;
        for id in self.reachable(heads)? {
            if id.to_string().starts_with(&prefix) {
                if found.is_some_and(|existing| existing != id) {
                    return Ok(PrefixMatch::Ambiguous);
                }
                found = Some(id);
            }
        }
        Ok(match found {
            Some(id) => PrefixMatch::Unique(id),
            None => PrefixMatch::None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixMatch {
    None,
    Unique(CommitId),
    Ambiguous,
}

/// iterate over commit history starting from a commit
///
/// commits come out newest first by timestamp; each commit is yielded once
/// even when it is reachable through several merge parents
pub struct HistoryIterator<'a> {
    reader: CommitReader<'a>,
    pending: BinaryHeap<(DateTime<Utc>, CommitId)>,
    seen: HashSet<CommitId>,
    start: Option<CommitId>,
}

impl<'a> HistoryIterator<'a> {
    fn new(reader: CommitReader<'a>, start: CommitId) -> Self {
        Self {
            reader,
            pending: BinaryHeap::new(),
            seen: HashSet::new(),
            start: Some(start),
        }
    }

    fn enqueue(&mut self, id: CommitId) -> StorageResult<()> {
        if self.seen.insert(id) {
            let commit = self.reader.read(id)?;
            self.pending.push((commit.meta.timestamp, id));
        }
        Ok(())
    }
}

impl<'a> Iterator for HistoryIterator<'a> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(start) = self.start.take() {
            if let Err(e) = self.enqueue(start) {
                return Some(Err(e));
            }
        }

        let (_, id) = self.pending.pop()?;
        let commit = match self.reader.read(id) {
            Ok(commit) => commit,
            Err(e) => return Some(Err(e)),
        };
        for parent in &commit.parents {
            if let Err(e) = self.enqueue(*parent) {
                return Some(Err(e));
            }
        }
        Some(Ok(CommitInfo { id, commit }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunks::MemoryChunkStore;
    use crate::storage::codec::FormatVersion;
    use crate::storage::types::ChunkId;
    use chrono::Duration;

    struct Graph {
        chunks: MemoryChunkStore,
        root: RootId,
        clock: DateTime<Utc>,
    }

    impl Graph {
        fn new() -> Self {
            Self {
                chunks: MemoryChunkStore::new(),
                root: RootId::new(ChunkId::for_bytes(b"root").unwrap()),
                clock: Utc::now(),
            }
        }

        fn commit(&mut self, parents: &[CommitId], message: &str) -> CommitId {
            self.clock += Duration::seconds(1);
            let record = CommitRecord {
                parents: parents.to_vec(),
                root: self.root,
                meta: CommitMeta {
                    author_name: "Test".into(),
                    author_email: "test@test.com".into(),
                    timestamp: self.clock,
                    message: message.into(),
                },
            };
            let bytes = FormatVersion::V2.codec().encode_commit(&record).unwrap();
            CommitId::new(self.chunks.put(&bytes).unwrap())
        }

        fn reader(&self) -> CommitReader<'_> {
            CommitReader::new(&self.chunks, FormatVersion::V2.codec())
        }
    }

    #[test]
    fn test_ancestry_steps() {
        let mut g = Graph::new();
        let c1 = g.commit(&[], "init");
        let c2 = g.commit(&[c1], "second");
        let side = g.commit(&[c1], "side");
        let merge = g.commit(&[c2, side], "merge");

        let r = g.reader();
        assert_eq!(r.ancestor(merge, &[AncestryStep::FirstParent(1)]).unwrap(), Some(c2));
        assert_eq!(r.ancestor(merge, &[AncestryStep::FirstParent(2)]).unwrap(), Some(c1));
        assert_eq!(r.ancestor(merge, &[AncestryStep::Parent(2)]).unwrap(), Some(side));
        assert_eq!(r.ancestor(merge, &[AncestryStep::Parent(0)]).unwrap(), Some(merge));
        assert_eq!(
            r.ancestor(merge, &[AncestryStep::Parent(2), AncestryStep::FirstParent(1)]).unwrap(),
            Some(c1)
        );
        assert_eq!(r.ancestor(merge, &[AncestryStep::Parent(3)]).unwrap(), None);
        assert_eq!(r.ancestor(c1, &[AncestryStep::FirstParent(1)]).unwrap(), None);
    }

    #[test]
    fn test_history_iteration() {
        let mut g = Graph::new();
        let c1 = g.commit(&[], "first");
        let c2 = g.commit(&[c1], "second");
        let c3 = g.commit(&[c2], "third");

        let commits: Vec<_> = g.reader().history(c3).collect::<Result<_, _>>().unwrap();
        let ids: Vec<_> = commits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![c3, c2, c1]);
        assert_eq!(commits[0].commit.meta.summary(), "third");
    }

    #[test]
    fn test_history_visits_merge_base_once() {
        let mut g = Graph::new();
        let base = g.commit(&[], "base");
        let a = g.commit(&[base], "a");
        let b = g.commit(&[base], "b");
        let merge = g.commit(&[a, b], "merge");

        let commits: Vec<_> = g.reader().history(merge).collect::<Result<_, _>>().unwrap();
        assert_eq!(commits.len(), 4);
        assert!(commits[0].commit.is_merge());
        assert_eq!(commits.last().unwrap().id, base);
    }

    #[test]
    fn test_reachable_orders_parents_first() {
        let mut g = Graph::new();
        let base = g.commit(&[], "base");
        let a = g.commit(&[base], "a");
        let b = g.commit(&[base], "b");
        let merge = g.commit(&[a, b], "merge");

        let order = g.reader().reachable(&[merge, b]).unwrap();
        assert_eq!(order.len(), 4);
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(base) < pos(a));
        assert!(pos(base) < pos(b));
        assert!(pos(a) < pos(merge));
        assert!(pos(b) < pos(merge));
    }

    #[test]
    fn test_find_by_prefix() {
        let mut g = Graph::new();
        let c1 = g.commit(&[], "one");
        let c2 = g.commit(&[c1], "two");

        let r = g.reader();
        let full = c1.to_string();
        assert_eq!(r.find_by_prefix(&[c2], &full[..10]).unwrap(), PrefixMatch::Unique(c1));
        assert_eq!(r.find_by_prefix(&[c2], "").unwrap(), PrefixMatch::Ambiguous);
        assert_eq!(r.find_by_prefix(&[c1], &c2.to_string()).unwrap(), PrefixMatch::None);
    }

    #[test]
    fn test_missing_commit() {
        let g = Graph::new();
        let ghost = CommitId::new(ChunkId::for_bytes(b"ghost").unwrap());
        assert!(matches!(g.reader().read(ghost), Err(StorageError::CommitNotFound(_))));
    }
}
