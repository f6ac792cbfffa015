//! Re-encoding of structural units from one format to another.
//!
//! Units are translated bottom-up: tables before the roots that name them,
//! roots and parents before the commits that name them. Every translation is
//! memoized, so shared history and unchanged tables are translated once and
//! identical content deduplicates to identical new ids.

use std::collections::HashMap;

use crate::migrate::error::{MigrationError, MigrationResult, Unit};
use crate::storage::{
    ChunkId, ChunkStore, CommitId, CommitRecord, FormatCodec, RefName, RefTable, RootId, RootValue, StorageError,
};

pub(crate) struct Translator<'a> {
    chunks: &'a dyn ChunkStore,
    from: &'static dyn FormatCodec,
    to: &'static dyn FormatCodec,
    pub(crate) commits: HashMap<CommitId, CommitId>,
    pub(crate) roots: HashMap<RootId, RootId>,
    pub(crate) tables: HashMap<ChunkId, ChunkId>,
}

impl<'a> Translator<'a> {
    pub(crate) fn new(chunks: &'a dyn ChunkStore, from: &'static dyn FormatCodec, to: &'static dyn FormatCodec) -> Self {
        Self {
            chunks,
            from,
            to,
            commits: HashMap::new(),
            roots: HashMap::new(),
            tables: HashMap::new(),
        }
    }

    /// translate one commit whose parents are already translated
    pub(crate) fn commit(&mut self, old: CommitId) -> MigrationResult<CommitId> {
        if let Some(new) = self.commits.get(&old) {
            return Ok(*new);
        }

        let unit = || Unit::Commit(old);
        let bytes = self.chunks.get(old.chunk()).map_err(MigrationError::translate(unit()))?;
        let record = self
            .from
            .decode_commit(old.chunk(), &bytes)
            .map_err(MigrationError::translate(unit()))?;

        let mut parents = Vec::with_capacity(record.parents.len());
        for parent in &record.parents {
            let translated = self.commits.get(parent).copied().ok_or_else(|| MigrationError::Translate {
                unit: unit(),
                source: StorageError::Internal(format!("parent {} not translated before its child", parent)),
            })?;
            parents.push(translated);
        }
        let root = self.root(record.root)?;

        let translated = CommitRecord {
            parents,
            root,
            meta: record.meta,
        };
        let new = self
            .to
            .encode_commit(&translated)
            .and_then(|bytes| self.chunks.put(&bytes))
            .map(CommitId::new)
            .map_err(MigrationError::translate(unit()))?;

        self.commits.insert(old, new);
        Ok(new)
    }

    pub(crate) fn root(&mut self, old: RootId) -> MigrationResult<RootId> {
        if let Some(new) = self.roots.get(&old) {
            return Ok(*new);
        }

        let unit = || Unit::Root(old);
        let bytes = self.chunks.get(old.chunk()).map_err(MigrationError::translate(unit()))?;
        let value = self
            .from
            .decode_root(old.chunk(), &bytes)
            .map_err(MigrationError::translate(unit()))?;

        let mut translated = RootValue::default();
        for (name, table) in value.tables {
            let new_table = match self.tables.get(&table) {
                Some(id) => *id,
                None => {
                    let unit = Unit::Table {
                        root: old,
                        table: name.clone(),
                    };
                    let data = self
                        .from
                        .read_table(self.chunks, table)
                        .map_err(MigrationError::translate(unit.clone()))?;
                    let id = self
                        .to
                        .write_table(self.chunks, &data)
                        .map_err(MigrationError::translate(unit))?;
                    self.tables.insert(table, id);
                    id
                }
            };
            translated.tables.insert(name, new_table);
        }

        let new = self
            .to
            .encode_root(&translated)
            .and_then(|bytes| self.chunks.put(&bytes))
            .map(RootId::new)
            .map_err(MigrationError::translate(unit()))?;

        self.roots.insert(old, new);
        Ok(new)
    }

    /// Rewrite every entry of `refs` to its translated target.
    ///
    /// Commits must already be translated; working set roots are translated
    /// here.
    pub(crate) fn refs(&mut self, refs: &RefTable) -> MigrationResult<RefTable> {
        let mut entries = Vec::with_capacity(refs.len());
        for (name, id) in refs.entries() {
            let new = match name {
                RefName::WorkingSet(branch) => self
                    .root(RootId::new(id))
                    .map_err(|e| match e {
                        MigrationError::Translate { source, .. } => MigrationError::Translate {
                            unit: Unit::WorkingSet(branch.clone()),
                            source,
                        },
                        other => other,
                    })?
                    .chunk(),
                RefName::Branch(_) | RefName::Tag(_) => self
                    .commits
                    .get(&CommitId::new(id))
                    .map(|c| c.chunk())
                    .ok_or_else(|| MigrationError::Translate {
                        unit: Unit::Ref(name.clone()),
                        source: StorageError::Internal("target commit was not translated".to_string()),
                    })?,
            };
            entries.push((name.clone(), new));
        }
        Ok(RefTable::from_entries(entries))
    }
}
