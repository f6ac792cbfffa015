//! Logical equivalence checks between an old-format graph and its translation.
//!
//! Hashes are expected to differ across formats, so equivalence is decided on
//! decoded content: commit metadata, the parent mapping, and every row of
//! every table.

use std::collections::HashSet;

use crate::migrate::error::{MigrationError, MigrationResult, Unit};
use crate::migrate::translate::Translator;
use crate::storage::{ChunkStore, CommitId, FormatCodec, RefName, RefTable, RootId, RootValue};

pub(crate) struct Verifier<'a> {
    chunks: &'a dyn ChunkStore,
    from: &'static dyn FormatCodec,
    to: &'static dyn FormatCodec,
    checked_roots: HashSet<RootId>,
    pub(crate) commits: usize,
    pub(crate) tables: usize,
}

fn mismatch(unit: Unit, reason: impl Into<String>) -> MigrationError {
    MigrationError::Verification {
        unit,
        reason: reason.into(),
    }
}

impl<'a> Verifier<'a> {
    pub(crate) fn new(chunks: &'a dyn ChunkStore, from: &'static dyn FormatCodec, to: &'static dyn FormatCodec) -> Self {
        Self {
            chunks,
            from,
            to,
            checked_roots: HashSet::new(),
            commits: 0,
            tables: 0,
        }
    }

    fn load(&self, codec: &'static dyn FormatCodec, unit: &Unit, id: RootId) -> MigrationResult<RootValue> {
        self.chunks
            .get(id.chunk())
            .and_then(|bytes| codec.decode_root(id.chunk(), &bytes))
            .map_err(MigrationError::translate(unit.clone()))
    }

    /// every translated ref points at the translation of its former target
    pub(crate) fn refs(&self, old: &RefTable, new: &RefTable, translator: &Translator<'_>) -> MigrationResult<()> {
        for (name, old_id) in old.entries() {
            let expected = match name {
                RefName::WorkingSet(_) => translator.roots.get(&RootId::new(old_id)).map(|r| r.chunk()),
                RefName::Branch(_) | RefName::Tag(_) => {
                    translator.commits.get(&CommitId::new(old_id)).map(|c| c.chunk())
                }
            };
            if expected.is_none() || new.get(name) != expected {
                return Err(mismatch(Unit::Ref(name.clone()), "ref does not point at the translated target"));
            }
        }
        if let Some((extra, _)) = new.entries().find(|(name, _)| old.get(name).is_none()) {
            return Err(mismatch(Unit::Ref(extra.clone()), "ref appeared during translation"));
        }
        Ok(())
    }

    /// compare a commit with its translation, including its whole snapshot
    pub(crate) fn commit(&mut self, old: CommitId, translator: &Translator<'_>) -> MigrationResult<()> {
        let unit = Unit::Commit(old);
        let new = *translator
            .commits
            .get(&old)
            .ok_or_else(|| mismatch(unit.clone(), "commit was not translated"))?;

        let read = |codec: &'static dyn FormatCodec, id: CommitId| {
            self.chunks
                .get(id.chunk())
                .and_then(|bytes| codec.decode_commit(id.chunk(), &bytes))
                .map_err(MigrationError::translate(unit.clone()))
        };
        let before = read(self.from, old)?;
        let after = read(self.to, new)?;

        if before.meta != after.meta {
            return Err(mismatch(unit, "commit metadata differs"));
        }
        let mapped: Vec<Option<CommitId>> = before.parents.iter().map(|p| translator.commits.get(p).copied()).collect();
        let actual: Vec<Option<CommitId>> = after.parents.iter().map(|p| Some(*p)).collect();
        if mapped != actual {
            return Err(mismatch(unit, "parents do not map to translated parents"));
        }
        if translator.roots.get(&before.root) != Some(&after.root) {
            return Err(mismatch(unit, "root does not map to translated root"));
        }

        self.root(before.root, after.root)?;
        self.commits += 1;
        Ok(())
    }

    /// row-level equality of every table of two roots
    pub(crate) fn root(&mut self, old: RootId, new: RootId) -> MigrationResult<()> {
        if !self.checked_roots.insert(old) {
            return Ok(());
        }

        let unit = Unit::Root(old);
        let before = self.load(self.from, &unit, old)?;
        let after = self.load(self.to, &unit, new)?;

        let names_before = before.names();
        if names_before != after.names() {
            return Err(mismatch(unit, "table sets differ"));
        }

        for name in names_before {
            let table_unit = Unit::Table {
                root: old,
                table: name.clone(),
            };
            let (Some(old_table), Some(new_table)) = (before.table(&name), after.table(&name)) else {
                return Err(mismatch(table_unit, "table missing"));
            };
            let old_rows = self
                .from
                .read_table(self.chunks, old_table)
                .map_err(MigrationError::translate(table_unit.clone()))?;
            let new_rows = self
                .to
                .read_table(self.chunks, new_table)
                .map_err(MigrationError::translate(table_unit.clone()))?;
            if old_rows != new_rows {
                let first = old_rows
                    .iter()
                    .zip(new_rows.iter())
                    .find(|(a, b)| a != b)
                    .map(|(a, _)| a.key.to_string())
                    .unwrap_or_else(|| format!("{} rows before, {} after", old_rows.len(), new_rows.len()));
                return Err(mismatch(table_unit, format!("rows differ at {}", first)));
            }
            self.tables += 1;
        }
        Ok(())
    }
}
