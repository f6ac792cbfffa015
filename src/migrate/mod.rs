//! Storage format migration.
//!
//! A migration re-encodes every unit reachable from the store's refs under a
//! new format codec, checks that the translation is logically identical to
//! the original, and then publishes it with a single manifest swap.
//!
//! ```text
//!   read manifest ──► translate (post-order) ──► rewrite refs ──► verify ──► swap
//!        │                                                                 │
//!        └──────────── expected manifest id ───────────────────────────────┘
//! ```
//!
//! Old chunks are never touched. Until the swap, readers keep seeing the old
//! manifest; after it, sessions pinned to old commits keep decoding them with
//! the codec they were bound under.

mod error;
mod translate;
mod verify;

pub use error::{MigrationError, MigrationResult, Unit};

use std::collections::HashSet;

use parking_lot::MutexGuard;
use tracing::{debug, info, warn};

use crate::storage::{
    ChunkId, CommitId, FormatVersion, Manifest, RefName, RefTable, RootId, StorageError, Store, StoreState, SwapResult,
};
use translate::Translator;
use verify::Verifier;

/// How much of the translated graph to check before the swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// every translated commit and working set
    All,
    /// the heads of up to `n` refs, spread evenly over the ref table
    Sample(usize),
}

/// What a successful migration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: FormatVersion,
    pub to: FormatVersion,
    /// manifest in effect after the migration
    pub manifest: ChunkId,
    pub commits: usize,
    pub roots: usize,
    pub tables: usize,
    pub refs: usize,
    pub verified_commits: usize,
    pub verified_tables: usize,
}

/// Builder and entry point for a migration.
pub struct Migrator<'a> {
    store: &'a Store,
    target: FormatVersion,
    verify: VerifyMode,
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            target: FormatVersion::LATEST,
            verify: VerifyMode::All,
        }
    }

    pub fn target(mut self, format: FormatVersion) -> Self {
        self.target = format;
        self
    }

    pub fn verify(mut self, mode: VerifyMode) -> Self {
        self.verify = mode;
        self
    }

    /// Translate and verify, then swap the manifest.
    pub fn run(self) -> MigrationResult<MigrationReport> {
        self.prepare()?.apply()
    }

    /// Translate and verify without publishing anything.
    ///
    /// The returned plan holds the store's migration lock until it is applied
    /// or dropped.
    pub fn prepare(self) -> MigrationResult<MigrationPlan<'a>> {
        let guard = self.store.lock_admin().ok_or(MigrationError::MigrationInProgress)?;

        let state = self.store.state()?;
        let from = state.format();
        if from == self.target {
            return Err(MigrationError::AlreadyCurrent(from));
        }
        info!(from = %from, to = %self.target, manifest = %state.manifest_id.short(), "starting migration");

        let chunks = self.store.chunks();
        let mut translator = Translator::new(chunks, from.codec(), self.target.codec());

        let heads = state.refs.commit_heads();
        let order = self.store.commits(from).reachable(&heads).map_err(|source| {
            let unit = match &source {
                StorageError::CorruptedChunk { id, .. } | StorageError::ChunkNotFound(id) => Unit::Chunk(*id),
                _ => Unit::Manifest(state.manifest.refs),
            };
            MigrationError::Translate { unit, source }
        })?;
        for commit in &order {
            translator.commit(*commit)?;
        }
        let refs = translator.refs(&state.refs)?;
        debug!(
            commits = translator.commits.len(),
            roots = translator.roots.len(),
            tables = translator.tables.len(),
            "translated reachable units"
        );

        let mut verifier = Verifier::new(chunks, from.codec(), self.target.codec());
        verifier.refs(&state.refs, &refs, &translator)?;
        match self.verify {
            VerifyMode::All => {
                for commit in &order {
                    verifier.commit(*commit, &translator)?;
                }
                for (name, root) in state.refs.entries() {
                    if let RefName::WorkingSet(_) = name {
                        let old = RootId::new(root);
                        if let Some(new) = translator.roots.get(&old) {
                            verifier.root(old, *new)?;
                        }
                    }
                }
            }
            VerifyMode::Sample(n) => {
                for commit in sample_heads(&state.refs, n) {
                    verifier.commit(commit, &translator)?;
                }
            }
        }
        debug!(
            commits = verifier.commits,
            tables = verifier.tables,
            "verified translation"
        );

        let codec = self.target.codec();
        let unit = || Unit::Manifest(state.manifest_id);
        let refs_chunk = codec
            .encode_refs(&refs)
            .and_then(|bytes| chunks.put(&bytes))
            .map_err(MigrationError::translate(unit()))?;
        let meta_chunk = codec
            .encode_config(&state.config)
            .and_then(|bytes| chunks.put(&bytes))
            .map_err(MigrationError::translate(unit()))?;

        let report = MigrationReport {
            from,
            to: self.target,
            manifest: state.manifest_id,
            commits: translator.commits.len(),
            roots: translator.roots.len(),
            tables: translator.tables.len(),
            refs: refs.len(),
            verified_commits: verifier.commits,
            verified_tables: verifier.tables,
        };

        Ok(MigrationPlan {
            store: self.store,
            _guard: guard,
            base: state,
            manifest: Manifest::new(self.target, refs_chunk, meta_chunk),
            report,
        })
    }
}

/// A translated, verified migration waiting for its manifest swap.
pub struct MigrationPlan<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
    base: StoreState,
    manifest: Manifest,
    report: MigrationReport,
}

impl<'a> MigrationPlan<'a> {
    pub fn report(&self) -> &MigrationReport {
        &self.report
    }

    /// Swap the manifest, expecting the one the translation started from.
    pub fn apply(self) -> MigrationResult<MigrationReport> {
        let expected = self.base.manifest_id;
        match self.store.swap_manifest(expected, &self.manifest)? {
            (id, SwapResult::Swapped) => {
                let report = MigrationReport {
                    manifest: id,
                    ..self.report
                };
                info!(
                    from = %report.from,
                    to = %report.to,
                    commits = report.commits,
                    tables = report.tables,
                    manifest = %id.short(),
                    "migration complete"
                );
                Ok(report)
            }
            (_, SwapResult::Conflict(found)) => {
                warn!(expected = %expected.short(), "manifest moved during migration, discarding translation");
                Err(MigrationError::ConcurrentMutation { expected, found })
            }
        }
    }
}

/// up to `n` distinct ref heads, spread evenly over the ref table in ref
/// path order
fn sample_heads(refs: &RefTable, n: usize) -> Vec<CommitId> {
    let mut seen = HashSet::new();
    let heads: Vec<CommitId> = refs.commit_heads().into_iter().filter(|id| seen.insert(*id)).collect();
    if n == 0 || heads.is_empty() {
        return Vec::new();
    }
    let stride = (heads.len() / n).max(1);
    heads.into_iter().step_by(stride).take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::{BranchName, Row, RowKey, TableName, TagName};

    fn t() -> TableName {
        TableName::new("t").unwrap()
    }

    /// main at H1 with table t holding one row, tagged v1
    fn setup(format: FormatVersion) -> Store {
        let store = Store::in_memory(&EngineConfig::in_memory().format(format)).unwrap();
        let main = BranchName::main();
        store
            .edit_working_set(&main, |root| {
                root.create_table(&t())?;
                root.insert_row(
                    &t(),
                    Row::from_value(RowKey::new("r1").unwrap(), serde_json::json!({"v": 1.5, "s": "x"}))?,
                )
            })
            .unwrap();
        let head = store.commit(&main, "H1").unwrap();
        store.create_tag(&TagName::new("v1").unwrap(), head).unwrap();
        store
    }

    fn read_row(store: &Store, commit: CommitId) -> Row {
        let format = store.format().unwrap();
        let root = store.commits(format).read(commit).unwrap().root;
        store
            .snapshot(format, root)
            .unwrap()
            .read_row(&t(), &RowKey::new("r1").unwrap())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_migration_preserves_content() {
        let store = setup(FormatVersion::V1);
        let tag = TagName::new("v1").unwrap();
        let old_tag = store.list_tags().unwrap()[0].1;
        let before = read_row(&store, old_tag);

        let report = Migrator::new(&store).target(FormatVersion::V2).run().unwrap();
        assert_eq!(report.from, FormatVersion::V1);
        assert_eq!(report.to, FormatVersion::V2);
        assert_eq!(report.commits, 2);
        assert_eq!(report.verified_commits, 2);
        assert_eq!(store.format().unwrap(), FormatVersion::V2);
        assert_eq!(store.manifest_id().unwrap(), report.manifest);

        // the tag no longer names the old id but the translated one
        let tags = store.list_tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].0, tag);
        assert_ne!(tags[0].1, old_tag);

        let main = store.resolve_branch(&BranchName::main()).unwrap();
        assert_eq!(main, tags[0].1);
        assert_eq!(read_row(&store, main), before);
    }

    #[test]
    fn test_migration_translates_history_and_working_sets() {
        let store = setup(FormatVersion::V2);
        let main = BranchName::main();
        let head = store.resolve_branch(&main).unwrap();
        store.create_branch(&BranchName::new("side").unwrap(), head).unwrap();
        store
            .edit_working_set(&main, |root| root.create_table(&TableName::new("pending").unwrap()))
            .unwrap();

        Migrator::new(&store).target(FormatVersion::V1).run().unwrap();

        let state = store.state().unwrap();
        let head = state.refs.branch(&main).unwrap();
        let history = store.history(FormatVersion::V1, head, None).unwrap();
        let messages: Vec<_> = history.iter().map(|c| c.commit.meta.message.as_str()).collect();
        assert_eq!(messages, vec!["H1", "Initialize data repository"]);

        let ws = state.refs.working_set(&main).unwrap();
        let snapshot = store.snapshot(FormatVersion::V1, ws).unwrap();
        assert_eq!(snapshot.list_tables().len(), 2);

        // shared history translates to shared ids
        assert_eq!(state.refs.branch(&BranchName::new("side").unwrap()), Some(head));
    }

    #[test]
    fn test_already_current() {
        let store = setup(FormatVersion::V2);
        let result = Migrator::new(&store).target(FormatVersion::V2).run();
        assert!(matches!(result, Err(MigrationError::AlreadyCurrent(FormatVersion::V2))));
    }

    #[test]
    fn test_one_migration_at_a_time() {
        let store = setup(FormatVersion::V1);
        let plan = Migrator::new(&store).target(FormatVersion::V2).prepare().unwrap();
        let second = Migrator::new(&store).target(FormatVersion::V2).run();
        assert!(matches!(second, Err(MigrationError::MigrationInProgress)));
        plan.apply().unwrap();
    }

    #[test]
    fn test_concurrent_mutation_aborts() {
        let store = setup(FormatVersion::V1);
        let before = store.manifest_id().unwrap();

        let plan = Migrator::new(&store).target(FormatVersion::V2).prepare().unwrap();
        let head = store.resolve_branch(&BranchName::main()).unwrap();
        store.create_branch(&BranchName::new("late").unwrap(), head).unwrap();
        let moved = store.manifest_id().unwrap();
        assert_ne!(before, moved);

        match plan.apply() {
            Err(MigrationError::ConcurrentMutation { expected, found }) => {
                assert_eq!(expected, before);
                assert_eq!(found, Some(moved));
            }
            other => panic!("expected concurrent mutation, got {:?}", other),
        }
        assert_eq!(store.format().unwrap(), FormatVersion::V1);
        assert!(store.branch_exists(&BranchName::new("late").unwrap()).unwrap());
    }

    #[test]
    fn test_corrupted_unit_aborts_whole_migration() {
        let store = setup(FormatVersion::V1);
        let bogus = CommitId::new(store.chunks().put(b"not a commit").unwrap());
        store
            .update_refs("plant corrupt tag", |tx| {
                tx.refs.create_tag(&TagName::new("broken").unwrap(), bogus)
            })
            .unwrap();
        let before = store.manifest_id().unwrap();

        let err = Migrator::new(&store).target(FormatVersion::V2).run().unwrap_err();
        assert_eq!(err.unit(), Some(&Unit::Chunk(bogus.chunk())));
        assert!(matches!(
            err,
            MigrationError::Translate {
                source: StorageError::CorruptedChunk { .. },
                ..
            }
        ));
        assert_eq!(store.manifest_id().unwrap(), before);
        assert_eq!(store.format().unwrap(), FormatVersion::V1);
    }

    #[test]
    fn test_sampled_verification() {
        let store = setup(FormatVersion::V1);
        let report = Migrator::new(&store)
            .target(FormatVersion::V2)
            .verify(VerifyMode::Sample(1))
            .run()
            .unwrap();
        assert_eq!(report.verified_commits, 1);
        assert_eq!(report.verified_tables, 1);
    }

    #[test]
    fn test_pinned_commit_stays_readable_after_migration() {
        let store = setup(FormatVersion::V1);
        let old_head = store.resolve_branch(&BranchName::main()).unwrap();
        let old_root: RootId = store.commits(FormatVersion::V1).read(old_head).unwrap().root;

        Migrator::new(&store).target(FormatVersion::V2).run().unwrap();

        let snapshot = store.snapshot(FormatVersion::V1, old_root).unwrap();
        assert_eq!(snapshot.count_rows(&t()).unwrap(), 1);
    }

    #[test]
    fn test_near_reserved_columns_survive_both_directions() {
        let store = setup(FormatVersion::V2);
        let main = BranchName::main();
        let key = RowKey::new("r2").unwrap();
        let value = serde_json::json!({"pk": "a", "__pk": 1, "_pk_old": true, "version": [1, 2]});
        store
            .edit_working_set(&main, |root| root.insert_row(&t(), Row::from_value(key.clone(), value.clone())?))
            .unwrap();
        let head = store.commit(&main, "H2").unwrap();
        let before = store
            .snapshot(FormatVersion::V2, store.commits(FormatVersion::V2).read(head).unwrap().root)
            .unwrap()
            .read_row(&t(), &key)
            .unwrap();

        Migrator::new(&store).target(FormatVersion::V1).run().unwrap();
        Migrator::new(&store).target(FormatVersion::V2).run().unwrap();

        let head = store.resolve_branch(&main).unwrap();
        let root = store.commits(FormatVersion::V2).read(head).unwrap().root;
        let after = store.snapshot(FormatVersion::V2, root).unwrap().read_row(&t(), &key).unwrap();
        assert_eq!(after, before);
        assert_eq!(after.unwrap().get("__pk"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_reserved_column_in_packed_table_fails_translation() {
        let store = setup(FormatVersion::V2);
        let main = BranchName::main();
        let mut row = Row::from_value(RowKey::new("r2").unwrap(), serde_json::json!({"v": 2})).unwrap();
        row.data.insert("_version".to_string(), serde_json::json!(7));
        store
            .edit_working_set(&main, |root| {
                let mut table = root.table(&t())?;
                table.rows.insert(row.key.clone(), row.clone());
                root.put_table(&t(), &table)
            })
            .unwrap();
        store.commit(&main, "H2").unwrap();
        let before = store.manifest_id().unwrap();

        let err = Migrator::new(&store).target(FormatVersion::V1).run().unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Translate {
                unit: Unit::Table { .. },
                source: StorageError::SchemaViolation(_),
            }
        ));
        assert_eq!(store.manifest_id().unwrap(), before);
        assert_eq!(store.format().unwrap(), FormatVersion::V2);
    }

    #[test]
    fn test_sample_follows_ref_order() {
        let store = setup(FormatVersion::V1);
        let main = BranchName::main();
        let h1 = store.resolve_branch(&main).unwrap();
        let h0 = store.commits(FormatVersion::V1).read(h1).unwrap().parents[0];
        store.create_branch(&BranchName::new("a-old").unwrap(), h0).unwrap();
        store.create_branch(&BranchName::new("z-old").unwrap(), h0).unwrap();

        // branches a-old, main, z-old then tag v1; repeats of a head are skipped
        let refs = store.state().unwrap().refs;
        assert_eq!(sample_heads(&refs, 5), vec![h0, h1]);
        assert_eq!(sample_heads(&refs, 1), vec![h0]);
        assert!(sample_heads(&refs, 0).is_empty());
    }
}
