//! Database identifiers and revision resolution.
//!
//! A connection names its database as `<db>` or `<db>/<rev>`. The revision
//! is resolved against one decoded manifest version in strict priority:
//!
//! 1. an exact branch name, which gives a mutable target;
//! 2. an exact tag name;
//! 3. `base` followed by ancestry modifiers, where `base` is a branch, a tag,
//!    a full commit hash or an unambiguous hash prefix of at least 7 digits.
//!
//! `~n` follows the first parent n times (`~` alone is `~1`); `^n` selects
//! the n-th parent (`^` alone is `^1`, `^0` is the commit itself).

use std::fmt;

use crate::session::error::{SessionError, SessionResult};
use crate::storage::{
    is_hex, AncestryStep, BranchName, ChunkId, CommitId, CommitReader, PrefixMatch, RootId, StoreState, TagName,
};

/// separates the database name from the revision
pub const REVISION_DELIMITER: char = '/';

/// shortest hash prefix accepted as a revision
pub const MIN_PREFIX_LEN: usize = 7;

/// A parsed `<db>` or `<db>/<rev>` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseIdentifier {
    pub database: String,
    pub revision: Option<String>,
}

impl DatabaseIdentifier {
    pub fn parse(raw: &str) -> SessionResult<Self> {
        let raw = raw.trim();
        let (database, revision) = match raw.split_once(REVISION_DELIMITER) {
            Some((db, rev)) => (db, Some(rev)),
            None => (raw, None),
        };

        validate_database_name(database)?;
        if let Some(rev) = revision {
            if rev.is_empty() {
                return Err(SessionError::InvalidRevision {
                    revision: rev.to_string(),
                    reason: "empty revision".to_string(),
                });
            }
        }

        Ok(Self {
            database: database.to_string(),
            revision: revision.map(str::to_string),
        })
    }
}

impl fmt::Display for DatabaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}{}{}", self.database, REVISION_DELIMITER, rev),
            None => write!(f, "{}", self.database),
        }
    }
}

pub(crate) fn validate_database_name(name: &str) -> SessionResult<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(SessionError::InvalidIdentifier(name.to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(SessionError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// What a revision resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// a branch: mutable, reads see its working set
    Branch {
        name: BranchName,
        head: CommitId,
        working: RootId,
    },
    Tag { name: TagName, commit: CommitId },
    Commit { commit: CommitId },
}

impl Resolution {
    pub fn is_mutable(&self) -> bool {
        matches!(self, Resolution::Branch { .. })
    }

    pub fn commit(&self) -> CommitId {
        match self {
            Resolution::Branch { head, .. } => *head,
            Resolution::Tag { commit, .. } | Resolution::Commit { commit } => *commit,
        }
    }
}

/// `base` plus ancestry modifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionExpr {
    pub base: String,
    pub steps: Vec<AncestryStep>,
}

impl RevisionExpr {
    pub fn parse(raw: &str) -> SessionResult<Self> {
        let invalid = |reason: &str| SessionError::InvalidRevision {
            revision: raw.to_string(),
            reason: reason.to_string(),
        };

        let split = raw.find(|c: char| c == '~' || c == '^').unwrap_or(raw.len());
        let (base, mut rest) = raw.split_at(split);
        if base.is_empty() {
            return Err(invalid("missing base revision"));
        }

        let mut steps = Vec::new();
        while let Some(op) = rest.chars().next() {
            rest = &rest[op.len_utf8()..];
            let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let (digits, tail) = rest.split_at(digits_end);
            rest = tail;

            let n = if digits.is_empty() {
                1
            } else {
                digits.parse::<usize>().map_err(|_| invalid("ancestry count out of range"))?
            };
            match op {
                '~' => steps.push(AncestryStep::FirstParent(n)),
                '^' => steps.push(AncestryStep::Parent(n)),
                _ => return Err(invalid("unexpected character after ancestry modifier")),
            }
        }

        Ok(Self {
            base: base.to_string(),
            steps,
        })
    }
}

/// Resolve the store's default branch.
pub fn resolve_default(state: &StoreState, commits: CommitReader<'_>) -> SessionResult<Resolution> {
    let name = &state.config.default_branch;
    resolve_branch(state, commits, name)?
        .ok_or_else(|| SessionError::DefaultBranchUnavailable(name.to_string()))
}

/// Resolve a branch by name, `None` if it does not exist.
pub fn resolve_branch(
    state: &StoreState,
    commits: CommitReader<'_>,
    name: &BranchName,
) -> SessionResult<Option<Resolution>> {
    let Some(head) = state.refs.branch(name) else {
        return Ok(None);
    };
    let working = match state.refs.working_set(name) {
        Some(root) => root,
        None => commits.read(head)?.root,
    };
    Ok(Some(Resolution::Branch {
        name: name.clone(),
        head,
        working,
    }))
}

/// Resolve a revision specifier against one manifest version.
pub fn resolve(state: &StoreState, commits: CommitReader<'_>, raw: &str) -> SessionResult<Resolution> {
    if let Ok(name) = BranchName::new(raw) {
        if let Some(found) = resolve_branch(state, commits, &name)? {
            return Ok(found);
        }
    }
    if let Ok(name) = TagName::new(raw) {
        if let Some(commit) = state.refs.tag(&name) {
            return Ok(Resolution::Tag { name, commit });
        }
    }

    let expr = RevisionExpr::parse(raw)?;
    let base = resolve_base(state, commits, &expr.base)?
        .ok_or_else(|| SessionError::RevisionNotFound(raw.to_string()))?;
    let commit = commits
        .ancestor(base, &expr.steps)?
        .ok_or_else(|| SessionError::RevisionNotFound(raw.to_string()))?;
    Ok(Resolution::Commit { commit })
}

fn resolve_base(state: &StoreState, commits: CommitReader<'_>, base: &str) -> SessionResult<Option<CommitId>> {
    if let Some(head) = BranchName::new(base).ok().and_then(|b| state.refs.branch(&b)) {
        return Ok(Some(head));
    }
    if let Some(commit) = TagName::new(base).ok().and_then(|t| state.refs.tag(&t)) {
        return Ok(Some(commit));
    }
    if !is_hex(base) || base.len() < MIN_PREFIX_LEN || base.len() > ChunkId::HEX_LEN {
        return Ok(None);
    }

    if base.len() == ChunkId::HEX_LEN {
        // one chunk read; ids from before a format migration fail to decode
        let id = CommitId::from_hex(base)?;
        return Ok(commits.lookup(id)?.map(|_| id));
    }

    let heads = state.refs.commit_heads();
    match commits.find_by_prefix(&heads, base)? {
        PrefixMatch::Unique(id) => Ok(Some(id)),
        PrefixMatch::None => Ok(None),
        PrefixMatch::Ambiguous => Err(SessionError::AmbiguousRevision(base.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::storage::{
        ChunkStore, FormatVersion, MemoryChunkStore, Row, RowKey, StorageResult, Store, SwapResult, TableName,
    };

    #[test]
    fn test_parse_identifier() {
        let id = DatabaseIdentifier::parse("shop").unwrap();
        assert_eq!(id.database, "shop");
        assert_eq!(id.revision, None);

        let id = DatabaseIdentifier::parse("shop/feature/x").unwrap();
        assert_eq!(id.database, "shop");
        assert_eq!(id.revision.as_deref(), Some("feature/x"));
        assert_eq!(id.to_string(), "shop/feature/x");

        assert!(matches!(
            DatabaseIdentifier::parse("shop/"),
            Err(SessionError::InvalidRevision { .. })
        ));
        assert!(matches!(
            DatabaseIdentifier::parse("/main"),
            Err(SessionError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            DatabaseIdentifier::parse("sh op"),
            Err(SessionError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_parse_expression() {
        let expr = RevisionExpr::parse("main~2^2^").unwrap();
        assert_eq!(expr.base, "main");
        assert_eq!(
            expr.steps,
            vec![
                AncestryStep::FirstParent(2),
                AncestryStep::Parent(2),
                AncestryStep::Parent(1)
            ]
        );

        assert_eq!(RevisionExpr::parse("v1~").unwrap().steps, vec![AncestryStep::FirstParent(1)]);
        assert!(RevisionExpr::parse("~1").is_err());
        assert!(RevisionExpr::parse("main~x").is_err());
        assert!(RevisionExpr::parse("main~99999999999999999999999").is_err());
    }

    struct Fixture {
        store: Store,
        c1: CommitId,
        c2: CommitId,
    }

    /// main: c1 <- c2, tag v1 at c1
    fn fixture() -> Fixture {
        let store = Store::in_memory(&EngineConfig::in_memory()).unwrap();
        let main = BranchName::main();
        let c1 = store.resolve_branch(&main).unwrap();
        store
            .edit_working_set(&main, |root| root.create_table(&TableName::new("t").unwrap()))
            .unwrap();
        let c2 = store.commit(&main, "add t").unwrap();
        store.create_tag(&TagName::new("v1").unwrap(), c1).unwrap();
        Fixture { store, c1, c2 }
    }

    fn resolve_in(f: &Fixture, raw: &str) -> SessionResult<Resolution> {
        let state = f.store.state().unwrap();
        resolve(&state, f.store.commits(state.format()), raw)
    }

    #[test]
    fn test_priority_order() {
        let f = fixture();

        let r = resolve_in(&f, "main").unwrap();
        assert!(r.is_mutable());
        assert_eq!(r.commit(), f.c2);

        let r = resolve_in(&f, "v1").unwrap();
        assert!(matches!(r, Resolution::Tag { .. }));
        assert_eq!(r.commit(), f.c1);

        // a branch shadows a tag of the same name
        f.store.create_branch(&BranchName::new("v1").unwrap(), f.c2).unwrap();
        let r = resolve_in(&f, "v1").unwrap();
        assert!(r.is_mutable());
        assert_eq!(r.commit(), f.c2);
    }

    #[test]
    fn test_hashes_and_ancestry() {
        let f = fixture();

        let full = f.c1.to_string();
        assert_eq!(resolve_in(&f, &full).unwrap(), Resolution::Commit { commit: f.c1 });
        assert_eq!(resolve_in(&f, &full[..8]).unwrap().commit(), f.c1);
        assert_eq!(resolve_in(&f, "main~1").unwrap(), Resolution::Commit { commit: f.c1 });
        assert_eq!(resolve_in(&f, "main^").unwrap().commit(), f.c1);
        assert_eq!(resolve_in(&f, "main^0").unwrap().commit(), f.c2);
    }

    #[test]
    fn test_resolution_failures() {
        let f = fixture();

        assert!(matches!(resolve_in(&f, "ghost"), Err(SessionError::RevisionNotFound(_))));
        assert!(matches!(resolve_in(&f, "main~5"), Err(SessionError::RevisionNotFound(_))));
        assert!(matches!(resolve_in(&f, "main~q"), Err(SessionError::InvalidRevision { .. })));
        // too short to be taken as a hash prefix
        let short = &f.c1.to_string()[..4];
        assert!(matches!(resolve_in(&f, short), Err(SessionError::RevisionNotFound(_))));
        // well formed hash of an unknown commit
        assert!(matches!(
            resolve_in(&f, &"0".repeat(40)),
            Err(SessionError::RevisionNotFound(_))
        ));
    }

    #[test]
    fn test_default_branch_resolution() {
        let f = fixture();
        let state = f.store.state().unwrap();
        let r = resolve_default(&state, f.store.commits(state.format())).unwrap();
        assert_eq!(r.commit(), f.c2);

        f.store.delete_branch(&BranchName::main()).unwrap();
        let state = f.store.state().unwrap();
        let err = resolve_default(&state, f.store.commits(state.format())).unwrap_err();
        assert_eq!(err.to_string(), "default branch unavailable: main");
    }

    /// memory chunks that count reads
    #[derive(Default)]
    struct CountingChunks {
        inner: MemoryChunkStore,
        reads: AtomicUsize,
    }

    impl ChunkStore for CountingChunks {
        fn get(&self, id: ChunkId) -> StorageResult<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(id)
        }

        fn put(&self, bytes: &[u8]) -> StorageResult<ChunkId> {
            self.inner.put(bytes)
        }

        fn contains(&self, id: ChunkId) -> StorageResult<bool> {
            self.inner.contains(id)
        }

        fn manifest_root(&self) -> StorageResult<Option<ChunkId>> {
            self.inner.manifest_root()
        }

        fn swap_manifest_root(&self, expected: Option<ChunkId>, new: ChunkId) -> StorageResult<SwapResult> {
            self.inner.swap_manifest_root(expected, new)
        }
    }

    #[test]
    fn test_full_hash_reads_one_chunk() {
        let chunks = Arc::new(CountingChunks::default());
        let store = Store::init(chunks.clone(), &EngineConfig::in_memory()).unwrap();
        let main = BranchName::main();
        let t = TableName::new("t").unwrap();
        store.edit_working_set(&main, |root| root.create_table(&t)).unwrap();
        let key = RowKey::new("n").unwrap();
        let mut first = None;
        for i in 0..50 {
            store
                .edit_working_set(&main, |root| {
                    root.upsert_row(&t, Row::from_value(key.clone(), serde_json::json!({ "i": i }))?)
                })
                .unwrap();
            let id = store.commit(&main, &format!("c{}", i)).unwrap();
            first.get_or_insert(id);
        }
        let head = store.resolve_branch(&main).unwrap();
        let first = first.unwrap();

        let state = store.state().unwrap();
        let commits = store.commits(state.format());
        for id in [head, first] {
            chunks.reads.store(0, Ordering::SeqCst);
            let resolved = resolve(&state, commits, &id.to_string()).unwrap();
            assert_eq!(resolved, Resolution::Commit { commit: id });
            assert_eq!(chunks.reads.load(Ordering::SeqCst), 1);
        }

        // a hash naming a chunk that is not a commit
        let root = commits.read(head).unwrap().root;
        chunks.reads.store(0, Ordering::SeqCst);
        assert!(matches!(
            resolve(&state, commits, &root.to_string()),
            Err(SessionError::RevisionNotFound(_))
        ));
        assert_eq!(chunks.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_full_hash_from_another_format_is_not_found() {
        let f = fixture();
        let state = f.store.state().unwrap();
        let other = match state.format() {
            FormatVersion::V1 => FormatVersion::V2,
            FormatVersion::V2 => FormatVersion::V1,
        };
        let err = resolve(&state, f.store.commits(other), &f.c2.to_string()).unwrap_err();
        assert!(matches!(err, SessionError::RevisionNotFound(_)));
    }
}
