//! A client's bound view of one database.
//!
//! A session stores its target by *name* and caches what that name resolved
//! to. Before every operation the cache is checked against the store's
//! current manifest id; mutable targets are re-resolved when it moved.
//! Immutable targets keep the commit and storage format they were bound
//! under, so they survive branch deletions and format migrations.

use std::fmt;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::session::error::{SessionError, SessionResult};
use crate::session::manager::{ClientIdentity, SessionManager};
use crate::session::revision::{resolve, resolve_branch, resolve_default, DatabaseIdentifier, Resolution};
use crate::storage::{
    BranchName, ChunkId, CommitId, CommitInfo, FormatVersion, RootId, Row, RowKey, Snapshot, StorageError, Store,
    TableName, TagName,
};

/// What a session is bound to, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// whatever the store's default branch is at the time of each operation
    DefaultBranch,
    Branch(BranchName),
    Tag(TagName),
    Commit(CommitId),
}

impl Target {
    pub fn is_mutable(&self) -> bool {
        matches!(self, Target::DefaultBranch | Target::Branch(_))
    }

    /// Resolve an optional revision into a target and its first binding.
    pub(crate) fn resolve(store: &Store, revision: Option<&str>) -> SessionResult<(Target, Binding)> {
        let state = store.state()?;
        let commits = store.commits(state.format());
        let (target, resolution) = match revision {
            None => (Target::DefaultBranch, resolve_default(&state, commits)?),
            Some(raw) => {
                let resolution = resolve(&state, commits, raw)?;
                let target = match &resolution {
                    Resolution::Branch { name, .. } => Target::Branch(name.clone()),
                    Resolution::Tag { name, .. } => Target::Tag(name.clone()),
                    Resolution::Commit { commit } => Target::Commit(*commit),
                };
                (target, resolution)
            }
        };
        let binding = Binding::new(store, state.manifest_id, state.format(), &resolution)?;
        Ok((target, binding))
    }

    /// Re-run resolution of this target against the current manifest.
    fn rebind(&self, store: &Store) -> SessionResult<Binding> {
        let state = store.state()?;
        let commits = store.commits(state.format());
        let resolution = match self {
            Target::DefaultBranch => resolve_default(&state, commits)?,
            Target::Branch(name) => resolve_branch(&state, commits, name)?
                .ok_or_else(|| SessionError::BranchNotFound(name.to_string()))?,
            Target::Tag(name) => {
                let commit = state
                    .refs
                    .tag(name)
                    .ok_or_else(|| SessionError::RevisionNotFound(name.to_string()))?;
                Resolution::Tag {
                    name: name.clone(),
                    commit,
                }
            }
            Target::Commit(commit) => Resolution::Commit { commit: *commit },
        };
        Binding::new(store, state.manifest_id, state.format(), &resolution)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::DefaultBranch => write!(f, "(default branch)"),
            Target::Branch(name) => write!(f, "{}", name),
            Target::Tag(name) => write!(f, "{}", name),
            Target::Commit(id) => write!(f, "{}", id),
        }
    }
}

/// The cached result of resolving a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// manifest version the binding was resolved against
    pub manifest: ChunkId,
    pub format: FormatVersion,
    /// set for branch targets, which read and write the working set
    pub branch: Option<BranchName>,
    pub commit: CommitId,
    pub root: RootId,
}

impl Binding {
    fn new(store: &Store, manifest: ChunkId, format: FormatVersion, resolution: &Resolution) -> SessionResult<Self> {
        let (branch, commit, root) = match resolution {
            Resolution::Branch { name, head, working } => (Some(name.clone()), *head, *working),
            Resolution::Tag { commit, .. } | Resolution::Commit { commit } => {
                let root = store.commits(format).read(*commit)?.root;
                (None, *commit, root)
            }
        };
        Ok(Self {
            manifest,
            format,
            branch,
            commit,
            root,
        })
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// the target currently resolves to nothing
    Unbound,
    Bound,
    Refreshing,
    Closed,
}

/// A client's session on one database.
pub struct Session {
    id: Ulid,
    manager: SessionManager,
    client: ClientIdentity,
    database: String,
    store: Store,
    target: Target,
    binding: Option<Binding>,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(
        manager: SessionManager,
        client: ClientIdentity,
        database: String,
        store: Store,
        target: Target,
        binding: Binding,
    ) -> Self {
        Self {
            id: Ulid::new(),
            manager,
            client,
            database,
            store,
            target,
            binding: Some(binding),
            state: SessionState::Bound,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn client(&self) -> &ClientIdentity {
        &self.client
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// the cached binding, without refreshing it
    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    /// The binding for the current manifest, refreshing it if stale.
    fn current(&mut self) -> SessionResult<Binding> {
        self.ensure_open()?;
        if let Some(binding) = &self.binding {
            if !self.target.is_mutable() {
                return Ok(binding.clone());
            }
            if binding.manifest == self.store.manifest_id()? {
                return Ok(binding.clone());
            }
        }
        self.refresh()?;
        self.binding.clone().ok_or(SessionError::Closed)
    }

    /// Re-resolve the target against the current manifest.
    ///
    /// On failure the cached binding is dropped but the target is kept, so
    /// the session recovers once the name resolves again.
    pub fn refresh(&mut self) -> SessionResult<()> {
        self.ensure_open()?;
        if !self.target.is_mutable() && self.binding.is_some() {
            return Ok(());
        }

        self.state = SessionState::Refreshing;
        match self.target.rebind(&self.store) {
            Ok(binding) => {
                debug!(
                    session = %self.id,
                    target = %self.target,
                    commit = %binding.commit.short(),
                    "refreshed session"
                );
                self.binding = Some(binding);
                self.state = SessionState::Bound;
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.id, target = %self.target, error = %e, "session target no longer resolves");
                self.binding = None;
                self.state = SessionState::Unbound;
                Err(e)
            }
        }
    }

    /// Bind this session to another branch.
    ///
    /// Only branches can be checked out. The target and binding change
    /// together, and only when the new branch resolves.
    pub fn checkout(&mut self, branch: &str) -> SessionResult<()> {
        self.ensure_open()?;
        if let Err(e) = self.target.rebind(&self.store) {
            debug!(session = %self.id, target = %self.target, error = %e, "current target is stale");
        }

        let state = self.store.state()?;
        let commits = self.store.commits(state.format());
        let resolution = match resolve(&state, commits, branch) {
            Ok(resolution) => resolution,
            Err(SessionError::RevisionNotFound(_)) => return Err(SessionError::BranchNotFound(branch.to_string())),
            Err(e) => return Err(e),
        };
        let Resolution::Branch { name, .. } = &resolution else {
            return Err(SessionError::NotABranch(branch.to_string()));
        };

        let target = Target::Branch(name.clone());
        let binding = Binding::new(&self.store, state.manifest_id, state.format(), &resolution)?;
        info!(session = %self.id, from = %self.target, to = %target, "checked out branch");
        self.target = target;
        self.binding = Some(binding);
        self.state = SessionState::Bound;
        Ok(())
    }

    /// Create a branch at the current commit and check it out.
    pub fn checkout_new_branch(&mut self, name: &str) -> SessionResult<()> {
        let branch = BranchName::new(name)?;
        let start = self.current()?.commit;
        self.store.create_branch(&branch, start).map_err(|e| self.storage_error(e))?;
        self.checkout(name)
    }

    /// Rebind to `<db>` or `<db>/<rev>`, possibly another database.
    ///
    /// Any revision is accepted. On failure the session is left as it was.
    pub fn use_revision(&mut self, identifier: &str) -> SessionResult<()> {
        self.ensure_open()?;
        let parsed = DatabaseIdentifier::parse(identifier).map_err(|e| {
            let database = identifier.split('/').next().unwrap_or(identifier);
            SessionError::could_not_load(database, e)
        })?;
        let database = parsed.database.clone();
        let load = || -> SessionResult<(Store, Target, Binding)> {
            let store = self.manager.store(&database)?;
            let (target, binding) = Target::resolve(&store, parsed.revision.as_deref())?;
            Ok((store, target, binding))
        };
        let (store, target, binding) = load().map_err(|e| SessionError::could_not_load(&database, e))?;

        info!(session = %self.id, database = %database, target = %target, "switched database");
        self.database = database;
        self.store = store;
        self.target = target;
        self.binding = Some(binding);
        self.state = SessionState::Bound;
        Ok(())
    }

    /// Close the session. Further operations fail with [`SessionError::Closed`].
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            self.binding = None;
            self.manager.session_closed();
            debug!(session = %self.id, "closed session");
        }
    }

    /// Map a store failure into the session's terms.
    ///
    /// A missing branch under an implicit target is the default branch
    /// being gone, not a missing branch the client asked for.
    fn storage_error(&self, error: StorageError) -> SessionError {
        match error {
            StorageError::BranchNotFound(name) if self.target == Target::DefaultBranch => {
                SessionError::DefaultBranchUnavailable(name.to_string())
            }
            StorageError::BranchNotFound(name) => SessionError::BranchNotFound(name.to_string()),
            other => SessionError::Storage(other),
        }
    }

    /// the branch writes go to
    fn write_branch(&mut self) -> SessionResult<BranchName> {
        let binding = self.current()?;
        binding
            .branch
            .ok_or_else(|| SessionError::ReadOnly(self.target.to_string()))
    }

    // ==================== Reads ====================

    /// The checked out branch, `None` for tag and commit sessions.
    pub fn active_branch(&mut self) -> SessionResult<Option<BranchName>> {
        Ok(self.current()?.branch)
    }

    /// The commit the session reads from (the branch head for branches).
    pub fn head(&mut self) -> SessionResult<CommitId> {
        Ok(self.current()?.commit)
    }

    pub fn snapshot(&mut self) -> SessionResult<Snapshot> {
        let binding = self.current()?;
        self.store
            .snapshot(binding.format, binding.root)
            .map_err(|e| self.storage_error(e))
    }

    pub fn list_tables(&mut self) -> SessionResult<Vec<TableName>> {
        Ok(self.snapshot()?.list_tables())
    }

    pub fn scan_table(&mut self, table: &TableName) -> SessionResult<Vec<Row>> {
        Ok(self.snapshot()?.scan_table(table)?)
    }

    pub fn read_row(&mut self, table: &TableName, key: &RowKey) -> SessionResult<Option<Row>> {
        Ok(self.snapshot()?.read_row(table, key)?)
    }

    /// Commit history from the session's commit, newest first.
    pub fn history(&mut self, limit: Option<usize>) -> SessionResult<Vec<CommitInfo>> {
        let binding = self.current()?;
        Ok(self.store.history(binding.format, binding.commit, limit)?)
    }

    // ==================== Writes ====================

    pub fn create_table(&mut self, table: &TableName) -> SessionResult<()> {
        let branch = self.write_branch()?;
        self.store
            .edit_working_set(&branch, |root| root.create_table(table))
            .map_err(|e| self.storage_error(e))
    }

    pub fn drop_table(&mut self, table: &TableName) -> SessionResult<()> {
        let branch = self.write_branch()?;
        self.store
            .edit_working_set(&branch, |root| root.drop_table(table))
            .map_err(|e| self.storage_error(e))
    }

    pub fn insert_row(&mut self, table: &TableName, row: Row) -> SessionResult<()> {
        let branch = self.write_branch()?;
        self.store
            .edit_working_set(&branch, |root| root.insert_row(table, row.clone()))
            .map_err(|e| self.storage_error(e))
    }

    pub fn upsert_row(&mut self, table: &TableName, row: Row) -> SessionResult<()> {
        let branch = self.write_branch()?;
        self.store
            .edit_working_set(&branch, |root| root.upsert_row(table, row.clone()))
            .map_err(|e| self.storage_error(e))
    }

    pub fn delete_row(&mut self, table: &TableName, key: &RowKey) -> SessionResult<Row> {
        let branch = self.write_branch()?;
        self.store
            .edit_working_set(&branch, |root| root.delete_row(table, key))
            .map_err(|e| self.storage_error(e))
    }

    /// Commit the branch's working set.
    pub fn commit(&mut self, message: &str) -> SessionResult<CommitId> {
        let branch = self.write_branch()?;
        self.store.commit(&branch, message).map_err(|e| self.storage_error(e))
    }

    // ==================== Refs ====================

    /// Resolve an optional start revision, defaulting to the session's commit.
    fn start_point(&mut self, revision: Option<&str>) -> SessionResult<CommitId> {
        match revision {
            None => Ok(self.current()?.commit),
            Some(raw) => {
                self.ensure_open()?;
                let state = self.store.state()?;
                Ok(resolve(&state, self.store.commits(state.format()), raw)?.commit())
            }
        }
    }

    /// Create a branch at `start` (a revision) or at the session's commit.
    pub fn create_branch(&mut self, name: &str, start: Option<&str>) -> SessionResult<CommitId> {
        let branch = BranchName::new(name)?;
        let commit = self.start_point(start)?;
        self.store.create_branch(&branch, commit)?;
        Ok(commit)
    }

    /// Delete a branch, even one that sessions are bound to.
    pub fn delete_branch(&mut self, name: &str) -> SessionResult<CommitId> {
        self.ensure_open()?;
        let branch = BranchName::new(name)?;
        self.store.delete_branch(&branch).map_err(|e| match e {
            StorageError::BranchNotFound(name) => SessionError::BranchNotFound(name.to_string()),
            other => SessionError::Storage(other),
        })
    }

    pub fn rename_branch(&mut self, old: &str, new: &str) -> SessionResult<()> {
        self.ensure_open()?;
        let (old, new) = (BranchName::new(old)?, BranchName::new(new)?);
        self.store.rename_branch(&old, &new).map_err(|e| match e {
            StorageError::BranchNotFound(name) => SessionError::BranchNotFound(name.to_string()),
            other => SessionError::Storage(other),
        })
    }

    pub fn create_tag(&mut self, name: &str, revision: Option<&str>) -> SessionResult<CommitId> {
        let tag = TagName::new(name)?;
        let commit = self.start_point(revision)?;
        self.store.create_tag(&tag, commit)?;
        Ok(commit)
    }

    pub fn delete_tag(&mut self, name: &str) -> SessionResult<CommitId> {
        self.ensure_open()?;
        Ok(self.store.delete_tag(&TagName::new(name)?)?)
    }

    pub fn list_branches(&mut self) -> SessionResult<Vec<(BranchName, CommitId)>> {
        self.ensure_open()?;
        Ok(self.store.list_branches()?)
    }

    pub fn list_tags(&mut self) -> SessionResult<Vec<(TagName, CommitId)>> {
        self.ensure_open()?;
        Ok(self.store.list_tags()?)
    }

    pub fn default_branch(&mut self) -> SessionResult<BranchName> {
        self.ensure_open()?;
        Ok(self.store.default_branch()?)
    }

    /// Change the store's default branch. Implicit sessions follow it on
    /// their next operation.
    pub fn set_default_branch(&mut self, name: &str) -> SessionResult<()> {
        self.ensure_open()?;
        let branch = BranchName::new(name)?;
        self.store.set_default_branch(&branch).map_err(|e| match e {
            StorageError::BranchNotFound(name) => SessionError::BranchNotFound(name.to_string()),
            other => SessionError::Storage(other),
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("database", &self.database)
            .field("target", &self.target)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::session::error::ErrorKind;
    use serde_json::json;

    fn manager() -> SessionManager {
        let manager = SessionManager::new(EngineConfig::in_memory());
        manager.create_database("shop").unwrap();
        manager
    }

    fn bind(manager: &SessionManager, raw: &str) -> Session {
        manager.bind(raw, ClientIdentity::local()).unwrap()
    }

    fn table() -> TableName {
        TableName::new("items").unwrap()
    }

    fn row(name: &str) -> Row {
        Row::from_value(RowKey::generate(), json!({ "name": name })).unwrap()
    }

    #[test]
    fn test_default_session_writes_and_commits() {
        let manager = manager();
        let mut session = bind(&manager, "shop");
        assert_eq!(session.target(), &Target::DefaultBranch);
        assert_eq!(session.active_branch().unwrap(), Some(BranchName::main()));

        session.create_table(&table()).unwrap();
        session.insert_row(&table(), row("apple")).unwrap();
        assert_eq!(session.scan_table(&table()).unwrap().len(), 1);

        let before = session.head().unwrap();
        let commit = session.commit("add items").unwrap();
        assert_ne!(commit, before);
        assert_eq!(session.head().unwrap(), commit);
        assert_eq!(session.history(None).unwrap().len(), 2);

        let err = session.commit("again").unwrap_err();
        assert!(matches!(err, SessionError::Storage(StorageError::NothingToCommit(_))));
    }

    #[test]
    fn test_other_sessions_see_writes_lazily() {
        let manager = manager();
        let mut writer = bind(&manager, "shop/main");
        let mut reader = bind(&manager, "shop/main");
        assert!(reader.list_tables().unwrap().is_empty());

        writer.create_table(&table()).unwrap();
        assert_eq!(reader.list_tables().unwrap(), vec![table()]);
    }

    #[test]
    fn test_tag_sessions_are_read_only_and_pinned() {
        let manager = manager();
        let mut session = bind(&manager, "shop");
        session.create_table(&table()).unwrap();
        let c1 = session.commit("c1").unwrap();
        session.create_tag("v1", None).unwrap();

        let mut pinned = bind(&manager, "shop/v1");
        assert_eq!(pinned.active_branch().unwrap(), None);
        let err = pinned.insert_row(&table(), row("pear")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Immutable);

        session.insert_row(&table(), row("pear")).unwrap();
        session.commit("c2").unwrap();
        assert_eq!(pinned.head().unwrap(), c1);
        assert!(pinned.scan_table(&table()).unwrap().is_empty());
    }

    #[test]
    fn test_checkout_rules() {
        let manager = manager();
        let mut session = bind(&manager, "shop");
        session.create_branch("feature", None).unwrap();
        session.create_tag("v1", None).unwrap();

        session.checkout("feature").unwrap();
        assert_eq!(session.target(), &Target::Branch(BranchName::new("feature").unwrap()));

        let err = session.checkout("v1").unwrap_err();
        assert!(matches!(err, SessionError::NotABranch(_)));
        let err = session.checkout("ghost").unwrap_err();
        assert!(matches!(err, SessionError::BranchNotFound(_)));
        // failures leave the session where it was
        assert_eq!(session.active_branch().unwrap(), Some(BranchName::new("feature").unwrap()));

        session.checkout_new_branch("hotfix").unwrap();
        assert_eq!(session.active_branch().unwrap(), Some(BranchName::new("hotfix").unwrap()));
    }

    #[test]
    fn test_deleted_branch_fails_bound_sessions_only() {
        let manager = manager();
        let mut admin = bind(&manager, "shop");
        admin.create_branch("feature", None).unwrap();

        let mut on_feature = bind(&manager, "shop/feature");
        let mut on_main = bind(&manager, "shop/main");
        admin.delete_branch("feature").unwrap();

        let err = on_feature.list_tables().unwrap_err();
        assert!(matches!(err, SessionError::BranchNotFound(_)));
        assert_eq!(on_feature.state(), SessionState::Unbound);
        assert_eq!(on_feature.target(), &Target::Branch(BranchName::new("feature").unwrap()));
        assert!(on_main.list_tables().is_ok());

        // the session recovers once the name resolves again
        on_feature.checkout("main").unwrap();
        assert_eq!(on_feature.state(), SessionState::Bound);
    }

    #[test]
    fn test_use_revision_failure_keeps_session() {
        let manager = manager();
        let mut session = bind(&manager, "shop");

        let err = session.use_revision("shop/ghost").unwrap_err();
        assert!(err.to_string().starts_with("could not load database: shop"));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(session.target(), &Target::DefaultBranch);

        manager.create_database("other").unwrap();
        session.use_revision("other/main").unwrap();
        assert_eq!(session.database(), "other");
    }

    #[test]
    fn test_closed_session() {
        let manager = manager();
        let mut session = bind(&manager, "shop");
        session.close();
        assert_eq!(manager.active_sessions(), 0);
        assert!(matches!(session.list_tables(), Err(SessionError::Closed)));
        assert!(matches!(session.checkout("main"), Err(SessionError::Closed)));
        session.close();
        assert_eq!(manager.active_sessions(), 0);
    }
}
