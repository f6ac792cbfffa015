//! The session manager: database registry and session binding.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::session::error::{SessionError, SessionResult};
use crate::session::revision::{validate_database_name, DatabaseIdentifier};
use crate::session::session::{Session, Target};
use crate::storage::{GitChunkStore, MemoryChunkStore, StorageError, Store};

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub user: String,
    pub host: String,
}

impl ClientIdentity {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    /// the identity of in-process callers such as the CLI
    pub fn local() -> Self {
        Self::new("root", "localhost")
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Owns the open stores of an engine and binds sessions to them.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: EngineConfig,
    stores: RwLock<HashMap<String, Store>>,
    active: AtomicUsize,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                stores: RwLock::new(HashMap::new()),
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Create a new, empty database.
    pub fn create_database(&self, name: &str) -> SessionResult<Store> {
        validate_database_name(name)?;
        let mut stores = self.inner.stores.write();
        if stores.contains_key(name) {
            return Err(SessionError::DatabaseExists(name.to_string()));
        }

        let config = &self.inner.config;
        let store = match config.database_path(name) {
            Some(path) => {
                if path.exists() {
                    return Err(SessionError::DatabaseExists(name.to_string()));
                }
                fs::create_dir_all(&path).map_err(StorageError::from)?;
                Store::init(Arc::new(GitChunkStore::init(&path)?), config)?
            }
            None => Store::init(Arc::new(MemoryChunkStore::new()), config)?,
        };

        info!(database = name, format = %config.format, "created database");
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// The store of a database, opening it on first use.
    ///
    /// Missing databases are created when `create_if_missing` is set.
    pub fn store(&self, name: &str) -> SessionResult<Store> {
        self.open_store(name, self.inner.config.create_if_missing)
    }

    /// Like [`SessionManager::store`], but never creates the database.
    pub fn existing_store(&self, name: &str) -> SessionResult<Store> {
        self.open_store(name, false)
    }

    fn open_store(&self, name: &str, create: bool) -> SessionResult<Store> {
        if let Some(store) = self.inner.stores.read().get(name) {
            return Ok(store.clone());
        }
        validate_database_name(name)?;

        let mut stores = self.inner.stores.write();
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }

        let config = &self.inner.config;
        let path = config.database_path(name);
        let exists = path.as_ref().is_some_and(|p| p.exists());
        let store = if exists {
            let path = path.as_deref().ok_or_else(|| SessionError::DatabaseNotFound(name.to_string()))?;
            let chunks = GitChunkStore::open(path).map_err(|e| match e {
                StorageError::NotInitialized => SessionError::DatabaseNotFound(name.to_string()),
                other => SessionError::Storage(other),
            })?;
            let store = Store::open(Arc::new(chunks), config).map_err(|e| match e {
                StorageError::NotInitialized => SessionError::DatabaseNotFound(name.to_string()),
                other => SessionError::Storage(other),
            })?;
            debug!(database = name, "opened database");
            store
        } else if create {
            drop(stores);
            return self.create_database(name).or_else(|e| match e {
                // lost a race with another creator
                SessionError::DatabaseExists(_) => self.open_store(name, false),
                other => Err(other),
            });
        } else {
            return Err(SessionError::DatabaseNotFound(name.to_string()));
        };

        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Names of every database this engine can serve, sorted.
    pub fn databases(&self) -> SessionResult<Vec<String>> {
        let mut names: Vec<String> = self.inner.stores.read().keys().cloned().collect();
        if let Some(root) = &self.inner.config.root {
            if root.exists() {
                for entry in fs::read_dir(root).map_err(StorageError::from)? {
                    let entry = entry.map_err(StorageError::from)?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if entry.path().is_dir() && validate_database_name(&name).is_ok() && !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve `<db>` or `<db>/<rev>` and bind a new session to it.
    pub fn bind(&self, raw: &str, client: ClientIdentity) -> SessionResult<Session> {
        let identifier = DatabaseIdentifier::parse(raw)?;
        let store = self.store(&identifier.database)?;
        let (target, binding) = Target::resolve(&store, identifier.revision.as_deref())?;

        let session = Session::new(self.clone(), client, identifier.database, store, target, binding);
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        debug!(
            session = %session.id(),
            client = %session.client(),
            target = %session.target(),
            "bound session"
        );
        Ok(session)
    }

    /// number of sessions bound and not yet closed
    pub fn active_sessions(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub(crate) fn session_closed(&self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bind_unknown_database() {
        let manager = SessionManager::new(EngineConfig::in_memory().create_if_missing(false));
        let err = manager.bind("nope", ClientIdentity::local()).unwrap_err();
        assert!(matches!(err, SessionError::DatabaseNotFound(_)));
    }

    #[test]
    fn test_in_memory_create_on_bind() {
        let manager = SessionManager::new(EngineConfig::in_memory());
        let session = manager.bind("shop", ClientIdentity::local()).unwrap();
        assert_eq!(session.database(), "shop");
        assert_eq!(manager.active_sessions(), 1);
        drop(session);
        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(manager.databases().unwrap(), vec!["shop".to_string()]);
    }

    #[test]
    fn test_disk_databases_survive_restart() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new(dir.path());

        let manager = SessionManager::new(config.clone());
        manager.create_database("shop").unwrap();
        assert!(matches!(
            manager.create_database("shop"),
            Err(SessionError::DatabaseExists(_))
        ));
        drop(manager);

        let manager = SessionManager::new(config);
        assert_eq!(manager.databases().unwrap(), vec!["shop".to_string()]);
        let mut session = manager.bind("shop/main", ClientIdentity::local()).unwrap();
        assert!(session.list_tables().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_database_names() {
        let manager = SessionManager::new(EngineConfig::in_memory());
        assert!(matches!(
            manager.create_database("../escape"),
            Err(SessionError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            manager.bind("", ClientIdentity::local()),
            Err(SessionError::InvalidIdentifier(_))
        ));
    }
}
