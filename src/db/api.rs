//! Engine API - high-level interface for revdb.

use thiserror::Error;

use super::connection::Connection;
use crate::config::EngineConfig;
use crate::migrate::{MigrationError, MigrationReport, Migrator, VerifyMode};
use crate::session::{ClientIdentity, SessionError, SessionManager};
use crate::sql::StatementError;
use crate::storage::{FormatVersion, StorageError, Store};

/// Result type for engine operations.
pub type DbResult<T> = Result<T, DbError>;

/// Engine errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("parse error: {0}")]
    Statement(#[from] StatementError),

    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The engine handle: every database under one root, and the sessions
/// bound to them.
#[derive(Clone)]
pub struct Engine {
    manager: SessionManager,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Self {
        Self {
            manager: SessionManager::new(config),
        }
    }

    /// An engine whose databases live in memory (for testing).
    pub fn in_memory() -> Self {
        Self::open(EngineConfig::in_memory())
    }

    pub fn config(&self) -> &EngineConfig {
        self.manager.config()
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn create_database(&self, name: &str) -> DbResult<Store> {
        Ok(self.manager.create_database(name)?)
    }

    pub fn database(&self, name: &str) -> DbResult<Store> {
        Ok(self.manager.store(name)?)
    }

    pub fn databases(&self) -> DbResult<Vec<String>> {
        Ok(self.manager.databases()?)
    }

    /// Connect to `<db>` or `<db>/<rev>` as the local client.
    pub fn connect(&self, identifier: &str) -> DbResult<Connection> {
        self.connect_as(identifier, ClientIdentity::local())
    }

    pub fn connect_as(&self, identifier: &str, client: ClientIdentity) -> DbResult<Connection> {
        let session = self.manager.bind(identifier, client)?;
        Ok(Connection::new(session))
    }

    /// Translate a database to another storage format.
    pub fn migrate(&self, database: &str, target: FormatVersion, verify: VerifyMode) -> DbResult<MigrationReport> {
        let store = self.manager.store(database)?;
        Ok(Migrator::new(&store).target(target).verify(verify).run()?)
    }

    /// number of open connections
    pub fn active_sessions(&self) -> usize {
        self.manager.active_sessions()
    }
}
