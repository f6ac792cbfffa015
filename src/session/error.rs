//! Session errors.

use thiserror::Error;

use crate::storage::{InvalidNameError, StorageError};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Coarse classification of session failures, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// a name or hash is absent
    NotFound,
    /// a well-formed specifier matches no object
    Unresolvable,
    /// malformed specifier syntax
    Invalid,
    /// write or checkout against a non-branch target
    Immutable,
    /// lost a manifest race too many times
    Conflict,
    /// the database cannot currently be loaded
    Unavailable,
    /// the session was closed
    Closed,
}

/// Session errors.
///
/// Display strings are stable; clients match on their prefixes.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("database already exists: {0}")]
    DatabaseExists(String),

    #[error("invalid database identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid revision '{revision}': {reason}")]
    InvalidRevision { revision: String, reason: String },

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("ambiguous revision: {0}")]
    AmbiguousRevision(String),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("default branch unavailable: {0}")]
    DefaultBranchUnavailable(String),

    #[error("not a branch: {0}")]
    NotABranch(String),

    /// write attempted through a tag or commit session
    #[error("read-only revision: {0}")]
    ReadOnly(String),

    #[error("could not load database: {database}: {source}")]
    CouldNotLoad {
        database: String,
        #[source]
        source: Box<SessionError>,
    },

    #[error("session is closed")]
    Closed,

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::DatabaseNotFound(_) | SessionError::BranchNotFound(_) => ErrorKind::NotFound,
            SessionError::RevisionNotFound(_) | SessionError::AmbiguousRevision(_) => ErrorKind::Unresolvable,
            SessionError::InvalidIdentifier(_)
            | SessionError::InvalidRevision { .. }
            | SessionError::InvalidName(_) => ErrorKind::Invalid,
            SessionError::NotABranch(_) | SessionError::ReadOnly(_) => ErrorKind::Immutable,
            SessionError::DatabaseExists(_) => ErrorKind::Conflict,
            SessionError::DefaultBranchUnavailable(_) | SessionError::CouldNotLoad { .. } => ErrorKind::Unavailable,
            SessionError::Closed => ErrorKind::Closed,
            SessionError::Storage(e) if e.is_not_found() => ErrorKind::NotFound,
            SessionError::Storage(e) if e.is_conflict() => ErrorKind::Conflict,
            SessionError::Storage(StorageError::InvalidName(_)) => ErrorKind::Invalid,
            SessionError::Storage(_) => ErrorKind::Unavailable,
        }
    }

    pub(crate) fn could_not_load(database: &str, source: SessionError) -> Self {
        SessionError::CouldNotLoad {
            database: database.to_string(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(SessionError::RevisionNotFound("x".into()).kind(), ErrorKind::Unresolvable);
        assert_eq!(SessionError::BranchNotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(SessionError::NotABranch("v1".into()).kind(), ErrorKind::Immutable);
        assert_eq!(
            SessionError::DefaultBranchUnavailable("main".into()).kind(),
            ErrorKind::Unavailable
        );
        let cas = StorageError::ConcurrentModification {
            operation: "create branch".into(),
            attempts: 8,
        };
        assert_eq!(SessionError::from(cas).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_stable_messages() {
        assert_eq!(
            SessionError::RevisionNotFound("ghost".into()).to_string(),
            "revision not found: ghost"
        );
        assert_eq!(
            SessionError::DefaultBranchUnavailable("main".into()).to_string(),
            "default branch unavailable: main"
        );
        let wrapped = SessionError::could_not_load("shop", SessionError::BranchNotFound("ghost".into()));
        assert!(wrapped.to_string().starts_with("could not load database: shop"));
    }
}
