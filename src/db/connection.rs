//! Connections: a session plus statement execution.

use tracing::debug;

use super::api::DbResult;
use crate::session::Session;
use crate::sql::{Parser, QueryResult, StatementExecutor};

/// A client connection to one database revision.
#[derive(Debug)]
pub struct Connection {
    session: Session,
}

impl Connection {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Execute one statement.
    pub fn execute(&mut self, sql: &str) -> DbResult<QueryResult> {
        let statement = Parser::parse(sql)?;
        let result = StatementExecutor::execute(&mut self.session, &statement)?;
        debug!(session = %self.session.id(), ?result, "statement done");
        Ok(result)
    }

    /// Execute semicolon separated statements, stopping at the first error.
    pub fn execute_batch(&mut self, sql: &str) -> DbResult<Vec<QueryResult>> {
        let statements = Parser::parse_multi(sql)?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            results.push(StatementExecutor::execute(&mut self.session, statement)?);
        }
        Ok(results)
    }

    /// a `<db>/<target>` prompt label for this connection
    pub fn label(&self) -> String {
        format!("{}/{}", self.session.database(), self.session.target())
    }

    pub fn close(mut self) {
        self.session.close();
    }
}
