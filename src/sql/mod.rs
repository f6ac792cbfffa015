//! Session statements.
//!
//! A small statement surface for driving sessions from text: `USE`, the
//! `REVDB_*` procedures, a few `SHOW` forms, `SELECT ACTIVE_BRANCH()` and
//! the per-database default branch variable.

mod error;
mod executor;
mod result;
mod statement;

pub use error::{StatementError, StatementResult};
pub use executor::StatementExecutor;
pub use result::{QueryResult, ResultSet};
pub use statement::{Parser, Statement, DEFAULT_BRANCH_VARIABLE};
