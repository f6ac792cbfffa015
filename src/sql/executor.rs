//! Statement execution against a session.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::result::{QueryResult, ResultSet};
use super::statement::Statement;
use crate::session::{Session, SessionError, SessionResult};
use crate::storage::{BranchName, StorageError, TableName};

/// Runs parsed statements on one session.
pub struct StatementExecutor;

impl StatementExecutor {
    pub fn execute(session: &mut Session, statement: &Statement) -> SessionResult<QueryResult> {
        debug!(session = %session.id(), ?statement, "executing statement");
        match statement {
            Statement::Use(identifier) => {
                session.use_revision(identifier)?;
                Ok(QueryResult::success("Database changed"))
            }
            Statement::Checkout { branch } => {
                session.checkout(branch)?;
                Ok(QueryResult::success(format!("Switched to branch '{}'", branch)))
            }
            Statement::CheckoutNew { branch } => {
                session.checkout_new_branch(branch)?;
                Ok(QueryResult::success(format!("Switched to a new branch '{}'", branch)))
            }
            Statement::CreateBranch { name, start } => {
                let commit = session.create_branch(name, start.as_deref())?;
                Ok(QueryResult::success(format!("Created branch '{}' at {}", name, commit.short())))
            }
            Statement::DeleteBranch { name } => {
                let commit = session.delete_branch(name)?;
                Ok(QueryResult::success(format!("Deleted branch '{}' (was {})", name, commit.short())))
            }
            Statement::RenameBranch { old, new } => {
                session.rename_branch(old, new)?;
                Ok(QueryResult::success(format!("Renamed branch '{}' to '{}'", old, new)))
            }
            Statement::CreateTag { name, revision } => {
                let commit = session.create_tag(name, revision.as_deref())?;
                Ok(QueryResult::success(format!("Created tag '{}' at {}", name, commit.short())))
            }
            Statement::DeleteTag { name } => {
                session.delete_tag(name)?;
                Ok(QueryResult::success(format!("Deleted tag '{}'", name)))
            }
            Statement::Commit { message } => {
                let commit = session.commit(message)?;
                Ok(QueryResult::scalar("hash", json!(commit.to_string())))
            }
            Statement::ActiveBranch => {
                let branch = session.active_branch()?;
                let value = branch.map(|b| json!(b.as_str())).unwrap_or(Value::Null);
                Ok(QueryResult::scalar("active_branch()", value))
            }
            Statement::ShowBranches => {
                let default = session.default_branch()?;
                let mut rs = ResultSet::new(vec!["name".into(), "hash".into(), "default".into()]);
                for (name, commit) in session.list_branches()? {
                    rs.push(BTreeMap::from([
                        ("name".to_string(), json!(name.as_str())),
                        ("hash".to_string(), json!(commit.to_string())),
                        ("default".to_string(), json!(name == default)),
                    ]));
                }
                Ok(QueryResult::Select(rs))
            }
            Statement::ShowTags => {
                let mut rs = ResultSet::new(vec!["tag_name".into(), "tag_hash".into()]);
                for (name, commit) in session.list_tags()? {
                    rs.push(BTreeMap::from([
                        ("tag_name".to_string(), json!(name.to_string())),
                        ("tag_hash".to_string(), json!(commit.to_string())),
                    ]));
                }
                Ok(QueryResult::Select(rs))
            }
            Statement::ShowTables => {
                let column = format!("Tables_in_{}", session.database());
                let mut rs = ResultSet::new(vec![column.clone()]);
                for table in session.list_tables()? {
                    rs.push(BTreeMap::from([(column.clone(), json!(table.as_str()))]));
                }
                Ok(QueryResult::Select(rs))
            }
            Statement::ShowDatabases => {
                let mut rs = ResultSet::new(vec!["Database".into()]);
                for name in session.manager().databases()? {
                    rs.push(BTreeMap::from([("Database".to_string(), json!(name))]));
                }
                Ok(QueryResult::Select(rs))
            }
            Statement::SelectAll { table } => {
                let table = TableName::new(table.as_str())?;
                let rows = session.scan_table(&table)?;
                let mut rs = ResultSet::from_rows(rows.iter().map(|r| r.to_record()).collect());
                if rs.columns.is_empty() {
                    rs.columns.push("_pk".to_string());
                }
                Ok(QueryResult::Select(rs))
            }
            Statement::SetDefaultBranch { database, branch } => {
                if database == session.database() {
                    session.set_default_branch(branch)?;
                } else {
                    let branch = BranchName::new(branch.as_str())?;
                    session
                        .manager()
                        .existing_store(database)?
                        .set_default_branch(&branch)
                        .map_err(|e| match e {
                            StorageError::BranchNotFound(name) => SessionError::BranchNotFound(name.to_string()),
                            other => SessionError::Storage(other),
                        })?;
                }
                Ok(QueryResult::success(format!(
                    "Default branch of '{}' set to '{}'",
                    database, branch
                )))
            }
        }
    }
}
