//! Rows and table contents.
//!
//! A row carries its primary key, a version counter and timestamps next to the
//! user columns. How a row lands in chunks is decided by the format codec;
//! this module only holds the logical values the codecs translate between.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{ChunkId, RowKey, TableName};

/// a db row with metadata and user data
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// primary key
    pub key: RowKey,
    /// version number, bumped on every update
    pub version: u64,
    /// creation timestamp (RFC 3339)
    pub created_at: String,
    /// last update timestamp (RFC 3339)
    pub updated_at: String,
    /// data (column values)
    pub data: BTreeMap<String, Value>,
}

/// Column names taken by row metadata in the loose row layout.
pub const RESERVED_COLUMNS: [&str; 4] = ["_pk", "_version", "_created_at", "_updated_at"];

/// rejects user columns that collide with row metadata
pub fn check_columns(data: &BTreeMap<String, Value>) -> StorageResult<()> {
    match RESERVED_COLUMNS.iter().find(|name| data.contains_key(**name)) {
        Some(name) => Err(StorageError::SchemaViolation(format!(
            "column name '{}' is reserved",
            name
        ))),
        None => Ok(()),
    }
}

impl Row {
    /// creates a new row with key & data
    ///
    /// sets v1 and current time
    pub fn new(key: RowKey, data: BTreeMap<String, Value>) -> StorageResult<Self> {
        check_columns(&data)?;
        let now = chrono::Utc::now().to_rfc3339();
        Ok(Self {
            key,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            data,
        })
    }

    /// create a new row from a JSON value (typically from INSERT)
    pub fn from_value(key: RowKey, value: Value) -> StorageResult<Self> {
        let data = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => {
                return Err(StorageError::SchemaViolation(
                    "row data must be a JSON object".to_string(),
                ))
            }
        };
        Self::new(key, data)
    }

    /// create an updated version of this row
    ///
    /// increments version and updates the timestamp
    pub fn with_update(self, new_data: BTreeMap<String, Value>) -> StorageResult<Self> {
        check_columns(&new_data)?;
        Ok(Self {
            key: self.key,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: chrono::Utc::now().to_rfc3339(),
            data: new_data,
        })
    }

    /// get a column value by name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    /// the row as a flat column map, primary key under `_pk`
    pub fn to_record(&self) -> BTreeMap<String, Value> {
        let mut record = self.data.clone();
        record.insert("_pk".to_string(), Value::String(self.key.to_string()));
        record
    }
}

/// The full contents of one table at one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub rows: BTreeMap<RowKey, Row>,
}

impl TableData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    /// insert a row that must not exist yet
    pub fn insert(&mut self, table: &TableName, row: Row) -> StorageResult<()> {
        check_columns(&row.data)?;
        if self.rows.contains_key(&row.key) {
            return Err(StorageError::RowAlreadyExists {
                table: table.clone(),
                key: row.key,
            });
        }
        self.rows.insert(row.key.clone(), row);
        Ok(())
    }

    /// insert or replace, bumping the version of a replaced row
    pub fn upsert(&mut self, row: Row) -> StorageResult<()> {
        check_columns(&row.data)?;
        let row = match self.rows.get(&row.key) {
            Some(existing) => existing.clone().with_update(row.data)?,
            None => row,
        };
        self.rows.insert(row.key.clone(), row);
        Ok(())
    }

    pub fn delete(&mut self, table: &TableName, key: &RowKey) -> StorageResult<Row> {
        self.rows.remove(key).ok_or_else(|| StorageError::RowNotFound {
            table: table.clone(),
            key: key.clone(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }
}

/// Table snapshot root: every table of one snapshot and the chunk holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootValue {
    pub tables: BTreeMap<TableName, ChunkId>,
}

impl RootValue {
    pub fn table(&self, name: &TableName) -> Option<ChunkId> {
        self.tables.get(name).copied()
    }

    pub fn contains(&self, name: &TableName) -> bool {
        self.tables.contains_key(name)
    }

    /// table names in order
    pub fn names(&self) -> Vec<TableName> {
        self.tables.keys().cloned().collect()
    }
}
