//! Statement result types.

use serde_json::Value;
use std::collections::BTreeMap;

/// Result of executing a statement.
#[derive(Debug)]
pub enum QueryResult {
    /// Rows returned from SELECT and SHOW.
    Select(ResultSet),
    /// Statement executed, nothing to return.
    Success { message: String },
}

impl QueryResult {
    /// Create a success result.
    pub fn success(message: impl Into<String>) -> Self {
        QueryResult::Success { message: message.into() }
    }

    /// A single-row, single-column result.
    pub fn scalar(column: impl Into<String>, value: Value) -> Self {
        let column = column.into();
        let mut rs = ResultSet::new(vec![column.clone()]);
        rs.push(BTreeMap::from([(column, value)]));
        QueryResult::Select(rs)
    }
}

/// A set of rows.
#[derive(Debug, Clone)]
pub struct ResultSet {
    /// Column names in order.
    pub columns: Vec<String>,
    /// Rows as maps of column name to value.
    pub rows: Vec<BTreeMap<String, Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Create from rows, inferring columns from every row.
    pub fn from_rows(rows: Vec<BTreeMap<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        // primary key first
        if let Some(pos) = columns.iter().position(|c| c == "_pk") {
            let pk = columns.remove(pos);
            columns.insert(0, pk);
        }
        Self { columns, rows }
    }

    pub fn push(&mut self, row: BTreeMap<String, Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BTreeMap<String, Value>> {
        self.rows.get(index)
    }

    /// The value of `column` in the first row.
    pub fn first_value(&self, column: &str) -> Option<&Value> {
        self.rows.first().and_then(|r| r.get(column))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BTreeMap<String, Value>> {
        self.rows.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = BTreeMap<String, Value>;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
