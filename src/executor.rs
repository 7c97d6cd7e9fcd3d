//! Query execution boundary
//!
//! The executor folds every database error into an [`ExecutionOutcome`] value,
//! so the orchestration loop branches on data instead of on errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One result row: column name to value, values keep their JSON-native type
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A single SQL statement produced by the generator or the reviewer, not yet
/// known to be valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlCandidate(String);

impl SqlCandidate {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SqlCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered rows plus the column order they were returned in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self { columns, rows }
    }

    /// Build a row set from records alone, taking column order from the first record.
    pub fn from_records(rows: Vec<Record>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Cell text for prompts and tables: strings unquoted, nulls as `NULL`.
pub fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Result of running one SQL candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success { rows: RowSet },
    Failure { error_message: String },
}

impl ExecutionOutcome {
    pub fn failure(error_message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure {
            error_message: error_message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }
}

/// Database boundary used by the orchestration loop
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `sql` as-is, as its own unit of work.
    async fn execute(&self, sql: &SqlCandidate) -> ExecutionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_set_from_records_takes_first_record_columns() {
        let mut record = Record::new();
        record.insert("count".to_string(), json!(42));
        let rows = RowSet::from_records(vec![record]);
        assert_eq!(rows.columns, vec!["count".to_string()]);
        assert_eq!(rows.len(), 1);
        assert!(RowSet::from_records(Vec::new()).is_empty());
    }

    #[test]
    fn test_sql_candidate_serializes_as_string() {
        let candidate = SqlCandidate::new("SELECT 1");
        assert_eq!(serde_json::to_string(&candidate).unwrap(), "\"SELECT 1\"");
        assert_eq!(candidate.to_string(), "SELECT 1");
    }
}
