//! Schema descriptor
//!
//! Produces the textual snapshot (tables, columns, primary keys, sample rows)
//! that grounds SQL generation and review.

use crate::db::{database_error_text, Dialect, SqlDatabase};
use crate::error::{AgentError, Result};
use crate::executor::{display_value, RowSet};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Read-only schema text shared by every cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescription(Arc<str>);

impl SchemaDescription {
    pub fn new(text: impl Into<String>) -> Self {
        Self(Arc::from(text.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SchemaDescription {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SchemaDescription {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[async_trait]
pub trait SchemaDescriptor: Send + Sync {
    async fn describe(&self) -> Result<SchemaDescription>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub sample: RowSet,
}

fn columns_query(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => {
            r#"
            SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name,
                   COLUMN_TYPE AS column_type, COLUMN_KEY AS column_key,
                   IS_NULLABLE AS is_nullable
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME, ORDINAL_POSITION
            "#
        }
        Dialect::Postgres => {
            r#"
            SELECT c.table_name, c.column_name, c.data_type AS column_type,
                   CASE WHEN pk.column_name IS NOT NULL THEN 'PRI' ELSE '' END AS column_key,
                   c.is_nullable
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT kcu.table_name, kcu.column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON tc.constraint_name = kcu.constraint_name
                 AND tc.table_schema = kcu.table_schema
                WHERE tc.constraint_type = 'PRIMARY KEY'
                  AND tc.table_schema = current_schema()
            ) pk ON pk.table_name = c.table_name AND pk.column_name = c.column_name
            WHERE c.table_schema = current_schema()
            ORDER BY c.table_name, c.ordinal_position
            "#
        }
    }
}

/// Group information_schema rows into tables, keeping their order.
pub fn tables_from_columns(rows: &RowSet) -> Vec<TableSchema> {
    let mut tables: Vec<TableSchema> = Vec::new();
    for record in &rows.rows {
        let field = |key: &str| record.get(key).map(display_value).unwrap_or_default();
        let table_name = field("table_name");
        if table_name.is_empty() {
            continue;
        }
        let column = ColumnSchema {
            name: field("column_name"),
            data_type: field("column_type"),
            primary_key: field("column_key") == "PRI",
            nullable: field("is_nullable").eq_ignore_ascii_case("yes"),
        };
        match tables.last_mut() {
            Some(table) if table.name == table_name => table.columns.push(column),
            _ => tables.push(TableSchema {
                name: table_name,
                columns: vec![column],
                sample: RowSet::default(),
            }),
        }
    }
    tables
}

/// Render tables the way the prompts expect them.
pub fn format_schema(tables: &[TableSchema]) -> String {
    let mut lines = Vec::new();
    for table in tables {
        lines.push(format!("Table: {}", table.name));
        for column in &table.columns {
            let mut line = format!("  - {}: {}", column.name, column.data_type);
            if column.primary_key {
                line.push_str(" (Primary Key)");
            }
            if !column.nullable {
                line.push_str(" NOT NULL");
            }
            lines.push(line);
        }
        if !table.sample.is_empty() {
            lines.push("  Sample data:".to_string());
            for record in &table.sample.rows {
                let cells: Vec<String> = table
                    .sample
                    .columns
                    .iter()
                    .map(|c| format!("{}={}", c, record.get(c).map(display_value).unwrap_or_default()))
                    .collect();
                lines.push(format!("    ({})", cells.join(", ")));
            }
        }
        lines.push(String::new());
    }
    lines.join("\n").trim_end().to_string()
}

#[async_trait]
impl SchemaDescriptor for SqlDatabase {
    async fn describe(&self) -> Result<SchemaDescription> {
        let dialect = self.dialect();
        let column_rows = self
            .run(columns_query(dialect))
            .await
            .map_err(|e| AgentError::Schema(database_error_text(&e)))?;
        let mut tables = tables_from_columns(&column_rows);

        if self.sample_rows() > 0 {
            for table in &mut tables {
                let sql = format!(
                    "SELECT * FROM {} LIMIT {}",
                    dialect.quote_ident(&table.name),
                    self.sample_rows()
                );
                match self.run(&sql).await {
                    Ok(sample) => table.sample = sample,
                    Err(e) => warn!(
                        "Could not read sample rows for {}: {}",
                        table.name,
                        database_error_text(&e)
                    ),
                }
            }
        }

        if tables.is_empty() {
            warn!("Schema introspection found no tables");
        } else {
            info!("Described {} tables", tables.len());
        }
        Ok(SchemaDescription::new(format_schema(&tables)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Record;
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn column_row(table: &str, column: &str, ty: &str, key: &str) -> Record {
        record(&[
            ("table_name", json!(table)),
            ("column_name", json!(column)),
            ("column_type", json!(ty)),
            ("column_key", json!(key)),
            ("is_nullable", json!(if key == "PRI" { "NO" } else { "YES" })),
        ])
    }

    #[test]
    fn test_tables_grouped_in_order() {
        let rows = RowSet::from_records(vec![
            column_row("employees", "id", "int", "PRI"),
            column_row("employees", "name", "varchar(100)", ""),
            column_row("sales", "region", "varchar(20)", ""),
        ]);
        let tables = tables_from_columns(&rows);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "employees");
        assert_eq!(tables[0].columns.len(), 2);
        assert!(tables[0].columns[0].primary_key);
        assert_eq!(tables[1].columns[0].name, "region");
    }

    #[test]
    fn test_format_schema_with_samples() {
        let mut tables = tables_from_columns(&RowSet::from_records(vec![
            column_row("employees", "id", "int", "PRI"),
            column_row("employees", "name", "varchar(100)", ""),
        ]));
        tables[0].sample = RowSet::new(
            vec!["id".to_string(), "name".to_string()],
            vec![record(&[("id", json!(1)), ("name", json!("Ann"))])],
        );

        let text = format_schema(&tables);
        assert_eq!(
            text,
            "Table: employees\n  - id: int (Primary Key) NOT NULL\n  - name: varchar(100)\n  Sample data:\n    (id=1, name=Ann)"
        );
    }

    #[test]
    fn test_schema_description_is_shared_text() {
        let schema = SchemaDescription::from("Table: t");
        let copy = schema.clone();
        assert_eq!(copy.as_str(), "Table: t");
        assert!(!schema.is_empty());
        assert!(SchemaDescription::from("  ").is_empty());
    }
}
