//! SQL database collaborator
//!
//! Runs statements for the query executor and introspects the schema for the
//! schema descriptor. MySQL and PostgreSQL are supported, selected by the
//! connection URL scheme.

pub mod connection;
pub mod schema;
pub mod value;

pub use connection::{init_pool, DbPool};
pub use schema::{SchemaDescription, SchemaDescriptor};

use crate::config::DatabaseSettings;
use crate::error::{AgentError, Result};
use crate::executor::{ExecutionOutcome, QueryExecutor, RowSet, SqlCandidate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// SQL dialect the agent generates for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split("://").next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            _ => Err(AgentError::Config(format!(
                "Unsupported database URL scheme '{}' (expected mysql:// or postgres://)",
                scheme
            ))),
        }
    }

    /// Human-readable dialect name used in prompts
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "MySQL",
            Dialect::Postgres => "PostgreSQL",
        }
    }

    pub fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            Dialect::MySql => Box::new(sqlparser::dialect::MySqlDialect {}),
            Dialect::Postgres => Box::new(sqlparser::dialect::PostgreSqlDialect {}),
        }
    }

    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}

/// Pooled connection to the target database
pub struct SqlDatabase {
    pool: DbPool,
    dialect: Dialect,
    statement_timeout: Duration,
    sample_rows: usize,
}

impl SqlDatabase {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| AgentError::Config("DATABASE_URL is not set".to_string()))?;
        let dialect = Dialect::from_url(url)?;
        let pool = init_pool(url, dialect).await?;
        info!("Connected to {} database", dialect.name());

        Ok(Self {
            pool,
            dialect,
            statement_timeout: settings.statement_timeout,
            sample_rows: settings.sample_rows,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn sample_rows(&self) -> usize {
        self.sample_rows
    }

    /// Run one statement through the text protocol and collect its rows.
    pub async fn run(&self, sql: &str) -> std::result::Result<RowSet, sqlx::Error> {
        match &self.pool {
            DbPool::MySql(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                Ok(value::mysql_row_set(&rows))
            }
            DbPool::Postgres(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                Ok(value::pg_row_set(&rows))
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

#[async_trait]
impl QueryExecutor for SqlDatabase {
    async fn execute(&self, sql: &SqlCandidate) -> ExecutionOutcome {
        let started = Instant::now();
        // Dropping the future on timeout abandons the statement client-side only
        match tokio::time::timeout(self.statement_timeout, self.run(sql.as_str())).await {
            Ok(Ok(rows)) => {
                debug!(
                    rows = rows.len(),
                    columns = ?rows.columns,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query executed"
                );
                ExecutionOutcome::Success { rows }
            }
            Ok(Err(e)) => {
                let error_message = database_error_text(&e);
                warn!("SQL execution error: {}", error_message);
                ExecutionOutcome::failure(error_message)
            }
            Err(_) => {
                let error_message = format!(
                    "Statement timed out after {} seconds",
                    self.statement_timeout.as_secs_f64()
                );
                warn!("{}", error_message);
                ExecutionOutcome::failure(error_message)
            }
        }
    }
}

/// The driver's own rendering of a database error, without sqlx's prefix.
pub fn database_error_text(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => db_err.to_string(),
        other => other.to_string(),
    }
}
