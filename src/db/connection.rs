//! Database connection management using sqlx

use crate::db::Dialect;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection pool for whichever backend the URL points at
#[derive(Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl DbPool {
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
        }
    }
}

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str, dialect: Dialect) -> Result<DbPool, sqlx::Error> {
    match dialect {
        Dialect::MySql => {
            let pool = MySqlPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(database_url)
                .await?;

            // Test the connection
            sqlx::query("SELECT 1").execute(&pool).await?;
            Ok(DbPool::MySql(pool))
        }
        Dialect::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(database_url)
                .await?;

            sqlx::query("SELECT 1").execute(&pool).await?;
            Ok(DbPool::Postgres(pool))
        }
    }
}
