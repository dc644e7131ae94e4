// SQLite Connection Pool Setup

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sluice_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::error::map_sqlx_error;

/// Create SQLite connection pool with WAL mode and optimizations
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url '{}': {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)?;

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .map_err(map_sqlx_error)?;

    Ok(pool)
}

/// A pool driven from synchronous code through a private current-thread runtime
///
/// Must not be used from inside another tokio runtime.
pub struct SqliteDatabase {
    runtime: Runtime,
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub fn open(database_url: &str, max_connections: u32) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let pool = runtime.block_on(create_pool(database_url, max_connections))?;
        debug!(url = %database_url, max_connections, "Opened SQLite database");
        Ok(Self { runtime, pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
