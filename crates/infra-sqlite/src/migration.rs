// Schema migrations for the run history database

use sluice_core::error::Result;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::map_sqlx_error;

/// Ordered schema steps; each script records its own `schema_version` row
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "job runs",
    include_str!("../migrations/001_job_runs.sql"),
)];

/// Bring the history schema up to the latest version
///
/// Idempotent: steps at or below the recorded version are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = schema_version(pool).await?;
    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|(version, _, _)| *version > current)
        .collect();
    if pending.is_empty() {
        debug!(version = current, "History schema up to date");
        return Ok(());
    }

    for (version, name, script) in pending {
        info!(version, name, "Applying history migration");
        let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
        for statement in script_statements(script) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
    }
    Ok(())
}

async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let tracked: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;
    if !tracked {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(version.unwrap_or(0))
}

/// `;`-separated statements with `--` comment lines dropped
fn script_statements(script: &str) -> Vec<String> {
    let uncommented: String = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    uncommented
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    #[test]
    fn test_script_statements_drop_comments() {
        let statements = script_statements("-- header\nCREATE TABLE a (x INTEGER);\n\n-- tail\n");
        assert_eq!(statements, vec!["CREATE TABLE a (x INTEGER)".to_string()]);
    }

    #[tokio::test]
    async fn test_run_migrations_twice() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_runs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        assert_eq!(schema_version(&pool).await.unwrap(), 1);
    }
}
