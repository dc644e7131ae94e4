// SQLite Run History Repository

use sluice_core::domain::{JobRun, RunState};
use sluice_core::error::{AppError, Result};
use sluice_core::port::RunHistoryRepository;
use tracing::debug;

use crate::connection::SqliteDatabase;
use crate::error::map_sqlx_error;
use crate::migration::run_migrations;

pub struct SqliteRunHistory {
    database: SqliteDatabase,
}

impl SqliteRunHistory {
    /// Open (or create) the history database and bring its schema up to date
    pub fn open(database_url: &str) -> Result<Self> {
        let database = SqliteDatabase::open(database_url, 1)?;
        database.block_on(run_migrations(database.pool()))?;
        Ok(Self { database })
    }
}

impl RunHistoryRepository for SqliteRunHistory {
    fn record_start(&self, run: &JobRun) -> Result<()> {
        self.database.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO job_runs (run_id, job_name, job_uuid, test, state, started_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run.run_id)
            .bind(&run.job_name)
            .bind(&run.job_uuid)
            .bind(run.test)
            .bind(run.state.to_string())
            .bind(run.started_at)
            .execute(self.database.pool())
            .await
            .map_err(map_sqlx_error)
        })?;
        debug!(run_id = %run.run_id, job = %run.job_name, "Run start recorded");
        Ok(())
    }

    fn record_finish(&self, run: &JobRun) -> Result<()> {
        let profile = run.profile.as_ref().map(|p| p.to_string());
        self.database.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO job_runs (run_id, job_name, job_uuid, test, state, started_at,
                                      finished_at, error_count, error_message, profile)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(run_id) DO UPDATE SET
                    state = excluded.state,
                    finished_at = excluded.finished_at,
                    error_count = excluded.error_count,
                    error_message = excluded.error_message,
                    profile = excluded.profile
                "#,
            )
            .bind(&run.run_id)
            .bind(&run.job_name)
            .bind(&run.job_uuid)
            .bind(run.test)
            .bind(run.state.to_string())
            .bind(run.started_at)
            .bind(run.finished_at)
            .bind(run.error_count)
            .bind(&run.error_message)
            .bind(profile)
            .execute(self.database.pool())
            .await
            .map_err(map_sqlx_error)
        })?;
        debug!(run_id = %run.run_id, state = %run.state, "Run end recorded");
        Ok(())
    }

    fn recent(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>> {
        let rows: Vec<RunRow> = self.database.block_on(async {
            sqlx::query_as(
                r#"
                SELECT run_id, job_name, job_uuid, test, state, started_at,
                       finished_at, error_count, error_message, profile
                FROM job_runs
                WHERE job_name = ?
                ORDER BY started_at DESC, rowid DESC
                LIMIT ?
                "#,
            )
            .bind(job_name)
            .bind(limit as i64)
            .fetch_all(self.database.pool())
            .await
            .map_err(map_sqlx_error)
        })?;
        rows.into_iter().map(RunRow::into_run).collect()
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_id: String,
    job_name: String,
    job_uuid: String,
    test: bool,
    state: String,
    started_at: i64,
    finished_at: Option<i64>,
    error_count: i64,
    error_message: Option<String>,
    profile: Option<String>,
}

impl RunRow {
    fn into_run(self) -> Result<JobRun> {
        let state: RunState = self.state.parse().map_err(AppError::Database)?;
        let profile = self
            .profile
            .map(|text| serde_json::from_str(&text))
            .transpose()?;
        Ok(JobRun {
            run_id: self.run_id,
            job_name: self.job_name,
            job_uuid: self.job_uuid,
            test: self.test,
            state,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error_count: self.error_count,
            error_message: self.error_message,
            profile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open(dir: &tempfile::TempDir) -> SqliteRunHistory {
        SqliteRunHistory::open(&format!("sqlite://{}", dir.path().join("history.db").display()))
            .unwrap()
    }

    #[test]
    fn test_start_then_finish() {
        let dir = tempfile::tempdir().unwrap();
        let history = open(&dir);

        let mut run = JobRun::started("run-1".into(), "daily".into(), "u-1".into(), false, 1_000);
        history.record_start(&run).unwrap();
        assert_eq!(history.recent("daily", 5).unwrap()[0].state, RunState::Running);

        run.finish(1_750, 1, Some("Transport error: refused".into()));
        run.profile = Some(json!({"name": "<root>", "duration_ms": 750.0}));
        history.record_finish(&run).unwrap();

        let runs = history.recent("daily", 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0], run);
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let history = open(&dir);
        for (i, started) in [100, 300, 200].into_iter().enumerate() {
            let run = JobRun::started(format!("run-{}", i), "daily".into(), "u".into(), true, started);
            history.record_start(&run).unwrap();
        }
        history
            .record_start(&JobRun::started("other".into(), "weekly".into(), "u".into(), false, 999))
            .unwrap();

        let runs = history.recent("daily", 2).unwrap();
        let started: Vec<i64> = runs.iter().map(|r| r.started_at).collect();
        assert_eq!(started, vec![300, 200]);
        assert!(runs.iter().all(|r| r.test));
    }

    #[test]
    fn test_reopen_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        {
            let history = open(&dir);
            let run = JobRun::started("run-1".into(), "daily".into(), "u".into(), false, 1);
            history.record_start(&run).unwrap();
        }
        assert_eq!(open(&dir).recent("daily", 10).unwrap().len(), 1);
    }
}
