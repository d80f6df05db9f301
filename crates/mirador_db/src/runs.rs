//! Run record and step log operations.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::MiradorDb;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

impl MiradorDb {
    // ========================================================================
    // Run Records
    // ========================================================================

    /// Create a new run in `running` state, returning its id.
    pub async fn create_run(
        &self,
        run_type: RunType,
        strategy: SyncStrategy,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_runs (run_type, strategy, since, until, status, started_at)
            VALUES (?, ?, ?, ?, 'running', ?)
            "#,
        )
        .bind(run_type.as_str())
        .bind(strategy.as_str())
        .bind(since.map(format_timestamp))
        .bind(until.map(format_timestamp))
        .bind(format_timestamp(started_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Mark a run successful.
    pub async fn mark_run_success(&self, run_id: i64, completed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'success', completed_at = ?, error_message = NULL
            WHERE id = ?
            "#,
        )
        .bind(format_timestamp(completed_at))
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        info!("Run {} succeeded", run_id);
        Ok(())
    }

    /// Mark a run failed with an error message.
    pub async fn mark_run_failed(
        &self,
        run_id: i64,
        error: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'failed', completed_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(format_timestamp(completed_at))
        .bind(error)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        info!("Run {} failed: {}", run_id, error);
        Ok(())
    }

    /// Get a run by id.
    pub async fn get_run(&self, run_id: i64) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_run(&row)).transpose()
    }

    /// List recent runs, newest first.
    pub async fn list_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query("SELECT * FROM sync_runs ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_run).collect()
    }

    /// Runs still marked `running` (crashed or genuinely in flight).
    pub async fn running_runs(&self) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query("SELECT * FROM sync_runs WHERE status = 'running' ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_run).collect()
    }

    /// Force every `running` run to `failed`, setting completion time where
    /// absent. Returns the ids of the runs changed.
    pub async fn force_fail_running_runs(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM sync_runs WHERE status = 'running' ORDER BY id ASC",
        )
        .fetch_all(&mut *tx)
        .await?;

        if !ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE sync_runs
                SET status = 'failed',
                    error_message = COALESCE(error_message, ?),
                    completed_at = COALESCE(completed_at, ?)
                WHERE status = 'running'
                "#,
            )
            .bind(reason)
            .bind(format_timestamp(at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }

    // ========================================================================
    // Step Logs
    // ========================================================================

    /// Open a step log in `running` state, returning its id.
    pub async fn start_step(
        &self,
        run_id: i64,
        resource: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_step_logs (run_id, resource, status, started_at)
            VALUES (?, ?, 'running', ?)
            "#,
        )
        .bind(run_id)
        .bind(resource)
        .bind(format_timestamp(started_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Finalize a step log.
    pub async fn finish_step(
        &self,
        step_id: i64,
        status: RunStatus,
        message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_step_logs
            SET status = ?, message = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(message)
        .bind(format_timestamp(finished_at))
        .bind(step_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Step logs for one run, in creation order.
    pub async fn steps_for_run(&self, run_id: i64) -> Result<Vec<StepLog>> {
        let rows = sqlx::query("SELECT * FROM sync_step_logs WHERE run_id = ? ORDER BY id ASC")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_step).collect()
    }

    /// Force every `running` step log to `failed`, setting finish time where
    /// absent. Returns `(id, run_id, resource)` for each step changed.
    pub async fn force_fail_running_steps(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<(i64, i64, String)>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id, run_id, resource FROM sync_step_logs WHERE status = 'running' ORDER BY id ASC",
        )
        .fetch_all(&mut *tx)
        .await?;

        let stuck: Vec<(i64, i64, String)> = rows
            .iter()
            .map(|row| {
                (
                    row.get::<i64, _>("id"),
                    row.get::<i64, _>("run_id"),
                    row.get::<String, _>("resource"),
                )
            })
            .collect();

        if !stuck.is_empty() {
            sqlx::query(
                r#"
                UPDATE sync_step_logs
                SET status = 'failed',
                    message = COALESCE(message, ?),
                    finished_at = COALESCE(finished_at, ?)
                WHERE status = 'running'
                "#,
            )
            .bind(reason)
            .bind(format_timestamp(at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(stuck)
    }
}

fn row_to_run(row: &SqliteRow) -> Result<SyncRun> {
    let run_type_str: String = row.get("run_type");
    let strategy_str: String = row.get("strategy");
    let status_str: String = row.get("status");

    Ok(SyncRun {
        id: row.get("id"),
        run_type: RunType::parse(&run_type_str)
            .ok_or_else(|| DbError::invalid_state(format!("unknown run type: {run_type_str}")))?,
        strategy: SyncStrategy::parse(&strategy_str)
            .ok_or_else(|| DbError::invalid_state(format!("unknown strategy: {strategy_str}")))?,
        since: parse_optional_ts(row.get("since")),
        until: parse_optional_ts(row.get("until")),
        status: RunStatus::parse(&status_str)
            .ok_or_else(|| DbError::invalid_state(format!("unknown run status: {status_str}")))?,
        error_message: row.get("error_message"),
        started_at: parse_required_ts(row.get("started_at"))?,
        completed_at: parse_optional_ts(row.get("completed_at")),
    })
}

fn row_to_step(row: &SqliteRow) -> Result<StepLog> {
    let status_str: String = row.get("status");

    Ok(StepLog {
        id: row.get("id"),
        run_id: row.get("run_id"),
        resource: row.get("resource"),
        status: RunStatus::parse(&status_str)
            .ok_or_else(|| DbError::invalid_state(format!("unknown step status: {status_str}")))?,
        message: row.get("message"),
        started_at: parse_required_ts(row.get("started_at"))?,
        finished_at: parse_optional_ts(row.get("finished_at")),
    })
}

fn parse_optional_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value.as_deref().and_then(parse_timestamp)
}

fn parse_required_ts(value: String) -> Result<DateTime<Utc>> {
    parse_timestamp(&value)
        .ok_or_else(|| DbError::invalid_state(format!("bad stored timestamp: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let db = MiradorDb::open_memory().await.unwrap();
        let started = Utc::now();

        let run_id = db
            .create_run(RunType::Manual, SyncStrategy::Incremental, None, None, started)
            .await
            .unwrap();

        let run = db.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());

        db.mark_run_success(run_id, started + Duration::seconds(5))
            .await
            .unwrap();
        let run = db.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_force_fail_running_runs() {
        let db = MiradorDb::open_memory().await.unwrap();
        let now = Utc::now();

        let a = db
            .create_run(RunType::Automatic, SyncStrategy::Incremental, None, None, now)
            .await
            .unwrap();
        let b = db
            .create_run(RunType::Backfill, SyncStrategy::Backfill, None, None, now)
            .await
            .unwrap();
        db.mark_run_success(b, now).await.unwrap();

        let failed = db.force_fail_running_runs("crash recovery", now).await.unwrap();
        assert_eq!(failed, vec![a]);

        let run = db.get_run(a).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.completed_at.is_some());
        // The already-finished run is untouched.
        let run = db.get_run(b).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_step_log_lifecycle() {
        let db = MiradorDb::open_memory().await.unwrap();
        let now = Utc::now();

        let run_id = db
            .create_run(RunType::Manual, SyncStrategy::Incremental, None, None, now)
            .await
            .unwrap();
        let step_id = db.start_step(run_id, "cache_refresh", now).await.unwrap();
        db.finish_step(step_id, RunStatus::Failed, Some("boom"), now)
            .await
            .unwrap();

        let steps = db.steps_for_run(run_id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, RunStatus::Failed);
        assert_eq!(steps[0].message.as_deref(), Some("boom"));
        assert!(steps[0].finished_at.is_some());
    }
}
