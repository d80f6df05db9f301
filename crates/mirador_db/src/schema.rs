//! Database schema creation for all Mirador tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::MiradorDb;
use tracing::info;

impl MiradorDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // Enable WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_sync_tables().await?;
        self.create_cache_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Create sync control-plane tables (runs, step logs, config, cursors).
    async fn create_sync_tables(&self) -> Result<()> {
        // Runs: one row per end-to-end sync execution
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sync_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_type TEXT NOT NULL,
                strategy TEXT NOT NULL,
                since TEXT,
                until TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                error_message TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Step logs: one row per pipeline step per run (weak ref on run_id)
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sync_step_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                resource TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                message TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Singleton config: schedule settings + high-water timestamps
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sync_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                org_id TEXT NOT NULL,
                auto_sync_enabled INTEGER NOT NULL DEFAULT 0,
                interval_minutes INTEGER NOT NULL DEFAULT 60,
                last_sync_started_at TEXT,
                last_sync_completed_at TEXT,
                last_successful_sync_at TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Cursors: per-resource incremental resumption points
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sync_cursors (
                resource TEXT PRIMARY KEY,
                last_cursor TEXT,
                last_item_timestamp TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create read-side cache tables (state bookkeeping + payload stores).
    async fn create_cache_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS cache_states (
                cache_key TEXT PRIMARY KEY,
                generated_at TEXT NOT NULL,
                run_id INTEGER,
                item_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}'
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Payloads are replaced wholesale, never field-updated, so a reader
        // can never observe a torn write.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS cache_payloads (
                cache_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
