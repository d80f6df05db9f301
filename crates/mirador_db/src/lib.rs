//! Unified database layer for Mirador.
//!
//! This crate provides a single source of truth for all database operations:
//! sync run records, step logs, the singleton sync config, per-resource
//! cursors, and the read-side cache state/payload stores.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mirador_db::{MiradorDb, Result};
//!
//! let db = MiradorDb::open("~/.mirador/mirador.db").await?;
//!
//! let run_id = db.create_run(RunType::Manual, SyncStrategy::Incremental, None, None, Utc::now()).await?;
//! let config = db.get_config().await?;
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by domain
mod cache;
mod config;
mod cursors;
mod runs;

pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Unified database for all Mirador operations.
///
/// This is the ONLY way to access the database. Do not use raw sqlx elsewhere.
#[derive(Clone)]
pub struct MiradorDb {
    pool: SqlitePool,
}

impl MiradorDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new().connect(&url).await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!("Opened database at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (tests and ephemeral tooling).
    ///
    /// Pinned to a single connection: each sqlite `:memory:` connection is its
    /// own database, so a larger pool would scatter the tables.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Raw access to the underlying pool.
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("test.db");

        let db = MiradorDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_memory_has_schema() {
        let db = MiradorDb::open_memory().await.unwrap();
        // Any typed query against a created table proves the schema ran.
        let runs = db.list_runs(10).await.unwrap();
        assert!(runs.is_empty());
    }
}
