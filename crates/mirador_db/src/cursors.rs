//! Per-resource incremental cursor operations.

use crate::error::Result;
use crate::types::*;
use crate::MiradorDb;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl MiradorDb {
    /// Get the cursor for one resource kind.
    pub async fn get_cursor(&self, resource: &str) -> Result<Option<ResourceCursor>> {
        let row = sqlx::query("SELECT * FROM sync_cursors WHERE resource = ?")
            .bind(resource)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row_to_cursor(&row)))
    }

    /// All known cursors.
    pub async fn list_cursors(&self) -> Result<Vec<ResourceCursor>> {
        let rows = sqlx::query("SELECT * FROM sync_cursors ORDER BY resource ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_cursor).collect())
    }

    /// Advance a resource cursor, max-merging with what is already stored so
    /// an overlapping retry or backfill can never move it backwards. A stale
    /// write is tolerated as re-processing, never an error.
    pub async fn advance_cursor(
        &self,
        resource: &str,
        cursor: Option<&str>,
        item_timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        // Callers hold the execution lock; read-compare-write is safe.
        let existing = self.get_cursor(resource).await?;

        let (merged_cursor, merged_ts) = match existing {
            Some(prev) => {
                let ts = match (prev.last_item_timestamp, item_timestamp) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                // Only take the new opaque cursor when the new timestamp wins;
                // otherwise keep the pair we already trust.
                let keep_new = item_timestamp >= prev.last_item_timestamp;
                let cur = if keep_new {
                    cursor.map(str::to_owned).or(prev.last_cursor)
                } else {
                    prev.last_cursor
                };
                (cur, ts)
            }
            None => (cursor.map(str::to_owned), item_timestamp),
        };

        sqlx::query(
            r#"
            INSERT INTO sync_cursors (resource, last_cursor, last_item_timestamp)
            VALUES (?, ?, ?)
            ON CONFLICT (resource) DO UPDATE SET
                last_cursor = excluded.last_cursor,
                last_item_timestamp = excluded.last_item_timestamp
            "#,
        )
        .bind(resource)
        .bind(merged_cursor)
        .bind(merged_ts.map(format_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_cursor(row: &SqliteRow) -> ResourceCursor {
    ResourceCursor {
        resource: row.get("resource"),
        last_cursor: row.get("last_cursor"),
        last_item_timestamp: row
            .get::<Option<String>, _>("last_item_timestamp")
            .as_deref()
            .and_then(parse_timestamp),
    }
}
