//! Cache state and payload store operations.
//!
//! Payload and state rows for a refresh are written inside one transaction so
//! a reader either sees the old artifact or the new one, never a mix.

use crate::error::Result;
use crate::types::*;
use crate::MiradorDb;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

impl MiradorDb {
    /// Bookkeeping row for one cache key.
    pub async fn get_cache_state(&self, cache_key: &str) -> Result<Option<CacheState>> {
        let row = sqlx::query("SELECT * FROM cache_states WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row_to_state(&row)))
    }

    /// All cache bookkeeping rows.
    pub async fn list_cache_states(&self) -> Result<Vec<CacheState>> {
        let rows = sqlx::query("SELECT * FROM cache_states ORDER BY cache_key ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_state).collect())
    }

    /// Raw payload text for one cache key.
    pub async fn read_cache_payload(&self, cache_key: &str) -> Result<Option<String>> {
        let payload = sqlx::query_scalar("SELECT payload FROM cache_payloads WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payload)
    }

    /// Replace a set of cache artifacts atomically.
    ///
    /// Every entry shares the same `generated_at`, so observing one fresh key
    /// bounds the staleness of all the others written with it.
    pub async fn replace_caches(
        &self,
        entries: &[CacheWrite],
        generated_at: DateTime<Utc>,
        run_id: Option<i64>,
    ) -> Result<()> {
        let generated = format_timestamp(generated_at);
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO cache_payloads (cache_key, payload)
                VALUES (?, ?)
                ON CONFLICT (cache_key) DO UPDATE SET payload = excluded.payload
                "#,
            )
            .bind(&entry.cache_key)
            .bind(&entry.payload)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO cache_states (cache_key, generated_at, run_id, item_count, metadata)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (cache_key) DO UPDATE SET
                    generated_at = excluded.generated_at,
                    run_id = excluded.run_id,
                    item_count = excluded.item_count,
                    metadata = excluded.metadata
                "#,
            )
            .bind(&entry.cache_key)
            .bind(&generated)
            .bind(run_id)
            .bind(entry.item_count)
            .bind(entry.metadata.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Replaced {} cache artifacts", entries.len());
        Ok(())
    }
}

fn row_to_state(row: &SqliteRow) -> CacheState {
    let metadata: String = row.get("metadata");

    CacheState {
        cache_key: row.get("cache_key"),
        generated_at: row.get("generated_at"),
        run_id: row.get("run_id"),
        item_count: row.get("item_count"),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    }
}
