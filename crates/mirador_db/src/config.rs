//! Singleton sync configuration operations.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::MiradorDb;
use chrono::{DateTime, Utc};
use sqlx::Row;

impl MiradorDb {
    /// Insert the config singleton if it does not exist yet.
    pub async fn ensure_config(&self, org_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_config (id, org_id)
            VALUES (1, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read the config singleton.
    pub async fn get_config(&self) -> Result<SyncConfig> {
        let row = sqlx::query("SELECT * FROM sync_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("sync config not initialized"))?;

        Ok(SyncConfig {
            org_id: row.get("org_id"),
            auto_sync_enabled: row.get::<i64, _>("auto_sync_enabled") != 0,
            interval_minutes: row.get("interval_minutes"),
            last_sync_started_at: parse_opt(row.get("last_sync_started_at")),
            last_sync_completed_at: parse_opt(row.get("last_sync_completed_at")),
            last_successful_sync_at: parse_opt(row.get("last_successful_sync_at")),
        })
    }

    /// Update the auto-sync schedule settings.
    ///
    /// Errors with `NotFound` when the config singleton is missing: enabling
    /// a schedule on an uninitialized mirror must never report success.
    pub async fn set_schedule(&self, enabled: bool, interval_minutes: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_config SET auto_sync_enabled = ?, interval_minutes = ? WHERE id = 1",
        )
        .bind(enabled as i64)
        .bind(interval_minutes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("sync config not initialized"));
        }

        Ok(())
    }

    /// Record that a sync body started.
    pub async fn record_sync_started(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sync_config SET last_sync_started_at = ? WHERE id = 1")
            .bind(format_timestamp(at))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record that a sync body finished (success or failure).
    pub async fn record_sync_completed(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sync_config SET last_sync_completed_at = ? WHERE id = 1")
            .bind(format_timestamp(at))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Advance the freshness marker, never letting it regress.
    ///
    /// Callers hold the execution lock, so read-compare-write is safe here.
    /// Returns the effective marker after the write.
    pub async fn advance_last_successful_sync(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let current = self.get_config().await?.last_successful_sync_at;
        let effective = match current {
            Some(existing) if existing >= at => existing,
            _ => {
                sqlx::query("UPDATE sync_config SET last_successful_sync_at = ? WHERE id = 1")
                    .bind(format_timestamp(at))
                    .execute(&self.pool)
                    .await?;
                at
            }
        };

        Ok(effective)
    }
}

fn parse_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value.as_deref().and_then(parse_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_config_defaults() {
        let db = MiradorDb::open_memory().await.unwrap();
        db.ensure_config("org-1").await.unwrap();

        let config = db.get_config().await.unwrap();
        assert_eq!(config.org_id, "org-1");
        assert!(!config.auto_sync_enabled);
        assert_eq!(config.interval_minutes, 60);
        assert!(config.last_successful_sync_at.is_none());

        // Re-ensuring does not clobber anything.
        db.set_schedule(true, 15).await.unwrap();
        db.ensure_config("org-2").await.unwrap();
        let config = db.get_config().await.unwrap();
        assert_eq!(config.org_id, "org-1");
        assert_eq!(config.interval_minutes, 15);
    }

    #[tokio::test]
    async fn test_set_schedule_requires_config_row() {
        let db = MiradorDb::open_memory().await.unwrap();

        // No singleton yet: the write must fail, not silently match nothing.
        let err = db.set_schedule(true, 30).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));

        db.ensure_config("org-1").await.unwrap();
        db.set_schedule(true, 30).await.unwrap();
        let config = db.get_config().await.unwrap();
        assert!(config.auto_sync_enabled);
        assert_eq!(config.interval_minutes, 30);
    }

    #[tokio::test]
    async fn test_freshness_marker_never_regresses() {
        let db = MiradorDb::open_memory().await.unwrap();
        db.ensure_config("org-1").await.unwrap();

        let later = Utc::now();
        let earlier = later - Duration::hours(2);

        assert_eq!(db.advance_last_successful_sync(later).await.unwrap(), later);
        // An older timestamp is a no-op, not a rollback.
        assert_eq!(db.advance_last_successful_sync(earlier).await.unwrap(), later);

        let config = db.get_config().await.unwrap();
        assert_eq!(config.last_successful_sync_at, Some(later));
    }
}
