//! Transactional, single-flighted refresh of the derived read-side caches.

use crate::builder::CacheBuilder;
use crate::error::{CacheError, Result};
use crate::freshness::is_fresh;
use crate::single_flight::SingleFlight;
use chrono::{DateTime, Utc};
use mirador_db::{CacheState, CacheWrite, MiradorDb};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Combined view of the cache fleet after an `ensure` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    /// Shared generation time of the artifacts (all keys carry the same one
    /// after any single refresh).
    pub generated_at: DateTime<Utc>,
    /// Whether this call actually recomputed the caches.
    pub refreshed: bool,
    pub item_counts: BTreeMap<String, i64>,
}

/// Coordinates refresh of every registered cache kind.
///
/// Concurrent `ensure` calls while a refresh is in flight receive that
/// refresh's outcome instead of triggering duplicate work.
pub struct CacheCoordinator {
    db: MiradorDb,
    builders: Arc<Vec<Arc<dyn CacheBuilder>>>,
    flight: SingleFlight<std::result::Result<CacheSummary, String>>,
}

impl CacheCoordinator {
    pub fn new(db: MiradorDb, builders: Vec<Arc<dyn CacheBuilder>>) -> Self {
        Self {
            db,
            builders: Arc::new(builders),
            flight: SingleFlight::new(),
        }
    }

    /// Registered cache keys.
    pub fn keys(&self) -> Vec<&'static str> {
        self.builders.iter().map(|b| b.cache_key()).collect()
    }

    /// The builder registered for `cache_key`, if any.
    pub fn builder_for(&self, cache_key: &str) -> Option<Arc<dyn CacheBuilder>> {
        self.builders
            .iter()
            .find(|b| b.cache_key() == cache_key)
            .cloned()
    }

    /// Return a summary of the caches, refreshing them first unless every key
    /// is individually fresh (and `force` is unset).
    pub async fn ensure(
        &self,
        run_id: Option<i64>,
        reason: &str,
        force: bool,
    ) -> Result<CacheSummary> {
        if self.builders.is_empty() {
            return Ok(CacheSummary {
                generated_at: Utc::now(),
                refreshed: false,
                item_counts: BTreeMap::new(),
            });
        }

        if !force {
            let states = self.db.list_cache_states().await?;
            let last = self.last_successful_sync_at().await?;
            if let Some(summary) = self.existing_summary(&states, last) {
                return Ok(summary);
            }
        }

        let db = self.db.clone();
        let builders = self.builders.clone();
        let reason = reason.to_string();

        self.flight
            .run("cache_refresh", move || async move {
                refresh(db, builders, run_id, reason).await
            })
            .await
            .map_err(CacheError::Refresh)
    }

    async fn last_successful_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.db.get_config().await {
            Ok(config) => Ok(config.last_successful_sync_at),
            Err(mirador_db::DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A summary built purely from existing state rows, or `None` if any key
    /// is missing, stale, or carries an unreadable generation time.
    fn existing_summary(
        &self,
        states: &[CacheState],
        last_successful_sync_at: Option<DateTime<Utc>>,
    ) -> Option<CacheSummary> {
        let mut generated_at: Option<DateTime<Utc>> = None;
        let mut item_counts = BTreeMap::new();

        for builder in self.builders.iter() {
            let key = builder.cache_key();
            let state = states.iter().find(|s| s.cache_key == key)?;
            if !is_fresh(Some(&state.generated_at), last_successful_sync_at) {
                return None;
            }
            let ts = state.generated_at_time()?;
            // Report the most conservative bound across keys.
            generated_at = Some(match generated_at {
                Some(existing) => existing.min(ts),
                None => ts,
            });
            item_counts.insert(key.to_string(), state.item_count);
        }

        Some(CacheSummary {
            generated_at: generated_at?,
            refreshed: false,
            item_counts,
        })
    }
}

/// Recompute every cache kind and commit all artifacts atomically under one
/// shared generation time, taken before the first read so the stored bound
/// never overstates freshness.
async fn refresh(
    db: MiradorDb,
    builders: Arc<Vec<Arc<dyn CacheBuilder>>>,
    run_id: Option<i64>,
    reason: String,
) -> std::result::Result<CacheSummary, String> {
    let generated_at = Utc::now();
    let mut writes = Vec::with_capacity(builders.len());
    let mut item_counts = BTreeMap::new();

    for builder in builders.iter() {
        let key = builder.cache_key();
        let artifact = builder.build(&db).await.map_err(|e| {
            warn!("Cache builder '{}' failed: {:#}", key, e);
            format!("builder '{key}' failed: {e:#}")
        })?;

        let mut metadata = artifact.metadata;
        if let serde_json::Value::Object(ref mut map) = metadata {
            map.insert("reason".to_string(), serde_json::Value::String(reason.clone()));
        }

        item_counts.insert(key.to_string(), artifact.item_count);
        writes.push(CacheWrite {
            cache_key: key.to_string(),
            payload: artifact.payload.to_string(),
            item_count: artifact.item_count,
            metadata,
        });
    }

    db.replace_caches(&writes, generated_at, run_id)
        .await
        .map_err(|e| format!("cache write failed: {e}"))?;

    info!(
        reason = reason.as_str(),
        keys = writes.len(),
        "Refreshed caches"
    );

    Ok(CacheSummary {
        generated_at,
        refreshed: true,
        item_counts,
    })
}
