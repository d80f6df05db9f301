//! Cache-backed read path with stale/corrupt detection and live fallback.
//!
//! Readers are never blocked by refresh latency and never hard-fail on a
//! stale or corrupt artifact: they log, kick off a background refresh, and
//! serve the live computation instead.

use crate::coordinator::CacheCoordinator;
use crate::error::{CacheError, Result};
use crate::freshness::is_fresh;
use chrono::{DateTime, Utc};
use mirador_db::MiradorDb;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-cache-kind read path.
pub struct CachedReader {
    db: MiradorDb,
    coordinator: Arc<CacheCoordinator>,
}

impl CachedReader {
    pub fn new(db: MiradorDb, coordinator: Arc<CacheCoordinator>) -> Self {
        Self { db, coordinator }
    }

    /// Read one cache kind: the stored artifact when fresh and parseable,
    /// otherwise the equivalent live computation.
    pub async fn read(&self, cache_key: &str) -> Result<serde_json::Value> {
        let last = self.last_successful_sync_at().await?;
        let state = self.db.get_cache_state(cache_key).await?;
        let generated_at = state.as_ref().map(|s| s.generated_at.as_str());

        if is_fresh(generated_at, last) {
            match self.db.read_cache_payload(cache_key).await? {
                Some(text) => match serde_json::from_str(&text) {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        warn!("Cache '{}' payload is corrupt ({}), serving live", cache_key, e);
                        // Fresh-but-corrupt needs a forced rebuild.
                        self.spawn_background_refresh("corrupt payload", true);
                    }
                },
                None => {
                    warn!("Cache '{}' has state but no payload, serving live", cache_key);
                    self.spawn_background_refresh("missing payload", true);
                }
            }
        } else {
            debug!("Cache '{}' is stale, serving live", cache_key);
            self.spawn_background_refresh("stale read", false);
        }

        self.live(cache_key).await
    }

    /// The live computation behind `cache_key` - the correctness fallback,
    /// equivalent (modulo ordering) to a fresh artifact.
    async fn live(&self, cache_key: &str) -> Result<serde_json::Value> {
        let builder = self
            .coordinator
            .builder_for(cache_key)
            .ok_or_else(|| CacheError::UnknownKey(cache_key.to_string()))?;

        let artifact = builder.build(&self.db).await.map_err(|e| CacheError::Build {
            key: cache_key.to_string(),
            source: e,
        })?;

        Ok(artifact.payload)
    }

    /// Fire-and-forget refresh with a terminal log-and-drop error handler;
    /// never re-enters the caller's control flow. Concurrent triggers collapse
    /// via the coordinator's single-flight.
    fn spawn_background_refresh(&self, reason: &'static str, force: bool) {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.ensure(None, reason, force).await {
                warn!("Background cache refresh ({}) failed: {}", reason, e);
            }
        });
    }

    async fn last_successful_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.db.get_config().await {
            Ok(config) => Ok(config.last_successful_sync_at),
            Err(mirador_db::DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
