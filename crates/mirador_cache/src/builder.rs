//! The seam between the cache layer and the Insight Engine.
//!
//! Each cache kind (filter-option snapshot, linked-entity lookups, ...) is a
//! `CacheBuilder` registered with the coordinator. A builder computes the full
//! materialized payload from the mirror; the same computation doubles as the
//! reader's live fallback when the stored artifact is stale or corrupt.

use async_trait::async_trait;
use mirador_db::MiradorDb;

/// One computed cache artifact, ready to be stored.
#[derive(Debug, Clone)]
pub struct CacheArtifact {
    /// The materialized view. Replaced wholesale on every refresh.
    pub payload: serde_json::Value,
    pub item_count: i64,
    /// Diagnostic only.
    pub metadata: serde_json::Value,
}

/// Computes one derived read-side cache from the mirrored data.
///
/// `build` must be deterministic over committed mirror state (modulo
/// ordering): it is both the refresh computation and the correctness fallback
/// served directly to readers.
#[async_trait]
pub trait CacheBuilder: Send + Sync {
    /// Stable identifier for this cache kind.
    fn cache_key(&self) -> &'static str;

    async fn build(&self, db: &MiradorDb) -> anyhow::Result<CacheArtifact>;
}
