//! The Collector seam: the client that actually fetches upstream records.
//!
//! Mirador delegates all upstream I/O to an implementation of [`Collector`].
//! Implementations must tolerate re-invocation over overlapping ranges
//! (idempotent upsert semantics) - the coordinator may replay bounds after a
//! partial failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Bounds and identity for one collection pass.
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    pub org_id: String,
    pub run_id: i64,
    /// Inclusive lower bound per resource kind; `None` means "from the
    /// beginning".
    pub since_by_resource: BTreeMap<String, Option<DateTime<Utc>>>,
    /// Exclusive upper bound shared by all resources.
    pub until: Option<DateTime<Utc>>,
}

/// What one resource kind reported for a collection pass.
#[derive(Debug, Clone, Default)]
pub struct ResourceReport {
    /// Upstream items processed for this resource.
    pub count: u64,
    /// Latest upstream item timestamp actually observed.
    pub latest_item_at: Option<DateTime<Utc>>,
    /// Opaque resumption cursor, if the upstream paginates by token.
    pub cursor: Option<String>,
}

/// Aggregate result of a collection pass.
#[derive(Debug, Clone, Default)]
pub struct CollectionOutcome {
    pub by_resource: BTreeMap<String, ResourceReport>,
    /// Distinct local entities touched (upserted or relinked).
    pub entities_processed: u64,
}

impl CollectionOutcome {
    /// Max observed item timestamp across all resources.
    pub fn latest_item_at(&self) -> Option<DateTime<Utc>> {
        self.by_resource
            .values()
            .filter_map(|r| r.latest_item_at)
            .max()
    }

    pub fn counts_by_resource(&self) -> BTreeMap<String, u64> {
        self.by_resource
            .iter()
            .map(|(k, v)| (k.clone(), v.count))
            .collect()
    }

    /// Fold another pass into this one (iterative backfill accumulator):
    /// counts add up, latest timestamps max-merge, the later cursor wins.
    pub fn absorb(&mut self, other: CollectionOutcome) {
        for (resource, report) in other.by_resource {
            let entry = self.by_resource.entry(resource).or_default();
            entry.count += report.count;
            if report.latest_item_at >= entry.latest_item_at {
                if report.cursor.is_some() {
                    entry.cursor = report.cursor;
                }
                entry.latest_item_at = report.latest_item_at.or(entry.latest_item_at);
            }
        }
        self.entities_processed += other.entities_processed;
    }
}

/// Receives incremental progress during a collection pass.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, resource: &str, fetched: u64);
}

/// Progress sink that only traces.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, resource: &str, fetched: u64) {
        debug!(resource, fetched, "Collection progress");
    }
}

/// Upstream fetch client.
#[async_trait]
pub trait Collector: Send + Sync {
    /// The resource kinds this collector tracks, each with its own cursor.
    fn resources(&self) -> Vec<String>;

    /// Fetch and upsert everything in the requested bounds.
    async fn collect(
        &self,
        request: CollectionRequest,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<CollectionOutcome>;

    /// Narrower pass used by the iterative backfill (e.g. relink-style
    /// walks). Defaults to a full collect over the window.
    async fn collect_window(
        &self,
        request: CollectionRequest,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<CollectionOutcome> {
        self.collect(request, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_absorb_accumulates() {
        let now = Utc::now();
        let mut total = CollectionOutcome::default();

        let mut first = CollectionOutcome::default();
        first.by_resource.insert(
            "issue".into(),
            ResourceReport {
                count: 3,
                latest_item_at: Some(now - Duration::days(1)),
                cursor: Some("c1".into()),
            },
        );
        first.entities_processed = 3;

        let mut second = CollectionOutcome::default();
        second.by_resource.insert(
            "issue".into(),
            ResourceReport {
                count: 2,
                latest_item_at: Some(now),
                cursor: Some("c2".into()),
            },
        );
        second.entities_processed = 2;

        total.absorb(first);
        total.absorb(second);

        let report = &total.by_resource["issue"];
        assert_eq!(report.count, 5);
        assert_eq!(report.latest_item_at, Some(now));
        assert_eq!(report.cursor.as_deref(), Some("c2"));
        assert_eq!(total.entities_processed, 5);
        assert_eq!(total.latest_item_at(), Some(now));
    }
}
