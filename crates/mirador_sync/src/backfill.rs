//! Backfill chunking policies, both built on the run coordinator.
//!
//! - Single-range: validate and align the whole range, one coordinator
//!   invocation, one chunk outcome.
//! - Iterative: walk the range in fixed one-day windows with a narrower
//!   per-window collection, accumulated under a single run and step log.

use crate::collector::{CollectionOutcome, CollectionRequest, Collector, LogProgress};
use crate::coordinator::{RunCoordinator, RunRequest};
use crate::error::{Result, SyncError};
use crate::events::RunSummary;
use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Default lookback when no start bound is given.
const DEFAULT_BACKFILL_DAYS: i64 = 90;

/// A validated, day-aligned backfill range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Validate `start <= end <= now`, apply defaults, and align to day
/// boundaries. Rejected before any run record exists.
pub fn resolve_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<BackfillRange> {
    let end = end.unwrap_or(now);
    let start = start.unwrap_or(end - ChronoDuration::days(DEFAULT_BACKFILL_DAYS));

    if end > now {
        return Err(SyncError::validation(format!(
            "backfill end {end} is in the future (must be <= now)"
        )));
    }
    if start > end {
        return Err(SyncError::validation(format!(
            "backfill start {start} is after end {end} (must be start <= end)"
        )));
    }

    let aligned_start = floor_day(start);
    let aligned_end = ceil_day(end).min(now);

    Ok(BackfillRange {
        start: aligned_start,
        end: aligned_end,
    })
}

fn floor_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn ceil_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_day(ts);
    if floored == ts {
        ts
    } else {
        floored + ChronoDuration::days(1)
    }
}

/// Fixed one-day windows covering `[start, end)`; the last window may be
/// shorter. Yields nothing for an empty range.
#[derive(Debug, Clone)]
pub struct DayWindows {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DayWindows {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { cursor: start, end }
    }
}

impl Iterator for DayWindows {
    type Item = (DateTime<Utc>, DateTime<Utc>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let next = (self.cursor + ChronoDuration::days(1)).min(self.end);
        let window = (self.cursor, next);
        self.cursor = next;
        Some(window)
    }
}

/// Outcome of one backfill invocation.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub run_id: i64,
    pub range: BackfillRange,
    pub windows: usize,
    pub counts_by_resource: BTreeMap<String, u64>,
    pub entities_processed: u64,
    pub latest_item_at: Option<DateTime<Utc>>,
}

impl ChunkOutcome {
    fn from_summary(summary: RunSummary, range: BackfillRange, windows: usize) -> Self {
        Self {
            run_id: summary.run_id,
            range,
            windows,
            counts_by_resource: summary.counts_by_resource,
            entities_processed: summary.entities_processed,
            latest_item_at: summary.latest_item_at,
        }
    }
}

/// Historical backfill entry points.
pub struct BackfillChunker<C> {
    coordinator: Arc<RunCoordinator<C>>,
}

impl<C: Collector + 'static> BackfillChunker<C> {
    pub fn new(coordinator: Arc<RunCoordinator<C>>) -> Self {
        Self { coordinator }
    }

    /// Single-range policy: one coordinator invocation over the whole
    /// validated range. No sub-division happens here.
    pub async fn run_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ChunkOutcome> {
        let range = resolve_range(start, end, Utc::now())?;
        info!(start = %range.start, end = %range.end, "Starting backfill");

        let summary = self
            .coordinator
            .execute(RunRequest::backfill(range.start, range.end))
            .await?;

        Ok(ChunkOutcome::from_summary(summary, range, 1))
    }

    /// Iterative policy (narrow relink-style backfills): walk the range in
    /// one-day windows under a single run. A mid-walk failure aborts the
    /// remaining windows and fails that run; completed windows stay durable
    /// and are re-processed idempotently on retry from the original start.
    pub async fn run_windows(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ChunkOutcome> {
        let range = resolve_range(start, end, Utc::now())?;
        let windows = DayWindows::new(range.start, range.end).count();
        info!(
            start = %range.start,
            end = %range.end,
            windows,
            "Starting windowed backfill"
        );

        let collector = self.coordinator.collector();
        let driver = move |request: CollectionRequest| async move {
            let mut total = CollectionOutcome::default();
            for (window_start, window_end) in DayWindows::new(range.start, range.end) {
                let window_request = CollectionRequest {
                    org_id: request.org_id.clone(),
                    run_id: request.run_id,
                    since_by_resource: request
                        .since_by_resource
                        .keys()
                        .map(|resource| (resource.clone(), Some(window_start)))
                        .collect(),
                    until: Some(window_end),
                };
                let outcome = collector
                    .collect_window(window_request, &LogProgress)
                    .await
                    .with_context(|| {
                        format!("window {window_start} .. {window_end} failed")
                    })?;
                total.absorb(outcome);
            }
            Ok(total)
        };

        let summary = self
            .coordinator
            .execute_with(RunRequest::backfill(range.start, range.end), driver)
            .await?;

        Ok(ChunkOutcome::from_summary(summary, range, windows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let now = at(2024, 6, 1, 0);
        let err = resolve_range(Some(at(2024, 5, 10, 0)), Some(at(2024, 5, 5, 0)), now)
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_future_end_is_rejected() {
        let now = at(2024, 6, 1, 0);
        let err = resolve_range(None, Some(at(2024, 6, 2, 0)), now).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_range_aligns_to_day_boundaries() {
        let now = at(2024, 6, 15, 12);
        let range =
            resolve_range(Some(at(2024, 6, 1, 9)), Some(at(2024, 6, 3, 17)), now).unwrap();
        assert_eq!(range.start, at(2024, 6, 1, 0));
        assert_eq!(range.end, at(2024, 6, 4, 0));
    }

    #[test]
    fn test_aligned_end_never_passes_now() {
        let now = at(2024, 6, 3, 12);
        let range = resolve_range(Some(at(2024, 6, 1, 0)), None, now).unwrap();
        assert_eq!(range.end, now);
    }

    #[test]
    fn test_default_lookback() {
        let now = at(2024, 6, 1, 0);
        let range = resolve_range(None, None, now).unwrap();
        assert_eq!(range.end, now);
        assert_eq!(range.start, floor_day(now - ChronoDuration::days(90)));
    }

    #[test]
    fn test_day_windows_cover_range_exactly() {
        let windows: Vec<_> = DayWindows::new(at(2024, 5, 1, 0), at(2024, 5, 3, 12)).collect();
        assert_eq!(
            windows,
            vec![
                (at(2024, 5, 1, 0), at(2024, 5, 2, 0)),
                (at(2024, 5, 2, 0), at(2024, 5, 3, 0)),
                (at(2024, 5, 3, 0), at(2024, 5, 3, 12)),
            ]
        );
    }

    #[test]
    fn test_day_windows_empty_range() {
        let start = at(2024, 5, 1, 0);
        assert_eq!(DayWindows::new(start, start).count(), 0);
    }
}
