//! Run coordinator: one end-to-end sync run.
//!
//! Lock, run-record lifecycle, bound resolution, delegation to the Collector,
//! then the sequential post-processing pipeline. All config and cursor
//! mutation happens here, under the execution lock.

use crate::collector::{
    CollectionOutcome, CollectionRequest, Collector, LogProgress, ProgressSink,
};
use crate::error::{Result, SyncError};
use crate::events::{EventBus, RunSummary, SyncEvent};
use crate::lock::ExecutionLock;
use crate::pipeline::{PostProcessStep, StepContext};
use chrono::{DateTime, Utc};
use mirador_db::{MiradorDb, RunStatus, RunType, SyncStrategy};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Lock name all sync bodies funnel through: no parallel fan-out of runs.
const SYNC_LOCK: &str = "sync";

/// Bounds and provenance for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_type: RunType,
    pub strategy: SyncStrategy,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RunRequest {
    /// Cursor-driven incremental run with no explicit bounds.
    pub fn incremental(run_type: RunType) -> Self {
        Self {
            run_type,
            strategy: SyncStrategy::Incremental,
            since: None,
            until: None,
        }
    }

    /// Explicit historical range.
    pub fn backfill(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            run_type: RunType::Backfill,
            strategy: SyncStrategy::Backfill,
            since: Some(since),
            until: Some(until),
        }
    }
}

/// Orchestrates one end-to-end sync run.
///
/// There is deliberately no timeout or cancellation here: a collector that
/// never returns holds the lock until the process restarts and
/// `cleanup_stuck_runs` relabels the bookkeeping.
pub struct RunCoordinator<C> {
    db: MiradorDb,
    collector: Arc<C>,
    events: EventBus,
    lock: ExecutionLock,
    pipeline: Vec<Arc<dyn PostProcessStep>>,
    progress: Arc<dyn ProgressSink>,
}

impl<C: Collector> RunCoordinator<C> {
    pub fn new(db: MiradorDb, collector: Arc<C>, events: EventBus, lock: ExecutionLock) -> Self {
        Self {
            db,
            collector,
            events,
            lock,
            pipeline: Vec::new(),
            progress: Arc::new(LogProgress),
        }
    }

    /// Install the fixed post-processing pipeline, run in order after every
    /// successful collection.
    pub fn with_pipeline(mut self, steps: Vec<Arc<dyn PostProcessStep>>) -> Self {
        self.pipeline = steps;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn db(&self) -> &MiradorDb {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn collector(&self) -> Arc<C> {
        self.collector.clone()
    }

    /// Run one full sync with the standard collection pass.
    pub async fn execute(&self, request: RunRequest) -> Result<RunSummary> {
        let collector = self.collector.clone();
        let progress = self.progress.clone();
        self.execute_with(request, move |creq| async move {
            collector.collect(creq, progress.as_ref()).await
        })
        .await
    }

    /// Run one full sync with a custom collection driver (the iterative
    /// backfill walks day windows through here, reusing the same lock, run
    /// record, and pipeline lifecycle).
    pub async fn execute_with<F, Fut>(&self, request: RunRequest, driver: F) -> Result<RunSummary>
    where
        F: FnOnce(CollectionRequest) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<CollectionOutcome>> + Send,
    {
        self.lock
            .run(SYNC_LOCK, self.execute_locked(request, driver))
            .await
    }

    async fn execute_locked<F, Fut>(&self, request: RunRequest, driver: F) -> Result<RunSummary>
    where
        F: FnOnce(CollectionRequest) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<CollectionOutcome>> + Send,
    {
        let config = match self.db.get_config().await {
            Ok(config) => config,
            Err(mirador_db::DbError::NotFound(_)) => {
                return Err(SyncError::configuration(
                    "sync config not initialized (missing org identifier)",
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if config.org_id.trim().is_empty() {
            return Err(SyncError::configuration("missing org identifier"));
        }

        let started = Utc::now();
        self.db.record_sync_started(started).await?;
        let run_id = self
            .db
            .create_run(
                request.run_type,
                request.strategy,
                request.since,
                request.until,
                started,
            )
            .await?;

        info!(
            run_id,
            run_type = %request.run_type,
            strategy = %request.strategy,
            "Starting sync run"
        );
        self.events.publish(SyncEvent::RunStarted {
            run_id,
            run_type: request.run_type,
            strategy: request.strategy,
            since: request.since,
            until: request.until,
        });
        self.events.publish(SyncEvent::RunStatus {
            run_id,
            status: RunStatus::Running,
        });

        let since_by_resource = self.resolve_since_map(&request).await?;

        // Collection, logged as its own step.
        let collect_step = self.db.start_step(run_id, "collect", Utc::now()).await?;
        self.events.publish(SyncEvent::StepStarted {
            log_id: collect_step,
            run_id,
            resource: "collect".to_string(),
            status: RunStatus::Running,
        });

        let collection = driver(CollectionRequest {
            org_id: config.org_id.clone(),
            run_id,
            since_by_resource,
            until: request.until,
        })
        .await;

        let outcome = match collection {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(run_id, "Collection failed: {}", message);
                self.fail_step(collect_step, run_id, "collect", &message).await?;
                self.fail_run(run_id, &message).await?;
                return Err(SyncError::Collection(e));
            }
        };

        let collected_at = Utc::now();
        self.db
            .finish_step(collect_step, RunStatus::Success, None, collected_at)
            .await?;
        self.events.publish(SyncEvent::StepUpdated {
            log_id: collect_step,
            run_id,
            resource: "collect".to_string(),
            status: RunStatus::Success,
            message: None,
        });

        // Commit collection results: cursors (incremental only) and the
        // freshness marker, both monotone.
        if request.strategy == SyncStrategy::Incremental {
            for (resource, report) in &outcome.by_resource {
                self.db
                    .advance_cursor(resource, report.cursor.as_deref(), report.latest_item_at)
                    .await?;
            }
        }

        let latest_item_at = outcome.latest_item_at();
        // With zero collected items there is no data-derived timestamp; fall
        // back to completion time so an empty sync still advances the marker.
        let marker = latest_item_at.unwrap_or(collected_at);
        let effective_marker = self.db.advance_last_successful_sync(marker).await?;

        self.db.mark_run_success(run_id, collected_at).await?;
        self.events.publish(SyncEvent::RunStatus {
            run_id,
            status: RunStatus::Success,
        });

        // Post-processing: strictly sequential, each step depends on state
        // the previous one committed. A failure here flips the run to failed
        // even though collection already committed.
        let ctx = StepContext {
            db: self.db.clone(),
            run_id,
            since: request.since,
            until: request.until,
        };
        for step in &self.pipeline {
            let log_id = self.db.start_step(run_id, step.name(), Utc::now()).await?;
            self.events.publish(SyncEvent::StepStarted {
                log_id,
                run_id,
                resource: step.name().to_string(),
                status: RunStatus::Running,
            });

            match step.run(&ctx).await {
                Ok(()) => {
                    self.db
                        .finish_step(log_id, RunStatus::Success, None, Utc::now())
                        .await?;
                    self.events.publish(SyncEvent::StepUpdated {
                        log_id,
                        run_id,
                        resource: step.name().to_string(),
                        status: RunStatus::Success,
                        message: None,
                    });
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(run_id, step = step.name(), "Post-processing failed: {}", message);
                    self.fail_step(log_id, run_id, step.name(), &message).await?;
                    let run_message =
                        format!("post-processing step '{}' failed: {}", step.name(), message);
                    self.fail_run(run_id, &run_message).await?;
                    return Err(SyncError::PostProcessing {
                        step: step.name().to_string(),
                        source: e,
                    });
                }
            }
        }

        let completed_at = Utc::now();
        self.db.record_sync_completed(completed_at).await?;

        let summary = RunSummary {
            run_id,
            counts_by_resource: outcome.counts_by_resource(),
            entities_processed: outcome.entities_processed,
            latest_item_at,
            last_successful_sync_at: Some(effective_marker),
        };
        info!(
            run_id,
            entities = summary.entities_processed,
            "Sync run completed"
        );
        self.events.publish(SyncEvent::RunCompleted {
            run_id,
            summary: summary.clone(),
        });

        Ok(summary)
    }

    /// Per-resource lower bounds: a backfill applies its explicit bound
    /// uniformly; an incremental run takes max(global override, resource
    /// cursor) so each resource resumes from its own position instead of
    /// being capped by the requested bound.
    async fn resolve_since_map(
        &self,
        request: &RunRequest,
    ) -> Result<BTreeMap<String, Option<DateTime<Utc>>>> {
        let mut map = BTreeMap::new();
        for resource in self.collector.resources() {
            let since = match request.strategy {
                SyncStrategy::Backfill => request.since,
                SyncStrategy::Incremental => {
                    let cursor_ts = self
                        .db
                        .get_cursor(&resource)
                        .await?
                        .and_then(|c| c.last_item_timestamp);
                    match (request.since, cursor_ts) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    }
                }
            };
            map.insert(resource, since);
        }
        Ok(map)
    }

    async fn fail_step(
        &self,
        log_id: i64,
        run_id: i64,
        resource: &str,
        message: &str,
    ) -> Result<()> {
        self.db
            .finish_step(log_id, RunStatus::Failed, Some(message), Utc::now())
            .await?;
        self.events.publish(SyncEvent::StepUpdated {
            log_id,
            run_id,
            resource: resource.to_string(),
            status: RunStatus::Failed,
            message: Some(message.to_string()),
        });
        Ok(())
    }

    async fn fail_run(&self, run_id: i64, message: &str) -> Result<()> {
        let now = Utc::now();
        self.db.mark_run_failed(run_id, message, now).await?;
        self.db.record_sync_completed(now).await?;
        self.events.publish(SyncEvent::RunStatus {
            run_id,
            status: RunStatus::Failed,
        });
        self.events.publish(SyncEvent::RunFailed {
            run_id,
            error: message.to_string(),
        });
        Ok(())
    }
}
