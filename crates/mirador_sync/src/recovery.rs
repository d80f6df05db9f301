//! Crash recovery: force-resolve runs and step logs left `running`.
//!
//! Invoked explicitly (startup or operator action); a crashed run stays
//! visibly `running` until this runs. Pure bookkeeping - it does not stop any
//! code that might still be executing.

use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use chrono::Utc;
use mirador_db::{MiradorDb, RunStatus};
use tracing::info;

const STUCK_MESSAGE: &str = "forcibly failed: found running during cleanup";

/// What a cleanup pass changed.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub runs_failed: Vec<i64>,
    pub steps_failed: usize,
}

/// Force every `running` run and step log to `failed`, setting missing
/// completion/finish times, and emit matching status notifications.
pub async fn cleanup_stuck_runs(db: &MiradorDb, events: &EventBus) -> Result<RecoveryReport> {
    let now = Utc::now();

    let stuck_steps = db.force_fail_running_steps(STUCK_MESSAGE, now).await?;
    for (log_id, run_id, resource) in &stuck_steps {
        events.publish(SyncEvent::StepUpdated {
            log_id: *log_id,
            run_id: *run_id,
            resource: resource.clone(),
            status: RunStatus::Failed,
            message: Some(STUCK_MESSAGE.to_string()),
        });
    }

    let stuck_runs = db.force_fail_running_runs(STUCK_MESSAGE, now).await?;
    for run_id in &stuck_runs {
        events.publish(SyncEvent::RunStatus {
            run_id: *run_id,
            status: RunStatus::Failed,
        });
        events.publish(SyncEvent::RunFailed {
            run_id: *run_id,
            error: STUCK_MESSAGE.to_string(),
        });
    }

    if !stuck_runs.is_empty() || !stuck_steps.is_empty() {
        info!(
            runs = stuck_runs.len(),
            steps = stuck_steps.len(),
            "Cleaned up stuck runs"
        );
    }

    Ok(RecoveryReport {
        runs_failed: stuck_runs,
        steps_failed: stuck_steps.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirador_db::{RunType, SyncStrategy};

    #[tokio::test]
    async fn test_cleanup_fails_stuck_rows_with_events() {
        let db = MiradorDb::open_memory().await.unwrap();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let now = Utc::now();

        let stuck = db
            .create_run(RunType::Automatic, SyncStrategy::Incremental, None, None, now)
            .await
            .unwrap();
        let step = db.start_step(stuck, "collect", now).await.unwrap();
        let done = db
            .create_run(RunType::Manual, SyncStrategy::Incremental, None, None, now)
            .await
            .unwrap();
        db.mark_run_success(done, now).await.unwrap();

        let report = cleanup_stuck_runs(&db, &events).await.unwrap();
        assert_eq!(report.runs_failed, vec![stuck]);
        assert_eq!(report.steps_failed, 1);

        let run = db.get_run(stuck).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.completed_at.is_some());
        let steps = db.steps_for_run(stuck).await.unwrap();
        assert_eq!(steps[0].id, step);
        assert_eq!(steps[0].status, RunStatus::Failed);
        assert!(steps[0].finished_at.is_some());

        // One step event, then run-status + run-failed for the stuck run.
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::StepUpdated { status: RunStatus::Failed, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::RunStatus { run_id, status: RunStatus::Failed } if run_id == stuck
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::RunFailed { run_id, .. } if run_id == stuck
        ));
    }

    #[tokio::test]
    async fn test_cleanup_with_nothing_stuck_is_a_noop() {
        let db = MiradorDb::open_memory().await.unwrap();
        let events = EventBus::default();

        let report = cleanup_stuck_runs(&db, &events).await.unwrap();
        assert!(report.runs_failed.is_empty());
        assert_eq!(report.steps_failed, 0);
    }
}
