//! Timer-driven scheduler for automatic incremental runs.
//!
//! An explicit handle object owning one background task; commanded over an
//! mpsc channel. The phase self-heals across restarts: the first arming after
//! enable (or startup) subtracts the time already elapsed since the last
//! completed sync, so a restart does not reset the cadence.

use crate::collector::Collector;
use crate::coordinator::{RunCoordinator, RunRequest};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use mirador_db::{MiradorDb, RunType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
enum Command {
    Enable { interval_minutes: i64 },
    Disable,
    Shutdown,
}

/// Delay before the next automatic run.
///
/// Catch-up semantics: with no prior completion, fire immediately; otherwise
/// whatever remains of one interval since the last completion (never
/// negative).
pub fn initial_delay(
    interval: Duration,
    last_sync_completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Duration {
    match last_sync_completed_at {
        None => Duration::ZERO,
        Some(completed) => {
            let elapsed = (now - completed).to_std().unwrap_or(Duration::ZERO);
            interval.saturating_sub(elapsed)
        }
    }
}

/// Handle to the process-wide scheduler task.
pub struct SyncScheduler {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the scheduler task. It resumes whatever schedule the persisted
    /// config says is active.
    pub fn start<C>(coordinator: Arc<RunCoordinator<C>>) -> Self
    where
        C: Collector + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_loop(coordinator, rx));
        Self { tx, handle }
    }

    /// Enable auto-sync at the given cadence. Persisted, then applied; an
    /// interval change while a timer is pending applies at the next
    /// reschedule only.
    pub async fn enable(&self, db: &MiradorDb, interval_minutes: i64) -> Result<()> {
        if interval_minutes < 1 {
            return Err(SyncError::configuration(format!(
                "invalid interval: {interval_minutes} minutes (must be at least 1)"
            )));
        }
        db.set_schedule(true, interval_minutes)
            .await
            .map_err(uninitialized_to_configuration)?;
        self.send(Command::Enable { interval_minutes }).await
    }

    /// Disable auto-sync: clears any pending timer. An in-flight run finishes
    /// but will not self-reschedule.
    pub async fn disable(&self, db: &MiradorDb) -> Result<()> {
        let interval = db
            .get_config()
            .await
            .map_err(uninitialized_to_configuration)?
            .interval_minutes;
        db.set_schedule(false, interval)
            .await
            .map_err(uninitialized_to_configuration)?;
        self.send(Command::Disable).await
    }

    /// Stop the scheduler task entirely.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown).await;
        let _ = self.handle.await;
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::configuration("scheduler task is not running"))
    }
}

/// A missing config singleton is a configuration problem of the mirror, not
/// a plain lookup miss.
fn uninitialized_to_configuration(e: mirador_db::DbError) -> SyncError {
    match e {
        mirador_db::DbError::NotFound(_) => {
            SyncError::configuration("sync config not initialized (missing org identifier)")
        }
        e => e.into(),
    }
}

async fn run_loop<C: Collector>(
    coordinator: Arc<RunCoordinator<C>>,
    mut rx: mpsc::Receiver<Command>,
) {
    let db = coordinator.db().clone();

    let (mut enabled, mut interval_minutes) = match db.get_config().await {
        Ok(config) => (config.auto_sync_enabled, config.interval_minutes),
        Err(_) => (false, 60),
    };

    loop {
        if !enabled {
            match rx.recv().await {
                Some(Command::Enable { interval_minutes: m }) => {
                    enabled = true;
                    interval_minutes = m;
                }
                Some(Command::Disable) => {}
                Some(Command::Shutdown) | None => return,
            }
            continue;
        }

        let interval = Duration::from_secs(interval_minutes.max(1) as u64 * 60);
        let last_completed = db
            .get_config()
            .await
            .ok()
            .and_then(|c| c.last_sync_completed_at);
        let mut delay = initial_delay(interval, last_completed, Utc::now());
        debug!(?delay, "Scheduler armed");

        'armed: loop {
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(Command::Disable) => {
                            enabled = false;
                            break 'armed;
                        }
                        Some(Command::Enable { interval_minutes: m }) => {
                            // Takes effect on the next reschedule only.
                            interval_minutes = m;
                        }
                        Some(Command::Shutdown) | None => return,
                    },
                    () = &mut sleep => break,
                }
            }

            debug!("Scheduler timer fired");
            if let Err(e) = coordinator
                .execute(RunRequest::incremental(RunType::Automatic))
                .await
            {
                // No backoff and no suspension: the next attempt is simply
                // one interval away.
                warn!("Scheduled sync failed: {}", e);
            }

            if let Ok(config) = db.get_config().await {
                interval_minutes = config.interval_minutes;
            }
            delay = Duration::from_secs(interval_minutes.max(1) as u64 * 60);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_cold_start_fires_immediately() {
        assert_eq!(initial_delay(HOUR, None, Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_warm_restart_keeps_phase() {
        let now = Utc::now();
        let completed = now - ChronoDuration::minutes(40);
        // 60-minute interval, 40 minutes already elapsed: 20 minutes remain.
        assert_eq!(
            initial_delay(HOUR, Some(completed), now),
            Duration::from_secs(20 * 60)
        );
    }

    #[test]
    fn test_overdue_schedule_fires_immediately() {
        let now = Utc::now();
        let completed = now - ChronoDuration::hours(5);
        assert_eq!(initial_delay(HOUR, Some(completed), now), Duration::ZERO);
    }

    #[test]
    fn test_future_completion_clamps_to_full_interval() {
        // Clock skew: a completion "in the future" must not underflow.
        let now = Utc::now();
        let completed = now + ChronoDuration::minutes(10);
        assert_eq!(initial_delay(HOUR, Some(completed), now), HOUR);
    }
}
