//! Progress/event bus: every run and step transition emits a notification in
//! the order the transition occurred.
//!
//! Consumers are out of scope; with no subscriber an event is simply dropped.

use chrono::{DateTime, Utc};
use mirador_db::{RunStatus, RunType, SyncStrategy};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::trace;

/// One state transition inside the sync control plane.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    RunStarted {
        run_id: i64,
        run_type: RunType,
        strategy: SyncStrategy,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    },
    RunStatus {
        run_id: i64,
        status: RunStatus,
    },
    RunCompleted {
        run_id: i64,
        summary: RunSummary,
    },
    RunFailed {
        run_id: i64,
        error: String,
    },
    StepStarted {
        log_id: i64,
        run_id: i64,
        resource: String,
        status: RunStatus,
    },
    StepUpdated {
        log_id: i64,
        run_id: i64,
        resource: String,
        status: RunStatus,
        message: Option<String>,
    },
}

/// What one run accomplished.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: i64,
    pub counts_by_resource: BTreeMap<String, u64>,
    pub entities_processed: u64,
    pub latest_item_at: Option<DateTime<Utc>>,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
}

/// Broadcast bus for [`SyncEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; silently dropped when nobody listens.
    pub fn publish(&self, event: SyncEvent) {
        trace!(?event, "Publishing sync event");
        let _ = self.tx.send(event);
    }
}
