//! Sync control plane for Mirador.
//!
//! Keeps the local mirror of the upstream record system consistent:
//!
//! - [`RunCoordinator`] - one end-to-end run (lock, run record, bounds,
//!   collection, post-processing pipeline)
//! - [`SyncScheduler`] - timer-driven automatic runs with catch-up phase
//! - [`BackfillChunker`] - single-range and day-windowed historical backfill
//! - [`cleanup_stuck_runs`] - crash recovery for rows left `running`
//! - [`EventBus`] - ordered notifications for every state transition
//!
//! The upstream fetch client is the [`Collector`] trait; the Insight Engine
//! consumes the cache layer (`mirador_cache`) and never writes here.

pub mod backfill;
pub mod collector;
pub mod coordinator;
mod error;
pub mod events;
pub mod lock;
pub mod pipeline;
pub mod recovery;
pub mod scheduler;

pub use backfill::{BackfillChunker, BackfillRange, ChunkOutcome, DayWindows};
pub use collector::{
    CollectionOutcome, CollectionRequest, Collector, LogProgress, ProgressSink, ResourceReport,
};
pub use coordinator::{RunCoordinator, RunRequest};
pub use error::{Result, SyncError};
pub use events::{EventBus, RunSummary, SyncEvent};
pub use lock::ExecutionLock;
pub use pipeline::{CacheRefreshStep, PostProcessStep, StepContext};
pub use recovery::{cleanup_stuck_runs, RecoveryReport};
pub use scheduler::SyncScheduler;
