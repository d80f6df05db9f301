//! Post-processing pipeline steps.
//!
//! After collection commits, the coordinator runs a fixed, strictly
//! sequential list of steps (derived-signal refresh, status automation,
//! snapshot rebuild, cache refresh, classification, ...). Steps are trait
//! objects so the Insight Engine side can contribute its own; Mirador ships
//! the cache refresh step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirador_cache::CacheCoordinator;
use mirador_db::MiradorDb;
use std::sync::Arc;

/// What a step gets to work with.
pub struct StepContext {
    pub db: MiradorDb,
    pub run_id: i64,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// One post-processing step.
///
/// Steps must tolerate re-execution over overlapping bounds: the whole run
/// may be replayed after a failure.
#[async_trait]
pub trait PostProcessStep: Send + Sync {
    /// Logged as the step-log resource name.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &StepContext) -> anyhow::Result<()>;
}

/// Built-in step: refresh the read-side caches against the just-updated
/// freshness marker. Runs after collection committed, so it forces a
/// recompute rather than trusting the freshness check.
pub struct CacheRefreshStep {
    coordinator: Arc<CacheCoordinator>,
}

impl CacheRefreshStep {
    pub fn new(coordinator: Arc<CacheCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl PostProcessStep for CacheRefreshStep {
    fn name(&self) -> &'static str {
        "cache_refresh"
    }

    async fn run(&self, ctx: &StepContext) -> anyhow::Result<()> {
        self.coordinator
            .ensure(Some(ctx.run_id), "post-sync refresh", true)
            .await?;
        Ok(())
    }
}
