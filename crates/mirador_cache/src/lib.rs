//! Read-side cache coherency for Mirador.
//!
//! Derived caches (filter-option snapshots, linked-entity lookups, ...) are
//! materialized views over the sync mirror. This crate keeps them coherent
//! with `sync_config.last_successful_sync_at` and serves reads that fall back
//! to live computation instead of ever blocking on, or failing over,
//! staleness.
//!
//! - [`CacheCoordinator`] - transactional, single-flighted refresh
//! - [`freshness::is_fresh`] - pure staleness comparison
//! - [`CachedReader`] - read path with background repair
//! - [`CacheBuilder`] - the Insight Engine seam

mod builder;
mod coordinator;
mod error;
pub mod freshness;
mod reader;
mod single_flight;

pub use builder::{CacheArtifact, CacheBuilder};
pub use coordinator::{CacheCoordinator, CacheSummary};
pub use error::{CacheError, Result};
pub use reader::CachedReader;
pub use single_flight::SingleFlight;
