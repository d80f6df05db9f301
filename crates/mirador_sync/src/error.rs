//! Error types for the sync control plane.

use thiserror::Error;

/// Sync operation result type.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by sync operations.
///
/// Every administrative operation returns one of these with a human-readable
/// message; validation failures name the violated constraint.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing org identifier, invalid interval, ... Fatal to the triggering
    /// call; never auto-retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid request (e.g. a backfill range), rejected before any run is
    /// created.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upstream collection failed; fatal to that run only.
    #[error("Collection failed: {0}")]
    Collection(#[source] anyhow::Error),

    /// A post-processing step failed after collection already committed;
    /// escalates to run-level failure without rolling collection back.
    #[error("Post-processing step '{step}' failed: {source}")]
    PostProcessing {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// Database error
    #[error("Database error: {0}")]
    Db(#[from] mirador_db::DbError),
}

impl SyncError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
