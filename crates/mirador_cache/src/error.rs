//! Error types for the cache layer.

use thiserror::Error;

/// Cache operation result type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache errors.
///
/// Corruption of a stored payload is deliberately NOT represented here: the
/// reader downgrades it to a logged live-computation fallback and never
/// surfaces it to callers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Database error
    #[error("Database error: {0}")]
    Db(#[from] mirador_db::DbError),

    /// A cache builder failed to compute its artifact
    #[error("Failed to build cache '{key}': {source}")]
    Build {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A refresh (possibly joined from another caller) failed
    #[error("Cache refresh failed: {0}")]
    Refresh(String),

    /// No builder registered for the requested cache key
    #[error("Unknown cache key: {0}")]
    UnknownKey(String),
}
