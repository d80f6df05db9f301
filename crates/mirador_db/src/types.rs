//! Unified types for all Mirador database entities.
//!
//! These types are the single source of truth. All interfaces (CLI, embedding
//! services) should use these types rather than raw rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Run Types
// ============================================================================

/// How a sync run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    /// Fired by the scheduler.
    Automatic,
    /// Triggered by an operator.
    Manual,
    /// Historical backfill.
    Backfill,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::Backfill => "backfill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            "backfill" => Some(Self::Backfill),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How collection bounds are resolved for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Resume from per-resource cursors.
    Incremental,
    /// Explicit historical range, same bound for every resource.
    Backfill,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Backfill => "backfill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incremental" => Some(Self::Incremental),
            "backfill" => Some(Self::Backfill),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status shared by runs and step logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sync run record.
///
/// Created `running`; finalized to `success` or `failed` with a completion
/// time. A post-processing failure may flip an already-successful run to
/// `failed` -- the collection-side commits stay durable either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: i64,
    pub run_type: RunType,
    pub strategy: SyncStrategy,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One pipeline step within a run. Append-only; finalized once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLog {
    pub id: i64,
    pub run_id: i64,
    pub resource: String,
    pub status: RunStatus,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Config & Cursors
// ============================================================================

/// Singleton schedule settings and high-water timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Upstream organization identifier.
    pub org_id: String,
    pub auto_sync_enabled: bool,
    pub interval_minutes: i64,
    pub last_sync_started_at: Option<DateTime<Utc>>,
    pub last_sync_completed_at: Option<DateTime<Utc>>,
    /// Max observed upstream item timestamp across successful runs. The
    /// authoritative freshness marker caches are compared against.
    pub last_successful_sync_at: Option<DateTime<Utc>>,
}

/// Per-resource incremental resumption point. Never regresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCursor {
    pub resource: String,
    pub last_cursor: Option<String>,
    pub last_item_timestamp: Option<DateTime<Utc>>,
}

// ============================================================================
// Cache State
// ============================================================================

/// Bookkeeping row for one derived cache artifact.
///
/// `generated_at` is kept as the raw stored text so the freshness oracle can
/// fail closed on values it cannot parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheState {
    pub cache_key: String,
    pub generated_at: String,
    pub run_id: Option<i64>,
    pub item_count: i64,
    /// Diagnostic only; never read back for decisions.
    pub metadata: serde_json::Value,
}

impl CacheState {
    /// Parsed generation time, if the stored text is a valid timestamp.
    pub fn generated_at_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.generated_at)
    }
}

/// One cache artifact to be written during a refresh.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub cache_key: String,
    pub payload: String,
    pub item_count: i64,
    pub metadata: serde_json::Value,
}

// ============================================================================
// Timestamp helpers
// ============================================================================

/// Serialize a timestamp for storage (rfc3339 TEXT columns).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored timestamp; `None` for anything unparseable.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_roundtrip() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 10, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(ts)), Some(ts));
        assert_eq!(parse_timestamp("not-a-timestamp"), None);
    }
}
