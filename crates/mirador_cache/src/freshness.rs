//! Freshness oracle: pure comparison of a cache's generation time against the
//! last successful sync time.
//!
//! Takes the generation time as the raw stored text so anything unparseable
//! fails closed toward recomputation, never toward serving stale data.

use chrono::{DateTime, Utc};
use mirador_db::parse_timestamp;

/// Is a cache artifact generated at `generated_at` fresh relative to
/// `last_successful_sync_at`?
///
/// - no generation time: stale
/// - no sync marker: fresh (nothing to be stale relative to)
/// - otherwise fresh iff `generated_at >= last_successful_sync_at`
pub fn is_fresh(generated_at: Option<&str>, last_successful_sync_at: Option<DateTime<Utc>>) -> bool {
    let Some(raw) = generated_at else {
        return false;
    };
    let Some(generated) = parse_timestamp(raw) else {
        // Fail closed: an unreadable timestamp means recompute.
        return false;
    };

    match last_successful_sync_at {
        None => true,
        Some(last) => generated >= last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mirador_db::format_timestamp;

    #[test]
    fn test_missing_generation_time_is_stale() {
        assert!(!is_fresh(None, None));
        assert!(!is_fresh(None, Some(Utc::now())));
    }

    #[test]
    fn test_no_sync_marker_is_fresh() {
        let generated = format_timestamp(Utc::now());
        assert!(is_fresh(Some(&generated), None));
    }

    #[test]
    fn test_generated_at_compared_to_marker() {
        let last = Utc::now();
        let newer = format_timestamp(last + Duration::seconds(1));
        let equal = format_timestamp(last);
        let older = format_timestamp(last - Duration::seconds(1));

        assert!(is_fresh(Some(&newer), Some(last)));
        assert!(is_fresh(Some(&equal), Some(last)));
        assert!(!is_fresh(Some(&older), Some(last)));
    }

    #[test]
    fn test_unparseable_timestamp_fails_closed() {
        assert!(!is_fresh(Some("garbage"), None));
        assert!(!is_fresh(Some("garbage"), Some(Utc::now())));
    }
}
