//! Integration tests for the cache coherency layer.
//!
//! Uses in-memory SQLite with fake builders over a small mirror table:
//! refresh atomicity, freshness-driven reads, live fallback equivalence, and
//! single-flight dedupe of concurrent refreshes.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use mirador_cache::{CacheArtifact, CacheBuilder, CacheCoordinator, CachedReader};
use mirador_db::MiradorDb;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Builder materializing the rows of a test mirror table.
struct ItemsBuilder {
    builds: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl CacheBuilder for ItemsBuilder {
    fn cache_key(&self) -> &'static str {
        "items_snapshot"
    }

    async fn build(&self, db: &MiradorDb) -> anyhow::Result<CacheArtifact> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let values: Vec<String> = sqlx::query_scalar("SELECT value FROM test_items ORDER BY id")
            .fetch_all(db.pool())
            .await?;

        Ok(CacheArtifact {
            item_count: values.len() as i64,
            payload: json!(values),
            metadata: json!({}),
        })
    }
}

struct LinksBuilder;

#[async_trait]
impl CacheBuilder for LinksBuilder {
    fn cache_key(&self) -> &'static str {
        "entity_links"
    }

    async fn build(&self, _db: &MiradorDb) -> anyhow::Result<CacheArtifact> {
        Ok(CacheArtifact {
            payload: json!({}),
            item_count: 0,
            metadata: json!({}),
        })
    }
}

async fn setup_db() -> MiradorDb {
    let db = MiradorDb::open_memory().await.unwrap();
    db.ensure_config("org-test").await.unwrap();
    sqlx::query("CREATE TABLE test_items (id INTEGER PRIMARY KEY, value TEXT NOT NULL)")
        .execute(db.pool())
        .await
        .unwrap();
    db
}

async fn insert_item(db: &MiradorDb, value: &str) {
    sqlx::query("INSERT INTO test_items (value) VALUES (?)")
        .bind(value)
        .execute(db.pool())
        .await
        .unwrap();
}

fn coordinator(db: &MiradorDb, builds: Arc<AtomicUsize>, delay: Duration) -> CacheCoordinator {
    CacheCoordinator::new(
        db.clone(),
        vec![Arc::new(ItemsBuilder { builds, delay }), Arc::new(LinksBuilder)],
    )
}

#[tokio::test]
async fn test_refresh_gives_all_keys_one_generated_at() {
    let db = setup_db().await;
    insert_item(&db, "alpha").await;
    let before = Utc::now();

    let coordinator = coordinator(&db, Arc::new(AtomicUsize::new(0)), Duration::ZERO);
    let summary = coordinator.ensure(Some(3), "run", false).await.unwrap();
    assert!(summary.refreshed);
    assert!(summary.generated_at >= before);

    let states = db.list_cache_states().await.unwrap();
    assert_eq!(states.len(), 2);
    let generated: Vec<_> = states.iter().map(|s| s.generated_at.clone()).collect();
    assert_eq!(generated[0], generated[1]);
    assert!(states.iter().all(|s| s.run_id == Some(3)));
}

#[tokio::test]
async fn test_ensure_skips_refresh_when_fresh() {
    let db = setup_db().await;
    let builds = Arc::new(AtomicUsize::new(0));
    let coordinator = coordinator(&db, builds.clone(), Duration::ZERO);

    let first = coordinator.ensure(None, "first", false).await.unwrap();
    assert!(first.refreshed);

    let second = coordinator.ensure(None, "second", false).await.unwrap();
    assert!(!second.refreshed);
    assert_eq!(second.item_counts, first.item_counts);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_force_refresh_recomputes() {
    let db = setup_db().await;
    let builds = Arc::new(AtomicUsize::new(0));
    let coordinator = coordinator(&db, builds.clone(), Duration::ZERO);

    coordinator.ensure(None, "first", false).await.unwrap();
    insert_item(&db, "beta").await;

    let summary = coordinator.ensure(None, "forced", true).await.unwrap();
    assert!(summary.refreshed);
    assert_eq!(summary.item_counts["items_snapshot"], 1);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_refreshes_collapse_to_one() {
    let db = setup_db().await;
    let builds = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(coordinator(&db, builds.clone(), Duration::from_millis(100)));

    let a = coordinator.clone();
    let b = coordinator.clone();
    let (ra, rb) = tokio::join!(
        a.ensure(None, "left", true),
        b.ensure(None, "right", true)
    );

    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.generated_at, rb.generated_at);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_read_serves_live_and_repairs() {
    let db = setup_db().await;
    insert_item(&db, "alpha").await;

    let builds = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(coordinator(&db, builds.clone(), Duration::ZERO));
    coordinator.ensure(None, "seed", false).await.unwrap();

    // New data lands and the sync marker moves past the cache generation.
    insert_item(&db, "beta").await;
    db.advance_last_successful_sync(Utc::now() + ChronoDuration::seconds(1))
        .await
        .unwrap();

    let reader = CachedReader::new(db.clone(), coordinator.clone());
    let value = reader.read("items_snapshot").await.unwrap();
    // Live fallback reflects everything committed, same as a fresh refresh would.
    assert_eq!(value, json!(["alpha", "beta"]));

    // The background repair eventually lands a fresh artifact.
    let mut repaired = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = db.get_cache_state("items_snapshot").await.unwrap().unwrap();
        if state.item_count == 2 {
            repaired = true;
            break;
        }
    }
    assert!(repaired, "background refresh never repaired the cache");
}

#[tokio::test]
async fn test_corrupt_payload_downgrades_to_live() {
    let db = setup_db().await;
    insert_item(&db, "alpha").await;

    let builds = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(coordinator(&db, builds.clone(), Duration::ZERO));
    coordinator.ensure(None, "seed", false).await.unwrap();

    // Corrupt the stored payload while leaving the state row fresh.
    sqlx::query("UPDATE cache_payloads SET payload = 'not json{' WHERE cache_key = 'items_snapshot'")
        .execute(db.pool())
        .await
        .unwrap();

    let reader = CachedReader::new(db.clone(), coordinator.clone());
    let value = reader.read("items_snapshot").await.unwrap();
    assert_eq!(value, json!(["alpha"]));

    // Never surfaced as an error, and the repair rewrites the payload.
    let mut repaired = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let payload = db.read_cache_payload("items_snapshot").await.unwrap().unwrap();
        if serde_json::from_str::<serde_json::Value>(&payload).is_ok() {
            repaired = true;
            break;
        }
    }
    assert!(repaired, "background refresh never rewrote the corrupt payload");
}

#[tokio::test]
async fn test_concurrent_stale_reads_share_one_repair() {
    let db = setup_db().await;
    insert_item(&db, "alpha").await;

    let builds = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(coordinator(&db, builds.clone(), Duration::from_millis(100)));
    coordinator.ensure(None, "seed", false).await.unwrap();

    insert_item(&db, "beta").await;
    db.advance_last_successful_sync(Utc::now()).await.unwrap();

    // Two stale reads in flight at once: both serve live, but the repairs
    // they trigger collapse onto a single refresh execution.
    let reader = CachedReader::new(db.clone(), coordinator.clone());
    let (a, b) = tokio::join!(reader.read("items_snapshot"), reader.read("items_snapshot"));
    assert_eq!(a.unwrap(), json!(["alpha", "beta"]));
    assert_eq!(b.unwrap(), json!(["alpha", "beta"]));

    let mut repaired = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = db.get_cache_state("items_snapshot").await.unwrap().unwrap();
        if state.item_count == 2 {
            repaired = true;
            break;
        }
    }
    assert!(repaired, "background refresh never repaired the cache");

    // One seed refresh, one live computation per read, one shared repair.
    assert_eq!(builds.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_fresh_read_comes_from_cache() {
    let db = setup_db().await;
    insert_item(&db, "alpha").await;

    let builds = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(coordinator(&db, builds.clone(), Duration::ZERO));
    coordinator.ensure(None, "seed", false).await.unwrap();
    let builds_after_seed = builds.load(Ordering::SeqCst);

    let reader = CachedReader::new(db.clone(), coordinator.clone());
    let value = reader.read("items_snapshot").await.unwrap();
    assert_eq!(value, json!(["alpha"]));
    // No live computation happened on the fresh path.
    assert_eq!(builds.load(Ordering::SeqCst), builds_after_seed);
}
