//! Integration tests for the lazy directory cache against a seeded store.

use std::sync::Arc;

use stele_core::config::{BatcherConfig, TreeLimits};
use stele_core::name::MetricValidator;
use stele_core::status::MetricStatus;
use stele_core::storage::{DirContentReader, MemoryMetricStore, MetricRow};
use stele_namespace::{BannedIndex, LazyDirectoryCache, LoadBatcher};

fn fast_batcher(store: &Arc<MemoryMetricStore>) -> LoadBatcher {
    let config = BatcherConfig {
        aggregation_delay_millis: 5,
        ..BatcherConfig::default()
    };
    LoadBatcher::new(Arc::clone(store) as Arc<dyn DirContentReader>, config)
}

fn cache(store: &Arc<MemoryMetricStore>, limits: TreeLimits) -> (LazyDirectoryCache, Arc<BannedIndex>) {
    let banned = Arc::new(BannedIndex::new());
    let cache = LazyDirectoryCache::new(
        fast_batcher(store),
        Arc::clone(&banned),
        Arc::new(MetricValidator::default()),
        limits,
    );
    (cache, banned)
}

fn seed_branch(store: &MemoryMetricStore) {
    store.seed_row(MetricRow::new("", "one_min.", MetricStatus::Simple));
    store.seed_row(MetricRow::new("one_min.", "one_min.app.", MetricStatus::Simple));
    store.seed_row(MetricRow::new(
        "one_min.app.",
        "one_min.app.q1",
        MetricStatus::Simple,
    ));
}

#[tokio::test]
async fn test_walk_loads_each_directory_once() {
    let store = Arc::new(MemoryMetricStore::new());
    seed_branch(&store);
    let (cache, _) = cache(&store, TreeLimits::unlimited());

    let node = cache
        .get_or_create("one_min.app.q1")
        .await
        .expect("walk")
        .expect("node");
    assert_eq!(node.full_name(), "one_min.app.q1");
    assert_eq!(store.load_calls(), 3, "one load per path level");

    // Loaded content is authoritative: no further storage hits.
    let again = cache
        .get_or_create("one_min.app.q1")
        .await
        .expect("walk")
        .expect("node");
    assert_eq!(again.full_name(), "one_min.app.q1");
    assert_eq!(store.load_calls(), 3);
}

#[tokio::test]
async fn test_new_metric_under_loaded_dir_is_queued_for_persistence() {
    let store = Arc::new(MemoryMetricStore::new());
    seed_branch(&store);
    let (cache, _) = cache(&store, TreeLimits::unlimited());

    let _ = cache.get_or_create("one_min.app.q1").await.expect("hydrate");
    let loads_before = store.load_calls();

    let fresh = cache
        .get_or_create("one_min.app.q2")
        .await
        .expect("walk")
        .expect("node");
    assert_eq!(fresh.full_name(), "one_min.app.q2");
    assert_eq!(store.load_calls(), loads_before, "creation needs no storage read");

    let flushed = cache.flush_updates(store.as_ref()).await.expect("flush");
    assert!(flushed >= 1);
    assert!(store
        .status_changes()
        .iter()
        .any(|row| row.name == "one_min.app.q2" && row.status == MetricStatus::Simple));
}

#[tokio::test]
async fn test_cardinality_limit_auto_bans_the_directory() {
    let store = Arc::new(MemoryMetricStore::new());
    store.seed_dir("");
    store.seed_dir("one_min.");
    let limits = TreeLimits {
        max_subdirs_per_dir: 0,
        max_metrics_per_dir: 2,
    };
    let (cache, banned) = cache(&store, limits);

    assert!(cache.get_or_create("one_min.m1").await.expect("m1").is_some());
    assert!(cache.get_or_create("one_min.m2").await.expect("m2").is_some());

    // Third distinct metric breaches the cap: refused, and the directory
    // is recorded auto-banned for the ingestion fast path.
    assert!(cache.get_or_create("one_min.m3").await.expect("m3").is_none());
    assert!(banned.is_banned("one_min.m3"));
    assert!(banned.is_banned("one_min.m4"));
    assert_eq!(banned.state().auto_banned, 1);

    // Existing children are unaffected.
    assert!(cache.get_or_create("one_min.m1").await.expect("m1").is_some());
}

#[tokio::test]
async fn test_failed_load_keeps_directory_non_resident() {
    let store = Arc::new(MemoryMetricStore::new());
    seed_branch(&store);
    store.fail_next_loads(1);
    let (cache, _) = cache(&store, TreeLimits::unlimited());

    cache
        .get_or_create("one_min.app.q1")
        .await
        .expect_err("load fails");
    // The directory stays non-resident, never treated as empty.
    assert!(cache.describe("one_min.").is_empty());

    // The next access retries and succeeds.
    let node = cache
        .get_or_create("one_min.app.q1")
        .await
        .expect("retry")
        .expect("node");
    assert_eq!(node.full_name(), "one_min.app.q1");
}

#[tokio::test]
async fn test_banned_rows_are_not_materialized_but_indexed() {
    let store = Arc::new(MemoryMetricStore::new());
    store.seed_row(MetricRow::new("", "one_min.", MetricStatus::Simple));
    store.seed_row(MetricRow::new("one_min.", "one_min.spam.", MetricStatus::Ban));
    store.seed_row(MetricRow::new("one_min.", "one_min.app.", MetricStatus::Simple));
    store.seed_dir("one_min.app.");
    let (cache, banned) = cache(&store, TreeLimits::unlimited());

    let _ = cache.get_or_create("one_min.app.q1").await.expect("walk");
    // The banned directory never became a cached child...
    assert!(cache
        .describe("one_min.spam.")
        .iter()
        .all(|s| s.name != "one_min.spam."));
    // ...but the write-block index learned about it.
    assert!(banned.is_banned("one_min.spam.deep.metric"));
}

#[tokio::test]
async fn test_update_metric_if_loaded_is_noop_for_non_resident_subtrees() {
    let store = Arc::new(MemoryMetricStore::new());
    seed_branch(&store);
    let (cache, _) = cache(&store, TreeLimits::unlimited());

    // Nothing resident yet: silently ignored.
    cache.update_metric_if_loaded("one_min.app.q1", MetricStatus::Ban);
    assert!(cache.describe("one_min.app.q1").is_empty());

    let _ = cache.get_or_create("one_min.app.q1").await.expect("hydrate");
    cache.update_metric_if_loaded("one_min.app.q1", MetricStatus::Ban);
    let snapshot = cache.describe("one_min.app.q1");
    assert_eq!(snapshot.last().expect("leaf").status, MetricStatus::Ban);
}

#[tokio::test]
async fn test_remove_metric_from_resident_tree() {
    let store = Arc::new(MemoryMetricStore::new());
    seed_branch(&store);
    let (cache, _) = cache(&store, TreeLimits::unlimited());

    let _ = cache.get_or_create("one_min.app.q1").await.expect("hydrate");
    assert!(!cache.describe("one_min.app.q1").is_empty());

    cache.remove_metric_from_tree("one_min.app.q1");
    let snapshot = cache.describe("one_min.app.q1");
    assert!(snapshot.iter().all(|s| s.name != "one_min.app.q1"));
}

#[tokio::test]
async fn test_search_cached_sees_resident_content_only() {
    let store = Arc::new(MemoryMetricStore::new());
    seed_branch(&store);
    store.seed_row(MetricRow::new("", "five_sec.", MetricStatus::Simple));
    store.seed_dir("five_sec.");
    let (cache, _) = cache(&store, TreeLimits::unlimited());

    let _ = cache.get_or_create("one_min.app.q1").await.expect("hydrate");
    let loads = store.load_calls();

    let mut hits = Vec::new();
    cache.search_cached("*", &mut |hit| hits.push(hit.full_name));
    hits.sort();
    assert_eq!(hits, vec!["five_sec.", "one_min."]);

    let mut deep = Vec::new();
    cache.search_cached("five_sec.*", &mut |hit| deep.push(hit.full_name));
    assert!(deep.is_empty(), "five_sec. content was never loaded");
    assert_eq!(store.load_calls(), loads, "search never triggers loads");
}
