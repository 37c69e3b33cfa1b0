//! Concurrency tests for the namespace trie and the banned index.

use std::sync::Arc;

use stele_core::status::MetricStatus;
use stele_namespace::{BannedIndex, NamespaceTree};

/// Concurrent creations of the same name are idempotent: exactly one
/// instance survives.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_of_same_name_yield_one_node() {
    let tree = Arc::new(NamespaceTree::new());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let tree = Arc::clone(&tree);
            tokio::spawn(async move {
                for _ in 0..50 {
                    assert!(tree.add("five_sec.int_8742.x1").is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.expect("join");
    }

    assert_eq!(tree.metric_count(), 1);
    assert_eq!(tree.dir_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_of_distinct_names_all_survive() {
    let tree = Arc::new(NamespaceTree::new());

    let handles: Vec<_> = (0..8)
        .map(|task| {
            let tree = Arc::clone(&tree);
            tokio::spawn(async move {
                for i in 0..25 {
                    let name = format!("one_min.host{task}.metric{i}");
                    assert!(tree.add(&name).is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.expect("join");
    }

    assert_eq!(tree.metric_count(), 8 * 25);
    let hits = tree.search_collect("one_min.host3.*");
    assert_eq!(hits.len(), 25);
}

/// Writers racing on the same node's status never lose an update: each
/// read-modify-write goes through the transition graph atomically, so a
/// ban applied concurrently with adds always wins over SIMPLE proposals.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ban_wins_over_concurrent_adds() {
    let tree = Arc::new(NamespaceTree::new());
    tree.add("one_min.app.q1");

    let adder = {
        let tree = Arc::clone(&tree);
        tokio::spawn(async move {
            for _ in 0..200 {
                let _ = tree.add("one_min.app.q1");
            }
        })
    };
    let banner = {
        let tree = Arc::clone(&tree);
        tokio::spawn(async move {
            let _ = tree.modify("one_min.app.q1", MetricStatus::Ban)
                .expect("modify");
        })
    };
    adder.await.expect("join");
    banner.await.expect("join");

    // BAN -> SIMPLE is a restricted edge; no late add can reopen it.
    let node = tree
        .maybe_find_metric(&["one_min", "app", "q1"])
        .expect("resident");
    assert_eq!(node.status(), MetricStatus::Ban);
    assert!(tree.search_collect("one_min.app.*").is_empty());
}

/// Pruning the banned index races against inserts of the same path
/// without losing either outcome.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_banned_index_prune_races_with_inserts() {
    let index = Arc::new(BannedIndex::new());

    let inserter = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for _ in 0..200 {
                index.add_with_status("one_min.spam.x", MetricStatus::Ban);
            }
        })
    };
    let resetter = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for _ in 0..200 {
                index.reset_ban_status("one_min.spam.x", MetricStatus::Approved);
            }
        })
    };
    inserter.await.expect("join");
    resetter.await.expect("join");

    // Converge: one final reset leaves the index empty.
    index.reset_ban_status("one_min.spam.x", MetricStatus::Approved);
    assert!(!index.is_banned("one_min.spam.x"));
    assert_eq!(index.state().banned, 0);
}
