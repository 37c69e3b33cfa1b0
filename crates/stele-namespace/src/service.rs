//! The administrative facade over the resident namespace.
//!
//! Wires the tree, the banned index and the pending-update queue together
//! and exposes the operations consumed by the HTTP/CLI surface (out of
//! scope here): glob search, bulk status modification, ban lookups and
//! node diagnostics.

use std::sync::Arc;

use tracing::{info, warn};

use stele_core::error::{Error, Result};
use stele_core::name::{parent_name, split_levels, MetricValidator};
use stele_core::status::MetricStatus;
use stele_core::storage::{MetricRow, StatusWriter};

use crate::banned::BannedIndex;
use crate::search::SearchHit;
use crate::tree::{NamespaceTree, NodeRef};
use crate::updates::UpdateQueue;

/// Search / modify / describe facade over the resident tree.
pub struct NamespaceService {
    tree: Arc<NamespaceTree>,
    banned: Arc<BannedIndex>,
    validator: Arc<MetricValidator>,
    updates: Arc<UpdateQueue>,
    status_writer: Arc<dyn StatusWriter>,
}

impl NamespaceService {
    /// Creates a service over `tree` (shared with the ingestion path).
    #[must_use]
    pub fn new(
        tree: Arc<NamespaceTree>,
        banned: Arc<BannedIndex>,
        validator: Arc<MetricValidator>,
        status_writer: Arc<dyn StatusWriter>,
    ) -> Self {
        Self {
            tree,
            banned,
            validator,
            updates: Arc::new(UpdateQueue::new()),
            status_writer,
        }
    }

    /// The underlying tree.
    #[must_use]
    pub fn tree(&self) -> &Arc<NamespaceTree> {
        &self.tree
    }

    /// Glob search; one finite pass, visible nodes only.
    #[must_use]
    pub fn search(&self, pattern: &str) -> Vec<SearchHit> {
        self.tree.search_collect(pattern)
    }

    /// Administrative bulk status change (ban / approve / hide).
    ///
    /// Returns the number of names actually applied. Invalid names are
    /// skipped with a warning; applied changes (and the ancestors whose
    /// visibility they flipped) are queued and flushed to storage, and
    /// mirrored into the banned index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] for a `SIMPLE` target or a path
    /// without a separator; these are caller bugs, not data conditions.
    pub async fn modify(&self, names: &[String], status: MetricStatus) -> Result<usize> {
        if names.is_empty() {
            return Ok(0);
        }
        if status == MetricStatus::Simple {
            return Err(Error::precondition("cannot modify nodes to SIMPLE directly"));
        }
        for name in names {
            if split_levels(name).len() < 2 {
                return Err(Error::precondition(format!(
                    "cannot modify top-level path '{name}'"
                )));
            }
        }

        let started_ms = chrono::Utc::now().timestamp_millis();
        let mut applied = 0_usize;
        let mut changed: Vec<MetricRow> = Vec::new();
        for name in names {
            if !self.validator.validate(name, true) {
                warn!(name = %name, "invalid name in modify request");
                continue;
            }
            let Some(node) = self.tree.modify(name, status)? else {
                continue;
            };
            applied += 1;
            collect_updated(started_ms, &node, &mut changed);
            self.mirror_to_banned_index(name, status);
        }

        self.updates.push_all(changed);
        if let Err(e) = self.flush_pending().await {
            // Rows stay queued; the next flush retries them.
            warn!(error = %e, "status persistence deferred");
        }

        if names.len() == 1 {
            info!(name = %names[0], status = %status, "updated metric");
        } else {
            info!(count = names.len(), applied, status = %status, "updated metrics");
        }
        Ok(applied)
    }

    /// Flushes queued status rows to storage.
    ///
    /// # Errors
    ///
    /// Returns the storage error; rows stay queued for the next flush.
    pub async fn flush_pending(&self) -> Result<usize> {
        self.updates.flush(self.status_writer.as_ref()).await
    }

    /// Whether writes to `name` are currently blocked.
    #[must_use]
    pub fn is_banned(&self, name: &str) -> bool {
        self.banned.is_banned(name)
    }

    /// Per-level ban-index state for `name`, for diagnostics.
    #[must_use]
    pub fn describe(&self, name: &str) -> Vec<(String, MetricStatus)> {
        self.banned.trace(name)
    }

    fn mirror_to_banned_index(&self, name: &str, status: MetricStatus) {
        if status == MetricStatus::Ban {
            self.banned.add_with_status(name, MetricStatus::Ban);
        } else {
            self.banned.reset_ban_status(name, status);
        }
    }
}

impl std::fmt::Debug for NamespaceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceService").finish_non_exhaustive()
    }
}

/// Collects the changed node and every ancestor whose status flipped as
/// part of the same propagation, newest first.
fn collect_updated(started_ms: i64, node: &NodeRef, out: &mut Vec<MetricRow>) {
    if node.updated_ms() >= started_ms {
        let full = node.full_name();
        let parent = parent_name(&full).to_string();
        out.push(MetricRow::new(parent, full, node.status()));
    }
    let mut current = node.parent();
    while let Some(dir) = current {
        if dir.is_root() || dir.updated_ms() < started_ms {
            break;
        }
        let full = dir.full_name();
        let parent = parent_name(&full).to_string();
        out.push(MetricRow::new(parent, full, dir.status()));
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_core::storage::MemoryMetricStore;

    fn service(store: &Arc<MemoryMetricStore>) -> NamespaceService {
        NamespaceService::new(
            Arc::new(NamespaceTree::new()),
            Arc::new(BannedIndex::new()),
            Arc::new(MetricValidator::default()),
            Arc::clone(store) as Arc<dyn StatusWriter>,
        )
    }

    fn names(hits: Vec<SearchHit>) -> Vec<String> {
        let mut names: Vec<String> = hits.into_iter().map(|h| h.full_name).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_modify_applies_and_persists() {
        let store = Arc::new(MemoryMetricStore::new());
        let service = service(&store);
        let _ = service.tree().add("five_sec.int_8743.x1");

        let applied = service
            .modify(&["five_sec.int_8743.".to_string()], MetricStatus::Ban)
            .await
            .expect("modify");
        assert_eq!(applied, 1);
        assert!(service.is_banned("five_sec.int_8743.x1"));

        let rows = store.status_changes();
        assert!(rows.iter().any(|r| r.name == "five_sec.int_8743."
            && r.status == MetricStatus::Ban));
    }

    #[tokio::test]
    async fn test_ban_approve_round_trip_restores_search() {
        let store = Arc::new(MemoryMetricStore::new());
        let service = service(&store);
        let _ = service.tree().add("five_sec.int_8743.x1");

        service
            .modify(&["five_sec.int_8743.".to_string()], MetricStatus::Ban)
            .await
            .expect("ban");
        assert!(names(service.search("five_sec.*")).is_empty());

        service
            .modify(&["five_sec.int_8743.".to_string()], MetricStatus::Approved)
            .await
            .expect("approve");
        assert!(!service.is_banned("five_sec.int_8743.x1"));
        assert_eq!(names(service.search("five_sec.*")), vec!["five_sec.int_8743."]);
        assert_eq!(
            names(service.search("five_sec.int_8743.*")),
            vec!["five_sec.int_8743.x1"]
        );
    }

    #[tokio::test]
    async fn test_modify_rejects_simple_target() {
        let store = Arc::new(MemoryMetricStore::new());
        let service = service(&store);
        let result = service
            .modify(&["a.b".to_string()], MetricStatus::Simple)
            .await;
        assert!(matches!(result, Err(Error::Precondition { .. })));
    }

    #[tokio::test]
    async fn test_modify_skips_invalid_names_but_counts_applied() {
        let store = Arc::new(MemoryMetricStore::new());
        let service = service(&store);
        let _ = service.tree().add("five_sec.int_8743.x1");

        let applied = service
            .modify(
                &[
                    "bad..name.x".to_string(),
                    "five_sec.int_8743.x1".to_string(),
                ],
                MetricStatus::Hidden,
            )
            .await
            .expect("modify");
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_failed_persistence_is_retried_on_next_flush() {
        let store = Arc::new(MemoryMetricStore::new());
        let service = service(&store);
        let _ = service.tree().add("five_sec.int_8743.x1");

        store.fail_next_writes(1);
        let applied = service
            .modify(&["five_sec.int_8743.x1".to_string()], MetricStatus::Ban)
            .await
            .expect("modify applies in-memory regardless");
        assert_eq!(applied, 1);
        assert!(store.status_changes().is_empty());

        let flushed = service.flush_pending().await.expect("retry succeeds");
        assert!(flushed >= 1);
        assert!(!store.status_changes().is_empty());
    }
}
