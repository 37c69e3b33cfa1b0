//! The fully-resident namespace tree.
//!
//! Shared by the ingestion path and the administrative/search path with no
//! coordination beyond per-node synchronization: an administrative ban is
//! visible to ingestion on the next lookup.

use std::sync::Arc;

use stele_core::error::{Error, Result};
use stele_core::name::{is_dir, split_levels};
use stele_core::status::MetricStatus;

use crate::node::{
    apply_dir_status, apply_metric_status, get_or_create_dir, get_or_create_metric,
};
pub use crate::node::{Dir, MetricNode};
use crate::search::{search_in, SearchHit};

/// A created or modified namespace node.
#[derive(Debug, Clone)]
pub enum NodeRef {
    /// A directory.
    Dir(Arc<Dir>),
    /// A metric leaf.
    Metric(Arc<MetricNode>),
}

impl NodeRef {
    /// Current status.
    #[must_use]
    pub fn status(&self) -> MetricStatus {
        match self {
            Self::Dir(dir) => dir.status(),
            Self::Metric(metric) => metric.status(),
        }
    }

    /// Full dotted name (directories keep their trailing separator).
    #[must_use]
    pub fn full_name(&self) -> String {
        match self {
            Self::Dir(dir) => dir.full_name(),
            Self::Metric(metric) => metric.full_name(),
        }
    }

    /// Whether this node is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir(_))
    }

    /// When the status last changed, epoch milliseconds.
    #[must_use]
    pub fn updated_ms(&self) -> i64 {
        match self {
            Self::Dir(dir) => dir.updated_ms(),
            Self::Metric(metric) => metric.updated_ms(),
        }
    }

    /// The parent directory, `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Dir>> {
        match self {
            Self::Dir(dir) => dir.parent(),
            Self::Metric(metric) => metric.parent(),
        }
    }
}

/// Concurrent trie of directories and metrics.
#[derive(Debug)]
pub struct NamespaceTree {
    root: Arc<Dir>,
}

impl Default for NamespaceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self { root: Dir::root() }
    }

    /// Creates or refreshes a name with initial status `SIMPLE`.
    ///
    /// Walks/creates directory nodes level by level; returns `None` if any
    /// ancestor directory is currently banned. A name ending with the
    /// separator creates a directory leaf. Idempotent: re-adding an
    /// existing name returns the existing node with its status
    /// re-evaluated (a hidden node reopens), never a duplicate.
    #[must_use]
    pub fn add(&self, name: &str) -> Option<NodeRef> {
        self.upsert(name, MetricStatus::Simple)
    }

    /// Administrative status change for one name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] for a `SIMPLE` target (only
    /// reachable automatically) or a path without a separator.
    pub fn modify(&self, name: &str, status: MetricStatus) -> Result<Option<NodeRef>> {
        if status == MetricStatus::Simple {
            return Err(Error::precondition("cannot modify a node to SIMPLE directly"));
        }
        if split_levels(name).len() < 2 {
            return Err(Error::precondition(format!(
                "cannot modify top-level path '{name}'"
            )));
        }
        Ok(self.upsert(name, status))
    }

    fn upsert(&self, name: &str, status: MetricStatus) -> Option<NodeRef> {
        if name.is_empty() {
            return None;
        }
        let directory = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len() - 1;

        let mut dir = Arc::clone(&self.root);
        for (i, level) in levels.iter().enumerate() {
            if dir.status() == MetricStatus::Ban {
                return None;
            }
            if i < last_index {
                dir = get_or_create_dir(&dir, level);
            } else if directory {
                let child = get_or_create_dir(&dir, level);
                apply_dir_status(&child, status);
                return Some(NodeRef::Dir(child));
            } else {
                let child = get_or_create_metric(&dir, level);
                apply_metric_status(&child, status);
                return Some(NodeRef::Metric(child));
            }
        }
        None
    }

    /// Fast metric lookup for the ingestion path.
    ///
    /// Returns `None` if the metric is not present or any ancestor is
    /// banned; never creates nodes.
    #[must_use]
    pub fn maybe_find_metric(&self, levels: &[&str]) -> Option<Arc<MetricNode>> {
        let last_index = levels.len().checked_sub(1)?;
        let mut dir = Arc::clone(&self.root);
        for (i, level) in levels.iter().enumerate() {
            if i == last_index {
                return dir.maybe_metric(level);
            }
            dir = dir.maybe_dir(level)?;
            if dir.status() == MetricStatus::Ban {
                return None;
            }
        }
        None
    }

    /// Glob search; visits every visible match exactly once.
    ///
    /// A banned or hidden directory prunes the descent entirely, not just
    /// its own entry in the results.
    pub fn search(&self, pattern: &str, visitor: &mut dyn FnMut(SearchHit)) {
        search_in(&self.root, pattern, visitor);
    }

    /// Convenience wrapper collecting search hits.
    #[must_use]
    pub fn search_collect(&self, pattern: &str) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        self.search(pattern, &mut |hit| hits.push(hit));
        hits
    }

    /// Metrics currently resident in the tree.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.root.metric_count()
    }

    /// Directories currently resident in the tree.
    #[must_use]
    pub fn dir_count(&self) -> usize {
        self.root.dir_count()
    }
}
