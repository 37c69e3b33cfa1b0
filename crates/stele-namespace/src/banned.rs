//! The write-block index.
//!
//! A lighter trie, parallel to the namespace, holding only a status per
//! node. The ingestion hot path consults it before touching the tree, so
//! "is this name banned" costs O(depth) regardless of namespace size.
//!
//! Unlike the tree, statuses here are stored directly (no transition
//! graph): the index always mirrors the latest truth reported by the
//! authoritative store. Nodes that return to `SIMPLE` with no children are
//! unlinked from their parent, so memory stays bounded to the currently
//! interesting names.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;

use stele_core::name::{is_dir, split_levels, LEVEL_SEPARATOR};
use stele_core::status::{AtomicStatus, MetricStatus};

#[derive(Debug)]
struct BannedNode {
    parent: Weak<BannedNode>,
    name: Box<str>,
    directory: bool,
    status: AtomicStatus,
    dirs: OnceLock<DashMap<Box<str>, Arc<BannedNode>>>,
    metrics: OnceLock<DashMap<Box<str>, Arc<BannedNode>>>,
}

impl BannedNode {
    fn new(parent: Weak<BannedNode>, name: &str, directory: bool, status: MetricStatus) -> Self {
        Self {
            parent,
            name: name.into(),
            directory,
            status: AtomicStatus::new(status),
            dirs: OnceLock::new(),
            metrics: OnceLock::new(),
        }
    }

    fn is_root(&self) -> bool {
        self.parent.upgrade().is_none()
    }

    fn map(&self, directory: bool) -> Option<&DashMap<Box<str>, Arc<BannedNode>>> {
        if directory {
            self.dirs.get()
        } else {
            self.metrics.get()
        }
    }

    fn map_or_init(&self, directory: bool) -> &DashMap<Box<str>, Arc<BannedNode>> {
        if directory {
            self.dirs.get_or_init(DashMap::new)
        } else {
            self.metrics.get_or_init(DashMap::new)
        }
    }

    fn child(&self, segment: &str, directory: bool) -> Option<Arc<BannedNode>> {
        self.map(directory)
            .and_then(|m| m.get(segment).map(|r| Arc::clone(r.value())))
    }

    fn get_or_create_child(
        self_arc: &Arc<BannedNode>,
        segment: &str,
        directory: bool,
        status: MetricStatus,
    ) -> Arc<BannedNode> {
        let map = self_arc.map_or_init(directory);
        if let Some(existing) = map.get(segment) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            map.entry(segment.into())
                .or_insert_with(|| {
                    Arc::new(BannedNode::new(
                        Arc::downgrade(self_arc),
                        segment,
                        directory,
                        status,
                    ))
                })
                .value(),
        )
    }

    fn children_empty(&self) -> bool {
        self.dirs.get().is_none_or(DashMap::is_empty)
            && self.metrics.get().is_none_or(DashMap::is_empty)
    }

    fn full_name(&self) -> String {
        let mut out = String::new();
        self.write_name(&mut out);
        out
    }

    fn write_name(&self, out: &mut String) {
        if let Some(parent) = self.parent.upgrade() {
            parent.write_name(out);
            out.push_str(&self.name);
            if self.directory {
                out.push(LEVEL_SEPARATOR);
            }
        }
    }
}

/// Unlinks `node` from its parent if it holds no information, recursively
/// up the chain. Race-safe: the removal re-checks the condition under the
/// map entry lock, so a concurrent insert of the same path wins.
fn prune_if_idle(node: &Arc<BannedNode>) {
    if node.is_root() || node.status.load() != MetricStatus::Simple || !node.children_empty() {
        return;
    }
    let Some(parent) = node.parent.upgrade() else {
        return;
    };
    let Some(map) = parent.map(node.directory) else {
        return;
    };
    let removed = map.remove_if(&node.name, |_, child| {
        child.children_empty() && child.status.load() == MetricStatus::Simple
    });
    if let Some((_, removed)) = removed {
        tracing::debug!(name = %removed.full_name(), "pruned idle node from banned index");
        prune_if_idle(&parent);
    }
}

/// Counts reported by [`BannedIndex::state`], used for monitoring and
/// diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BannedIndexState {
    /// Total nodes currently linked.
    pub nodes: usize,
    /// Nodes with an explicit ban.
    pub banned: usize,
    /// Nodes banned automatically for fan-out.
    pub auto_banned: usize,
}

/// The write-block trie.
#[derive(Debug)]
pub struct BannedIndex {
    root: Arc<BannedNode>,
}

impl Default for BannedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BannedIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Arc::new(BannedNode::new(Weak::new(), "", true, MetricStatus::Simple)),
        }
    }

    /// Whether writes to `name` are currently blocked.
    ///
    /// True if the node itself or any ancestor is `BAN`/`AUTO_BAN`;
    /// unknown names are not blocked.
    #[must_use]
    pub fn is_banned(&self, name: &str) -> bool {
        let name_is_dir = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len().saturating_sub(1);

        let mut node = Arc::clone(&self.root);
        for (i, segment) in levels.iter().enumerate() {
            let directory = i < last_index || name_is_dir;
            let Some(child) = node.child(segment, directory) else {
                return false;
            };
            if matches!(
                child.status.load(),
                MetricStatus::Ban | MetricStatus::AutoBan
            ) {
                return true;
            }
            node = child;
        }
        false
    }

    /// Records the authoritative status of `name`, creating the path.
    ///
    /// Intermediate nodes are created `SIMPLE`; the leaf's status is set
    /// directly (last known truth, no transition graph).
    pub fn add_with_status(&self, name: &str, status: MetricStatus) {
        let name_is_dir = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len().saturating_sub(1);

        let mut node = Arc::clone(&self.root);
        for (i, segment) in levels.iter().enumerate() {
            let directory = i < last_index || name_is_dir;
            if i < last_index {
                node = BannedNode::get_or_create_child(
                    &node,
                    segment,
                    directory,
                    MetricStatus::Simple,
                );
            } else {
                let leaf =
                    BannedNode::get_or_create_child(&node, segment, directory, status);
                leaf.status.store(status);
            }
        }
    }

    /// Clears ban state for `name` after an administrative status change.
    ///
    /// The node itself resets toward `SIMPLE` unless it is auto-banned and
    /// the new status is not handmade (an automatic ban is only lifted by
    /// explicit action). A handmade status arriving on a child also lifts
    /// an automatic ban on its parent. Reset nodes are pruned.
    pub fn reset_ban_status(&self, name: &str, new_status: MetricStatus) {
        let name_is_dir = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len().saturating_sub(1);

        let mut parent = None;
        let mut node = Some(Arc::clone(&self.root));
        for (i, segment) in levels.iter().enumerate() {
            let directory = i < last_index || name_is_dir;
            let Some(current) = node else {
                return;
            };
            let child = current.child(segment, directory);
            if child.is_none() && i < last_index {
                return;
            }
            parent = Some(current);
            node = child;
        }

        if let Some(node) = &node {
            if !(node.status.load() == MetricStatus::AutoBan && !new_status.handmade()) {
                node.status.store(MetricStatus::Simple);
                prune_if_idle(node);
            }
        }
        if let Some(parent) = &parent {
            if new_status.handmade() && parent.status.load() == MetricStatus::AutoBan {
                parent.status.store(MetricStatus::Simple);
                prune_if_idle(parent);
            }
        }
    }

    /// Per-level status report for diagnostics: every known prefix of
    /// `name` with a non-`SIMPLE` status.
    #[must_use]
    pub fn trace(&self, name: &str) -> Vec<(String, MetricStatus)> {
        let name_is_dir = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len().saturating_sub(1);

        let mut report = Vec::new();
        let mut node = Arc::clone(&self.root);
        for (i, segment) in levels.iter().enumerate() {
            let directory = i < last_index || name_is_dir;
            let Some(child) = node.child(segment, directory) else {
                break;
            };
            let status = child.status.load();
            if status != MetricStatus::Simple {
                report.push((child.full_name(), status));
            }
            node = child;
        }
        report
    }

    /// Node and ban counts for monitoring.
    #[must_use]
    pub fn state(&self) -> BannedIndexState {
        let mut state = BannedIndexState::default();
        fill_state(&self.root, &mut state);
        state
    }
}

fn fill_state(node: &Arc<BannedNode>, state: &mut BannedIndexState) {
    match node.status.load() {
        MetricStatus::Ban => state.banned += 1,
        MetricStatus::AutoBan => state.auto_banned += 1,
        _ => {}
    }
    for map in [node.dirs.get(), node.metrics.get()].into_iter().flatten() {
        state.nodes += map.len();
        for child in map.iter() {
            fill_state(child.value(), state);
        }
    }
}
