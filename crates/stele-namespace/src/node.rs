//! Resident trie nodes.
//!
//! A directory owns its children; children hold non-owning back-references
//! to their parent (the parent is always reachable through the root while
//! the tree is alive). Child maps are allocated on first insert; lookups
//! are lock-free map reads.
//!
//! Visibility bookkeeping: each directory maintains a count of visible
//! direct children so "has visible children" is O(1). The counter is
//! adjusted on child creation and on every visibility flip, and the
//! directory's own automatic status is recomputed through the status
//! transition graph, recursing upward only when its own visibility flips.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use stele_core::name::LEVEL_SEPARATOR;
use stele_core::status::{AtomicStatus, MetricStatus};

/// A directory node.
#[derive(Debug)]
pub struct Dir {
    parent: Weak<Dir>,
    name: Box<str>,
    status: AtomicStatus,
    updated_ms: AtomicI64,
    visible_children: AtomicI64,
    dirs: OnceLock<DashMap<Box<str>, Arc<Dir>>>,
    metrics: OnceLock<DashMap<Box<str>, Arc<MetricNode>>>,
}

/// A metric leaf.
#[derive(Debug)]
pub struct MetricNode {
    parent: Weak<Dir>,
    name: Box<str>,
    status: AtomicStatus,
    updated_ms: AtomicI64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Dir {
    pub(crate) fn root() -> Arc<Self> {
        Arc::new(Self::new(Weak::new(), ""))
    }

    fn new(parent: Weak<Dir>, name: &str) -> Self {
        Self {
            parent,
            name: name.into(),
            status: AtomicStatus::new(MetricStatus::Simple),
            updated_ms: AtomicI64::new(now_ms()),
            visible_children: AtomicI64::new(0),
            dirs: OnceLock::new(),
            metrics: OnceLock::new(),
        }
    }

    /// The node's own path segment.
    #[must_use]
    pub fn segment(&self) -> &str {
        &self.name
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> MetricStatus {
        self.status.load()
    }

    /// Whether this node appears in search results.
    #[must_use]
    pub fn visible(&self) -> bool {
        self.status().visible()
    }

    /// When the status last changed, epoch milliseconds.
    #[must_use]
    pub fn updated_ms(&self) -> i64 {
        self.updated_ms.load(Ordering::Acquire)
    }

    /// The parent directory, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Dir>> {
        self.parent.upgrade()
    }

    /// Whether this is the synthetic root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        // The root is the only node constructed without a parent, and
        // parents outlive their children while the tree is alive.
        self.parent.upgrade().is_none()
    }

    /// Full dotted name, with the trailing separator of a directory.
    /// The root is `""`.
    #[must_use]
    pub fn full_name(&self) -> String {
        let mut out = String::new();
        self.write_name(&mut out);
        out
    }

    fn write_name(&self, out: &mut String) {
        if let Some(parent) = self.parent.upgrade() {
            parent.write_name(out);
            out.push_str(&self.name);
            out.push(LEVEL_SEPARATOR);
        }
    }

    fn dirs_map(&self) -> &DashMap<Box<str>, Arc<Dir>> {
        self.dirs.get_or_init(DashMap::new)
    }

    fn metrics_map(&self) -> &DashMap<Box<str>, Arc<MetricNode>> {
        self.metrics.get_or_init(DashMap::new)
    }

    /// Child directory lookup without allocating the map.
    #[must_use]
    pub fn maybe_dir(&self, segment: &str) -> Option<Arc<Dir>> {
        self.dirs.get().and_then(|m| m.get(segment).map(|r| Arc::clone(r.value())))
    }

    /// Child metric lookup without allocating the map.
    #[must_use]
    pub fn maybe_metric(&self, segment: &str) -> Option<Arc<MetricNode>> {
        self.metrics.get().and_then(|m| m.get(segment).map(|r| Arc::clone(r.value())))
    }

    /// Snapshot of child directories.
    #[must_use]
    pub fn child_dirs(&self) -> Vec<Arc<Dir>> {
        self.dirs
            .get()
            .map(|m| m.iter().map(|r| Arc::clone(r.value())).collect())
            .unwrap_or_default()
    }

    /// Snapshot of child metrics.
    #[must_use]
    pub fn child_metrics(&self) -> Vec<Arc<MetricNode>> {
        self.metrics
            .get()
            .map(|m| m.iter().map(|r| Arc::clone(r.value())).collect())
            .unwrap_or_default()
    }

    /// Metrics in this subtree.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        let own = self.metrics.get().map_or(0, DashMap::len);
        own + self
            .child_dirs()
            .iter()
            .map(|d| d.metric_count())
            .sum::<usize>()
    }

    /// Directories in this subtree, excluding this node.
    #[must_use]
    pub fn dir_count(&self) -> usize {
        let own = self.dirs.get().map_or(0, DashMap::len);
        own + self.child_dirs().iter().map(|d| d.dir_count()).sum::<usize>()
    }

    fn touch(&self) {
        self.updated_ms.store(now_ms(), Ordering::Release);
    }
}

impl MetricNode {
    fn new(parent: Weak<Dir>, name: &str) -> Self {
        Self {
            parent,
            name: name.into(),
            status: AtomicStatus::new(MetricStatus::Simple),
            updated_ms: AtomicI64::new(now_ms()),
        }
    }

    /// The node's own path segment.
    #[must_use]
    pub fn segment(&self) -> &str {
        &self.name
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> MetricStatus {
        self.status.load()
    }

    /// Whether this node appears in search results.
    #[must_use]
    pub fn visible(&self) -> bool {
        self.status().visible()
    }

    /// When the status last changed, epoch milliseconds.
    #[must_use]
    pub fn updated_ms(&self) -> i64 {
        self.updated_ms.load(Ordering::Acquire)
    }

    /// The parent directory.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Dir>> {
        self.parent.upgrade()
    }

    /// Full dotted name.
    #[must_use]
    pub fn full_name(&self) -> String {
        let mut out = String::new();
        if let Some(parent) = self.parent.upgrade() {
            parent.write_name(&mut out);
        }
        out.push_str(&self.name);
        out
    }

    fn touch(&self) {
        self.updated_ms.store(now_ms(), Ordering::Release);
    }
}

/// Race-safe get-or-create of a child directory; exactly one instance
/// survives concurrent creation of the same segment.
pub(crate) fn get_or_create_dir(parent: &Arc<Dir>, segment: &str) -> Arc<Dir> {
    if let Some(existing) = parent.maybe_dir(segment) {
        return existing;
    }
    let (dir, created) = match parent.dirs_map().entry(segment.into()) {
        Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
        Entry::Vacant(entry) => {
            let dir = Arc::new(Dir::new(Arc::downgrade(parent), segment));
            entry.insert(Arc::clone(&dir));
            (dir, true)
        }
    };
    if created {
        // New children start visible (SIMPLE).
        child_visibility_flipped(parent, true);
    }
    dir
}

/// Race-safe get-or-create of a child metric.
pub(crate) fn get_or_create_metric(parent: &Arc<Dir>, segment: &str) -> Arc<MetricNode> {
    if let Some(existing) = parent.maybe_metric(segment) {
        return existing;
    }
    let (metric, created) = match parent.metrics_map().entry(segment.into()) {
        Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
        Entry::Vacant(entry) => {
            let metric = Arc::new(MetricNode::new(Arc::downgrade(parent), segment));
            entry.insert(Arc::clone(&metric));
            (metric, true)
        }
    };
    if created {
        child_visibility_flipped(parent, true);
    }
    metric
}

/// Applies `proposed` to a metric through the transition graph and
/// propagates a visibility flip to the parent chain.
pub(crate) fn apply_metric_status(metric: &Arc<MetricNode>, proposed: MetricStatus) -> MetricStatus {
    let (old, new) = metric.status.apply(proposed);
    if old != new {
        metric.touch();
        if old.visible() != new.visible() {
            if let Some(parent) = metric.parent.upgrade() {
                child_visibility_flipped(&parent, new.visible());
            }
        }
    }
    new
}

/// Applies `proposed` to a directory through the transition graph and
/// propagates a visibility flip to the parent chain.
pub(crate) fn apply_dir_status(dir: &Arc<Dir>, proposed: MetricStatus) -> MetricStatus {
    let (old, new) = dir.status.apply(proposed);
    if old != new {
        dir.touch();
        if old.visible() != new.visible() {
            if let Some(parent) = dir.parent.upgrade() {
                child_visibility_flipped(&parent, new.visible());
            }
        }
    }
    new
}

/// A direct child of `dir` was created visible or flipped visibility.
fn child_visibility_flipped(dir: &Arc<Dir>, now_visible: bool) {
    if now_visible {
        dir.visible_children.fetch_add(1, Ordering::AcqRel);
    } else {
        dir.visible_children.fetch_sub(1, Ordering::AcqRel);
    }
    refresh_auto_visibility(dir);
}

/// Recomputes the directory's automatic status from its visible-children
/// counter. A handmade status on the directory itself is never downgraded
/// (blocked by the transition graph); recursion upward happens inside
/// [`apply_dir_status`] when the directory's own visibility flips.
fn refresh_auto_visibility(dir: &Arc<Dir>) {
    if dir.is_root() {
        return;
    }
    let automatic = if dir.visible_children.load(Ordering::Acquire) > 0 {
        MetricStatus::Simple
    } else {
        MetricStatus::AutoHidden
    };
    apply_dir_status(dir, automatic);
}
