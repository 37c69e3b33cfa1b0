//! On-demand directory cache for namespaces too large to hold resident.
//!
//! Directory children are loaded from storage on first touch, through the
//! [`LoadBatcher`]. Once loaded, a directory's content is authoritative
//! for this process: lookups never re-hit storage. A directory whose load
//! fails stays non-resident (never treated as empty) and the next access
//! re-requests it.
//!
//! Each directory caps its fan-out: when the child count reaches the
//! configured cardinality limit and the candidate is not handmade, the
//! directory itself is recorded `AUTO_BAN` in the [`BannedIndex`] and the
//! creation is refused. The count check and the insertion share one
//! critical section, so the cap cannot be overshot by concurrent creators.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use stele_core::config::TreeLimits;
use stele_core::error::{Error, Result};
use stele_core::metrics::record_auto_ban;
use stele_core::name::{
    is_dir, last_level, parent_name, split_levels, MetricValidator, LEVEL_SEPARATOR,
};
use stele_core::status::{AtomicStatus, MetricStatus};
use stele_core::storage::{MetricRow, StatusWriter};

use crate::banned::BannedIndex;
use crate::batcher::LoadBatcher;
use crate::search::{search_in, SearchEntry, SearchHit, SearchableDir};
use crate::updates::UpdateQueue;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Content of one cached directory.
#[derive(Debug)]
struct CachedContent {
    dirs: DashMap<Box<str>, Arc<CachedNode>>,
    metrics: DashMap<Box<str>, Arc<CachedNode>>,
    /// Guards cardinality check + insert as one atomic step.
    insert_lock: Mutex<()>,
    /// Serializes loads: at most one outstanding load per directory.
    load_slot: tokio::sync::Mutex<()>,
}

impl CachedContent {
    fn new() -> Self {
        Self {
            dirs: DashMap::new(),
            metrics: DashMap::new(),
            insert_lock: Mutex::new(()),
            load_slot: tokio::sync::Mutex::new(()),
        }
    }

    fn map(&self, directory: bool) -> &DashMap<Box<str>, Arc<CachedNode>> {
        if directory {
            &self.dirs
        } else {
            &self.metrics
        }
    }

    fn get(&self, segment: &str, directory: bool) -> Option<Arc<CachedNode>> {
        self.map(directory)
            .get(segment)
            .map(|r| Arc::clone(r.value()))
    }

    fn count(&self, directory: bool) -> usize {
        self.map(directory).len()
    }
}

/// A node in the lazily-loaded namespace: directory or metric leaf.
#[derive(Debug)]
pub struct CachedNode {
    parent: Weak<CachedNode>,
    name: Box<str>,
    directory: bool,
    status: AtomicStatus,
    updated_ms: AtomicI64,
    /// True until the node is known to be persisted.
    maybe_new: AtomicBool,
    /// True once this directory's children are known-complete.
    content_loaded: AtomicBool,
    content: CachedContent,
}

impl CachedNode {
    fn root() -> Arc<Self> {
        let root = Self::new(Weak::new(), "", true, MetricStatus::Simple);
        // The root is never "new": its children live in storage.
        root.maybe_new.store(false, Ordering::Release);
        Arc::new(root)
    }

    fn new(parent: Weak<CachedNode>, name: &str, directory: bool, status: MetricStatus) -> Self {
        Self {
            parent,
            name: name.into(),
            directory,
            status: AtomicStatus::new(status),
            updated_ms: AtomicI64::new(now_ms()),
            maybe_new: AtomicBool::new(true),
            content_loaded: AtomicBool::new(false),
            content: CachedContent::new(),
        }
    }

    /// The node's own path segment.
    #[must_use]
    pub fn segment(&self) -> &str {
        &self.name
    }

    /// Whether the node is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> MetricStatus {
        self.status.load()
    }

    /// Whether the node has not yet been confirmed persisted.
    #[must_use]
    pub fn maybe_new(&self) -> bool {
        self.maybe_new.load(Ordering::Acquire)
    }

    /// Whether the directory's children are known-complete.
    #[must_use]
    pub fn content_loaded(&self) -> bool {
        self.content_loaded.load(Ordering::Acquire)
    }

    /// When the status last changed, epoch milliseconds.
    #[must_use]
    pub fn updated_ms(&self) -> i64 {
        self.updated_ms.load(Ordering::Acquire)
    }

    /// Full dotted name; the root is `""`.
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
            if self.directory {
                out.push(LEVEL_SEPARATOR);
            }
        }
    }

    fn is_root(&self) -> bool {
        self.parent.upgrade().is_none()
    }

    fn parent_content_loaded(&self) -> bool {
        self.parent
            .upgrade()
            .is_none_or(|parent| parent.content_loaded())
    }

    fn touch(&self) {
        self.updated_ms.store(now_ms(), Ordering::Release);
    }

    /// Applies `proposed` through the transition graph. A real change
    /// marks the node as needing persistence.
    fn apply_status(&self, proposed: MetricStatus) -> MetricStatus {
        let (old, new) = self.status.apply(proposed);
        if old != new {
            self.touch();
            self.maybe_new.store(true, Ordering::Release);
        }
        new
    }

    fn to_row(&self) -> MetricRow {
        let full = self.full_name();
        let parent = parent_name(&full).to_string();
        MetricRow::new(parent, full, self.status())
    }
}

/// Diagnostic snapshot of one cached node, as returned by
/// [`LazyDirectoryCache::describe`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    /// Full dotted name.
    pub name: String,
    /// Current status.
    pub status: MetricStatus,
    /// Not yet confirmed persisted.
    pub maybe_new: bool,
    /// Children known-complete.
    pub content_loaded: bool,
}

/// The lazily-loaded namespace.
pub struct LazyDirectoryCache {
    root: Arc<CachedNode>,
    batcher: LoadBatcher,
    banned: Arc<BannedIndex>,
    validator: Arc<MetricValidator>,
    limits: TreeLimits,
    updates: Arc<UpdateQueue>,
}

impl LazyDirectoryCache {
    /// Creates a cache over the given load batcher.
    #[must_use]
    pub fn new(
        batcher: LoadBatcher,
        banned: Arc<BannedIndex>,
        validator: Arc<MetricValidator>,
        limits: TreeLimits,
    ) -> Self {
        Self {
            root: CachedNode::root(),
            batcher,
            banned,
            validator,
            limits,
            updates: Arc::new(UpdateQueue::new()),
        }
    }

    /// The pending status-update queue (new and changed nodes awaiting
    /// persistence).
    #[must_use]
    pub fn updates(&self) -> Arc<UpdateQueue> {
        Arc::clone(&self.updates)
    }

    /// Flushes pending status updates through `writer`.
    ///
    /// # Errors
    ///
    /// Returns the storage error; rows stay queued for the next flush.
    pub async fn flush_updates(&self, writer: &dyn StatusWriter) -> Result<usize> {
        self.updates.flush(writer).await
    }

    /// Walks/creates the full path for `name`, loading directory contents
    /// on demand.
    ///
    /// Returns `Ok(None)` when the creation was intentionally refused
    /// (banned ancestor or cardinality limit); the refusal may record an
    /// automatic ban as a side effect.
    ///
    /// # Errors
    ///
    /// Returns a load failure when a directory on the path could not be
    /// loaded; the caller may retry later.
    pub async fn get_or_create(&self, name: &str) -> Result<Option<Arc<CachedNode>>> {
        if name.is_empty() {
            return Ok(None);
        }
        let name_is_dir = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len() - 1;

        let mut current = Arc::clone(&self.root);
        for (i, segment) in levels.iter().enumerate() {
            if current.status() == MetricStatus::Ban {
                return Ok(None);
            }
            let directory = i < last_index || name_is_dir;
            let Some(child) = self
                .get_or_create_child(&current, segment, directory)
                .await?
            else {
                return Ok(None);
            };
            // Every touch proposes SIMPLE: reopens hidden nodes, bans stay.
            child.apply_status(MetricStatus::Simple);
            self.note_if_new(&current, &child);
            if i == last_index {
                return Ok(Some(child));
            }
            current = child;
        }
        Ok(None)
    }

    /// Gets or creates one child of `dir`, loading the directory's content
    /// first if needed.
    ///
    /// # Errors
    ///
    /// Returns a load failure when the directory's content could not be
    /// loaded.
    pub async fn get_or_create_child(
        &self,
        dir: &Arc<CachedNode>,
        segment: &str,
        directory: bool,
    ) -> Result<Option<Arc<CachedNode>>> {
        self.ensure_loaded(dir).await?;
        // A child created under loaded content cannot exist in storage, so
        // its own (empty) content is complete from birth.
        Ok(self.insert_child(dir, segment, directory, self.limits.for_kind(directory), true))
    }

    /// Makes `dir`'s content resident.
    async fn ensure_loaded(&self, dir: &Arc<CachedNode>) -> Result<()> {
        if dir.content_loaded() {
            return Ok(());
        }
        // A brand-new directory under a loaded parent cannot have content
        // in storage yet; its (empty) content is trivially complete.
        if dir.maybe_new() && dir.parent_content_loaded() {
            dir.content_loaded.store(true, Ordering::Release);
            return Ok(());
        }

        let _loading = dir.content.load_slot.lock().await;
        if dir.content_loaded() {
            return Ok(());
        }
        let full_name = dir.full_name();
        let rows = self
            .batcher
            .load(&full_name)
            .await
            .map_err(|e| Error::load_failed(format!("'{full_name}': {e}")))?;
        self.merge_rows(dir, &rows);
        dir.content_loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Merges loaded storage rows into a directory's content.
    ///
    /// Existing in-memory children win over loaded rows; banned rows are
    /// not materialized; rows beyond the cardinality limit flip the
    /// directory to `AUTO_BAN` and stop the merge.
    fn merge_rows(&self, dir: &Arc<CachedNode>, rows: &[MetricRow]) {
        let _guard = dir
            .content
            .insert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for row in rows {
            if !self.validator.validate(&row.name, true) {
                warn!(name = %row.name, "invalid metric name in storage");
                continue;
            }
            let directory = row.is_dir();
            let limit = self.limits.for_kind(directory);
            if limit > 0 && dir.content.count(directory) >= limit && !row.status.handmade() {
                self.auto_ban(dir);
                break;
            }
            if row.status == MetricStatus::Ban {
                // Banned rows are not materialized as children; the
                // write-block index keeps them off the ingestion path.
                self.banned.add_with_status(&row.name, MetricStatus::Ban);
                continue;
            }
            let segment = row.last_level();
            let child = dir
                .content
                .map(directory)
                .entry(segment.into())
                .or_insert_with(|| {
                    Arc::new(CachedNode::new(
                        Arc::downgrade(dir),
                        segment,
                        directory,
                        row.status,
                    ))
                })
                .value()
                .clone();
            child.maybe_new.store(false, Ordering::Release);
        }
    }

    /// Cardinality-checked child creation; the check and the insert share
    /// the directory's insert lock.
    fn insert_child(
        &self,
        dir: &Arc<CachedNode>,
        segment: &str,
        directory: bool,
        limit: usize,
        born_complete: bool,
    ) -> Option<Arc<CachedNode>> {
        if let Some(existing) = dir.content.get(segment, directory) {
            return Some(existing);
        }
        let guard = dir
            .content
            .insert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = dir.content.get(segment, directory) {
            return Some(existing);
        }
        if limit > 0 && dir.content.count(directory) >= limit {
            drop(guard);
            if dir.status().handmade() {
                warn!(
                    dir = %dir.full_name(),
                    segment,
                    "fan-out limit reached in handmade directory, child not created"
                );
            } else {
                self.auto_ban(dir);
            }
            return None;
        }
        let node = Arc::new(CachedNode::new(
            Arc::downgrade(dir),
            segment,
            directory,
            MetricStatus::Simple,
        ));
        if born_complete {
            node.content_loaded.store(true, Ordering::Release);
        }
        dir.content
            .map(directory)
            .insert(segment.into(), Arc::clone(&node));
        Some(node)
    }

    fn auto_ban(&self, dir: &Arc<CachedNode>) {
        let name = dir.full_name();
        warn!(dir = %name, "fan-out limit reached, auto-banning directory");
        self.banned.add_with_status(&name, MetricStatus::AutoBan);
        record_auto_ban();
    }

    /// Queues a newly confirmed node for persistence.
    fn note_if_new(&self, parent: &Arc<CachedNode>, child: &Arc<CachedNode>) {
        if parent.content_loaded() && child.maybe_new() {
            child.touch();
            self.updates.push(child.to_row());
            child.maybe_new.store(false, Ordering::Release);
        }
    }

    /// Walks the resident content only; never loads.
    fn find_resident(&self, name: &str) -> Option<Arc<CachedNode>> {
        if name.is_empty() {
            return Some(Arc::clone(&self.root));
        }
        let name_is_dir = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len() - 1;

        let mut node = Arc::clone(&self.root);
        for (i, segment) in levels.iter().enumerate() {
            let directory = i < last_index || name_is_dir;
            node = node.content.get(segment, directory)?;
        }
        Some(node)
    }

    /// Applies an authoritative status to `name` if its subtree is
    /// resident; silently a no-op otherwise (the store was updated
    /// separately).
    pub fn update_metric_if_loaded(&self, name: &str, status: MetricStatus) {
        let Some(parent) = self.find_resident(parent_name(name)) else {
            return;
        };
        let directory = is_dir(name);
        let segment = last_level(name);
        // Handmade statuses bypass the cardinality limit. The node's real
        // children may exist in storage, so it is not born complete.
        let limit = if status.handmade() {
            0
        } else {
            self.limits.for_kind(directory)
        };
        let Some(node) = self.insert_child(&parent, segment, directory, limit, false) else {
            return;
        };
        node.maybe_new.store(false, Ordering::Release);
        node.status.store(status);
        node.touch();
    }

    /// Removes `name` from the resident tree; silently a no-op against
    /// non-resident subtrees.
    pub fn remove_metric_from_tree(&self, name: &str) {
        let Some(parent) = self.find_resident(parent_name(name)) else {
            return;
        };
        let directory = is_dir(name);
        let segment = last_level(name);
        if let Some((_, node)) = parent.content.map(directory).remove(segment) {
            node.maybe_new.store(false, Ordering::Release);
        }
    }

    /// Per-level snapshot of the resident path to `name`, for diagnostics.
    #[must_use]
    pub fn describe(&self, name: &str) -> Vec<NodeSnapshot> {
        let name_is_dir = is_dir(name);
        let levels = split_levels(name);
        let last_index = levels.len().saturating_sub(1);

        let mut report = Vec::new();
        let mut node = Arc::clone(&self.root);
        for (i, segment) in levels.iter().enumerate() {
            let directory = i < last_index || name_is_dir;
            let Some(child) = node.content.get(segment, directory) else {
                break;
            };
            report.push(NodeSnapshot {
                name: child.full_name(),
                status: child.status(),
                maybe_new: child.maybe_new(),
                content_loaded: child.content_loaded(),
            });
            node = child;
        }
        report
    }

    /// Glob search over the resident content only.
    ///
    /// A trace tool: reports every cached node regardless of visibility
    /// and never triggers storage loads.
    pub fn search_cached(&self, pattern: &str, visitor: &mut dyn FnMut(SearchHit)) {
        search_in(&self.root, pattern, visitor);
    }
}

impl std::fmt::Debug for LazyDirectoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyDirectoryCache")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

// The resident-content search view: every cached node is reported,
// visibility is not consulted (this is a trace tool, not the public
// search surface).
impl SearchEntry for CachedNode {
    fn segment(&self) -> &str {
        CachedNode::segment(self)
    }

    fn emits(&self) -> bool {
        true
    }

    fn hit(&self) -> SearchHit {
        SearchHit {
            full_name: self.full_name(),
            is_dir: self.directory,
            status: self.status(),
        }
    }
}

impl SearchableDir for CachedNode {
    type Metric = CachedNode;

    fn child_dir(&self, segment: &str) -> Option<Arc<Self>> {
        self.content.get(segment, true)
    }

    fn child_metric(&self, segment: &str) -> Option<Arc<Self>> {
        self.content.get(segment, false)
    }

    fn child_dirs(&self) -> Vec<Arc<Self>> {
        self.content
            .dirs
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    fn child_metrics(&self) -> Vec<Arc<Self>> {
        self.content
            .metrics
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect()
    }
}
