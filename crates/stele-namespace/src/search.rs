//! Glob search traversal, shared by the resident tree and the lazy cache.
//!
//! The algorithm is written once against [`SearchableDir`]; the resident
//! tree implements it with full visibility semantics (invisible
//! directories prune the descent, invisible entries are filtered), while
//! the lazy cache's resident-content view implements it as a trace tool
//! that reports every cached node.

use std::sync::Arc;

use serde::Serialize;

use stele_core::name::split_levels;
use stele_core::status::MetricStatus;

use crate::glob::{contains_expressions, GlobLevel, MATCH_ALL};
use crate::node::{Dir, MetricNode};

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Full dotted name; directories keep their trailing separator.
    pub full_name: String,
    /// Whether the hit is a directory.
    pub is_dir: bool,
    /// Status at the time of the search.
    pub status: MetricStatus,
}

/// An entry that can appear in search results.
pub(crate) trait SearchEntry {
    /// The entry's own path segment.
    fn segment(&self) -> &str;
    /// Whether the entry may be emitted / descended into.
    fn emits(&self) -> bool;
    /// The entry rendered as a result.
    fn hit(&self) -> SearchHit;
}

/// A directory that can be traversed by the shared search algorithm.
pub(crate) trait SearchableDir: SearchEntry + Sized {
    type Metric: SearchEntry;

    fn child_dir(&self, segment: &str) -> Option<Arc<Self>>;
    fn child_metric(&self, segment: &str) -> Option<Arc<Self::Metric>>;
    fn child_dirs(&self) -> Vec<Arc<Self>>;
    fn child_metrics(&self) -> Vec<Arc<Self::Metric>>;
}

/// Runs a glob search from `root`, emitting matches into `visitor`.
pub(crate) fn search_in<D: SearchableDir>(
    root: &Arc<D>,
    pattern: &str,
    visitor: &mut dyn FnMut(SearchHit),
) {
    if pattern.is_empty() {
        return;
    }
    let levels = split_levels(pattern);
    search_level(root, &levels, 0, visitor);
}

fn search_level<D: SearchableDir>(
    dir: &Arc<D>,
    levels: &[&str],
    index: usize,
    visitor: &mut dyn FnMut(SearchHit),
) {
    // An invisible directory aborts the descent, not just its own entry.
    if !dir.emits() {
        return;
    }
    let level = levels[index];
    let last = index == levels.len() - 1;

    if !contains_expressions(level) {
        if last {
            if let Some(child) = dir.child_dir(level) {
                emit(&*child, visitor);
            }
            if let Some(metric) = dir.child_metric(level) {
                emit(&*metric, visitor);
            }
        } else if let Some(child) = dir.child_dir(level) {
            search_level(&child, levels, index + 1, visitor);
        }
    } else if level == MATCH_ALL {
        if last {
            for child in dir.child_dirs() {
                emit(&*child, visitor);
            }
            for metric in dir.child_metrics() {
                emit(&*metric, visitor);
            }
        } else {
            for child in dir.child_dirs() {
                search_level(&child, levels, index + 1, visitor);
            }
        }
    } else {
        let Some(matcher) = GlobLevel::compile(level) else {
            // Invalid patterns match nothing rather than failing the query.
            return;
        };
        if last {
            for child in dir.child_dirs() {
                if matcher.matches(child.segment()) {
                    emit(&*child, visitor);
                }
            }
            for metric in dir.child_metrics() {
                if matcher.matches(metric.segment()) {
                    emit(&*metric, visitor);
                }
            }
        } else {
            for child in dir.child_dirs() {
                if matcher.matches(child.segment()) {
                    search_level(&child, levels, index + 1, visitor);
                }
            }
        }
    }
}

fn emit<E: SearchEntry + ?Sized>(entry: &E, visitor: &mut dyn FnMut(SearchHit)) {
    if entry.emits() {
        visitor(entry.hit());
    }
}

// ============================================================================
// Resident tree implementation
// ============================================================================

impl SearchEntry for Dir {
    fn segment(&self) -> &str {
        Dir::segment(self)
    }

    fn emits(&self) -> bool {
        self.visible()
    }

    fn hit(&self) -> SearchHit {
        SearchHit {
            full_name: self.full_name(),
            is_dir: true,
            status: self.status(),
        }
    }
}

impl SearchEntry for MetricNode {
    fn segment(&self) -> &str {
        MetricNode::segment(self)
    }

    fn emits(&self) -> bool {
        self.visible()
    }

    fn hit(&self) -> SearchHit {
        SearchHit {
            full_name: self.full_name(),
            is_dir: false,
            status: self.status(),
        }
    }
}

impl SearchableDir for Dir {
    type Metric = MetricNode;

    fn child_dir(&self, segment: &str) -> Option<Arc<Self>> {
        self.maybe_dir(segment)
    }

    fn child_metric(&self, segment: &str) -> Option<Arc<Self::Metric>> {
        self.maybe_metric(segment)
    }

    fn child_dirs(&self) -> Vec<Arc<Self>> {
        Dir::child_dirs(self)
    }

    fn child_metrics(&self) -> Vec<Arc<Self::Metric>> {
        Dir::child_metrics(self)
    }
}
