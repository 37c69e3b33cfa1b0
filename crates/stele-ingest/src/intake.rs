//! The accept/reject boundary for inbound samples.
//!
//! The socket front end (out of scope) hands this module
//! `(raw_name, value, timestamp)` tuples already split from wire lines.
//! Rejections are silent by design: the high-volume path cannot reject
//! loudly per sample, and are only counted.

use std::sync::Arc;

use stele_core::metrics::record_rejection;
use stele_core::name::{split_levels, MetricValidator};
use stele_core::sample::Sample;
use stele_core::status::MetricStatus;

use stele_namespace::banned::BannedIndex;
use stele_namespace::lazy::LazyDirectoryCache;
use stele_namespace::tree::NamespaceTree;

/// Which namespace variant classifies inbound names, selected at
/// construction time per deployment mode.
#[derive(Debug)]
pub enum NamespaceMode {
    /// The namespace fits in memory.
    Resident(Arc<NamespaceTree>),
    /// Directory contents are loaded from storage on first touch.
    Lazy(Arc<LazyDirectoryCache>),
}

/// Validates and classifies inbound tuples into [`Sample`]s.
#[derive(Debug)]
pub struct SampleIntake {
    namespace: NamespaceMode,
    banned: Arc<BannedIndex>,
    validator: Arc<MetricValidator>,
}

impl SampleIntake {
    /// Creates an intake over the given namespace variant.
    #[must_use]
    pub fn new(
        namespace: NamespaceMode,
        banned: Arc<BannedIndex>,
        validator: Arc<MetricValidator>,
    ) -> Self {
        Self {
            namespace,
            banned,
            validator,
        }
    }

    /// Accepts or rejects one inbound tuple.
    ///
    /// Returns the sample to buffer, or `None` when the tuple is dropped
    /// (banned name, invalid name, refused creation, non-finite value,
    /// non-positive timestamp).
    pub async fn accept(
        &self,
        raw_name: &str,
        value: f64,
        timestamp_seconds: i64,
        ingest_time_seconds: u32,
    ) -> Option<Sample> {
        // Cheap rejection before touching the tree.
        if self.banned.is_banned(raw_name) {
            record_rejection("banned");
            return None;
        }

        let Some(full_name) = self.classify(raw_name).await else {
            return None;
        };

        if !value.is_finite() {
            record_rejection("value");
            return None;
        }
        let Ok(timestamp) = u32::try_from(timestamp_seconds) else {
            record_rejection("timestamp");
            return None;
        };
        if timestamp == 0 {
            record_rejection("timestamp");
            return None;
        }

        metrics::counter!(stele_core::metrics::SAMPLES_RECEIVED).increment(1);
        Some(Sample::new(
            full_name.into(),
            value,
            timestamp,
            ingest_time_seconds,
        ))
    }

    /// Resolves a raw name to its canonical full name via the namespace,
    /// creating nodes as needed.
    async fn classify(&self, raw_name: &str) -> Option<String> {
        match &self.namespace {
            NamespaceMode::Resident(tree) => {
                let levels = split_levels(raw_name);
                // Fast path: a known, non-hidden metric skips validation.
                if let Some(found) = tree.maybe_find_metric(&levels) {
                    if !matches!(
                        found.status(),
                        MetricStatus::Hidden | MetricStatus::AutoHidden
                    ) {
                        if found.status() == MetricStatus::Ban {
                            record_rejection("banned");
                            return None;
                        }
                        return Some(found.full_name());
                    }
                    // Hidden: fall through to re-add, which reopens it.
                } else if !self.validator.validate(raw_name, false) {
                    record_rejection("invalid_name");
                    return None;
                }
                match tree.add(raw_name) {
                    Some(node) => {
                        if node.status() == MetricStatus::Ban {
                            record_rejection("banned");
                            return None;
                        }
                        Some(node.full_name())
                    }
                    None => {
                        record_rejection("refused");
                        None
                    }
                }
            }
            NamespaceMode::Lazy(cache) => {
                if !self.validator.validate(raw_name, false) {
                    record_rejection("invalid_name");
                    return None;
                }
                match cache.get_or_create(raw_name).await {
                    Ok(Some(node)) => {
                        if matches!(node.status(), MetricStatus::Ban | MetricStatus::AutoBan) {
                            record_rejection("banned");
                            return None;
                        }
                        Some(node.full_name())
                    }
                    Ok(None) => {
                        record_rejection("refused");
                        None
                    }
                    Err(e) => {
                        // The directory stays non-resident; the next sample
                        // for it retries the load.
                        tracing::debug!(name = %raw_name, error = %e, "classification deferred");
                        record_rejection("load_failed");
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident_intake() -> (SampleIntake, Arc<NamespaceTree>, Arc<BannedIndex>) {
        let tree = Arc::new(NamespaceTree::new());
        let banned = Arc::new(BannedIndex::new());
        let intake = SampleIntake::new(
            NamespaceMode::Resident(Arc::clone(&tree)),
            Arc::clone(&banned),
            Arc::new(MetricValidator::default()),
        );
        (intake, tree, banned)
    }

    #[tokio::test]
    async fn test_accepts_valid_sample_and_creates_metric() {
        let (intake, tree, _) = resident_intake();
        let sample = intake
            .accept("five_sec.int_8742.x1", 1.5, 1_700_000_000, 1_700_000_001)
            .await
            .expect("accepted");
        assert_eq!(&*sample.metric, "five_sec.int_8742.x1");
        assert_eq!(tree.metric_count(), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_and_unparseable_tuples() {
        let (intake, _, _) = resident_intake();
        assert!(intake.accept("bad..name", 1.0, 100, 100).await.is_none());
        assert!(intake
            .accept("five_sec.int_8742.x1", f64::NAN, 100, 100)
            .await
            .is_none());
        assert!(intake
            .accept("five_sec.int_8742.x1", 1.0, 0, 100)
            .await
            .is_none());
        assert!(intake
            .accept("five_sec.int_8742.x1", 1.0, -5, 100)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_banned_index_blocks_before_the_tree() {
        let (intake, tree, banned) = resident_intake();
        banned.add_with_status("five_sec.int_8743.", MetricStatus::Ban);

        assert!(intake
            .accept("five_sec.int_8743.x1", 1.0, 100, 100)
            .await
            .is_none());
        // The tree was never touched.
        assert_eq!(tree.metric_count(), 0);
    }

    #[tokio::test]
    async fn test_banned_tree_node_rejects_samples() {
        let (intake, tree, _) = resident_intake();
        let _ = tree.add("five_sec.int_8742.x1");
        let _ = tree.modify("five_sec.int_8742.x1", MetricStatus::Ban)
            .expect("ban");

        assert!(intake
            .accept("five_sec.int_8742.x1", 1.0, 100, 100)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_hidden_metric_reopens_on_new_sample() {
        let (intake, tree, _) = resident_intake();
        let _ = tree.add("five_sec.int_8742.x1");
        let _ = tree.modify("five_sec.int_8742.x1", MetricStatus::Hidden)
            .expect("hide");

        let sample = intake
            .accept("five_sec.int_8742.x1", 2.0, 200, 200)
            .await
            .expect("accepted");
        assert_eq!(&*sample.metric, "five_sec.int_8742.x1");
        let node = tree
            .maybe_find_metric(&["five_sec", "int_8742", "x1"])
            .expect("resident");
        assert_eq!(node.status(), MetricStatus::Simple);
    }
}
