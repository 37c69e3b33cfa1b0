//! Storage backend contracts for the columnar store.
//!
//! The engine never speaks SQL; it consumes three narrow capabilities,
//! split so components receive only what they need:
//!
//! | Trait | Operations | Who gets it |
//! |-------|------------|-------------|
//! | [`DirContentReader`] | bulk directory content read | load batcher |
//! | [`SampleWriter`] | bulk sample insert | ingestion buffer |
//! | [`StatusWriter`] | namespace status upsert | namespace service |
//!
//! [`MemoryMetricStore`] implements all three for tests, with call
//! counters and scriptable failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::name::{is_dir, last_level};
use crate::sample::Sample;
use crate::status::MetricStatus;

/// One persisted namespace entry.
///
/// The store keeps one row per `(parent, name)`; the latest `updated` wins.
/// These rows reconstruct the banned index and the lazy directory cache on
/// load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Full dotted name of the parent directory (`""` for top level).
    pub parent: String,
    /// Full dotted name of the entry; directories keep their trailing `.`.
    pub name: String,
    /// Latest known status.
    pub status: MetricStatus,
    /// When the status was last written.
    pub updated: DateTime<Utc>,
}

impl MetricRow {
    /// Creates a row updated now.
    #[must_use]
    pub fn new(parent: impl Into<String>, name: impl Into<String>, status: MetricStatus) -> Self {
        Self {
            parent: parent.into(),
            name: name.into(),
            status,
            updated: Utc::now(),
        }
    }

    /// Whether this row describes a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        is_dir(&self.name)
    }

    /// The entry's own path segment.
    #[must_use]
    pub fn last_level(&self) -> &str {
        last_level(&self.name)
    }
}

/// Bulk read of directory contents.
#[async_trait]
pub trait DirContentReader: Send + Sync + 'static {
    /// Loads the children of every directory in `dirs` in one round trip.
    ///
    /// The result map contains an entry per directory the store knows
    /// about; directories absent from the map are unknown to the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on backend failure. Callers retry on
    /// their next access; the reader itself never retries.
    async fn load_dir_contents(&self, dirs: &[String])
        -> Result<HashMap<String, Vec<MetricRow>>>;
}

/// Bulk columnar sample insert.
#[async_trait]
pub trait SampleWriter: Send + Sync + 'static {
    /// Persists one batch of samples atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on backend failure; the ingestion buffer
    /// retries the same batch indefinitely.
    async fn write_samples(&self, batch: &[Sample]) -> Result<()>;
}

/// Namespace status persistence.
#[async_trait]
pub trait StatusWriter: Send + Sync + 'static {
    /// Upserts status rows for changed namespace nodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on backend failure.
    async fn write_status_changes(&self, rows: &[MetricRow]) -> Result<()>;
}

/// In-memory storage backend for testing.
///
/// Thread-safe; counts calls and can be scripted to fail the next N loads
/// or writes, which drives the retry/no-loss test suites.
#[derive(Debug, Default)]
pub struct MemoryMetricStore {
    rows: RwLock<HashMap<String, Vec<MetricRow>>>,
    samples: RwLock<Vec<Sample>>,
    status_rows: RwLock<Vec<MetricRow>>,
    load_calls: AtomicUsize,
    write_calls: AtomicUsize,
    fail_loads: AtomicUsize,
    fail_writes: AtomicUsize,
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::internal("memory store lock poisoned")
}

impl MemoryMetricStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a namespace row, creating its directory entry on demand.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test helper).
    pub fn seed_row(&self, row: MetricRow) {
        let mut rows = self.rows.write().expect("rows lock");
        rows.entry(row.parent.clone()).or_default().push(row);
    }

    /// Seeds an empty-but-known directory.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test helper).
    pub fn seed_dir(&self, dir: impl Into<String>) {
        let mut rows = self.rows.write().expect("rows lock");
        rows.entry(dir.into()).or_default();
    }

    /// Fails the next `count` directory loads.
    pub fn fail_next_loads(&self, count: usize) {
        self.fail_loads.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` sample writes.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Number of `load_dir_contents` round trips so far.
    #[must_use]
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Number of `write_samples` attempts so far (including failed ones).
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// All successfully written samples.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test helper).
    #[must_use]
    pub fn written_samples(&self) -> Vec<Sample> {
        self.samples.read().expect("samples lock").clone()
    }

    /// All persisted status rows, in write order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test helper).
    #[must_use]
    pub fn status_changes(&self) -> Vec<MetricRow> {
        self.status_rows.read().expect("status lock").clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DirContentReader for MemoryMetricStore {
    async fn load_dir_contents(
        &self,
        dirs: &[String],
    ) -> Result<HashMap<String, Vec<MetricRow>>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_loads) {
            return Err(Error::storage("injected load failure"));
        }
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(dirs
            .iter()
            .filter_map(|dir| rows.get(dir).map(|content| (dir.clone(), content.clone())))
            .collect())
    }
}

#[async_trait]
impl SampleWriter for MemoryMetricStore {
    async fn write_samples(&self, batch: &[Sample]) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_writes) {
            return Err(Error::storage("injected write failure"));
        }
        self.samples.write().map_err(poisoned)?.extend_from_slice(batch);
        Ok(())
    }
}

#[async_trait]
impl StatusWriter for MemoryMetricStore {
    async fn write_status_changes(&self, rows: &[MetricRow]) -> Result<()> {
        if Self::take_failure(&self.fail_writes) {
            return Err(Error::storage("injected status write failure"));
        }
        self.status_rows
            .write()
            .map_err(poisoned)?
            .extend_from_slice(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_returns_only_known_dirs() {
        let store = MemoryMetricStore::new();
        store.seed_row(MetricRow::new("one_min.", "one_min.x1", MetricStatus::Simple));

        let dirs = vec!["one_min.".to_string(), "missing.".to_string()];
        let loaded = store.load_dir_contents(&dirs).await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["one_min."].len(), 1);
        assert_eq!(store.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_expire() {
        let store = MemoryMetricStore::new();
        store.fail_next_writes(2);

        let batch = vec![Sample::new("a.b".into(), 1.0, 100, 100)];
        assert!(store.write_samples(&batch).await.is_err());
        assert!(store.write_samples(&batch).await.is_err());
        store.write_samples(&batch).await.expect("third attempt");
        assert_eq!(store.write_calls(), 3);
        assert_eq!(store.written_samples().len(), 1);
    }
}
