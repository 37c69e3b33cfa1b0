//! Coalesces concurrent directory-content loads into bounded, time-windowed
//! storage round trips.
//!
//! Many callers asking "load directory X's children" within the aggregation
//! window share one bulk query. Admission is bounded two ways: a semaphore
//! caps batches that are admitted but not yet finished, and a second
//! semaphore caps storage queries actually in flight. A caller that cannot
//! get batch admission within the timeout falls back to a direct
//! single-directory load instead of waiting indefinitely.
//!
//! A failed batch never retries itself; retry is the caller's
//! responsibility (the lazy cache re-requests on the next access).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use stele_core::config::BatcherConfig;
use stele_core::error::Error;
use stele_core::metrics::{record_dir_load, DIR_LOAD_BATCHES, DIR_LOAD_ERRORS};
use stele_core::storage::{DirContentReader, MetricRow};

/// Rows loaded for one directory, shared between waiters.
pub type DirRows = Arc<Vec<MetricRow>>;

/// Outcome of a directory load, cloneable across all waiters.
pub type LoadResult = std::result::Result<DirRows, Arc<Error>>;

type ResultSlot = watch::Sender<Option<LoadResult>>;

/// One accumulating batch of directory load requests.
#[derive(Debug)]
struct LoadBatch {
    /// Read side: still accepting registrations. Write side: executing.
    gate: tokio::sync::RwLock<()>,
    execution_started: AtomicBool,
    requests: DashMap<String, ResultSlot>,
}

impl LoadBatch {
    fn new() -> Self {
        Self {
            gate: tokio::sync::RwLock::new(()),
            execution_started: AtomicBool::new(false),
            requests: DashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.requests.len()
    }

    fn started(&self) -> bool {
        self.execution_started.load(Ordering::Acquire)
    }

    /// Registers a directory, returning a receiver for its result.
    ///
    /// Fails (returns `None`) against a batch that began executing a
    /// moment earlier; the read gate is what prevents the request from
    /// being silently dropped by that race.
    fn try_register(&self, dir: &str) -> Option<watch::Receiver<Option<LoadResult>>> {
        let _accepting = self.gate.try_read().ok()?;
        if self.started() {
            return None;
        }
        let slot = self
            .requests
            .entry(dir.to_string())
            .or_insert_with(|| watch::channel(None).0);
        Some(slot.subscribe())
    }
}

struct BatcherInner {
    store: Arc<dyn DirContentReader>,
    config: BatcherConfig,
    /// Caps storage queries in flight (batched and direct).
    request_semaphore: Semaphore,
    /// Caps batches admitted but not yet finished.
    batch_semaphore: Arc<Semaphore>,
    current: Mutex<Option<Arc<LoadBatch>>>,
}

/// The directory load coalescer.
#[derive(Clone)]
pub struct LoadBatcher {
    inner: Arc<BatcherInner>,
}

impl std::fmt::Debug for LoadBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBatcher")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl LoadBatcher {
    /// Creates a batcher over the given storage reader.
    #[must_use]
    pub fn new(store: Arc<dyn DirContentReader>, config: BatcherConfig) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                store,
                request_semaphore: Semaphore::new(config.max_parallel_requests),
                batch_semaphore: Arc::new(Semaphore::new(config.max_outstanding_batches)),
                config,
                current: Mutex::new(None),
            }),
        }
    }

    /// Loads the contents of one directory, coalescing with concurrent
    /// requests where possible.
    ///
    /// # Errors
    ///
    /// Returns the storage error that failed the underlying query, or a
    /// load failure when the store reports no data for the directory.
    pub async fn load(&self, dir: &str) -> LoadResult {
        let admission = match timeout(
            self.inner.config.admission_timeout(),
            Arc::clone(&self.inner.batch_semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // Admission stalled or the semaphore closed: load directly
            // rather than waiting indefinitely.
            _ => return self.direct_load(dir).await,
        };

        let (batch, created, mut receiver) = self.join_batch(dir);
        if created {
            // The creator's admission permit lives as long as the batch run.
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                run_batch(inner, batch, admission).await;
            });
        } else {
            // Only one admission permit per outstanding batch.
            drop(admission);
        }

        let result = match receiver.wait_for(Option::is_some).await {
            Ok(value) => match value.as_ref() {
                Some(result) => result.clone(),
                None => Err(Arc::new(Error::load_failed("empty batch result"))),
            },
            Err(_) => Err(Arc::new(Error::load_failed(format!(
                "load batch dropped before completing '{dir}'"
            )))),
        };
        result
    }

    /// Joins (or creates) the current batch and registers `dir` in it.
    fn join_batch(
        &self,
        dir: &str,
    ) -> (Arc<LoadBatch>, bool, watch::Receiver<Option<LoadResult>>) {
        loop {
            let (batch, created) = {
                let mut slot = self
                    .inner
                    .current
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match slot.as_ref() {
                    Some(batch)
                        if !batch.started()
                            && batch.len() < self.inner.config.max_batch_size =>
                    {
                        (Arc::clone(batch), false)
                    }
                    _ => {
                        let fresh = Arc::new(LoadBatch::new());
                        *slot = Some(Arc::clone(&fresh));
                        (fresh, true)
                    }
                }
            };
            if let Some(receiver) = batch.try_register(dir) {
                return (batch, created, receiver);
            }
            // The batch began executing between the slot read and the
            // registration; drop it from the slot and retry with a fresh
            // one.
            let mut slot = self
                .inner
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|b| Arc::ptr_eq(b, &batch)) {
                *slot = None;
            }
        }
    }

    /// Single-directory fallback when batch admission times out.
    async fn direct_load(&self, dir: &str) -> LoadResult {
        let Ok(_query) = self.inner.request_semaphore.acquire().await else {
            return Err(Arc::new(Error::internal("load batcher is closed")));
        };
        record_dir_load("direct", 1);
        let dirs = vec![dir.to_string()];
        match self.inner.store.load_dir_contents(&dirs).await {
            Ok(mut contents) => match contents.remove(dir) {
                Some(rows) => Ok(Arc::new(rows)),
                None => Err(Arc::new(Error::load_failed(format!(
                    "no data for directory '{dir}'"
                )))),
            },
            Err(e) => {
                metrics::counter!(DIR_LOAD_ERRORS).increment(1);
                Err(Arc::new(e))
            }
        }
    }
}

/// Executes one batch after its aggregation delay.
async fn run_batch(
    inner: Arc<BatcherInner>,
    batch: Arc<LoadBatch>,
    _admission: OwnedSemaphorePermit,
) {
    tokio::time::sleep(inner.config.aggregation_delay()).await;

    let Ok(_query) = inner.request_semaphore.acquire().await else {
        return;
    };
    // Write-lock out late registrations, then detach from the slot so new
    // requests start a fresh batch.
    let _executing = batch.gate.write().await;
    batch.execution_started.store(true, Ordering::Release);
    {
        let mut slot = inner.current.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|b| Arc::ptr_eq(b, &batch)) {
            *slot = None;
        }
    }

    let dirs: Vec<String> = batch.requests.iter().map(|e| e.key().clone()).collect();
    metrics::counter!(DIR_LOAD_BATCHES).increment(1);
    record_dir_load("batch", dirs.len() as u64);
    tracing::debug!(dirs = dirs.len(), "executing directory load batch");

    match inner.store.load_dir_contents(&dirs).await {
        Ok(mut contents) => {
            for entry in batch.requests.iter() {
                let result = match contents.remove(entry.key()) {
                    Some(rows) => Ok(Arc::new(rows)),
                    // A directory absent from the result set is a hard
                    // failure for its waiters, never silently empty.
                    None => Err(Arc::new(Error::load_failed(format!(
                        "no data for directory '{}'",
                        entry.key()
                    )))),
                };
                let _ = entry.value().send(Some(result));
            }
        }
        Err(e) => {
            metrics::counter!(DIR_LOAD_ERRORS).increment(1);
            tracing::error!(error = %e, dirs = dirs.len(), "directory load batch failed");
            let shared = Arc::new(e);
            for entry in batch.requests.iter() {
                let _ = entry.value().send(Some(Err(Arc::clone(&shared))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_core::status::MetricStatus;
    use stele_core::storage::MemoryMetricStore;

    fn batcher(store: &Arc<MemoryMetricStore>, config: BatcherConfig) -> LoadBatcher {
        LoadBatcher::new(Arc::clone(store) as Arc<dyn DirContentReader>, config)
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_round_trip() {
        let store = Arc::new(MemoryMetricStore::new());
        for i in 0..8 {
            store.seed_row(MetricRow::new(
                format!("one_min.host{i}."),
                format!("one_min.host{i}.cpu"),
                MetricStatus::Simple,
            ));
        }
        let config = BatcherConfig {
            aggregation_delay_millis: 50,
            ..BatcherConfig::default()
        };
        let batcher = batcher(&store, config);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let batcher = batcher.clone();
                tokio::spawn(async move { batcher.load(&format!("one_min.host{i}.")).await })
            })
            .collect();
        for handle in handles {
            let rows = handle.await.expect("join").expect("load");
            assert_eq!(rows.len(), 1);
        }
        assert_eq!(store.load_calls(), 1, "all requests coalesced into one query");
    }

    #[tokio::test]
    async fn test_absent_directory_fails_its_waiter_only() {
        let store = Arc::new(MemoryMetricStore::new());
        store.seed_dir("known.");
        let batcher = batcher(&store, BatcherConfig::default());

        let known = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.load("known.").await })
        };
        let missing = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.load("missing.").await })
        };

        assert!(known.await.expect("join").is_ok());
        let err = missing.await.expect("join").expect_err("hard failure");
        assert!(matches!(*err, Error::LoadFailed { .. }));
    }

    #[tokio::test]
    async fn test_storage_error_fails_every_waiter() {
        let store = Arc::new(MemoryMetricStore::new());
        store.seed_dir("a.");
        store.seed_dir("b.");
        store.fail_next_loads(1);
        let batcher = batcher(&store, BatcherConfig::default());

        let a = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.load("a.").await })
        };
        let b = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.load("b.").await })
        };
        assert!(a.await.expect("join").is_err());
        assert!(b.await.expect("join").is_err());

        // A failed batch never retries itself; the next access issues a
        // fresh query and succeeds.
        assert!(batcher.load("a.").await.is_ok());
        assert_eq!(store.load_calls(), 2);
    }

    #[tokio::test]
    async fn test_full_batch_rolls_over_to_a_new_one() {
        let store = Arc::new(MemoryMetricStore::new());
        store.seed_dir("a.");
        store.seed_dir("b.");
        store.seed_dir("c.");
        let config = BatcherConfig {
            max_batch_size: 2,
            aggregation_delay_millis: 30,
            ..BatcherConfig::default()
        };
        let batcher = batcher(&store, config);

        let handles: Vec<_> = ["a.", "b.", "c."]
            .into_iter()
            .map(|dir| {
                let batcher = batcher.clone();
                tokio::spawn(async move { batcher.load(dir).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.expect("join").is_ok());
        }
        assert_eq!(store.load_calls(), 2, "third request rolled into a second batch");
    }
}
