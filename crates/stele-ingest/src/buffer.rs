//! Bounded ingestion buffer with batch persistence.
//!
//! Producers block on a capacity semaphore, the system's only
//! backpressure point: a full buffer stalls the socket workers, which is
//! the intended admission control under storage slowness. Permits are
//! forgotten on enqueue and returned only after a successful write, so the
//! buffer never drops data and never grows past its capacity.
//!
//! A timer drains due batches to a bounded writer pool; a writer retries
//! its own batch with a fixed delay until the store accepts it. Shutdown
//! force-drains the queue to completion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use stele_core::config::BufferConfig;
use stele_core::error::{Error, Result};
use stele_core::metrics::{
    record_queue_occupancy, SAMPLES_WRITTEN, SAMPLE_WRITE_ERRORS,
};
use stele_core::monitoring::{Monitoring, MonitoringUnit};
use stele_core::sample::Sample;
use stele_core::storage::SampleWriter;

/// Monitoring unit name exposed by the buffer.
pub const QUEUE_UNIT: &str = "ingestion queue";

const QUEUE_WARNING_PERCENT: f64 = 80.0;
const QUEUE_CRITICAL_PERCENT: f64 = 95.0;

struct BufferInner {
    writer: Arc<dyn SampleWriter>,
    config: BufferConfig,
    capacity: Semaphore,
    queue: Mutex<VecDeque<Sample>>,
    active_writers: AtomicUsize,
    /// Samples handed to writers but not yet persisted.
    in_flight: AtomicUsize,
    started_at: Instant,
    last_batch_ms: AtomicU64,
    shutdown: AtomicBool,
    unit: Arc<MonitoringUnit>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl BufferInner {
    fn queue_len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn touch_last_batch(&self) {
        self.last_batch_ms.store(self.elapsed_ms(), Ordering::Release);
    }

    fn drain_batch(&self) -> Vec<Sample> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let take = self.config.max_batch_size.min(queue.len());
        queue.drain(..take).collect()
    }
}

/// The bounded sample buffer.
#[derive(Clone)]
pub struct IngestionBuffer {
    inner: Arc<BufferInner>,
}

impl IngestionBuffer {
    /// Starts the buffer and its batch-cadence timer; registers the queue
    /// monitoring unit.
    #[must_use]
    pub fn start(
        writer: Arc<dyn SampleWriter>,
        config: BufferConfig,
        monitoring: &Monitoring,
    ) -> Self {
        let unit = Arc::new(MonitoringUnit::new(QUEUE_UNIT));
        monitoring.add_unit(Arc::clone(&unit));

        let capacity = config.capacity;
        let flush_interval = config.flush_interval();
        let buffer = Self {
            inner: Arc::new(BufferInner {
                writer,
                config,
                capacity: Semaphore::new(capacity),
                queue: Mutex::new(VecDeque::new()),
                active_writers: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                started_at: Instant::now(),
                last_batch_ms: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                unit,
                timer: Mutex::new(None),
            }),
        };

        let cadence = buffer.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cadence.create_batches(false);
            }
        });
        *buffer
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(timer);
        buffer
    }

    /// Enqueues one sample, blocking until capacity is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has begun.
    pub async fn submit(&self, sample: Sample) -> Result<()> {
        self.submit_batch(vec![sample]).await
    }

    /// Enqueues a set of samples, blocking until capacity is available.
    ///
    /// There is no timeout by design: this is the backpressure valve.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has begun, or
    /// [`Error::Precondition`] for a batch larger than the whole buffer.
    pub async fn submit_batch(&self, samples: Vec<Sample>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        let count = u32::try_from(samples.len()).map_err(|_| {
            Error::precondition("sample batch exceeds u32::MAX")
        })?;
        if samples.len() > self.inner.config.capacity {
            return Err(Error::precondition(format!(
                "batch of {} exceeds buffer capacity {}",
                samples.len(),
                self.inner.config.capacity
            )));
        }
        let permits = self
            .inner
            .capacity
            .acquire_many(count)
            .await
            .map_err(|_| Error::ShuttingDown)?;
        // Capacity is returned only after a successful write.
        permits.forget();
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(samples);
        Ok(())
    }

    /// Current queue occupancy as a percentage of capacity.
    ///
    /// Includes samples handed to writers but not yet persisted, since those
    /// still hold their capacity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn occupancy_percent(&self) -> f64 {
        let capacity = self.inner.config.capacity;
        if capacity == 0 {
            return 0.0;
        }
        let used = capacity.saturating_sub(self.inner.capacity.available_permits());
        used as f64 * 100.0 / capacity as f64
    }

    /// Samples currently queued (not yet handed to a writer).
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }

    /// Stops accepting samples, drains the queue to completion, waits for
    /// in-flight writers, then stops the timer. Not cancellable: it must
    /// run to completion to avoid data loss.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        tracing::info!("shutting down ingestion buffer, draining queued samples");
        loop {
            let remaining =
                self.inner.queue_len() + self.inner.in_flight.load(Ordering::Acquire);
            if remaining == 0 {
                break;
            }
            tracing::info!(remaining, "samples remaining");
            self.create_batches(true);
            sleep(Duration::from_millis(100)).await;
        }
        if let Some(timer) = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
        tracing::info!("ingestion buffer stopped");
    }

    /// Drains due batches to the writer pool.
    fn create_batches(&self, force: bool) {
        let inner = &self.inner;
        if inner.queue_len() == 0 && inner.in_flight.load(Ordering::Acquire) == 0 {
            inner.unit.ok();
            return;
        }

        let occupancy = self.occupancy_percent();
        record_queue_occupancy(occupancy);
        if occupancy >= QUEUE_CRITICAL_PERCENT {
            inner.unit.critical(format!("queue size >= {QUEUE_CRITICAL_PERCENT}%"));
        } else if occupancy >= QUEUE_WARNING_PERCENT {
            inner.unit.warning(format!("queue size >= {QUEUE_WARNING_PERCENT}%"));
        } else {
            inner.unit.ok();
        }

        let mut dispatched = 0_usize;
        let mut dispatched_samples = 0_usize;
        while self.need_batch(force)
            && inner.active_writers.load(Ordering::Acquire) < inner.config.writer_count
        {
            let batch = inner.drain_batch();
            if batch.is_empty() {
                break;
            }
            dispatched += 1;
            dispatched_samples += batch.len();
            inner.active_writers.fetch_add(1, Ordering::AcqRel);
            inner.in_flight.fetch_add(batch.len(), Ordering::AcqRel);
            inner.touch_last_batch();

            let worker = self.clone();
            tokio::spawn(async move {
                worker.run_writer(batch).await;
            });
        }
        if dispatched > 0 {
            tracing::info!(
                batches = dispatched,
                samples = dispatched_samples,
                occupancy = format_args!("{occupancy:.1}%"),
                "dispatched sample batches"
            );
        }
    }

    fn need_batch(&self, force: bool) -> bool {
        let inner = &self.inner;
        let queue_len = inner.queue_len();
        if force {
            return queue_len > 0;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            return false;
        }
        if queue_len >= inner.config.max_batch_size {
            return true;
        }
        let elapsed = Duration::from_millis(
            inner
                .elapsed_ms()
                .saturating_sub(inner.last_batch_ms.load(Ordering::Acquire)),
        );
        if elapsed >= inner.config.max_batch_interval() {
            return queue_len > 0;
        }
        queue_len >= inner.config.min_batch_size && elapsed >= inner.config.min_batch_interval()
    }

    /// Persists one batch, retrying the same batch with a fixed delay
    /// until it succeeds. Only success releases the batch's capacity.
    async fn run_writer(&self, batch: Vec<Sample>) {
        let inner = &self.inner;
        loop {
            let started = Instant::now();
            match inner.writer.write_samples(&batch).await {
                Ok(()) => {
                    inner.capacity.add_permits(batch.len());
                    metrics::counter!(SAMPLES_WRITTEN).increment(batch.len() as u64);
                    tracing::info!(
                        samples = batch.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "persisted sample batch"
                    );
                    break;
                }
                Err(e) => {
                    metrics::counter!(SAMPLE_WRITE_ERRORS).increment(1);
                    inner.unit.critical(format!("sample write failed: {e}"));
                    tracing::error!(
                        error = %e,
                        samples = batch.len(),
                        retry_ms = inner.config.retry_delay_millis,
                        "sample write failed, retrying same batch"
                    );
                    sleep(inner.config.retry_delay()).await;
                }
            }
        }
        inner.in_flight.fetch_sub(batch.len(), Ordering::AcqRel);
        inner.active_writers.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for IngestionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionBuffer")
            .field("queue_len", &self.queue_len())
            .field("occupancy_percent", &self.occupancy_percent())
            .finish_non_exhaustive()
    }
}
