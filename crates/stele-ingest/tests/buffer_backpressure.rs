//! Integration tests for the ingestion buffer: backpressure, retry,
//! drain-on-shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use stele_core::config::BufferConfig;
use stele_core::monitoring::{Monitoring, MonitoringStatus};
use stele_core::sample::Sample;
use stele_core::storage::{MemoryMetricStore, SampleWriter};
use stele_ingest::buffer::{IngestionBuffer, QUEUE_UNIT};

fn sample(i: u32) -> Sample {
    Sample::new(
        format!("one_min.app.q{i}").into(),
        f64::from(i),
        1_700_000_000 + i,
        1_700_000_000 + i,
    )
}

fn fast_config(capacity: usize) -> BufferConfig {
    BufferConfig {
        capacity,
        min_batch_size: 1,
        max_batch_size: 4,
        min_batch_interval_seconds: 0,
        max_batch_interval_seconds: 0,
        writer_count: 1,
        flush_interval_millis: 10,
        retry_delay_millis: 20,
    }
}

async fn wait_for<F: Fn() -> bool>(deadline: Duration, condition: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_fills_capacity_then_blocks() {
    let store = Arc::new(MemoryMetricStore::new());
    // Writes never succeed, so no capacity is ever released.
    store.fail_next_writes(usize::MAX);
    let monitoring = Monitoring::new();
    let buffer = IngestionBuffer::start(
        Arc::clone(&store) as Arc<dyn SampleWriter>,
        fast_config(4),
        &monitoring,
    );

    for i in 0..4 {
        buffer.submit(sample(i)).await.expect("within capacity");
    }

    // The fifth submit blocks on the capacity semaphore.
    let blocked = timeout(Duration::from_millis(200), buffer.submit(sample(5))).await;
    assert!(blocked.is_err(), "submit past capacity must block");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_successful_flush_releases_capacity() {
    let store = Arc::new(MemoryMetricStore::new());
    let monitoring = Monitoring::new();
    let buffer = IngestionBuffer::start(
        Arc::clone(&store) as Arc<dyn SampleWriter>,
        fast_config(2),
        &monitoring,
    );

    buffer.submit(sample(0)).await.expect("submit");
    buffer.submit(sample(1)).await.expect("submit");

    // Blocks until the timer flushes the first batch and its write
    // releases the permits.
    timeout(Duration::from_secs(2), buffer.submit(sample(2)))
        .await
        .expect("unblocked by flush")
        .expect("accepted");

    assert!(
        wait_for(Duration::from_secs(2), || store.written_samples().len() >= 2).await,
        "flushed batches reach the store"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_writes_retry_same_batch_until_success() {
    let store = Arc::new(MemoryMetricStore::new());
    store.fail_next_writes(3);
    let monitoring = Monitoring::new();
    let buffer = IngestionBuffer::start(
        Arc::clone(&store) as Arc<dyn SampleWriter>,
        fast_config(16),
        &monitoring,
    );

    for i in 0..4 {
        buffer.submit(sample(i)).await.expect("submit");
    }

    assert!(
        wait_for(Duration::from_secs(5), || store.written_samples().len() == 4).await,
        "every sample eventually persisted"
    );
    assert!(store.write_calls() >= 4, "failed attempts were retried");

    // The retry storm raised a critical; a healthy pass clears it.
    assert!(
        wait_for(Duration::from_secs(2), || {
            monitoring
                .unit(QUEUE_UNIT)
                .is_some_and(|unit| unit.status() == MonitoringStatus::Ok)
        })
        .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drains_everything_then_rejects() {
    let store = Arc::new(MemoryMetricStore::new());
    let monitoring = Monitoring::new();
    let buffer = IngestionBuffer::start(
        Arc::clone(&store) as Arc<dyn SampleWriter>,
        fast_config(64),
        &monitoring,
    );

    for i in 0..10 {
        buffer.submit(sample(i)).await.expect("submit");
    }
    buffer.shutdown().await;

    assert_eq!(store.written_samples().len(), 10, "drain loses nothing");
    assert!(buffer.submit(sample(99)).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_occupancy_tracks_unreleased_capacity() {
    let store = Arc::new(MemoryMetricStore::new());
    store.fail_next_writes(usize::MAX);
    let monitoring = Monitoring::new();
    let buffer = IngestionBuffer::start(
        Arc::clone(&store) as Arc<dyn SampleWriter>,
        fast_config(10),
        &monitoring,
    );

    for i in 0..5 {
        buffer.submit(sample(i)).await.expect("submit");
    }
    let occupancy = buffer.occupancy_percent();
    assert!((occupancy - 50.0).abs() < f64::EPSILON, "5/10 = {occupancy}%");
}
