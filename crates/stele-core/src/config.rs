//! Configuration structs for the namespace engine and ingestion pipeline.
//!
//! Plain value objects deserialized from the deployment's config file.
//! Every field has a production-ready default; intervals are expressed in
//! integer milliseconds/seconds with [`std::time::Duration`] accessors.

use std::time::Duration;

use serde::Deserialize;

/// Metric name validation bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Regular expression every accepted name must match.
    pub name_pattern: String,
    /// Minimum metric name length (directories are exempt).
    pub min_length: usize,
    /// Maximum name length.
    pub max_length: usize,
    /// Minimum number of path levels for a metric (directories are exempt).
    pub min_levels: usize,
    /// Maximum number of path levels.
    pub max_levels: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            name_pattern: r"^[-_0-9a-zA-Z]+(\.[-_0-9a-zA-Z]+)*\.?$".to_string(),
            min_length: 5,
            max_length: 255,
            min_levels: 2,
            max_levels: 20,
        }
    }
}

/// Per-directory fan-out caps. `0` disables a limit.
///
/// The limits guard the storage layer against cardinality explosions
/// (accidental per-request unique metric names); a directory that reaches
/// a limit is automatically banned.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TreeLimits {
    /// Maximum child directories per directory.
    pub max_subdirs_per_dir: usize,
    /// Maximum child metrics per directory.
    pub max_metrics_per_dir: usize,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self {
            max_subdirs_per_dir: 50_000,
            max_metrics_per_dir: 100_000,
        }
    }
}

impl TreeLimits {
    /// A configuration with both limits disabled.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_subdirs_per_dir: 0,
            max_metrics_per_dir: 0,
        }
    }

    /// Returns the limit for the requested child kind.
    #[must_use]
    pub const fn for_kind(&self, dir: bool) -> usize {
        if dir {
            self.max_subdirs_per_dir
        } else {
            self.max_metrics_per_dir
        }
    }
}

/// Directory load batcher tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Maximum storage queries in flight at once (batched or direct).
    pub max_parallel_requests: usize,
    /// Maximum batches admitted but not yet finished.
    pub max_outstanding_batches: usize,
    /// Maximum directories coalesced into one storage query.
    pub max_batch_size: usize,
    /// How long a fresh batch waits for more directories before executing.
    pub aggregation_delay_millis: u64,
    /// How long a request waits for batch admission before falling back to
    /// a direct single-directory load.
    pub admission_timeout_millis: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: 4,
            max_outstanding_batches: 8,
            max_batch_size: 2_000,
            aggregation_delay_millis: 50,
            admission_timeout_millis: 100,
        }
    }
}

impl BatcherConfig {
    /// Aggregation window as a [`Duration`].
    #[must_use]
    pub const fn aggregation_delay(&self) -> Duration {
        Duration::from_millis(self.aggregation_delay_millis)
    }

    /// Admission timeout as a [`Duration`].
    #[must_use]
    pub const fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_millis)
    }
}

/// Ingestion buffer tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Bounded queue size; a full queue blocks producers.
    pub capacity: usize,
    /// Queue size that justifies a batch before `max_batch_interval`.
    pub min_batch_size: usize,
    /// Maximum samples drained into one write.
    pub max_batch_size: usize,
    /// Minimum seconds between batches below `max_batch_size`.
    pub min_batch_interval_seconds: u64,
    /// A batch is always due after this many seconds.
    pub max_batch_interval_seconds: u64,
    /// Concurrent writer tasks.
    pub writer_count: usize,
    /// Batch-cadence timer tick.
    pub flush_interval_millis: u64,
    /// Fixed delay between write retries.
    pub retry_delay_millis: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            min_batch_size: 10_000,
            max_batch_size: 500_000,
            min_batch_interval_seconds: 1,
            max_batch_interval_seconds: 5,
            writer_count: 2,
            flush_interval_millis: 1_000,
            retry_delay_millis: 1_000,
        }
    }
}

impl BufferConfig {
    /// Timer tick as a [`Duration`].
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_millis)
    }

    /// Retry pacing as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_millis)
    }

    /// Minimum batch interval as a [`Duration`].
    #[must_use]
    pub const fn min_batch_interval(&self) -> Duration {
        Duration::from_secs(self.min_batch_interval_seconds)
    }

    /// Maximum batch interval as a [`Duration`].
    #[must_use]
    pub const fn max_batch_interval(&self) -> Duration {
        Duration::from_secs(self.max_batch_interval_seconds)
    }
}
