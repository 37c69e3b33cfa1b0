//! Engine metrics.
//!
//! Counter/gauge names for the ingestion pipeline and the directory cache,
//! registered through the `metrics` facade. These complement the
//! structured logging and the monitoring units.

use metrics::{counter, describe_counter, describe_gauge, gauge};

// ============================================================================
// Ingestion
// ============================================================================

/// Samples accepted into the buffer.
pub const SAMPLES_RECEIVED: &str = "stele_samples_received_total";

/// Samples successfully persisted.
pub const SAMPLES_WRITTEN: &str = "stele_samples_written_total";

/// Samples dropped at intake (invalid, banned, unparseable).
pub const SAMPLES_REJECTED: &str = "stele_samples_rejected_total";

/// Failed sample write attempts.
pub const SAMPLE_WRITE_ERRORS: &str = "stele_sample_write_errors_total";

/// Current ingestion queue occupancy, percent of capacity.
pub const QUEUE_OCCUPANCY: &str = "stele_ingest_queue_occupancy_percent";

// ============================================================================
// Directory cache
// ============================================================================

/// Directory content loads, labeled by mode (`batch` or `direct`).
pub const DIR_LOADS: &str = "stele_dir_loads_total";

/// Coalesced load batches executed.
pub const DIR_LOAD_BATCHES: &str = "stele_dir_load_batches_total";

/// Failed directory loads.
pub const DIR_LOAD_ERRORS: &str = "stele_dir_load_errors_total";

/// Directories automatically banned for exceeding a cardinality limit.
pub const AUTO_BANS: &str = "stele_auto_ban_total";

/// Registers all metric descriptions.
///
/// Call once at application startup, after installing a metrics recorder.
pub fn register_metrics() {
    describe_counter!(SAMPLES_RECEIVED, "Samples accepted into the buffer");
    describe_counter!(SAMPLES_WRITTEN, "Samples successfully persisted");
    describe_counter!(SAMPLES_REJECTED, "Samples dropped at intake");
    describe_counter!(SAMPLE_WRITE_ERRORS, "Failed sample write attempts");
    describe_gauge!(QUEUE_OCCUPANCY, "Ingestion queue occupancy percent");
    describe_counter!(DIR_LOADS, "Directory content loads");
    describe_counter!(DIR_LOAD_BATCHES, "Coalesced load batches executed");
    describe_counter!(DIR_LOAD_ERRORS, "Failed directory loads");
    describe_counter!(AUTO_BANS, "Directories auto-banned for fan-out");
}

/// Records a sample rejection at intake.
pub fn record_rejection(reason: &'static str) {
    counter!(SAMPLES_REJECTED, "reason" => reason).increment(1);
}

/// Records a directory content load.
pub fn record_dir_load(mode: &'static str, dirs: u64) {
    counter!(DIR_LOADS, "mode" => mode).increment(dirs);
}

/// Records a cardinality auto-ban.
pub fn record_auto_ban() {
    counter!(AUTO_BANS).increment(1);
}

/// Publishes the current queue occupancy.
pub fn record_queue_occupancy(percent: f64) {
    gauge!(QUEUE_OCCUPANCY).set(percent);
}
