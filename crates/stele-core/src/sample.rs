//! The unit of ingested data.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};

/// A single accepted metric sample.
///
/// Immutable once created; owned exclusively by the ingestion buffer until
/// it is flushed to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Full dotted metric name.
    pub metric: Arc<str>,
    /// Sample value.
    pub value: f64,
    /// Sample timestamp (epoch seconds, as received on the wire).
    pub timestamp_seconds: u32,
    /// When the engine accepted the sample (epoch seconds).
    pub ingest_time_seconds: u32,
}

impl Sample {
    /// Creates a new sample.
    #[must_use]
    pub fn new(
        metric: Arc<str>,
        value: f64,
        timestamp_seconds: u32,
        ingest_time_seconds: u32,
    ) -> Self {
        Self {
            metric,
            value,
            timestamp_seconds,
            ingest_time_seconds,
        }
    }

    /// The partition date for the columnar `(metric, value, timestamp,
    /// date, updated)` row.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        DateTime::from_timestamp(i64::from(self.timestamp_seconds), 0)
            .map_or(NaiveDate::MIN, |dt| dt.date_naive())
    }
}
