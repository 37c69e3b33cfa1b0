//! Pending status-update queue.
//!
//! Newly confirmed nodes and administrative status changes accumulate here
//! and are persisted in bulk through the [`StatusWriter`]. A failed flush
//! re-queues the rows; nothing is lost, the next flush retries them.

use std::sync::{Mutex, PoisonError};

use stele_core::error::Result;
use stele_core::storage::{MetricRow, StatusWriter};

/// Queue of namespace rows awaiting persistence.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    pending: Mutex<Vec<MetricRow>>,
}

impl UpdateQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one row.
    pub fn push(&self, row: MetricRow) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row);
    }

    /// Queues a set of rows.
    pub fn push_all(&self, rows: impl IntoIterator<Item = MetricRow>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(rows);
    }

    /// Number of rows waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists everything queued so far.
    ///
    /// Returns the number of rows written. On storage failure the drained
    /// rows are re-queued and the error is returned; the next flush
    /// retries them.
    ///
    /// # Errors
    ///
    /// Returns the storage error from the writer.
    pub async fn flush(&self, writer: &dyn StatusWriter) -> Result<usize> {
        let rows: Vec<MetricRow> = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();
        match writer.write_status_changes(&rows).await {
            Ok(()) => Ok(count),
            Err(e) => {
                self.push_all(rows);
                Err(e)
            }
        }
    }
}
