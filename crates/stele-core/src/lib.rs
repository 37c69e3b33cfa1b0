//! # stele-core
//!
//! Core abstractions for the Stele metric namespace engine.
//!
//! This crate provides the foundational types and traits used across all
//! Stele components:
//!
//! - **Status Machine**: The visibility/ban state machine applied to every
//!   namespace node ([`status::MetricStatus`])
//! - **Metric Names**: Dotted-name utilities and validation
//! - **Storage Traits**: Abstract bulk read/write interfaces for the
//!   columnar backend
//! - **Error Types**: Shared error definitions and result types
//! - **Monitoring**: Ok/warning/critical units consumed by an external
//!   monitoring collaborator
//!
//! ## Crate Boundary
//!
//! `stele-core` is the **only** crate allowed to define shared primitives.
//! The namespace engine (`stele-namespace`) and the ingestion pipeline
//! (`stele-ingest`) interact exclusively through contracts defined here.
//!
//! ## Example
//!
//! ```rust
//! use stele_core::prelude::*;
//!
//! // Statuses only change through the transition graph.
//! let next = MetricStatus::select(MetricStatus::Ban, MetricStatus::Simple);
//! assert_eq!(next, MetricStatus::Ban);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod monitoring;
pub mod name;
pub mod observability;
pub mod sample;
pub mod status;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use stele_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{BatcherConfig, BufferConfig, TreeLimits, ValidatorConfig};
    pub use crate::error::{Error, Result};
    pub use crate::monitoring::{Monitoring, MonitoringStatus, MonitoringUnit};
    pub use crate::name::{is_dir, last_level, parent_name, split_levels, MetricValidator};
    pub use crate::sample::Sample;
    pub use crate::status::{AtomicStatus, MetricStatus};
    pub use crate::storage::{
        DirContentReader, MemoryMetricStore, MetricRow, SampleWriter, StatusWriter,
    };
}
