//! # stele-ingest
//!
//! The ingestion side of the Stele namespace engine:
//!
//! - [`intake::SampleIntake`]: the accept/reject boundary for inbound
//!   `(name, value, timestamp)` tuples: ban fast path, validation,
//!   namespace classification
//! - [`buffer::IngestionBuffer`]: bounded queue + writer pool persisting
//!   accumulated samples in batches, with infinite retry and producer
//!   backpressure

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod buffer;
pub mod intake;

pub use buffer::IngestionBuffer;
pub use intake::{NamespaceMode, SampleIntake};
