//! # stele-namespace
//!
//! The concurrently-mutable metric namespace: a hierarchical trie of
//! directories and metrics with a visibility state machine, glob search,
//! a fast write-block index, and an on-demand directory cache backed by
//! coalesced bulk loads from the columnar store.
//!
//! ## Components
//!
//! - [`tree::NamespaceTree`]: fully-resident trie for deployments where
//!   the namespace fits in memory
//! - [`banned::BannedIndex`]: O(depth) "is this name write-blocked"
//!   answers on the ingestion hot path
//! - [`lazy::LazyDirectoryCache`]: directory children loaded from storage
//!   on first touch, with per-directory cardinality protection
//! - [`batcher::LoadBatcher`]: coalesces concurrent directory loads into
//!   bounded, time-windowed storage round trips
//! - [`service::NamespaceService`]: the administrative facade
//!   (search / modify / is_banned / describe)

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod banned;
pub mod batcher;
pub mod glob;
pub mod lazy;
mod node;
pub mod search;
pub mod service;
pub mod tree;
pub mod updates;

pub use banned::{BannedIndex, BannedIndexState};
pub use batcher::LoadBatcher;
pub use lazy::{CachedNode, LazyDirectoryCache, NodeSnapshot};
pub use search::SearchHit;
pub use service::NamespaceService;
pub use tree::{NamespaceTree, NodeRef};
