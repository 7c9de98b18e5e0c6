//! # hnswdb-core
//!
//! Concurrent in-memory HNSW approximate nearest neighbor index over
//! fixed-dimension `f32` vectors, with soft deletion, slot reuse, resizing and
//! a checksummed binary snapshot format.
//!
//! The index is shared by reference: every operation takes `&self`, so an
//! [`HnswIndex`] can sit behind an `Arc` and serve inserts and queries from
//! many threads at once.

/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Error type shared by every index operation.
pub mod error;
/// HNSW approximate nearest neighbor index: graph structure, search, insertion, and distance metrics.
pub mod hnsw;
/// Binary snapshot format and file persistence.
pub mod storage;

pub use error::{HnswError, Result};
pub use hnsw::{DistanceMetric, HnswConfig, HnswIndex};
