//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Vectors live in slot-indexed arenas: slot `i` holds one vector, its tombstone
//! flag and its per-layer neighbor lists. Each slot carries its own locks so
//! inserts, deletions and queries can run concurrently against a shared
//! [`HnswIndex`].

/// Soft deletion, tombstones and slot reuse.
pub mod delete;
/// Distance metrics: squared L2, inner product and cosine.
pub mod distance;
/// Graph storage, configuration and level assignment.
pub mod graph;
/// The shared index and its locking discipline.
pub mod index;
/// HNSW insertion algorithm with bidirectional connections and heuristic pruning.
pub mod insert;
mod parallel;
/// HNSW search: single-layer beam search and multi-layer KNN.
pub mod search;
/// Slot-indexed vector arena with tombstone flags.
pub mod vectors;
/// Generation-based visited set for efficient graph traversal.
pub mod visited;

pub use distance::DistanceMetric;
pub use graph::HnswConfig;
pub use index::HnswIndex;
