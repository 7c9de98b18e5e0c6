//! Global configuration constants for hnswdb.
//!
//! Tuning defaults and input validation limits are defined here. These are
//! compile-time constants; per-index runtime configuration lives in
//! [`HnswConfig`](crate::hnsw::HnswConfig).

/// Default number of bidirectional links per HNSW node on layers ≥ 1.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Runtime-only: not persisted, and reset to this value after a load.
pub const HNSW_DEFAULT_EF: usize = 10;

/// Default seed for the level generator.
pub const HNSW_DEFAULT_SEED: u64 = 100;

/// Highest layer a node can be assigned to.
pub const HNSW_MAX_LEVEL: usize = 16;

/// Upper bound on `m`; larger values make every neighbor list a linear scan.
pub const HNSW_MAX_M: usize = 10_000;

/// Maximum factor by which a query widens `ef` when tombstones starve the result set.
pub const SEARCH_MAX_EF_GROWTH: usize = 4;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Batches with at most this many rows per worker run on the calling thread.
pub const ROWS_PER_THREAD: usize = 4;
