//! Error types for the index.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HnswError>;

/// Errors returned by index operations.
///
/// Every variant is returned to the caller; nothing is retried or swallowed.
#[derive(Debug, Error)]
pub enum HnswError {
    /// Malformed input: empty batch, wrong vector width, mismatched batch sizes,
    /// `k` out of range, or an operation the index policy forbids.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored dimension disagrees with the dimension the caller expects.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension the caller asked for.
        expected: usize,
        /// The dimension found in the data.
        actual: usize,
    },

    /// Insert of a label that is already bound to a slot.
    #[error("label {0} already exists")]
    DuplicateLabel(u64),

    /// No free slot and the index is full.
    #[error("index is full: max_elements = {max_elements}")]
    CapacityExceeded {
        /// Capacity at the time of the insert.
        max_elements: usize,
    },

    /// Query against an index without live nodes.
    #[error("index has no live elements")]
    EmptyIndex,

    /// Label is unknown (or tombstoned, for vector lookups).
    #[error("label {0} not found")]
    LabelNotFound(u64),

    /// Truncated, corrupt or structurally invalid serialized index.
    #[error("invalid index format: {0}")]
    Format(String),

    /// I/O failure while reading or writing an index file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A row of a batch insert failed. Rows other than the failed ones stay applied.
    #[error("batch insert failed at row {position} ({failed} rows failed): {source}")]
    BatchInsert {
        /// Position of the first failed row in the batch.
        position: usize,
        /// Total number of failed rows.
        failed: usize,
        /// Error of the first failed row.
        #[source]
        source: Box<HnswError>,
    },

    /// Internal invariant violation. The operation is aborted; the index
    /// should be treated as corrupted.
    #[error("invalid graph state: {0}")]
    InvalidGraphState(&'static str),
}

impl HnswError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        HnswError::InvalidArgument(msg.into())
    }
}
