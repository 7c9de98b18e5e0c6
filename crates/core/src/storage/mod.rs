//! Storage layer: checksummed binary snapshots of an index.
//!
//! An index serializes to a single bincode payload with a CRC32 footer and is
//! written to disk with an atomic temp-file + rename.

/// Snapshot encode/decode and file persistence.
pub mod persistence;

pub use persistence::{IndexSnapshot, NodeRecord, SNAPSHOT_FORMAT_VERSION};
