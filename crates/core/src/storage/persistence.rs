//! Binary snapshots of an [`HnswIndex`] using bincode serialization.
//!
//! A snapshot is the bincode-encoded [`IndexSnapshot`] followed by an 8-byte
//! footer: `[magic "HNS1"][u32 CRC32 BE]`, the checksum covering the payload.
//! Files are written to a temp path and renamed into place so a crash never
//! leaves a half-written snapshot behind.
//!
//! The distance metric is not part of the snapshot: the caller supplies it on
//! load, together with the expected dimension.

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::delete::LabelTable;
use crate::hnsw::graph::{EntryPoint, NodeLinks};
use crate::hnsw::index::Storage;
use crate::hnsw::{DistanceMetric, HnswConfig, HnswIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Magic bytes placed before the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"HNS1";
const FOOTER_LEN: usize = 8;
/// Bumped whenever the layout of [`IndexSnapshot`] changes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Serialized form of a whole index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub dimension: usize,
    pub m: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub level_multiplier: f64,
    pub max_elements: usize,
    pub entry_point: Option<u32>,
    pub max_layer: usize,
    /// One record per occupied slot, in slot order.
    pub nodes: Vec<NodeRecord>,
}

/// One occupied slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub label: u64,
    pub level: usize,
    pub deleted: bool,
    pub vector: Vec<f32>,
    pub layers: Vec<Vec<u32>>,
}

impl IndexSnapshot {
    /// Structural checks run before any slot is restored.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.m < 2 || self.m > config::HNSW_MAX_M {
            return Err(format!("m out of range: {}", self.m));
        }
        if self.m_max0 != 2 * self.m {
            return Err(format!(
                "m_max0 ({}) does not match 2 * m ({})",
                self.m_max0,
                2 * self.m
            ));
        }
        if self.ef_construction == 0 {
            return Err("ef_construction is zero".into());
        }
        if !self.level_multiplier.is_finite() || self.level_multiplier <= 0.0 {
            return Err(format!("invalid level multiplier {}", self.level_multiplier));
        }
        let count = self.nodes.len();
        if count > self.max_elements {
            return Err(format!(
                "{} nodes exceed max_elements {}",
                count, self.max_elements
            ));
        }
        if count > u32::MAX as usize {
            return Err(format!("{count} nodes exceed the u32 slot id space"));
        }
        if self.max_layer > config::HNSW_MAX_LEVEL {
            return Err(format!(
                "max layer {} exceeds the level cap {}",
                self.max_layer,
                config::HNSW_MAX_LEVEL
            ));
        }

        match self.entry_point {
            None if count > 0 => return Err("non-empty index without entry point".into()),
            None => {}
            Some(ep) => {
                let node = self
                    .nodes
                    .get(ep as usize)
                    .ok_or_else(|| format!("entry point {ep} out of bounds"))?;
                if node.level != self.max_layer {
                    return Err(format!(
                        "entry point level {} does not match max layer {}",
                        node.level, self.max_layer
                    ));
                }
            }
        }

        let mut labels = HashMap::with_capacity(count);
        for (id, node) in self.nodes.iter().enumerate() {
            if labels.insert(node.label, id).is_some() {
                return Err(format!("duplicate label {}", node.label));
            }
            if node.vector.len() != self.dimension {
                return Err(format!(
                    "node {} has {} components, expected {}",
                    id,
                    node.vector.len(),
                    self.dimension
                ));
            }
            if node.level > self.max_layer || node.layers.len() != node.level + 1 {
                return Err(format!("node {id} has an inconsistent level"));
            }
            for (layer, list) in node.layers.iter().enumerate() {
                let cap = if layer == 0 { self.m_max0 } else { self.m };
                if list.len() > cap {
                    return Err(format!(
                        "node {} has {} neighbors on layer {} (cap {})",
                        id,
                        list.len(),
                        layer,
                        cap
                    ));
                }
                for &neighbor in list {
                    match self.nodes.get(neighbor as usize) {
                        Some(n) if n.level >= layer => {}
                        _ => {
                            return Err(format!(
                                "node {id} links to invalid slot {neighbor} on layer {layer}"
                            ))
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl HnswIndex {
    /// Captures the whole index as an [`IndexSnapshot`].
    ///
    /// Takes the structure lock exclusively, so the snapshot waits for in-flight
    /// operations and reflects a single point in time.
    pub fn snapshot(&self) -> IndexSnapshot {
        let storage = self.storage.write();
        let count = self.labels.lock().count;
        let entry = *self.entry.lock();
        let level_multiplier = self.levels.lock().multiplier();

        let nodes = (0..count as u32)
            .map(|id| {
                let links = storage.graph.snapshot(id);
                NodeRecord {
                    label: links.label,
                    level: links.level,
                    deleted: storage.vectors.is_deleted(id),
                    vector: storage.vectors.get(id),
                    layers: links.layers,
                }
            })
            .collect();

        IndexSnapshot {
            version: SNAPSHOT_FORMAT_VERSION,
            dimension: self.dimension,
            m: self.config.m,
            m_max0: self.config.m_max0(),
            ef_construction: self.config.ef_construction,
            level_multiplier,
            max_elements: storage.max_elements(),
            entry_point: entry.node,
            max_layer: entry.max_layer,
            nodes,
        }
    }

    /// Serializes the index: bincode payload followed by the CRC32 footer.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let snapshot = self.snapshot();
        let payload =
            bincode::serialize(&snapshot).map_err(|e| HnswError::Format(e.to_string()))?;
        let crc = crc32fast::hash(&payload);

        let mut output = Vec::with_capacity(payload.len() + FOOTER_LEN);
        output.extend_from_slice(&payload);
        output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
        output.extend_from_slice(&crc.to_be_bytes());
        Ok(output)
    }

    /// Exact size in bytes of [`serialize`](HnswIndex::serialize)'s output.
    pub fn index_file_size(&self) -> Result<usize> {
        let snapshot = self.snapshot();
        let payload =
            bincode::serialized_size(&snapshot).map_err(|e| HnswError::Format(e.to_string()))?;
        Ok(payload as usize + FOOTER_LEN)
    }

    /// Rebuilds an index from [`serialize`](HnswIndex::serialize) output.
    ///
    /// The capacity is `max(max_elements, stored element count)`, `ef` resets to
    /// its default and tombstoned slots become reusable when
    /// `allow_replace_deleted` is set.
    pub fn deserialize(
        bytes: &[u8],
        metric: DistanceMetric,
        dimension: usize,
        max_elements: usize,
        allow_replace_deleted: bool,
    ) -> Result<Self> {
        let payload = verify_footer(bytes)?;
        let snapshot: IndexSnapshot =
            bincode::deserialize(payload).map_err(|e| HnswError::Format(e.to_string()))?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(HnswError::Format(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Self::from_snapshot(snapshot, metric, dimension, max_elements, allow_replace_deleted)
    }

    /// Rebuilds an index from a decoded snapshot.
    pub fn from_snapshot(
        snapshot: IndexSnapshot,
        metric: DistanceMetric,
        dimension: usize,
        max_elements: usize,
        allow_replace_deleted: bool,
    ) -> Result<Self> {
        if snapshot.dimension != dimension {
            return Err(HnswError::DimensionMismatch {
                expected: dimension,
                actual: snapshot.dimension,
            });
        }
        if dimension == 0 || dimension > config::MAX_DIMENSION {
            return Err(HnswError::invalid(format!(
                "dimension must be in 1..={}, got {}",
                config::MAX_DIMENSION,
                dimension
            )));
        }
        snapshot
            .validate()
            .map_err(|e| HnswError::Format(format!("snapshot validation failed: {e}")))?;

        let config = HnswConfig::default()
            .with_m(snapshot.m)
            .with_ef_construction(snapshot.ef_construction)
            .with_metric(metric)
            .with_allow_replace_deleted(allow_replace_deleted);
        config
            .validate()
            .map_err(|e| HnswError::Format(format!("snapshot validation failed: {e}")))?;

        let count = snapshot.nodes.len();
        let capacity = max_elements.max(count);
        let storage = Storage::new(dimension, metric, capacity);
        let mut labels = LabelTable {
            count,
            ..LabelTable::default()
        };

        for (id, node) in snapshot.nodes.into_iter().enumerate() {
            let id = id as u32;
            storage.vectors.set(id, &node.vector);
            storage.vectors.set_deleted(id, node.deleted);
            if node.deleted {
                labels.deleted += 1;
                if allow_replace_deleted {
                    labels.free_slots.insert(id);
                }
            }
            labels.slots.insert(node.label, id);
            storage.graph.restore_node(
                id,
                NodeLinks {
                    label: node.label,
                    level: node.level,
                    layers: node.layers,
                },
            );
        }

        let entry = EntryPoint {
            node: snapshot.entry_point,
            max_layer: snapshot.max_layer,
        };
        tracing::info!(
            "Restored HNSW index ({} elements, {} deleted, capacity {}, metric={})",
            count,
            labels.deleted,
            capacity,
            metric
        );
        Ok(Self::from_parts(
            dimension,
            config,
            storage,
            labels,
            entry,
            snapshot.level_multiplier,
        ))
    }

    /// Writes the serialized index to `path` atomically (temp file + rename).
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.serialize()?;

        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        fs::write(&tmp_path, &bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&tmp_path, path)?;

        tracing::info!(
            "Saved HNSW index to {:?} ({} bytes, CRC32={:#010x})",
            path,
            bytes.len(),
            stored_crc(&bytes)
        );
        Ok(())
    }

    /// Loads an index written by [`save_to_file`](HnswIndex::save_to_file).
    pub fn load_from_file(
        path: impl AsRef<Path>,
        metric: DistanceMetric,
        dimension: usize,
        max_elements: usize,
        allow_replace_deleted: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read(path)?;
        tracing::info!("Loading HNSW index from {:?} ({} bytes)", path, raw.len());
        Self::deserialize(&raw, metric, dimension, max_elements, allow_replace_deleted)
    }
}

/// Checks the `[magic][CRC32]` footer and returns the payload it covers.
fn verify_footer(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < FOOTER_LEN {
        return Err(HnswError::Format(format!(
            "snapshot too short ({} bytes)",
            bytes.len()
        )));
    }
    let (payload, footer) = bytes.split_at(bytes.len() - FOOTER_LEN);
    if &footer[..4] != SNAPSHOT_CRC_MAGIC {
        return Err(HnswError::Format("missing snapshot footer".into()));
    }
    let stored = stored_crc(bytes);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(HnswError::Format(format!(
            "snapshot CRC32 mismatch: expected {stored:#010x}, got {computed:#010x}"
        )));
    }
    tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored);
    Ok(payload)
}

/// CRC32 stored in the last four bytes. Callers ensure `bytes` holds a footer.
fn stored_crc(bytes: &[u8]) -> u32 {
    let n = bytes.len();
    u32::from_be_bytes([bytes[n - 4], bytes[n - 3], bytes[n - 2], bytes[n - 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index(allow_replace: bool) -> HnswIndex {
        let config = HnswConfig::default()
            .with_m(4)
            .with_seed(5)
            .with_allow_replace_deleted(allow_replace);
        let index = HnswIndex::new(3, 32, config).unwrap();
        for i in 0..20u64 {
            let x = i as f32;
            index.add_point(&[x, x * 0.5, -x], i * 10, false).unwrap();
        }
        index
    }

    #[test]
    fn test_round_trip_preserves_graph() {
        let index = sample_index(false);
        index.mark_deleted(30).unwrap();
        let bytes = index.serialize().unwrap();
        assert_eq!(bytes.len(), index.index_file_size().unwrap());

        let restored = HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 32, false).unwrap();
        assert_eq!(restored.current_count(), 20);
        assert_eq!(restored.deleted_count(), 1);
        assert_eq!(restored.max_layer(), index.max_layer());
        assert!(restored.is_deleted(30).unwrap());

        let original = index.storage.read();
        let copy = restored.storage.read();
        for id in 0..20u32 {
            assert_eq!(original.graph.label(id), copy.graph.label(id));
            assert_eq!(original.graph.level(id), copy.graph.level(id));
            assert_eq!(original.graph.neighbors(id, 0), copy.graph.neighbors(id, 0));
            assert_eq!(original.vectors.get(id), copy.vectors.get(id));
        }
    }

    #[test]
    fn test_restored_free_slots_follow_policy() {
        let index = sample_index(false);
        index.mark_deleted(50).unwrap();
        let bytes = index.serialize().unwrap();

        let strict = HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 32, false).unwrap();
        assert!(strict.labels.lock().free_slots.is_empty());

        let reusing = HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 32, true).unwrap();
        assert!(reusing.labels.lock().free_slots.contains(&5));
    }

    #[test]
    fn test_capacity_never_below_count() {
        let bytes = sample_index(false).serialize().unwrap();
        let restored = HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 4, false).unwrap();
        assert_eq!(restored.max_elements(), 20);
        let restored = HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 100, false).unwrap();
        assert_eq!(restored.max_elements(), 100);
    }

    #[test]
    fn test_rejects_bad_footer_and_crc() {
        let mut bytes = sample_index(false).serialize().unwrap();
        assert!(matches!(
            HnswIndex::deserialize(&bytes[..5], DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));

        bytes[10] ^= 0xFF;
        assert!(matches!(
            HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));

        let n = bytes.len();
        bytes[n - 8] = b'X';
        assert!(matches!(
            HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let bytes = sample_index(false).serialize().unwrap();
        assert!(matches!(
            HnswIndex::deserialize(&bytes, DistanceMetric::L2, 4, 32, false),
            Err(HnswError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_validation_catches_dangling_links() {
        let mut snapshot = sample_index(false).snapshot();
        snapshot.nodes[0].layers[0].push(999);
        assert!(matches!(
            HnswIndex::from_snapshot(snapshot, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));

        let mut snapshot = sample_index(false).snapshot();
        snapshot.nodes[1].label = snapshot.nodes[0].label;
        assert!(matches!(
            HnswIndex::from_snapshot(snapshot, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));

        let mut snapshot = sample_index(false).snapshot();
        snapshot.m_max0 += 1;
        assert!(matches!(
            HnswIndex::from_snapshot(snapshot, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));
    }

    #[test]
    fn test_validation_rejects_levels_above_cap() {
        let mut snapshot = sample_index(false).snapshot();
        let entry = snapshot.entry_point.unwrap() as usize;
        snapshot.max_layer = usize::MAX;
        snapshot.nodes[entry].level = usize::MAX;
        snapshot.nodes[entry].layers.clear();
        assert!(matches!(
            HnswIndex::from_snapshot(snapshot, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));

        let mut snapshot = sample_index(false).snapshot();
        let entry = snapshot.entry_point.unwrap() as usize;
        let level = config::HNSW_MAX_LEVEL + 1;
        snapshot.max_layer = level;
        snapshot.nodes[entry].level = level;
        snapshot.nodes[entry].layers.resize(level + 1, Vec::new());
        assert!(matches!(
            HnswIndex::from_snapshot(snapshot, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_level_in_encoded_bytes() {
        let mut snapshot = sample_index(false).snapshot();
        snapshot.max_layer = usize::MAX;
        let entry = snapshot.entry_point.unwrap() as usize;
        snapshot.nodes[entry].level = usize::MAX;
        snapshot.nodes[entry].layers.clear();
        let payload = bincode::serialize(&snapshot).unwrap();
        let mut bytes = payload.clone();
        bytes.extend_from_slice(SNAPSHOT_CRC_MAGIC);
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        assert!(matches!(
            HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 32, false),
            Err(HnswError::Format(_))
        ));
    }

    #[test]
    fn test_empty_index_round_trip() {
        let index = HnswIndex::new(3, 8, HnswConfig::default()).unwrap();
        let bytes = index.serialize().unwrap();
        let restored = HnswIndex::deserialize(&bytes, DistanceMetric::L2, 3, 8, false).unwrap();
        assert!(restored.is_empty());
        assert!(matches!(
            restored.search_knn(&[0.0, 0.0, 0.0], 1),
            Err(HnswError::EmptyIndex)
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.hnsw");
        let index = sample_index(false);
        index.save_to_file(&path).unwrap();
        assert!(!dir.path().join("index.hnsw.tmp").exists());

        let restored = HnswIndex::load_from_file(&path, DistanceMetric::L2, 3, 32, false).unwrap();
        assert_eq!(restored.current_count(), 20);
        let hits = restored.search_knn(&[7.0, 3.5, -7.0], 1).unwrap();
        assert_eq!(hits[0].0, 70);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            HnswIndex::load_from_file(
                dir.path().join("absent.hnsw"),
                DistanceMetric::L2,
                3,
                8,
                false
            ),
            Err(HnswError::Io(_))
        ));
    }
}
