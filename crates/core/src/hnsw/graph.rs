//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] defines tuning parameters (M, ef_construction, metric, seed).
//! [`GraphStore`] keeps the per-slot neighbor lists. Slots are addressed by
//! `u32` id and never move, so neighbor lists hold ids rather than references.
//! Each slot owns its own `RwLock`; readers snapshot a list and release the lock
//! before touching any other slot.

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::distance::DistanceMetric;
use parking_lot::{RwLock, RwLockWriteGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration parameters for an HNSW index.
///
/// Controls the trade-off between build speed, search speed, recall, and memory usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Number of bidirectional links per node on layers ≥ 1 (layer 0 uses `2 * m`).
    pub m: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Distance function for similarity computation.
    pub metric: DistanceMetric,
    /// Seed of the level generator. Fixing it makes single-threaded builds reproducible.
    pub seed: u64,
    /// When true, tombstoned slots may be reused by inserts that request replacement.
    pub allow_replace_deleted: bool,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            metric: DistanceMetric::L2,
            seed: config::HNSW_DEFAULT_SEED,
            allow_replace_deleted: false,
        }
    }
}

impl HnswConfig {
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_allow_replace_deleted(mut self, allow: bool) -> Self {
        self.allow_replace_deleted = allow;
        self
    }

    /// Maximum links per node at layer 0.
    #[inline]
    pub fn m_max0(&self) -> usize {
        self.m * 2
    }

    /// `1 / ln(M)`: normalization factor for level assignment.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    /// Neighbor list cap for `layer`.
    #[inline]
    pub fn layer_cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0()
        } else {
            self.m
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(HnswError::invalid(format!("M must be at least 2, got {}", self.m)));
        }
        if self.m > config::HNSW_MAX_M {
            return Err(HnswError::invalid(format!(
                "M must be at most {}, got {}",
                config::HNSW_MAX_M,
                self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(HnswError::invalid("ef_construction must be positive"));
        }
        if self.ef_construction < self.m {
            tracing::warn!(
                "ef_construction ({}) < M ({}): nodes may get fewer than M neighbors",
                self.ef_construction,
                self.m
            );
        }
        Ok(())
    }
}

/// Links of one slot: owner label, top layer and one neighbor list per layer.
#[derive(Debug, Clone, Default)]
pub struct NodeLinks {
    pub label: u64,
    pub level: usize,
    /// `layers[l]` holds neighbor slot ids at layer `l`, for `l <= level`.
    pub layers: Vec<Vec<u32>>,
}

/// Per-slot neighbor lists, one `RwLock` per slot.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: Vec<RwLock<NodeLinks>>,
}

impl GraphStore {
    /// Creates a store with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity);
        nodes.resize_with(capacity, || RwLock::new(NodeLinks::default()));
        Self { nodes }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Grows or shrinks the slot table. Existing slot ids keep their position.
    pub fn resize(&mut self, capacity: usize) {
        self.nodes
            .resize_with(capacity, || RwLock::new(NodeLinks::default()));
        self.nodes.shrink_to_fit();
    }

    /// Resets a slot to `level + 1` empty neighbor lists owned by `label`.
    pub fn init_node(&self, id: u32, label: u64, level: usize) {
        let mut links = self.nodes[id as usize].write();
        links.label = label;
        links.level = level;
        links.layers = vec![Vec::new(); level + 1];
    }

    /// Installs fully built links for a slot (used when restoring a snapshot).
    pub fn restore_node(&self, id: u32, links: NodeLinks) {
        *self.nodes[id as usize].write() = links;
    }

    #[inline]
    pub fn level(&self, id: u32) -> usize {
        self.nodes[id as usize].read().level
    }

    #[inline]
    pub fn label(&self, id: u32) -> u64 {
        self.nodes[id as usize].read().label
    }

    pub fn set_label(&self, id: u32, label: u64) {
        self.nodes[id as usize].write().label = label;
    }

    /// Copies the neighbor list of `id` at `layer` into `buf`.
    /// Leaves `buf` empty when the node does not reach `layer`.
    #[inline]
    pub fn copy_neighbors_into(&self, id: u32, layer: usize, buf: &mut Vec<u32>) {
        buf.clear();
        let links = self.nodes[id as usize].read();
        if let Some(list) = links.layers.get(layer) {
            buf.extend_from_slice(list);
        }
    }

    /// Snapshot of the neighbor list of `id` at `layer`.
    pub fn neighbors(&self, id: u32, layer: usize) -> Vec<u32> {
        let mut buf = Vec::new();
        self.copy_neighbors_into(id, layer, &mut buf);
        buf
    }

    /// Replaces the neighbor list of `id` at `layer`.
    pub fn set_neighbors(&self, id: u32, layer: usize, neighbors: Vec<u32>) -> Result<()> {
        let mut links = self.nodes[id as usize].write();
        match links.layers.get_mut(layer) {
            Some(list) => {
                *list = neighbors;
                Ok(())
            }
            None => Err(HnswError::InvalidGraphState(
                "neighbor list written above node level",
            )),
        }
    }

    /// Exclusive access to a slot's links.
    #[inline]
    pub fn write(&self, id: u32) -> RwLockWriteGuard<'_, NodeLinks> {
        self.nodes[id as usize].write()
    }

    /// Cloned links of a slot.
    pub fn snapshot(&self, id: u32) -> NodeLinks {
        self.nodes[id as usize].read().clone()
    }
}

/// Current entry point of the graph, guarded by the index metadata lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryPoint {
    pub node: Option<u32>,
    pub max_layer: usize,
}

/// Seeded level generator owned by the index.
///
/// Levels follow `floor(-ln(u) * multiplier)` with `u` uniform in (0, 1].
#[derive(Debug)]
pub struct LevelGenerator {
    rng: StdRng,
    multiplier: f64,
}

impl LevelGenerator {
    pub fn new(seed: u64, multiplier: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            multiplier,
        }
    }

    #[inline]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Draws the top layer for a new node.
    pub fn next_level(&mut self) -> usize {
        // gen() samples [0, 1); flip it so ln never sees 0
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        let level = (-u.ln() * self.multiplier).floor() as usize;
        level.min(config::HNSW_MAX_LEVEL)
    }
}
