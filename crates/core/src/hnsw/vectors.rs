//! Slot-indexed vector storage and tombstones.
//!
//! Each slot holds its vector behind its own `RwLock` so a replacement can
//! overwrite one slot while other threads compute distances against the rest.
//! Tombstones are atomics: readers check them lock-free, writers flip them
//! while holding the index label table lock.
//!
//! The store owns the index metric, so every distance against a stored vector
//! goes through [`VectorStore::distance`].

use crate::hnsw::distance::DistanceMetric;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    metric: DistanceMetric,
    vectors: Vec<RwLock<Vec<f32>>>,
    deleted: Vec<AtomicBool>,
}

impl VectorStore {
    /// Creates a store with `capacity` unoccupied slots of width `dimension`.
    pub fn new(dimension: usize, metric: DistanceMetric, capacity: usize) -> Self {
        let mut store = Self {
            dimension,
            metric,
            vectors: Vec::new(),
            deleted: Vec::new(),
        };
        store.resize(capacity);
        store
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.vectors.len()
    }

    /// Grows or shrinks the slot table without moving existing slots.
    pub fn resize(&mut self, capacity: usize) {
        self.vectors
            .resize_with(capacity, || RwLock::new(Vec::new()));
        self.deleted.resize_with(capacity, || AtomicBool::new(false));
        self.vectors.shrink_to_fit();
        self.deleted.shrink_to_fit();
    }

    /// Overwrites the vector stored at `id`.
    pub fn set(&self, id: u32, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dimension);
        let mut slot = self.vectors[id as usize].write();
        slot.clear();
        slot.extend_from_slice(vector);
    }

    /// Copy of the vector stored at `id`.
    pub fn get(&self, id: u32) -> Vec<f32> {
        self.vectors[id as usize].read().clone()
    }

    /// Copies the vector stored at `id` into `buf`.
    #[inline]
    pub fn copy_into(&self, id: u32, buf: &mut Vec<f32>) {
        buf.clear();
        buf.extend_from_slice(&self.vectors[id as usize].read());
    }

    /// Distance between `query` and the vector stored at `id`.
    #[inline]
    pub fn distance(&self, query: &[f32], id: u32) -> f32 {
        let stored = self.vectors[id as usize].read();
        self.metric.distance(query, &stored)
    }

    /// Returns `true` if the slot is tombstoned.
    #[inline]
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize].load(Ordering::Acquire)
    }

    pub fn set_deleted(&self, id: u32, deleted: bool) {
        self.deleted[id as usize].store(deleted, Ordering::Release);
    }
}
