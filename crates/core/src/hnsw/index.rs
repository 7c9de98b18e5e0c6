//! The shared HNSW index.
//!
//! [`HnswIndex`] ties the vector store, graph store, label table and entry
//! point together behind the locking discipline used by every operation:
//!
//! - `storage` is held shared by inserts, queries and deletions, and
//!   exclusively by [`HnswIndex::resize`];
//! - each slot owns the locks on its links and its vector;
//! - `labels` serializes slot allocation, tombstoning and slot reuse;
//! - `entry` is held only to read or raise the entry point.
//!
//! All operations take `&self`, so an index can be shared across threads
//! (e.g. behind an `Arc`).

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::delete::LabelTable;
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::{EntryPoint, GraphStore, HnswConfig, LevelGenerator};
use crate::hnsw::parallel;
use crate::hnsw::vectors::VectorStore;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Vector and graph stores, resized together under the structure lock.
#[derive(Debug)]
pub(crate) struct Storage {
    pub(crate) vectors: VectorStore,
    pub(crate) graph: GraphStore,
}

impl Storage {
    pub(crate) fn new(dimension: usize, metric: DistanceMetric, capacity: usize) -> Self {
        Self {
            vectors: VectorStore::new(dimension, metric, capacity),
            graph: GraphStore::new(capacity),
        }
    }

    #[inline]
    pub(crate) fn max_elements(&self) -> usize {
        self.graph.capacity()
    }
}

/// Concurrent in-memory HNSW index over fixed-dimension `f32` vectors.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) config: HnswConfig,
    pub(crate) dimension: usize,
    pub(crate) storage: RwLock<Storage>,
    pub(crate) labels: Mutex<LabelTable>,
    pub(crate) entry: Mutex<EntryPoint>,
    pub(crate) levels: Mutex<LevelGenerator>,
    pub(crate) ef: AtomicUsize,
}

impl HnswIndex {
    /// Creates an empty index with room for `max_elements` vectors of width `dimension`.
    pub fn new(dimension: usize, max_elements: usize, config: HnswConfig) -> Result<Self> {
        if dimension == 0 || dimension > config::MAX_DIMENSION {
            return Err(HnswError::invalid(format!(
                "dimension must be in 1..={}, got {}",
                config::MAX_DIMENSION,
                dimension
            )));
        }
        config.validate()?;
        let multiplier = config.level_multiplier();
        tracing::info!(
            "Created HNSW index (dim={}, max_elements={}, M={}, ef_construction={}, metric={})",
            dimension,
            max_elements,
            config.m,
            config.ef_construction,
            config.metric
        );
        let metric = config.metric;
        Ok(Self::from_parts(
            dimension,
            config,
            Storage::new(dimension, metric, max_elements),
            LabelTable::default(),
            EntryPoint::default(),
            multiplier,
        ))
    }

    pub(crate) fn from_parts(
        dimension: usize,
        config: HnswConfig,
        storage: Storage,
        labels: LabelTable,
        entry: EntryPoint,
        level_multiplier: f64,
    ) -> Self {
        let levels = LevelGenerator::new(config.seed, level_multiplier);
        Self {
            config,
            dimension,
            storage: RwLock::new(storage),
            labels: Mutex::new(labels),
            entry: Mutex::new(entry),
            levels: Mutex::new(levels),
            ef: AtomicUsize::new(config::HNSW_DEFAULT_EF),
        }
    }

    #[inline]
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    #[inline]
    pub fn allow_replace_deleted(&self) -> bool {
        self.config.allow_replace_deleted
    }

    /// Sets the query-time candidate list width. Values below 1 are clamped to 1.
    pub fn set_ef(&self, ef: usize) {
        self.ef.store(ef.max(1), Ordering::Relaxed);
    }

    #[inline]
    pub fn ef(&self) -> usize {
        self.ef.load(Ordering::Relaxed)
    }

    /// Slot capacity.
    pub fn max_elements(&self) -> usize {
        self.storage.read().max_elements()
    }

    /// Number of occupied slots, tombstoned ones included.
    pub fn current_count(&self) -> usize {
        self.labels.lock().count
    }

    /// Number of occupied slots that are not tombstoned.
    pub fn live_count(&self) -> usize {
        let table = self.labels.lock();
        table.count - table.deleted
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.current_count() == 0
    }

    /// Current top layer of the graph.
    pub fn max_layer(&self) -> usize {
        self.entry.lock().max_layer
    }

    /// Grows (or shrinks down to `current_count`) the slot capacity.
    ///
    /// Blocks until in-flight operations finish; slot ids never move.
    pub fn resize(&self, new_max_elements: usize) -> Result<()> {
        let mut storage = self.storage.write();
        let count = self.labels.lock().count;
        if new_max_elements < count {
            return Err(HnswError::invalid(format!(
                "cannot resize to {new_max_elements}: index already holds {count} elements"
            )));
        }
        let old = storage.max_elements();
        storage.vectors.resize(new_max_elements);
        storage.graph.resize(new_max_elements);
        tracing::info!("Resized HNSW index from {} to {} slots", old, new_max_elements);
        Ok(())
    }

    /// Stored vector for `label` (unit-normalized under cosine).
    pub fn get_vector_by_label(&self, label: u64) -> Result<Vec<f32>> {
        let storage = self.storage.read();
        let table = self.labels.lock();
        match table.slots.get(&label) {
            Some(&id) if !storage.vectors.is_deleted(id) => Ok(storage.vectors.get(id)),
            _ => Err(HnswError::LabelNotFound(label)),
        }
    }

    /// Inserts a batch of vectors, fanning rows out over `concurrency` workers
    /// (0 = all cores).
    ///
    /// The batch shape is validated before anything is applied. After that every
    /// row is applied independently: a failing row does not roll back the others,
    /// and the error names the first failing row.
    pub fn add_points<V>(
        &self,
        vectors: &[V],
        labels: &[u64],
        concurrency: usize,
        replace_deleted: bool,
    ) -> Result<()>
    where
        V: AsRef<[f32]> + Sync,
    {
        if vectors.is_empty() {
            return Err(HnswError::invalid("empty vector batch"));
        }
        if vectors.len() != labels.len() {
            return Err(HnswError::invalid(format!(
                "batch has {} vectors but {} labels",
                vectors.len(),
                labels.len()
            )));
        }
        for (row, v) in vectors.iter().enumerate() {
            let v = v.as_ref();
            if v.len() != self.dimension {
                return Err(HnswError::invalid(format!(
                    "row {row}: vector has {} components, index dimension is {}",
                    v.len(),
                    self.dimension
                )));
            }
        }

        let outcomes = parallel::map_rows(vectors.len(), concurrency, |row| {
            self.add_point(vectors[row].as_ref(), labels[row], replace_deleted)
        });

        let mut failures = outcomes
            .into_iter()
            .enumerate()
            .filter_map(|(row, outcome)| outcome.err().map(|e| (row, e)));
        match failures.next() {
            None => Ok(()),
            Some((position, source)) => {
                let failed = 1 + failures.count();
                tracing::warn!("{} of {} batch rows failed to insert", failed, labels.len());
                Err(HnswError::BatchInsert {
                    position,
                    failed,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Runs [`search_knn`](HnswIndex::search_knn) for every query, one result row per query.
    pub fn search_knn_batch<V>(
        &self,
        queries: &[V],
        k: usize,
        concurrency: usize,
    ) -> Result<Vec<Vec<(u64, f32)>>>
    where
        V: AsRef<[f32]> + Sync,
    {
        if queries.is_empty() {
            return Err(HnswError::invalid("empty query batch"));
        }
        parallel::map_rows(queries.len(), concurrency, |row| {
            self.search_knn(queries[row].as_ref(), k)
        })
        .into_iter()
        .collect()
    }

    pub(crate) fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(HnswError::invalid(format!(
                "vector has {} components, index dimension is {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}
