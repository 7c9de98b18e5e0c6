//! HNSW search algorithms: single-layer beam search and multi-layer KNN.
//!
//! Queries walk through tombstoned nodes but keep them out of the result set,
//! so a deleted neighborhood still routes the search toward live nodes.
//! Neighbor lists are copied out under the slot lock, so a search may miss
//! edges added by concurrent inserts.

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::index::{HnswIndex, Storage};
use crate::hnsw::visited::{with_visited, VisitedSet};
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// A candidate during search: (negative distance, slot id).
/// BinaryHeap is a max-heap; we use negative distance for min-heap behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A result entry: (distance, slot id). Max-heap by distance for pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Search a single layer of the HNSW graph.
///
/// Returns up to `ef` `(distance, slot)` pairs ascending by distance, holding
/// only slots for which `accept` returns `true`. Rejected slots are still
/// expanded, and the search does not stop early until `ef` accepted slots are
/// found. `visited` is cleared at the start of the call.
pub(crate) fn search_layer<F>(
    storage: &Storage,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    accept: F,
) -> Vec<(f32, u32)>
where
    F: Fn(u32) -> bool,
{
    visited.clear();
    let ef = ef.max(1);
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst distance; avoids repeated heap peeks in the hot loop
    let mut worst_dist = f32::MAX;
    let mut neighbor_buf: Vec<u32> = Vec::new();

    for &ep in entry_points {
        if visited.insert(ep) {
            let dist = storage.vectors.distance(query, ep);
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                id: ep,
            });
            if accept(ep) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: ep,
                });
                if results.len() > ef {
                    results.pop();
                }
                worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;

        // Closest candidate is farther than the worst result: nothing left can improve it
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        storage
            .graph
            .copy_neighbors_into(candidate.id, layer, &mut neighbor_buf);
        for &neighbor_id in &neighbor_buf {
            if !visited.insert(neighbor_id) {
                continue;
            }

            let dist = storage.vectors.distance(query, neighbor_id);
            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor_id,
                });
                if accept(neighbor_id) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: neighbor_id,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Greedy descent with ef = 1 from `entry` at layer `from` down to layer `to` (inclusive).
/// Returns the closest node found on layer `to`.
pub(crate) fn descend(
    storage: &Storage,
    query: &[f32],
    entry: u32,
    from: usize,
    to: usize,
    visited: &mut VisitedSet,
) -> u32 {
    let mut current = entry;
    if to > from {
        return current;
    }
    for layer in (to..=from).rev() {
        let results = search_layer(
            storage,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            visited,
            |_| true,
        );
        if let Some(&(_, nearest)) = results.first() {
            current = nearest;
        }
    }
    current
}

impl HnswIndex {
    /// Returns up to `k` `(label, distance)` pairs closest to `query`, ascending by distance.
    ///
    /// Tombstoned nodes are never returned. The result can be shorter than `k`
    /// only when fewer than `k` live nodes are reachable.
    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.check_dimension(query)?;
        let storage = self.storage.read();
        let max_elements = storage.max_elements();
        if k == 0 {
            return Err(HnswError::invalid("k must be positive"));
        }
        if k > max_elements {
            return Err(HnswError::invalid(format!(
                "k ({k}) is larger than max_elements ({max_elements})"
            )));
        }
        if self.live_count() == 0 {
            return Err(HnswError::EmptyIndex);
        }
        let entry = *self.entry.lock();
        let entry_point = entry.node.ok_or(HnswError::InvalidGraphState(
            "index holds elements but has no entry point",
        ))?;

        let count = self.current_count();
        let query = self.config.metric.prepare(query);
        let base_ef = self.ef().max(k);
        let max_ef = base_ef * config::SEARCH_MAX_EF_GROWTH;

        let hits = with_visited(max_elements, |visited| {
            let start = if entry.max_layer > 0 {
                descend(&storage, &query, entry_point, entry.max_layer, 1, visited)
            } else {
                entry_point
            };

            let mut ef = base_ef;
            loop {
                let found = search_layer(
                    &storage,
                    &query,
                    std::slice::from_ref(&start),
                    ef,
                    0,
                    visited,
                    |id| !storage.vectors.is_deleted(id),
                );
                // A result set shorter than ef means the reachable graph was exhausted
                let exhausted = found.len() < ef;
                // Tombstones set by a concurrent delete after the walk are dropped here
                let live_hits: Vec<(f32, u32)> = found
                    .into_iter()
                    .filter(|&(_, id)| !storage.vectors.is_deleted(id))
                    .collect();
                if live_hits.len() >= k || exhausted || ef >= max_ef || ef >= count {
                    break live_hits;
                }
                ef = (ef * 2).min(max_ef);
                tracing::debug!(
                    "Widening search to ef={} ({} live hits, k={})",
                    ef,
                    live_hits.len(),
                    k
                );
            }
        });

        Ok(hits
            .into_iter()
            .take(k)
            .map(|(dist, id)| (storage.graph.label(id), dist))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;

    fn build(points: &[[f32; 2]]) -> HnswIndex {
        let config = HnswConfig::default().with_m(4).with_seed(9);
        let index = HnswIndex::new(2, 64, config).unwrap();
        for (i, p) in points.iter().enumerate() {
            index.add_point(p, i as u64, false).unwrap();
        }
        index
    }

    fn grid(n: usize) -> Vec<[f32; 2]> {
        (0..n * n)
            .map(|i| [(i % n) as f32, (i / n) as f32])
            .collect()
    }

    #[test]
    fn test_search_layer_sorted_and_bounded() {
        let index = build(&grid(6));
        let storage = index.storage.read();
        let entry = index.entry.lock().node.unwrap();
        let results = with_visited(64, |visited| {
            search_layer(&storage, &[2.2, 3.1], &[entry], 5, 0, visited, |_| true)
        });
        assert_eq!(results.len(), 5);
        assert!(results.windows(2).all(|w| w[0].0 <= w[1].0));
        // slot 20 holds (2, 3)
        assert_eq!(results[0].1, 20);
    }

    #[test]
    fn test_search_layer_never_repeats() {
        let index = build(&grid(5));
        let storage = index.storage.read();
        let results = with_visited(64, |visited| {
            search_layer(&storage, &[0.0, 0.0], &[0, 0, 1], 25, 0, visited, |_| true)
        });
        let mut ids: Vec<u32> = results.iter().map(|r| r.1).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
    }

    #[test]
    fn test_search_layer_routes_through_rejected_slots() {
        let index = build(&grid(6));
        let storage = index.storage.read();
        // Slots 0..18 are the rows y = 0..=2; start inside them and reject them all
        let results = with_visited(64, |visited| {
            search_layer(&storage, &[0.0, 0.0], &[0], 18, 0, visited, |id| id >= 18)
        });
        assert_eq!(results.len(), 18);
        assert!(results.iter().all(|r| r.1 >= 18), "got {results:?}");
        // The closest accepted slots are on row y = 3, starting at (0, 3)
        assert_eq!(results[0], (9.0, 18));
    }

    #[test]
    fn test_knn_fills_k_around_deleted_cluster() {
        let side = 40usize;
        let config = HnswConfig::default().with_m(4).with_seed(9);
        let index = HnswIndex::new(2, side * side, config).unwrap();
        for (i, p) in grid(side).iter().enumerate() {
            index.add_point(p, i as u64, false).unwrap();
        }
        let in_block = |label: u64| (label as usize % side) < 12 && (label as usize / side) < 12;
        for label in (0..(side * side) as u64).filter(|&l| in_block(l)) {
            index.mark_deleted(label).unwrap();
        }
        assert_eq!(index.deleted_count(), 144);

        index.set_ef(1);
        let hits = index.search_knn(&[0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 10, "got {hits:?}");
        assert!(hits.iter().all(|h| !in_block(h.0)), "got {hits:?}");
        // Every live node lies at squared distance >= 12^2 from the origin
        assert!(hits.iter().all(|h| h.1 >= 144.0), "got {hits:?}");
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_knn_exact_on_small_graph() {
        let index = build(&grid(5));
        index.set_ef(50);
        let hits = index.search_knn(&[4.0, 4.0], 3).unwrap();
        assert_eq!(hits[0], (24, 0.0));
        let labels: Vec<u64> = hits.iter().map(|h| h.0).collect();
        assert!(labels.contains(&19) && labels.contains(&23), "got {labels:?}");
    }

    #[test]
    fn test_knn_validation() {
        let index = build(&grid(2));
        assert!(matches!(
            index.search_knn(&[1.0], 1),
            Err(HnswError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.search_knn(&[1.0, 1.0], 0),
            Err(HnswError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.search_knn(&[1.0, 1.0], 65),
            Err(HnswError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_knn_empty_index() {
        let index = build(&[]);
        assert!(matches!(
            index.search_knn(&[1.0, 1.0], 1),
            Err(HnswError::EmptyIndex)
        ));
        index.add_point(&[0.0, 0.0], 1, false).unwrap();
        index.mark_deleted(1).unwrap();
        assert!(matches!(
            index.search_knn(&[1.0, 1.0], 1),
            Err(HnswError::EmptyIndex)
        ));
    }

    #[test]
    fn test_knn_skips_tombstones() {
        let index = build(&grid(4));
        for label in [0u64, 1, 4, 5] {
            index.mark_deleted(label).unwrap();
        }
        let hits = index.search_knn(&[0.0, 0.0], 4).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| ![0, 1, 4, 5].contains(&h.0)), "got {hits:?}");
    }

    #[test]
    fn test_knn_returns_short_when_mostly_deleted() {
        let index = build(&grid(3));
        for label in 0..8u64 {
            index.mark_deleted(label).unwrap();
        }
        let hits = index.search_knn(&[0.0, 0.0], 5).unwrap();
        assert_eq!(hits, vec![(8, 8.0)]);
    }
}
