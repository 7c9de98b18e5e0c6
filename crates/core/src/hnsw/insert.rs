//! HNSW insertion algorithm.
//!
//! Inserts a vector into the HNSW graph with bidirectional connections and
//! heuristic neighbor pruning (Algorithm 4 from the HNSW paper).
//!
//! Locking: the slot is claimed under the label lock, the graph walk holds no
//! lock beyond the structure read lock, and each back-link takes only the
//! target neighbor's link lock. The metadata lock is taken briefly to read the
//! entry point and again to raise it.

use crate::error::{HnswError, Result};
use crate::hnsw::delete::SlotClaim;
use crate::hnsw::index::{HnswIndex, Storage};
use crate::hnsw::search::{descend, search_layer};
use crate::hnsw::visited::with_visited;

impl HnswIndex {
    /// Insert one vector under `label`.
    ///
    /// With `replace_deleted`, a tombstoned slot (the label's own, else any free
    /// one) is overwritten in place instead of allocating a new slot.
    pub fn add_point(&self, vector: &[f32], label: u64, replace_deleted: bool) -> Result<()> {
        self.check_dimension(vector)?;
        if replace_deleted && !self.config.allow_replace_deleted {
            return Err(HnswError::invalid(
                "replacement of deleted elements is disabled for this index",
            ));
        }
        let vector = self.config.metric.prepare(vector);
        let storage = self.storage.read();

        match self.claim_slot(&storage, &vector, label, replace_deleted)? {
            SlotClaim::Fresh { id, level } => {
                let (entry, top) = {
                    let mut ep = self.entry.lock();
                    match ep.node {
                        Some(node) => (node, ep.max_layer),
                        None => {
                            ep.node = Some(id);
                            ep.max_layer = level;
                            tracing::debug!("Slot {} is the first entry point (level {})", id, level);
                            return Ok(());
                        }
                    }
                };
                self.connect(&storage, id, level, &vector, entry, top)?;
                if level > top {
                    let mut ep = self.entry.lock();
                    if level >= ep.max_layer {
                        tracing::debug!("Entry point raised to slot {} (level {})", id, level);
                        ep.node = Some(id);
                        ep.max_layer = level;
                    }
                }
                Ok(())
            }
            SlotClaim::Reused { id } => {
                let level = storage.graph.level(id);
                let snapshot = *self.entry.lock();
                let entry = snapshot.node.ok_or(HnswError::InvalidGraphState(
                    "occupied slot but no entry point",
                ))?;
                self.connect(&storage, id, level, &vector, entry, snapshot.max_layer)
            }
        }
    }

    /// Builds the outgoing links of slot `id` on layers `0..=min(level, top)` and
    /// links the chosen neighbors back to it.
    ///
    /// Existing links of `id` are still followed while searching and replaced
    /// layer by layer, which is what lets a reused slot be rebuilt from its own
    /// position in the graph.
    fn connect(
        &self,
        storage: &Storage,
        id: u32,
        level: usize,
        vector: &[f32],
        entry: u32,
        top: usize,
    ) -> Result<()> {
        let ef_construction = self.config.ef_construction;

        with_visited(storage.max_elements(), |visited| {
            let mut current = entry;
            if top > level {
                current = descend(storage, vector, entry, top, level + 1, visited);
            }

            let mut layer_eps: Vec<u32> = vec![current];
            for layer in (0..=level.min(top)).rev() {
                let candidates: Vec<(f32, u32)> = search_layer(
                    storage,
                    vector,
                    &layer_eps,
                    ef_construction,
                    layer,
                    visited,
                    |_| true,
                )
                .into_iter()
                .filter(|&(_, cid)| cid != id)
                .collect();

                let cap = self.config.layer_cap(layer);
                let selected = select_neighbors_heuristic(storage, &candidates, cap);
                storage
                    .graph
                    .set_neighbors(id, layer, selected.iter().map(|&(_, n)| n).collect())?;
                for &(_, neighbor) in &selected {
                    link_back(storage, neighbor, id, layer, cap)?;
                }

                // Candidates of this layer seed the search one layer down
                layer_eps.clear();
                layer_eps.extend(candidates.iter().map(|&(_, cid)| cid));
                if layer_eps.is_empty() {
                    layer_eps.push(current);
                }
            }
            Ok(())
        })
    }
}

/// Adds `new_id` to the neighbor list of `neighbor` at `layer`, re-pruning the
/// list with the heuristic when it exceeds `cap`. The new edge is kept only if
/// it survives pruning.
fn link_back(
    storage: &Storage,
    neighbor: u32,
    new_id: u32,
    layer: usize,
    cap: usize,
) -> Result<()> {
    let mut links = storage.graph.write(neighbor);
    let list = links.layers.get_mut(layer).ok_or(HnswError::InvalidGraphState(
        "neighbor selected on a layer above its level",
    ))?;
    if list.contains(&new_id) {
        return Ok(());
    }
    list.push(new_id);
    if list.len() <= cap {
        return Ok(());
    }

    let base = storage.vectors.get(neighbor);
    let candidates: Vec<(f32, u32)> = list
        .iter()
        .map(|&cid| (storage.vectors.distance(&base, cid), cid))
        .collect();
    let pruned = select_neighbors_heuristic(storage, &candidates, cap);
    *list = pruned.iter().map(|&(_, cid)| cid).collect();
    Ok(())
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// Walks candidates nearest-first and admits one only if it is closer to the
/// base node than to every neighbor admitted so far, which spreads links across
/// directions instead of clustering them. If fewer than `m` pass, the rest is
/// filled nearest-first from the rejected candidates.
pub(crate) fn select_neighbors_heuristic(
    storage: &Storage,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.len() <= m {
        return sorted;
    }

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    let mut rejected: Vec<(f32, u32)> = Vec::new();
    let mut cid_buf: Vec<f32> = Vec::new();

    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }

        storage.vectors.copy_into(cid, &mut cid_buf);
        let is_diverse = selected.iter().all(|&(_, sid)| {
            let dist_to_selected = storage.vectors.distance(&cid_buf, sid);
            dist_to_base <= dist_to_selected
        });

        if is_diverse {
            selected.push((dist_to_base, cid));
        } else {
            rejected.push((dist_to_base, cid));
        }
    }

    // Rejected candidates are already nearest-first
    for &entry in &rejected {
        if selected.len() >= m {
            break;
        }
        selected.push(entry);
    }
    selected.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    selected
}
