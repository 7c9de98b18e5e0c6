//! Soft deletion and slot reuse.
//!
//! Deleting a label only tombstones its slot: the node stays in every neighbor
//! list and keeps guiding traversal, but queries drop it from their results.
//! When the index allows replacement, tombstoned slots are queued in
//! `free_slots` and inserts that ask for replacement take them over in place.
//!
//! Incoming edges of a reused slot are not rewritten. Nodes that linked to the
//! old vector now link to the new one at the same slot id.

use crate::error::{HnswError, Result};
use crate::hnsw::index::{HnswIndex, Storage};
use std::collections::{BTreeSet, HashMap};

/// Label ↔ slot bookkeeping, guarded by the index label lock.
#[derive(Debug, Default)]
pub(crate) struct LabelTable {
    /// Label → slot id. Slot → label lives in the slot's links.
    pub(crate) slots: HashMap<u64, u32>,
    /// Tombstoned slots available for reuse (only when replacement is allowed).
    pub(crate) free_slots: BTreeSet<u32>,
    /// Occupied slots, tombstoned ones included. Slots `0..count` are occupied.
    pub(crate) count: usize,
    /// Tombstoned slots.
    pub(crate) deleted: usize,
}

/// Slot handed to the insertion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotClaim {
    /// Freshly allocated slot with a newly drawn level.
    Fresh { id: u32, level: usize },
    /// Tombstoned slot taken over in place; keeps its level.
    Reused { id: u32 },
}

impl HnswIndex {
    /// Picks the slot for an insert and writes the vector and label into it.
    ///
    /// Runs entirely under the label lock, so the slot is fully owned by the
    /// caller when this returns. The slot is not yet linked into the graph.
    pub(crate) fn claim_slot(
        &self,
        storage: &Storage,
        vector: &[f32],
        label: u64,
        replace_deleted: bool,
    ) -> Result<SlotClaim> {
        let mut table = self.labels.lock();

        if let Some(&id) = table.slots.get(&label) {
            if !(replace_deleted && storage.vectors.is_deleted(id)) {
                return Err(HnswError::DuplicateLabel(label));
            }
            table.free_slots.remove(&id);
            table.deleted -= 1;
            storage.vectors.set(id, vector);
            storage.vectors.set_deleted(id, false);
            tracing::debug!("Label {} revived in place at slot {}", label, id);
            return Ok(SlotClaim::Reused { id });
        }

        if replace_deleted {
            if let Some(id) = table.free_slots.pop_first() {
                let previous = storage.graph.label(id);
                table.slots.remove(&previous);
                table.slots.insert(label, id);
                table.deleted -= 1;
                storage.vectors.set(id, vector);
                storage.graph.set_label(id, label);
                storage.vectors.set_deleted(id, false);
                tracing::debug!(
                    "Label {} reuses slot {} (previously label {})",
                    label,
                    id,
                    previous
                );
                return Ok(SlotClaim::Reused { id });
            }
        }

        let max_elements = storage.max_elements();
        if table.count >= max_elements {
            return Err(HnswError::CapacityExceeded { max_elements });
        }
        let id = u32::try_from(table.count)
            .map_err(|_| HnswError::invalid("slot ids are limited to u32"))?;
        let level = self.levels.lock().next_level();
        table.count += 1;
        table.slots.insert(label, id);
        storage.vectors.set(id, vector);
        storage.vectors.set_deleted(id, false);
        storage.graph.init_node(id, label, level);
        Ok(SlotClaim::Fresh { id, level })
    }

    /// Tombstones `label`. The node stays in the graph but is no longer returned by queries.
    pub fn mark_deleted(&self, label: u64) -> Result<()> {
        let storage = self.storage.read();
        let mut table = self.labels.lock();
        let id = *table
            .slots
            .get(&label)
            .ok_or(HnswError::LabelNotFound(label))?;
        if storage.vectors.is_deleted(id) {
            return Err(HnswError::invalid(format!("label {label} is already deleted")));
        }
        storage.vectors.set_deleted(id, true);
        table.deleted += 1;
        if self.config.allow_replace_deleted {
            table.free_slots.insert(id);
        }
        Ok(())
    }

    /// Clears the tombstone of `label`, making it visible to queries again.
    pub fn unmark_deleted(&self, label: u64) -> Result<()> {
        let storage = self.storage.read();
        let mut table = self.labels.lock();
        let id = *table
            .slots
            .get(&label)
            .ok_or(HnswError::LabelNotFound(label))?;
        if !storage.vectors.is_deleted(id) {
            return Err(HnswError::invalid(format!("label {label} is not deleted")));
        }
        storage.vectors.set_deleted(id, false);
        table.deleted -= 1;
        table.free_slots.remove(&id);
        Ok(())
    }

    /// Returns whether `label` is tombstoned.
    pub fn is_deleted(&self, label: u64) -> Result<bool> {
        let storage = self.storage.read();
        let table = self.labels.lock();
        let id = *table
            .slots
            .get(&label)
            .ok_or(HnswError::LabelNotFound(label))?;
        Ok(storage.vectors.is_deleted(id))
    }

    /// Number of tombstoned slots.
    pub fn deleted_count(&self) -> usize {
        self.labels.lock().deleted
    }
}
