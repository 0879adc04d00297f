/// Ordered list of batches sharing one material
///
/// The pool only records which batches belong to it, oldest first. The
/// batches themselves live in the manager's id map so that any subset handle
/// can be resolved without knowing its material.

use rustc_hash::FxHashMap;

use crate::batch::{Batch, BatchId, MaterialId};
use crate::error::Result;

pub struct BatchPool {
    material: MaterialId,
    name: String,
    batches: Vec<BatchId>,
}

impl BatchPool {
    pub fn new(material: MaterialId, name: impl Into<String>) -> Self {
        Self { material, name: name.into(), batches: Vec::new() }
    }

    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Batch ids, oldest first
    pub fn batch_ids(&self) -> &[BatchId] {
        &self.batches
    }

    /// The batch new subsets go to
    pub fn newest(&self) -> Option<BatchId> {
        self.batches.last().copied()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub(crate) fn push(&mut self, id: BatchId) {
        self.batches.push(id);
    }

    /// Destroy every batch without subsets, except the newest
    ///
    /// Returns the number of batches destroyed.
    pub fn trim_batches(&mut self, batches: &mut FxHashMap<BatchId, Batch>) -> usize {
        let Some(newest) = self.newest() else {
            return 0;
        };
        let before = self.batches.len();
        self.batches.retain(|id| {
            let empty = batches.get(id).is_none_or(|b| b.subset_count() == 0);
            if *id != newest && empty {
                batches.remove(id);
                false
            } else {
                true
            }
        });

        let removed = before - self.batches.len();
        if removed > 0 {
            crate::engine_debug!(
                "batching::BatchPool",
                "pool '{}' trimmed {} empty batches",
                self.name, removed
            );
        }
        removed
    }

    /// Release CPU geometry of batches idle for more than `idle_ticks`
    ///
    /// The newest `keep_mutable` batches stay resident. A batch stamped in the
    /// future (the clock moved backwards) is re-uploaded instead, which
    /// restamps it. Returns the number of batches released.
    pub fn apply_residency_policy(
        &self,
        batches: &mut FxHashMap<BatchId, Batch>,
        now: i64,
        keep_mutable: usize,
        idle_ticks: i64,
    ) -> Result<usize> {
        let candidates = self.batches.len().saturating_sub(keep_mutable);
        let mut released = 0;

        for id in &self.batches[..candidates] {
            let Some(batch) = batches.get_mut(id) else {
                continue;
            };
            if !batch.is_resident() {
                continue;
            }

            let delta = now - batch.last_mesh_update();
            if delta < 0 {
                crate::engine_warn!(
                    "batching::BatchPool",
                    "batch {} was updated at {} but the clock reads {}, resyncing",
                    id, batch.last_mesh_update(), now
                );
                batch.force_resync()?;
            } else if delta > idle_ticks {
                batch.clear_cached_geometry()?;
                released += 1;
            }
        }
        Ok(released)
    }

    /// Sync every batch's pending edits to the GPU
    pub fn flush_all(&self, batches: &mut FxHashMap<BatchId, Batch>) -> Result<()> {
        for id in &self.batches {
            if let Some(batch) = batches.get_mut(id) {
                batch.flush()?;
            }
        }
        Ok(())
    }

    /// Destroy every batch of this pool
    pub fn destroy(&mut self, batches: &mut FxHashMap<BatchId, Batch>) {
        for id in self.batches.drain(..) {
            batches.remove(&id);
        }
    }
}

#[cfg(test)]
#[path = "batch_pool_tests.rs"]
mod tests;
