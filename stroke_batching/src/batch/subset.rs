/// A contiguous range of vertices and indices inside one batch

use slotmap::new_key_type;

use crate::batch::BatchId;
use crate::geometry::AABB;

new_key_type! {
    /// Stable key of a subset within its batch
    pub struct SubsetKey;
}

/// Non-owning reference to a subset
///
/// Becomes stale when the subset is removed or its batch is destroyed;
/// lookups through the manager then return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubsetHandle {
    pub batch: BatchId,
    pub key: SubsetKey,
}

#[derive(Debug, Clone)]
pub struct Subset {
    pub(crate) bounds: AABB,
    pub(crate) start_vertex: u32,
    pub(crate) vertex_count: u32,
    /// Always a multiple of 3
    pub(crate) start_index: u32,
    pub(crate) index_count: u32,
    pub(crate) active: bool,
    /// Saved indices while disabled; allocated on first disable and reused
    pub(crate) index_backup: Option<Vec<u32>>,
}

impl Subset {
    /// Bounds in batch-local space
    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    pub fn start_vertex(&self) -> u32 {
        self.start_vertex
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn end_vertex(&self) -> u32 {
        self.start_vertex + self.vertex_count
    }

    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn end_index(&self) -> u32 {
        self.start_index + self.index_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether index position `index` falls inside this subset
    pub fn contains_index(&self, index: u32) -> bool {
        index >= self.start_index && index < self.end_index()
    }
}
