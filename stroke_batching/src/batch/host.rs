/// Host-side collaborators: scene parent, layers and the highlight subsystem

use bitflags::bitflags;
use glam::Mat4;

use crate::batch::BatchId;
use crate::geometry::GpuMesh;

bitflags! {
    /// Render layers; intersection requests filter batches and widgets by mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerMask: u32 {
        const DEFAULT = 1 << 0;
        const WIDGETS = 1 << 1;
        const ALL = u32::MAX;
    }
}

impl LayerMask {
    /// Mask with only layer `index` set
    pub fn layer(index: u32) -> Self {
        LayerMask::from_bits_retain(1u32 << (index & 31))
    }
}

/// Scene node every batch of a manager is parented under
#[derive(Debug, Clone, Copy)]
pub struct SceneParent {
    /// Local to world transform of the batches
    pub transform: Mat4,
    pub layer: LayerMask,
}

impl Default for SceneParent {
    fn default() -> Self {
        Self { transform: Mat4::IDENTITY, layer: LayerMask::DEFAULT }
    }
}

/// Receives batch meshes for selection highlighting
pub trait HighlightSink {
    fn register(&mut self, batch: BatchId, mesh: &GpuMesh);
}
