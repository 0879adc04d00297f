/*!
# Stroke Batching

Batching engine for brush-stroke geometry, plus GPU intersection queries.

Many small strokes sharing a material are packed into a few large GPU buffers
("batches"). Each stroke is a subset of a batch: a contiguous vertex/index
range that can be hidden, restored or removed without re-uploading its
neighbours. Edits are coalesced into at most one upload per batch per tick.

## Architecture

- **BatchManager**: material -> pool, id -> batch, per-tick maintenance
- **BatchPool**: ordered batches of one material; trimming and residency policy
- **Batch**: CPU geometry, GPU mesh and the ordered subsets inside it
- **GpuIntersector**: sphere queries rendered as an identifier pass and read
  back one tick later
- **GraphicsDevice**: backend trait; `MockGraphicsDevice` runs it on the CPU
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod config;
pub mod graphics_device;
pub mod geometry;
pub mod batch;
pub mod intersection;

// Main batching namespace module
pub mod batching {
    // Error types
    pub use crate::error::{Error, Result};

    // Process-wide state
    pub use crate::engine::Engine;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    pub use crate::config::{BatchConfig, IntersectionConfig};

    pub use crate::batch::{
        Batch, BatchId, BatchIdAllocator, BatchManager, BatchPool, FrameClock, HighlightSink,
        LayerMask, MaterialCatalog, MaterialId, MaterialInfo, SceneParent, SimpleMaterialCatalog,
        Subset, SubsetHandle, SubsetKey,
    };

    pub use crate::geometry::{AABB, GeometryDesc, GeometryStore, GpuMesh, TexcoordSize, Vertex, VertexLayout};

    pub use crate::intersection::{
        FutureState, GpuIntersector, IntersectionFuture, IntersectionHit, PackedId, RequestKind,
        SimpleWidgetRegistry, TriangleHit, WidgetHandle, WidgetRegistry,
    };

    // Device sub-module
    pub mod device {
        pub use crate::graphics_device::*;
    }
}

// Re-export math library at crate root
pub use glam;
