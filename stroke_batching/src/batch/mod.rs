/// Batch module - subsets, batches, pools and the manager that owns them

pub mod batch_id;
pub mod material;
pub mod host;
pub mod subset;
pub mod batch;
pub mod batch_pool;
pub mod batch_manager;

pub use batch_id::{BatchId, BatchIdAllocator, FrameClock};
pub use material::{MaterialId, MaterialInfo, MaterialCatalog, SimpleMaterialCatalog};
pub use host::{LayerMask, SceneParent, HighlightSink};
pub use subset::{Subset, SubsetKey, SubsetHandle};
pub use batch::Batch;
pub use batch_pool::BatchPool;
pub use batch_manager::BatchManager;
