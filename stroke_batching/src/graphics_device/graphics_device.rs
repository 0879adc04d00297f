/// GraphicsDevice trait - the seam between the batching engine and a GPU backend

use std::sync::{Arc, Mutex, MutexGuard};
use glam::Mat4;

use crate::error::{Error, Result};
use crate::graphics_device::{Buffer, BufferDesc, FilterMode, Texture, TextureDesc};

// ============================================================================
// Identifier pass types
// ============================================================================

/// One indexed draw of the identifier pass
///
/// Every covered pixel receives `(container_id << 16) | (triangle & 0xffff)`,
/// where `triangle` is the index position of the triangle's first index
/// divided by three.
#[derive(Clone)]
pub struct IdDraw {
    /// Batch id or widget id written to the high 16 bits
    pub container_id: u16,
    /// Tightly packed `[f32; 3]` positions
    pub positions: Arc<dyn Buffer>,
    /// `u32` triangle indices
    pub indices: Arc<dyn Buffer>,
    /// Number of indices to draw (multiple of 3)
    pub index_count: u32,
    /// Local to world transform
    pub transform: Mat4,
}

/// Camera used for the identifier pass
#[derive(Debug, Clone, Copy)]
pub struct IdPassView {
    /// World to clip space (depth mapped to 0..1)
    pub view_projection: Mat4,
}

// ============================================================================
// GraphicsDevice trait
// ============================================================================

/// Backend interface used by batches (buffer uploads) and the intersector
/// (identifier pass, downsample, readback).
pub trait GraphicsDevice: Send + Sync {
    /// Create a buffer
    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Create a texture
    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn Texture>>;

    /// Clear `target` to 0 and rasterize `draws` with their identifiers
    fn render_id_pass(
        &mut self,
        target: &Arc<dyn Texture>,
        view: &IdPassView,
        draws: &[IdDraw],
    ) -> Result<()>;

    /// Resample `src` into `dst`
    fn blit(&mut self, src: &Arc<dyn Texture>, dst: &Arc<dyn Texture>, filter: FilterMode) -> Result<()>;

    /// Copy every pixel of `src` into `dst` starting at byte 0
    fn copy_texture_to_buffer(&mut self, src: &Arc<dyn Texture>, dst: &Arc<dyn Buffer>) -> Result<()>;
}

/// Shared handle to a graphics device
pub type SharedDevice = Arc<Mutex<dyn GraphicsDevice>>;

/// Lock a shared device, mapping poisoning to `BackendError`
pub(crate) fn lock_device(device: &SharedDevice) -> Result<MutexGuard<'_, dyn GraphicsDevice + 'static>> {
    device
        .lock()
        .map_err(|_| Error::BackendError("Graphics device lock poisoned".to_string()))
}
