/// CPU graphics device (no GPU required)
///
/// Stores buffers and textures in host memory and rasterizes the identifier
/// pass in software. Used by unit and integration tests and by headless
/// hosts that need intersection queries without a GPU backend.

use std::sync::{Arc, Mutex, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graphics_device::{
    GraphicsDevice, Buffer, Texture, BufferDesc, TextureDesc, TextureInfo,
    TextureFormat, FilterMode, IdDraw, IdPassView,
};
use crate::intersection::PackedId;

/// Identity of an allocation behind an `Arc`, independent of the trait object
fn address_of<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

// ============================================================================
// Mock Buffer
// ============================================================================

#[derive(Debug)]
pub struct MockBuffer {
    desc: BufferDesc,
    data: Mutex<Vec<u8>>,
    write_count: AtomicUsize,
}

impl MockBuffer {
    pub fn new(desc: BufferDesc) -> Self {
        Self {
            data: Mutex::new(vec![0u8; desc.size as usize]),
            desc,
            write_count: AtomicUsize::new(0),
        }
    }

    /// Number of `update` calls that reached this buffer
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Copy of the full contents
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.lock_data()?.clone())
    }

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.data
            .lock()
            .map_err(|_| Error::BackendError("MockBuffer lock poisoned".to_string()))
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        if offset + len as u64 > self.desc.size {
            return Err(Error::BackendError(format!(
                "range {}..{} exceeds buffer size {}",
                offset,
                offset + len as u64,
                self.desc.size
            )));
        }
        Ok(())
    }
}

impl Buffer for MockBuffer {
    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        let start = offset as usize;
        self.lock_data()?[start..start + data.len()].copy_from_slice(data);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_range(offset, out.len())?;
        let start = offset as usize;
        out.copy_from_slice(&self.lock_data()?[start..start + out.len()]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.desc.size
    }
}

// ============================================================================
// Mock Texture
// ============================================================================

#[derive(Debug)]
pub struct MockTexture {
    info: TextureInfo,
    pixels: Mutex<Vec<u32>>,
}

impl MockTexture {
    pub fn new(desc: &TextureDesc) -> Self {
        let info = TextureInfo {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            usage: desc.usage,
            filter: desc.filter,
        };
        Self {
            pixels: Mutex::new(vec![0u32; info.pixel_count()]),
            info,
        }
    }

    /// Copy of the pixel values, row-major
    pub fn pixels(&self) -> Result<Vec<u32>> {
        Ok(self.lock_pixels()?.clone())
    }

    fn lock_pixels(&self) -> Result<std::sync::MutexGuard<'_, Vec<u32>>> {
        self.pixels
            .lock()
            .map_err(|_| Error::BackendError("MockTexture lock poisoned".to_string()))
    }
}

impl Texture for MockTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }
}

// ============================================================================
// Mock GraphicsDevice
// ============================================================================

/// Counters for the work a `MockGraphicsDevice` performed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockDeviceStats {
    pub buffers_created: usize,
    pub textures_created: usize,
    pub id_passes: usize,
    pub blits: usize,
    pub texture_copies: usize,
}

#[derive(Default)]
pub struct MockGraphicsDevice {
    buffers: FxHashMap<usize, Weak<MockBuffer>>,
    textures: FxHashMap<usize, Weak<MockTexture>>,
    stats: MockDeviceStats,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MockDeviceStats {
        self.stats
    }

    /// Resolve a buffer created by this device
    pub fn mock_buffer(&self, buffer: &Arc<dyn Buffer>) -> Result<Arc<MockBuffer>> {
        self.buffers
            .get(&address_of(buffer))
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::InvalidResource("buffer not created by this device".to_string()))
    }

    /// Resolve a texture created by this device
    pub fn mock_texture(&self, texture: &Arc<dyn Texture>) -> Result<Arc<MockTexture>> {
        self.textures
            .get(&address_of(texture))
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::InvalidResource("texture not created by this device".to_string()))
    }

    fn rasterize(
        &self,
        target: &mut [u32],
        width: u32,
        height: u32,
        view: &IdPassView,
        draw: &IdDraw,
    ) -> Result<()> {
        let position_bytes = self.mock_buffer(&draw.positions)?.bytes()?;
        let index_bytes = self.mock_buffer(&draw.indices)?.bytes()?;

        let position_len = position_bytes.len() / 12;
        let mut positions = vec![Vec3::ZERO; position_len];
        bytemuck::cast_slice_mut::<Vec3, u8>(&mut positions)
            .copy_from_slice(&position_bytes[..position_len * 12]);
        let index_len = index_bytes.len() / 4;
        let mut indices = vec![0u32; index_len];
        bytemuck::cast_slice_mut::<u32, u8>(&mut indices)
            .copy_from_slice(&index_bytes[..index_len * 4]);

        let index_count = draw.index_count as usize;
        if index_count > indices.len() {
            return Err(Error::BackendError(format!(
                "draw of {} indices exceeds index buffer ({})",
                index_count,
                indices.len()
            )));
        }

        let mvp = view.view_projection * draw.transform;
        let to_ndc = |i: u32| -> Result<Vec3> {
            let p = positions.get(i as usize).ok_or_else(|| {
                Error::BackendError(format!("index {} out of vertex range {}", i, positions.len()))
            })?;
            let clip = mvp * p.extend(1.0);
            Ok(clip.truncate() / clip.w)
        };

        let (w, h) = (width as f32, height as f32);
        for (tri, corners) in indices[..index_count].chunks_exact(3).enumerate() {
            let a = to_ndc(corners[0])?;
            let b = to_ndc(corners[1])?;
            let c = to_ndc(corners[2])?;

            let area = edge(a, b, c);
            if area.abs() < 1e-12 {
                continue;
            }

            // pixel-space bounds of the triangle
            let xs = [a.x, b.x, c.x].map(|x| (x * 0.5 + 0.5) * w);
            let ys = [a.y, b.y, c.y].map(|y| (0.5 - y * 0.5) * h);
            let x0 = xs.iter().cloned().fold(f32::MAX, f32::min).floor().max(0.0) as u32;
            let x1 = xs.iter().cloned().fold(f32::MIN, f32::max).ceil().min(w) as u32;
            let y0 = ys.iter().cloned().fold(f32::MAX, f32::min).floor().max(0.0) as u32;
            let y1 = ys.iter().cloned().fold(f32::MIN, f32::max).ceil().min(h) as u32;

            let value = PackedId::from_triangle(draw.container_id, tri as u32).pack();
            for y in y0..y1 {
                for x in x0..x1 {
                    let p = Vec3::new(
                        (x as f32 + 0.5) / w * 2.0 - 1.0,
                        1.0 - (y as f32 + 0.5) / h * 2.0,
                        0.0,
                    );
                    let w0 = edge(b, c, p) / area;
                    let w1 = edge(c, a, p) / area;
                    let w2 = edge(a, b, p) / area;
                    if w0 < -EDGE_EPSILON || w1 < -EDGE_EPSILON || w2 < -EDGE_EPSILON {
                        continue;
                    }
                    let depth = w0 * a.z + w1 * b.z + w2 * c.z;
                    if !(0.0..=1.0).contains(&depth) {
                        continue;
                    }
                    target[(y * width + x) as usize] = value;
                }
            }
        }
        Ok(())
    }
}

/// Pixel centers this close to a shared edge are covered by both triangles
const EDGE_EPSILON: f32 = 1e-5;

/// Twice the signed area of (a, b, p) in the xy plane
fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

impl GraphicsDevice for MockGraphicsDevice {
    fn create_buffer(&mut self, desc: BufferDesc) -> Result<Arc<dyn Buffer>> {
        let buffer = Arc::new(MockBuffer::new(desc));
        self.buffers.retain(|_, weak| weak.strong_count() > 0);
        self.buffers.insert(address_of(&buffer), Arc::downgrade(&buffer));
        self.stats.buffers_created += 1;
        Ok(buffer)
    }

    fn create_texture(&mut self, desc: TextureDesc) -> Result<Arc<dyn Texture>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidResource(format!(
                "texture size {}x{} is empty",
                desc.width, desc.height
            )));
        }
        let texture = Arc::new(MockTexture::new(&desc));
        self.textures.retain(|_, weak| weak.strong_count() > 0);
        self.textures.insert(address_of(&texture), Arc::downgrade(&texture));
        self.stats.textures_created += 1;
        Ok(texture)
    }

    fn render_id_pass(
        &mut self,
        target: &Arc<dyn Texture>,
        view: &IdPassView,
        draws: &[IdDraw],
    ) -> Result<()> {
        let texture = self.mock_texture(target)?;
        let info = texture.info().clone();
        if info.format != TextureFormat::R32_UINT {
            return Err(Error::InvalidResource(format!(
                "identifier pass needs R32_UINT, got {:?}",
                info.format
            )));
        }

        let mut pixels = vec![0u32; info.pixel_count()];
        for draw in draws {
            self.rasterize(&mut pixels, info.width, info.height, view, draw)?;
        }
        *texture.lock_pixels()? = pixels;
        self.stats.id_passes += 1;
        Ok(())
    }

    fn blit(&mut self, src: &Arc<dyn Texture>, dst: &Arc<dyn Texture>, filter: FilterMode) -> Result<()> {
        let src = self.mock_texture(src)?;
        let dst = self.mock_texture(dst)?;
        if filter != FilterMode::Nearest && src.info().format == TextureFormat::R32_UINT {
            return Err(Error::BackendError(
                "integer textures only support nearest filtering".to_string(),
            ));
        }

        let (sw, sh) = (src.info().width, src.info().height);
        let (dw, dh) = (dst.info().width, dst.info().height);
        let source = src.pixels()?;
        let mut out = vec![0u32; dst.info().pixel_count()];
        for y in 0..dh {
            let sy = ((y as f32 + 0.5) * sh as f32 / dh as f32) as u32;
            for x in 0..dw {
                let sx = ((x as f32 + 0.5) * sw as f32 / dw as f32) as u32;
                out[(y * dw + x) as usize] = source[(sy.min(sh - 1) * sw + sx.min(sw - 1)) as usize];
            }
        }
        *dst.lock_pixels()? = out;
        self.stats.blits += 1;
        Ok(())
    }

    fn copy_texture_to_buffer(&mut self, src: &Arc<dyn Texture>, dst: &Arc<dyn Buffer>) -> Result<()> {
        let pixels = self.mock_texture(src)?.pixels()?;
        dst.update(0, bytemuck::cast_slice(&pixels))?;
        self.stats.texture_copies += 1;
        Ok(())
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
