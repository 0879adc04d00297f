/// GPU copy of a batch's geometry
///
/// One device buffer per enabled attribute plus a `u32` index buffer.
/// Buffers are recreated with power-of-two capacity when the data outgrows
/// them. A mesh never has zero vertices on the GPU: when the source is empty
/// a single placeholder vertex at the origin is uploaded instead.

use std::sync::Arc;
use glam::{Vec2, Vec3, Vec4};

use crate::error::Result;
use crate::geometry::{AABB, GeometryStore, TexcoordSize, VertexLayout};
use crate::graphics_device::{lock_device, Buffer, BufferDesc, BufferFormat, BufferUsage, SharedDevice};

#[derive(Clone)]
pub struct GpuMesh {
    device: SharedDevice,
    layout: VertexLayout,
    positions: Arc<dyn Buffer>,
    normals: Option<Arc<dyn Buffer>>,
    texcoords: Option<Arc<dyn Buffer>>,
    colors: Option<Arc<dyn Buffer>>,
    tangents: Option<Arc<dyn Buffer>>,
    indices: Arc<dyn Buffer>,
    vertex_capacity: u32,
    index_capacity: u32,
    /// Vertices uploaded from the store (0 while only the placeholder exists)
    vertex_count: u32,
    index_count: u32,
    bounds: AABB,
}

impl GpuMesh {
    /// Mesh holding only the placeholder vertex
    pub fn new(device: SharedDevice, layout: VertexLayout, bounds: AABB) -> Result<Self> {
        let positions = create_stream(&device, BufferFormat::R32G32B32_SFLOAT, 1)?;
        let indices = create_index_buffer(&device, 3)?;
        let mut mesh = Self {
            device,
            layout,
            positions,
            normals: None,
            texcoords: None,
            colors: None,
            tangents: None,
            indices,
            vertex_capacity: 1,
            index_capacity: 3,
            vertex_count: 0,
            index_count: 0,
            bounds,
        };
        mesh.recreate_vertex_streams(1)?;
        mesh.positions.update(0, bytemuck::bytes_of(&Vec3::ZERO))?;
        Ok(mesh)
    }

    /// Standalone mesh holding a copy of `store`
    pub fn from_store(device: SharedDevice, store: &GeometryStore) -> Result<Self> {
        let layout = store.layout().unwrap_or_default();
        let mut mesh = Self::new(device, layout, AABB::from_points(store.positions()))?;
        mesh.upload_all(store)?;
        Ok(mesh)
    }

    // ===== ACCESSORS =====

    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    /// Vertices uploaded from the store
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Vertices the GPU actually holds, counting the placeholder
    pub fn gpu_vertex_count(&self) -> u32 {
        self.vertex_count.max(1)
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: AABB) {
        self.bounds = bounds;
    }

    pub fn positions(&self) -> &Arc<dyn Buffer> {
        &self.positions
    }

    pub fn normals(&self) -> Option<&Arc<dyn Buffer>> {
        self.normals.as_ref()
    }

    pub fn texcoords(&self) -> Option<&Arc<dyn Buffer>> {
        self.texcoords.as_ref()
    }

    pub fn colors(&self) -> Option<&Arc<dyn Buffer>> {
        self.colors.as_ref()
    }

    pub fn tangents(&self) -> Option<&Arc<dyn Buffer>> {
        self.tangents.as_ref()
    }

    pub fn indices(&self) -> &Arc<dyn Buffer> {
        &self.indices
    }

    // ===== UPLOAD =====

    /// Upload every attribute and the indices of `store`
    pub fn upload_all(&mut self, store: &GeometryStore) -> Result<()> {
        require_resident(store)?;
        let layout = store.layout().unwrap_or(self.layout);
        let count = store.vertex_count();
        if layout != self.layout || count > self.vertex_capacity {
            self.layout = layout;
            self.recreate_vertex_streams(count.max(1))?;
        }

        if count == 0 {
            self.positions.update(0, bytemuck::bytes_of(&Vec3::ZERO))?;
        } else {
            self.positions.update(0, bytemuck::cast_slice(store.positions()))?;
            if let Some(buffer) = &self.normals {
                buffer.update(0, bytemuck::cast_slice(store.normals()))?;
            }
            if let Some(buffer) = &self.texcoords {
                match layout.texcoord0 {
                    TexcoordSize::Two => {
                        let packed: Vec<Vec2> = store.texcoords().iter().map(|t| t.truncate()).collect();
                        buffer.update(0, bytemuck::cast_slice(&packed))?;
                    }
                    _ => buffer.update(0, bytemuck::cast_slice(store.texcoords()))?,
                }
            }
            if let Some(buffer) = &self.colors {
                buffer.update(0, bytemuck::cast_slice(store.colors()))?;
            }
            if let Some(buffer) = &self.tangents {
                buffer.update(0, bytemuck::cast_slice(store.tangents()))?;
            }
        }
        self.vertex_count = count;

        self.upload_indices(store)
    }

    /// Upload only the index array of `store`
    pub fn upload_indices(&mut self, store: &GeometryStore) -> Result<()> {
        require_resident(store)?;
        let count = store.index_count();
        if count > self.index_capacity {
            let capacity = count.next_power_of_two();
            self.indices = create_index_buffer(&self.device, capacity)?;
            self.index_capacity = capacity;
        }
        if count > 0 {
            self.indices.update(0, bytemuck::cast_slice(store.indices()))?;
        }
        self.index_count = count;
        crate::engine_trace!("batching::GpuMesh", "uploaded {} indices", count);
        Ok(())
    }

    // ===== READBACK =====

    /// Read the uploaded data back into a resident store
    pub fn download(&self) -> Result<GeometryStore> {
        let n = self.vertex_count as usize;
        let mut store = GeometryStore::with_layout(self.layout);

        store.positions = read_stream(&self.positions, n, Vec3::ZERO)?;
        if let Some(buffer) = &self.normals {
            store.normals = read_stream(buffer, n, Vec3::ZERO)?;
        }
        if let Some(buffer) = &self.texcoords {
            store.texcoords = match self.layout.texcoord0 {
                TexcoordSize::Two => read_stream(buffer, n, Vec2::ZERO)?
                    .into_iter()
                    .map(|t| t.extend(0.0))
                    .collect(),
                _ => read_stream(buffer, n, Vec3::ZERO)?,
            };
        }
        if let Some(buffer) = &self.colors {
            store.colors = read_stream(buffer, n, [0u8; 4])?;
        }
        if let Some(buffer) = &self.tangents {
            store.tangents = read_stream(buffer, n, Vec4::ZERO)?;
        }
        store.indices = read_stream(&self.indices, self.index_count as usize, 0u32)?;
        Ok(store)
    }

    fn recreate_vertex_streams(&mut self, vertices: u32) -> Result<()> {
        let capacity = vertices.next_power_of_two();
        let layout = self.layout;
        let device = &self.device;
        let optional = |enabled: bool, format: BufferFormat| -> Result<Option<Arc<dyn Buffer>>> {
            if enabled {
                Ok(Some(create_stream(device, format, capacity)?))
            } else {
                Ok(None)
            }
        };

        let texcoord_format = match layout.texcoord0 {
            TexcoordSize::Three => BufferFormat::R32G32B32_SFLOAT,
            _ => BufferFormat::R32G32_SFLOAT,
        };
        self.positions = create_stream(device, BufferFormat::R32G32B32_SFLOAT, capacity)?;
        self.normals = optional(layout.normals, BufferFormat::R32G32B32_SFLOAT)?;
        self.texcoords = optional(layout.has_texcoords(), texcoord_format)?;
        self.colors = optional(layout.colors, BufferFormat::R8G8B8A8_UNORM)?;
        self.tangents = optional(layout.tangents, BufferFormat::R32G32B32A32_SFLOAT)?;
        self.vertex_capacity = capacity;

        crate::engine_trace!("batching::GpuMesh", "vertex streams sized for {} vertices", capacity);
        Ok(())
    }
}

fn require_resident(store: &GeometryStore) -> Result<()> {
    if !store.is_resident() {
        crate::engine_bail!("batching::GpuMesh", NotResident, "cannot upload from released geometry");
    }
    Ok(())
}

fn create_stream(device: &SharedDevice, format: BufferFormat, count: u32) -> Result<Arc<dyn Buffer>> {
    lock_device(device)?.create_buffer(BufferDesc {
        size: format.size_bytes() as u64 * count as u64,
        usage: BufferUsage::Vertex,
    })
}

fn create_index_buffer(device: &SharedDevice, count: u32) -> Result<Arc<dyn Buffer>> {
    lock_device(device)?.create_buffer(BufferDesc {
        size: BufferFormat::R32_UINT.size_bytes() as u64 * count as u64,
        usage: BufferUsage::Index,
    })
}

fn read_stream<T: bytemuck::Pod>(buffer: &Arc<dyn Buffer>, count: usize, zero: T) -> Result<Vec<T>> {
    let mut out = vec![zero; count];
    if count > 0 {
        buffer.read(0, bytemuck::cast_slice_mut(&mut out))?;
    }
    Ok(out)
}

#[cfg(test)]
#[path = "gpu_mesh_tests.rs"]
mod tests;
