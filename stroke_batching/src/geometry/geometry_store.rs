/// CPU-side vertex and index arrays backing a batch
///
/// A `GeometryStore` owns growable per-attribute arrays plus a `u32` triangle
/// index array. Its vertex layout is assigned once, either explicitly or by
/// adopting the layout of the first geometry appended to it.
///
/// The store can release its arrays (`make_non_resident`) while keeping a
/// handle to the GPU mesh that holds the same data; `ensure_resident` reads
/// that mesh back and restores bit-identical arrays. Counts stay valid in
/// both states.

use std::ops::Range;
use glam::{Mat4, Vec3, Vec4};

use crate::error::Result;
use crate::geometry::GpuMesh;

// ===== VERTEX LAYOUT =====

/// Component count of texture coordinate channel 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TexcoordSize {
    #[default]
    None,
    Two,
    Three,
}

/// Which optional vertex attributes a store carries (position is always present)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexLayout {
    pub normals: bool,
    pub texcoord0: TexcoordSize,
    pub colors: bool,
    pub tangents: bool,
}

impl VertexLayout {
    /// Positions only
    pub const POSITIONS: VertexLayout = VertexLayout {
        normals: false,
        texcoord0: TexcoordSize::None,
        colors: false,
        tangents: false,
    };

    /// Every attribute, with 2-component texcoords
    pub const FULL: VertexLayout = VertexLayout {
        normals: true,
        texcoord0: TexcoordSize::Two,
        colors: true,
        tangents: true,
    };

    pub fn has_texcoords(&self) -> bool {
        self.texcoord0 != TexcoordSize::None
    }
}

// ===== GEOMETRY DESC =====

/// Arrays for building a store in one call
///
/// Attribute arrays not enabled by `layout` must be empty; enabled ones must
/// have one entry per position.
#[derive(Debug, Clone, Default)]
pub struct GeometryDesc {
    pub layout: VertexLayout,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// `z` is ignored (stored as 0) for 2-component layouts
    pub texcoords: Vec<Vec3>,
    pub colors: Vec<[u8; 4]>,
    pub tangents: Vec<Vec4>,
    pub indices: Vec<u32>,
}

/// One vertex for `GeometryStore::push_vertex`
#[derive(Debug, Clone, Copy, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub texcoord: Vec3,
    pub color: [u8; 4],
    pub tangent: Vec4,
}

// ===== GEOMETRY STORE =====

#[derive(Clone, Default)]
pub struct GeometryStore {
    layout: Option<VertexLayout>,
    pub(crate) positions: Vec<Vec3>,
    pub(crate) normals: Vec<Vec3>,
    pub(crate) texcoords: Vec<Vec3>,
    pub(crate) colors: Vec<[u8; 4]>,
    pub(crate) tangents: Vec<Vec4>,
    pub(crate) indices: Vec<u32>,
    /// GPU copy holding the data while the arrays are released
    backing: Option<GpuMesh>,
}

impl GeometryStore {
    /// Empty store with no layout yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store with a fixed layout
    pub fn with_layout(layout: VertexLayout) -> Self {
        Self { layout: Some(layout), ..Self::default() }
    }

    /// Build a store from arrays, validating lengths and index ranges
    pub fn from_desc(desc: GeometryDesc) -> Result<Self> {
        let count = desc.positions.len();
        let layout = desc.layout;
        let check = |name: &str, len: usize, enabled: bool| -> Result<()> {
            let expected = if enabled { count } else { 0 };
            if len != expected {
                crate::engine_bail!(
                    "batching::GeometryStore",
                    InvalidArgument,
                    "{} has {} entries, expected {}",
                    name, len, expected
                );
            }
            Ok(())
        };
        check("normals", desc.normals.len(), layout.normals)?;
        check("texcoords", desc.texcoords.len(), layout.has_texcoords())?;
        check("colors", desc.colors.len(), layout.colors)?;
        check("tangents", desc.tangents.len(), layout.tangents)?;

        if desc.indices.len() % 3 != 0 {
            crate::engine_bail!(
                "batching::GeometryStore",
                InvalidArgument,
                "index count {} is not a multiple of 3",
                desc.indices.len()
            );
        }
        if let Some(bad) = desc.indices.iter().find(|&&i| i as usize >= count) {
            crate::engine_bail!(
                "batching::GeometryStore",
                InvalidArgument,
                "index {} references past {} vertices",
                bad, count
            );
        }

        let mut texcoords = desc.texcoords;
        if layout.texcoord0 == TexcoordSize::Two {
            texcoords.iter_mut().for_each(|t| t.z = 0.0);
        }

        Ok(Self {
            layout: Some(layout),
            positions: desc.positions,
            normals: desc.normals,
            texcoords,
            colors: desc.colors,
            tangents: desc.tangents,
            indices: desc.indices,
            backing: None,
        })
    }

    // ===== ACCESSORS =====

    pub fn layout(&self) -> Option<VertexLayout> {
        self.layout
    }

    /// Assign the layout; a store's layout can only be set once
    pub fn set_layout(&mut self, layout: VertexLayout) -> Result<()> {
        match self.layout {
            Some(current) if current != layout => {
                crate::engine_bail!(
                    "batching::GeometryStore",
                    InvalidArgument,
                    "layout already assigned ({:?}), cannot change to {:?}",
                    current, layout
                );
            }
            _ => {
                self.layout = Some(layout);
                Ok(())
            }
        }
    }

    /// Vertex count, valid whether or not the arrays are resident
    pub fn vertex_count(&self) -> u32 {
        match &self.backing {
            Some(mesh) => mesh.vertex_count(),
            None => self.positions.len() as u32,
        }
    }

    /// Index count, valid whether or not the arrays are resident
    pub fn index_count(&self) -> u32 {
        match &self.backing {
            Some(mesh) => mesh.index_count(),
            None => self.indices.len() as u32,
        }
    }

    pub fn is_resident(&self) -> bool {
        self.backing.is_none()
    }

    // Slices are empty while not resident.
    pub fn positions(&self) -> &[Vec3] { &self.positions }
    pub fn normals(&self) -> &[Vec3] { &self.normals }
    pub fn texcoords(&self) -> &[Vec3] { &self.texcoords }
    pub fn colors(&self) -> &[[u8; 4]] { &self.colors }
    pub fn tangents(&self) -> &[Vec4] { &self.tangents }
    pub fn indices(&self) -> &[u32] { &self.indices }

    pub(crate) fn indices_mut(&mut self) -> &mut [u32] {
        &mut self.indices
    }

    // ===== BUILDING =====

    /// Append one vertex, returning its index
    pub fn push_vertex(&mut self, vertex: Vertex) -> Result<u32> {
        self.require_resident("push_vertex")?;
        let layout = self.layout.unwrap_or_default();
        self.layout = Some(layout);

        let index = self.positions.len() as u32;
        self.positions.push(vertex.position);
        if layout.normals {
            self.normals.push(vertex.normal);
        }
        match layout.texcoord0 {
            TexcoordSize::None => {}
            TexcoordSize::Two => self.texcoords.push(vertex.texcoord.truncate().extend(0.0)),
            TexcoordSize::Three => self.texcoords.push(vertex.texcoord),
        }
        if layout.colors {
            self.colors.push(vertex.color);
        }
        if layout.tangents {
            self.tangents.push(vertex.tangent);
        }
        Ok(index)
    }

    /// Append one triangle of existing vertices
    pub fn push_triangle(&mut self, triangle: [u32; 3]) -> Result<()> {
        self.require_resident("push_triangle")?;
        let count = self.positions.len() as u32;
        if let Some(bad) = triangle.iter().find(|&&i| i >= count) {
            crate::engine_bail!(
                "batching::GeometryStore",
                InvalidArgument,
                "triangle index {} references past {} vertices",
                bad, count
            );
        }
        self.indices.extend_from_slice(&triangle);
        Ok(())
    }

    /// Copy `vertices` and `indices` of `source` to the end of this store
    ///
    /// Indices are rebased onto the appended vertices. With a transform,
    /// positions are transformed as points, normals and tangent directions as
    /// vectors (re-normalized). An empty store without a layout adopts the
    /// source layout; otherwise layouts must match.
    pub fn append(
        &mut self,
        source: &GeometryStore,
        vertices: Range<u32>,
        indices: Range<u32>,
        transform: Option<&Mat4>,
    ) -> Result<()> {
        self.require_resident("append")?;
        source.require_resident("append source")?;

        if vertices.end > source.vertex_count() || vertices.start > vertices.end {
            crate::engine_bail!(
                "batching::GeometryStore",
                InvalidArgument,
                "vertex range {:?} outside source of {} vertices",
                vertices, source.vertex_count()
            );
        }
        if indices.end > source.index_count() || indices.start > indices.end || indices.len() % 3 != 0 {
            crate::engine_bail!(
                "batching::GeometryStore",
                InvalidArgument,
                "index range {:?} invalid for source of {} indices",
                indices, source.index_count()
            );
        }
        let source_indices = &source.indices[indices.start as usize..indices.end as usize];
        if let Some(bad) = source_indices.iter().find(|&&i| !vertices.contains(&i)) {
            crate::engine_bail!(
                "batching::GeometryStore",
                InvalidArgument,
                "index {} outside vertex range {:?}",
                bad, vertices
            );
        }

        let source_layout = source.layout.unwrap_or_default();
        match self.layout {
            None => self.layout = Some(source_layout),
            Some(layout) if layout != source_layout => {
                crate::engine_bail!(
                    "batching::GeometryStore",
                    InvalidArgument,
                    "source layout {:?} differs from {:?}",
                    source_layout, layout
                );
            }
            Some(_) => {}
        }
        let layout = source_layout;

        let base = self.positions.len() as u32;
        let range = vertices.start as usize..vertices.end as usize;

        match transform {
            Some(m) => {
                self.positions.extend(source.positions[range.clone()].iter().map(|p| m.transform_point3(*p)));
                if layout.normals {
                    self.normals.extend(
                        source.normals[range.clone()]
                            .iter()
                            .map(|n| m.transform_vector3(*n).normalize_or_zero()),
                    );
                }
                if layout.tangents {
                    self.tangents.extend(source.tangents[range.clone()].iter().map(|t| {
                        m.transform_vector3(t.truncate()).normalize_or_zero().extend(t.w)
                    }));
                }
            }
            None => {
                self.positions.extend_from_slice(&source.positions[range.clone()]);
                if layout.normals {
                    self.normals.extend_from_slice(&source.normals[range.clone()]);
                }
                if layout.tangents {
                    self.tangents.extend_from_slice(&source.tangents[range.clone()]);
                }
            }
        }
        if layout.has_texcoords() {
            self.texcoords.extend_from_slice(&source.texcoords[range.clone()]);
        }
        if layout.colors {
            self.colors.extend_from_slice(&source.colors[range]);
        }

        self.indices
            .extend(source_indices.iter().map(|&i| i - vertices.start + base));
        Ok(())
    }

    /// Copy a vertex/index range into a new store with indices rebased to 0
    pub fn extract(&self, vertices: Range<u32>, indices: Range<u32>) -> Result<GeometryStore> {
        let mut out = GeometryStore::new();
        out.append(self, vertices, indices, None)?;
        if out.layout.is_none() {
            out.layout = self.layout;
        }
        Ok(out)
    }

    /// Drop everything past the given counts
    pub fn truncate(&mut self, vertex_count: u32, index_count: u32) -> Result<()> {
        self.require_resident("truncate")?;
        let v = vertex_count as usize;
        self.positions.truncate(v);
        self.normals.truncate(v);
        self.texcoords.truncate(v);
        self.colors.truncate(v);
        self.tangents.truncate(v);
        self.indices.truncate(index_count as usize);
        Ok(())
    }

    // ===== RESIDENCY =====

    /// Release the CPU arrays, keeping `backing` as the source of truth
    ///
    /// `backing` must hold the same data as this store (callers sync first).
    pub fn make_non_resident(&mut self, backing: GpuMesh) {
        let layout = self.layout;
        *self = GeometryStore { layout, backing: Some(backing), ..GeometryStore::default() };
    }

    /// Rebuild the CPU arrays from the GPU copy; no-op when already resident
    pub fn ensure_resident(&mut self) -> Result<()> {
        let Some(mesh) = &self.backing else {
            return Ok(());
        };
        let mut restored = mesh.download()?;
        if restored.layout.is_none() {
            restored.layout = self.layout;
        }
        *self = restored;
        Ok(())
    }

    fn require_resident(&self, operation: &str) -> Result<()> {
        if !self.is_resident() {
            crate::engine_bail!(
                "batching::GeometryStore",
                NotResident,
                "{} requires resident geometry",
                operation
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "geometry_store_tests.rs"]
mod tests;
