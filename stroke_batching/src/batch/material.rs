/// Materials and the catalog that describes them

use std::fmt;
use rustc_hash::FxHashMap;

use crate::geometry::VertexLayout;

/// Identity of a material; one batch pool exists per material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "material {}", self.0)
    }
}

/// Metadata the batching engine needs about a material
#[derive(Debug, Clone)]
pub struct MaterialInfo {
    pub id: MaterialId,
    pub name: String,
    /// Extra margin added around batch bounds (applied twice per side)
    pub bounds_padding: f32,
    /// Layout given to a new batch's GPU mesh before its first subset arrives
    pub vertex_layout: VertexLayout,
}

/// Lookup of material metadata by id
pub trait MaterialCatalog: Send + Sync {
    fn material(&self, id: MaterialId) -> Option<MaterialInfo>;
}

/// In-memory catalog
#[derive(Debug, Default)]
pub struct SimpleMaterialCatalog {
    materials: FxHashMap<MaterialId, MaterialInfo>,
}

impl SimpleMaterialCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a material
    pub fn register(&mut self, info: MaterialInfo) {
        self.materials.insert(info.id, info);
    }

    /// Builder form of `register`
    pub fn with(mut self, info: MaterialInfo) -> Self {
        self.register(info);
        self
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

impl MaterialCatalog for SimpleMaterialCatalog {
    fn material(&self, id: MaterialId) -> Option<MaterialInfo> {
        self.materials.get(&id).cloned()
    }
}
