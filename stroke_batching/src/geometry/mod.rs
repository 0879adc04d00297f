/// Geometry module - bounds, CPU geometry store and its GPU mirror

pub mod aabb;
pub mod geometry_store;
pub mod gpu_mesh;

pub use aabb::AABB;
pub use geometry_store::{GeometryStore, GeometryDesc, Vertex, VertexLayout, TexcoordSize};
pub use gpu_mesh::GpuMesh;
