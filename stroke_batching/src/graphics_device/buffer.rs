/// Buffer trait and buffer descriptor

use crate::error::Result;

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Per-vertex attribute stream
    Vertex,
    /// Triangle index stream (u32)
    Index,
    /// Compute-writable buffer used for GPU readback
    Storage,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
}

/// Element format of a vertex attribute or index stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum BufferFormat {
    R32_UINT,            // index (4 bytes)
    R32G32_SFLOAT,       // vec2 (8 bytes)
    R32G32B32_SFLOAT,    // vec3 (12 bytes)
    R32G32B32A32_SFLOAT, // vec4 (16 bytes)
    R8G8B8A8_UNORM,      // packed color (4 bytes)
}

impl BufferFormat {
    /// Returns size in bytes for this format
    pub fn size_bytes(&self) -> u32 {
        match self {
            BufferFormat::R32_UINT | BufferFormat::R8G8B8A8_UNORM => 4,
            BufferFormat::R32G32_SFLOAT => 8,
            BufferFormat::R32G32B32_SFLOAT => 12,
            BufferFormat::R32G32B32A32_SFLOAT => 16,
        }
    }
}

/// Buffer resource trait
///
/// Implemented by backend-specific buffer types.
/// The buffer is automatically destroyed when dropped.
pub trait Buffer: Send + Sync {
    /// Write `data` at `offset` bytes
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Read `out.len()` bytes starting at `offset`
    ///
    /// Used to rebuild CPU geometry from an evicted batch and to fetch
    /// intersection readbacks.
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Size in bytes
    fn size(&self) -> u64;
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
