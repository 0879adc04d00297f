/// 32-bit identifier written by the identifier pass
///
/// High 16 bits: container id (batch id or widget id). Low 16 bits: triangle
/// number inside the container's draw. The value 0 means "no geometry", so
/// container id 0 is never handed out.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedId {
    pub container_id: u16,
    /// Triangle number; its first index sits at `local_index * 3`
    pub local_index: u16,
}

impl PackedId {
    /// Pixel value of an empty sample
    pub const NONE: u32 = 0;

    pub fn new(container_id: u16, local_index: u16) -> Self {
        Self { container_id, local_index }
    }

    /// Pack a triangle number, keeping its low 16 bits
    pub fn from_triangle(container_id: u16, triangle: u32) -> Self {
        Self::new(container_id, (triangle & 0xffff) as u16)
    }

    pub fn pack(self) -> u32 {
        ((self.container_id as u32) << 16) | self.local_index as u32
    }

    /// Decode a sample; `None` for an empty one
    pub fn unpack(value: u32) -> Option<Self> {
        if value == Self::NONE {
            return None;
        }
        Some(Self::new((value >> 16) as u16, (value & 0xffff) as u16))
    }

    /// Position of the triangle's first index in the container's index array
    pub fn index_position(&self) -> u32 {
        self.local_index as u32 * 3
    }
}

impl From<PackedId> for u32 {
    fn from(id: PackedId) -> u32 {
        id.pack()
    }
}

impl fmt::Display for PackedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.container_id, self.local_index)
    }
}

#[cfg(test)]
#[path = "packed_id_tests.rs"]
mod tests;
