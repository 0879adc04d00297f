/// Axis-aligned bounding boxes for subsets and batches

use glam::{Mat4, Vec3};

// ===== AABB =====

/// Axis-Aligned Bounding Box
///
/// Subset bounds are stored in batch-local space; batch bounds are padded by
/// the material's bounds padding when the GPU mesh is refreshed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    /// Minimum corner (x, y, z)
    pub min: Vec3,
    /// Maximum corner (x, y, z)
    pub max: Vec3,
}

impl AABB {
    /// Box that contains nothing; encapsulating any point makes it that point
    pub const EMPTY: AABB = AABB { min: Vec3::splat(f32::INFINITY), max: Vec3::splat(f32::NEG_INFINITY) };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self { min: center - half_extents, max: center + half_extents }
    }

    /// Tight box around `points`, or `EMPTY` when there are none
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        points.into_iter().fold(AABB::EMPTY, |acc, p| acc.encapsulate_point(*p))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[must_use]
    pub fn encapsulate_point(&self, point: Vec3) -> AABB {
        AABB { min: self.min.min(point), max: self.max.max(point) }
    }

    /// Smallest box containing both; empty boxes are ignored
    #[must_use]
    pub fn union(&self, other: &AABB) -> AABB {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        AABB { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    /// Grow every face outward by `amount`
    #[must_use]
    pub fn expanded(&self, amount: f32) -> AABB {
        if self.is_empty() {
            return *self;
        }
        AABB { min: self.min - Vec3::splat(amount), max: self.max + Vec3::splat(amount) }
    }

    /// Transform this AABB by a matrix, returning a new AABB.
    ///
    /// Uses the Arvo method: projects each matrix axis onto the AABB extents
    /// for an exact (tight) result without transforming all 8 corners.
    #[must_use]
    pub fn transformed(&self, matrix: &Mat4) -> AABB {
        if self.is_empty() {
            return *self;
        }
        let translation = matrix.col(3).truncate();
        let mut new_min = translation;
        let mut new_max = translation;

        for i in 0..3 {
            let axis = matrix.col(i).truncate();
            let a = axis * self.min[i];
            let b = axis * self.max[i];
            new_min += a.min(b);
            new_max += a.max(b);
        }

        AABB { min: new_min, max: new_max }
    }

    /// Returns `true` if `other` is entirely within `self`.
    pub fn contains(&self, other: &AABB) -> bool {
        self.min.x <= other.min.x && self.max.x >= other.max.x
        && self.min.y <= other.min.y && self.max.y >= other.max.y
        && self.min.z <= other.min.z && self.max.z >= other.max.z
    }

    /// Returns `true` if the two AABBs overlap or touch.
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x
        && self.min.y <= other.max.y && self.max.y >= other.min.y
        && self.min.z <= other.max.z && self.max.z >= other.min.z
    }
}

impl Default for AABB {
    fn default() -> Self {
        AABB::EMPTY
    }
}

#[cfg(test)]
#[path = "aabb_tests.rs"]
mod tests;
