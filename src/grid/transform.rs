//! Uniform linear transform between world space and voxel index space.
//!
//! Every volume produced by one conversion shares a single [`Transform`]
//! so the outputs stay spatially registered.

use glam::{IVec3, Vec3};

/// Uniform mapping between world-space positions and integer voxel indices.
///
/// Voxel centers sit at integer multiples of the voxel size, so index
/// `(0, 0, 0)` is the voxel centered on the world-space origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    voxel_size: f32,
}

impl Transform {
    /// Create a transform with the given uniform voxel edge length.
    #[inline]
    pub fn new(voxel_size: f32) -> Self {
        Transform { voxel_size }
    }

    /// Uniform voxel edge length in world units.
    #[inline]
    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    /// World-space center of the voxel at `index`.
    #[inline]
    pub fn index_to_world(&self, index: IVec3) -> Vec3 {
        index.as_vec3() * self.voxel_size
    }

    /// Index of the voxel whose center is nearest to `pos`.
    #[inline]
    pub fn world_to_index(&self, pos: Vec3) -> IVec3 {
        (pos / self.voxel_size).round().as_ivec3()
    }

    /// Largest voxel index at or below `pos` on every axis.
    ///
    /// Together with [`Transform::world_to_index_ceil`] this brackets the
    /// index-space bounding box of a world-space region.
    #[inline]
    pub fn world_to_index_floor(&self, pos: Vec3) -> IVec3 {
        (pos / self.voxel_size).floor().as_ivec3()
    }

    /// Smallest voxel index at or above `pos` on every axis.
    #[inline]
    pub fn world_to_index_ceil(&self, pos: Vec3) -> IVec3 {
        (pos / self.voxel_size).ceil().as_ivec3()
    }
}
