//! # vapor
//!
//! Converts weighted point samples ("particles") into sparse volumetric
//! fields: a narrow-band signed distance level set, a fog/density volume,
//! a CSG alpha mask, and per-attribute fields gathered from the closest
//! particle.
//!
//! ## Features
//!
//! - **Spheres**: each particle rasterized as a sphere, min-merged into a
//!   narrow-band signed distance field
//! - **Trails**: particles swept backward along their velocity as chains
//!   of spheres
//! - **Points**: radius-free reconstruction from point occupancy topology
//!   (closing, dilation, bounded distance sweep, smoothing)
//! - **Fog**: distance remapped to a [0, 1] density ramp
//! - **Mask**: CSG difference of enlarged/shrunk reconstructions as an
//!   alpha shell around the surface
//! - **Attributes**: per-particle channels transferred onto the band via
//!   a closest-particle index field
//!
//! ## Example
//!
//! ```rust
//! use vapor::prelude::*;
//! use glam::Vec3;
//!
//! let particles = ParticleSet::from_positions(vec![Vec3::ZERO])
//!     .with_radii(vec![2.0])
//!     .unwrap();
//!
//! let config = ConvertConfig::new(1.0).with_fog();
//! let output = convert(&particles, &config, &NullInterrupter).unwrap();
//!
//! assert_eq!(output.volumes.len(), 2); // "surface" and "density"
//! ```

#![warn(missing_docs)]

pub mod attributes;
pub mod convert;
pub mod grid;
pub mod interrupt;
pub mod levelset;
pub mod particles;
pub mod raster;
pub mod topology;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude - commonly used types and functions
pub mod prelude {
    pub use crate::attributes::{
        AttributeRequest, OutputVolume, VecInterp, VolumeData, POINT_LIST_INDEX,
    };
    pub use crate::convert::{
        convert, ConversionMode, ConvertConfig, ConvertError, ConvertOutput, ConvertWarning,
        HalfBand,
    };
    pub use crate::grid::{GridClass, MaskGrid, SparseGrid, Transform};
    pub use crate::interrupt::{FlagInterrupter, Interrupter, NullInterrupter};
    pub use crate::levelset::{csg_difference, csg_union, sdf_to_fog, smooth_level_set};
    pub use crate::particles::{AttrData, ParticleSet, ParticleSource, ScaledRadius};
    pub use crate::raster::{RasterConfig, RasterOutput, SphereRasterizer};
    pub use crate::topology::{point_mask_grid, topology_to_level_set};
    pub use glam::{IVec3, Vec3};
}

// Re-exports for convenience
pub use convert::{convert, ConvertConfig, ConvertOutput};
pub use grid::{SparseGrid, Transform};
pub use particles::ParticleSet;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::VERSION;

    #[test]
    fn test_basic_workflow() {
        let particles = ParticleSet::from_positions(vec![Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)])
            .with_radii(vec![2.0, 2.0])
            .unwrap();

        let config = ConvertConfig::new(1.0).with_fog().with_mask();
        let output = convert(&particles, &config, &NullInterrupter).unwrap();

        assert!(!output.interrupted);
        assert_eq!(output.volumes.len(), 3);
        for name in ["surface", "density", "boundingvolume"] {
            assert!(output.volume(name).is_some(), "missing volume '{}'", name);
        }
    }

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
