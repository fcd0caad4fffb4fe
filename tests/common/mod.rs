//! Common test helpers for vapor integration tests

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use vapor::prelude::*;

// ============================================================================
// Standard particle collections
// ============================================================================

/// One particle at the origin with the given world-space radius
pub fn single_particle(radius: f32) -> ParticleSet {
    ParticleSet::from_positions(vec![Vec3::ZERO])
        .with_radii(vec![radius])
        .unwrap()
}

/// Reproducible scattered cloud in [-5, 5]^3 with radii in [1.5, 3.0]
pub fn scattered_particles(count: usize, seed: u64) -> ParticleSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let positions: Vec<Vec3> = (0..count)
        .map(|_| {
            Vec3::new(
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
            )
        })
        .collect();
    let radii: Vec<f32> = (0..count).map(|_| rng.random_range(1.5..3.0)).collect();
    ParticleSet::from_positions(positions)
        .with_radii(radii)
        .unwrap()
}

// ============================================================================
// Output accessors
// ============================================================================

/// Pull a named f32 volume out of a conversion output
pub fn f32_volume<'a>(output: &'a ConvertOutput, name: &str) -> &'a SparseGrid<f32> {
    match &output
        .volume(name)
        .unwrap_or_else(|| panic!("volume '{}' missing", name))
        .data
    {
        VolumeData::F32(g) => g,
        other => panic!("volume '{}' is not f32: {:?}", name, other),
    }
}

/// Largest active-voxel magnitude of a field
pub fn max_active_magnitude(grid: &SparseGrid<f32>) -> f32 {
    let mut max_mag = 0.0f32;
    grid.for_each_active(|_, v| max_mag = max_mag.max(v.abs()));
    max_mag
}

/// Assert two f32 fields are voxel-for-voxel identical
pub fn assert_fields_identical(a: &SparseGrid<f32>, b: &SparseGrid<f32>) {
    assert_eq!(a.active_voxel_count(), b.active_voxel_count());
    a.for_each_active(|c, v| {
        assert!(b.is_active(c), "voxel {:?} active in only one field", c);
        assert_eq!(b.value_at(c), v, "value mismatch at {:?}", c);
    });
}
