//! Narrow-band level set operations: CSG combination, fog conversion,
//! and surface smoothing.
//!
//! All operations read through sign-aware backgrounds, so pruned interiors
//! (constant `-background` tiles) participate correctly, and every result
//! is re-pruned back to a valid narrow band.

use glam::IVec3;
use rayon::prelude::*;

use crate::grid::{DenseTile, GridClass, Node, SparseGrid, TILE_VOLUME};
use crate::interrupt::Interrupter;
use crate::topology::NEIGHBORS_6;

/// Combine two level sets voxel-wise over the union of their stored tiles.
fn combine(
    a: &SparseGrid<f32>,
    b: &SparseGrid<f32>,
    op: impl Fn(f32, f32) -> f32 + Sync,
) -> SparseGrid<f32> {
    debug_assert_eq!(a.transform(), b.transform(), "operands must share a transform");
    let bg = a.background();

    let mut keys: Vec<IVec3> = a.tiles.keys().chain(b.tiles.keys()).copied().collect();
    keys.sort_unstable_by_key(|k| (k.x, k.y, k.z));
    keys.dedup();

    let tiles: Vec<(IVec3, Node<f32>)> = keys
        .par_iter()
        .map(|&origin| {
            let mut tile = DenseTile::new(bg);
            for offset in 0..TILE_VOLUME {
                let coord = origin + crate::grid::local_coord(offset);
                let v = op(a.value_at(coord), b.value_at(coord)).clamp(-bg, bg);
                tile.values[offset] = v;
                tile.set_active(offset, v.abs() < bg);
            }
            (origin, Node::Dense(tile))
        })
        .collect();

    let mut out = SparseGrid::new(*a.transform(), bg);
    out.set_class(GridClass::LevelSet);
    out.tiles = tiles.into_iter().collect();
    out.prune();
    out
}

/// CSG union of two level sets: voxel-wise minimum.
pub fn csg_union(a: &SparseGrid<f32>, b: &SparseGrid<f32>) -> SparseGrid<f32> {
    combine(a, b, f32::min)
}

/// CSG difference `a − b`: voxel-wise `max(a, −b)`.
///
/// The result is the region inside `a` but outside `b`, re-pruned to the
/// narrow band of `a`.
pub fn csg_difference(a: &SparseGrid<f32>, b: &SparseGrid<f32>) -> SparseGrid<f32> {
    combine(a, b, |va, vb| va.max(-vb))
}

/// Destructively remap a signed distance field to a fog/density field.
///
/// Active voxels become `clamp(-d / background, 0, 1)`: the interior half
/// of the narrow band ramps from 0 at the surface to 1 at the innermost
/// band offset, deep interior becomes active fog of exactly 1, and the
/// exterior half of the band goes inactive and is dropped. Sign and
/// distance information do not survive; the result must not be reused as
/// a level set.
pub fn sdf_to_fog(grid: &mut SparseGrid<f32>) {
    let bg = grid.background();
    for node in grid.tiles.values_mut() {
        match node {
            Node::Dense(tile) => {
                for offset in 0..TILE_VOLUME {
                    let fog = (-tile.values[offset] / bg).clamp(0.0, 1.0);
                    tile.values[offset] = fog;
                    tile.set_active(offset, fog > 0.0);
                }
            }
            Node::Constant { value, active } => {
                // Interior constants become solid fog.
                if *value < 0.0 {
                    *value = 1.0;
                    *active = true;
                } else {
                    *value = 0.0;
                    *active = false;
                }
            }
        }
    }
    grid.shrink(|node| matches!(node, Node::Constant { active: true, .. }));
    grid.background = 0.0;
    grid.set_class(GridClass::FogVolume);
}

/// In-place surface smoothing: `iterations` passes of a 6-neighbor mean
/// filter over the active narrow band, each followed by a prune.
///
/// Neighbor reads go through the sign-aware background, so the filter is
/// well defined at band edges. Polls the interrupter once per pass.
pub fn smooth_level_set(
    grid: &mut SparseGrid<f32>,
    iterations: u32,
    interrupter: &impl Interrupter,
) {
    for _ in 0..iterations {
        if interrupter.was_interrupted() {
            return;
        }
        let coords = grid.active_coords();
        let updates: Vec<(IVec3, f32)> = coords
            .par_iter()
            .map(|&c| {
                let mut sum = grid.value_at(c);
                for n in NEIGHBORS_6 {
                    sum += grid.value_at(c + n);
                }
                (c, sum / 7.0)
            })
            .collect();
        for (c, v) in updates {
            grid.set(c, v);
        }
        grid.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Transform;
    use crate::interrupt::NullInterrupter;
    use crate::particles::ParticleSet;
    use crate::raster::{RasterConfig, SphereRasterizer};
    use glam::Vec3;

    fn sphere_level_set(radius: f32, voxel_size: f32, half_band: f32) -> SparseGrid<f32> {
        let set = ParticleSet::from_positions(vec![Vec3::ZERO])
            .with_radii(vec![radius])
            .unwrap();
        SphereRasterizer::new(
            Transform::new(voxel_size),
            half_band,
            RasterConfig::default(),
            false,
            &NullInterrupter,
        )
        .rasterize_spheres(&set)
        .distance
    }

    #[test]
    fn test_csg_union_is_voxelwise_min() {
        let a = sphere_level_set(2.0, 1.0, 3.0);
        let set = ParticleSet::from_positions(vec![Vec3::new(2.0, 0.0, 0.0)])
            .with_radii(vec![2.0])
            .unwrap();
        let b = SphereRasterizer::new(
            Transform::new(1.0),
            3.0,
            RasterConfig::default(),
            false,
            &NullInterrupter,
        )
        .rasterize_spheres(&set)
        .distance;

        let u = csg_union(&a, &b);
        for c in [
            IVec3::new(0, 0, 0),
            IVec3::new(1, 0, 0),
            IVec3::new(3, 0, 0),
            IVec3::new(-2, 1, 0),
            IVec3::new(4, 0, 0),
        ] {
            let expected = a.value_at(c).min(b.value_at(c));
            assert!(
                (u.value_at(c) - expected).abs() < 1e-5,
                "union mismatch at {:?}: got {}, expected {}",
                c,
                u.value_at(c),
                expected
            );
        }
    }

    #[test]
    fn test_csg_difference_produces_shell() {
        let outer = sphere_level_set(3.0, 1.0, 2.0);
        let inner = sphere_level_set(2.0, 1.0, 2.0);
        let diff = csg_difference(&outer, &inner);

        // Deep inside the inner sphere: removed (outside the difference).
        assert!(diff.value_at(IVec3::ZERO) > 0.0);
        assert!(!diff.is_active(IVec3::ZERO));

        // Within the shell between the two surfaces.
        let c = IVec3::new(2, 1, 0); // |c| = sqrt(5) ~ 2.236
        let expected = (2.236068 - 3.0f32).max(-(2.236068 - 2.0));
        assert!(
            (diff.value_at(c) - expected).abs() < 1e-4,
            "shell value {} vs expected {}",
            diff.value_at(c),
            expected
        );
        assert!(diff.value_at(c) < 0.0, "shell interior must be negative");

        // Far outside the outer sphere: still outside.
        assert!(!diff.is_active(IVec3::new(8, 0, 0)));
    }

    #[test]
    fn test_fog_range_and_interior() {
        // Sphere much fatter than the band, so a pruned interior exists.
        let mut g = sphere_level_set(4.0, 1.0, 2.0);
        sdf_to_fog(&mut g);

        assert_eq!(g.class(), GridClass::FogVolume);
        assert_eq!(g.background(), 0.0);

        // Deep interior is solid fog.
        assert_eq!(g.value_at(IVec3::ZERO), 1.0);
        assert!(g.is_active(IVec3::ZERO));

        // Halfway into the interior band: d = -1, band = 2 -> fog 0.5.
        assert!((g.value_at(IVec3::new(3, 0, 0)) - 0.5).abs() < 1e-5);

        // On and outside the surface: zero and inactive.
        assert_eq!(g.value_at(IVec3::new(4, 0, 0)), 0.0);
        assert!(!g.is_active(IVec3::new(4, 0, 0)));
        assert!(!g.is_active(IVec3::new(5, 0, 0)));

        let mut all_in_range = true;
        g.for_each_active(|_, v| {
            if !(0.0..=1.0).contains(&v) {
                all_in_range = false;
            }
        });
        assert!(all_in_range, "fog values must stay within [0, 1]");
    }

    #[test]
    fn test_smoothing_fixes_linear_field() {
        // A linear ramp is a fixed point of the mean filter away from the
        // band edges.
        let mut g = SparseGrid::new(Transform::new(1.0), 4.0);
        for z in -3..=3 {
            for y in -3..=3 {
                for x in -3..=3 {
                    g.set(IVec3::new(x, y, z), x as f32 * 0.5);
                }
            }
        }
        let before = g.value_at(IVec3::ZERO);
        smooth_level_set(&mut g, 1, &NullInterrupter);
        assert!((g.value_at(IVec3::ZERO) - before).abs() < 1e-5);
    }

    #[test]
    fn test_smoothing_respects_interrupt() {
        let mut g = sphere_level_set(2.0, 1.0, 3.0);
        let reference = g.clone();
        let boss = crate::interrupt::FlagInterrupter::new();
        boss.interrupt();
        smooth_level_set(&mut g, 3, &boss);

        // No pass ran: values unchanged.
        let mut unchanged = true;
        g.for_each_active(|c, v| {
            if (reference.value_at(c) - v).abs() > 1e-6 {
                unchanged = false;
            }
        });
        assert!(unchanged);
    }
}
