//! Sphere and trail rasterization into a narrow-band level set.
//!
//! Each particle stamps the signed distance to its implicit surface into a
//! sparse distance grid under min-merge: where influence regions overlap,
//! the value closest to a surface wins, and a companion index field records
//! which particle produced the surviving minimum.
//!
//! # Determinism
//!
//! Particles are split into fixed-order chunks; each chunk rasterizes into
//! a private grid in parallel and the chunk grids are merged sequentially
//! in particle-index order. A candidate replaces a stored value only when
//! strictly smaller, so on exact distance ties the lowest particle index
//! wins no matter how rayon schedules the chunks.
//!
//! # Narrow band
//!
//! Voxels are only touched within `radius + half_band` of a center. Values
//! at or beyond `+background` are skipped; values at or below `-background`
//! are written clamped and collapse to interior constants when
//! [`finalize`](SphereRasterizer::rasterize_spheres) prunes.

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::grid::{DenseTile, GridClass, Node, SparseGrid, Transform, TILE_VOLUME};
use crate::interrupt::Interrupter;
use crate::particles::ParticleSource;

/// Particle acceptance bounds, in voxel units.
#[derive(Debug, Clone, Copy)]
pub struct RasterConfig {
    /// Particles with a smaller radius (in voxels) are ignored and counted.
    /// Radii below ~1.5 voxels alias badly.
    pub min_radius: f32,
    /// Particles with a larger radius (in voxels) are ignored and counted.
    pub max_radius: f32,
}

impl Default for RasterConfig {
    fn default() -> Self {
        RasterConfig {
            min_radius: 1.5,
            max_radius: 1e15,
        }
    }
}

/// Result of a rasterization pass.
pub struct RasterOutput {
    /// Pruned narrow-band signed distance field.
    pub distance: SparseGrid<f32>,
    /// Closest-particle index field with topology identical to `distance`,
    /// present when requested.
    pub index: Option<SparseGrid<i32>>,
    /// Particles skipped because their radius fell below the minimum.
    pub ignored_below: u64,
    /// Particles skipped because their radius exceeded the maximum.
    pub ignored_above: u64,
    /// Whether the pass was cut short by the interrupter.
    pub interrupted: bool,
}

impl RasterOutput {
    /// Whether any particles were rejected by the radius bounds.
    pub fn ignored_particles(&self) -> bool {
        self.ignored_below > 0 || self.ignored_above > 0
    }
}

enum Footprint {
    Sphere,
    Trails {
        velocity_scale: f32,
        spacing: f32,
    },
}

/// Rasterizes particles as spheres (or velocity trails) with min-merge.
pub struct SphereRasterizer<'a, I: Interrupter> {
    transform: Transform,
    background: f32,
    config: RasterConfig,
    with_index: bool,
    interrupter: &'a I,
}

/// Particles per parallel work unit; also the interrupt-poll granularity
/// of the merge loop.
const PARTICLE_CHUNK: usize = 256;

struct ChunkGrids {
    distance: SparseGrid<f32>,
    index: Option<SparseGrid<i32>>,
    ignored_below: u64,
    ignored_above: u64,
}

impl<'a, I: Interrupter> SphereRasterizer<'a, I> {
    /// Create a rasterizer targeting a fresh level set.
    ///
    /// `background` is the half-band width in world units. When
    /// `with_index` is set, a closest-particle index field is produced as
    /// a byproduct for attribute transfer.
    pub fn new(
        transform: Transform,
        background: f32,
        config: RasterConfig,
        with_index: bool,
        interrupter: &'a I,
    ) -> Self {
        SphereRasterizer {
            transform,
            background,
            config,
            with_index,
            interrupter,
        }
    }

    /// Rasterize every accepted particle as a stationary sphere.
    pub fn rasterize_spheres(self, source: &impl ParticleSource) -> RasterOutput {
        self.run(source, Footprint::Sphere)
    }

    /// Rasterize every accepted particle as a trail of spheres swept
    /// backward along its velocity.
    ///
    /// Component spheres are spaced `trail_resolution` voxels apart along
    /// the trail; the trail length is the scaled velocity magnitude.
    /// Particles without measurable velocity degrade to single spheres.
    pub fn rasterize_trails(
        self,
        source: &impl ParticleSource,
        velocity_scale: f32,
        trail_resolution: f32,
    ) -> RasterOutput {
        let spacing = trail_resolution.max(0.2) * self.transform.voxel_size();
        self.run(
            source,
            Footprint::Trails {
                velocity_scale,
                spacing,
            },
        )
    }

    fn empty_chunk(&self) -> ChunkGrids {
        let mut distance = SparseGrid::new(self.transform, self.background);
        distance.set_class(GridClass::LevelSet);
        ChunkGrids {
            distance,
            index: self.with_index.then(|| SparseGrid::new(self.transform, -1)),
            ignored_below: 0,
            ignored_above: 0,
        }
    }

    fn run(self, source: &impl ParticleSource, footprint: Footprint) -> RasterOutput {
        self.interrupter.start("Rasterizing particles");

        let count = source.len();
        let chunk_count = count.div_ceil(PARTICLE_CHUNK).max(1);

        let chunks: Vec<Option<ChunkGrids>> = (0..chunk_count)
            .into_par_iter()
            .map(|chunk| {
                let begin = chunk * PARTICLE_CHUNK;
                let end = (begin + PARTICLE_CHUNK).min(count);
                let mut grids = self.empty_chunk();
                for i in begin..end {
                    if (i - begin) % 64 == 0 && self.interrupter.was_interrupted() {
                        return None;
                    }
                    self.raster_particle(&mut grids, source, i, &footprint);
                }
                Some(grids)
            })
            .collect();

        // Deterministic min-merge in particle-index order.
        let mut merged = self.empty_chunk();
        let mut interrupted = false;
        for chunk in chunks {
            match chunk {
                Some(grids) => merge_min(&mut merged, grids),
                None => interrupted = true,
            }
        }
        if self.interrupter.was_interrupted() {
            interrupted = true;
        }
        self.interrupter.end();

        merged.distance.prune();
        let index = merged
            .index
            .map(|idx| align_index_topology(idx, &merged.distance));

        RasterOutput {
            distance: merged.distance,
            index,
            ignored_below: merged.ignored_below,
            ignored_above: merged.ignored_above,
            interrupted,
        }
    }

    fn raster_particle(
        &self,
        grids: &mut ChunkGrids,
        source: &impl ParticleSource,
        i: usize,
        footprint: &Footprint,
    ) {
        let radius = source.radius(i);
        let radius_voxels = radius / self.transform.voxel_size();
        if radius_voxels < self.config.min_radius {
            grids.ignored_below += 1;
            return;
        }
        if radius_voxels > self.config.max_radius {
            grids.ignored_above += 1;
            return;
        }

        let center = source.position(i);
        match *footprint {
            Footprint::Sphere => self.raster_sphere(grids, center, radius, i as i32),
            Footprint::Trails {
                velocity_scale,
                spacing,
            } => {
                let velocity = source.velocity(i) * velocity_scale;
                let speed = velocity.length();
                if speed < 1e-6 {
                    self.raster_sphere(grids, center, radius, i as i32);
                    return;
                }
                let direction = velocity / speed;
                let steps = (speed / spacing).floor() as i32;
                for k in 0..=steps {
                    let p = center - direction * (k as f32 * spacing);
                    self.raster_sphere(grids, p, radius, i as i32);
                }
            }
        }
    }

    /// Stamp one sphere: every voxel whose center lies closer than
    /// `radius + half_band` receives `|x - center| - radius`, min-merged.
    fn raster_sphere(&self, grids: &mut ChunkGrids, center: Vec3, radius: f32, id: i32) {
        let bg = self.background;
        let reach = radius + bg;
        let lo = self.transform.world_to_index_floor(center - Vec3::splat(reach));
        let hi = self.transform.world_to_index_ceil(center + Vec3::splat(reach));
        let dx = self.transform.voxel_size();

        for z in lo.z..=hi.z {
            let dz2 = (z as f32 * dx - center.z).powi(2);
            for y in lo.y..=hi.y {
                let dzy2 = dz2 + (y as f32 * dx - center.y).powi(2);
                // The whole row misses the band if even its nearest voxel does.
                if dzy2.sqrt() - radius >= bg {
                    continue;
                }
                for x in lo.x..=hi.x {
                    let d2 = dzy2 + (x as f32 * dx - center.x).powi(2);
                    let d = d2.sqrt() - radius;
                    if d >= bg {
                        continue;
                    }
                    let d = d.max(-bg);
                    let coord = IVec3::new(x, y, z);
                    if !grids.distance.is_active(coord) || d < grids.distance.value_at(coord) {
                        grids.distance.set(coord, d);
                        if let Some(idx) = &mut grids.index {
                            idx.set(coord, id);
                        }
                    }
                }
            }
        }
    }
}

/// Merge `src` into `dst` tile by tile with the min rule. `src` holds
/// higher particle indices than `dst`, so ties keep `dst`.
fn merge_min(dst: &mut ChunkGrids, src: ChunkGrids) {
    dst.ignored_below += src.ignored_below;
    dst.ignored_above += src.ignored_above;

    let mut src_index = src.index;
    for (origin, node) in src.distance.tiles {
        let src_tile = match node {
            Node::Dense(tile) => tile,
            Node::Constant { .. } => continue, // chunks are never pruned
        };
        let src_idx_tile = src_index.as_mut().and_then(|g| g.tiles.remove(&origin));

        match dst.distance.tiles.entry(origin) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(Node::Dense(src_tile));
                if let (Some(dst_idx), Some(tile)) = (&mut dst.index, src_idx_tile) {
                    dst_idx.tiles.insert(origin, tile);
                }
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let Node::Dense(dst_tile) = slot.get_mut() else {
                    continue;
                };
                for offset in 0..TILE_VOLUME {
                    if !src_tile.is_active(offset) {
                        continue;
                    }
                    let v = src_tile.values[offset];
                    if !dst_tile.is_active(offset) || v < dst_tile.values[offset] {
                        dst_tile.values[offset] = v;
                        dst_tile.set_active(offset, true);
                        if let (Some(dst_idx), Some(Node::Dense(src_ids))) =
                            (&mut dst.index, &src_idx_tile)
                        {
                            if let Some(Node::Dense(dst_ids)) = dst_idx.tiles.get_mut(&origin) {
                                dst_ids.values[offset] = src_ids.values[offset];
                                dst_ids.set_active(offset, true);
                            } else {
                                let mut tile = DenseTile::new(-1);
                                tile.values[offset] = src_ids.values[offset];
                                tile.set_active(offset, true);
                                dst_idx.tiles.insert(origin, Node::Dense(tile));
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Restrict the index field to the exact active topology of the pruned
/// distance field, so attribute transfer sees matching voxel sets.
fn align_index_topology(mut index: SparseGrid<i32>, distance: &SparseGrid<f32>) -> SparseGrid<i32> {
    index.tiles.retain(|origin, node| {
        let Some(Node::Dense(dist_tile)) = distance.tiles.get(origin) else {
            return false; // pruned away or collapsed interior
        };
        let Node::Dense(idx_tile) = node else {
            return false;
        };
        for offset in 0..TILE_VOLUME {
            if !dist_tile.is_active(offset) {
                idx_tile.values[offset] = -1;
            }
            idx_tile.set_active(offset, dist_tile.is_active(offset));
        }
        idx_tile.active_count() > 0
    });
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::{FlagInterrupter, NullInterrupter};
    use crate::particles::ParticleSet;

    fn raster(
        set: &ParticleSet,
        voxel_size: f32,
        half_band: f32,
        with_index: bool,
    ) -> RasterOutput {
        SphereRasterizer::new(
            Transform::new(voxel_size),
            half_band,
            RasterConfig::default(),
            with_index,
            &NullInterrupter,
        )
        .rasterize_spheres(set)
    }

    #[test]
    fn test_single_sphere_analytic_distances() {
        let set = ParticleSet::from_positions(vec![Vec3::ZERO])
            .with_radii(vec![2.0])
            .unwrap();
        let out = raster(&set, 1.0, 3.0, false);

        assert!(!out.ignored_particles());
        let g = &out.distance;
        assert!((g.value_at(IVec3::new(0, 0, 0)) + 2.0).abs() < 1e-5);
        assert!(g.value_at(IVec3::new(2, 0, 0)).abs() < 1e-5);
        assert!((g.value_at(IVec3::new(3, 0, 0)) - 1.0).abs() < 1e-5);
        assert!((g.value_at(IVec3::new(0, 4, 0)) - 2.0).abs() < 1e-5);
        // Out of band: inactive, background.
        assert!(!g.is_active(IVec3::new(6, 0, 0)));
        assert_eq!(g.value_at(IVec3::new(6, 0, 0)), 3.0);
    }

    #[test]
    fn test_min_merge_and_index_attribution() {
        let set = ParticleSet::from_positions(vec![Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)])
            .with_radii(vec![2.0, 2.0])
            .unwrap();
        let out = raster(&set, 1.0, 3.0, true);
        let g = &out.distance;
        let idx = out.index.as_ref().expect("index field requested");

        // Voxel (1,0,0): d0 = -1, d1 = 0 -> particle 0 wins.
        assert!((g.value_at(IVec3::new(1, 0, 0)) + 1.0).abs() < 1e-5);
        assert_eq!(idx.value_at(IVec3::new(1, 0, 0)), 0);
        // Voxel (2,0,0): d0 = 0, d1 = -1 -> particle 1 wins.
        assert!((g.value_at(IVec3::new(2, 0, 0)) + 1.0).abs() < 1e-5);
        assert_eq!(idx.value_at(IVec3::new(2, 0, 0)), 1);
    }

    #[test]
    fn test_equal_distance_tie_breaks_by_particle_index() {
        // Symmetric spheres: voxel (2,0,0) is exactly on both surfaces.
        let set = ParticleSet::from_positions(vec![Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)])
            .with_radii(vec![2.0, 2.0])
            .unwrap();
        let out = raster(&set, 1.0, 3.0, true);
        let idx = out.index.as_ref().unwrap();

        assert!(out.distance.value_at(IVec3::new(2, 0, 0)).abs() < 1e-5);
        assert_eq!(
            idx.value_at(IVec3::new(2, 0, 0)),
            0,
            "ties must keep the lower particle index"
        );
    }

    #[test]
    fn test_radius_bounds_count_ignored_particles() {
        let set = ParticleSet::from_positions(vec![
            Vec3::ZERO,
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(20.0, 0.0, 0.0),
        ])
        .with_radii(vec![0.5, 2.0, 9000.0])
        .unwrap();

        let out = SphereRasterizer::new(
            Transform::new(1.0),
            3.0,
            RasterConfig {
                min_radius: 1.5,
                max_radius: 100.0,
            },
            false,
            &NullInterrupter,
        )
        .rasterize_spheres(&set);

        assert_eq!(out.ignored_below, 1);
        assert_eq!(out.ignored_above, 1);
        assert!(out.ignored_particles());
        // The surviving particle still rasterized.
        assert!(out.distance.is_active(IVec3::new(12, 0, 0)));
    }

    #[test]
    fn test_trails_elongate_along_negative_velocity() {
        let set = ParticleSet::from_positions(vec![Vec3::ZERO])
            .with_radii(vec![2.0])
            .unwrap()
            .with_velocities(vec![Vec3::new(4.0, 0.0, 0.0)])
            .unwrap();

        let out = SphereRasterizer::new(
            Transform::new(1.0),
            3.0,
            RasterConfig::default(),
            false,
            &NullInterrupter,
        )
        .rasterize_trails(&set, 1.0, 1.0);

        // The tail sphere sits at (-4,0,0); a plain sphere would leave
        // this voxel at +2.
        assert!(out.distance.value_at(IVec3::new(-4, 0, 0)) < -1.5);
        // Ahead of the motion there is no trail.
        assert!(out.distance.value_at(IVec3::new(4, 0, 0)) > 1.5);
    }

    #[test]
    fn test_pruning_invariant_after_finalize() {
        let set = ParticleSet::from_positions(vec![Vec3::ZERO, Vec3::new(1.5, 0.5, 0.0)])
            .with_radii(vec![3.0, 2.0])
            .unwrap();
        let out = raster(&set, 0.5, 1.5, false);

        let mut max_mag = 0.0f32;
        out.distance.for_each_active(|_, v| max_mag = max_mag.max(v.abs()));
        assert!(
            max_mag < 1.5,
            "active voxel magnitude {} reaches half-band",
            max_mag
        );
    }

    #[test]
    fn test_index_topology_matches_distance_topology() {
        let set = ParticleSet::from_positions(vec![Vec3::ZERO, Vec3::new(2.0, 1.0, 0.0)])
            .with_radii(vec![2.0, 2.5])
            .unwrap();
        let out = raster(&set, 1.0, 3.0, true);
        let idx = out.index.as_ref().unwrap();

        assert_eq!(idx.active_voxel_count(), out.distance.active_voxel_count());
        idx.for_each_active(|c, id| {
            assert!(out.distance.is_active(c), "index active but distance not at {:?}", c);
            assert!(id == 0 || id == 1, "unexpected particle id {}", id);
        });
    }

    #[test]
    fn test_interrupted_rasterization_reports_flag() {
        let boss = FlagInterrupter::new();
        boss.interrupt();

        let set = ParticleSet::from_positions(vec![Vec3::ZERO])
            .with_radii(vec![2.0])
            .unwrap();
        let out = SphereRasterizer::new(
            Transform::new(1.0),
            3.0,
            RasterConfig::default(),
            false,
            &boss,
        )
        .rasterize_spheres(&set);

        assert!(out.interrupted);
        assert!(out.distance.is_empty());
    }

    #[test]
    fn test_empty_source_yields_empty_field() {
        let set = ParticleSet::from_positions(Vec::new());
        let out = raster(&set, 1.0, 3.0, true);
        assert!(out.distance.is_empty());
        assert!(out.index.unwrap().is_empty());
        assert!(!out.interrupted);
    }
}
