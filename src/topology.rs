//! Point-topology reconstruction: occupancy masks, morphology, and
//! conversion of voxel topology into a narrow-band level set.
//!
//! This is the radius-free alternative to sphere rasterization: one active
//! voxel per particle position, morphologically closed and dilated, then
//! turned into a signed distance field whose zero crossing follows the
//! occupied region's boundary.
//!
//! Morphological passes are whole-field and strictly ordered: closing
//! completes before dilation, dilation before the distance sweep, the
//! sweep before smoothing.

use glam::IVec3;
use std::collections::HashSet;

use crate::grid::{GridClass, MaskGrid, SparseGrid, Transform};
use crate::interrupt::Interrupter;
use crate::levelset::smooth_level_set;
use crate::particles::ParticleSource;

/// Face-adjacent neighborhood used by all morphology and distance sweeps.
pub(crate) const NEIGHBORS_6: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

/// Binary occupancy grid with one active voxel per particle position,
/// independent of radius.
pub fn point_mask_grid(source: &impl ParticleSource, transform: Transform) -> MaskGrid {
    let mut mask = MaskGrid::new_mask(transform);
    for i in 0..source.len() {
        mask.activate(transform.world_to_index(source.position(i)));
    }
    mask
}

/// One face-neighborhood dilation pass.
pub fn dilate(mask: &mut MaskGrid) {
    for coord in mask.active_coords() {
        for n in NEIGHBORS_6 {
            mask.activate(coord + n);
        }
    }
}

/// One face-neighborhood erosion pass.
pub fn erode(mask: &mut MaskGrid) {
    let doomed: Vec<IVec3> = mask
        .active_coords()
        .into_iter()
        .filter(|&c| NEIGHBORS_6.iter().any(|&n| !mask.is_active(c + n)))
        .collect();
    for coord in doomed {
        mask.deactivate(coord);
    }
    mask.shrink(|_| false);
}

/// Morphological closing: `iterations` dilations followed by `iterations`
/// erosions, filling gaps between nearby occupied voxels.
pub fn close(mask: &mut MaskGrid, iterations: u32) {
    for _ in 0..iterations {
        dilate(mask);
    }
    for _ in 0..iterations {
        erode(mask);
    }
}

/// Convert voxel topology into a valid narrow-band signed distance field.
///
/// Pipeline: closing, dilation, a layered 6-neighbor distance sweep out to
/// `half_band_voxels` on both sides of the boundary, then `smoothing`
/// mean-filter passes. The boundary straddles the faces between occupied
/// and unoccupied voxels, so first-layer voxels sit at `±0.5` voxel.
///
/// An empty mask yields an empty, all-background level set.
pub fn topology_to_level_set(
    mask: &MaskGrid,
    half_band_voxels: i32,
    closing: u32,
    dilation: u32,
    smoothing: u32,
    interrupter: &impl Interrupter,
) -> SparseGrid<f32> {
    interrupter.start("Converting point topology to level set");

    let mut mask = mask.clone();
    close(&mut mask, closing);
    if interrupter.was_interrupted() {
        interrupter.end();
        return empty_level_set(&mask, half_band_voxels);
    }
    for _ in 0..dilation {
        dilate(&mut mask);
    }
    if interrupter.was_interrupted() {
        interrupter.end();
        return empty_level_set(&mask, half_band_voxels);
    }

    let mut sdf = mask_to_sdf(&mask, half_band_voxels);
    smooth_level_set(&mut sdf, smoothing, interrupter);

    interrupter.end();
    sdf
}

fn empty_level_set(mask: &MaskGrid, half_band_voxels: i32) -> SparseGrid<f32> {
    let background = half_band_voxels as f32 * mask.transform().voxel_size();
    let mut sdf = SparseGrid::new(*mask.transform(), background);
    sdf.set_class(GridClass::LevelSet);
    sdf
}

/// Layered distance construction bounded to the half-band.
///
/// Occupied boundary voxels start at `-0.5` voxel, their unoccupied face
/// neighbors at `+0.5`; each further layer adds one voxel of distance.
/// Occupied voxels deeper than the band become pruned interior.
fn mask_to_sdf(mask: &MaskGrid, half_band_voxels: i32) -> SparseGrid<f32> {
    let dx = mask.transform().voxel_size();
    let background = half_band_voxels as f32 * dx;
    let mut sdf = empty_level_set(mask, half_band_voxels);
    if mask.is_empty() {
        return sdf;
    }

    let inside: HashSet<IVec3> = mask.active_coords().into_iter().collect();
    let mut visited: HashSet<IVec3> = HashSet::new();

    // Boundary seed layers.
    let mut inward: Vec<IVec3> = Vec::new();
    let mut outward: Vec<IVec3> = Vec::new();
    for &c in &inside {
        let mut on_boundary = false;
        for n in NEIGHBORS_6 {
            let nb = c + n;
            if !inside.contains(&nb) {
                on_boundary = true;
                if visited.insert(nb) {
                    sdf.set(nb, 0.5 * dx);
                    outward.push(nb);
                }
            }
        }
        if on_boundary && visited.insert(c) {
            sdf.set(c, -0.5 * dx);
            inward.push(c);
        }
    }

    // Outward sweep: +1 voxel per layer until the band edge.
    let mut distance = 0.5 * dx;
    while distance + dx < background && !outward.is_empty() {
        distance += dx;
        let mut next = Vec::new();
        for &c in &outward {
            for n in NEIGHBORS_6 {
                let nb = c + n;
                if !inside.contains(&nb) && visited.insert(nb) {
                    sdf.set(nb, distance);
                    next.push(nb);
                }
            }
        }
        outward = next;
    }

    // Inward sweep, mirrored.
    let mut distance = -0.5 * dx;
    while distance - dx > -background && !inward.is_empty() {
        distance -= dx;
        let mut next = Vec::new();
        for &c in &inward {
            for n in NEIGHBORS_6 {
                let nb = c + n;
                if inside.contains(&nb) && visited.insert(nb) {
                    sdf.set(nb, distance);
                    next.push(nb);
                }
            }
        }
        inward = next;
    }

    // Whatever occupied voxels the inward sweep never reached are deep
    // interior; prune collapses them to constant tiles.
    for &c in &inside {
        if !visited.contains(&c) {
            sdf.set(c, -background);
        }
    }

    sdf.prune();
    sdf
}
