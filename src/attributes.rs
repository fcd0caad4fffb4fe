//! Attribute transfer onto the narrow band.
//!
//! For each requested point attribute this builds a volume whose active
//! topology is exactly that of the closest-particle index field, then fills
//! every active voxel from the particle the index field names. The fill is
//! a pure gather over read-only particle data, so tiles fan out over rayon
//! with no locking.

use glam::{IVec3, Vec3};
use rayon::prelude::*;
use tracing::warn;

use crate::convert::ConvertWarning;
use crate::grid::{DenseTile, Node, SparseGrid, TILE_VOLUME};
use crate::particles::{AttrData, ParticleSet};

/// Pseudo-attribute selecting the closest-particle index field itself,
/// exported directly without resampling.
pub const POINT_LIST_INDEX: &str = "point_list_index";

/// How downstream consumers should reinterpret a 3-vector volume.
///
/// Stored verbatim on the output; the transfer engine itself never
/// transforms components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VecInterp {
    /// Tuple of independent scalars carried as one volume.
    Invariant,
    /// Direction-like vector (gradient).
    Covariant,
    /// Direction-like vector, renormalized after transforms (normal).
    CovariantNormalize,
    /// Displacement-like vector.
    ContravariantRelative,
    /// Position-like vector.
    ContravariantAbsolute,
}

/// One requested attribute output.
#[derive(Debug, Clone)]
pub struct AttributeRequest {
    /// Point attribute name on the particle collection.
    pub name: String,
    /// Output volume name; empty/absent falls back to the attribute name.
    pub grid_name: Option<String>,
    /// Vector semantic for 3-tuple channels. `None` slices the tuple into
    /// three scalar volumes instead.
    pub vec_interp: Option<VecInterp>,
}

impl AttributeRequest {
    /// Request the attribute under its own name, component-sliced if a
    /// 3-tuple.
    pub fn new(name: impl Into<String>) -> Self {
        AttributeRequest {
            name: name.into(),
            grid_name: None,
            vec_interp: None,
        }
    }

    /// Override the output volume name.
    pub fn named(mut self, grid_name: impl Into<String>) -> Self {
        self.grid_name = Some(grid_name.into());
        self
    }

    /// Tag a 3-tuple channel with a vector semantic, producing one vector
    /// volume instead of three scalars.
    pub fn interpreted_as(mut self, vec_interp: VecInterp) -> Self {
        self.vec_interp = Some(vec_interp);
        self
    }
}

/// Sparse payload of an output volume, one variant per supported value kind.
#[derive(Debug, Clone)]
pub enum VolumeData {
    /// 32-bit float scalars (distance, fog, mask, float attributes).
    F32(SparseGrid<f32>),
    /// 64-bit float scalars.
    F64(SparseGrid<f64>),
    /// 32-bit integer scalars (index field, integer attributes).
    I32(SparseGrid<i32>),
    /// 64-bit integer scalars.
    I64(SparseGrid<i64>),
    /// Float 3-vectors.
    Vec3F(SparseGrid<Vec3>),
    /// Integer 3-vectors.
    Vec3I(SparseGrid<IVec3>),
}

impl VolumeData {
    /// Number of active voxels in the payload.
    pub fn active_voxel_count(&self) -> u64 {
        match self {
            VolumeData::F32(g) => g.active_voxel_count(),
            VolumeData::F64(g) => g.active_voxel_count(),
            VolumeData::I32(g) => g.active_voxel_count(),
            VolumeData::I64(g) => g.active_voxel_count(),
            VolumeData::Vec3F(g) => g.active_voxel_count(),
            VolumeData::Vec3I(g) => g.active_voxel_count(),
        }
    }
}

/// A finished, named output volume.
#[derive(Debug, Clone)]
pub struct OutputVolume {
    /// Volume name as handed to the host container.
    pub name: String,
    /// Vector semantic tag, if any.
    pub vec_interp: Option<VecInterp>,
    /// Sparse payload.
    pub data: VolumeData,
}

impl OutputVolume {
    fn new(name: String, data: VolumeData) -> Self {
        OutputVolume {
            name,
            vec_interp: None,
            data,
        }
    }
}

/// Copy the index field's active topology and fill each active voxel from
/// the particle it names. Parallel over tiles.
fn gather<U: Copy + Send + Sync>(
    index: &SparseGrid<i32>,
    background: U,
    value_of: impl Fn(usize) -> U + Sync,
) -> SparseGrid<U> {
    let tiles: Vec<(IVec3, Node<U>)> = index
        .tiles
        .par_iter()
        .filter_map(|(&origin, node)| {
            let Node::Dense(ids) = node else {
                return None; // the index field stores no constant tiles
            };
            let mut tile = DenseTile::new(background);
            for offset in 0..TILE_VOLUME {
                if ids.is_active(offset) {
                    tile.values[offset] = value_of(ids.values[offset] as usize);
                    tile.set_active(offset, true);
                }
            }
            Some((origin, Node::Dense(tile)))
        })
        .collect();

    let mut out = SparseGrid::new(*index.transform(), background);
    out.tiles = tiles.into_iter().collect();
    out
}

/// Build one output volume per request (or one per component for sliced
/// 3-tuples) by gathering through the closest-particle index field.
///
/// Unrecognized attributes are skipped with a warning; the pseudo-attribute
/// [`POINT_LIST_INDEX`] exports the index field itself.
pub fn transfer_attributes(
    requests: &[AttributeRequest],
    index: &SparseGrid<i32>,
    particles: &ParticleSet,
) -> (Vec<OutputVolume>, Vec<ConvertWarning>) {
    let mut volumes = Vec::new();
    let mut warnings = Vec::new();

    for request in requests {
        let base = match &request.grid_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => request.name.clone(),
        };

        if request.name == POINT_LIST_INDEX {
            volumes.push(OutputVolume::new(base, VolumeData::I32(index.clone())));
            continue;
        }

        let Some(channel) = particles.attribute(&request.name) else {
            warn!(attribute = %request.name, "skipped unrecognized attribute");
            warnings.push(ConvertWarning::UnknownAttribute {
                name: request.name.clone(),
            });
            continue;
        };

        match channel {
            AttrData::I32(v) => {
                volumes.push(OutputVolume::new(
                    base,
                    VolumeData::I32(gather(index, 0, |i| v[i])),
                ));
            }
            AttrData::I64(v) => {
                volumes.push(OutputVolume::new(
                    base,
                    VolumeData::I64(gather(index, 0, |i| v[i])),
                ));
            }
            AttrData::F32(v) => {
                volumes.push(OutputVolume::new(
                    base,
                    VolumeData::F32(gather(index, 0.0, |i| v[i])),
                ));
            }
            AttrData::F64(v) => {
                volumes.push(OutputVolume::new(
                    base,
                    VolumeData::F64(gather(index, 0.0, |i| v[i])),
                ));
            }
            AttrData::Vec3F(v) => match request.vec_interp {
                Some(interp) => {
                    let mut vol = OutputVolume::new(
                        base,
                        VolumeData::Vec3F(gather(index, Vec3::ZERO, |i| v[i])),
                    );
                    vol.vec_interp = Some(interp);
                    volumes.push(vol);
                }
                None => {
                    let components: [fn(Vec3) -> f32; 3] = [|p| p.x, |p| p.y, |p| p.z];
                    for (c, component) in components.into_iter().enumerate() {
                        volumes.push(OutputVolume::new(
                            format!("{base}_{c}"),
                            VolumeData::F32(gather(index, 0.0, |i| component(v[i]))),
                        ));
                    }
                }
            },
            AttrData::Vec3I(v) => match request.vec_interp {
                Some(interp) => {
                    let mut vol = OutputVolume::new(
                        base,
                        VolumeData::Vec3I(gather(index, IVec3::ZERO, |i| v[i])),
                    );
                    vol.vec_interp = Some(interp);
                    volumes.push(vol);
                }
                None => {
                    let components: [fn(IVec3) -> i32; 3] = [|p| p.x, |p| p.y, |p| p.z];
                    for (c, component) in components.into_iter().enumerate() {
                        volumes.push(OutputVolume::new(
                            format!("{base}_{c}"),
                            VolumeData::I32(gather(index, 0, |i| component(v[i]))),
                        ));
                    }
                }
            },
        }
    }

    (volumes, warnings)
}
