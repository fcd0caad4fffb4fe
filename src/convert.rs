//! Conversion entry point: particles in, named sparse volumes out.
//!
//! [`convert`] drives the whole pipeline from a single configuration
//! struct: sphere or trail rasterization (or radius-free point topology),
//! optional merge into a reference level set, distance-to-fog remapping,
//! the CSG alpha mask, and attribute transfer. Hard configuration errors
//! abort before any rasterization; per-item problems accumulate as
//! warnings on the output.

use thiserror::Error;
use tracing::{debug, warn};

use crate::attributes::{transfer_attributes, AttributeRequest, OutputVolume, VolumeData};
use crate::grid::{GridClass, SparseGrid, Transform};
use crate::interrupt::Interrupter;
use crate::levelset::{csg_difference, csg_union, sdf_to_fog};
use crate::particles::{ParticleSet, ParticleSource, ScaledRadius};
use crate::raster::{RasterConfig, RasterOutput, SphereRasterizer};
use crate::topology::{point_mask_grid, topology_to_level_set};

/// Smallest accepted voxel size, in world units.
pub const MIN_VOXEL_SIZE: f32 = 1e-5;

/// Hard configuration errors, raised before any work is done.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The configured voxel size is unusably small (or not a number).
    #[error("voxel size {0} is below the minimum of {MIN_VOXEL_SIZE}")]
    VoxelSizeTooSmall(f32),
    /// No distance, fog, or mask name was set and no attributes were
    /// requested.
    #[error("no output volume was requested")]
    NoOutputRequested,
}

/// Non-fatal problems encountered during a conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertWarning {
    /// Particles fell outside the radius acceptance bounds and were skipped.
    #[error("ignored {below} particle(s) below the minimum radius and {above} above the maximum")]
    IgnoredParticles {
        /// Count skipped for being too small.
        below: u64,
        /// Count skipped for being too large.
        above: u64,
    },
    /// A requested attribute does not exist on the particle collection.
    #[error("attribute '{name}' not present on the particle collection")]
    UnknownAttribute {
        /// The missing attribute name.
        name: String,
    },
    /// Velocity trails were requested but the collection carries no
    /// velocity channel; spheres were rasterized instead.
    #[error("velocity trails requested without a velocity channel; rasterized spheres instead")]
    TrailsWithoutVelocity,
    /// The merge reference is not a level set, so a fresh output was built.
    #[error("merge reference is not a level set; built a fresh output instead")]
    MergeReferenceNotLevelSet,
    /// Attribute requests were skipped because the closest-particle index
    /// field is only built by sphere rasterization, not in point mode.
    #[error("skipped {requests} attribute request(s); attribute transfer requires sphere mode")]
    AttributesRequireSpheres {
        /// Number of requests skipped.
        requests: usize,
    },
}

/// Narrow-band half-width, in the caller's preferred units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HalfBand {
    /// Half-width as a voxel count.
    Voxels(f32),
    /// Half-width in world units, independent of voxel size.
    WorldUnits(f32),
}

impl HalfBand {
    /// Resolve to world units for a given voxel size.
    pub fn world_units(self, voxel_size: f32) -> f32 {
        match self {
            HalfBand::Voxels(v) => v * voxel_size,
            HalfBand::WorldUnits(w) => w,
        }
    }
}

impl Default for HalfBand {
    fn default() -> Self {
        HalfBand::Voxels(3.0)
    }
}

/// How particle geometry becomes a surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionMode {
    /// Rasterize each particle as a sphere, optionally swept backward
    /// along its velocity as a trail of spheres.
    Spheres {
        /// Multiplier applied to every per-point radius; acts as a fixed
        /// world-space radius when the collection has no radius channel.
        particle_scale: f32,
        /// Minimum accepted radius, in voxels.
        min_radius: f32,
        /// Maximum accepted radius, in voxels.
        max_radius: f32,
        /// Sweep particles along their velocity.
        velocity_trails: bool,
        /// Multiplier applied to velocities before sweeping.
        velocity_scale: f32,
        /// Spacing between trail spheres, in voxels.
        trail_resolution: f32,
    },
    /// Radius-free reconstruction from point occupancy topology.
    Points {
        /// Dilation passes after closing.
        dilation: u32,
        /// Morphological closing passes.
        closing: u32,
        /// Mean-filter smoothing passes on the final surface.
        smoothing: u32,
    },
}

impl ConversionMode {
    /// Point-topology mode with the stock morphology counts.
    pub fn points() -> Self {
        ConversionMode::Points {
            dilation: 1,
            closing: 1,
            smoothing: 0,
        }
    }
}

impl Default for ConversionMode {
    fn default() -> Self {
        ConversionMode::Spheres {
            particle_scale: 1.0,
            min_radius: 1.5,
            max_radius: 1e15,
            velocity_trails: false,
            velocity_scale: 1.0,
            trail_resolution: 1.0,
        }
    }
}

/// Full configuration of one conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertConfig {
    /// Uniform voxel edge length in world units. Overridden by the
    /// reference volume's transform when one is given.
    pub voxel_size: f32,
    /// Narrow-band half-width. Overridden by a level-set reference's
    /// background.
    pub half_band: HalfBand,
    /// Name for the signed distance output; `None` skips it.
    pub distance_name: Option<String>,
    /// Name for the fog/density output; `None` skips it.
    pub fog_name: Option<String>,
    /// Name for the alpha-mask output; `None` skips it.
    pub mask_name: Option<String>,
    /// Mask half-thickness as a fraction of the particle radius, clamped
    /// to `[0, 1]`. Zero yields an empty mask.
    pub mask_offset: f32,
    /// Surface construction mode.
    pub mode: ConversionMode,
    /// Attributes to transfer onto the narrow band.
    pub attributes: Vec<AttributeRequest>,
    /// Optional reference volume whose transform (and, for level sets,
    /// half-band) the outputs adopt.
    pub reference: Option<SparseGrid<f32>>,
    /// Union the new surface into a copy of the level-set reference.
    pub merge_reference: bool,
}

impl ConvertConfig {
    /// Stock configuration for a given voxel size: three-voxel half-band,
    /// sphere mode, a quarter-radius mask shell, and only the distance
    /// output (named `surface`) enabled.
    pub fn new(voxel_size: f32) -> Self {
        ConvertConfig {
            voxel_size,
            distance_name: Some("surface".to_string()),
            mask_offset: 0.25,
            ..Default::default()
        }
    }

    /// Enable the fog output under the stock name `density`.
    pub fn with_fog(mut self) -> Self {
        self.fog_name = Some("density".to_string());
        self
    }

    /// Enable the mask output under the stock name `boundingvolume`.
    pub fn with_mask(mut self) -> Self {
        self.mask_name = Some("boundingvolume".to_string());
        self
    }
}

/// Everything a conversion produced.
#[derive(Debug)]
pub struct ConvertOutput {
    /// Finished volumes, all sharing one transform, in request order:
    /// distance, fog, mask, then attributes.
    pub volumes: Vec<OutputVolume>,
    /// Particles skipped for falling below the minimum radius.
    pub ignored_below: u64,
    /// Particles skipped for exceeding the maximum radius.
    pub ignored_above: u64,
    /// Accumulated non-fatal problems.
    pub warnings: Vec<ConvertWarning>,
    /// Whether the conversion was cut short. Completed volumes are still
    /// present; nothing partial is.
    pub interrupted: bool,
}

impl ConvertOutput {
    /// Look up a finished volume by name.
    pub fn volume(&self, name: &str) -> Option<&OutputVolume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

/// Convert a particle collection into the configured sparse volumes.
///
/// Returns `Err` only for hard configuration mistakes; everything else
/// (ignored particles, unknown attributes, trail fallback, interruption)
/// is reported on the [`ConvertOutput`].
pub fn convert(
    source: &ParticleSet,
    config: &ConvertConfig,
    interrupter: &impl Interrupter,
) -> Result<ConvertOutput, ConvertError> {
    if !(config.voxel_size >= MIN_VOXEL_SIZE) {
        return Err(ConvertError::VoxelSizeTooSmall(config.voxel_size));
    }
    let need_index = !config.attributes.is_empty();
    if config.distance_name.is_none()
        && config.fog_name.is_none()
        && config.mask_name.is_none()
        && !need_index
    {
        return Err(ConvertError::NoOutputRequested);
    }

    let mut transform = Transform::new(config.voxel_size);
    let mut background = config.half_band.world_units(config.voxel_size);
    let mut warnings = Vec::new();
    let mut merge = config.merge_reference;

    if let Some(reference) = &config.reference {
        transform = *reference.transform();
        if reference.class() == GridClass::LevelSet {
            background = reference.background();
        } else if merge {
            warn!("merge reference is not a level set, building a fresh output");
            warnings.push(ConvertWarning::MergeReferenceNotLevelSet);
            merge = false;
        }
    }

    debug!(
        particles = source.len(),
        voxel_size = transform.voxel_size(),
        half_band = background,
        "starting particle conversion"
    );

    let need_distance =
        config.distance_name.is_some() || config.fog_name.is_some() || need_index;

    let mut volumes: Vec<OutputVolume> = Vec::new();
    let mut ignored_below = 0u64;
    let mut ignored_above = 0u64;
    let mut distance: Option<SparseGrid<f32>> = None;
    let mut index: Option<SparseGrid<i32>> = None;

    if need_distance {
        match &config.mode {
            ConversionMode::Spheres {
                particle_scale,
                min_radius,
                max_radius,
                velocity_trails,
                velocity_scale,
                trail_resolution,
            } => {
                let (out, trails_fallback) = raster_pass(
                    source,
                    transform,
                    background,
                    *particle_scale,
                    *min_radius,
                    *max_radius,
                    *velocity_trails,
                    *velocity_scale,
                    *trail_resolution,
                    need_index,
                    interrupter,
                );
                if trails_fallback {
                    warn!("no velocity channel, rasterizing spheres instead of trails");
                    warnings.push(ConvertWarning::TrailsWithoutVelocity);
                }
                ignored_below = out.ignored_below;
                ignored_above = out.ignored_above;
                if out.interrupted {
                    return Ok(interrupted_output(volumes, ignored_below, ignored_above, warnings));
                }
                distance = Some(out.distance);
                index = out.index;
            }
            ConversionMode::Points {
                dilation,
                closing,
                smoothing,
            } => {
                let mask = point_mask_grid(source, transform);
                let sdf = topology_to_level_set(
                    &mask,
                    half_band_voxels(background, transform.voxel_size()),
                    *closing,
                    *dilation,
                    *smoothing,
                    interrupter,
                );
                if interrupter.was_interrupted() {
                    return Ok(interrupted_output(volumes, ignored_below, ignored_above, warnings));
                }
                distance = Some(sdf);
                if need_index {
                    // The closest-particle index field only exists on the
                    // sphere rasterization path.
                    warn!(
                        requests = config.attributes.len(),
                        "attribute transfer requires sphere mode, skipping requests"
                    );
                    warnings.push(ConvertWarning::AttributesRequireSpheres {
                        requests: config.attributes.len(),
                    });
                }
            }
        }

        if ignored_below > 0 || ignored_above > 0 {
            warn!(
                below = ignored_below,
                above = ignored_above,
                "particles ignored by the radius bounds"
            );
            warnings.push(ConvertWarning::IgnoredParticles {
                below: ignored_below,
                above: ignored_above,
            });
        }

        if merge {
            if let (Some(reference), Some(fresh)) = (&config.reference, &distance) {
                distance = Some(csg_union(reference, fresh));
            }
        }
    }

    let mask_volume = if let Some(name) = &config.mask_name {
        match build_mask(source, config, transform, background, interrupter) {
            Some((fog, mask_below, mask_above, trails_fallback)) => {
                if trails_fallback && !warnings.contains(&ConvertWarning::TrailsWithoutVelocity) {
                    warnings.push(ConvertWarning::TrailsWithoutVelocity);
                }
                if !need_distance {
                    // Only the mask was requested; its enlarged pass is
                    // the sole source of acceptance counts.
                    ignored_below = mask_below;
                    ignored_above = mask_above;
                    if ignored_below > 0 || ignored_above > 0 {
                        warnings.push(ConvertWarning::IgnoredParticles {
                            below: ignored_below,
                            above: ignored_above,
                        });
                    }
                }
                Some(OutputVolume {
                    name: name.clone(),
                    vec_interp: None,
                    data: VolumeData::F32(fog),
                })
            }
            None => {
                return Ok(interrupted_output(volumes, ignored_below, ignored_above, warnings))
            }
        }
    } else {
        None
    };

    if let (Some(name), Some(d)) = (&config.distance_name, &distance) {
        volumes.push(OutputVolume {
            name: name.clone(),
            vec_interp: None,
            data: VolumeData::F32(d.clone()),
        });
    }
    if let (Some(name), Some(d)) = (&config.fog_name, distance) {
        let mut fog = d;
        sdf_to_fog(&mut fog);
        volumes.push(OutputVolume {
            name: name.clone(),
            vec_interp: None,
            data: VolumeData::F32(fog),
        });
    }
    if let Some(vol) = mask_volume {
        volumes.push(vol);
    }
    if need_index {
        if let Some(index) = &index {
            let (attr_volumes, attr_warnings) =
                transfer_attributes(&config.attributes, index, source);
            volumes.extend(attr_volumes);
            warnings.extend(attr_warnings);
        }
    }

    debug!(volumes = volumes.len(), "particle conversion finished");
    Ok(ConvertOutput {
        volumes,
        ignored_below,
        ignored_above,
        warnings,
        interrupted: false,
    })
}

fn interrupted_output(
    volumes: Vec<OutputVolume>,
    ignored_below: u64,
    ignored_above: u64,
    warnings: Vec<ConvertWarning>,
) -> ConvertOutput {
    debug!("particle conversion interrupted");
    ConvertOutput {
        volumes,
        ignored_below,
        ignored_above,
        warnings,
        interrupted: true,
    }
}

fn half_band_voxels(background: f32, voxel_size: f32) -> i32 {
    (background / voxel_size).ceil().max(1.0) as i32
}

/// One sphere-mode rasterization at a given radius scale. The second
/// return value reports a trails-to-spheres fallback.
#[allow(clippy::too_many_arguments)]
fn raster_pass(
    source: &ParticleSet,
    transform: Transform,
    background: f32,
    particle_scale: f32,
    min_radius: f32,
    max_radius: f32,
    velocity_trails: bool,
    velocity_scale: f32,
    trail_resolution: f32,
    with_index: bool,
    interrupter: &impl Interrupter,
) -> (RasterOutput, bool) {
    let scaled = ScaledRadius::new(source, particle_scale);
    let rasterizer = SphereRasterizer::new(
        transform,
        background,
        RasterConfig {
            min_radius,
            max_radius,
        },
        with_index,
        interrupter,
    );
    if velocity_trails {
        if source.has_velocity() {
            (
                rasterizer.rasterize_trails(&scaled, velocity_scale, trail_resolution),
                false,
            )
        } else {
            (rasterizer.rasterize_spheres(&scaled), true)
        }
    } else {
        (rasterizer.rasterize_spheres(&scaled), false)
    }
}

/// Build the alpha mask: CSG difference of the enlarged `(1 + f)` and
/// shrunk `(1 - f)` reconstructions, remapped to fog. `None` means the
/// build was interrupted.
fn build_mask(
    source: &ParticleSet,
    config: &ConvertConfig,
    transform: Transform,
    background: f32,
    interrupter: &impl Interrupter,
) -> Option<(SparseGrid<f32>, u64, u64, bool)> {
    let f = config.mask_offset.clamp(0.0, 1.0);
    if f <= 0.0 {
        let mut empty = SparseGrid::new(transform, 0.0);
        empty.set_class(GridClass::FogVolume);
        return Some((empty, 0, 0, false));
    }

    match &config.mode {
        ConversionMode::Spheres {
            particle_scale,
            min_radius,
            max_radius,
            velocity_trails,
            velocity_scale,
            trail_resolution,
        } => {
            let (enlarged, fallback) = raster_pass(
                source,
                transform,
                background,
                particle_scale * (1.0 + f),
                *min_radius,
                *max_radius,
                *velocity_trails,
                *velocity_scale,
                *trail_resolution,
                false,
                interrupter,
            );
            if enlarged.interrupted {
                return None;
            }
            let (shrunk, _) = raster_pass(
                source,
                transform,
                background,
                particle_scale * (1.0 - f),
                *min_radius,
                *max_radius,
                *velocity_trails,
                *velocity_scale,
                *trail_resolution,
                false,
                interrupter,
            );
            if shrunk.interrupted {
                return None;
            }
            let mut mask = csg_difference(&enlarged.distance, &shrunk.distance);
            sdf_to_fog(&mut mask);
            Some((mask, enlarged.ignored_below, enlarged.ignored_above, fallback))
        }
        ConversionMode::Points {
            dilation,
            closing,
            smoothing,
        } => {
            let d = (*dilation).min(1);
            let increase = (d as f32 * (1.0 + f)).ceil() as u32;
            let decrease = (d as f32 * (1.0 - f)) as u32;
            let occupancy = point_mask_grid(source, transform);
            let hb = half_band_voxels(background, transform.voxel_size());

            let enlarged =
                topology_to_level_set(&occupancy, hb, *closing, increase, *smoothing, interrupter);
            if interrupter.was_interrupted() {
                return None;
            }
            let shrunk =
                topology_to_level_set(&occupancy, hb, *closing, decrease, *smoothing, interrupter);
            if interrupter.was_interrupted() {
                return None;
            }
            let mut mask = csg_difference(&enlarged, &shrunk);
            sdf_to_fog(&mut mask);
            Some((mask, 0, 0, false))
        }
    }
}
