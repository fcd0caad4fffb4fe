//! Integration tests: alpha mask construction and fog remapping
//!
//! Verifies mask monotonicity in the offset fraction, the empty mask at
//! zero offset, shell placement around the surface, and the fog range
//! contract.

mod common;

use common::*;
use vapor::prelude::*;

fn mask_config(offset: f32) -> ConvertConfig {
    let mut config = ConvertConfig::new(1.0).with_mask();
    config.distance_name = None;
    config.mask_offset = offset;
    config
}

// ============================================================================
// Mask monotonicity and degenerate offset
// ============================================================================

#[test]
fn mask_active_count_is_monotone_in_offset() {
    let set = single_particle(4.0);
    let mut previous = 0u64;
    for offset in [0.0, 0.1, 0.25, 0.5] {
        let output = convert(&set, &mask_config(offset), &NullInterrupter).unwrap();
        let count = f32_volume(&output, "boundingvolume").active_voxel_count();
        assert!(
            count >= previous,
            "mask shrank when offset grew to {}: {} < {}",
            offset,
            count,
            previous
        );
        previous = count;
    }
}

#[test]
fn zero_offset_mask_is_empty() {
    let output = convert(&single_particle(4.0), &mask_config(0.0), &NullInterrupter).unwrap();
    let mask = f32_volume(&output, "boundingvolume");
    assert_eq!(mask.active_voxel_count(), 0);
    assert_eq!(mask.class(), GridClass::FogVolume);
}

#[test]
fn offset_beyond_one_is_clamped() {
    let at_one = convert(&single_particle(4.0), &mask_config(1.0), &NullInterrupter).unwrap();
    let beyond = convert(&single_particle(4.0), &mask_config(5.0), &NullInterrupter).unwrap();
    assert_eq!(
        f32_volume(&at_one, "boundingvolume").active_voxel_count(),
        f32_volume(&beyond, "boundingvolume").active_voxel_count()
    );
}

// ============================================================================
// Shell placement: r = 4, f = 0.25 puts the shell between radii 3 and 5
// ============================================================================

#[test]
fn mask_shell_sits_between_scaled_reconstructions() {
    let output = convert(&single_particle(4.0), &mask_config(0.25), &NullInterrupter).unwrap();
    let mask = f32_volume(&output, "boundingvolume");

    // On the unscaled surface: solid shell.
    assert!(mask.value_at(IVec3::new(4, 0, 0)) > 0.0);
    assert!(mask.value_at(IVec3::new(0, 4, 0)) > 0.0);
    // Inside the shrunk reconstruction and outside the enlarged one: empty.
    assert!(!mask.is_active(IVec3::ZERO));
    assert!(!mask.is_active(IVec3::new(1, 0, 0)));
    assert!(!mask.is_active(IVec3::new(8, 0, 0)));
}

#[test]
fn points_mode_mask_is_nonempty() {
    let set = ParticleSet::from_positions(vec![
        Vec3::ZERO,
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ]);
    let mut config = mask_config(0.25);
    config.mode = ConversionMode::points();
    let output = convert(&set, &config, &NullInterrupter).unwrap();
    let mask = f32_volume(&output, "boundingvolume");

    assert!(mask.active_voxel_count() > 0);
    let mut in_range = true;
    mask.for_each_active(|_, v| {
        if !(0.0..=1.0).contains(&v) {
            in_range = false;
        }
    });
    assert!(in_range);
}

// ============================================================================
// Fog contract
// ============================================================================

#[test]
fn fog_ramps_from_surface_to_interior() {
    // Fat sphere with a narrow band so a pruned interior exists.
    let mut config = ConvertConfig::new(1.0).with_fog();
    config.half_band = HalfBand::Voxels(2.0);
    let output = convert(&single_particle(6.0), &config, &NullInterrupter).unwrap();
    let fog = f32_volume(&output, "density");

    assert_eq!(fog.class(), GridClass::FogVolume);
    assert_eq!(fog.background(), 0.0);

    // Deep interior (pruned constant) reads as solid fog.
    assert_eq!(fog.value_at(IVec3::ZERO), 1.0);
    assert!(fog.is_active(IVec3::ZERO));
    // One voxel inside the surface: halfway up the two-voxel ramp.
    assert!((fog.value_at(IVec3::new(5, 0, 0)) - 0.5).abs() < 1e-4);
    // On and past the surface: inactive zero.
    assert!(!fog.is_active(IVec3::new(6, 0, 0)));
    assert_eq!(fog.value_at(IVec3::new(7, 0, 0)), 0.0);
}

#[test]
fn fog_values_stay_in_unit_range() {
    let config = ConvertConfig::new(0.5).with_fog();
    let output = convert(&scattered_particles(150, 9), &config, &NullInterrupter).unwrap();
    let fog = f32_volume(&output, "density");

    assert!(fog.active_voxel_count() > 0);
    let mut in_range = true;
    fog.for_each_active(|_, v| {
        if !(0.0..=1.0).contains(&v) {
            in_range = false;
        }
    });
    assert!(in_range, "fog left the [0, 1] range");
}

#[test]
fn fog_and_distance_share_topology_outside_interior() {
    let config = ConvertConfig::new(1.0).with_fog();
    let output = convert(&single_particle(3.0), &config, &NullInterrupter).unwrap();
    let distance = f32_volume(&output, "surface");
    let fog = f32_volume(&output, "density");

    // Every strictly interior active distance voxel has fog; exterior ones
    // do not.
    distance.for_each_active(|c, v| {
        if v < 0.0 {
            assert!(fog.is_active(c), "interior voxel {:?} lost its fog", c);
        } else {
            assert!(!fog.is_active(c), "exterior voxel {:?} kept fog", c);
        }
    });
}
