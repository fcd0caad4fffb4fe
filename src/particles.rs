//! Particle source adapter.
//!
//! Read-only view over an external point collection: position, optional
//! per-point radius, optional per-point velocity, and a stable integer id
//! (the point's index). Radius and velocity absence is a per-collection
//! property, not per-particle.

use glam::{IVec3, Vec3};
use std::collections::HashMap;
use thiserror::Error;

/// Per-particle attribute channel, one of the supported value kinds.
///
/// Attribute typing is a closed set dispatched once per requested channel;
/// there is no open-ended runtime polymorphism.
#[derive(Debug, Clone)]
pub enum AttrData {
    /// 32-bit signed integers.
    I32(Vec<i32>),
    /// 64-bit signed integers.
    I64(Vec<i64>),
    /// 32-bit floats.
    F32(Vec<f32>),
    /// 64-bit floats.
    F64(Vec<f64>),
    /// 3-vectors of float.
    Vec3F(Vec<Vec3>),
    /// 3-vectors of integer.
    Vec3I(Vec<IVec3>),
}

impl AttrData {
    /// Number of per-particle entries in the channel.
    pub fn len(&self) -> usize {
        match self {
            AttrData::I32(v) => v.len(),
            AttrData::I64(v) => v.len(),
            AttrData::F32(v) => v.len(),
            AttrData::F64(v) => v.len(),
            AttrData::Vec3F(v) => v.len(),
            AttrData::Vec3I(v) => v.len(),
        }
    }

    /// Whether the channel has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors raised while assembling a particle collection.
#[derive(Error, Debug)]
pub enum ParticleError {
    /// A per-particle channel does not match the collection size.
    #[error("channel '{name}' has {got} entries, expected {expected}")]
    ChannelLengthMismatch {
        /// Channel name.
        name: String,
        /// Entries supplied.
        got: usize,
        /// Particle count of the collection.
        expected: usize,
    },
}

/// Read-only particle collection consumed by the conversion stages.
///
/// `radius(i)` must return a usable world-space radius for every particle:
/// collections without a radius channel report a constant fallback so the
/// caller-supplied particle scale acts as a fixed radius, matching the
/// behavior of the original point-scale convention.
pub trait ParticleSource: Sync {
    /// Number of particles.
    fn len(&self) -> usize;

    /// Whether the collection is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// World-space position of particle `i`.
    fn position(&self, i: usize) -> Vec3;

    /// Whether the collection carries a per-particle radius channel.
    fn has_radius(&self) -> bool;

    /// World-space radius of particle `i` (1.0 when no radius channel).
    fn radius(&self, i: usize) -> f32;

    /// Whether the collection carries a per-particle velocity channel.
    fn has_velocity(&self) -> bool;

    /// World-space velocity of particle `i` (zero when no velocity channel).
    fn velocity(&self, i: usize) -> Vec3;
}

/// Owned, Vec-backed particle collection with optional radius, velocity,
/// and named attribute channels.
#[derive(Debug, Clone, Default)]
pub struct ParticleSet {
    positions: Vec<Vec3>,
    radii: Option<Vec<f32>>,
    velocities: Option<Vec<Vec3>>,
    attributes: HashMap<String, AttrData>,
}

impl ParticleSet {
    /// Collection from bare positions (no radius or velocity channels).
    pub fn from_positions(positions: Vec<Vec3>) -> Self {
        ParticleSet {
            positions,
            ..Default::default()
        }
    }

    /// Attach a per-particle radius channel.
    pub fn with_radii(mut self, radii: Vec<f32>) -> Result<Self, ParticleError> {
        self.check_len("radius", radii.len())?;
        self.radii = Some(radii);
        Ok(self)
    }

    /// Attach a per-particle velocity channel.
    pub fn with_velocities(mut self, velocities: Vec<Vec3>) -> Result<Self, ParticleError> {
        self.check_len("velocity", velocities.len())?;
        self.velocities = Some(velocities);
        Ok(self)
    }

    /// Attach a named attribute channel for later transfer onto the
    /// narrow band.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        data: AttrData,
    ) -> Result<Self, ParticleError> {
        let name = name.into();
        self.check_len(&name, data.len())?;
        self.attributes.insert(name, data);
        Ok(self)
    }

    /// Look up a named attribute channel.
    pub fn attribute(&self, name: &str) -> Option<&AttrData> {
        self.attributes.get(name)
    }

    fn check_len(&self, name: &str, got: usize) -> Result<(), ParticleError> {
        if got != self.positions.len() {
            return Err(ParticleError::ChannelLengthMismatch {
                name: name.to_string(),
                got,
                expected: self.positions.len(),
            });
        }
        Ok(())
    }
}

impl ParticleSource for ParticleSet {
    fn len(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, i: usize) -> Vec3 {
        self.positions[i]
    }

    fn has_radius(&self) -> bool {
        self.radii.is_some()
    }

    fn radius(&self, i: usize) -> f32 {
        match &self.radii {
            Some(r) => r[i],
            None => 1.0,
        }
    }

    fn has_velocity(&self) -> bool {
        self.velocities.is_some()
    }

    fn velocity(&self, i: usize) -> Vec3 {
        match &self.velocities {
            Some(v) => v[i],
            None => Vec3::ZERO,
        }
    }
}

/// Adapter that scales every radius of an underlying source.
///
/// The rasterizer sees scaled radii directly; the mask builder wraps the
/// same source twice, at `(1 + f)` and `(1 - f)` times the base scale, to
/// build its enlarged and shrunk reconstructions.
pub struct ScaledRadius<'a, S: ParticleSource + ?Sized> {
    source: &'a S,
    scale: f32,
}

impl<'a, S: ParticleSource + ?Sized> ScaledRadius<'a, S> {
    /// Wrap `source`, multiplying every radius by `scale`.
    pub fn new(source: &'a S, scale: f32) -> Self {
        ScaledRadius { source, scale }
    }
}

impl<S: ParticleSource + ?Sized> ParticleSource for ScaledRadius<'_, S> {
    fn len(&self) -> usize {
        self.source.len()
    }

    fn position(&self, i: usize) -> Vec3 {
        self.source.position(i)
    }

    fn has_radius(&self) -> bool {
        self.source.has_radius()
    }

    fn radius(&self, i: usize) -> f32 {
        self.source.radius(i) * self.scale
    }

    fn has_velocity(&self) -> bool {
        self.source.has_velocity()
    }

    fn velocity(&self, i: usize) -> Vec3 {
        self.source.velocity(i)
    }
}
