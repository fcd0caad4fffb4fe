//! Sparse hashed-tile voxel fields.
//!
//! Storage is O(active voxels), not O(bounding-box volume): voxels live in
//! fixed-size 8^3 tiles keyed by tile origin in a hash map. A tile is either
//! dense (512 values plus an active bitmask) or constant (a single value for
//! the whole tile), so pruned level-set interiors and fog interiors collapse
//! to one entry instead of 512.
//!
//! # Conventions
//!
//! - Any coordinate without a stored tile reads as the background value.
//! - For level sets the background magnitude encodes the narrow-band
//!   half-width in world units; the sign of a stored value distinguishes
//!   inside (negative) from outside (positive).
//! - Tiles are the unit of parallel work: callers fan out over tiles with
//!   rayon and never share a tile between workers.

pub mod transform;

pub use transform::Transform;

use glam::IVec3;
use std::collections::HashMap;

/// Tile edge length in voxels.
pub const TILE_DIM: i32 = 8;

/// Number of voxels per tile.
pub const TILE_VOLUME: usize = 512;

/// Semantic class of a grid, mirrored into every output volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridClass {
    /// Narrow-band signed distance field; background magnitude is the
    /// half-band width in world units.
    LevelSet,
    /// Bounded [0, 1] density field. Carries no distance information.
    FogVolume,
    /// Anything else (index fields, attribute fields, masks).
    Unclassified,
}

/// Dense tile payload: 512 values and one active bit per voxel.
#[derive(Debug, Clone)]
pub(crate) struct DenseTile<T> {
    pub values: Vec<T>,
    pub active: [u64; 8],
}

impl<T: Copy> DenseTile<T> {
    pub fn new(fill: T) -> Self {
        DenseTile {
            values: vec![fill; TILE_VOLUME],
            active: [0; 8],
        }
    }

    /// Flat offset of a tile-local coordinate (x-major, as in a dense grid).
    #[inline(always)]
    pub fn offset(local: IVec3) -> usize {
        (local.x + local.y * TILE_DIM + local.z * TILE_DIM * TILE_DIM) as usize
    }

    #[inline(always)]
    pub fn is_active(&self, offset: usize) -> bool {
        self.active[offset >> 6] & (1u64 << (offset & 63)) != 0
    }

    #[inline(always)]
    pub fn set_active(&mut self, offset: usize, on: bool) {
        let bit = 1u64 << (offset & 63);
        if on {
            self.active[offset >> 6] |= bit;
        } else {
            self.active[offset >> 6] &= !bit;
        }
    }

    #[inline]
    pub fn active_count(&self) -> u32 {
        self.active.iter().map(|w| w.count_ones()).sum()
    }
}

/// A tile slot: dense payload or a tile-wide constant.
///
/// Constant tiles are how pruning keeps deep level-set interiors
/// (`-background`, inactive) and fog interiors (`1.0`, active) in O(1).
#[derive(Debug, Clone)]
pub(crate) enum Node<T> {
    Dense(DenseTile<T>),
    Constant { value: T, active: bool },
}

/// Sparse scalar/vector field over integer voxel coordinates.
#[derive(Debug, Clone)]
pub struct SparseGrid<T> {
    pub(crate) tiles: HashMap<IVec3, Node<T>>,
    pub(crate) background: T,
    transform: Transform,
    class: GridClass,
}

/// Origin of the tile containing voxel `coord`.
#[inline(always)]
pub(crate) fn tile_origin(coord: IVec3) -> IVec3 {
    IVec3::new(coord.x & !(TILE_DIM - 1), coord.y & !(TILE_DIM - 1), coord.z & !(TILE_DIM - 1))
}

impl<T: Copy> SparseGrid<T> {
    /// Create an empty grid with the given transform and background value.
    pub fn new(transform: Transform, background: T) -> Self {
        SparseGrid {
            tiles: HashMap::new(),
            background,
            transform,
            class: GridClass::Unclassified,
        }
    }

    /// Background value returned for coordinates without a stored voxel.
    #[inline]
    pub fn background(&self) -> T {
        self.background
    }

    /// World/index transform shared by all volumes of one conversion.
    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Semantic class tag.
    #[inline]
    pub fn class(&self) -> GridClass {
        self.class
    }

    /// Set the semantic class tag.
    pub fn set_class(&mut self, class: GridClass) {
        self.class = class;
    }

    /// Value at `coord`: the stored value if the tile exists, otherwise
    /// the background. Inactive stored voxels return their stored value
    /// (sign-aware for pruned level sets).
    pub fn value_at(&self, coord: IVec3) -> T {
        match self.tiles.get(&tile_origin(coord)) {
            Some(Node::Dense(tile)) => tile.values[DenseTile::<T>::offset(coord - tile_origin(coord))],
            Some(Node::Constant { value, .. }) => *value,
            None => self.background,
        }
    }

    /// Whether the voxel at `coord` is active (explicitly stored and live).
    pub fn is_active(&self, coord: IVec3) -> bool {
        match self.tiles.get(&tile_origin(coord)) {
            Some(Node::Dense(tile)) => tile.is_active(DenseTile::<T>::offset(coord - tile_origin(coord))),
            Some(Node::Constant { active, .. }) => *active,
            None => false,
        }
    }

    /// Store `value` at `coord` and mark the voxel active.
    ///
    /// Expands constant tiles to dense on first divergent write.
    pub fn set(&mut self, coord: IVec3, value: T) {
        let background = self.background;
        let node = self
            .tiles
            .entry(tile_origin(coord))
            .or_insert_with(|| Node::Dense(DenseTile::new(background)));

        if let Node::Constant { value: fill, active } = *node {
            let mut tile = DenseTile::new(fill);
            if active {
                tile.active = [u64::MAX; 8];
            }
            *node = Node::Dense(tile);
        }

        if let Node::Dense(tile) = node {
            let offset = DenseTile::<T>::offset(coord - tile_origin(coord));
            tile.values[offset] = value;
            tile.set_active(offset, true);
        }
    }

    /// Deactivate the voxel at `coord` and reset it to the background.
    pub fn deactivate(&mut self, coord: IVec3) {
        let background = self.background;
        if let Some(node) = self.tiles.get_mut(&tile_origin(coord)) {
            if let Node::Constant { value: fill, active } = *node {
                if !active {
                    return;
                }
                let mut tile = DenseTile::new(fill);
                tile.active = [u64::MAX; 8];
                *node = Node::Dense(tile);
            }
            if let Node::Dense(tile) = node {
                let offset = DenseTile::<T>::offset(coord - tile_origin(coord));
                tile.values[offset] = background;
                tile.set_active(offset, false);
            }
        }
    }

    /// Total number of active voxels.
    pub fn active_voxel_count(&self) -> u64 {
        self.tiles
            .values()
            .map(|node| match node {
                Node::Dense(tile) => tile.active_count() as u64,
                Node::Constant { active: true, .. } => TILE_VOLUME as u64,
                Node::Constant { active: false, .. } => 0,
            })
            .sum()
    }

    /// Whether the grid has no active voxels.
    pub fn is_empty(&self) -> bool {
        self.active_voxel_count() == 0
    }

    /// Visit every active voxel as `(coordinate, value)`.
    pub fn for_each_active(&self, mut f: impl FnMut(IVec3, T)) {
        for (&origin, node) in &self.tiles {
            match node {
                Node::Dense(tile) => {
                    for offset in 0..TILE_VOLUME {
                        if tile.is_active(offset) {
                            f(origin + local_coord(offset), tile.values[offset]);
                        }
                    }
                }
                Node::Constant { value, active: true } => {
                    for offset in 0..TILE_VOLUME {
                        f(origin + local_coord(offset), *value);
                    }
                }
                Node::Constant { active: false, .. } => {}
            }
        }
    }

    /// Collect the coordinates of every active voxel.
    pub fn active_coords(&self) -> Vec<IVec3> {
        let mut coords = Vec::new();
        self.for_each_active(|c, _| coords.push(c));
        coords
    }

    /// Drop tiles with no active voxels and no interior information.
    ///
    /// `keep` decides whether an inactive tile constant still carries
    /// meaning (e.g. a negative level-set interior) and must survive.
    pub(crate) fn shrink(&mut self, keep: impl Fn(&Node<T>) -> bool) {
        self.tiles.retain(|_, node| match node {
            Node::Dense(tile) => tile.active_count() > 0,
            constant => keep(constant),
        });
    }
}

/// Tile-local coordinate for a flat offset.
#[inline(always)]
pub(crate) fn local_coord(offset: usize) -> IVec3 {
    IVec3::new(
        (offset as i32) & (TILE_DIM - 1),
        ((offset as i32) >> 3) & (TILE_DIM - 1),
        (offset as i32) >> 6,
    )
}

/// Binary occupancy topology: activity is the payload, values are `true`.
pub type MaskGrid = SparseGrid<bool>;

impl MaskGrid {
    /// Create an empty occupancy mask.
    pub fn new_mask(transform: Transform) -> Self {
        SparseGrid::new(transform, false)
    }

    /// Activate the voxel at `coord`.
    #[inline]
    pub fn activate(&mut self, coord: IVec3) {
        self.set(coord, true);
    }
}

impl SparseGrid<f32> {
    /// Prune to a valid narrow band.
    ///
    /// Active voxels whose magnitude reaches the background are deactivated
    /// and clamped to `±background`; tiles left without active voxels
    /// collapse to a constant (`-background` interior) or are dropped
    /// (`+background` exterior). After this call no active voxel's
    /// magnitude reaches the half-band width.
    pub fn prune(&mut self) {
        let bg = self.background;
        for node in self.tiles.values_mut() {
            if let Node::Dense(tile) = node {
                let mut any_negative = false;
                for offset in 0..TILE_VOLUME {
                    let v = tile.values[offset];
                    if v <= -bg {
                        tile.values[offset] = -bg;
                        tile.set_active(offset, false);
                        any_negative = true;
                    } else if v >= bg {
                        tile.values[offset] = bg;
                        tile.set_active(offset, false);
                    } else if tile.is_active(offset) && v < 0.0 {
                        any_negative = true;
                    }
                }
                if tile.active_count() == 0 {
                    *node = Node::Constant {
                        value: if any_negative { -bg } else { bg },
                        active: false,
                    };
                }
            }
        }
        self.shrink(|node| matches!(node, Node::Constant { value, .. } if *value < 0.0));
    }
}
