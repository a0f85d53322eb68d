//! Minimal game-world snapshot shared between admission checks and
//! optimistic updates.
//!
//! Requirements only ever see a [`WorldView`], which exposes the read
//! surface; `process` steps receive the full [`WorldState`] and may mutate
//! it, but only after the backend has confirmed the remote operation.
//! Every mutation helper touches a single map entry so a failed remote
//! call never leaves a partial update visible.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Side length of a region in tiles
pub const REGION_SIZE: i32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Orthogonal neighbors, plus diagonals when requested
    pub fn neighbors(&self, diagonal: bool) -> Vec<Coord> {
        let mut out = vec![
            Coord::new(self.x + 1, self.y),
            Coord::new(self.x - 1, self.y),
            Coord::new(self.x, self.y + 1),
            Coord::new(self.x, self.y - 1),
        ];
        if diagonal {
            out.push(Coord::new(self.x + 1, self.y + 1));
            out.push(Coord::new(self.x + 1, self.y - 1));
            out.push(Coord::new(self.x - 1, self.y + 1));
            out.push(Coord::new(self.x - 1, self.y - 1));
        }
        out
    }

    pub fn manhattan(&self, other: Coord) -> u64 {
        self.x.abs_diff(other.x) as u64 + self.y.abs_diff(other.y) as u64
    }

    pub fn region(&self) -> RegionId {
        RegionId {
            x: self.x.div_euclid(REGION_SIZE),
            y: self.y.div_euclid(REGION_SIZE),
        }
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Region coordinates on the region grid (tile coords divided by [`REGION_SIZE`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId {
    pub x: i32,
    pub y: i32,
}

impl RegionId {
    /// Chebyshev distance on the region grid
    pub fn distance(&self, other: RegionId) -> u64 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y)) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terrain {
    /// Mined-out, walkable ground
    Open,
    /// Unmined rock; the default for tiles never touched
    Rock,
    Water,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub terrain: Terrain,
    pub wall: bool,
    pub force: Option<ForceId>,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            terrain: Terrain::Rock,
            wall: false,
            force: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub owner: Option<ForceId>,
    pub contested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub pos: Coord,
    pub force: ForceId,
}

/// The single shared, mutable game-world structure
#[derive(Debug, Default)]
pub struct WorldState {
    tiles: DashMap<Coord, Tile>,
    regions: DashMap<RegionId, Region>,
    units: DashMap<UnitId, Unit>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tiles absent from the map are unmined rock
    pub fn tile(&self, coord: Coord) -> Tile {
        self.tiles.get(&coord).map(|t| *t).unwrap_or_default()
    }

    pub fn region(&self, id: RegionId) -> Option<Region> {
        self.regions.get(&id).map(|r| *r)
    }

    pub fn unit(&self, id: UnitId) -> Option<Unit> {
        self.units.get(&id).map(|u| *u)
    }

    pub fn is_traversable(&self, coord: Coord) -> bool {
        let tile = self.tile(coord);
        tile.terrain == Terrain::Open && !tile.wall
    }

    /// Unmined rock, or a walled tile, can be mined out
    pub fn is_minable(&self, coord: Coord) -> bool {
        let tile = self.tile(coord);
        tile.terrain == Terrain::Rock || tile.wall
    }

    pub fn region_owner(&self, id: RegionId) -> Option<ForceId> {
        self.regions.get(&id).and_then(|r| r.owner)
    }

    /// The tile sits in a region the force owns, uncontested
    pub fn controlled_by(&self, coord: Coord, force: ForceId) -> bool {
        match self.region(coord.region()) {
            Some(region) => region.owner == Some(force) && !region.contested,
            None => false,
        }
    }

    /// One of the force's units stands on the tile
    pub fn has_unit_at(&self, coord: Coord, force: ForceId) -> bool {
        self.units
            .iter()
            .any(|u| u.pos == coord && u.force == force)
    }

    // ------------------------------------------------------------------
    // Optimistic updates, applied by process steps after confirmation.
    // Each helper writes exactly one map entry.
    // ------------------------------------------------------------------

    pub fn apply_mine(&self, coord: Coord, force: ForceId) {
        self.tiles.insert(
            coord,
            Tile {
                terrain: Terrain::Open,
                wall: false,
                force: Some(force),
            },
        );
    }

    pub fn apply_wall(&self, coord: Coord, force: ForceId) {
        let mut tile = self.tiles.entry(coord).or_default();
        tile.wall = true;
        tile.force = Some(force);
    }

    pub fn apply_unwall(&self, coord: Coord) {
        if let Some(mut tile) = self.tiles.get_mut(&coord) {
            tile.wall = false;
        }
    }

    pub fn apply_claim(&self, id: RegionId, force: ForceId) {
        self.regions.insert(
            id,
            Region {
                owner: Some(force),
                contested: false,
            },
        );
    }

    pub fn apply_unit_move(&self, id: UnitId, dest: Coord) {
        if let Some(mut unit) = self.units.get_mut(&id) {
            unit.pos = dest;
        }
    }

    // ------------------------------------------------------------------
    // Seeding, for world bootstrap and tests
    // ------------------------------------------------------------------

    pub fn set_tile(&self, coord: Coord, tile: Tile) {
        self.tiles.insert(coord, tile);
    }

    pub fn set_region(&self, id: RegionId, region: Region) {
        self.regions.insert(id, region);
    }

    pub fn set_unit(&self, id: UnitId, unit: Unit) {
        self.units.insert(id, unit);
    }
}

/// Read-only handle to the world, handed to requirement evaluators.
///
/// Requirements must not write scheduling or world state; the type only
/// exposes the read surface.
#[derive(Clone)]
pub struct WorldView {
    state: Arc<WorldState>,
}

impl WorldView {
    pub fn new(state: Arc<WorldState>) -> Self {
        Self { state }
    }

    pub fn tile(&self, coord: Coord) -> Tile {
        self.state.tile(coord)
    }

    pub fn region(&self, id: RegionId) -> Option<Region> {
        self.state.region(id)
    }

    pub fn unit(&self, id: UnitId) -> Option<Unit> {
        self.state.unit(id)
    }

    pub fn is_traversable(&self, coord: Coord) -> bool {
        self.state.is_traversable(coord)
    }

    pub fn is_minable(&self, coord: Coord) -> bool {
        self.state.is_minable(coord)
    }

    pub fn region_owner(&self, id: RegionId) -> Option<ForceId> {
        self.state.region_owner(id)
    }

    pub fn controlled_by(&self, coord: Coord, force: ForceId) -> bool {
        self.state.controlled_by(coord, force)
    }

    pub fn has_unit_at(&self, coord: Coord, force: ForceId) -> bool {
        self.state.has_unit_at(coord, force)
    }
}
