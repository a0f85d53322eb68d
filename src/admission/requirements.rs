//! Per-kind admission factories.
//!
//! Tile-targeted actions (mining, walling, unwalling, force-mining,
//! claiming) are path-gated: the search starts at the target and must
//! reach a tile the acting force can operate from. Unit movement uses A*
//! toward a fixed destination and is usually time-boxed by the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::admission::search::{astar, find_path, PathLimits};
use crate::admission::{requirement, with_deadline, Admission, RequirementFn};
use crate::world::{Coord, ForceId, UnitId};

/// Payload produced by every path-gated requirement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPayload {
    pub path: Vec<Coord>,
}

/// Payload produced by [`move_units_requirement`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovePayload {
    /// One path per unit, keyed by unit id
    pub paths: BTreeMap<u64, Vec<Coord>>,
}

/// Mine out a rock or wall tile. Admitted once a traversable corridor
/// connects the target to a tile inside the force's territory.
pub fn mine_requirement(target: Coord, force: ForceId, limits: PathLimits) -> RequirementFn {
    requirement(move |view| async move {
        let found = find_path(
            target,
            limits,
            |c| view.is_minable(c),
            |c| view.is_traversable(c),
            |c, _| view.controlled_by(c, force),
        );
        path_admission(found)
    })
}

/// Mine regardless of territory: the corridor must instead end on a tile
/// where one of the force's units is standing.
pub fn force_mine_requirement(target: Coord, force: ForceId, limits: PathLimits) -> RequirementFn {
    requirement(move |view| async move {
        let found = find_path(
            target,
            limits,
            |c| view.is_minable(c),
            |c| view.is_traversable(c),
            |c, _| view.has_unit_at(c, force),
        );
        path_admission(found)
    })
}

/// Raise a wall on an open tile reachable from the force's territory
pub fn wall_requirement(target: Coord, force: ForceId, limits: PathLimits) -> RequirementFn {
    requirement(move |view| async move {
        let found = find_path(
            target,
            limits,
            |c| view.is_traversable(c),
            |c| view.is_traversable(c),
            |c, _| view.controlled_by(c, force),
        );
        path_admission(found)
    })
}

/// Tear down a wall reachable from the force's territory
pub fn unwall_requirement(target: Coord, force: ForceId, limits: PathLimits) -> RequirementFn {
    requirement(move |view| async move {
        let found = find_path(
            target,
            limits,
            |c| view.tile(c).wall,
            |c| view.is_traversable(c),
            |c, _| view.controlled_by(c, force),
        );
        path_admission(found)
    })
}

/// Claim the target tile's region. The region must be unowned and the
/// target connected to territory the force already controls.
pub fn claim_requirement(target: Coord, force: ForceId, limits: PathLimits) -> RequirementFn {
    requirement(move |view| async move {
        if view.region_owner(target.region()).is_some() {
            return Ok(Admission::Deferred);
        }
        let found = find_path(
            target,
            limits,
            |c| view.is_traversable(c),
            |c| view.is_traversable(c),
            |c, _| view.controlled_by(c, force),
        );
        path_admission(found)
    })
}

/// Route every unit to the destination with A*, bounded by path length
/// and region distance, the whole admission time-boxed by `bound`.
///
/// Units too far away (in regions) or without a route defer admission;
/// once `bound` elapses the requirement reports inaccessible and the
/// process step aborts without side effects.
pub fn move_units_requirement(
    units: Vec<UnitId>,
    dest: Coord,
    limits: PathLimits,
    max_region_distance: u64,
    bound: Duration,
) -> RequirementFn {
    let inner = requirement(move |view| {
        let units = units.clone();
        async move {
            let mut paths = BTreeMap::new();
            for unit_id in units {
                let Some(unit) = view.unit(unit_id) else {
                    return Ok(Admission::Deferred);
                };
                if unit.pos.region().distance(dest.region()) > max_region_distance {
                    return Ok(Admission::Deferred);
                }
                let Some(path) = astar(unit.pos, dest, limits, |c| view.is_traversable(c)) else {
                    return Ok(Admission::Deferred);
                };
                paths.insert(unit_id.0, path);
            }
            Admission::granted(&MovePayload { paths })
        }
    });
    with_deadline(inner, bound)
}

fn path_admission(found: Option<Vec<Coord>>) -> crate::core::errors::Result<Admission> {
    match found {
        Some(path) => Admission::granted(&PathPayload { path }),
        None => Ok(Admission::Deferred),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Region, Terrain, Tile, Unit, WorldState, WorldView};
    use std::sync::Arc;

    fn open_tile(force: Option<ForceId>) -> Tile {
        Tile {
            terrain: Terrain::Open,
            wall: false,
            force,
        }
    }

    /// Corridor (0,0)..(4,0) mined open, region of (0,0) owned by force 1
    fn corridor_world() -> (Arc<WorldState>, ForceId) {
        let world = Arc::new(WorldState::new());
        let force = ForceId(1);
        for x in 0..5 {
            world.set_tile(Coord::new(x, 0), open_tile(Some(force)));
        }
        world.set_region(
            Coord::new(0, 0).region(),
            Region {
                owner: Some(force),
                contested: false,
            },
        );
        (world, force)
    }

    #[tokio::test]
    async fn test_mine_admits_reachable_rock() {
        let (world, force) = corridor_world();
        // region covers the whole corridor, so (5,0) is rock adjacent to it
        let req = mine_requirement(Coord::new(5, 0), force, PathLimits::new(10, false));
        match req(WorldView::new(world)).await.unwrap() {
            Admission::Granted(value) => {
                let payload: PathPayload = serde_json::from_value(value).unwrap();
                assert_eq!(payload.path.first(), Some(&Coord::new(5, 0)));
            }
            other => panic!("expected granted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mine_defers_when_unreachable() {
        let (world, force) = corridor_world();
        // far outside the owned region and not connected
        let req = mine_requirement(Coord::new(40, 40), force, PathLimits::new(5, false));
        assert_eq!(
            req(WorldView::new(world)).await.unwrap(),
            Admission::Deferred
        );
    }

    #[tokio::test]
    async fn test_force_mine_needs_a_unit_in_reach() {
        let (world, force) = corridor_world();
        let target = Coord::new(5, 0);
        let req = force_mine_requirement(target, force, PathLimits::new(10, false));

        assert_eq!(
            req(WorldView::new(world.clone())).await.unwrap(),
            Admission::Deferred
        );

        world.set_unit(
            UnitId(7),
            Unit {
                pos: Coord::new(4, 0),
                force,
            },
        );
        assert!(matches!(
            req(WorldView::new(world)).await.unwrap(),
            Admission::Granted(_)
        ));
    }

    #[tokio::test]
    async fn test_claim_defers_on_owned_region() {
        let (world, force) = corridor_world();
        // target in the already-owned region
        let req = claim_requirement(Coord::new(1, 0), force, PathLimits::new(10, false));
        assert_eq!(
            req(WorldView::new(world)).await.unwrap(),
            Admission::Deferred
        );
    }

    #[tokio::test]
    async fn test_move_units_grants_paths_per_unit() {
        let (world, force) = corridor_world();
        world.set_unit(
            UnitId(1),
            Unit {
                pos: Coord::new(0, 0),
                force,
            },
        );
        world.set_unit(
            UnitId(2),
            Unit {
                pos: Coord::new(1, 0),
                force,
            },
        );

        let req = move_units_requirement(
            vec![UnitId(1), UnitId(2)],
            Coord::new(4, 0),
            PathLimits::new(10, false),
            4,
            Duration::from_secs(60),
        );
        match req(WorldView::new(world)).await.unwrap() {
            Admission::Granted(value) => {
                let payload: MovePayload = serde_json::from_value(value).unwrap();
                assert_eq!(payload.paths.len(), 2);
                assert_eq!(payload.paths[&1].last(), Some(&Coord::new(4, 0)));
            }
            other => panic!("expected granted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_move_units_times_out_to_inaccessible() {
        let (world, force) = corridor_world();
        world.set_unit(
            UnitId(1),
            Unit {
                pos: Coord::new(0, 0),
                force,
            },
        );
        // destination is unreachable rock, so admission can never succeed
        let req = move_units_requirement(
            vec![UnitId(1)],
            Coord::new(9, 9),
            PathLimits::new(10, false),
            4,
            Duration::from_millis(20),
        );

        assert_eq!(
            req(WorldView::new(world.clone())).await.unwrap(),
            Admission::Deferred
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            req(WorldView::new(world)).await.unwrap(),
            Admission::Inaccessible
        );
    }
}
