//! Shared scene builders for the physics benchmarks.

use std::sync::Arc;

use brawn::{
    Arena, ArenaSettings, BodyArena, CollisionStrategyKind, ConstraintStrategyKind, ConvexModel,
    CoordinateSpace, RigidBody,
};
use glam::Vec3;

pub fn unit_cube() -> Arc<ConvexModel> {
    Arc::new(ConvexModel::cuboid(Vec3::splat(0.5)))
}

pub fn dynamic_cube(model: &Arc<ConvexModel>, position: Vec3) -> RigidBody {
    RigidBody::new_dynamic(
        Arc::clone(model),
        CoordinateSpace::from_position(position),
        1.0,
    )
}

fn grid_positions(n: usize, spacing: f32) -> Vec<Vec3> {
    let side = (n as f32).cbrt().ceil() as usize;
    let mut positions = Vec::with_capacity(n);
    'fill: for y in 0..side {
        for z in 0..side {
            for x in 0..side {
                if positions.len() == n {
                    break 'fill;
                }
                positions.push(Vec3::new(x as f32, y as f32, z as f32) * spacing);
            }
        }
    }
    positions
}

/// `n` unit cubes in a grid tight enough that every neighbor pair overlaps.
pub fn dense_bodies(n: usize) -> BodyArena {
    let model = unit_cube();
    let mut bodies = BodyArena::new();
    for position in grid_positions(n, 0.95) {
        bodies.insert(dynamic_cube(&model, position));
    }
    bodies
}

/// `n` unit cubes spaced so that no bounding spheres touch.
pub fn sparse_bodies(n: usize) -> BodyArena {
    let model = unit_cube();
    let mut bodies = BodyArena::new();
    for position in grid_positions(n, 3.0) {
        bodies.insert(dynamic_cube(&model, position));
    }
    bodies
}

pub fn settings_for(
    collision: CollisionStrategyKind,
    constraint: ConstraintStrategyKind,
) -> ArenaSettings {
    ArenaSettings {
        collision_strategy: collision,
        constraint_strategy: constraint,
        ..Default::default()
    }
}

/// A static floor plus `n` cubes stacked in a grid just above it, all under
/// gravity. Neighbors start slightly overlapping so the first step already
/// produces manifolds.
pub fn setup_scene(n: usize, settings: ArenaSettings) -> anyhow::Result<Arena> {
    let mut arena = Arena::new(settings)?;
    let floor = Arc::new(ConvexModel::cuboid(Vec3::new(40.0, 0.5, 40.0)));
    arena.add_body(RigidBody::new_static(
        floor,
        CoordinateSpace::from_position(Vec3::new(0.0, -0.5, 0.0)),
    ));
    let model = unit_cube();
    for position in grid_positions(n, 0.95) {
        let mut body = dynamic_cube(&model, position + Vec3::new(0.0, 0.55, 0.0));
        body.force = Vec3::new(0.0, -9.8, 0.0);
        arena.add_body(body);
    }
    Ok(arena)
}
