//! The arena: owns the bodies, drives the fixed-timestep loop, and wires
//! the collision and constraint strategies together.

use tracing::debug;

use crate::body::{BodyArena, BodyHandle, RigidBody};
use crate::config::{ArenaSettings, CollisionStrategyKind, ConstraintStrategyKind};
use crate::constraint::{ConstraintSolver, ConstraintStrategy};
use crate::context::WgpuContext;
use crate::error::{Error, Result};
use crate::manifold::ManifoldMap;
use crate::strategy::CollisionStrategy;

/// A complete simulation.
///
/// Time is fed in through [`run_physics`](Self::run_physics) in arbitrary
/// chunks; the arena accumulates it and advances in fixed steps of
/// `settings.step_size`, so results depend only on total simulated time
/// and never on how the caller slices it.
#[derive(Debug)]
pub struct Arena {
    settings: ArenaSettings,
    bodies: BodyArena,
    manifolds: ManifoldMap,
    collision: CollisionStrategy,
    constraints: ConstraintStrategy,
    residual_time: f32,
}

impl Arena {
    /// Builds an arena from settings. The GPU collision strategy acquires
    /// its own device here; if none is available this fails immediately
    /// rather than degrading to a CPU strategy.
    pub fn new(settings: ArenaSettings) -> Result<Self> {
        let collision = match settings.collision_strategy {
            CollisionStrategyKind::Serial => CollisionStrategy::serial(&settings),
            CollisionStrategyKind::MultiThreaded => CollisionStrategy::multi_threaded(&settings),
            CollisionStrategyKind::GpuBroadPhase => {
                let ctx = WgpuContext::new_blocking()
                    .map_err(|e| Error::GpuUnavailable(e.to_string()))?;
                CollisionStrategy::gpu_broad_phase(&settings, ctx)?
            }
        };
        Self::assemble(settings, collision)
    }

    /// Like [`new`](Self::new), but the GPU strategy shares the caller's
    /// device instead of acquiring one.
    pub fn with_context(settings: ArenaSettings, ctx: WgpuContext) -> Result<Self> {
        let collision = match settings.collision_strategy {
            CollisionStrategyKind::Serial => CollisionStrategy::serial(&settings),
            CollisionStrategyKind::MultiThreaded => CollisionStrategy::multi_threaded(&settings),
            CollisionStrategyKind::GpuBroadPhase => {
                CollisionStrategy::gpu_broad_phase(&settings, ctx)?
            }
        };
        Self::assemble(settings, collision)
    }

    fn assemble(settings: ArenaSettings, collision: CollisionStrategy) -> Result<Self> {
        let solver = ConstraintSolver::new(
            settings.step_size,
            settings.beta,
            settings.coefficient_of_restitution,
            settings.slop,
        );
        let constraints = match settings.constraint_strategy {
            ConstraintStrategyKind::Serial => ConstraintStrategy::Serial { solver },
            ConstraintStrategyKind::MultiThreaded => ConstraintStrategy::MultiThreaded {
                solver,
                manifolds_per_task: settings.manifolds_per_task,
            },
        };
        debug!(
            collision = ?collision,
            step_size = settings.step_size,
            "arena ready"
        );
        Ok(Self {
            settings,
            bodies: BodyArena::new(),
            manifolds: ManifoldMap::new(),
            collision,
            constraints,
            residual_time: 0.0,
        })
    }

    pub fn add_body(&mut self, body: RigidBody) -> BodyHandle {
        self.bodies.insert(body)
    }

    /// Removes a body and every manifold that referenced it.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Option<RigidBody> {
        self.manifolds.remove_body(handle);
        self.bodies.remove(handle)
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    pub fn bodies(&self) -> &BodyArena {
        &self.bodies
    }

    /// The current contact manifolds, for inspection and debugging.
    pub fn manifolds(&self) -> &ManifoldMap {
        &self.manifolds
    }

    pub fn settings(&self) -> &ArenaSettings {
        &self.settings
    }

    /// Advances the simulation by `elapsed` seconds of wall time.
    ///
    /// Runs zero or more fixed steps and banks the remainder for the next
    /// call.
    pub fn run_physics(&mut self, elapsed: f32) -> Result<()> {
        self.residual_time += elapsed;
        while self.residual_time > self.settings.step_size {
            self.step()?;
            self.residual_time -= self.settings.step_size;
        }
        Ok(())
    }

    // One fixed step. Phase order is load-bearing: contacts are found
    // against positions from the end of the previous step, warm starting
    // happens before solving, and positions integrate last from the
    // corrected velocities.
    fn step(&mut self) -> Result<()> {
        let dt = self.settings.step_size;

        for (_, body) in self.bodies.iter_mut() {
            body.integrate_velocities(dt);
            body.refresh_support_cache();
        }

        self.collision.find_contacts(&self.bodies, &mut self.manifolds)?;
        self.constraints.warm_start(&mut self.bodies, &mut self.manifolds);
        self.constraints
            .solve(&self.bodies, &mut self.manifolds, self.settings.iterations);

        // Fold the solver's scratch deltas into the live bodies.
        for (pair, manifold) in self.manifolds.iter_mut() {
            if let Some((a, b)) = self.bodies.get_pair_mut(pair.first, pair.second) {
                a.velocity += manifold.deltas.linear_a;
                a.angular_velocity += manifold.deltas.angular_a;
                b.velocity += manifold.deltas.linear_b;
                b.angular_velocity += manifold.deltas.angular_b;
            }
            manifold.deltas.reset();
        }

        for (_, body) in self.bodies.iter_mut() {
            body.integrate_positions(dt)?;
        }

        debug!(
            bodies = self.bodies.len(),
            manifolds = self.manifolds.len(),
            "physics step"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConvexModel;
    use crate::space::CoordinateSpace;
    use glam::Vec3;
    use std::sync::Arc;

    fn unit_cube(position: Vec3) -> RigidBody {
        let model = Arc::new(ConvexModel::cuboid(Vec3::splat(0.5)));
        RigidBody::new_dynamic(model, CoordinateSpace::from_position(position), 1.0)
    }

    fn serial_arena() -> Arena {
        Arena::new(ArenaSettings::default()).unwrap()
    }

    #[test]
    fn time_accumulates_into_whole_steps() {
        let mut arena = serial_arena();
        let dt = arena.settings().step_size;
        let handle = arena.add_body(unit_cube(Vec3::ZERO));
        arena.body_mut(handle).unwrap().force = Vec3::new(1.0, 0.0, 0.0);

        // 1.1 steps of elapsed time runs exactly one step.
        arena.run_physics(dt * 1.1).unwrap();
        let after_one = arena.body(handle).unwrap().velocity.x;
        assert!((after_one - dt).abs() < 1e-6);

        // The banked 0.1 plus 0.95 crosses the threshold once more.
        arena.run_physics(dt * 0.95).unwrap();
        let after_two = arena.body(handle).unwrap().velocity.x;
        assert!((after_two - 2.0 * dt).abs() < 1e-6);
    }

    #[test]
    fn less_than_one_step_does_nothing() {
        let mut arena = serial_arena();
        let dt = arena.settings().step_size;
        let handle = arena.add_body(unit_cube(Vec3::ZERO));
        arena.body_mut(handle).unwrap().force = Vec3::new(1.0, 0.0, 0.0);
        arena.run_physics(dt * 0.9).unwrap();
        assert_eq!(arena.body(handle).unwrap().velocity, Vec3::ZERO);
    }

    #[test]
    fn chunked_time_matches_single_call() {
        let build = || {
            let mut arena = serial_arena();
            let h0 = arena.add_body(unit_cube(Vec3::ZERO));
            let mut falling = unit_cube(Vec3::new(0.25, 2.0, 0.0));
            falling.force = Vec3::new(0.0, -9.8, 0.0);
            let h1 = arena.add_body(falling);
            (arena, h0, h1)
        };
        let dt = ArenaSettings::default().step_size;

        let (mut chunked, c0, c1) = build();
        for _ in 0..8 {
            chunked.run_physics(dt * 0.6).unwrap();
        }
        let (mut single, s0, s1) = build();
        single.run_physics(dt * 4.8).unwrap();

        for (ch, sh) in [(c0, s0), (c1, s1)] {
            let chunked_body = chunked.body(ch).unwrap();
            let single_body = single.body(sh).unwrap();
            assert_eq!(chunked_body.space.position, single_body.space.position);
            assert_eq!(chunked_body.velocity, single_body.velocity);
        }
    }

    #[test]
    fn symmetric_collision_stays_symmetric() {
        let mut arena = serial_arena();
        let dt = arena.settings().step_size;
        let ha = arena.add_body(unit_cube(Vec3::new(-0.4, 0.0, 0.0)));
        let hb = arena.add_body(unit_cube(Vec3::new(0.4, 0.0, 0.0)));
        arena.body_mut(ha).unwrap().velocity = Vec3::new(1.0, 0.0, 0.0);
        arena.body_mut(hb).unwrap().velocity = Vec3::new(-1.0, 0.0, 0.0);

        for _ in 0..5 {
            arena.run_physics(dt * 1.01).unwrap();
        }
        let va = arena.body(ha).unwrap().velocity;
        let vb = arena.body(hb).unwrap().velocity;
        assert!((va.x + vb.x).abs() < 1e-4);
        // They bounced: no longer approaching.
        assert!(vb.x - va.x > -1e-4);
    }

    #[test]
    fn dynamic_body_settles_on_static_body() {
        // No bounce: the cube should come to rest quickly.
        let settings = ArenaSettings {
            coefficient_of_restitution: 0.0,
            ..Default::default()
        };
        let mut arena = Arena::new(settings).unwrap();
        let dt = arena.settings().step_size;
        let floor_model = Arc::new(ConvexModel::cuboid(Vec3::new(5.0, 0.5, 5.0)));
        arena.add_body(RigidBody::new_static(
            floor_model,
            CoordinateSpace::from_position(Vec3::new(0.0, -0.5, 0.0)),
        ));
        let mut cube = unit_cube(Vec3::new(0.0, 1.0, 0.0));
        cube.force = Vec3::new(0.0, -9.8, 0.0);
        let handle = arena.add_body(cube);

        for _ in 0..240 {
            arena.run_physics(dt * 1.01).unwrap();
        }
        let body = arena.body(handle).unwrap();
        // Resting on the floor (top of floor at y = 0, cube half extent
        // 0.5), within solver slop.
        assert!(body.space.position.y > 0.3, "fell through: {}", body.space.position.y);
        assert!(body.space.position.y < 0.7, "hovering: {}", body.space.position.y);
        assert!(body.velocity.length() < 0.2);
        assert!(!arena.manifolds().is_empty());
    }

    #[test]
    fn removing_a_body_drops_its_manifolds() {
        let mut arena = serial_arena();
        let dt = arena.settings().step_size;
        let ha = arena.add_body(unit_cube(Vec3::ZERO));
        let hb = arena.add_body(unit_cube(Vec3::new(0.5, 0.0, 0.0)));
        arena.run_physics(dt * 1.01).unwrap();
        assert_eq!(arena.manifolds().len(), 1);

        arena.remove_body(hb);
        assert!(arena.manifolds().is_empty());
        assert!(arena.body(hb).is_none());
        assert!(arena.body(ha).is_some());
    }

    #[test]
    fn multi_threaded_arena_matches_serial_arena() {
        let run = |collision, constraint| {
            let settings = ArenaSettings {
                collision_strategy: collision,
                constraint_strategy: constraint,
                bodies_per_group: 2,
                manifolds_per_task: 1,
                ..Default::default()
            };
            let mut arena = Arena::new(settings).unwrap();
            let mut handles = Vec::new();
            for i in 0..6 {
                let mut body = unit_cube(Vec3::new(i as f32 * 0.8, 0.0, 0.0));
                body.velocity = Vec3::new(if i % 2 == 0 { 0.5 } else { -0.5 }, 0.0, 0.0);
                handles.push(arena.add_body(body));
            }
            let dt = arena.settings().step_size;
            for _ in 0..10 {
                arena.run_physics(dt * 1.01).unwrap();
            }
            handles
                .iter()
                .map(|&h| {
                    let b = arena.body(h).unwrap();
                    (b.space.position, b.velocity)
                })
                .collect::<Vec<_>>()
        };
        let serial = run(
            crate::config::CollisionStrategyKind::Serial,
            crate::config::ConstraintStrategyKind::Serial,
        );
        let threaded = run(
            crate::config::CollisionStrategyKind::MultiThreaded,
            crate::config::ConstraintStrategyKind::MultiThreaded,
        );
        assert_eq!(serial, threaded);
    }
}
