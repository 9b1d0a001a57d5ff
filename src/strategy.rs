//! Collision detection strategies: serial, multi-threaded, and GPU broad
//! phase. All three produce the same collision set for the same input;
//! they differ only in how the work is scheduled.

use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::debug;

use crate::body::{BodyArena, BodyHandle, BodyPair};
use crate::collision::CollisionSolver;
use crate::config::ArenaSettings;
use crate::context::WgpuContext;
use crate::error::{Error, Result};
use crate::gpu::{GpuBroadPhase, GpuSphere};
use crate::manifold::ManifoldMap;

/// Manifold thresholds every strategy forwards to the map.
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    persistence: f32,
    movement: f32,
}

impl Thresholds {
    fn from_settings(settings: &ArenaSettings) -> Self {
        Self {
            persistence: settings.manifold_persistent_threshold,
            movement: settings.manifold_movement_threshold,
        }
    }
}

/// Runs narrow phase for one candidate pair and records the result.
///
/// Pairs are distributed so no two concurrent tasks share a pair, which is
/// what makes the shared map update safe.
fn narrow_phase(
    solver: &CollisionSolver,
    bodies: &BodyArena,
    manifolds: &ManifoldMap,
    thresholds: Thresholds,
    pair: BodyPair,
    check_spheres: bool,
    colliding: &mut BTreeSet<BodyPair>,
) -> Result<()> {
    let (Some(a), Some(b)) = (bodies.get(pair.first), bodies.get(pair.second)) else {
        return Ok(());
    };
    if check_spheres && !solver.broad_phase(a, b) {
        return Ok(());
    }
    let contacts = solver.intersection(a, b)?;
    if !contacts.is_empty() {
        manifolds.update(
            pair,
            a,
            b,
            &contacts,
            thresholds.persistence,
            thresholds.movement,
        );
        colliding.insert(pair);
    }
    Ok(())
}

/// Everything on the calling thread, pair by pair.
#[derive(Debug)]
pub struct SerialStrategy {
    solver: CollisionSolver,
    thresholds: Thresholds,
}

impl SerialStrategy {
    fn find_contacts(&self, bodies: &BodyArena, manifolds: &mut ManifoldMap) -> Result<()> {
        let handles = bodies.handles();
        let mut colliding = BTreeSet::new();
        for (i, &first) in handles.iter().enumerate() {
            for &second in &handles[i + 1..] {
                narrow_phase(
                    &self.solver,
                    bodies,
                    manifolds,
                    self.thresholds,
                    BodyPair::new(first, second),
                    true,
                    &mut colliding,
                )?;
            }
        }
        manifolds.retain_colliding(&colliding);
        Ok(())
    }
}

/// Bodies split into fixed-size groups; one task per group runs the
/// group's internal pairs and one task per group pair runs the pairs that
/// straddle the two groups. Every unordered pair lands in exactly one
/// task.
#[derive(Debug)]
pub struct MultiThreadedStrategy {
    solver: CollisionSolver,
    thresholds: Thresholds,
    bodies_per_group: usize,
}

enum GroupJob {
    Within(usize),
    Between(usize, usize),
}

impl MultiThreadedStrategy {
    fn find_contacts(&self, bodies: &BodyArena, manifolds: &mut ManifoldMap) -> Result<()> {
        let handles = bodies.handles();
        let groups: Vec<&[BodyHandle]> = handles.chunks(self.bodies_per_group.max(1)).collect();

        let mut jobs = Vec::new();
        for i in 0..groups.len() {
            jobs.push(GroupJob::Within(i));
            for j in i + 1..groups.len() {
                jobs.push(GroupJob::Between(i, j));
            }
        }

        let sets: Vec<BTreeSet<BodyPair>> = jobs
            .par_iter()
            .map(|job| {
                let mut colliding = BTreeSet::new();
                match *job {
                    GroupJob::Within(g) => {
                        let group = groups[g];
                        for (i, &first) in group.iter().enumerate() {
                            for &second in &group[i + 1..] {
                                narrow_phase(
                                    &self.solver,
                                    bodies,
                                    manifolds,
                                    self.thresholds,
                                    BodyPair::new(first, second),
                                    true,
                                    &mut colliding,
                                )?;
                            }
                        }
                    }
                    GroupJob::Between(ga, gb) => {
                        for &first in groups[ga] {
                            for &second in groups[gb] {
                                narrow_phase(
                                    &self.solver,
                                    bodies,
                                    manifolds,
                                    self.thresholds,
                                    BodyPair::new(first, second),
                                    true,
                                    &mut colliding,
                                )?;
                            }
                        }
                    }
                }
                Ok(colliding)
            })
            .collect::<Result<_>>()?;

        let mut colliding = BTreeSet::new();
        for set in sets {
            colliding.extend(set);
        }
        manifolds.retain_colliding(&colliding);
        Ok(())
    }
}

/// GPU bounding-sphere candidates, then CPU narrow phase over the
/// candidates in fixed-size task batches.
pub struct GpuBroadPhaseStrategy {
    gpu: GpuBroadPhase,
    solver: CollisionSolver,
    thresholds: Thresholds,
    collisions_per_task: usize,
}

impl GpuBroadPhaseStrategy {
    fn find_contacts(&self, bodies: &BodyArena, manifolds: &mut ManifoldMap) -> Result<()> {
        let handles = bodies.handles();
        let spheres: Vec<GpuSphere> = handles
            .iter()
            .map(|&h| {
                // Handles in `handles` are live by construction.
                let body = bodies.get(h);
                debug_assert!(body.is_some());
                let body = body.map(|b| (b.space.position, b.bounding_radius()));
                let (position, radius) = body.unwrap_or_default();
                GpuSphere {
                    center: position.into(),
                    radius,
                }
            })
            .collect();

        let candidates = self
            .gpu
            .find_pairs(&spheres)
            .map_err(|e| Error::Gpu(e.to_string()))?;
        let pairs: Vec<BodyPair> = candidates
            .iter()
            .map(|p| BodyPair::new(handles[p.index_a as usize], handles[p.index_b as usize]))
            .collect();
        debug!(candidates = pairs.len(), "gpu broad phase candidates");

        let sets: Vec<BTreeSet<BodyPair>> = pairs
            .par_chunks(self.collisions_per_task.max(1))
            .map(|chunk| {
                let mut colliding = BTreeSet::new();
                for &pair in chunk {
                    // The sphere test already ran on the GPU.
                    narrow_phase(
                        &self.solver,
                        bodies,
                        manifolds,
                        self.thresholds,
                        pair,
                        false,
                        &mut colliding,
                    )?;
                }
                Ok(colliding)
            })
            .collect::<Result<_>>()?;

        let mut colliding = BTreeSet::new();
        for set in sets {
            colliding.extend(set);
        }
        manifolds.retain_colliding(&colliding);
        Ok(())
    }
}

/// The collision phase of one simulation step.
///
/// `find_contacts` leaves the manifold map holding exactly the pairs that
/// collide right now: detected contacts merged in, stale contacts pruned,
/// and manifolds for separated pairs removed.
pub enum CollisionStrategy {
    Serial(SerialStrategy),
    MultiThreaded(MultiThreadedStrategy),
    GpuBroadPhase(GpuBroadPhaseStrategy),
}

impl CollisionStrategy {
    pub fn serial(settings: &ArenaSettings) -> Self {
        Self::Serial(SerialStrategy {
            solver: CollisionSolver::new(),
            thresholds: Thresholds::from_settings(settings),
        })
    }

    pub fn multi_threaded(settings: &ArenaSettings) -> Self {
        Self::MultiThreaded(MultiThreadedStrategy {
            solver: CollisionSolver::new(),
            thresholds: Thresholds::from_settings(settings),
            bodies_per_group: settings.bodies_per_group,
        })
    }

    /// Builds the GPU strategy on an existing device. Fails if the kernels
    /// cannot be compiled.
    pub fn gpu_broad_phase(settings: &ArenaSettings, ctx: WgpuContext) -> Result<Self> {
        let gpu = GpuBroadPhase::new(ctx, settings.gpu_batch_size)
            .map_err(|e| Error::GpuUnavailable(e.to_string()))?;
        Ok(Self::GpuBroadPhase(GpuBroadPhaseStrategy {
            gpu,
            solver: CollisionSolver::new(),
            thresholds: Thresholds::from_settings(settings),
            collisions_per_task: settings.collisions_per_task,
        }))
    }

    pub fn find_contacts(&self, bodies: &BodyArena, manifolds: &mut ManifoldMap) -> Result<()> {
        match self {
            Self::Serial(s) => s.find_contacts(bodies, manifolds),
            Self::MultiThreaded(s) => s.find_contacts(bodies, manifolds),
            Self::GpuBroadPhase(s) => s.find_contacts(bodies, manifolds),
        }
    }
}

impl std::fmt::Debug for CollisionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial(_) => f.write_str("CollisionStrategy::Serial"),
            Self::MultiThreaded(_) => f.write_str("CollisionStrategy::MultiThreaded"),
            Self::GpuBroadPhase(_) => f.write_str("CollisionStrategy::GpuBroadPhase"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RigidBody;
    use crate::model::ConvexModel;
    use crate::space::CoordinateSpace;
    use glam::Vec3;
    use std::sync::Arc;

    fn unit_cube(position: Vec3) -> RigidBody {
        let model = Arc::new(ConvexModel::cuboid(Vec3::splat(0.5)));
        RigidBody::new_dynamic(model, CoordinateSpace::from_position(position), 1.0)
    }

    /// Sixteen bodies in four groups of four, with collisions inside
    /// groups, straddling group boundaries, and a chain. Exactly ten
    /// colliding pairs.
    fn sixteen_body_arena() -> (BodyArena, Vec<BodyHandle>, BTreeSet<BodyPair>) {
        let positions = [
            // Trio in group 0: all three collide pairwise.
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::new(0.25, 0.4, 0.0),
            // Straddles groups 0 and 1.
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.5, 0.0, 0.0),
            // Pair inside group 1.
            Vec3::new(20.0, 0.0, 0.0),
            Vec3::new(20.6, 0.0, 0.0),
            // Straddles groups 1 and 2.
            Vec3::new(30.0, 0.0, 0.0),
            Vec3::new(30.4, 0.0, 0.0),
            // Pair inside group 2.
            Vec3::new(40.0, 0.0, 0.0),
            Vec3::new(40.5, 0.0, 0.0),
            // Straddles groups 2 and 3.
            Vec3::new(50.0, 0.0, 0.0),
            Vec3::new(50.5, 0.0, 0.0),
            // Chain in group 3: 13-14 and 14-15, but not 13-15.
            Vec3::new(60.0, 0.0, 0.0),
            Vec3::new(60.9, 0.0, 0.0),
            Vec3::new(61.8, 0.0, 0.0),
        ];
        let mut bodies = BodyArena::new();
        let handles: Vec<BodyHandle> = positions.iter().map(|&p| bodies.insert(unit_cube(p))).collect();
        let expect: BTreeSet<BodyPair> = [
            (0, 1),
            (0, 2),
            (1, 2),
            (3, 4),
            (5, 6),
            (7, 8),
            (9, 10),
            (11, 12),
            (13, 14),
            (14, 15),
        ]
        .iter()
        .map(|&(a, b)| BodyPair::new(handles[a], handles[b]))
        .collect();
        (bodies, handles, expect)
    }

    #[test]
    fn serial_strategy_finds_all_pairs() {
        let (bodies, _, expect) = sixteen_body_arena();
        let settings = ArenaSettings::default();
        let strategy = CollisionStrategy::serial(&settings);
        let mut manifolds = ManifoldMap::new();
        strategy.find_contacts(&bodies, &mut manifolds).unwrap();
        assert_eq!(expect.len(), 10);
        assert_eq!(manifolds.pairs().into_iter().collect::<BTreeSet<_>>(), expect);
    }

    #[test]
    fn multi_threaded_matches_serial() {
        let (bodies, _, expect) = sixteen_body_arena();
        let settings = ArenaSettings {
            bodies_per_group: 4,
            ..Default::default()
        };
        let strategy = CollisionStrategy::multi_threaded(&settings);
        let mut manifolds = ManifoldMap::new();
        strategy.find_contacts(&bodies, &mut manifolds).unwrap();
        assert_eq!(manifolds.pairs().into_iter().collect::<BTreeSet<_>>(), expect);
    }

    #[test]
    fn stale_pairs_are_removed() {
        let mut bodies = BodyArena::new();
        let h0 = bodies.insert(unit_cube(Vec3::ZERO));
        let h1 = bodies.insert(unit_cube(Vec3::new(0.5, 0.0, 0.0)));
        let settings = ArenaSettings::default();
        let strategy = CollisionStrategy::serial(&settings);
        let mut manifolds = ManifoldMap::new();
        strategy.find_contacts(&bodies, &mut manifolds).unwrap();
        assert_eq!(manifolds.len(), 1);

        // Separate the bodies: the manifold must disappear.
        bodies.get_mut(h1).unwrap().space.position = Vec3::new(5.0, 0.0, 0.0);
        bodies.get_mut(h1).unwrap().refresh_support_cache();
        strategy.find_contacts(&bodies, &mut manifolds).unwrap();
        assert!(manifolds.is_empty());
        let _ = h0;
    }

    // Needs a live adapter; silently passes where none exists (CI).
    #[test]
    fn gpu_strategy_matches_serial() {
        let Ok(ctx) = WgpuContext::new_blocking() else {
            eprintln!("no gpu adapter available, skipping");
            return;
        };
        let (bodies, _, expect) = sixteen_body_arena();
        let settings = ArenaSettings {
            // Small batches so inner and outer kernels both run.
            gpu_batch_size: 4,
            collisions_per_task: 3,
            ..Default::default()
        };
        let strategy = CollisionStrategy::gpu_broad_phase(&settings, ctx).unwrap();
        let mut manifolds = ManifoldMap::new();
        strategy.find_contacts(&bodies, &mut manifolds).unwrap();
        assert_eq!(manifolds.pairs().into_iter().collect::<BTreeSet<_>>(), expect);
    }
}
