//! Sequential impulse constraint solver and its execution strategies.

use glam::Vec3;
use rayon::prelude::*;

use crate::body::{BodyArena, RigidBody};
use crate::manifold::{ContactManifold, ManifoldMap};

/// Friction coefficient for the box approximation: each tangent axis is
/// clamped independently to `±FRICTION * normal_impulse` instead of
/// projecting onto a friction cone.
pub const FRICTION: f32 = 0.3;

/// Velocity-level contact solver with Baumgarte stabilization,
/// restitution, and accumulated impulse clamping.
///
/// `solve` never writes to the bodies. All velocity changes land in the
/// manifold's scratch deltas so independent manifolds can be solved from
/// any thread; the arena folds the deltas into the bodies afterwards.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintSolver {
    time_step: f32,
    beta: f32,
    coefficient_of_restitution: f32,
    slop: f32,
}

impl ConstraintSolver {
    pub fn new(time_step: f32, beta: f32, coefficient_of_restitution: f32, slop: f32) -> Self {
        Self {
            time_step,
            beta,
            coefficient_of_restitution,
            slop,
        }
    }

    /// Applies each contact's impulses carried over from the previous step
    /// directly to the live bodies, so this step's solve starts from last
    /// step's converged state.
    pub fn warm_start(&self, a: &mut RigidBody, b: &mut RigidBody, manifold: &ContactManifold) {
        for contact in manifold.contacts() {
            let r_a = contact.point_a - a.space.position;
            let r_b = contact.point_b - b.space.position;
            let impulse = contact.normal * contact.normal_impulse;
            a.velocity -= impulse * a.inverse_mass;
            a.angular_velocity -= a.inverse_inertia * r_a.cross(impulse);
            b.velocity += impulse * b.inverse_mass;
            b.angular_velocity += b.inverse_inertia * r_b.cross(impulse);
        }
    }

    /// One Gauss-Seidel pass over the manifold's contacts.
    pub fn solve(&self, a: &RigidBody, b: &RigidBody, manifold: &mut ContactManifold) {
        for i in 0..manifold.contacts().len() {
            let contact = manifold.contacts()[i];
            let n = contact.normal;
            let r_a = contact.point_a - a.space.position;
            let r_b = contact.point_b - b.space.position;

            // Normal impulse.
            let vn = n.dot(relative_velocity(a, b, manifold, r_a, r_b));
            let m_eff = effective_mass(a, b, r_a, r_b, n);
            if m_eff <= 0.0 {
                continue;
            }
            // Position correction and bounce both switch off inside the
            // slop band so resting contacts stay quiet.
            let (baumgarte, restitution) = if contact.penetration_depth > self.slop {
                (
                    -(self.beta / self.time_step) * contact.penetration_depth,
                    self.coefficient_of_restitution * vn,
                )
            } else {
                (0.0, 0.0)
            };
            let lambda = -(vn + baumgarte + restitution) / m_eff;
            let total = (contact.normal_impulse + lambda).max(0.0);
            let applied = total - contact.normal_impulse;
            manifold.contacts_mut()[i].normal_impulse = total;
            accumulate(&mut manifold.deltas, a, b, r_a, r_b, n * applied);

            // Friction, seeing the normal response just accumulated.
            let normal_total = total;
            for (tangent, axis) in [(contact.tangent1, 0), (contact.tangent2, 1)] {
                let vt = tangent.dot(relative_velocity(a, b, manifold, r_a, r_b));
                let m_eff_t = effective_mass(a, b, r_a, r_b, tangent);
                if m_eff_t <= 0.0 {
                    continue;
                }
                let lambda_t = -vt / m_eff_t;
                let limit = FRICTION * normal_total;
                let contact = &mut manifold.contacts_mut()[i];
                let accumulated = if axis == 0 {
                    &mut contact.tangent1_impulse
                } else {
                    &mut contact.tangent2_impulse
                };
                let total_t = (*accumulated + lambda_t).clamp(-limit, limit);
                let applied_t = total_t - *accumulated;
                *accumulated = total_t;
                accumulate(&mut manifold.deltas, a, b, r_a, r_b, tangent * applied_t);
            }
        }
    }
}

/// Contact-point relative velocity of B with respect to A, including the
/// manifold's pending deltas.
fn relative_velocity(
    a: &RigidBody,
    b: &RigidBody,
    manifold: &ContactManifold,
    r_a: Vec3,
    r_b: Vec3,
) -> Vec3 {
    let va = a.velocity + manifold.deltas.linear_a;
    let wa = a.angular_velocity + manifold.deltas.angular_a;
    let vb = b.velocity + manifold.deltas.linear_b;
    let wb = b.angular_velocity + manifold.deltas.angular_b;
    (vb + wb.cross(r_b)) - (va + wa.cross(r_a))
}

fn effective_mass(a: &RigidBody, b: &RigidBody, r_a: Vec3, r_b: Vec3, direction: Vec3) -> f32 {
    a.inverse_mass
        + b.inverse_mass
        + a.inverse_inertia * r_a.cross(direction).length_squared()
        + b.inverse_inertia * r_b.cross(direction).length_squared()
}

fn accumulate(
    deltas: &mut crate::manifold::VelocityDeltas,
    a: &RigidBody,
    b: &RigidBody,
    r_a: Vec3,
    r_b: Vec3,
    impulse: Vec3,
) {
    deltas.linear_a -= impulse * a.inverse_mass;
    deltas.angular_a -= a.inverse_inertia * r_a.cross(impulse);
    deltas.linear_b += impulse * b.inverse_mass;
    deltas.angular_b += b.inverse_inertia * r_b.cross(impulse);
}

/// How constraint solving is scheduled across manifolds.
///
/// Both variants run the same math; the multi-threaded one splits the
/// manifold list into fixed-size batches and joins all batches before
/// starting the next global iteration. Manifolds only ever touch their own
/// scratch deltas, so the batch split does not change the result.
#[derive(Debug)]
pub enum ConstraintStrategy {
    Serial {
        solver: ConstraintSolver,
    },
    MultiThreaded {
        solver: ConstraintSolver,
        manifolds_per_task: usize,
    },
}

impl ConstraintStrategy {
    fn solver(&self) -> &ConstraintSolver {
        match self {
            Self::Serial { solver } => solver,
            Self::MultiThreaded { solver, .. } => solver,
        }
    }

    /// Warm starts every manifold. This writes live body velocities, so it
    /// always runs on the calling thread.
    pub fn warm_start(&self, bodies: &mut BodyArena, manifolds: &mut ManifoldMap) {
        let solver = *self.solver();
        for (pair, manifold) in manifolds.iter_mut() {
            if let Some((a, b)) = bodies.get_pair_mut(pair.first, pair.second) {
                solver.warm_start(a, b, manifold);
            }
        }
    }

    /// Runs `iterations` global solver passes over all manifolds.
    pub fn solve(&self, bodies: &BodyArena, manifolds: &mut ManifoldMap, iterations: u32) {
        match self {
            Self::Serial { solver } => {
                for _ in 0..iterations {
                    for (pair, manifold) in manifolds.iter_mut() {
                        let (Some(a), Some(b)) =
                            (bodies.get(pair.first), bodies.get(pair.second))
                        else {
                            continue;
                        };
                        solver.solve(a, b, manifold);
                    }
                }
            }
            Self::MultiThreaded {
                solver,
                manifolds_per_task,
            } => {
                let batch = (*manifolds_per_task).max(1);
                let mut entries: Vec<_> = manifolds.iter_mut().collect();
                for _ in 0..iterations {
                    entries.par_chunks_mut(batch).for_each(|chunk| {
                        for (pair, manifold) in chunk.iter_mut() {
                            let (Some(a), Some(b)) =
                                (bodies.get(pair.first), bodies.get(pair.second))
                            else {
                                continue;
                            };
                            solver.solve(a, b, manifold);
                        }
                    });
                }
            }
        }
    }
}
