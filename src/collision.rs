//! Narrow-phase collision detection: GJK intersection test plus EPA
//! penetration recovery, run per pair of convex pieces.

use glam::Vec3;
use tracing::trace;

use crate::body::RigidBody;
use crate::error::Result;
use crate::manifold::Contact;
use crate::minkowski::{Polytope, Simplex, SupportVertex, Triangle, EXPANSION_EPSILON};

/// GJK gives up after this many support points. Almost everything
/// converges in a handful of iterations; configurations that don't are
/// degenerate (deeply overlapping or near-touching) and are reported as
/// no collision rather than looping.
pub const GJK_MAX_ITERATIONS: usize = 20;

/// Safety valve for EPA expansion; the loop normally exits on the
/// epsilon test long before this.
pub const EPA_MAX_ITERATIONS: usize = 64;

/// Penetration data straight out of EPA, before it is tied to bodies.
#[derive(Debug, Clone, Copy)]
struct Penetration {
    point_a: Vec3,
    point_b: Vec3,
    normal: Vec3,
    depth: f32,
}

/// Stateless GJK/EPA solver.
#[derive(Debug, Default)]
pub struct CollisionSolver;

impl CollisionSolver {
    pub fn new() -> Self {
        Self
    }

    /// Bounding-sphere rejection test. `true` means the pair might
    /// collide; strictly touching spheres do not qualify.
    pub fn broad_phase(&self, a: &RigidBody, b: &RigidBody) -> bool {
        let reach = a.bounding_radius() + b.bounding_radius();
        a.space.position.distance_squared(b.space.position) < reach * reach
    }

    /// Full narrow-phase test between every pair of convex pieces.
    ///
    /// Returns one contact per intersecting piece pair; an empty vector
    /// means the bodies do not collide. Exact surface touching counts as
    /// not colliding. Expects both bodies' support caches to be current.
    pub fn intersection(&self, a: &RigidBody, b: &RigidBody) -> Result<Vec<Contact>> {
        let mut contacts = Vec::new();
        for piece_a in a.world_support_pieces() {
            for piece_b in b.world_support_pieces() {
                if let Some(simplex) = gjk(piece_a, piece_b)? {
                    let p = epa(&simplex, piece_a, piece_b)?;
                    trace!(depth = p.depth, "piece pair penetration");
                    contacts.push(Contact::new(p.point_a, p.point_b, p.normal, p.depth, a, b));
                }
            }
        }
        Ok(contacts)
    }
}

/// Farthest vertex along `direction`. Ties keep the first vertex scanned,
/// which keeps results deterministic across runs and strategies.
fn support(vertices: &[Vec3], direction: Vec3) -> Vec3 {
    let mut best = f32::MIN;
    let mut found = Vec3::ZERO;
    for v in vertices {
        let dot = v.dot(direction);
        if dot > best {
            best = dot;
            found = *v;
        }
    }
    found
}

fn minkowski_support(a: &[Vec3], b: &[Vec3], direction: Vec3) -> SupportVertex {
    SupportVertex::new(support(a, direction), support(b, -direction))
}

/// Runs GJK to completion. `Some` holds the terminal tetrahedron that
/// encloses the origin, ready for EPA.
fn gjk(a: &[Vec3], b: &[Vec3]) -> Result<Option<Simplex>> {
    let mut direction = Vec3::X;
    let first = minkowski_support(a, b, direction);
    let mut simplex = Simplex::new(first);
    direction = -first.v;
    for _ in 0..GJK_MAX_ITERATIONS {
        let point = minkowski_support(a, b, direction);
        // The new point never crossed the origin, so the difference
        // cannot contain it. Equality is exact touching: not a collision.
        if point.v.dot(direction) <= 0.0 {
            return Ok(None);
        }
        simplex.push(point);
        let (enclosed, next) = simplex.build()?;
        if enclosed {
            return Ok(Some(simplex));
        }
        direction = next;
    }
    trace!("gjk failed to converge, treating as no collision");
    Ok(None)
}

/// Expands the terminal simplex out to the boundary of the Minkowski
/// difference to recover the penetration normal, depth, and the witness
/// points on both bodies.
fn epa(simplex: &Simplex, a: &[Vec3], b: &[Vec3]) -> Result<Penetration> {
    let mut polytope = Polytope::new(simplex)?;
    for _ in 0..EPA_MAX_ITERATIONS {
        let (triangle, distance) = polytope.closest_triangle();
        let point = minkowski_support(a, b, triangle.normal);
        if point.v.dot(triangle.normal) - distance <= EXPANSION_EPSILON {
            return penetration_from(&triangle, distance);
        }
        polytope.expand(point)?;
    }
    // Expansion is stuck oscillating within epsilon of the boundary; the
    // current closest face is the answer for any practical purpose.
    let (triangle, distance) = polytope.closest_triangle();
    penetration_from(&triangle, distance)
}

fn penetration_from(triangle: &Triangle, distance: f32) -> Result<Penetration> {
    let projected = triangle.normal * distance;
    let (u, v, w) = barycentric(projected, triangle.a.v, triangle.b.v, triangle.c.v)?;
    Ok(Penetration {
        point_a: triangle.a.on_a * u + triangle.b.on_a * v + triangle.c.on_a * w,
        point_b: triangle.a.on_b * u + triangle.b.on_b * v + triangle.c.on_b * w,
        normal: triangle.normal,
        depth: distance,
    })
}

fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Result<(f32, f32, f32)> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f32::EPSILON {
        return Err(crate::error::Error::DegenerateTriangle);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Ok((1.0 - v - w, v, w))
}
