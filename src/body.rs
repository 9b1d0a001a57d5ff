//! Rigid bodies and the arena that owns them.

use std::sync::Arc;

use glam::Vec3;

use crate::error::Result;
use crate::model::ConvexModel;
use crate::space::CoordinateSpace;

/// A rigid body: a convex model plus motion state.
///
/// Mass properties are stored inverted so static bodies are just
/// `inverse_mass == 0`. Rotational inertia uses the solid-sphere
/// approximation `2/5 m r^2` over the model's bounding radius.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub space: CoordinateSpace,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub force: Vec3,
    pub torque: Vec3,
    pub inverse_mass: f32,
    pub inverse_inertia: f32,
    model: Arc<ConvexModel>,
    cached_space: CoordinateSpace,
    world_pieces: Vec<Vec<Vec3>>,
}

impl RigidBody {
    /// A movable body. `mass` must be positive.
    pub fn new_dynamic(model: Arc<ConvexModel>, space: CoordinateSpace, mass: f32) -> Self {
        debug_assert!(mass > 0.0);
        let r = model.radius();
        let inertia = 0.4 * mass * r * r;
        let mut body = Self {
            space,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            inverse_mass: 1.0 / mass,
            inverse_inertia: 1.0 / inertia,
            model,
            cached_space: space,
            world_pieces: Vec::new(),
        };
        body.rebuild_support_cache();
        body
    }

    /// An immovable body: infinite mass and inertia.
    pub fn new_static(model: Arc<ConvexModel>, space: CoordinateSpace) -> Self {
        let mut body = Self {
            space,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            inverse_mass: 0.0,
            inverse_inertia: 0.0,
            model,
            cached_space: space,
            world_pieces: Vec::new(),
        };
        body.rebuild_support_cache();
        body
    }

    pub fn is_static(&self) -> bool {
        self.inverse_mass == 0.0
    }

    pub fn model(&self) -> &ConvexModel {
        &self.model
    }

    /// World-space bounding sphere radius.
    pub fn bounding_radius(&self) -> f32 {
        self.model.radius()
    }

    /// World-space support vertices, one list per convex piece.
    ///
    /// Valid for the coordinate space at the last
    /// [`refresh_support_cache`](Self::refresh_support_cache) call.
    pub fn world_support_pieces(&self) -> &[Vec<Vec3>] {
        &self.world_pieces
    }

    /// Recompute the world-space vertex cache if the body has moved.
    ///
    /// Invalidation is by value comparison of the coordinate space, so a
    /// body that ends a step exactly where it started keeps its cache.
    pub fn refresh_support_cache(&mut self) {
        if self.cached_space != self.space || self.world_pieces.is_empty() {
            self.rebuild_support_cache();
        }
    }

    fn rebuild_support_cache(&mut self) {
        self.world_pieces.clear();
        for piece in self.model.pieces() {
            self.world_pieces.push(
                piece
                    .vertices
                    .iter()
                    .map(|v| self.space.transform_point(piece.offset + *v))
                    .collect(),
            );
        }
        self.cached_space = self.space;
    }

    /// Semi-implicit Euler, velocity half: apply accumulated force and
    /// torque through the inverse mass properties.
    pub fn integrate_velocities(&mut self, dt: f32) {
        self.velocity += self.force * self.inverse_mass * dt;
        self.angular_velocity += self.torque * self.inverse_inertia * dt;
    }

    /// Semi-implicit Euler, position half: advance translation and
    /// orientation from the post-solve velocities.
    pub fn integrate_positions(&mut self, dt: f32) -> Result<()> {
        self.space.position += self.velocity * dt;
        self.space.integrate_rotation(self.angular_velocity, dt)
    }
}

/// Stable identifier for a body in a [`BodyArena`].
///
/// Handles are never reused, so a stale handle after `remove` simply
/// resolves to nothing instead of aliasing a different body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyHandle(pub u32);

/// An unordered pair of body handles, normalized so the smaller handle
/// comes first. This is the key for manifold and collision-set maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyPair {
    pub first: BodyHandle,
    pub second: BodyHandle,
}

impl BodyPair {
    pub fn new(a: BodyHandle, b: BodyHandle) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.first == handle || self.second == handle
    }
}

/// Owns all bodies and maps handles to them.
#[derive(Debug, Default)]
pub struct BodyArena {
    slots: Vec<Option<RigidBody>>,
}

impl BodyArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, body: RigidBody) -> BodyHandle {
        let handle = BodyHandle(self.slots.len() as u32);
        self.slots.push(Some(body));
        handle
    }

    pub fn remove(&mut self, handle: BodyHandle) -> Option<RigidBody> {
        self.slots.get_mut(handle.0 as usize)?.take()
    }

    pub fn get(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.slots.get(handle.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.slots.get_mut(handle.0 as usize)?.as_mut()
    }

    /// Mutable access to two distinct bodies at once.
    pub fn get_pair_mut(
        &mut self,
        a: BodyHandle,
        b: BodyHandle,
    ) -> Option<(&mut RigidBody, &mut RigidBody)> {
        let (ia, ib) = (a.0 as usize, b.0 as usize);
        if ia == ib || ia >= self.slots.len() || ib >= self.slots.len() {
            return None;
        }
        let (lo, hi) = (ia.min(ib), ia.max(ib));
        let (left, right) = self.slots.split_at_mut(hi);
        let (lo_body, hi_body) = (left[lo].as_mut()?, right[0].as_mut()?);
        if ia < ib {
            Some((lo_body, hi_body))
        } else {
            Some((hi_body, lo_body))
        }
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<BodyHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| BodyHandle(i as u32)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|b| (BodyHandle(i as u32), b)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BodyHandle, &mut RigidBody)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|b| (BodyHandle(i as u32), b)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn unit_cube_body(position: Vec3) -> RigidBody {
        let model = Arc::new(ConvexModel::cuboid(Vec3::splat(0.5)));
        RigidBody::new_dynamic(model, CoordinateSpace::from_position(position), 2.0)
    }

    #[test]
    fn sphere_approximation_inertia() {
        let body = unit_cube_body(Vec3::ZERO);
        let r = 0.75_f32.sqrt();
        let expected = 0.4 * 2.0 * r * r;
        assert!((1.0 / body.inverse_inertia - expected).abs() < 1e-5);
    }

    #[test]
    fn static_body_has_no_inverse_mass() {
        let model = Arc::new(ConvexModel::cuboid(Vec3::ONE));
        let body = RigidBody::new_static(model, CoordinateSpace::default());
        assert!(body.is_static());
        assert_eq!(body.inverse_mass, 0.0);
        assert_eq!(body.inverse_inertia, 0.0);
    }

    #[test]
    fn support_cache_follows_movement() {
        let mut body = unit_cube_body(Vec3::ZERO);
        let before = body.world_support_pieces()[0][0];
        body.space.position = Vec3::new(5.0, 0.0, 0.0);
        // Stale until refreshed.
        assert_eq!(body.world_support_pieces()[0][0], before);
        body.refresh_support_cache();
        assert_eq!(body.world_support_pieces()[0][0], before + Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn support_cache_rotates_offsets() {
        let mesh = crate::model::MeshDescription {
            offset: Vec3::new(1.0, 0.0, 0.0),
            vertices: vec![Vec3::ZERO],
            children: Vec::new(),
        };
        let model = Arc::new(ConvexModel::from_mesh(&mesh));
        let space = CoordinateSpace::new(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let body = RigidBody::new_static(model, space);
        let world = body.world_support_pieces()[0][0];
        assert!(world.distance(Vec3::new(0.0, 1.0, 0.0)) < 1e-6);
    }

    #[test]
    fn pair_is_order_normalized() {
        let a = BodyHandle(7);
        let b = BodyHandle(2);
        assert_eq!(BodyPair::new(a, b), BodyPair::new(b, a));
        assert_eq!(BodyPair::new(a, b).first, b);
    }

    #[test]
    fn arena_handles_are_stable_across_removal() {
        let mut arena = BodyArena::new();
        let h0 = arena.insert(unit_cube_body(Vec3::ZERO));
        let h1 = arena.insert(unit_cube_body(Vec3::X));
        let h2 = arena.insert(unit_cube_body(Vec3::Y));
        arena.remove(h1);
        assert!(arena.get(h1).is_none());
        assert!(arena.get(h0).is_some());
        assert_eq!(arena.get(h2).unwrap().space.position, Vec3::Y);
        assert_eq!(arena.handles(), vec![h0, h2]);
    }

    #[test]
    fn pair_mut_resolves_both_orders() {
        let mut arena = BodyArena::new();
        let h0 = arena.insert(unit_cube_body(Vec3::ZERO));
        let h1 = arena.insert(unit_cube_body(Vec3::X));
        let (a, b) = arena.get_pair_mut(h1, h0).unwrap();
        assert_eq!(a.space.position, Vec3::X);
        assert_eq!(b.space.position, Vec3::ZERO);
        assert!(arena.get_pair_mut(h0, h0).is_none());
    }
}
