//! Persistent contact manifolds and the concurrent map that holds them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock};

use glam::Vec3;

use crate::body::{BodyPair, RigidBody};

/// Solver caps each manifold at this many contacts.
pub const MAX_CONTACTS: usize = 4;

/// A single contact point between two bodies.
///
/// World points sit on each body's surface; `point_a - point_b` equals
/// `normal * penetration_depth`, with the normal pointing from A toward B.
/// Local points are frozen in each body's frame at creation time and back
/// the drift and persistence checks on later steps. The accumulated
/// impulses survive re-insertion so the solver can warm start.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    pub point_a: Vec3,
    pub point_b: Vec3,
    pub local_a: Vec3,
    pub local_b: Vec3,
    pub normal: Vec3,
    pub tangent1: Vec3,
    pub tangent2: Vec3,
    pub penetration_depth: f32,
    pub normal_impulse: f32,
    pub tangent1_impulse: f32,
    pub tangent2_impulse: f32,
}

impl Contact {
    pub fn new(
        point_a: Vec3,
        point_b: Vec3,
        normal: Vec3,
        penetration_depth: f32,
        a: &RigidBody,
        b: &RigidBody,
    ) -> Self {
        let (tangent1, tangent2) = normal.any_orthonormal_pair();
        Self {
            point_a,
            point_b,
            local_a: a.space.inverse_transform_point(point_a),
            local_b: b.space.inverse_transform_point(point_b),
            normal,
            tangent1,
            tangent2,
            penetration_depth,
            normal_impulse: 0.0,
            tangent1_impulse: 0.0,
            tangent2_impulse: 0.0,
        }
    }
}

/// Velocity changes the solver has produced for a pair but not yet applied.
///
/// Solving writes here instead of to the live bodies so concurrent tasks
/// never race on shared bodies; the arena folds the deltas in after the
/// whole solve finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct VelocityDeltas {
    pub linear_a: Vec3,
    pub angular_a: Vec3,
    pub linear_b: Vec3,
    pub angular_b: Vec3,
}

impl VelocityDeltas {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The set of contacts persisting between one pair of bodies.
#[derive(Debug, Clone)]
pub struct ContactManifold {
    contacts: Vec<Contact>,
    /// Squared-distance threshold under which an incoming contact is the
    /// same contact as an existing one.
    persistence_threshold: f32,
    /// Squared-distance threshold beyond which a surviving contact has
    /// drifted too far from where it was recorded.
    movement_threshold: f32,
    pub deltas: VelocityDeltas,
}

impl ContactManifold {
    pub fn new(persistence_threshold: f32, movement_threshold: f32) -> Self {
        Self {
            contacts: Vec::new(),
            persistence_threshold,
            movement_threshold,
            deltas: VelocityDeltas::default(),
        }
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn contacts_mut(&mut self) -> &mut [Contact] {
        &mut self.contacts
    }

    /// Merges freshly detected contacts into the manifold.
    ///
    /// An incoming contact whose world points both land within the
    /// persistence threshold of an existing contact replaces that contact's
    /// geometry but keeps its accumulated impulses. Anything else is new.
    pub fn insert(&mut self, incoming: &[Contact]) {
        for contact in incoming {
            let matched = self.contacts.iter_mut().find(|existing| {
                existing.point_a.distance_squared(contact.point_a) < self.persistence_threshold
                    && existing.point_b.distance_squared(contact.point_b)
                        < self.persistence_threshold
            });
            match matched {
                Some(existing) => {
                    let normal_impulse = existing.normal_impulse;
                    let tangent1_impulse = existing.tangent1_impulse;
                    let tangent2_impulse = existing.tangent2_impulse;
                    *existing = *contact;
                    existing.normal_impulse = normal_impulse;
                    existing.tangent1_impulse = tangent1_impulse;
                    existing.tangent2_impulse = tangent2_impulse;
                }
                None => self.contacts.push(*contact),
            }
        }
        if self.contacts.len() > MAX_CONTACTS {
            self.reduce();
        }
    }

    /// Re-validates carried contacts under the bodies' current transforms.
    ///
    /// Each contact's world points are recomputed from its frozen local
    /// points. A contact is dropped when the bodies have separated along
    /// its normal, or when either recomputed point has drifted past the
    /// movement threshold from where it was recorded.
    pub fn prune_old_contacts(&mut self, a: &RigidBody, b: &RigidBody) {
        let space_a = a.space;
        let space_b = b.space;
        let movement = self.movement_threshold;
        self.contacts.retain(|c| {
            let world_a = space_a.transform_point(c.local_a);
            let world_b = space_b.transform_point(c.local_b);
            if (world_b - world_a).dot(c.normal) > 0.0 {
                return false;
            }
            world_a.distance_squared(c.point_a) <= movement
                && world_b.distance_squared(c.point_b) <= movement
        });
    }

    // Keep the four contacts that span the largest region: the deepest
    // point, the farthest from it, the farthest from that segment, and the
    // farthest from that triangle.
    fn reduce(&mut self) {
        let deepest = self
            .contacts
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| x.penetration_depth.total_cmp(&y.penetration_depth))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let p0 = self.contacts[deepest].point_a;

        let farthest = self.max_by_metric(&[deepest], |c| c.point_a.distance_squared(p0));
        let p1 = self.contacts[farthest].point_a;

        let off_segment =
            self.max_by_metric(&[deepest, farthest], |c| segment_distance_squared(c.point_a, p0, p1));
        let p2 = self.contacts[off_segment].point_a;

        let off_triangle = self.max_by_metric(&[deepest, farthest, off_segment], |c| {
            triangle_distance_squared(c.point_a, p0, p1, p2)
        });

        let keep = [deepest, farthest, off_segment, off_triangle];
        let mut reduced = Vec::with_capacity(MAX_CONTACTS);
        for index in keep {
            reduced.push(self.contacts[index]);
        }
        self.contacts = reduced;
    }

    fn max_by_metric(&self, exclude: &[usize], metric: impl Fn(&Contact) -> f32) -> usize {
        let mut best = usize::MAX;
        let mut best_value = f32::MIN;
        for (i, c) in self.contacts.iter().enumerate() {
            if exclude.contains(&i) {
                continue;
            }
            let value = metric(c);
            if value > best_value {
                best = i;
                best_value = value;
            }
        }
        best
    }
}

fn segment_distance_squared(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return p.distance_squared(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance_squared(a + ab * t)
}

fn triangle_distance_squared(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let normal = (b - a).cross(c - a);
    if normal.length_squared() > f32::EPSILON {
        // Inside test: p must be on the inner side of all three edges.
        let inside = (b - a).cross(p - a).dot(normal) >= 0.0
            && (c - b).cross(p - b).dot(normal) >= 0.0
            && (a - c).cross(p - c).dot(normal) >= 0.0;
        if inside {
            let d = (p - a).dot(normal) / normal.length();
            return d * d;
        }
    }
    // Degenerate triangle or projection outside: nearest edge.
    segment_distance_squared(p, a, b)
        .min(segment_distance_squared(p, b, c))
        .min(segment_distance_squared(p, c, a))
}

/// All manifolds in flight, keyed by normalized body pair.
///
/// The collision strategies update entries concurrently: each pair is
/// owned by exactly one task, so the per-entry mutex is uncontended and
/// the map-level write lock is only taken to insert a key nobody has seen
/// before. A `BTreeMap` keeps iteration order deterministic.
#[derive(Debug, Default)]
pub struct ManifoldMap {
    inner: RwLock<BTreeMap<BodyPair, Mutex<ContactManifold>>>,
}

impl ManifoldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prunes and merges contacts for one pair, creating the manifold on
    /// first sight. Safe to call from parallel strategy tasks as long as
    /// no two tasks share a pair.
    pub fn update(
        &self,
        pair: BodyPair,
        a: &RigidBody,
        b: &RigidBody,
        contacts: &[Contact],
        persistence_threshold: f32,
        movement_threshold: f32,
    ) {
        {
            let map = self.inner.read().unwrap();
            if let Some(entry) = map.get(&pair) {
                let mut manifold = entry.lock().unwrap();
                manifold.prune_old_contacts(a, b);
                manifold.insert(contacts);
                return;
            }
        }
        let mut map = self.inner.write().unwrap();
        let entry = map
            .entry(pair)
            .or_insert_with(|| Mutex::new(ContactManifold::new(persistence_threshold, movement_threshold)));
        let mut manifold = entry.lock().unwrap();
        manifold.prune_old_contacts(a, b);
        manifold.insert(contacts);
    }

    /// Drops every manifold whose pair did not collide this step.
    pub fn retain_colliding(&mut self, colliding: &BTreeSet<BodyPair>) {
        self.inner
            .get_mut()
            .unwrap()
            .retain(|pair, _| colliding.contains(pair));
    }

    /// Drops every manifold touching the given body.
    pub fn remove_body(&mut self, handle: crate::body::BodyHandle) {
        self.inner
            .get_mut()
            .unwrap()
            .retain(|pair, _| !pair.contains(handle));
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BodyPair, &mut ContactManifold)> {
        self.inner
            .get_mut()
            .unwrap()
            .iter_mut()
            .map(|(pair, entry)| (*pair, entry.get_mut().unwrap()))
    }

    /// Read-only visit of one manifold, if present.
    pub fn with<R>(&self, pair: BodyPair, f: impl FnOnce(&ContactManifold) -> R) -> Option<R> {
        let map = self.inner.read().unwrap();
        let entry = map.get(&pair)?;
        let manifold = entry.lock().unwrap();
        Some(f(&manifold))
    }

    pub fn pairs(&self) -> Vec<BodyPair> {
        self.inner.read().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyHandle;
    use crate::model::ConvexModel;
    use crate::space::CoordinateSpace;
    use std::sync::Arc;

    const PERSISTENCE: f32 = 0.05;
    const MOVEMENT: f32 = 0.05;

    fn cube_body(position: Vec3) -> RigidBody {
        let model = Arc::new(ConvexModel::cuboid(Vec3::splat(0.5)));
        RigidBody::new_dynamic(model, CoordinateSpace::from_position(position), 1.0)
    }

    fn contact_at(point_a: Vec3, depth: f32, a: &RigidBody, b: &RigidBody) -> Contact {
        Contact::new(point_a, point_a - Vec3::X * depth, Vec3::X, depth, a, b)
    }

    #[test]
    fn reinsertion_preserves_impulses() {
        let a = cube_body(Vec3::ZERO);
        let b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let mut manifold = ContactManifold::new(PERSISTENCE, MOVEMENT);
        manifold.insert(&[contact_at(Vec3::new(0.5, 0.0, 0.0), 0.5, &a, &b)]);
        manifold.contacts_mut()[0].normal_impulse = 3.5;

        // Same contact, detected again on the next step.
        manifold.insert(&[contact_at(Vec3::new(0.5, 0.01, 0.0), 0.49, &a, &b)]);
        assert_eq!(manifold.contacts().len(), 1);
        assert_eq!(manifold.contacts()[0].normal_impulse, 3.5);
        assert!((manifold.contacts()[0].penetration_depth - 0.49).abs() < 1e-6);
    }

    #[test]
    fn distinct_contacts_accumulate() {
        let a = cube_body(Vec3::ZERO);
        let b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let mut manifold = ContactManifold::new(PERSISTENCE, MOVEMENT);
        manifold.insert(&[contact_at(Vec3::new(0.5, 0.0, 0.0), 0.5, &a, &b)]);
        manifold.insert(&[contact_at(Vec3::new(0.5, 0.4, 0.0), 0.5, &a, &b)]);
        assert_eq!(manifold.contacts().len(), 2);
    }

    #[test]
    fn reduction_caps_at_four_and_keeps_deepest() {
        let a = cube_body(Vec3::ZERO);
        let b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let mut manifold = ContactManifold::new(PERSISTENCE, MOVEMENT);
        let mut contacts = Vec::new();
        for i in 0..6 {
            let y = i as f32 * 0.5;
            contacts.push(contact_at(Vec3::new(0.5, y, 0.0), 0.1, &a, &b));
        }
        // The deepest one sits in the middle of the spread.
        contacts[3].penetration_depth = 0.9;
        manifold.insert(&contacts);
        assert_eq!(manifold.contacts().len(), MAX_CONTACTS);
        assert!(manifold
            .contacts()
            .iter()
            .any(|c| c.penetration_depth == 0.9));
    }

    #[test]
    fn prune_drops_separated_contacts() {
        let a = cube_body(Vec3::ZERO);
        let mut b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let mut manifold = ContactManifold::new(PERSISTENCE, MOVEMENT);
        manifold.insert(&[contact_at(Vec3::new(0.5, 0.0, 0.0), 0.5, &a, &b)]);

        // B retreats along the normal: local points now show separation.
        b.space.position = Vec3::new(1.5, 0.0, 0.0);
        manifold.prune_old_contacts(&a, &b);
        assert!(manifold.contacts().is_empty());
    }

    #[test]
    fn prune_drops_drifted_contacts() {
        let a = cube_body(Vec3::ZERO);
        let mut b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let mut manifold = ContactManifold::new(PERSISTENCE, MOVEMENT);
        manifold.insert(&[contact_at(Vec3::new(0.5, 0.0, 0.0), 0.5, &a, &b)]);

        // B slides sideways, deeper if anything along the normal, but far
        // enough that the recorded point is stale.
        b.space.position = Vec3::new(0.4, 1.0, 0.0);
        manifold.prune_old_contacts(&a, &b);
        assert!(manifold.contacts().is_empty());
    }

    #[test]
    fn prune_keeps_stationary_contacts() {
        let a = cube_body(Vec3::ZERO);
        let b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let mut manifold = ContactManifold::new(PERSISTENCE, MOVEMENT);
        manifold.insert(&[contact_at(Vec3::new(0.5, 0.0, 0.0), 0.5, &a, &b)]);
        manifold.prune_old_contacts(&a, &b);
        assert_eq!(manifold.contacts().len(), 1);
    }

    #[test]
    fn map_updates_and_retains() {
        let a = cube_body(Vec3::ZERO);
        let b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let pair = BodyPair::new(BodyHandle(0), BodyHandle(1));
        let mut map = ManifoldMap::new();
        map.update(
            pair,
            &a,
            &b,
            &[contact_at(Vec3::new(0.5, 0.0, 0.0), 0.5, &a, &b)],
            PERSISTENCE,
            MOVEMENT,
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.with(pair, |m| m.contacts().len()), Some(1));

        map.retain_colliding(&BTreeSet::new());
        assert!(map.is_empty());
    }

    #[test]
    fn map_removes_manifolds_for_dead_bodies() {
        let a = cube_body(Vec3::ZERO);
        let b = cube_body(Vec3::new(0.5, 0.0, 0.0));
        let mut map = ManifoldMap::new();
        let pair01 = BodyPair::new(BodyHandle(0), BodyHandle(1));
        let pair12 = BodyPair::new(BodyHandle(1), BodyHandle(2));
        let contacts = [contact_at(Vec3::new(0.5, 0.0, 0.0), 0.5, &a, &b)];
        map.update(pair01, &a, &b, &contacts, PERSISTENCE, MOVEMENT);
        map.update(pair12, &a, &b, &contacts, PERSISTENCE, MOVEMENT);
        map.remove_body(BodyHandle(0));
        assert_eq!(map.pairs(), vec![pair12]);
    }
}
