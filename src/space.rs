//! Position and orientation of a body, with local/global transforms.

use glam::{Quat, Vec3};

use crate::error::{Error, Result};

/// A rigid transform: translation plus a unit quaternion rotation.
///
/// Equality is by value. The support-vertex caches key off this, so two
/// spaces compare equal exactly when they produce the same world geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateSpace {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for CoordinateSpace {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl CoordinateSpace {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Local point to world point.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * point
    }

    /// World point to local point.
    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.conjugate() * (point - self.position)
    }

    /// Local direction to world direction (no translation).
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    /// World direction to local direction (no translation).
    pub fn inverse_transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation.conjugate() * vector
    }

    /// First-order quaternion integration: q' = q + dt/2 * w * q,
    /// renormalized. Fails if the updated quaternion collapses to zero.
    pub fn integrate_rotation(&mut self, angular_velocity: Vec3, dt: f32) -> Result<()> {
        let w = Quat::from_xyzw(
            angular_velocity.x,
            angular_velocity.y,
            angular_velocity.z,
            0.0,
        );
        let q = self.rotation;
        let dq = w * q;
        let updated = Quat::from_xyzw(
            q.x + dq.x * 0.5 * dt,
            q.y + dq.y * 0.5 * dt,
            q.z + dq.z * 0.5 * dt,
            q.w + dq.w * 0.5 * dt,
        );
        let len = updated.length();
        if len <= f32::EPSILON {
            return Err(Error::ZeroLengthNormal);
        }
        self.rotation = updated * (1.0 / len);
        Ok(())
    }
}
