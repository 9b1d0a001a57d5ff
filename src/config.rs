//! Arena tuning knobs.

use std::str::FromStr;

use crate::error::Error;

/// Which collision-detection schedule the arena runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionStrategyKind {
    /// Every pair on the calling thread.
    Serial,
    /// Bodies split into fixed groups, one task per group and group pair.
    MultiThreaded,
    /// Bounding-sphere test on the GPU, narrow phase on CPU tasks.
    GpuBroadPhase,
}

impl FromStr for CollisionStrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "serial" => Ok(Self::Serial),
            "multi-threaded" => Ok(Self::MultiThreaded),
            "gpu-broad-phase" => Ok(Self::GpuBroadPhase),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Which constraint-solving schedule the arena runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintStrategyKind {
    Serial,
    MultiThreaded,
}

impl FromStr for ConstraintStrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "serial" => Ok(Self::Serial),
            "multi-threaded" => Ok(Self::MultiThreaded),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Everything tunable about a simulation.
#[derive(Debug, Clone)]
pub struct ArenaSettings {
    /// Fixed simulation step, in seconds.
    pub step_size: f32,
    /// Constraint solver iterations per step.
    pub iterations: u32,
    /// Baumgarte position-correction factor.
    pub beta: f32,
    /// How bouncy collisions are, from 0 (dead) to 1 (elastic).
    pub coefficient_of_restitution: f32,
    /// Penetration depth below which correction and restitution stay off.
    pub slop: f32,
    /// Squared distance under which a re-detected contact is considered
    /// the same contact as an existing one.
    pub manifold_persistent_threshold: f32,
    /// Squared distance a carried contact may drift from its recorded
    /// world position before it is dropped.
    pub manifold_movement_threshold: f32,
    pub collision_strategy: CollisionStrategyKind,
    /// Bodies per group for the multi-threaded collision strategy.
    pub bodies_per_group: usize,
    /// GPU-found candidate pairs per narrow-phase task.
    pub collisions_per_task: usize,
    /// Bodies per GPU dispatch batch.
    pub gpu_batch_size: usize,
    pub constraint_strategy: ConstraintStrategyKind,
    /// Manifolds per batch for the multi-threaded constraint strategy.
    pub manifolds_per_task: usize,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            step_size: 1.0 / 60.0,
            iterations: 20,
            beta: 0.03,
            coefficient_of_restitution: 0.5,
            slop: 0.05,
            manifold_persistent_threshold: 0.05,
            manifold_movement_threshold: 0.05,
            collision_strategy: CollisionStrategyKind::Serial,
            bodies_per_group: 64,
            collisions_per_task: 512,
            gpu_batch_size: 512,
            constraint_strategy: ConstraintStrategyKind::Serial,
            manifolds_per_task: 750,
        }
    }
}
