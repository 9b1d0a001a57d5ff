//! Brawn
//!
//! A real-time rigid body physics core built on glam, rayon, and wgpu.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **space / model / body** - Coordinate frames, convex collision models,
//!    rigid body state and storage
//! 2. **minkowski / collision** - GJK/EPA narrow phase over Minkowski
//!    differences
//! 3. **manifold / constraint** - Persistent contact manifolds and the
//!    sequential-impulse solver
//! 4. **strategy / gpu** - Serial, multi-threaded, and GPU-assisted schedules
//!    for collision detection and constraint solving
//! 5. **context / compute** - wgpu wrapper and compute-dispatch utilities
//!    backing the GPU broad phase
//! 6. **config / arena** - Tuning knobs and the fixed-timestep simulation
//!    driver

pub mod arena;
pub mod body;
pub mod collision;
pub mod compute;
pub mod config;
pub mod constraint;
pub mod context;
pub mod error;
pub mod gpu;
pub mod manifold;
pub mod minkowski;
pub mod model;
pub mod space;
pub mod strategy;

// Re-export commonly used types
pub use arena::Arena;

pub use body::{BodyArena, BodyHandle, BodyPair, RigidBody};

pub use collision::CollisionSolver;

pub use config::{ArenaSettings, CollisionStrategyKind, ConstraintStrategyKind};

pub use constraint::{ConstraintSolver, ConstraintStrategy};

pub use context::WgpuContext;

pub use error::{Error, Result};

pub use manifold::{Contact, ContactManifold, ManifoldMap};

pub use model::{ConvexModel, MeshDescription};

pub use space::CoordinateSpace;

pub use strategy::CollisionStrategy;

pub use compute::{compute_workgroup_count, ComputeDispatcher, ComputePipelineBuilder, StorageBuffer};

// Re-export glam for convenience
pub use glam;
