//! Crate-wide error type.

use thiserror::Error;

/// Failures the physics pipeline can surface to the caller.
///
/// Everything here is fatal for the operation that produced it. Geometric
/// non-convergence (GJK giving up on a degenerate configuration) is not an
/// error; it is reported as "no collision".
#[derive(Debug, Error)]
pub enum Error {
    /// A strategy selector string did not match any known strategy.
    #[error("unknown strategy selector `{0}`")]
    UnknownStrategy(String),

    /// The GPU broad phase was requested but no usable device exists.
    #[error("gpu broad phase unavailable: {0}")]
    GpuUnavailable(String),

    /// A GPU dispatch or read-back failed after construction succeeded.
    #[error("gpu broad phase failed: {0}")]
    Gpu(String),

    /// A simplex reached `build` with an impossible vertex count.
    #[error("simplex has unexpected size {0}")]
    SimplexSize(usize),

    /// EPA was started from a simplex that is not a full tetrahedron.
    #[error("polytope requires a terminal 4-simplex, got {0} vertices")]
    IncompleteSimplex(usize),

    /// A direction that must be normalizable had zero length.
    #[error("zero-length vector cannot be normalized")]
    ZeroLengthNormal,

    /// Contact interpolation hit a triangle with no area.
    #[error("degenerate triangle in contact generation")]
    DegenerateTriangle,
}

pub type Result<T> = std::result::Result<T, Error>;
