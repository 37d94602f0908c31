use thiserror::Error;

/// Error taxonomy of the index core.
///
/// The first four kinds are caller bugs and are never retried. `StructuralConflict` is a
/// signal: the balancer maps it back to a no-op decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TetreeError {
    #[error("coordinates ({x}, {y}, {z}) outside the positive-octant domain")]
    InvalidDomain { x: i64, y: i64, z: i64 },

    #[error("level {level} outside [0, {max}]")]
    InvalidLevel { level: u32, max: u8 },

    #[error("{what} index {index} out of range (< {bound})")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        bound: usize,
    },

    #[error("cannot subdivide below the deepest refinement level")]
    MaxLevelExceeded,

    #[error("malformed key at level {level}: {reason}")]
    InvalidKey { level: u8, reason: &'static str },

    #[error("structural conflict: {0}")]
    StructuralConflict(&'static str),

    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, TetreeError>;
