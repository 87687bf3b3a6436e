//! Error types for shape construction, materials and configuration.
//!
//! Nothing inside a simulation step returns an error: degenerate geometry
//! degrades to "no contact" and unresolvable pairs contribute no impulse.

use thiserror::Error;

/// Errors returned by fallible constructors and configuration checks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    /// A shape dimension was zero, negative or not finite.
    #[error("invalid {shape} {name}: {value} (must be finite and > 0)")]
    InvalidDimension {
        shape: &'static str,
        name: &'static str,
        value: f32,
    },

    /// A plane normal was zero-length or not finite.
    #[error("plane normal must be finite and non-zero")]
    InvalidPlaneNormal,

    /// A triangle mesh had no triangles, bad vertices or an index out of range.
    #[error("invalid triangle mesh: {0}")]
    InvalidMesh(String),

    /// A configuration value was outside its accepted range.
    #[error("invalid config value `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A material lookup by name failed.
    #[error("unknown material `{0}`")]
    UnknownMaterial(String),

    /// A material with the same name is already registered.
    #[error("material `{0}` is already registered")]
    DuplicateMaterial(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PhysicsError>;

/// Check that a dimension is finite and strictly positive.
pub(crate) fn positive(shape: &'static str, name: &'static str, value: f32) -> Result<f32> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PhysicsError::InvalidDimension { shape, name, value })
    }
}
