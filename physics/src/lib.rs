//! Real-time 3D rigid-body physics.
//!
//! Bodies live in a [`PhysicsWorld`]; each fixed step integrates velocities,
//! finds contacts (spatial hash broad phase, analytic and GJK/EPA narrow
//! phase), resolves them with a warm-started sequential-impulse solver and
//! corrects residual penetration.
//!
//! ```no_run
//! use std::sync::Arc;
//! use physics::prelude::*;
//!
//! let mut world = PhysicsWorld::new();
//! world.create_body(BodyDesc::fixed(Arc::new(Shape::ground())));
//! let ball = world.create_body(
//!     BodyDesc::dynamic(Arc::new(Shape::sphere(0.5)?)).with_position(Vec3::new(0.0, 4.0, 0.0)),
//! );
//! for _ in 0..120 {
//!     world.step(1.0 / 60.0);
//! }
//! println!("{:?}", world.position(ball));
//! # Ok::<(), physics::PhysicsError>(())
//! ```

pub mod body;
pub mod collision;
pub mod error;
pub mod integrator;
pub mod material;
pub mod math;
pub mod settings;
pub mod shape;
pub mod solver;
pub mod world;

pub use body::{BodyDesc, BodyHandle, BodyType, RigidBody};
pub use collision::{BodyPair, ContactManifold, ContactPoint};
pub use error::{PhysicsError, Result};
pub use material::{CombineMode, CombinedMaterial, Material, MaterialId, MaterialRegistry};
pub use math::{Aabb, Iso, Mat3, Quat, Vec3};
pub use shape::{Shape, ShapeType, TriangleMesh};
pub use solver::{SolverConfig, SolverStats};
pub use world::{
    DebugContact, DebugSnapshot, PhysicsWorld, SimulationState, StepStats, TransformSync,
    WorldConfig,
};

/// Everything a typical host needs in one import.
pub mod prelude {
    pub use crate::body::{BodyDesc, BodyHandle, BodyType, RigidBody};
    pub use crate::collision::{Algorithm, BodyPair};
    pub use crate::error::{PhysicsError, Result};
    pub use crate::material::{CombineMode, Material, MaterialId};
    pub use crate::math::{Aabb, Quat, Vec3};
    pub use crate::shape::Shape;
    pub use crate::world::{PhysicsWorld, SimulationState, TransformSync, WorldConfig};
}
