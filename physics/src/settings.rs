/*!
Simulation tuning constants.

Defaults read by [`crate::world::WorldConfig`] and the per-stage configs
(broad phase margin, GJK/EPA caps, solver iterations, sleep thresholds).
Limits that more than one stage depends on, such as the contact point
cap read by both the manifold builder and the solver, live here.

Units are meters, seconds and kilograms. Tolerances are sized for bodies
between a few centimeters and a few tens of meters; a world at another
scale should override them through its config.
*/

/// Practical small value for guards against division by zero.
pub const EPSILON: f32 = 1.0e-6;

/// Gravity magnitude in meters per second squared (positive value).
/// The default world gravity points along -Y with this magnitude.
pub const GRAVITY_MPS2: f32 = 9.81;

/// Default fixed simulation step (seconds).
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

/// Maximum number of fixed steps consumed by one `PhysicsWorld::update` call.
pub const DEFAULT_MAX_SUB_STEPS: u32 = 4;

// ---------------------------------------------------------------------------
// Broad phase
// ---------------------------------------------------------------------------

/// Default edge length of one spatial hash cell.
pub const DEFAULT_CELL_SIZE: f32 = 5.0;

/// Smallest accepted cell size. Smaller requests are clamped to this.
pub const MIN_CELL_SIZE: f32 = 0.1;

/// A body covering more cells than this is tested outside the grid.
pub const MAX_CELLS_PER_BODY: usize = 4096;

/// Half extent used for the finite stand-in AABB and support of a plane.
pub const PLANE_EXTENT: f32 = 10_000.0;

/// Half thickness of the stand-in AABB of a plane along its normal.
pub const PLANE_HALF_THICKNESS: f32 = 0.5;

// ---------------------------------------------------------------------------
// Narrow phase
// ---------------------------------------------------------------------------

/// Iteration cap for the GJK intersection query.
pub const GJK_MAX_ITERATIONS: u32 = 32;

/// Progress tolerance for GJK.
pub const GJK_TOLERANCE: f32 = 1.0e-3;

/// A GJK search direction shorter than this is treated as collapsed.
pub const GJK_DIRECTION_EPS: f32 = 1.0e-4;

/// Iteration cap for polytope expansion.
pub const EPA_MAX_ITERATIONS: u32 = 64;

/// EPA stops once a new support point improves the face distance by less than this.
pub const EPA_TOLERANCE: f32 = 1.0e-4;

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// Upper bound on points per manifold.
pub const MAX_CONTACT_POINTS: usize = 4;

/// Candidate points closer than this are merged into one.
pub const CONTACT_MERGE_DISTANCE: f32 = 0.01;

/// Quantization step used when hashing a contact position into its id.
pub const CONTACT_ID_CELL: f32 = 0.02;

/// Fallback radius for matching a new point to last frame's point when ids differ.
pub const CONTACT_MATCH_DISTANCE: f32 = 0.05;

/// Fraction of last frame's impulses carried into a matched point.
pub const WARM_START_RETENTION: f32 = 0.8;

/// Seconds an inactive manifold survives before it is purged.
pub const MANIFOLD_MAX_LIFETIME: f32 = 1.0;

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// Default number of sequential-impulse velocity iterations.
pub const VELOCITY_ITERATIONS: u32 = 8;

/// Default number of position correction passes.
pub const POSITION_ITERATIONS: u32 = 1;

/// Fraction of the penetration beyond the slop removed per correction pass.
pub const BAUMGARTE_FACTOR: f32 = 0.8;

/// Penetration allowed to remain so resting contacts stay touching.
pub const PENETRATION_SLOP: f32 = 0.001;

/// Largest displacement applied by one correction pass.
pub const MAX_POSITION_CORRECTION: f32 = 0.2;

/// Approach speed (m/s) below which restitution is ignored.
pub const RESTITUTION_THRESHOLD: f32 = 1.0;

/// Largest per-iteration impulse change at which the velocity solve stops early.
pub const VELOCITY_TOLERANCE: f32 = 1.0e-4;

/// Tangential speed (m/s) under which static friction applies.
pub const STATIC_FRICTION_SPEED: f32 = 0.05;

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Mass clamp range for dynamic bodies.
pub const MIN_MASS: f32 = 1.0e-3;
pub const MAX_MASS: f32 = 1.0e6;

/// Speed clamps applied after every velocity update.
pub const MAX_LINEAR_SPEED: f32 = 100.0;
pub const MAX_ANGULAR_SPEED: f32 = 50.0;

pub const DEFAULT_LINEAR_DAMPING: f32 = 0.01;
pub const DEFAULT_ANGULAR_DAMPING: f32 = 0.05;

/// Speeds under which a body accumulates sleep time.
pub const SLEEP_LINEAR_THRESHOLD: f32 = 0.1;
pub const SLEEP_ANGULAR_THRESHOLD: f32 = 0.1;

/// Seconds of continuous rest before a body falls asleep.
pub const SLEEP_TIME: f32 = 1.0;
