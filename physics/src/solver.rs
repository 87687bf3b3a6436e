/*!
Sequential-impulse contact solver with split position correction.

A step runs in two passes over the active manifolds of the contact cache:

1. [`ConstraintSolver::solve_velocities`]: warm start from last step's
   accumulated impulses, then Gauss-Seidel iterations on every contact point
   (non-penetration with restitution bias, then two friction directions
   clamped to the Coulomb cone). Iteration stops early once the largest
   impulse change drops below `velocity_tolerance`.
2. [`ConstraintSolver::solve_positions`]: push bodies apart along the contact
   normal by a fraction of the remaining penetration, split by inverse mass.
   Velocities are not touched, so the correction adds no energy.

Notes
- Accumulated normal impulses are clamped at zero: contacts push, never pull.
- A contact whose bodies both have zero inverse mass is skipped.
*/

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::body::{BodyHandle, RigidBody};
use crate::collision::{BodyPair, ContactCache};
use crate::error::{PhysicsError, Result};
use crate::math::{Mat3, Vec3};
use crate::settings::{
    BAUMGARTE_FACTOR, EPSILON, MAX_CONTACT_POINTS, MAX_POSITION_CORRECTION, PENETRATION_SLOP,
    POSITION_ITERATIONS, RESTITUTION_THRESHOLD, STATIC_FRICTION_SPEED, VELOCITY_ITERATIONS,
    VELOCITY_TOLERANCE,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Upper bound on velocity iterations per step.
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    /// Fraction of the penetration beyond the slop removed per position iteration.
    pub baumgarte: f32,
    /// Penetration tolerated without correction.
    pub slop: f32,
    /// Largest displacement per position iteration.
    pub max_correction: f32,
    /// Approach speed below which restitution is ignored (m/s).
    pub restitution_threshold: f32,
    /// Early-exit threshold on the largest impulse change of an iteration.
    pub velocity_tolerance: f32,
    pub warm_starting: bool,
    /// Tangential speed below which static friction applies.
    pub static_friction_speed: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_iterations: VELOCITY_ITERATIONS,
            position_iterations: POSITION_ITERATIONS,
            baumgarte: BAUMGARTE_FACTOR,
            slop: PENETRATION_SLOP,
            max_correction: MAX_POSITION_CORRECTION,
            restitution_threshold: RESTITUTION_THRESHOLD,
            velocity_tolerance: VELOCITY_TOLERANCE,
            warm_starting: true,
            static_friction_speed: STATIC_FRICTION_SPEED,
        }
    }
}

impl SolverConfig {
    /// More iterations and a tighter tolerance for stacks.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            velocity_iterations: 20,
            position_iterations: 3,
            velocity_tolerance: 1.0e-5,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| {
            Err(PhysicsError::InvalidConfig {
                field,
                reason: reason.to_string(),
            })
        };
        if self.velocity_iterations == 0 {
            return invalid("solver.velocity_iterations", "must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.baumgarte) {
            return invalid("solver.baumgarte", "must be within [0, 1]");
        }
        if self.slop.is_nan() || self.slop < 0.0 {
            return invalid("solver.slop", "must be non-negative");
        }
        if self.max_correction.is_nan() || self.max_correction <= 0.0 {
            return invalid("solver.max_correction", "must be positive");
        }
        if self.restitution_threshold.is_nan() || self.restitution_threshold < 0.0 {
            return invalid("solver.restitution_threshold", "must be non-negative");
        }
        if self.velocity_tolerance.is_nan() || self.velocity_tolerance < 0.0 {
            return invalid("solver.velocity_tolerance", "must be non-negative");
        }
        Ok(())
    }
}

/// Counters from the last solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    pub manifolds: usize,
    pub contacts: usize,
    /// Velocity iterations actually run.
    pub velocity_iterations: u32,
    /// Largest impulse change in the last velocity iteration.
    pub last_impulse_delta: f32,
}

/// Velocity state of one body during the solve.
#[derive(Clone, Copy)]
struct SolverBody {
    v: Vec3,
    w: Vec3,
    inv_mass: f32,
    inv_inertia: Mat3,
}

impl SolverBody {
    /// Sleeping bodies take part as immovable supports.
    fn from_body(body: &RigidBody) -> Self {
        let dynamic = body.is_dynamic() && body.is_awake();
        Self {
            v: body.linear_velocity(),
            w: body.angular_velocity(),
            inv_mass: if dynamic { body.inv_mass() } else { 0.0 },
            inv_inertia: if dynamic {
                body.world_inv_inertia()
            } else {
                Mat3::zeros()
            },
        }
    }

    #[inline]
    fn velocity_at(&self, r: &Vec3) -> Vec3 {
        self.v + self.w.cross(r)
    }

    #[inline]
    fn apply(&mut self, impulse: &Vec3, r: &Vec3) {
        self.v += impulse * self.inv_mass;
        self.w += self.inv_inertia * r.cross(impulse);
    }
}

#[derive(Clone, Copy)]
struct PointConstraint {
    r_a: Vec3,
    r_b: Vec3,
    normal_mass: f32,
    tangent_mass: [f32; 2],
    /// Target normal velocity from restitution.
    bias: f32,
    friction: f32,
    normal_impulse: f32,
    tangent_impulse: [f32; 2],
}

struct ManifoldConstraint {
    pair: BodyPair,
    a: usize,
    b: usize,
    normal: Vec3,
    tangents: [Vec3; 2],
    points: Vec<PointConstraint>,
}

#[derive(Clone, Debug, Default)]
pub struct ConstraintSolver {
    pub config: SolverConfig,
}

impl ConstraintSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Resolve contact velocities for every active manifold in `cache`.
    ///
    /// `slots` maps each handle to its index in `bodies`. Resulting impulses
    /// are written back into the manifold points for next step's warm start,
    /// and each point's penetration is advanced by the solved normal velocity
    /// over `dt` so position correction sees the pose after integration.
    pub fn solve_velocities(
        &self,
        bodies: &mut [RigidBody],
        slots: &HashMap<BodyHandle, usize>,
        cache: &mut ContactCache,
        dt: f32,
    ) -> SolverStats {
        let mut solver_bodies: Vec<SolverBody> = bodies.iter().map(SolverBody::from_body).collect();
        let mut constraints = self.prepare(&solver_bodies, slots, cache);

        let mut stats = SolverStats {
            manifolds: constraints.len(),
            contacts: constraints.iter().map(|c| c.points.len()).sum(),
            ..SolverStats::default()
        };
        if constraints.is_empty() {
            return stats;
        }

        if self.config.warm_starting {
            for c in &constraints {
                warm_start(c, &mut solver_bodies);
            }
        }

        for _ in 0..self.config.velocity_iterations {
            let mut max_delta = 0.0f32;
            for c in &mut constraints {
                max_delta = max_delta.max(solve_manifold(c, &mut solver_bodies));
            }
            stats.velocity_iterations += 1;
            stats.last_impulse_delta = max_delta;
            if max_delta < self.config.velocity_tolerance {
                break;
            }
        }

        for c in &constraints {
            if let Some(m) = cache.get_mut(c.pair) {
                let (ba, bb) = (&solver_bodies[c.a], &solver_bodies[c.b]);
                for (p, solved) in m.points_mut().iter_mut().zip(&c.points) {
                    p.normal_impulse = solved.normal_impulse;
                    p.tangent_impulse = solved.tangent_impulse;
                    let vn = (bb.velocity_at(&solved.r_b) - ba.velocity_at(&solved.r_a)).dot(&c.normal);
                    p.penetration -= vn * dt;
                }
            }
        }
        for (body, solved) in bodies.iter_mut().zip(&solver_bodies) {
            if body.is_dynamic() && body.is_awake() {
                body.set_velocities_unchecked(solved.v, solved.w);
            }
        }
        stats
    }

    /// Push penetrating bodies apart; returns how many corrections were applied.
    pub fn solve_positions(
        &self,
        bodies: &mut [RigidBody],
        slots: &HashMap<BodyHandle, usize>,
        cache: &mut ContactCache,
    ) -> usize {
        let SolverConfig {
            baumgarte,
            slop,
            max_correction,
            ..
        } = self.config;
        let mut corrections = 0;

        for _ in 0..self.config.position_iterations {
            for m in cache.active_manifolds_mut() {
                let Some((a, b)) = body_slots(m.pair(), slots) else {
                    continue;
                };
                let (inv_a, inv_b) = (movable_inv_mass(&bodies[a]), movable_inv_mass(&bodies[b]));
                let total = inv_a + inv_b;
                if total <= EPSILON {
                    continue;
                }
                let deepest = m.max_penetration();
                if deepest <= slop {
                    continue;
                }
                let correction = (baumgarte * (deepest - slop)).min(max_correction);
                let n = m.normal();
                bodies[a].translate(-n * (correction * inv_a / total));
                bodies[b].translate(n * (correction * inv_b / total));
                for p in m.points_mut() {
                    p.penetration -= correction;
                }
                corrections += 1;
            }
        }
        corrections
    }

    fn prepare(
        &self,
        bodies: &[SolverBody],
        slots: &HashMap<BodyHandle, usize>,
        cache: &ContactCache,
    ) -> Vec<ManifoldConstraint> {
        let cfg = &self.config;
        let mut constraints = Vec::new();

        for m in cache.active_manifolds() {
            let Some(pair) = m.pair() else {
                continue;
            };
            let Some((a, b)) = body_slots(Some(pair), slots) else {
                continue;
            };
            let (ba, bb) = (&bodies[a], &bodies[b]);
            if ba.inv_mass + bb.inv_mass <= EPSILON {
                continue;
            }

            let normal = m.normal();
            let tangents = m.tangents();
            let mut points = Vec::with_capacity(MAX_CONTACT_POINTS);
            for p in m.points() {
                let (r_a, r_b) = (p.local_a, p.local_b);
                let rel = bb.velocity_at(&r_b) - ba.velocity_at(&r_a);
                let vn = rel.dot(&normal);
                let tangential_speed = (rel - normal * vn).norm();

                let bias = if vn < -cfg.restitution_threshold {
                    -m.material.restitution * vn
                } else {
                    0.0
                };
                let friction = if tangential_speed < cfg.static_friction_speed {
                    m.material.static_friction
                } else {
                    m.material.dynamic_friction
                };
                let (normal_impulse, tangent_impulse) = if cfg.warm_starting {
                    (p.normal_impulse, p.tangent_impulse)
                } else {
                    (0.0, [0.0; 2])
                };

                points.push(PointConstraint {
                    r_a,
                    r_b,
                    normal_mass: effective_mass(ba, bb, &r_a, &r_b, &normal),
                    tangent_mass: tangents.map(|t| effective_mass(ba, bb, &r_a, &r_b, &t)),
                    bias,
                    friction,
                    normal_impulse,
                    tangent_impulse,
                });
            }
            constraints.push(ManifoldConstraint {
                pair,
                a,
                b,
                normal,
                tangents,
                points,
            });
        }
        constraints
    }
}

#[inline]
fn movable_inv_mass(body: &RigidBody) -> f32 {
    if body.is_dynamic() && body.is_awake() {
        body.inv_mass()
    } else {
        0.0
    }
}

fn body_slots(pair: Option<BodyPair>, slots: &HashMap<BodyHandle, usize>) -> Option<(usize, usize)> {
    let pair = pair?;
    Some((*slots.get(&pair.first())?, *slots.get(&pair.second())?))
}

/// `1 / (1/mA + 1/mB + n·((IA⁻¹(rA×n))×rA + (IB⁻¹(rB×n))×rB))`, zero when degenerate.
fn effective_mass(a: &SolverBody, b: &SolverBody, r_a: &Vec3, r_b: &Vec3, dir: &Vec3) -> f32 {
    let ang_a = (a.inv_inertia * r_a.cross(dir)).cross(r_a);
    let ang_b = (b.inv_inertia * r_b.cross(dir)).cross(r_b);
    let k = a.inv_mass + b.inv_mass + dir.dot(&(ang_a + ang_b));
    if k > EPSILON { 1.0 / k } else { 0.0 }
}

/// Apply `impulse` to B and its opposite to A.
#[inline]
fn apply_pair(bodies: &mut [SolverBody], a: usize, b: usize, impulse: &Vec3, p: &PointConstraint) {
    bodies[a].apply(&-impulse, &p.r_a);
    bodies[b].apply(impulse, &p.r_b);
}

fn warm_start(c: &ManifoldConstraint, bodies: &mut [SolverBody]) {
    for p in &c.points {
        let impulse = c.normal * p.normal_impulse
            + c.tangents[0] * p.tangent_impulse[0]
            + c.tangents[1] * p.tangent_impulse[1];
        apply_pair(bodies, c.a, c.b, &impulse, p);
    }
}

/// One Gauss-Seidel pass over a manifold; returns the largest impulse change.
fn solve_manifold(c: &mut ManifoldConstraint, bodies: &mut [SolverBody]) -> f32 {
    let mut max_delta = 0.0f32;
    for p in &mut c.points {
        let rel = bodies[c.b].velocity_at(&p.r_b) - bodies[c.a].velocity_at(&p.r_a);
        let vn = rel.dot(&c.normal);

        // Separating faster than the bias demands, with nothing left to undo.
        let separating = vn > p.bias && p.normal_impulse <= 0.0;
        if !separating {
            let lambda = p.normal_mass * (p.bias - vn);
            let total = (p.normal_impulse + lambda).max(0.0);
            let delta = total - p.normal_impulse;
            p.normal_impulse = total;
            apply_pair(bodies, c.a, c.b, &(c.normal * delta), p);
            max_delta = max_delta.max(delta.abs());
        }

        let rel = bodies[c.b].velocity_at(&p.r_b) - bodies[c.a].velocity_at(&p.r_a);
        let mut candidate = [0.0f32; 2];
        for (k, t) in c.tangents.iter().enumerate() {
            candidate[k] = p.tangent_impulse[k] - p.tangent_mass[k] * rel.dot(t);
        }
        let limit = p.friction * p.normal_impulse;
        let magnitude = (candidate[0] * candidate[0] + candidate[1] * candidate[1]).sqrt();
        if magnitude > limit {
            let scale = if magnitude > EPSILON { limit / magnitude } else { 0.0 };
            candidate = candidate.map(|t| t * scale);
        }
        let delta = [
            candidate[0] - p.tangent_impulse[0],
            candidate[1] - p.tangent_impulse[1],
        ];
        p.tangent_impulse = candidate;
        let impulse = c.tangents[0] * delta[0] + c.tangents[1] * delta[1];
        apply_pair(bodies, c.a, c.b, &impulse, p);
        max_delta = max_delta.max(delta[0].abs()).max(delta[1].abs());
    }
    max_delta
}
