/*!
`PhysicsWorld`: owns the bodies and runs the fixed-step pipeline.

One [`PhysicsWorld::step`] runs, in order:
1. velocity integration (forces, gravity, damping)
2. broad phase over every body
3. contact cache aging
4. narrow phase on candidate pairs with an awake participant, refreshing the cache
5. velocity solve (warm start, iterate, store impulses)
6. position integration
7. position correction
8. sleep bookkeeping and statistics

Bodies are addressed by [`BodyHandle`]; handles are never reused, so a stale
handle simply resolves to `None`.
*/

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::body::{BodyDesc, BodyHandle, RigidBody};
use crate::collision::{
    BodyPair, BroadPhase, BroadPhaseConfig, ContactCache, ContactCacheConfig, NarrowPhaseConfig,
    NarrowPhaseDetector,
};
use crate::error::{PhysicsError, Result};
use crate::integrator::{Integrator, IntegratorConfig};
use crate::material::MaterialRegistry;
use crate::math::{Aabb, Quat, Vec3};
use crate::settings::{DEFAULT_MAX_SUB_STEPS, DEFAULT_TIME_STEP, GRAVITY_MPS2};
use crate::solver::{ConstraintSolver, SolverConfig};

/// Everything tunable about a world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub gravity: Vec3,
    /// Step length used by [`PhysicsWorld::update`].
    pub fixed_time_step: f32,
    /// Most steps a single `update` call may run.
    pub max_sub_steps: u32,
    pub broad_phase: BroadPhaseConfig,
    pub narrow_phase: NarrowPhaseConfig,
    pub contact: ContactCacheConfig,
    pub solver: SolverConfig,
    pub integrator: IntegratorConfig,
    /// Log every step's stats at debug level and report bodies whose state
    /// went non-finite.
    pub debug: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -GRAVITY_MPS2, 0.0),
            fixed_time_step: DEFAULT_TIME_STEP,
            max_sub_steps: DEFAULT_MAX_SUB_STEPS,
            broad_phase: BroadPhaseConfig::default(),
            narrow_phase: NarrowPhaseConfig::default(),
            contact: ContactCacheConfig::default(),
            solver: SolverConfig::default(),
            integrator: IntegratorConfig::default(),
            debug: false,
        }
    }
}

impl WorldConfig {
    /// 60 Hz with the default iteration counts.
    pub fn game() -> Self {
        Self::default()
    }

    /// 120 Hz, more solver iterations and tighter GJK/EPA tolerances.
    pub fn high_accuracy() -> Self {
        Self {
            fixed_time_step: 1.0 / 120.0,
            max_sub_steps: 8,
            narrow_phase: NarrowPhaseConfig {
                gjk_max_iterations: 64,
                epa_max_iterations: 128,
                epa_tolerance: 1.0e-5,
                ..NarrowPhaseConfig::default()
            },
            solver: SolverConfig::high_accuracy(),
            ..Self::default()
        }
    }

    /// Offline or scientific use: 240 Hz, deep solver passes, no sleeping.
    pub fn simulation() -> Self {
        let accurate = Self::high_accuracy();
        Self {
            fixed_time_step: 1.0 / 240.0,
            max_sub_steps: 16,
            solver: SolverConfig {
                velocity_iterations: 30,
                position_iterations: 5,
                ..accurate.solver
            },
            integrator: IntegratorConfig {
                enable_sleeping: false,
                ..IntegratorConfig::default()
            },
            ..accurate
        }
    }

    /// Low-power devices: 30 Hz, few iterations and eager sleeping.
    pub fn mobile() -> Self {
        Self {
            fixed_time_step: 1.0 / 30.0,
            max_sub_steps: 2,
            solver: SolverConfig {
                velocity_iterations: 4,
                position_iterations: 1,
                ..SolverConfig::default()
            },
            integrator: IntegratorConfig {
                sleep_time: 0.25,
                ..IntegratorConfig::default()
            },
            ..Self::default()
        }
    }

    /// Headset frame rate: 90 Hz with a short catch-up budget.
    pub fn vr() -> Self {
        Self {
            fixed_time_step: 1.0 / 90.0,
            max_sub_steps: 3,
            solver: SolverConfig {
                velocity_iterations: 12,
                position_iterations: 3,
                ..SolverConfig::default()
            },
            ..Self::default()
        }
    }

    /// Game timing with sleeping off and per-step diagnostics on.
    pub fn debug() -> Self {
        Self {
            max_sub_steps: 1,
            integrator: IntegratorConfig {
                enable_sleeping: false,
                ..IntegratorConfig::default()
            },
            debug: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, field: &'static str, reason: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(PhysicsError::InvalidConfig {
                    field,
                    reason: reason.to_string(),
                })
            }
        }

        check(
            self.gravity.iter().all(|g| g.is_finite()),
            "gravity",
            "must be finite",
        )?;
        check(
            self.fixed_time_step.is_finite() && self.fixed_time_step > 0.0,
            "fixed_time_step",
            "must be finite and positive",
        )?;
        check(self.max_sub_steps >= 1, "max_sub_steps", "must be at least 1")?;
        check(
            self.broad_phase.cell_size.is_finite() && self.broad_phase.cell_size > 0.0,
            "broad_phase.cell_size",
            "must be finite and positive",
        )?;
        check(
            self.narrow_phase.gjk_max_iterations >= 1 && self.narrow_phase.epa_max_iterations >= 1,
            "narrow_phase",
            "iteration caps must be at least 1",
        )?;
        check(
            (0.0..=1.0).contains(&self.contact.warm_start_retention),
            "contact.warm_start_retention",
            "must be within [0, 1]",
        )?;
        check(
            self.contact.max_lifetime >= 0.0,
            "contact.max_lifetime",
            "must be non-negative",
        )?;
        check(
            self.integrator.max_linear_speed > 0.0 && self.integrator.max_angular_speed > 0.0,
            "integrator",
            "speed limits must be positive",
        )?;
        self.solver.validate()
    }
}

/// Whether [`PhysicsWorld::update`] advances time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationState {
    #[default]
    Running,
    Paused,
}

/// Counters and timings of the last step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub step: u64,
    pub bodies: usize,
    pub awake_bodies: usize,
    pub broad_phase_pairs: usize,
    pub narrow_phase_tests: usize,
    pub manifolds: usize,
    pub active_manifolds: usize,
    pub contact_points: usize,
    pub solver_iterations: u32,
    pub position_corrections: usize,
    pub broad_phase_time: Duration,
    pub narrow_phase_time: Duration,
    pub solver_time: Duration,
    pub total_time: Duration,
}

/// One contact point for debug drawing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebugContact {
    pub pair: BodyPair,
    pub position: Vec3,
    pub normal: Vec3,
    pub penetration: f32,
}

/// Geometry an external renderer can draw for the current state.
#[derive(Clone, Debug, Default)]
pub struct DebugSnapshot {
    pub aabbs: Vec<(BodyHandle, Aabb)>,
    pub contacts: Vec<DebugContact>,
}

/// Receives the pose of every moving body after a step.
pub trait TransformSync {
    fn sync(&mut self, handle: BodyHandle, position: Vec3, orientation: Quat);
}

impl<F: FnMut(BodyHandle, Vec3, Quat)> TransformSync for F {
    fn sync(&mut self, handle: BodyHandle, position: Vec3, orientation: Quat) {
        self(handle, position, orientation)
    }
}

#[derive(Debug)]
pub struct PhysicsWorld {
    config: WorldConfig,
    bodies: Vec<RigidBody>,
    slots: HashMap<BodyHandle, usize>,
    next_handle: u32,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhaseDetector,
    cache: ContactCache,
    solver: ConstraintSolver,
    integrator: Integrator,
    materials: MaterialRegistry,
    state: SimulationState,
    accumulator: f32,
    stats: StepStats,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorld {
    /// World with [`WorldConfig::default`] and the preset materials.
    pub fn new() -> Self {
        Self::build(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        log::debug!(
            "physics world: dt={}s, {} velocity iterations",
            config.fixed_time_step,
            config.solver.velocity_iterations
        );
        Self {
            broad_phase: BroadPhase::new(config.broad_phase.clone()),
            narrow_phase: NarrowPhaseDetector::new(config.narrow_phase),
            cache: ContactCache::new(config.contact),
            solver: ConstraintSolver::new(config.solver),
            integrator: Integrator::new(config.integrator.clone()),
            config,
            bodies: Vec::new(),
            slots: HashMap::new(),
            next_handle: 0,
            materials: MaterialRegistry::with_presets(),
            state: SimulationState::Running,
            accumulator: 0.0,
            stats: StepStats::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Bodies
    // -----------------------------------------------------------------------

    /// Add a body. Mass defaults to the material density times the shape volume.
    pub fn create_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;
        let density = self.materials.get_or_default(desc.material).density;
        let body = RigidBody::new(handle, desc, density);
        log::debug!(
            "created {:?} body {:?} ({:?}, mass {})",
            body.body_type(),
            handle,
            body.shape().shape_type(),
            body.mass()
        );
        self.slots.insert(handle, self.bodies.len());
        self.bodies.push(body);
        handle
    }

    /// Remove a body with its manifolds and broad-phase entry. Bodies that
    /// were touching it are woken.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Option<RigidBody> {
        let Some(slot) = self.slots.remove(&handle) else {
            log::warn!("remove_body: unknown handle {:?}", handle);
            return None;
        };

        let touching: Vec<BodyHandle> = self
            .cache
            .manifolds()
            .filter_map(|(pair, _)| pair.other(handle))
            .collect();
        for other in touching {
            if let Some(body) = self.body_mut(other) {
                body.wake_up();
            }
        }

        let body = self.bodies.swap_remove(slot);
        if let Some(moved) = self.bodies.get(slot) {
            self.slots.insert(moved.handle(), slot);
        }
        let purged = self.cache.remove_manifolds(handle);
        self.broad_phase.remove(handle);
        log::debug!("removed body {:?} ({purged} manifolds purged)", handle);
        Some(body)
    }

    #[inline]
    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.slots.get(&handle).map(|&i| &self.bodies[i])
    }

    #[inline]
    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.slots.get(&handle).map(|&i| &mut self.bodies[i])
    }

    #[inline]
    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    #[inline]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn position(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(RigidBody::position)
    }

    pub fn orientation(&self, handle: BodyHandle) -> Option<Quat> {
        self.body(handle).map(RigidBody::orientation)
    }

    pub fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(RigidBody::linear_velocity)
    }

    pub fn angular_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(RigidBody::angular_velocity)
    }

    pub fn aabb(&self, handle: BodyHandle) -> Option<Aabb> {
        self.body(handle).map(RigidBody::aabb)
    }

    // -----------------------------------------------------------------------
    // Global state
    // -----------------------------------------------------------------------

    #[inline]
    pub fn gravity(&self) -> Vec3 {
        self.config.gravity
    }

    /// Ignored when not finite. Wakes every body so resting stacks react.
    pub fn set_gravity(&mut self, gravity: Vec3) {
        if !gravity.iter().all(|g| g.is_finite()) {
            log::warn!("set_gravity: ignoring non-finite gravity {:?}", gravity);
            return;
        }
        log::debug!("gravity set to {:?}", gravity);
        self.config.gravity = gravity;
        for body in &mut self.bodies {
            body.wake_up();
        }
    }

    #[inline]
    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    #[inline]
    pub fn materials_mut(&mut self) -> &mut MaterialRegistry {
        &mut self.materials
    }

    #[inline]
    pub fn contact_cache(&self) -> &ContactCache {
        &self.cache
    }

    #[inline]
    pub fn broad_phase(&self) -> &BroadPhase {
        &self.broad_phase
    }

    #[inline]
    pub fn stats(&self) -> &StepStats {
        &self.stats
    }

    #[inline]
    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn pause(&mut self) {
        self.state = SimulationState::Paused;
    }

    /// Resume; time that passed while paused is not replayed.
    pub fn resume(&mut self) {
        self.state = SimulationState::Running;
        self.accumulator = 0.0;
    }

    /// Leftover time as a fraction of a step, for render interpolation.
    #[inline]
    pub fn interpolation_alpha(&self) -> f32 {
        self.accumulator / self.config.fixed_time_step
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Consume `frame_dt` seconds in fixed steps; returns how many ran.
    ///
    /// At most `max_sub_steps` run per call; time beyond that is dropped so a
    /// long frame cannot snowball. Nothing runs while paused.
    pub fn update(&mut self, frame_dt: f32) -> u32 {
        if self.state == SimulationState::Paused {
            return 0;
        }
        if !(frame_dt.is_finite() && frame_dt >= 0.0) {
            log::warn!("update: ignoring frame time {frame_dt}");
            return 0;
        }
        let fixed = self.config.fixed_time_step;
        self.accumulator += frame_dt;
        let mut steps = 0;
        while self.accumulator >= fixed && steps < self.config.max_sub_steps {
            self.step(fixed);
            self.accumulator -= fixed;
            steps += 1;
        }
        if self.accumulator >= fixed {
            log::trace!("update: dropping {}s of backlog", self.accumulator - fixed);
            self.accumulator %= fixed;
        }
        steps
    }

    /// Advance the simulation by `dt` seconds. Non-positive or non-finite
    /// `dt` is rejected with a warning.
    pub fn step(&mut self, dt: f32) {
        if !(dt.is_finite() && dt > 0.0) {
            log::warn!("step: ignoring invalid dt {dt}");
            return;
        }
        let started = Instant::now();
        let gravity = self.config.gravity;

        for body in &mut self.bodies {
            self.integrator.integrate_velocity(body, &gravity, dt);
        }

        let t = Instant::now();
        self.broad_phase.update(self.bodies.iter());
        let pairs = self.broad_phase.potential_pairs().to_vec();
        let broad_phase_time = t.elapsed();

        let t = Instant::now();
        self.cache.update(dt);
        let narrow_phase_tests = self.detect_contacts(&pairs);
        let narrow_phase_time = t.elapsed();

        let t = Instant::now();
        let solved = self
            .solver
            .solve_velocities(&mut self.bodies, &self.slots, &mut self.cache, dt);
        for body in &mut self.bodies {
            self.integrator.integrate_position(body, dt);
        }
        let position_corrections =
            self.solver
                .solve_positions(&mut self.bodies, &self.slots, &mut self.cache);
        let solver_time = t.elapsed();

        for body in &mut self.bodies {
            self.integrator.update_sleep(body, dt);
        }

        self.stats = StepStats {
            step: self.stats.step + 1,
            bodies: self.bodies.len(),
            awake_bodies: self.bodies.iter().filter(|b| b.is_active()).count(),
            broad_phase_pairs: pairs.len(),
            narrow_phase_tests,
            manifolds: self.cache.len(),
            active_manifolds: solved.manifolds,
            contact_points: solved.contacts,
            solver_iterations: solved.velocity_iterations,
            position_corrections,
            broad_phase_time,
            narrow_phase_time,
            solver_time,
            total_time: started.elapsed(),
        };
        if self.config.debug {
            log::debug!("step {:?}", self.stats);
            for body in self.bodies.iter().filter(|b| !is_finite_state(b)) {
                log::warn!("body {:?} has non-finite state", body.handle());
            }
        } else {
            log::trace!("step {:?}", self.stats);
        }
    }

    /// Narrow-phase every candidate pair that has an awake non-static body
    /// and at least one dynamic body. Returns the number of pairs tested.
    fn detect_contacts(&mut self, pairs: &[BodyPair]) -> usize {
        let mut tests = 0;
        for &pair in pairs {
            let (Some(&ia), Some(&ib)) = (self.slots.get(&pair.first()), self.slots.get(&pair.second()))
            else {
                continue;
            };
            let (a, b) = (&self.bodies[ia], &self.bodies[ib]);
            if !(a.is_active() || b.is_active()) || !(a.is_dynamic() || b.is_dynamic()) {
                continue;
            }
            tests += 1;

            let manifold = self
                .narrow_phase
                .detect(a.shape(), &a.pose(), b.shape(), &b.pose());
            if !manifold.has_contacts() {
                continue;
            }
            let material = self.materials.combine(a.material(), b.material());
            let shapes = [a.shape().clone(), b.shape().clone()];
            self.cache.refresh(pair, manifold, material, shapes);

            // A resting neighbor leaves a sleeper alone; only moving bodies wake it.
            let restless = [is_restless(&self.bodies[ib]), is_restless(&self.bodies[ia])];
            for (i, woken) in [ia, ib].into_iter().zip(restless) {
                let body = &mut self.bodies[i];
                if woken && body.is_dynamic() && !body.is_awake() {
                    log::trace!("body {:?} woken by contact", body.handle());
                    body.wake_up();
                }
            }
        }
        tests
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Report the pose of every awake, non-static body.
    pub fn sync_transforms<S: TransformSync + ?Sized>(&self, sink: &mut S) {
        for body in self.bodies.iter().filter(|b| b.is_active()) {
            sink.sync(body.handle(), body.position(), body.orientation());
        }
    }

    pub fn total_kinetic_energy(&self) -> f32 {
        self.bodies
            .iter()
            .filter(|b| b.is_dynamic())
            .map(RigidBody::kinetic_energy)
            .sum()
    }

    pub fn linear_momentum(&self) -> Vec3 {
        self.bodies
            .iter()
            .filter(|b| b.is_dynamic())
            .map(RigidBody::linear_momentum)
            .sum()
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let aabbs = self
            .bodies
            .iter()
            .filter(|b| !b.shape().is_unbounded())
            .map(|b| (b.handle(), b.aabb()))
            .collect();
        let contacts = self
            .cache
            .active_manifolds()
            .filter_map(|m| Some((m.pair()?, m)))
            .flat_map(|(pair, m)| {
                m.points().iter().map(move |p| DebugContact {
                    pair,
                    position: p.position,
                    normal: m.normal(),
                    penetration: p.penetration,
                })
            })
            .collect();
        DebugSnapshot { aabbs, contacts }
    }
}

/// Awake and moving at the end of the last step, or driven kinematically.
#[inline]
fn is_restless(body: &RigidBody) -> bool {
    body.is_active() && (body.is_kinematic() || body.sleep_timer() == 0.0)
}

fn is_finite_state(body: &RigidBody) -> bool {
    let q = body.orientation();
    body.position().iter().all(|v| v.is_finite())
        && q.coords.iter().all(|v| v.is_finite())
        && body.linear_velocity().iter().all(|v| v.is_finite())
        && body.angular_velocity().iter().all(|v| v.is_finite())
}
