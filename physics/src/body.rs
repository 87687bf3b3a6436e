/*!
Rigid bodies.

A [`RigidBody`] owns its pose, velocities, mass properties, accumulated
force/torque and sleep state. It references an immutable shared [`Shape`]
and a [`MaterialId`] resolved through the world's registry.

Invariants
- Static and kinematic bodies always report `inv_mass() == 0` and a zero
  inverse inertia. They are never pushed by forces or contact impulses.
- Dynamic mass is clamped to `[MIN_MASS, MAX_MASS]`.
- Damping coefficients are clamped to `[0, 1]`.
*/

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::material::MaterialId;
use crate::math::{Aabb, Iso, Mat3, Quat, Vec3, iso, world_inverse_inertia};
use crate::settings::{DEFAULT_ANGULAR_DAMPING, DEFAULT_LINEAR_DAMPING, MAX_MASS, MIN_MASS};
use crate::shape::{Shape, invert_diagonal};

/// Stable numeric identity of a body inside one world. Never reused.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BodyHandle(pub u32);

/// How a body takes part in the simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    /// Never moves.
    Static,
    /// Moved by its velocity (or a target pose); unaffected by forces and contacts.
    Kinematic,
    /// Fully simulated.
    #[default]
    Dynamic,
}

/// Everything needed to create a body. Built with the `dynamic`/`fixed`/`kinematic`
/// constructors and the `with_*` setters.
#[derive(Clone, Debug)]
pub struct BodyDesc {
    pub body_type: BodyType,
    pub shape: Arc<Shape>,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Explicit mass; when `None` the mass is density × shape volume.
    pub mass: Option<f32>,
    pub material: MaterialId,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_enabled: bool,
    pub can_sleep: bool,
}

impl BodyDesc {
    pub fn new(body_type: BodyType, shape: Arc<Shape>) -> Self {
        Self {
            body_type,
            shape,
            position: Vec3::zeros(),
            orientation: Quat::identity(),
            linear_velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            mass: None,
            material: MaterialId::DEFAULT,
            linear_damping: DEFAULT_LINEAR_DAMPING,
            angular_damping: DEFAULT_ANGULAR_DAMPING,
            gravity_enabled: true,
            can_sleep: true,
        }
    }

    pub fn dynamic(shape: Arc<Shape>) -> Self {
        Self::new(BodyType::Dynamic, shape)
    }

    pub fn fixed(shape: Arc<Shape>) -> Self {
        Self::new(BodyType::Static, shape)
    }

    pub fn kinematic(shape: Arc<Shape>) -> Self {
        Self::new(BodyType::Kinematic, shape)
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_linear_velocity(mut self, v: Vec3) -> Self {
        self.linear_velocity = v;
        self
    }

    pub fn with_angular_velocity(mut self, w: Vec3) -> Self {
        self.angular_velocity = w;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = Some(mass);
        self
    }

    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = material;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_gravity(mut self, enabled: bool) -> Self {
        self.gravity_enabled = enabled;
        self
    }

    pub fn with_sleeping(mut self, can_sleep: bool) -> Self {
        self.can_sleep = can_sleep;
        self
    }
}

/// A simulated rigid body.
#[derive(Clone, Debug)]
pub struct RigidBody {
    handle: BodyHandle,
    body_type: BodyType,
    shape: Arc<Shape>,
    material: MaterialId,

    position: Vec3,
    orientation: Quat,
    linear_velocity: Vec3,
    angular_velocity: Vec3,

    mass: f32,
    inv_mass: f32,
    local_inertia: Mat3,
    inv_local_inertia: Mat3,

    force: Vec3,
    torque: Vec3,

    linear_damping: f32,
    angular_damping: f32,
    gravity_enabled: bool,

    awake: bool,
    can_sleep: bool,
    sleep_timer: f32,

    kinematic_target: Option<(Vec3, Quat)>,
}

impl RigidBody {
    /// Build a body from `desc`. `density` is used only when the desc has no mass.
    pub fn new(handle: BodyHandle, desc: BodyDesc, density: f32) -> Self {
        let mass = desc.mass.unwrap_or_else(|| density * desc.shape.volume());
        let mut body = Self {
            handle,
            body_type: desc.body_type,
            shape: desc.shape,
            material: desc.material,
            position: desc.position,
            orientation: desc.orientation,
            linear_velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            mass: 0.0,
            inv_mass: 0.0,
            local_inertia: Mat3::zeros(),
            inv_local_inertia: Mat3::zeros(),
            force: Vec3::zeros(),
            torque: Vec3::zeros(),
            linear_damping: desc.linear_damping.clamp(0.0, 1.0),
            angular_damping: desc.angular_damping.clamp(0.0, 1.0),
            gravity_enabled: desc.gravity_enabled,
            awake: desc.body_type != BodyType::Static,
            can_sleep: desc.can_sleep,
            sleep_timer: 0.0,
            kinematic_target: None,
        };
        body.set_mass(mass);
        if body.body_type != BodyType::Static {
            body.linear_velocity = desc.linear_velocity;
            body.angular_velocity = desc.angular_velocity;
        }
        body
    }

    #[inline]
    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    #[inline]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.body_type == BodyType::Static
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }

    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.body_type == BodyType::Kinematic
    }

    /// Awake and able to move: the bodies that drive pair testing.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.awake && !self.is_static()
    }

    /// Change the body type, re-deriving inverse mass and inertia.
    pub fn set_body_type(&mut self, body_type: BodyType) {
        self.body_type = body_type;
        self.set_mass(self.mass);
        if body_type == BodyType::Static {
            self.linear_velocity = Vec3::zeros();
            self.angular_velocity = Vec3::zeros();
            self.awake = false;
        } else {
            self.wake_up();
        }
    }

    #[inline]
    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    #[inline]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub fn set_material(&mut self, material: MaterialId) {
        self.material = material;
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    #[inline]
    pub fn pose(&self) -> Iso {
        iso(self.position, self.orientation)
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.wake_up();
    }

    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation;
        self.wake_up();
    }

    /// Move without waking; used by position correction.
    #[inline]
    pub(crate) fn translate(&mut self, delta: Vec3) {
        self.position += delta;
    }

    #[inline]
    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    #[inline]
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Ignored for static bodies.
    pub fn set_linear_velocity(&mut self, v: Vec3) {
        if !self.is_static() {
            self.linear_velocity = v;
            self.wake_up();
        }
    }

    /// Ignored for static bodies.
    pub fn set_angular_velocity(&mut self, w: Vec3) {
        if !self.is_static() {
            self.angular_velocity = w;
            self.wake_up();
        }
    }

    #[inline]
    pub(crate) fn set_velocities_unchecked(&mut self, v: Vec3, w: Vec3) {
        self.linear_velocity = v;
        self.angular_velocity = w;
    }

    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    #[inline]
    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    /// Set the mass (clamped) and recompute inertia from the shape.
    pub fn set_mass(&mut self, mass: f32) {
        let mass = if mass.is_finite() { mass } else { MIN_MASS };
        self.mass = mass.clamp(MIN_MASS, MAX_MASS);
        self.local_inertia = self.shape.inertia_tensor(self.mass);
        if self.is_dynamic() {
            self.inv_mass = 1.0 / self.mass;
            self.inv_local_inertia = invert_diagonal(&self.local_inertia);
        } else {
            self.inv_mass = 0.0;
            self.inv_local_inertia = Mat3::zeros();
        }
    }

    #[inline]
    pub fn local_inertia(&self) -> Mat3 {
        self.local_inertia
    }

    #[inline]
    pub fn inv_local_inertia(&self) -> Mat3 {
        self.inv_local_inertia
    }

    /// World-space inverse inertia, `R * I⁻¹ * Rᵀ`.
    #[inline]
    pub fn world_inv_inertia(&self) -> Mat3 {
        world_inverse_inertia(&self.orientation, &self.inv_local_inertia)
    }

    pub fn aabb(&self) -> Aabb {
        self.shape.aabb(&self.pose())
    }

    /// Velocity of the material point at world position `point`.
    #[inline]
    pub fn velocity_at_point(&self, point: &Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(&(point - self.position))
    }

    // -----------------------------------------------------------------------
    // Forces and impulses. All of them are no-ops on non-dynamic bodies.
    // -----------------------------------------------------------------------

    pub fn apply_force(&mut self, force: Vec3) {
        if self.is_dynamic() {
            self.force += force;
            self.wake_up();
        }
    }

    pub fn apply_force_at_point(&mut self, force: Vec3, point: Vec3) {
        if self.is_dynamic() {
            self.force += force;
            self.torque += (point - self.position).cross(&force);
            self.wake_up();
        }
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        if self.is_dynamic() {
            self.torque += torque;
            self.wake_up();
        }
    }

    pub fn apply_impulse(&mut self, impulse: Vec3) {
        if self.is_dynamic() {
            self.linear_velocity += impulse * self.inv_mass;
            self.wake_up();
        }
    }

    pub fn apply_impulse_at_point(&mut self, impulse: Vec3, point: Vec3) {
        if self.is_dynamic() {
            self.linear_velocity += impulse * self.inv_mass;
            self.angular_velocity +=
                self.world_inv_inertia() * (point - self.position).cross(&impulse);
            self.wake_up();
        }
    }

    pub fn apply_angular_impulse(&mut self, impulse: Vec3) {
        if self.is_dynamic() {
            self.angular_velocity += self.world_inv_inertia() * impulse;
            self.wake_up();
        }
    }

    #[inline]
    pub fn force(&self) -> Vec3 {
        self.force
    }

    #[inline]
    pub fn torque(&self) -> Vec3 {
        self.torque
    }

    #[inline]
    pub fn clear_forces(&mut self) {
        self.force = Vec3::zeros();
        self.torque = Vec3::zeros();
    }

    pub fn kinetic_energy(&self) -> f32 {
        if self.is_static() {
            return 0.0;
        }
        let w = self.angular_velocity;
        let r = self.orientation.to_rotation_matrix();
        let world_inertia = r.matrix() * self.local_inertia * r.matrix().transpose();
        0.5 * self.mass * self.linear_velocity.norm_squared() + 0.5 * w.dot(&(world_inertia * w))
    }

    #[inline]
    pub fn linear_momentum(&self) -> Vec3 {
        if self.is_static() {
            Vec3::zeros()
        } else {
            self.linear_velocity * self.mass
        }
    }

    #[inline]
    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    pub fn set_linear_damping(&mut self, damping: f32) {
        self.linear_damping = damping.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    pub fn set_angular_damping(&mut self, damping: f32) {
        self.angular_damping = damping.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn gravity_enabled(&self) -> bool {
        self.gravity_enabled
    }

    pub fn set_gravity_enabled(&mut self, enabled: bool) {
        self.gravity_enabled = enabled;
    }

    // -----------------------------------------------------------------------
    // Sleep
    // -----------------------------------------------------------------------

    #[inline]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    #[inline]
    pub fn can_sleep(&self) -> bool {
        self.can_sleep
    }

    pub fn set_can_sleep(&mut self, can_sleep: bool) {
        self.can_sleep = can_sleep;
        if !can_sleep {
            self.wake_up();
        }
    }

    pub fn wake_up(&mut self) {
        if !self.is_static() {
            self.awake = true;
            self.sleep_timer = 0.0;
        }
    }

    /// Put the body to sleep and zero its velocities.
    pub fn sleep(&mut self) {
        if self.is_dynamic() {
            self.awake = false;
            self.sleep_timer = 0.0;
            self.linear_velocity = Vec3::zeros();
            self.angular_velocity = Vec3::zeros();
        }
    }

    #[inline]
    pub fn sleep_timer(&self) -> f32 {
        self.sleep_timer
    }

    #[inline]
    pub(crate) fn set_sleep_timer(&mut self, t: f32) {
        self.sleep_timer = t;
    }

    // -----------------------------------------------------------------------
    // Kinematic targets
    // -----------------------------------------------------------------------

    /// Pose a kinematic body should reach by the end of the next step.
    pub fn set_kinematic_target(&mut self, position: Vec3, orientation: Quat) {
        if self.is_kinematic() {
            self.kinematic_target = Some((position, orientation));
            self.wake_up();
        }
    }

    #[inline]
    pub fn kinematic_target(&self) -> Option<(Vec3, Quat)> {
        self.kinematic_target
    }

    #[inline]
    pub(crate) fn take_kinematic_target(&mut self) -> Option<(Vec3, Quat)> {
        self.kinematic_target.take()
    }

    #[inline]
    pub(crate) fn set_pose_unchecked(&mut self, position: Vec3, orientation: Quat) {
        self.position = position;
        self.orientation = orientation;
    }

    /// Reset any non-finite state. Returns `false` when something was reset.
    pub fn validate_state(&mut self) -> bool {
        let finite = |v: &Vec3| v.iter().all(|c| c.is_finite());
        let mut ok = true;
        if !finite(&self.position) {
            log::error!("body {:?}: non-finite position, reset to origin", self.handle);
            self.position = Vec3::zeros();
            ok = false;
        }
        if !self.orientation.coords.iter().all(|c| c.is_finite()) {
            log::error!("body {:?}: non-finite orientation, reset to identity", self.handle);
            self.orientation = Quat::identity();
            ok = false;
        }
        if !finite(&self.linear_velocity) || !finite(&self.angular_velocity) {
            log::error!("body {:?}: non-finite velocity, reset to rest", self.handle);
            self.linear_velocity = Vec3::zeros();
            self.angular_velocity = Vec3::zeros();
            ok = false;
        }
        if !finite(&self.force) || !finite(&self.torque) {
            log::error!("body {:?}: non-finite force accumulator cleared", self.handle);
            self.clear_forces();
            ok = false;
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> Arc<Shape> {
        Arc::new(Shape::cuboid(Vec3::new(0.5, 0.5, 0.5)).unwrap())
    }

    #[test]
    fn static_and_kinematic_have_zero_inverse_mass() {
        let s = RigidBody::new(BodyHandle(0), BodyDesc::fixed(unit_box()), 1000.0);
        let k = RigidBody::new(BodyHandle(1), BodyDesc::kinematic(unit_box()), 1000.0);
        for body in [&s, &k] {
            assert_eq!(body.inv_mass(), 0.0);
            assert_eq!(body.world_inv_inertia(), Mat3::zeros());
        }
        assert!(!s.is_awake());
        assert!(k.is_awake());
    }

    #[test]
    fn mass_comes_from_density_or_explicit_value() {
        let from_density = RigidBody::new(BodyHandle(0), BodyDesc::dynamic(unit_box()), 1000.0);
        assert_relative_eq!(from_density.mass(), 1000.0, epsilon = 1.0e-3);

        let explicit = RigidBody::new(
            BodyHandle(1),
            BodyDesc::dynamic(unit_box()).with_mass(2.0),
            1000.0,
        );
        assert_relative_eq!(explicit.inv_mass(), 0.5);

        let clamped = RigidBody::new(
            BodyHandle(2),
            BodyDesc::dynamic(unit_box()).with_mass(0.0),
            1000.0,
        );
        assert_relative_eq!(clamped.mass(), MIN_MASS);
    }

    #[test]
    fn off_center_impulse_spins_the_body() {
        let mut b = RigidBody::new(
            BodyHandle(0),
            BodyDesc::dynamic(unit_box()).with_mass(1.0),
            1000.0,
        );
        b.apply_impulse_at_point(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.5, 0.0, 0.0));
        assert_relative_eq!(b.linear_velocity(), Vec3::new(0.0, 0.0, 1.0));
        // r x J = (0.5,0,0) x (0,0,1) = (0,-0.5,0); I = 1/6 for a unit cube of mass 1.
        assert_relative_eq!(b.angular_velocity(), Vec3::new(0.0, -3.0, 0.0), epsilon = 1.0e-4);
    }

    #[test]
    fn forces_are_ignored_on_static_bodies() {
        let mut s = RigidBody::new(BodyHandle(0), BodyDesc::fixed(unit_box()), 1000.0);
        s.apply_force(Vec3::new(1.0, 0.0, 0.0));
        s.apply_impulse(Vec3::new(1.0, 0.0, 0.0));
        s.set_linear_velocity(Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(s.force(), Vec3::zeros());
        assert_eq!(s.linear_velocity(), Vec3::zeros());
    }

    #[test]
    fn sleeping_zeroes_velocity_and_waking_resets_timer() {
        let mut b = RigidBody::new(
            BodyHandle(0),
            BodyDesc::dynamic(unit_box()).with_linear_velocity(Vec3::new(1.0, 0.0, 0.0)),
            1000.0,
        );
        b.set_sleep_timer(0.7);
        b.sleep();
        assert!(!b.is_awake());
        assert_eq!(b.linear_velocity(), Vec3::zeros());
        b.apply_force(Vec3::new(0.0, 1.0, 0.0));
        assert!(b.is_awake());
        assert_eq!(b.sleep_timer(), 0.0);
    }

    #[test]
    fn validate_state_resets_nan() {
        let mut b = RigidBody::new(BodyHandle(0), BodyDesc::dynamic(unit_box()), 1000.0);
        b.set_linear_velocity(Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(!b.validate_state());
        assert_eq!(b.linear_velocity(), Vec3::zeros());
        assert!(b.validate_state());
    }
}
