//! Semi-implicit Euler integration of body state.
//!
//! The world runs the two halves separately around the contact solve:
//! [`Integrator::integrate_velocity`] before collision detection and
//! [`Integrator::integrate_position`] after the velocity solve.
//! [`Integrator::integrate`] runs both back to back for a lone body.

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::body::RigidBody;
use crate::math::{Quat, Vec3, clamp_length};
use crate::settings::{
    EPSILON, MAX_ANGULAR_SPEED, MAX_LINEAR_SPEED, SLEEP_ANGULAR_THRESHOLD, SLEEP_LINEAR_THRESHOLD,
    SLEEP_TIME,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegratorConfig {
    pub max_linear_speed: f32,
    pub max_angular_speed: f32,
    pub enable_sleeping: bool,
    pub sleep_linear_threshold: f32,
    pub sleep_angular_threshold: f32,
    /// Seconds a body must stay under both thresholds before sleeping.
    pub sleep_time: f32,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            max_linear_speed: MAX_LINEAR_SPEED,
            max_angular_speed: MAX_ANGULAR_SPEED,
            enable_sleeping: true,
            sleep_linear_threshold: SLEEP_LINEAR_THRESHOLD,
            sleep_angular_threshold: SLEEP_ANGULAR_THRESHOLD,
            sleep_time: SLEEP_TIME,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Integrator {
    pub config: IntegratorConfig,
}

impl Integrator {
    pub fn new(config: IntegratorConfig) -> Self {
        Self { config }
    }

    /// Full step for one body: velocity update followed by pose update.
    pub fn integrate(&self, body: &mut RigidBody, gravity: &Vec3, dt: f32) {
        self.integrate_velocity(body, gravity, dt);
        self.integrate_position(body, dt);
    }

    /// Apply accumulated force/torque, gravity and damping, then clear the accumulators.
    ///
    /// Only awake dynamic bodies gain velocity. A kinematic body with a pending
    /// target gets the velocity that reaches the target in `dt`.
    pub fn integrate_velocity(&self, body: &mut RigidBody, gravity: &Vec3, dt: f32) {
        if body.is_kinematic() {
            if let Some((target_pos, target_rot)) = body.kinematic_target() {
                let v = (target_pos - body.position()) / dt;
                let delta = target_rot * body.orientation().inverse();
                let w = delta.scaled_axis() / dt;
                body.set_velocities_unchecked(v, w);
            }
            body.clear_forces();
            return;
        }
        if !body.is_dynamic() || !body.is_awake() {
            body.clear_forces();
            return;
        }

        let mut accel = body.force() * body.inv_mass();
        if body.gravity_enabled() {
            accel += gravity;
        }
        let angular_accel = body.world_inv_inertia() * body.torque();

        let mut v = body.linear_velocity() + accel * dt;
        let mut w = body.angular_velocity() + angular_accel * dt;

        v *= damping_factor(body.linear_damping(), dt);
        w *= damping_factor(body.angular_damping(), dt);

        v = clamp_length(v, self.config.max_linear_speed);
        w = clamp_length(w, self.config.max_angular_speed);

        body.set_velocities_unchecked(v, w);
        body.clear_forces();
    }

    /// Advance position and orientation from the current velocities.
    pub fn integrate_position(&self, body: &mut RigidBody, dt: f32) {
        if body.is_static() || !body.is_awake() {
            return;
        }
        if body.is_kinematic() {
            if let Some((target_pos, target_rot)) = body.take_kinematic_target() {
                body.set_pose_unchecked(target_pos, target_rot);
                body.validate_state();
                return;
            }
        }
        let position = body.position() + body.linear_velocity() * dt;
        let orientation = integrate_orientation(&body.orientation(), &body.angular_velocity(), dt);
        body.set_pose_unchecked(position, orientation);
        body.validate_state();
    }

    /// Accumulate rest time and put the body to sleep once it exceeds the timeout.
    pub fn update_sleep(&self, body: &mut RigidBody, dt: f32) {
        if !body.is_dynamic() || !body.is_awake() {
            return;
        }
        // The timer runs even when sleeping is off; contacts read it to tell
        // a resting neighbor from a moving one.
        let resting = body.linear_velocity().norm() < self.config.sleep_linear_threshold
            && body.angular_velocity().norm() < self.config.sleep_angular_threshold;
        if resting {
            let t = body.sleep_timer() + dt;
            if self.config.enable_sleeping && body.can_sleep() && t >= self.config.sleep_time {
                log::trace!("body {:?} fell asleep", body.handle());
                body.sleep();
            } else {
                body.set_sleep_timer(t);
            }
        } else {
            body.set_sleep_timer(0.0);
        }
    }
}

/// Exponential decay `(1 - damping)^dt`, clamped to `[0, 1]`.
#[inline]
pub fn damping_factor(damping: f32, dt: f32) -> f32 {
    (1.0 - damping).max(0.0).powf(dt).clamp(0.0, 1.0)
}

/// `q + dt/2 * (ω ⊗ q)`, renormalized. Keeps `q` when the result degenerates.
pub fn integrate_orientation(q: &Quat, angular_velocity: &Vec3, dt: f32) -> Quat {
    if angular_velocity.norm_squared() < EPSILON * EPSILON {
        return *q;
    }
    let w = na::Quaternion::new(0.0, angular_velocity.x, angular_velocity.y, angular_velocity.z);
    let dq = (w * q.quaternion()) * (0.5 * dt);
    let next = q.quaternion() + dq;
    if next.norm() > EPSILON && next.coords.iter().all(|c| c.is_finite()) {
        Quat::new_normalize(next)
    } else {
        *q
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodyDesc, BodyHandle};
    use crate::shape::Shape;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn ball(desc: impl FnOnce(BodyDesc) -> BodyDesc) -> RigidBody {
        let shape = Arc::new(Shape::sphere(0.5).unwrap());
        RigidBody::new(
            BodyHandle(0),
            desc(BodyDesc::dynamic(shape).with_mass(2.0).with_damping(0.0, 0.0)),
            1000.0,
        )
    }

    #[test]
    fn free_fall_matches_semi_implicit_euler() {
        let integrator = Integrator::default();
        let mut body = ball(|d| d.with_sleeping(false));
        let g = Vec3::new(0.0, -9.81, 0.0);
        let dt = 0.1;
        integrator.integrate(&mut body, &g, dt);
        assert_relative_eq!(body.linear_velocity().y, -0.981, epsilon = 1.0e-5);
        assert_relative_eq!(body.position().y, -0.0981, epsilon = 1.0e-5);
        integrator.integrate(&mut body, &g, dt);
        assert_relative_eq!(body.position().y, -0.0981 - 0.1962, epsilon = 1.0e-5);
    }

    #[test]
    fn force_is_scaled_by_inverse_mass_and_cleared() {
        let integrator = Integrator::default();
        let mut body = ball(|d| d.with_gravity(false));
        body.apply_force(Vec3::new(4.0, 0.0, 0.0));
        integrator.integrate(&mut body, &Vec3::zeros(), 0.5);
        assert_relative_eq!(body.linear_velocity().x, 1.0, epsilon = 1.0e-6);
        assert_eq!(body.force(), Vec3::zeros());
    }

    #[test]
    fn damping_decays_exponentially() {
        assert_relative_eq!(damping_factor(0.5, 1.0), 0.5);
        assert_relative_eq!(damping_factor(0.5, 2.0), 0.25);
        assert_relative_eq!(damping_factor(0.0, 1.0), 1.0);
        assert_relative_eq!(damping_factor(1.0, 0.016), 0.0);
        assert_relative_eq!(damping_factor(3.0, 1.0), 0.0);
    }

    #[test]
    fn speeds_are_clamped() {
        let integrator = Integrator::default();
        let mut body = ball(|d| {
            d.with_gravity(false)
                .with_linear_velocity(Vec3::new(500.0, 0.0, 0.0))
                .with_angular_velocity(Vec3::new(0.0, 0.0, 500.0))
        });
        integrator.integrate(&mut body, &Vec3::zeros(), 0.01);
        assert_relative_eq!(body.linear_velocity().norm(), MAX_LINEAR_SPEED, epsilon = 1.0e-3);
        assert_relative_eq!(body.angular_velocity().norm(), MAX_ANGULAR_SPEED, epsilon = 1.0e-3);
    }

    #[test]
    fn orientation_follows_angular_velocity() {
        let mut q = Quat::identity();
        let w = Vec3::new(0.0, std::f32::consts::PI, 0.0);
        // Half a second at pi rad/s is a quarter turn.
        for _ in 0..500 {
            q = integrate_orientation(&q, &w, 0.001);
        }
        assert_relative_eq!(q.angle(), std::f32::consts::FRAC_PI_2, epsilon = 1.0e-2);
        assert_relative_eq!(q.quaternion().norm(), 1.0, epsilon = 1.0e-5);
    }

    #[test]
    fn body_falls_asleep_after_timeout() {
        let integrator = Integrator::default();
        let mut body = ball(|d| d.with_gravity(false));
        let mut steps = 0;
        while body.is_awake() && steps < 200 {
            integrator.integrate(&mut body, &Vec3::zeros(), 1.0 / 60.0);
            integrator.update_sleep(&mut body, 1.0 / 60.0);
            steps += 1;
        }
        assert!(!body.is_awake());
        // One second at 60 Hz, give or take float accumulation.
        assert!((59..=61).contains(&steps), "slept after {steps} steps");
    }

    #[test]
    fn rest_timer_runs_for_bodies_that_never_sleep() {
        let integrator = Integrator::default();
        let mut body = ball(|d| d.with_gravity(false).with_sleeping(false));
        for _ in 0..120 {
            integrator.update_sleep(&mut body, 1.0 / 60.0);
        }
        assert!(body.is_awake());
        assert!(body.sleep_timer() > 1.9);

        body.set_linear_velocity(Vec3::new(1.0, 0.0, 0.0));
        integrator.update_sleep(&mut body, 1.0 / 60.0);
        assert_eq!(body.sleep_timer(), 0.0);
    }

    #[test]
    fn kinematic_body_reaches_its_target() {
        let integrator = Integrator::default();
        let shape = Arc::new(Shape::cuboid(Vec3::repeat(0.5)).unwrap());
        let mut body = RigidBody::new(BodyHandle(3), BodyDesc::kinematic(shape), 1000.0);
        let target = Vec3::new(1.0, 2.0, 0.0);
        body.set_kinematic_target(target, Quat::identity());
        integrator.integrate(&mut body, &Vec3::new(0.0, -9.81, 0.0), 0.5);
        assert_relative_eq!(body.position(), target);
        assert_relative_eq!(body.linear_velocity(), Vec3::new(2.0, 4.0, 0.0), epsilon = 1.0e-5);
        assert!(body.kinematic_target().is_none());
    }
}
