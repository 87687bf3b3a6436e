use std::sync::Arc;

use approx::assert_relative_eq;
use physics::prelude::*;

const DT: f32 = 1.0 / 60.0;

/// Two equal spheres flying at each other along x, no gravity or damping.
fn head_on(restitution: f32) -> (PhysicsWorld, BodyHandle, BodyHandle) {
    let mut config = WorldConfig::game();
    config.gravity = Vec3::zeros();
    let mut world = PhysicsWorld::with_config(config).unwrap();
    let material = world
        .materials_mut()
        .register(Material::new("Test", 1000.0, restitution, 0.0, 0.0))
        .unwrap();

    let ball = Arc::new(Shape::sphere(0.5).unwrap());
    let desc = |x: f32, vx: f32| {
        BodyDesc::dynamic(ball.clone())
            .with_position(Vec3::new(x, 0.0, 0.0))
            .with_linear_velocity(Vec3::new(vx, 0.0, 0.0))
            .with_material(material)
            .with_damping(0.0, 0.0)
    };
    let a = world.create_body(desc(-1.0, 2.0));
    let b = world.create_body(desc(1.0, -2.0));
    (world, a, b)
}

#[test]
fn elastic_spheres_exchange_velocities() {
    let (mut world, a, b) = head_on(1.0);
    let energy = world.total_kinetic_energy();
    for _ in 0..60 {
        world.step(DT);
    }
    assert_relative_eq!(world.linear_velocity(a).unwrap().x, -2.0, epsilon = 1.0e-3);
    assert_relative_eq!(world.linear_velocity(b).unwrap().x, 2.0, epsilon = 1.0e-3);
    assert_relative_eq!(world.total_kinetic_energy(), energy, max_relative = 1.0e-3);
    assert!(world.position(a).unwrap().x < -1.0);
}

#[test]
fn inelastic_spheres_share_a_common_velocity() {
    let (mut world, a, b) = head_on(0.0);
    for _ in 0..60 {
        world.step(DT);
    }
    let (va, vb) = (world.linear_velocity(a).unwrap(), world.linear_velocity(b).unwrap());
    assert_relative_eq!(va, vb, epsilon = 1.0e-3);
    assert!(va.norm() < 1.0e-3);
    // Momentum is conserved by the contact impulses.
    assert!(world.linear_momentum().norm() < 1.0e-2);
}

#[test]
fn rubber_ball_bounces_off_the_ground() {
    let mut world = PhysicsWorld::new();
    world.create_body(BodyDesc::fixed(Arc::new(Shape::ground())));
    let rubber = world.materials().id_of("Rubber").unwrap();
    let ball = world.create_body(
        BodyDesc::dynamic(Arc::new(Shape::sphere(0.25).unwrap()))
            .with_position(Vec3::new(0.0, 3.0, 0.0))
            .with_material(rubber),
    );

    let mut fastest_up = 0.0f32;
    for _ in 0..90 {
        world.step(DT);
        fastest_up = fastest_up.max(world.linear_velocity(ball).unwrap().y);
    }
    assert!(fastest_up > 3.0, "rebound speed {fastest_up}");
    assert!(world.position(ball).unwrap().y > 0.0);
}

#[test]
fn glancing_sphere_picks_up_spin_from_friction() {
    let mut world = PhysicsWorld::new();
    world.create_body(BodyDesc::fixed(Arc::new(Shape::ground())));
    let ball = world.create_body(
        BodyDesc::dynamic(Arc::new(Shape::sphere(0.5).unwrap()))
            .with_position(Vec3::new(0.0, 0.5, 0.0))
            .with_linear_velocity(Vec3::new(3.0, 0.0, 0.0)),
    );
    for _ in 0..30 {
        world.step(DT);
    }
    let v = world.linear_velocity(ball).unwrap();
    let w = world.angular_velocity(ball).unwrap();
    // Sliding slows down and the ball starts rolling about -z.
    assert!(v.x < 3.0);
    assert!(w.z < -1.0);
}

#[test]
fn contact_impulses_are_never_negative() {
    let mut world = PhysicsWorld::new();
    world.create_body(BodyDesc::fixed(Arc::new(Shape::ground())));
    let shapes = [
        Shape::cuboid(Vec3::new(0.5, 0.3, 0.4)).unwrap(),
        Shape::sphere(0.4).unwrap(),
        Shape::capsule(0.25, 0.5).unwrap(),
        Shape::cylinder(0.4, 0.3).unwrap(),
    ];
    for (i, shape) in shapes.into_iter().cycle().take(12).enumerate() {
        let x = (i % 4) as f32 * 1.2 - 1.8;
        let y = 0.6 + (i / 4) as f32 * 1.1;
        let tilt = Quat::from_axis_angle(&Vec3::x_axis(), 0.1 * i as f32);
        world.create_body(
            BodyDesc::dynamic(Arc::new(shape))
                .with_position(Vec3::new(x, y, 0.05 * i as f32))
                .with_orientation(tilt),
        );
    }

    for _ in 0..240 {
        world.step(DT);
        for manifold in world.contact_cache().active_manifolds() {
            for point in manifold.points() {
                assert!(point.normal_impulse >= 0.0);
            }
        }
    }
    for body in world.bodies() {
        assert!(body.position().iter().all(|c| c.is_finite()));
        assert!(body.position().y > -0.5, "{:?} fell through", body.handle());
    }
}
