use std::sync::Arc;

use physics::prelude::*;

const DT: f32 = 1.0 / 60.0;

/// Two light boxes stacked on the ground; returns the velocity iterations
/// spent over 30 steps once the stack has settled.
fn settled_stack_iterations(warm_starting: bool) -> u32 {
    let mut config = WorldConfig::game();
    config.integrator.enable_sleeping = false;
    config.solver.velocity_iterations = 200;
    config.solver.velocity_tolerance = 1.0e-4;
    config.solver.warm_starting = warm_starting;
    let mut world = PhysicsWorld::with_config(config).unwrap();

    world.create_body(BodyDesc::fixed(Arc::new(Shape::ground())));
    let cube = Arc::new(Shape::cuboid(Vec3::repeat(0.5)).unwrap());
    // Off-grid offsets keep contact ids away from rounding boundaries.
    for y in [0.5, 1.5] {
        world.create_body(
            BodyDesc::dynamic(cube.clone())
                .with_mass(1.0)
                .with_position(Vec3::new(0.013, y, -0.007)),
        );
    }

    for _ in 0..120 {
        world.step(DT);
    }
    (0..30)
        .map(|_| {
            world.step(DT);
            assert_eq!(world.stats().active_manifolds, 2);
            world.stats().solver_iterations
        })
        .sum()
}

#[test]
fn warm_starting_converges_in_fewer_iterations() {
    let warm = settled_stack_iterations(true);
    let cold = settled_stack_iterations(false);
    assert!(warm < cold, "warm {warm} vs cold {cold}");
}

#[test]
fn disabling_warm_start_still_holds_the_stack() {
    let mut config = WorldConfig::game();
    config.solver.warm_starting = false;
    let mut world = PhysicsWorld::with_config(config).unwrap();
    world.create_body(BodyDesc::fixed(Arc::new(Shape::ground())));
    let cube = Arc::new(Shape::cuboid(Vec3::repeat(0.5)).unwrap());
    let top = world.create_body(BodyDesc::dynamic(cube.clone()).with_position(Vec3::new(0.0, 1.5, 0.0)));
    world.create_body(BodyDesc::dynamic(cube).with_position(Vec3::new(0.0, 0.5, 0.0)));
    for _ in 0..180 {
        world.step(DT);
    }
    let y = world.position(top).unwrap().y;
    assert!((y - 1.5).abs() < 0.02, "top box at {y}");
}
