//! Contact depth and normal checked against parry's contact query.

use physics::collision::NarrowPhaseDetector;
use physics::collision::narrow_phase::{NarrowPhaseConfig, convex_contact};
use physics::math::{Iso, Quat, Vec3, iso};
use physics::shape::Shape;
use rapier3d::na as pna;
use rapier3d::parry::query;
use rapier3d::parry::shape as pshape;

/// Translation plus scaled rotation axis, shared by both sides of a case.
#[derive(Clone, Copy)]
struct Pose {
    at: [f32; 3],
    axis_angle: [f32; 3],
}

impl Pose {
    fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            at: [x, y, z],
            axis_angle: [0.0; 3],
        }
    }

    fn rotated(mut self, x: f32, y: f32, z: f32) -> Self {
        self.axis_angle = [x, y, z];
        self
    }

    fn ours(&self) -> Iso {
        let [x, y, z] = self.at;
        let [rx, ry, rz] = self.axis_angle;
        iso(Vec3::new(x, y, z), Quat::from_scaled_axis(Vec3::new(rx, ry, rz)))
    }

    fn parry(&self) -> pna::Isometry3<f32> {
        let [x, y, z] = self.at;
        let [rx, ry, rz] = self.axis_angle;
        pna::Isometry3::new(pna::Vector3::new(x, y, z), pna::Vector3::new(rx, ry, rz))
    }
}

struct Tolerance {
    depth: f32,
    alignment: f32,
}

const ANALYTIC: Tolerance = Tolerance {
    depth: 1.0e-3,
    alignment: 0.999,
};

const ITERATIVE: Tolerance = Tolerance {
    depth: 1.0e-2,
    alignment: 0.995,
};

fn check(
    name: &str,
    (a, pose_a, pa): (Shape, Pose, &dyn pshape::Shape),
    (b, pose_b, pb): (Shape, Pose, &dyn pshape::Shape),
    tolerance: Tolerance,
) {
    let reference = query::contact(&pose_a.parry(), pa, &pose_b.parry(), pb, 0.0)
        .expect("parry supports the pair")
        .expect("parry reports contact");
    assert!(reference.dist < 0.0, "{name}: case must overlap");

    let manifold = NarrowPhaseDetector::default().detect(&a, &pose_a.ours(), &b, &pose_b.ours());
    assert!(manifold.has_contacts(), "{name}: no contact");

    let depth = manifold.max_penetration();
    assert!(
        (depth + reference.dist).abs() < tolerance.depth,
        "{name}: depth {depth} vs parry {}",
        -reference.dist
    );

    let n = reference.normal1.into_inner();
    let alignment = manifold.normal().dot(&Vec3::new(n.x, n.y, n.z));
    assert!(
        alignment > tolerance.alignment,
        "{name}: normal {:?} vs parry {:?}",
        manifold.normal(),
        n
    );
}

fn ball(r: f32) -> (Shape, pshape::Ball) {
    (Shape::sphere(r).unwrap(), pshape::Ball::new(r))
}

fn cuboid(hx: f32, hy: f32, hz: f32) -> (Shape, pshape::Cuboid) {
    (
        Shape::cuboid(Vec3::new(hx, hy, hz)).unwrap(),
        pshape::Cuboid::new(pna::Vector3::new(hx, hy, hz)),
    )
}

#[test]
fn sphere_sphere_matches_parry() {
    let (a, pa) = ball(0.5);
    let (b, pb) = ball(0.75);
    check(
        "sphere-sphere",
        (a, Pose::at(0.0, 0.0, 0.0), &pa),
        (b, Pose::at(0.7, 0.4, -0.3), &pb),
        ANALYTIC,
    );
}

#[test]
fn box_sphere_matches_parry() {
    let (a, pa) = cuboid(1.0, 0.5, 0.75);
    let (b, pb) = ball(0.5);
    check(
        "box-sphere face",
        (a.clone(), Pose::at(0.0, 0.0, 0.0), &pa),
        (b.clone(), Pose::at(0.2, 0.9, 0.1), &pb),
        ANALYTIC,
    );
    check(
        "box-sphere edge",
        (a, Pose::at(0.0, 0.0, 0.0), &pa),
        (b, Pose::at(1.25, 0.7, 0.0), &pb),
        ANALYTIC,
    );
}

#[test]
fn rotated_box_sphere_matches_parry() {
    let (a, pa) = cuboid(0.5, 0.5, 0.5);
    let (b, pb) = ball(0.4);
    check(
        "rotated box-sphere",
        (a, Pose::at(0.0, 0.0, 0.0).rotated(0.3, 0.0, 0.5), &pa),
        (b, Pose::at(0.3, 0.8, 0.1), &pb),
        ANALYTIC,
    );
}

#[test]
fn capsule_sphere_matches_parry() {
    let a = Shape::capsule(0.3, 0.8).unwrap();
    let pa = pshape::Capsule::new_y(0.8, 0.3);
    let (b, pb) = ball(0.5);
    check(
        "capsule-sphere side",
        (a.clone(), Pose::at(0.0, 0.0, 0.0), &pa),
        (b.clone(), Pose::at(0.6, 0.2, 0.3), &pb),
        ANALYTIC,
    );
    check(
        "tilted capsule-sphere cap",
        (a, Pose::at(0.0, 0.0, 0.0).rotated(0.0, 0.0, 0.4), &pa),
        (b, Pose::at(-0.2, 1.5, 0.0), &pb),
        ANALYTIC,
    );
}

#[test]
fn aligned_boxes_match_parry() {
    let (a, pa) = cuboid(0.5, 0.5, 0.5);
    let (b, pb) = cuboid(1.0, 0.25, 0.6);
    check(
        "box-box",
        (a, Pose::at(0.0, 0.0, 0.0), &pa),
        (b, Pose::at(0.4, 0.68, -0.2), &pb),
        ANALYTIC,
    );
}

#[test]
fn box_on_half_space_matches_parry() {
    let (a, pa) = cuboid(0.5, 0.25, 0.4);
    let ground = pshape::HalfSpace::new(pna::Unit::new_normalize(pna::Vector3::y()));
    let origin = Pose::at(0.0, 0.0, 0.0);
    let upright = Pose::at(0.3, 0.2, -0.1);
    let tilted = Pose::at(0.0, 0.35, 0.0).rotated(0.4, 0.2, -0.3);

    // parry measures half-space contacts with the half-space as the first shape.
    check(
        "plane-box",
        (Shape::ground(), origin, &ground),
        (a.clone(), upright, &pa),
        ANALYTIC,
    );
    check(
        "plane-tilted box",
        (Shape::ground(), origin, &ground),
        (a.clone(), tilted, &pa),
        ANALYTIC,
    );

    // Box first: same depth, normal pointing into the ground.
    let detector = NarrowPhaseDetector::default();
    let m = detector.detect(&a, &upright.ours(), &Shape::ground(), &origin.ours());
    assert!((m.max_penetration() - 0.05).abs() < ANALYTIC.depth);
    assert!(m.normal().dot(&Vec3::y()) < -ANALYTIC.alignment);
}

#[test]
fn cylinder_sphere_matches_parry() {
    let a = Shape::cylinder(0.5, 1.0).unwrap();
    let pa = pshape::Cylinder::new(1.0, 0.5);
    let (b, pb) = ball(0.5);
    check(
        "cylinder-sphere cap",
        (a, Pose::at(0.0, 0.0, 0.0), &pa),
        (b, Pose::at(0.1, 1.4, -0.1), &pb),
        ITERATIVE,
    );
}

#[test]
fn gjk_epa_agrees_with_the_analytic_sphere_test() {
    let (a, b) = (Shape::sphere(0.5).unwrap(), Shape::sphere(0.5).unwrap());
    let (pose_a, pose_b) = (Pose::at(0.0, 0.0, 0.0).ours(), Pose::at(0.6, 0.5, 0.3).ours());

    let analytic = NarrowPhaseDetector::default().detect(&a, &pose_a, &b, &pose_b);
    let iterative = convex_contact(&a, &pose_a, &b, &pose_b, &NarrowPhaseConfig::default());
    assert!(iterative.has_contacts());
    assert!((analytic.max_penetration() - iterative.max_penetration()).abs() < ITERATIVE.depth);
    assert!(analytic.normal().dot(&iterative.normal()) > ITERATIVE.alignment);
}

#[test]
fn gjk_epa_normal_holds_for_nearly_coincident_curved_shapes() {
    let sphere = Shape::sphere(0.5).unwrap();
    let capsule = Shape::capsule(0.3, 0.6).unwrap();
    let origin = Pose::at(0.0, 0.0, 0.0).ours();
    let config = NarrowPhaseConfig::default();
    let detector = NarrowPhaseDetector::default();

    for (other, at) in [
        (&sphere, Pose::at(0.012, -0.009, 0.015)),
        (&capsule, Pose::at(0.03, 0.1, -0.02)),
    ] {
        let pose = at.ours();
        let analytic = detector.detect(other, &pose, &sphere, &origin);
        let iterative = convex_contact(other, &pose, &sphere, &origin, &config);
        assert!((analytic.max_penetration() - iterative.max_penetration()).abs() < ITERATIVE.depth);
        assert!(
            analytic.normal().dot(&iterative.normal()) > ITERATIVE.alignment,
            "{:?} vs {:?}",
            analytic.normal(),
            iterative.normal()
        );
    }
}
