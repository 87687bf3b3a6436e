/*!
Narrow phase: exact contact generation for one pair of posed shapes.

Dispatch goes through a fixed `ShapeType x ShapeType` table. Each canonical
pair has an analytic test; the mirrored cell runs the same test with the
arguments swapped and flips the result, so every manifold leaving
[`NarrowPhaseDetector::detect`] has its normal pointing from the first shape
toward the second. Pairs without an analytic test go through GJK and EPA.

Notes
- Box-box uses the world AABBs of both boxes. Rotated boxes collide as their
  bounds, which over-reports contact; an oriented SAT would replace it.
- Planes are half-spaces: anything below the surface is in contact.
- A manifold without points means "no contact".
*/

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::collision::epa::epa;
use crate::collision::gjk::{PosedShape, SupportMap, Triangle, gjk};
use crate::collision::manifold::{ContactManifold, ContactPoint};
use crate::math::{Iso, Vec3, tangent_basis};
use crate::settings::{
    EPA_MAX_ITERATIONS, EPA_TOLERANCE, EPSILON, GJK_MAX_ITERATIONS, GJK_TOLERANCE,
};
use crate::shape::{Shape, ShapeType};

/// Minimum alignment with the deepest mesh contact normal for a triangle
/// contact to join the manifold.
const MESH_NORMAL_AGREEMENT: f32 = 0.7;

/// Iteration caps and tolerances of the GJK/EPA fallback.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrowPhaseConfig {
    pub gjk_max_iterations: u32,
    pub gjk_tolerance: f32,
    pub epa_max_iterations: u32,
    pub epa_tolerance: f32,
}

impl Default for NarrowPhaseConfig {
    fn default() -> Self {
        Self {
            gjk_max_iterations: GJK_MAX_ITERATIONS,
            gjk_tolerance: GJK_TOLERANCE,
            epa_max_iterations: EPA_MAX_ITERATIONS,
            epa_tolerance: EPA_TOLERANCE,
        }
    }
}

type ContactTest = fn(&Shape, &Iso, &Shape, &Iso, &NarrowPhaseConfig) -> ContactManifold;

#[derive(Clone, Copy)]
enum Entry {
    Direct(ContactTest),
    /// Canonical test registered for the mirrored order.
    Swapped(ContactTest),
}

/// Contact generator for any two shapes.
#[derive(Clone)]
pub struct NarrowPhaseDetector {
    config: NarrowPhaseConfig,
    table: [[Entry; ShapeType::COUNT]; ShapeType::COUNT],
}

impl Default for NarrowPhaseDetector {
    fn default() -> Self {
        Self::new(NarrowPhaseConfig::default())
    }
}

impl std::fmt::Debug for NarrowPhaseDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrowPhaseDetector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NarrowPhaseDetector {
    pub fn new(config: NarrowPhaseConfig) -> Self {
        use ShapeType as T;

        let mut table = [[Entry::Direct(convex_contact as ContactTest); ShapeType::COUNT];
            ShapeType::COUNT];
        let mut register = |a: ShapeType, b: ShapeType, test: ContactTest| {
            table[a.index()][b.index()] = Entry::Direct(test);
            if a != b {
                table[b.index()][a.index()] = Entry::Swapped(test);
            }
        };

        register(T::Sphere, T::Sphere, sphere_sphere);
        register(T::Box, T::Sphere, box_sphere);
        register(T::Box, T::Box, box_box);
        register(T::Capsule, T::Sphere, capsule_sphere);
        register(T::Sphere, T::Plane, sphere_plane);
        register(T::Box, T::Plane, box_plane);
        register(T::Capsule, T::Plane, capsule_plane);
        register(T::Cylinder, T::Plane, cylinder_plane);
        register(T::TriangleMesh, T::Plane, mesh_plane);
        register(T::Plane, T::Plane, no_contact);
        register(T::TriangleMesh, T::TriangleMesh, no_contact);
        for convex in [T::Box, T::Sphere, T::Capsule, T::Cylinder] {
            register(T::TriangleMesh, convex, mesh_convex);
        }

        Self { config, table }
    }

    #[inline]
    pub fn config(&self) -> &NarrowPhaseConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: NarrowPhaseConfig) {
        self.config = config;
    }

    /// Contact manifold between `a` at `pose_a` and `b` at `pose_b`.
    ///
    /// The normal points from `a` toward `b`; lever arms are measured from each
    /// pose's origin. Non-finite poses yield no contact.
    pub fn detect(&self, a: &Shape, pose_a: &Iso, b: &Shape, pose_b: &Iso) -> ContactManifold {
        if !is_finite(pose_a) || !is_finite(pose_b) {
            log::warn!("narrow phase skipped a pair with a non-finite pose");
            return ContactManifold::empty();
        }

        let mut m = match self.table[a.shape_type().index()][b.shape_type().index()] {
            Entry::Direct(test) => test(a, pose_a, b, pose_b, &self.config),
            Entry::Swapped(test) => {
                let mut m = test(b, pose_b, a, pose_a, &self.config);
                m.flip();
                m
            }
        };

        let (ca, cb) = (pose_a.translation.vector, pose_b.translation.vector);
        for p in m.points_mut() {
            p.local_a = p.position - ca;
            p.local_b = p.position - cb;
        }
        m
    }
}

fn is_finite(pose: &Iso) -> bool {
    pose.translation.vector.iter().all(|v| v.is_finite())
        && pose.rotation.coords.iter().all(|v| v.is_finite())
}

#[inline]
fn point(pose: &Iso, local: Vec3) -> Vec3 {
    (pose * na::Point3::from(local)).coords
}

/// World-space `(normal, offset)` of a posed plane.
fn world_plane(normal: &Vec3, offset: f32, pose: &Iso) -> (Vec3, f32) {
    let n = pose.rotation * normal;
    let on_plane = point(pose, normal * offset);
    (n, n.dot(&on_plane))
}

fn single(normal: Vec3, position: Vec3, penetration: f32) -> ContactManifold {
    let mut m = ContactManifold::with_normal(normal);
    m.add_point(ContactPoint::new(position, penetration));
    m
}

fn no_contact(_: &Shape, _: &Iso, _: &Shape, _: &Iso, _: &NarrowPhaseConfig) -> ContactManifold {
    ContactManifold::empty()
}

/// GJK, then EPA when the shapes intersect. One contact point on A's surface.
pub fn convex_contact(
    a: &Shape,
    pose_a: &Iso,
    b: &Shape,
    pose_b: &Iso,
    config: &NarrowPhaseConfig,
) -> ContactManifold {
    let (sa, sb) = (PosedShape::new(a, pose_a), PosedShape::new(b, pose_b));
    penetration(&sa, &sb, config)
        .map(|(normal, position, depth)| single(normal, position, depth))
        .unwrap_or_default()
}

fn penetration<A: SupportMap, B: SupportMap>(
    a: &A,
    b: &B,
    config: &NarrowPhaseConfig,
) -> Option<(Vec3, Vec3, f32)> {
    let g = gjk(a, b, config.gjk_max_iterations, config.gjk_tolerance);
    if !g.is_intersecting() {
        return None;
    }
    let r = epa(
        a,
        b,
        &g.simplex,
        config.epa_max_iterations,
        config.epa_tolerance,
    )?;
    (r.depth > 0.0).then_some((r.normal, r.point_a, r.depth))
}

/// Two spheres; `None` when the centers coincide and no normal exists.
fn sphere_pair(ca: Vec3, ra: f32, cb: Vec3, rb: f32) -> Option<ContactManifold> {
    let d = cb - ca;
    let dist = d.norm();
    if dist >= ra + rb {
        return Some(ContactManifold::empty());
    }
    if dist <= EPSILON {
        return None;
    }
    let n = d / dist;
    Some(single(n, ca + n * ra, ra + rb - dist))
}

fn sphere_sphere(
    a: &Shape,
    pa: &Iso,
    b: &Shape,
    pb: &Iso,
    config: &NarrowPhaseConfig,
) -> ContactManifold {
    let (Shape::Sphere { radius: ra }, Shape::Sphere { radius: rb }) = (a, b) else {
        return ContactManifold::empty();
    };
    sphere_pair(pa.translation.vector, *ra, pb.translation.vector, *rb)
        .unwrap_or_else(|| convex_contact(a, pa, b, pb, config))
}

fn box_sphere(
    a: &Shape,
    pa: &Iso,
    b: &Shape,
    pb: &Iso,
    _: &NarrowPhaseConfig,
) -> ContactManifold {
    let (Shape::Box { half_extents: h }, Shape::Sphere { radius }) = (a, b) else {
        return ContactManifold::empty();
    };
    let r = *radius;
    let c = pa.inverse_transform_point(&na::Point3::from(pb.translation.vector)).coords;
    let clamped = Vec3::new(
        c.x.clamp(-h.x, h.x),
        c.y.clamp(-h.y, h.y),
        c.z.clamp(-h.z, h.z),
    );
    let diff = c - clamped;
    let dist_sq = diff.norm_squared();

    if dist_sq > EPSILON * EPSILON {
        if dist_sq >= r * r {
            return ContactManifold::empty();
        }
        let dist = dist_sq.sqrt();
        let n = pa.rotation * (diff / dist);
        return single(n, point(pa, clamped), r - dist);
    }

    // Center inside the box: push out through the nearest face.
    let gaps = h - c.abs();
    let axis = gaps.imin();
    let sign = if c[axis] < 0.0 { -1.0 } else { 1.0 };
    let mut n_local = Vec3::zeros();
    n_local[axis] = sign;
    let mut on_face = c;
    on_face[axis] = sign * h[axis];
    single(pa.rotation * n_local, point(pa, on_face), r + gaps[axis])
}

fn box_box(a: &Shape, pa: &Iso, b: &Shape, pb: &Iso, _: &NarrowPhaseConfig) -> ContactManifold {
    let (ba, bb) = (a.aabb(pa), b.aabb(pb));
    let lo = ba.min.sup(&bb.min);
    let hi = ba.max.inf(&bb.max);
    let overlap = hi - lo;
    if overlap.iter().any(|&o| o <= 0.0) {
        return ContactManifold::empty();
    }

    let axis = overlap.imin();
    let sign = if bb.center()[axis] >= ba.center()[axis] {
        1.0
    } else {
        -1.0
    };
    let mut normal = Vec3::zeros();
    normal[axis] = sign;

    let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
    let mid = 0.5 * (lo[axis] + hi[axis]);
    let mut m = ContactManifold::with_normal(normal);
    for (cu, cv) in [(lo[u], lo[v]), (hi[u], lo[v]), (hi[u], hi[v]), (lo[u], hi[v])] {
        let mut p = Vec3::zeros();
        p[axis] = mid;
        p[u] = cu;
        p[v] = cv;
        m.add_point(ContactPoint::new(p, overlap[axis]));
    }
    m
}

fn capsule_sphere(
    a: &Shape,
    pa: &Iso,
    b: &Shape,
    pb: &Iso,
    config: &NarrowPhaseConfig,
) -> ContactManifold {
    let (
        Shape::Capsule {
            radius: ra,
            half_height,
        },
        Shape::Sphere { radius: rb },
    ) = (a, b)
    else {
        return ContactManifold::empty();
    };
    let top = point(pa, Vec3::new(0.0, *half_height, 0.0));
    let bottom = point(pa, Vec3::new(0.0, -half_height, 0.0));
    let c = pb.translation.vector;
    let seg = top - bottom;
    let t = (c - bottom).dot(&seg) / seg.norm_squared().max(EPSILON);
    let closest = bottom + seg * t.clamp(0.0, 1.0);
    sphere_pair(closest, *ra, c, *rb).unwrap_or_else(|| convex_contact(a, pa, b, pb, config))
}

fn sphere_plane(
    a: &Shape,
    pa: &Iso,
    b: &Shape,
    pb: &Iso,
    _: &NarrowPhaseConfig,
) -> ContactManifold {
    let (Shape::Sphere { radius }, Shape::Plane { normal, offset }) = (a, b) else {
        return ContactManifold::empty();
    };
    let (n, d0) = world_plane(normal, *offset, pb);
    let c = pa.translation.vector;
    let dist = n.dot(&c) - d0;
    if dist >= *radius {
        return ContactManifold::empty();
    }
    single(-n, c - n * *radius, radius - dist)
}

/// Collect every candidate below the plane `(n, d0)`; `inflate` pushes each
/// candidate toward the plane first (capsule caps).
fn below_plane<I: IntoIterator<Item = Vec3>>(
    candidates: I,
    n: &Vec3,
    d0: f32,
    inflate: f32,
) -> ContactManifold {
    let mut m = ContactManifold::with_normal(-n);
    for p in candidates {
        let dist = n.dot(&p) - d0;
        if dist < inflate {
            m.add_point(ContactPoint::new(p - n * inflate, inflate - dist));
        }
    }
    m
}

fn box_plane(a: &Shape, pa: &Iso, b: &Shape, pb: &Iso, _: &NarrowPhaseConfig) -> ContactManifold {
    let (Shape::Box { half_extents: h }, Shape::Plane { normal, offset }) = (a, b) else {
        return ContactManifold::empty();
    };
    let (n, d0) = world_plane(normal, *offset, pb);
    let local_n = pa.rotation.inverse_transform_vector(&n);
    let reach = h.x * local_n.x.abs() + h.y * local_n.y.abs() + h.z * local_n.z.abs();
    if n.dot(&pa.translation.vector) - d0 >= reach {
        return ContactManifold::empty();
    }
    let corners = (0..8).map(|i| {
        let s = |bit: u32| if i & bit == 0 { -1.0 } else { 1.0 };
        point(pa, Vec3::new(s(1) * h.x, s(2) * h.y, s(4) * h.z))
    });
    below_plane(corners, &n, d0, 0.0)
}

fn capsule_plane(
    a: &Shape,
    pa: &Iso,
    b: &Shape,
    pb: &Iso,
    _: &NarrowPhaseConfig,
) -> ContactManifold {
    let (
        Shape::Capsule {
            radius,
            half_height,
        },
        Shape::Plane { normal, offset },
    ) = (a, b)
    else {
        return ContactManifold::empty();
    };
    let (n, d0) = world_plane(normal, *offset, pb);
    let ends = [*half_height, -half_height].map(|y| point(pa, Vec3::new(0.0, y, 0.0)));
    below_plane(ends, &n, d0, *radius)
}

fn cylinder_plane(
    a: &Shape,
    pa: &Iso,
    b: &Shape,
    pb: &Iso,
    _: &NarrowPhaseConfig,
) -> ContactManifold {
    let (
        Shape::Cylinder {
            radius,
            half_height,
        },
        Shape::Plane { normal, offset },
    ) = (a, b)
    else {
        return ContactManifold::empty();
    };
    let (n, d0) = world_plane(normal, *offset, pb);
    let axis = pa.rotation * Vec3::y();
    let center = pa.translation.vector;
    let mut rim = Vec::with_capacity(8);

    for cap in [center + axis * *half_height, center - axis * *half_height] {
        let down = -(n - axis * axis.dot(&n));
        if down.norm() > 1.0e-3 {
            // Tilted: the lowest rim point of each cap.
            rim.push(cap + down.normalize() * *radius);
        } else {
            // Standing on a cap: sample the rim.
            let (t1, t2) = tangent_basis(&axis);
            rim.extend([t1, -t1, t2, -t2].map(|t| cap + t * *radius));
        }
    }
    below_plane(rim, &n, d0, 0.0)
}

fn mesh_plane(a: &Shape, pa: &Iso, b: &Shape, pb: &Iso, _: &NarrowPhaseConfig) -> ContactManifold {
    let (Shape::TriangleMesh(mesh), Shape::Plane { normal, offset }) = (a, b) else {
        return ContactManifold::empty();
    };
    let (n, d0) = world_plane(normal, *offset, pb);
    below_plane(mesh.vertices().iter().map(|v| point(pa, *v)), &n, d0, 0.0)
}

/// Per-triangle GJK/EPA against a convex shape; contacts that agree with the
/// deepest normal are merged into one manifold.
fn mesh_convex(
    a: &Shape,
    pa: &Iso,
    b: &Shape,
    pb: &Iso,
    config: &NarrowPhaseConfig,
) -> ContactManifold {
    let Shape::TriangleMesh(mesh) = a else {
        return ContactManifold::empty();
    };
    let bounds = b.aabb(pb);
    let convex = PosedShape::new(b, pb);

    let hits: Vec<(Vec3, Vec3, f32)> = (0..mesh.triangles().len())
        .filter_map(|i| {
            let tri = Triangle(mesh.triangle(i).map(|v| point(pa, v)));
            let tri_bounds = crate::math::Aabb::from_points(tri.0)?;
            if !tri_bounds.intersects(&bounds) {
                return None;
            }
            penetration(&tri, &convex, config)
        })
        .collect();

    let Some(&(normal, _, _)) = hits.iter().max_by(|x, y| x.2.total_cmp(&y.2)) else {
        return ContactManifold::empty();
    };
    let mut m = ContactManifold::with_normal(normal);
    for &(n, position, depth) in &hits {
        if n.dot(&normal) > MESH_NORMAL_AGREEMENT {
            m.add_point(ContactPoint::new(position, depth));
        }
    }
    m
}
