//! Expanding polytope penetration query.
//!
//! Starts from the tetrahedron GJK ended with (completing a flatter simplex
//! first), then repeatedly pushes the face closest to the origin outward
//! along its normal. Faces visible from each new support point are replaced
//! by a fan from the point to the horizon, so the polytope stays convex.
//! The closest face at exit gives the normal (A toward B), the depth, and,
//! by barycentric projection, a witness point on each shape.
//!
//! Rounded shapes that overlap almost completely are nearly equally deep in
//! every direction, so the closest face can sit far from the true normal.
//! A short descent on the support depth `s(n) ⋅ n` polishes the normal
//! afterwards; it only ever accepts a shallower direction.

use crate::collision::gjk::{Simplex, SupportMap, SupportPoint, any_perpendicular, minkowski_support};
use crate::math::{Vec3, safe_normalize};
use crate::settings::EPSILON;

/// Descent steps after the polytope settles.
const REFINE_ITERATIONS: u32 = 32;
/// Largest rotation (radians) tried by one descent step.
const REFINE_MAX_ANGLE: f32 = 0.25;
/// Rotations below this stop the descent.
const REFINE_MIN_ANGLE: f32 = 1.0e-4;
/// Rotation used to sample the support on the far side of a ridge.
const REFINE_RIDGE_OFFSET: f32 = 1.0e-3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpaResult {
    /// Unit normal pointing from A toward B.
    pub normal: Vec3,
    pub depth: f32,
    /// Deepest point of A inside B.
    pub point_a: Vec3,
    /// Deepest point of B inside A.
    pub point_b: Vec3,
    pub iterations: u32,
    pub converged: bool,
}

#[derive(Clone, Copy, Debug)]
struct Face {
    v: [usize; 3],
    normal: Vec3,
    dist: f32,
}

struct Polytope {
    verts: Vec<SupportPoint>,
    faces: Vec<Face>,
    interior: Vec3,
}

impl Polytope {
    /// Build an outward-facing face, or `None` when the triangle is degenerate.
    fn face(&self, i: usize, j: usize, k: usize) -> Option<Face> {
        let (a, b, c) = (self.verts[i].w, self.verts[j].w, self.verts[k].w);
        let n = safe_normalize((b - a).cross(&(c - a)))?;
        let (v, normal) = if n.dot(&(a - self.interior)) < 0.0 {
            ([i, k, j], -n)
        } else {
            ([i, j, k], n)
        };
        Some(Face {
            v,
            normal,
            dist: normal.dot(&a),
        })
    }

    fn closest(&self) -> Option<usize> {
        self.faces
            .iter()
            .enumerate()
            .min_by(|(_, x), (_, y)| x.dist.total_cmp(&y.dist))
            .map(|(i, _)| i)
    }

    /// Replace every face visible from vertex `s` with a fan to the horizon.
    fn expand(&mut self, s: usize) -> bool {
        let p = self.verts[s].w;
        let mut horizon: Vec<(usize, usize)> = Vec::new();
        let mut kept = Vec::with_capacity(self.faces.len());
        for face in self.faces.drain(..) {
            let visible = face.normal.dot(&(p - self.verts[face.v[0]].w)) > EPSILON;
            if !visible {
                kept.push(face);
                continue;
            }
            for (x, y) in [(face.v[0], face.v[1]), (face.v[1], face.v[2]), (face.v[2], face.v[0])] {
                if let Some(pos) = horizon.iter().position(|&(hx, hy)| hx == y && hy == x) {
                    horizon.swap_remove(pos);
                } else {
                    horizon.push((x, y));
                }
            }
        }
        self.faces = kept;
        if horizon.is_empty() {
            return false;
        }
        for (x, y) in horizon {
            if let Some(f) = self.face(x, y, s) {
                self.faces.push(f);
            }
        }
        true
    }
}

/// Grow a 1-3 point simplex that contains the origin into a tetrahedron.
fn complete_simplex<A: SupportMap, B: SupportMap>(
    a: &A,
    b: &B,
    simplex: &Simplex,
) -> Option<[SupportPoint; 4]> {
    let mut pts: Vec<SupportPoint> = simplex.points().to_vec();
    let axes = [
        Vec3::x(),
        -Vec3::x(),
        Vec3::y(),
        -Vec3::y(),
        Vec3::z(),
        -Vec3::z(),
    ];

    if pts.is_empty() {
        pts.push(minkowski_support(a, b, &Vec3::x()));
    }
    if pts.len() == 1 {
        let origin = pts[0].w;
        let next = axes
            .iter()
            .map(|d| minkowski_support(a, b, d))
            .find(|p| (p.w - origin).norm_squared() > EPSILON)?;
        pts.push(next);
    }
    if pts.len() == 2 {
        let axis = safe_normalize(pts[1].w - pts[0].w)?;
        let p1 = any_perpendicular(&axis);
        let p2 = axis.cross(&p1);
        let base = pts[0].w;
        let next = [p1, -p1, p2, -p2]
            .iter()
            .map(|d| minkowski_support(a, b, d))
            .find(|p| {
                let off = p.w - base;
                (off - axis * off.dot(&axis)).norm_squared() > EPSILON
            })?;
        pts.push(next);
    }
    if pts.len() == 3 {
        let n = safe_normalize((pts[1].w - pts[0].w).cross(&(pts[2].w - pts[0].w)))?;
        let base = pts[0].w;
        let next = [n, -n]
            .iter()
            .map(|d| minkowski_support(a, b, d))
            .find(|p| (p.w - base).dot(&n).abs() > EPSILON)?;
        pts.push(next);
    }
    Some([pts[0], pts[1], pts[2], pts[3]])
}

/// Barycentric coordinates of `p` projected onto triangle `(a, b, c)`.
fn barycentric(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> [f32; 3] {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < EPSILON * EPSILON {
        return [1.0 / 3.0; 3];
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    [1.0 - v - w, v, w]
}

/// Penetration of two intersecting convex sets, starting from GJK's final simplex.
///
/// Returns `None` when the simplex cannot be grown into a proper tetrahedron.
/// Hitting the iteration cap still returns the best face found.
pub fn epa<A: SupportMap, B: SupportMap>(
    a: &A,
    b: &B,
    simplex: &Simplex,
    max_iterations: u32,
    tolerance: f32,
) -> Option<EpaResult> {
    let tetra = complete_simplex(a, b, simplex)?;
    let [p0, p1, p2, p3] = tetra.map(|p| p.w);
    let volume = (p1 - p0).dot(&(p2 - p0).cross(&(p3 - p0)));
    if volume.abs() < EPSILON {
        return None;
    }

    let mut poly = Polytope {
        verts: tetra.to_vec(),
        faces: Vec::with_capacity(64),
        interior: (p0 + p1 + p2 + p3) * 0.25,
    };
    for [i, j, k] in [[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]] {
        let f = poly.face(i, j, k)?;
        poly.faces.push(f);
    }

    let mut converged = false;
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        let ci = poly.closest()?;
        let face = poly.faces[ci];
        let s = minkowski_support(a, b, &face.normal);
        if s.w.dot(&face.normal) - face.dist < tolerance {
            converged = true;
            break;
        }
        poly.verts.push(s);
        if !poly.expand(poly.verts.len() - 1) {
            converged = true;
            break;
        }
        if poly.faces.is_empty() {
            return None;
        }
    }

    let face = poly.faces[poly.closest()?];
    if let Some((normal, s, depth)) = refine(a, b, face.normal) {
        return Some(EpaResult {
            normal,
            depth: depth.max(0.0),
            point_a: s.a,
            point_b: s.b,
            iterations,
            converged,
        });
    }

    let [i, j, k] = face.v;
    let (va, vb, vc) = (poly.verts[i], poly.verts[j], poly.verts[k]);
    let projected = face.normal * face.dist;
    let [u, v, w] = barycentric(&projected, &va.w, &vb.w, &vc.w);
    Some(EpaResult {
        normal: face.normal,
        depth: face.dist.max(0.0),
        point_a: va.a * u + vb.a * v + vc.a * w,
        point_b: va.b * u + vb.b * v + vc.b * w,
        iterations,
        converged,
    })
}

/// Rotate `normal` down the tangential gradient of `s(n) ⋅ n` with a
/// backtracking step. `None` when no shallower direction was found.
///
/// Where the support point jumps (the side of a capsule, a box edge) the
/// gradients on both sides of the ridge are combined into their
/// minimum-norm mix, which runs along the ridge instead of across it.
fn refine<A: SupportMap, B: SupportMap>(
    a: &A,
    b: &B,
    normal: Vec3,
) -> Option<(Vec3, SupportPoint, f32)> {
    let mut n = normal;
    let mut s = minkowski_support(a, b, &n);
    let mut depth = s.w.dot(&n);
    let mut angle = REFINE_MAX_ANGLE;
    let mut improved = false;

    for _ in 0..REFINE_ITERATIONS {
        let g = tangential(&s.w, &n);
        let Some(downhill) = safe_normalize(g) else {
            break;
        };
        let mut step = descend(a, b, &n, &downhill, depth, angle);
        if step.is_none() {
            let across = rotate(&n, &downhill, REFINE_RIDGE_OFFSET);
            let g_across = tangential(&minkowski_support(a, b, &across).w, &n);
            let ridge = safe_normalize(tangential(&min_norm_on_segment(&g, &g_across), &n));
            step = ridge.and_then(|d| descend(a, b, &n, &d, depth, REFINE_MAX_ANGLE));
        }
        let Some((next, next_s, next_depth, used)) = step else {
            break;
        };
        (n, s, depth) = (next, next_s, next_depth);
        improved = true;
        angle = (used * 2.0).min(REFINE_MAX_ANGLE);
    }
    improved.then_some((n, s, depth))
}

/// First rotation along `-dir`, halving from `angle`, that lowers the depth.
fn descend<A: SupportMap, B: SupportMap>(
    a: &A,
    b: &B,
    n: &Vec3,
    dir: &Vec3,
    depth: f32,
    mut angle: f32,
) -> Option<(Vec3, SupportPoint, f32, f32)> {
    while angle >= REFINE_MIN_ANGLE {
        let candidate = rotate(n, dir, angle);
        let s = minkowski_support(a, b, &candidate);
        let d = s.w.dot(&candidate);
        if d < depth {
            return Some((candidate, s, d, angle));
        }
        angle *= 0.5;
    }
    None
}

/// `n` turned by `angle` away from the unit tangent `dir`, renormalized.
#[inline]
fn rotate(n: &Vec3, dir: &Vec3, angle: f32) -> Vec3 {
    (n * angle.cos() - dir * angle.sin()).normalize()
}

#[inline]
fn tangential(v: &Vec3, n: &Vec3) -> Vec3 {
    v - n * v.dot(n)
}

/// Point of segment `p..q` closest to the origin.
fn min_norm_on_segment(p: &Vec3, q: &Vec3) -> Vec3 {
    let d = q - p;
    let len_sq = d.norm_squared();
    if len_sq <= EPSILON {
        return *p;
    }
    let t = (-p.dot(&d) / len_sq).clamp(0.0, 1.0);
    p + d * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::gjk::{PosedShape, gjk};
    use crate::math::{Iso, Quat, iso};
    use crate::settings::{EPA_MAX_ITERATIONS, EPA_TOLERANCE, GJK_MAX_ITERATIONS, GJK_TOLERANCE};
    use crate::shape::Shape;
    use approx::assert_relative_eq;

    fn penetration(a: &Shape, ia: &Iso, b: &Shape, ib: &Iso) -> Option<EpaResult> {
        let (sa, sb) = (PosedShape::new(a, ia), PosedShape::new(b, ib));
        let g = gjk(&sa, &sb, GJK_MAX_ITERATIONS, GJK_TOLERANCE);
        assert!(g.is_intersecting());
        epa(&sa, &sb, &g.simplex, EPA_MAX_ITERATIONS, EPA_TOLERANCE)
    }

    #[test]
    fn box_box_face_contact() {
        let b = Shape::cuboid(Vec3::new(1.0, 1.0, 1.0)).unwrap();
        let ia = iso(Vec3::zeros(), Quat::identity());
        let ib = iso(Vec3::new(0.1, 1.8, -0.05), Quat::identity());
        let r = penetration(&b, &ia, &b, &ib).unwrap();
        // Polytope faces are exact for boxes.
        assert_relative_eq!(r.depth, 0.2, epsilon = 1.0e-3);
        assert_relative_eq!(r.normal, Vec3::y(), epsilon = 1.0e-3);
        assert!(r.converged);
    }

    #[test]
    fn witness_points_lie_on_their_shapes() {
        let b = Shape::cuboid(Vec3::new(1.0, 1.0, 1.0)).unwrap();
        let s = Shape::sphere(0.5).unwrap();
        let ia = iso(Vec3::zeros(), Quat::identity());
        let ib = iso(Vec3::new(1.3, 0.0, 0.0), Quat::identity());
        let r = penetration(&b, &ia, &s, &ib).unwrap();
        assert_relative_eq!(r.depth, 0.2, epsilon = 1.0e-2);
        assert!(r.normal.x > 0.99);
        // A's witness is on the box face, B's on the sphere's far side.
        assert_relative_eq!(r.point_a.x, 1.0, epsilon = 1.0e-2);
        assert_relative_eq!(r.point_b.x, 0.8, epsilon = 1.0e-2);
    }

    #[test]
    fn nearly_coincident_spheres_get_the_center_normal() {
        let s = Shape::sphere(0.5).unwrap();
        let offset = Vec3::new(1.0, 2.0, -1.0).normalize() * 0.02;
        let ia = iso(Vec3::zeros(), Quat::identity());
        let ib = iso(offset, Quat::identity());
        let r = penetration(&s, &ia, &s, &ib).unwrap();
        assert_relative_eq!(r.depth, 0.98, epsilon = 1.0e-3);
        assert!(r.normal.dot(&offset.normalize()) > 0.999, "normal {:?}", r.normal);
    }

    #[test]
    fn box_face_normal_survives_refinement() {
        let b = Shape::cuboid(Vec3::new(1.0, 1.0, 1.0)).unwrap();
        let ia = iso(Vec3::zeros(), Quat::identity());
        let ib = iso(Vec3::new(0.05, 0.3, 0.02), Quat::identity());
        let r = penetration(&b, &ia, &b, &ib).unwrap();
        assert_relative_eq!(r.depth, 1.7, epsilon = 1.0e-3);
        assert_relative_eq!(r.normal, Vec3::y(), epsilon = 1.0e-3);
    }

    #[test]
    fn capsule_side_normal_follows_the_ridge() {
        let capsule = Shape::capsule(0.3, 0.6).unwrap();
        let sphere = Shape::sphere(0.5).unwrap();
        let ia = iso(Vec3::new(0.03, 0.1, -0.02), Quat::identity());
        let ib = iso(Vec3::zeros(), Quat::identity());
        let r = penetration(&capsule, &ia, &sphere, &ib).unwrap();
        let radial = Vec3::new(-0.03, 0.0, 0.02);
        assert_relative_eq!(r.depth, 0.8 - radial.norm(), epsilon = 1.0e-2);
        assert!(r.normal.dot(&radial.normalize()) > 0.99, "normal {:?}", r.normal);
    }

    #[test]
    fn min_norm_point_of_a_segment() {
        let p = Vec3::new(0.1, 0.7, 0.0);
        let q = Vec3::new(0.1, -0.5, 0.0);
        assert_relative_eq!(min_norm_on_segment(&p, &q), Vec3::new(0.1, 0.0, 0.0), epsilon = 1.0e-6);
        assert_relative_eq!(min_norm_on_segment(&p, &(p * 2.0)), p);
    }

    #[test]
    fn barycentric_of_vertices_and_centroid() {
        let (a, b, c) = (Vec3::zeros(), Vec3::x(), Vec3::y());
        assert_relative_eq!(barycentric(&a, &a, &b, &c)[0], 1.0);
        let centroid = (a + b + c) / 3.0;
        let w = barycentric(&centroid, &a, &b, &c);
        for x in w {
            assert_relative_eq!(x, 1.0 / 3.0, epsilon = 1.0e-6);
        }
    }
}
