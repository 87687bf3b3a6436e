/*!
GJK intersection query over support maps.

Any convex object that can answer "farthest point along a direction" is a
[`SupportMap`]. The query walks the Minkowski difference `A - B` building a
simplex (point, line, triangle, tetrahedron) toward the origin and stops when
the tetrahedron encloses it, when a support point fails to pass it, or when
the search direction collapses.

Design
- Simplex points remember the two shape points that produced them, so EPA can
  recover witness points on each shape.
- Every exit path returns; the loop is capped by `max_iterations`.
*/

use nalgebra as na;

use crate::math::{Iso, Vec3};
use crate::settings::{EPSILON, GJK_DIRECTION_EPS};
use crate::shape::Shape;

/// A convex set queried through its support function.
pub trait SupportMap {
    /// Farthest world-space point along `dir`.
    fn support(&self, dir: &Vec3) -> Vec3;
    /// A point inside the set, used to seed the search direction.
    fn center(&self) -> Vec3;
}

/// A shape placed in the world.
#[derive(Clone, Copy, Debug)]
pub struct PosedShape<'a> {
    pub shape: &'a Shape,
    pub pose: &'a Iso,
}

impl<'a> PosedShape<'a> {
    #[inline]
    pub fn new(shape: &'a Shape, pose: &'a Iso) -> Self {
        Self { shape, pose }
    }
}

impl SupportMap for PosedShape<'_> {
    #[inline]
    fn support(&self, dir: &Vec3) -> Vec3 {
        self.shape.support_point(dir, self.pose)
    }

    #[inline]
    fn center(&self) -> Vec3 {
        self.pose.translation.vector
    }
}

/// A world-space triangle, e.g. one face of a mesh.
#[derive(Clone, Copy, Debug)]
pub struct Triangle(pub [Vec3; 3]);

impl SupportMap for Triangle {
    fn support(&self, dir: &Vec3) -> Vec3 {
        let [a, b, c] = self.0;
        let (da, db, dc) = (a.dot(dir), b.dot(dir), c.dot(dir));
        if da >= db && da >= dc {
            a
        } else if db >= dc {
            b
        } else {
            c
        }
    }

    fn center(&self) -> Vec3 {
        (self.0[0] + self.0[1] + self.0[2]) / 3.0
    }
}

/// A point of the Minkowski difference and the shape points behind it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SupportPoint {
    /// `a - b`
    pub w: Vec3,
    pub a: Vec3,
    pub b: Vec3,
}

/// `supportA(d) - supportB(-d)`.
#[inline]
pub fn minkowski_support<A: SupportMap, B: SupportMap>(a: &A, b: &B, dir: &Vec3) -> SupportPoint {
    let pa = a.support(dir);
    let pb = b.support(&-dir);
    SupportPoint {
        w: pa - pb,
        a: pa,
        b: pb,
    }
}

/// Up to four support points, oldest first.
#[derive(Clone, Copy, Debug, Default)]
pub struct Simplex {
    points: [SupportPoint; 4],
    len: usize,
}

impl Simplex {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn points(&self) -> &[SupportPoint] {
        &self.points[..self.len]
    }

    #[inline]
    pub fn push(&mut self, p: SupportPoint) {
        if self.len < 4 {
            self.points[self.len] = p;
            self.len += 1;
        }
    }

    #[inline]
    fn set(&mut self, pts: &[SupportPoint]) {
        self.len = pts.len().min(4);
        self.points[..self.len].copy_from_slice(&pts[..self.len]);
    }

    fn contains(&self, w: &Vec3, tolerance: f32) -> bool {
        self.points()
            .iter()
            .any(|p| (p.w - w).norm_squared() < tolerance * tolerance)
    }
}

/// How a GJK query ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GjkStatus {
    /// The final tetrahedron encloses the origin.
    Intersecting,
    /// A support point failed to pass the origin, or no progress was possible.
    Separated,
    /// The search direction degenerated; treated as separated.
    DirectionCollapsed,
    /// Iteration cap reached; treated as separated.
    MaxIterations,
}

#[derive(Clone, Copy, Debug)]
pub struct GjkResult {
    pub status: GjkStatus,
    pub simplex: Simplex,
    pub iterations: u32,
}

impl GjkResult {
    #[inline]
    pub fn is_intersecting(&self) -> bool {
        self.status == GjkStatus::Intersecting
    }
}

/// Run GJK between `a` and `b`.
pub fn gjk<A: SupportMap, B: SupportMap>(
    a: &A,
    b: &B,
    max_iterations: u32,
    tolerance: f32,
) -> GjkResult {
    let mut dir = a.center() - b.center();
    if dir.norm_squared() < EPSILON * EPSILON {
        dir = Vec3::x();
    }

    let mut simplex = Simplex::default();
    let first = minkowski_support(a, b, &dir);
    simplex.push(first);
    dir = -first.w;

    let done = |status, simplex, iterations| GjkResult {
        status,
        simplex,
        iterations,
    };

    for iteration in 1..=max_iterations {
        let len = dir.norm();
        if len < GJK_DIRECTION_EPS {
            return done(GjkStatus::DirectionCollapsed, simplex, iteration);
        }
        dir /= len;

        let p = minkowski_support(a, b, &dir);
        if p.w.dot(&dir) < 0.0 {
            return done(GjkStatus::Separated, simplex, iteration);
        }
        if simplex.contains(&p.w, tolerance) {
            return done(GjkStatus::Separated, simplex, iteration);
        }
        simplex.push(p);

        if evolve(&mut simplex, &mut dir) {
            return done(GjkStatus::Intersecting, simplex, iteration);
        }
    }
    done(GjkStatus::MaxIterations, simplex, max_iterations)
}

/// `(a × b) × c`
#[inline]
fn triple(a: &Vec3, b: &Vec3, c: &Vec3) -> Vec3 {
    a.cross(b).cross(c)
}

/// Any unit vector perpendicular to `v`.
pub(crate) fn any_perpendicular(v: &Vec3) -> Vec3 {
    let axis = if v.x.abs() < 0.57 { Vec3::x() } else { Vec3::y() };
    let p = v.cross(&axis);
    na::Unit::try_new(p, EPSILON).map_or(Vec3::z(), |u| u.into_inner())
}

/// Reduce the simplex to the feature closest to the origin and update the
/// search direction. Returns true when the origin is enclosed.
fn evolve(s: &mut Simplex, dir: &mut Vec3) -> bool {
    match s.len() {
        2 => line(s, dir),
        3 => triangle(s, dir),
        4 => tetrahedron(s, dir),
        _ => false,
    }
}

fn line(s: &mut Simplex, dir: &mut Vec3) -> bool {
    let [b, a] = [s.points[0], s.points[1]];
    let ab = b.w - a.w;
    let ao = -a.w;
    if ab.dot(&ao) > 0.0 {
        let d = triple(&ab, &ao, &ab);
        // Origin on the segment: any perpendicular keeps the search going.
        *dir = if d.norm_squared() < EPSILON * EPSILON {
            any_perpendicular(&ab)
        } else {
            d
        };
    } else {
        s.set(&[a]);
        *dir = ao;
    }
    false
}

fn triangle(s: &mut Simplex, dir: &mut Vec3) -> bool {
    let [c, b, a] = [s.points[0], s.points[1], s.points[2]];
    let ab = b.w - a.w;
    let ac = c.w - a.w;
    let ao = -a.w;
    let abc = ab.cross(&ac);

    if abc.cross(&ac).dot(&ao) > 0.0 {
        if ac.dot(&ao) > 0.0 {
            s.set(&[c, a]);
            *dir = triple(&ac, &ao, &ac);
            return false;
        }
        s.set(&[b, a]);
        return line(s, dir);
    }
    if ab.cross(&abc).dot(&ao) > 0.0 {
        s.set(&[b, a]);
        return line(s, dir);
    }
    if abc.dot(&ao) > 0.0 {
        *dir = abc;
    } else {
        // Wind the triangle so its normal faces the origin.
        s.set(&[b, c, a]);
        *dir = -abc;
    }
    false
}

fn tetrahedron(s: &mut Simplex, dir: &mut Vec3) -> bool {
    let [d, c, b, a] = [s.points[0], s.points[1], s.points[2], s.points[3]];
    let ab = b.w - a.w;
    let ac = c.w - a.w;
    let ad = d.w - a.w;
    let ao = -a.w;

    // The base (b, c, d) already faces the origin; test the three new faces.
    if ab.cross(&ac).dot(&ao) > 0.0 {
        s.set(&[c, b, a]);
        return triangle(s, dir);
    }
    if ac.cross(&ad).dot(&ao) > 0.0 {
        s.set(&[d, c, a]);
        return triangle(s, dir);
    }
    if ad.cross(&ab).dot(&ao) > 0.0 {
        s.set(&[b, d, a]);
        return triangle(s, dir);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Quat, iso};
    use crate::settings::{GJK_MAX_ITERATIONS, GJK_TOLERANCE};

    fn query(a: &Shape, pa: Vec3, b: &Shape, pb: Vec3) -> GjkResult {
        let ia = iso(pa, Quat::identity());
        let ib = iso(pb, Quat::identity());
        gjk(
            &PosedShape::new(a, &ia),
            &PosedShape::new(b, &ib),
            GJK_MAX_ITERATIONS,
            GJK_TOLERANCE,
        )
    }

    #[test]
    fn overlapping_spheres_intersect() {
        let s = Shape::sphere(1.0).unwrap();
        let r = query(&s, Vec3::zeros(), &s, Vec3::new(1.5, 0.2, -0.1));
        assert!(r.is_intersecting());
        assert_eq!(r.simplex.len(), 4);
    }

    #[test]
    fn distant_shapes_are_separated() {
        let s = Shape::sphere(1.0).unwrap();
        let b = Shape::cuboid(Vec3::new(0.5, 0.5, 0.5)).unwrap();
        let r = query(&s, Vec3::zeros(), &b, Vec3::new(3.0, 0.0, 0.0));
        assert!(!r.is_intersecting());
        assert!(r.iterations <= GJK_MAX_ITERATIONS);
    }

    #[test]
    fn box_and_cylinder() {
        let b = Shape::cuboid(Vec3::new(1.0, 1.0, 1.0)).unwrap();
        let c = Shape::cylinder(0.5, 1.0).unwrap();
        assert!(query(&b, Vec3::zeros(), &c, Vec3::new(1.3, 0.3, 0.2)).is_intersecting());
        assert!(!query(&b, Vec3::zeros(), &c, Vec3::new(1.7, 0.3, 0.2)).is_intersecting());
    }

    #[test]
    fn coincident_centers_still_resolve() {
        let b = Shape::cuboid(Vec3::new(1.0, 1.0, 1.0)).unwrap();
        let s = Shape::sphere(0.25).unwrap();
        let r = query(&b, Vec3::new(0.1, 0.2, 0.3), &s, Vec3::new(0.1, 0.2, 0.3));
        assert!(r.is_intersecting());
    }

    #[test]
    fn triangle_support_picks_the_extreme_vertex() {
        let t = Triangle([Vec3::zeros(), Vec3::x(), Vec3::y()]);
        assert_eq!(t.support(&Vec3::new(1.0, 0.2, 0.0)), Vec3::x());
        assert_eq!(t.support(&Vec3::new(-1.0, -1.0, 0.0)), Vec3::zeros());
    }
}
