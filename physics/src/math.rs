/*!
Math aliases and small geometric helpers shared by every stage.

Types passed between shapes, broad phase, narrow phase and solver:
- nalgebra aliases (`Vec3`, `Quat`, `Iso`, `Mat3`)
- `Aabb`, the world-space bounds used by the broad phase
- normalization and tangent-basis helpers that guard degenerate input
*/

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::settings::EPSILON;

/// Single-precision nalgebra types used throughout the engine.
pub type Vec3 = na::Vector3<f32>;
pub type Quat = na::UnitQuaternion<f32>;
pub type Iso = na::Isometry3<f32>;
pub type Mat3 = na::Matrix3<f32>;

/// Build an isometry from a position and orientation.
#[inline]
pub fn iso(position: Vec3, orientation: Quat) -> Iso {
    Iso::from_parts(na::Translation3::from(position), orientation)
}

/// Normalize `v`, or `None` when it is too short (or not finite) to have a direction.
#[inline]
pub fn safe_normalize(v: Vec3) -> Option<Vec3> {
    let len = v.norm();
    if len.is_finite() && len > EPSILON {
        Some(v / len)
    } else {
        None
    }
}

/// Two unit vectors that complete `normal` into a right-handed orthonormal basis.
///
/// The first tangent is built from the two largest components of the normal so
/// the cross product never degenerates.
pub fn tangent_basis(normal: &Vec3) -> (Vec3, Vec3) {
    let t1 = if normal.x.abs() > normal.y.abs() {
        Vec3::new(-normal.z, 0.0, normal.x)
    } else {
        Vec3::new(0.0, normal.z, -normal.y)
    };
    let t1 = safe_normalize(t1).unwrap_or_else(Vec3::x);
    let t2 = normal.cross(&t1);
    (t1, t2)
}

/// Scale `v` down so its length does not exceed `max`.
#[inline]
pub fn clamp_length(v: Vec3, max: f32) -> Vec3 {
    let len_sq = v.norm_squared();
    if len_sq > max * max {
        v * (max / len_sq.sqrt())
    } else {
        v
    }
}

/// World-space inverse inertia `R * I⁻¹ * Rᵀ`.
#[inline]
pub fn world_inverse_inertia(orientation: &Quat, inv_local: &Mat3) -> Mat3 {
    let r = orientation.to_rotation_matrix();
    let r = r.matrix();
    r * inv_local * r.transpose()
}

/// Axis-aligned bounding box in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Tightest box around `points`, or `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Self::new(first, first);
        for p in iter {
            aabb.min = aabb.min.inf(&p);
            aabb.max = aabb.max.sup(&p);
        }
        Some(aabb)
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Full edge lengths.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Inclusive overlap test on all three axes.
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    #[inline]
    pub fn contains_point(&self, p: &Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    #[inline]
    pub fn inflate(&self, margin: f32) -> Aabb {
        let m = Vec3::repeat(margin);
        Aabb::new(self.min - m, self.max + m)
    }

    /// Bounds of this local-space box after applying `pose`.
    pub fn transformed(&self, pose: &Iso) -> Aabb {
        let rot = pose.rotation.to_rotation_matrix();
        let abs_rot = rot.matrix().abs();
        let center = pose * na::Point3::from(self.center());
        let half = abs_rot * self.half_extents();
        Aabb::from_center_half_extents(center.coords, half)
    }

    pub fn is_finite(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tangent_basis_is_orthonormal() {
        let normals = [
            Vec3::y(),
            Vec3::x(),
            -Vec3::z(),
            Vec3::new(1.0, 2.0, -3.0).normalize(),
        ];
        for n in normals {
            let (t1, t2) = tangent_basis(&n);
            assert_relative_eq!(t1.norm(), 1.0, epsilon = 1.0e-5);
            assert_relative_eq!(t2.norm(), 1.0, epsilon = 1.0e-5);
            assert!(t1.dot(&n).abs() < 1.0e-5);
            assert!(t2.dot(&n).abs() < 1.0e-5);
            assert!(t1.dot(&t2).abs() < 1.0e-5);
        }
    }

    #[test]
    fn safe_normalize_rejects_degenerate_vectors() {
        assert!(safe_normalize(Vec3::zeros()).is_none());
        assert!(safe_normalize(Vec3::new(f32::NAN, 0.0, 0.0)).is_none());
        let n = safe_normalize(Vec3::new(0.0, 3.0, 4.0)).unwrap();
        assert_relative_eq!(n, Vec3::new(0.0, 0.6, 0.8), epsilon = 1.0e-6);
    }

    #[test]
    fn rotated_box_bounds_grow() {
        let local = Aabb::from_center_half_extents(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        let pose = iso(
            Vec3::new(5.0, 0.0, 0.0),
            Quat::from_axis_angle(&Vec3::y_axis(), std::f32::consts::FRAC_PI_4),
        );
        let world = local.transformed(&pose);
        let expected = std::f32::consts::SQRT_2;
        assert_relative_eq!(world.half_extents().x, expected, epsilon = 1.0e-5);
        assert_relative_eq!(world.half_extents().y, 1.0, epsilon = 1.0e-5);
        assert_relative_eq!(world.center().x, 5.0, epsilon = 1.0e-5);
    }

    #[test]
    fn overlap_is_inclusive_and_symmetric() {
        let a = Aabb::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Vec3::new(1.0, 0.5, 0.5), Vec3::new(2.0, 2.0, 2.0));
        let c = Aabb::new(Vec3::new(1.5, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b) && b.intersects(&a));
        assert!(!a.intersects(&c) && !c.intersects(&a));
    }

    #[test]
    fn clamp_length_only_shrinks() {
        let v = Vec3::new(0.0, 200.0, 0.0);
        assert_relative_eq!(clamp_length(v, 100.0).norm(), 100.0, epsilon = 1.0e-3);
        let w = Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(clamp_length(w, 100.0), w);
    }
}
