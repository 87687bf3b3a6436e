//! Contact points and manifolds.
//!
//! A manifold holds at most [`MAX_CONTACT_POINTS`] points sharing one normal
//! that points from body A toward body B. When more candidates arrive the
//! set is reduced to the deepest point plus the points that span the largest
//! area, which keeps a resting face supported at its corners.

use std::sync::Arc;

use crate::body::BodyHandle;
use crate::collision::BodyPair;
use crate::material::CombinedMaterial;
use crate::math::{Vec3, tangent_basis};
use crate::settings::{CONTACT_ID_CELL, CONTACT_MERGE_DISTANCE, MAX_CONTACT_POINTS};
use crate::shape::Shape;

/// Stable id of a contact position: the rounded position on a `CONTACT_ID_CELL`
/// grid, hashed with the usual three large primes.
#[inline]
pub fn contact_id(position: &Vec3) -> u32 {
    let q = |v: f32| (v / CONTACT_ID_CELL).round() as i32 as u32;
    q(position.x).wrapping_mul(73_856_093)
        ^ q(position.y).wrapping_mul(19_349_663)
        ^ q(position.z).wrapping_mul(83_492_791)
}

/// One point of contact between two bodies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactPoint {
    /// World-space position.
    pub position: Vec3,
    /// `position - center of A`, the lever arm for A's angular impulse.
    pub local_a: Vec3,
    /// `position - center of B`.
    pub local_b: Vec3,
    pub penetration: f32,
    /// Accumulated impulses, kept across frames for warm starting.
    pub normal_impulse: f32,
    pub tangent_impulse: [f32; 2],
    pub id: u32,
}

impl ContactPoint {
    pub fn new(position: Vec3, penetration: f32) -> Self {
        Self {
            position,
            local_a: Vec3::zeros(),
            local_b: Vec3::zeros(),
            penetration,
            normal_impulse: 0.0,
            tangent_impulse: [0.0; 2],
            id: contact_id(&position),
        }
    }
}

/// Contact set for one body pair.
#[derive(Clone, Debug)]
pub struct ContactManifold {
    pub body_a: Option<BodyHandle>,
    pub body_b: Option<BodyHandle>,
    pub shape_a: Option<Arc<Shape>>,
    pub shape_b: Option<Arc<Shape>>,
    points: Vec<ContactPoint>,
    normal: Vec3,
    tangents: [Vec3; 2],
    pub material: CombinedMaterial,
    /// Contact confirmed by the narrow phase this step.
    pub active: bool,
    /// Value of `active` at the end of the previous step.
    pub was_colliding: bool,
    /// Seconds since the contact was last confirmed.
    pub lifetime: f32,
}

impl Default for ContactManifold {
    fn default() -> Self {
        Self::empty()
    }
}

impl ContactManifold {
    /// The "no contact" result.
    pub fn empty() -> Self {
        let normal = Vec3::y();
        let (t1, t2) = tangent_basis(&normal);
        Self {
            body_a: None,
            body_b: None,
            shape_a: None,
            shape_b: None,
            points: Vec::with_capacity(MAX_CONTACT_POINTS),
            normal,
            tangents: [t1, t2],
            material: CombinedMaterial::default(),
            active: false,
            was_colliding: false,
            lifetime: 0.0,
        }
    }

    /// A manifold not yet bound to bodies, as produced by the narrow phase.
    pub fn with_normal(normal: Vec3) -> Self {
        let mut m = Self::empty();
        m.set_normal(normal);
        m
    }

    /// An empty manifold bound to `pair`; A is the smaller handle.
    pub fn for_pair(pair: BodyPair) -> Self {
        Self {
            body_a: Some(pair.first()),
            body_b: Some(pair.second()),
            ..Self::empty()
        }
    }

    #[inline]
    pub fn pair(&self) -> Option<BodyPair> {
        Some(BodyPair::new(self.body_a?, self.body_b?))
    }

    #[inline]
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    #[inline]
    pub fn tangents(&self) -> [Vec3; 2] {
        self.tangents
    }

    /// Set the normal and rebuild the tangent basis.
    pub fn set_normal(&mut self, normal: Vec3) {
        self.normal = normal;
        let (t1, t2) = tangent_basis(&normal);
        self.tangents = [t1, t2];
    }

    #[inline]
    pub fn points(&self) -> &[ContactPoint] {
        &self.points
    }

    #[inline]
    pub fn points_mut(&mut self) -> &mut [ContactPoint] {
        &mut self.points
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn has_contacts(&self) -> bool {
        !self.points.is_empty()
    }

    pub fn clear_points(&mut self) {
        self.points.clear();
    }

    pub(crate) fn replace_points(&mut self, points: Vec<ContactPoint>) {
        debug_assert!(points.len() <= MAX_CONTACT_POINTS);
        self.points = points;
    }

    pub fn max_penetration(&self) -> f32 {
        self.points
            .iter()
            .map(|p| p.penetration)
            .fold(0.0, f32::max)
    }

    /// Add a candidate point, merging it with a close neighbor (the deeper one
    /// survives) and reducing back to four points when needed.
    pub fn add_point(&mut self, point: ContactPoint) {
        let merge_sq = CONTACT_MERGE_DISTANCE * CONTACT_MERGE_DISTANCE;
        if let Some(existing) = self
            .points
            .iter_mut()
            .find(|p| (p.position - point.position).norm_squared() < merge_sq)
        {
            if point.penetration > existing.penetration {
                *existing = point;
            }
            return;
        }
        self.points.push(point);
        if self.points.len() > MAX_CONTACT_POINTS {
            self.reduce();
        }
    }

    /// Negate the normal: turns an (A, B) result into a (B, A) result.
    pub fn flip(&mut self) {
        let n = -self.normal;
        self.set_normal(n);
        for p in &mut self.points {
            std::mem::swap(&mut p.local_a, &mut p.local_b);
        }
        std::mem::swap(&mut self.body_a, &mut self.body_b);
        std::mem::swap(&mut self.shape_a, &mut self.shape_b);
    }

    /// Keep the deepest point, the point farthest from it, then the points
    /// that maximize the spanned area.
    pub fn reduce(&mut self) {
        if self.points.len() <= MAX_CONTACT_POINTS {
            return;
        }
        let mut pool = std::mem::take(&mut self.points);

        let deepest = index_of_max(&pool, |p| p.penetration);
        let a = pool.swap_remove(deepest);

        let far = index_of_max(&pool, |p| (p.position - a.position).norm_squared());
        let b = pool.swap_remove(far);

        let ab = b.position - a.position;
        let third = index_of_max(&pool, |p| ab.cross(&(p.position - a.position)).norm());
        let c = pool.swap_remove(third);

        let area = |p: &ContactPoint| {
            let d = p.position;
            let tri = |u: Vec3, v: Vec3, w: Vec3| (v - u).cross(&(w - u)).norm();
            tri(a.position, b.position, d) + tri(b.position, c.position, d) + tri(c.position, a.position, d)
        };
        let fourth = index_of_max(&pool, area);
        let d = pool.swap_remove(fourth);

        self.points = vec![a, b, c, d];
    }
}

fn index_of_max<F: Fn(&ContactPoint) -> f32>(points: &[ContactPoint], key: F) -> usize {
    points
        .iter()
        .enumerate()
        .max_by(|(_, x), (_, y)| key(x).total_cmp(&key(y)))
        .map_or(0, |(i, _)| i)
}
