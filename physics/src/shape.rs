/*!
Collision shapes.

`Shape` is a closed set of primitives. Every variant answers the same
questions: world bounds, point containment, size, volume, support point and
mass properties. Narrow-phase dispatch keys off [`ShapeType`].

Conventions
- Dimensions are local; the owning body's pose places the shape in the world.
- Capsules and cylinders are aligned with local +Y. Their `half_height`
  is half the length of the straight section (the capsule caps are extra).
- A plane is the half-space `normal · x <= offset` in body space; its solid
  side is "below" the normal.
- Factories validate dimensions. Build shapes through them and share one
  instance between bodies with `Arc<Shape>`.
*/

use std::f32::consts::PI;

use nalgebra as na;

use crate::error::{PhysicsError, Result, positive};
use crate::math::{Aabb, Iso, Mat3, Vec3, safe_normalize};
use crate::settings::{EPSILON, PLANE_EXTENT, PLANE_HALF_THICKNESS};

/// Type tag used to index the narrow-phase dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShapeType {
    Box = 0,
    Sphere = 1,
    Capsule = 2,
    Cylinder = 3,
    Plane = 4,
    TriangleMesh = 5,
}

impl ShapeType {
    pub const COUNT: usize = 6;

    pub const ALL: [ShapeType; Self::COUNT] = [
        ShapeType::Box,
        ShapeType::Sphere,
        ShapeType::Capsule,
        ShapeType::Cylinder,
        ShapeType::Plane,
        ShapeType::TriangleMesh,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Indexed triangle soup with cached local bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct TriangleMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    local_aabb: Aabb,
}

impl TriangleMesh {
    /// Validate and build a mesh. Every index must address a vertex and every
    /// vertex must be finite.
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        if triangles.is_empty() {
            return Err(PhysicsError::InvalidMesh("mesh has no triangles".into()));
        }
        if let Some(i) = vertices.iter().position(|v| !v.iter().all(|c| c.is_finite())) {
            return Err(PhysicsError::InvalidMesh(format!(
                "vertex {i} is not finite"
            )));
        }
        let count = vertices.len();
        for (t, tri) in triangles.iter().enumerate() {
            if let Some(&bad) = tri.iter().find(|&&i| i as usize >= count) {
                return Err(PhysicsError::InvalidMesh(format!(
                    "triangle {t} references vertex {bad}, mesh has {count}"
                )));
            }
        }
        let local_aabb = Aabb::from_points(vertices.iter().copied())
            .ok_or_else(|| PhysicsError::InvalidMesh("mesh has no vertices".into()))?;
        Ok(Self {
            vertices,
            triangles,
            local_aabb,
        })
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    #[inline]
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    #[inline]
    pub fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    /// Corner positions of triangle `index` in mesh space.
    #[inline]
    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let [a, b, c] = self.triangles[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Enclosed volume for a closed mesh (divergence theorem); zero for open soups.
    fn signed_volume(&self) -> f32 {
        (0..self.triangles.len())
            .map(|i| {
                let [a, b, c] = self.triangle(i);
                a.dot(&b.cross(&c)) / 6.0
            })
            .sum()
    }

    /// Ray-parity containment along +X. Meaningful for closed meshes only.
    fn contains_local(&self, p: &Vec3) -> bool {
        if !self.local_aabb.contains_point(p) {
            return false;
        }
        let dir = Vec3::new(1.0, 0.0, 0.0);
        let crossings = (0..self.triangles.len())
            .filter(|&i| ray_hits_triangle(p, &dir, &self.triangle(i)))
            .count();
        crossings % 2 == 1
    }
}

/// Moller-Trumbore ray/triangle test, counting hits with t > 0.
fn ray_hits_triangle(origin: &Vec3, dir: &Vec3, tri: &[Vec3; 3]) -> bool {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = dir.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < EPSILON {
        return false;
    }
    let inv = 1.0 / det;
    let s = origin - tri[0];
    let u = s.dot(&p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return false;
    }
    let q = s.cross(&e1);
    let v = dir.dot(&q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return false;
    }
    e2.dot(&q) * inv > EPSILON
}

/// Geometric primitive attached to a rigid body.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Box {
        /// Local-space half extents (hx, hy, hz).
        half_extents: Vec3,
    },
    Sphere {
        radius: f32,
    },
    Capsule {
        radius: f32,
        /// Half length of the straight section along local +Y.
        half_height: f32,
    },
    Cylinder {
        radius: f32,
        /// Half height along local +Y.
        half_height: f32,
    },
    Plane {
        /// Unit normal in body space.
        normal: Vec3,
        /// Plane offset along the normal, i.e. normal ⋅ x = offset.
        offset: f32,
    },
    TriangleMesh(TriangleMesh),
}

impl Shape {
    /// Box from half extents.
    pub fn cuboid(half_extents: Vec3) -> Result<Self> {
        positive("box", "half_extents.x", half_extents.x)?;
        positive("box", "half_extents.y", half_extents.y)?;
        positive("box", "half_extents.z", half_extents.z)?;
        Ok(Shape::Box { half_extents })
    }

    /// Box from full edge lengths (width, height, depth).
    pub fn box_from_size(size: Vec3) -> Result<Self> {
        Self::cuboid(size * 0.5)
    }

    pub fn sphere(radius: f32) -> Result<Self> {
        Ok(Shape::Sphere {
            radius: positive("sphere", "radius", radius)?,
        })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Result<Self> {
        Ok(Shape::Capsule {
            radius: positive("capsule", "radius", radius)?,
            half_height: positive("capsule", "half_height", half_height)?,
        })
    }

    pub fn cylinder(radius: f32, half_height: f32) -> Result<Self> {
        Ok(Shape::Cylinder {
            radius: positive("cylinder", "radius", radius)?,
            half_height: positive("cylinder", "half_height", half_height)?,
        })
    }

    /// Plane `normal ⋅ x = offset`. The normal is normalized here.
    pub fn plane(normal: Vec3, offset: f32) -> Result<Self> {
        let normal = safe_normalize(normal).ok_or(PhysicsError::InvalidPlaneNormal)?;
        if !offset.is_finite() {
            return Err(PhysicsError::InvalidConfig {
                field: "plane.offset",
                reason: format!("{offset} is not finite"),
            });
        }
        Ok(Shape::Plane { normal, offset })
    }

    /// Horizontal ground plane at height zero.
    pub fn ground() -> Self {
        Shape::Plane {
            normal: Vec3::y(),
            offset: 0.0,
        }
    }

    pub fn triangle_mesh(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        Ok(Shape::TriangleMesh(TriangleMesh::new(vertices, triangles)?))
    }

    #[inline]
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Shape::Box { .. } => ShapeType::Box,
            Shape::Sphere { .. } => ShapeType::Sphere,
            Shape::Capsule { .. } => ShapeType::Capsule,
            Shape::Cylinder { .. } => ShapeType::Cylinder,
            Shape::Plane { .. } => ShapeType::Plane,
            Shape::TriangleMesh(_) => ShapeType::TriangleMesh,
        }
    }

    /// Planes have no finite extent and are kept out of the spatial grid.
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Shape::Plane { .. })
    }

    /// Bounds in shape-local space. Planes use a large finite slab.
    pub fn local_aabb(&self) -> Aabb {
        match self {
            Shape::Box { half_extents } => Aabb::from_center_half_extents(Vec3::zeros(), *half_extents),
            Shape::Sphere { radius } => {
                Aabb::from_center_half_extents(Vec3::zeros(), Vec3::repeat(*radius))
            }
            Shape::Capsule {
                radius,
                half_height,
            } => Aabb::from_center_half_extents(
                Vec3::zeros(),
                Vec3::new(*radius, half_height + radius, *radius),
            ),
            Shape::Cylinder {
                radius,
                half_height,
            } => Aabb::from_center_half_extents(
                Vec3::zeros(),
                Vec3::new(*radius, *half_height, *radius),
            ),
            Shape::Plane { normal, offset } => plane_slab(normal, *offset),
            Shape::TriangleMesh(mesh) => mesh.local_aabb(),
        }
    }

    /// World-space bounds at `pose`.
    pub fn aabb(&self, pose: &Iso) -> Aabb {
        match self {
            Shape::Sphere { radius } => {
                Aabb::from_center_half_extents(pose.translation.vector, Vec3::repeat(*radius))
            }
            Shape::Capsule {
                radius,
                half_height,
            } => {
                let axis = pose.rotation * Vec3::new(0.0, *half_height, 0.0);
                let c = pose.translation.vector;
                Aabb::from_points([c + axis, c - axis])
                    .map(|a| a.inflate(*radius))
                    .unwrap_or_else(|| Aabb::from_center_half_extents(c, Vec3::repeat(*radius)))
            }
            Shape::Cylinder {
                radius,
                half_height,
            } => {
                let axis = pose.rotation * Vec3::y();
                let half = Vec3::from_fn(|i, _| {
                    let a = axis[i];
                    a.abs() * half_height + radius * (1.0 - a * a).max(0.0).sqrt()
                });
                Aabb::from_center_half_extents(pose.translation.vector, half)
            }
            Shape::Plane { normal, offset } => {
                let n = pose.rotation * normal;
                let point = pose * na::Point3::from(normal * *offset);
                plane_slab(&n, n.dot(&point.coords))
            }
            Shape::Box { .. } | Shape::TriangleMesh(_) => self.local_aabb().transformed(pose),
        }
    }

    /// True when the world-space `point` lies inside (or on) the shape at `pose`.
    pub fn contains_point(&self, point: &Vec3, pose: &Iso) -> bool {
        let p = pose.inverse_transform_point(&na::Point3::from(*point)).coords;
        match self {
            Shape::Box { half_extents } => {
                p.x.abs() <= half_extents.x
                    && p.y.abs() <= half_extents.y
                    && p.z.abs() <= half_extents.z
            }
            Shape::Sphere { radius } => p.norm_squared() <= radius * radius,
            Shape::Capsule {
                radius,
                half_height,
            } => {
                let on_axis = Vec3::new(0.0, p.y.clamp(-half_height, *half_height), 0.0);
                (p - on_axis).norm_squared() <= radius * radius
            }
            Shape::Cylinder {
                radius,
                half_height,
            } => p.y.abs() <= *half_height && p.x * p.x + p.z * p.z <= radius * radius,
            Shape::Plane { normal, offset } => normal.dot(&p) <= *offset,
            Shape::TriangleMesh(mesh) => mesh.contains_local(&p),
        }
    }

    /// Full extents of the local bounds.
    pub fn size(&self) -> Vec3 {
        self.local_aabb().size()
    }

    /// Enclosed volume. Planes report zero; open meshes fall back to their bounds.
    pub fn volume(&self) -> f32 {
        match self {
            Shape::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            Shape::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Shape::Capsule {
                radius,
                half_height,
            } => PI * radius * radius * 2.0 * half_height + 4.0 / 3.0 * PI * radius.powi(3),
            Shape::Cylinder {
                radius,
                half_height,
            } => PI * radius * radius * 2.0 * half_height,
            Shape::Plane { .. } => 0.0,
            Shape::TriangleMesh(mesh) => {
                let v = mesh.signed_volume().abs();
                if v > EPSILON {
                    v
                } else {
                    let s = mesh.local_aabb().size();
                    s.x * s.y * s.z
                }
            }
        }
    }

    /// Farthest point along the local-space direction `dir`.
    pub fn local_support(&self, dir: &Vec3) -> Vec3 {
        match self {
            Shape::Box { half_extents } => Vec3::new(
                half_extents.x.copysign(dir.x),
                half_extents.y.copysign(dir.y),
                half_extents.z.copysign(dir.z),
            ),
            Shape::Sphere { radius } => safe_normalize(*dir).unwrap_or_else(Vec3::x) * *radius,
            Shape::Capsule {
                radius,
                half_height,
            } => {
                let tip = Vec3::new(0.0, half_height.copysign(dir.y), 0.0);
                tip + safe_normalize(*dir).unwrap_or_else(Vec3::x) * *radius
            }
            Shape::Cylinder {
                radius,
                half_height,
            } => {
                let radial = Vec3::new(dir.x, 0.0, dir.z);
                let rim = safe_normalize(radial).map_or(Vec3::zeros(), |r| r * *radius);
                rim + Vec3::new(0.0, half_height.copysign(dir.y), 0.0)
            }
            Shape::Plane { normal, offset } => {
                let along = dir.dot(normal);
                let tangent = dir - normal * along;
                let mut p = normal * *offset;
                if let Some(t) = safe_normalize(tangent) {
                    p += t * PLANE_EXTENT;
                }
                if along < 0.0 {
                    p -= normal * PLANE_EXTENT;
                }
                p
            }
            Shape::TriangleMesh(mesh) => mesh
                .vertices()
                .iter()
                .copied()
                .max_by(|a, b| a.dot(dir).total_cmp(&b.dot(dir)))
                .unwrap_or_else(Vec3::zeros),
        }
    }

    /// Farthest world-space point along the world-space direction `dir` at `pose`.
    #[inline]
    pub fn support_point(&self, dir: &Vec3, pose: &Iso) -> Vec3 {
        let local_dir = pose.rotation.inverse_transform_vector(dir);
        let local = self.local_support(&local_dir);
        (pose * na::Point3::from(local)).coords
    }

    /// Local inertia tensor (diagonal) for a body of `mass` with this shape.
    pub fn inertia_tensor(&self, mass: f32) -> Mat3 {
        let diag = match self {
            Shape::Box { half_extents } => box_inertia(mass, &(half_extents * 2.0)),
            Shape::Sphere { radius } => Vec3::repeat(0.4 * mass * radius * radius),
            Shape::Cylinder {
                radius,
                half_height,
            } => cylinder_inertia(mass, *radius, 2.0 * half_height),
            // Elongated cylinder covering the caps.
            Shape::Capsule {
                radius,
                half_height,
            } => cylinder_inertia(mass, *radius, 2.0 * (half_height + radius)),
            Shape::Plane { .. } | Shape::TriangleMesh(_) => box_inertia(mass, &self.size()),
        };
        Mat3::from_diagonal(&diag)
    }
}

/// Stand-in bounds for a plane: thin along a dominant normal axis, huge elsewhere.
fn plane_slab(normal: &Vec3, offset: f32) -> Aabb {
    let mut half = Vec3::repeat(PLANE_EXTENT);
    let mut center = Vec3::zeros();
    let axis = normal.iamax();
    if normal[axis].abs() > 1.0 - 1.0e-4 {
        half[axis] = PLANE_HALF_THICKNESS;
        // Slab sits just below the surface so touching bodies still overlap.
        center[axis] = offset * normal[axis].signum() - PLANE_HALF_THICKNESS * 0.5 * normal[axis].signum();
    }
    Aabb::from_center_half_extents(center, half)
}

fn box_inertia(mass: f32, size: &Vec3) -> Vec3 {
    let (w2, h2, d2) = (size.x * size.x, size.y * size.y, size.z * size.z);
    Vec3::new(h2 + d2, w2 + d2, w2 + h2) * (mass / 12.0)
}

fn cylinder_inertia(mass: f32, radius: f32, height: f32) -> Vec3 {
    let side = mass * (3.0 * radius * radius + height * height) / 12.0;
    Vec3::new(side, 0.5 * mass * radius * radius, side)
}

/// Invert a diagonal inertia tensor, mapping near-zero entries to zero.
pub fn invert_diagonal(tensor: &Mat3) -> Mat3 {
    let d = tensor.diagonal();
    Mat3::from_diagonal(&d.map(|v| if v.abs() > EPSILON { 1.0 / v } else { 0.0 }))
}
