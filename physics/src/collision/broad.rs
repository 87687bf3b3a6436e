use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::body::{BodyHandle, RigidBody};
use crate::collision::BodyPair;
use crate::math::{Aabb, Vec3};
use crate::settings::{DEFAULT_CELL_SIZE, MAX_CELLS_PER_BODY, MIN_CELL_SIZE};
use crate::shape::Shape;

/// Pair generation strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Uniform spatial hash grid.
    #[default]
    SpatialHash,
    /// Test every bounded entry against every other one.
    BruteForce,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadPhaseConfig {
    pub algorithm: Algorithm,
    /// Grid cell edge length; clamped to at least `MIN_CELL_SIZE`.
    pub cell_size: f32,
    /// Bodies covering more cells than this skip the grid.
    pub max_cells_per_body: usize,
}

impl Default for BroadPhaseConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::SpatialHash,
            cell_size: DEFAULT_CELL_SIZE,
            max_cells_per_body: MAX_CELLS_PER_BODY,
        }
    }
}

/// Bits per packed cell coordinate.
const CELL_BITS: u32 = 21;
const CELL_MASK: i64 = (1 << CELL_BITS) - 1;
const CELL_COORD_MIN: i64 = -(1 << (CELL_BITS - 1));
const CELL_COORD_MAX: i64 = (1 << (CELL_BITS - 1)) - 1;

/// Pack three cell coordinates into one key: `x << 42 | y << 21 | z`, each
/// coordinate clamped into the signed 21-bit range.
#[inline]
pub fn cell_key(x: i64, y: i64, z: i64) -> i64 {
    let pack = |c: i64| c.clamp(CELL_COORD_MIN, CELL_COORD_MAX) & CELL_MASK;
    (pack(x) << (2 * CELL_BITS)) | (pack(y) << CELL_BITS) | pack(z)
}

/// Uniform grid of hash cells, each listing the entries overlapping it.
#[derive(Clone, Debug)]
pub struct SpatialHashGrid {
    cell_size: f32,
    inv_cell_size: f32,
    cells: HashMap<i64, Vec<usize>>,
}

impl SpatialHashGrid {
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() {
            cell_size.max(MIN_CELL_SIZE)
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::new(),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Number of non-empty cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Cell coordinates containing world point `p`.
    #[inline]
    pub fn cell_coords(&self, p: &Vec3) -> [i64; 3] {
        [
            (p.x * self.inv_cell_size).floor() as i64,
            (p.y * self.inv_cell_size).floor() as i64,
            (p.z * self.inv_cell_size).floor() as i64,
        ]
    }

    /// Number of cells `aabb` covers.
    pub fn cells_spanned(&self, aabb: &Aabb) -> usize {
        let lo = self.cell_coords(&aabb.min);
        let hi = self.cell_coords(&aabb.max);
        (0..3)
            .map(|i| (hi[i] - lo[i] + 1).max(0) as usize)
            .fold(1usize, |acc, n| acc.saturating_mul(n))
    }

    /// Insert `entry` into every cell `aabb` covers.
    pub fn insert(&mut self, entry: usize, aabb: &Aabb) {
        let lo = self.cell_coords(&aabb.min);
        let hi = self.cell_coords(&aabb.max);
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    self.cells.entry(cell_key(x, y, z)).or_default().push(entry);
                }
            }
        }
    }

    /// Entry lists of all occupied cells.
    pub fn cells(&self) -> impl Iterator<Item = &[usize]> {
        self.cells.values().map(Vec::as_slice)
    }
}

#[derive(Clone, Copy, Debug)]
enum Extent {
    Bounded,
    /// World-space half-space `normal · x <= offset`.
    HalfSpace { normal: Vec3, offset: f32 },
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    handle: BodyHandle,
    aabb: Aabb,
    is_static: bool,
    extent: Extent,
}

impl Entry {
    fn overlaps(&self, other: &Entry) -> bool {
        match (self.extent, other.extent) {
            (Extent::Bounded, Extent::Bounded) => self.aabb.intersects(&other.aabb),
            (Extent::HalfSpace { normal, offset }, Extent::Bounded) => {
                aabb_below_plane(&other.aabb, &normal, offset)
            }
            (Extent::Bounded, Extent::HalfSpace { normal, offset }) => {
                aabb_below_plane(&self.aabb, &normal, offset)
            }
            (Extent::HalfSpace { .. }, Extent::HalfSpace { .. }) => false,
        }
    }
}

/// True when some part of `aabb` lies in the half-space `normal · x <= offset`.
#[inline]
fn aabb_below_plane(aabb: &Aabb, normal: &Vec3, offset: f32) -> bool {
    let h = aabb.half_extents();
    let reach = normal.x.abs() * h.x + normal.y.abs() * h.y + normal.z.abs() * h.z;
    normal.dot(&aabb.center()) - reach <= offset
}

/// Candidate pair generator over body AABBs.
///
/// Notes:
/// - Planes are kept out of the grid because they are infinite and are tested
///   against every bounded entry with an exact AABB/half-space check.
/// - Entries covering more than `max_cells_per_body` cells are kept in an
///   oversized list and tested directly against all bounded entries.
/// - Each body gets a monotonically increasing id the first time it is seen;
///   switching algorithms keeps the ids.
/// - Pairs come out sorted, so identical input gives identical output.
#[derive(Clone, Debug)]
pub struct BroadPhase {
    config: BroadPhaseConfig,
    grid: SpatialHashGrid,
    ids: HashMap<BodyHandle, u32>,
    next_id: u32,
    entries: Vec<Entry>,
    bounded: Vec<usize>,
    unbounded: Vec<usize>,
    oversized: Vec<usize>,
    pairs: Vec<BodyPair>,
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new(BroadPhaseConfig::default())
    }
}

impl BroadPhase {
    pub fn new(config: BroadPhaseConfig) -> Self {
        let grid = SpatialHashGrid::new(config.cell_size);
        Self {
            config: BroadPhaseConfig {
                cell_size: grid.cell_size(),
                ..config
            },
            grid,
            ids: HashMap::new(),
            next_id: 0,
            entries: Vec::new(),
            bounded: Vec::new(),
            unbounded: Vec::new(),
            oversized: Vec::new(),
            pairs: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &BroadPhaseConfig {
        &self.config
    }

    #[inline]
    pub fn algorithm(&self) -> Algorithm {
        self.config.algorithm
    }

    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        log::debug!("broad phase algorithm: {:?}", algorithm);
        self.config.algorithm = algorithm;
    }

    /// Change the cell size (clamped) and rebuild the grid.
    pub fn set_cell_size(&mut self, cell_size: f32) {
        self.grid = SpatialHashGrid::new(cell_size);
        self.config.cell_size = self.grid.cell_size();
        self.rebuild_grid();
    }

    #[inline]
    pub fn grid(&self) -> &SpatialHashGrid {
        &self.grid
    }

    /// Broad-phase id of a body, if it has been seen.
    #[inline]
    pub fn id_of(&self, handle: BodyHandle) -> Option<u32> {
        self.ids.get(&handle).copied()
    }

    fn ensure_id(&mut self, handle: BodyHandle) -> u32 {
        let next = &mut self.next_id;
        *self.ids.entry(handle).or_insert_with(|| {
            let id = *next;
            *next += 1;
            id
        })
    }

    /// Number of bodies inserted by the last update.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.entries.iter().any(|e| e.handle == handle)
    }

    /// Clear and re-insert every body.
    pub fn update<'a, I>(&mut self, bodies: I)
    where
        I: IntoIterator<Item = &'a RigidBody>,
    {
        self.entries.clear();
        for body in bodies {
            let pose = body.pose();
            let extent = match body.shape().as_ref() {
                Shape::Plane { normal, offset } => {
                    let n = pose.rotation * normal;
                    let point = pose.rotation * (normal * *offset) + pose.translation.vector;
                    Extent::HalfSpace {
                        normal: n,
                        offset: n.dot(&point),
                    }
                }
                _ => Extent::Bounded,
            };
            let aabb = body.aabb();
            if !aabb.is_finite() {
                log::warn!("body {:?} has non-finite bounds, skipped", body.handle());
                continue;
            }
            self.ensure_id(body.handle());
            self.entries.push(Entry {
                handle: body.handle(),
                aabb,
                is_static: body.is_static(),
                extent,
            });
        }
        self.rebuild_grid();
    }

    fn rebuild_grid(&mut self) {
        self.grid.clear();
        self.bounded.clear();
        self.unbounded.clear();
        self.oversized.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            match entry.extent {
                Extent::HalfSpace { .. } => self.unbounded.push(i),
                Extent::Bounded => {
                    self.bounded.push(i);
                    if self.grid.cells_spanned(&entry.aabb) > self.config.max_cells_per_body {
                        self.oversized.push(i);
                    } else {
                        self.grid.insert(i, &entry.aabb);
                    }
                }
            }
        }
    }

    /// Drop a body's id mapping and every trace of it in the grid.
    pub fn remove(&mut self, handle: BodyHandle) -> bool {
        let known = self.ids.remove(&handle).is_some();
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        if self.entries.len() != before {
            self.rebuild_grid();
        }
        self.pairs.retain(|p| !p.contains(handle));
        known
    }

    /// Unique, overlapping candidate pairs for the current entries.
    pub fn potential_pairs(&mut self) -> &[BodyPair] {
        let mut seen: HashSet<BodyPair> = HashSet::new();
        let mut pairs = Vec::new();
        let entries = &self.entries;
        let mut consider = |i: usize, j: usize| {
            if i == j {
                return;
            }
            let (a, b) = (&entries[i], &entries[j]);
            if a.is_static && b.is_static {
                return;
            }
            let pair = BodyPair::new(a.handle, b.handle);
            if seen.insert(pair) && a.overlaps(b) {
                pairs.push(pair);
            }
        };

        match self.config.algorithm {
            Algorithm::SpatialHash => {
                for cell in self.grid.cells() {
                    for (n, &i) in cell.iter().enumerate() {
                        for &j in &cell[n + 1..] {
                            consider(i, j);
                        }
                    }
                }
                for &i in &self.oversized {
                    for &j in &self.bounded {
                        consider(i, j);
                    }
                }
            }
            Algorithm::BruteForce => {
                for (n, &i) in self.bounded.iter().enumerate() {
                    for &j in &self.bounded[n + 1..] {
                        consider(i, j);
                    }
                }
            }
        }
        for &i in &self.unbounded {
            for &j in &self.bounded {
                consider(i, j);
            }
        }

        pairs.sort_unstable();
        self.pairs = pairs;
        &self.pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodyDesc, BodyType};
    use std::sync::Arc;

    fn body(id: u32, ty: BodyType, shape: Shape, at: Vec3) -> RigidBody {
        RigidBody::new(
            BodyHandle(id),
            BodyDesc::new(ty, Arc::new(shape)).with_position(at),
            1000.0,
        )
    }

    fn ball(id: u32, at: Vec3) -> RigidBody {
        body(id, BodyType::Dynamic, Shape::sphere(0.5).unwrap(), at)
    }

    fn pairs_of(bp: &mut BroadPhase, bodies: &[RigidBody]) -> Vec<BodyPair> {
        bp.update(bodies);
        bp.potential_pairs().to_vec()
    }

    #[test]
    fn cell_size_is_clamped() {
        assert_eq!(SpatialHashGrid::new(0.0).cell_size(), MIN_CELL_SIZE);
        assert_eq!(SpatialHashGrid::new(f32::NAN).cell_size(), DEFAULT_CELL_SIZE);
        assert_eq!(SpatialHashGrid::new(2.0).cell_size(), 2.0);
    }

    #[test]
    fn cell_keys_are_distinct_for_neighbors() {
        let mut keys = HashSet::new();
        for x in -2..=2 {
            for y in -2..=2 {
                for z in -2..=2 {
                    assert!(keys.insert(cell_key(x, y, z)));
                }
            }
        }
    }

    #[test]
    fn overlapping_bodies_pair_and_distant_ones_do_not() {
        let mut bp = BroadPhase::default();
        let bodies = [
            ball(0, Vec3::new(0.0, 0.0, 0.0)),
            ball(1, Vec3::new(0.8, 0.0, 0.0)),
            ball(2, Vec3::new(30.0, 0.0, 0.0)),
        ];
        let pairs = pairs_of(&mut bp, &bodies);
        assert_eq!(pairs, vec![BodyPair::new(BodyHandle(0), BodyHandle(1))]);
    }

    #[test]
    fn shared_cell_without_overlap_is_rejected() {
        let mut bp = BroadPhase::default();
        // Both in cell (0,0,0) of a 5 m grid, 3 m apart.
        let bodies = [ball(0, Vec3::new(1.0, 1.0, 1.0)), ball(1, Vec3::new(4.0, 1.0, 1.0))];
        assert!(pairs_of(&mut bp, &bodies).is_empty());
    }

    #[test]
    fn pair_spanning_many_cells_is_reported_once() {
        let mut bp = BroadPhase::new(BroadPhaseConfig {
            cell_size: 0.25,
            ..Default::default()
        });
        let bodies = [ball(0, Vec3::zeros()), ball(1, Vec3::new(0.5, 0.2, 0.0))];
        assert_eq!(pairs_of(&mut bp, &bodies).len(), 1);
    }

    #[test]
    fn static_pairs_are_skipped() {
        let mut bp = BroadPhase::default();
        let bodies = [
            body(0, BodyType::Static, Shape::sphere(1.0).unwrap(), Vec3::zeros()),
            body(1, BodyType::Static, Shape::sphere(1.0).unwrap(), Vec3::new(0.5, 0.0, 0.0)),
            ball(2, Vec3::new(0.0, 0.5, 0.0)),
        ];
        let pairs = pairs_of(&mut bp, &bodies);
        assert!(!pairs.contains(&BodyPair::new(BodyHandle(0), BodyHandle(1))));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn plane_pairs_with_bodies_touching_its_solid_side() {
        let mut bp = BroadPhase::default();
        let bodies = [
            body(0, BodyType::Static, Shape::ground(), Vec3::zeros()),
            ball(1, Vec3::new(100.0, 0.4, -50.0)),
            ball(2, Vec3::new(0.0, 3.0, 0.0)),
        ];
        let pairs = pairs_of(&mut bp, &bodies);
        assert_eq!(pairs, vec![BodyPair::new(BodyHandle(0), BodyHandle(1))]);
    }

    #[test]
    fn oversized_bodies_are_still_paired() {
        let mut bp = BroadPhase::new(BroadPhaseConfig {
            cell_size: 0.5,
            max_cells_per_body: 8,
            ..Default::default()
        });
        let floor = body(
            0,
            BodyType::Static,
            Shape::cuboid(Vec3::new(50.0, 0.5, 50.0)).unwrap(),
            Vec3::new(0.0, -0.5, 0.0),
        );
        let bodies = [floor, ball(1, Vec3::new(20.0, 0.4, 20.0))];
        assert_eq!(pairs_of(&mut bp, &bodies).len(), 1);
    }

    #[test]
    fn brute_force_matches_spatial_hash_and_keeps_ids() {
        let bodies: Vec<RigidBody> = (0..40)
            .map(|i| {
                let f = i as f32;
                ball(i, Vec3::new((f * 0.7) % 6.0, (f * 1.3) % 4.0, (f * 0.9) % 5.0))
            })
            .collect();
        let mut bp = BroadPhase::default();
        let hashed = pairs_of(&mut bp, &bodies);
        let ids: Vec<_> = bodies.iter().map(|b| bp.id_of(b.handle())).collect();

        bp.set_algorithm(Algorithm::BruteForce);
        let brute = pairs_of(&mut bp, &bodies);
        assert_eq!(hashed, brute);
        assert!(!hashed.is_empty());

        let ids_after: Vec<_> = bodies.iter().map(|b| bp.id_of(b.handle())).collect();
        assert_eq!(ids, ids_after);
    }

    #[test]
    fn ids_are_monotonic_in_first_seen_order() {
        let mut bp = BroadPhase::default();
        bp.update(&[ball(9, Vec3::zeros()), ball(4, Vec3::new(10.0, 0.0, 0.0))]);
        assert_eq!(bp.id_of(BodyHandle(9)), Some(0));
        assert_eq!(bp.id_of(BodyHandle(4)), Some(1));
        bp.update(&[ball(4, Vec3::zeros()), ball(5, Vec3::zeros())]);
        assert_eq!(bp.id_of(BodyHandle(4)), Some(1));
        assert_eq!(bp.id_of(BodyHandle(5)), Some(2));
    }

    #[test]
    fn removed_body_leaves_no_pairs() {
        let mut bp = BroadPhase::default();
        let bodies = [ball(0, Vec3::zeros()), ball(1, Vec3::new(0.5, 0.0, 0.0))];
        assert_eq!(pairs_of(&mut bp, &bodies).len(), 1);
        assert!(bp.remove(BodyHandle(1)));
        assert!(bp.potential_pairs().is_empty());
        assert!(!bp.contains(BodyHandle(1)));
        assert_eq!(bp.id_of(BodyHandle(1)), None);
    }
}
