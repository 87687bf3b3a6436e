/*!
Collision pipeline.

The submodules run in order each step:

- broad:         spatial hash grid producing candidate body pairs from AABBs
- narrow_phase:  exact per-pair tests dispatched on the two shape types
- gjk / epa:     generic convex fallback (intersection, then penetration)
- manifold:      contact points, normal/tangent basis and point reduction
- contact_cache: per-pair manifolds kept across frames for warm starting
*/

pub mod broad;
pub mod contact_cache;
pub mod epa;
pub mod gjk;
pub mod manifold;
pub mod narrow_phase;

pub use broad::{Algorithm, BroadPhase, BroadPhaseConfig, SpatialHashGrid};
pub use contact_cache::{ContactCache, ContactCacheConfig};
pub use manifold::{ContactManifold, ContactPoint};
pub use narrow_phase::{NarrowPhaseConfig, NarrowPhaseDetector};

use crate::body::BodyHandle;

/// Unordered pair of bodies: `BodyPair::new(a, b) == BodyPair::new(b, a)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyPair {
    first: BodyHandle,
    second: BodyHandle,
}

impl BodyPair {
    #[inline]
    pub fn new(a: BodyHandle, b: BodyHandle) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// The smaller handle. Also body A of the pair's manifold.
    #[inline]
    pub fn first(&self) -> BodyHandle {
        self.first
    }

    /// The larger handle. Also body B of the pair's manifold.
    #[inline]
    pub fn second(&self) -> BodyHandle {
        self.second
    }

    #[inline]
    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.first == handle || self.second == handle
    }

    /// The other member of the pair, if `handle` is a member.
    #[inline]
    pub fn other(&self, handle: BodyHandle) -> Option<BodyHandle> {
        if self.first == handle {
            Some(self.second)
        } else if self.second == handle {
            Some(self.first)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pair_is_symmetric() {
        for a in 0..6 {
            for b in 0..6 {
                let (ha, hb) = (BodyHandle(a), BodyHandle(b));
                assert_eq!(BodyPair::new(ha, hb), BodyPair::new(hb, ha));
                let p = BodyPair::new(ha, hb);
                assert!(p.first() <= p.second());
            }
        }
    }

    #[test]
    fn pair_hashes_symmetrically() {
        let mut set = HashSet::new();
        set.insert(BodyPair::new(BodyHandle(7), BodyHandle(2)));
        assert!(set.contains(&BodyPair::new(BodyHandle(2), BodyHandle(7))));
    }

    #[test]
    fn other_member() {
        let p = BodyPair::new(BodyHandle(4), BodyHandle(1));
        assert_eq!(p.other(BodyHandle(1)), Some(BodyHandle(4)));
        assert_eq!(p.other(BodyHandle(4)), Some(BodyHandle(1)));
        assert_eq!(p.other(BodyHandle(9)), None);
        assert!(p.contains(BodyHandle(4)) && !p.contains(BodyHandle(9)));
    }
}
