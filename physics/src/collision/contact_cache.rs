//! Persistent contact manifolds keyed by body pair.
//!
//! Manifolds survive across steps so accumulated impulses can seed the next
//! solve. A manifold that the narrow phase stops confirming is kept for
//! `max_lifetime` seconds, then purged.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::body::BodyHandle;
use crate::collision::BodyPair;
use crate::collision::manifold::{ContactManifold, ContactPoint};
use crate::material::CombinedMaterial;
use crate::settings::{CONTACT_MATCH_DISTANCE, MANIFOLD_MAX_LIFETIME, WARM_START_RETENTION};
use crate::shape::Shape;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactCacheConfig {
    /// Seconds an unconfirmed manifold is kept.
    pub max_lifetime: f32,
    /// Fraction of last step's impulses carried into a matched point.
    pub warm_start_retention: f32,
    /// Fallback match radius when contact ids differ.
    pub match_distance: f32,
}

impl Default for ContactCacheConfig {
    fn default() -> Self {
        Self {
            max_lifetime: MANIFOLD_MAX_LIFETIME,
            warm_start_retention: WARM_START_RETENTION,
            match_distance: CONTACT_MATCH_DISTANCE,
        }
    }
}

/// Ordered map from body pair to its manifold; iteration order is stable.
#[derive(Clone, Debug, Default)]
pub struct ContactCache {
    config: ContactCacheConfig,
    manifolds: BTreeMap<BodyPair, ContactManifold>,
}

impl ContactCache {
    pub fn new(config: ContactCacheConfig) -> Self {
        Self {
            config,
            manifolds: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &ContactCacheConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ContactCacheConfig) {
        self.config = config;
    }

    /// Existing manifold for `pair` (lifetime reset, marked active) or a new one.
    pub fn get_or_create_manifold(&mut self, pair: BodyPair) -> &mut ContactManifold {
        let m = self
            .manifolds
            .entry(pair)
            .or_insert_with(|| ContactManifold::for_pair(pair));
        m.lifetime = 0.0;
        m.active = true;
        m
    }

    /// Age every manifold by `dt`, purge the stale ones and mark the rest
    /// inactive until the narrow phase confirms them again. Points of a
    /// manifold the last step did not confirm are dropped, so impulses only
    /// carry over between consecutive steps.
    pub fn update(&mut self, dt: f32) {
        let max_lifetime = self.config.max_lifetime;
        let before = self.manifolds.len();
        self.manifolds.retain(|_, m| {
            m.lifetime += dt;
            if !m.active && m.lifetime > max_lifetime {
                return false;
            }
            // Unconfirmed last step: nothing left to warm start from.
            if !m.active {
                m.clear_points();
            }
            m.was_colliding = m.active;
            m.active = false;
            true
        });
        let purged = before - self.manifolds.len();
        if purged > 0 {
            log::trace!("contact cache purged {purged} stale manifolds");
        }
    }

    /// Store this step's contact for `pair`.
    ///
    /// `fresh` must have its normal pointing from `pair.first()` toward
    /// `pair.second()`. Each new point inherits the impulses of the previous
    /// point with the same id, or of the nearest one within `match_distance`,
    /// scaled by `warm_start_retention`.
    pub fn refresh(
        &mut self,
        pair: BodyPair,
        fresh: ContactManifold,
        material: CombinedMaterial,
        shapes: [Arc<Shape>; 2],
    ) -> &ContactManifold {
        let ContactCacheConfig {
            warm_start_retention: retention,
            match_distance,
            ..
        } = self.config;
        let m = self.get_or_create_manifold(pair);

        let points: Vec<ContactPoint> = fresh
            .points()
            .iter()
            .map(|&p| {
                let mut p = p;
                if let Some(old) = matching_point(m.points(), &p, match_distance) {
                    p.normal_impulse = old.normal_impulse * retention;
                    p.tangent_impulse = old.tangent_impulse.map(|t| t * retention);
                } else {
                    p.normal_impulse = 0.0;
                    p.tangent_impulse = [0.0; 2];
                }
                p
            })
            .collect();

        let [shape_a, shape_b] = shapes;
        m.set_normal(fresh.normal());
        m.replace_points(points);
        m.material = material;
        m.shape_a = Some(shape_a);
        m.shape_b = Some(shape_b);
        m
    }

    pub fn remove_manifold(&mut self, pair: BodyPair) -> Option<ContactManifold> {
        self.manifolds.remove(&pair)
    }

    /// Drop every manifold that references `body`; returns how many went.
    pub fn remove_manifolds(&mut self, body: BodyHandle) -> usize {
        let before = self.manifolds.len();
        self.manifolds.retain(|pair, _| !pair.contains(body));
        before - self.manifolds.len()
    }

    #[inline]
    pub fn get(&self, pair: BodyPair) -> Option<&ContactManifold> {
        self.manifolds.get(&pair)
    }

    #[inline]
    pub fn get_mut(&mut self, pair: BodyPair) -> Option<&mut ContactManifold> {
        self.manifolds.get_mut(&pair)
    }

    pub fn manifolds(&self) -> impl Iterator<Item = (&BodyPair, &ContactManifold)> {
        self.manifolds.iter()
    }

    /// Manifolds confirmed this step that carry at least one point.
    pub fn active_manifolds(&self) -> impl Iterator<Item = &ContactManifold> {
        self.manifolds
            .values()
            .filter(|m| m.active && m.has_contacts())
    }

    pub(crate) fn active_manifolds_mut(&mut self) -> impl Iterator<Item = &mut ContactManifold> {
        self.manifolds
            .values_mut()
            .filter(|m| m.active && m.has_contacts())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.manifolds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.manifolds.is_empty()
    }

    pub fn clear(&mut self) {
        self.manifolds.clear();
    }
}

fn matching_point<'a>(
    previous: &'a [ContactPoint],
    point: &ContactPoint,
    match_distance: f32,
) -> Option<&'a ContactPoint> {
    previous.iter().find(|old| old.id == point.id).or_else(|| {
        previous
            .iter()
            .map(|old| (old, (old.position - point.position).norm_squared()))
            .filter(|(_, d)| *d < match_distance * match_distance)
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(old, _)| old)
    })
}
