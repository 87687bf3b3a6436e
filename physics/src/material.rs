//! Surface materials and the registry bodies resolve them through.
//!
//! A body stores a [`MaterialId`]; the world owns one [`MaterialRegistry`]
//! and combines the two materials of a contact pair when a manifold is
//! refreshed. The registry comes pre-populated with common presets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, Result};

/// Rule used to merge one coefficient from two materials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombineMode {
    #[default]
    Average,
    Minimum,
    Maximum,
    Multiply,
}

impl CombineMode {
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            CombineMode::Average => (a + b) * 0.5,
            CombineMode::Minimum => a.min(b),
            CombineMode::Maximum => a.max(b),
            CombineMode::Multiply => a * b,
        }
    }

    /// Mode used when two materials disagree. Minimum wins over everything,
    /// then Maximum, then Multiply; the result is independent of pair order.
    #[inline]
    pub fn resolve(a: CombineMode, b: CombineMode) -> CombineMode {
        use CombineMode::*;
        match (a, b) {
            (Minimum, _) | (_, Minimum) => Minimum,
            (Maximum, _) | (_, Maximum) => Maximum,
            (Multiply, _) | (_, Multiply) => Multiply,
            _ => Average,
        }
    }
}

/// Identifier of a material inside a [`MaterialRegistry`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

impl MaterialId {
    /// The "Default" preset, always registered first.
    pub const DEFAULT: MaterialId = MaterialId(0);
}

/// Physical surface and bulk properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// kg/m³, used to derive mass from shape volume.
    pub density: f32,
    pub restitution: f32,
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution_combine: CombineMode,
    pub friction_combine: CombineMode,
}

impl Material {
    pub fn new(
        name: impl Into<String>,
        density: f32,
        restitution: f32,
        static_friction: f32,
        dynamic_friction: f32,
    ) -> Self {
        Self {
            name: name.into(),
            density,
            restitution,
            static_friction,
            dynamic_friction,
            restitution_combine: CombineMode::Average,
            friction_combine: CombineMode::Average,
        }
    }

    pub fn with_restitution_combine(mut self, mode: CombineMode) -> Self {
        self.restitution_combine = mode;
        self
    }

    pub fn with_friction_combine(mut self, mode: CombineMode) -> Self {
        self.friction_combine = mode;
        self
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            ("material.density", self.density, self.density > 0.0),
            ("material.restitution", self.restitution, (0.0..=1.0).contains(&self.restitution)),
            ("material.static_friction", self.static_friction, self.static_friction >= 0.0),
            ("material.dynamic_friction", self.dynamic_friction, self.dynamic_friction >= 0.0),
        ];
        for (field, value, ok) in checks {
            if !(ok && value.is_finite()) {
                return Err(PhysicsError::InvalidConfig {
                    field,
                    reason: format!("{value} is out of range"),
                });
            }
        }
        Ok(())
    }
}

impl Default for Material {
    fn default() -> Self {
        Material::new("Default", 1000.0, 0.3, 0.6, 0.4)
    }
}

/// Coefficients for one contact pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CombinedMaterial {
    pub restitution: f32,
    pub static_friction: f32,
    pub dynamic_friction: f32,
}

impl CombinedMaterial {
    pub fn between(a: &Material, b: &Material) -> Self {
        let restitution_mode = CombineMode::resolve(a.restitution_combine, b.restitution_combine);
        let friction_mode = CombineMode::resolve(a.friction_combine, b.friction_combine);
        Self {
            restitution: restitution_mode.apply(a.restitution, b.restitution),
            static_friction: friction_mode.apply(a.static_friction, b.static_friction),
            dynamic_friction: friction_mode.apply(a.dynamic_friction, b.dynamic_friction),
        }
    }
}

impl Default for CombinedMaterial {
    fn default() -> Self {
        let m = Material::default();
        CombinedMaterial::between(&m, &m)
    }
}

/// Named material table owned by a world.
#[derive(Clone, Debug)]
pub struct MaterialRegistry {
    materials: Vec<Material>,
    by_name: HashMap<String, MaterialId>,
}

impl MaterialRegistry {
    /// Registry holding only the "Default" material.
    pub fn empty() -> Self {
        let default = Material::default();
        let mut by_name = HashMap::new();
        by_name.insert(default.name.clone(), MaterialId::DEFAULT);
        Self {
            materials: vec![default],
            by_name,
        }
    }

    /// Registry with the built-in presets.
    pub fn with_presets() -> Self {
        let mut registry = Self::empty();
        for material in presets() {
            // Preset names are unique and values are in range.
            if let Err(e) = registry.register(material) {
                log::warn!("skipping material preset: {e}");
            }
        }
        registry
    }

    /// Add a material. Names must be unique.
    pub fn register(&mut self, material: Material) -> Result<MaterialId> {
        material.validate()?;
        if self.by_name.contains_key(&material.name) {
            return Err(PhysicsError::DuplicateMaterial(material.name));
        }
        let id = MaterialId(self.materials.len() as u32);
        log::debug!("registered material {} as {:?}", material.name, id);
        self.by_name.insert(material.name.clone(), id);
        self.materials.push(material);
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0 as usize)
    }

    /// Look up a material, falling back to "Default" for unknown ids.
    #[inline]
    pub fn get_or_default(&self, id: MaterialId) -> &Material {
        self.get(id).unwrap_or(&self.materials[0])
    }

    pub fn id_of(&self, name: &str) -> Result<MaterialId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| PhysicsError::UnknownMaterial(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.materials.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Combined coefficients for a contact between `a` and `b`.
    pub fn combine(&self, a: MaterialId, b: MaterialId) -> CombinedMaterial {
        CombinedMaterial::between(self.get_or_default(a), self.get_or_default(b))
    }
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::with_presets()
    }
}

/// Built-in presets: (name, density, restitution, static friction, dynamic friction).
fn presets() -> Vec<Material> {
    let table: [(&str, f32, f32, f32, f32); 13] = [
        ("Steel", 7850.0, 0.2, 0.8, 0.6),
        ("Aluminum", 2700.0, 0.25, 0.7, 0.5),
        ("Iron", 7870.0, 0.15, 0.9, 0.7),
        ("Wood", 600.0, 0.4, 0.5, 0.3),
        ("Rubber", 1200.0, 0.9, 1.2, 0.8),
        ("Plastic", 950.0, 0.3, 0.4, 0.3),
        ("Concrete", 2400.0, 0.1, 0.8, 0.6),
        ("Stone", 2700.0, 0.05, 0.9, 0.7),
        ("Glass", 2500.0, 0.05, 0.6, 0.4),
        ("Ice", 917.0, 0.02, 0.1, 0.05),
        ("Mud", 1800.0, 0.0, 0.8, 0.9),
        ("Sand", 1600.0, 0.1, 0.7, 0.5),
        ("Metal", 7800.0, 0.2, 0.7, 0.5),
    ];
    table
        .into_iter()
        .map(|(name, density, e, fs, fd)| {
            let m = Material::new(name, density, e, fs, fd);
            match name {
                "Ice" => m.with_friction_combine(CombineMode::Minimum),
                "Rubber" => m
                    .with_restitution_combine(CombineMode::Maximum)
                    .with_friction_combine(CombineMode::Maximum),
                _ => m,
            }
        })
        .collect()
}
