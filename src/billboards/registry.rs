// src/billboards/registry.rs
//! Data-driven billboard categories + loader.

use std::collections::HashMap;

use bevy::asset::{io::Reader, AssetLoader, LoadContext};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::buffer::BillboardGeometry;
use super::core::CategoryId;
use super::lod::LodProfile;

// ---------- Category definition (data form) ----------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryDef {
    /// Unique human-readable name (used for lookup), e.g. "pine".
    pub name: String,
    /// Sprite width in meters.
    pub width: f32,
    /// Sprite height in meters.
    pub height: f32,
    /// Lift of the sprite base above the instance position.
    #[serde(default)]
    pub vertical_offset: f32,
    /// Fixed number of instance slots.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub profile: LodProfile,
    /// Optional sprite texture (asset path).
    #[serde(default)]
    pub texture: Option<String>,
}

fn default_capacity() -> u32 {
    100_000
}

impl CategoryDef {
    pub fn new(name: impl Into<String>, width: f32, height: f32, capacity: u32, profile: LodProfile) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            vertical_offset: 0.0,
            capacity,
            profile,
            texture: None,
        }
    }

    pub fn geometry(&self) -> BillboardGeometry {
        BillboardGeometry {
            width: self.width,
            height: self.height,
            vertical_offset: self.vertical_offset,
        }
    }

    fn validate(&self) -> Result<(), CategoryTableError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        if !positive(self.width) || !positive(self.height) || !self.vertical_offset.is_finite() {
            return Err(CategoryTableError::InvalidDimensions {
                name: self.name.clone(),
                width: self.width,
                height: self.height,
            });
        }
        if self.capacity == 0 {
            return Err(CategoryTableError::ZeroCapacity { name: self.name.clone() });
        }
        self.profile.validate().map_err(|reason| CategoryTableError::InvalidProfile {
            name: self.name.clone(),
            reason,
        })
    }
}

// ---------- Table asset ----------

/// Ordered list of categories as authored; index = `CategoryId`.
#[derive(Asset, TypePath, Clone, Debug, Default)]
pub struct CategoryTable {
    pub categories: Vec<CategoryDef>,
}

impl CategoryTable {
    pub fn from_ron_bytes(bytes: &[u8]) -> Result<Self, CategoryTableError> {
        let categories: Vec<CategoryDef> =
            ron::de::from_bytes(bytes).map_err(|e| CategoryTableError::Ron(e.to_string()))?;
        let table = Self { categories };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), CategoryTableError> {
        if self.categories.len() > u16::MAX as usize {
            return Err(CategoryTableError::TooMany(self.categories.len()));
        }
        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(self.categories.len());
        for (i, def) in self.categories.iter().enumerate() {
            def.validate()?;
            if let Some(first) = seen.insert(def.name.as_str(), i) {
                return Err(CategoryTableError::DuplicateName {
                    name: def.name.clone(),
                    first,
                    second: i,
                });
            }
        }
        Ok(())
    }
}

// ---------- Public plugin piece: asset + loader ----------

#[derive(Default)]
pub struct CategoryTableLoader;

impl AssetLoader for CategoryTableLoader {
    type Asset = CategoryTable;
    type Settings = ();
    type Error = CategoryTableError;

    fn extensions(&self) -> &[&str] {
        &["billboards.ron"]
    }

    async fn load(
        &self,
        reader: &mut dyn Reader,
        _settings: &Self::Settings,
        _load_context: &mut LoadContext<'_>,
    ) -> Result<Self::Asset, Self::Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        CategoryTable::from_ron_bytes(&bytes)
    }
}

// ---------- Runtime registry ----------

/// Immutable name <-> id mapping built once from a validated table.
/// Iteration follows table order.
#[derive(Clone, Debug)]
pub struct CategoryRegistry {
    defs: Vec<CategoryDef>,
    name_to_id: HashMap<String, CategoryId>,
}

impl CategoryRegistry {
    pub fn from_table(table: &CategoryTable) -> Result<Self, CategoryTableError> {
        table.validate()?;
        let name_to_id = table
            .categories
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.clone(), CategoryId(i as u16)))
            .collect();
        Ok(Self { defs: table.categories.clone(), name_to_id })
    }

    pub fn id_of(&self, name: &str) -> Option<CategoryId> {
        self.name_to_id.get(name).copied()
    }

    pub fn get(&self, id: CategoryId) -> Option<&CategoryDef> {
        self.defs.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &CategoryDef)> {
        self.defs.iter().enumerate().map(|(i, d)| (CategoryId(i as u16), d))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ---------- Errors ----------

#[derive(thiserror::Error, Debug)]
pub enum CategoryTableError {
    #[error("I/O while reading category table: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(String),
    #[error("Duplicate category name '{name}' (first idx {first}, second idx {second})")]
    DuplicateName { name: String, first: usize, second: usize },
    #[error("Category '{name}' has invalid dimensions {width}x{height}")]
    InvalidDimensions { name: String, width: f32, height: f32 },
    #[error("Category '{name}' has zero capacity")]
    ZeroCapacity { name: String },
    #[error("Category '{name}' has an invalid LOD profile: {reason}")]
    InvalidProfile { name: String, reason: String },
    #[error("Too many categories ({0})")]
    TooMany(usize),
}
