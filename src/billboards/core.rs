// src/billboards/core.rs
//! Core ids and collaborator traits for the billboard engine.
//! Keep this file dependency-light; everything else builds on it.

use bevy::prelude::*; // Entity, Vec3
use serde::{Deserialize, Serialize};

// ---------- Chunks ----------

/// Integer chunk coordinate in XZ. Must match the terrain tiling so that
/// window queries line up with terrain chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Floor-divide a world XZ position by `chunk_size`.
    #[inline]
    pub fn from_world(x: f32, z: f32, chunk_size: f32) -> Self {
        let size = chunk_size.max(f32::EPSILON);
        Self::new((x / size).floor() as i32, (z / size).floor() as i32)
    }

    /// Chebyshev distance in chunks (0 = same chunk, 1 = the 3x3 ring, ...).
    #[inline]
    pub fn ring_distance(self, other: ChunkKey) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

// ---------- Ids ----------

/// Index of a category in the registry (stable for the engine's lifetime).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryId(pub u16);

impl CategoryId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Caller-side identity of a placed object (usually the prop's entity).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerKey(pub u64);

impl From<Entity> for OwnerKey {
    fn from(e: Entity) -> Self {
        Self(e.to_bits())
    }
}

impl From<u64> for OwnerKey {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Generational index into the instance arena. A handle whose record was
/// removed never resolves again, even if the arena entry is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl InstanceHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// ---------- Collaborators ----------

/// Terrain height query (required).
pub trait HeightSampler: Send + Sync + 'static {
    /// Returns ground height (Y) at world XZ.
    fn sample_height(&self, x: f32, z: f32) -> f32;
}

/// Constant-height ground; the fallback when no terrain is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatGround {
    pub y: f32,
}

impl HeightSampler for FlatGround {
    fn sample_height(&self, _x: f32, _z: f32) -> f32 {
        self.y
    }
}

/// Adapts a plain function or closure into a [`HeightSampler`].
pub struct HeightFn<F>(pub F);

impl<F> HeightSampler for HeightFn<F>
where
    F: Fn(f32, f32) -> f32 + Send + Sync + 'static,
{
    fn sample_height(&self, x: f32, z: f32) -> f32 {
        (self.0)(x, z)
    }
}

/// Squared distance in the horizontal (XZ) plane.
#[inline]
pub fn horizontal_distance_sq(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_floors_negative_coordinates() {
        assert_eq!(ChunkKey::from_world(0.0, 0.0, 64.0), ChunkKey::new(0, 0));
        assert_eq!(ChunkKey::from_world(63.9, 64.0, 64.0), ChunkKey::new(0, 1));
        assert_eq!(ChunkKey::from_world(-0.1, -64.0, 64.0), ChunkKey::new(-1, -1));
        assert_eq!(ChunkKey::from_world(-64.1, 10.0, 64.0), ChunkKey::new(-2, 0));
    }

    #[test]
    fn ring_distance_is_chebyshev() {
        let c = ChunkKey::new(3, -2);
        assert_eq!(c.ring_distance(c), 0);
        assert_eq!(c.ring_distance(ChunkKey::new(4, -1)), 1);
        assert_eq!(c.ring_distance(ChunkKey::new(1, -2)), 2);
        assert_eq!(c.ring_distance(ChunkKey::new(4, 1)), 3);
    }

    #[test]
    fn horizontal_distance_ignores_height() {
        let a = Vec3::new(3.0, 100.0, 0.0);
        let b = Vec3::new(0.0, -5.0, 4.0);
        assert_eq!(horizontal_distance_sq(a, b), 25.0);
    }

    #[test]
    fn height_fn_wraps_closures() {
        let h = HeightFn(|x: f32, z: f32| x + 2.0 * z);
        assert_eq!(h.sample_height(1.0, 2.0), 5.0);
        assert_eq!(FlatGround { y: 4.0 }.sample_height(9.0, 9.0), 4.0);
    }
}
