// src/billboards/buffer.rs
//! Per-category instance buffer (CPU side) with a pending-upload mask.
//!
//! Rows grow with the slot pool's high-water mark, so every slice exposed
//! here is already bounded to `0..active_count`.

use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

use bevy::prelude::*;

// ---------- Dirty mask ----------

/// Which parts of a category's buffers need uploading. Idempotent: marking
/// the same bit twice between flushes still yields one upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DirtyMask(pub u8);

impl DirtyMask {
    pub const NONE: Self = Self(0);
    pub const TRANSFORMS: Self = Self(1 << 0);
    pub const OPACITY: Self = Self(1 << 1);
    pub const HEIGHT_CORRECTION: Self = Self(1 << 2);
    pub const GEOMETRY: Self = Self(1 << 3);
    pub const PARAMS: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);

    /// Rows written by `write_instance` / `hide`.
    pub const ROW: Self = Self(Self::TRANSFORMS.0 | Self::OPACITY.0 | Self::HEIGHT_CORRECTION.0);

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
    pub fn any(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DirtyMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ---------- Rows & geometry ----------

/// One instance row as laid out for the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceTransform {
    pub position: [f32; 3],
    /// Uniform scale; 0 collapses the sprite (hidden row).
    pub scale: f32,
}

impl InstanceTransform {
    pub const HIDDEN: Self = Self { position: [0.0; 3], scale: 0.0 };

    pub fn at(position: Vec3) -> Self {
        Self { position: position.to_array(), scale: 1.0 }
    }

    pub fn is_hidden(&self) -> bool {
        self.scale == 0.0
    }
}

/// Sprite dimensions shared by every instance of a category.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BillboardGeometry {
    pub width: f32,
    pub height: f32,
    pub vertical_offset: f32,
}

impl BillboardGeometry {
    /// Two crossed quads (X-aligned then Z-aligned), 4 corners each, in
    /// local space with the base at `vertical_offset`.
    pub fn local_vertices(&self) -> [Vec3; 8] {
        let hw = self.width * 0.5;
        let y0 = self.vertical_offset;
        let y1 = self.vertical_offset + self.height;
        [
            Vec3::new(-hw, y0, 0.0),
            Vec3::new(hw, y0, 0.0),
            Vec3::new(hw, y1, 0.0),
            Vec3::new(-hw, y1, 0.0),
            Vec3::new(0.0, y0, -hw),
            Vec3::new(0.0, y0, hw),
            Vec3::new(0.0, y1, hw),
            Vec3::new(0.0, y1, -hw),
        ]
    }
}

/// Named scalar material parameters (alpha cutoff, brightness, ...).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderParams(BTreeMap<String, f32>);

impl ShaderParams {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }
    pub fn set(&mut self, name: &str, value: f32) {
        self.0.insert(name.to_string(), value);
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

// ---------- Buffer ----------

/// Owned instance data of one category. All writes go through methods that
/// also mark the matching dirty bits.
#[derive(Clone, Debug)]
pub struct InstanceBuffer {
    geometry: BillboardGeometry,
    capacity: u32,
    transforms: Vec<InstanceTransform>,
    opacity: Vec<f32>,
    height_correction: Vec<f32>,
    params: ShaderParams,
    dirty: DirtyMask,
}

impl InstanceBuffer {
    pub fn new(geometry: BillboardGeometry, capacity: u32) -> Self {
        Self {
            geometry,
            capacity,
            transforms: Vec::new(),
            opacity: Vec::new(),
            height_correction: Vec::new(),
            params: ShaderParams::default(),
            // A fresh buffer has never been uploaded.
            dirty: DirtyMask::GEOMETRY,
        }
    }

    /// Same per-slot data under new geometry. The result counts as a fresh
    /// GPU buffer, so everything is pending.
    pub fn rebuilt(&self, geometry: BillboardGeometry) -> Self {
        Self {
            geometry,
            capacity: self.capacity,
            transforms: self.transforms.clone(),
            opacity: self.opacity.clone(),
            height_correction: self.height_correction.clone(),
            params: self.params.clone(),
            dirty: DirtyMask::ALL,
        }
    }

    fn ensure_row(&mut self, slot: u32) {
        debug_assert!(slot < self.capacity, "slot {slot} beyond capacity {}", self.capacity);
        let needed = slot as usize + 1;
        if self.transforms.len() < needed {
            self.transforms.resize(needed, InstanceTransform::HIDDEN);
            self.opacity.resize(needed, 1.0);
            self.height_correction.resize(needed, 0.0);
        }
    }

    /// Fill a freshly allocated slot.
    pub fn write_instance(&mut self, slot: u32, transform: InstanceTransform, opacity: f32, correction: f32) {
        self.ensure_row(slot);
        let i = slot as usize;
        self.transforms[i] = transform;
        self.opacity[i] = opacity.clamp(0.0, 1.0);
        self.height_correction[i] = correction;
        self.dirty |= DirtyMask::ROW;
    }

    /// Reset a freed slot to the hidden row. The row stays in the buffer.
    pub fn hide(&mut self, slot: u32) {
        let i = slot as usize;
        if i >= self.transforms.len() {
            return;
        }
        self.transforms[i] = InstanceTransform::HIDDEN;
        self.opacity[i] = 1.0;
        self.height_correction[i] = 0.0;
        self.dirty |= DirtyMask::ROW;
    }

    pub fn set_opacity(&mut self, slot: u32, value: f32) {
        if let Some(o) = self.opacity.get_mut(slot as usize) {
            *o = value.clamp(0.0, 1.0);
            self.dirty |= DirtyMask::OPACITY;
        }
    }

    pub fn set_param(&mut self, name: &str, value: f32) {
        self.params.set(name, value);
        self.dirty |= DirtyMask::PARAMS;
    }

    pub fn opacity(&self, slot: u32) -> Option<f32> {
        self.opacity.get(slot as usize).copied()
    }

    pub fn transform(&self, slot: u32) -> Option<InstanceTransform> {
        self.transforms.get(slot as usize).copied()
    }

    pub fn height_correction(&self, slot: u32) -> Option<f32> {
        self.height_correction.get(slot as usize).copied()
    }

    pub fn transforms(&self) -> &[InstanceTransform] {
        &self.transforms
    }

    pub fn opacities(&self) -> &[f32] {
        &self.opacity
    }

    pub fn height_corrections(&self) -> &[f32] {
        &self.height_correction
    }

    pub fn params(&self) -> &ShaderParams {
        &self.params
    }

    pub fn geometry(&self) -> BillboardGeometry {
        self.geometry
    }

    /// Rows that exist (== the pool's high-water mark).
    pub fn rows(&self) -> usize {
        self.transforms.len()
    }

    pub fn dirty(&self) -> DirtyMask {
        self.dirty
    }

    /// Force a re-upload of `mask` without touching the data.
    pub(crate) fn mark_dirty(&mut self, mask: DirtyMask) {
        self.dirty |= mask;
    }

    pub(crate) fn take_dirty(&mut self) -> DirtyMask {
        std::mem::take(&mut self.dirty)
    }
}
