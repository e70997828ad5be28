// src/billboards/engine.rs
//! The billboard engine: slot pools, chunk index, LOD pass and flush in one
//! explicitly constructed value. Single-threaded; the plugin owns it as a
//! resource and drives it in `Mutate -> Lod -> Flush` order.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use bevy::prelude::*;
use serde::Serialize;

use super::allocator::SlotPool;
use super::arena::{InstanceArena, InstanceRecord};
use super::buffer::{BillboardGeometry, DirtyMask, InstanceBuffer, InstanceTransform};
use super::core::{horizontal_distance_sq, CategoryId, ChunkKey, HeightSampler, InstanceHandle, OwnerKey};
use super::height_blend::CoarseHeightSampler;
use super::lod::{decide, target_opacity, FadeBand, LodDecision, LodProfile, LodTickStats};
use super::registry::{CategoryDef, CategoryRegistry};
use super::settings::BillboardSettings;
use super::spatial::ChunkIndex;
use super::sync::{BufferSink, CategoryView, FlushStats};

// ---------- Errors ----------

/// Why `add_instance` did not register anything. These are routine
/// (world generation at capacity, late network events) and never fatal.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddRejected {
    #[error("billboards are disabled")]
    Disabled,
    #[error("unknown billboard category '{0}'")]
    UnknownCategory(String),
    #[error("owner {0:?} already has a billboard")]
    AlreadyRegistered(OwnerKey),
    #[error("category '{category}' exhausted ({used}/{capacity} slots used)")]
    Exhausted { category: String, used: u32, capacity: u32 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("unknown billboard category '{0}'")]
    UnknownCategory(String),
    #[error("invalid value {value} for '{param}'")]
    InvalidValue { param: String, value: f32 },
}

// ---------- Parameters ----------

/// Runtime-tunable category parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CategoryParam {
    Width,
    Height,
    VerticalOffset,
    /// Anything else is forwarded to the material.
    Shader(String),
}

impl CategoryParam {
    /// Size-affecting parameters require a geometry rebuild.
    pub fn affects_geometry(&self) -> bool {
        !matches!(self, CategoryParam::Shader(_))
    }
}

impl FromStr for CategoryParam {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "width" => CategoryParam::Width,
            "height" => CategoryParam::Height,
            "vertical_offset" | "verticalOffset" => CategoryParam::VerticalOffset,
            other => CategoryParam::Shader(other.to_string()),
        })
    }
}

// ---------- Usage report ----------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CategoryUsage {
    pub name: String,
    pub used: u32,
    pub available: u32,
    pub capacity: u32,
    /// High-water mark (rows that get uploaded).
    pub active: u32,
}

/// Snapshot of slot usage, in category table order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub categories: Vec<CategoryUsage>,
}

impl UsageReport {
    pub fn get(&self, name: &str) -> Option<&CategoryUsage> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn total_used(&self) -> u64 {
        self.categories.iter().map(|c| c.used as u64).sum()
    }

    pub fn total_capacity(&self) -> u64 {
        self.categories.iter().map(|c| c.capacity as u64).sum()
    }
}

// ---------- Per-category state ----------

struct CategoryState {
    def: CategoryDef,
    pool: SlotPool,
    buffer: InstanceBuffer,
    /// Configured band, if the profile has one.
    band: Option<FadeBand>,
}

impl CategoryState {
    fn new(def: &CategoryDef, settings: &BillboardSettings) -> Self {
        Self {
            def: def.clone(),
            pool: SlotPool::new(def.capacity),
            buffer: InstanceBuffer::new(def.geometry(), def.capacity),
            band: Self::band_for(def, settings),
        }
    }

    fn band_for(def: &CategoryDef, settings: &BillboardSettings) -> Option<FadeBand> {
        def.profile
            .distances()
            .map(|(near, far)| FadeBand::new(near, far, settings.skip_near_factor, settings.skip_far_factor))
    }

    /// Band in effect given model availability.
    #[inline]
    fn active_band(&self, has_model: bool) -> Option<&FadeBand> {
        if self.def.profile.is_banded(has_model) {
            self.band.as_ref()
        } else {
            None
        }
    }

    #[inline]
    fn window_radius(&self, settings: &BillboardSettings) -> i32 {
        settings.window_radius(self.def.profile.is_structure())
    }
}

/// Evaluate one instance and write the result. Free function so the LOD
/// pass can borrow the chunk index and the category buffers separately.
fn evaluate_instance(
    state: &mut CategoryState,
    record: &InstanceRecord,
    camera: Vec3,
    has_model: bool,
    epsilon: f32,
    allow_skip: bool,
) -> LodDecision {
    let current = state.buffer.opacity(record.slot).unwrap_or(1.0);
    let dist_sq = horizontal_distance_sq(record.position, camera);
    let decision = decide(state.active_band(has_model), current, dist_sq, epsilon, allow_skip);
    if let LodDecision::Change(value) = decision {
        state.buffer.set_opacity(record.slot, value);
    }
    decision
}

// ---------- Engine ----------

#[derive(Resource)]
pub struct BillboardEngine {
    settings: BillboardSettings,
    registry: CategoryRegistry,
    categories: Vec<CategoryState>,
    arena: InstanceArena,
    owners: HashMap<OwnerKey, InstanceHandle>,
    chunks: ChunkIndex,
    heights: CoarseHeightSampler,
    /// Categories whose high-detail model is loaded and usable.
    models: HashSet<CategoryId>,
    enabled: bool,
    last_camera: Option<Vec3>,
    last_camera_chunk: Option<ChunkKey>,
    ticks: u64,
}

impl BillboardEngine {
    pub fn new(registry: CategoryRegistry, settings: BillboardSettings, heights: Arc<dyn HeightSampler>) -> Self {
        let categories: Vec<CategoryState> = registry.iter().map(|(_, def)| CategoryState::new(def, &settings)).collect();

        for state in &categories {
            if let Some((_, far)) = state.def.profile.distances() {
                let radius = state.window_radius(&settings);
                if !settings.window_covers(far, radius) {
                    warn!(
                        "Billboards: '{}' fades out to {:.1}m but its {}-chunk window only covers {:.1}m",
                        state.def.name,
                        far,
                        radius,
                        radius as f32 * settings.chunk_size
                    );
                }
            }
        }

        Self {
            heights: CoarseHeightSampler::new(heights, settings.coarse_spacing),
            enabled: settings.enabled,
            settings,
            registry,
            categories,
            arena: InstanceArena::default(),
            owners: HashMap::new(),
            chunks: ChunkIndex::default(),
            models: HashSet::new(),
            last_camera: None,
            last_camera_chunk: None,
            ticks: 0,
        }
    }

    // ----- add / remove -----

    /// Register `owner` as a billboard of `category` at `position`.
    /// On any rejection nothing is registered.
    pub fn add_instance(
        &mut self,
        owner: impl Into<OwnerKey>,
        category: &str,
        position: Vec3,
    ) -> Result<u32, AddRejected> {
        let owner = owner.into();
        if !self.enabled {
            return Err(AddRejected::Disabled);
        }
        let Some(id) = self.registry.id_of(category) else {
            warn!("Billboards: unknown category '{}' for {:?}; skipping", category, owner);
            return Err(AddRejected::UnknownCategory(category.to_string()));
        };
        if self.owners.contains_key(&owner) {
            debug!("Billboards: {:?} already registered; ignoring add", owner);
            return Err(AddRejected::AlreadyRegistered(owner));
        }

        let has_model = self.models.contains(&id);
        let last_camera = self.last_camera;
        let state = &mut self.categories[id.index()];

        let slot = match state.pool.allocate() {
            Ok(slot) => slot,
            Err(_) => {
                let (used, capacity) = (state.pool.used(), state.pool.capacity());
                warn!(
                    "Billboards: category '{}' exhausted ({}/{} slots used); {:?} will not be drawn as a billboard",
                    state.def.name, used, capacity, owner
                );
                return Err(AddRejected::Exhausted { category: state.def.name.clone(), used, capacity });
            }
        };

        // Start at the right opacity if we already know where the camera is.
        let opacity = last_camera
            .map(|cam| target_opacity(state.active_band(has_model), horizontal_distance_sq(position, cam)))
            .unwrap_or(1.0);
        let correction = self.heights.correction_at(position);
        state
            .buffer
            .write_instance(slot, InstanceTransform::at(position), opacity, correction);

        let chunk = ChunkKey::from_world(position.x, position.z, self.settings.chunk_size);
        let handle = self.arena.insert(InstanceRecord { owner, category: id, slot, position, chunk });
        self.chunks.register(handle, chunk);
        self.owners.insert(owner, handle);
        Ok(slot)
    }

    /// Same as [`add_instance`](Self::add_instance) with Y taken from the terrain.
    pub fn add_instance_on_ground(
        &mut self,
        owner: impl Into<OwnerKey>,
        category: &str,
        x: f32,
        z: f32,
    ) -> Result<u32, AddRejected> {
        let y = self.heights.fine(x, z);
        self.add_instance(owner, category, Vec3::new(x, y, z))
    }

    /// Unregister `owner`. Unknown owners are a no-op (returns false).
    pub fn remove_instance(&mut self, owner: impl Into<OwnerKey>) -> bool {
        let owner = owner.into();
        let Some(handle) = self.owners.remove(&owner) else {
            debug!("Billboards: remove for unknown {:?}; ignoring", owner);
            return false;
        };
        match self.arena.remove(handle) {
            Some(record) => {
                self.chunks.unregister(handle, record.chunk);
                self.release_slot(&record);
                true
            }
            None => false,
        }
    }

    /// Drop every instance in `chunk` (terrain chunk unloaded).
    pub fn remove_chunk(&mut self, chunk: ChunkKey) -> usize {
        let handles = self.chunks.take_chunk(chunk);
        let mut removed = 0;
        for handle in handles {
            if let Some(record) = self.arena.remove(handle) {
                self.owners.remove(&record.owner);
                self.release_slot(&record);
                removed += 1;
            }
        }
        removed
    }

    fn release_slot(&mut self, record: &InstanceRecord) {
        let state = &mut self.categories[record.category.index()];
        if state.pool.free(record.slot).is_ok() {
            state.buffer.hide(record.slot);
        }
    }

    // ----- LOD -----

    /// One LOD pass around `camera`. Only chunks in the window are walked;
    /// structures use the wide window, everything else the inner one.
    pub fn run_lod_tick(&mut self, camera: Vec3) -> LodTickStats {
        let cam_chunk = ChunkKey::from_world(camera.x, camera.z, self.settings.chunk_size);
        let outer = self.settings.outer_window_radius();
        let epsilon = self.settings.opacity_epsilon;
        let mut stats = LodTickStats::default();

        let Self { settings, categories, arena, chunks, models, last_camera, last_camera_chunk, ticks, .. } = self;

        for (key, handles) in chunks.query_window(cam_chunk, outer) {
            stats.chunks += 1;
            let ring = key.ring_distance(cam_chunk);
            for &handle in handles {
                let Some(record) = arena.get(handle) else { continue };
                let state = &mut categories[record.category.index()];
                if ring > state.window_radius(settings) {
                    continue;
                }
                stats.visited += 1;
                let has_model = models.contains(&record.category);
                match evaluate_instance(state, record, camera, has_model, epsilon, true) {
                    LodDecision::Skip => stats.skipped += 1,
                    LodDecision::Change(_) => stats.changed += 1,
                    LodDecision::Unchanged => {}
                }
            }
        }

        // Chunks that just fell out of their window get one last evaluation
        // so they rest at their far-side opacity.
        if let Some(prev) = last_camera_chunk.filter(|p| *p != cam_chunk) {
            for (key, handles) in chunks.query_window(prev, outer) {
                let old_ring = key.ring_distance(prev);
                let new_ring = key.ring_distance(cam_chunk);
                for &handle in handles {
                    let Some(record) = arena.get(handle) else { continue };
                    let state = &mut categories[record.category.index()];
                    let radius = state.window_radius(settings);
                    if old_ring > radius || new_ring <= radius {
                        continue;
                    }
                    let has_model = models.contains(&record.category);
                    if let LodDecision::Change(_) = evaluate_instance(state, record, camera, has_model, epsilon, false) {
                        stats.settled += 1;
                    }
                }
            }
        }

        *last_camera = Some(camera);
        *last_camera_chunk = Some(cam_chunk);
        *ticks += 1;
        stats
    }

    // ----- sync -----

    /// Upload every dirty category once and clear its dirty bits.
    pub fn flush(&mut self, sink: &mut impl BufferSink) -> FlushStats {
        let mut stats = FlushStats::default();
        for (i, state) in self.categories.iter_mut().enumerate() {
            let dirty = state.buffer.take_dirty();
            if dirty.is_empty() {
                continue;
            }
            let id = CategoryId(i as u16);
            let banded = state.def.profile.is_banded(self.models.contains(&id));
            sink.upload(
                CategoryView { id, name: &state.def.name, buffer: &state.buffer, banded },
                dirty,
            );
            stats.categories += 1;
            stats.rows += state.buffer.rows() as u32;
        }
        stats
    }

    // ----- tuning -----

    /// Size parameters rebuild the category's geometry (per-slot data is
    /// kept); any other name becomes a material parameter.
    pub fn update_category_parameter(&mut self, category: &str, param: &str, value: f32) -> Result<(), ParamError> {
        let id = self
            .registry
            .id_of(category)
            .ok_or_else(|| ParamError::UnknownCategory(category.to_string()))?;
        let invalid = || ParamError::InvalidValue { param: param.to_string(), value };
        if !value.is_finite() {
            return Err(invalid());
        }

        let state = &mut self.categories[id.index()];
        let parsed = param.parse::<CategoryParam>().unwrap_or(CategoryParam::Shader(param.to_string()));
        match &parsed {
            CategoryParam::Width | CategoryParam::Height if value <= 0.0 => return Err(invalid()),
            CategoryParam::Width => state.def.width = value,
            CategoryParam::Height => state.def.height = value,
            CategoryParam::VerticalOffset => state.def.vertical_offset = value,
            CategoryParam::Shader(name) => {
                state.buffer.set_param(name, value);
                return Ok(());
            }
        }

        let geometry: BillboardGeometry = state.def.geometry();
        state.buffer = state.buffer.rebuilt(geometry);
        info!(
            "Billboards: rebuilt '{}' geometry ({}x{}, offset {})",
            state.def.name, geometry.width, geometry.height, geometry.vertical_offset
        );
        Ok(())
    }

    /// Mark whether the category's high-detail model can be shown.
    /// Returns false for unknown categories.
    pub fn set_model_available(&mut self, category: &str, available: bool) -> bool {
        let Some(id) = self.registry.id_of(category) else {
            warn!("Billboards: model availability for unknown category '{}'", category);
            return false;
        };
        let changed = if available { self.models.insert(id) } else { self.models.remove(&id) };
        if changed {
            // The blend weight depends on whether a band applies.
            self.categories[id.index()].buffer.mark_dirty(DirtyMask::HEIGHT_CORRECTION);
        }
        true
    }

    /// Pick up runtime tuning (noise threshold, skip factors, window radii,
    /// report interval, master switch). `chunk_size` and `coarse_spacing` are
    /// baked into stored chunk keys and corrections and stay as built.
    pub fn apply_settings(&mut self, settings: &BillboardSettings) {
        let (chunk_size, coarse_spacing) = (self.settings.chunk_size, self.settings.coarse_spacing);
        if settings.chunk_size != chunk_size || settings.coarse_spacing != coarse_spacing {
            warn!(
                "Billboards: chunk_size/coarse_spacing only apply to a new engine; keeping {}m / {}m",
                chunk_size, coarse_spacing
            );
        }
        self.settings = BillboardSettings { chunk_size, coarse_spacing, ..settings.clone() };
        for state in &mut self.categories {
            state.band = CategoryState::band_for(&state.def, &self.settings);
        }
        self.set_enabled(settings.enabled);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            info!("Billboards: {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    // ----- queries -----

    pub fn usage_report(&self) -> UsageReport {
        UsageReport {
            categories: self
                .categories
                .iter()
                .map(|s| CategoryUsage {
                    name: s.def.name.clone(),
                    used: s.pool.used(),
                    available: s.pool.available(),
                    capacity: s.pool.capacity(),
                    active: s.pool.active_count(),
                })
                .collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn category_id(&self, name: &str) -> Option<CategoryId> {
        self.registry.id_of(name)
    }

    pub fn category(&self, id: CategoryId) -> Option<&CategoryDef> {
        self.categories.get(id.index()).map(|s| &s.def)
    }

    pub fn categories(&self) -> impl Iterator<Item = (CategoryId, &CategoryDef)> {
        self.categories.iter().enumerate().map(|(i, s)| (CategoryId(i as u16), &s.def))
    }

    pub fn buffer(&self, id: CategoryId) -> Option<&InstanceBuffer> {
        self.categories.get(id.index()).map(|s| &s.buffer)
    }

    /// Whether `slot` of `category` is currently unallocated.
    pub fn is_slot_free(&self, category: &str, slot: u32) -> Option<bool> {
        let id = self.registry.id_of(category)?;
        Some(self.categories[id.index()].pool.is_free(slot))
    }

    pub fn record_of(&self, owner: impl Into<OwnerKey>) -> Option<&InstanceRecord> {
        let handle = self.owners.get(&owner.into())?;
        self.arena.get(*handle)
    }

    pub fn opacity_of(&self, owner: impl Into<OwnerKey>) -> Option<f32> {
        let record = self.record_of(owner)?;
        self.categories[record.category.index()].buffer.opacity(record.slot)
    }

    pub fn height_correction_of(&self, owner: impl Into<OwnerKey>) -> Option<f32> {
        let record = self.record_of(owner)?;
        self.categories[record.category.index()].buffer.height_correction(record.slot)
    }

    pub fn chunk_index(&self) -> &ChunkIndex {
        &self.chunks
    }

    pub fn settings(&self) -> &BillboardSettings {
        &self.settings
    }

    /// Live instances across all categories.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn profile_of(&self, id: CategoryId) -> Option<LodProfile> {
        self.categories.get(id.index()).map(|s| s.def.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billboards::core::{FlatGround, HeightFn};
    use crate::billboards::registry::CategoryTable;
    use crate::billboards::sync::RecordingSink;

    fn engine_with(defs: Vec<CategoryDef>) -> BillboardEngine {
        engine_with_heights(defs, Arc::new(FlatGround::default()))
    }

    fn engine_with_heights(defs: Vec<CategoryDef>, heights: Arc<dyn HeightSampler>) -> BillboardEngine {
        let table = CategoryTable { categories: defs };
        let registry = CategoryRegistry::from_table(&table).unwrap();
        BillboardEngine::new(registry, BillboardSettings::default(), heights)
    }

    fn pine(capacity: u32) -> CategoryDef {
        CategoryDef::new("pine", 4.0, 9.0, capacity, LodProfile::MODEL_FALLBACK)
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn pines_fade_by_distance_when_model_is_available() {
        let mut engine = engine_with(vec![pine(16)]);
        assert!(engine.set_model_available("pine", true));

        engine.add_instance(1u64, "pine", Vec3::new(5.0, 0.0, 0.0)).unwrap();
        engine.add_instance(2u64, "pine", Vec3::new(0.0, 0.0, 18.0)).unwrap();
        engine.add_instance(3u64, "pine", Vec3::new(-30.0, 0.0, 0.0)).unwrap();

        let stats = engine.run_lod_tick(Vec3::new(0.0, 12.0, 0.0));
        assert_eq!(stats.visited, 3);

        assert_eq!(engine.opacity_of(1u64), Some(0.0));
        assert!(approx(engine.opacity_of(2u64).unwrap(), 0.3));
        assert_eq!(engine.opacity_of(3u64), Some(1.0));
    }

    #[test]
    fn pines_without_a_model_stay_visible() {
        let mut engine = engine_with(vec![pine(4)]);
        engine.add_instance(1u64, "pine", Vec3::new(5.0, 0.0, 0.0)).unwrap();
        engine.run_lod_tick(Vec3::ZERO);
        assert_eq!(engine.opacity_of(1u64), Some(1.0));

        // Model arrives: the near pine fades out on the next tick.
        engine.set_model_available("pine", true);
        engine.run_lod_tick(Vec3::ZERO);
        assert_eq!(engine.opacity_of(1u64), Some(0.0));

        // Model lost again: back to fully visible even though the pine sits deep in the near zone.
        engine.set_model_available("pine", false);
        engine.run_lod_tick(Vec3::ZERO);
        assert_eq!(engine.opacity_of(1u64), Some(1.0));
    }

    #[test]
    fn full_category_rejects_the_next_add() {
        let mut engine = engine_with(vec![CategoryDef::new("rock", 1.0, 1.0, 2, LodProfile::CLOSE_RANGE)]);
        engine.add_instance(1u64, "rock", Vec3::ZERO).unwrap();
        engine.add_instance(2u64, "rock", Vec3::X).unwrap();

        let err = engine.add_instance(3u64, "rock", Vec3::Z).unwrap_err();
        assert_eq!(err, AddRejected::Exhausted { category: "rock".into(), used: 2, capacity: 2 });
        assert!(engine.record_of(3u64).is_none());
        assert_eq!(engine.len(), 2);

        let usage = engine.usage_report();
        let rock = usage.get("rock").unwrap();
        assert_eq!((rock.used, rock.available, rock.capacity), (2, 0, 2));
    }

    #[test]
    fn removal_returns_the_slot() {
        let mut engine = engine_with(vec![pine(8)]);
        for owner in 0..3u64 {
            engine.add_instance(owner, "pine", Vec3::new(owner as f32, 0.0, 0.0)).unwrap();
        }
        let slot = engine.record_of(1u64).unwrap().slot;
        let before = engine.usage_report().get("pine").unwrap().used;
        assert_eq!(engine.is_slot_free("pine", slot), Some(false));

        assert!(engine.remove_instance(1u64));

        let after = engine.usage_report().get("pine").unwrap().clone();
        assert_eq!(after.used, before - 1);
        assert_eq!(after.available, 8 - after.used);
        assert_eq!(engine.is_slot_free("pine", slot), Some(true));

        // The row is hidden right away, before anyone reuses the slot.
        let buf = engine.buffer(CategoryId(0)).unwrap();
        assert!(buf.transform(slot).unwrap().is_hidden());

        // And it is handed out again.
        assert_eq!(engine.add_instance(9u64, "pine", Vec3::ZERO), Ok(slot));
    }

    #[test]
    fn stale_and_unknown_operations_are_no_ops() {
        let mut engine = engine_with(vec![pine(4)]);
        assert!(!engine.remove_instance(42u64));
        engine.add_instance(1u64, "pine", Vec3::ZERO).unwrap();
        assert!(engine.remove_instance(1u64));
        assert!(!engine.remove_instance(1u64));

        assert_eq!(
            engine.add_instance(2u64, "oak", Vec3::ZERO),
            Err(AddRejected::UnknownCategory("oak".into()))
        );
        engine.add_instance(3u64, "pine", Vec3::ZERO).unwrap();
        assert_eq!(
            engine.add_instance(3u64, "pine", Vec3::ONE),
            Err(AddRejected::AlreadyRegistered(OwnerKey(3)))
        );
        assert_eq!(engine.usage_report().get("pine").unwrap().used, 1);
    }

    #[test]
    fn disabled_engine_rejects_adds_but_allows_removal() {
        let mut engine = engine_with(vec![pine(4)]);
        engine.add_instance(1u64, "pine", Vec3::ZERO).unwrap();
        engine.set_enabled(false);
        assert_eq!(engine.add_instance(2u64, "pine", Vec3::ZERO), Err(AddRejected::Disabled));
        assert!(engine.remove_instance(1u64));
        assert!(engine.is_empty());
    }

    #[test]
    fn stable_object_at_skip_boundary_stays_clean() {
        let mut engine = engine_with(vec![CategoryDef::new("crate", 1.0, 1.0, 4, LodProfile::CLOSE_RANGE)]);
        // skip-near for a 10m band edge at 0.7 headroom is 7m.
        engine.add_instance(1u64, "crate", Vec3::new(7.0, 0.0, 0.0)).unwrap();
        engine.run_lod_tick(Vec3::ZERO);
        assert_eq!(engine.opacity_of(1u64), Some(0.0));

        let mut sink = RecordingSink::default();
        engine.flush(&mut sink);
        sink.clear();

        for _ in 0..5 {
            engine.run_lod_tick(Vec3::ZERO);
            assert!(engine.buffer(CategoryId(0)).unwrap().dirty().is_empty());
            assert_eq!(engine.flush(&mut sink), FlushStats::default());
        }
        assert!(sink.uploads.is_empty());
    }

    #[test]
    fn deep_objects_are_skipped() {
        let mut engine = engine_with(vec![CategoryDef::new("crate", 1.0, 1.0, 4, LodProfile::CLOSE_RANGE)]);
        engine.add_instance(1u64, "crate", Vec3::new(2.0, 0.0, 0.0)).unwrap();
        engine.add_instance(2u64, "crate", Vec3::new(0.0, 0.0, 40.0)).unwrap();
        let first = engine.run_lod_tick(Vec3::ZERO);
        assert_eq!(first.changed, 1); // the near crate drops to 0
        let second = engine.run_lod_tick(Vec3::ZERO);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.changed, 0);
    }

    #[test]
    fn flush_uploads_each_dirty_category_once() {
        let mut engine = engine_with(vec![
            pine(8),
            CategoryDef::new("grass", 1.0, 0.5, 8, LodProfile::AlwaysVisible),
            CategoryDef::new("wall", 8.0, 4.0, 8, LodProfile::STRUCTURE),
        ]);
        let mut sink = RecordingSink::default();
        // Initial geometry upload for every category.
        assert_eq!(engine.flush(&mut sink).categories, 3);
        sink.clear();

        for owner in 0..5u64 {
            engine.add_instance(owner, "pine", Vec3::new(owner as f32 * 3.0, 0.0, 0.0)).unwrap();
        }
        engine.remove_instance(2u64);
        engine.add_instance(10u64, "grass", Vec3::ZERO).unwrap();

        let stats = engine.flush(&mut sink);
        assert_eq!(stats.categories, 2);
        assert_eq!(stats.rows, 5 + 1);
        assert_eq!(sink.uploads_for(CategoryId(0)), 1);
        assert_eq!(sink.uploads_for(CategoryId(1)), 1);
        assert_eq!(sink.uploads_for(CategoryId(2)), 0);
        assert!(sink.uploads[0].1.contains(DirtyMask::TRANSFORMS | DirtyMask::OPACITY));

        // Nothing changed since: nothing to upload.
        assert_eq!(engine.flush(&mut sink), FlushStats::default());
    }

    #[test]
    fn structures_use_the_wide_window() {
        let mut engine = engine_with(vec![
            CategoryDef::new("wall", 8.0, 4.0, 8, LodProfile::STRUCTURE),
            CategoryDef::new("crate", 1.0, 1.0, 8, LodProfile::CLOSE_RANGE),
        ]);
        // Two chunks east of the camera's chunk (chunk size 64).
        engine.add_instance(1u64, "wall", Vec3::new(140.0, 0.0, 10.0)).unwrap();
        engine.add_instance(2u64, "crate", Vec3::new(140.0, 0.0, 12.0)).unwrap();

        let stats = engine.run_lod_tick(Vec3::new(10.0, 0.0, 10.0));
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.visited, 1);
        // 130m away: beyond the 105m band edge.
        assert_eq!(engine.opacity_of(1u64), Some(1.0));

        let stats = engine.run_lod_tick(Vec3::new(40.0, 0.0, 10.0));
        assert_eq!(stats.visited, 1);
        // 100m: halfway through 95..105.
        assert!(approx(engine.opacity_of(1u64).unwrap(), 0.5));
    }

    #[test]
    fn leaving_the_window_settles_opacity() {
        let mut engine = engine_with(vec![CategoryDef::new("crate", 1.0, 1.0, 8, LodProfile::CLOSE_RANGE)]);
        engine.add_instance(1u64, "crate", Vec3::new(3.0, 0.0, 3.0)).unwrap();
        engine.run_lod_tick(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(engine.opacity_of(1u64), Some(0.0));

        // Jump three chunks away; the crate's chunk is outside the 3x3 window now.
        let stats = engine.run_lod_tick(Vec3::new(200.0, 0.0, 1.0));
        assert_eq!(stats.visited, 0);
        assert_eq!(stats.settled, 1);
        assert_eq!(engine.opacity_of(1u64), Some(1.0));
    }

    #[test]
    fn adds_after_a_tick_start_at_the_right_opacity() {
        let mut engine = engine_with(vec![CategoryDef::new("crate", 1.0, 1.0, 8, LodProfile::CLOSE_RANGE)]);
        assert_eq!(engine.ticks(), 0);
        engine.add_instance(1u64, "crate", Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(engine.opacity_of(1u64), Some(1.0));

        engine.run_lod_tick(Vec3::ZERO);
        engine.add_instance(2u64, "crate", Vec3::new(2.0, 0.0, 0.0)).unwrap();
        assert_eq!(engine.opacity_of(2u64), Some(0.0));
        assert_eq!(engine.ticks(), 1);
    }

    #[test]
    fn height_correction_uses_coarse_grid() {
        // Ridge every 32m at x = 16 (+4m); coarse grid (32m) never sees it.
        let heights = Arc::new(HeightFn(|x: f32, _z: f32| if (x as i32).rem_euclid(32) == 16 { 4.0 } else { 0.0 }));
        let mut engine = engine_with_heights(vec![pine(4)], heights);

        engine.add_instance_on_ground(1u64, "pine", 16.0, 5.0).unwrap();
        let rec = *engine.record_of(1u64).unwrap();
        assert_eq!(rec.position.y, 4.0);
        assert_eq!(engine.height_correction_of(1u64), Some(-4.0));

        engine.add_instance(2u64, "pine", Vec3::new(0.0, 1.5, 0.0)).unwrap();
        assert_eq!(engine.height_correction_of(2u64), Some(-1.5));
    }

    #[test]
    fn size_parameters_rebuild_geometry_and_keep_rows() {
        let mut engine = engine_with(vec![CategoryDef::new("crate", 1.0, 1.0, 8, LodProfile::CLOSE_RANGE)]);
        engine.add_instance(1u64, "crate", Vec3::new(2.0, 0.0, 0.0)).unwrap();
        engine.run_lod_tick(Vec3::ZERO);
        let mut sink = RecordingSink::default();
        engine.flush(&mut sink);
        sink.clear();

        engine.update_category_parameter("crate", "width", 3.0).unwrap();
        let buf = engine.buffer(CategoryId(0)).unwrap();
        assert_eq!(buf.geometry().width, 3.0);
        assert_eq!(buf.opacity(0), Some(0.0));
        assert_eq!(buf.dirty(), DirtyMask::ALL);
        assert_eq!(engine.category(CategoryId(0)).unwrap().width, 3.0);

        engine.flush(&mut sink);
        engine.update_category_parameter("crate", "alpha_cutoff", 0.4).unwrap();
        let buf = engine.buffer(CategoryId(0)).unwrap();
        assert_eq!(buf.dirty(), DirtyMask::PARAMS);
        assert_eq!(buf.params().get("alpha_cutoff"), Some(0.4));
        assert_eq!(buf.geometry().width, 3.0);
    }

    #[test]
    fn invalid_parameter_updates_are_rejected() {
        let mut engine = engine_with(vec![pine(4)]);
        assert_eq!(
            engine.update_category_parameter("oak", "width", 1.0),
            Err(ParamError::UnknownCategory("oak".into()))
        );
        assert!(matches!(
            engine.update_category_parameter("pine", "height", -1.0),
            Err(ParamError::InvalidValue { .. })
        ));
        assert!(matches!(
            engine.update_category_parameter("pine", "brightness", f32::NAN),
            Err(ParamError::InvalidValue { .. })
        ));
        assert_eq!(engine.category(CategoryId(0)).unwrap().height, 9.0);
        engine.update_category_parameter("pine", "verticalOffset", -0.25).unwrap();
        assert_eq!(engine.category(CategoryId(0)).unwrap().vertical_offset, -0.25);
    }

    #[test]
    fn chunk_unload_frees_every_slot_in_it() {
        let mut engine = engine_with(vec![pine(16)]);
        for i in 0..4u64 {
            engine.add_instance(i, "pine", Vec3::new(i as f32, 0.0, 0.0)).unwrap();
        }
        engine.add_instance(100u64, "pine", Vec3::new(70.0, 0.0, 0.0)).unwrap();

        assert_eq!(engine.remove_chunk(ChunkKey::new(0, 0)), 4);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.usage_report().get("pine").unwrap().used, 1);
        assert!(engine.record_of(0u64).is_none());
        assert!(!engine.remove_instance(0u64));
        assert_eq!(engine.chunk_index().chunk_count(), 1);
    }

    #[test]
    fn usage_report_follows_table_order() {
        let engine = engine_with(vec![
            CategoryDef::new("b", 1.0, 1.0, 3, LodProfile::AlwaysVisible),
            CategoryDef::new("a", 1.0, 1.0, 5, LodProfile::AlwaysVisible),
        ]);
        let report = engine.usage_report();
        let names: Vec<&str> = report.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(report.total_capacity(), 8);
        assert_eq!(report.total_used(), 0);
    }

    #[test]
    fn runtime_settings_reach_the_lod_pass() {
        let mut engine = engine_with(vec![CategoryDef::new("crate", 1.0, 1.0, 8, LodProfile::CLOSE_RANGE)]);
        engine.add_instance(1u64, "crate", Vec3::new(12.0, 0.0, 0.0)).unwrap();
        engine.add_instance(2u64, "crate", Vec3::new(70.0, 0.0, 0.0)).unwrap();
        engine.run_lod_tick(Vec3::ZERO);
        assert!(approx(engine.opacity_of(1u64).unwrap(), 0.4));

        let mut tuned = BillboardSettings {
            opacity_epsilon: 0.5,
            prop_window_radius: 0,
            chunk_size: 16.0,
            ..BillboardSettings::default()
        };
        engine.apply_settings(&tuned);
        assert_eq!(engine.settings().opacity_epsilon, 0.5);
        assert_eq!(engine.settings().chunk_size, 64.0);

        // 12m -> 11m is a 0.2 step: below the new threshold. The crate at
        // 70m sits one chunk over, outside the shrunken window.
        let stats = engine.run_lod_tick(Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(stats.visited, 1);
        assert!(approx(engine.opacity_of(1u64).unwrap(), 0.4));

        tuned.enabled = false;
        engine.apply_settings(&tuned);
        assert!(!engine.is_enabled());
        assert_eq!(engine.add_instance(3u64, "crate", Vec3::ZERO), Err(AddRejected::Disabled));
    }

    #[test]
    fn parameter_names_parse() {
        assert_eq!("width".parse::<CategoryParam>(), Ok(CategoryParam::Width));
        assert_eq!("verticalOffset".parse::<CategoryParam>(), Ok(CategoryParam::VerticalOffset));
        assert_eq!(
            "wind".parse::<CategoryParam>(),
            Ok(CategoryParam::Shader("wind".into()))
        );
        assert!(CategoryParam::Height.affects_geometry());
        assert!(!CategoryParam::Shader("wind".into()).affects_geometry());
    }
}
