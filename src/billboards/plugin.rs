// src/billboards/plugin.rs
//! Billboard plugin wiring (glue).
//! - Category table asset/loader
//! - Engine construction once the table is loaded
//! - Spawn/despawn/tuning events -> engine
//! - LOD pass every N frames, then one flush into the category meshes

use std::sync::Arc;

use bevy::asset::LoadState;
use bevy::prelude::*;
use bevy::render::view::NoFrustumCulling;

use super::core::{ChunkKey, FlatGround, HeightSampler};
use super::engine::BillboardEngine;
use super::mesh_sink::{billboard_material, build_mesh, BillboardMeshes, CategoryMeshes, MeshSink};
use super::registry::{CategoryRegistry, CategoryTable, CategoryTableLoader};
use super::settings::BillboardSettings;

// ---------- Public ECS surface ----------

/// Frame ordering: all mutations, then LOD, then the single flush.
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum BillboardSet {
    Mutate,
    Lod,
    Flush,
}

/// The camera LOD distances are measured from.
#[derive(Component, Default)]
pub struct BillboardCamera;

/// Terrain height used for ground placement and the coarse correction.
#[derive(Resource, Clone)]
pub struct BillboardHeightSource(pub Arc<dyn HeightSampler>);

impl Default for BillboardHeightSource {
    fn default() -> Self {
        Self(Arc::new(FlatGround::default()))
    }
}

/// Handle to the loaded category table.
#[derive(Resource, Default)]
pub struct CategoryTableHandle(pub Handle<CategoryTable>);

/// Register `owner` as a billboard.
#[derive(Event, Clone, Debug)]
pub struct SpawnBillboard {
    pub owner: Entity,
    pub category: String,
    pub position: Vec3,
}

/// Unregister `owner`'s billboard.
#[derive(Event, Clone, Copy, Debug)]
pub struct DespawnBillboard(pub Entity);

#[derive(Event, Clone, Debug)]
pub struct BillboardParamChanged {
    pub category: String,
    pub param: String,
    pub value: f32,
}

/// A category's high-detail model finished loading (or was unloaded).
#[derive(Event, Clone, Debug)]
pub struct SetModelAvailable {
    pub category: String,
    pub available: bool,
}

/// Fired by terrain when a chunk is removed.
#[derive(Event, Clone, Copy, Debug)]
pub struct BillboardChunkUnloaded(pub ChunkKey);

/// Spawns received before the engine exists.
#[derive(Resource, Default)]
struct PendingSpawns(Vec<SpawnBillboard>);

pub struct BillboardPlugin;

impl Plugin for BillboardPlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<CategoryTable>()
            .register_asset_loader(CategoryTableLoader)
            .init_resource::<CategoryTableHandle>()
            .init_resource::<BillboardMeshes>()
            .add_systems(Startup, load_category_table)
            .add_systems(
                Update,
                build_engine_when_ready
                    .before(BillboardSet::Mutate)
                    .run_if(not(resource_exists::<BillboardEngine>)),
            )
            .add_systems(
                Update,
                flush_billboards
                    .in_set(BillboardSet::Flush)
                    .run_if(resource_exists::<BillboardEngine>),
            );

        add_engine_systems(app);
    }
}

/// Everything that only needs the engine resource (no assets, no render).
pub(crate) fn add_engine_systems(app: &mut App) {
    app.init_resource::<BillboardSettings>()
        .init_resource::<BillboardHeightSource>()
        .init_resource::<PendingSpawns>()
        .add_event::<SpawnBillboard>()
        .add_event::<DespawnBillboard>()
        .add_event::<BillboardParamChanged>()
        .add_event::<SetModelAvailable>()
        .add_event::<BillboardChunkUnloaded>()
        .configure_sets(
            Update,
            (BillboardSet::Mutate, BillboardSet::Lod, BillboardSet::Flush).chain(),
        )
        .add_systems(
            Update,
            (
                apply_chunk_unloads.run_if(resource_exists::<BillboardEngine>),
                // Spawns first: a spawn and despawn of one owner in the same
                // frame must cancel out.
                apply_spawns,
                apply_despawns,
                apply_param_changes.run_if(resource_exists::<BillboardEngine>),
                apply_model_availability.run_if(resource_exists::<BillboardEngine>),
                sync_settings.run_if(resource_exists::<BillboardEngine>),
            )
                .chain()
                .in_set(BillboardSet::Mutate),
        )
        .add_systems(
            Update,
            run_billboard_lod_tick
                .in_set(BillboardSet::Lod)
                .run_if(resource_exists::<BillboardEngine>),
        )
        .add_systems(
            Update,
            log_usage_report
                .after(BillboardSet::Flush)
                .run_if(resource_exists::<BillboardEngine>),
        );
}

// ---------- Startup / construction ----------

fn load_category_table(
    mut handle_res: ResMut<CategoryTableHandle>,
    settings: Res<BillboardSettings>,
    assets: Res<AssetServer>,
) {
    if handle_res.0.is_strong() {
        return;
    }
    handle_res.0 = assets.load(settings.categories_path.as_str());
    info!("Billboards: loading categories from '{}'", settings.categories_path);
}

/// Once the table is loaded: build the engine and one mesh entity per category.
#[allow(clippy::too_many_arguments)]
fn build_engine_when_ready(
    mut commands: Commands,
    handle_res: Res<CategoryTableHandle>,
    tables: Res<Assets<CategoryTable>>,
    settings: Res<BillboardSettings>,
    heights: Res<BillboardHeightSource>,
    assets: Res<AssetServer>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut targets: ResMut<BillboardMeshes>,
    mut gave_up: Local<bool>,
) {
    if *gave_up {
        return;
    }
    let Some(table) = tables.get(&handle_res.0) else {
        if let LoadState::Failed(err) = assets.load_state(&handle_res.0) {
            error!("Billboards: category table failed to load: {err}");
            *gave_up = true;
        }
        return;
    };
    let registry = match CategoryRegistry::from_table(table) {
        Ok(r) => r,
        Err(e) => {
            error!("Billboards: invalid category table: {e}");
            *gave_up = true;
            return;
        }
    };

    let engine = BillboardEngine::new(registry, settings.clone(), heights.0.clone());

    targets.by_category.clear();
    for (id, def) in engine.categories() {
        let Some(buffer) = engine.buffer(id) else { continue };
        let mesh = meshes.add(build_mesh(buffer, false));
        let texture = def.texture.as_ref().map(|path| assets.load(path.as_str()));
        let material = materials.add(billboard_material(texture));
        commands.spawn((
            Mesh3d(mesh.clone()),
            MeshMaterial3d(material.clone()),
            Transform::default(),
            Visibility::default(),
            // Vertices are world-space and span the whole window.
            NoFrustumCulling,
            Name::new(format!("Billboards: {}", def.name)),
        ));
        targets.by_category.push(CategoryMeshes { mesh, material });
    }

    let total_capacity = engine.usage_report().total_capacity();
    info!(
        "Billboards: engine ready ({} categories, {} slots, chunk {}m, LOD every {} frames)",
        targets.by_category.len(),
        total_capacity,
        settings.chunk_size,
        settings.lod_tick_interval.max(1)
    );
    commands.insert_resource(engine);
}

// ---------- Mutate ----------

fn apply_chunk_unloads(mut evr: EventReader<BillboardChunkUnloaded>, mut engine: ResMut<BillboardEngine>) {
    for ev in evr.read() {
        let removed = engine.remove_chunk(ev.0);
        if removed > 0 {
            debug!("Billboards: chunk ({}, {}) unloaded, freed {} slots", ev.0.x, ev.0.z, removed);
        }
    }
}

fn apply_despawns(
    mut evr: EventReader<DespawnBillboard>,
    mut engine: Option<ResMut<BillboardEngine>>,
    mut pending: ResMut<PendingSpawns>,
) {
    for ev in evr.read() {
        match engine.as_deref_mut() {
            Some(engine) => {
                engine.remove_instance(ev.0);
            }
            None => pending.0.retain(|s| s.owner != ev.0),
        }
    }
}

fn apply_spawns(
    mut evr: EventReader<SpawnBillboard>,
    engine: Option<ResMut<BillboardEngine>>,
    mut pending: ResMut<PendingSpawns>,
) {
    let Some(mut engine) = engine else {
        pending.0.extend(evr.read().cloned());
        return;
    };

    let held = if pending.0.is_empty() { Vec::new() } else { std::mem::take(&mut pending.0) };
    let (mut added, mut rejected) = (0u32, 0u32);
    for ev in held.into_iter().chain(evr.read().cloned()) {
        match engine.add_instance(ev.owner, &ev.category, ev.position) {
            Ok(_) => added += 1,
            Err(_) => rejected += 1,
        }
    }
    if rejected > 0 {
        debug!("Billboards: {} added, {} rejected this frame", added, rejected);
    }
}

fn apply_param_changes(mut evr: EventReader<BillboardParamChanged>, mut engine: ResMut<BillboardEngine>) {
    for ev in evr.read() {
        if let Err(e) = engine.update_category_parameter(&ev.category, &ev.param, ev.value) {
            warn!("Billboards: {e}");
        }
    }
}

fn apply_model_availability(mut evr: EventReader<SetModelAvailable>, mut engine: ResMut<BillboardEngine>) {
    for ev in evr.read() {
        engine.set_model_available(&ev.category, ev.available);
    }
}

fn sync_settings(settings: Res<BillboardSettings>, mut engine: ResMut<BillboardEngine>) {
    if settings.is_changed() {
        engine.apply_settings(&settings);
    }
}

// ---------- LOD / flush / report ----------

/// LOD pass on frame 0, N, 2N, ...
pub fn run_billboard_lod_tick(
    mut engine: ResMut<BillboardEngine>,
    settings: Res<BillboardSettings>,
    cam_q: Query<&GlobalTransform, With<BillboardCamera>>,
    mut frame: Local<u32>,
) {
    let due = *frame % settings.lod_tick_interval.max(1) == 0;
    *frame = frame.wrapping_add(1);
    if !due {
        return;
    }
    let Ok(cam) = cam_q.single() else { return };

    let stats = engine.run_lod_tick(cam.translation());
    if stats.changed > 0 || stats.settled > 0 {
        debug!(
            "Billboards: LOD {} chunks, {} visited, {} skipped, {} changed, {} settled",
            stats.chunks, stats.visited, stats.skipped, stats.changed, stats.settled
        );
    }
}

fn flush_billboards(
    mut engine: ResMut<BillboardEngine>,
    targets: Res<BillboardMeshes>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let mut sink = MeshSink { meshes: &mut *meshes, materials: &mut *materials, targets: &*targets };
    let stats = engine.flush(&mut sink);
    if stats.categories > 0 {
        trace!("Billboards: uploaded {} categories ({} rows)", stats.categories, stats.rows);
    }
}

fn log_usage_report(
    time: Res<Time>,
    settings: Res<BillboardSettings>,
    engine: Res<BillboardEngine>,
    mut timer: Local<Option<Timer>>,
) {
    if settings.report_interval_secs <= 0.0 {
        return;
    }
    let timer = timer.get_or_insert_with(|| Timer::from_seconds(settings.report_interval_secs, TimerMode::Repeating));
    if !timer.tick(time.delta()).just_finished() {
        return;
    }

    let report = engine.usage_report();
    match ron::ser::to_string(&report) {
        Ok(text) => info!("Billboards: usage {text}"),
        Err(e) => warn!("Billboards: could not serialize usage report: {e}"),
    }
    for c in report.categories.iter().filter(|c| c.available == 0) {
        warn!("Billboards: '{}' is full ({} slots)", c.name, c.capacity);
    }
}
