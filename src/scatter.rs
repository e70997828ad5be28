// src/scatter.rs
//! Demo world: procedural height plus a deterministic prop scatter
//! (per seed, chunk and category) sent to the engine as spawn events.

use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use billboard_lod::billboards::{BillboardSettings, ChunkKey, SpawnBillboard};

/// Rolling hills; cheap enough to sample per prop.
pub fn terrain_height(x: f32, z: f32) -> f32 {
    let broad = (x * 0.011).sin() * (z * 0.013).cos() * 9.0;
    let detail = (x * 0.07 + z * 0.05).sin() * 1.5;
    broad + detail
}

#[derive(Resource, Clone)]
pub struct DemoScatter {
    pub seed: u64,
    /// Chunks scattered around the origin (radius, in chunks).
    pub radius_chunks: i32,
    /// (category, props per chunk)
    pub densities: Vec<(String, u32)>,
}

impl Default for DemoScatter {
    fn default() -> Self {
        Self {
            seed: 1337,
            radius_chunks: 6,
            densities: vec![
                ("pine".to_string(), 120),
                ("grass".to_string(), 400),
                ("rock".to_string(), 30),
                ("wall".to_string(), 2),
            ],
        }
    }
}

/// The demo's stand-in for a placed object.
#[derive(Component)]
pub struct DemoProp {
    pub chunk: ChunkKey,
}

fn rng_for(seed: u64, chunk: ChunkKey, category_idx: usize) -> ChaCha8Rng {
    let mix = seed
        ^ ((chunk.x as u64) << 16)
        ^ ((chunk.z as u64) << 32)
        ^ ((category_idx as u64) << 48)
        ^ 0xA5A5_5A5A_D3F0_1234u64;
    ChaCha8Rng::seed_from_u64(mix)
}

/// Uniform points inside one chunk, all on the terrain surface.
pub fn scatter_chunk(seed: u64, chunk: ChunkKey, category_idx: usize, count: u32, chunk_size: f32) -> Vec<Vec3> {
    let mut rng = rng_for(seed, chunk, category_idx);
    let origin = Vec2::new(chunk.x as f32, chunk.z as f32) * chunk_size;
    (0..count)
        .map(|_| {
            let x = origin.x + rng.random::<f32>() * chunk_size;
            let z = origin.y + rng.random::<f32>() * chunk_size;
            Vec3::new(x, terrain_height(x, z), z)
        })
        .collect()
}

/// Runs once, the frame the engine appears.
pub fn scatter_props(
    mut commands: Commands,
    scatter: Res<DemoScatter>,
    settings: Res<BillboardSettings>,
    mut spawns: EventWriter<SpawnBillboard>,
) {
    let r = scatter.radius_chunks;
    let mut total = 0usize;
    for cz in -r..=r {
        for cx in -r..=r {
            let chunk = ChunkKey::new(cx, cz);
            for (idx, (category, per_chunk)) in scatter.densities.iter().enumerate() {
                for position in scatter_chunk(scatter.seed, chunk, idx, *per_chunk, settings.chunk_size) {
                    let owner = commands.spawn(DemoProp { chunk }).id();
                    spawns.write(SpawnBillboard { owner, category: category.clone(), position });
                    total += 1;
                }
            }
        }
    }
    info!("Demo: scattered {} props over {} chunks", total, (2 * r + 1).pow(2));
}
