//! Billboard props: fixed-capacity instance slots, chunk lookup, distance
//! fades against 3D models, and batched buffer uploads.
//!
//! Pure engine types (`core`, `allocator`, `spatial`, `lod`, `buffer`,
//! `height_blend`, `sync`, `engine`) do not touch the ECS; `plugin` and
//! `mesh_sink` wire them into a Bevy app.

pub mod allocator;
pub mod arena;
pub mod buffer;
pub mod core;
pub mod engine;
pub mod height_blend;
pub mod lod;
pub mod mesh_sink;
pub mod plugin;
pub mod registry;
pub mod settings;
pub mod spatial;
pub mod sync;

pub use self::core::{
    CategoryId, ChunkKey, FlatGround, HeightFn, HeightSampler, InstanceHandle, OwnerKey,
};
pub use engine::{AddRejected, BillboardEngine, CategoryUsage, ParamError, UsageReport};
pub use lod::{LodProfile, LodTickStats};
pub use plugin::{
    BillboardCamera, BillboardChunkUnloaded, BillboardHeightSource, BillboardParamChanged,
    BillboardPlugin, BillboardSet, DespawnBillboard, SetModelAvailable, SpawnBillboard,
};
pub use registry::{CategoryDef, CategoryRegistry, CategoryTable};
pub use settings::BillboardSettings;
pub use sync::{BufferSink, FlushStats};
