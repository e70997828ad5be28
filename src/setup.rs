use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology};

use billboard_lod::billboards::BillboardCamera;

use crate::input::CameraRig;
use crate::scatter::{terrain_height, DemoScatter};

/// Ground grid resolution (meters between vertices).
const GROUND_STEP: f32 = 4.0;

pub fn setup(
    mut commands: Commands,
    scatter: Res<DemoScatter>,
    settings: Res<billboard_lod::billboards::BillboardSettings>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    // 1) Light
    commands.spawn((
        DirectionalLight {
            shadows_enabled: false,
            illuminance: 9_000.0,
            ..default()
        },
        Transform::from_xyz(40.0, 80.0, 20.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    // 2) Camera
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(-2.5, 30.0, 60.0).looking_at(Vec3::ZERO, Vec3::Y),
        BillboardCamera,
        CameraRig {
            focus: Vec3::ZERO,
            distance: 60.0,
            yaw: 0.0,
            pitch: 0.5,
        },
    ));

    // 3) Ground under the scattered chunks
    let half = (scatter.radius_chunks as f32 + 1.0) * settings.chunk_size;
    commands.spawn((
        Mesh3d(meshes.add(ground_mesh(half, GROUND_STEP))),
        MeshMaterial3d(materials.add(StandardMaterial {
            base_color: Color::srgb(0.32, 0.42, 0.24),
            perceptual_roughness: 1.0,
            ..default()
        })),
        Name::new("Ground"),
    ));
}

/// Square heightfield from -half..half following `terrain_height`.
fn ground_mesh(half: f32, step: f32) -> Mesh {
    let n = ((2.0 * half) / step).ceil() as u32 + 1;
    let mut positions = Vec::with_capacity((n * n) as usize);
    let mut normals = Vec::with_capacity((n * n) as usize);
    for j in 0..n {
        for i in 0..n {
            let x = -half + i as f32 * step;
            let z = -half + j as f32 * step;
            positions.push([x, terrain_height(x, z), z]);
            // Central differences.
            let dx = terrain_height(x + 0.5, z) - terrain_height(x - 0.5, z);
            let dz = terrain_height(x, z + 0.5) - terrain_height(x, z - 0.5);
            normals.push(Vec3::new(-dx, 1.0, -dz).normalize().to_array());
        }
    }

    let mut indices = Vec::with_capacity(((n - 1) * (n - 1) * 6) as usize);
    for j in 0..n - 1 {
        for i in 0..n - 1 {
            let a = j * n + i;
            let b = a + 1;
            let c = a + n;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
    mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    mesh.insert_indices(Indices::U32(indices));
    mesh
}
