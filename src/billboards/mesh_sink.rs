// src/billboards/mesh_sink.rs
//! CPU-merged billboard meshes: one mesh + material per category, eight
//! vertices per slot. Rows keep their slot index, so partial uploads
//! rewrite attributes in place instead of rebuilding the mesh.

use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology, VertexAttributeValues};

use super::buffer::{DirtyMask, InstanceBuffer, ShaderParams};
use super::core::CategoryId;
use super::height_blend::blend_weight;
use super::sync::{BufferSink, CategoryView};

const VERTS_PER_ROW: usize = 8;
const QUAD_INDICES: [u32; 12] = [0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7];
const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

/// Render handles for one category.
#[derive(Clone, Debug)]
pub struct CategoryMeshes {
    pub mesh: Handle<Mesh>,
    pub material: Handle<StandardMaterial>,
}

/// Indexed by `CategoryId`.
#[derive(Resource, Default)]
pub struct BillboardMeshes {
    pub by_category: Vec<CategoryMeshes>,
}

impl BillboardMeshes {
    pub fn get(&self, id: CategoryId) -> Option<&CategoryMeshes> {
        self.by_category.get(id.index())
    }
}

/// Cheap billboard material: unlit, double-sided, vertex alpha.
pub fn billboard_material(texture: Option<Handle<Image>>) -> StandardMaterial {
    StandardMaterial {
        base_color: Color::WHITE,
        base_color_texture: texture,
        unlit: true,
        alpha_mode: AlphaMode::Blend,
        cull_mode: None,
        double_sided: true,
        perceptual_roughness: 1.0,
        metallic: 0.0,
        ..default()
    }
}

/// Known material parameters; everything else is ignored here.
pub fn apply_params(material: &mut StandardMaterial, params: &ShaderParams) {
    for (name, value) in params.iter() {
        match name {
            "alpha_cutoff" if value > 0.0 => material.alpha_mode = AlphaMode::Mask(value),
            "alpha_cutoff" => material.alpha_mode = AlphaMode::Blend,
            "brightness" => {
                let b = value.max(0.0);
                material.base_color = Color::linear_rgb(b, b, b);
            }
            _ => {}
        }
    }
}

/// World-space vertices of every row. Hidden rows collapse onto the origin.
pub fn row_positions(buffer: &InstanceBuffer, banded: bool) -> Vec<[f32; 3]> {
    let local = buffer.geometry().local_vertices();
    let mut out = Vec::with_capacity(buffer.rows() * VERTS_PER_ROW);
    let rows = buffer
        .transforms()
        .iter()
        .zip(buffer.opacities())
        .zip(buffer.height_corrections());
    for ((t, &opacity), &correction) in rows {
        let base = Vec3::from_array(t.position) + Vec3::Y * (correction * blend_weight(opacity, banded));
        for v in local {
            out.push((base + v * t.scale).to_array());
        }
    }
    out
}

/// Vertex colours; only alpha carries data (the slot's opacity).
pub fn row_colors(buffer: &InstanceBuffer) -> Vec<[f32; 4]> {
    buffer
        .opacities()
        .iter()
        .flat_map(|&o| [[1.0, 1.0, 1.0, o]; VERTS_PER_ROW])
        .collect()
}

/// Full mesh for a category (positions, normals, uvs, colours, indices).
pub fn build_mesh(buffer: &InstanceBuffer, banded: bool) -> Mesh {
    let rows = buffer.rows();
    let normals: Vec<[f32; 3]> = (0..rows)
        .flat_map(|_| [[0.0, 0.0, 1.0]; 4].into_iter().chain([[1.0, 0.0, 0.0]; 4]))
        .collect();
    let uvs: Vec<[f32; 2]> = (0..rows * 2).flat_map(|_| QUAD_UVS).collect();
    let indices: Vec<u32> = (0..rows as u32)
        .flat_map(|r| QUAD_INDICES.map(|i| i + r * VERTS_PER_ROW as u32))
        .collect();

    let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, row_positions(buffer, banded));
    mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
    mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, row_colors(buffer));
    mesh.insert_indices(Indices::U32(indices));
    mesh
}

fn vertex_count(mesh: &Mesh) -> Option<usize> {
    match mesh.attribute(Mesh::ATTRIBUTE_POSITION)? {
        VertexAttributeValues::Float32x3(v) => Some(v.len()),
        _ => None,
    }
}

/// Sink backed by `Assets<Mesh>` / `Assets<StandardMaterial>`.
pub struct MeshSink<'a> {
    pub meshes: &'a mut Assets<Mesh>,
    pub materials: &'a mut Assets<StandardMaterial>,
    pub targets: &'a BillboardMeshes,
}

impl BufferSink for MeshSink<'_> {
    fn upload(&mut self, view: CategoryView<'_>, dirty: DirtyMask) {
        let Some(target) = self.targets.get(view.id) else {
            warn!("Billboards: no mesh for category '{}'", view.name);
            return;
        };

        if dirty.any(DirtyMask::ROW | DirtyMask::GEOMETRY) {
            if let Some(mesh) = self.meshes.get_mut(&target.mesh) {
                let rows_match = vertex_count(mesh) == Some(view.buffer.rows() * VERTS_PER_ROW);
                if dirty.any(DirtyMask::GEOMETRY | DirtyMask::TRANSFORMS) || !rows_match {
                    *mesh = build_mesh(view.buffer, view.banded);
                } else {
                    // Opacity drives both alpha and the height blend.
                    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, row_positions(view.buffer, view.banded));
                    if dirty.contains(DirtyMask::OPACITY) {
                        mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, row_colors(view.buffer));
                    }
                }
            }
        }

        if dirty.contains(DirtyMask::PARAMS) {
            if let Some(material) = self.materials.get_mut(&target.material) {
                apply_params(material, view.buffer.params());
            }
        }
    }
}
