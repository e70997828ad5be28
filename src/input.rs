use bevy::input::mouse::{MouseScrollUnit, MouseWheel};
use bevy::prelude::*;

use billboard_lod::billboards::{
    BillboardCamera, BillboardChunkUnloaded, BillboardHeightSource, BillboardParamChanged, BillboardSettings,
    ChunkKey, DespawnBillboard, SetModelAvailable,
};

use crate::scatter::DemoProp;

const PAN_SPEED: f32 = 60.0;
const TURN_SPEED: f32 = 1.2;

/// Ground-following camera rig: the camera sits `distance` behind and
/// above `focus`, looking down at `pitch`.
#[derive(Component)]
pub struct CameraRig {
    pub focus: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
}

impl CameraRig {
    const GROUND_CLEARANCE: f32 = 2.5;

    /// Camera position, kept above the ground under it.
    pub fn eye(&self, ground: impl Fn(f32, f32) -> f32) -> Vec3 {
        let back = Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(-self.pitch) * Vec3::Z;
        let mut eye = self.focus + back * self.distance;
        eye.y = eye.y.max(ground(eye.x, eye.z) + Self::GROUND_CLEARANCE);
        eye
    }
}

/// WASD pans, Q/E turns, the wheel zooms.
pub fn camera_controller(
    time: Res<Time>,
    keys: Res<ButtonInput<KeyCode>>,
    mut scroll_evr: EventReader<MouseWheel>,
    heights: Res<BillboardHeightSource>,
    mut query: Query<(&mut Transform, &mut CameraRig), With<BillboardCamera>>,
) {
    let Ok((mut tf, mut rig)) = query.single_mut() else { return; };
    let dt = time.delta_secs().min(0.05);

    let axis = |pos: KeyCode, neg: KeyCode| keys.pressed(pos) as i32 as f32 - keys.pressed(neg) as i32 as f32;
    rig.yaw += axis(KeyCode::KeyE, KeyCode::KeyQ) * TURN_SPEED * dt;

    let rot = Quat::from_rotation_y(rig.yaw);
    let pan = Vec3::new(axis(KeyCode::KeyD, KeyCode::KeyA), 0.0, axis(KeyCode::KeyS, KeyCode::KeyW));
    if pan != Vec3::ZERO {
        rig.focus += rot * pan.normalize() * PAN_SPEED * dt;
    }
    rig.focus.y = heights.0.sample_height(rig.focus.x, rig.focus.z);

    for ev in scroll_evr.read() {
        let step = match ev.unit {
            MouseScrollUnit::Line => ev.y * 4.0,
            MouseScrollUnit::Pixel => ev.y * 0.1,
        };
        rig.distance = (rig.distance - step).clamp(5.0, 400.0);
    }

    let eye = rig.eye(|x, z| heights.0.sample_height(x, z));
    *tf = Transform::from_translation(eye).looking_at(rig.focus, Vec3::Y);
}

/// B: toggle billboards. M: toggle the pine model. Up/Down: pine width.
/// U: unload the chunk under the focus point. X: despawn one prop there.
#[allow(clippy::too_many_arguments)]
pub fn demo_controls(
    mut commands: Commands,
    keys: Res<ButtonInput<KeyCode>>,
    mut settings: ResMut<BillboardSettings>,
    rig_q: Query<&CameraRig>,
    props_q: Query<(Entity, &DemoProp)>,
    mut models: EventWriter<SetModelAvailable>,
    mut params: EventWriter<BillboardParamChanged>,
    mut unloads: EventWriter<BillboardChunkUnloaded>,
    mut despawns: EventWriter<DespawnBillboard>,
    mut pine_model: Local<bool>,
    mut pine_width: Local<Option<f32>>,
) {
    if keys.just_pressed(KeyCode::KeyB) {
        settings.enabled = !settings.enabled;
        info!("Demo: billboards {}", if settings.enabled { "on" } else { "off" });
    }

    if keys.just_pressed(KeyCode::KeyM) {
        *pine_model = !*pine_model;
        models.write(SetModelAvailable { category: "pine".into(), available: *pine_model });
        info!("Demo: pine model {}", if *pine_model { "available" } else { "unavailable" });
    }

    let width = pine_width.get_or_insert(4.0);
    let step = if keys.just_pressed(KeyCode::ArrowUp) {
        0.5
    } else if keys.just_pressed(KeyCode::ArrowDown) {
        -0.5
    } else {
        0.0
    };
    if step != 0.0 {
        *width = (*width + step).max(0.5);
        params.write(BillboardParamChanged { category: "pine".into(), param: "width".into(), value: *width });
    }

    let Ok(rig) = rig_q.single() else { return; };
    let here = ChunkKey::from_world(rig.focus.x, rig.focus.z, settings.chunk_size);

    if keys.just_pressed(KeyCode::KeyU) {
        unloads.write(BillboardChunkUnloaded(here));
        let mut n = 0;
        for (e, _) in props_q.iter().filter(|(_, p)| p.chunk == here) {
            commands.entity(e).despawn();
            n += 1;
        }
        info!("Demo: unloaded chunk ({}, {}), {} props", here.x, here.z, n);
    }

    if keys.just_pressed(KeyCode::KeyX) {
        if let Some((e, _)) = props_q.iter().find(|(_, p)| p.chunk == here) {
            despawns.write(DespawnBillboard(e));
            commands.entity(e).despawn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig(pitch: f32) -> CameraRig {
        CameraRig { focus: Vec3::ZERO, distance: 10.0, yaw: 0.0, pitch }
    }

    #[test]
    fn eye_sits_behind_and_above_the_focus() {
        let eye = rig(0.5).eye(|_, _| 0.0);
        assert!((eye.distance(Vec3::ZERO) - 10.0).abs() < 1e-4);
        assert!(eye.z > 0.0 && eye.y > 0.0);
    }

    #[test]
    fn eye_never_dips_below_the_ground() {
        let eye = rig(0.1).eye(|_, _| 20.0);
        assert_eq!(eye.y, 20.0 + CameraRig::GROUND_CLEARANCE);
    }
}
