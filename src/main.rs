use std::sync::Arc;

use bevy::prelude::*;

use billboard_lod::billboards::{BillboardEngine, BillboardHeightSource, BillboardPlugin, BillboardSet, HeightFn};

mod input;
mod scatter;
mod setup;

use input::{camera_controller, demo_controls};
use scatter::{scatter_props, terrain_height, DemoScatter};

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        // height first: the engine samples it when it is built
        .insert_resource(BillboardHeightSource(Arc::new(HeightFn(terrain_height))))
        .init_resource::<DemoScatter>()
        .add_plugins(BillboardPlugin)
        // camera, light, ground
        .add_systems(Startup, setup::setup)
        // scatter once the category table is loaded
        .add_systems(
            Update,
            scatter_props
                .before(BillboardSet::Mutate)
                .run_if(resource_added::<BillboardEngine>),
        )
        .add_systems(Update, (camera_controller, demo_controls).before(BillboardSet::Mutate))
        .run();
}
