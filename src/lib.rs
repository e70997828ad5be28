//! Instanced billboard LOD and slot allocation for large static prop fields.
//!
//! The engine itself lives in [`billboards`]; the Bevy glue is
//! [`billboards::BillboardPlugin`].

pub mod billboards;
