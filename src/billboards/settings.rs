// src/billboards/settings.rs
use bevy::prelude::*;

/// Runtime configuration for the billboard engine and its plugin.
#[derive(Resource, Clone, Debug)]
pub struct BillboardSettings {
    /// Category table asset (relative to the asset folder).
    pub categories_path: String,
    /// Chunk edge in meters; must match the terrain's chunking.
    pub chunk_size: f32,
    /// Spacing of the coarse height grid (lowest terrain LOD tier).
    pub coarse_spacing: f32,
    /// Run the LOD pass every N frames.
    pub lod_tick_interval: u32,
    /// Opacity changes at or below this are not written.
    pub opacity_epsilon: f32,
    /// Skip-near threshold as a fraction of the band's near edge.
    pub skip_near_factor: f32,
    /// Skip-far threshold as a multiple of the band's far edge.
    pub skip_far_factor: f32,
    /// Window radius (in chunks) for structure categories.
    pub structure_window_radius: i32,
    /// Window radius (in chunks) for every other category.
    pub prop_window_radius: i32,
    /// Seconds between usage log lines; <= 0 disables them.
    pub report_interval_secs: f32,
    /// Master switch; a disabled engine rejects new instances.
    pub enabled: bool,
}

impl Default for BillboardSettings {
    fn default() -> Self {
        Self {
            categories_path: "billboards/categories.billboards.ron".to_string(),
            chunk_size: 64.0,
            coarse_spacing: 32.0,
            lod_tick_interval: 6, // ~10 passes/s at 60 fps
            opacity_epsilon: 0.02,
            skip_near_factor: 0.7,
            skip_far_factor: 1.3,
            structure_window_radius: 2, // 5x5
            prop_window_radius: 1,      // 3x3
            report_interval_secs: 10.0,
            enabled: true,
        }
    }
}

impl BillboardSettings {
    /// Window radius used for a category.
    #[inline]
    pub fn window_radius(&self, is_structure: bool) -> i32 {
        if is_structure {
            self.structure_window_radius
        } else {
            self.prop_window_radius
        }
    }

    /// Outermost window radius walked per tick.
    pub fn outer_window_radius(&self) -> i32 {
        self.structure_window_radius.max(self.prop_window_radius)
    }

    /// True when everything closer than `far` is guaranteed to sit inside a
    /// window of `radius` chunks around the camera's chunk.
    pub fn window_covers(&self, far: f32, radius: i32) -> bool {
        radius as f32 * self.chunk_size >= far
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_windows_cover_default_bands() {
        let s = BillboardSettings::default();
        assert!(s.window_covers(105.0, s.window_radius(true)));
        assert!(s.window_covers(25.0, s.window_radius(false)));
        assert!(!s.window_covers(105.0, s.window_radius(false)));
        assert_eq!(s.outer_window_radius(), 2);
    }
}
