// src/billboards/height_blend.rs
//! Coarse terrain height and the per-slot vertical correction.
//!
//! Far terrain is drawn from a coarse grid, near terrain at full detail. A
//! billboard stores `coarse - registered` so the vertex stage can slide it
//! onto the coarse surface as it fades into the distant tier.

use std::sync::Arc;

use bevy::prelude::*;

use super::core::HeightSampler;

/// Bilinear sampler over the injected height function, evaluated on a
/// grid with `spacing` meters between samples (the lowest terrain LOD).
#[derive(Clone)]
pub struct CoarseHeightSampler {
    source: Arc<dyn HeightSampler>,
    spacing: f32,
}

impl CoarseHeightSampler {
    pub fn new(source: Arc<dyn HeightSampler>, spacing: f32) -> Self {
        Self { source, spacing }
    }

    /// Full-detail height straight from the source.
    #[inline]
    pub fn fine(&self, x: f32, z: f32) -> f32 {
        self.source.sample_height(x, z)
    }

    /// Bilinear height from the four surrounding coarse grid samples.
    /// A non-positive spacing degrades to the fine height.
    pub fn sample(&self, x: f32, z: f32) -> f32 {
        let s = self.spacing;
        if !(s > 0.0) {
            return self.fine(x, z);
        }

        let gx = x / s;
        let gz = z / s;
        let x0 = gx.floor();
        let z0 = gz.floor();
        let dx = gx - x0;
        let dz = gz - z0;

        let (wx0, wz0) = (x0 * s, z0 * s);
        let (wx1, wz1) = (wx0 + s, wz0 + s);

        let s00 = self.fine(wx0, wz0);
        let s10 = self.fine(wx1, wz0);
        let s01 = self.fine(wx0, wz1);
        let s11 = self.fine(wx1, wz1);

        let a = s00 * (1.0 - dx) + s10 * dx;
        let b = s01 * (1.0 - dx) + s11 * dx;
        a * (1.0 - dz) + b * dz
    }

    /// `coarse(x, z) - position.y`, stored per slot at registration.
    pub fn correction_at(&self, position: Vec3) -> f32 {
        self.sample(position.x, position.z) - position.y
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }
}

/// Hermite smoothstep, clamped.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Share of the height correction applied at render time. Opacity already
/// tracks distance through the fade band, so the correction follows the
/// same curve; unbanded categories stay on the fine surface.
#[inline]
pub fn blend_weight(opacity: f32, banded: bool) -> f32 {
    if banded {
        smoothstep(0.0, 1.0, opacity)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billboards::core::HeightFn;

    fn plane() -> CoarseHeightSampler {
        // Linear terrain is reproduced exactly by bilinear sampling.
        CoarseHeightSampler::new(Arc::new(HeightFn(|x: f32, z: f32| 0.5 * x - 0.25 * z + 3.0)), 32.0)
    }

    #[test]
    fn bilinear_reproduces_planes() {
        let s = plane();
        for &(x, z) in &[(0.0, 0.0), (10.0, 7.5), (-45.0, 100.0), (31.9, -0.1)] {
            let exact = 0.5 * x - 0.25 * z + 3.0;
            assert!((s.sample(x, z) - exact).abs() < 1e-3, "({x},{z})");
        }
    }

    #[test]
    fn correction_is_coarse_minus_registered_height() {
        // Bumpy terrain: fine height differs from the coarse grid between samples.
        let s = CoarseHeightSampler::new(
            Arc::new(HeightFn(|x: f32, _z: f32| if (x as i32) % 32 == 16 { 4.0 } else { 0.0 })),
            32.0,
        );
        assert_eq!(s.sample(16.0, 0.0), 0.0);
        assert_eq!(s.fine(16.0, 0.0), 4.0);
        assert_eq!(s.correction_at(Vec3::new(16.0, 4.0, 0.0)), -4.0);
    }

    #[test]
    fn zero_spacing_uses_fine_height() {
        let s = CoarseHeightSampler::new(Arc::new(HeightFn(|x: f32, _z: f32| x * x)), 0.0);
        assert_eq!(s.sample(3.0, 1.0), 9.0);
    }

    #[test]
    fn smoothstep_endpoints_and_midpoint() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(blend_weight(1.0, true), 1.0);
        assert_eq!(blend_weight(1.0, false), 0.0);
    }
}
