// src/billboards/lod.rs
//! Distance -> billboard opacity.
//!
//! All comparisons run on squared horizontal distances; the only square
//! root is taken inside a fade band, where the interpolation needs it.

use serde::{Deserialize, Serialize};

/// How a category fades against its 3D representation. Distances in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum LodProfile {
    /// Ground cover with no 3D alternative: always drawn.
    #[default]
    AlwaysVisible,
    /// Fades in only while a high-detail model is available for the category;
    /// otherwise behaves like `AlwaysVisible`.
    ModelFallback { near: f32, far: f32 },
    /// Small props with a tight band.
    CloseRange { near: f32, far: f32 },
    /// Large buildings; evaluated over the wider chunk window.
    Structure { near: f32, far: f32 },
}

impl LodProfile {
    pub const MODEL_FALLBACK: Self = LodProfile::ModelFallback { near: 15.0, far: 25.0 };
    pub const CLOSE_RANGE: Self = LodProfile::CloseRange { near: 10.0, far: 15.0 };
    pub const STRUCTURE: Self = LodProfile::Structure { near: 95.0, far: 105.0 };

    pub fn is_structure(&self) -> bool {
        matches!(self, LodProfile::Structure { .. })
    }

    /// Configured `(near, far)`, regardless of model availability.
    pub fn distances(&self) -> Option<(f32, f32)> {
        match *self {
            LodProfile::AlwaysVisible => None,
            LodProfile::ModelFallback { near, far }
            | LodProfile::CloseRange { near, far }
            | LodProfile::Structure { near, far } => Some((near, far)),
        }
    }

    /// Whether a band applies right now.
    pub fn is_banded(&self, has_model: bool) -> bool {
        match self {
            LodProfile::AlwaysVisible => false,
            LodProfile::ModelFallback { .. } => has_model,
            LodProfile::CloseRange { .. } | LodProfile::Structure { .. } => true,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.distances() {
            Some((near, far)) if !(near.is_finite() && far.is_finite()) => {
                Err(format!("non-finite fade band {near}..{far}"))
            }
            Some((near, far)) if near < 0.0 || far <= near => {
                Err(format!("fade band {near}..{far} must satisfy 0 <= near < far"))
            }
            _ => Ok(()),
        }
    }
}

/// Precomputed squared thresholds for one band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FadeBand {
    pub near: f32,
    pub far: f32,
    pub near_sq: f32,
    pub far_sq: f32,
    /// Opacity 0 and closer than this: nothing to do this tick.
    pub skip_near_sq: f32,
    /// Opacity 1 and farther than this: nothing to do this tick.
    pub skip_far_sq: f32,
}

impl FadeBand {
    pub fn new(near: f32, far: f32, skip_near_factor: f32, skip_far_factor: f32) -> Self {
        let skip_near = near * skip_near_factor.min(1.0);
        let skip_far = far * skip_far_factor.max(1.0);
        Self {
            near,
            far,
            near_sq: near * near,
            far_sq: far * far,
            skip_near_sq: skip_near * skip_near,
            skip_far_sq: skip_far * skip_far,
        }
    }

    /// 0 at or inside `near`, 1 at or beyond `far`, linear in distance between.
    #[inline]
    pub fn opacity_at(&self, dist_sq: f32) -> f32 {
        if dist_sq <= self.near_sq {
            0.0
        } else if dist_sq >= self.far_sq {
            1.0
        } else {
            ((dist_sq.sqrt() - self.near) / (self.far - self.near)).clamp(0.0, 1.0)
        }
    }

    /// Deep inside a stable region for the current opacity.
    #[inline]
    pub fn is_settled(&self, current: f32, dist_sq: f32) -> bool {
        (current == 0.0 && dist_sq < self.skip_near_sq) || (current == 1.0 && dist_sq > self.skip_far_sq)
    }
}

/// Target opacity ignoring the current state.
#[inline]
pub fn target_opacity(band: Option<&FadeBand>, dist_sq: f32) -> f32 {
    band.map_or(1.0, |b| b.opacity_at(dist_sq))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LodDecision {
    /// Short-circuited by the skip thresholds.
    Skip,
    /// Evaluated; change below the noise threshold.
    Unchanged,
    /// Write this opacity.
    Change(f32),
}

/// Decide what to do with one instance. `allow_skip = false` forces a full
/// evaluation (used when an instance leaves the LOD window).
pub fn decide(band: Option<&FadeBand>, current: f32, dist_sq: f32, epsilon: f32, allow_skip: bool) -> LodDecision {
    if allow_skip {
        let settled = match band {
            Some(b) => b.is_settled(current, dist_sq),
            None => current == 1.0,
        };
        if settled {
            return LodDecision::Skip;
        }
    }

    let target = target_opacity(band, dist_sq);
    if target == current {
        return LodDecision::Unchanged;
    }
    // Endpoints always settle so that "exactly 0 / exactly 1" holds.
    let endpoint = target == 0.0 || target == 1.0;
    if endpoint || (target - current).abs() > epsilon {
        LodDecision::Change(target)
    } else {
        LodDecision::Unchanged
    }
}

/// Counters for one LOD tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LodTickStats {
    /// Tracked chunks inside the window.
    pub chunks: u32,
    /// Instances that passed the window membership test.
    pub visited: u32,
    pub skipped: u32,
    pub changed: u32,
    /// Instances settled after their chunk left the window.
    pub settled: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band() -> FadeBand {
        FadeBand::new(15.0, 25.0, 0.7, 1.3)
    }

    #[test]
    fn opacity_is_clamped_outside_the_band() {
        let b = band();
        assert_eq!(b.opacity_at(0.0), 0.0);
        assert_eq!(b.opacity_at(14.9 * 14.9), 0.0);
        assert_eq!(b.opacity_at(15.0 * 15.0), 0.0);
        assert_eq!(b.opacity_at(25.0 * 25.0), 1.0);
        assert_eq!(b.opacity_at(1.0e6), 1.0);
    }

    #[test]
    fn opacity_is_monotonic_through_the_band() {
        let b = band();
        let mut prev = 0.0;
        for step in 0..=400 {
            let d = 10.0 + step as f32 * 0.05;
            let o = b.opacity_at(d * d);
            assert!(o >= prev, "opacity dropped at d={d}: {o} < {prev}");
            assert!((0.0..=1.0).contains(&o));
            prev = o;
        }
        assert!((b.opacity_at(20.0 * 20.0) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn skip_thresholds_scale_distances() {
        let b = band();
        assert!((b.skip_near_sq - 10.5 * 10.5).abs() < 1e-3);
        assert!((b.skip_far_sq - 32.5 * 32.5).abs() < 1e-3);
        assert!(b.is_settled(0.0, 10.0 * 10.0));
        assert!(!b.is_settled(0.3, 10.0 * 10.0));
        assert!(b.is_settled(1.0, 40.0 * 40.0));
        assert!(!b.is_settled(1.0, 30.0 * 30.0));
    }

    #[test]
    fn skip_never_changes_the_outcome() {
        // Anything the short-circuit skips must already equal the target.
        let b = band();
        for current in [0.0f32, 0.3, 1.0] {
            for step in 0..200 {
                let d = step as f32 * 0.25;
                let d2 = d * d;
                if decide(Some(&b), current, d2, 0.02, true) == LodDecision::Skip {
                    assert_eq!(target_opacity(Some(&b), d2), current);
                }
            }
        }
    }

    #[test]
    fn noise_threshold_suppresses_small_changes_but_not_endpoints() {
        let b = band();
        let d2 = 20.0f32 * 20.0; // target 0.5
        assert_eq!(decide(Some(&b), 0.49, d2, 0.02, true), LodDecision::Unchanged);
        assert!(matches!(decide(Some(&b), 0.4, d2, 0.02, true), LodDecision::Change(_)));
        // 0.99 -> 1.0 is below epsilon but must settle.
        assert_eq!(decide(Some(&b), 0.99, 30.0 * 30.0, 0.02, true), LodDecision::Change(1.0));
        assert_eq!(decide(Some(&b), 0.01, 5.0 * 5.0, 0.02, true), LodDecision::Change(0.0));
    }

    #[test]
    fn unbanded_profiles_hold_full_opacity() {
        assert_eq!(decide(None, 1.0, 0.0, 0.02, true), LodDecision::Skip);
        assert_eq!(decide(None, 1.0, 0.0, 0.02, false), LodDecision::Unchanged);
        assert_eq!(decide(None, 0.0, 0.0, 0.02, true), LodDecision::Change(1.0));
    }

    #[test]
    fn model_fallback_needs_a_model() {
        assert!(!LodProfile::MODEL_FALLBACK.is_banded(false));
        assert!(LodProfile::MODEL_FALLBACK.is_banded(true));
        assert!(LodProfile::CLOSE_RANGE.is_banded(false));
        assert!(!LodProfile::AlwaysVisible.is_banded(true));
        assert!(LodProfile::STRUCTURE.is_structure());
    }

    #[test]
    fn invalid_bands_are_rejected() {
        assert!(LodProfile::CloseRange { near: 10.0, far: 10.0 }.validate().is_err());
        assert!(LodProfile::Structure { near: -1.0, far: 10.0 }.validate().is_err());
        assert!(LodProfile::ModelFallback { near: 1.0, far: f32::NAN }.validate().is_err());
        assert!(LodProfile::STRUCTURE.validate().is_ok());
        assert!(LodProfile::AlwaysVisible.validate().is_ok());
    }
}
