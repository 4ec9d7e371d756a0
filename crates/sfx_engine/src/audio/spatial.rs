//! Spatial audio system
//!
//! Provides camera-relative attenuation and stereo panning. The listener sits
//! at the midpoint of the current view; sources are placed in world
//! coordinates and may omit either axis.

use crate::audio::category::CategoryTraits;
use crate::foundation::math::{lerp, Vec2};
use serde::{Deserialize, Serialize};

/// Configuration for spatial audio
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Range used when a source gives none, in world units
    pub default_max_distance: f32,
    /// Pan span as a fraction of the viewport width
    pub pan_span_factor: f32,
    /// Narrowest pan span, in world units
    pub min_pan_span: f32,
    /// Pan span used before any viewport is known
    pub fallback_pan_span: f32,
    /// Attenuation floor of projectile impacts and explosions
    pub explosion_attenuation_floor: f32,
    /// Cutoff a distant explosion is darkened toward
    pub explosion_far_lowpass_hz: f32,
    /// Cutoff a distant burning loop is darkened toward
    pub burning_loop_far_lowpass_hz: f32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            default_max_distance: 2200.0,
            pan_span_factor: 0.6,
            min_pan_span: 200.0,
            fallback_pan_span: 900.0,
            explosion_attenuation_floor: 0.12,
            explosion_far_lowpass_hz: 2200.0,
            burning_loop_far_lowpass_hz: 900.0,
        }
    }
}

/// Visible world rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width in world units
    pub width: f32,
    /// Height in world units
    pub height: f32,
}

impl Viewport {
    /// Create a viewport
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Center point
    pub fn midpoint(&self) -> Vec2 {
        Vec2::new(self.width.mul_add(0.5, self.x), self.height.mul_add(0.5, self.y))
    }
}

/// Where an instance sits in the world
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Emitter {
    /// Horizontal position; `None` means non-positional
    pub world_x: Option<f32>,
    /// Vertical position; `None` ignores the vertical offset
    pub world_y: Option<f32>,
    /// Attenuation range override
    pub max_distance: Option<f32>,
    /// Fixed pan that wins over position
    pub pan_override: Option<f32>,
}

/// Spatial audio system for camera-relative positioning
#[derive(Debug, Clone)]
pub struct SpatialAudio {
    config: SpatialConfig,
    listener_position: Vec2,
    viewport: Option<Viewport>,
}

impl SpatialAudio {
    /// Create a new spatial audio system
    pub fn new(config: SpatialConfig) -> Self {
        Self {
            config,
            listener_position: Vec2::new(0.0, 0.0),
            viewport: None,
        }
    }

    /// Spatial configuration
    pub fn config(&self) -> &SpatialConfig {
        &self.config
    }

    /// Track a camera view; the listener moves to its midpoint
    pub fn set_viewport(&mut self, viewport: Viewport) {
        let mid = viewport.midpoint();
        if mid.x.is_finite() {
            self.listener_position.x = mid.x;
        }
        if mid.y.is_finite() {
            self.listener_position.y = mid.y;
        }
        self.viewport = Some(viewport);
    }

    /// Set the listener position directly
    pub fn set_listener_position(&mut self, position: Vec2) {
        if position.x.is_finite() && position.y.is_finite() {
            self.listener_position = position;
        }
    }

    /// Current listener position
    pub fn listener_position(&self) -> Vec2 {
        self.listener_position
    }

    /// Attenuation in `[floor, 1]`
    ///
    /// `(1 - d/range)^0.75` shaped, lifted by `floor` (clamped to `0..=0.95`).
    pub fn compute_attenuation(
        &self,
        world_x: Option<f32>,
        world_y: Option<f32>,
        max_distance: Option<f32>,
        floor: f32,
    ) -> f32 {
        let Some(x) = world_x.filter(|x| x.is_finite()) else {
            return 1.0;
        };
        let range = max_distance
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(self.config.default_max_distance);
        let floor = if floor.is_finite() { floor.clamp(0.0, 0.95) } else { 0.0 };

        let dx = x - self.listener_position.x;
        let dy = world_y
            .filter(|y| y.is_finite())
            .map_or(0.0, |y| y - self.listener_position.y);
        let distance = Vec2::new(dx, dy).norm();

        if !distance.is_finite() || distance <= 0.0 {
            return 1.0;
        }
        if distance >= range {
            return floor;
        }

        let k = distance / range;
        let shaped = (1.0 - k).powf(0.75).clamp(0.0, 1.0);
        (1.0 - floor).mul_add(shaped, floor).clamp(floor, 1.0)
    }

    /// Stereo pan in `[-1, 1]`
    pub fn compute_pan(&self, world_x: Option<f32>, pan_override: Option<f32>) -> f32 {
        if let Some(pan) = pan_override.filter(|p| p.is_finite()) {
            return pan.clamp(-1.0, 1.0);
        }
        let Some(x) = world_x.filter(|x| x.is_finite()) else {
            return 0.0;
        };
        let span = self.viewport.map_or(self.config.fallback_pan_span, |view| {
            (view.width * self.config.pan_span_factor).max(self.config.min_pan_span)
        });
        ((x - self.listener_position.x) / span).clamp(-1.0, 1.0)
    }

    /// Pan for an emitter
    pub fn pan_for(&self, emitter: &Emitter) -> f32 {
        self.compute_pan(emitter.world_x, emitter.pan_override)
    }

    /// Attenuation floor for a category
    pub fn attenuation_floor(&self, traits: CategoryTraits) -> f32 {
        if traits.contains(CategoryTraits::PROJECTILE_EXPLOSION) {
            self.config.explosion_attenuation_floor
        } else {
            0.0
        }
    }

    /// Category-aware attenuation for one-shots and exclusives
    pub fn attenuation_for(&self, traits: CategoryTraits, emitter: &Emitter) -> f32 {
        if traits.contains(CategoryTraits::IGNORE_ATTENUATION) {
            return 1.0;
        }
        self.compute_attenuation(
            emitter.world_x,
            emitter.world_y,
            emitter.max_distance,
            self.attenuation_floor(traits),
        )
    }

    /// Plain attenuation for loops
    pub fn loop_attenuation(&self, emitter: &Emitter) -> f32 {
        self.compute_attenuation(emitter.world_x, emitter.world_y, emitter.max_distance, 0.0)
    }

    /// Start-time lowpass for a distant projectile explosion
    ///
    /// `None` for other categories or non-positional emitters.
    pub fn explosion_lowpass_hz(
        &self,
        traits: CategoryTraits,
        emitter: &Emitter,
        attenuation: f32,
        mixer_lowpass_hz: Option<f32>,
    ) -> Option<f32> {
        if !traits.contains(CategoryTraits::PROJECTILE_EXPLOSION) || emitter.world_x.is_none() {
            return None;
        }
        let near = mixer_lowpass_hz.unwrap_or(OPEN_LOWPASS_HZ);
        let far = near.min(self.config.explosion_far_lowpass_hz);
        Some(lerp(near, far, (1.0 - attenuation).clamp(0.0, 1.0)))
    }

    /// Per-frame lowpass of a burning loop at the given attenuation
    pub fn burning_loop_lowpass_hz(&self, attenuation: f32, mixer_lowpass_hz: Option<f32>) -> f32 {
        let near = mixer_lowpass_hz.unwrap_or(OPEN_LOWPASS_HZ);
        let far = near.min(self.config.burning_loop_far_lowpass_hz);
        let t = (1.0 - attenuation).max(0.0).sqrt().clamp(0.0, 1.0);
        lerp(near, far, t)
    }
}

/// Cutoff treated as "no filtering"
pub const OPEN_LOWPASS_HZ: f32 = 30000.0;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spatial() -> SpatialAudio {
        SpatialAudio::new(SpatialConfig::default())
    }

    #[test]
    fn test_non_positional_is_full_volume() {
        assert_eq!(spatial().compute_attenuation(None, Some(10.0), None, 0.3), 1.0);
    }

    #[test]
    fn test_attenuation_example() {
        let spatial = spatial();
        let a = spatial.compute_attenuation(Some(1100.0), None, Some(2200.0), 0.0);
        assert_relative_eq!(a, 0.5_f32.powf(0.75), epsilon = 1e-5);
        assert_relative_eq!(a, 0.5946, epsilon = 1e-4);
    }

    #[test]
    fn test_attenuation_bounds_and_monotonic() {
        let spatial = spatial();
        for floor in [0.0, 0.12, 0.5, 0.95] {
            assert_relative_eq!(spatial.compute_attenuation(Some(0.0), None, Some(2200.0), floor), 1.0);
            assert_relative_eq!(spatial.compute_attenuation(Some(2200.0), None, Some(2200.0), floor), floor);
            let mut previous = 1.0;
            for step in 0..=110 {
                let d = step as f32 * 20.0;
                let a = spatial.compute_attenuation(Some(d), None, Some(2200.0), floor);
                assert!(a >= floor && a <= 1.0, "a={a} at d={d}");
                assert!(a <= previous + 1e-6, "not monotonic at d={d}");
                previous = a;
            }
        }
    }

    #[test]
    fn test_floor_is_clamped() {
        let spatial = spatial();
        assert_relative_eq!(spatial.compute_attenuation(Some(5000.0), None, None, 2.0), 0.95);
        assert_relative_eq!(spatial.compute_attenuation(Some(5000.0), None, None, -1.0), 0.0);
    }

    #[test]
    fn test_vertical_offset_counts() {
        let mut spatial = spatial();
        spatial.set_listener_position(Vec2::new(0.0, 0.0));
        let flat = spatial.compute_attenuation(Some(600.0), None, None, 0.0);
        let diagonal = spatial.compute_attenuation(Some(600.0), Some(800.0), None, 0.0);
        assert!(diagonal < flat);
        let at_range = spatial.compute_attenuation(Some(1320.0), Some(1760.0), None, 0.0);
        assert_relative_eq!(at_range, 0.0);
    }

    #[test]
    fn test_invalid_range_uses_default() {
        let spatial = spatial();
        let a = spatial.compute_attenuation(Some(1100.0), None, Some(-5.0), 0.0);
        let b = spatial.compute_attenuation(Some(1100.0), None, None, 0.0);
        assert_relative_eq!(a, b);
    }

    #[test]
    fn test_pan_clamped_and_centered() {
        let mut spatial = spatial();
        spatial.set_viewport(Viewport::new(0.0, 0.0, 1000.0, 600.0));
        assert_relative_eq!(spatial.compute_pan(Some(500.0), None), 0.0);
        for x in [-1.0e6, -500.0, 0.0, 250.0, 800.0, 1.0e6] {
            let pan = spatial.compute_pan(Some(x), None);
            assert!((-1.0..=1.0).contains(&pan));
        }
        // span = 1000 * 0.6
        assert_relative_eq!(spatial.compute_pan(Some(800.0), None), 0.5);
    }

    #[test]
    fn test_pan_override_and_fallback_span() {
        let spatial = spatial();
        assert_relative_eq!(spatial.compute_pan(Some(100.0), Some(-3.0)), -1.0);
        assert_relative_eq!(spatial.compute_pan(None, None), 0.0);
        assert_relative_eq!(spatial.compute_pan(Some(450.0), None), 0.5);
    }

    #[test]
    fn test_narrow_viewport_uses_min_span() {
        let mut spatial = spatial();
        spatial.set_viewport(Viewport::new(0.0, 0.0, 100.0, 100.0));
        assert_relative_eq!(spatial.compute_pan(Some(150.0), None), 0.5);
    }

    #[test]
    fn test_category_rules() {
        let spatial = spatial();
        let far = Emitter {
            world_x: Some(10_000.0),
            ..Emitter::default()
        };
        let hit = CategoryTraits::of("weapon/he/hit_vehicle");
        let explosion = CategoryTraits::of("weapon/he/explosion");
        let fire = CategoryTraits::of("weapon/he/fire");
        assert_relative_eq!(spatial.attenuation_for(hit, &far), 1.0);
        assert_relative_eq!(spatial.attenuation_for(explosion, &far), 0.12);
        assert_relative_eq!(spatial.attenuation_for(fire, &far), 0.0);
    }

    #[test]
    fn test_explosion_lowpass() {
        let spatial = spatial();
        let traits = CategoryTraits::of("weapon/standard/explosion");
        let emitter = Emitter {
            world_x: Some(100.0),
            ..Emitter::default()
        };
        assert_relative_eq!(spatial.explosion_lowpass_hz(traits, &emitter, 1.0, None).unwrap(), 30000.0);
        assert_relative_eq!(spatial.explosion_lowpass_hz(traits, &emitter, 0.0, Some(8000.0)).unwrap(), 2200.0);
        assert!(spatial
            .explosion_lowpass_hz(CategoryTraits::of("weapon/he/fire"), &emitter, 0.5, None)
            .is_none());
    }

    #[test]
    fn test_burning_loop_lowpass() {
        let spatial = spatial();
        assert_relative_eq!(spatial.burning_loop_lowpass_hz(1.0, None), 30000.0);
        assert_relative_eq!(spatial.burning_loop_lowpass_hz(0.0, None), 900.0);
        assert_relative_eq!(spatial.burning_loop_lowpass_hz(0.0, Some(600.0)), 600.0);
    }
}
