//! Sidechain ducking
//!
//! Loud categories (weapons, vehicles) pull ambience beds and music down
//! while they play. Each frame the manager feeds every playing trigger into
//! a [`SidechainScan`]; [`DuckingEngine::update`] turns the scan into target
//! levels and eases the current levels toward them, faster on the way down
//! than on the way back up.
//!
//! Vehicle cookoffs additionally engage a focus mode that softens and
//! darkens everything that is not a vehicle.

use crate::audio::category::{has_segment, normalize, CategoryTraits};
use crate::audio::spatial::OPEN_LOWPASS_HZ;
use crate::foundation::math::{lerp, saturate};
use serde::{Deserialize, Serialize};

/// Ducking tunables
///
/// Rates are per-frame interpolation factors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckingConfig {
    /// Ambience level under a full-strength trigger
    pub ambience_floor: f32,
    /// Music level under a full-strength trigger
    pub music_floor: f32,
    /// Share of the stacked strength applied to music
    pub music_strength_scale: f32,
    /// Music lowpass under a full high-cut
    pub music_lowpass_floor_hz: f32,
    /// Strength added per extra simultaneous trigger
    pub stack_per_trigger: f32,
    /// Strength added per extra trigger while cookoff focus is active
    pub cookoff_stack_per_trigger: f32,
    /// Ambience ease toward a lower level
    pub ambience_attack: f32,
    /// Ambience ease toward a higher level
    pub ambience_release: f32,
    /// Music ease toward a lower level
    pub music_attack: f32,
    /// Music ease toward a higher level
    pub music_release: f32,
    /// Music lowpass ease toward a darker cutoff
    pub lowpass_attack: f32,
    /// Music lowpass ease toward a brighter cutoff
    pub lowpass_release: f32,
    /// Level of non-vehicle sounds during cookoff focus
    pub cookoff_duck: f32,
    /// Lowpass of non-vehicle sounds during cookoff focus
    pub cookoff_lowpass_hz: f32,
    /// Share of the cookoff duck applied to music
    pub cookoff_music_share: f32,
    /// Cookoff duck ease toward a lower level
    pub cookoff_duck_attack: f32,
    /// Cookoff duck ease toward a higher level
    pub cookoff_duck_release: f32,
    /// Cookoff lowpass ease toward a darker cutoff
    pub cookoff_lowpass_attack: f32,
    /// Cookoff lowpass ease toward a brighter cutoff
    pub cookoff_lowpass_release: f32,
}

impl Default for DuckingConfig {
    fn default() -> Self {
        Self {
            ambience_floor: 0.1,
            music_floor: 0.55,
            music_strength_scale: 0.25,
            music_lowpass_floor_hz: 4600.0,
            stack_per_trigger: 0.04,
            cookoff_stack_per_trigger: 0.015,
            ambience_attack: 0.12,
            ambience_release: 0.026,
            music_attack: 0.16,
            music_release: 0.05,
            lowpass_attack: 0.24,
            lowpass_release: 0.065,
            cookoff_duck: 0.88,
            cookoff_lowpass_hz: 14000.0,
            cookoff_music_share: 0.25,
            cookoff_duck_attack: 0.12,
            cookoff_duck_release: 0.045,
            cookoff_lowpass_attack: 0.14,
            cookoff_lowpass_release: 0.06,
        }
    }
}

/// How hard a category pushes ambience and music down, `0..=1`
pub fn sidechain_strength(category: &str) -> f32 {
    let key = normalize(category).to_ascii_lowercase();
    let seg = |name: &str| has_segment(&key, name);

    if key.starts_with("weapon/") {
        return if seg("fire") || seg("explosion") {
            1.0
        } else if seg("hit_vehicle") {
            0.96
        } else if seg("flight_loop") {
            0.92
        } else if seg("reverb_forest_after_explosion") {
            0.84
        } else {
            0.8
        };
    }

    if key.starts_with("vehicle/") {
        return if seg("fire") {
            0.95
        } else if seg("cookoff") || seg("explosion") {
            if key.starts_with("vehicle/enemy_") { 0.18 } else { 0.3 }
        } else if seg("flight_loop") {
            0.88
        } else if seg("idle_engine_loop") {
            0.74
        } else if seg("cruise_loop") {
            0.78
        } else {
            0.82
        };
    }

    0.0
}

/// How hard a category darkens music, `0..=1`
pub fn high_cut_strength(category: &str) -> f32 {
    let key = normalize(category).to_ascii_lowercase();
    let seg = |name: &str| has_segment(&key, name);

    if key.starts_with("weapon/") {
        return if seg("fire") || seg("explosion") {
            1.0
        } else if seg("flight_loop") {
            0.86
        } else if seg("reverb_forest_after_explosion") {
            0.8
        } else {
            0.42
        };
    }

    if key.starts_with("vehicle/") {
        return if seg("fire") {
            0.9
        } else if seg("cookoff") || seg("explosion") {
            if key.starts_with("vehicle/enemy_") { 0.08 } else { 0.14 }
        } else {
            0.28
        };
    }

    0.0
}

/// Triggers seen during one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SidechainScan {
    /// Strongest sidechain strength
    pub strength: f32,
    /// Strongest high-cut strength
    pub high_cut: f32,
    /// Playing instances with a non-zero sidechain strength
    pub triggers: usize,
}

impl SidechainScan {
    /// Empty scan
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one playing instance
    pub fn inspect(&mut self, category: &str) {
        let strength = sidechain_strength(category);
        if strength > 0.0 {
            self.strength = self.strength.max(strength);
            self.triggers += 1;
        }
        self.high_cut = self.high_cut.max(high_cut_strength(category));
    }

    /// Nothing further can raise the result
    pub fn is_saturated(&self) -> bool {
        self.strength >= 0.99 && self.high_cut >= 0.99 && self.triggers >= 3
    }
}

fn ease(current: f32, target: f32, attack: f32, release: f32) -> f32 {
    let speed = if target < current { attack } else { release };
    lerp(current, target, speed)
}

/// Smoothed ducking levels
#[derive(Debug, Clone)]
pub struct DuckingEngine {
    config: DuckingConfig,
    ambience_duck: f32,
    music_duck: f32,
    music_lowpass_hz: f32,
    cookoff_active: bool,
    cookoff_duck: f32,
    cookoff_lowpass_hz: f32,
}

impl DuckingEngine {
    /// Engine at rest: nothing ducked, filters open
    pub fn new(config: DuckingConfig) -> Self {
        Self {
            config,
            ambience_duck: 1.0,
            music_duck: 1.0,
            music_lowpass_hz: OPEN_LOWPASS_HZ,
            cookoff_active: false,
            cookoff_duck: 1.0,
            cookoff_lowpass_hz: OPEN_LOWPASS_HZ,
        }
    }

    /// Ducking configuration
    pub fn config(&self) -> &DuckingConfig {
        &self.config
    }

    /// Ease the cookoff focus levels; call before [`DuckingEngine::update`]
    pub fn update_cookoff(&mut self, active: bool) {
        let c = &self.config;
        self.cookoff_active = active;
        let (duck, lowpass) = if active {
            (c.cookoff_duck, c.cookoff_lowpass_hz)
        } else {
            (1.0, OPEN_LOWPASS_HZ)
        };
        self.cookoff_duck = ease(self.cookoff_duck, duck, c.cookoff_duck_attack, c.cookoff_duck_release);
        self.cookoff_lowpass_hz = ease(
            self.cookoff_lowpass_hz,
            lowpass,
            c.cookoff_lowpass_attack,
            c.cookoff_lowpass_release,
        );
    }

    /// Ease ambience and music levels toward this frame's scan
    pub fn update(&mut self, scan: &SidechainScan) {
        let c = &self.config;
        let stack = if self.cookoff_active {
            c.cookoff_stack_per_trigger
        } else {
            c.stack_per_trigger
        };
        #[allow(clippy::cast_precision_loss)]
        let extra = scan.triggers.saturating_sub(1) as f32;
        let stacked = saturate(extra.mul_add(stack, scan.strength));

        let ambience_target = lerp(1.0, c.ambience_floor, stacked);
        let music_target = lerp(1.0, c.music_floor, saturate(stacked * c.music_strength_scale));
        let lowpass_target = lerp(
            OPEN_LOWPASS_HZ,
            c.music_lowpass_floor_hz,
            saturate(scan.high_cut * c.music_strength_scale),
        );

        self.ambience_duck = ease(self.ambience_duck, ambience_target, c.ambience_attack, c.ambience_release);
        self.music_duck = ease(self.music_duck, music_target, c.music_attack, c.music_release);
        self.music_lowpass_hz = ease(self.music_lowpass_hz, lowpass_target, c.lowpass_attack, c.lowpass_release);
    }

    /// Multiplier for ambience beds
    pub fn ambience_duck(&self) -> f32 {
        self.ambience_duck
    }

    /// Multiplier for music
    pub fn music_duck(&self) -> f32 {
        self.music_duck
    }

    /// Lowpass cutoff for music
    pub fn music_lowpass_hz(&self) -> f32 {
        self.music_lowpass_hz
    }

    /// Whether a cookoff was playing this frame
    pub fn cookoff_active(&self) -> bool {
        self.cookoff_active
    }

    /// Cookoff focus multiplier for a category
    pub fn cookoff_duck_for(&self, traits: CategoryTraits) -> f32 {
        if traits.contains(CategoryTraits::VEHICLE) {
            1.0
        } else if traits.contains(CategoryTraits::MUSIC) {
            lerp(1.0, self.cookoff_duck, self.config.cookoff_music_share)
        } else {
            self.cookoff_duck
        }
    }

    /// Focus lowpass for a category, `None` when it should stay untouched
    pub fn cookoff_lowpass_for(&self, traits: CategoryTraits) -> Option<f32> {
        let exempt = traits.intersects(CategoryTraits::VEHICLE | CategoryTraits::MUSIC);
        (self.cookoff_active && !exempt).then_some(self.cookoff_lowpass_hz)
    }
}

impl Default for DuckingEngine {
    fn default() -> Self {
        Self::new(DuckingConfig::default())
    }
}
