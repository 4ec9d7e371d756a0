//! Forest reverb tails
//!
//! Explosions in the forest trail a long reverb one-shot. Too many of them
//! at once smear the mix, so each frame the tails compete: nuke and mortar
//! tails win outright, otherwise only the newest few stay. A losing tail
//! yields by fading to silence while its lowpass closes. Every tail starts
//! panned where its explosion was and drifts back to the centre.

use crate::audio::category::CategoryTraits;
use crate::foundation::math::{lerp, saturate};
use serde::{Deserialize, Serialize};

/// Reverb tail tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    /// Normal tails kept at full level, newest first
    pub max_unyielded_tails: usize,
    /// Time a yielding tail takes to reach silence
    pub yield_duration_ms: f32,
    /// Cutoff of a tail that is not yielding
    pub open_lowpass_hz: f32,
    /// Cutoff of a fully yielded tail
    pub closed_lowpass_hz: f32,
    /// Time the start pan holds
    pub pan_hold_ms: f32,
    /// Time the pan then takes to reach the centre
    pub pan_recenter_ms: f32,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            max_unyielded_tails: 2,
            yield_duration_ms: 1500.0,
            open_lowpass_hz: 30000.0,
            closed_lowpass_hz: 120.0,
            pan_hold_ms: 500.0,
            pan_recenter_ms: 1000.0,
        }
    }
}

/// Per-voice state of a reverb tail
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbTail {
    /// Start order among tails
    pub serial: u64,
    /// Nuke or mortar tail
    pub priority: bool,
    /// Clock time the tail started
    pub started_at_ms: f64,
    /// Pan at start
    pub source_pan: f32,
    /// Clock time the tail began yielding
    pub yield_from_ms: Option<f64>,
}

impl ReverbTail {
    /// Tail state for a voice of `traits`, or `None` if it is no reverb tail
    pub fn for_traits(traits: CategoryTraits, serial: u64, now_ms: f64, source_pan: f32) -> Option<Self> {
        traits.contains(CategoryTraits::FOREST_REVERB).then(|| Self {
            serial,
            priority: traits.contains(CategoryTraits::PRIORITY_REVERB),
            started_at_ms: now_ms,
            source_pan: if source_pan.is_finite() { source_pan.clamp(-1.0, 1.0) } else { 0.0 },
            yield_from_ms: None,
        })
    }

    fn begin_yield(&mut self, now_ms: f64) {
        self.yield_from_ms.get_or_insert(now_ms);
    }

    /// Level multiplier, 1 until yielding and 0 once fully yielded
    pub fn yield_gain(&self, now_ms: f64, config: &ReverbConfig) -> f32 {
        let Some(from) = self.yield_from_ms else {
            return 1.0;
        };
        if config.yield_duration_ms <= 0.0 {
            return 0.0;
        }
        let elapsed = (now_ms - from).max(0.0) as f32;
        1.0 - saturate(elapsed / config.yield_duration_ms)
    }

    /// Pan at `now_ms`: held, then eased linearly to the centre
    pub fn pan(&self, now_ms: f64, config: &ReverbConfig) -> f32 {
        let elapsed = (now_ms - self.started_at_ms).max(0.0) as f32;
        if elapsed <= config.pan_hold_ms {
            return self.source_pan;
        }
        let t = if config.pan_recenter_ms > 0.0 {
            saturate((elapsed - config.pan_hold_ms) / config.pan_recenter_ms)
        } else {
            1.0
        };
        lerp(self.source_pan, 0.0, t)
    }
}

/// Cutoff of a tail at `gain`, never brighter than `ceiling_hz`
pub fn yield_lowpass_hz(gain: f32, ceiling_hz: f32, config: &ReverbConfig) -> f32 {
    let open = config.open_lowpass_hz.min(ceiling_hz);
    let closed = config.closed_lowpass_hz.min(open);
    lerp(open, closed, 1.0 - saturate(gain))
}

/// Decide which audible tails yield this frame
///
/// With a priority tail playing every normal tail yields. Otherwise the
/// newest `max_unyielded_tails` keep their level and older ones yield. A
/// tail that wins again stops yielding. Yield start times are kept once set.
pub fn assign_yields<K>(tails: &mut [(K, ReverbTail)], now_ms: f64, config: &ReverbConfig) {
    if tails.iter().any(|(_, tail)| tail.priority) {
        for (_, tail) in tails.iter_mut() {
            if tail.priority {
                tail.yield_from_ms = None;
            } else {
                tail.begin_yield(now_ms);
            }
        }
        return;
    }

    tails.sort_by_key(|(_, tail)| tail.serial);
    let keep_from = tails.len().saturating_sub(config.max_unyielded_tails);
    for (index, (_, tail)) in tails.iter_mut().enumerate() {
        if index < keep_from {
            tail.begin_yield(now_ms);
        } else {
            tail.yield_from_ms = None;
        }
    }
}
