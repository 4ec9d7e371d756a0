//! Named loop registry
//!
//! A loop is addressed by a caller-chosen id. Each id carries a start token
//! that every `start`/`stop` advances, so a decode that completes after the
//! loop was stopped or restarted is discarded. Volume is split into the
//! desired level requested by the caller and the target level that fades
//! move toward; the per-frame refresh multiplies the target by attenuation
//! and ducking.

use crate::audio::tween::Tween;
use crate::audio::voice_manager::SoundPlayOptions;
use crate::foundation::collections::InstanceId;
use std::collections::{BTreeMap, HashMap};

/// Parameters of `start_loop`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopOptions {
    /// Shared play parameters
    pub play: SoundPlayOptions,
    /// Ramp from silence over this long; `None` uses the configured default
    pub fade_in_ms: Option<f32>,
    /// Start somewhere inside the asset instead of at the beginning
    pub start_at_random_offset: bool,
}

impl LoopOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the volume
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.play.volume = Some(volume);
        self
    }

    /// Place the loop in the world
    pub fn at(mut self, world_x: f32, world_y: f32) -> Self {
        self.play = self.play.at(world_x, world_y);
        self
    }

    /// Set the attenuation range
    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.play.max_distance = Some(max_distance);
        self
    }

    /// Set the fade-in
    pub fn with_fade_in(mut self, fade_in_ms: f32) -> Self {
        self.fade_in_ms = Some(fade_in_ms);
        self
    }

    /// Start at a random position
    pub fn at_random_offset(mut self) -> Self {
        self.start_at_random_offset = true;
        self
    }
}

impl From<SoundPlayOptions> for LoopOptions {
    fn from(play: SoundPlayOptions) -> Self {
        Self {
            play,
            ..Self::default()
        }
    }
}

/// Running volume ramp of a loop
#[derive(Debug, Clone, Copy)]
pub struct LoopFade {
    tween: Tween,
    dispose_when_done: bool,
}

/// Outcome of one fade step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeStep {
    /// No fade or still ramping
    Running,
    /// Reached the target
    Finished,
    /// Reached silence on a stop; the loop must be released
    Dispose,
}

/// Bookkeeping of one live loop
#[derive(Debug)]
pub struct LoopEntry {
    /// Live voice
    pub instance: InstanceId,
    /// Resolved category
    pub category: String,
    /// Level the refresh multiplies with attenuation and ducking
    pub target_volume: f32,
    /// Level the loop is heading toward, zero while stopping
    pub desired_volume: Option<f32>,
    /// Level last asked for by a start or an explicit fade; stops leave it alone
    pub requested_volume: Option<f32>,
    /// Running fade
    pub fade: Option<LoopFade>,
    /// Seek offset to play from once output unlocks
    pub awaiting_unlock: Option<f32>,
}

impl LoopEntry {
    /// Entry for a freshly started voice
    pub fn new(instance: InstanceId, category: &str, target_volume: f32) -> Self {
        Self {
            instance,
            category: category.to_string(),
            target_volume,
            desired_volume: None,
            requested_volume: None,
            fade: None,
            awaiting_unlock: None,
        }
    }

    /// Ramp the target volume, replacing any running fade
    pub fn fade_to(&mut self, volume: f32, duration_ms: f32, dispose_when_done: bool) {
        let to = volume.clamp(0.0, 2.0);
        let from = if self.target_volume.is_finite() { self.target_volume } else { 0.0 };
        self.fade = Some(LoopFade {
            tween: Tween::new(from, to, duration_ms.max(1.0)),
            dispose_when_done,
        });
    }

    /// Cancel a running fade, keeping the current level
    pub fn cancel_fade(&mut self) {
        self.fade = None;
    }

    /// Level a restart without an explicit volume returns to
    pub fn restart_volume(&self, default_volume: f32) -> f32 {
        self.requested_volume.unwrap_or(default_volume)
    }

    /// Whether a stop fade is running
    pub fn is_stopping(&self) -> bool {
        self.fade.is_some_and(|fade| fade.dispose_when_done)
    }

    /// Advance the fade by `delta_ms`
    pub fn advance_fade(&mut self, delta_ms: f32) -> FadeStep {
        let Some(mut fade) = self.fade.take() else {
            return FadeStep::Running;
        };
        self.target_volume = fade.tween.advance(delta_ms);
        if !fade.tween.is_finished() {
            self.fade = Some(fade);
            return FadeStep::Running;
        }
        self.target_volume = fade.tween.target();
        if fade.dispose_when_done {
            FadeStep::Dispose
        } else {
            FadeStep::Finished
        }
    }
}

/// Loops by id, with start tokens and in-progress starts
#[derive(Debug, Default)]
pub struct LoopRegistry {
    entries: BTreeMap<String, LoopEntry>,
    starting: HashMap<String, InstanceId>,
    tokens: HashMap<String, u64>,
}

impl LoopRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Live loop by id
    pub fn get(&self, loop_id: &str) -> Option<&LoopEntry> {
        self.entries.get(loop_id)
    }

    /// Mutable live loop by id
    pub fn get_mut(&mut self, loop_id: &str) -> Option<&mut LoopEntry> {
        self.entries.get_mut(loop_id)
    }

    /// Register a live loop
    pub fn insert(&mut self, loop_id: &str, entry: LoopEntry) {
        self.entries.insert(loop_id.to_string(), entry);
    }

    /// Forget a live loop
    pub fn remove(&mut self, loop_id: &str) -> Option<LoopEntry> {
        self.entries.remove(loop_id)
    }

    /// Ids of live loops, sorted
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Live loops
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LoopEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Number of live loops
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no loop is live
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advance the start token of a loop id
    pub fn bump_token(&mut self, loop_id: &str) -> u64 {
        let token = self.tokens.entry(loop_id.to_string()).or_insert(0);
        *token += 1;
        *token
    }

    /// Current start token of a loop id
    pub fn token(&self, loop_id: &str) -> u64 {
        self.tokens.get(loop_id).copied().unwrap_or(0)
    }

    /// Pending start of a loop id
    pub fn starting(&self, loop_id: &str) -> Option<InstanceId> {
        self.starting.get(loop_id).copied()
    }

    /// Record a pending start
    pub fn set_starting(&mut self, loop_id: &str, instance: InstanceId) {
        self.starting.insert(loop_id.to_string(), instance);
    }

    /// Clear the pending start if it is still `instance`
    pub fn finish_starting(&mut self, loop_id: &str, instance: InstanceId) {
        if self.starting.get(loop_id) == Some(&instance) {
            self.starting.remove(loop_id);
        }
    }

    /// Remove and return the pending start
    pub fn take_starting(&mut self, loop_id: &str) -> Option<InstanceId> {
        self.starting.remove(loop_id)
    }

    /// Forget every trace of a loop id, token included
    pub fn purge(&mut self, loop_id: &str) -> Option<LoopEntry> {
        self.starting.remove(loop_id);
        self.tokens.remove(loop_id);
        self.entries.remove(loop_id)
    }

    /// Loops waiting for output to unlock, with their seek offsets
    pub fn take_unlock_waiters(&mut self) -> Vec<(String, f32)> {
        self.entries
            .iter_mut()
            .filter_map(|(id, entry)| entry.awaiting_unlock.take().map(|seek| (id.clone(), seek)))
            .collect()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.starting.clear();
        self.tokens.clear();
    }
}
