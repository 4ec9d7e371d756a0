//! Voice management system
//!
//! Owns every playback instance the engine knows about, live or still waiting
//! for its asset, keyed by [`InstanceId`]. One-shots, exclusive slots and
//! fading-out voices are tracked here; named loops keep their own registry
//! in [`crate::audio::loops`] but store their voices in the same map.
//!
//! Also hosts [`PlayGate`], the per-category cooldown and concurrency check.

use crate::audio::asset_cache::LoadFuture;
use crate::audio::backend::{AudioDevice, SoundHandle};
use crate::audio::category::CategoryTraits;
use crate::audio::mixer::MixerSettings;
use crate::audio::reverb::ReverbTail;
use crate::audio::signal_chain::SignalChain;
use crate::audio::spatial::Emitter;
use crate::audio::tween::Tween;
use crate::foundation::collections::{InstanceId, InstanceMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registry an instance belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceOwner {
    /// Fire-and-forget
    OneShot,
    /// Exclusive slot id
    Exclusive(String),
    /// Named loop id
    Loop(String),
    /// Superseded exclusive fading to silence
    Fading,
}

/// Per-play parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoundPlayOptions {
    /// Volume before mixer gain, defaults to 1
    pub volume: Option<f32>,
    /// Playback rate, defaults to 1
    pub rate: Option<f32>,
    /// Pitch offset in cents, added to the mixer offset
    pub detune: Option<f32>,
    /// Horizontal world position
    pub world_x: Option<f32>,
    /// Vertical world position
    pub world_y: Option<f32>,
    /// Fixed stereo pan
    pub pan: Option<f32>,
    /// Attenuation range
    pub max_distance: Option<f32>,
    /// Minimum time between plays of the same category
    pub cooldown_ms: Option<f32>,
    /// Recompute pan and attenuation every frame
    pub track_position: bool,
}

fn finite(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite())
}

impl SoundPlayOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the volume
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Set the playback rate
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set the pitch offset
    pub fn with_detune(mut self, cents: f32) -> Self {
        self.detune = Some(cents);
        self
    }

    /// Place the sound in the world
    pub fn at(mut self, world_x: f32, world_y: f32) -> Self {
        self.world_x = Some(world_x);
        self.world_y = Some(world_y);
        self
    }

    /// Place the sound on the horizontal axis only
    pub fn at_x(mut self, world_x: f32) -> Self {
        self.world_x = Some(world_x);
        self
    }

    /// Fix the stereo pan
    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = Some(pan);
        self
    }

    /// Set the attenuation range
    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = Some(max_distance);
        self
    }

    /// Set the per-category cooldown
    pub fn with_cooldown(mut self, cooldown_ms: f32) -> Self {
        self.cooldown_ms = Some(cooldown_ms);
        self
    }

    /// Follow the emitter position every frame
    pub fn tracking(mut self) -> Self {
        self.track_position = true;
        self
    }

    /// Volume with non-finite input treated as absent
    pub fn volume_or_default(&self) -> f32 {
        self.explicit_volume().unwrap_or(1.0)
    }

    /// Volume only when one was given and is finite
    pub fn explicit_volume(&self) -> Option<f32> {
        finite(self.volume)
    }

    /// Rate with non-finite or non-positive input treated as absent
    pub fn rate_or_default(&self) -> f32 {
        finite(self.rate).filter(|r| *r > 0.0).unwrap_or(1.0)
    }

    /// Detune with non-finite input treated as absent
    pub fn detune_or_default(&self) -> f32 {
        finite(self.detune).unwrap_or(0.0)
    }

    /// World placement of these options
    pub fn emitter(&self) -> Emitter {
        Emitter {
            world_x: finite(self.world_x),
            world_y: finite(self.world_y),
            max_distance: finite(self.max_distance),
            pan_override: finite(self.pan),
        }
    }
}

/// Loop-only start parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopStart {
    /// Ramp from silence over this long, 0 for none
    pub fade_in_ms: f32,
    /// Start somewhere inside the asset
    pub random_offset: bool,
}

/// A play request waiting for its asset
#[derive(Clone)]
pub struct PendingPlay {
    /// Registry the instance joins once live
    pub owner: VoiceOwner,
    /// Token captured at request time
    pub token: u64,
    /// Category as requested
    pub requested: String,
    /// Manifest category it resolved to
    pub category: String,
    /// Chosen source id
    pub source_id: String,
    /// Decode completion
    pub future: LoadFuture,
    /// Play parameters
    pub options: SoundPlayOptions,
    /// Present for loops
    pub loop_start: Option<LoopStart>,
}

/// Which per-frame lowpass a cutoff came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowpassSource {
    /// Distance muffling of far emitters
    Distance,
    /// Cookoff focus
    Focus,
    /// Music sidechain
    Music,
    /// Reverb tail yielding
    Reverb,
}

/// A live playback instance
#[derive(Debug)]
pub struct Voice {
    /// Registry it belongs to
    pub owner: VoiceOwner,
    /// Device instance
    pub handle: SoundHandle,
    /// Resolved category
    pub category: String,
    /// Role flags of the category
    pub traits: CategoryTraits,
    /// Source id that was played
    pub source_id: String,
    /// Mixer settings at start
    pub mixer: MixerSettings,
    /// World placement
    pub emitter: Emitter,
    /// `volume × mixer gain`
    pub base_volume: f32,
    /// Attenuation computed at start, used when not tracking
    pub static_attenuation: f32,
    /// Recompute placement every frame
    pub track_position: bool,
    /// Filters and parameter ramps
    pub chain: SignalChain,
    /// Last volume written to the device
    pub volume: f32,
    /// Fade-out of a superseded exclusive
    pub fade_out: Option<Tween>,
    /// Last cookoff focus cutoff applied
    pub focus_lowpass_hz: Option<f32>,
    /// Last distance cutoff applied
    pub distance_lowpass_hz: Option<f32>,
    /// Last music ducking cutoff applied
    pub music_lowpass_hz: Option<f32>,
    /// Last reverb yield cutoff applied
    pub reverb_lowpass_hz: Option<f32>,
    /// Forest reverb tail state
    pub reverb: Option<ReverbTail>,
}

impl Voice {
    /// Fresh voice with no filters and no fades
    pub fn new(owner: VoiceOwner, handle: SoundHandle, category: &str, source_id: &str, mixer: MixerSettings) -> Self {
        Self {
            owner,
            handle,
            category: category.to_string(),
            traits: CategoryTraits::of(category),
            source_id: source_id.to_string(),
            mixer,
            emitter: Emitter::default(),
            base_volume: 1.0,
            static_attenuation: 1.0,
            track_position: false,
            chain: SignalChain::new(),
            volume: 0.0,
            fade_out: None,
            focus_lowpass_hz: None,
            distance_lowpass_hz: None,
            music_lowpass_hz: None,
            reverb_lowpass_hz: None,
            reverb: None,
        }
    }

    /// Write a volume to the device; an error means the instance is gone
    pub fn apply_volume(&mut self, device: &mut dyn AudioDevice, volume: f32) -> bool {
        if device.set_volume(self.handle, volume).is_err() {
            return false;
        }
        self.volume = volume;
        true
    }

    /// Lowpass the category starts from
    pub fn base_lowpass_hz(&self) -> f32 {
        self.mixer.lowpass().unwrap_or(crate::audio::spatial::OPEN_LOWPASS_HZ)
    }

    /// Reapply a lowpass cutoff when it moved more than `threshold` Hz from the last one
    pub fn retune_lowpass(&mut self, device: &mut dyn AudioDevice, source: LowpassSource, hz: f32, threshold: f32) {
        let last = match source {
            LowpassSource::Distance => &mut self.distance_lowpass_hz,
            LowpassSource::Focus => &mut self.focus_lowpass_hz,
            LowpassSource::Music => &mut self.music_lowpass_hz,
            LowpassSource::Reverb => &mut self.reverb_lowpass_hz,
        };
        if last.is_some_and(|previous| (previous - hz).abs() <= threshold) {
            return;
        }
        *last = Some(hz);
        if let Err(e) = self.chain.set_lowpass(device, self.handle, hz) {
            log::trace!("Lowpass update on '{}' failed: {e}", self.category);
        }
    }

    /// Put the lowpass back to the mixer cutoff and forget per-frame cutoffs
    pub fn restore_base_lowpass(&mut self, device: &mut dyn AudioDevice) {
        self.focus_lowpass_hz = None;
        self.distance_lowpass_hz = None;
        self.music_lowpass_hz = None;
        self.reverb_lowpass_hz = None;
        if self.chain.lowpass_hz().is_none() {
            return;
        }
        let base = self.base_lowpass_hz();
        if let Err(e) = self.chain.set_lowpass(device, self.handle, base) {
            log::trace!("Lowpass restore on '{}' failed: {e}", self.category);
        }
    }

    /// Undo a reverb yield sweep, back to the distance or mixer cutoff
    ///
    /// The focus memo is cleared so an active cookoff focus reapplies.
    pub fn release_reverb_lowpass(&mut self, device: &mut dyn AudioDevice) {
        if self.reverb_lowpass_hz.take().is_none() {
            return;
        }
        self.focus_lowpass_hz = None;
        let hz = self.distance_lowpass_hz.unwrap_or_else(|| self.base_lowpass_hz());
        if let Err(e) = self.chain.set_lowpass(device, self.handle, hz) {
            log::trace!("Lowpass release on '{}' failed: {e}", self.category);
        }
    }

    /// Detach filters and release the device instance
    pub fn release(&mut self, device: &mut dyn AudioDevice) {
        self.chain.detach(device, self.handle);
        if let Err(e) = device.stop(self.handle) {
            log::trace!("Stop of released instance failed: {e}");
        }
        device.destroy(self.handle);
    }
}

/// Storage entry of the instance map
pub enum Slot {
    /// Waiting for the asset
    Pending(PendingPlay),
    /// Playing or paused on the device
    Live(Voice),
}

/// Instance registry for one-shots and exclusive slots
#[derive(Default)]
pub struct VoiceRegistry {
    slots: InstanceMap<Slot>,
    by_handle: HashMap<SoundHandle, InstanceId>,
    pending: Vec<InstanceId>,
    one_shots: Vec<InstanceId>,
    exclusive: HashMap<String, InstanceId>,
    exclusive_tokens: HashMap<String, u64>,
    fading: Vec<InstanceId>,
}

impl VoiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending play
    pub fn insert_pending(&mut self, pending: PendingPlay) -> InstanceId {
        let id = self.slots.insert(Slot::Pending(pending));
        self.pending.push(id);
        id
    }

    /// Pending plays in request order
    pub fn pending_ids(&self) -> Vec<InstanceId> {
        self.pending.clone()
    }

    /// Pending play by id
    pub fn pending(&self, id: InstanceId) -> Option<&PendingPlay> {
        match self.slots.get(id) {
            Some(Slot::Pending(pending)) => Some(pending),
            _ => None,
        }
    }

    /// Promote a pending slot to a live voice and join its registry
    pub fn go_live(&mut self, id: InstanceId, voice: Voice) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        self.pending.retain(|p| *p != id);
        self.by_handle.insert(voice.handle, id);
        match &voice.owner {
            VoiceOwner::OneShot => self.one_shots.push(id),
            VoiceOwner::Exclusive(slot_id) => {
                self.exclusive.insert(slot_id.clone(), id);
            }
            VoiceOwner::Fading => self.fading.push(id),
            VoiceOwner::Loop(_) => {}
        }
        *slot = Slot::Live(voice);
    }

    /// Live voice by id
    pub fn live(&self, id: InstanceId) -> Option<&Voice> {
        match self.slots.get(id) {
            Some(Slot::Live(voice)) => Some(voice),
            _ => None,
        }
    }

    /// Mutable live voice by id
    pub fn live_mut(&mut self, id: InstanceId) -> Option<&mut Voice> {
        match self.slots.get_mut(id) {
            Some(Slot::Live(voice)) => Some(voice),
            _ => None,
        }
    }

    /// Whether the id still names a pending or live instance
    pub fn contains(&self, id: InstanceId) -> bool {
        self.slots.contains_key(id)
    }

    /// Instance created for a device handle
    pub fn id_for_handle(&self, handle: SoundHandle) -> Option<InstanceId> {
        self.by_handle.get(&handle).copied()
    }

    /// Live one-shots in start order
    pub fn one_shot_ids(&self) -> Vec<InstanceId> {
        self.one_shots.clone()
    }

    /// Live exclusive slot occupants
    pub fn exclusive_ids(&self) -> Vec<(String, InstanceId)> {
        let mut ids: Vec<_> = self.exclusive.iter().map(|(slot, id)| (slot.clone(), *id)).collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids
    }

    /// Occupant of an exclusive slot
    pub fn exclusive(&self, slot_id: &str) -> Option<InstanceId> {
        self.exclusive.get(slot_id).copied()
    }

    /// Voices fading out after being superseded
    pub fn fading_ids(&self) -> Vec<InstanceId> {
        self.fading.clone()
    }

    /// Advance a slot's token, invalidating older requests
    pub fn bump_exclusive_token(&mut self, slot_id: &str) -> u64 {
        let token = self.exclusive_tokens.entry(slot_id.to_string()).or_insert(0);
        *token += 1;
        *token
    }

    /// Current token of a slot
    pub fn exclusive_token(&self, slot_id: &str) -> u64 {
        self.exclusive_tokens.get(slot_id).copied().unwrap_or(0)
    }

    /// Detach a slot's occupant without releasing it
    pub fn take_exclusive(&mut self, slot_id: &str) -> Option<InstanceId> {
        self.exclusive.remove(slot_id)
    }

    /// Move a live voice to the fading list
    pub fn start_fading(&mut self, id: InstanceId, fade: Tween) {
        self.one_shots.retain(|o| *o != id);
        self.exclusive.retain(|_, o| *o != id);
        if let Some(Slot::Live(voice)) = self.slots.get_mut(id) {
            voice.owner = VoiceOwner::Fading;
            voice.fade_out = Some(fade);
            if !self.fading.contains(&id) {
                self.fading.push(id);
            }
        }
    }

    /// Drop an instance from every list; the caller releases the device side
    pub fn remove(&mut self, id: InstanceId) -> Option<Slot> {
        let slot = self.slots.remove(id)?;
        self.pending.retain(|p| *p != id);
        self.one_shots.retain(|o| *o != id);
        self.fading.retain(|f| *f != id);
        self.exclusive.retain(|_, o| *o != id);
        if let Slot::Live(voice) = &slot {
            self.by_handle.remove(&voice.handle);
        }
        Some(slot)
    }

    /// Remove an instance and release its device resources
    pub fn dispose(&mut self, id: InstanceId, device: &mut dyn AudioDevice) {
        if let Some(Slot::Live(mut voice)) = self.remove(id) {
            voice.release(device);
        }
    }

    /// Remove a broken exclusive occupant together with its token
    pub fn forget_exclusive(&mut self, slot_id: &str) {
        self.exclusive.remove(slot_id);
        self.exclusive_tokens.remove(slot_id);
    }

    /// All instance ids, pending and live
    pub fn all_ids(&self) -> Vec<InstanceId> {
        self.slots.keys().collect()
    }

    /// Number of instances, pending and live
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forget all slot tokens
    pub fn clear_tokens(&mut self) {
        self.exclusive_tokens.clear();
    }
}

/// Limit on simultaneously playing one-shots of matching categories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyCap {
    /// Substring of the category path
    pub pattern: String,
    /// Playing one-shots allowed before new plays are refused
    pub max_active: usize,
}

impl ConcurrencyCap {
    /// Create a cap
    pub fn new(pattern: &str, max_active: usize) -> Self {
        Self {
            pattern: pattern.to_string(),
            max_active,
        }
    }

    /// Caps shipped with the game mix
    pub fn default_caps() -> Vec<Self> {
        vec![
            Self::new("killed_humans_and_animals_by_shell", 1),
            Self::new("environment/forest/point_3d/static/buildings/default/partial_collapse", 2),
        ]
    }
}

/// Cooldown and concurrency check run before a source is picked
#[derive(Debug, Default)]
pub struct PlayGate {
    caps: Vec<ConcurrencyCap>,
    last_played: HashMap<String, f64>,
}

/// Prefix of the stamps loops leave in the cooldown table
pub const LOOP_STAMP_PREFIX: &str = "__loop:";

impl PlayGate {
    /// Create a gate with the given caps
    pub fn new(caps: Vec<ConcurrencyCap>) -> Self {
        Self {
            caps,
            last_played: HashMap::new(),
        }
    }

    /// Decide whether `category` may play now
    ///
    /// `active` lists the categories of one-shots currently playing. A
    /// successful play with a cooldown records `now_ms` for the category.
    pub fn should_play<'a>(
        &mut self,
        category: &str,
        cooldown_ms: Option<f32>,
        now_ms: f64,
        active: impl Iterator<Item = &'a str> + Clone,
    ) -> bool {
        for cap in &self.caps {
            if cap.pattern.is_empty() || !category.contains(cap.pattern.as_str()) {
                continue;
            }
            let playing = active.clone().filter(|c| c.contains(cap.pattern.as_str())).count();
            if playing >= cap.max_active {
                return false;
            }
        }

        let cooldown = cooldown_ms.filter(|c| c.is_finite() && *c > 0.0).unwrap_or(0.0);
        if cooldown <= 0.0 {
            return true;
        }
        if let Some(last) = self.last_played.get(category) {
            if now_ms < last + f64::from(cooldown) {
                return false;
            }
        }
        self.last_played.insert(category.to_string(), now_ms);
        true
    }

    /// Record that a loop of `category` was alive at `now_ms`
    pub fn stamp_loop(&mut self, category: &str, now_ms: f64) {
        self.last_played.insert(format!("{LOOP_STAMP_PREFIX}{category}"), now_ms);
    }

    /// Last time a category passed a cooldown check or a loop stamp
    pub fn last_played(&self, key: &str) -> Option<f64> {
        self.last_played.get(key).copied()
    }

    /// Forget all timestamps
    pub fn clear(&mut self) {
        self.last_played.clear();
    }
}
