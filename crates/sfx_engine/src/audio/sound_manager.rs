//! Sound manager
//!
//! Lifecycle of every playback instance: category resolution, asset loading,
//! one-shots, exclusive slots, named loops, unlock retries, and the per-frame
//! refresh that applies attenuation, ducking and focus filtering.
//!
//! Nothing here blocks. Plays whose asset is still decoding return a handle
//! in [`PlaybackState::Pending`]; the handle goes live on the `update` in
//! which its load resolves, or disappears if the load fails or the request
//! was superseded in the meantime.

use crate::audio::asset_cache::{AssetCache, CacheKey};
use crate::audio::backend::{AudioBackendConfig, AudioDevice, DeviceEvent, SoundHandle};
use crate::audio::category::CategoryTraits;
use crate::audio::ducking::{DuckingEngine, SidechainScan};
use crate::audio::loops::{FadeStep, LoopEntry, LoopRegistry};
use crate::audio::manifest::SoundManifest;
use crate::audio::mixer::MixerTable;
use crate::audio::resolver::CategoryResolver;
use crate::audio::reverb::{assign_yields, yield_lowpass_hz, ReverbConfig, ReverbTail};
use crate::audio::session_pack::{
    background_candidates, lock_pack, BulkLoader, PackFuture, PackRequest, PriorityTable, ProgressSubscription,
    SessionPack, SharedSessionPack,
};
use crate::audio::shuffle::ShuffleBag;
use crate::audio::spatial::{SpatialAudio, Viewport};
use crate::audio::tween::Tween;
use crate::audio::voice_manager::{
    ConcurrencyCap, LoopStart, LowpassSource, PendingPlay, PlayGate, Voice, VoiceOwner, VoiceRegistry,
};
use crate::audio::{AudioError, LoadError, ManifestError};
use crate::config::{Config, SoundConfig};
use crate::foundation::collections::InstanceId;
use crate::foundation::math::Vec2;
use crate::foundation::time::FrameClock;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub use crate::audio::loops::LoopOptions;
pub use crate::audio::voice_manager::SoundPlayOptions;

/// Handle to a playback instance, pending or live
pub type PlaybackHandle = InstanceId;

/// Where a playback instance is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Waiting for its asset or for output to unlock
    Pending,
    /// Audible
    Playing,
    /// Finished, stopped, failed or superseded
    Ended,
}

/// Snapshot row of [`SoundManager::active_sounds`]
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSound {
    /// Resolved category
    pub category: String,
    /// Asset being played
    pub source_id: String,
    /// Last volume written to the device
    pub volume: f32,
    /// Whether it belongs to a named loop
    pub looping: bool,
}

/// Timing defaults and concurrency caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Loop fade-in when a start gives none
    pub default_loop_fade_in_ms: f32,
    /// Loop fade-out when a stop gives none
    pub default_loop_fade_out_ms: f32,
    /// Fade-out of a superseded exclusive occupant
    pub default_crossfade_ms: f32,
    /// Per-category limits on simultaneously playing one-shots
    pub concurrency_caps: Vec<ConcurrencyCap>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_loop_fade_in_ms: 160.0,
            default_loop_fade_out_ms: 180.0,
            default_crossfade_ms: 500.0,
            concurrency_caps: ConcurrencyCap::default_caps(),
        }
    }
}

const BURNING_LOWPASS_THRESHOLD_HZ: f32 = 2.0;
const FOCUS_LOWPASS_THRESHOLD_HZ: f32 = 3.0;
const MUSIC_LOWPASS_THRESHOLD_HZ: f32 = 4.0;
const REVERB_LOWPASS_THRESHOLD_HZ: f32 = 1.0;

fn finite_ms(value: Option<f32>) -> Option<f32> {
    value.filter(|ms| ms.is_finite()).map(|ms| ms.max(0.0).floor())
}

/// Cookoff focus lowpass for one voice; exempt categories are left alone
fn apply_focus_lowpass(ducking: &DuckingEngine, voice: &mut Voice, device: &mut dyn AudioDevice) {
    match ducking.cookoff_lowpass_for(voice.traits) {
        Some(focus_hz) => {
            let hz = voice.base_lowpass_hz().min(focus_hz);
            voice.retune_lowpass(device, LowpassSource::Focus, hz, FOCUS_LOWPASS_THRESHOLD_HZ);
        }
        None => {
            if voice.focus_lowpass_hz.is_some() {
                voice.restore_base_lowpass(device);
            }
        }
    }
}

/// Central audio engine
///
/// Owns the device adapter and every registry. Drive it with
/// [`SoundManager::update`] once per frame.
pub struct SoundManager {
    device: Box<dyn AudioDevice>,
    playback: PlaybackConfig,
    resolver: CategoryResolver,
    shuffle: ShuffleBag,
    mixer: MixerTable,
    cache: AssetCache,
    priority: PriorityTable,
    bulk: BulkLoader,
    session_pack: SharedSessionPack,
    spatial: SpatialAudio,
    ducking: DuckingEngine,
    reverb: ReverbConfig,
    reverb_serial: u64,
    voices: VoiceRegistry,
    loops: LoopRegistry,
    gate: PlayGate,
    clock: FrameClock,
    rng: StdRng,
    destroyed: bool,
}

impl SoundManager {
    /// Create a manager over a device, a manifest and a configuration
    ///
    /// An uninitialized device is initialized with default settings. If that
    /// fails the manager still works; it just stays silent.
    pub fn new(mut device: Box<dyn AudioDevice>, manifest: SoundManifest, config: SoundConfig) -> Result<Self, ManifestError> {
        let priority = PriorityTable::new(&config.priority_rules)?;

        if !device.is_initialized() {
            if let Err(e) = device.initialize(&AudioBackendConfig::default()) {
                log::error!("Audio device unavailable, continuing silent: {e}");
            }
        }

        log::info!(
            "Sound manager initialized: {} categories, {} mixer tracks, {} Hz",
            manifest.len(),
            config.mixer.len(),
            device.sample_rate()
        );

        Ok(Self {
            device,
            resolver: CategoryResolver::new(manifest),
            shuffle: ShuffleBag::new(),
            mixer: MixerTable::new(config.mixer),
            cache: AssetCache::new(config.streaming),
            priority,
            bulk: BulkLoader::new(),
            session_pack: SessionPack::global(),
            spatial: SpatialAudio::new(config.spatial),
            ducking: DuckingEngine::new(config.ducking),
            reverb: config.reverb,
            reverb_serial: 0,
            gate: PlayGate::new(config.playback.concurrency_caps.clone()),
            playback: config.playback,
            voices: VoiceRegistry::new(),
            loops: LoopRegistry::new(),
            clock: FrameClock::new(),
            rng: StdRng::from_entropy(),
            destroyed: false,
        })
    }

    /// Load the manifest and an optional configuration file, then build
    pub fn from_files(
        device: Box<dyn AudioDevice>,
        manifest_path: &str,
        config_path: Option<&str>,
    ) -> Result<Self, ManifestError> {
        let manifest = SoundManifest::load_from_file(manifest_path)?;
        let config = config_path.map(SoundConfig::load_from_file).transpose()?.unwrap_or_default();
        Self::new(device, manifest, config)
    }

    /// Use a specific session pack instead of the process-wide one
    pub fn with_session_pack(mut self, session_pack: SharedSessionPack) -> Self {
        self.session_pack = session_pack;
        self
    }

    /// Make shuffle picks and random loop offsets reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.shuffle = ShuffleBag::seeded(seed);
        self.rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        self
    }

    /// Device adapter
    pub fn device(&self) -> &dyn AudioDevice {
        self.device.as_ref()
    }

    /// Decode cache
    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Ducking state
    pub fn ducking(&self) -> &DuckingEngine {
        &self.ducking
    }

    /// Listener and attenuation state
    pub fn spatial(&self) -> &SpatialAudio {
        &self.spatial
    }

    /// Time of the last play or loop refresh stamped under `key`
    pub fn last_played(&self, key: &str) -> Option<f64> {
        self.gate.last_played(key)
    }

    /// Whether `destroy` has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    // ---- catalog queries ----

    /// Whether the category has its own manifest entry
    pub fn has_category_audio(&self, category: &str) -> bool {
        self.resolver.has_category_audio(category)
    }

    /// Manifest keys under an optional prefix
    pub fn list_category_keys(&self, prefix: Option<&str>) -> Vec<String> {
        self.resolver.list_category_keys(prefix)
    }

    /// Candidate sources the category resolves to
    pub fn category_sources(&self, category: &str) -> Vec<String> {
        self.resolver.resolve(category).map(|resolved| resolved.sources).unwrap_or_default()
    }

    // ---- listener ----

    /// Follow the camera; the listener moves to the view midpoint
    pub fn set_listener_view(&mut self, viewport: Viewport) {
        self.spatial.set_viewport(viewport);
    }

    /// Place the listener explicitly
    pub fn set_listener_position(&mut self, x: f32, y: f32) {
        self.spatial.set_listener_position(Vec2::new(x, y));
    }

    // ---- one-shots and exclusive slots ----

    /// Play a random asset of a category once
    ///
    /// Returns `None` when the category is unknown, the cooldown or a
    /// concurrency cap rejects the play, or the asset already failed.
    pub fn play_folder(&mut self, category: &str, options: SoundPlayOptions) -> Option<PlaybackHandle> {
        if self.destroyed {
            return None;
        }
        self.request_play(VoiceOwner::OneShot, 0, category, options)
    }

    /// Play into an exclusive slot, stopping its previous occupant at once
    pub fn play_folder_exclusive(
        &mut self,
        slot_id: &str,
        category: &str,
        options: SoundPlayOptions,
    ) -> Option<PlaybackHandle> {
        self.play_exclusive(slot_id, category, options, 0.0)
    }

    /// Play into an exclusive slot, fading its previous occupant out
    pub fn play_folder_exclusive_crossfade(
        &mut self,
        slot_id: &str,
        category: &str,
        options: SoundPlayOptions,
        fade_out_ms: Option<f32>,
    ) -> Option<PlaybackHandle> {
        let fade_out_ms = finite_ms(fade_out_ms).unwrap_or(self.playback.default_crossfade_ms);
        self.play_exclusive(slot_id, category, options, fade_out_ms.max(1.0))
    }

    /// Empty an exclusive slot and cancel any request still loading for it
    pub fn stop_exclusive(&mut self, slot_id: &str, fade_out_ms: Option<f32>) {
        self.voices.bump_exclusive_token(slot_id);
        if let Some(occupant) = self.voices.take_exclusive(slot_id) {
            self.retire(occupant, finite_ms(fade_out_ms).unwrap_or(0.0));
        }
    }

    /// Current occupant of an exclusive slot
    pub fn exclusive_handle(&self, slot_id: &str) -> Option<PlaybackHandle> {
        self.voices.exclusive(slot_id)
    }

    fn play_exclusive(
        &mut self,
        slot_id: &str,
        category: &str,
        options: SoundPlayOptions,
        fade_out_ms: f32,
    ) -> Option<PlaybackHandle> {
        if self.destroyed {
            return None;
        }
        let token = self.voices.bump_exclusive_token(slot_id);
        if let Some(previous) = self.voices.take_exclusive(slot_id) {
            self.retire(previous, fade_out_ms);
        }
        self.request_play(VoiceOwner::Exclusive(slot_id.to_string()), token, category, options)
    }

    /// Fade a detached voice out, or release it right away
    fn retire(&mut self, id: InstanceId, fade_out_ms: f32) {
        let device = self.device.as_ref();
        let audible_volume = self
            .voices
            .live(id)
            .filter(|voice| device.is_playing(voice.handle))
            .map(|voice| voice.volume);
        match audible_volume {
            Some(volume) if fade_out_ms > 0.0 => {
                self.voices.start_fading(id, Tween::new(volume, 0.0, fade_out_ms));
            }
            _ => self.voices.dispose(id, self.device.as_mut()),
        }
    }

    fn should_play(&mut self, category: &str, cooldown_ms: Option<f32>) -> bool {
        let device = self.device.as_ref();
        let voices = &self.voices;
        let playing: Vec<&str> = voices
            .one_shot_ids()
            .into_iter()
            .filter_map(|id| voices.live(id))
            .filter(|voice| device.is_playing(voice.handle))
            .map(|voice| voice.category.as_str())
            .collect();
        self.gate.should_play(category, cooldown_ms, self.clock.now_ms(), playing.iter().copied())
    }

    fn request_play(
        &mut self,
        owner: VoiceOwner,
        token: u64,
        category: &str,
        options: SoundPlayOptions,
    ) -> Option<PlaybackHandle> {
        let resolved = self.resolver.resolve_or_log(category)?;
        if !self.should_play(&resolved.path, options.cooldown_ms) {
            log::trace!("Play of '{}' held back by cooldown or cap", resolved.path);
            return None;
        }
        let source_id = self.shuffle.pick(&resolved.path, &resolved.sources)?;
        let future = self.cache.ensure_loaded(self.device.as_mut(), &source_id);
        self.enqueue(PendingPlay {
            owner,
            token,
            requested: category.to_string(),
            category: resolved.path,
            source_id,
            future,
            options,
            loop_start: None,
        })
    }

    fn enqueue(&mut self, pending: PendingPlay) -> Option<PlaybackHandle> {
        let id = self.voices.insert_pending(pending);
        self.resolve_pending(id);
        self.voices.contains(id).then_some(id)
    }

    // ---- named loops ----

    /// Start a named loop, or retarget it if it already runs
    ///
    /// Restarting a live loop never restarts its asset; it cancels a
    /// pending fade-out, updates placement and fades toward the new volume,
    /// keeping the previous level when no volume is given. A loop whose
    /// instance died is pruned and started from scratch.
    pub fn start_loop(&mut self, loop_id: &str, category: &str, options: LoopOptions) -> Option<PlaybackHandle> {
        if self.destroyed {
            return None;
        }
        if let Some(instance) = self.loops.get(loop_id).map(|entry| entry.instance) {
            if self.loop_is_alive(loop_id) {
                self.retarget_loop(loop_id, &options);
                return Some(instance);
            }
            self.prune_loop(loop_id);
        }
        if let Some(starting) = self.loops.starting(loop_id) {
            return Some(starting);
        }

        let resolved = self.resolver.resolve_or_log(category)?;
        let token = self.loops.bump_token(loop_id);
        let source_id = self.shuffle.pick(&resolved.path, &resolved.sources)?;
        let future = self.cache.ensure_loaded(self.device.as_mut(), &source_id);
        let fade_in_ms = finite_ms(options.fade_in_ms).unwrap_or(self.playback.default_loop_fade_in_ms);

        let id = self.voices.insert_pending(PendingPlay {
            owner: VoiceOwner::Loop(loop_id.to_string()),
            token,
            requested: category.to_string(),
            category: resolved.path,
            source_id,
            future,
            options: options.play,
            loop_start: Some(LoopStart {
                fade_in_ms,
                random_offset: options.start_at_random_offset,
            }),
        });
        self.loops.set_starting(loop_id, id);
        self.resolve_pending(id);
        self.voices.contains(id).then_some(id)
    }

    fn retarget_loop(&mut self, loop_id: &str, options: &LoopOptions) {
        let fade_in_ms = finite_ms(options.fade_in_ms).unwrap_or(self.playback.default_loop_fade_in_ms);
        let device = self.device.as_mut();
        let Some(entry) = self.loops.get_mut(loop_id) else {
            return;
        };
        let Some(voice) = self.voices.live_mut(entry.instance) else {
            return;
        };

        entry.cancel_fade();
        if !device.is_playing(voice.handle) {
            let started = device.is_unlocked() && device.play(voice.handle, 0.0).is_ok();
            if !started {
                entry.awaiting_unlock = Some(0.0);
            }
        }

        voice.emitter = options.play.emitter();
        let mix = voice.mixer;
        let target = options
            .play
            .explicit_volume()
            .map_or_else(|| entry.restart_volume(mix.gain()), |volume| volume * mix.gain())
            .clamp(0.0, 2.0);
        entry.requested_volume = Some(target);
        if entry.desired_volume.map_or(true, |desired| (desired - target).abs() > 0.001) {
            entry.desired_volume = Some(target);
            if fade_in_ms > 0.0 {
                entry.fade_to(target, fade_in_ms, false);
            } else {
                entry.target_volume = target;
            }
        }

        voice.restore_base_lowpass(device);
        if let Some(hz) = mix.lowpass() {
            if let Err(e) = voice.chain.set_lowpass(device, voice.handle, hz) {
                log::trace!("Loop '{loop_id}' lowpass failed: {e}");
            }
        }
        if let Some(hz) = mix.highpass() {
            if let Err(e) = voice.chain.set_highpass(device, voice.handle, hz) {
                log::trace!("Loop '{loop_id}' highpass failed: {e}");
            }
        }
        let detune = options.play.detune_or_default() + mix.pitch_cents;
        if let Err(e) = voice.chain.set_detune(device, voice.handle, detune) {
            log::trace!("Loop '{loop_id}' detune failed: {e}");
        }
    }

    /// Stop a named loop, fading out unless `fade_out_ms` is 0
    ///
    /// A start still waiting for its asset is cancelled.
    pub fn stop_loop(&mut self, loop_id: &str, fade_out_ms: Option<f32>) {
        self.loops.bump_token(loop_id);
        if let Some(starting) = self.loops.take_starting(loop_id) {
            self.voices.remove(starting);
        }
        let fade_out_ms = finite_ms(fade_out_ms).unwrap_or(self.playback.default_loop_fade_out_ms);

        let Some(entry) = self.loops.get_mut(loop_id) else {
            return;
        };
        entry.awaiting_unlock = None;
        entry.cancel_fade();
        if let Some(voice) = self.voices.live_mut(entry.instance) {
            voice.chain.cancel_tweens();
        }
        if fade_out_ms > 0.0 {
            entry.desired_volume = Some(0.0);
            entry.fade_to(0.0, fade_out_ms, true);
        } else {
            self.release_loop(loop_id);
        }
    }

    /// Ramp a loop's volume without stopping it
    pub fn fade_loop(&mut self, loop_id: &str, target_volume: f32, duration_ms: f32) {
        let Some(entry) = self.loops.get_mut(loop_id) else {
            return;
        };
        let target = if target_volume.is_finite() { target_volume } else { 0.0 };
        let duration_ms = finite_ms(Some(duration_ms)).unwrap_or(0.0);
        entry.desired_volume = Some(target.clamp(0.0, 2.0));
        entry.requested_volume = entry.desired_volume;
        entry.fade_to(target, duration_ms, false);
    }

    /// Instance of a running or starting loop
    pub fn loop_handle(&self, loop_id: &str) -> Option<PlaybackHandle> {
        self.loops
            .get(loop_id)
            .map(|entry| entry.instance)
            .or_else(|| self.loops.starting(loop_id))
    }

    /// Whether a loop runs and is not fading out
    pub fn is_loop_active(&self, loop_id: &str) -> bool {
        self.loops.get(loop_id).is_some_and(|entry| !entry.is_stopping())
    }

    fn release_loop(&mut self, loop_id: &str) {
        if let Some(entry) = self.loops.remove(loop_id) {
            self.voices.dispose(entry.instance, self.device.as_mut());
        }
    }

    /// Whether a registered loop still owns a usable, audible (or unlock-waiting) instance
    fn loop_is_alive(&mut self, loop_id: &str) -> bool {
        let Some(entry) = self.loops.get(loop_id) else {
            return false;
        };
        let Some(voice) = self.voices.live(entry.instance) else {
            return false;
        };
        if entry.awaiting_unlock.is_none() && !self.device.is_playing(voice.handle) {
            return false;
        }
        self.device.set_volume(voice.handle, voice.volume).is_ok()
    }

    fn prune_loop(&mut self, loop_id: &str) {
        log::warn!("Pruning broken loop '{loop_id}'");
        if let Some(entry) = self.loops.purge(loop_id) {
            self.voices.dispose(entry.instance, self.device.as_mut());
        }
    }

    // ---- per-instance controls ----

    /// Lifecycle state of a handle
    pub fn state(&self, handle: PlaybackHandle) -> PlaybackState {
        if self.voices.pending(handle).is_some() {
            return PlaybackState::Pending;
        }
        let Some(voice) = self.voices.live(handle) else {
            return PlaybackState::Ended;
        };
        if self.device.is_playing(voice.handle) {
            return PlaybackState::Playing;
        }
        let waiting = match &voice.owner {
            VoiceOwner::Loop(loop_id) => self.loops.get(loop_id).is_some_and(|entry| entry.awaiting_unlock.is_some()),
            _ => false,
        };
        if waiting {
            PlaybackState::Pending
        } else {
            PlaybackState::Ended
        }
    }

    /// Device instance behind a live handle
    pub fn sound_handle(&self, handle: PlaybackHandle) -> Option<SoundHandle> {
        self.voices.live(handle).map(|voice| voice.handle)
    }

    /// Last volume written for a live handle
    pub fn volume(&self, handle: PlaybackHandle) -> Option<f32> {
        self.voices.live(handle).map(|voice| voice.volume)
    }

    /// Set the lowpass cutoff of one instance
    pub fn set_lowpass(&mut self, handle: PlaybackHandle, hz: f32) -> bool {
        self.with_chain(handle, |voice, device| voice.chain.set_lowpass(device, voice.handle, hz))
    }

    /// Set the highpass cutoff of one instance
    pub fn set_highpass(&mut self, handle: PlaybackHandle, hz: f32) -> bool {
        self.with_chain(handle, |voice, device| voice.chain.set_highpass(device, voice.handle, hz))
    }

    /// Ramp the lowpass cutoff of one instance
    pub fn tween_lowpass(&mut self, handle: PlaybackHandle, to_hz: f32, duration_ms: f32) -> bool {
        self.with_chain(handle, |voice, device| {
            voice.chain.tween_lowpass(device, voice.handle, to_hz, duration_ms)
        })
    }

    /// Ramp the pitch offset of one instance
    pub fn tween_detune(&mut self, handle: PlaybackHandle, to_cents: f32, duration_ms: f32) -> bool {
        self.with_chain(handle, |voice, device| {
            voice.chain.tween_detune(device, voice.handle, to_cents, duration_ms)
        })
    }

    /// Remove every filter from one instance
    pub fn detach_filters(&mut self, handle: PlaybackHandle) -> bool {
        self.with_chain(handle, |voice, device| {
            voice.chain.detach(device, voice.handle);
            voice.focus_lowpass_hz = None;
            voice.distance_lowpass_hz = None;
            voice.music_lowpass_hz = None;
            voice.reverb_lowpass_hz = None;
            Ok(())
        })
    }

    fn with_chain(
        &mut self,
        handle: PlaybackHandle,
        apply: impl FnOnce(&mut Voice, &mut dyn AudioDevice) -> Result<(), AudioError>,
    ) -> bool {
        let device = self.device.as_mut();
        let Some(voice) = self.voices.live_mut(handle) else {
            return false;
        };
        match apply(&mut *voice, &mut *device) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Signal chain update on '{}' failed: {e}", voice.category);
                false
            }
        }
    }

    // ---- preloading ----

    /// Load the session pack, or one tier of it
    ///
    /// The full pack loads at most once per session pack and repeated calls
    /// share its future. Every tier request runs its own job; sources the
    /// cache already holds count as loaded at once. Progress is driven by
    /// `update`.
    pub fn ensure_session_audio_pack(&mut self, request: PackRequest) -> PackFuture {
        let concurrency = self.cache.config().pack_concurrency;
        self.bulk.start(
            request,
            &self.priority,
            self.resolver.manifest(),
            &self.session_pack,
            concurrency,
            &mut self.cache,
            self.device.as_mut(),
        )
    }

    /// Subscribe to session pack progress; replays the last report
    pub fn on_session_audio_pack_progress(
        &self,
        listener: impl FnMut(usize, usize) + Send + 'static,
    ) -> ProgressSubscription {
        ProgressSubscription::new(&self.session_pack, Box::new(listener))
    }

    /// Whether a full session pack load has completed
    pub fn is_session_audio_pack_ready(&self) -> bool {
        lock_pack(&self.session_pack).is_ready()
    }

    /// Start loading the first sources of a few categories
    ///
    /// Returns how many distinct sources were requested.
    pub fn prewarm_folders<S: AsRef<str>>(
        &mut self,
        categories: &[S],
        max_per_category: usize,
        max_total: usize,
    ) -> usize {
        if self.destroyed {
            return 0;
        }
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for category in categories {
            let Some(resolved) = self.resolver.resolve(category.as_ref()) else {
                continue;
            };
            for source in resolved.sources.into_iter().take(max_per_category) {
                if sources.len() >= max_total {
                    break;
                }
                if seen.insert(source.clone()) {
                    sources.push(source);
                }
            }
        }
        for source in &sources {
            drop(self.cache.ensure_loaded(self.device.as_mut(), source));
        }
        log::debug!("Prewarming {} sources", sources.len());
        sources.len()
    }

    /// Queue the highest-scoring sources for idle-time loading
    pub fn prewarm_background(&mut self, max_total: Option<usize>) -> usize {
        if self.destroyed {
            return 0;
        }
        let cap = max_total.unwrap_or(self.cache.config().background_candidate_cap);
        let candidates = background_candidates(self.resolver.manifest(), cap);
        self.cache.schedule_background_prefetch(self.device.as_ref(), &candidates);
        candidates.len()
    }

    // ---- frame update ----

    /// Advance one frame
    ///
    /// Order: device events, cache and pack progress, pending plays, fades
    /// and ramps, reverb tail priority, ducking, then the per-instance volume
    /// and filter refresh.
    pub fn update(&mut self, delta_seconds: f32) {
        if self.destroyed {
            return;
        }
        self.clock.advance(delta_seconds);
        let delta_ms = self.clock.delta_ms();

        self.device.update();
        self.drain_events();
        self.cache.tick_prefetch(self.device.as_mut(), delta_ms);
        self.bulk.pump(&mut self.cache, self.device.as_mut());

        for id in self.voices.pending_ids() {
            self.resolve_pending(id);
        }

        self.advance_fades(delta_ms);
        self.advance_chains(delta_ms);
        self.update_reverb_priority();
        self.update_ducking();
        self.refresh_loops();
        self.refresh_voices();
    }

    fn drain_events(&mut self) {
        let mut unlock = false;
        for event in self.device.poll_events() {
            if self.cache.handle_event(&event) {
                continue;
            }
            match event {
                DeviceEvent::InstanceEnded { handle } => self.on_instance_ended(handle),
                DeviceEvent::Unlocked | DeviceEvent::UserGesture => unlock = true,
                DeviceEvent::DecodeCompleted { .. } | DeviceEvent::DecodeFailed { .. } => {}
            }
        }
        if unlock {
            self.retry_unlock();
        }
    }

    fn on_instance_ended(&mut self, handle: SoundHandle) {
        let Some(id) = self.voices.id_for_handle(handle) else {
            return;
        };
        let is_loop = self
            .voices
            .live(id)
            .is_some_and(|voice| matches!(voice.owner, VoiceOwner::Loop(_)));
        if !is_loop {
            self.voices.dispose(id, self.device.as_mut());
        }
    }

    fn retry_unlock(&mut self) {
        self.device.try_resume();
        if !self.device.is_unlocked() {
            return;
        }
        for (loop_id, seek) in self.loops.take_unlock_waiters() {
            let Some(handle) = self
                .loops
                .get(&loop_id)
                .and_then(|entry| self.voices.live(entry.instance))
                .map(|voice| voice.handle)
            else {
                continue;
            };
            if self.device.is_playing(handle) {
                continue;
            }
            match self.device.play(handle, seek) {
                Ok(()) => log::debug!("Loop '{loop_id}' started after unlock"),
                Err(e) => {
                    log::debug!("Loop '{loop_id}' still blocked: {e}");
                    if let Some(entry) = self.loops.get_mut(&loop_id) {
                        entry.awaiting_unlock = Some(seek);
                    }
                }
            }
        }
    }

    /// Try to move a pending play to live
    fn resolve_pending(&mut self, id: InstanceId) {
        let Some(result) = self.voices.pending(id).and_then(|p| p.future.clone().now_or_never()) else {
            return;
        };
        let Some(pending) = self.voices.pending(id).cloned() else {
            return;
        };
        if let VoiceOwner::Loop(loop_id) = &pending.owner {
            self.loops.finish_starting(loop_id, id);
        }

        let key = match result {
            Ok(key) => key,
            Err(e) => {
                self.voices.remove(id);
                log::debug!("Dropping play of '{}': {e}", pending.source_id);
                if !matches!(e, LoadError::Destroyed) {
                    self.resolver.log_missing_once(&pending.requested);
                }
                return;
            }
        };

        if self.destroyed || !self.token_is_current(&pending) {
            self.voices.remove(id);
            return;
        }

        let voice = match &pending.loop_start {
            Some(start) => self.start_loop_voice(id, &pending, *start, &key),
            None => self.start_voice(&pending, &key),
        };
        match voice {
            Some(voice) => self.voices.go_live(id, voice),
            None => {
                self.voices.remove(id);
            }
        }
    }

    fn token_is_current(&self, pending: &PendingPlay) -> bool {
        match &pending.owner {
            VoiceOwner::Exclusive(slot_id) => self.voices.exclusive_token(slot_id) == pending.token,
            VoiceOwner::Loop(loop_id) => {
                self.loops.token(loop_id) == pending.token && self.loops.get(loop_id).is_none()
            }
            VoiceOwner::OneShot | VoiceOwner::Fading => true,
        }
    }

    /// Create the device instance with rate, pan, detune and mixer filters
    fn create_voice(&mut self, pending: &PendingPlay, key: &CacheKey, looping: bool) -> Option<Voice> {
        let mix = self.mixer.settings_for(&pending.category);
        let device = self.device.as_mut();
        let handle = match device.create_sound(key, looping) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Could not create instance of '{}': {e}", pending.source_id);
                return None;
            }
        };

        let mut voice = Voice::new(pending.owner.clone(), handle, &pending.category, &pending.source_id, mix);
        voice.emitter = pending.options.emitter();
        voice.track_position = pending.options.track_position;

        let rate = pending.options.rate_or_default();
        voice.chain.set_base_rate(rate);
        if let Err(e) = device.set_rate(handle, rate) {
            log::trace!("Rate on '{}' failed: {e}", pending.category);
        }
        if let Err(e) = device.set_pan(handle, self.spatial.pan_for(&voice.emitter)) {
            log::trace!("Pan on '{}' failed: {e}", pending.category);
        }
        let detune = pending.options.detune_or_default() + mix.pitch_cents;
        if detune != 0.0 {
            if let Err(e) = voice.chain.set_detune(device, handle, detune) {
                log::trace!("Detune on '{}' failed: {e}", pending.category);
            }
        }
        if let Some(hz) = mix.lowpass() {
            if let Err(e) = voice.chain.set_lowpass(device, handle, hz) {
                log::trace!("Mixer lowpass on '{}' failed: {e}", pending.category);
            }
        }
        if let Some(hz) = mix.highpass() {
            if let Err(e) = voice.chain.set_highpass(device, handle, hz) {
                log::trace!("Mixer highpass on '{}' failed: {e}", pending.category);
            }
        }
        Some(voice)
    }

    fn start_voice(&mut self, pending: &PendingPlay, key: &CacheKey) -> Option<Voice> {
        let mut voice = self.create_voice(pending, key, false)?;
        if voice.traits.contains(CategoryTraits::FOREST_REVERB) {
            self.reverb_serial += 1;
            let pan = self.spatial.pan_for(&voice.emitter);
            voice.reverb = ReverbTail::for_traits(voice.traits, self.reverb_serial, self.clock.now_ms(), pan);
        }
        let device = self.device.as_mut();

        let attenuation = self.spatial.attenuation_for(voice.traits, &voice.emitter);
        voice.base_volume = pending.options.volume_or_default() * voice.mixer.gain();
        voice.static_attenuation = attenuation;
        let volume = (voice.base_volume * attenuation).clamp(0.0, 2.0);
        if !voice.apply_volume(device, volume) {
            voice.release(device);
            return None;
        }

        if let Some(hz) =
            self.spatial
                .explosion_lowpass_hz(voice.traits, &voice.emitter, attenuation, voice.mixer.lowpass())
        {
            voice.retune_lowpass(device, LowpassSource::Distance, hz, 0.0);
        }

        if let Err(e) = device.play(voice.handle, 0.0) {
            log::debug!("Play of '{}' failed: {e}", pending.category);
            voice.release(device);
            return None;
        }
        log::trace!("Playing '{}' ({})", pending.category, pending.source_id);
        Some(voice)
    }

    fn start_loop_voice(
        &mut self,
        id: InstanceId,
        pending: &PendingPlay,
        start: LoopStart,
        key: &CacheKey,
    ) -> Option<Voice> {
        let VoiceOwner::Loop(loop_id) = &pending.owner else {
            return None;
        };
        let mut voice = self.create_voice(pending, key, true)?;
        let device = self.device.as_mut();

        let target = (pending.options.volume_or_default() * voice.mixer.gain()).clamp(0.0, 2.0);
        let attenuation = if voice.traits.contains(CategoryTraits::IGNORE_ATTENUATION) {
            1.0
        } else {
            self.spatial.loop_attenuation(&voice.emitter)
        };
        let initial = if start.fade_in_ms > 0.0 { 0.0 } else { target };
        voice.base_volume = target;
        voice.static_attenuation = attenuation;
        if !voice.apply_volume(device, (initial * attenuation).clamp(0.0, 2.0)) {
            voice.release(device);
            return None;
        }

        let random_offset = start.random_offset || voice.traits.contains(CategoryTraits::BURNING_LOOP);
        let seek = if random_offset {
            device
                .duration(voice.handle)
                .filter(|duration| *duration > 0.0)
                .map_or(0.0, |duration| self.rng.gen::<f32>() * duration)
        } else {
            0.0
        };

        let mut entry = LoopEntry::new(id, &pending.category, initial);
        entry.desired_volume = Some(target);
        entry.requested_volume = Some(target);
        let started = device.is_unlocked() && device.play(voice.handle, seek).is_ok();
        if !started {
            entry.awaiting_unlock = Some(seek);
            log::debug!("Loop '{loop_id}' waiting for audio unlock");
        }
        if start.fade_in_ms > 0.0 {
            entry.fade_to(target, start.fade_in_ms, false);
        }
        self.loops.insert(loop_id, entry);
        log::debug!("Loop '{loop_id}' started: '{}' ({})", pending.category, pending.source_id);
        Some(voice)
    }

    fn advance_fades(&mut self, delta_ms: f32) {
        for loop_id in self.loops.ids() {
            let Some(entry) = self.loops.get_mut(&loop_id) else {
                continue;
            };
            if entry.advance_fade(delta_ms) == FadeStep::Dispose {
                self.release_loop(&loop_id);
            }
        }

        for id in self.voices.fading_ids() {
            let device = self.device.as_mut();
            let Some(voice) = self.voices.live_mut(id) else {
                continue;
            };
            let Some(mut fade) = voice.fade_out.take() else {
                self.voices.dispose(id, device);
                continue;
            };
            let volume = fade.advance(delta_ms);
            if voice.apply_volume(device, volume) && !fade.is_finished() {
                voice.fade_out = Some(fade);
            } else {
                self.voices.dispose(id, device);
            }
        }
    }

    fn advance_chains(&mut self, delta_ms: f32) {
        let device = self.device.as_mut();
        for id in self.voices.all_ids() {
            let Some(voice) = self.voices.live_mut(id) else {
                continue;
            };
            if !voice.chain.is_tweening() {
                continue;
            }
            if let Err(e) = voice.chain.advance(device, voice.handle, delta_ms) {
                log::trace!("Ramp on '{}' failed: {e}", voice.category);
            }
        }
    }

    /// Let older or lower-priority reverb tails yield to newer ones
    fn update_reverb_priority(&mut self) {
        let device = self.device.as_ref();
        let voices = &self.voices;
        let mut ids = voices.one_shot_ids();
        ids.extend(voices.exclusive_ids().into_iter().map(|(_, id)| id));

        let mut tails: Vec<(InstanceId, ReverbTail)> = ids
            .into_iter()
            .filter_map(|id| {
                let voice = voices.live(id).filter(|voice| device.is_playing(voice.handle))?;
                voice.reverb.map(|tail| (id, tail))
            })
            .collect();
        if tails.is_empty() {
            return;
        }

        assign_yields(&mut tails, self.clock.now_ms(), &self.reverb);
        for (id, tail) in tails {
            if let Some(voice) = self.voices.live_mut(id) {
                voice.reverb = Some(tail);
            }
        }
    }

    fn update_ducking(&mut self) {
        let device = self.device.as_ref();
        let voices = &self.voices;
        let audible = |id: InstanceId| voices.live(id).filter(|voice| device.is_playing(voice.handle));

        let mut triggers: Vec<InstanceId> = voices.one_shot_ids();
        triggers.extend(voices.exclusive_ids().into_iter().map(|(_, id)| id));

        let cookoff = triggers
            .iter()
            .filter_map(|id| audible(*id))
            .any(|voice| voice.traits.contains(CategoryTraits::COOKOFF));
        self.ducking.update_cookoff(cookoff);

        let mut scan = SidechainScan::new();
        for voice in triggers.iter().filter_map(|id| audible(*id)) {
            scan.inspect(&voice.category);
            if scan.is_saturated() {
                break;
            }
        }
        if !scan.is_saturated() {
            for (_, entry) in self.loops.iter() {
                let Some(voice) = audible(entry.instance) else {
                    continue;
                };
                if voice.traits.contains(CategoryTraits::MUSIC) {
                    continue;
                }
                scan.inspect(&voice.category);
                if scan.is_saturated() {
                    break;
                }
            }
        }
        self.ducking.update(&scan);
    }

    fn refresh_loops(&mut self) {
        let now_ms = self.clock.now_ms();
        let device = self.device.as_mut();
        let mut broken = Vec::new();

        for (loop_id, entry) in self.loops.iter() {
            let Some(voice) = self.voices.live_mut(entry.instance) else {
                broken.push(loop_id.to_string());
                continue;
            };
            let traits = voice.traits;

            if let Err(e) = device.set_pan(voice.handle, self.spatial.pan_for(&voice.emitter)) {
                log::trace!("Pan on loop '{loop_id}' failed: {e}");
            }
            let attenuation = self.spatial.loop_attenuation(&voice.emitter);
            let ambience = if traits.contains(CategoryTraits::AMBIENCE) {
                self.ducking.ambience_duck()
            } else {
                1.0
            };
            let music = if traits.contains(CategoryTraits::MUSIC) {
                self.ducking.music_duck()
            } else {
                1.0
            };
            let volume =
                (entry.target_volume * attenuation * ambience * music * self.ducking.cookoff_duck_for(traits)).clamp(0.0, 2.0);
            if !voice.apply_volume(device, volume) {
                broken.push(loop_id.to_string());
                continue;
            }

            apply_focus_lowpass(&self.ducking, voice, device);
            if traits.contains(CategoryTraits::BURNING_LOOP) {
                let hz = self.spatial.burning_loop_lowpass_hz(attenuation, voice.mixer.lowpass());
                voice.retune_lowpass(device, LowpassSource::Distance, hz, BURNING_LOWPASS_THRESHOLD_HZ);
            }
            if traits.contains(CategoryTraits::MUSIC) {
                let hz = voice.base_lowpass_hz().min(self.ducking.music_lowpass_hz());
                voice.retune_lowpass(device, LowpassSource::Music, hz, MUSIC_LOWPASS_THRESHOLD_HZ);
            }

            self.gate.stamp_loop(&entry.category, now_ms);
        }

        for loop_id in broken {
            self.prune_loop(&loop_id);
        }
    }

    fn refresh_voices(&mut self) {
        let now_ms = self.clock.now_ms();
        let device = self.device.as_mut();
        let mut ids = self.voices.one_shot_ids();
        ids.extend(self.voices.exclusive_ids().into_iter().map(|(_, id)| id));
        let mut broken = Vec::new();

        for id in ids {
            let Some(voice) = self.voices.live_mut(id) else {
                continue;
            };
            let reverb = voice.reverb;
            let pan = match reverb {
                Some(tail) => Some(tail.pan(now_ms, &self.reverb)),
                None if voice.track_position => Some(self.spatial.pan_for(&voice.emitter)),
                None => None,
            };
            if let Some(pan) = pan {
                if let Err(e) = device.set_pan(voice.handle, pan) {
                    log::trace!("Pan on '{}' failed: {e}", voice.category);
                }
            }

            let attenuation = if voice.track_position {
                self.spatial.attenuation_for(voice.traits, &voice.emitter)
            } else {
                voice.static_attenuation
            };
            let reverb_gain = reverb.map_or(1.0, |tail| tail.yield_gain(now_ms, &self.reverb));
            let volume = (voice.base_volume * attenuation * reverb_gain * self.ducking.cookoff_duck_for(voice.traits))
                .clamp(0.0, 2.0);
            if !voice.apply_volume(device, volume) {
                broken.push(id);
                continue;
            }

            if reverb_gain < 1.0 {
                let ceiling = voice.distance_lowpass_hz.unwrap_or_else(|| voice.base_lowpass_hz());
                let hz = yield_lowpass_hz(reverb_gain, ceiling, &self.reverb);
                voice.retune_lowpass(device, LowpassSource::Reverb, hz, REVERB_LOWPASS_THRESHOLD_HZ);
            } else {
                voice.release_reverb_lowpass(device);
                apply_focus_lowpass(&self.ducking, voice, device);
            }
        }

        for id in broken {
            let Some(voice) = self.voices.live(id) else {
                continue;
            };
            log::warn!("Pruning broken instance of '{}' ({})", voice.category, voice.source_id);
            if let VoiceOwner::Exclusive(slot_id) = voice.owner.clone() {
                self.voices.forget_exclusive(&slot_id);
            }
            self.voices.dispose(id, self.device.as_mut());
        }
    }

    // ---- bulk control ----

    /// Snapshot of audible instances; drops one-shots that already finished
    pub fn active_sounds(&mut self) -> Vec<ActiveSound> {
        let device = self.device.as_ref();
        let mut sounds = Vec::new();
        let row = |voice: &Voice, looping: bool| ActiveSound {
            category: voice.category.clone(),
            source_id: voice.source_id.clone(),
            volume: voice.volume,
            looping,
        };

        for (_, entry) in self.loops.iter() {
            if let Some(voice) = self.voices.live(entry.instance).filter(|v| device.is_playing(v.handle)) {
                sounds.push(row(voice, true));
            }
        }
        for (_, id) in self.voices.exclusive_ids() {
            if let Some(voice) = self.voices.live(id).filter(|v| device.is_playing(v.handle)) {
                sounds.push(row(voice, false));
            }
        }
        let mut finished = Vec::new();
        for id in self.voices.one_shot_ids() {
            match self.voices.live(id) {
                Some(voice) if device.is_playing(voice.handle) => sounds.push(row(voice, false)),
                _ => finished.push(id),
            }
        }

        for id in finished {
            self.voices.dispose(id, self.device.as_mut());
        }
        sounds
    }

    /// Resume output and every loop after the host returns from sleep
    pub fn resume_after_wake(&mut self) {
        if self.destroyed {
            return;
        }
        self.device.try_resume();
        for (loop_id, entry) in self.loops.iter() {
            let Some(voice) = self.voices.live(entry.instance) else {
                continue;
            };
            if let Err(e) = self.device.resume(voice.handle) {
                log::trace!("Resume of loop '{loop_id}' failed: {e}");
            }
        }
    }

    /// Stop and release everything, pending plays included
    pub fn stop_all(&mut self) {
        let device = self.device.as_mut();
        let count = self.voices.len();
        for id in self.voices.all_ids() {
            self.voices.dispose(id, device);
        }
        self.voices.clear_tokens();
        self.loops.clear();
        self.shuffle.clear();
        self.gate.clear();
        self.cache.clear_prefetch();
        log::info!("Stopped {count} sounds");
    }

    /// Tear down; further calls are ignored
    ///
    /// Outstanding loads settle with [`LoadError::Destroyed`]. Bulk loads
    /// stop dequeuing, so a session pack in flight finishes with what it has.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop_all();
        self.destroyed = true;
        self.cache.destroy();
        self.bulk.pump(&mut self.cache, self.device.as_mut());
        log::info!("Sound manager destroyed");
    }
}

impl Drop for SoundManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
