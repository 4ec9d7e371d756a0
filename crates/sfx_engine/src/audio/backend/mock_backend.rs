//! In-memory audio device
//!
//! Deterministic stand-in for a real output device. State is shared between
//! the boxed device handed to the engine and any number of cloned probes, so
//! tests can inspect volumes, filter wiring and decode traffic after the fact.
//!
//! Decode requests complete on the next [`AudioDevice::poll_events`] unless
//! manual decode mode is enabled.

use super::{AudioBackendConfig, AudioDevice, DeviceEvent, FilterHandle, FilterKind, SoundHandle};
use crate::audio::asset_cache::CacheKey;
use crate::audio::AudioError;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

/// Recorded state of one mock instance
#[derive(Debug, Clone, PartialEq)]
pub struct MockSound {
    /// Key the instance was created from
    pub key: CacheKey,
    /// Looping flag
    pub looping: bool,
    /// Last volume set
    pub volume: f32,
    /// Last pan set
    pub pan: f32,
    /// Last rate set
    pub rate: f32,
    /// Last detune set, if the device supports it
    pub detune: f32,
    /// Whether playback is running
    pub playing: bool,
    /// Whether playback is paused
    pub paused: bool,
    /// Seek offset of the last `play`
    pub seek: f32,
    /// Number of `play` calls
    pub play_count: u32,
    /// Current output routing
    pub route: Vec<FilterHandle>,
}

#[derive(Debug)]
struct MockState {
    initialized: bool,
    sample_rate: u32,
    unlocked: bool,
    detune_supported: bool,
    filters_supported: bool,
    manual_decode: bool,
    duration_seconds: f32,
    decoded: HashSet<CacheKey>,
    queued_decodes: Vec<(CacheKey, String)>,
    decode_requests: HashMap<String, usize>,
    failing_sources: HashSet<String>,
    sounds: HashMap<SoundHandle, MockSound>,
    destroyed_sounds: usize,
    filters: HashMap<FilterHandle, (FilterKind, f32)>,
    events: VecDeque<DeviceEvent>,
    next_id: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            initialized: true,
            sample_rate: 48000,
            unlocked: true,
            detune_supported: true,
            filters_supported: true,
            manual_decode: false,
            duration_seconds: 2.0,
            decoded: HashSet::new(),
            queued_decodes: Vec::new(),
            decode_requests: HashMap::new(),
            failing_sources: HashSet::new(),
            sounds: HashMap::new(),
            destroyed_sounds: 0,
            filters: HashMap::new(),
            events: VecDeque::new(),
            next_id: 0,
        }
    }
}

impl MockState {
    fn sound_mut(&mut self, handle: SoundHandle) -> Result<&mut MockSound, AudioError> {
        self.sounds.get_mut(&handle).ok_or(AudioError::InvalidHandle)
    }

    fn complete_decodes(&mut self) {
        for (key, source_id) in std::mem::take(&mut self.queued_decodes) {
            if self.failing_sources.contains(&source_id) {
                self.events.push_back(DeviceEvent::DecodeFailed {
                    key,
                    reason: format!("mock failure for {source_id}"),
                });
            } else {
                self.decoded.insert(key.clone());
                self.events.push_back(DeviceEvent::DecodeCompleted { key });
            }
        }
    }
}

/// Shared-state mock device
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    /// Create an initialized, unlocked mock device
    pub fn new() -> Self {
        Self::default()
    }

    /// Another handle onto the same state
    pub fn probe(&self) -> Self {
        self.clone()
    }

    /// Lock or unlock output; unlocking queues a [`DeviceEvent::Unlocked`]
    pub fn set_unlocked(&self, unlocked: bool) {
        let mut state = self.state.borrow_mut();
        let was = state.unlocked;
        state.unlocked = unlocked;
        if unlocked && !was {
            state.events.push_back(DeviceEvent::Unlocked);
        }
    }

    /// Queue a user-interaction event
    pub fn gesture(&self) {
        self.state.borrow_mut().events.push_back(DeviceEvent::UserGesture);
    }

    /// Toggle detune support
    pub fn set_detune_supported(&self, supported: bool) {
        self.state.borrow_mut().detune_supported = supported;
    }

    /// Toggle filter support
    pub fn set_filters_supported(&self, supported: bool) {
        self.state.borrow_mut().filters_supported = supported;
    }

    /// Hold decodes until [`MockDevice::complete_decodes`] is called
    pub fn set_manual_decode(&self, manual: bool) {
        self.state.borrow_mut().manual_decode = manual;
    }

    /// Complete every queued decode now
    pub fn complete_decodes(&self) {
        self.state.borrow_mut().complete_decodes();
    }

    /// Make decodes of `source_id` fail
    pub fn fail_source(&self, source_id: &str) {
        self.state.borrow_mut().failing_sources.insert(source_id.to_string());
    }

    /// Mark a key as decoded without a request
    pub fn preload(&self, key: CacheKey) {
        self.state.borrow_mut().decoded.insert(key);
    }

    /// Length reported for every asset
    pub fn set_duration(&self, seconds: f32) {
        self.state.borrow_mut().duration_seconds = seconds;
    }

    /// Decode requests issued for `source_id`
    pub fn decode_requests(&self, source_id: &str) -> usize {
        self.state.borrow().decode_requests.get(source_id).copied().unwrap_or(0)
    }

    /// Decode requests issued overall
    pub fn total_decode_requests(&self) -> usize {
        self.state.borrow().decode_requests.values().sum()
    }

    /// Decodes waiting for completion
    pub fn queued_decodes(&self) -> usize {
        self.state.borrow().queued_decodes.len()
    }

    /// Snapshot of one instance
    pub fn sound(&self, handle: SoundHandle) -> Option<MockSound> {
        self.state.borrow().sounds.get(&handle).cloned()
    }

    /// Instances that exist and are playing
    pub fn playing_sounds(&self) -> Vec<(SoundHandle, MockSound)> {
        let state = self.state.borrow();
        let mut sounds: Vec<_> = state
            .sounds
            .iter()
            .filter(|(_, sound)| sound.playing)
            .map(|(handle, sound)| (*handle, sound.clone()))
            .collect();
        sounds.sort_by_key(|(handle, _)| handle.id);
        sounds
    }

    /// Instances that exist
    pub fn live_sounds(&self) -> usize {
        self.state.borrow().sounds.len()
    }

    /// Instances released through `destroy`
    pub fn destroyed_sounds(&self) -> usize {
        self.state.borrow().destroyed_sounds
    }

    /// Live filter nodes
    pub fn live_filters(&self) -> usize {
        self.state.borrow().filters.len()
    }

    /// Kind and frequency of a filter node
    pub fn filter(&self, filter: FilterHandle) -> Option<(FilterKind, f32)> {
        self.state.borrow().filters.get(&filter).copied()
    }

    /// End a non-looping instance naturally
    pub fn finish(&self, handle: SoundHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if let Some(sound) = state.sounds.get_mut(&handle) {
            sound.playing = false;
            state.events.push_back(DeviceEvent::InstanceEnded { handle });
        }
    }

    /// Remove an instance behind the engine's back
    pub fn kill(&self, handle: SoundHandle) {
        self.state.borrow_mut().sounds.remove(&handle);
    }
}

impl AudioDevice for MockDevice {
    fn initialize(&mut self, config: &AudioBackendConfig) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        state.sample_rate = config.sample_rate;
        state.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.state.borrow_mut();
        state.sounds.clear();
        state.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    fn sample_rate(&self) -> u32 {
        self.state.borrow().sample_rate
    }

    fn is_unlocked(&self) -> bool {
        self.state.borrow().unlocked
    }

    fn try_resume(&mut self) {}

    fn is_decoded(&self, key: &CacheKey) -> bool {
        self.state.borrow().decoded.contains(key)
    }

    fn begin_decode(&mut self, key: &CacheKey, source_id: &str) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        *state.decode_requests.entry(source_id.to_string()).or_insert(0) += 1;
        state.queued_decodes.push((key.clone(), source_id.to_string()));
        Ok(())
    }

    fn create_sound(&mut self, key: &CacheKey, looping: bool) -> Result<SoundHandle, AudioError> {
        let mut state = self.state.borrow_mut();
        if !state.decoded.contains(key) {
            return Err(AudioError::PlaybackFailed(format!("{key} is not decoded")));
        }
        let handle = SoundHandle::new(state.next_id, 0);
        state.next_id = state.next_id.wrapping_add(1);
        state.sounds.insert(
            handle,
            MockSound {
                key: key.clone(),
                looping,
                volume: 1.0,
                pan: 0.0,
                rate: 1.0,
                detune: 0.0,
                playing: false,
                paused: false,
                seek: 0.0,
                play_count: 0,
                route: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn play(&mut self, handle: SoundHandle, seek_seconds: f32) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        if !state.unlocked {
            return Err(AudioError::DeviceLocked);
        }
        let sound = state.sound_mut(handle)?;
        sound.playing = true;
        sound.paused = false;
        sound.seek = seek_seconds;
        sound.play_count += 1;
        Ok(())
    }

    fn pause(&mut self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        let sound = state.sound_mut(handle)?;
        sound.paused = true;
        Ok(())
    }

    fn resume(&mut self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        let sound = state.sound_mut(handle)?;
        sound.paused = false;
        Ok(())
    }

    fn stop(&mut self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        let sound = state.sound_mut(handle)?;
        sound.playing = false;
        Ok(())
    }

    fn destroy(&mut self, handle: SoundHandle) {
        let mut state = self.state.borrow_mut();
        if state.sounds.remove(&handle).is_some() {
            state.destroyed_sounds += 1;
        }
    }

    fn set_volume(&mut self, handle: SoundHandle, volume: f32) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        state.sound_mut(handle)?.volume = volume;
        Ok(())
    }

    fn get_volume(&self, handle: SoundHandle) -> Result<f32, AudioError> {
        self.state
            .borrow()
            .sounds
            .get(&handle)
            .map(|sound| sound.volume)
            .ok_or(AudioError::InvalidHandle)
    }

    fn set_pan(&mut self, handle: SoundHandle, pan: f32) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        state.sound_mut(handle)?.pan = pan;
        Ok(())
    }

    fn set_rate(&mut self, handle: SoundHandle, rate: f32) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        state.sound_mut(handle)?.rate = rate;
        Ok(())
    }

    fn set_detune(&mut self, handle: SoundHandle, cents: f32) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        if !state.detune_supported {
            return Err(AudioError::Unsupported("detune"));
        }
        state.sound_mut(handle)?.detune = cents;
        Ok(())
    }

    fn duration(&self, handle: SoundHandle) -> Option<f32> {
        let state = self.state.borrow();
        state.sounds.contains_key(&handle).then_some(state.duration_seconds)
    }

    fn is_playing(&self, handle: SoundHandle) -> bool {
        self.state
            .borrow()
            .sounds
            .get(&handle)
            .is_some_and(|sound| sound.playing && !sound.paused)
    }

    fn create_filter(&mut self, kind: FilterKind, frequency_hz: f32) -> Result<FilterHandle, AudioError> {
        let mut state = self.state.borrow_mut();
        if !state.filters_supported {
            return Err(AudioError::Unsupported("filters"));
        }
        let filter = FilterHandle(state.next_id);
        state.next_id = state.next_id.wrapping_add(1);
        state.filters.insert(filter, (kind, frequency_hz));
        Ok(filter)
    }

    fn set_filter_frequency(&mut self, filter: FilterHandle, frequency_hz: f32) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        let entry = state.filters.get_mut(&filter).ok_or(AudioError::InvalidHandle)?;
        entry.1 = frequency_hz;
        Ok(())
    }

    fn route_through(&mut self, handle: SoundHandle, chain: &[FilterHandle]) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        if chain.iter().any(|filter| !state.filters.contains_key(filter)) {
            return Err(AudioError::InvalidHandle);
        }
        state.sound_mut(handle)?.route = chain.to_vec();
        Ok(())
    }

    fn destroy_filter(&mut self, filter: FilterHandle) {
        self.state.borrow_mut().filters.remove(&filter);
    }

    fn update(&mut self) {}

    fn stop_all(&mut self) {
        for sound in self.state.borrow_mut().sounds.values_mut() {
            sound.playing = false;
        }
    }

    fn poll_events(&mut self) -> Vec<DeviceEvent> {
        let mut state = self.state.borrow_mut();
        if !state.manual_decode {
            state.complete_decodes();
        }
        state.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_completes_on_poll() {
        let mut device = MockDevice::new();
        let key = CacheKey::for_source("a.ogg");
        device.begin_decode(&key, "a.ogg").unwrap();
        assert!(!device.is_decoded(&key));

        let events = device.poll_events();
        assert_eq!(events, vec![DeviceEvent::DecodeCompleted { key: key.clone() }]);
        assert!(device.is_decoded(&key));
    }

    #[test]
    fn test_failing_source() {
        let mut device = MockDevice::new();
        device.fail_source("bad.ogg");
        let key = CacheKey::for_source("bad.ogg");
        device.begin_decode(&key, "bad.ogg").unwrap();

        let events = device.poll_events();
        assert!(matches!(events.as_slice(), [DeviceEvent::DecodeFailed { .. }]));
        assert!(!device.is_decoded(&key));
    }

    #[test]
    fn test_locked_play_fails() {
        let mut device = MockDevice::new();
        let key = CacheKey::for_source("a.ogg");
        device.preload(key.clone());
        let handle = device.create_sound(&key, true).unwrap();

        device.set_unlocked(false);
        assert_eq!(device.play(handle, 0.0), Err(AudioError::DeviceLocked));

        device.set_unlocked(true);
        assert!(device.poll_events().contains(&DeviceEvent::Unlocked));
        assert!(device.play(handle, 0.0).is_ok());
        assert!(device.is_playing(handle));
    }

    #[test]
    fn test_probe_shares_state() {
        let mut device = MockDevice::new();
        let probe = device.probe();
        let key = CacheKey::for_source("a.ogg");
        device.preload(key.clone());
        let handle = device.create_sound(&key, false).unwrap();
        device.set_volume(handle, 0.25).unwrap();

        assert_eq!(probe.sound(handle).map(|sound| sound.volume), Some(0.25));
        probe.kill(handle);
        assert_eq!(device.set_volume(handle, 0.5), Err(AudioError::InvalidHandle));
    }

    #[test]
    fn test_detune_unsupported() {
        let mut device = MockDevice::new();
        device.set_detune_supported(false);
        let key = CacheKey::for_source("a.ogg");
        device.preload(key.clone());
        let handle = device.create_sound(&key, false).unwrap();
        assert_eq!(device.set_detune(handle, 100.0), Err(AudioError::Unsupported("detune")));
    }
}
