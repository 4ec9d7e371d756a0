//! Desktop output device backed by rodio
//!
//! Source ids are file paths relative to the asset root. Decoding reads the
//! whole file into memory and probes it once; every instance then streams
//! from the shared bytes through its own [`Sink`]. Desktop output never
//! needs an unlock gesture, so the device reports itself unlocked as soon as
//! it is initialized.
//!
//! Rodio has no per-sink panning or biquad nodes, so pan and filter controls
//! return [`AudioError::Unsupported`]. Detune is reported unsupported too;
//! callers fall back to a playback-rate change.
//!
//! # Example
//!
//! ```no_run
//! use sfx_engine::audio::backend::{AudioBackendConfig, AudioDevice};
//! use sfx_engine::audio::backend::rodio_backend::RodioBackend;
//!
//! let mut backend = RodioBackend::new("resources/audio");
//! backend.initialize(&AudioBackendConfig::default()).unwrap();
//! ```

use super::{AudioBackendConfig, AudioDevice, DeviceEvent, FilterHandle, FilterKind, SoundHandle};
use crate::audio::asset_cache::CacheKey;
use crate::audio::AudioError;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Bytes of one decoded asset
struct DecodedAsset {
    bytes: Arc<[u8]>,
    duration: Option<f32>,
}

/// One instance; the sink exists between `play` and `stop`
struct RodioSound {
    key: CacheKey,
    looping: bool,
    sink: Option<Sink>,
    volume: f32,
    rate: f32,
    ended: bool,
}

/// Rodio-based audio backend
pub struct RodioBackend {
    /// Directory source ids are resolved against
    asset_root: PathBuf,
    /// Audio output stream (must be kept alive)
    _output_stream: Option<OutputStream>,
    /// Output stream handle for creating sinks
    stream_handle: Option<OutputStreamHandle>,
    /// Decoded assets by cache key
    decoded: HashMap<CacheKey, DecodedAsset>,
    /// Instances created by the engine
    sounds: HashMap<SoundHandle, RodioSound>,
    /// Notifications waiting for `poll_events`
    events: Vec<DeviceEvent>,
    /// Next sound ID for handle generation
    next_id: u32,
    /// Configured output rate
    sample_rate: u32,
    /// Initialization state
    initialized: bool,
}

impl RodioBackend {
    /// Create a new Rodio backend reading assets below `asset_root`
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            _output_stream: None,
            stream_handle: None,
            decoded: HashMap::new(),
            sounds: HashMap::new(),
            events: Vec::new(),
            next_id: 0,
            sample_rate: AudioBackendConfig::default().sample_rate,
            initialized: false,
        }
    }

    /// Generate a new sound handle
    fn next_handle(&mut self) -> SoundHandle {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        SoundHandle::new(id, 0)
    }

    fn sound(&self, handle: SoundHandle) -> Result<&RodioSound, AudioError> {
        self.sounds.get(&handle).ok_or(AudioError::InvalidHandle)
    }

    fn sound_mut(&mut self, handle: SoundHandle) -> Result<&mut RodioSound, AudioError> {
        self.sounds.get_mut(&handle).ok_or(AudioError::InvalidHandle)
    }

    /// Read and probe a file, returning its bytes and length
    fn load(&self, source_id: &str) -> Result<DecodedAsset, AudioError> {
        let path = self.asset_root.join(source_id);
        let bytes: Arc<[u8]> = std::fs::read(&path)
            .map_err(|e| AudioError::DecodeFailed(format!("Failed to open {}: {e}", path.display())))?
            .into();
        let probe = Decoder::new(Cursor::new(Arc::clone(&bytes)))
            .map_err(|e| AudioError::DecodeFailed(format!("Failed to decode {}: {e}", path.display())))?;
        let duration = probe.total_duration().map(|d| d.as_secs_f32());
        Ok(DecodedAsset { bytes, duration })
    }
}

impl AudioDevice for RodioBackend {
    fn initialize(&mut self, config: &AudioBackendConfig) -> Result<(), AudioError> {
        if self.initialized {
            return Ok(());
        }

        // Create output stream
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| AudioError::BackendInitFailed(format!("Failed to create audio output: {e}")))?;

        self._output_stream = Some(stream);
        self.stream_handle = Some(stream_handle);
        self.sample_rate = config.sample_rate;
        self.initialized = true;

        log::info!("Rodio audio backend initialized, assets from {}", self.asset_root.display());
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }

        self.stop_all();
        self.sounds.clear();

        // Drop stream handle and output
        self.stream_handle = None;
        self._output_stream = None;
        self.initialized = false;

        log::info!("Rodio audio backend shutdown");
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_unlocked(&self) -> bool {
        self.initialized
    }

    fn try_resume(&mut self) {}

    fn is_decoded(&self, key: &CacheKey) -> bool {
        self.decoded.contains_key(key)
    }

    fn begin_decode(&mut self, key: &CacheKey, source_id: &str) -> Result<(), AudioError> {
        match self.load(source_id) {
            Ok(asset) => {
                log::debug!("Decoded '{source_id}' ({key})");
                self.decoded.insert(key.clone(), asset);
                self.events.push(DeviceEvent::DecodeCompleted { key: key.clone() });
            }
            Err(e) => self.events.push(DeviceEvent::DecodeFailed {
                key: key.clone(),
                reason: e.to_string(),
            }),
        }
        Ok(())
    }

    fn create_sound(&mut self, key: &CacheKey, looping: bool) -> Result<SoundHandle, AudioError> {
        if !self.decoded.contains_key(key) {
            return Err(AudioError::PlaybackFailed(format!("{key} is not decoded")));
        }
        let handle = self.next_handle();
        self.sounds.insert(
            handle,
            RodioSound {
                key: key.clone(),
                looping,
                sink: None,
                volume: 1.0,
                rate: 1.0,
                ended: false,
            },
        );
        Ok(handle)
    }

    fn play(&mut self, handle: SoundHandle, seek_seconds: f32) -> Result<(), AudioError> {
        let stream_handle = self.stream_handle.as_ref().ok_or(AudioError::BackendNotInitialized)?;
        let sound = self.sounds.get_mut(&handle).ok_or(AudioError::InvalidHandle)?;
        let asset = self.decoded.get(&sound.key).ok_or(AudioError::InvalidHandle)?;

        // Create sink for this instance
        let sink = Sink::try_new(stream_handle)
            .map_err(|e| AudioError::PlaybackFailed(format!("Failed to create sink: {e}")))?;
        let skip = Duration::from_secs_f32(if seek_seconds.is_finite() { seek_seconds.max(0.0) } else { 0.0 });
        let cursor = Cursor::new(Arc::clone(&asset.bytes));
        if sound.looping {
            let source = Decoder::new_looped(cursor)
                .map_err(|e| AudioError::PlaybackFailed(format!("Failed to decode audio: {e}")))?;
            sink.append(source.skip_duration(skip));
        } else {
            let source = Decoder::new(cursor)
                .map_err(|e| AudioError::PlaybackFailed(format!("Failed to decode audio: {e}")))?;
            sink.append(source.skip_duration(skip));
        }
        sink.set_volume(sound.volume);
        sink.set_speed(sound.rate);

        if let Some(previous) = sound.sink.replace(sink) {
            previous.stop();
        }
        sound.ended = false;
        Ok(())
    }

    fn pause(&mut self, handle: SoundHandle) -> Result<(), AudioError> {
        if let Some(sink) = &self.sound(handle)?.sink {
            sink.pause();
        }
        Ok(())
    }

    fn resume(&mut self, handle: SoundHandle) -> Result<(), AudioError> {
        if let Some(sink) = &self.sound(handle)?.sink {
            sink.play();
        }
        Ok(())
    }

    fn stop(&mut self, handle: SoundHandle) -> Result<(), AudioError> {
        if let Some(sink) = self.sound_mut(handle)?.sink.take() {
            sink.stop();
        }
        Ok(())
    }

    fn destroy(&mut self, handle: SoundHandle) {
        if let Some(sound) = self.sounds.remove(&handle) {
            if let Some(sink) = sound.sink {
                sink.stop();
            }
        }
    }

    fn set_volume(&mut self, handle: SoundHandle, volume: f32) -> Result<(), AudioError> {
        let sound = self.sound_mut(handle)?;
        sound.volume = volume;
        if let Some(sink) = &sound.sink {
            sink.set_volume(volume);
        }
        Ok(())
    }

    fn get_volume(&self, handle: SoundHandle) -> Result<f32, AudioError> {
        Ok(self.sound(handle)?.volume)
    }

    fn set_pan(&mut self, handle: SoundHandle, _pan: f32) -> Result<(), AudioError> {
        self.sound(handle)?;
        Err(AudioError::Unsupported("pan"))
    }

    fn set_rate(&mut self, handle: SoundHandle, rate: f32) -> Result<(), AudioError> {
        let sound = self.sound_mut(handle)?;
        sound.rate = rate;
        if let Some(sink) = &sound.sink {
            sink.set_speed(rate);
        }
        Ok(())
    }

    fn set_detune(&mut self, handle: SoundHandle, _cents: f32) -> Result<(), AudioError> {
        self.sound(handle)?;
        Err(AudioError::Unsupported("detune"))
    }

    fn duration(&self, handle: SoundHandle) -> Option<f32> {
        let sound = self.sounds.get(&handle)?;
        self.decoded.get(&sound.key)?.duration
    }

    fn is_playing(&self, handle: SoundHandle) -> bool {
        self.sounds
            .get(&handle)
            .and_then(|sound| sound.sink.as_ref())
            .is_some_and(|sink| !sink.is_paused() && !sink.empty())
    }

    fn create_filter(&mut self, _kind: FilterKind, _frequency_hz: f32) -> Result<FilterHandle, AudioError> {
        Err(AudioError::Unsupported("filters"))
    }

    fn set_filter_frequency(&mut self, _filter: FilterHandle, _frequency_hz: f32) -> Result<(), AudioError> {
        Err(AudioError::Unsupported("filters"))
    }

    fn route_through(&mut self, handle: SoundHandle, chain: &[FilterHandle]) -> Result<(), AudioError> {
        self.sound(handle)?;
        if chain.is_empty() {
            Ok(())
        } else {
            Err(AudioError::Unsupported("filters"))
        }
    }

    fn destroy_filter(&mut self, _filter: FilterHandle) {}

    fn update(&mut self) {
        // Report finished one-shots once; the engine destroys them
        for (handle, sound) in &mut self.sounds {
            let finished = sound.sink.as_ref().is_some_and(Sink::empty);
            if !sound.looping && finished && !sound.ended {
                sound.ended = true;
                self.events.push(DeviceEvent::InstanceEnded { handle: *handle });
            }
        }
    }

    fn stop_all(&mut self) {
        for sound in self.sounds.values_mut() {
            if let Some(sink) = sound.sink.take() {
                sink.stop();
            }
        }
    }

    fn poll_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mono 16-bit PCM WAV of `samples` silent samples at 8 kHz
    fn silent_wav(samples: u32) -> Vec<u8> {
        let data_len = samples * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&8000u32.to_le_bytes());
        bytes.extend_from_slice(&16000u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(44 + data_len as usize, 0);
        bytes
    }

    fn asset_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sfx_engine_rodio_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("blip.wav"), silent_wav(800)).unwrap();
        dir
    }

    #[test]
    fn test_backend_initialization() {
        let mut backend = RodioBackend::new(".");
        assert!(!backend.is_initialized());
        assert!(!backend.is_unlocked());

        let config = AudioBackendConfig::default();
        let result = backend.initialize(&config);

        // May fail in CI/test environments without audio device
        if result.is_ok() {
            assert!(backend.is_initialized());
            assert!(backend.is_unlocked());
            backend.shutdown();
            assert!(!backend.is_initialized());
        }
    }

    #[test]
    fn test_handle_generation() {
        let mut backend = RodioBackend::new(".");
        let handle1 = backend.next_handle();
        let handle2 = backend.next_handle();

        assert_ne!(handle1.id, handle2.id);
    }

    #[test]
    fn test_decode_reads_and_probes_file() {
        let dir = asset_dir("decode");
        let mut backend = RodioBackend::new(&dir);
        let key = CacheKey::for_source("blip.wav");

        backend.begin_decode(&key, "blip.wav").unwrap();
        assert_eq!(backend.poll_events(), vec![DeviceEvent::DecodeCompleted { key: key.clone() }]);
        assert!(backend.is_decoded(&key));

        let handle = backend.create_sound(&key, false).unwrap();
        let duration = backend.duration(handle).unwrap();
        assert!((duration - 0.1).abs() < 0.01);
        assert!(!backend.is_playing(handle));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_file_reports_failure() {
        let mut backend = RodioBackend::new(std::env::temp_dir());
        let key = CacheKey::for_source("does/not/exist.ogg");

        backend.begin_decode(&key, "does/not/exist.ogg").unwrap();
        let events = backend.poll_events();
        assert!(matches!(events.as_slice(), [DeviceEvent::DecodeFailed { .. }]));
        assert!(!backend.is_decoded(&key));
        assert!(backend.create_sound(&key, false).is_err());
    }

    #[test]
    fn test_playback_without_initialization() {
        let dir = asset_dir("uninit");
        let mut backend = RodioBackend::new(&dir);
        let key = CacheKey::for_source("blip.wav");
        backend.begin_decode(&key, "blip.wav").unwrap();

        let handle = backend.create_sound(&key, false).unwrap();
        assert!(matches!(backend.play(handle, 0.0), Err(AudioError::BackendNotInitialized)));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_unsupported_controls() {
        let dir = asset_dir("controls");
        let mut backend = RodioBackend::new(&dir);
        let key = CacheKey::for_source("blip.wav");
        backend.begin_decode(&key, "blip.wav").unwrap();
        let handle = backend.create_sound(&key, true).unwrap();

        assert!(matches!(backend.set_pan(handle, 0.5), Err(AudioError::Unsupported(_))));
        assert!(matches!(backend.set_detune(handle, 100.0), Err(AudioError::Unsupported(_))));
        assert!(backend.create_filter(FilterKind::Lowpass, 1000.0).is_err());
        assert!(backend.route_through(handle, &[]).is_ok());

        backend.set_volume(handle, 0.25).unwrap();
        assert_eq!(backend.get_volume(handle), Ok(0.25));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_invalid_handle_operations() {
        let mut backend = RodioBackend::new(".");
        let invalid_handle = SoundHandle::new(999, 0);

        // All operations on invalid handle should return error
        assert!(matches!(backend.pause(invalid_handle), Err(AudioError::InvalidHandle)));
        assert!(matches!(backend.resume(invalid_handle), Err(AudioError::InvalidHandle)));
        assert!(matches!(backend.set_volume(invalid_handle, 0.5), Err(AudioError::InvalidHandle)));
        assert!(matches!(backend.get_volume(invalid_handle), Err(AudioError::InvalidHandle)));
        assert!(!backend.is_playing(invalid_handle));
    }

    #[test]
    fn test_finished_sound_reports_end_once() {
        let dir = asset_dir("finish");
        let mut backend = RodioBackend::new(&dir);
        if backend.initialize(&AudioBackendConfig::default()).is_err() {
            return;
        }
        let key = CacheKey::for_source("blip.wav");
        backend.begin_decode(&key, "blip.wav").unwrap();
        backend.poll_events();

        let handle = backend.create_sound(&key, false).unwrap();
        backend.play(handle, 0.0).unwrap();
        // Seeking past the end leaves nothing to play
        backend.play(handle, 5.0).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        backend.update();
        backend.update();
        let ended = backend
            .poll_events()
            .into_iter()
            .filter(|event| matches!(event, DeviceEvent::InstanceEnded { .. }))
            .count();
        assert!(ended <= 1);

        backend.shutdown();
        std::fs::remove_dir_all(dir).ok();
    }
}
