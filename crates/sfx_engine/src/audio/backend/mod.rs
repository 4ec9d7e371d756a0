//! Audio backend implementations
//!
//! Platform-independent abstraction over the output device. The engine only
//! talks to [`AudioDevice`]; every call returns `Result<_, AudioError>` so the
//! layers above never need to guess which controls a device supports.

#[cfg(any(test, feature = "mock-device"))]
pub mod mock_backend;
#[cfg(feature = "rodio-backend")]
pub mod rodio_backend;

use crate::audio::asset_cache::CacheKey;
use crate::audio::AudioError;

/// Handle to a playable instance created by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle {
    /// Unique identifier for the sound
    pub id: u32,
    /// Generation counter for handle validation
    pub generation: u32,
}

impl SoundHandle {
    /// Create a new sound handle
    pub fn new(id: u32, generation: u32) -> Self {
        Self { id, generation }
    }
}

/// Handle to a filter node created by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle(pub u32);

/// Biquad filter flavours the engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Attenuates content above the cutoff
    Lowpass,
    /// Attenuates content below the cutoff
    Highpass,
}

/// Asynchronous notifications drained once per frame
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A `begin_decode` request finished and the key is playable
    DecodeCompleted {
        /// Cache key that is now decoded
        key: CacheKey,
    },
    /// A `begin_decode` request failed
    DecodeFailed {
        /// Cache key that failed
        key: CacheKey,
        /// Device-provided reason
        reason: String,
    },
    /// A non-looping instance reached its natural end
    InstanceEnded {
        /// Instance that finished
        handle: SoundHandle,
    },
    /// Output permission was granted
    Unlocked,
    /// The user interacted with the application (pointer/key)
    UserGesture,
}

/// Output device trait for platform abstraction
///
/// Not `Send + Sync`: the engine is driven from a single frame loop.
pub trait AudioDevice {
    /// Initialize the audio backend
    fn initialize(&mut self, config: &AudioBackendConfig) -> Result<(), AudioError>;

    /// Shutdown the audio backend
    fn shutdown(&mut self);

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Whether the platform currently allows audio output
    fn is_unlocked(&self) -> bool;

    /// Ask the platform to resume output (autoplay unlock, wake from sleep)
    fn try_resume(&mut self);

    /// Whether `key` is already decoded and playable
    fn is_decoded(&self, key: &CacheKey) -> bool;

    /// Start decoding `source_id` under `key`; completion arrives as a [`DeviceEvent`]
    fn begin_decode(&mut self, key: &CacheKey, source_id: &str) -> Result<(), AudioError>;

    /// Create a stopped instance for a decoded key
    fn create_sound(&mut self, key: &CacheKey, looping: bool) -> Result<SoundHandle, AudioError>;

    /// Start playback at `seek_seconds`
    fn play(&mut self, handle: SoundHandle, seek_seconds: f32) -> Result<(), AudioError>;

    /// Pause a playing sound
    fn pause(&mut self, handle: SoundHandle) -> Result<(), AudioError>;

    /// Resume a paused sound
    fn resume(&mut self, handle: SoundHandle) -> Result<(), AudioError>;

    /// Stop a sound, keeping the instance
    fn stop(&mut self, handle: SoundHandle) -> Result<(), AudioError>;

    /// Release an instance; later calls with the handle fail
    fn destroy(&mut self, handle: SoundHandle);

    /// Set volume of a sound
    fn set_volume(&mut self, handle: SoundHandle, volume: f32) -> Result<(), AudioError>;

    /// Get volume of a sound
    fn get_volume(&self, handle: SoundHandle) -> Result<f32, AudioError>;

    /// Stereo pan in `[-1, 1]`
    fn set_pan(&mut self, handle: SoundHandle, pan: f32) -> Result<(), AudioError>;

    /// Playback rate multiplier
    fn set_rate(&mut self, handle: SoundHandle, rate: f32) -> Result<(), AudioError>;

    /// Pitch offset in cents
    fn set_detune(&mut self, handle: SoundHandle, cents: f32) -> Result<(), AudioError>;

    /// Length of the instance's asset in seconds, if known
    fn duration(&self, handle: SoundHandle) -> Option<f32>;

    /// Check if a sound is playing
    fn is_playing(&self, handle: SoundHandle) -> bool;

    /// Create a standalone filter node
    fn create_filter(&mut self, kind: FilterKind, frequency_hz: f32) -> Result<FilterHandle, AudioError>;

    /// Retune a filter node
    fn set_filter_frequency(&mut self, filter: FilterHandle, frequency_hz: f32) -> Result<(), AudioError>;

    /// Route an instance through `chain` in order, or straight to the output when empty
    fn route_through(&mut self, handle: SoundHandle, chain: &[FilterHandle]) -> Result<(), AudioError>;

    /// Release a filter node
    fn destroy_filter(&mut self, filter: FilterHandle);

    /// Update the backend (cleanup finished sounds, etc.)
    fn update(&mut self);

    /// Stop all playing sounds
    fn stop_all(&mut self);

    /// Drain pending notifications
    fn poll_events(&mut self) -> Vec<DeviceEvent>;
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of output channels (1=mono, 2=stereo)
    pub channels: u16,
    /// Buffer size for audio processing
    pub buffer_size: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_size: 4096,
        }
    }
}

/// Create the default audio backend for the platform
///
/// Assets are read from `asset_root` joined with each source id.
#[cfg(feature = "rodio-backend")]
pub fn create_backend(
    config: &AudioBackendConfig,
    asset_root: impl Into<std::path::PathBuf>,
) -> Result<Box<dyn AudioDevice>, AudioError> {
    let mut backend = Box::new(rodio_backend::RodioBackend::new(asset_root));
    backend.initialize(config)?;
    Ok(backend)
}
