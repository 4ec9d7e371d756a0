//! Audio system
//!
//! Category-driven playback on top of a device adapter:
//!
//! - [`resolver`] and [`shuffle`] turn a category path into one concrete source id
//! - [`asset_cache`] and [`session_pack`] stream decoded assets in the background
//! - [`spatial`], [`signal_chain`] and [`ducking`] shape every live instance per frame
//! - [`reverb`] lets explosion reverb tails compete for space
//! - [`sound_manager`] owns the one-shot, exclusive and loop registries

pub mod backend;
pub mod category;
pub mod manifest;
pub mod resolver;
pub mod shuffle;
pub mod mixer;
pub mod asset_cache;
pub mod session_pack;
pub mod spatial;
pub mod tween;
pub mod signal_chain;
pub mod ducking;
pub mod reverb;
pub mod voice_manager;
pub mod loops;
pub mod sound_manager;

#[cfg(test)]
mod tests;

pub use asset_cache::{AssetCache, CacheKey, LoadFuture};
pub use backend::{AudioBackendConfig, AudioDevice, DeviceEvent, FilterHandle, FilterKind, SoundHandle};
pub use manifest::SoundManifest;
pub use resolver::{CategoryResolver, ResolvedCategory};
pub use session_pack::{PackFuture, PackRequest, SessionPack, SharedSessionPack, Tier};
pub use sound_manager::{LoopOptions, PlaybackHandle, PlaybackState, SoundManager, SoundPlayOptions};

use thiserror::Error;

/// Errors reported by device adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Backend has not been initialized
    #[error("Audio backend not initialized")]
    BackendNotInitialized,

    /// Backend failed to open the output device
    #[error("Audio backend initialization failed: {0}")]
    BackendInitFailed(String),

    /// Handle does not refer to a live sound or filter
    #[error("Invalid sound handle")]
    InvalidHandle,

    /// Playback could not be started
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// Output is blocked until the platform grants permission
    #[error("Audio output is locked until user interaction")]
    DeviceLocked,

    /// The device has no such control
    #[error("Unsupported by this backend: {0}")]
    Unsupported(&'static str),

    /// Source bytes could not be fetched or decoded
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
}

/// Errors delivered through cache load futures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The device reported a decode failure
    #[error("failed to decode '{source_id}': {reason}")]
    DecodeFailed {
        /// Source identifier that failed
        source_id: String,
        /// Device-provided reason
        reason: String,
    },

    /// The manager was torn down
    #[error("audio engine destroyed")]
    Destroyed,

    /// The completion channel was dropped before resolving
    #[error("load cancelled")]
    Cancelled,
}

/// Errors raised while building manifests or priority tables
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Manifest text could not be parsed
    #[error("Manifest parse error: {0}")]
    Parse(String),

    /// A priority rule pattern is not a valid regex
    #[error("Invalid priority pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },

    /// Configuration loading failed
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
