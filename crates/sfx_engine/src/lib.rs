//! # SFX Engine
//!
//! Spatialized game audio on top of a pluggable output device.
//!
//! ## Features
//!
//! - **Category Playback**: Hierarchical category paths resolved to shuffled asset variants
//! - **Streaming Assets**: Deduplicated background decoding with tiered session packs
//! - **Spatial Mixing**: Camera-relative attenuation and panning
//! - **Dynamic Mix**: Sidechain ducking, cookoff focus and per-instance filter chains
//! - **Loops and Slots**: Named loops with fades, exclusive slots with crossfades
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sfx_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = create_backend(&AudioBackendConfig::default(), "resources/audio")?;
//!     let manifest = SoundManifest::load_from_file("resources/audio/manifest.json")?;
//!     let mut sounds = SoundManager::new(device, manifest, SoundConfig::default())?;
//!
//!     sounds.start_loop("forest", "environment/forest/ambient_2d/forest_loop", LoopOptions::new());
//!     sounds.play_folder("weapon/standard/fire", SoundPlayOptions::new().at(640.0, 360.0));
//!
//!     loop {
//!         sounds.update(1.0 / 60.0);
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod audio;

/// Common imports for engine users
pub mod prelude {
    #[cfg(feature = "rodio-backend")]
    pub use crate::audio::backend::create_backend;
    pub use crate::{
        audio::{
            spatial::Viewport, AudioBackendConfig, AudioDevice, AudioError, LoopOptions, PackRequest,
            PlaybackHandle, PlaybackState, SoundManager, SoundManifest, SoundPlayOptions, Tier,
        },
        config::{Config, SoundConfig},
    };
}
