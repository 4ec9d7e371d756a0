//! Configuration system
//!
//! Every tunable of the audio engine lives in [`SoundConfig`], which can be
//! loaded from TOML, RON or JSON. Each subsystem owns its own section type
//! next to the code that reads it.

pub use serde::{Serialize, Deserialize};

use crate::audio::ducking::DuckingConfig;
use crate::audio::asset_cache::StreamingConfig;
use crate::audio::mixer::MixerTrack;
use crate::audio::reverb::ReverbConfig;
use crate::audio::session_pack::PriorityRule;
use crate::audio::sound_manager::PlaybackConfig;
use crate::audio::spatial::SpatialConfig;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;
        Self::from_str_with_format(&contents, path)
    }

    /// Parse configuration text, picking the format from the file name
    fn from_str_with_format(contents: &str, path: &str) -> Result<Self, ConfigError> {
        if path.ends_with(".toml") {
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".json") {
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".json") {
            serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Complete audio engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Attenuation and panning
    pub spatial: SpatialConfig,
    /// Decode cache and prefetch
    pub streaming: StreamingConfig,
    /// Loop, exclusive and one-shot defaults
    pub playback: PlaybackConfig,
    /// Sidechain ducking and cookoff focus
    pub ducking: DuckingConfig,
    /// Forest reverb tail yielding and pan drift
    pub reverb: ReverbConfig,
    /// Hierarchical mixer tracks
    pub mixer: Vec<MixerTrack>,
    /// Ordered bulk-load priority rules, first match wins
    pub priority_rules: Vec<PriorityRule>,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            spatial: SpatialConfig::default(),
            streaming: StreamingConfig::default(),
            playback: PlaybackConfig::default(),
            ducking: DuckingConfig::default(),
            reverb: ReverbConfig::default(),
            mixer: MixerTrack::default_tracks(),
            priority_rules: PriorityRule::default_rules(),
        }
    }
}

impl Config for SoundConfig {}
