//! Audio mixer table
//!
//! Static hierarchical settings keyed by category path prefix. A category's
//! effective settings combine every track along its path: gain and pitch
//! add up, the lowest non-zero lowpass wins and the highest highpass wins.

use crate::audio::category::normalize;
use crate::foundation::math::db_to_gain;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of the mixer table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerTrack {
    /// Category prefix this track applies to
    pub path: String,
    /// Gain offset in dB
    #[serde(default)]
    pub volume_db: f32,
    /// Lowpass cutoff in Hz, 0 for none
    #[serde(default)]
    pub lowpass_hz: f32,
    /// Highpass cutoff in Hz, 0 for none
    #[serde(default)]
    pub highpass_hz: f32,
    /// Pitch offset in cents
    #[serde(default)]
    pub pitch_cents: f32,
}

impl MixerTrack {
    /// Track with only a gain offset
    pub fn gain(path: &str, volume_db: f32) -> Self {
        Self {
            path: path.to_string(),
            volume_db,
            lowpass_hz: 0.0,
            highpass_hz: 0.0,
            pitch_cents: 0.0,
        }
    }

    /// Shipped balance between the major buses
    pub fn default_tracks() -> Vec<Self> {
        vec![
            Self::gain("bgm", -4.0),
            Self {
                highpass_hz: 60.0,
                ..Self::gain("environment/forest/ambient_2d", -3.0)
            },
            Self {
                lowpass_hz: 9000.0,
                ..Self::gain("environment/forest/point_3d", -2.0)
            },
            Self::gain("vehicle/player_soviet/cruise", -2.0),
            Self {
                lowpass_hz: 12000.0,
                ..Self::gain("weapon/standard/reverb_forest_after_explosion", -1.0)
            },
        ]
    }
}

/// Effective mixer settings for one category
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MixerSettings {
    /// Summed gain in dB
    pub volume_db: f32,
    /// Lowest non-zero lowpass along the path, 0 for none
    pub lowpass_hz: f32,
    /// Highest highpass along the path, 0 for none
    pub highpass_hz: f32,
    /// Summed pitch offset in cents
    pub pitch_cents: f32,
}

impl MixerSettings {
    /// Linear gain factor
    pub fn gain(&self) -> f32 {
        db_to_gain(self.volume_db)
    }

    /// Lowpass cutoff if one is configured
    pub fn lowpass(&self) -> Option<f32> {
        (self.lowpass_hz > 0.0).then_some(self.lowpass_hz)
    }

    /// Highpass cutoff if one is configured
    pub fn highpass(&self) -> Option<f32> {
        (self.highpass_hz > 0.0).then_some(self.highpass_hz)
    }
}

/// Prefix-composed mixer table with per-category memo
#[derive(Debug, Clone, Default)]
pub struct MixerTable {
    tracks: HashMap<String, MixerTrack>,
    memo: HashMap<String, MixerSettings>,
}

impl MixerTable {
    /// Build from tracks; later duplicates of a path replace earlier ones
    pub fn new(tracks: impl IntoIterator<Item = MixerTrack>) -> Self {
        let tracks = tracks
            .into_iter()
            .map(|track| (normalize(&track.path), track))
            .filter(|(path, _)| !path.is_empty())
            .collect();
        Self {
            tracks,
            memo: HashMap::new(),
        }
    }

    /// Effective settings for a resolved category
    pub fn settings_for(&mut self, category: &str) -> MixerSettings {
        let category = normalize(category);
        if let Some(settings) = self.memo.get(&category) {
            return *settings;
        }
        let settings = self.compose(&category);
        self.memo.insert(category, settings);
        settings
    }

    fn compose(&self, category: &str) -> MixerSettings {
        let mut settings = MixerSettings::default();
        let mut prefix = String::new();
        for segment in category.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);

            let Some(track) = self.tracks.get(&prefix) else {
                continue;
            };
            settings.volume_db += track.volume_db;
            settings.pitch_cents += track.pitch_cents;
            if track.lowpass_hz > 0.0 && (settings.lowpass_hz <= 0.0 || track.lowpass_hz < settings.lowpass_hz) {
                settings.lowpass_hz = track.lowpass_hz;
            }
            if track.highpass_hz > settings.highpass_hz {
                settings.highpass_hz = track.highpass_hz;
            }
        }
        settings
    }

    /// Number of memoized categories
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table() -> MixerTable {
        MixerTable::new(vec![
            MixerTrack { lowpass_hz: 12000.0, ..MixerTrack::gain("weapon", -2.0) },
            MixerTrack { highpass_hz: 80.0, pitch_cents: 50.0, ..MixerTrack::gain("weapon/standard", -1.0) },
            MixerTrack { lowpass_hz: 8000.0, highpass_hz: 40.0, ..MixerTrack::gain("weapon/standard/explosion", 3.0) },
        ])
    }

    #[test]
    fn test_composition_along_path() {
        let mut table = table();
        let settings = table.settings_for("weapon/standard/explosion");
        assert_relative_eq!(settings.volume_db, 0.0);
        assert_relative_eq!(settings.lowpass_hz, 8000.0);
        assert_relative_eq!(settings.highpass_hz, 80.0);
        assert_relative_eq!(settings.pitch_cents, 50.0);
    }

    #[test]
    fn test_partial_path() {
        let mut table = table();
        let settings = table.settings_for("weapon/he/fire");
        assert_relative_eq!(settings.volume_db, -2.0);
        assert_relative_eq!(settings.lowpass_hz, 12000.0);
        assert_eq!(settings.highpass(), None);
    }

    #[test]
    fn test_unknown_category_is_neutral() {
        let mut table = table();
        let settings = table.settings_for("ui/click");
        assert_eq!(settings, MixerSettings::default());
        assert_relative_eq!(settings.gain(), 1.0);
    }

    #[test]
    fn test_memoized() {
        let mut table = table();
        table.settings_for("weapon/standard/fire");
        table.settings_for("/weapon/standard/fire/");
        assert_eq!(table.memo_len(), 1);
    }
}
