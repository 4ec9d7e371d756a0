//! Sound manifest
//!
//! Opaque mapping from category path to the source ids that can play for
//! it. Accepts either a bare object or one wrapped in `"folders"`.

use crate::audio::category::normalize;
use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestRepr {
    Wrapped { folders: BTreeMap<String, Vec<String>> },
    Bare(BTreeMap<String, Vec<String>>),
}

impl From<ManifestRepr> for SoundManifest {
    fn from(repr: ManifestRepr) -> Self {
        match repr {
            ManifestRepr::Wrapped { folders } | ManifestRepr::Bare(folders) => Self::from_map(folders),
        }
    }
}

/// Category → source ids
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ManifestRepr")]
pub struct SoundManifest {
    folders: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    lowercase: HashMap<String, String>,
}

impl SoundManifest {
    /// Build from any category → sources iterator
    ///
    /// Keys are normalized; empty source lists and blank ids are dropped.
    pub fn from_map<I, K, V, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut folders: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, sources) in entries {
            let key = normalize(key.as_ref());
            if key.is_empty() {
                continue;
            }
            let sources: Vec<String> = sources
                .into_iter()
                .map(Into::into)
                .filter(|source: &String| !source.trim().is_empty())
                .collect();
            if sources.is_empty() {
                continue;
            }
            folders.entry(key).or_default().extend(sources);
        }

        let mut lowercase = HashMap::new();
        for key in folders.keys() {
            lowercase.entry(key.to_lowercase()).or_insert_with(|| key.clone());
        }
        Self { folders, lowercase }
    }

    /// Parse manifest JSON
    pub fn from_json_str(text: &str) -> Result<Self, crate::audio::ManifestError> {
        serde_json::from_str(text).map_err(|e| crate::audio::ManifestError::Parse(e.to_string()))
    }

    /// Sources for an exact normalized key
    pub fn get(&self, category: &str) -> Option<&[String]> {
        self.folders.get(category).map(Vec::as_slice)
    }

    /// Key and sources for a case-insensitive match
    pub fn get_case_insensitive(&self, category: &str) -> Option<(&str, &[String])> {
        let key = self.lowercase.get(&category.to_lowercase())?;
        self.folders
            .get_key_value(key)
            .map(|(key, sources)| (key.as_str(), sources.as_slice()))
    }

    /// Every category in key order
    pub fn categories(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.folders.iter().map(|(key, sources)| (key.as_str(), sources.as_slice()))
    }

    /// Number of categories
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    /// Whether the manifest has no categories
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

impl Config for SoundManifest {}
