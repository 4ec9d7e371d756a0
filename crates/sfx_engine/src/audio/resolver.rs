//! Category resolver
//!
//! Maps a requested category path onto manifest entries with a fallback
//! chain, first hit wins:
//!
//! 1. exact match
//! 2. case-insensitive match
//! 3. duplicate-suppression marker (`_DS`) stripped from segment ends
//! 4. weapon family replaced by the default family (`weapon/he/fire` → `weapon/standard/fire`)
//! 5. nearest ancestor with an exact match

use crate::audio::category::{ancestors, normalize};
use crate::audio::manifest::SoundManifest;
use std::collections::HashSet;

/// Marker appended to segments of duplicate-suppressed variants
pub const DUPLICATE_SUPPRESSION_MARKER: &str = "_DS";

/// Weapon family every other family falls back to
pub const DEFAULT_WEAPON_FAMILY: &str = "standard";

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCategory {
    /// Manifest key that matched
    pub path: String,
    /// Candidate source ids for that key
    pub sources: Vec<String>,
}

/// Category → candidate assets, with miss logging
#[derive(Debug, Default)]
pub struct CategoryResolver {
    manifest: SoundManifest,
    logged_misses: HashSet<String>,
}

impl CategoryResolver {
    /// Create a resolver over a manifest
    pub fn new(manifest: SoundManifest) -> Self {
        Self {
            manifest,
            logged_misses: HashSet::new(),
        }
    }

    /// Underlying manifest
    pub fn manifest(&self) -> &SoundManifest {
        &self.manifest
    }

    fn direct(&self, path: &str) -> Option<ResolvedCategory> {
        if let Some(sources) = self.manifest.get(path) {
            return Some(ResolvedCategory {
                path: path.to_string(),
                sources: sources.to_vec(),
            });
        }
        self.manifest
            .get_case_insensitive(path)
            .map(|(key, sources)| ResolvedCategory {
                path: key.to_string(),
                sources: sources.to_vec(),
            })
    }

    /// Resolve a category, or `None` when every fallback misses
    pub fn resolve(&self, category: &str) -> Option<ResolvedCategory> {
        let normalized = normalize(category);
        if normalized.is_empty() {
            return None;
        }

        if let Some(hit) = self.direct(&normalized) {
            return Some(hit);
        }

        if let Some(stripped) = strip_marker(&normalized) {
            if let Some(hit) = self.direct(&stripped) {
                return Some(hit);
            }
        }

        if let Some(substituted) = substitute_weapon_family(&normalized) {
            if let Some(hit) = self.direct(&substituted) {
                return Some(hit);
            }
        }

        let nearest = ancestors(&normalized).find_map(|parent| {
            self.manifest.get(parent).map(|sources| ResolvedCategory {
                path: parent.to_string(),
                sources: sources.to_vec(),
            })
        });
        nearest
    }

    /// Resolve and log a miss at most once per path
    pub fn resolve_or_log(&mut self, category: &str) -> Option<ResolvedCategory> {
        let resolved = self.resolve(category);
        if resolved.is_none() {
            self.log_missing_once(category);
        }
        resolved
    }

    /// Warn about a category with no playable audio, once per path
    pub fn log_missing_once(&mut self, category: &str) {
        let key = normalize(category);
        if self.logged_misses.insert(key.clone()) {
            log::warn!("No audio for category '{key}'");
        }
    }

    /// Whether the category has audio under its own key (no fallbacks)
    pub fn has_category_audio(&self, category: &str) -> bool {
        let normalized = normalize(category);
        !normalized.is_empty() && self.direct(&normalized).is_some()
    }

    /// Sorted manifest keys, optionally filtered by a case-insensitive prefix
    pub fn list_category_keys(&self, prefix: Option<&str>) -> Vec<String> {
        let prefix = prefix.map(|p| normalize(p).to_lowercase()).unwrap_or_default();
        let mut keys: Vec<String> = self
            .manifest
            .categories()
            .map(|(key, _)| key)
            .filter(|key| prefix.is_empty() || key.to_lowercase().starts_with(&prefix))
            .map(str::to_string)
            .collect();
        keys.sort();
        keys
    }
}

fn strip_marker(path: &str) -> Option<String> {
    let mut changed = false;
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| match segment.strip_suffix(DUPLICATE_SUPPRESSION_MARKER) {
            Some(base) if !base.is_empty() => {
                changed = true;
                base
            }
            _ => segment,
        })
        .collect();
    changed.then(|| segments.join("/"))
}

fn substitute_weapon_family(path: &str) -> Option<String> {
    let rest = path.strip_prefix("weapon/")?;
    let (family, tail) = rest.split_once('/')?;
    if family == DEFAULT_WEAPON_FAMILY || tail.is_empty() {
        return None;
    }
    Some(format!("weapon/{DEFAULT_WEAPON_FAMILY}/{tail}"))
}
