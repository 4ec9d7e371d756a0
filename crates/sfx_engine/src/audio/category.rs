//! Category paths
//!
//! A category path (`weapon/standard/fire`, `bgm/forest/combat`) is the only
//! key the rest of the application uses to ask for sound. Paths are
//! normalized before any lookup or comparison.

use bitflags::bitflags;

/// Normalize a category path
///
/// Backslashes become slashes, empty segments collapse and surrounding
/// whitespace and slashes are trimmed.
pub fn normalize(path: &str) -> String {
    path.trim()
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether `path` contains `segment` as a whole path segment
pub fn has_segment(path: &str, segment: &str) -> bool {
    path.split('/').any(|part| part == segment)
}

/// Ancestors of a normalized path, nearest first, down to one segment
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let indices: Vec<usize> = path.match_indices('/').map(|(i, _)| i).collect();
    indices.into_iter().rev().map(move |i| &path[..i])
}

bitflags! {
    /// Role flags derived once from a category path
    ///
    /// Every per-frame decision (ducking, attenuation exemptions, cookoff
    /// focus) reads these flags instead of re-scanning strings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CategoryTraits: u32 {
        /// `bgm/...`
        const MUSIC = 1 << 0;
        /// 2D ambience beds, wind loops excluded
        const AMBIENCE = 1 << 1;
        /// `weapon/...`
        const WEAPON = 1 << 2;
        /// `vehicle/...`
        const VEHICLE = 1 << 3;
        /// `vehicle/enemy_*/...`
        const ENEMY = 1 << 4;
        /// Vehicle cookoff bursts
        const COOKOFF = 1 << 5;
        /// Projectile impacts, explosions and their tails
        const PROJECTILE_EXPLOSION = 1 << 6;
        /// Always played at full level regardless of distance
        const IGNORE_ATTENUATION = 1 << 7;
        /// Burning wreck loops darkened by distance
        const BURNING_LOOP = 1 << 8;
        /// Reverb tails of weapon explosions in the forest
        const FOREST_REVERB = 1 << 9;
        /// Nuke and mortar forest reverb tails, which win over the others
        const PRIORITY_REVERB = 1 << 10;
    }
}

const PROJECTILE_EXPLOSION_SEGMENTS: [&str; 5] = [
    "explosion",
    "ground_hit_forest",
    "hit_vehicle",
    "reverb_forest_after_explosion",
    "reverb_after_explosion",
];

const FOREST_REVERB_SEGMENT: &str = "reverb_forest_after_explosion";
const PRIORITY_REVERB_FAMILIES: [&str; 2] = ["weapon/nuke/", "weapon/mortar/"];

impl CategoryTraits {
    /// Classify a normalized category path
    pub fn of(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        let mut traits = Self::empty();

        if lower.starts_with("bgm/") {
            traits |= Self::MUSIC;
        }
        if has_segment(&lower, "ambient_2d") && !lower.contains("wind_loop") {
            traits |= Self::AMBIENCE;
        }
        if lower.starts_with("weapon/") {
            traits |= Self::WEAPON;
            if PROJECTILE_EXPLOSION_SEGMENTS.iter().any(|seg| has_segment(&lower, seg)) {
                traits |= Self::PROJECTILE_EXPLOSION;
            }
            if has_segment(&lower, FOREST_REVERB_SEGMENT) {
                traits |= Self::FOREST_REVERB;
                if PRIORITY_REVERB_FAMILIES.iter().any(|family| lower.starts_with(family)) {
                    traits |= Self::PRIORITY_REVERB;
                }
            }
        }
        if lower.starts_with("vehicle/") {
            traits |= Self::VEHICLE;
            if lower.starts_with("vehicle/enemy_") {
                traits |= Self::ENEMY;
            }
            if has_segment(&lower, "cookoff") {
                traits |= Self::COOKOFF;
            }
        }
        if has_segment(&lower, "hit_vehicle") {
            traits |= Self::IGNORE_ATTENUATION;
        }
        if has_segment(&lower, "burning_loop") {
            traits |= Self::BURNING_LOOP;
        }
        traits
    }
}
