//! Specialized collection types

pub use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Stable handle to a playback instance owned by the sound manager
    pub struct InstanceId;
}

/// Handle-based map for playback instances
pub type InstanceMap<T> = SlotMap<InstanceId, T>;

/// Deduplicate while keeping first-seen order
pub fn unique_in_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let item = item.as_ref();
        if seen.insert(item.to_string()) {
            out.push(item.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_in_order() {
        let items = unique_in_order(["b", "a", "b", "c", "a"]);
        assert_eq!(items, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_instance_map_keys_are_stable() {
        let mut map: InstanceMap<u32> = InstanceMap::with_key();
        let a = map.insert(1);
        let b = map.insert(2);
        map.remove(a);
        let c = map.insert(3);
        assert_ne!(a, c);
        assert_eq!(map.get(b), Some(&2));
        assert!(map.get(a).is_none());
    }
}
