//! Content-addressed lookup for shared elements.

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

/// Maps a content hash to the arena slots holding content with that hash.
///
/// The table only stores hashes; callers compare the actual content of each
/// candidate, so two different elements with colliding hashes are never
/// merged.
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    buckets: FxHashMap<u64, SmallVec<[u32; 1]>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// First slot under `hash` for which `matches` holds.
    pub fn find(&self, hash: u64, mut matches: impl FnMut(u32) -> bool) -> Option<u32> {
        self.buckets
            .get(&hash)
            .and_then(|slots| slots.iter().copied().find(|&slot| matches(slot)))
    }

    pub fn insert(&mut self, hash: u64, slot: u32) {
        self.buckets.entry(hash).or_default().push(slot);
    }

    /// Number of distinct hashes.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

pub fn content_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_compares_content() {
        let arena = ["alpha", "beta"];
        let mut dedup = Deduplicator::new();
        // Both under one hash, as if they collided.
        dedup.insert(7, 0);
        dedup.insert(7, 1);
        assert_eq!(dedup.len(), 1);
        assert_eq!(dedup.find(7, |slot| arena[slot as usize] == "beta"), Some(1));
        assert_eq!(dedup.find(7, |slot| arena[slot as usize] == "gamma"), None);
        assert_eq!(dedup.find(8, |_| true), None);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("name"), content_hash(&String::from("name")));
        assert_ne!(content_hash("name"), content_hash("highway"));
    }
}
