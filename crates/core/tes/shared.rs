//! Numbering of the shared sections of a TES stream.
//!
//! Elements used more often get smaller numbers, so the most frequent
//! references take a single varint byte. Within each varint-width group the
//! elements are ordered by content, so the numbers depend only on what the
//! tile holds and not on the order its elements were added.

use rustc_hash::FxHashMap;
use std::cmp::Reverse;

/// Numbers below this fit in one varint byte.
pub const ONE_BYTE_GROUP: usize = 127;

/// Relation table references are shifted left once before encoding.
pub const ONE_BYTE_GROUP_SHIFTED: usize = 63;

/// Whether an element with `users` uses is shared under `threshold`.
pub fn is_shared(users: u32, threshold: u32) -> bool {
    users.saturating_sub(1) > threshold
}

/// Shared elements of one kind and their 1-based numbers.
#[derive(Debug, Default, Clone)]
pub struct SharedSection {
    order: Vec<u32>,
    numbers: FxHashMap<u32, u32>,
}

impl SharedSection {
    /// Select the elements whose usage passes `threshold` and number them.
    /// `usage` holds `(arena id, users)` pairs; `content` gives each element
    /// the key it is ordered by inside its group.
    pub fn build<K, F>(
        usage: &FxHashMap<u32, u32>,
        threshold: u32,
        first_group: usize,
        content: F,
    ) -> Self
    where
        K: Ord,
        F: Fn(u32) -> K,
    {
        let mut shared: Vec<(u32, u32, K)> = usage
            .iter()
            .filter(|&(_, &users)| is_shared(users, threshold))
            .map(|(&id, &users)| (id, users, content(id)))
            .collect();
        shared.sort_by(|a, b| (Reverse(a.1), &a.2, a.0).cmp(&(Reverse(b.1), &b.2, b.0)));

        let mut start = 0;
        let mut end = first_group;
        while start < shared.len() {
            let stop = end.min(shared.len());
            shared[start..stop].sort_by(|a, b| (&a.2, a.0).cmp(&(&b.2, b.0)));
            start = stop;
            end = (end + 1) * 128 - 1;
        }

        let order: Vec<u32> = shared.into_iter().map(|(id, _, _)| id).collect();
        let numbers = order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i as u32 + 1))
            .collect();
        Self { order, numbers }
    }

    /// Arena ids in stream order.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn number_of(&self, id: u32) -> Option<u32> {
        self.numbers.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        assert!(!is_shared(0, 0));
        assert!(!is_shared(1, 0));
        assert!(is_shared(2, 0));
        assert!(!is_shared(2, 1));
        assert!(is_shared(200, 1));
    }

    #[test]
    fn test_most_used_first() {
        let usage: FxHashMap<u32, u32> = [(4, 3), (7, 10), (1, 1), (2, 5)].into_iter().collect();
        let section = SharedSection::build(&usage, 0, ONE_BYTE_GROUP, |id| id);
        assert_eq!(section.len(), 3);
        assert_eq!(section.number_of(1), None);
        assert!(section.number_of(7).is_some());
    }

    #[test]
    fn test_first_group_in_content_order() {
        // Arena order and usage disagree with the content order.
        let names = ["zeta", "alpha", "mu"];
        let usage: FxHashMap<u32, u32> = [(0, 5), (1, 5), (2, 40)].into_iter().collect();
        let section = SharedSection::build(&usage, 0, ONE_BYTE_GROUP, |id| names[id as usize]);
        let order: Vec<&str> = section.order().iter().map(|&id| names[id as usize]).collect();
        assert_eq!(order, vec!["alpha", "mu", "zeta"]);
        assert_eq!(section.number_of(1), Some(1));
    }

    #[test]
    fn test_groups_split_by_usage() {
        // 70 ids, id n used 200 - n times; first group holds 63. Content
        // keys run backwards so each group is reversed against usage.
        let usage: FxHashMap<u32, u32> = (0..70u32).map(|n| (n, 200 - n)).collect();
        let section = SharedSection::build(&usage, 0, ONE_BYTE_GROUP_SHIFTED, |id| 1000 - id);
        assert_eq!(section.len(), 70);
        assert_eq!(section.number_of(62), Some(1));
        assert_eq!(section.number_of(0), Some(63));
        assert_eq!(section.number_of(69), Some(64));
        assert_eq!(section.number_of(63), Some(70));
    }

    #[test]
    fn test_second_group_in_content_order() {
        // 127 busy elements fill the first group; the next 16,256 numbers
        // share the two-byte group, here three quiet strings.
        let mut usage: FxHashMap<u32, u32> = (0..127u32).map(|n| (n, 1000)).collect();
        usage.insert(500, 3);
        usage.insert(501, 3);
        usage.insert(502, 4);
        let key = |id: u32| match id {
            500 => "tram".to_string(),
            501 => "bus".to_string(),
            502 => "metro".to_string(),
            n => format!("busy-{n:03}"),
        };
        let section = SharedSection::build(&usage, 0, ONE_BYTE_GROUP, key);
        assert_eq!(section.number_of(0), Some(1));
        assert_eq!(section.number_of(126), Some(127));
        assert_eq!(section.number_of(501), Some(128));
        assert_eq!(section.number_of(502), Some(129));
        assert_eq!(section.number_of(500), Some(130));
    }
}
