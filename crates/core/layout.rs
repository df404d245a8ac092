//! Byte-offset assignment for tile elements.
//!
//! The layout keeps a single write cursor that only moves forward. An element
//! that would need padding at the cursor is parked in a small deferred queue
//! and placed later, once the cursor happens to reach its alignment; if the
//! queue is full its oldest entry is placed anyway, accepting the padding.
//!
//! Elements are described by a [`Placeable`] store, so the same engine lays
//! out tile models and the plain element lists used in tests.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::hash::Hash;

/// Entries the deferred queue holds before it force-places its oldest one.
pub const DEFERRED_CAPACITY: usize = 32;

/// Required alignment of an element's start offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Alignment {
    Byte = 0,
    Word = 1,
    Dword = 2,
    Qword = 3,
}

impl Alignment {
    pub const fn bytes(self) -> u32 {
        1 << self as u32
    }

    /// The first offset at or after `location` with this alignment.
    pub const fn align(self, location: u32) -> u32 {
        let mask = self.bytes() - 1;
        (location + mask) & !mask
    }

    pub const fn is_aligned(self, location: u32) -> bool {
        location & (self.bytes() - 1) == 0
    }
}

/// Element store driven by a [`Layout`].
pub trait Placeable<K> {
    fn size_of(&self, key: K) -> u32;

    fn alignment_of(&self, key: K) -> Alignment;

    fn set_location(&mut self, key: K, location: u32);

    /// Elements that become reachable once `key` is placed. They are queued
    /// for the body pass.
    fn discover(&mut self, _key: K, _found: &mut Vec<K>) {}
}

/// Where an element ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement<K> {
    pub key: K,
    pub location: u32,
    pub size: u32,
}

#[derive(Debug)]
pub struct Layout<K> {
    cursor: u32,
    padding: u32,
    deferred: VecDeque<(K, Alignment)>,
    bodies: VecDeque<K>,
    placed: Vec<Placement<K>>,
    seen: FxHashSet<K>,
    found: Vec<K>,
}

impl<K: Copy + Eq + Hash> Layout<K> {
    /// Start a layout whose first element goes at `start` (the space before
    /// it is reserved, typically for a header).
    pub fn new(start: u32) -> Self {
        Self {
            cursor: start,
            padding: 0,
            deferred: VecDeque::with_capacity(DEFERRED_CAPACITY),
            bodies: VecDeque::new(),
            placed: Vec::new(),
            seen: FxHashSet::default(),
            found: Vec::new(),
        }
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Total size: the cursor rounded up so the next tile stays aligned.
    pub fn size(&self) -> u32 {
        Alignment::Dword.align(self.cursor)
    }

    /// Bytes lost to alignment so far.
    pub fn padding(&self) -> u32 {
        self.padding
    }

    pub fn placements(&self) -> &[Placement<K>] {
        &self.placed
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Whether `key` has been handed to the layout (placed or deferred).
    pub fn contains(&self, key: K) -> bool {
        self.seen.contains(&key)
    }

    /// Place `key` now if it fits at the cursor without padding, otherwise
    /// defer it. Keys already handed to the layout are ignored.
    pub fn place<S: Placeable<K>>(&mut self, store: &mut S, key: K) {
        if !self.seen.insert(key) {
            return;
        }
        let alignment = store.alignment_of(key);
        if alignment.is_aligned(self.cursor) {
            self.put(store, key, alignment);
        } else {
            if self.deferred.len() == DEFERRED_CAPACITY
                && let Some((oldest, oldest_alignment)) = self.deferred.pop_front()
            {
                self.put(store, oldest, oldest_alignment);
            }
            self.deferred.push_back((key, alignment));
        }
        self.drain_aligned(store);
    }

    /// Queue an element for the body pass.
    pub fn add_body(&mut self, key: K) {
        if !self.seen.contains(&key) {
            self.bodies.push_back(key);
        }
    }

    /// Place all queued bodies, including the ones discovered while placing,
    /// then flush the deferred queue.
    pub fn place_bodies<S: Placeable<K>>(&mut self, store: &mut S) {
        loop {
            while let Some(key) = self.bodies.pop_front() {
                self.place(store, key);
            }
            self.flush(store);
            if self.bodies.is_empty() {
                break;
            }
        }
    }

    /// Place every deferred element in first-in order.
    pub fn flush<S: Placeable<K>>(&mut self, store: &mut S) {
        while let Some((key, alignment)) = self.deferred.pop_front() {
            self.put(store, key, alignment);
        }
    }

    fn put<S: Placeable<K>>(&mut self, store: &mut S, key: K, alignment: Alignment) {
        let location = alignment.align(self.cursor);
        let size = store.size_of(key);
        self.padding += location - self.cursor;
        store.set_location(key, location);
        self.placed.push(Placement {
            key,
            location,
            size,
        });
        self.cursor = location + size;

        store.discover(key, &mut self.found);
        for found in self.found.drain(..) {
            if !self.seen.contains(&found) {
                self.bodies.push_back(found);
            }
        }
    }

    /// Place deferred entries that now sit at an aligned cursor, rescanning
    /// from the front after each placement.
    fn drain_aligned<S: Placeable<K>>(&mut self, store: &mut S) {
        while let Some(index) = self
            .deferred
            .iter()
            .position(|(_, alignment)| alignment.is_aligned(self.cursor))
        {
            if let Some((key, alignment)) = self.deferred.remove(index) {
                self.put(store, key, alignment);
            }
        }
    }
}
