//! Bounded sliding-window event counter
//!
//! Each key owns a ring of at most `capacity` timestamps (Unix millis).
//! Once full, the oldest timestamp is dropped on every new record, so a
//! flooding key costs a fixed amount of memory. Counting "events within
//! the last W" only needs the tail of the ring, which is always retained.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Per-key bounded timestamp log
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter<K> {
    entries: HashMap<K, VecDeque<u64>>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone> SlidingWindowCounter<K> {
    /// Create a counter retaining at most `capacity` timestamps per key
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record one event for `key` at `timestamp`
    ///
    /// Timestamps within a key never go backwards: an out-of-order
    /// timestamp is clamped to the newest one already recorded.
    pub fn record(&mut self, key: &K, timestamp: u64) {
        let ring = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));

        let ts = ring.back().map_or(timestamp, |last| timestamp.max(*last));
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(ts);
    }

    /// Number of recorded timestamps for `key` that are `>= cutoff`
    pub fn count_since(&self, key: &K, cutoff: u64) -> usize {
        self.entries.get(key).map_or(0, |ring| {
            // Non-decreasing, so count from the back until we pass the cutoff
            ring.iter().rev().take_while(|ts| **ts >= cutoff).count()
        })
    }

    /// Most recent timestamp recorded for `key`
    pub fn last_seen(&self, key: &K) -> Option<u64> {
        self.entries.get(key).and_then(|ring| ring.back().copied())
    }

    /// Drop every key whose newest entry is older than `cutoff`
    ///
    /// Returns the number of keys removed.
    pub fn evict_older_than(&mut self, cutoff: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, ring| ring.back().is_some_and(|last| *last >= cutoff));
        before - self.entries.len()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` has any recorded events
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Per-key capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Earliest timestamp still inside a window of `window_ms` ending at `now`
///
/// An event exactly `window_ms` old has left the window.
pub fn window_start(now: u64, window_ms: u64) -> u64 {
    now.saturating_add(1).saturating_sub(window_ms)
}
