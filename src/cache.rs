//! Bounded event cache.
//!
//! Eviction is least-recently-*inserted*, not least-recently-accessed:
//! spec.md §4.6/§9 picks insertion order because it matches observed
//! browsing behavior and is cheaper than touch-on-read LRU bookkeeping.
//! On a view-mode switch the cache is rewritten in place, never purged.

use std::collections::{HashMap, VecDeque};

use crate::channel::ViewMode;
use crate::event::Event;
use crate::flags::EVENT_CACHE_CAPACITY;

/// Insertion-ordered, capacity-bounded cache of [`Event`]s keyed by
/// `event_num`.
pub struct EventCache {
    capacity: usize,
    order: VecDeque<u32>,
    events: HashMap<u32, Event>,
}

impl EventCache {
    /// New cache with [`EVENT_CACHE_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CACHE_CAPACITY)
    }

    /// New cache with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            events: HashMap::with_capacity(capacity),
        }
    }

    /// Look up a cached event without affecting eviction order (eviction
    /// is by insertion order, not access order).
    #[must_use]
    pub fn get(&self, event_num: u32) -> Option<&Event> {
        self.events.get(&event_num)
    }

    /// Mutable lookup, e.g. for the view-mode rewrite-in-place pass.
    pub fn get_mut(&mut self, event_num: u32) -> Option<&mut Event> {
        self.events.get_mut(&event_num)
    }

    /// Insert a freshly reassembled event, evicting the oldest-inserted
    /// entry if the cache is at capacity.
    pub fn insert(&mut self, event: Event) {
        let event_num = event.event_num;
        if !self.events.contains_key(&event_num) {
            self.order.push_back(event_num);
        }
        self.events.insert(event_num, event);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.events.remove(&oldest);
            }
        }
    }

    /// Number of cached events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// `true` iff nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Rewrite every cached event's channel masks and cached views for a
    /// new global view mode, in place — the cache is never purged on a
    /// view switch, per spec.md §4.5/§4.6.
    pub fn retarget_view(&mut self, to: ViewMode) {
        for event in self.events.values_mut() {
            for (_, chan) in event.channels_mut() {
                chan.retarget_masks(to);
                let _ = chan.cached_view(to);
            }
        }
    }
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u32) -> Event {
        Event::new([0; 6], n, 0, 0)
    }

    #[test]
    fn evicts_oldest_insertion_not_oldest_access() {
        let mut cache = EventCache::with_capacity(2);
        cache.insert(event(1));
        cache.insert(event(2));
        // Touch event 1 repeatedly; insertion-order eviction must still
        // evict it once a 3rd event arrives.
        let _ = cache.get(1);
        let _ = cache.get(1);
        cache.insert(event(3));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn reinserting_existing_key_does_not_grow_order() {
        let mut cache = EventCache::with_capacity(2);
        cache.insert(event(1));
        cache.insert(event(1));
        cache.insert(event(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_some());
    }
}
