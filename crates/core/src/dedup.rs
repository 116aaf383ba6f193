//! Bounded FIFO membership filter over inbound event ids.

use crate::event::EventId;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 100;

/// Remembers the most recently seen event ids, evicting oldest-first.
///
/// This is a membership filter, not an LRU cache: eviction follows insertion
/// order regardless of lookups, which keeps memory bounded over a
/// monotonically growing identifier stream. Check-and-record is a single
/// critical section so two near-simultaneous deliveries of the same id
/// cannot both pass the filter.
pub struct DedupCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    order: VecDeque<EventId>,
    seen: HashSet<EventId>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Atomically checks membership and records the id.
    ///
    /// Returns `true` when the id was fresh (and is now remembered),
    /// `false` when it was already present.
    pub fn check_and_record(&self, id: &EventId) -> bool {
        let mut inner = self.lock();
        if inner.seen.contains(id) {
            return false;
        }
        if inner.order.len() == self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        inner.order.push_back(id.clone());
        inner.seen.insert(id.clone());
        true
    }

    pub fn seen(&self, id: &EventId) -> bool {
        self.lock().seen.contains(id)
    }

    /// Idempotent; recording a remembered id changes nothing.
    pub fn record(&self, id: &EventId) {
        let _ = self.check_and_record(id);
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> EventId {
        EventId::new(format!("event-{n}"))
    }

    #[test]
    fn fresh_id_is_recorded_once() {
        let cache = DedupCache::new(10);
        assert!(cache.check_and_record(&id(1)));
        assert!(!cache.check_and_record(&id(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn record_is_idempotent() {
        let cache = DedupCache::new(10);
        cache.record(&id(1));
        cache.record(&id(1));
        cache.record(&id(1));
        assert_eq!(cache.len(), 1);
        assert!(cache.seen(&id(1)));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = DedupCache::new(5);
        for n in 0..50 {
            cache.record(&id(n));
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn eviction_is_fifo_by_insertion_order() {
        let cache = DedupCache::new(3);
        for n in 0..3 {
            cache.record(&id(n));
        }
        // Re-checking the oldest id must not refresh its position.
        assert!(cache.seen(&id(0)));
        cache.record(&id(3));

        // The first-inserted id was evicted; a redelivery of it now passes
        // the filter again.
        assert!(!cache.seen(&id(0)));
        assert!(cache.check_and_record(&id(0)));
        assert!(cache.seen(&id(2)));
        assert!(cache.seen(&id(3)));
    }

    #[test]
    fn capacity_one_still_filters() {
        let cache = DedupCache::new(1);
        assert!(cache.check_and_record(&id(1)));
        assert!(!cache.check_and_record(&id(1)));
        assert!(cache.check_and_record(&id(2)));
        assert!(cache.check_and_record(&id(1)));
    }
}
