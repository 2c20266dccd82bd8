//! Bounded LRU cache with pinning and eviction observation.
//!
//! The cache owns its values. Entries live in a slab indexed by a hash
//! map; recency is an intrusive doubly-linked list threaded through the
//! slab by index. Pinned entries are unlinked from the recency list and
//! can never be chosen for eviction; unpinning re-links them at the MRU
//! end. Every evicted value is handed to the eviction observer exactly
//! once before its slot is reclaimed.

use crate::stats::{Counters, Statistics};
use arbor_common::{ArborError, Result};
use std::collections::HashMap;
use std::hash::Hash;
use sysinfo::System;

/// Sentinel slab index meaning "no entry".
const NIL: usize = usize::MAX;

/// Receives each value evicted from the cache.
pub trait EvictionObserver<K, V> {
    /// Called exactly once per evicted entry, before its slot is reclaimed.
    fn evicted(&mut self, key: &K, value: V);
}

/// Observer that discards evicted values.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl<K, V> EvictionObserver<K, V> for NullObserver {
    #[inline]
    fn evicted(&mut self, _key: &K, _value: V) {}
}

struct Entry<K, V> {
    key: K,
    value: V,
    /// Neighbor toward the MRU end, NIL for the MRU entry.
    prev: usize,
    /// Neighbor toward the LRU end, NIL for the LRU entry.
    next: usize,
    pinned: bool,
}

/// Bounded map from `K` to `V` with least-recently-used eviction.
pub struct LruCache<K, V, O = NullObserver, St = Counters> {
    capacity: usize,
    map: HashMap<K, usize>,
    entries: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    mru: usize,
    lru: usize,
    observer: O,
    stats: St,
}

impl<K, V, O, St> LruCache<K, V, O, St>
where
    K: Copy + Eq + Hash,
    O: EvictionObserver<K, V>,
    St: Statistics,
{
    /// Creates a cache from all of its parts.
    pub fn with_parts(capacity: usize, observer: O, stats: St) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            mru: NIL,
            lru: NIL,
            observer,
            stats,
        }
    }

    /// Creates a cache with the given observer and default statistics.
    pub fn with_observer(capacity: usize, observer: O) -> Self
    where
        St: Default,
    {
        Self::with_parts(capacity, observer, St::default())
    }

    /// Creates a cache with default observer and statistics.
    pub fn new(capacity: usize) -> Self
    where
        O: Default,
        St: Default,
    {
        Self::with_parts(capacity, O::default(), St::default())
    }

    /// Creates a cache sized to 25% of available system RAM.
    ///
    /// Queries the system for available memory and divides a quarter of
    /// it by the in-memory entry footprint. Minimum 1,000 entries so the
    /// cache stays useful on low-memory systems.
    pub fn auto_sized() -> Self
    where
        O: Default,
        St: Default,
    {
        Self::with_parts(Self::auto_capacity(), O::default(), St::default())
    }

    fn auto_capacity() -> usize {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let entry_bytes = std::mem::size_of::<Entry<K, V>>().max(1);
        (available_bytes / 4 / entry_bytes).max(1_000)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if the cache is at capacity.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Returns true if the key is cached.
    pub fn contains(&self, key: K) -> bool {
        self.map.contains_key(&key)
    }

    /// Access statistics.
    pub fn stats(&self) -> &St {
        &self.stats
    }

    /// Mutable access statistics, e.g. for `reset`.
    pub fn stats_mut(&mut self) -> &mut St {
        &mut self.stats
    }

    /// The eviction observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable access to the eviction observer.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Looks up `key`, inserting a default-constructed value on miss.
    ///
    /// On a hit the entry is promoted to MRU and `(entry, true)` is
    /// returned. On a miss the LRU unpinned entry is evicted if the
    /// cache is full, a default value is inserted at the MRU end, and
    /// `(entry, false)` is returned for the caller to assign into.
    ///
    /// Fails with `CacheFull` when the cache is full and every entry is
    /// pinned.
    pub fn get(&mut self, key: K) -> Result<(&mut V, bool)>
    where
        V: Default,
    {
        self.stats.record_ref();
        if let Some(&idx) = self.map.get(&key) {
            self.promote(idx);
            return Ok((&mut self.entry_mut(idx).value, true));
        }

        self.stats.record_miss();
        if self.map.len() >= self.capacity {
            self.evict_one()?;
        }

        let idx = self.alloc(key, V::default());
        self.map.insert(key, idx);
        self.push_front(idx);
        Ok((&mut self.entry_mut(idx).value, false))
    }

    /// Looks up `key` without inserting.
    ///
    /// Promotes the entry to MRU on a hit when `touch` is set. Records
    /// refs and misses in the statistics either way.
    pub fn find(&mut self, key: K, touch: bool) -> Option<&mut V> {
        self.stats.record_ref();
        match self.map.get(&key).copied() {
            Some(idx) => {
                if touch {
                    self.promote(idx);
                }
                Some(&mut self.entry_mut(idx).value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Promotes `key` to most-recently-used if present.
    pub fn touch(&mut self, key: K) -> bool {
        match self.map.get(&key).copied() {
            Some(idx) => {
                self.promote(idx);
                true
            }
            None => false,
        }
    }

    /// Pins `key`, excluding it from eviction. Idempotent.
    pub fn lock(&mut self, key: K) -> bool {
        match self.map.get(&key).copied() {
            Some(idx) => {
                if !self.entry(idx).pinned {
                    self.unlink(idx);
                    self.entry_mut(idx).pinned = true;
                }
                true
            }
            None => false,
        }
    }

    /// Unpins `key`, re-linking it at the MRU end. Idempotent.
    pub fn unlock(&mut self, key: K) -> bool {
        match self.map.get(&key).copied() {
            Some(idx) => {
                if self.entry(idx).pinned {
                    self.entry_mut(idx).pinned = false;
                    self.push_front(idx);
                }
                true
            }
            None => false,
        }
    }

    /// Returns true if `key` is present and pinned.
    pub fn is_locked(&self, key: K) -> bool {
        self.map
            .get(&key)
            .is_some_and(|&idx| self.entry(idx).pinned)
    }

    /// Removes `key`, invoking the observer on its value.
    pub fn remove(&mut self, key: K) -> bool {
        match self.map.remove(&key) {
            Some(idx) => {
                if !self.entry(idx).pinned {
                    self.unlink(idx);
                }
                self.release(idx);
                true
            }
            None => false,
        }
    }

    /// Removes every entry, invoking the observer on each value.
    pub fn clear(&mut self) {
        let map = std::mem::take(&mut self.map);
        self.mru = NIL;
        self.lru = NIL;
        for (_, idx) in map {
            if let Some(entry) = self.entries[idx].take() {
                self.observer.evicted(&entry.key, entry.value);
            }
        }
        self.entries.clear();
        self.free.clear();
    }

    /// Drops every entry without invoking the observer.
    pub fn reset(&mut self) {
        self.map.clear();
        self.entries.clear();
        self.free.clear();
        self.mru = NIL;
        self.lru = NIL;
    }

    /// Iterates entries in map order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let entries = &self.entries;
        self.map
            .iter()
            .filter_map(move |(key, &idx)| entries[idx].as_ref().map(|e| (key, &e.value)))
    }

    /// Iterates unpinned entries in recency order, most recent first.
    pub fn iter_mru(&self) -> MruIter<'_, K, V> {
        MruIter {
            entries: &self.entries,
            next: self.mru,
        }
    }

    fn entry(&self, idx: usize) -> &Entry<K, V> {
        self.entries[idx].as_ref().expect("cache slab hole")
    }

    fn entry_mut(&mut self, idx: usize) -> &mut Entry<K, V> {
        self.entries[idx].as_mut().expect("cache slab hole")
    }

    fn alloc(&mut self, key: K, value: V) -> usize {
        let entry = Entry {
            key,
            value,
            prev: NIL,
            next: NIL,
            pinned: false,
        };
        match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(entry);
                idx
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    /// Detaches `idx` from the recency list.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = self.entry(idx);
            (entry.prev, entry.next)
        };
        if prev == NIL {
            self.mru = next;
        } else {
            self.entry_mut(prev).next = next;
        }
        if next == NIL {
            self.lru = prev;
        } else {
            self.entry_mut(next).prev = prev;
        }
        let entry = self.entry_mut(idx);
        entry.prev = NIL;
        entry.next = NIL;
    }

    /// Links `idx` at the MRU end of the recency list.
    fn push_front(&mut self, idx: usize) {
        let old_mru = self.mru;
        {
            let entry = self.entry_mut(idx);
            entry.prev = NIL;
            entry.next = old_mru;
        }
        if old_mru != NIL {
            self.entry_mut(old_mru).prev = idx;
        }
        self.mru = idx;
        if self.lru == NIL {
            self.lru = idx;
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.entry(idx).pinned || self.mru == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    /// Evicts the least-recently-used unpinned entry.
    fn evict_one(&mut self) -> Result<()> {
        let victim = self.lru;
        if victim == NIL {
            return Err(ArborError::CacheFull);
        }
        self.unlink(victim);
        let key = self.entry(victim).key;
        self.map.remove(&key);
        self.release(victim);
        Ok(())
    }

    /// Frees the slot at `idx`, handing its value to the observer.
    fn release(&mut self, idx: usize) {
        if let Some(entry) = self.entries[idx].take() {
            self.free.push(idx);
            self.observer.evicted(&entry.key, entry.value);
        }
    }
}

/// Iterator over the recency list, most recent first.
pub struct MruIter<'a, K, V> {
    entries: &'a [Option<Entry<K, V>>],
    next: usize,
}

impl<'a, K, V> Iterator for MruIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let entry = self.entries[self.next].as_ref()?;
        self.next = entry.next;
        Some((&entry.key, &entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Cache = LruCache<u64, u64>;

    /// Observer that records every eviction it sees.
    #[derive(Default, Clone)]
    struct Recorder {
        events: Rc<RefCell<Vec<(u64, u64)>>>,
    }

    impl EvictionObserver<u64, u64> for Recorder {
        fn evicted(&mut self, key: &u64, value: u64) {
            self.events.borrow_mut().push((*key, value));
        }
    }

    #[test]
    fn test_cache_new() {
        let cache = Cache::new(8);
        assert_eq!(cache.capacity(), 8);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert!(!cache.is_full());
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_cache_zero_capacity_panics() {
        let _ = Cache::new(0);
    }

    #[test]
    fn test_cache_get_miss_then_hit() {
        let mut cache = Cache::new(4);

        let (slot, existed) = cache.get(1).unwrap();
        assert!(!existed);
        *slot = 100;

        let (slot, existed) = cache.get(1).unwrap();
        assert!(existed);
        assert_eq!(*slot, 100);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_evicts_lru() {
        let mut cache = Cache::new(2);

        *cache.get(1).unwrap().0 = 10;
        *cache.get(2).unwrap().0 = 20;
        *cache.get(3).unwrap().0 = 30;

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn test_cache_touch_changes_victim() {
        let mut cache = Cache::new(2);

        *cache.get(1).unwrap().0 = 10;
        *cache.get(2).unwrap().0 = 20;
        assert!(cache.touch(1));

        *cache.get(3).unwrap().0 = 30;
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_cache_find_without_touch_keeps_order() {
        let mut cache = Cache::new(2);

        *cache.get(1).unwrap().0 = 10;
        *cache.get(2).unwrap().0 = 20;

        // Peek at 1 without promoting it; it stays the LRU victim.
        assert_eq!(cache.find(1, false).copied(), Some(10));
        *cache.get(3).unwrap().0 = 30;

        assert!(!cache.contains(1));
        assert!(cache.contains(2));
    }

    #[test]
    fn test_cache_find_with_touch_promotes() {
        let mut cache = Cache::new(2);

        *cache.get(1).unwrap().0 = 10;
        *cache.get(2).unwrap().0 = 20;

        assert_eq!(cache.find(1, true).copied(), Some(10));
        *cache.get(3).unwrap().0 = 30;

        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_cache_observer_fires_once_with_payload() {
        // Capacity 2: inserting A, B, C fires the observer exactly once,
        // with A's payload, on the insert of C.
        let recorder = Recorder::default();
        let events = Rc::clone(&recorder.events);
        let mut cache: LruCache<u64, u64, Recorder> = LruCache::with_observer(2, recorder);

        *cache.get(0xA).unwrap().0 = 1;
        *cache.get(0xB).unwrap().0 = 2;
        assert!(events.borrow().is_empty());

        *cache.get(0xC).unwrap().0 = 3;
        assert_eq!(events.borrow().as_slice(), &[(0xA, 1)]);
    }

    #[test]
    fn test_cache_lock_excludes_from_eviction() {
        let mut cache = Cache::new(2);

        *cache.get(1).unwrap().0 = 10;
        *cache.get(2).unwrap().0 = 20;
        assert!(cache.lock(1));
        assert!(cache.is_locked(1));

        *cache.get(3).unwrap().0 = 30;
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_cache_full_when_everything_pinned() {
        let mut cache = Cache::new(2);

        cache.get(1).unwrap();
        cache.get(2).unwrap();
        cache.lock(1);
        cache.lock(2);

        let err = cache.get(3).unwrap_err();
        assert!(matches!(err, ArborError::CacheFull));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_unlock_relinks_at_mru() {
        let mut cache = Cache::new(2);

        *cache.get(1).unwrap().0 = 10;
        *cache.get(2).unwrap().0 = 20;
        cache.lock(1);
        assert!(cache.unlock(1));
        assert!(!cache.is_locked(1));

        // 1 was re-linked most-recent, so 2 is the victim.
        *cache.get(3).unwrap().0 = 30;
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_cache_lock_unlock_idempotent() {
        let mut cache = Cache::new(2);
        cache.get(1).unwrap();

        assert!(cache.lock(1));
        assert!(cache.lock(1));
        assert!(cache.unlock(1));
        assert!(cache.unlock(1));
        assert!(!cache.lock(99));
        assert!(!cache.unlock(99));
    }

    #[test]
    fn test_cache_remove_invokes_observer() {
        let recorder = Recorder::default();
        let events = Rc::clone(&recorder.events);
        let mut cache: LruCache<u64, u64, Recorder> = LruCache::with_observer(4, recorder);

        *cache.get(1).unwrap().0 = 10;
        assert!(cache.remove(1));
        assert!(!cache.remove(1));

        assert_eq!(events.borrow().as_slice(), &[(1, 10)]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_remove_pinned() {
        let mut cache = Cache::new(4);
        cache.get(1).unwrap();
        cache.lock(1);

        assert!(cache.remove(1));
        assert!(!cache.contains(1));

        // The slot is reusable afterwards.
        cache.get(2).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_clear_invokes_observer_per_entry() {
        let recorder = Recorder::default();
        let events = Rc::clone(&recorder.events);
        let mut cache: LruCache<u64, u64, Recorder> = LruCache::with_observer(4, recorder);

        for k in 0..3 {
            *cache.get(k).unwrap().0 = k * 10;
        }
        cache.clear();

        let mut seen = events.borrow().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![(0, 0), (1, 10), (2, 20)]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_reset_is_silent() {
        let recorder = Recorder::default();
        let events = Rc::clone(&recorder.events);
        let mut cache: LruCache<u64, u64, Recorder> = LruCache::with_observer(4, recorder);

        cache.get(1).unwrap();
        cache.lock(1);
        cache.get(2).unwrap();
        cache.reset();

        assert!(events.borrow().is_empty());
        assert!(cache.is_empty());

        // Reusable after reset.
        cache.get(3).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_len_never_exceeds_capacity() {
        let mut cache = Cache::new(3);
        for k in 0..50 {
            cache.get(k).unwrap();
            assert!(cache.len() <= cache.capacity());
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_cache_mru_iteration_order() {
        let mut cache = Cache::new(4);
        for k in 1..=3 {
            *cache.get(k).unwrap().0 = k;
        }
        cache.touch(1);

        let order: Vec<u64> = cache.iter_mru().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![1, 3, 2]);
    }

    #[test]
    fn test_cache_mru_iteration_skips_pinned() {
        let mut cache = Cache::new(4);
        for k in 1..=3 {
            cache.get(k).unwrap();
        }
        cache.lock(2);

        let order: Vec<u64> = cache.iter_mru().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![3, 1]);
    }

    #[test]
    fn test_cache_iter_visits_everything() {
        let mut cache = Cache::new(4);
        for k in 0..4 {
            *cache.get(k).unwrap().0 = k + 100;
        }
        cache.lock(0);

        let mut seen: Vec<(u64, u64)> = cache.iter().map(|(k, v)| (*k, *v)).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![(0, 100), (1, 101), (2, 102), (3, 103)]);
    }

    #[test]
    fn test_cache_statistics() {
        let mut cache = Cache::new(2);

        cache.get(1).unwrap(); // ref + miss
        cache.get(1).unwrap(); // ref
        cache.find(2, true); // ref + miss
        cache.find(1, false); // ref

        assert_eq!(cache.stats().refs(), 4);
        assert_eq!(cache.stats().misses(), 2);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);

        cache.stats_mut().reset();
        assert_eq!(cache.stats().refs(), 0);
    }

    #[test]
    fn test_cache_auto_sized_floor() {
        let cache: Cache = Cache::auto_sized();
        assert!(cache.capacity() >= 1_000);
    }

    #[test]
    fn test_cache_recency_list_consistency() {
        // Entries reachable from the MRU head must equal the unpinned
        // population, forward and backward.
        let mut cache = Cache::new(8);
        for k in 0..8 {
            cache.get(k).unwrap();
        }
        cache.lock(3);
        cache.lock(5);
        cache.touch(0);
        cache.remove(7);

        let forward: Vec<u64> = cache.iter_mru().map(|(k, _)| *k).collect();
        assert_eq!(forward.len(), cache.len() - 2);
        assert!(!forward.contains(&3));
        assert!(!forward.contains(&5));
        assert_eq!(forward.first(), Some(&0));
    }
}
