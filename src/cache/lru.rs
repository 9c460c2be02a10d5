//! Bounded LRU with per-entry TTL.
//!
//! Recency is tracked with an intrusive doubly-linked list threaded through
//! a slot arena, indexed by a hash map, so insert, hit and eviction are all
//! O(1). Entries expire `ttl` after insertion regardless of use; a hit on
//! an expired entry removes it and reports a miss.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<V> {
    key: String,
    value: V,
    inserted: Instant,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct TtlLru<V> {
    capacity: usize,
    ttl: Duration,
    map: HashMap<String, usize>,
    slots: Vec<Slot<V>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<V> TtlLru<V> {
    pub fn new(capacity: usize, ttl: Duration) -> TtlLru<V> {
        TtlLru {
            capacity: capacity.max(1),
            ttl,
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the live value for `key`, refreshing its recency. Expired
    /// entries are dropped and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.map.get(key)?;
        if self.slots[idx].inserted.elapsed() > self.ttl {
            self.remove(key);
            return None;
        }
        self.detach(idx);
        self.push_front(idx);
        Some(&self.slots[idx].value)
    }

    /// Inserts or refreshes `key`. A refresh restarts the TTL clock. When
    /// the cache is full the least-recently-used entry is evicted.
    pub fn insert(&mut self, key: &str, value: V) {
        if let Some(&idx) = self.map.get(key) {
            self.slots[idx].value = value;
            self.slots[idx].inserted = Instant::now();
            self.detach(idx);
            self.push_front(idx);
            return;
        }
        if self.map.len() >= self.capacity {
            self.evict_tail();
        }
        let slot = Slot {
            key: key.to_string(),
            value,
            inserted: Instant::now(),
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.map.insert(key.to_string(), idx);
        self.push_front(idx);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.map.remove(key) {
            Some(idx) => {
                self.detach(idx);
                self.free.push(idx);
                true
            }
            None => false,
        }
    }

    /// Removes every entry whose key is `prefix` itself or lies under
    /// `prefix/`. Linear in the number of cached entries; invalidation is
    /// rare compared to hits.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let dir_prefix = format!("{}/", prefix.trim_end_matches('/'));
        let doomed: Vec<String> = self
            .map
            .keys()
            .filter(|k| k.as_str() == prefix || k.starts_with(&dir_prefix))
            .cloned()
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Applies new limits, evicting down to the new capacity if needed.
    pub fn set_limits(&mut self, capacity: usize, ttl: Duration) {
        self.capacity = capacity.max(1);
        self.ttl = ttl;
        while self.map.len() > self.capacity {
            self.evict_tail();
        }
    }

    fn evict_tail(&mut self) {
        if self.tail != NIL {
            let key = self.slots[self.tail].key.clone();
            self.remove(&key);
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> TtlLru<u32> {
        TtlLru::new(capacity, Duration::from_secs(60))
    }

    #[test]
    fn hit_and_miss() {
        let mut c = cache(4);
        c.insert("/a", 1);
        assert_eq!(c.get("/a"), Some(&1));
        assert_eq!(c.get("/b"), None);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let mut c = cache(2);
        c.insert("/a", 1);
        c.insert("/b", 2);
        assert_eq!(c.get("/a"), Some(&1));
        c.insert("/c", 3);
        assert_eq!(c.get("/b"), None);
        assert_eq!(c.get("/a"), Some(&1));
        assert_eq!(c.get("/c"), Some(&3));
    }

    #[test]
    fn refresh_moves_entry_to_front() {
        let mut c = cache(2);
        c.insert("/a", 1);
        c.insert("/b", 2);
        c.insert("/a", 10);
        c.insert("/c", 3);
        assert_eq!(c.get("/b"), None);
        assert_eq!(c.get("/a"), Some(&10));
    }

    #[test]
    fn entries_expire() {
        let mut c = TtlLru::new(4, Duration::from_millis(10));
        c.insert("/a", 1);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(c.get("/a"), None);
        assert!(c.is_empty());
    }

    #[test]
    fn prefix_removal_spares_siblings() {
        let mut c = cache(8);
        c.insert("/dir", 0);
        c.insert("/dir/a", 1);
        c.insert("/dir/b/c", 2);
        c.insert("/dirty", 3);
        assert_eq!(c.remove_prefix("/dir"), 3);
        assert_eq!(c.get("/dirty"), Some(&3));
        assert_eq!(c.get("/dir/a"), None);
    }

    #[test]
    fn shrinking_capacity_evicts() {
        let mut c = cache(4);
        for (i, key) in ["/a", "/b", "/c", "/d"].iter().enumerate() {
            c.insert(key, i as u32);
        }
        c.set_limits(2, Duration::from_secs(60));
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("/d"), Some(&3));
        assert_eq!(c.get("/a"), None);
    }

    #[test]
    fn slot_reuse_after_removal() {
        let mut c = cache(4);
        c.insert("/a", 1);
        c.insert("/b", 2);
        assert!(c.remove("/a"));
        c.insert("/c", 3);
        assert_eq!(c.get("/b"), Some(&2));
        assert_eq!(c.get("/c"), Some(&3));
        assert_eq!(c.len(), 2);
    }
}
