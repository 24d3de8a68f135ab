//! TTL cache with LRU eviction.
//!
//! Keys are coarse hashes of the input fact tuple, so near-identical
//! inputs within the TTL reuse prior work. Writes hold the lock only
//! briefly; the cache is shared behind `parking_lot::Mutex`.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Bounded TTL + LRU cache.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    access_order: VecDeque<K>,
    ttl: Duration,
    max_size: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_size),
            access_order: VecDeque::with_capacity(max_size),
            ttl,
            max_size,
        }
    }

    /// Fetch a live entry and refresh its LRU position.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => {
                let value = value.clone();
                self.touch(key);
                Some(value)
            }
            Some(_) => {
                self.entries.remove(key);
                self.access_order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.evict_expired();
        while self.entries.len() >= self.max_size {
            match self.access_order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.entries.insert(key.clone(), (value, Instant::now()));
        self.touch(&key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
    }

    fn touch(&mut self, key: &K) {
        self.access_order.retain(|k| k != key);
        self.access_order.push_back(key.clone());
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
        let entries = &self.entries;
        self.access_order.retain(|k| entries.contains_key(k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_cap_evicts_least_recently_used() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" is the LRU entry.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let mut cache = TtlCache::new(Duration::from_millis(0), 10);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty() || cache.len() == 1);
    }

    #[test]
    fn test_clear() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("a", 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
