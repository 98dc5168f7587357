//! Bounded in-memory artwork tier with strict LRU eviction.
//!
//! Entries live in an arena (`Vec` of slots) threaded by a doubly linked list of
//! indices. `head` is the most recently used entry, `tail` the eviction candidate.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use lp_core::ArtCacheEntry;

struct Node {
    entry: ArtCacheEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct MemoryTier {
    capacity: usize,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key`, promoting it to most recently used. Expired entries are
    /// dropped and reported as misses.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Option<ArtCacheEntry> {
        let idx = *self.index.get(key)?;
        let expired = self.node(idx)?.entry.is_expired(now, ttl);
        if expired {
            self.remove(key);
            return None;
        }
        self.unlink(idx);
        self.push_front(idx);
        self.node(idx).map(|node| node.entry.clone())
    }

    /// Insert or replace an entry. Returns the evicted entry when the tier was full.
    pub fn insert(&mut self, entry: ArtCacheEntry) -> Option<ArtCacheEntry> {
        if let Some(&idx) = self.index.get(&entry.key) {
            if let Some(node) = self.node_mut(idx) {
                node.entry = entry;
            }
            self.unlink(idx);
            self.push_front(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let key = entry.key.clone();
        let node = Node {
            entry,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<ArtCacheEntry> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|node| node.entry)
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = self.node(idx) else { break };
            keys.push(node.entry.key.clone());
            cursor = node.next;
        }
        keys
    }

    fn pop_lru(&mut self) -> Option<ArtCacheEntry> {
        let tail = self.tail?;
        let key = self.node(tail)?.entry.key.clone();
        self.remove(&key)
    }

    fn node(&self, idx: usize) -> Option<&Node> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.node(idx) {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.node_mut(h) {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, now: DateTime<Utc>) -> ArtCacheEntry {
        ArtCacheEntry::new(key, format!("https://img/{key}.jpg"), now)
    }

    #[test]
    fn test_insert_beyond_capacity_evicts_least_recently_used() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(500);
        for i in 0..501 {
            tier.insert(entry(&format!("artist{i}::album"), now));
        }

        assert_eq!(tier.len(), 500);
        assert!(!tier.contains("artist0::album"));
        assert!(tier.contains("artist1::album"));
        assert!(tier.contains("artist500::album"));
    }

    #[test]
    fn test_get_promotes_entry() {
        let now = Utc::now();
        let ttl = Duration::days(30);
        let mut tier = MemoryTier::new(2);
        tier.insert(entry("a", now));
        tier.insert(entry("b", now));

        assert!(tier.get("a", now, ttl).is_some());
        let evicted = tier.insert(entry("c", now));

        assert_eq!(evicted.map(|e| e.key), Some("b".to_string()));
        assert_eq!(tier.keys_by_recency(), vec!["c", "a"]);
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_removed() {
        let resolved = Utc::now();
        let ttl = Duration::days(30);
        let mut tier = MemoryTier::new(4);
        tier.insert(entry("a", resolved));

        assert!(tier.get("a", resolved + Duration::days(31), ttl).is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_replace_keeps_size_and_reuses_slots() {
        let now = Utc::now();
        let mut tier = MemoryTier::new(2);
        tier.insert(entry("a", now));
        tier.insert(ArtCacheEntry::new("a", "https://img/new.jpg", now));
        assert_eq!(tier.len(), 1);

        tier.remove("a");
        tier.insert(entry("b", now));
        tier.insert(entry("c", now));
        tier.insert(entry("d", now));
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.keys_by_recency(), vec!["d", "c"]);
    }
}
