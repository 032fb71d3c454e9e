//! Bounded response cache
//!
//! Memoizes generated responses keyed by a prompt digest. Eviction is
//! insertion-order FIFO so behavior stays reproducible under test.

use std::collections::{HashMap, VecDeque};

/// Insertion-order FIFO cache with a fixed capacity
#[derive(Debug)]
pub struct ResponseCache {
    capacity: usize,
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(key)
    }

    /// Insert a response, evicting the oldest entry once at capacity.
    /// Re-inserting an existing key replaces the value without changing
    /// its position in the eviction order.
    pub fn insert(&mut self, key: String, value: String) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, value);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = ResponseCache::new(10);
        cache.insert("a".into(), "alpha".into());
        assert_eq!(cache.get("a").map(String::as_str), Some("alpha"));
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_fifo_eviction() {
        let mut cache = ResponseCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        cache.insert("c".into(), "3".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none(), "oldest entry must be evicted");
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let mut cache = ResponseCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        cache.insert("a".into(), "updated".into());
        cache.insert("c".into(), "3".into());

        // "a" kept its original slot, so it is still the first to go.
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut cache = ResponseCache::new(0);
        cache.insert("a".into(), "1".into());
        assert_eq!(cache.len(), 1);
    }
}
