//! Seen-request cache for broadcast deduplication.
//!
//! Broadcast frames such as `KEY_CHANGED` carry a random tag that makes
//! their text unique per broadcast; deduplicating on the literal frame
//! text therefore terminates the flood. The cache is a bounded
//! insert-if-absent set with FIFO eviction.

use std::collections::{HashSet, VecDeque};

/// Bounded set of recently observed broadcast frame bodies.
pub struct SeenRequests {
    capacity: usize,
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenRequests {
    /// Create a cache retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
        }
    }

    /// Insert `request` if absent. Returns true when it was already
    /// present.
    pub fn check_and_insert(&mut self, request: &str) -> bool {
        if self.set.contains(request) {
            return true;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        self.order.push_back(request.to_string());
        self.set.insert(request.to_string());
        false
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup() {
        let mut seen = SeenRequests::new(8);
        assert!(!seen.check_and_insert("14 1a2b alice"));
        assert!(seen.check_and_insert("14 1a2b alice"));
        assert!(seen.check_and_insert("14 1a2b alice"));
        // A different random tag is a different request
        assert!(!seen.check_and_insert("14 9f alice"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut seen = SeenRequests::new(2);
        seen.check_and_insert("one");
        seen.check_and_insert("two");
        seen.check_and_insert("three");
        assert_eq!(seen.len(), 2);
        // "one" was evicted and is accepted again
        assert!(!seen.check_and_insert("one"));
        // "three" is still present
        assert!(seen.check_and_insert("three"));
    }
}
