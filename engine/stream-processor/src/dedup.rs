//! Bounded FIFO deduplication window
//!
//! Remembers the most recent `capacity` event identifiers. When the window
//! overflows, the identifier inserted first is evicted; eviction order is
//! strictly insertion order so a recently seen id is never forgotten before
//! an older one.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct Deduplicator {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl Deduplicator {
    /// Create an empty window holding at most `capacity` ids
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            members: HashSet::with_capacity(capacity.min(4096)),
        }
    }

    /// Has this id already been recorded?
    pub fn seen(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Record an id, evicting the oldest entry once over capacity.
    ///
    /// Returns the evicted id, if any. Recording an id that is already in the
    /// window is a no-op and does not refresh its position.
    pub fn record(&mut self, id: &str) -> Option<String> {
        if !self.members.insert(id.to_string()) {
            return None;
        }
        self.order.push_back(id.to_string());

        if self.order.len() > self.capacity {
            let evicted = self.order.pop_front()?;
            self.members.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    /// Check and record in one step; returns `true` when the id is a duplicate
    pub fn check_and_record(&mut self, id: &str) -> bool {
        if self.seen(id) {
            return true;
        }
        self.record(id);
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}
