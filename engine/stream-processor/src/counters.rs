//! Key-capped counter map
//!
//! Every aggregate keyed on producer-controlled strings goes through this
//! map. Once `max_keys` distinct keys are present, never-seen keys are
//! rejected while existing keys stay updatable.

use std::collections::HashMap;

/// Result of an upsert against a bounded map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new key was admitted
    Inserted,
    /// An existing key was updated
    Updated,
    /// The map is full and the key was new; nothing changed
    Rejected,
}

impl Upsert {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Upsert::Rejected)
    }
}

#[derive(Debug, Clone)]
pub struct BoundedCounterMap<V> {
    max_keys: usize,
    entries: HashMap<String, V>,
}

impl<V: Default> BoundedCounterMap<V> {
    pub fn new(max_keys: usize) -> Self {
        Self { max_keys, entries: HashMap::new() }
    }

    /// Apply `update` to the value at `key`, admitting the key only if there is room
    pub fn upsert(&mut self, key: &str, update: impl FnOnce(&mut V)) -> Upsert {
        if let Some(value) = self.entries.get_mut(key) {
            update(value);
            return Upsert::Updated;
        }
        if self.entries.len() >= self.max_keys {
            return Upsert::Rejected;
        }

        let mut value = V::default();
        update(&mut value);
        self.entries.insert(key.to_string(), value);
        Upsert::Inserted
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl BoundedCounterMap<u64> {
    /// Add `by` to a counter
    pub fn increment(&mut self, key: &str, by: u64) -> Upsert {
        self.upsert(key, |count| *count = count.saturating_add(by))
    }
}

impl<V: Clone> BoundedCounterMap<V> {
    /// Point-in-time copy of the entries
    pub fn to_map(&self) -> HashMap<String, V> {
        self.entries.clone()
    }
}
