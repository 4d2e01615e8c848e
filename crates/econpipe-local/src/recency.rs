//! Least-recently-touched ordering for the bounded outer maps.

use std::collections::{BTreeMap, HashMap};

/// Monotonic tick per key, indexed both ways so the oldest key is found in O(log n).
#[derive(Debug, Default)]
pub(crate) struct Recency {
    tick: u64,
    by_key: HashMap<String, u64>,
    by_tick: BTreeMap<u64, String>,
}

impl Recency {
    pub(crate) fn touch(&mut self, key: &str) {
        self.tick = self.tick.saturating_add(1);
        if let Some(prev) = self.by_key.insert(key.to_string(), self.tick) {
            self.by_tick.remove(&prev);
        }
        self.by_tick.insert(self.tick, key.to_string());
    }

    /// Remove and return the least recently touched key.
    pub(crate) fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.by_tick.pop_first()?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }
}
