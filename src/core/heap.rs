//! Binary min-heap with a side index from key to slot.
//!
//! Both scheduling levels use it: every plugin agent keeps its tasks in one
//! keyed by task id, and the manager keeps plugin agents in one keyed by
//! plugin name. The side index gives O(log n) removal and priority updates of
//! arbitrary entries.

use std::collections::HashMap;
use std::hash::Hash;

/// Min-heap of `(key, priority)` pairs addressable by key.
#[derive(Debug, Clone)]
pub struct IndexedHeap<K, P> {
    entries: Vec<(K, P)>,
    positions: HashMap<K, usize>,
}

impl<K, P> Default for IndexedHeap<K, P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<K, P> IndexedHeap<K, P>
where
    K: Clone + Eq + Hash,
    P: Ord + Clone,
{
    /// Empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `key` is present.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    /// Slot of `key`, `None` when absent.
    #[must_use]
    pub fn position(&self, key: &K) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Priority of `key`.
    #[must_use]
    pub fn priority(&self, key: &K) -> Option<&P> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    /// Entry with the lowest priority.
    #[must_use]
    pub fn peek(&self) -> Option<(&K, &P)> {
        self.entries.first().map(|(k, p)| (k, p))
    }

    /// Inserts `key`, or moves it to `priority` when already present.
    pub fn push(&mut self, key: K, priority: P) {
        if let Some(i) = self.position(&key) {
            self.entries[i].1 = priority;
            self.fix(i);
            return;
        }
        let i = self.entries.len();
        self.positions.insert(key.clone(), i);
        self.entries.push((key, priority));
        self.sift_up(i);
    }

    /// Removes and returns the lowest entry.
    pub fn pop(&mut self) -> Option<(K, P)> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    /// Removes `key`, returning its priority.
    pub fn remove(&mut self, key: &K) -> Option<P> {
        let i = self.position(key)?;
        Some(self.remove_at(i).1)
    }

    /// Changes the priority of a present key. Returns false when absent.
    pub fn update(&mut self, key: &K, priority: P) -> bool {
        let Some(i) = self.position(key) else {
            return false;
        };
        self.entries[i].1 = priority;
        self.fix(i);
        true
    }

    /// Removes everything, returning the keys in slot order.
    pub fn clear(&mut self) -> Vec<K> {
        self.positions.clear();
        self.entries.drain(..).map(|(k, _)| k).collect()
    }

    /// Keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    fn remove_at(&mut self, i: usize) -> (K, P) {
        let last = self.entries.len() - 1;
        self.swap(i, last);
        let entry = self.entries.pop().unwrap_or_else(|| unreachable!("heap slot {i} vanished"));
        self.positions.remove(&entry.0);
        if i < self.entries.len() {
            self.fix(i);
        }
        entry
    }

    fn fix(&mut self, i: usize) {
        if !self.sift_up(i) {
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) -> bool {
        let start = i;
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries[i].1 >= self.entries[parent].1 {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
        i != start
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.entries.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let child = if right < n && self.entries[right].1 < self.entries[left].1 {
                right
            } else {
                left
            };
            if self.entries[child].1 >= self.entries[i].1 {
                break;
            }
            self.swap(i, child);
            i = child;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].0.clone(), a);
        self.positions.insert(self.entries[b].0.clone(), b);
    }
}
