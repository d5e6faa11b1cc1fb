//! Insertion-ordered collections deduplicated by an explicit key.

use std::collections::HashSet;
use std::hash::Hash;

/// A `Vec` that silently ignores items whose key was already seen.
///
/// First-seen order is preserved.
#[derive(Debug, Clone)]
pub struct OrderedSet<T, K> {
    items: Vec<T>,
    seen: HashSet<K>,
    key: fn(&T) -> K,
}

impl<T, K: Eq + Hash> OrderedSet<T, K> {
    pub fn new(key: fn(&T) -> K) -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            key,
        }
    }

    /// Insert `item` unless its key is already present. Returns whether it
    /// was inserted.
    pub fn insert(&mut self, item: T) -> bool {
        if self.seen.insert((self.key)(&item)) {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T, K: Eq + Hash> Extend<T> for OrderedSet<T, K> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.insert(item);
        }
    }
}

/// Ordered set of strings keyed by the string itself.
pub type StringSet = OrderedSet<String, String>;

impl StringSet {
    pub fn strings() -> Self {
        OrderedSet::new(String::clone)
    }
}
