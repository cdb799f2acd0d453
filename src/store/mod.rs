//! Persistent-store contract and the in-memory reference implementation.
//!
//! Sessions only ever talk to their backing store through [`BackingStore`]:
//! point reads, batch read/write/erase, cross-store copy, and ordered key
//! navigation. Anything that can answer those (an on-disk engine, a remote
//! KV, a `BTreeMap`) can sit at the bottom of a session chain.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use crate::entry::{Entry, Key, Value};

/// An ordered key-value store a session chain can commit into and iterate
/// over.
///
/// Navigation methods return keys, not cursors: the merged session iterator
/// re-seeks as it skips shadowed keys, so a stateless "next key after"
/// surface is all it needs.
pub trait BackingStore {
    fn read(&self, key: &[u8]) -> Option<Entry>;

    fn contains(&self, key: &[u8]) -> bool {
        self.read(key).is_some()
    }

    fn write(&mut self, entry: Entry);

    fn erase(&mut self, key: &[u8]);

    /// Reads every key, returning the entries found and the set of keys the
    /// store does not hold.
    fn read_batch(&self, keys: &[Key]) -> (Vec<Entry>, HashSet<Key>) {
        let mut found = Vec::new();
        let mut missing = HashSet::new();
        for key in keys {
            match self.read(key) {
                Some(entry) => found.push(entry),
                None => {
                    missing.insert(key.clone());
                }
            }
        }
        (found, missing)
    }

    fn write_batch(&mut self, entries: Vec<Entry>) {
        for entry in entries {
            self.write(entry);
        }
    }

    fn erase_batch(&mut self, keys: &[Key]) {
        for key in keys {
            self.erase(key);
        }
    }

    /// Copies the given keys' entries into another store. Keys this store
    /// does not hold are skipped.
    fn write_to<T: BackingStore>(&self, other: &mut T, keys: &[Key]) {
        for key in keys {
            if let Some(entry) = self.read(key) {
                other.write(entry);
            }
        }
    }

    /// Smallest key in the store.
    fn first_key(&self) -> Option<Key>;

    /// Largest key in the store.
    fn last_key(&self) -> Option<Key>;

    /// Smallest key `>= key`.
    fn lower_bound(&self, key: &[u8]) -> Option<Key>;

    /// Smallest key `> key`.
    fn upper_bound(&self, key: &[u8]) -> Option<Key>;

    /// Largest key `< key`.
    fn prev_key(&self, key: &[u8]) -> Option<Key>;
}

/// A `BTreeMap`-backed store.
///
/// Not a durable store; it is the reference backend for tests and for
/// chains that only need transactional layering over an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: BTreeMap<Key, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FromIterator<Entry> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = Entry>>(entries: I) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.write(entry);
        }
        store
    }
}

impl BackingStore for MemoryStore {
    fn read(&self, key: &[u8]) -> Option<Entry> {
        self.map
            .get_key_value(key)
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    fn write(&mut self, entry: Entry) {
        self.map.insert(entry.key, entry.value);
    }

    fn erase(&mut self, key: &[u8]) {
        self.map.remove(key);
    }

    fn first_key(&self) -> Option<Key> {
        self.map.keys().next().cloned()
    }

    fn last_key(&self) -> Option<Key> {
        self.map.keys().next_back().cloned()
    }

    fn lower_bound(&self, key: &[u8]) -> Option<Key> {
        self.map
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    fn upper_bound(&self, key: &[u8]) -> Option<Key> {
        self.map
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    fn prev_key(&self, key: &[u8]) -> Option<Key> {
        self.map
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(k, _)| k.clone())
    }
}
