//! Per-layer entry cache contract and the hash-map reference implementation.
//!
//! Each session layer owns one cache holding the entries it has written plus
//! entries pulled down from ancestors or the store by reads. The cache is
//! unordered; key order for iteration comes from the session's merged view,
//! not from here.

use std::collections::HashMap;

use crate::entry::{Entry, Key};
use crate::store::BackingStore;

/// Unordered in-memory store of entries, exclusively owned by one layer.
pub trait EntryCache {
    fn read(&self, key: &[u8]) -> Option<Entry>;

    fn contains(&self, key: &[u8]) -> bool {
        self.read(key).is_some()
    }

    fn write(&mut self, entry: Entry);

    fn erase(&mut self, key: &[u8]);

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every cached entry in unspecified order.
    fn iter(&self) -> impl Iterator<Item = &Entry> + '_;

    /// Copies the given keys' cached entries into a store. Keys not cached
    /// are skipped.
    fn write_to<T: BackingStore>(&self, target: &mut T, keys: &[Key]) {
        for key in keys {
            if let Some(entry) = self.read(key) {
                target.write(entry);
            }
        }
    }
}

/// `HashMap`-backed cache. The default cache for new layers.
#[derive(Debug, Clone, Default)]
pub struct HashCache {
    map: HashMap<Key, Entry>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryCache for HashCache {
    fn read(&self, key: &[u8]) -> Option<Entry> {
        self.map.get(key).cloned()
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    fn write(&mut self, entry: Entry) {
        self.map.insert(entry.key.clone(), entry);
    }

    fn erase(&mut self, key: &[u8]) {
        self.map.remove(key);
    }

    fn clear(&mut self) {
        self.map.clear();
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.map.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn write_overwrites_and_erase_removes() {
        let mut cache = HashCache::new();
        cache.write(Entry::new(&b"k"[..], &b"v1"[..]));
        cache.write(Entry::new(&b"k"[..], &b"v2"[..]));
        assert_eq!(cache.read(b"k").unwrap().value.as_ref(), b"v2");
        assert_eq!(cache.len(), 1);

        cache.erase(b"k");
        assert!(!cache.contains(b"k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn write_to_skips_uncached_keys() {
        let mut cache = HashCache::new();
        cache.write(Entry::new(&b"a"[..], &b"1"[..]));

        let mut store = MemoryStore::new();
        let keys = vec![Key::from_static(b"a"), Key::from_static(b"b")];
        cache.write_to(&mut store, &keys);

        assert_eq!(store.len(), 1);
        assert_eq!(store.read(b"a").unwrap().value.as_ref(), b"1");
    }
}
