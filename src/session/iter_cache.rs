//! Memoized neighbor hints for the merged session iterator.
//!
//! The hint map is ordered by key and records, per key, whether its immediate
//! logical neighbors are also present in the map and whether the key is
//! deleted in the session's view. It is strictly a hint structure: a missing
//! key proves nothing, and the neighbor flags may be stale until a refresh
//! recomputes them against the merged view.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::entry::Key;

/// Neighbor knowledge for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct IterHint {
    /// The immediately-smaller logical key is present in the hint map.
    pub prev_cached: bool,
    /// The immediately-larger logical key is present in the hint map.
    pub next_cached: bool,
    /// The key is deleted in this session's logical view.
    pub tombstone: bool,
}

/// How a hint refresh treats the existing entry.
#[derive(Debug, Clone, Copy)]
pub(super) struct HintRefresh {
    /// Recompute neighbor bounds even when both flags are already set.
    pub recalculate: bool,
    /// Tombstone value applied when `overwrite` is set.
    pub mark_deleted: bool,
    /// Whether to overwrite the entry's tombstone flag.
    pub overwrite: bool,
}

impl HintRefresh {
    /// Recompute neighbors, leave the tombstone flag untouched.
    pub const RECALCULATE: Self = Self {
        recalculate: true,
        mark_deleted: false,
        overwrite: false,
    };

    /// A write at this layer: clear the tombstone and recompute.
    pub const WRITE: Self = Self {
        recalculate: true,
        mark_deleted: false,
        overwrite: true,
    };

    /// An erase at this layer: set the tombstone and recompute.
    pub const ERASE: Self = Self {
        recalculate: true,
        mark_deleted: true,
        overwrite: true,
    };
}

#[derive(Debug, Default)]
pub(super) struct IterCache {
    map: BTreeMap<Key, IterHint>,
}

impl IterCache {
    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn get(&self, key: &[u8]) -> Option<IterHint> {
        self.map.get(key).copied()
    }

    /// Returns the hint for `key`, inserting a default entry if absent.
    pub fn ensure(&mut self, key: &Key) -> &mut IterHint {
        self.map.entry(key.clone()).or_default()
    }

    /// First hint entry strictly after `key`.
    pub fn after(&self, key: &[u8]) -> Option<(Key, IterHint)> {
        self.map
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, hint)| (k.clone(), *hint))
    }

    /// Last hint entry strictly before `key`.
    pub fn before(&self, key: &[u8]) -> Option<(Key, IterHint)> {
        self.map
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(k, hint)| (k.clone(), *hint))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
