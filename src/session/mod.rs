//! Layered transactional sessions.
//!
//! A [`Session`] is a handle to one layer of a chain stacked above a
//! persistent ordered store. Writes and erases land in the leaf layer only;
//! reads walk the chain upward and fall through to the store, pulling hits
//! into the leaf's cache. A layer's pending mutations can be abandoned
//! ([`Session::undo`]) or folded into the layer below
//! ([`Session::commit`]); dropping the last handle to a layer with pending
//! mutations commits them implicitly.
//!
//! Chain shape: each layer owns its parent (strong link) and observes its
//! child (weak link), so a chain is a simple path that collapses leaf-first
//! on drop.

mod iter;
mod iter_cache;

pub use iter::SessionIter;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::cache::{EntryCache, HashCache};
use crate::entry::{Entry, Key, Value};
use crate::store::{BackingStore, MemoryStore};

use iter_cache::{HintRefresh, IterCache, IterHint};

type LayerRef<S, C> = Rc<RefCell<Layer<S, C>>>;
type StoreRef<S> = Rc<RefCell<S>>;

/// One node in a session chain.
struct Layer<S: BackingStore, C: EntryCache> {
    parent: Option<LayerRef<S, C>>,
    child: Weak<RefCell<Layer<S, C>>>,
    /// Shared with every layer of the chain; `None` once undone or orphaned.
    store: Option<StoreRef<S>>,
    cache: C,
    /// Keys written at this layer since the last commit/undo.
    updated: HashSet<Key>,
    /// Tombstones created at this layer.
    deleted: HashSet<Key>,
    hints: IterCache,
}

impl<S: BackingStore, C: EntryCache> Layer<S, C> {
    fn reset(&mut self) {
        self.updated.clear();
        self.deleted.clear();
        self.cache.clear();
        self.hints.clear();
    }

    fn is_inert(&self) -> bool {
        self.parent.is_none() && self.store.is_none()
    }
}

impl<S: BackingStore, C: EntryCache> Drop for Layer<S, C> {
    fn drop(&mut self) {
        // Implicit commit: a layer leaving scope with pending mutations
        // writes them through to its parent, or to the store if it is the
        // root. Inert layers (undone or orphaned) have nowhere to go.
        if self.updated.is_empty() && self.deleted.is_empty() {
            return;
        }
        if self.is_inert() {
            return;
        }
        let deleted: Vec<Key> = self.deleted.iter().cloned().collect();
        let updates: Vec<Entry> = self
            .updated
            .iter()
            .filter_map(|key| self.cache.read(key))
            .collect();
        write_through(self.parent.clone(), self.store.clone(), deleted, updates);
    }
}

/// Applies tombstones then updated entries to the parent layer when one
/// exists, otherwise to the store. A parent target goes through the ordinary
/// session operations so it maintains its own sets and iterator hints.
fn write_through<S: BackingStore, C: EntryCache>(
    parent: Option<LayerRef<S, C>>,
    store: Option<StoreRef<S>>,
    deleted: Vec<Key>,
    updates: Vec<Entry>,
) {
    if let Some(parent) = parent {
        let parent = Session { inner: parent };
        for key in deleted {
            parent.erase(key);
        }
        for entry in updates {
            parent.write(entry);
        }
    } else if let Some(store) = store {
        let mut store = store.borrow_mut();
        store.erase_batch(&deleted);
        store.write_batch(updates);
    }
}

fn shadow_deleted<S: BackingStore, C: EntryCache>(chain: &[LayerRef<S, C>], key: &[u8]) -> bool {
    // Walk root -> leaf; the layer nearest the leaf that mentions the key
    // decides. The root is included so its tombstones hide store keys.
    let mut deleted = false;
    for layer in chain {
        let layer = layer.borrow();
        if layer.deleted.contains(key) {
            deleted = true;
        } else if layer.updated.contains(key) {
            deleted = false;
        }
    }
    deleted
}

fn prime_cache<S: BackingStore, C: EntryCache>(node: &LayerRef<S, C>) {
    let child = {
        let mut layer = node.borrow_mut();
        let layer = &mut *layer;
        layer.hints.clear();
        // Reads cached against the old ancestor chain are stale after a
        // reparent; writes this layer originated remain valid.
        let updated = &layer.updated;
        let stale: Vec<Key> = layer
            .cache
            .iter()
            .map(|entry| entry.key.clone())
            .filter(|key| !updated.contains(key))
            .collect();
        for key in &stale {
            layer.cache.erase(key);
        }
        trace!(dropped = stale.len(), "primed session layer cache");
        layer.child.upgrade()
    };
    if let Some(child) = child {
        prime_cache(&child);
    }
}

/// Seek kinds for the merged view across all layers plus the store.
#[derive(Clone, Copy)]
enum Seek<'a> {
    First,
    Last,
    Find(&'a [u8]),
    LowerBound(&'a [u8]),
    UpperBound(&'a [u8]),
    Prev(&'a [u8]),
}

/// A handle to one layer of a session chain.
///
/// Handles are cheap to clone and alias the layer; the implicit commit runs
/// when the last handle drops.
pub struct Session<S: BackingStore = MemoryStore, C: EntryCache = HashCache> {
    inner: LayerRef<S, C>,
}

impl<S: BackingStore, C: EntryCache> Clone for Session<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: BackingStore + Default, C: EntryCache + Default> Default for Session<S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BackingStore, C: EntryCache> Session<S, C> {
    /// Root session over fresh default collaborators.
    pub fn new() -> Self
    where
        S: Default,
        C: Default,
    {
        Self::with_parts(S::default(), C::default())
    }

    /// Root session wrapping a caller-provided store.
    pub fn with_store(store: S) -> Self
    where
        C: Default,
    {
        Self::with_parts(store, C::default())
    }

    /// Root session wrapping a caller-provided store and cache.
    pub fn with_parts(store: S, cache: C) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Layer {
                parent: None,
                child: Weak::new(),
                store: Some(Rc::new(RefCell::new(store))),
                cache,
                updated: HashSet::new(),
                deleted: HashSet::new(),
                hints: IterCache::default(),
            })),
        }
    }

    /// New leaf layer over `parent`, sharing the chain's store handle.
    ///
    /// Any previous child of `parent` is orphaned: its parent and store
    /// links are nulled, but it keeps its own data and can be re-attached
    /// elsewhere.
    pub fn nested(parent: &Self) -> Self
    where
        C: Default,
    {
        let store = parent.inner.borrow().store.clone();
        let inner = Rc::new(RefCell::new(Layer {
            parent: Some(parent.inner.clone()),
            child: Weak::new(),
            store,
            cache: C::default(),
            updated: HashSet::new(),
            deleted: HashSet::new(),
            hints: IterCache::default(),
        }));

        let old_child = parent.inner.borrow().child.upgrade();
        if let Some(old_child) = old_child {
            let mut old_child = old_child.borrow_mut();
            old_child.parent = None;
            old_child.store = None;
        }
        parent.inner.borrow_mut().child = Rc::downgrade(&inner);

        Self { inner }
    }

    /// Attaches `child` below this layer, returning the previously attached
    /// child, if any. The incoming child keeps its own writes; its read-only
    /// cache entries are primed away since they were fetched against a
    /// different ancestor chain.
    pub fn attach(&self, child: &Self) -> Option<Self> {
        if Rc::ptr_eq(&self.inner, &child.inner) {
            return None;
        }
        let previous = self.detach();

        // Sever a stale back-link if the child's old parent still points at
        // it; the chain must stay a simple path.
        let old_parent = child.inner.borrow().parent.clone();
        if let Some(old_parent) = old_parent {
            let mut old_parent = old_parent.borrow_mut();
            let points_here = old_parent
                .child
                .upgrade()
                .map_or(false, |c| Rc::ptr_eq(&c, &child.inner));
            if points_here {
                old_parent.child = Weak::new();
            }
        }

        let store = self.inner.borrow().store.clone();
        {
            let mut child_layer = child.inner.borrow_mut();
            child_layer.parent = Some(self.inner.clone());
            child_layer.store = store;
        }
        self.inner.borrow_mut().child = Rc::downgrade(&child.inner);

        prime_cache(&child.inner);
        trace!("attached session layer");
        previous
    }

    /// Detaches and returns the current child, if any. The child becomes
    /// inert (no parent, no store) but keeps its own data.
    pub fn detach(&self) -> Option<Self> {
        let child = self.inner.borrow().child.upgrade();
        let detached = child.map(|child| {
            {
                let mut child_layer = child.borrow_mut();
                child_layer.parent = None;
                child_layer.store = None;
            }
            trace!("detached session layer");
            Self { inner: child }
        });
        self.inner.borrow_mut().child = Weak::new();
        detached
    }

    /// Abandons this layer's mutations and removes it from the chain. The
    /// surrounding chain is stitched back together past it; the layer
    /// becomes inert.
    pub fn undo(&self) {
        let mut inner = self.inner.borrow_mut();
        let child = inner.child.upgrade();
        if let Some(parent) = &inner.parent {
            parent.borrow_mut().child = inner.child.clone();
        }
        if let Some(child) = &child {
            child.borrow_mut().parent = inner.parent.clone();
        }
        inner.parent = None;
        inner.child = Weak::new();
        inner.store = None;
        inner.reset();
        trace!("undid session layer");
    }

    /// Writes this layer's pending mutations through to its parent (squash)
    /// or, at the root, to the store, then clears the layer. A no-op on an
    /// inert layer or when nothing is pending.
    pub fn commit(&self) {
        let (parent, store, deleted, updates) = {
            let inner = self.inner.borrow();
            if inner.is_inert() {
                return;
            }
            if inner.updated.is_empty() && inner.deleted.is_empty() {
                return;
            }
            let deleted: Vec<Key> = inner.deleted.iter().cloned().collect();
            let updates: Vec<Entry> = inner
                .updated
                .iter()
                .filter_map(|key| inner.cache.read(key))
                .collect();
            (inner.parent.clone(), inner.store.clone(), deleted, updates)
        };
        debug!(
            updates = updates.len(),
            tombstones = deleted.len(),
            squash = parent.is_some(),
            "committing session layer"
        );
        write_through(parent, store, deleted, updates);
        self.inner.borrow_mut().reset();
    }

    /// Reads a key through the chain: this layer first, then ancestors, then
    /// the store. Hits above this layer are pulled into its cache.
    pub fn read(&self, key: impl AsRef<[u8]>) -> Option<Entry> {
        let key = key.as_ref();
        let mut node = self.inner.clone();
        loop {
            let hit = {
                let layer = node.borrow();
                if layer.deleted.contains(key) {
                    return None;
                }
                layer.cache.read(key)
            };
            if let Some(entry) = hit {
                if !Rc::ptr_eq(&node, &self.inner) {
                    self.inner.borrow_mut().cache.write(entry.clone());
                    self.update_hints(&entry.key, HintRefresh::RECALCULATE);
                }
                return Some(entry);
            }
            let parent = node.borrow().parent.clone();
            match parent {
                Some(parent) => node = parent,
                None => break,
            }
        }

        let store = self.inner.borrow().store.clone();
        if let Some(store) = store {
            if let Some(entry) = store.borrow().read(key) {
                self.inner.borrow_mut().cache.write(entry.clone());
                self.update_hints(&entry.key, HintRefresh::RECALCULATE);
                return Some(entry);
            }
        }
        None
    }

    /// Whether the key is logically present in this layer's view.
    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        let mut node = self.inner.clone();
        loop {
            let (deleted, cached) = {
                let layer = node.borrow();
                (layer.deleted.contains(key), layer.cache.contains(key))
            };
            if deleted {
                return false;
            }
            if cached {
                self.update_hints(&Key::copy_from_slice(key), HintRefresh::RECALCULATE);
                return true;
            }
            let parent = node.borrow().parent.clone();
            match parent {
                Some(parent) => node = parent,
                None => break,
            }
        }

        let store = self.inner.borrow().store.clone();
        store.map_or(false, |store| store.borrow().contains(key))
    }

    /// Writes an entry into this layer, shadowing ancestors and clearing any
    /// tombstone for the key.
    pub fn write(&self, entry: Entry) {
        let key = entry.key.clone();
        {
            let mut inner = self.inner.borrow_mut();
            inner.updated.insert(key.clone());
            inner.deleted.remove(key.as_ref());
            inner.cache.write(entry);
        }
        self.update_hints(&key, HintRefresh::WRITE);
    }

    /// Convenience for [`Session::write`].
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.write(Entry::new(key, value));
    }

    /// Tombstones a key at this layer, hiding it from reads and iteration
    /// regardless of ancestor or store contents.
    pub fn erase(&self, key: impl Into<Key>) {
        let key = key.into();
        {
            let mut inner = self.inner.borrow_mut();
            inner.deleted.insert(key.clone());
            inner.updated.remove(key.as_ref());
            inner.cache.erase(key.as_ref());
        }
        self.update_hints(&key, HintRefresh::ERASE);
    }

    /// Drops all pending state on this layer without touching the chain.
    pub fn clear(&self) {
        self.inner.borrow_mut().reset();
    }

    /// Reads a batch of keys, returning the entries found and the set of
    /// keys unresolved after consulting all layers and the store. Keys
    /// tombstoned in the chain are missing by definition and are not
    /// forwarded to the store.
    pub fn read_batch(
        &self,
        keys: impl IntoIterator<Item = impl Into<Key>>,
    ) -> (Vec<Entry>, HashSet<Key>) {
        let mut found = Vec::new();
        let mut missing = HashSet::new();
        let mut unresolved: Vec<Key> = Vec::new();

        for key in keys {
            let key: Key = key.into();
            let mut node = self.inner.clone();
            let mut resolved = false;
            loop {
                let hit = {
                    let layer = node.borrow();
                    if layer.deleted.contains(key.as_ref()) {
                        missing.insert(key.clone());
                        resolved = true;
                        break;
                    }
                    layer.cache.read(key.as_ref())
                };
                if let Some(entry) = hit {
                    if !Rc::ptr_eq(&node, &self.inner) {
                        self.inner.borrow_mut().cache.write(entry.clone());
                        self.update_hints(&entry.key, HintRefresh::RECALCULATE);
                    }
                    found.push(entry);
                    resolved = true;
                    break;
                }
                let parent = node.borrow().parent.clone();
                match parent {
                    Some(parent) => node = parent,
                    None => break,
                }
            }
            if !resolved {
                unresolved.push(key);
            }
        }

        let store = self.inner.borrow().store.clone();
        match store {
            Some(store) => {
                let (store_found, still_missing) = store.borrow().read_batch(&unresolved);
                for entry in &store_found {
                    self.inner.borrow_mut().cache.write(entry.clone());
                    self.update_hints(&entry.key, HintRefresh::RECALCULATE);
                }
                found.extend(store_found);
                missing.extend(still_missing);
            }
            None => missing.extend(unresolved),
        }

        (found, missing)
    }

    /// Writes a batch of entries; equivalent to writing each in turn.
    pub fn write_batch(&self, entries: impl IntoIterator<Item = Entry>) {
        for entry in entries {
            self.write(entry);
        }
    }

    /// Erases a batch of keys; equivalent to erasing each in turn.
    pub fn erase_batch(&self, keys: impl IntoIterator<Item = impl Into<Key>>) {
        for key in keys {
            self.erase(key);
        }
    }

    /// Copies this chain's cached entries for the given keys into another
    /// store. Keys deleted in the chain, or never pulled into a chain cache,
    /// are skipped; the store below this chain is not consulted.
    pub fn write_to<T: BackingStore>(
        &self,
        target: &mut T,
        keys: impl IntoIterator<Item = impl AsRef<[u8]>>,
    ) {
        let mut entries = Vec::new();
        for key in keys {
            let key = key.as_ref();
            let mut node = self.inner.clone();
            loop {
                let parent = {
                    let layer = node.borrow();
                    if layer.deleted.contains(key) {
                        break;
                    }
                    if let Some(entry) = layer.cache.read(key) {
                        entries.push(entry);
                        break;
                    }
                    layer.parent.clone()
                };
                match parent {
                    Some(parent) => node = parent,
                    None => break,
                }
            }
        }
        target.write_batch(entries);
    }

    /// Reads the given keys from another store and writes the hits into
    /// this layer as ordinary writes.
    pub fn read_from<T: BackingStore>(
        &self,
        source: &T,
        keys: impl IntoIterator<Item = impl AsRef<[u8]>>,
    ) {
        for key in keys {
            if let Some(entry) = source.read(key.as_ref()) {
                self.write(entry);
            }
        }
    }

    /// The store shared by this layer's chain; `None` once the layer has
    /// been undone or orphaned.
    pub fn backing_store(&self) -> Option<Rc<RefCell<S>>> {
        self.inner.borrow().store.clone()
    }

    /// Whether this layer has uncommitted writes or tombstones.
    pub fn has_pending_changes(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.updated.is_empty() || !inner.deleted.is_empty()
    }

    /// Refreshes the hint entry for `key` per the update protocol: ensure
    /// the entry exists, apply the tombstone overwrite, and (unless both
    /// neighbor flags are already known and no recalculation was requested)
    /// recompute the logical neighbors and cross-link their flags.
    fn update_hints(&self, key: &Key, refresh: HintRefresh) {
        {
            let mut inner = self.inner.borrow_mut();
            let hint = inner.hints.ensure(key);
            if refresh.overwrite {
                hint.tombstone = refresh.mark_deleted;
            }
            if !refresh.recalculate && hint.prev_cached && hint.next_cached {
                return;
            }
        }

        // The bound seeks go straight at the merged view and never re-enter
        // the hint map, so no borrow is held across them.
        let (lower, upper) = self.bounds(key);

        let mut inner = self.inner.borrow_mut();
        if let Some(lower) = lower {
            inner.hints.ensure(&lower).next_cached = true;
            inner.hints.ensure(key).prev_cached = true;
        }
        if let Some(upper) = upper {
            inner.hints.ensure(&upper).prev_cached = true;
            inner.hints.ensure(key).next_cached = true;
        }
    }

    /// Greatest logical key strictly below and least logical key strictly
    /// above `key`, across the merged view.
    fn bounds(&self, key: &Key) -> (Option<Key>, Option<Key>) {
        (
            self.merged_seek(Seek::Prev(key.as_ref())),
            self.merged_seek(Seek::UpperBound(key.as_ref())),
        )
    }

    /// The chain from root down to this layer.
    fn chain(&self) -> Vec<LayerRef<S, C>> {
        let mut chain = Vec::new();
        let mut node = self.inner.clone();
        loop {
            chain.push(node.clone());
            let parent = node.borrow().parent.clone();
            match parent {
                Some(parent) => node = parent,
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Best candidate key for `seek` across the store and every layer cache,
    /// skipping keys deleted in the merged view.
    fn merged_seek(&self, seek: Seek<'_>) -> Option<Key> {
        let chain = self.chain();
        let shadowed = |key: &[u8]| shadow_deleted(&chain, key);

        if let Seek::Find(key) = seek {
            // Presence check: every source reports the same key, so this is
            // a membership walk rather than an ordered merge.
            if shadowed(key) {
                return None;
            }
            for layer in &chain {
                if let Some(entry) = layer.borrow().cache.read(key) {
                    return Some(entry.key);
                }
            }
            let store = self.inner.borrow().store.clone();
            if store.map_or(false, |store| store.borrow().contains(key)) {
                return Some(Key::copy_from_slice(key));
            }
            return None;
        }

        let ascending = matches!(
            seek,
            Seek::First | Seek::LowerBound(_) | Seek::UpperBound(_)
        );
        let mut best: Option<Key> = None;

        let store = self.inner.borrow().store.clone();
        if let Some(store) = &store {
            let store = store.borrow();
            let mut candidate = match seek {
                Seek::First => store.first_key(),
                Seek::Last => store.last_key(),
                Seek::LowerBound(key) => store.lower_bound(key),
                Seek::UpperBound(key) => store.upper_bound(key),
                Seek::Prev(key) => store.prev_key(key),
                Seek::Find(_) => None,
            };
            while let Some(key) = candidate.take() {
                if !shadowed(key.as_ref()) {
                    best = Some(key);
                    break;
                }
                candidate = if ascending {
                    store.upper_bound(key.as_ref())
                } else {
                    store.prev_key(key.as_ref())
                };
            }
        }

        for layer in &chain {
            let layer = layer.borrow();
            for entry in layer.cache.iter() {
                let key = &entry.key;
                let eligible = match seek {
                    Seek::First | Seek::Last => true,
                    Seek::LowerBound(bound) => key.as_ref() >= bound,
                    Seek::UpperBound(bound) => key.as_ref() > bound,
                    Seek::Prev(bound) => key.as_ref() < bound,
                    Seek::Find(_) => false,
                };
                if !eligible || shadowed(key.as_ref()) {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(current) => {
                        if ascending {
                            key < current
                        } else {
                            key > current
                        }
                    }
                };
                if better {
                    best = Some(key.clone());
                }
            }
        }

        best
    }

    fn hint_for(&self, key: &[u8]) -> Option<IterHint> {
        self.inner.borrow().hints.get(key)
    }

    fn hint_after(&self, key: &[u8]) -> Option<(Key, IterHint)> {
        self.inner.borrow().hints.after(key)
    }

    fn hint_before(&self, key: &[u8]) -> Option<(Key, IterHint)> {
        self.inner.borrow().hints.before(key)
    }
}
