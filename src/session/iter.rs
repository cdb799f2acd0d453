//! Bidirectional cyclic cursor over a session's merged logical view.
//!
//! The cursor holds a key, not a map position: stepping navigates the
//! layer's hint map and falls back to a merged-view seek whenever the hints
//! run out. Once the hints around the current key are warm, a step is a
//! single ordered-map lookup.
//!
//! Traversal is cyclic: stepping forward past the largest logical key lands
//! on the smallest, and stepping backward past the smallest lands on the
//! largest. Callers use this to sweep the whole logical set starting from an
//! arbitrary key.

use crate::cache::EntryCache;
use crate::entry::{Entry, Key};
use crate::store::BackingStore;

use super::iter_cache::HintRefresh;
use super::{Seek, Session};

impl<S: BackingStore, C: EntryCache> Session<S, C> {
    /// Cursor at the smallest logical key, or end when the view is empty.
    pub fn begin(&self) -> SessionIter<'_, S, C> {
        let position = self.land(self.merged_seek(Seek::First));
        SessionIter {
            session: self,
            position,
        }
    }

    /// The end cursor. Dereferences to nothing; stepping wraps around.
    pub fn end(&self) -> SessionIter<'_, S, C> {
        SessionIter {
            session: self,
            position: None,
        }
    }

    /// Cursor at `key` iff it is logically present, else end.
    pub fn find(&self, key: impl AsRef<[u8]>) -> SessionIter<'_, S, C> {
        let position = self.land(self.merged_seek(Seek::Find(key.as_ref())));
        SessionIter {
            session: self,
            position,
        }
    }

    /// Cursor at the smallest logical key `>= key`, or end.
    pub fn lower_bound(&self, key: impl AsRef<[u8]>) -> SessionIter<'_, S, C> {
        let position = self.land(self.merged_seek(Seek::LowerBound(key.as_ref())));
        SessionIter {
            session: self,
            position,
        }
    }

    /// Cursor at the smallest logical key `> key`, or end.
    pub fn upper_bound(&self, key: impl AsRef<[u8]>) -> SessionIter<'_, S, C> {
        let position = self.land(self.merged_seek(Seek::UpperBound(key.as_ref())));
        SessionIter {
            session: self,
            position,
        }
    }

    /// Registers a found candidate in the hint map and adopts it as the
    /// cursor position unless its hint says the key is tombstoned.
    fn land(&self, candidate: Option<Key>) -> Option<Key> {
        let key = candidate?;
        self.update_hints(&key, HintRefresh::RECALCULATE);
        match self.hint_for(key.as_ref()) {
            Some(hint) if hint.tombstone => None,
            _ => Some(key),
        }
    }
}

/// A position in a session's merged logical view.
///
/// Obtained from [`Session::begin`], [`Session::end`], [`Session::find`],
/// [`Session::lower_bound`], or [`Session::upper_bound`]. Not the std
/// `Iterator`: stepping is cyclic and never exhausts.
pub struct SessionIter<'a, S: BackingStore, C: EntryCache> {
    session: &'a Session<S, C>,
    position: Option<Key>,
}

impl<'a, S: BackingStore, C: EntryCache> SessionIter<'a, S, C> {
    /// The key under the cursor; `None` at end.
    pub fn key(&self) -> Option<&Key> {
        self.position.as_ref()
    }

    pub fn is_end(&self) -> bool {
        self.position.is_none()
    }

    /// Reads the entry under the cursor through the session, re-validating
    /// shadowing against the chain. End dereferences to `None`.
    pub fn entry(&self) -> Option<Entry> {
        self.position
            .as_ref()
            .and_then(|key| self.session.read(key))
    }

    /// Steps to the next logical key, wrapping to the logical begin when
    /// forward motion is exhausted.
    pub fn next(&mut self) {
        let Some(mut current) = self.position.take() else {
            self.position = self.session.land(self.session.merged_seek(Seek::First));
            return;
        };
        loop {
            let next_known = self
                .session
                .hint_for(current.as_ref())
                .map_or(false, |hint| hint.next_cached);
            if !next_known {
                self.session
                    .update_hints(&current, HintRefresh::RECALCULATE);
                let refreshed = self
                    .session
                    .hint_for(current.as_ref())
                    .map_or(false, |hint| hint.next_cached);
                if !refreshed {
                    self.position = self.session.land(self.session.merged_seek(Seek::First));
                    return;
                }
            }
            match self.session.hint_after(current.as_ref()) {
                Some((key, hint)) => {
                    if !hint.tombstone {
                        self.position = Some(key);
                        return;
                    }
                    current = key;
                }
                None => {
                    self.position = self.session.land(self.session.merged_seek(Seek::First));
                    return;
                }
            }
        }
    }

    /// Steps to the previous logical key, wrapping to the logical last when
    /// backward motion is exhausted (including decrementing from end).
    pub fn prev(&mut self) {
        let Some(mut current) = self.position.take() else {
            self.position = self.session.land(self.session.merged_seek(Seek::Last));
            return;
        };
        loop {
            let prev_known = self
                .session
                .hint_for(current.as_ref())
                .map_or(false, |hint| hint.prev_cached);
            if !prev_known {
                self.session
                    .update_hints(&current, HintRefresh::RECALCULATE);
                let refreshed = self
                    .session
                    .hint_for(current.as_ref())
                    .map_or(false, |hint| hint.prev_cached);
                if !refreshed {
                    self.position = self.session.land(self.session.merged_seek(Seek::Last));
                    return;
                }
            }
            match self.session.hint_before(current.as_ref()) {
                Some((key, hint)) => {
                    if !hint.tombstone {
                        self.position = Some(key);
                        return;
                    }
                    current = key;
                }
                None => {
                    self.position = self.session.land(self.session.merged_seek(Seek::Last));
                    return;
                }
            }
        }
    }
}

impl<'a, S: BackingStore, C: EntryCache> Clone for SessionIter<'a, S, C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            position: self.position.clone(),
        }
    }
}

/// Cursors compare equal when both are end or both hold the same key.
impl<'a, S: BackingStore, C: EntryCache> PartialEq for SessionIter<'a, S, C> {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl<'a, S: BackingStore, C: EntryCache> Eq for SessionIter<'a, S, C> {}

impl<'a, S: BackingStore, C: EntryCache> std::fmt::Debug for SessionIter<'a, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIter")
            .field("position", &self.position)
            .finish()
    }
}
