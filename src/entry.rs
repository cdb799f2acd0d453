//! Key/value byte strings and the entry pair stored by sessions.
//!
//! Keys order lexicographically. "Not found" is always `None` at the API
//! surface; there is no in-band sentinel value.

use bytes::Bytes;

/// A session key. Ordered lexicographically by byte content.
pub type Key = Bytes;

/// A session value. Stored, never ordered on.
pub type Value = Bytes;

/// A key/value pair as held in caches and stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
