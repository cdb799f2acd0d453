//! `stratakv` layers nested transactional key-value sessions over a
//! persistent ordered store.
//!
//! This crate is intentionally opinionated about correctness first:
//! - Writes and erases touch only the leaf layer; reads walk the chain
//!   upward and fall through to the store (read-your-writes).
//! - Deletes are tombstones that shadow ancestors and the store.
//! - A layer's pending mutations commit into its parent (squash) or, at the
//!   root, into the store; dropping a layer with pending mutations commits
//!   implicitly.
//! - Iteration presents one merged, key-ordered, cyclic view across every
//!   layer plus the store.
//!
//! The session core is generic over its two collaborators: a
//! [`store::BackingStore`] (the persistent ordered store) and an
//! [`cache::EntryCache`] (the per-layer in-memory cache). In-memory
//! reference implementations of both are included.
//!
//! ```
//! use stratakv::{MemoryStore, Session};
//!
//! let root: Session = Session::with_store(MemoryStore::new());
//! root.put(&b"greeting"[..], &b"hello"[..]);
//!
//! let txn = Session::nested(&root);
//! txn.put(&b"greeting"[..], &b"world"[..]);
//! assert_eq!(txn.read(b"greeting").unwrap().value.as_ref(), b"world");
//!
//! txn.undo();
//! assert_eq!(root.read(b"greeting").unwrap().value.as_ref(), b"hello");
//! ```

pub mod cache;
pub mod entry;
pub mod session;
pub mod store;

pub use cache::{EntryCache, HashCache};
pub use entry::{Entry, Key, Value};
pub use session::{Session, SessionIter};
pub use store::{BackingStore, MemoryStore};
