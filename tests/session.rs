use std::collections::HashSet;

use stratakv::{BackingStore, Entry, Key, MemoryStore, Session};

fn store_with(entries: &[(&'static [u8], &'static [u8])]) -> MemoryStore {
    entries
        .iter()
        .map(|(k, v)| Entry::new(*k, *v))
        .collect()
}

fn root_abc() -> Session<MemoryStore> {
    Session::with_store(store_with(&[(b"a", b"A"), (b"b", b"B"), (b"c", b"C")]))
}

#[test]
fn empty_root_has_nothing() {
    let root: Session = Session::new();
    assert_eq!(root.read(b"x"), None);
    assert!(!root.contains(b"x"));
    assert!(!root.has_pending_changes());
}

#[test]
fn write_then_read_on_root() {
    let root: Session = Session::new();
    root.put(&b"a"[..], &b"1"[..]);

    let entry = root.read(b"a").expect("just written");
    assert_eq!(entry.key.as_ref(), b"a");
    assert_eq!(entry.value.as_ref(), b"1");
    assert!(root.contains(b"a"));
    assert!(root.has_pending_changes());
}

#[test]
fn write_overwrites_previous_value() {
    let root: Session = Session::new();
    root.put(&b"k"[..], &b"v1"[..]);
    root.put(&b"k"[..], &b"v2"[..]);
    assert_eq!(root.read(b"k").unwrap().value.as_ref(), b"v2");
}

#[test]
fn erase_hides_key_regardless_of_ancestors() {
    let root = root_abc();
    let leaf = Session::nested(&root);

    assert_eq!(leaf.read(b"b").unwrap().value.as_ref(), b"B");
    leaf.erase(&b"b"[..]);
    assert_eq!(leaf.read(b"b"), None);
    assert!(!leaf.contains(b"b"));

    // The ancestor view is untouched.
    assert_eq!(root.read(b"b").unwrap().value.as_ref(), b"B");
}

#[test]
fn erase_then_write_resurrects() {
    let root: Session = Session::new();
    root.erase(&b"k"[..]);
    assert_eq!(root.read(b"k"), None);

    root.put(&b"k"[..], &b"v"[..]);
    assert_eq!(root.read(b"k").unwrap().value.as_ref(), b"v");
}

#[test]
fn reads_fall_through_to_store_and_shadow_in_depth_order() {
    let root = root_abc();
    let mid = Session::nested(&root);
    let leaf = Session::nested(&mid);

    mid.put(&b"b"[..], &b"B-mid"[..]);
    leaf.put(&b"c"[..], &b"C-leaf"[..]);

    assert_eq!(leaf.read(b"a").unwrap().value.as_ref(), b"A");
    assert_eq!(leaf.read(b"b").unwrap().value.as_ref(), b"B-mid");
    assert_eq!(leaf.read(b"c").unwrap().value.as_ref(), b"C-leaf");
}

#[test]
fn commit_squashes_into_parent_then_into_store() {
    let root: Session = Session::new();
    let block = Session::nested(&root);
    let txn = Session::nested(&block);

    txn.put(&b"k"[..], &b"v1"[..]);
    txn.commit();

    assert_eq!(block.read(b"k").unwrap().value.as_ref(), b"v1");
    assert!(!txn.has_pending_changes());

    block.commit();
    assert!(!block.has_pending_changes());

    let store = root.backing_store().expect("root keeps its store");
    assert_eq!(store.borrow().read(b"k").unwrap().value.as_ref(), b"v1");
}

#[test]
fn commit_propagates_tombstones() {
    let root = root_abc();
    let leaf = Session::nested(&root);

    leaf.erase(&b"b"[..]);
    leaf.commit();

    assert_eq!(root.read(b"b"), None);

    root.commit();
    let store = root.backing_store().unwrap();
    assert!(!store.borrow().contains(b"b"));
    assert!(store.borrow().contains(b"a"));
}

#[test]
fn commit_with_no_mutations_is_a_no_op() {
    let root = root_abc();
    let leaf = Session::nested(&root);

    leaf.read(b"a");
    leaf.commit();

    assert!(!root.has_pending_changes());
    let store = root.backing_store().unwrap();
    assert_eq!(store.borrow().len(), 3);
}

#[test]
fn double_commit_behaves_as_one() {
    let root: Session = Session::new();
    let leaf = Session::nested(&root);

    leaf.put(&b"k"[..], &b"v"[..]);
    leaf.commit();
    leaf.commit();

    assert_eq!(root.read(b"k").unwrap().value.as_ref(), b"v");
    assert!(!leaf.has_pending_changes());
}

#[test]
fn implicit_commit_on_drop() {
    let root: Session = Session::new();
    {
        let txn = Session::nested(&root);
        txn.put(&b"k"[..], &b"v"[..]);
    }
    assert_eq!(root.read(b"k").unwrap().value.as_ref(), b"v");
}

#[test]
fn dropping_a_whole_chain_reaches_the_store() {
    let store_handle = {
        let root: Session = Session::new();
        let handle = root.backing_store().unwrap();
        let block = Session::nested(&root);
        let txn = Session::nested(&block);
        txn.put(&b"k"[..], &b"v"[..]);
        txn.erase(&b"gone"[..]);
        handle
        // txn squashes into block, block into root, root into the store,
        // regardless of handle drop order.
    };
    assert_eq!(store_handle.borrow().read(b"k").unwrap().value.as_ref(), b"v");
}

#[test]
fn undo_discards_and_collapses_the_chain() {
    let root: Session = Session::with_store(store_with(&[(b"a", b"A")]));
    let leaf = Session::nested(&root);

    leaf.put(&b"a"[..], &b"A2"[..]);
    leaf.put(&b"b"[..], &b"B"[..]);
    leaf.undo();

    assert_eq!(root.read(b"a").unwrap().value.as_ref(), b"A");
    assert_eq!(root.read(b"b"), None);

    // The undone layer is inert: everything on it is a neutral no-op.
    assert_eq!(leaf.read(b"a"), None);
    assert!(!leaf.contains(b"a"));
    assert!(leaf.backing_store().is_none());
    leaf.commit();
    assert_eq!(root.read(b"b"), None);
}

#[test]
fn undo_of_a_middle_layer_stitches_parent_and_child() {
    let root = root_abc();
    let mid = Session::nested(&root);
    let leaf = Session::nested(&mid);

    mid.put(&b"m"[..], &b"M"[..]);
    leaf.put(&b"l"[..], &b"L"[..]);
    mid.undo();

    // The leaf now sits directly on the root.
    assert_eq!(leaf.read(b"m"), None);
    assert_eq!(leaf.read(b"a").unwrap().value.as_ref(), b"A");
    assert_eq!(leaf.read(b"l").unwrap().value.as_ref(), b"L");

    leaf.commit();
    assert_eq!(root.read(b"l").unwrap().value.as_ref(), b"L");
}

#[test]
fn nesting_twice_orphans_the_first_child() {
    let root = root_abc();
    let first = Session::nested(&root);
    first.put(&b"x"[..], &b"X"[..]);

    let second = Session::nested(&root);

    // The first child is inert but keeps its own writes.
    assert!(first.backing_store().is_none());
    assert_eq!(first.read(b"x").unwrap().value.as_ref(), b"X");
    assert_eq!(first.read(b"a"), None);

    // The second child reads through to the store as usual.
    assert_eq!(second.read(b"a").unwrap().value.as_ref(), b"A");
}

#[test]
fn attach_transfers_a_layer_between_roots() {
    let r1: Session = Session::with_store(store_with(&[(b"only-r1", b"1")]));
    let r2: Session = Session::with_store(store_with(&[(b"only-r2", b"2")]));

    let layer = Session::nested(&r1);
    layer.put(&b"x"[..], &b"X"[..]);
    // Pull a read-only entry into the layer's cache; it must not survive
    // the transfer.
    assert!(layer.read(b"only-r1").is_some());

    r2.attach(&layer);

    assert_eq!(layer.read(b"x").unwrap().value.as_ref(), b"X");
    assert_eq!(layer.read(b"only-r1"), None);
    assert_eq!(layer.read(b"only-r2").unwrap().value.as_ref(), b"2");

    layer.commit();
    assert_eq!(r2.read(b"x").unwrap().value.as_ref(), b"X");
    assert_eq!(r1.read(b"x"), None);
}

#[test]
fn attach_returns_the_previous_child() {
    let root = root_abc();
    let first = Session::nested(&root);
    first.put(&b"f"[..], &b"F"[..]);

    let other_root: Session = Session::new();
    let incoming = Session::nested(&other_root);

    let evicted = root.attach(&incoming).expect("first was attached");
    assert_eq!(evicted.read(b"f").unwrap().value.as_ref(), b"F");
    assert!(evicted.backing_store().is_none());

    assert_eq!(incoming.read(b"a").unwrap().value.as_ref(), b"A");
}

#[test]
fn detach_orphans_but_preserves_data() {
    let root = root_abc();
    let leaf = Session::nested(&root);
    leaf.put(&b"x"[..], &b"X"[..]);

    let orphan = root.detach().expect("leaf was attached");
    assert!(orphan.backing_store().is_none());
    assert_eq!(orphan.read(b"x").unwrap().value.as_ref(), b"X");
    assert_eq!(orphan.read(b"a"), None);

    // Re-attach restores store visibility.
    root.attach(&orphan);
    assert_eq!(orphan.read(b"a").unwrap().value.as_ref(), b"A");
}

#[test]
fn clear_drops_pending_state_only() {
    let root = root_abc();
    let leaf = Session::nested(&root);

    leaf.put(&b"x"[..], &b"X"[..]);
    leaf.erase(&b"a"[..]);
    leaf.clear();

    assert!(!leaf.has_pending_changes());
    assert_eq!(leaf.read(b"x"), None);
    assert_eq!(leaf.read(b"a").unwrap().value.as_ref(), b"A");
}

#[test]
fn cloned_handles_alias_the_same_layer() {
    let root: Session = Session::new();
    let alias = root.clone();

    alias.put(&b"k"[..], &b"v"[..]);
    assert_eq!(root.read(b"k").unwrap().value.as_ref(), b"v");

    drop(alias);
    // The layer is still alive through `root`; nothing was committed away.
    assert!(root.has_pending_changes());
}

#[test]
fn read_batch_resolves_across_layers_and_store() {
    let root = root_abc();
    let mid = Session::nested(&root);
    let leaf = Session::nested(&mid);

    mid.put(&b"m"[..], &b"M"[..]);
    leaf.put(&b"l"[..], &b"L"[..]);
    leaf.erase(&b"a"[..]);

    let keys: Vec<&[u8]> = vec![b"l", b"m", b"b", b"a", b"nope"];
    let (found, missing) = leaf.read_batch(keys);

    let found_keys: HashSet<Key> = found.iter().map(|e| e.key.clone()).collect();
    assert!(found_keys.contains(&Key::from_static(b"l")));
    assert!(found_keys.contains(&Key::from_static(b"m")));
    assert!(found_keys.contains(&Key::from_static(b"b")));
    assert_eq!(found.len(), 3);

    // "a" is tombstoned at the leaf: missing, and never resurrected from
    // the store. "nope" exists nowhere.
    assert!(missing.contains(&Key::from_static(b"a")));
    assert!(missing.contains(&Key::from_static(b"nope")));
    assert_eq!(missing.len(), 2);
}

#[test]
fn write_batch_and_erase_batch_match_singletons() {
    let root: Session = Session::new();
    root.write_batch(vec![
        Entry::new(&b"a"[..], &b"1"[..]),
        Entry::new(&b"b"[..], &b"2"[..]),
    ]);
    assert_eq!(root.read(b"a").unwrap().value.as_ref(), b"1");
    assert_eq!(root.read(b"b").unwrap().value.as_ref(), b"2");

    root.erase_batch(vec![&b"a"[..], &b"b"[..]]);
    assert_eq!(root.read(b"a"), None);
    assert_eq!(root.read(b"b"), None);
}

#[test]
fn write_to_copies_cached_entries_and_skips_tombstones() {
    let root = root_abc();
    let leaf = Session::nested(&root);

    leaf.put(&b"x"[..], &b"X"[..]);
    leaf.erase(&b"b"[..]);
    // Pull "a" into the chain's caches so it is copyable.
    leaf.read(b"a");

    let mut target = MemoryStore::new();
    let keys: Vec<&[u8]> = vec![b"x", b"a", b"b", b"c"];
    leaf.write_to(&mut target, keys);

    assert_eq!(target.read(b"x").unwrap().value.as_ref(), b"X");
    assert_eq!(target.read(b"a").unwrap().value.as_ref(), b"A");
    // Tombstoned at the leaf.
    assert!(!target.contains(b"b"));
    // Never cached anywhere in the chain; write_to does not hit the store.
    assert!(!target.contains(b"c"));
}

#[test]
fn read_from_imports_hits_as_ordinary_writes() {
    let source = store_with(&[(b"a", b"1"), (b"b", b"2")]);
    let root: Session = Session::new();

    let keys: Vec<&[u8]> = vec![b"a", b"b", b"missing"];
    root.read_from(&source, keys);

    assert_eq!(root.read(b"a").unwrap().value.as_ref(), b"1");
    assert_eq!(root.read(b"b").unwrap().value.as_ref(), b"2");
    assert_eq!(root.read(b"missing"), None);
    assert!(root.has_pending_changes());
}

#[test]
fn updated_and_deleted_stay_disjoint() {
    // write clears a tombstone; erase clears an update. Observable as
    // read-your-writes under any interleaving.
    let root: Session = Session::new();
    let leaf = Session::nested(&root);

    leaf.put(&b"k"[..], &b"v"[..]);
    leaf.erase(&b"k"[..]);
    leaf.put(&b"k"[..], &b"v2"[..]);
    leaf.erase(&b"k"[..]);

    leaf.commit();
    assert_eq!(root.read(b"k"), None);

    leaf.put(&b"k"[..], &b"v3"[..]);
    leaf.commit();
    assert_eq!(root.read(b"k").unwrap().value.as_ref(), b"v3");
}
