//! Black-box B+Tree behaviors: ascending range order across a leaf split,
//! and the deterministic `max_per_node = 4` split boundary.

use blite::btree::{BTreeIndex, IndexKey};
use blite::config::StorageConfig;
use blite::storage::engine::StorageEngine;
use blite::types::DocumentLocation;
use tempfile::tempdir;

fn cfg() -> StorageConfig {
    StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
}

fn loc(page: u32) -> DocumentLocation {
    DocumentLocation::new(page, 0)
}

#[test]
fn range_scan_returns_ascending_order_across_a_leaf_split() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(&dir.path().join("bt1.blite"), cfg()).unwrap();
    let mut index = BTreeIndex::create_empty(&engine, true).unwrap();

    let mut txn = engine.begin_transaction();
    // Inserted out of order, past the page's tiny max_per_node floor, so at
    // least one split happens before the range scan below.
    for n in [50, 10, 90, 30, 70, 20, 60, 80, 40] {
        index.insert(&engine, &mut txn, IndexKey::from_i32(n), loc(n as u32), "nums").unwrap();
    }
    txn.commit().unwrap();

    let results = index.range_scan(&engine, 0, &IndexKey::min(), &IndexKey::max()).unwrap();
    let keys: Vec<i32> = results.iter().map(|(k, _)| i32_from_key(k)).collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted, "range scan must be ascending across leaf-chain boundaries");
    assert_eq!(keys.len(), 9);
}

#[test]
fn bounded_range_scan_excludes_keys_outside_the_range() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(&dir.path().join("bt2.blite"), cfg()).unwrap();
    let mut index = BTreeIndex::create_empty(&engine, true).unwrap();

    let mut txn = engine.begin_transaction();
    for n in 1..=10 {
        index.insert(&engine, &mut txn, IndexKey::from_i32(n), loc(n as u32), "nums").unwrap();
    }
    txn.commit().unwrap();

    let results = index.range_scan(&engine, 0, &IndexKey::from_i32(3), &IndexKey::from_i32(7)).unwrap();
    let keys: Vec<i32> = results.iter().map(|(k, _)| i32_from_key(k)).collect();
    assert_eq!(keys, vec![3, 4, 5, 6, 7]);
}

#[test]
fn inserting_five_entries_with_a_tiny_page_splits_exactly_once() {
    // A minimal page size floors `max_per_node` at 4 (§8's explicit
    // "max_per_node = 4" boundary case), so a 5th insert must force exactly
    // one split and leave two leaves worth of entries reachable by scan.
    let dir = tempdir().unwrap();
    let cfg = StorageConfig { page_size: 4096, initial_size: 4, read_only: false };
    let engine = StorageEngine::create(&dir.path().join("bt3.blite"), cfg).unwrap();
    let mut index = BTreeIndex::create_empty(&engine, true).unwrap();

    let mut txn = engine.begin_transaction();
    for n in 1..=5 {
        index.insert(&engine, &mut txn, IndexKey::from_i32(n), loc(n as u32), "nums").unwrap();
    }
    txn.commit().unwrap();

    let all = index.scan_all(&engine, 0).unwrap();
    assert_eq!(all.len(), 5);
    for n in 1..=5 {
        let found = index.search(&engine, 0, &IndexKey::from_i32(n)).unwrap();
        assert_eq!(found, vec![loc(n as u32)]);
    }
}

#[test]
fn delete_removes_a_key_without_disturbing_the_rest() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(&dir.path().join("bt4.blite"), cfg()).unwrap();
    let mut index = BTreeIndex::create_empty(&engine, true).unwrap();

    let mut txn = engine.begin_transaction();
    for n in 1..=10 {
        index.insert(&engine, &mut txn, IndexKey::from_i32(n), loc(n as u32), "nums").unwrap();
    }
    index.delete(&mut txn, &IndexKey::from_i32(5), loc(5)).unwrap();
    txn.commit().unwrap();

    assert!(index.search(&engine, 0, &IndexKey::from_i32(5)).unwrap().is_empty());
    for n in [1, 2, 3, 4, 6, 7, 8, 9, 10] {
        assert_eq!(index.search(&engine, 0, &IndexKey::from_i32(n)).unwrap(), vec![loc(n as u32)]);
    }
}

fn i32_from_key(key: &IndexKey) -> i32 {
    let mut bytes: [u8; 4] = key.as_bytes().try_into().expect("4-byte sortable i32 key");
    bytes[0] ^= 0x80;
    i32::from_be_bytes(bytes)
}
