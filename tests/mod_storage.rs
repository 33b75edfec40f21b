//! Black-box storage engine behaviors: commit visibility, crash recovery
//! honoring only committed prefixes, and oversized writes surviving a
//! crash/recover cycle byte-for-byte.

use blite::config::StorageConfig;
use blite::storage::engine::StorageEngine;
use tempfile::tempdir;

fn cfg() -> StorageConfig {
    StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
}

#[test]
fn a_fresh_reader_observes_every_byte_of_a_committed_transaction() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(&dir.path().join("s1.blite"), cfg()).unwrap();
    let page_id = engine.allocate_page().unwrap();

    let mut txn = engine.begin_transaction();
    txn.write_page(page_id, vec![7u8; 4096]).unwrap();
    txn.commit().unwrap();

    let bytes = engine.read_page(0, page_id).unwrap();
    assert_eq!(bytes, vec![7u8; 4096]);
}

#[test]
fn uncommitted_writes_are_not_visible_to_other_readers() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(&dir.path().join("s2.blite"), cfg()).unwrap();
    let page_id = engine.allocate_page().unwrap();
    // Seed committed content so the "not visible yet" read has a defined baseline.
    let mut seed = engine.begin_transaction();
    seed.write_page(page_id, vec![0u8; 4096]).unwrap();
    seed.commit().unwrap();

    let mut txn = engine.begin_transaction();
    txn.write_page(page_id, vec![9u8; 4096]).unwrap();

    // A read under the committed snapshot (txn id 0) must not see txn's write.
    let bytes = engine.read_page(0, page_id).unwrap();
    assert_eq!(bytes, vec![0u8; 4096]);

    txn.commit().unwrap();
    let after = engine.read_page(0, page_id).unwrap();
    assert_eq!(after, vec![9u8; 4096]);
}

#[test]
fn recovery_applies_only_the_committed_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s3.blite");
    let (committed_page, uncommitted_page);
    {
        let engine = StorageEngine::create(&path, cfg()).unwrap();
        committed_page = engine.allocate_page().unwrap();
        uncommitted_page = engine.allocate_page().unwrap();

        let mut t1 = engine.begin_transaction();
        t1.write_page(committed_page, vec![1u8; 4096]).unwrap();
        t1.commit().unwrap();

        // t2 writes to the WAL conceptually by opening a transaction and
        // writing a page, but we drop it without commit — simulating a
        // crash before the commit record was appended.
        let mut t2 = engine.begin_transaction();
        t2.write_page(uncommitted_page, vec![2u8; 4096]).unwrap();
        drop(t2);
    }

    let recovered = StorageEngine::open(&path, cfg()).unwrap();
    let committed_bytes = recovered.read_page(0, committed_page).unwrap();
    assert_eq!(committed_bytes, vec![1u8; 4096]);

    let uncommitted_bytes = recovered.read_page(0, uncommitted_page).unwrap();
    assert_ne!(uncommitted_bytes, vec![2u8; 4096]);
}

#[test]
fn a_page_sized_write_survives_a_crash_recover_cycle_byte_for_byte() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s4.blite");
    let page_id;
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
    {
        let engine = StorageEngine::create(&path, cfg()).unwrap();
        page_id = engine.allocate_page().unwrap();
        let mut txn = engine.begin_transaction();
        txn.write_page(page_id, payload.clone()).unwrap();
        txn.commit().unwrap();
    }
    let recovered = StorageEngine::open(&path, cfg()).unwrap();
    assert_eq!(recovered.read_page(0, page_id).unwrap(), payload);
}

#[test]
fn checkpoint_flushes_and_truncates_without_losing_committed_data() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(&dir.path().join("s5.blite"), cfg()).unwrap();
    let page_id = engine.allocate_page().unwrap();
    let mut txn = engine.begin_transaction();
    txn.write_page(page_id, vec![5u8; 4096]).unwrap();
    txn.commit().unwrap();

    engine.checkpoint().unwrap();
    assert_eq!(engine.read_page(0, page_id).unwrap(), vec![5u8; 4096]);
}
