//! Concrete end-to-end scenarios exercising the full stack: `Database`,
//! `Collection`, indexes and the query pipeline together.

use blite::config::StorageConfig;
use blite::query::{find_docs, parse_filter_json, CmpOp, Filter, QueryModel};
use blite::storage::engine::StorageEngine;
use blite::Database;
use bson::doc;
use tempfile::tempdir;

fn cfg() -> StorageConfig {
    StorageConfig { page_size: 16 * 1024, initial_size: 4, read_only: false }
}

/// 1. Insert a document, confirm its field, then crash (drop without
/// checkpoint) and reopen: the committed document survives intact.
#[test]
fn scenario_1_insert_survives_a_crash_then_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("e2e1");
    let id;
    {
        let db = Database::create(path.to_str().unwrap(), cfg()).unwrap();
        let users = db.create_collection("users").unwrap();
        let stored = users.insert(doc! {"name": "Alice", "age": 30i32}).unwrap();
        id = users.identity_of(&stored);
        assert_eq!(stored.get_i32("age").unwrap(), 30);
        // No checkpoint: simulates a crash right after the insert commits.
    }
    let reopened = Database::open(path.to_str().unwrap(), cfg()).unwrap();
    let users = reopened.collection("users").unwrap();
    let found = users.find_by_id(&id).unwrap().unwrap();
    assert_eq!(found.get_i32("age").unwrap(), 30);
}

/// 2 & 6. An index on `total` plus `total >= 25 AND total < 200` plans a
/// single merged range and returns `{2, 3}` in ascending order.
#[test]
fn scenario_2_and_6_indexed_range_query_returns_the_merged_window_in_order() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path().join("e2e2").to_str().unwrap(), cfg()).unwrap();
    let orders = db.create_collection("orders").unwrap();
    orders.create_index("by_total", "total", false).unwrap();

    orders.insert(doc! {"label": 1i32, "total": 10i32}).unwrap();
    orders.insert(doc! {"label": 2i32, "total": 25i32}).unwrap();
    orders.insert(doc! {"label": 3i32, "total": 100i32}).unwrap();
    orders.insert(doc! {"label": 4i32, "total": 250i32}).unwrap();

    let filter = Filter::And(vec![
        Filter::Cmp { path: "total".into(), op: CmpOp::Gte, value: bson::Bson::Int32(25) },
        Filter::Cmp { path: "total".into(), op: CmpOp::Lt, value: bson::Bson::Int32(200) },
    ]);

    // The optimizer must fold both conjuncts into one IndexRange, not just
    // pick the first.
    let indexes = orders.get_indexes();
    let plan = blite::query::optimizer::plan_for(&filter, &indexes);
    assert!(matches!(
        &plan,
        blite::query::Plan::IndexRange { name, .. } if name == "by_total"
    ));

    let model = QueryModel { filter, ..QueryModel::default() };
    let cursor = find_docs(&orders, &model).unwrap();
    let labels: Vec<i32> = cursor.collect().iter().map(|d| d.get_i32("label").unwrap()).collect();
    let mut sorted = labels.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![2, 3]);
}

/// 3. A 20 000-byte field forces an overflow chain and round-trips exactly.
#[test]
fn scenario_3_oversized_field_round_trips_through_an_overflow_chain() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path().join("e2e3").to_str().unwrap(), cfg()).unwrap();
    let docs = db.create_collection("docs").unwrap();
    let bio = "a".repeat(20_000);
    let stored = docs.insert(doc! {"bio": bio.clone()}).unwrap();
    let id = docs.identity_of(&stored);
    let found = docs.find_by_id(&id).unwrap().unwrap();
    assert_eq!(found.get_str("bio").unwrap(), bio);
}

/// 4. A page written by one uncommitted transaction is invisible to a
/// reader until that transaction commits. This exercises the storage
/// engine directly — `Collection`'s write path always begins and commits
/// its own internal transaction (see `DESIGN.md`'s open-question decision
/// on not threading a caller-owned transaction through writes), so the
/// engine layer is where T1/T2 staged visibility is actually observable.
#[test]
fn scenario_4_an_uncommitted_write_is_invisible_until_commit() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(&dir.path().join("e2e4.blite"), cfg()).unwrap();
    let page_id = engine.allocate_page().unwrap();

    let mut t1 = engine.begin_transaction();
    t1.write_page(page_id, vec![1u8; cfg().page_size as usize]).unwrap();

    // T2 reads the committed snapshot: T1's write hasn't landed yet.
    let before = engine.read_page(0, page_id).unwrap();
    assert_ne!(before, vec![1u8; cfg().page_size as usize]);

    t1.commit().unwrap();
    let after = engine.read_page(0, page_id).unwrap();
    assert_eq!(after, vec![1u8; cfg().page_size as usize]);
}

/// 6. The BLQL JSON dialect parses the nested MQL-style age window from
/// §8 scenario 6 into the same merged-range plan as the hand-built tree.
#[test]
fn scenario_6_blql_json_age_window_plans_a_single_merged_range() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path().join("e2e6").to_str().unwrap(), cfg()).unwrap();
    let people = db.create_collection("people").unwrap();
    people.create_index("by_age", "age", false).unwrap();

    people.insert(doc! {"name": "a", "age": 10i32}).unwrap();
    people.insert(doc! {"name": "b", "age": 20i32}).unwrap();
    people.insert(doc! {"name": "c", "age": 40i32}).unwrap();
    people.insert(doc! {"name": "d", "age": 70i32}).unwrap();

    let filter = parse_filter_json(r#"{ "$and": [ { "age": { "$gte": 18 } }, { "age": { "$lt": 65 } } ] }"#).unwrap();
    let indexes = people.get_indexes();
    let plan = blite::query::optimizer::plan_for(&filter, &indexes);
    assert!(matches!(&plan, blite::query::Plan::IndexRange { name, .. } if name == "by_age"));

    let model = QueryModel { filter, ..QueryModel::default() };
    let cursor = find_docs(&people, &model).unwrap();
    let mut names: Vec<String> = cursor.collect().iter().map(|d| d.get_str("name").unwrap().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
}

/// 5. A unique index on `email` rejects a duplicate with no side effect.
#[test]
fn scenario_5_unique_index_violation_leaves_the_primary_index_untouched() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path().join("e2e5").to_str().unwrap(), cfg()).unwrap();
    let users = db.create_collection("users").unwrap();
    users.create_index("by_email", "email", true).unwrap();

    users.insert(doc! {"email": "a@b"}).unwrap();
    let result = users.insert(doc! {"email": "a@b"});
    assert!(matches!(result, Err(blite::DbError::UniqueViolation { .. })));
    assert_eq!(users.count().unwrap(), 1);
}
