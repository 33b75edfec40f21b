//! §4.9: the find/update/delete pipelines — candidate selection via the
//! optimizer's `Plan`, a residual `eval_filter` correctness pass over every
//! candidate, then sort/skip/take/project for reads or `apply_update`/
//! `Collection::update`/`Collection::delete` for writes.

use super::cursor::Cursor;
use super::eval::{compare_docs, eval_filter, project_fields};
use super::optimizer::{Plan, plan_for};
use super::types::{Filter, QueryModel, UpdateDoc, UpdateReport, apply_update, DeleteReport};
use crate::collection::Collection;
use crate::errors::DbError;
use crate::mapper::DocumentMapper;
use bson::Document as BsonDocument;

/// Every live document matching `filter`, in no particular order; the one
/// index-or-scan-then-residual-check pass every other function in this
/// module builds on.
fn select_matching<M: DocumentMapper<BsonDocument>>(
    collection: &Collection<M>,
    filter: &Filter,
) -> Result<Vec<BsonDocument>, DbError> {
    let indexes = collection.get_indexes();
    let plan = plan_for(filter, &indexes);
    let candidates: Vec<BsonDocument> = match plan {
        Plan::Primary => collection
            .scan_locations()?
            .into_iter()
            .map(|(_, location)| collection.read_at(location))
            .collect::<Result<_, DbError>>()?,
        Plan::IndexRange { name, min, max } => collection
            .query_index(&name, &min, &max, true)?
            .into_iter()
            .map(|(_, location)| collection.read_at(location))
            .collect::<Result<_, DbError>>()?,
    };
    Ok(candidates.into_iter().filter(|doc| eval_filter(doc, filter)).collect())
}

/// Runs the full find pipeline: candidate selection, sort, skip/take, then
/// projection, returning a materialized `Cursor`.
///
/// # Errors
/// Returns an error if any page backing a candidate cannot be read.
pub fn find_docs<M: DocumentMapper<BsonDocument>>(
    collection: &Collection<M>,
    model: &QueryModel,
) -> Result<Cursor, DbError> {
    let mut docs = select_matching(collection, &model.filter)?;
    if !model.sort.is_empty() {
        docs.sort_by(|a, b| compare_docs(a, b, &model.sort));
    }
    let docs: Vec<BsonDocument> = docs.into_iter().skip(model.skip).collect();
    let docs = match model.take {
        Some(take) => docs.into_iter().take(take).collect(),
        None => docs,
    };
    let docs = match &model.select {
        Some(select) => docs.iter().map(|doc| project_fields(doc, select)).collect(),
        None => docs,
    };
    Ok(Cursor::new(docs))
}

/// Counts documents matching `filter`, ignoring sort/skip/take/projection.
///
/// # Errors
/// Returns an error if any page backing a candidate cannot be read.
pub fn count_docs<M: DocumentMapper<BsonDocument>>(collection: &Collection<M>, filter: &Filter) -> Result<usize, DbError> {
    Ok(select_matching(collection, filter)?.len())
}

/// Applies `update` to every document matching `filter`.
///
/// # Errors
/// Returns an error if a matched document cannot be read or rewritten.
pub fn update_many<M: DocumentMapper<BsonDocument>>(
    collection: &Collection<M>,
    filter: &Filter,
    update: &UpdateDoc,
) -> Result<UpdateReport, DbError> {
    let matched = select_matching(collection, filter)?;
    let mut report = UpdateReport { matched: matched.len(), modified: 0 };
    for mut doc in matched {
        let id = collection.identity_of(&doc);
        if apply_update(&mut doc, update) {
            collection.update(&id, doc)?;
            report.modified += 1;
        }
    }
    Ok(report)
}

/// Applies `update` to the first document matching `filter`, if any.
///
/// # Errors
/// Returns an error if the matched document cannot be read or rewritten.
pub fn update_one<M: DocumentMapper<BsonDocument>>(
    collection: &Collection<M>,
    filter: &Filter,
    update: &UpdateDoc,
) -> Result<UpdateReport, DbError> {
    let Some(mut doc) = select_matching(collection, filter)?.into_iter().next() else {
        return Ok(UpdateReport::default());
    };
    let id = collection.identity_of(&doc);
    let modified = usize::from(apply_update(&mut doc, update));
    if modified == 1 {
        collection.update(&id, doc)?;
    }
    Ok(UpdateReport { matched: 1, modified })
}

/// Deletes every document matching `filter`.
///
/// # Errors
/// Returns an error if a matched document cannot be deleted.
pub fn delete_many<M: DocumentMapper<BsonDocument>>(collection: &Collection<M>, filter: &Filter) -> Result<DeleteReport, DbError> {
    let matched = select_matching(collection, filter)?;
    let mut deleted = 0;
    for doc in matched {
        let id = collection.identity_of(&doc);
        if collection.delete(&id)? {
            deleted += 1;
        }
    }
    Ok(DeleteReport { deleted })
}

/// Deletes the first document matching `filter`, if any.
///
/// # Errors
/// Returns an error if the matched document cannot be deleted.
pub fn delete_one<M: DocumentMapper<BsonDocument>>(collection: &Collection<M>, filter: &Filter) -> Result<DeleteReport, DbError> {
    let Some(doc) = select_matching(collection, filter)?.into_iter().next() else {
        return Ok(DeleteReport::default());
    };
    let id = collection.identity_of(&doc);
    let deleted = usize::from(collection.delete(&id)?);
    Ok(DeleteReport { deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::config::StorageConfig;
    use crate::document::envelope::KeyDictionary;
    use crate::mapper::BsonMapper;
    use crate::query::types::{CmpOp, SortSpec, Order};
    use crate::storage::engine::StorageEngine;
    use bson::{doc, Bson};
    use parking_lot::{Mutex, RwLock};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn cfg() -> StorageConfig {
        StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
    }

    fn fresh_collection(path: &std::path::Path) -> Collection<BsonMapper> {
        let engine = Arc::new(StorageEngine::create(path, cfg()).unwrap());
        let dict = Arc::new(RwLock::new(KeyDictionary::default()));
        let entry = CatalogEntry::new("docs".into(), engine.allocate_page().unwrap());
        let catalog = Arc::new(Mutex::new(Vec::new()));
        Collection::new("docs".into(), engine, catalog, &entry, BsonMapper::new(dict.clone()), dict).unwrap()
    }

    #[test]
    fn find_docs_applies_filter_sort_and_take() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("e1.blite"));
        for age in [30, 10, 20, 40] {
            col.insert(doc! {"age": age as i32}).unwrap();
        }
        let model = QueryModel {
            filter: Filter::Cmp { path: "age".into(), op: CmpOp::Gte, value: Bson::Int32(20) },
            sort: vec![SortSpec { path: "age".into(), order: Order::Asc }],
            select: None,
            skip: 0,
            take: Some(2),
        };
        let results = find_docs(&col, &model).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get_i32("age").unwrap(), 20);
        assert_eq!(results[1].get_i32("age").unwrap(), 30);
    }

    #[test]
    fn update_many_rewrites_every_match() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("e2.blite"));
        for age in [10, 20, 30] {
            col.insert(doc! {"age": age as i32, "active": true}).unwrap();
        }
        let filter = Filter::Cmp { path: "age".into(), op: CmpOp::Gte, value: Bson::Int32(20) };
        let update = UpdateDoc { set: vec![("active".into(), Bson::Boolean(false))], unset: vec![] };
        let report = update_many(&col, &filter, &update).unwrap();
        assert_eq!(report.matched, 2);
        assert_eq!(report.modified, 2);
        assert_eq!(count_docs(&col, &Filter::Cmp { path: "active".into(), op: CmpOp::Eq, value: Bson::Boolean(false) }).unwrap(), 2);
    }

    #[test]
    fn delete_one_removes_only_the_first_match() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("e3.blite"));
        for _ in 0..3 {
            col.insert(doc! {"kind": "x"}).unwrap();
        }
        let filter = Filter::Cmp { path: "kind".into(), op: CmpOp::Eq, value: Bson::String("x".into()) };
        let report = delete_one(&col, &filter).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(count_docs(&col, &filter).unwrap(), 2);
    }
}
