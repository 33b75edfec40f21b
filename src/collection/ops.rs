//! §4.7: the document-facing half of `Collection` — insert, point lookup,
//! full scan, update (in-place or relocate), delete and count — each run
//! under `collection_lock` the way the teacher's `build_lock` spans
//! `insert_document`/`update_document`/`delete_document` in
//! `collection/ops.rs`.

use super::{storage_io, Collection};
use crate::btree::IndexKey;
use crate::errors::DbError;
use crate::mapper::DocumentMapper;
use crate::types::{DocumentLocation, Guid, KeyKind, ObjectId, TransactionId};
use bson::Document as BsonDocument;

impl<M: DocumentMapper<BsonDocument>> Collection<M> {
    /// Inserts `doc`, auto-generating its identity field when unassigned, and
    /// fans the new `(key, location)` out to every secondary index.
    ///
    /// # Errors
    /// Returns `UniqueViolation` if the primary key (or a unique secondary
    /// index's key) already exists, `DocumentTooLarge` if it can't be
    /// serialized under the 16 MiB ceiling, or an I/O error.
    pub fn insert(&self, mut doc: BsonDocument) -> Result<BsonDocument, DbError> {
        let _guard = self.collection_lock.lock();
        let mut state = self.state.write();
        let key = self.assign_id(&mut doc);

        let bytes = storage_io::serialize_with_retry(&self.mapper, &doc)?;
        let mut txn = self.engine.begin_transaction();
        let location = storage_io::insert_raw(&self.engine, &mut txn, &mut state, &bytes)?;
        state.primary.insert(&self.engine, &mut txn, key, location, &self.name)?;
        state.indexes.insert_into_all(&self.engine, &mut txn, &doc, location)?;
        txn.commit()?;
        self.persist_catalog(&state)?;
        Ok(doc)
    }

    /// Inserts every document in `docs` in order, stopping at the first
    /// failure. Per §4.7 bulk insert has no whole-batch atomicity: documents
    /// inserted before the failing one stay inserted.
    ///
    /// Returns the documents that were actually inserted (with identities
    /// filled in) and, if the batch didn't fully succeed, the error that
    /// stopped it.
    pub fn insert_bulk(&self, docs: Vec<BsonDocument>) -> (Vec<BsonDocument>, Option<DbError>) {
        let mut inserted = Vec::with_capacity(docs.len());
        for doc in docs {
            match self.insert(doc) {
                Ok(stored) => inserted.push(stored),
                Err(e) => return (inserted, Some(e)),
            }
        }
        (inserted, None)
    }

    /// Looks up a document by its primary key, reading the committed
    /// snapshot only (equivalent to `find_by_id_in(id, 0)`).
    ///
    /// # Errors
    /// Returns an error if the page holding it cannot be read or decoded.
    pub fn find_by_id(&self, id: &IndexKey) -> Result<Option<BsonDocument>, DbError> {
        self.find_by_id_in(id, 0)
    }

    /// Looks up a document by its primary key as of `txn` (0 for the
    /// committed snapshot). Passing the id of an open, uncommitted
    /// transaction sees that transaction's own in-flight writes (RYOW),
    /// matching `StorageEngine::read_page`'s visibility order.
    ///
    /// # Errors
    /// Returns an error if the page holding it cannot be read or decoded.
    pub fn find_by_id_in(&self, id: &IndexKey, txn: TransactionId) -> Result<Option<BsonDocument>, DbError> {
        let state = self.state.read();
        let Some(&location) = state.primary.search(&self.engine, txn, id)?.first() else {
            return Ok(None);
        };
        Ok(Some(self.read_at_in(location, txn)?))
    }

    /// Returns every live document, in primary-key order, reading the
    /// committed snapshot only.
    ///
    /// # Errors
    /// Returns an error if any page cannot be read or decoded.
    pub fn find_all(&self) -> Result<Vec<BsonDocument>, DbError> {
        self.find_all_in(0)
    }

    /// Returns every document visible as of `txn`, in primary-key order.
    ///
    /// # Errors
    /// Returns an error if any page cannot be read or decoded.
    pub fn find_all_in(&self, txn: TransactionId) -> Result<Vec<BsonDocument>, DbError> {
        self.scan_locations_in(txn)?.into_iter().map(|(_, location)| self.read_at_in(location, txn)).collect()
    }

    /// Scans every live document's raw stored bytes in primary-key order,
    /// materializing only the ones `predicate` accepts. `predicate` sees the
    /// encoded bytes exactly as stored on disk (post-envelope, pre-decode),
    /// so a caller that only needs to check a few fields can reject most
    /// candidates without paying for a full `bson::Document` deserialize.
    ///
    /// # Errors
    /// Returns an error if any page backing a candidate cannot be read.
    pub fn scan(&self, predicate: impl Fn(&[u8]) -> bool) -> Result<Vec<BsonDocument>, DbError> {
        self.scan_in(predicate, 0)
    }

    /// As `scan`, but visible as of `txn` rather than the committed snapshot.
    ///
    /// # Errors
    /// Returns an error if any page backing a candidate cannot be read.
    pub fn scan_in(&self, predicate: impl Fn(&[u8]) -> bool, txn: TransactionId) -> Result<Vec<BsonDocument>, DbError> {
        let mut matches = Vec::new();
        for (_, location) in self.scan_locations_in(txn)? {
            let bytes = storage_io::read_entity(&self.engine, txn, location)?;
            if predicate(&bytes) {
                matches.push(self.mapper.deserialize(&bytes)?);
            }
        }
        Ok(matches)
    }

    /// Encodes `doc`'s identity field as an `IndexKey`, the same encoding its
    /// primary index entry is keyed under; used by the query layer to turn a
    /// matched document back into the key `update`/`delete` expect.
    #[must_use]
    pub fn identity_of(&self, doc: &BsonDocument) -> IndexKey {
        self.mapper.get_id(doc)
    }

    /// Number of live documents: a full primary-index scan, since no running
    /// count is maintained (§4.7).
    ///
    /// # Errors
    /// Returns an error if the primary index cannot be read.
    pub fn count(&self) -> Result<usize, DbError> {
        self.count_in(0)
    }

    /// Number of documents visible as of `txn`.
    ///
    /// # Errors
    /// Returns an error if the primary index cannot be read.
    pub fn count_in(&self, txn: TransactionId) -> Result<usize, DbError> {
        Ok(self.scan_locations_in(txn)?.len())
    }

    /// Every `(primary key, location)` pair in ascending key order, for the
    /// query evaluator's index-backed and full-scan plans.
    ///
    /// # Errors
    /// Returns an error if the primary index cannot be read.
    pub(crate) fn scan_locations(&self) -> Result<Vec<(IndexKey, DocumentLocation)>, DbError> {
        self.scan_locations_in(0)
    }

    pub(crate) fn scan_locations_in(&self, txn: TransactionId) -> Result<Vec<(IndexKey, DocumentLocation)>, DbError> {
        self.state.read().primary.scan_all(&self.engine, txn)
    }

    /// Reads and decodes the document stored at `location`, from the
    /// committed snapshot.
    ///
    /// # Errors
    /// Returns an error if the page cannot be read or decoded.
    pub(crate) fn read_at(&self, location: DocumentLocation) -> Result<BsonDocument, DbError> {
        self.read_at_in(location, 0)
    }

    pub(crate) fn read_at_in(&self, location: DocumentLocation, txn: TransactionId) -> Result<BsonDocument, DbError> {
        let bytes = storage_io::read_entity(&self.engine, txn, location)?;
        Ok(self.mapper.deserialize(&bytes)?)
    }

    /// Replaces the document identified by `id` with `new_doc`: the identity
    /// field is forced back to `id` regardless of what `new_doc` carries, the
    /// bytes are rewritten in place when they still fit, or relocated
    /// otherwise, and every secondary index is brought in line.
    ///
    /// # Errors
    /// Returns `NoSuchDocument` if `id` isn't present, or an I/O error.
    pub fn update(&self, id: &IndexKey, mut new_doc: BsonDocument) -> Result<BsonDocument, DbError> {
        let _guard = self.collection_lock.lock();
        let mut state = self.state.write();
        let old_location =
            *state.primary.search(&self.engine, 0, id)?.first().ok_or(DbError::NoSuchDocument)?;
        let old_doc = self.read_at(old_location)?;
        self.mapper.set_id(&mut new_doc, id);

        let bytes = storage_io::serialize_with_retry(&self.mapper, &new_doc)?;
        let mut txn = self.engine.begin_transaction();
        let new_location = storage_io::update_raw(&self.engine, &mut txn, &mut state, old_location, &bytes)?;
        if new_location != old_location {
            state.primary.delete(&mut txn, id, old_location)?;
            state.primary.insert(&self.engine, &mut txn, id.clone(), new_location, &self.name)?;
        }
        state.indexes.update_in_all(&self.engine, &mut txn, &old_doc, &new_doc, old_location, new_location)?;
        txn.commit()?;
        self.persist_catalog(&state)?;
        Ok(new_doc)
    }

    /// Deletes the document identified by `id`. Returns `false` if it wasn't
    /// present; the primary and every secondary index, plus the document's
    /// storage, are all freed together.
    ///
    /// # Errors
    /// Returns an error if page I/O fails.
    pub fn delete(&self, id: &IndexKey) -> Result<bool, DbError> {
        let _guard = self.collection_lock.lock();
        let mut state = self.state.write();
        let Some(&location) = state.primary.search(&self.engine, 0, id)?.first() else {
            return Ok(false);
        };
        let doc = self.read_at(location)?;

        let mut txn = self.engine.begin_transaction();
        state.primary.delete(&mut txn, id, location)?;
        state.indexes.delete_from_all(&mut txn, &doc, location)?;
        storage_io::free_entity_storage(&self.engine, &mut txn, location)?;
        txn.commit()?;
        self.persist_catalog(&state)?;
        Ok(true)
    }

    /// Assigns a freshly generated identity to `doc` when its identity field
    /// is unassigned (all-zero, per `mapper.get_id`), using the width the
    /// mapper's `key_kind` calls for; otherwise returns the identity already
    /// present.
    fn assign_id(&self, doc: &mut BsonDocument) -> IndexKey {
        let existing = self.mapper.get_id(doc);
        if !is_unassigned(&existing) {
            return existing;
        }
        let generated = match self.mapper.key_kind() {
            KeyKind::ObjectId => IndexKey(ObjectId::new().0.to_vec()),
            KeyKind::Guid => IndexKey(Guid::new().0.to_vec()),
            KeyKind::Other => existing,
        };
        self.mapper.set_id(doc, &generated);
        generated
    }
}

fn is_unassigned(key: &IndexKey) -> bool {
    let bytes = key.as_bytes();
    !bytes.is_empty() && bytes.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::config::StorageConfig;
    use crate::document::envelope::KeyDictionary;
    use crate::mapper::BsonMapper;
    use crate::storage::engine::StorageEngine;
    use bson::doc;
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
    fn insert_assigns_an_object_id_and_round_trips() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("o1.blite"));
        let stored = col.insert(doc! {"name": "ada"}).unwrap();
        let id = col.mapper.get_id(&stored);
        let found = col.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.get_str("name").unwrap(), "ada");
    }

    #[test]
    fn update_then_delete_round_trips() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("o2.blite"));
        let stored = col.insert(doc! {"name": "ada", "age": 30i32}).unwrap();
        let id = col.mapper.get_id(&stored);

        let updated = col.update(&id, doc! {"name": "ada", "age": 31i32}).unwrap();
        assert_eq!(updated.get_i32("age").unwrap(), 31);
        assert_eq!(col.find_by_id(&id).unwrap().unwrap().get_i32("age").unwrap(), 31);

        assert!(col.delete(&id).unwrap());
        assert!(col.find_by_id(&id).unwrap().is_none());
        assert!(!col.delete(&id).unwrap());
    }

    #[test]
    fn find_all_and_count_reflect_live_documents() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("o3.blite"));
        for i in 0..5 {
            col.insert(doc! {"i": i}).unwrap();
        }
        assert_eq!(col.count().unwrap(), 5);
        assert_eq!(col.find_all().unwrap().len(), 5);
    }

    #[test]
    fn scan_materializes_only_documents_the_predicate_accepts() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("o5.blite"));
        for name in ["ada", "bob", "cleo"] {
            col.insert(doc! {"name": name}).unwrap();
        }
        let matched = col.scan(|bytes| bytes.windows(3).any(|w| w == b"bob")).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].get_str("name").unwrap(), "bob");
    }

    #[test]
    fn growing_an_update_relocates_rather_than_corrupting() {
        let dir = tempdir().unwrap();
        let col = fresh_collection(&dir.path().join("o4.blite"));
        let stored = col.insert(doc! {"blob": "x"}).unwrap();
        let id = col.mapper.get_id(&stored);
        let big = "y".repeat(8000);
        let updated = col.update(&id, doc! {"blob": big.clone()}).unwrap();
        assert_eq!(updated.get_str("blob").unwrap(), big);
        assert_eq!(col.find_by_id(&id).unwrap().unwrap().get_str("blob").unwrap(), big);
    }
}
