//! §4.8: per-collection secondary index management — the catalog of
//! secondary indexes, document-event fan-out (`insert_into_all`/
//! `update_in_all`/`delete_from_all`), and rebuild-by-scan on
//! `create_index`.

use crate::btree::{BTreeIndex, IndexKey};
use crate::catalog::IndexEntry;
use crate::errors::DbError;
use crate::storage::engine::{StorageEngine, Transaction};
use crate::types::DocumentLocation;
use bson::{Bson, Document as BsonDocument};
use log::warn;
use std::collections::HashMap;

/// Projects the value at `path` (a single field name; dotted paths walk
/// nested documents) out of `doc` and encodes it as an `IndexKey`, or
/// returns `None` if the field is absent or of an unsupported type.
#[must_use]
pub fn project_key(doc: &BsonDocument, path: &str) -> Option<IndexKey> {
    let mut current: &Bson = doc.get(path.split('.').next()?)?;
    for segment in path.split('.').skip(1) {
        current = current.as_document()?.get(segment)?;
    }
    bson_to_index_key(current)
}

/// Encodes a literal `Bson` value as an `IndexKey`, the same mapping
/// `project_key` applies to a projected field value; used by the query
/// optimizer to turn a filter's comparison constant into a range bound.
#[must_use]
pub fn bson_to_index_key(value: &Bson) -> Option<IndexKey> {
    match value {
        Bson::String(s) => Some(IndexKey::from_str(s)),
        Bson::Int32(i) => Some(IndexKey::from_i32(*i)),
        Bson::Int64(i) => Some(IndexKey::from_i64(*i)),
        Bson::Double(d) => Some(IndexKey::from_f64(*d)),
        Bson::Boolean(b) => Some(IndexKey::from_bool(*b)),
        Bson::ObjectId(oid) => Some(IndexKey(oid.bytes().to_vec())),
        Bson::DateTime(dt) => Some(IndexKey::from_i64(dt.timestamp_millis())),
        _ => None,
    }
}

/// Owns every secondary index for one collection, keyed by index name.
pub struct IndexManager {
    entries: Vec<IndexEntry>,
    trees: HashMap<String, BTreeIndex>,
}

impl IndexManager {
    /// Reconstructs an `IndexManager` from persisted catalog descriptors.
    #[must_use]
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let trees = entries.iter().map(|e| (e.name.clone(), BTreeIndex::new(e.root_page_id, e.unique))).collect();
        Self { entries, trees }
    }

    #[must_use]
    pub fn get_indexes(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Creates a new secondary index over `property_path`, rebuilding it by
    /// scanning `existing` (every live document with its primary location).
    /// Entries that fail to project (field absent / wrong type) are skipped
    /// and logged, per §4.8.
    ///
    /// # Errors
    /// Returns `IndexAlreadyExists` if `name` is already in use, or an error
    /// if the new index's pages cannot be allocated/written.
    pub fn create_index(
        &mut self,
        engine: &StorageEngine,
        txn: &mut Transaction,
        name: &str,
        property_path: &str,
        unique: bool,
        existing: &[(BsonDocument, DocumentLocation)],
    ) -> Result<(), DbError> {
        if self.trees.contains_key(name) {
            return Err(DbError::IndexAlreadyExists(name.to_string()));
        }
        let mut tree = BTreeIndex::create_empty(engine, unique)?;
        for (doc, location) in existing {
            match project_key(doc, property_path) {
                Some(key) => {
                    if let Err(e) = tree.insert(engine, txn, key, *location, name) {
                        warn!("index {name}: skipping entity at {location:?} during rebuild: {e}");
                    }
                }
                None => warn!("index {name}: entity at {location:?} has no value at path {property_path:?}, skipping"),
            }
        }
        self.entries.push(IndexEntry {
            name: name.to_string(),
            unique,
            property_paths: vec![property_path.to_string()],
            root_page_id: tree.root_page_id(),
        });
        self.trees.insert(name.to_string(), tree);
        Ok(())
    }

    /// Drops an index by name.
    ///
    /// # Errors
    /// Returns `NoSuchIndex` if `name` isn't registered.
    pub fn drop_index(&mut self, name: &str) -> Result<(), DbError> {
        if self.trees.remove(name).is_none() {
            return Err(DbError::NoSuchIndex(name.to_string()));
        }
        self.entries.retain(|e| e.name != name);
        Ok(())
    }

    /// Inserts `(projected_key, location)` into every secondary index whose
    /// path resolves on `doc`.
    ///
    /// # Errors
    /// Returns `UniqueViolation` if a unique secondary index's key already
    /// exists, or an I/O error.
    pub fn insert_into_all(
        &mut self,
        engine: &StorageEngine,
        txn: &mut Transaction,
        doc: &BsonDocument,
        location: DocumentLocation,
    ) -> Result<(), DbError> {
        for entry in &self.entries {
            let Some(path) = entry.property_paths.first() else { continue };
            let Some(key) = project_key(doc, path) else { continue };
            let tree = self.trees.get_mut(&entry.name).expect("catalog entry without a loaded tree");
            tree.insert(engine, txn, key, location, &entry.name)?;
        }
        Ok(())
    }

    /// For each index, skips it if the projected key didn't change; else
    /// deletes `(old_key, old_location)` and inserts `(new_key, new_location)`.
    ///
    /// # Errors
    /// Returns `UniqueViolation` or an I/O error.
    pub fn update_in_all(
        &mut self,
        engine: &StorageEngine,
        txn: &mut Transaction,
        old_doc: &BsonDocument,
        new_doc: &BsonDocument,
        old_location: DocumentLocation,
        new_location: DocumentLocation,
    ) -> Result<(), DbError> {
        for entry in &self.entries {
            let Some(path) = entry.property_paths.first() else { continue };
            let old_key = project_key(old_doc, path);
            let new_key = project_key(new_doc, path);
            if old_key == new_key && old_location == new_location {
                continue;
            }
            let tree = self.trees.get_mut(&entry.name).expect("catalog entry without a loaded tree");
            if let Some(ref k) = old_key {
                tree.delete(txn, k, old_location)?;
            }
            if let Some(k) = new_key {
                tree.insert(engine, txn, k, new_location, &entry.name)?;
            }
        }
        Ok(())
    }

    /// Removes `(projected_key, location)` from every secondary index.
    ///
    /// # Errors
    /// Returns an I/O error.
    pub fn delete_from_all(
        &mut self,
        txn: &mut Transaction,
        doc: &BsonDocument,
        location: DocumentLocation,
    ) -> Result<(), DbError> {
        for entry in &self.entries {
            let Some(path) = entry.property_paths.first() else { continue };
            let Some(key) = project_key(doc, path) else { continue };
            let tree = self.trees.get_mut(&entry.name).expect("catalog entry without a loaded tree");
            tree.delete(txn, &key, location)?;
        }
        Ok(())
    }

    /// Ascending or descending range query against a named secondary index.
    ///
    /// # Errors
    /// Returns `NoSuchIndex` if `name` isn't registered, or an I/O error.
    pub fn query_index(
        &self,
        engine: &StorageEngine,
        txn: u64,
        name: &str,
        min: &IndexKey,
        max: &IndexKey,
        ascending: bool,
    ) -> Result<Vec<(IndexKey, DocumentLocation)>, DbError> {
        let tree = self.trees.get(name).ok_or_else(|| DbError::NoSuchIndex(name.to_string()))?;
        let mut results = tree.range_scan(engine, txn, min, max)?;
        if !ascending {
            results.reverse();
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use bson::doc;
    use tempfile::tempdir;

    fn cfg() -> StorageConfig {
        StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
    }

    #[test]
    fn create_index_rebuilds_from_existing_documents() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("im.blite"), cfg()).unwrap();
        let mut manager = IndexManager::from_entries(Vec::new());
        let mut txn = engine.begin_transaction();
        let docs = vec![
            (doc! {"age": 30i32}, DocumentLocation::new(1, 0)),
            (doc! {"age": 25i32}, DocumentLocation::new(1, 1)),
        ];
        manager.create_index(&engine, &mut txn, "by_age", "age", false, &docs).unwrap();
        txn.commit().unwrap();

        let results = manager.query_index(&engine, 0, "by_age", &IndexKey::min(), &IndexKey::max(), true).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn update_in_all_reindexes_on_key_change() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("im2.blite"), cfg()).unwrap();
        let mut manager = IndexManager::from_entries(Vec::new());
        let mut txn = engine.begin_transaction();
        manager.create_index(&engine, &mut txn, "by_age", "age", false, &[]).unwrap();
        let loc = DocumentLocation::new(1, 0);
        manager.insert_into_all(&engine, &mut txn, &doc! {"age": 10i32}, loc).unwrap();
        manager.update_in_all(&engine, &mut txn, &doc! {"age": 10i32}, &doc! {"age": 20i32}, loc, loc).unwrap();
        txn.commit().unwrap();

        let old = manager.query_index(&engine, 0, "by_age", &IndexKey::from_i32(10), &IndexKey::from_i32(10), true).unwrap();
        assert!(old.is_empty());
        let new = manager.query_index(&engine, 0, "by_age", &IndexKey::from_i32(20), &IndexKey::from_i32(20), true).unwrap();
        assert_eq!(new.len(), 1);
    }
}
