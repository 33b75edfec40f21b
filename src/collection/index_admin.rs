//! §4.8: secondary-index administration on a `Collection` — create (rebuild
//! by scanning every live document), drop, list, and a range query — mirroring
//! the teacher's `collection/index_admin.rs`, generalized from a single
//! hash/B-tree choice to `blite`'s one persistent `BTreeIndex` shape.

use super::Collection;
use crate::btree::IndexKey;
use crate::catalog::IndexEntry;
use crate::errors::DbError;
use crate::mapper::DocumentMapper;
use crate::types::{DocumentLocation, TransactionId};
use bson::Document as BsonDocument;

impl<M: DocumentMapper<BsonDocument>> Collection<M> {
    /// Creates a secondary index named `name` over `property_path`, rebuilding
    /// it from every document currently in the collection.
    ///
    /// # Errors
    /// Returns `IndexAlreadyExists` if `name` is taken, or an error if the
    /// index's pages can't be allocated or written.
    pub fn create_index(&self, name: &str, property_path: &str, unique: bool) -> Result<(), DbError> {
        let _guard = self.collection_lock.lock();
        let mut state = self.state.write();
        let existing: Vec<(BsonDocument, DocumentLocation)> = self
            .scan_locations()?
            .into_iter()
            .map(|(_, location)| self.read_at(location).map(|doc| (doc, location)))
            .collect::<Result<_, DbError>>()?;

        let mut txn = self.engine.begin_transaction();
        state.indexes.create_index(&self.engine, &mut txn, name, property_path, unique, &existing)?;
        txn.commit()?;
        self.persist_catalog(&state)?;
        Ok(())
    }

    /// Creates the index named `name` only if it isn't already registered;
    /// a convenience wrapper so callers don't need to pre-check
    /// `get_indexes` before every `create_index` call.
    ///
    /// # Errors
    /// Returns an error if creation fails for a reason other than the index
    /// already existing.
    pub fn ensure_index(&self, name: &str, property_path: &str, unique: bool) -> Result<(), DbError> {
        if self.get_indexes().iter().any(|e| e.name == name) {
            return Ok(());
        }
        match self.create_index(name, property_path, unique) {
            Ok(()) | Err(DbError::IndexAlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drops the secondary index named `name`.
    ///
    /// # Errors
    /// Returns `NoSuchIndex` if `name` isn't registered.
    pub fn drop_index(&self, name: &str) -> Result<(), DbError> {
        let _guard = self.collection_lock.lock();
        let mut state = self.state.write();
        state.indexes.drop_index(name)?;
        self.persist_catalog(&state)
    }

    /// Lists every secondary index currently registered.
    #[must_use]
    pub fn get_indexes(&self) -> Vec<IndexEntry> {
        self.state.read().indexes.get_indexes().to_vec()
    }

    /// Ascending or descending range query against a named secondary index,
    /// returning the matching `(key, location)` pairs.
    ///
    /// # Errors
    /// Returns `NoSuchIndex` if `name` isn't registered, or an I/O error.
    pub fn query_index(
        &self,
        name: &str,
        min: &IndexKey,
        max: &IndexKey,
        ascending: bool,
    ) -> Result<Vec<(IndexKey, DocumentLocation)>, DbError> {
        self.query_index_in(name, min, max, ascending, 0)
    }

    /// As `query_index`, but visible as of `txn` rather than the committed
    /// snapshot.
    ///
    /// # Errors
    /// Returns `NoSuchIndex` if `name` isn't registered, or an I/O error.
    pub fn query_index_in(
        &self,
        name: &str,
        min: &IndexKey,
        max: &IndexKey,
        ascending: bool,
        txn: TransactionId,
    ) -> Result<Vec<(IndexKey, DocumentLocation)>, DbError> {
        self.state.read().indexes.query_index(&self.engine, txn, name, min, max, ascending)
    }
}
