//! §4.7: `DocumentCollection` — the layer that ties a primary `BTreeIndex`,
//! an `IndexManager` for secondary indexes, and the document envelope codec
//! together behind a single-writer lock per collection.
//!
//! `Collection<M>` is generic over the document mapper (§1/§9's external
//! collaborator contract), but is concretely instantiated as
//! `Collection<BsonMapper>` everywhere in this crate: every entity is a plain
//! `bson::Document`, so secondary-index projection goes straight through
//! `index_manager::project_key` rather than back through the mapper's
//! `to_index_key` (kept on the trait for mappers over some other `T`).

mod index_admin;
mod ops;
mod storage_io;

use crate::btree::{BTreeIndex, IndexKey};
use crate::catalog::{self, CatalogEntry};
use crate::document::envelope::KeyDictionary;
use crate::errors::DbError;
use crate::index_manager::IndexManager;
use crate::mapper::{BsonMapper, DocumentMapper};
use crate::storage::engine::{StorageEngine, Transaction};
use crate::types::{PageId, SchemaVersion};
use bson::Document as BsonDocument;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Mutable state guarded by `Collection::state`; everything here is either
/// rebuilt from `CatalogEntry` on open or advanced by a mutating operation.
struct CollectionState {
    primary: BTreeIndex,
    indexes: IndexManager,
    schema_root_page_id: PageId,
    schema_version: i32,
    /// Last data page known to have free space; `0` means "allocate a fresh
    /// one". Not persisted across reopen (§9: packing efficiency after
    /// reopen is a documented, acceptable simplification — see `DESIGN.md`).
    current_page: PageId,
}

/// One collection: a named, independently-locked document store backed by
/// one primary `BTreeIndex` over `_id` plus zero or more secondary indexes.
pub struct Collection<M: DocumentMapper<BsonDocument> = BsonMapper> {
    name: String,
    engine: Arc<StorageEngine>,
    catalog: Arc<Mutex<Vec<CatalogEntry>>>,
    mapper: M,
    dict: Arc<RwLock<KeyDictionary>>,
    state: RwLock<CollectionState>,
    /// Guards the whole of every mutating operation (§4.5/§4.7's "single
    /// writer"), mirroring the teacher's `build_lock: RwLock<()>` in
    /// `collection/core.rs`, generalized from "index building only" to every
    /// mutating path.
    collection_lock: Mutex<()>,
}

impl<M: DocumentMapper<BsonDocument>> Collection<M> {
    /// Reconstructs (or freshly initializes) a collection from its persisted
    /// `CatalogEntry`, bumping its schema history if `mapper`'s reported
    /// schema doesn't match the latest persisted one.
    pub(crate) fn new(
        name: String,
        engine: Arc<StorageEngine>,
        catalog: Arc<Mutex<Vec<CatalogEntry>>>,
        entry: &CatalogEntry,
        mapper: M,
        dict: Arc<RwLock<KeyDictionary>>,
    ) -> Result<Self, DbError> {
        let primary = BTreeIndex::new(entry.primary_root_page_id, true);
        let indexes = IndexManager::from_entries(entry.secondary_indexes.clone());
        let desired = mapper.get_schema();
        let history = load_schema_history(&engine, entry.schema_root_page_id)?;
        let (schema_root_page_id, schema_version) =
            advance_schema_history(&engine, entry.schema_root_page_id, &history, desired)?;
        let state = CollectionState { primary, indexes, schema_root_page_id, schema_version, current_page: 0 };
        Ok(Self { name, engine, catalog, mapper, dict, state: RwLock::new(state), collection_lock: Mutex::new(()) })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a transaction against this collection's engine, for callers
    /// that want to read their own uncommitted writes across several
    /// operations (e.g. `insert` followed by `find_by_id_in` before commit)
    /// rather than each call opening and closing its own transaction.
    #[must_use]
    pub fn begin_transaction(&self) -> Transaction {
        self.engine.begin_transaction()
    }

    /// Rewrites this collection's `CatalogEntry` within the shared catalog
    /// list, capturing whatever `state`/`dict` currently hold.
    fn persist_catalog(&self, state: &CollectionState) -> Result<(), DbError> {
        let mut collections = self.catalog.lock();
        let snapshot = CatalogEntry {
            name: self.name.clone(),
            primary_root_page_id: state.primary.root_page_id(),
            schema_root_page_id: state.schema_root_page_id,
            secondary_indexes: state.indexes.get_indexes().to_vec(),
            key_dictionary: self.dict.read().entries().to_vec(),
        };
        match collections.iter_mut().find(|e| e.name == self.name) {
            Some(slot) => *slot = snapshot,
            None => collections.push(snapshot),
        }
        catalog::save_all(&self.engine, collections.clone())
    }
}

fn load_schema_history(engine: &StorageEngine, root: PageId) -> Result<Vec<SchemaVersion>, DbError> {
    if root == 0 {
        return Ok(Vec::new());
    }
    let bytes = catalog::read_chain(engine, root)?;
    let (history, _): (Vec<SchemaVersion>, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(history)
}

/// Appends `desired` to `history` and persists the chain only if its hash
/// differs from the latest entry; returns the (possibly unchanged) chain root
/// and schema version to use.
fn advance_schema_history(
    engine: &StorageEngine,
    schema_root_page_id: PageId,
    history: &[SchemaVersion],
    desired: SchemaVersion,
) -> Result<(PageId, i32), DbError> {
    if let Some(last) = history.last() {
        if last.hash == desired.hash {
            return Ok((schema_root_page_id, last.version));
        }
    }
    let version = history.last().map_or(1, |last| last.version + 1);
    let mut updated = history.to_vec();
    updated.push(SchemaVersion { version, hash: desired.hash });
    let bytes = bincode::serde::encode_to_vec(&updated, bincode::config::standard())?;
    let first_page = if schema_root_page_id == 0 { None } else { Some(schema_root_page_id) };
    let new_root = catalog::write_chain(engine, first_page, &bytes)?;
    Ok((new_root, version))
}
