#![forbid(unsafe_code)]
//! `blite`: an embedded, single-process document database — a page-file
//! storage engine with write-ahead-log durability, a persistent B+Tree
//! index with MVCC-visible range scans, a document collection layer atop a
//! pluggable serialization contract, and an index-aware query evaluator
//! with a Mongo-ish JSON filter dialect (BLQL).
//!
//! The crate has no notion of a "default" collection shape: every entity
//! that crosses into storage does so through a [`mapper::DocumentMapper`]
//! implementation. [`mapper::BsonMapper`] — plain `bson::Document` entities
//! — is the one bundled here and is what [`Database`] hands out.

pub mod btree;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod document;
pub mod errors;
pub mod index_manager;
pub mod mapper;
pub mod query;
pub mod storage;
pub mod types;
pub mod utils;

pub use collection::Collection;
pub use config::StorageConfig;
pub use errors::DbError;
pub use mapper::{BsonMapper, DocumentMapper};
pub use storage::engine::{StorageEngine, Transaction, TransactionState};
pub use types::{DocumentLocation, Guid, KeyKind, ObjectId, PageId, SchemaVersion, TransactionId};

use catalog::CatalogEntry;
use document::envelope::KeyDictionary;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// The top-level handle to a BLite database file: owns the [`StorageEngine`]
/// and the shared catalog of collections, and hands out [`Collection`]s
/// backed by it. Cheap to clone the handles it returns — every `Collection`
/// shares this `Database`'s engine and catalog through an `Arc`.
pub struct Database {
    engine: Arc<StorageEngine>,
    catalog: Arc<Mutex<Vec<CatalogEntry>>>,
    dicts: Mutex<HashMap<String, Arc<RwLock<KeyDictionary>>>>,
}

impl Database {
    /// Creates a new database file at `name_or_path`, failing if it already
    /// exists. A bare name with no extension is given `.blite`.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid or the file already exists.
    pub fn create(name_or_path: &str, config: StorageConfig) -> Result<Self, DbError> {
        let path = utils::fsutil::normalize_db_path(Some(name_or_path));
        let engine = Arc::new(StorageEngine::create(&path, config)?);
        Ok(Self { engine, catalog: Arc::new(Mutex::new(Vec::new())), dicts: Mutex::new(HashMap::new()) })
    }

    /// Opens an existing database file, replaying its write-ahead log and
    /// loading its catalog of collections (§4.4 Recovery).
    ///
    /// # Errors
    /// Returns an error if the file is missing, corrupted, or its page size
    /// doesn't match `config`.
    pub fn open(name_or_path: &str, config: StorageConfig) -> Result<Self, DbError> {
        let path = utils::fsutil::normalize_db_path(Some(name_or_path));
        let engine = Arc::new(StorageEngine::open(&path, config)?);
        let entries = catalog::load_all(&engine)?;
        let mut dicts = HashMap::with_capacity(entries.len());
        for entry in &entries {
            let dict = KeyDictionary::from_entries(entry.key_dictionary.clone());
            dicts.insert(entry.name.clone(), Arc::new(RwLock::new(dict)));
        }
        Ok(Self { engine, catalog: Arc::new(Mutex::new(entries)), dicts: Mutex::new(dicts) })
    }

    /// Creates a new, empty collection named `name`.
    ///
    /// # Errors
    /// Returns `CollectionAlreadyExists` if `name` is already registered.
    pub fn create_collection(&self, name: &str) -> Result<Collection<BsonMapper>, DbError> {
        let mut collections = self.catalog.lock();
        if collections.iter().any(|e| e.name == name) {
            return Err(DbError::CollectionAlreadyExists(name.to_string()));
        }
        let primary_root = self.engine.allocate_page()?;
        let entry = CatalogEntry::new(name.to_string(), primary_root);
        collections.push(entry.clone());
        catalog::save_all(&self.engine, collections.clone())?;
        drop(collections);

        let dict = Arc::new(RwLock::new(KeyDictionary::default()));
        self.dicts.lock().insert(name.to_string(), Arc::clone(&dict));
        Collection::new(name.to_string(), Arc::clone(&self.engine), Arc::clone(&self.catalog), &entry, BsonMapper::new(Arc::clone(&dict)), dict)
    }

    /// Opens an already-existing collection named `name`.
    ///
    /// # Errors
    /// Returns `NoSuchCollection` if `name` isn't registered.
    pub fn collection(&self, name: &str) -> Result<Collection<BsonMapper>, DbError> {
        let collections = self.catalog.lock();
        let entry = collections.iter().find(|e| e.name == name).ok_or_else(|| DbError::NoSuchCollection(name.to_string()))?.clone();
        drop(collections);

        let dict = {
            let mut dicts = self.dicts.lock();
            Arc::clone(dicts.entry(name.to_string()).or_insert_with(|| Arc::new(RwLock::new(KeyDictionary::from_entries(entry.key_dictionary.clone())))))
        };
        Collection::new(name.to_string(), Arc::clone(&self.engine), Arc::clone(&self.catalog), &entry, BsonMapper::new(Arc::clone(&dict)), dict)
    }

    /// Opens `name`, creating it first if it doesn't already exist.
    ///
    /// # Errors
    /// Returns an error if the create-then-open path fails for any reason
    /// other than the collection already existing.
    pub fn open_or_create_collection(&self, name: &str) -> Result<Collection<BsonMapper>, DbError> {
        match self.create_collection(name) {
            Ok(collection) => Ok(collection),
            Err(DbError::CollectionAlreadyExists(_)) => self.collection(name),
            Err(e) => Err(e),
        }
    }

    /// Drops the collection named `name` from the catalog. The pages its
    /// primary/secondary indexes and documents occupied are not reclaimed —
    /// only a collection-aware sweep (not implemented) could free them
    /// safely, so dropping a collection trades some wasted space for a
    /// simple, always-correct catalog update.
    ///
    /// # Errors
    /// Returns `NoSuchCollection` if `name` isn't registered.
    pub fn drop_collection(&self, name: &str) -> Result<(), DbError> {
        let mut collections = self.catalog.lock();
        let before = collections.len();
        collections.retain(|e| e.name != name);
        if collections.len() == before {
            return Err(DbError::NoSuchCollection(name.to_string()));
        }
        catalog::save_all(&self.engine, collections.clone())?;
        drop(collections);
        self.dicts.lock().remove(name);
        Ok(())
    }

    /// Names of every collection currently registered, in catalog order.
    #[must_use]
    pub fn list_collections(&self) -> Vec<String> {
        self.catalog.lock().iter().map(|e| e.name.clone()).collect()
    }

    /// Flushes every committed page to the underlying file and truncates
    /// the write-ahead log (§4.4 Checkpoint).
    ///
    /// # Errors
    /// Returns an error if any underlying I/O fails.
    pub fn checkpoint(&self) -> Result<(), DbError> {
        self.engine.checkpoint()
    }

    /// The page size this database was created with.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.engine.page_size()
    }

    /// Starts a transaction directly against the database's storage engine,
    /// for callers composing a multi-collection unit of work by hand.
    #[must_use]
    pub fn begin_transaction(&self) -> Transaction {
        self.engine.begin_transaction()
    }
}
