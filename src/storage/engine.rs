//! §4.4: the façade composing `PageFile` + `WriteAheadLog` + `BufferManager`
//! into the transaction lifecycle (begin/commit/rollback), checkpoint and
//! crash recovery described in §3/§4.4/§4.2.

use crate::config::StorageConfig;
use crate::errors::DbError;
use crate::storage::buffer_manager::BufferManager;
use crate::storage::page_file::PageFile;
use crate::storage::wal::{Record, WriteAheadLog};
use crate::types::{PageId, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Preparing,
    Committed,
    Aborted,
}

/// The shared engine state. Kept separate from `StorageEngine` so it can be
/// wrapped in an `Arc` and handed to `Transaction` without a back-reference
/// cycle through `StorageEngine` itself.
struct Shared {
    page_file: PageFile,
    wal: WriteAheadLog,
    buffers: BufferManager,
    next_txn_id: AtomicU64,
    checkpoint_lock: Mutex<()>,
}

/// Composes the page file, WAL and buffer manager into a single engine per
/// §4.4. Safe for concurrent use: each owned component serializes its own
/// access internally (§5's "`StorageEngine` itself is safe for concurrent
/// use").
pub struct StorageEngine {
    shared: Arc<Shared>,
}

impl StorageEngine {
    /// Creates a new database at `path` (and its sibling WAL file), failing
    /// if either already exists.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid or either file cannot be created.
    pub fn create(path: &Path, config: StorageConfig) -> Result<Self, DbError> {
        let page_file = PageFile::create(path, config)?;
        let wal = WriteAheadLog::open(&wal_path(path))?;
        let engine = Self {
            shared: Arc::new(Shared {
                page_file,
                wal,
                buffers: BufferManager::new(),
                next_txn_id: AtomicU64::new(1),
                checkpoint_lock: Mutex::new(()),
            }),
        };
        Ok(engine)
    }

    /// Opens an existing database at `path`, replaying its WAL per §4.4's
    /// recovery procedure before returning.
    ///
    /// # Errors
    /// Returns an error if the files are missing, corrupted, or mismatched
    /// against `config`.
    pub fn open(path: &Path, config: StorageConfig) -> Result<Self, DbError> {
        let page_file = PageFile::open(path, config)?;
        let wal = WriteAheadLog::open(&wal_path(path))?;
        let engine = Self {
            shared: Arc::new(Shared {
                page_file,
                wal,
                buffers: BufferManager::new(),
                next_txn_id: AtomicU64::new(1),
                checkpoint_lock: Mutex::new(()),
            }),
        };
        engine.recover()?;
        // `recover` may have bumped the persisted watermark past whatever was
        // on disk when `page_file` was opened; load the final value now.
        let next_txn_id = engine.shared.page_file.next_txn_id().max(1);
        engine.shared.next_txn_id.store(next_txn_id, Ordering::SeqCst);
        Ok(engine)
    }

    #[must_use]
    pub fn page_file(&self) -> &PageFile {
        &self.shared.page_file
    }

    /// Starts a new transaction. The returned handle rolls back on `Drop`
    /// unless it has already committed (§3's "Disposal of an Active/Preparing
    /// transaction triggers Rollback").
    pub fn begin_transaction(&self) -> Transaction {
        let id = self.shared.next_txn_id.fetch_add(1, Ordering::SeqCst);
        Transaction { shared: Arc::clone(&self.shared), id, state: TransactionState::Active, disposed: false }
    }

    /// Reads page `id` as of `txn`: the transaction's own uncommitted write,
    /// else the committed snapshot, else the page file (§4.3's RYOW order).
    /// `txn == 0` reads only the committed/file layers.
    ///
    /// # Errors
    /// Returns an error if the underlying page file read fails.
    pub fn read_page(&self, txn: TransactionId, id: PageId) -> Result<Vec<u8>, DbError> {
        if txn != 0 {
            if let Some(bytes) = self.shared.buffers.read(txn, id) {
                return Ok(bytes);
            }
        } else if let Some(bytes) = self.shared.buffers.read(0, id) {
            return Ok(bytes);
        }
        let page_size = self.shared.page_file.page_size() as usize;
        let mut buf = vec![0u8; page_size];
        self.shared.page_file.read_page(id, &mut buf)?;
        Ok(buf)
    }

    pub fn allocate_page(&self) -> Result<PageId, DbError> {
        self.shared.page_file.allocate_page()
    }

    pub fn free_page(&self, id: PageId) -> Result<(), DbError> {
        self.shared.page_file.free_page(id)
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.shared.page_file.page_size()
    }

    #[must_use]
    pub fn catalog_root(&self) -> PageId {
        self.shared.page_file.catalog_root()
    }

    pub fn set_catalog_root(&self, root: PageId) -> Result<(), DbError> {
        self.shared.page_file.set_catalog_root(root)
    }

    /// Checkpoints: flushes every committed-but-unflushed page to the page
    /// file, flushes the file, clears the committed buffer, then truncates
    /// the WAL. Runs under `checkpoint_lock` to exclude concurrent commits
    /// from interleaving with the flush (§4.4).
    ///
    /// # Errors
    /// Returns an error if any underlying I/O fails.
    pub fn checkpoint(&self) -> Result<(), DbError> {
        let _guard = self.shared.checkpoint_lock.lock();
        for (page_id, bytes) in self.shared.buffers.committed_snapshot() {
            self.shared.page_file.write_page(page_id, &bytes)?;
        }
        self.shared.page_file.flush()?;
        self.shared.buffers.clear_committed();
        self.shared.wal.truncate()?;
        Ok(())
    }

    /// Replays the WAL, reapplying every transaction whose `Commit` record
    /// is present, in WAL order, then flushes and truncates (§4.4 Recovery).
    fn recover(&self) -> Result<(), DbError> {
        let records = self.shared.wal.read_all()?;
        let mut writes: HashMap<TransactionId, Vec<(PageId, Vec<u8>)>> = HashMap::new();
        let mut committed: Vec<TransactionId> = Vec::new();
        for record in records {
            match record {
                Record::Begin { .. } => {}
                Record::Write { txn, page_id, after } => {
                    writes.entry(txn).or_default().push((page_id, after));
                }
                Record::Commit { txn, .. } => committed.push(txn),
                Record::Abort { txn, .. } => {
                    writes.remove(&txn);
                }
            }
        }
        for &txn in &committed {
            if let Some(pages) = writes.get(&txn) {
                for (page_id, bytes) in pages {
                    self.shared.page_file.write_page(*page_id, bytes)?;
                }
            }
        }
        if let Some(&max_committed) = committed.iter().max() {
            self.shared.page_file.bump_next_txn_id(max_committed + 1)?;
        }
        self.shared.page_file.flush()?;
        self.shared.wal.truncate()?;
        Ok(())
    }
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut p = db_path.as_os_str().to_owned();
    p.push(".wal");
    PathBuf::from(p)
}

/// A single transaction. Owned by one thread (§5's "passing it across
/// threads is undefined"); rolls back automatically if dropped while still
/// `Active`/`Preparing`.
pub struct Transaction {
    shared: Arc<Shared>,
    id: TransactionId,
    state: TransactionState,
    disposed: bool,
}

impl Transaction {
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Buffers a page write under this transaction. Only `Active` may accept
    /// writes.
    ///
    /// # Errors
    /// Returns `InvalidTransactionState` if the transaction is not `Active`.
    pub fn write_page(&mut self, page_id: PageId, after_image: Vec<u8>) -> Result<(), DbError> {
        if self.state != TransactionState::Active {
            return Err(DbError::InvalidTransactionState(format!(
                "cannot write page {page_id} on a transaction in state {:?}",
                self.state
            )));
        }
        self.shared.buffers.write(self.id, page_id, after_image);
        Ok(())
    }

    /// Reads a page as of this transaction (RYOW).
    ///
    /// # Errors
    /// Returns an error if the underlying page file read fails.
    pub fn read_page(&self, page_id: PageId) -> Result<Vec<u8>, DbError> {
        if let Some(bytes) = self.shared.buffers.read(self.id, page_id) {
            return Ok(bytes);
        }
        let page_size = self.shared.page_file.page_size() as usize;
        let mut buf = vec![0u8; page_size];
        self.shared.page_file.read_page(page_id, &mut buf)?;
        Ok(buf)
    }

    /// Commit protocol (§4.4): append a `Write` record per buffered page,
    /// append `Commit`, flush the WAL, then promote the pages into the
    /// committed buffer. The page file itself is untouched until checkpoint.
    ///
    /// # Errors
    /// Returns an error if any WAL append or flush fails; the transaction is
    /// left `Active` so its `Drop` impl rolls it back.
    pub fn commit(mut self) -> Result<(), DbError> {
        self.commit_inner()?;
        self.disposed = true;
        Ok(())
    }

    fn commit_inner(&mut self) -> Result<(), DbError> {
        if self.state != TransactionState::Active {
            return Err(DbError::InvalidTransactionState(format!(
                "cannot commit a transaction in state {:?}",
                self.state
            )));
        }
        self.state = TransactionState::Preparing;
        self.shared.wal.append_begin(self.id)?;
        for (page_id, bytes) in self.shared.buffers.txn_pages_snapshot(self.id) {
            self.shared.wal.append_write(self.id, page_id, &bytes)?;
        }
        self.shared.wal.append_commit(self.id)?;
        self.shared.wal.flush()?;
        self.shared.buffers.commit(self.id);
        self.shared.page_file.bump_next_txn_id(self.id + 1)?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Explicitly rolls back, discarding buffered writes without touching
    /// the WAL.
    pub fn rollback(mut self) {
        self.rollback_inner();
        self.disposed = true;
    }

    fn rollback_inner(&mut self) {
        if self.state == TransactionState::Active || self.state == TransactionState::Preparing {
            self.shared.buffers.rollback(self.id);
            self.state = TransactionState::Aborted;
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.disposed {
            self.rollback_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg() -> StorageConfig {
        StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
    }

    #[test]
    fn commit_persists_pages_after_checkpoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e1.blite");
        let engine = StorageEngine::create(&path, cfg()).unwrap();
        let page_id = engine.allocate_page().unwrap();
        let mut txn = engine.begin_transaction();
        txn.write_page(page_id, vec![7u8; 4096]).unwrap();
        txn.commit().unwrap();

        let read_back = engine.read_page(0, page_id).unwrap();
        assert_eq!(read_back, vec![7u8; 4096]);

        engine.checkpoint().unwrap();
        let from_file = engine.read_page(0, page_id).unwrap();
        assert_eq!(from_file, vec![7u8; 4096]);
    }

    #[test]
    fn dropping_an_active_transaction_rolls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e2.blite");
        let engine = StorageEngine::create(&path, cfg()).unwrap();
        let page_id = engine.allocate_page().unwrap();
        {
            let mut txn = engine.begin_transaction();
            txn.write_page(page_id, vec![1u8; 4096]).unwrap();
        }
        assert_eq!(engine.read_page(0, page_id).unwrap(), vec![0u8; 4096]);
    }

    #[test]
    fn transaction_ids_do_not_reuse_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e4.blite");
        let last_id;
        {
            let engine = StorageEngine::create(&path, cfg()).unwrap();
            let page_id = engine.allocate_page().unwrap();
            let mut txn = engine.begin_transaction();
            last_id = txn.id();
            txn.write_page(page_id, vec![9u8; 4096]).unwrap();
            txn.commit().unwrap();
        }
        let reopened = StorageEngine::open(&path, cfg()).unwrap();
        let next = reopened.begin_transaction();
        assert!(next.id() > last_id);
    }

    #[test]
    fn recovery_replays_committed_transactions_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e3.blite");
        let page_id;
        {
            let engine = StorageEngine::create(&path, cfg()).unwrap();
            page_id = engine.allocate_page().unwrap();
            let mut committed_txn = engine.begin_transaction();
            committed_txn.write_page(page_id, vec![5u8; 4096]).unwrap();
            committed_txn.commit().unwrap();
            // No checkpoint: the committed page only exists in the WAL/buffer.
        }
        let reopened = StorageEngine::open(&path, cfg()).unwrap();
        let bytes = reopened.read_page(0, page_id).unwrap();
        assert_eq!(bytes, vec![5u8; 4096]);
    }
}
