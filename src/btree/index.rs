//! §4.6: the persistent B+Tree keyed by `IndexKey`, values are
//! `DocumentLocation`. Nodes are pages read/written through
//! `StorageEngine::{read_page, ...}` so every traversal is MVCC-aware (an
//! active transaction sees its own in-flight inserts, per §4.6's note).

use crate::btree::key::IndexKey;
use crate::btree::node::{is_leaf_page, max_per_node, InternalEntry, InternalNode, LeafEntry, LeafNode, NodeHeader};
use crate::errors::DbError;
use crate::storage::engine::{StorageEngine, Transaction};
use crate::types::{DocumentLocation, PageId, TransactionId};

/// A B+Tree whose root lives at `root_page_id` within some collection's
/// catalog entry. `unique` controls whether `insert` rejects a duplicate key
/// outright (primary / unique secondary indexes) or appends another leaf
/// entry with the same key (non-unique secondary indexes, §4.6).
pub struct BTreeIndex {
    root_page_id: PageId,
    unique: bool,
}

enum ReadSource<'a> {
    Engine { engine: &'a StorageEngine, txn: TransactionId },
    Transaction(&'a Transaction),
}

impl<'a> ReadSource<'a> {
    fn read(&self, page_id: PageId) -> Result<Vec<u8>, DbError> {
        match self {
            ReadSource::Engine { engine, txn } => engine.read_page(*txn, page_id),
            ReadSource::Transaction(txn) => txn.read_page(page_id),
        }
    }
}

impl BTreeIndex {
    #[must_use]
    pub fn new(root_page_id: PageId, unique: bool) -> Self {
        Self { root_page_id, unique }
    }

    #[must_use]
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Allocates an empty leaf-root page and returns an index rooted there.
    ///
    /// # Errors
    /// Returns an error if a page cannot be allocated or written.
    pub fn create_empty(engine: &StorageEngine, unique: bool) -> Result<Self, DbError> {
        let root_page_id = engine.allocate_page()?;
        let leaf = LeafNode::new(root_page_id);
        let page_size = engine.page_size() as usize;
        engine.page_file().write_page(root_page_id, &leaf.encode(page_size))?;
        Ok(Self { root_page_id, unique })
    }

    /// Exact lookup. Returns every location stored under `key` (more than
    /// one only for non-unique indexes).
    ///
    /// # Errors
    /// Returns an error if a page cannot be read or decoded.
    pub fn search(&self, engine: &StorageEngine, txn: TransactionId, key: &IndexKey) -> Result<Vec<DocumentLocation>, DbError> {
        let source = ReadSource::Engine { engine, txn };
        let leaf_id = self.find_leaf(&source, self.root_page_id, key)?;
        let leaf = LeafNode::decode(&source.read(leaf_id)?)?;
        Ok(leaf.entries.iter().filter(|e| &e.key == key).map(|e| e.location).collect())
    }

    fn find_leaf(&self, source: &ReadSource<'_>, start: PageId, key: &IndexKey) -> Result<PageId, DbError> {
        let mut page_id = start;
        loop {
            let bytes = source.read(page_id)?;
            if is_leaf_page(&bytes) {
                return Ok(page_id);
            }
            let node = InternalNode::decode(&bytes)?;
            page_id = node.child_for(key);
        }
    }

    /// Inserts `(key, location)`. For a unique index, fails with
    /// `UniqueViolation` if `key` is already present.
    ///
    /// # Errors
    /// Returns `UniqueViolation` for a duplicate key in a unique index, or an
    /// I/O error if pages cannot be read/written.
    pub fn insert(
        &mut self,
        engine: &StorageEngine,
        txn: &mut Transaction,
        key: IndexKey,
        location: DocumentLocation,
        index_name: &str,
    ) -> Result<(), DbError> {
        let page_size = engine.page_size() as usize;
        let mut path: Vec<PageId> = Vec::new();
        let mut page_id = self.root_page_id;
        loop {
            path.push(page_id);
            let bytes = txn.read_page(page_id)?;
            if is_leaf_page(&bytes) {
                break;
            }
            let node = InternalNode::decode(&bytes)?;
            page_id = node.child_for(&key);
        }
        let leaf_id = *path.last().unwrap();
        let mut leaf = LeafNode::decode(&txn.read_page(leaf_id)?)?;

        if self.unique && leaf.entries.iter().any(|e| e.key == key) {
            return Err(DbError::UniqueViolation { index: index_name.to_string() });
        }

        let insert_at = leaf.entries.partition_point(|e| e.key < key);
        leaf.entries.insert(insert_at, LeafEntry { key: key.clone(), location });

        let max_entries = max_per_node(page_size);
        if leaf.entries.len() <= max_entries {
            txn.write_page(leaf_id, leaf.encode(page_size))?;
            return Ok(());
        }

        // Split: move the upper half to a new leaf, splice into the
        // next_leaf_page_id chain, and promote the first key of the right
        // half up into the parent (§4.6).
        let mid = leaf.entries.len() / 2;
        let right_entries = leaf.entries.split_off(mid);
        let promoted_key = right_entries[0].key.clone();
        let right_id = engine.allocate_page()?;
        let mut right = LeafNode::new(right_id);
        right.entries = right_entries;
        right.header.next_leaf_page_id = leaf.header.next_leaf_page_id;
        leaf.header.next_leaf_page_id = right_id;

        txn.write_page(leaf_id, leaf.encode(page_size))?;
        txn.write_page(right_id, right.encode(page_size))?;

        self.insert_into_parent(engine, txn, &path[..path.len() - 1], leaf_id, promoted_key, right_id)
    }

    /// Propagates a split upward: inserts `(promoted_key, right_child)` into
    /// the parent named by the end of `ancestor_path`, splitting further and
    /// recursing (or allocating a new root) as needed.
    fn insert_into_parent(
        &mut self,
        engine: &StorageEngine,
        txn: &mut Transaction,
        ancestor_path: &[PageId],
        left_child: PageId,
        promoted_key: IndexKey,
        right_child: PageId,
    ) -> Result<(), DbError> {
        let page_size = engine.page_size() as usize;
        let Some(&parent_id) = ancestor_path.last() else {
            // The root split: allocate a fresh internal root over both halves.
            let new_root_id = engine.allocate_page()?;
            let mut root = InternalNode::new(new_root_id, left_child);
            root.entries.push(InternalEntry { key: promoted_key, child: right_child });
            txn.write_page(new_root_id, root.encode(page_size))?;
            self.root_page_id = new_root_id;
            return Ok(());
        };

        let mut parent = InternalNode::decode(&txn.read_page(parent_id)?)?;
        let insert_at = parent.entries.partition_point(|e| e.key < promoted_key);
        parent.entries.insert(insert_at, InternalEntry { key: promoted_key, child: right_child });

        let max_entries = max_per_node(page_size);
        if parent.entries.len() <= max_entries {
            txn.write_page(parent_id, parent.encode(page_size))?;
            return Ok(());
        }

        // Internal split: the median key moves up (not copied), unlike a leaf split.
        let mid = parent.entries.len() / 2;
        let median_key = parent.entries[mid].key.clone();
        let mut right_entries = parent.entries.split_off(mid + 1);
        let right_p0 = parent.entries.remove(mid).child;
        let right_id = engine.allocate_page()?;
        let mut right = InternalNode::new(right_id, right_p0);
        right.entries.append(&mut right_entries);

        txn.write_page(parent_id, parent.encode(page_size))?;
        txn.write_page(right_id, right.encode(page_size))?;

        self.insert_into_parent(engine, txn, &ancestor_path[..ancestor_path.len() - 1], parent_id, median_key, right_id)
    }

    /// Removes the entry matching `(key, location)` exactly — needed to
    /// disambiguate among duplicate keys in a non-unique index. Leaves are
    /// allowed to underflow without rebalancing (§4.6/§9 open question).
    ///
    /// # Errors
    /// Returns an error if pages cannot be read/written.
    pub fn delete(
        &self,
        txn: &mut Transaction,
        key: &IndexKey,
        location: DocumentLocation,
    ) -> Result<bool, DbError> {
        let mut page_id = self.root_page_id;
        loop {
            let bytes = txn.read_page(page_id)?;
            if is_leaf_page(&bytes) {
                let mut leaf = LeafNode::decode(&bytes)?;
                let Some(pos) = leaf.entries.iter().position(|e| &e.key == key && e.location == location) else {
                    return Ok(false);
                };
                leaf.entries.remove(pos);
                // TODO(btree): leaf merge-on-underflow is not implemented;
                // space below max_per_node/2 is reclaimed only by a future
                // rebuild, matching the documented v1 scope limitation.
                txn.write_page(page_id, leaf.encode(bytes.len()))?;
                return Ok(true);
            }
            let node = InternalNode::decode(&bytes)?;
            page_id = node.child_for(key);
        }
    }

    /// Finds the first leaf whose keys may satisfy `min`, for range scans.
    fn find_first_leaf(&self, source: &ReadSource<'_>, min: &IndexKey) -> Result<PageId, DbError> {
        self.find_leaf(source, self.root_page_id, min)
    }

    /// Ascending range scan over `[min, max]` inclusive, walking the leaf
    /// chain across page boundaries, including duplicate keys (§4.6/§8.5).
    ///
    /// # Errors
    /// Returns an error if a page cannot be read or decoded.
    pub fn range_scan(
        &self,
        engine: &StorageEngine,
        txn: TransactionId,
        min: &IndexKey,
        max: &IndexKey,
    ) -> Result<Vec<(IndexKey, DocumentLocation)>, DbError> {
        let source = ReadSource::Engine { engine, txn };
        let mut page_id = self.find_first_leaf(&source, min)?;
        let mut out = Vec::new();
        loop {
            let leaf = LeafNode::decode(&source.read(page_id)?)?;
            for entry in &leaf.entries {
                if &entry.key < min {
                    continue;
                }
                if &entry.key > max {
                    return Ok(out);
                }
                out.push((entry.key.clone(), entry.location));
            }
            if leaf.header.next_leaf_page_id == NodeHeader::no_next_leaf() {
                return Ok(out);
            }
            page_id = leaf.header.next_leaf_page_id;
        }
    }

    /// Full-collection scan using `MinKey`/`MaxKey` as the bounds (§4.6).
    ///
    /// # Errors
    /// Returns an error if a page cannot be read or decoded.
    pub fn scan_all(&self, engine: &StorageEngine, txn: TransactionId) -> Result<Vec<(IndexKey, DocumentLocation)>, DbError> {
        self.range_scan(engine, txn, &IndexKey::min(), &IndexKey::max())
    }
}
