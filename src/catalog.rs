//! §3 Catalog: per-collection metadata (`name`, primary/schema root page
//! ids, secondary index descriptors) persisted in dedicated metadata pages
//! chained from the file header's `catalog_root` (§6's "pointers to... the
//! collection catalog root").
//!
//! Unlike the file header and WAL, the catalog's on-disk shape isn't called
//! out byte-for-byte by the external interfaces section, so it's encoded
//! with `bincode` the way the teacher serializes its own structured
//! metadata, rather than hand-packed fields.

use crate::errors::DbError;
use crate::storage::engine::StorageEngine;
use crate::types::PageId;
use serde::{Deserialize, Serialize};

/// One secondary index's persisted descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub unique: bool,
    pub property_paths: Vec<String>,
    pub root_page_id: PageId,
}

/// One collection's persisted metadata, per §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub primary_root_page_id: PageId,
    /// Root page of the chain holding the collection's ordered schema
    /// history (§4.7 Schema versioning); `0` until the first schema is saved.
    pub schema_root_page_id: PageId,
    pub secondary_indexes: Vec<IndexEntry>,
    /// The collection-scoped compressed-key dictionary (§6), persisted
    /// alongside the rest of the catalog entry since it's small and always
    /// needed to decode any document in the collection.
    pub key_dictionary: Vec<String>,
}

impl CatalogEntry {
    #[must_use]
    pub fn new(name: String, primary_root_page_id: PageId) -> Self {
        Self {
            name,
            primary_root_page_id,
            schema_root_page_id: 0,
            secondary_indexes: Vec::new(),
            key_dictionary: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogRoot {
    collections: Vec<CatalogEntry>,
}

/// Page-chain framing: `[next_page:u32][payload_len:u32][payload bytes...]`,
/// continuing into `next_page` when the payload doesn't fit in one page.
const CHAIN_HEADER_LEN: usize = 8;

pub(crate) fn read_chain(engine: &StorageEngine, first_page: PageId) -> Result<Vec<u8>, DbError> {
    let mut out = Vec::new();
    let mut page_id = first_page;
    loop {
        let bytes = engine.read_page(0, page_id)?;
        let next = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let body = bytes
            .get(CHAIN_HEADER_LEN..CHAIN_HEADER_LEN + len)
            .ok_or_else(|| DbError::Corrupted("catalog chain page truncated".into()))?;
        out.extend_from_slice(body);
        if next == 0 {
            return Ok(out);
        }
        page_id = next;
    }
}

/// Walks an existing chain collecting every page id in it, so `write_chain`
/// can reuse its prefix and free whatever tail the new chain no longer needs.
fn chain_page_ids(engine: &StorageEngine, first_page: PageId) -> Result<Vec<PageId>, DbError> {
    let mut ids = Vec::new();
    let mut page_id = first_page;
    loop {
        ids.push(page_id);
        let bytes = engine.read_page(0, page_id)?;
        let next = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if next == 0 {
            return Ok(ids);
        }
        page_id = next;
    }
}

pub(crate) fn write_chain(engine: &StorageEngine, first_page: Option<PageId>, bytes: &[u8]) -> Result<PageId, DbError> {
    let page_size = engine.page_size() as usize;
    let capacity = page_size - CHAIN_HEADER_LEN;
    let chunks: Vec<&[u8]> = if bytes.is_empty() { vec![&[][..]] } else { bytes.chunks(capacity).collect() };

    let old_pages = match first_page {
        Some(p) => chain_page_ids(engine, p)?,
        None => Vec::new(),
    };

    let mut pages = Vec::with_capacity(chunks.len());
    for i in 0..chunks.len() {
        match old_pages.get(i) {
            Some(&old) => pages.push(old),
            None => pages.push(engine.allocate_page()?),
        }
    }
    let reused = chunks.len().min(old_pages.len());
    for &surplus in &old_pages[reused..] {
        engine.free_page(surplus)?;
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let mut buf = vec![0u8; page_size];
        let next = if i + 1 < pages.len() { pages[i + 1] } else { 0 };
        buf[0..4].copy_from_slice(&next.to_le_bytes());
        let len = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
        buf[4..8].copy_from_slice(&len.to_le_bytes());
        buf[CHAIN_HEADER_LEN..CHAIN_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
        engine.page_file().write_page(pages[i], &buf)?;
    }
    Ok(pages[0])
}

/// Loads every persisted collection entry from the file header's
/// `catalog_root`. Returns an empty list for a freshly created database
/// (`catalog_root == 0`).
///
/// # Errors
/// Returns an error if the catalog chain is corrupt or undecodable.
pub fn load_all(engine: &StorageEngine) -> Result<Vec<CatalogEntry>, DbError> {
    let root = engine.catalog_root();
    if root == 0 {
        return Ok(Vec::new());
    }
    let bytes = read_chain(engine, root)?;
    let (root_struct, _): (CatalogRoot, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(root_struct.collections)
}

/// Persists the full set of collection entries, replacing whatever the
/// catalog held before, and updates the file header's `catalog_root` to
/// point at the (possibly new) first chain page.
///
/// # Errors
/// Returns an error if encoding or writing the chain fails.
pub fn save_all(engine: &StorageEngine, collections: Vec<CatalogEntry>) -> Result<(), DbError> {
    let root_struct = CatalogRoot { collections };
    let bytes = bincode::serde::encode_to_vec(&root_struct, bincode::config::standard())?;
    let existing_root = engine.catalog_root();
    let first_page = if existing_root == 0 { None } else { Some(existing_root) };
    let new_root = write_chain(engine, first_page, &bytes)?;
    engine.set_catalog_root(new_root)?;
    engine.page_file().flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::tempdir;

    fn cfg() -> StorageConfig {
        StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
    }

    #[test]
    fn empty_catalog_round_trips() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("c.blite"), cfg()).unwrap();
        assert!(load_all(&engine).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_entries() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("c2.blite"), cfg()).unwrap();
        let mut entry = CatalogEntry::new("people".into(), 3);
        entry.secondary_indexes.push(IndexEntry {
            name: "by_age".into(),
            unique: false,
            property_paths: vec!["age".into()],
            root_page_id: 9,
        });
        save_all(&engine, vec![entry.clone()]).unwrap();

        let loaded = load_all(&engine).unwrap();
        assert_eq!(loaded, vec![entry]);
    }

    #[test]
    fn shrinking_the_catalog_frees_the_unused_tail_pages() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("c4.blite"), cfg()).unwrap();
        let big: Vec<CatalogEntry> = (0..200)
            .map(|i| {
                let mut e = CatalogEntry::new(format!("collection_{i}"), i);
                e.key_dictionary = vec!["a".into(), "b".into(), "c".into()];
                e
            })
            .collect();
        save_all(&engine, big.clone()).unwrap();
        let pages_after_big = engine.page_file().page_count();

        save_all(&engine, vec![CatalogEntry::new("only_one".into(), 1)]).unwrap();

        // Growing back to the same size must reuse the pages freed by the
        // shrink above rather than extending the file again.
        save_all(&engine, big.clone()).unwrap();
        let pages_after_regrow = engine.page_file().page_count();
        assert_eq!(pages_after_regrow, pages_after_big, "regrowing must reuse pages freed by the earlier shrink");

        assert_eq!(load_all(&engine).unwrap(), big);
    }

    #[test]
    fn catalog_spanning_multiple_pages_round_trips() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("c3.blite"), cfg()).unwrap();
        let mut entries = Vec::new();
        for i in 0..200 {
            let mut e = CatalogEntry::new(format!("collection_{i}"), i);
            e.key_dictionary = vec!["a".into(), "b".into(), "c".into()];
            entries.push(e);
        }
        save_all(&engine, entries.clone()).unwrap();
        let loaded = load_all(&engine).unwrap();
        assert_eq!(loaded, entries);
    }
}
