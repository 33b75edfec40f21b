//! Page-level plumbing shared by `ops` and `index_admin`: placing a
//! document's bytes on a data page (inline or via an overflow chain),
//! reading them back, and freeing the storage on delete/update.

use super::CollectionState;
use crate::errors::DbError;
use crate::mapper::DocumentMapper;
use crate::storage::engine::{StorageEngine, Transaction};
use crate::storage::slotted_page::{OverflowPage, SlottedPage, overflow_threshold};
use crate::types::{DocumentLocation, PageId, TransactionId};

/// Pool tiers per the serialization size policy: the mapper is retried with
/// the next tier whenever its output doesn't fit the one just tried.
const SERIALIZE_TIERS: [usize; 3] = [64 * 1024, 2 * 1024 * 1024, 16 * 1024 * 1024];

/// Byte length of a head slot's overflow metadata: `total_len:i32 ||
/// first_overflow_page:u32`, ahead of the inline chunk of real document
/// bytes that follows it in the same payload.
const OVERFLOW_HEAD_LEN: usize = 8;

/// Serializes `entity` with `mapper`, stepping through `SERIALIZE_TIERS`
/// until the output fits the tier it was produced with.
///
/// # Errors
/// Returns `DocumentTooLarge` if the entity still doesn't fit a 16 MiB buffer.
pub(super) fn serialize_with_retry<T, M: DocumentMapper<T>>(mapper: &M, entity: &T) -> Result<Vec<u8>, DbError> {
    let mut last_len = 0;
    for (i, &cap) in SERIALIZE_TIERS.iter().enumerate() {
        let mut buffer = Vec::with_capacity(cap);
        mapper.serialize(entity, &mut buffer)?;
        last_len = buffer.len();
        if last_len <= cap {
            return Ok(buffer);
        }
        let _ = i;
    }
    Err(DbError::DocumentTooLarge { len: last_len })
}

/// Returns a page with at least `needed` bytes free, preferring
/// `state.current_page` and falling back to a freshly allocated page.
fn find_or_allocate_page(
    engine: &StorageEngine,
    txn: &mut Transaction,
    state: &mut CollectionState,
    needed: usize,
) -> Result<PageId, DbError> {
    let page_size = engine.page_size() as usize;
    if state.current_page != 0 {
        let page = SlottedPage::parse(txn.read_page(state.current_page)?)?;
        if page.available_space() >= needed + crate::storage::slotted_page::SLOT_LEN {
            return Ok(state.current_page);
        }
    }
    let page_id = engine.allocate_page()?;
    let page = SlottedPage::new_data(page_id, page_size);
    txn.write_page(page_id, page.into_bytes())?;
    state.current_page = page_id;
    Ok(page_id)
}

/// Places `bytes` on a data page, inline if it fits under the overflow
/// threshold, else as a head slot carrying `total_len || first_overflow_page
/// || inline_chunk` ahead of a freshly written overflow chain holding the
/// rest. Returns the slot the head lives in.
///
/// # Errors
/// Returns an error if a page cannot be allocated, read or written.
pub(super) fn insert_raw(
    engine: &StorageEngine,
    txn: &mut Transaction,
    state: &mut CollectionState,
    bytes: &[u8],
) -> Result<DocumentLocation, DbError> {
    let page_size = engine.page_size() as usize;
    let threshold = overflow_threshold(page_size);
    let (payload, has_overflow): (Vec<u8>, bool) = if bytes.len() <= threshold {
        (bytes.to_vec(), false)
    } else {
        let inline_len = threshold.saturating_sub(OVERFLOW_HEAD_LEN).min(bytes.len());
        let (inline_chunk, rest) = bytes.split_at(inline_len);
        let first_page = write_overflow_chain(engine, txn, rest)?;
        let total_len = i32::try_from(bytes.len()).map_err(|_| DbError::DocumentTooLarge { len: bytes.len() })?;
        let mut head = Vec::with_capacity(OVERFLOW_HEAD_LEN + inline_chunk.len());
        head.extend_from_slice(&total_len.to_le_bytes());
        head.extend_from_slice(&first_page.to_le_bytes());
        head.extend_from_slice(inline_chunk);
        (head, true)
    };
    let page_id = find_or_allocate_page(engine, txn, state, payload.len())?;
    let mut page = SlottedPage::parse(txn.read_page(page_id)?)?;
    let slot = page.insert(&payload, has_overflow)?;
    txn.write_page(page_id, page.into_bytes())?;
    Ok(DocumentLocation::new(page_id, slot))
}

/// Updates the storage at `location` with `bytes`: rewrites the slot in
/// place when the new encoding still fits inline and the old slot carried no
/// overflow chain, else frees the old storage and reinserts fresh (§4.7's
/// "update-in-place when the new encoding fits, else relocate").
///
/// # Errors
/// Returns `NoSuchDocument` if `location` is absent, or an I/O error.
pub(super) fn update_raw(
    engine: &StorageEngine,
    txn: &mut Transaction,
    state: &mut CollectionState,
    location: DocumentLocation,
    bytes: &[u8],
) -> Result<DocumentLocation, DbError> {
    let page_size = engine.page_size() as usize;
    if bytes.len() <= overflow_threshold(page_size) {
        let mut page = SlottedPage::parse(txn.read_page(location.page_id)?)?;
        let slot = page.slot(location.slot).ok_or(DbError::NoSuchDocument)?;
        if !slot.has_overflow() && page.update_in_place(location.slot, bytes).is_ok() {
            txn.write_page(location.page_id, page.into_bytes())?;
            return Ok(location);
        }
    }
    free_entity_storage(engine, txn, location)?;
    insert_raw(engine, txn, state, bytes)
}

/// Reads the full entity bytes at `location`, following the overflow chain
/// if the head slot carries one.
///
/// # Errors
/// Returns `NoSuchDocument` if the slot is absent or deleted, or an I/O error.
pub(super) fn read_entity(engine: &StorageEngine, txn: TransactionId, location: DocumentLocation) -> Result<Vec<u8>, DbError> {
    let page = SlottedPage::parse(engine.read_page(txn, location.page_id)?)?;
    let slot = page.slot(location.slot).ok_or(DbError::NoSuchDocument)?;
    let payload = page.payload(location.slot).ok_or(DbError::NoSuchDocument)?;
    if slot.has_overflow() {
        if payload.len() < OVERFLOW_HEAD_LEN {
            return Err(DbError::Corrupted("overflow head slot shorter than its metadata".into()));
        }
        let total_len = i32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
        let first = u32::from_le_bytes(payload[4..8].try_into().unwrap());
        let inline_chunk = &payload[OVERFLOW_HEAD_LEN..];
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(inline_chunk);
        out.extend(read_overflow_chain(engine, txn, first)?);
        Ok(out)
    } else {
        Ok(payload.to_vec())
    }
}

/// Frees the storage at `location`: deletes the head slot and, if it carried
/// an overflow chain, frees every page in that chain.
///
/// # Errors
/// Returns `NoSuchDocument` if the slot is out of range, or an I/O error.
pub(super) fn free_entity_storage(engine: &StorageEngine, txn: &mut Transaction, location: DocumentLocation) -> Result<(), DbError> {
    let mut page = SlottedPage::parse(txn.read_page(location.page_id)?)?;
    let slot = page.slot(location.slot).ok_or(DbError::NoSuchDocument)?;
    let overflow_head = slot.has_overflow().then(|| {
        let payload = page.payload(location.slot).expect("slot just read as present");
        u32::from_le_bytes(payload[4..8].try_into().unwrap())
    });
    page.delete(location.slot)?;
    txn.write_page(location.page_id, page.into_bytes())?;
    if let Some(first) = overflow_head {
        free_overflow_chain(engine, first)?;
    }
    Ok(())
}

/// Writes `bytes` as a chain of overflow pages, chunked to fit one page's
/// body each. Page content is written through `txn` so an aborted
/// transaction leaves no live overflow chain behind, matching how every
/// other document mutation is rolled back; the page ids themselves are
/// still allocated directly against `engine`, the same convention the
/// primary and secondary indexes already use for their own node pages.
fn write_overflow_chain(engine: &StorageEngine, txn: &mut Transaction, bytes: &[u8]) -> Result<PageId, DbError> {
    let page_size = engine.page_size() as usize;
    let chunks = OverflowPage::chunk(bytes, page_size);
    let mut pages = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        pages.push(engine.allocate_page()?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let next = if i + 1 < pages.len() { pages[i + 1] } else { 0 };
        txn.write_page(pages[i], OverflowPage::encode(pages[i], page_size, next, chunk))?;
    }
    Ok(pages[0])
}

fn read_overflow_chain(engine: &StorageEngine, txn: TransactionId, first_page: PageId) -> Result<Vec<u8>, DbError> {
    let mut out = Vec::new();
    let mut page_id = first_page;
    loop {
        let buf = engine.read_page(txn, page_id)?;
        let (next, bytes) = OverflowPage::decode(&buf)?;
        out.extend_from_slice(&bytes);
        if next == 0 {
            return Ok(out);
        }
        page_id = next;
    }
}

/// Frees every page in the overflow chain starting at `first_page`. Runs
/// outside the caller's transaction, same as index-node page frees.
fn free_overflow_chain(engine: &StorageEngine, first_page: PageId) -> Result<(), DbError> {
    let mut page_id = first_page;
    loop {
        let buf = engine.read_page(0, page_id)?;
        let (next, _) = OverflowPage::decode(&buf)?;
        engine.free_page(page_id)?;
        if next == 0 {
            return Ok(());
        }
        page_id = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTreeIndex;
    use crate::config::StorageConfig;
    use crate::index_manager::IndexManager;
    use tempfile::tempdir;

    fn cfg() -> StorageConfig {
        StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
    }

    fn fresh_state(engine: &StorageEngine) -> CollectionState {
        let primary = BTreeIndex::create_empty(engine, true).unwrap();
        CollectionState { primary, indexes: IndexManager::from_entries(Vec::new()), schema_root_page_id: 0, schema_version: 1, current_page: 0 }
    }

    #[test]
    fn inline_document_round_trips() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("s1.blite"), cfg()).unwrap();
        let mut state = fresh_state(&engine);
        let mut txn = engine.begin_transaction();
        let location = insert_raw(&engine, &mut txn, &mut state, b"hello world").unwrap();
        txn.commit().unwrap();

        let bytes = read_entity(&engine, 0, location).unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn oversized_document_round_trips_through_overflow_chain() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("s2.blite"), cfg()).unwrap();
        let mut state = fresh_state(&engine);
        let big = vec![0x42u8; 20_000];
        let mut txn = engine.begin_transaction();
        let location = insert_raw(&engine, &mut txn, &mut state, &big).unwrap();
        txn.commit().unwrap();

        let bytes = read_entity(&engine, 0, location).unwrap();
        assert_eq!(bytes, big);
    }

    #[test]
    fn oversized_head_slot_carries_total_len_and_first_page_prefix() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("s4.blite"), cfg()).unwrap();
        let mut state = fresh_state(&engine);
        let big = vec![0x99u8; 20_000];
        let mut txn = engine.begin_transaction();
        let location = insert_raw(&engine, &mut txn, &mut state, &big).unwrap();
        txn.commit().unwrap();

        let page = SlottedPage::parse(engine.read_page(0, location.page_id).unwrap()).unwrap();
        let slot = page.slot(location.slot).unwrap();
        assert!(slot.has_overflow());
        let payload = page.payload(location.slot).unwrap();
        assert!(payload.len() > OVERFLOW_HEAD_LEN, "head slot must carry an inline chunk beyond its metadata");
        let total_len = i32::from_le_bytes(payload[0..4].try_into().unwrap());
        assert_eq!(total_len as usize, big.len());
        let first_overflow_page = u32::from_le_bytes(payload[4..8].try_into().unwrap());
        assert_ne!(first_overflow_page, 0);
    }

    #[test]
    fn freeing_an_overflowed_document_reclaims_its_chain() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::create(&dir.path().join("s3.blite"), cfg()).unwrap();
        let mut state = fresh_state(&engine);
        let big = vec![0x7eu8; 20_000];
        let mut txn = engine.begin_transaction();
        let location = insert_raw(&engine, &mut txn, &mut state, &big).unwrap();
        free_entity_storage(&engine, &mut txn, location).unwrap();
        txn.commit().unwrap();

        assert!(matches!(read_entity(&engine, 0, location), Err(DbError::NoSuchDocument)));
    }
}
