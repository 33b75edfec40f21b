//! §4.5: the on-page layout shared by data pages. A 24-byte page header is
//! followed by a slot directory growing downward from the header and
//! payloads growing upward from the end of the page; they meet in the
//! middle as the page fills.
//!
//! Page header (24 bytes): `{page_id:u32, page_type:u8, _pad:u8[3],
//! slot_count:u16, free_space_start:u16, free_space_end:u16,
//! next_overflow_page:u32, txn_id:u64}`.
//! Slot entry (8 bytes): `{offset:u16, length:u16, flags:u32}`.

use crate::errors::DbError;
use crate::types::{PageId, SlotIndex, TransactionId};

pub const PAGE_HEADER_LEN: usize = 24;
pub const SLOT_LEN: usize = 8;

pub const PAGE_TYPE_DATA: u8 = 1;
pub const PAGE_TYPE_OVERFLOW: u8 = 2;

const FLAG_DELETED: u32 = 0x0000_0001;
const FLAG_HAS_OVERFLOW: u32 = 0x0000_0002;
const FLAG_COMPRESSED: u32 = 0x0000_0004;

/// A document larger than this (relative to the page) is written as a head
/// slot plus an overflow chain rather than inline.
pub fn overflow_threshold(page_size: usize) -> usize {
    page_size.saturating_sub(128)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub page_type: u8,
    pub slot_count: u16,
    pub free_space_start: u16,
    pub free_space_end: u16,
    pub next_overflow_page: PageId,
    pub txn_id: TransactionId,
}

impl PageHeader {
    #[must_use]
    pub fn new_data(page_id: PageId, page_size: u16) -> Self {
        Self {
            page_id,
            page_type: PAGE_TYPE_DATA,
            slot_count: 0,
            free_space_start: PAGE_HEADER_LEN as u16,
            free_space_end: page_size,
            next_overflow_page: 0,
            txn_id: 0,
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        out[4] = self.page_type;
        out[5] = 0;
        out[6..8].copy_from_slice(&self.slot_count.to_le_bytes());
        out[8..10].copy_from_slice(&self.free_space_start.to_le_bytes());
        out[10..12].copy_from_slice(&self.free_space_end.to_le_bytes());
        out[12..16].copy_from_slice(&self.next_overflow_page.to_le_bytes());
        out[16..24].copy_from_slice(&self.txn_id.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, DbError> {
        if buf.len() < PAGE_HEADER_LEN {
            return Err(DbError::Corrupted("data page shorter than page header".into()));
        }
        Ok(Self {
            page_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            page_type: buf[4],
            slot_count: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            free_space_start: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            free_space_end: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            next_overflow_page: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            txn_id: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub length: u16,
    pub flags: u32,
}

impl Slot {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    #[must_use]
    pub fn has_overflow(&self) -> bool {
        self.flags & FLAG_HAS_OVERFLOW != 0
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.offset.to_le_bytes());
        out[2..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.flags.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            offset: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            length: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

fn slot_offset(index: SlotIndex) -> usize {
    PAGE_HEADER_LEN + usize::from(index) * SLOT_LEN
}

/// A parsed view over a raw data-page buffer, matching §4.5's layout.
#[derive(Debug, Clone)]
pub struct SlottedPage {
    pub header: PageHeader,
    pub buf: Vec<u8>,
}

impl SlottedPage {
    #[must_use]
    pub fn new_data(page_id: PageId, page_size: usize) -> Self {
        let header = PageHeader::new_data(page_id, page_size as u16);
        let mut page = Self { header, buf: vec![0u8; page_size] };
        page.write_header();
        page
    }

    /// # Errors
    /// Returns an error if `buf` is not a well-formed data page.
    pub fn parse(buf: Vec<u8>) -> Result<Self, DbError> {
        let header = PageHeader::decode(&buf)?;
        Ok(Self { header, buf })
    }

    fn write_header(&mut self) {
        self.header.encode(&mut self.buf[0..PAGE_HEADER_LEN]);
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn slot_count(&self) -> u16 {
        self.header.slot_count
    }

    #[must_use]
    pub fn slot(&self, index: SlotIndex) -> Option<Slot> {
        if index >= self.header.slot_count {
            return None;
        }
        let off = slot_offset(index);
        Some(Slot::decode(&self.buf[off..off + SLOT_LEN]))
    }

    fn set_slot(&mut self, index: SlotIndex, slot: Slot) {
        let off = slot_offset(index);
        slot.encode(&mut self.buf[off..off + SLOT_LEN]);
    }

    /// Bytes for slot `index`, or `None` if the slot is absent/deleted.
    #[must_use]
    pub fn payload(&self, index: SlotIndex) -> Option<&[u8]> {
        let slot = self.slot(index)?;
        if slot.is_deleted() {
            return None;
        }
        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        self.buf.get(start..end)
    }

    #[must_use]
    pub fn available_space(&self) -> usize {
        (self.header.free_space_end as usize).saturating_sub(self.header.free_space_start as usize)
    }

    fn find_reusable_deleted_slot(&self) -> Option<SlotIndex> {
        (0..self.header.slot_count).find(|&i| self.slot(i).is_some_and(|s| s.is_deleted()))
    }

    /// Inserts `payload`, reusing a deleted slot's directory entry if one
    /// exists, else appending a new one. Returns the assigned slot index.
    ///
    /// # Errors
    /// Returns an error if there isn't enough free space for the payload
    /// plus (if a new slot is needed) its directory entry.
    pub fn insert(&mut self, payload: &[u8], has_overflow: bool) -> Result<SlotIndex, DbError> {
        let len = u16::try_from(payload.len())
            .map_err(|_| DbError::Corrupted("slotted page payload exceeds 64KiB".into()))?;
        let reuse = self.find_reusable_deleted_slot();
        let needs_new_slot = reuse.is_none();
        let required = usize::from(len) + if needs_new_slot { SLOT_LEN } else { 0 };
        if required > self.available_space() {
            return Err(DbError::Corrupted("slotted page has insufficient free space".into()));
        }
        let new_offset = self.header.free_space_end - len;
        self.buf[new_offset as usize..new_offset as usize + payload.len()].copy_from_slice(payload);
        self.header.free_space_end = new_offset;

        let flags = if has_overflow { FLAG_HAS_OVERFLOW } else { 0 };
        let slot = Slot { offset: new_offset, length: len, flags };
        let index = match reuse {
            Some(i) => i,
            None => {
                let i = self.header.slot_count;
                self.header.slot_count += 1;
                self.header.free_space_start += SLOT_LEN as u16;
                i
            }
        };
        self.set_slot(index, slot);
        self.write_header();
        Ok(index)
    }

    /// Marks a slot `Deleted`. Returns whether it carried an overflow chain
    /// so the caller can free it.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range.
    pub fn delete(&mut self, index: SlotIndex) -> Result<bool, DbError> {
        let mut slot = self.slot(index).ok_or_else(|| DbError::Corrupted(format!("slot {index} out of range")))?;
        let had_overflow = slot.has_overflow();
        slot.flags |= FLAG_DELETED;
        self.set_slot(index, slot);
        self.write_header();
        Ok(had_overflow)
    }

    /// In-place update: only valid when `payload.len() <= old length` and the
    /// slot has no overflow chain (§4.5). The tail of the old payload is left
    /// dead (not reclaimed) — callers needing to grow must delete+reinsert.
    ///
    /// # Errors
    /// Returns an error if the slot is missing, has overflow, or the new
    /// payload is longer than the old one.
    pub fn update_in_place(&mut self, index: SlotIndex, payload: &[u8]) -> Result<(), DbError> {
        let slot = self.slot(index).ok_or_else(|| DbError::Corrupted(format!("slot {index} out of range")))?;
        if slot.has_overflow() {
            return Err(DbError::Corrupted("cannot update in place: slot has an overflow chain".into()));
        }
        if payload.len() > slot.length as usize {
            return Err(DbError::Corrupted("in-place update payload longer than existing slot".into()));
        }
        let start = slot.offset as usize;
        self.buf[start..start + payload.len()].copy_from_slice(payload);
        let mut new_slot = slot;
        new_slot.length = payload.len() as u16;
        self.set_slot(index, new_slot);
        self.write_header();
        Ok(())
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// One link in an overflow chain: a `PAGE_TYPE_OVERFLOW` page using the same
/// 24-byte `PageHeader` every page carries, chaining through its
/// `next_overflow_page` field; `free_space_start` doubles as the end of this
/// page's chunk of body bytes (`PAGE_HEADER_LEN..free_space_start`).
pub struct OverflowPage;

impl OverflowPage {
    #[must_use]
    pub fn encode(page_id: PageId, page_size: usize, next: PageId, chunk: &[u8]) -> Vec<u8> {
        let header = PageHeader {
            page_id,
            page_type: PAGE_TYPE_OVERFLOW,
            slot_count: 0,
            free_space_start: (PAGE_HEADER_LEN + chunk.len()) as u16,
            free_space_end: page_size as u16,
            next_overflow_page: next,
            txn_id: 0,
        };
        let mut out = vec![0u8; page_size];
        header.encode(&mut out[0..PAGE_HEADER_LEN]);
        out[PAGE_HEADER_LEN..PAGE_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
        out
    }

    /// # Errors
    /// Returns an error if `buf` is too short, isn't a `PAGE_TYPE_OVERFLOW`
    /// page, or its recorded chunk length runs past the buffer.
    pub fn decode(buf: &[u8]) -> Result<(PageId, Vec<u8>), DbError> {
        let header = PageHeader::decode(buf)?;
        if header.page_type != PAGE_TYPE_OVERFLOW {
            return Err(DbError::Corrupted("expected an overflow page".into()));
        }
        let chunk_len = (header.free_space_start as usize).saturating_sub(PAGE_HEADER_LEN);
        let bytes = buf
            .get(PAGE_HEADER_LEN..PAGE_HEADER_LEN + chunk_len)
            .ok_or_else(|| DbError::Corrupted("overflow page body truncated".into()))?
            .to_vec();
        Ok((header.next_overflow_page, bytes))
    }

    /// Splits `payload` into chain-sized chunks that fit a page's body, given
    /// `page_size`.
    #[must_use]
    pub fn chunk(payload: &[u8], page_size: usize) -> Vec<&[u8]> {
        let chunk_size = page_size.saturating_sub(PAGE_HEADER_LEN).max(1);
        payload.chunks(chunk_size).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_read_round_trips() {
        let mut page = SlottedPage::new_data(1, 256);
        let idx = page.insert(b"hello", false).unwrap();
        assert_eq!(page.payload(idx), Some(&b"hello"[..]));
        assert_eq!(page.slot_count(), 1);
    }

    #[test]
    fn delete_marks_slot_inaccessible() {
        let mut page = SlottedPage::new_data(1, 256);
        let idx = page.insert(b"hello", false).unwrap();
        page.delete(idx).unwrap();
        assert_eq!(page.payload(idx), None);
    }

    #[test]
    fn deleted_slots_are_reused_before_appending() {
        let mut page = SlottedPage::new_data(1, 256);
        let a = page.insert(b"aaa", false).unwrap();
        page.delete(a).unwrap();
        let slot_count_before = page.slot_count();
        let b = page.insert(b"b", false).unwrap();
        assert_eq!(a, b);
        assert_eq!(page.slot_count(), slot_count_before);
    }

    #[test]
    fn in_place_update_requires_not_longer_and_no_overflow() {
        let mut page = SlottedPage::new_data(1, 256);
        let idx = page.insert(b"hello", false).unwrap();
        page.update_in_place(idx, b"hi").unwrap();
        assert_eq!(page.payload(idx), Some(&b"hi"[..]));
        assert!(page.update_in_place(idx, b"way too long now").is_err());
    }

    #[test]
    fn update_in_place_rejects_overflow_slots() {
        let mut page = SlottedPage::new_data(1, 256);
        let idx = page.insert(b"hello", true).unwrap();
        assert!(page.update_in_place(idx, b"h").is_err());
    }

    #[test]
    fn insert_fails_when_out_of_space() {
        let mut page = SlottedPage::new_data(1, 64);
        assert!(page.insert(&vec![0u8; 100], false).is_err());
    }

    #[test]
    fn page_round_trips_through_bytes() {
        let mut page = SlottedPage::new_data(5, 256);
        page.insert(b"x", false).unwrap();
        let bytes = page.into_bytes();
        let parsed = SlottedPage::parse(bytes).unwrap();
        assert_eq!(parsed.header.page_id, 5);
        assert_eq!(parsed.slot_count(), 1);
    }

    #[test]
    fn overflow_page_round_trips() {
        let encoded = OverflowPage::encode(3, 64, 9, b"payload-bytes");
        let (next, bytes) = OverflowPage::decode(&encoded).unwrap();
        assert_eq!(next, 9);
        assert_eq!(bytes, b"payload-bytes");
    }
}
