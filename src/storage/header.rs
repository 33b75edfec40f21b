//! Page 0: the file header (§3/§6). Occupies the first 32 bytes of the page;
//! the remainder of the page is zero padding.

use crate::errors::DbError;
use crate::types::PageId;

pub const MAGIC: &[u8; 4] = b"BLTE";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    pub page_size: u32,
    pub next_txn_id: u64,
    pub free_list_head: PageId,
    pub catalog_root: PageId,
    /// High-water mark of page ids ever handed out by `allocate_page`. Not
    /// named in the wire-format field list but stored in its reserved
    /// padding bytes: without it, a reopened file cannot tell "physically
    /// pre-grown but never allocated" pages from "in use" ones.
    pub next_page_id: PageId,
}

impl FileHeader {
    #[must_use]
    pub const fn new(page_size: u32) -> Self {
        Self {
            version: VERSION,
            page_size,
            next_txn_id: 1,
            free_list_head: 0,
            catalog_root: 0,
            next_page_id: 1,
        }
    }

    #[must_use]
    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut out = vec![0u8; page_size];
        out[0..4].copy_from_slice(MAGIC);
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..10].copy_from_slice(&self.page_size.to_le_bytes());
        out[10..18].copy_from_slice(&self.next_txn_id.to_le_bytes());
        out[18..22].copy_from_slice(&self.free_list_head.to_le_bytes());
        out[22..26].copy_from_slice(&self.catalog_root.to_le_bytes());
        out[26..30].copy_from_slice(&self.next_page_id.to_le_bytes());
        out
    }

    /// # Errors
    /// Returns `DbError::Corrupted` if the magic bytes don't match.
    pub fn decode(buf: &[u8]) -> Result<Self, DbError> {
        if buf.len() < HEADER_LEN || &buf[0..4] != MAGIC {
            return Err(DbError::Corrupted("file header magic mismatch".into()));
        }
        Ok(Self {
            version: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            page_size: u32::from_le_bytes(buf[6..10].try_into().unwrap()),
            next_txn_id: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
            free_list_head: u32::from_le_bytes(buf[18..22].try_into().unwrap()),
            catalog_root: u32::from_le_bytes(buf[22..26].try_into().unwrap()),
            next_page_id: u32::from_le_bytes(buf[26..30].try_into().unwrap()).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = FileHeader { catalog_root: 3, free_list_head: 7, next_txn_id: 42, ..FileHeader::new(4096) };
        let bytes = h.encode(4096);
        assert_eq!(bytes.len(), 4096);
        let back = FileHeader::decode(&bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 4096];
        assert!(FileHeader::decode(&bytes).is_err());
    }
}
