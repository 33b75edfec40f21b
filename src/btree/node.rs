//! On-page layout for B+Tree leaf and internal nodes (§3/§4.6).
//!
//! Leaf layout: `[16B header][entries: (key_len:i32, key_bytes, location:6B)…][next_leaf:u32]`.
//! Internal layout: `[16B header][p0:u32]([key_len, key_bytes, pN:u32])…`.
//!
//! Both share the same 16-byte node header:
//! `{page_id:u32, is_leaf:u8, _pad:u8, entry_count:u16, parent_page_id:u32, next_leaf_page_id:u32}`.

use crate::errors::DbError;
use crate::btree::key::IndexKey;
use crate::types::{DocumentLocation, PageId};

pub const NODE_HEADER_LEN: usize = 16;
/// Conservative floor used to size `max_per_node`; real entries are usually
/// larger, which only makes splits happen sooner (safe).
const MIN_ENTRY_SIZE: usize = 16;
const MIN_MAX_PER_NODE: usize = 4;

/// Derives the maximum number of entries a node of `page_size` may hold
/// before it must split, per §4.5/§8 ("`max_per_node = 4`" is an explicitly
/// valid configuration for deterministic split tests).
#[must_use]
pub fn max_per_node(page_size: usize) -> usize {
    let budget = page_size.saturating_sub(NODE_HEADER_LEN);
    (budget / MIN_ENTRY_SIZE).max(MIN_MAX_PER_NODE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub page_id: PageId,
    pub is_leaf: bool,
    pub entry_count: u16,
    pub parent_page_id: PageId,
    pub next_leaf_page_id: PageId,
}

impl NodeHeader {
    #[must_use]
    pub const fn no_parent() -> PageId {
        0
    }

    #[must_use]
    pub const fn no_next_leaf() -> PageId {
        0
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        out[4] = u8::from(self.is_leaf);
        out[5] = 0;
        out[6..8].copy_from_slice(&self.entry_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.parent_page_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.next_leaf_page_id.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, DbError> {
        if buf.len() < NODE_HEADER_LEN {
            return Err(DbError::Corrupted("index page shorter than node header".into()));
        }
        Ok(Self {
            page_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            is_leaf: buf[4] != 0,
            entry_count: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            parent_page_id: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            next_leaf_page_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: IndexKey,
    pub location: DocumentLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub header: NodeHeader,
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    #[must_use]
    pub fn new(page_id: PageId) -> Self {
        Self {
            header: NodeHeader {
                page_id,
                is_leaf: true,
                entry_count: 0,
                parent_page_id: NodeHeader::no_parent(),
                next_leaf_page_id: NodeHeader::no_next_leaf(),
            },
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut out = vec![0u8; page_size];
        let mut header = self.header;
        header.entry_count = u16::try_from(self.entries.len()).unwrap_or(u16::MAX);
        header.encode(&mut out[0..NODE_HEADER_LEN]);
        let mut pos = NODE_HEADER_LEN;
        for e in &self.entries {
            let klen = i32::try_from(e.key.0.len()).unwrap_or(i32::MAX);
            out[pos..pos + 4].copy_from_slice(&klen.to_le_bytes());
            pos += 4;
            out[pos..pos + e.key.0.len()].copy_from_slice(&e.key.0);
            pos += e.key.0.len();
            out[pos..pos + 4].copy_from_slice(&e.location.page_id.to_le_bytes());
            pos += 4;
            out[pos..pos + 2].copy_from_slice(&e.location.slot.to_le_bytes());
            pos += 2;
        }
        out
    }

    /// # Errors
    /// Returns an error if `buf` is not a well-formed leaf page.
    pub fn decode(buf: &[u8]) -> Result<Self, DbError> {
        let header = NodeHeader::decode(buf)?;
        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut pos = NODE_HEADER_LEN;
        for _ in 0..header.entry_count {
            let klen = i32::from_le_bytes(
                buf.get(pos..pos + 4)
                    .ok_or_else(|| DbError::Corrupted("leaf entry truncated".into()))?
                    .try_into()
                    .unwrap(),
            );
            pos += 4;
            let klen = usize::try_from(klen)
                .map_err(|_| DbError::Corrupted("negative key length in leaf entry".into()))?;
            let key_bytes = buf
                .get(pos..pos + klen)
                .ok_or_else(|| DbError::Corrupted("leaf key bytes truncated".into()))?
                .to_vec();
            pos += klen;
            let page_id = u32::from_le_bytes(
                buf.get(pos..pos + 4)
                    .ok_or_else(|| DbError::Corrupted("leaf location truncated".into()))?
                    .try_into()
                    .unwrap(),
            );
            pos += 4;
            let slot = u16::from_le_bytes(
                buf.get(pos..pos + 2)
                    .ok_or_else(|| DbError::Corrupted("leaf location truncated".into()))?
                    .try_into()
                    .unwrap(),
            );
            pos += 2;
            entries.push(LeafEntry { key: IndexKey(key_bytes), location: DocumentLocation { page_id, slot } });
        }
        Ok(Self { header, entries })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalEntry {
    pub key: IndexKey,
    pub child: PageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub header: NodeHeader,
    pub p0: PageId,
    pub entries: Vec<InternalEntry>,
}

impl InternalNode {
    #[must_use]
    pub fn new(page_id: PageId, p0: PageId) -> Self {
        Self {
            header: NodeHeader {
                page_id,
                is_leaf: false,
                entry_count: 0,
                parent_page_id: NodeHeader::no_parent(),
                next_leaf_page_id: NodeHeader::no_next_leaf(),
            },
            p0,
            entries: Vec::new(),
        }
    }

    /// Returns the child pointer responsible for `key`: the last `pᵢ` such
    /// that `entries[i-1].key <= key`, or `p0` if `key` precedes every entry.
    #[must_use]
    pub fn child_for(&self, key: &IndexKey) -> PageId {
        let mut child = self.p0;
        for e in &self.entries {
            if &e.key <= key {
                child = e.child;
            } else {
                break;
            }
        }
        child
    }

    #[must_use]
    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut out = vec![0u8; page_size];
        let mut header = self.header;
        header.entry_count = u16::try_from(self.entries.len()).unwrap_or(u16::MAX);
        header.encode(&mut out[0..NODE_HEADER_LEN]);
        let mut pos = NODE_HEADER_LEN;
        out[pos..pos + 4].copy_from_slice(&self.p0.to_le_bytes());
        pos += 4;
        for e in &self.entries {
            let klen = i32::try_from(e.key.0.len()).unwrap_or(i32::MAX);
            out[pos..pos + 4].copy_from_slice(&klen.to_le_bytes());
            pos += 4;
            out[pos..pos + e.key.0.len()].copy_from_slice(&e.key.0);
            pos += e.key.0.len();
            out[pos..pos + 4].copy_from_slice(&e.child.to_le_bytes());
            pos += 4;
        }
        out
    }

    /// # Errors
    /// Returns an error if `buf` is not a well-formed internal page.
    pub fn decode(buf: &[u8]) -> Result<Self, DbError> {
        let header = NodeHeader::decode(buf)?;
        let mut pos = NODE_HEADER_LEN;
        let p0 = u32::from_le_bytes(
            buf.get(pos..pos + 4)
                .ok_or_else(|| DbError::Corrupted("internal node missing p0".into()))?
                .try_into()
                .unwrap(),
        );
        pos += 4;
        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let klen = i32::from_le_bytes(
                buf.get(pos..pos + 4)
                    .ok_or_else(|| DbError::Corrupted("internal entry truncated".into()))?
                    .try_into()
                    .unwrap(),
            );
            pos += 4;
            let klen = usize::try_from(klen)
                .map_err(|_| DbError::Corrupted("negative key length in internal entry".into()))?;
            let key_bytes = buf
                .get(pos..pos + klen)
                .ok_or_else(|| DbError::Corrupted("internal key bytes truncated".into()))?
                .to_vec();
            pos += klen;
            let child = u32::from_le_bytes(
                buf.get(pos..pos + 4)
                    .ok_or_else(|| DbError::Corrupted("internal child pointer truncated".into()))?
                    .try_into()
                    .unwrap(),
            );
            pos += 4;
            entries.push(InternalEntry { key: IndexKey(key_bytes), child });
        }
        Ok(Self { header, p0, entries })
    }
}

/// Peeks a page's leading byte to decide whether to decode it as a leaf or
/// internal node, without committing to either decoder.
#[must_use]
pub fn is_leaf_page(buf: &[u8]) -> bool {
    buf.len() > 4 && buf[4] != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_node_round_trips() {
        let mut leaf = LeafNode::new(3);
        leaf.entries.push(LeafEntry {
            key: IndexKey::from_str("alice"),
            location: DocumentLocation::new(7, 1),
        });
        leaf.header.next_leaf_page_id = 9;
        let bytes = leaf.encode(4096);
        assert!(is_leaf_page(&bytes));
        let back = LeafNode::decode(&bytes).unwrap();
        assert_eq!(back, leaf);
    }

    #[test]
    fn internal_node_round_trips() {
        let mut node = InternalNode::new(1, 2);
        node.entries.push(InternalEntry { key: IndexKey::from_str("m"), child: 5 });
        let bytes = node.encode(4096);
        assert!(!is_leaf_page(&bytes));
        let back = InternalNode::decode(&bytes).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn max_per_node_has_a_floor_of_four() {
        assert_eq!(max_per_node(32), 4);
        assert!(max_per_node(16 * 1024) > 4);
    }
}
