//! Crate-wide primitive types shared by the storage, index and collection layers.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifies a page within a `PageFile`. Page 0 is reserved for the file header.
pub type PageId = u32;

/// Identifies a transaction. 0 means "no transaction / read latest committed".
pub type TransactionId = u64;

/// Identifies a slot within a slotted page.
pub type SlotIndex = u16;

/// Where a document's primary slot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub page_id: PageId,
    pub slot: SlotIndex,
}

impl DocumentLocation {
    #[must_use]
    pub const fn new(page_id: PageId, slot: SlotIndex) -> Self {
        Self { page_id, slot }
    }
}

/// A collection's schema version: an ordinal plus a hash of the mapper's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub version: i32,
    pub hash: u64,
}

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// 12-byte unique identifier: 4-byte seconds-since-epoch, 5-byte machine/random
/// suffix, 3-byte monotonic counter (all big-endian within their field), giving
/// lexicographic == chronological order within a process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    #[must_use]
    pub fn new() -> Self {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&(secs as u32).to_be_bytes());
        rand::rng().fill(&mut bytes[4..9]);
        let counter = OID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        let mut i = 0;
        while i < 12 {
            if self.0[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 12])
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// 16-byte identifier used where the mapper declares a field's key kind as
/// `KeyKind::Guid` rather than `ObjectId`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    #[must_use]
    pub fn new() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        let mut i = 0;
        while i < 16 {
            if self.0[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 16])
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", uuid::Uuid::from_bytes(self.0))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

/// The kind of key a mapper reports for a collection's identity field,
/// controlling auto-generation of the default value on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    ObjectId,
    Guid,
    Other,
}
