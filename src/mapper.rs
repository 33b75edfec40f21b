//! The host-language serialization contract. `blite` never reflects on an
//! entity type; every entity crosses the boundary through an implementation
//! of `DocumentMapper`.

use crate::btree::key::IndexKey;
use crate::document::envelope::{self, KeyDictionary};
use crate::errors::DbError;
use crate::index_manager::project_key;
use crate::types::{KeyKind, SchemaVersion};
use bson::{Bson, Document as BsonDocument};
use parking_lot::RwLock;
use std::sync::Arc;

/// Host-supplied capability object bridging a typed entity `T` and the raw
/// byte/BSON world the storage core operates on. The core only ever sees this
/// contract — no runtime introspection, no inheritance hierarchy.
pub trait DocumentMapper<T>: Send + Sync {
    /// Serializes `entity` into `buffer`, returning the number of bytes written.
    /// Implementations that run out of room should return
    /// `DbError::DocumentTooLarge` only once the 16 MiB ceiling is exceeded;
    /// smaller overflows are handled by the collection retrying with a larger
    /// buffer.
    ///
    /// # Errors
    /// Returns an error if `entity` cannot be represented in the envelope format.
    fn serialize(&self, entity: &T, buffer: &mut Vec<u8>) -> Result<usize, DbError>;

    /// Reconstructs an entity from its on-disk byte representation.
    ///
    /// # Errors
    /// Returns an error if `bytes` is not a well-formed envelope for `T`.
    fn deserialize(&self, bytes: &[u8]) -> Result<T, DbError>;

    /// Returns the entity's identity field, encoded as an `IndexKey`. A
    /// all-zero key of the reported `key_kind`'s width signals "not yet
    /// assigned" and triggers auto-generation on insert.
    fn get_id(&self, entity: &T) -> IndexKey;

    /// Writes a freshly generated identity back into the entity.
    fn set_id(&self, entity: &mut T, id: &IndexKey);

    /// Declares which identity type `blite` should auto-generate when
    /// `get_id` reports an unassigned key.
    fn key_kind(&self) -> KeyKind;

    /// Projects the value at `path` into its `IndexKey` encoding, for
    /// maintaining a secondary index over that path. Returns `None` when the
    /// entity has no value at `path` (the index simply omits that entity).
    fn to_index_key(&self, entity: &T, path: &str) -> Option<IndexKey>;

    /// The set of field paths this mapper knows how to project; used to
    /// validate `create_index` calls ahead of time.
    fn used_keys(&self) -> &[String];

    /// The mapper's current schema descriptor, compared against the
    /// collection's latest persisted schema on open.
    fn get_schema(&self) -> SchemaVersion;
}

/// The default mapper bundled with `blite`: entities are plain
/// `bson::Document`s, encoded through `document::envelope` against a
/// collection-scoped `KeyDictionary` shared with the owning `Collection`.
///
/// `_id` is read/written as a `Bson::ObjectId` (or a 16-byte `Bson::Binary`
/// for a `Guid`-keyed collection); any other shape is treated as an
/// unassigned identity.
pub struct BsonMapper {
    dict: Arc<RwLock<KeyDictionary>>,
}

impl BsonMapper {
    #[must_use]
    pub fn new(dict: Arc<RwLock<KeyDictionary>>) -> Self {
        Self { dict }
    }
}

impl DocumentMapper<BsonDocument> for BsonMapper {
    fn serialize(&self, entity: &BsonDocument, buffer: &mut Vec<u8>) -> Result<usize, DbError> {
        let mut dict = self.dict.write();
        envelope::encode(entity, &mut dict, buffer)?;
        Ok(buffer.len())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<BsonDocument, DbError> {
        let dict = self.dict.read();
        envelope::decode(bytes, &dict)
    }

    fn get_id(&self, entity: &BsonDocument) -> IndexKey {
        match entity.get("_id") {
            Some(Bson::ObjectId(oid)) => IndexKey(oid.bytes().to_vec()),
            Some(Bson::Binary(b)) if b.bytes.len() == 16 => IndexKey(b.bytes.clone()),
            _ => IndexKey(vec![0u8; 12]),
        }
    }

    fn set_id(&self, entity: &mut BsonDocument, id: &IndexKey) {
        let bytes = id.as_bytes();
        if bytes.len() == 16 {
            entity.insert(
                "_id",
                Bson::Binary(bson::Binary { subtype: bson::spec::BinarySubtype::Uuid, bytes: bytes.to_vec() }),
            );
            return;
        }
        let mut raw = [0u8; 12];
        let n = bytes.len().min(12);
        raw[..n].copy_from_slice(&bytes[..n]);
        entity.insert("_id", Bson::ObjectId(bson::oid::ObjectId::from_bytes(raw)));
    }

    fn key_kind(&self) -> KeyKind {
        KeyKind::ObjectId
    }

    fn to_index_key(&self, entity: &BsonDocument, path: &str) -> Option<IndexKey> {
        project_key(entity, path)
    }

    fn used_keys(&self) -> &[String] {
        &[]
    }

    fn get_schema(&self) -> SchemaVersion {
        // A document mapper has no fixed shape to version; `Collection` still
        // stamps every document with the (constant) schema version it reports.
        SchemaVersion { version: 1, hash: 0 }
    }
}
