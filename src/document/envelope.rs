//! Encoder/decoder for the on-disk document envelope (§6): a length-prefixed,
//! `0x00`-terminated sequence of `[type:u8][compressed-key:u16][value]`
//! elements. This is independent of the `bson` crate's own wire format —
//! `bson::Document`/`bson::Bson` are used only as the in-memory value
//! representation that this module converts to and from raw bytes.
//!
//! Array elements omit the name field entirely (arrays are positional); only
//! document-shaped values carry compressed-key names, matching the spirit of
//! the element layout without growing the dictionary with stringified indices.

use crate::errors::DbError;
use bson::{Bson, Document as BsonDocument};
use std::collections::HashMap;

const TAG_DOUBLE: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_DOCUMENT: u8 = 0x03;
const TAG_ARRAY: u8 = 0x04;
const TAG_BINARY: u8 = 0x05;
const TAG_OBJECT_ID: u8 = 0x07;
const TAG_BOOLEAN: u8 = 0x08;
const TAG_DATETIME: u8 = 0x09;
const TAG_NULL: u8 = 0x0A;
const TAG_INT32: u8 = 0x10;
const TAG_INT64: u8 = 0x12;
const TAG_DECIMAL128: u8 = 0x13;

/// Collection-scoped `name -> u16` dictionary. Every distinct top-level or
/// nested field name a mapper has ever used is interned here; `encode` grows
/// it as needed, `decode` requires every referenced id to already be present.
#[derive(Debug, Clone, Default)]
pub struct KeyDictionary {
    name_to_id: HashMap<String, u16>,
    id_to_name: Vec<String>,
}

impl KeyDictionary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning its existing id or allocating a fresh one.
    ///
    /// # Errors
    /// Returns an error if the dictionary has exhausted the 16-bit id space.
    pub fn intern(&mut self, name: &str) -> Result<u16, DbError> {
        if let Some(&id) = self.name_to_id.get(name) {
            return Ok(id);
        }
        let id = u16::try_from(self.id_to_name.len())
            .map_err(|_| DbError::Corrupted("key dictionary exhausted (> 65535 names)".into()))?;
        self.id_to_name.push(name.to_string());
        self.name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    #[must_use]
    pub fn name_of(&self, id: u16) -> Option<&str> {
        self.id_to_name.get(id as usize).map(String::as_str)
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.name_to_id.get(name).copied()
    }

    /// Pairs for persisting the dictionary in the catalog, in id order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.id_to_name
    }

    /// Rebuilds a dictionary from a persisted `id -> name` vector.
    #[must_use]
    pub fn from_entries(entries: Vec<String>) -> Self {
        let mut name_to_id = HashMap::with_capacity(entries.len());
        for (id, name) in entries.iter().enumerate() {
            name_to_id.insert(name.clone(), id as u16);
        }
        Self { name_to_id, id_to_name: entries }
    }
}

/// Encodes `doc` into the on-disk envelope, interning any new field names
/// into `dict`.
///
/// # Errors
/// Returns an error if the dictionary overflows or a value cannot be
/// represented in this subset.
pub fn encode(doc: &BsonDocument, dict: &mut KeyDictionary, out: &mut Vec<u8>) -> Result<(), DbError> {
    let start = out.len();
    out.extend_from_slice(&0i32.to_le_bytes());
    for (name, value) in doc {
        let id = dict.intern(name)?;
        encode_element(id, value, out)?;
    }
    out.push(0x00);
    let len = i32::try_from(out.len() - start)
        .map_err(|_| DbError::DocumentTooLarge { len: out.len() - start })?;
    out[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn encode_element(id: u16, value: &Bson, out: &mut Vec<u8>) -> Result<(), DbError> {
    out.push(type_tag(value)?);
    out.extend_from_slice(&id.to_le_bytes());
    encode_value(value, out)
}

fn type_tag(value: &Bson) -> Result<u8, DbError> {
    Ok(match value {
        Bson::Double(_) => TAG_DOUBLE,
        Bson::String(_) => TAG_STRING,
        Bson::Document(_) => TAG_DOCUMENT,
        Bson::Array(_) => TAG_ARRAY,
        Bson::Binary(_) => TAG_BINARY,
        Bson::ObjectId(_) => TAG_OBJECT_ID,
        Bson::Boolean(_) => TAG_BOOLEAN,
        Bson::DateTime(_) => TAG_DATETIME,
        Bson::Null => TAG_NULL,
        Bson::Int32(_) => TAG_INT32,
        Bson::Int64(_) => TAG_INT64,
        Bson::Decimal128(_) => TAG_DECIMAL128,
        other => {
            return Err(DbError::Corrupted(format!(
                "value type {other:?} is outside the supported envelope subset"
            )));
        }
    })
}

fn encode_value(value: &Bson, out: &mut Vec<u8>) -> Result<(), DbError> {
    match value {
        Bson::Double(d) => out.extend_from_slice(&d.to_le_bytes()),
        Bson::String(s) => encode_cstr_like(s, out),
        Bson::Document(d) => {
            let mut inner_dict = KeyDictionary::new();
            // nested documents reuse the parent's name space conceptually but
            // are self-contained on the wire: each nested doc carries its own
            // compact dictionary-free element list keyed by name-interned ids
            // local to this call, since nested field names are rare and small.
            let start = out.len();
            out.extend_from_slice(&0i32.to_le_bytes());
            for (name, v) in d.iter() {
                let id = inner_dict.intern(name)?;
                encode_element(id, v, out)?;
            }
            out.push(0x00);
            let len = i32::try_from(out.len() - start)
                .map_err(|_| DbError::DocumentTooLarge { len: out.len() - start })?;
            out[start..start + 4].copy_from_slice(&len.to_le_bytes());
            // persist the nested dictionary inline so decode is self-sufficient
            encode_name_table(&inner_dict, out)?;
        }
        Bson::Array(a) => {
            let count = i32::try_from(a.len())
                .map_err(|_| DbError::Corrupted("array too long for i32 count".into()))?;
            out.extend_from_slice(&count.to_le_bytes());
            for v in a {
                out.push(type_tag(v)?);
                encode_value(v, out)?;
            }
        }
        Bson::Binary(b) => {
            out.push(b.subtype.into());
            let len = i32::try_from(b.bytes.len())
                .map_err(|_| DbError::Corrupted("binary too long for i32 length".into()))?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&b.bytes);
        }
        Bson::ObjectId(id) => out.extend_from_slice(&id.bytes()),
        Bson::Boolean(b) => out.push(u8::from(*b)),
        Bson::DateTime(dt) => out.extend_from_slice(&dt.timestamp_millis().to_le_bytes()),
        Bson::Null => {}
        Bson::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
        Bson::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
        Bson::Decimal128(d) => out.extend_from_slice(&d.bytes()),
        other => {
            return Err(DbError::Corrupted(format!(
                "value type {other:?} is outside the supported envelope subset"
            )));
        }
    }
    Ok(())
}

fn encode_cstr_like(s: &str, out: &mut Vec<u8>) {
    let len = i32::try_from(s.len() + 1).unwrap_or(i32::MAX);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out.push(0x00);
}

fn encode_name_table(dict: &KeyDictionary, out: &mut Vec<u8>) -> Result<(), DbError> {
    let count = u16::try_from(dict.entries().len())
        .map_err(|_| DbError::Corrupted("nested dictionary exhausted".into()))?;
    out.extend_from_slice(&count.to_le_bytes());
    for name in dict.entries() {
        encode_cstr_like(name, out);
    }
    Ok(())
}

/// Decodes an on-disk envelope into an in-memory `bson::Document`, resolving
/// compressed keys through `dict`. Unknown trailing bytes within a document
/// past its declared length are not consulted; unknown fields are preserved
/// on read (never stripped) per the collection layer's schema policy.
///
/// # Errors
/// Returns an error if `bytes` is truncated, its declared length is
/// inconsistent, or it references a key id absent from `dict`.
pub fn decode(bytes: &[u8], dict: &KeyDictionary) -> Result<BsonDocument, DbError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    decode_document(&mut cursor, dict)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DbError> {
        if self.pos + n > self.bytes.len() {
            return Err(DbError::Corrupted("envelope truncated".into()));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, DbError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DbError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, DbError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, DbError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, DbError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn decode_document(cur: &mut Cursor<'_>, dict: &KeyDictionary) -> Result<BsonDocument, DbError> {
    let _len = cur.i32()?;
    let mut doc = BsonDocument::new();
    loop {
        let tag = cur.u8()?;
        if tag == 0x00 {
            break;
        }
        let id = cur.u16()?;
        let name = dict
            .name_of(id)
            .ok_or_else(|| DbError::Corrupted(format!("unknown compressed key id {id}")))?
            .to_string();
        let value = decode_value(tag, cur, dict)?;
        doc.insert(name, value);
    }
    Ok(doc)
}

fn decode_name_table(cur: &mut Cursor<'_>) -> Result<KeyDictionary, DbError> {
    let count = cur.u16()?;
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        names.push(decode_cstr_like(cur)?);
    }
    Ok(KeyDictionary::from_entries(names))
}

fn decode_cstr_like(cur: &mut Cursor<'_>) -> Result<String, DbError> {
    let len = cur.i32()?;
    if len < 1 {
        return Err(DbError::Corrupted("negative or zero string length".into()));
    }
    let bytes = cur.take(len as usize - 1)?.to_vec();
    let _nul = cur.u8()?;
    String::from_utf8(bytes).map_err(|e| DbError::Corrupted(format!("invalid utf-8: {e}")))
}

fn decode_value(tag: u8, cur: &mut Cursor<'_>, dict: &KeyDictionary) -> Result<Bson, DbError> {
    Ok(match tag {
        TAG_DOUBLE => Bson::Double(cur.f64()?),
        TAG_STRING => Bson::String(decode_cstr_like(cur)?),
        TAG_DOCUMENT => {
            // Nested documents are self-describing: body first, then their
            // own compact name table, so decode the body with a temporary
            // dictionary resolved from the table that follows it.
            let body_start = cur.pos;
            let len = cur.i32()? as usize;
            let body_end = body_start + len;
            cur.pos = body_end;
            let table = decode_name_table(cur)?;
            let mut body_cur = Cursor { bytes: cur.bytes, pos: body_start };
            Bson::Document(decode_document(&mut body_cur, &table)?)
        }
        TAG_ARRAY => {
            let count = cur.i32()?;
            let mut arr = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let t = cur.u8()?;
                arr.push(decode_value(t, cur, dict)?);
            }
            Bson::Array(arr)
        }
        TAG_BINARY => {
            let subtype = bson::spec::BinarySubtype::from(cur.u8()?);
            let len = cur.i32()?;
            let bytes = cur.take(len.max(0) as usize)?.to_vec();
            Bson::Binary(bson::Binary { subtype, bytes })
        }
        TAG_OBJECT_ID => {
            let raw: [u8; 12] = cur.take(12)?.try_into().unwrap();
            Bson::ObjectId(bson::oid::ObjectId::from_bytes(raw))
        }
        TAG_BOOLEAN => Bson::Boolean(cur.u8()? != 0),
        TAG_DATETIME => Bson::DateTime(bson::DateTime::from_millis(cur.i64()?)),
        TAG_NULL => Bson::Null,
        TAG_INT32 => Bson::Int32(cur.i32()?),
        TAG_INT64 => Bson::Int64(cur.i64()?),
        TAG_DECIMAL128 => {
            let raw: [u8; 16] = cur.take(16)?.try_into().unwrap();
            Bson::Decimal128(bson::Decimal128::from_bytes(raw))
        }
        other => return Err(DbError::Corrupted(format!("unknown envelope type tag {other:#x}"))),
    })
}
