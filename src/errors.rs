use thiserror::Error;

/// Errors surfaced by the storage engine, the B+Tree index, the document
/// collection layer, and the query evaluator.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted: {0}")]
    Corrupted(String),

    #[error("collection not found: {0}")]
    NoSuchCollection(String),

    #[error("document not found")]
    NoSuchDocument,

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("index not found: {0}")]
    NoSuchIndex(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("unique index violation on {index}: key already present")]
    UniqueViolation { index: String },

    #[error("document too large: {len} bytes exceeds the 16 MiB cap")]
    DocumentTooLarge { len: usize },

    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON serialization error: {0}")]
    BsonSer(#[from] bson::ser::Error),

    #[error("BSON deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),
}
