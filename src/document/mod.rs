//! The on-disk document envelope: a BSON-flavored subset with a
//! collection-scoped field-name dictionary compressing names to 16-bit ids.
pub mod envelope;

pub use envelope::{KeyDictionary, decode, encode};
