//! §4.9: a materialized result cursor. `query::exec` already pages, sorts
//! and projects eagerly (the whole matching set is typically small enough
//! for an embedded store), so `Cursor` is a thin `Vec` iterator rather than
//! the teacher's lazy page-at-a-time walk.

use bson::Document as BsonDocument;

/// An already-materialized, already-ordered result set, consumed once.
#[derive(Debug, Clone)]
pub struct Cursor {
    docs: Vec<BsonDocument>,
    pos: usize,
}

impl Cursor {
    #[must_use]
    pub fn new(docs: Vec<BsonDocument>) -> Self {
        Self { docs, pos: 0 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Consumes the cursor, returning every remaining document.
    #[must_use]
    pub fn collect(self) -> Vec<BsonDocument> {
        self.docs
    }
}

impl Iterator for Cursor {
    type Item = BsonDocument;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.docs.len() {
            return None;
        }
        let doc = self.docs[self.pos].clone();
        self.pos += 1;
        Some(doc)
    }
}
