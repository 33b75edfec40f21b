//! §4.9: the shared vocabulary of the query layer — the filter tree, sort
//! and projection specs, and the options bag threaded through `find`/
//! `update`/`delete` calls.

use bson::{Bson, Document as BsonDocument};

/// Comparison operators a filter leaf can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Ascending or descending, for one field of a sort spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// One field in a multi-field sort: field path plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub path: String,
    pub order: Order,
}

/// A parsed BLQL filter: a boolean-combinable tree of comparison, membership,
/// existence and pattern-match leaves over dotted field paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Cmp { path: String, op: CmpOp, value: Bson },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Exists { path: String, should_exist: bool },
    /// `$type`: matches when the value at `path` has the named BSON type
    /// (`"string"`, `"int"`, `"long"`, `"double"`, `"bool"`, `"objectId"`,
    /// `"date"`, `"binary"`, `"null"`, `"document"`, `"array"`).
    Type { path: String, type_name: String },
    StartsWith { path: String, prefix: String },
    EndsWith { path: String, suffix: String },
    Contains { path: String, substring: String },
    Regex { path: String, pattern: String },
    /// `$elemMatch`: the value at `path` is an array with at least one
    /// element matching the nested filter.
    ElemMatch { path: String, filter: Box<Filter> },
    /// `$size`: the value at `path` is an array of exactly `size` elements.
    Size { path: String, size: usize },
    /// `$all`: the value at `path` is an array containing every value in
    /// `values` (in any order).
    All { path: String, values: Vec<Bson> },
    /// `$mod`: the numeric value at `path` satisfies `value % divisor == remainder`.
    Mod { path: String, divisor: i64, remainder: i64 },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
    /// Matches every document; the empty filter `{}`.
    True,
}

/// The options accompanying a `find`: filter, sort, projection and
/// pagination, assembled by `query::parse` from a BLQL request.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Option<Filter>,
    pub sort: Vec<SortSpec>,
    pub select: Option<Vec<String>>,
    pub skip: usize,
    pub take: Option<usize>,
}

/// A parsed update document: field paths to set, paths to unset. `$set`
/// with a dotted path replaces (creating intermediate documents as needed)
/// rather than merging.
#[derive(Debug, Clone, Default)]
pub struct UpdateDoc {
    pub set: Vec<(String, Bson)>,
    pub unset: Vec<String>,
}

/// Outcome of a bulk `update_many`/`update_one` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub matched: usize,
    pub modified: usize,
}

/// Outcome of a bulk `delete_many`/`delete_one` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: usize,
}

/// A fully assembled query ready for planning: everything `FindOptions`
/// carries, bundled so the optimizer and evaluator can pass one value around.
#[derive(Debug, Clone, Default)]
pub struct QueryModel {
    pub filter: Filter,
    pub sort: Vec<SortSpec>,
    pub select: Option<Vec<String>>,
    pub skip: usize,
    pub take: Option<usize>,
}

impl Default for Filter {
    fn default() -> Self {
        Filter::True
    }
}

impl From<FindOptions> for QueryModel {
    fn from(opts: FindOptions) -> Self {
        Self {
            filter: opts.filter.unwrap_or(Filter::True),
            sort: opts.sort,
            select: opts.select,
            skip: opts.skip,
            take: opts.take,
        }
    }
}

/// Applies `update` to `doc` in place: `$set` paths are created (including
/// intermediate nested documents) or overwritten, `$unset` paths are removed.
/// Dotted paths walk/create nested `bson::Document`s; a path segment that
/// already holds a non-document value is overwritten rather than merged.
pub fn apply_update(doc: &mut BsonDocument, update: &UpdateDoc) -> bool {
    let mut modified = false;
    for (path, value) in &update.set {
        if set_path(doc, path, value.clone()) {
            modified = true;
        }
    }
    for path in &update.unset {
        if unset_path(doc, path) {
            modified = true;
        }
    }
    modified
}

fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> bool {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else { return false };
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        let changed = doc.get(first) != Some(&value);
        doc.insert(first, value);
        return changed;
    }
    let child = doc.entry(first.to_string()).or_insert_with(|| Bson::Document(BsonDocument::new()));
    if !matches!(child, Bson::Document(_)) {
        *child = Bson::Document(BsonDocument::new());
    }
    let Bson::Document(nested) = child else { unreachable!() };
    set_path(nested, &rest.join("."), value)
}

fn unset_path(doc: &mut BsonDocument, path: &str) -> bool {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else { return false };
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return doc.remove(first).is_some();
    }
    match doc.get_mut(first) {
        Some(Bson::Document(nested)) => unset_path(nested, &rest.join(".")),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_creates_intermediate_documents() {
        let mut d = doc! {};
        let update = UpdateDoc { set: vec![("a.b.c".into(), Bson::Int32(1))], unset: vec![] };
        assert!(apply_update(&mut d, &update));
        assert_eq!(d.get_document("a").unwrap().get_document("b").unwrap().get_i32("c").unwrap(), 1);
    }

    #[test]
    fn unset_removes_a_top_level_field() {
        let mut d = doc! {"a": 1i32, "b": 2i32};
        let update = UpdateDoc { set: vec![], unset: vec!["a".into()] };
        assert!(apply_update(&mut d, &update));
        assert!(!d.contains_key("a"));
        assert!(d.contains_key("b"));
    }

    #[test]
    fn setting_the_same_value_reports_no_modification() {
        let mut d = doc! {"a": 1i32};
        let update = UpdateDoc { set: vec![("a".into(), Bson::Int32(1))], unset: vec![] };
        assert!(!apply_update(&mut d, &update));
    }
}
