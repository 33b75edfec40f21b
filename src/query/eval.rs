//! §4.9: in-memory filter evaluation, cross-type BSON comparison, and the
//! sort/projection passes the evaluator applies after candidate selection.

use super::types::{CmpOp, Filter, Order, SortSpec};
use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

/// Reads the value at a dotted field path, walking nested documents.
/// Returns `None` if any segment is absent or not a document.
#[must_use]
pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

/// Total order across BSON's value universe: `null < bool < numeric <
/// string < ObjectId < DateTime < binary < document < array`. Numeric
/// comparison (`Int32`/`Int64`/`Double`) is cross-kind, by value.
#[must_use]
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null => 0,
        Bson::Boolean(_) => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 2,
        Bson::String(_) => 3,
        Bson::ObjectId(_) => 4,
        Bson::DateTime(_) => 5,
        Bson::Binary(_) => 6,
        Bson::Document(_) => 7,
        Bson::Array(_) => 8,
        _ => 9,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

/// Coerces a numeric `Bson` value to `i64` for `$mod`; a `Double` only
/// coerces when it carries no fractional part.
fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    }
}

/// The `$type` name for a value, matching the vocabulary documented on
/// `Filter::Type`.
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "document",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        _ => "unknown",
    }
}

/// Matches a scalar array element (one that isn't itself a document) against
/// a `$elemMatch` sub-filter: the element is compared directly, as if it were
/// the value a path resolved to, rather than walked by path.
fn eval_scalar_elem(value: &Bson, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::Cmp { op, value: target, .. } => matches_cmp(Some(value), *op, target),
        Filter::In { values, .. } => is_in_set(value, values),
        Filter::Nin { values, .. } => !is_in_set(value, values),
        Filter::Exists { should_exist, .. } => *should_exist,
        Filter::Type { type_name, .. } => bson_type_name(value) == type_name,
        Filter::StartsWith { prefix, .. } => matches!(value, Bson::String(s) if s.starts_with(prefix.as_str())),
        Filter::EndsWith { suffix, .. } => matches!(value, Bson::String(s) if s.ends_with(suffix.as_str())),
        Filter::Contains { substring, .. } => matches!(value, Bson::String(s) if s.contains(substring.as_str())),
        Filter::Regex { .. } => false,
        Filter::ElemMatch { filter, .. } => matches!(value, Bson::Array(items) if items.iter().any(|item| match item {
            Bson::Document(d) => eval_filter(d, filter),
            other => eval_scalar_elem(other, filter),
        })),
        Filter::Size { size, .. } => matches!(value, Bson::Array(items) if items.len() == *size),
        Filter::All { values, .. } => matches!(value, Bson::Array(items) if values.iter().all(|v| items.iter().any(|item| values_equal(item, v)))),
        Filter::Mod { divisor, remainder, .. } => as_i64(value).is_some_and(|v| *divisor != 0 && v % divisor == *remainder),
        Filter::And(children) => children.iter().all(|f| eval_scalar_elem(value, f)),
        Filter::Or(children) => children.iter().any(|f| eval_scalar_elem(value, f)),
        Filter::Nor(children) => !children.iter().any(|f| eval_scalar_elem(value, f)),
        Filter::Not(inner) => !eval_scalar_elem(value, inner),
    }
}

/// Compares two BSON values by the cross-type total order `type_rank`
/// defines, falling within a kind by the natural comparison for that kind.
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Bson::Null, Bson::Null) => Ordering::Equal,
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => compare_arrays(x, y),
        _ => as_f64(a)
            .zip(as_f64(b))
            .map_or(Ordering::Equal, |(x, y)| x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
    }
}

fn compare_documents(a: &BsonDocument, b: &BsonDocument) -> Ordering {
    let mut ak: Vec<&String> = a.keys().collect();
    let mut bk: Vec<&String> = b.keys().collect();
    ak.sort();
    bk.sort();
    for (ka, kb) in ak.iter().zip(bk.iter()) {
        match ka.cmp(kb) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match compare_bson(a.get(ka.as_str()).unwrap(), b.get(kb.as_str()).unwrap()) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    ak.len().cmp(&bk.len())
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match compare_bson(x, y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare_bson(a, b) == Ordering::Equal
}

fn is_in_set(value: &Bson, set: &[Bson]) -> bool {
    set.iter().any(|v| values_equal(value, v))
}

fn matches_cmp(found: Option<&Bson>, op: CmpOp, value: &Bson) -> bool {
    match (found, op) {
        (None, CmpOp::Ne) => true,
        (None, _) => false,
        (Some(found), op) => {
            let ord = compare_bson(found, value);
            match op {
                CmpOp::Eq => ord == Ordering::Equal,
                CmpOp::Ne => ord != Ordering::Equal,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Gte => ord != Ordering::Less,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Lte => ord != Ordering::Greater,
            }
        }
    }
}

/// Evaluates `filter` against `doc`, the single residual-correctness pass
/// every selected candidate runs through regardless of how it was narrowed.
#[must_use]
pub fn eval_filter(doc: &BsonDocument, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::Cmp { path, op, value } => matches_cmp(get_path(doc, path), *op, value),
        Filter::In { path, values } => get_path(doc, path).is_some_and(|v| is_in_set(v, values)),
        Filter::Nin { path, values } => !get_path(doc, path).is_some_and(|v| is_in_set(v, values)),
        Filter::Exists { path, should_exist } => get_path(doc, path).is_some() == *should_exist,
        Filter::Type { path, type_name } => get_path(doc, path).is_some_and(|v| bson_type_name(v) == type_name),
        Filter::StartsWith { path, prefix } => {
            matches!(get_path(doc, path), Some(Bson::String(s)) if s.starts_with(prefix.as_str()))
        }
        Filter::EndsWith { path, suffix } => {
            matches!(get_path(doc, path), Some(Bson::String(s)) if s.ends_with(suffix.as_str()))
        }
        Filter::Contains { path, substring } => {
            matches!(get_path(doc, path), Some(Bson::String(s)) if s.contains(substring.as_str()))
        }
        Filter::Regex { path, pattern } => match_regex(doc, path, pattern),
        Filter::ElemMatch { path, filter } => match get_path(doc, path) {
            Some(Bson::Array(items)) => items.iter().any(|item| match item {
                Bson::Document(d) => eval_filter(d, filter),
                other => eval_scalar_elem(other, filter),
            }),
            _ => false,
        },
        Filter::Size { path, size } => matches!(get_path(doc, path), Some(Bson::Array(items)) if items.len() == *size),
        Filter::All { path, values } => match get_path(doc, path) {
            Some(Bson::Array(items)) => values.iter().all(|v| items.iter().any(|item| values_equal(item, v))),
            _ => false,
        },
        Filter::Mod { path, divisor, remainder } => match get_path(doc, path).and_then(as_i64) {
            Some(v) if *divisor != 0 => v % divisor == *remainder,
            _ => false,
        },
        Filter::And(children) => children.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(children) => children.iter().any(|f| eval_filter(doc, f)),
        Filter::Nor(children) => !children.iter().any(|f| eval_filter(doc, f)),
        Filter::Not(inner) => !eval_filter(doc, inner),
    }
}

#[cfg(feature = "regex")]
fn match_regex(doc: &BsonDocument, path: &str, pattern: &str) -> bool {
    let Some(Bson::String(s)) = get_path(doc, path) else { return false };
    regex::Regex::new(pattern).is_ok_and(|re| re.is_match(s))
}

#[cfg(not(feature = "regex"))]
fn match_regex(_doc: &BsonDocument, _path: &str, _pattern: &str) -> bool {
    false
}

/// Total order over two documents given a (possibly multi-field) sort spec;
/// a field absent from a document sorts as `Bson::Null` would.
#[must_use]
pub fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let av = get_path(a, &spec.path).cloned().unwrap_or(Bson::Null);
        let bv = get_path(b, &spec.path).cloned().unwrap_or(Bson::Null);
        let ord = compare_bson(&av, &bv);
        let ord = if spec.order == Order::Desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Projects `doc` down to the dotted paths in `select`, preserving their
/// nesting; `_id` is always included regardless of `select`'s contents,
/// matching the teacher's "identity survives projection" convention.
#[must_use]
pub fn project_fields(doc: &BsonDocument, select: &[String]) -> BsonDocument {
    let mut out = BsonDocument::new();
    if let Some(id) = doc.get("_id") {
        out.insert("_id", id.clone());
    }
    for path in select {
        if let Some(value) = get_path(doc, path) {
            insert_path(&mut out, path, value.clone());
        }
    }
    out
}

fn insert_path(doc: &mut BsonDocument, path: &str, value: Bson) {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else { return };
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        doc.insert(first, value);
        return;
    }
    let child = doc.entry(first.to_string()).or_insert_with(|| Bson::Document(BsonDocument::new()));
    if !matches!(child, Bson::Document(_)) {
        *child = Bson::Document(BsonDocument::new());
    }
    let Bson::Document(nested) = child else { unreachable!() };
    insert_path(nested, &rest.join("."), value);
}
