//! §4.9 BLQL: the JSON filter and update dialect — MQL-style nested JSON
//! (`{"age": {"$gte": 18}}`, bare values as an implicit `$eq`, multiple
//! top-level field keys implicitly AND-combined) parsed into a `Filter`
//! tree, mirroring the teacher's `query/parse.rs` JSON-filter entry point
//! generalized to the nested shape `spec.md` §4.9/§8 scenario 6 specifies.

use super::types::{CmpOp, Filter, UpdateDoc};
use crate::errors::DbError;
use bson::Bson;
use serde_json::{Map as JsonMap, Value as Json};

/// Top-level boolean combinators recognized ahead of any field lookup.
const KNOWN_COMBINATORS: [&str; 4] = ["$and", "$or", "$nor", "$not"];

fn json_to_bson(value: &Json) -> Result<Bson, DbError> {
    Ok(bson::to_bson(value)?)
}

fn bson_to_json(value: &Bson) -> Json {
    match value {
        Bson::Double(d) => serde_json::json!(d),
        Bson::String(s) => serde_json::json!(s),
        Bson::Array(items) => Json::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => {
            let mut map = JsonMap::new();
            for (k, v) in doc {
                map.insert(k.clone(), bson_to_json(v));
            }
            Json::Object(map)
        }
        Bson::Boolean(b) => serde_json::json!(b),
        Bson::Null => Json::Null,
        Bson::Int32(i) => serde_json::json!(i),
        Bson::Int64(i) => serde_json::json!(i),
        Bson::ObjectId(oid) => serde_json::json!(oid.to_hex()),
        Bson::DateTime(dt) => serde_json::json!(dt.timestamp_millis()),
        other => serde_json::json!(other.to_string()),
    }
}

/// Parses a BLQL filter document into a `Filter` tree. Top level: a JSON
/// object whose keys are either one of `$and`/`$or`/`$nor`/`$not`, or a
/// dotted field path; multiple field keys in the same object are
/// implicitly AND-combined, matching MQL's multi-field-object convention.
///
/// # Errors
/// Returns `UnsupportedQuery` for an unrecognized `$`-operator, or
/// `ParseError`/`Json` if the document is otherwise malformed.
pub fn parse_filter_json(text: &str) -> Result<Filter, DbError> {
    let value: Json = serde_json::from_str(text)?;
    parse_value(&value)
}

fn parse_value(value: &Json) -> Result<Filter, DbError> {
    let Json::Object(map) = value else {
        return Err(DbError::ParseError(format!("expected a filter object, got {value}")));
    };
    if map.is_empty() {
        return Ok(Filter::True);
    }
    let mut parts = Vec::with_capacity(map.len());
    for (key, val) in map {
        parts.push(parse_entry(key, val)?);
    }
    Ok(if parts.len() == 1 { parts.into_iter().next().unwrap() } else { Filter::And(parts) })
}

fn parse_entry(key: &str, val: &Json) -> Result<Filter, DbError> {
    match key {
        "$and" => Ok(Filter::And(parse_combinator_array(val)?)),
        "$or" => Ok(Filter::Or(parse_combinator_array(val)?)),
        "$nor" => Ok(Filter::Nor(parse_combinator_array(val)?)),
        "$not" => Ok(Filter::Not(Box::new(parse_value(val)?))),
        path if path.starts_with('$') => Err(DbError::UnsupportedQuery(path.to_string())),
        path => parse_field(path, val),
    }
}

fn parse_combinator_array(val: &Json) -> Result<Vec<Filter>, DbError> {
    let Json::Array(items) = val else {
        return Err(DbError::ParseError(format!("expected an array of sub-filters, got {val}")));
    };
    items.iter().map(parse_value).collect()
}

/// A field value that's a non-empty object whose keys are all `$`-prefixed
/// is an operator map (possibly several operators, implicitly AND-combined
/// for that one path); anything else is an equality match (`$eq` shorthand).
fn parse_field(path: &str, val: &Json) -> Result<Filter, DbError> {
    if let Json::Object(ops) = val {
        if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) {
            let mut leaves = Vec::with_capacity(ops.len());
            for (op, op_val) in ops {
                leaves.push(parse_op(path, op, op_val)?);
            }
            return Ok(if leaves.len() == 1 { leaves.into_iter().next().unwrap() } else { Filter::And(leaves) });
        }
    }
    Ok(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: json_to_bson(val)? })
}

fn parse_op(path: &str, op: &str, val: &Json) -> Result<Filter, DbError> {
    let path = path.to_string();
    match op {
        "$eq" => Ok(Filter::Cmp { path, op: CmpOp::Eq, value: json_to_bson(val)? }),
        "$ne" => Ok(Filter::Cmp { path, op: CmpOp::Ne, value: json_to_bson(val)? }),
        "$gt" => Ok(Filter::Cmp { path, op: CmpOp::Gt, value: json_to_bson(val)? }),
        "$gte" => Ok(Filter::Cmp { path, op: CmpOp::Gte, value: json_to_bson(val)? }),
        "$lt" => Ok(Filter::Cmp { path, op: CmpOp::Lt, value: json_to_bson(val)? }),
        "$lte" => Ok(Filter::Cmp { path, op: CmpOp::Lte, value: json_to_bson(val)? }),
        "$in" => Ok(Filter::In { path, values: parse_value_array(val)? }),
        "$nin" => Ok(Filter::Nin { path, values: parse_value_array(val)? }),
        "$exists" => Ok(Filter::Exists {
            path,
            should_exist: val.as_bool().ok_or_else(|| DbError::ParseError("$exists expects a bool".into()))?,
        }),
        "$type" => Ok(Filter::Type {
            path,
            type_name: val.as_str().ok_or_else(|| DbError::ParseError("$type expects a string".into()))?.to_string(),
        }),
        "$regex" => Ok(Filter::Regex {
            path,
            pattern: val.as_str().ok_or_else(|| DbError::ParseError("$regex expects a string".into()))?.to_string(),
        }),
        "$startsWith" => Ok(Filter::StartsWith {
            path,
            prefix: val.as_str().ok_or_else(|| DbError::ParseError("$startsWith expects a string".into()))?.to_string(),
        }),
        "$endsWith" => Ok(Filter::EndsWith {
            path,
            suffix: val.as_str().ok_or_else(|| DbError::ParseError("$endsWith expects a string".into()))?.to_string(),
        }),
        "$contains" => Ok(Filter::Contains {
            path,
            substring: val.as_str().ok_or_else(|| DbError::ParseError("$contains expects a string".into()))?.to_string(),
        }),
        "$elemMatch" => Ok(Filter::ElemMatch { path, filter: Box::new(parse_value(val)?) }),
        "$size" => Ok(Filter::Size {
            path,
            size: val.as_u64().ok_or_else(|| DbError::ParseError("$size expects a non-negative integer".into()))? as usize,
        }),
        "$all" => Ok(Filter::All { path, values: parse_value_array(val)? }),
        "$mod" => {
            let Json::Array(items) = val else {
                return Err(DbError::ParseError("$mod expects a [divisor, remainder] array".into()));
            };
            let [divisor, remainder] = items.as_slice() else {
                return Err(DbError::ParseError("$mod expects exactly two elements".into()));
            };
            let divisor = divisor.as_i64().ok_or_else(|| DbError::ParseError("$mod divisor must be an integer".into()))?;
            let remainder = remainder.as_i64().ok_or_else(|| DbError::ParseError("$mod remainder must be an integer".into()))?;
            Ok(Filter::Mod { path, divisor, remainder })
        }
        other => Err(DbError::UnsupportedQuery(other.to_string())),
    }
}

fn parse_value_array(val: &Json) -> Result<Vec<Bson>, DbError> {
    let Json::Array(items) = val else {
        return Err(DbError::ParseError(format!("expected an array, got {val}")));
    };
    items.iter().map(json_to_bson).collect()
}

/// Renders `filter` back into its canonical nested-JSON spelling: every
/// comparison is an explicit `{"path": {"$op": value}}`, never the bare-value
/// `$eq` shorthand, so re-parsing it always reproduces the same tree.
#[must_use]
pub fn to_json(filter: &Filter) -> Json {
    match filter {
        Filter::True => serde_json::json!({}),
        Filter::Cmp { path, op, value } => single_op(path, cmp_op_name(*op), bson_to_json(value)),
        Filter::In { path, values } => single_op(path, "$in", Json::Array(values.iter().map(bson_to_json).collect())),
        Filter::Nin { path, values } => single_op(path, "$nin", Json::Array(values.iter().map(bson_to_json).collect())),
        Filter::Exists { path, should_exist } => single_op(path, "$exists", Json::Bool(*should_exist)),
        Filter::Type { path, type_name } => single_op(path, "$type", Json::String(type_name.clone())),
        Filter::StartsWith { path, prefix } => single_op(path, "$startsWith", Json::String(prefix.clone())),
        Filter::EndsWith { path, suffix } => single_op(path, "$endsWith", Json::String(suffix.clone())),
        Filter::Contains { path, substring } => single_op(path, "$contains", Json::String(substring.clone())),
        Filter::Regex { path, pattern } => single_op(path, "$regex", Json::String(pattern.clone())),
        Filter::ElemMatch { path, filter } => single_op(path, "$elemMatch", to_json(filter)),
        Filter::Size { path, size } => single_op(path, "$size", serde_json::json!(size)),
        Filter::All { path, values } => single_op(path, "$all", Json::Array(values.iter().map(bson_to_json).collect())),
        Filter::Mod { path, divisor, remainder } => single_op(path, "$mod", serde_json::json!([divisor, remainder])),
        Filter::And(children) => serde_json::json!({"$and": children.iter().map(to_json).collect::<Vec<_>>()}),
        Filter::Or(children) => serde_json::json!({"$or": children.iter().map(to_json).collect::<Vec<_>>()}),
        Filter::Nor(children) => serde_json::json!({"$nor": children.iter().map(to_json).collect::<Vec<_>>()}),
        Filter::Not(inner) => serde_json::json!({"$not": to_json(inner)}),
    }
}

fn single_op(path: &str, op: &str, value: Json) -> Json {
    let mut inner = JsonMap::new();
    inner.insert(op.to_string(), value);
    let mut outer = JsonMap::new();
    outer.insert(path.to_string(), Json::Object(inner));
    Json::Object(outer)
}

fn cmp_op_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "$eq",
        CmpOp::Ne => "$ne",
        CmpOp::Gt => "$gt",
        CmpOp::Gte => "$gte",
        CmpOp::Lt => "$lt",
        CmpOp::Lte => "$lte",
    }
}

/// Renders `filter` to its canonical JSON string (see [`to_json`]).
#[must_use]
pub fn to_canonical_json(filter: &Filter) -> String {
    to_json(filter).to_string()
}

#[derive(serde::Deserialize)]
struct UpdateDocSerde {
    #[serde(rename = "$set", default)]
    set: std::collections::BTreeMap<String, Json>,
    #[serde(rename = "$unset", default)]
    unset: Vec<String>,
}

/// Parses a BLQL update document (`{"$set": {...}, "$unset": [...]}`).
///
/// # Errors
/// Returns `Json`/`BsonSer` if the document or its values are malformed.
pub fn parse_update_json(text: &str) -> Result<UpdateDoc, DbError> {
    let serde_update: UpdateDocSerde = serde_json::from_str(text)?;
    let set = serde_update
        .set
        .into_iter()
        .map(|(k, v)| json_to_bson(&v).map(|b| (k, b)))
        .collect::<Result<_, DbError>>()?;
    Ok(UpdateDoc { set, unset: serde_update.unset })
}
