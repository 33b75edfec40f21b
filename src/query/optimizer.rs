//! §4.9: turns a `Filter` tree into an execution `Plan` — an index-backed
//! range scan when a top-level conjunct can be pushed down to a registered
//! secondary index, a full primary scan otherwise. Whichever plan is chosen,
//! the candidates it yields are always re-checked against the complete
//! filter (see `query::exec::select_candidates`): this optimizer only needs
//! to narrow the search space, never to decide correctness, so its range
//! bounds are deliberately permissive rather than exact for open comparisons.

use super::types::{CmpOp, Filter};
use crate::btree::IndexKey;
use crate::catalog::IndexEntry;
use crate::index_manager::bson_to_index_key;

/// The chosen execution strategy for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Scan every live document via the primary index.
    Primary,
    /// Scan the named secondary index over `[min, max]`.
    IndexRange { name: String, min: IndexKey, max: IndexKey },
}

/// Flattens top-level `And` nodes into their conjuncts; any other filter
/// shape (including a single non-`And` leaf) is treated as one conjunct.
fn flatten_and(filter: &Filter) -> Vec<&Filter> {
    match filter {
        Filter::And(children) => children.iter().flat_map(flatten_and).collect(),
        other => vec![other],
    }
}

/// Builds a range candidate `(min, max)` for one conjunct against one
/// index, or `None` if the conjunct doesn't constrain that index's path.
fn range_candidate(conjunct: &Filter, path: &str) -> Option<(IndexKey, IndexKey)> {
    match conjunct {
        Filter::Cmp { path: p, op, value } if p == path => {
            let key = bson_to_index_key(value)?;
            Some(match op {
                CmpOp::Eq => (key.clone(), key),
                CmpOp::Gt | CmpOp::Gte => (key, IndexKey::max()),
                CmpOp::Lt | CmpOp::Lte => (IndexKey::min(), key),
                CmpOp::Ne => return None,
            })
        }
        Filter::StartsWith { path: p, prefix } if p == path => {
            let min = IndexKey::from_str(prefix);
            let max = min.increment_last_codepoint().unwrap_or_else(IndexKey::max);
            Some((min, max))
        }
        Filter::In { path: p, values } if p == path => {
            let mut keys: Vec<IndexKey> = values.iter().filter_map(bson_to_index_key).collect();
            keys.sort();
            let (first, last) = (keys.first()?.clone(), keys.last()?.clone());
            Some((first, last))
        }
        _ => None,
    }
}

/// For each registered index (in declaration order), intersects the range
/// candidates every conjunct contributes against that index's path — so
/// `age >= 18 AND age < 65` against an index on `age` tightens to a single
/// `[18, 65)` range rather than picking just one of the two conjuncts.
/// Returns the first index whose intersected range is non-empty, or a full
/// primary scan if none qualify.
#[must_use]
pub fn plan_for(filter: &Filter, indexes: &[IndexEntry]) -> Plan {
    let conjuncts = flatten_and(filter);
    for entry in indexes {
        let Some(path) = entry.property_paths.first() else { continue };
        let mut merged: Option<(IndexKey, IndexKey)> = None;
        for conjunct in &conjuncts {
            let Some((min, max)) = range_candidate(conjunct, path) else { continue };
            merged = Some(match merged {
                None => (min, max),
                Some((cur_min, cur_max)) => (cur_min.max(min), cur_max.min(max)),
            });
        }
        if let Some((min, max)) = merged {
            if min <= max {
                return Plan::IndexRange { name: entry.name.clone(), min, max };
            }
        }
    }
    Plan::Primary
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    fn idx(name: &str, path: &str) -> IndexEntry {
        IndexEntry { name: name.into(), unique: false, property_paths: vec![path.into()], root_page_id: 1 }
    }

    #[test]
    fn equality_on_indexed_path_yields_a_point_range() {
        let filter = Filter::Cmp { path: "age".into(), op: CmpOp::Eq, value: Bson::Int32(30) };
        let plan = plan_for(&filter, &[idx("by_age", "age")]);
        assert!(matches!(plan, Plan::IndexRange { name, min, max } if name == "by_age" && min == max));
    }

    #[test]
    fn no_matching_index_falls_back_to_primary_scan() {
        let filter = Filter::Cmp { path: "age".into(), op: CmpOp::Eq, value: Bson::Int32(30) };
        let plan = plan_for(&filter, &[idx("by_name", "name")]);
        assert_eq!(plan, Plan::Primary);
    }

    #[test]
    fn and_over_two_conjuncts_picks_the_first_indexable_one() {
        let filter = Filter::And(vec![
            Filter::Cmp { path: "name".into(), op: CmpOp::Eq, value: Bson::String("ada".into()) },
            Filter::Cmp { path: "age".into(), op: CmpOp::Gte, value: Bson::Int32(18) },
        ]);
        let plan = plan_for(&filter, &[idx("by_age", "age")]);
        assert!(matches!(plan, Plan::IndexRange { name, .. } if name == "by_age"));
    }

    #[test]
    fn complementary_bounds_on_the_same_path_merge_into_one_range() {
        let filter = Filter::And(vec![
            Filter::Cmp { path: "age".into(), op: CmpOp::Gte, value: Bson::Int32(18) },
            Filter::Cmp { path: "age".into(), op: CmpOp::Lt, value: Bson::Int32(65) },
        ]);
        let plan = plan_for(&filter, &[idx("by_age", "age")]);
        match plan {
            Plan::IndexRange { name, min, max } => {
                assert_eq!(name, "by_age");
                assert_eq!(min, bson_to_index_key(&Bson::Int32(18)).unwrap());
                assert_eq!(max, bson_to_index_key(&Bson::Int32(65)).unwrap());
            }
            other => panic!("expected IndexRange, got {other:?}"),
        }
    }

    #[test]
    fn starts_with_produces_a_bounded_prefix_range() {
        let filter = Filter::StartsWith { path: "name".into(), prefix: "an".into() };
        let plan = plan_for(&filter, &[idx("by_name", "name")]);
        match plan {
            Plan::IndexRange { min, max, .. } => assert!(min < max),
            other => panic!("expected IndexRange, got {other:?}"),
        }
    }
}
