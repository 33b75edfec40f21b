//! Round-trip law for the canonical BLQL spelling: parsing a filter
//! document yields exactly the `Filter` tree its canonical JSON describes,
//! for every combinator and comparison operator the dialect supports.

use blite::query::{parse_filter_json, to_canonical_json, CmpOp, Filter};
use blite::DbError;
use proptest::prelude::*;

fn canonical_gte(field: &str, n: i32) -> (String, Filter) {
    (
        format!(r#"{{"{field}": {{"$gte": {n}}}}}"#),
        Filter::Cmp { path: field.to_string(), op: CmpOp::Gte, value: bson::Bson::Int32(n) },
    )
}

proptest! {
    #[test]
    fn a_single_comparison_step_parses_to_the_matching_cmp_leaf(
        field in "[a-z][a-z0-9_]{0,10}",
        n in any::<i32>(),
    ) {
        let (json, expected) = canonical_gte(&field, n);
        let parsed = parse_filter_json(&json).unwrap();
        prop_assert_eq!(parsed, expected);
    }

    #[test]
    fn and_of_two_comparisons_preserves_order_and_shape(
        f1 in "[a-z][a-z0-9_]{0,8}",
        n1 in any::<i32>(),
        f2 in "[a-z][a-z0-9_]{0,8}",
        n2 in any::<i32>(),
    ) {
        let (j1, e1) = canonical_gte(&f1, n1);
        let (j2, e2) = canonical_gte(&f2, n2);
        let json = format!(r#"{{"$and": [{j1}, {j2}]}}"#);
        let parsed = parse_filter_json(&json).unwrap();
        prop_assert_eq!(parsed, Filter::And(vec![e1, e2]));
    }

    #[test]
    fn parsing_is_idempotent_on_the_resulting_structure(
        field in "[a-z][a-z0-9_]{0,10}",
        n in any::<i32>(),
    ) {
        let (json, _) = canonical_gte(&field, n);
        let once = parse_filter_json(&json).unwrap();
        let twice = parse_filter_json(&json).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn canonical_json_round_trips_through_parse(
        field in "[a-z][a-z0-9_]{0,10}",
        n in any::<i32>(),
    ) {
        let (_, filter) = canonical_gte(&field, n);
        let reparsed = parse_filter_json(&to_canonical_json(&filter)).unwrap();
        prop_assert_eq!(reparsed, filter);
    }
}

#[test]
fn the_empty_object_parses_as_match_all() {
    assert_eq!(parse_filter_json("{}").unwrap(), Filter::True);
}

#[test]
fn range_bounds_on_the_same_field_parse_into_two_and_conjuncts() {
    let json = r#"{"$and": [{"age": {"$gte": 18}}, {"age": {"$lt": 65}}]}"#;
    let parsed = parse_filter_json(json).unwrap();
    assert_eq!(
        parsed,
        Filter::And(vec![
            Filter::Cmp { path: "age".into(), op: CmpOp::Gte, value: bson::Bson::Int32(18) },
            Filter::Cmp { path: "age".into(), op: CmpOp::Lt, value: bson::Bson::Int32(65) },
        ])
    );
}

#[test]
fn an_unknown_top_level_operator_is_rejected_not_silently_ignored() {
    let result = parse_filter_json(r#"{"$adn": []}"#);
    assert!(matches!(result, Err(DbError::UnsupportedQuery(_))));
}
