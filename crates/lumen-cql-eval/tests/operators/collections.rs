//! List and interval operators plus the aggregate family.

use lumen_cql_eval::EvalError;
use lumen_cql_types::{CqlInterval, CqlList, CqlValue};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::support::{
    binary, bool_lit, dec, eval, eval_err, int_interval, int_list, int_lit, interval, list_of,
    null_lit, unary,
};

fn ints(values: &[i32]) -> CqlValue {
    CqlValue::List(CqlList::from_values(
        values.iter().map(|v| CqlValue::Integer(*v)).collect(),
    ))
}

fn closed_interval(low: i32, high: i32) -> CqlValue {
    CqlValue::Interval(CqlInterval::closed(
        CqlValue::Integer(low),
        CqlValue::Integer(high),
    ))
}

#[test]
fn membership_respects_open_bounds() {
    let right_open = interval(int_lit(0), true, int_lit(3), false);
    assert_eq!(
        eval(binary("In", int_lit(3), right_open.clone())),
        CqlValue::Boolean(false),
    );
    assert_eq!(
        eval(binary("In", int_lit(2), right_open)),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(binary("Contains", int_list(&[1, 2]), int_lit(2))),
        CqlValue::Boolean(true),
    );
}

#[test]
fn interval_except_trims_the_overlap() {
    assert_eq!(
        eval(binary("Except", int_interval(1, 5), int_interval(3, 10))),
        closed_interval(1, 2),
    );
}

#[test]
fn list_except_removes_matching_elements() {
    assert_eq!(
        eval(binary("Except", int_list(&[1, 2, 3]), int_list(&[2]))),
        ints(&[1, 3]),
    );
}

#[test]
fn union_deduplicates() {
    assert_eq!(
        eval(binary("Union", int_list(&[1, 2]), int_list(&[2, 3]))),
        ints(&[1, 2, 3]),
    );
}

#[test]
fn collapse_merges_adjacent_integer_intervals() {
    let result = eval(unary(
        "Collapse",
        list_of(vec![int_interval(1, 3), int_interval(4, 6)]),
    ));
    assert_eq!(
        result,
        CqlValue::List(CqlList::from_values(vec![closed_interval(1, 6)])),
    );
}

#[test]
fn open_bounds_step_to_the_nearest_point() {
    let right_open = interval(int_lit(1), true, int_lit(5), false);
    assert_eq!(eval(unary("Start", right_open.clone())), CqlValue::Integer(1));
    assert_eq!(eval(unary("End", right_open)), CqlValue::Integer(4));
    assert_eq!(eval(unary("Width", int_interval(1, 5))), CqlValue::Integer(4));
}

#[test]
fn distinct_keeps_first_occurrences_and_one_null() {
    let source = list_of(vec![
        int_lit(1),
        int_lit(2),
        int_lit(2),
        null_lit(),
        null_lit(),
        int_lit(1),
    ]);
    assert_eq!(
        eval(unary("Distinct", source)),
        CqlValue::List(CqlList::from_values(vec![
            CqlValue::Integer(1),
            CqlValue::Integer(2),
            CqlValue::Null,
        ])),
    );
}

#[test]
fn flatten_unnests_one_level() {
    assert_eq!(
        eval(unary("Flatten", list_of(vec![int_list(&[1, 2]), int_list(&[3])]))),
        ints(&[1, 2, 3]),
    );
}

#[test]
fn positional_access_over_sources() {
    assert_eq!(
        eval(json!({"type": "First", "source": int_list(&[5, 6, 7])})),
        CqlValue::Integer(5),
    );
    assert_eq!(
        eval(json!({"type": "Last", "source": int_list(&[5, 6, 7])})),
        CqlValue::Integer(7),
    );
    assert_eq!(
        eval(json!({"type": "IndexOf", "source": int_list(&[10, 20, 30]), "element": int_lit(20)})),
        CqlValue::Integer(1),
    );
    assert_eq!(
        eval(json!({"type": "IndexOf", "source": int_list(&[10, 20, 30]), "element": int_lit(99)})),
        CqlValue::Integer(-1),
    );
}

#[test]
fn exists_decides_only_on_complete_lists() {
    assert_eq!(eval(unary("Exists", int_list(&[1]))), CqlValue::Boolean(true));
    assert_eq!(eval(unary("Exists", int_list(&[]))), CqlValue::Boolean(false));
    assert_eq!(
        eval(unary("Exists", list_of(vec![int_lit(1), null_lit()]))),
        CqlValue::Boolean(false),
    );
}

#[test]
fn singleton_from_rejects_plural_lists() {
    assert_eq!(eval(unary("SingletonFrom", int_list(&[42]))), CqlValue::Integer(42));
    assert_eq!(eval(unary("SingletonFrom", int_list(&[]))), CqlValue::Null);
    assert_eq!(
        eval_err(unary("SingletonFrom", int_list(&[1, 2]))),
        EvalError::invalid_operand("SingletonFrom", "list has more than one element"),
    );
}

#[test]
fn aggregates_skip_nulls() {
    let source = list_of(vec![int_lit(1), null_lit(), int_lit(2), int_lit(3)]);
    assert_eq!(
        eval(json!({"type": "Sum", "source": source.clone()})),
        CqlValue::Integer(6),
    );
    assert_eq!(
        eval(json!({"type": "Count", "source": source})),
        CqlValue::Integer(3),
    );
    assert_eq!(
        eval(json!({"type": "Sum", "source": list_of(vec![null_lit()])})),
        CqlValue::Null,
    );
}

#[test]
fn averages_and_medians_move_to_decimal() {
    assert_eq!(
        eval(json!({"type": "Avg", "source": int_list(&[1, 2, 3, 4])})),
        CqlValue::Decimal(dec("2.5")),
    );
    assert_eq!(
        eval(json!({"type": "Median", "source": int_list(&[1, 2, 3, 4])})),
        CqlValue::Decimal(dec("2.5")),
    );
}

#[test]
fn boolean_aggregates_ignore_nulls() {
    assert_eq!(
        eval(json!({"type": "AnyTrue", "source": list_of(vec![bool_lit(false), null_lit(), bool_lit(true)])})),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(json!({"type": "AllTrue", "source": list_of(vec![bool_lit(true), null_lit()])})),
        CqlValue::Boolean(true),
    );
}
