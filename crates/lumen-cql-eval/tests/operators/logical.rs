//! Three-valued logic tables run end to end.

use lumen_cql_types::CqlValue;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::support::{binary, bool_lit, eval, int_lit, null_lit, unary};

#[rstest]
#[case(bool_lit(true), bool_lit(true), CqlValue::Boolean(true))]
#[case(bool_lit(true), bool_lit(false), CqlValue::Boolean(false))]
#[case(bool_lit(true), null_lit(), CqlValue::Null)]
#[case(bool_lit(false), null_lit(), CqlValue::Boolean(false))]
#[case(null_lit(), null_lit(), CqlValue::Null)]
fn and_is_three_valued(
    #[case] left: serde_json::Value,
    #[case] right: serde_json::Value,
    #[case] expected: CqlValue,
) {
    assert_eq!(eval(binary("And", left, right)), expected);
}

#[rstest]
#[case(bool_lit(true), null_lit(), CqlValue::Boolean(true))]
#[case(bool_lit(false), null_lit(), CqlValue::Null)]
#[case(bool_lit(false), bool_lit(false), CqlValue::Boolean(false))]
fn or_is_three_valued(
    #[case] left: serde_json::Value,
    #[case] right: serde_json::Value,
    #[case] expected: CqlValue,
) {
    assert_eq!(eval(binary("Or", left, right)), expected);
}

#[rstest]
#[case(bool_lit(true), bool_lit(true), CqlValue::Boolean(false))]
#[case(bool_lit(true), bool_lit(false), CqlValue::Boolean(true))]
#[case(bool_lit(true), null_lit(), CqlValue::Null)]
fn xor_has_no_short_circuit(
    #[case] left: serde_json::Value,
    #[case] right: serde_json::Value,
    #[case] expected: CqlValue,
) {
    assert_eq!(eval(binary("Xor", left, right)), expected);
}

#[rstest]
#[case(bool_lit(false), null_lit(), CqlValue::Boolean(true))]
#[case(bool_lit(true), null_lit(), CqlValue::Null)]
#[case(null_lit(), bool_lit(true), CqlValue::Boolean(true))]
#[case(null_lit(), bool_lit(false), CqlValue::Null)]
#[case(bool_lit(true), bool_lit(false), CqlValue::Boolean(false))]
fn implies_follows_the_cql_table(
    #[case] left: serde_json::Value,
    #[case] right: serde_json::Value,
    #[case] expected: CqlValue,
) {
    assert_eq!(eval(binary("Implies", left, right)), expected);
}

#[test]
fn not_passes_null_through() {
    assert_eq!(eval(unary("Not", bool_lit(true))), CqlValue::Boolean(false));
    assert_eq!(eval(unary("Not", null_lit())), CqlValue::Null);
}

#[test]
fn null_tests_always_decide() {
    assert_eq!(eval(unary("IsNull", null_lit())), CqlValue::Boolean(true));
    assert_eq!(eval(unary("IsNull", int_lit(1))), CqlValue::Boolean(false));
    assert_eq!(eval(unary("IsTrue", null_lit())), CqlValue::Boolean(false));
    assert_eq!(eval(unary("IsTrue", bool_lit(true))), CqlValue::Boolean(true));
    assert_eq!(eval(unary("IsFalse", bool_lit(false))), CqlValue::Boolean(true));
    assert_eq!(eval(unary("IsFalse", null_lit())), CqlValue::Boolean(false));
}
