//! Equality, equivalence, and ordering through the engine.

use lumen_cql_types::CqlValue;
use pretty_assertions::assert_eq;

use crate::support::{binary, date_lit, dec_lit, eval, int_lit, null_lit, str_lit};

#[test]
fn equal_propagates_null() {
    assert_eq!(eval(binary("Equal", int_lit(3), int_lit(3))), CqlValue::Boolean(true));
    assert_eq!(eval(binary("Equal", int_lit(3), null_lit())), CqlValue::Null);
    assert_eq!(eval(binary("Equal", null_lit(), null_lit())), CqlValue::Null);
}

#[test]
fn equal_compares_across_numeric_types() {
    assert_eq!(
        eval(binary("Equal", int_lit(2), dec_lit("2.0"))),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(binary("NotEqual", int_lit(2), dec_lit("2.5"))),
        CqlValue::Boolean(true),
    );
}

#[test]
fn equivalent_treats_null_as_a_value() {
    assert_eq!(
        eval(binary("Equivalent", null_lit(), null_lit())),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(binary("Equivalent", int_lit(1), null_lit())),
        CqlValue::Boolean(false),
    );
}

#[test]
fn equivalent_strings_ignore_case() {
    assert_eq!(
        eval(binary("Equivalent", str_lit("Hello"), str_lit("hello"))),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(binary("Equal", str_lit("Hello"), str_lit("hello"))),
        CqlValue::Boolean(false),
    );
}

#[test]
fn ordering_covers_mixed_numerics_and_strings() {
    assert_eq!(
        eval(binary("Less", int_lit(1), dec_lit("1.5"))),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(binary("GreaterOrEqual", dec_lit("2.0"), int_lit(2))),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(binary("Less", str_lit("apple"), str_lit("banana"))),
        CqlValue::Boolean(true),
    );
}

#[test]
fn date_ordering_respects_precision() {
    assert_eq!(
        eval(binary("Less", date_lit("2020-01-01"), date_lit("2020-06-01"))),
        CqlValue::Boolean(true),
    );
    // Decided below the shared precision: @2020-02 is before any day in March.
    assert_eq!(
        eval(binary("Less", date_lit("2020-02"), date_lit("2020-03-15"))),
        CqlValue::Boolean(true),
    );
    // Undecidable: @2020-03 may or may not be before @2020-03-15.
    assert_eq!(
        eval(binary("Less", date_lit("2020-03"), date_lit("2020-03-15"))),
        CqlValue::Null,
    );
}
