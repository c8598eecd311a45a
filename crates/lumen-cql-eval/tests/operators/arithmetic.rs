//! Numeric promotion, overflow, division-by-zero, quantity units, rounding.

use lumen_cql_eval::EvalError;
use lumen_cql_types::{CqlQuantity, CqlValue};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::support::{binary, dec, dec_lit, eval, eval_err, int_lit, null_lit, quantity, unary};

#[test]
fn integers_promote_into_decimal_overloads() {
    assert_eq!(
        eval(binary("Add", int_lit(1), dec_lit("2.5"))),
        CqlValue::Decimal(dec("3.5")),
    );
    assert_eq!(
        eval(binary("Multiply", dec_lit("0.5"), int_lit(6))),
        CqlValue::Decimal(dec("3.0")),
    );
}

#[test]
fn integer_arithmetic_stays_integral() {
    assert_eq!(eval(binary("Add", int_lit(2), int_lit(3))), CqlValue::Integer(5));
    assert_eq!(
        eval(binary("TruncatedDivide", int_lit(7), int_lit(2))),
        CqlValue::Integer(3),
    );
    assert_eq!(eval(binary("Modulo", int_lit(7), int_lit(2))), CqlValue::Integer(1));
    assert_eq!(eval(binary("Power", int_lit(2), int_lit(10))), CqlValue::Integer(1024));
}

#[test]
fn divide_always_yields_decimal() {
    assert_eq!(
        eval(binary("Divide", int_lit(6), int_lit(4))),
        CqlValue::Decimal(dec("1.5")),
    );
}

#[test]
fn division_by_zero_is_null() {
    assert_eq!(eval(binary("Divide", int_lit(1), int_lit(0))), CqlValue::Null);
    assert_eq!(eval(binary("TruncatedDivide", int_lit(5), int_lit(0))), CqlValue::Null);
    assert_eq!(eval(binary("Modulo", int_lit(5), int_lit(0))), CqlValue::Null);
}

#[test]
fn null_operands_propagate() {
    assert_eq!(eval(binary("Add", null_lit(), int_lit(1))), CqlValue::Null);
    assert_eq!(eval(binary("Subtract", int_lit(1), null_lit())), CqlValue::Null);
    assert_eq!(eval(unary("Negate", null_lit())), CqlValue::Null);
}

#[test]
fn integer_overflow_is_an_error() {
    let err = eval_err(binary("Add", int_lit(i32::MAX), int_lit(1)));
    assert_eq!(err, EvalError::overflow("Add"));
}

#[test]
fn quantities_add_in_matching_units() {
    assert_eq!(
        eval(binary("Add", quantity(3.0, "mg"), quantity(5.0, "mg"))),
        CqlValue::Quantity(CqlQuantity::new(dec("8"), "mg")),
    );
}

#[test]
fn mixed_unit_quantities_convert_to_the_left_unit() {
    assert_eq!(
        eval(binary("Add", quantity(1.0, "g"), quantity(500.0, "mg"))),
        CqlValue::Quantity(CqlQuantity::new(dec("1.5"), "g")),
    );
}

#[test]
fn incomparable_units_are_an_error() {
    let err = eval_err(binary("Add", quantity(1.0, "g"), quantity(1.0, "mL")));
    assert_eq!(err, EvalError::incompatible_units("g", "mL"));
}

#[test]
fn quantities_scale_by_numbers() {
    assert_eq!(
        eval(binary("Multiply", quantity(2.5, "mg"), int_lit(4))),
        CqlValue::Quantity(CqlQuantity::new(dec("10"), "mg")),
    );
}

#[test]
fn strings_concatenate_under_add() {
    use crate::support::str_lit;
    assert_eq!(
        eval(binary("Add", str_lit("ab"), str_lit("cd"))),
        CqlValue::string("abcd"),
    );
}

#[test]
fn round_is_half_up_with_optional_precision() {
    assert_eq!(
        eval(json!({"type": "Round", "operand": dec_lit("2.5")})),
        CqlValue::Decimal(dec("3")),
    );
    assert_eq!(
        eval(json!({"type": "Round", "operand": dec_lit("-2.5")})),
        CqlValue::Decimal(dec("-2")),
    );
    assert_eq!(
        eval(json!({"type": "Round", "operand": dec_lit("3.14159"), "precision": int_lit(2)})),
        CqlValue::Decimal(dec("3.14")),
    );
}

#[test]
fn floor_ceiling_truncate_land_on_integers() {
    assert_eq!(eval(unary("Floor", dec_lit("2.7"))), CqlValue::Integer(2));
    assert_eq!(eval(unary("Ceiling", dec_lit("2.1"))), CqlValue::Integer(3));
    assert_eq!(eval(unary("Truncate", dec_lit("-2.7"))), CqlValue::Integer(-2));
}

#[test]
fn abs_and_negate_cover_signed_types() {
    assert_eq!(eval(unary("Abs", int_lit(-3))), CqlValue::Integer(3));
    assert_eq!(eval(unary("Negate", int_lit(5))), CqlValue::Integer(-5));
    assert_eq!(eval(unary("Abs", dec_lit("-2.5"))), CqlValue::Decimal(dec("2.5")));
}
