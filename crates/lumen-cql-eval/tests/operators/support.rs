//! Shared builders for ELM JSON fragments used across the operator tests.

use lumen_cql_ast::Expression;
use lumen_cql_eval::{CqlEngine, EvalError, EvaluationContext};
use lumen_cql_types::CqlValue;
use rust_decimal::Decimal;
use serde_json::json;

pub fn engine() -> CqlEngine {
    CqlEngine::new(serde_json::from_value(json!({"identifier": {"id": "Ops"}})).unwrap())
}

/// Evaluates an ELM JSON fragment in a fresh context.
pub fn eval(expression: serde_json::Value) -> CqlValue {
    let mut ctx = EvaluationContext::new();
    eval_with(&mut ctx, expression)
}

pub fn eval_with(ctx: &mut EvaluationContext, expression: serde_json::Value) -> CqlValue {
    let expression: Expression = serde_json::from_value(expression).unwrap();
    engine().evaluate(&expression, ctx).unwrap()
}

pub fn eval_err(expression: serde_json::Value) -> EvalError {
    let expression: Expression = serde_json::from_value(expression).unwrap();
    let mut ctx = EvaluationContext::new();
    engine().evaluate(&expression, &mut ctx).unwrap_err()
}

pub fn dec(text: &str) -> Decimal {
    text.parse().unwrap()
}

pub fn int_lit(value: i32) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Integer",
        "value": value.to_string(),
    })
}

pub fn dec_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Decimal",
        "value": value,
    })
}

pub fn str_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}String",
        "value": value,
    })
}

pub fn bool_lit(value: bool) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Boolean",
        "value": value.to_string(),
    })
}

pub fn date_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Date",
        "value": value,
    })
}

pub fn datetime_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}DateTime",
        "value": value,
    })
}

pub fn null_lit() -> serde_json::Value {
    json!({"type": "Null"})
}

pub fn binary(op: &str, left: serde_json::Value, right: serde_json::Value) -> serde_json::Value {
    json!({"type": op, "operand": [left, right]})
}

pub fn unary(op: &str, operand: serde_json::Value) -> serde_json::Value {
    json!({"type": op, "operand": operand})
}

pub fn list_of(elements: Vec<serde_json::Value>) -> serde_json::Value {
    json!({"type": "List", "element": elements})
}

pub fn int_list(values: &[i32]) -> serde_json::Value {
    list_of(values.iter().map(|v| int_lit(*v)).collect())
}

pub fn interval(
    low: serde_json::Value,
    low_closed: bool,
    high: serde_json::Value,
    high_closed: bool,
) -> serde_json::Value {
    json!({
        "type": "Interval",
        "low": low,
        "lowClosed": low_closed,
        "high": high,
        "highClosed": high_closed,
    })
}

pub fn int_interval(low: i32, high: i32) -> serde_json::Value {
    interval(int_lit(low), true, int_lit(high), true)
}

pub fn quantity(value: f64, unit: &str) -> serde_json::Value {
    json!({"type": "Quantity", "value": value, "unit": unit})
}
