//! Logical operators
//!
//! Three-valued (Kleene) logic: `And`, `Or`, `Xor`, `Implies`, `Not`, plus
//! the null-testing predicates. A null operand short-circuits only where
//! the truth table allows it; `false and null` is still `false`.

use lumen_cql_types::{CqlType, CqlValue};

use crate::context::EvaluationContext;
use crate::error::{EvalError, EvalResult};
use crate::registry::OperatorRegistry;

pub(crate) fn register(registry: &mut OperatorRegistry) {
    registry.register_binary("And", CqlType::Boolean, CqlType::Boolean, CqlType::Boolean, and);
    registry.register_binary("Or", CqlType::Boolean, CqlType::Boolean, CqlType::Boolean, or);
    registry.register_binary("Xor", CqlType::Boolean, CqlType::Boolean, CqlType::Boolean, xor);
    registry.register_binary(
        "Implies",
        CqlType::Boolean,
        CqlType::Boolean,
        CqlType::Boolean,
        implies,
    );
    registry.register_unary("Not", CqlType::Boolean, CqlType::Boolean, not);
    registry.register_unary("IsNull", CqlType::Any, CqlType::Boolean, is_null);
    registry.register_unary("IsTrue", CqlType::Any, CqlType::Boolean, is_true);
    registry.register_unary("IsFalse", CqlType::Any, CqlType::Boolean, is_false);
}

fn as_tristate(value: &CqlValue) -> EvalResult<Option<bool>> {
    match value {
        CqlValue::Null => Ok(None),
        CqlValue::Boolean(b) => Ok(Some(*b)),
        other => Err(EvalError::invalid_operand(
            "logical operator",
            format!("expected Boolean, found {}", other.get_type()),
        )),
    }
}

fn from_tristate(value: Option<bool>) -> CqlValue {
    value.map_or(CqlValue::Null, CqlValue::Boolean)
}

fn and(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let result = match (as_tristate(left)?, as_tristate(right)?) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    };
    Ok(from_tristate(result))
}

fn or(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let result = match (as_tristate(left)?, as_tristate(right)?) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    };
    Ok(from_tristate(result))
}

fn xor(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let result = match (as_tristate(left)?, as_tristate(right)?) {
        (Some(a), Some(b)) => Some(a != b),
        _ => None,
    };
    Ok(from_tristate(result))
}

fn implies(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let result = match (as_tristate(left)?, as_tristate(right)?) {
        (Some(false), _) | (_, Some(true)) => Some(true),
        (Some(true), Some(false)) => Some(false),
        _ => None,
    };
    Ok(from_tristate(result))
}

fn not(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    Ok(from_tristate(as_tristate(operand)?.map(|b| !b)))
}

fn is_null(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    Ok(CqlValue::Boolean(operand.is_null()))
}

fn is_true(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    Ok(CqlValue::Boolean(matches!(operand, CqlValue::Boolean(true))))
}

fn is_false(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    Ok(CqlValue::Boolean(matches!(operand, CqlValue::Boolean(false))))
}
