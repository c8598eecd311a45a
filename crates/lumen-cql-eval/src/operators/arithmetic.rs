//! Arithmetic operators
//!
//! Checked arithmetic over Integer, Long, Decimal, and Quantity, plus
//! duration arithmetic on the temporal types. Overflow is an error;
//! division by zero is null. Mixed numeric operands promote to the wider
//! type before the operation.
//!
//! Quantity addition converts the right operand into the left operand's
//! unit, so `1 'g' + 250 'mg'` is `1.25 'g'`. Multiplication and division
//! compose unit strings instead of converting.

use lumen_cql_ast::{BoundaryExpression, MinMaxValueExpression, RoundExpression};
use lumen_cql_types::{
    CqlDate, CqlDateTime, CqlInterval, CqlQuantity, CqlTime, CqlType, CqlValue, DateTimePrecision,
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::registry::OperatorRegistry;

pub(crate) fn register(registry: &mut OperatorRegistry) {
    let numeric_pairs: &[(CqlType, CqlType, CqlType)] = &[
        (CqlType::Integer, CqlType::Integer, CqlType::Integer),
        (CqlType::Long, CqlType::Long, CqlType::Long),
        (CqlType::Decimal, CqlType::Decimal, CqlType::Decimal),
    ];

    for (left, right, result) in numeric_pairs {
        registry.register_binary("Add", left.clone(), right.clone(), result.clone(), add);
        registry.register_binary("Subtract", left.clone(), right.clone(), result.clone(), subtract);
        registry.register_binary("Multiply", left.clone(), right.clone(), result.clone(), multiply);
        registry.register_binary(
            "TruncatedDivide",
            left.clone(),
            right.clone(),
            result.clone(),
            truncated_divide,
        );
        registry.register_binary("Modulo", left.clone(), right.clone(), result.clone(), modulo);
        registry.register_binary("Power", left.clone(), right.clone(), result.clone(), power);
    }

    registry.register_binary("Add", CqlType::Quantity, CqlType::Quantity, CqlType::Quantity, add);
    registry.register_binary("Add", CqlType::String, CqlType::String, CqlType::String, add);
    registry.register_binary(
        "Subtract",
        CqlType::Quantity,
        CqlType::Quantity,
        CqlType::Quantity,
        subtract,
    );
    for temporal in [CqlType::Date, CqlType::DateTime, CqlType::Time] {
        registry.register_binary("Add", temporal.clone(), CqlType::Quantity, temporal.clone(), add);
        registry.register_binary(
            "Subtract",
            temporal.clone(),
            CqlType::Quantity,
            temporal.clone(),
            subtract,
        );
    }
    registry.register_binary(
        "Add",
        CqlType::interval(CqlType::Any),
        CqlType::interval(CqlType::Any),
        CqlType::interval(CqlType::Any),
        add,
    );
    registry.register_binary(
        "Subtract",
        CqlType::interval(CqlType::Any),
        CqlType::interval(CqlType::Any),
        CqlType::interval(CqlType::Any),
        subtract,
    );

    registry.register_binary(
        "Multiply",
        CqlType::Quantity,
        CqlType::Quantity,
        CqlType::Quantity,
        multiply,
    );
    registry.register_binary(
        "Multiply",
        CqlType::Quantity,
        CqlType::Decimal,
        CqlType::Quantity,
        multiply,
    );
    registry.register_binary(
        "Multiply",
        CqlType::Decimal,
        CqlType::Quantity,
        CqlType::Quantity,
        multiply,
    );

    registry.register_binary("Divide", CqlType::Decimal, CqlType::Decimal, CqlType::Decimal, divide);
    registry.register_binary(
        "Divide",
        CqlType::Quantity,
        CqlType::Quantity,
        CqlType::Quantity,
        divide,
    );
    registry.register_binary(
        "Divide",
        CqlType::Quantity,
        CqlType::Decimal,
        CqlType::Quantity,
        divide,
    );

    registry.register_binary("Log", CqlType::Decimal, CqlType::Decimal, CqlType::Decimal, log);
    registry.register_unary("Ln", CqlType::Decimal, CqlType::Decimal, ln);
    registry.register_unary("Exp", CqlType::Decimal, CqlType::Decimal, exp);

    for operand in [CqlType::Integer, CqlType::Long, CqlType::Decimal, CqlType::Quantity] {
        registry.register_unary("Negate", operand.clone(), operand.clone(), negate);
        registry.register_unary("Abs", operand.clone(), operand.clone(), abs);
    }

    registry.register_unary("Ceiling", CqlType::Decimal, CqlType::Integer, ceiling);
    registry.register_unary("Floor", CqlType::Decimal, CqlType::Integer, floor);
    registry.register_unary("Truncate", CqlType::Decimal, CqlType::Integer, truncate);

    for operand in [
        CqlType::Integer,
        CqlType::Long,
        CqlType::Decimal,
        CqlType::Quantity,
        CqlType::Date,
        CqlType::DateTime,
        CqlType::Time,
    ] {
        registry.register_unary("Successor", operand.clone(), operand.clone(), successor);
        registry.register_unary("Predecessor", operand.clone(), operand.clone(), predecessor);
    }

    for operand in [CqlType::Decimal, CqlType::Date, CqlType::DateTime, CqlType::Time] {
        registry.register_unary("Precision", operand, CqlType::Integer, precision_of);
    }
}

pub(crate) fn add(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    match (left, right) {
        (CqlValue::Integer(a), CqlValue::Integer(b)) => a
            .checked_add(*b)
            .map(CqlValue::Integer)
            .ok_or_else(|| EvalError::overflow("Add")),
        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
            let converted = convert_to_left_unit(ctx, a, b)?;
            a.value
                .checked_add(converted)
                .map(|value| {
                    CqlValue::Quantity(CqlQuantity {
                        value,
                        unit: a.unit.clone(),
                    })
                })
                .ok_or_else(|| EvalError::overflow("Add"))
        }
        (CqlValue::Date(d), CqlValue::Quantity(q)) => add_quantity_to_date(d, q, 1),
        (CqlValue::DateTime(dt), CqlValue::Quantity(q)) => add_quantity_to_datetime(dt, q, 1),
        (CqlValue::Time(t), CqlValue::Quantity(q)) => add_quantity_to_time(t, q, 1),
        (CqlValue::String(a), CqlValue::String(b)) => Ok(CqlValue::String(format!("{a}{b}"))),
        (CqlValue::Interval(a), CqlValue::Interval(b)) => {
            combine_uncertainties(ctx, a, b, add)
        }
        _ => numeric_binary(left, right, "Add", i64::checked_add, Decimal::checked_add),
    }
}

fn subtract(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    match (left, right) {
        (CqlValue::Integer(a), CqlValue::Integer(b)) => a
            .checked_sub(*b)
            .map(CqlValue::Integer)
            .ok_or_else(|| EvalError::overflow("Subtract")),
        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
            let converted = convert_to_left_unit(ctx, a, b)?;
            a.value
                .checked_sub(converted)
                .map(|value| {
                    CqlValue::Quantity(CqlQuantity {
                        value,
                        unit: a.unit.clone(),
                    })
                })
                .ok_or_else(|| EvalError::overflow("Subtract"))
        }
        (CqlValue::Date(d), CqlValue::Quantity(q)) => add_quantity_to_date(d, q, -1),
        (CqlValue::DateTime(dt), CqlValue::Quantity(q)) => add_quantity_to_datetime(dt, q, -1),
        (CqlValue::Time(t), CqlValue::Quantity(q)) => add_quantity_to_time(t, q, -1),
        (CqlValue::Interval(a), CqlValue::Interval(b)) => {
            combine_uncertainties(ctx, a, b, subtract)
        }
        _ => numeric_binary(left, right, "Subtract", i64::checked_sub, Decimal::checked_sub),
    }
}

pub(crate) fn multiply(
    _ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    match (left, right) {
        (CqlValue::Integer(a), CqlValue::Integer(b)) => a
            .checked_mul(*b)
            .map(CqlValue::Integer)
            .ok_or_else(|| EvalError::overflow("Multiply")),
        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
            let value = a
                .value
                .checked_mul(b.value)
                .ok_or_else(|| EvalError::overflow("Multiply"))?;
            Ok(CqlValue::Quantity(CqlQuantity {
                value,
                unit: multiply_units(a.unit.as_deref(), b.unit.as_deref()),
            }))
        }
        (CqlValue::Quantity(q), scalar) | (scalar, CqlValue::Quantity(q))
            if scalar.as_decimal().is_some() =>
        {
            let factor = scalar
                .as_decimal()
                .ok_or_else(|| EvalError::internal("numeric scalar lost its value"))?;
            let value = q
                .value
                .checked_mul(factor)
                .ok_or_else(|| EvalError::overflow("Multiply"))?;
            Ok(CqlValue::Quantity(CqlQuantity {
                value,
                unit: q.unit.clone(),
            }))
        }
        _ => numeric_binary(left, right, "Multiply", i64::checked_mul, Decimal::checked_mul),
    }
}

fn divide(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let divisor = match right {
        CqlValue::Quantity(q) => q.value,
        other => other.as_decimal().ok_or_else(|| {
            EvalError::invalid_operand("Divide", format!("cannot divide by {}", other.get_type()))
        })?,
    };
    if divisor.is_zero() {
        return Ok(CqlValue::Null);
    }
    match (left, right) {
        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
            let value = a
                .value
                .checked_div(divisor)
                .ok_or_else(|| EvalError::overflow("Divide"))?;
            if a.unit_or_default() == b.unit_or_default() {
                return Ok(CqlValue::Decimal(value));
            }
            Ok(CqlValue::Quantity(CqlQuantity {
                value,
                unit: divide_units(a.unit.as_deref(), b.unit.as_deref()),
            }))
        }
        (CqlValue::Quantity(q), _) => {
            let value = q
                .value
                .checked_div(divisor)
                .ok_or_else(|| EvalError::overflow("Divide"))?;
            Ok(CqlValue::Quantity(CqlQuantity {
                value,
                unit: q.unit.clone(),
            }))
        }
        _ => {
            let dividend = left.as_decimal().ok_or_else(|| {
                EvalError::invalid_operand("Divide", format!("cannot divide {}", left.get_type()))
            })?;
            dividend
                .checked_div(divisor)
                .map(CqlValue::Decimal)
                .ok_or_else(|| EvalError::overflow("Divide"))
        }
    }
}

fn truncated_divide(
    _ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    match (left, right) {
        (CqlValue::Integer(a), CqlValue::Integer(b)) => {
            if *b == 0 {
                Ok(CqlValue::Null)
            } else {
                a.checked_div(*b)
                    .map(CqlValue::Integer)
                    .ok_or_else(|| EvalError::overflow("TruncatedDivide"))
            }
        }
        (CqlValue::Long(_) | CqlValue::Integer(_), CqlValue::Long(_) | CqlValue::Integer(_)) => {
            let (a, b) = as_longs(left, right)?;
            if b == 0 {
                Ok(CqlValue::Null)
            } else {
                a.checked_div(b)
                    .map(CqlValue::Long)
                    .ok_or_else(|| EvalError::overflow("TruncatedDivide"))
            }
        }
        _ => {
            let (a, b) = as_decimals(left, right, "TruncatedDivide")?;
            if b.is_zero() {
                Ok(CqlValue::Null)
            } else {
                a.checked_div(b)
                    .map(|quotient| CqlValue::Decimal(quotient.trunc()))
                    .ok_or_else(|| EvalError::overflow("TruncatedDivide"))
            }
        }
    }
}

fn modulo(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    match (left, right) {
        (CqlValue::Integer(a), CqlValue::Integer(b)) => {
            if *b == 0 {
                Ok(CqlValue::Null)
            } else {
                a.checked_rem(*b)
                    .map(CqlValue::Integer)
                    .ok_or_else(|| EvalError::overflow("Modulo"))
            }
        }
        (CqlValue::Long(_) | CqlValue::Integer(_), CqlValue::Long(_) | CqlValue::Integer(_)) => {
            let (a, b) = as_longs(left, right)?;
            if b == 0 {
                Ok(CqlValue::Null)
            } else {
                a.checked_rem(b)
                    .map(CqlValue::Long)
                    .ok_or_else(|| EvalError::overflow("Modulo"))
            }
        }
        _ => {
            let (a, b) = as_decimals(left, right, "Modulo")?;
            if b.is_zero() {
                Ok(CqlValue::Null)
            } else {
                a.checked_rem(b)
                    .map(CqlValue::Decimal)
                    .ok_or_else(|| EvalError::overflow("Modulo"))
            }
        }
    }
}

fn power(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    match (left, right) {
        (CqlValue::Integer(_) | CqlValue::Long(_), CqlValue::Integer(_) | CqlValue::Long(_)) => {
            let (base, exponent) = as_longs(left, right)?;
            // Negative exponents have no integral reciprocal
            if exponent < 0 {
                let clamped = i32::try_from(exponent).map_err(|_| EvalError::overflow("Power"))?;
                return decimal_from_f64((base as f64).powi(clamped), "Power");
            }
            let exponent = u32::try_from(exponent).map_err(|_| EvalError::overflow("Power"))?;
            let raised = base
                .checked_pow(exponent)
                .ok_or_else(|| EvalError::overflow("Power"))?;
            if matches!((left, right), (CqlValue::Integer(_), CqlValue::Integer(_))) {
                i32::try_from(raised)
                    .map(CqlValue::Integer)
                    .map_err(|_| EvalError::overflow("Power"))
            } else {
                Ok(CqlValue::Long(raised))
            }
        }
        _ => {
            let (base, exponent) = as_decimals(left, right, "Power")?;
            let base = base.to_f64().ok_or_else(|| EvalError::overflow("Power"))?;
            let exponent = exponent.to_f64().ok_or_else(|| EvalError::overflow("Power"))?;
            decimal_from_f64(base.powf(exponent), "Power")
        }
    }
}

fn ln(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    unary_f64(operand, "Ln", f64::ln)
}

fn exp(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    unary_f64(operand, "Exp", f64::exp)
}

fn log(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let (value, base) = as_decimals(left, right, "Log")?;
    let value = value.to_f64().ok_or_else(|| EvalError::overflow("Log"))?;
    let base = base.to_f64().ok_or_else(|| EvalError::overflow("Log"))?;
    decimal_from_f64(value.log(base), "Log")
}

fn negate(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        // Negating the type minimum yields null rather than an error
        CqlValue::Integer(i) => Ok(i.checked_neg().map_or(CqlValue::Null, CqlValue::Integer)),
        CqlValue::Long(l) => Ok(l.checked_neg().map_or(CqlValue::Null, CqlValue::Long)),
        CqlValue::Decimal(d) => Ok(CqlValue::Decimal(-*d)),
        CqlValue::Quantity(q) => Ok(CqlValue::Quantity(CqlQuantity {
            value: -q.value,
            unit: q.unit.clone(),
        })),
        other => Err(EvalError::invalid_operand(
            "Negate",
            format!("cannot negate {}", other.get_type()),
        )),
    }
}

fn abs(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Integer(i) => Ok(i.checked_abs().map_or(CqlValue::Null, CqlValue::Integer)),
        CqlValue::Long(l) => Ok(l.checked_abs().map_or(CqlValue::Null, CqlValue::Long)),
        CqlValue::Decimal(d) => Ok(CqlValue::Decimal(d.abs())),
        CqlValue::Quantity(q) => Ok(CqlValue::Quantity(CqlQuantity {
            value: q.value.abs(),
            unit: q.unit.clone(),
        })),
        other => Err(EvalError::invalid_operand(
            "Abs",
            format!("cannot take the absolute value of {}", other.get_type()),
        )),
    }
}

fn ceiling(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    rounding_to_integer(operand, "Ceiling", Decimal::ceil)
}

fn floor(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    rounding_to_integer(operand, "Floor", Decimal::floor)
}

fn truncate(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    rounding_to_integer(operand, "Truncate", Decimal::trunc)
}

fn successor(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    step(operand, 1, "Successor")
}

fn predecessor(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    step(operand, -1, "Predecessor")
}

pub(crate) fn step(operand: &CqlValue, direction: i32, op: &'static str) -> EvalResult<CqlValue> {
    // The smallest representable Decimal step
    let decimal_step = Decimal::new(i64::from(direction), 8);
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Integer(i) => i
            .checked_add(direction)
            .map(CqlValue::Integer)
            .ok_or_else(|| EvalError::overflow(op)),
        CqlValue::Long(l) => l
            .checked_add(i64::from(direction))
            .map(CqlValue::Long)
            .ok_or_else(|| EvalError::overflow(op)),
        CqlValue::Decimal(d) => d
            .checked_add(decimal_step)
            .map(CqlValue::Decimal)
            .ok_or_else(|| EvalError::overflow(op)),
        CqlValue::Quantity(q) => q
            .value
            .checked_add(decimal_step)
            .map(|value| {
                CqlValue::Quantity(CqlQuantity {
                    value,
                    unit: q.unit.clone(),
                })
            })
            .ok_or_else(|| EvalError::overflow(op)),
        CqlValue::Date(d) => {
            let stepped = if direction > 0 { d.successor() } else { d.predecessor() }?;
            Ok(CqlValue::Date(stepped))
        }
        CqlValue::DateTime(dt) => {
            let stepped = if direction > 0 { dt.successor() } else { dt.predecessor() }?;
            Ok(CqlValue::DateTime(stepped))
        }
        CqlValue::Time(t) => {
            let stepped = if direction > 0 { t.successor() } else { t.predecessor() }?;
            Ok(CqlValue::Time(stepped))
        }
        other => Err(EvalError::invalid_operand(
            op,
            format!("no ordered successor for {}", other.get_type()),
        )),
    }
}

fn precision_of(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Decimal(d) => Ok(CqlValue::Integer(d.scale() as i32)),
        CqlValue::Date(d) => Ok(CqlValue::Integer(date_precision_digits(d.precision()))),
        CqlValue::DateTime(dt) => Ok(CqlValue::Integer(date_precision_digits(dt.precision()))),
        CqlValue::Time(t) => Ok(CqlValue::Integer(time_precision_digits(t.precision()))),
        other => Err(EvalError::invalid_operand(
            "Precision",
            format!("no precision for {}", other.get_type()),
        )),
    }
}

impl CqlEngine {
    pub(crate) fn eval_round(
        &self,
        expr: &RoundExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        if operand.is_null() {
            return Ok(CqlValue::Null);
        }
        let digits = match &expr.precision {
            Some(precision_expr) => match self.evaluate(precision_expr, ctx)? {
                CqlValue::Integer(p) if p >= 0 => p as u32,
                CqlValue::Null => return Ok(CqlValue::Null),
                other => {
                    return Err(EvalError::invalid_operand(
                        "Round",
                        format!("precision must be a non-negative Integer, found {other}"),
                    ));
                }
            },
            None => 0,
        };
        match operand {
            CqlValue::Integer(i) => Ok(CqlValue::Decimal(Decimal::from(i))),
            CqlValue::Long(l) => Ok(CqlValue::Decimal(Decimal::from(l))),
            CqlValue::Decimal(d) => Ok(CqlValue::Decimal(round_half_up(d, digits)?)),
            other => Err(EvalError::invalid_operand(
                "Round",
                format!("cannot round {}", other.get_type()),
            )),
        }
    }

    pub(crate) fn eval_min_value(&self, expr: &MinMaxValueExpression) -> EvalResult<CqlValue> {
        match local_type_name(&expr.value_type) {
            "Integer" => Ok(CqlValue::Integer(i32::MIN)),
            "Long" => Ok(CqlValue::Long(i64::MIN)),
            "Decimal" => Ok(CqlValue::Decimal(decimal_bound(false)?)),
            "Date" => Ok(CqlValue::Date(CqlDate::min_value())),
            "DateTime" => Ok(CqlValue::DateTime(CqlDateTime::min_value())),
            "Time" => Ok(CqlValue::Time(CqlTime::min_value())),
            other => Err(EvalError::invalid_operand(
                "MinValue",
                format!("no minimum for type {other}"),
            )),
        }
    }

    pub(crate) fn eval_max_value(&self, expr: &MinMaxValueExpression) -> EvalResult<CqlValue> {
        match local_type_name(&expr.value_type) {
            "Integer" => Ok(CqlValue::Integer(i32::MAX)),
            "Long" => Ok(CqlValue::Long(i64::MAX)),
            "Decimal" => Ok(CqlValue::Decimal(decimal_bound(true)?)),
            "Date" => Ok(CqlValue::Date(CqlDate::max_value())),
            "DateTime" => Ok(CqlValue::DateTime(CqlDateTime::max_value())),
            "Time" => Ok(CqlValue::Time(CqlTime::max_value())),
            other => Err(EvalError::invalid_operand(
                "MaxValue",
                format!("no maximum for type {other}"),
            )),
        }
    }

    pub(crate) fn eval_low_boundary(
        &self,
        expr: &BoundaryExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        self.eval_boundary(expr, ctx, false)
    }

    pub(crate) fn eval_high_boundary(
        &self,
        expr: &BoundaryExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        self.eval_boundary(expr, ctx, true)
    }

    fn eval_boundary(
        &self,
        expr: &BoundaryExpression,
        ctx: &mut EvaluationContext,
        high: bool,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        if operand.is_null() {
            return Ok(CqlValue::Null);
        }
        let op = if high { "HighBoundary" } else { "LowBoundary" };
        let digits = match &expr.precision {
            Some(precision_expr) => match self.evaluate(precision_expr, ctx)? {
                CqlValue::Integer(p) if p >= 0 => Some(p as u32),
                CqlValue::Null => None,
                other => {
                    return Err(EvalError::invalid_operand(
                        op,
                        format!("precision must be a non-negative Integer, found {other}"),
                    ));
                }
            },
            None => None,
        };
        match operand {
            CqlValue::Decimal(d) => Ok(CqlValue::Decimal(decimal_boundary(d, digits, high)?)),
            CqlValue::Quantity(q) => Ok(CqlValue::Quantity(CqlQuantity {
                value: decimal_boundary(q.value, digits, high)?,
                unit: q.unit,
            })),
            CqlValue::Date(d) => {
                let expanded = if high { d.high_boundary() } else { d.low_boundary() };
                let precision = match digits {
                    Some(digits) => date_precision_from_digits(digits, op)?,
                    None => DateTimePrecision::Day,
                };
                Ok(CqlValue::Date(expanded.truncate_to(precision)))
            }
            CqlValue::DateTime(dt) => {
                let expanded = if high { dt.high_boundary() } else { dt.low_boundary() };
                let precision = match digits {
                    Some(digits) => date_precision_from_digits(digits, op)?,
                    None => DateTimePrecision::Millisecond,
                };
                Ok(CqlValue::DateTime(expanded.truncate_to(precision)))
            }
            CqlValue::Time(t) => {
                let expanded = if high { t.high_boundary() } else { t.low_boundary() };
                let precision = match digits {
                    Some(digits) => time_precision_from_digits(digits, op)?,
                    None => DateTimePrecision::Millisecond,
                };
                Ok(CqlValue::Time(expanded.truncate_to(precision)))
            }
            other => Err(EvalError::invalid_operand(
                op,
                format!("no boundary for {}", other.get_type()),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn numeric_binary(
    left: &CqlValue,
    right: &CqlValue,
    op: &'static str,
    long_op: fn(i64, i64) -> Option<i64>,
    decimal_op: fn(Decimal, Decimal) -> Option<Decimal>,
) -> EvalResult<CqlValue> {
    match (left, right) {
        (CqlValue::Long(_) | CqlValue::Integer(_), CqlValue::Long(_) | CqlValue::Integer(_)) => {
            let (a, b) = as_longs(left, right)?;
            long_op(a, b).map(CqlValue::Long).ok_or_else(|| EvalError::overflow(op))
        }
        _ => {
            let (a, b) = as_decimals(left, right, op)?;
            decimal_op(a, b)
                .map(CqlValue::Decimal)
                .ok_or_else(|| EvalError::overflow(op))
        }
    }
}

fn as_longs(left: &CqlValue, right: &CqlValue) -> EvalResult<(i64, i64)> {
    let widen = |value: &CqlValue| match value {
        CqlValue::Integer(i) => Some(i64::from(*i)),
        CqlValue::Long(l) => Some(*l),
        _ => None,
    };
    match (widen(left), widen(right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::internal("integer widening on non-integer value")),
    }
}

fn as_decimals(left: &CqlValue, right: &CqlValue, op: &'static str) -> EvalResult<(Decimal, Decimal)> {
    match (left.as_decimal(), right.as_decimal()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::invalid_operand(
            op,
            format!("expected numeric operands, found {}, {}", left.get_type(), right.get_type()),
        )),
    }
}

fn decimal_from_f64(value: f64, op: &'static str) -> EvalResult<CqlValue> {
    if !value.is_finite() {
        return Err(EvalError::overflow(op));
    }
    Decimal::from_f64(value)
        .map(CqlValue::Decimal)
        .ok_or_else(|| EvalError::overflow(op))
}

fn unary_f64(operand: &CqlValue, op: &'static str, f: fn(f64) -> f64) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        _ => {
            let value = operand
                .as_decimal()
                .and_then(|d| d.to_f64())
                .ok_or_else(|| {
                    EvalError::invalid_operand(op, format!("expected numeric operand, found {}", operand.get_type()))
                })?;
            decimal_from_f64(f(value), op)
        }
    }
}

fn rounding_to_integer(
    operand: &CqlValue,
    op: &'static str,
    f: fn(&Decimal) -> Decimal,
) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Integer(i) => Ok(CqlValue::Integer(*i)),
        CqlValue::Long(l) => Ok(CqlValue::Long(*l)),
        CqlValue::Decimal(d) => f(d)
            .to_i32()
            .map(CqlValue::Integer)
            .ok_or_else(|| EvalError::overflow(op)),
        other => Err(EvalError::invalid_operand(
            op,
            format!("expected numeric operand, found {}", other.get_type()),
        )),
    }
}

/// Round half toward positive infinity: 0.5 rounds to 1, -0.5 rounds to 0.
fn round_half_up(value: Decimal, digits: u32) -> EvalResult<Decimal> {
    let factor = Decimal::from(10i64.checked_pow(digits).ok_or_else(|| EvalError::overflow("Round"))?);
    let scaled = value.checked_mul(factor).ok_or_else(|| EvalError::overflow("Round"))?;
    let floor = scaled.floor();
    let rounded = if scaled - floor >= Decimal::new(5, 1) { floor + Decimal::ONE } else { floor };
    rounded
        .checked_div(factor)
        .ok_or_else(|| EvalError::overflow("Round"))
}

pub(crate) fn decimal_bound(high: bool) -> EvalResult<Decimal> {
    let literal = if high {
        "99999999999999999999.99999999"
    } else {
        "-99999999999999999999.99999999"
    };
    literal
        .parse::<Decimal>()
        .map_err(|_| EvalError::internal("decimal bound literal out of range"))
}

/// The widest value that collapses to `value` when observed at `value`'s
/// own scale, padded (low) or filled (high) out to `digits` places.
fn decimal_boundary(value: Decimal, digits: Option<u32>, high: bool) -> EvalResult<Decimal> {
    let digits = digits.unwrap_or(8);
    if digits > 28 {
        return Err(EvalError::invalid_operand(
            if high { "HighBoundary" } else { "LowBoundary" },
            format!("precision {digits} exceeds Decimal scale"),
        ));
    }
    let mut padded = value;
    if digits >= value.scale() {
        if high {
            let fill = Decimal::new(1, value.scale()) - Decimal::new(1, digits);
            padded = value
                .checked_add(fill)
                .ok_or_else(|| EvalError::overflow("HighBoundary"))?;
        }
        padded.rescale(digits);
        Ok(padded)
    } else {
        // Coarser than the value itself: truncate toward the boundary
        let factor = Decimal::from(10i64.pow(digits));
        let scaled = value * factor;
        let snapped = if high { scaled.ceil() } else { scaled.floor() };
        Ok(snapped / factor)
    }
}

fn local_type_name(qualified: &str) -> &str {
    qualified.rsplit(['}', '.']).next().unwrap_or(qualified)
}

fn date_precision_digits(precision: DateTimePrecision) -> i32 {
    match precision {
        DateTimePrecision::Year => 4,
        DateTimePrecision::Month => 6,
        DateTimePrecision::Day => 8,
        DateTimePrecision::Hour => 10,
        DateTimePrecision::Minute => 12,
        DateTimePrecision::Second => 14,
        DateTimePrecision::Millisecond => 17,
    }
}

fn time_precision_digits(precision: DateTimePrecision) -> i32 {
    match precision {
        DateTimePrecision::Hour => 2,
        DateTimePrecision::Minute => 4,
        DateTimePrecision::Second => 6,
        _ => 9,
    }
}

fn date_precision_from_digits(digits: u32, op: &'static str) -> EvalResult<DateTimePrecision> {
    match digits {
        4 => Ok(DateTimePrecision::Year),
        6 => Ok(DateTimePrecision::Month),
        8 => Ok(DateTimePrecision::Day),
        10 => Ok(DateTimePrecision::Hour),
        12 => Ok(DateTimePrecision::Minute),
        14 => Ok(DateTimePrecision::Second),
        17 => Ok(DateTimePrecision::Millisecond),
        other => Err(EvalError::invalid_operand(
            op,
            format!("{other} digits does not name a date/time precision"),
        )),
    }
}

fn time_precision_from_digits(digits: u32, op: &'static str) -> EvalResult<DateTimePrecision> {
    match digits {
        2 => Ok(DateTimePrecision::Hour),
        4 => Ok(DateTimePrecision::Minute),
        6 => Ok(DateTimePrecision::Second),
        9 => Ok(DateTimePrecision::Millisecond),
        other => Err(EvalError::invalid_operand(
            op,
            format!("{other} digits does not name a time precision"),
        )),
    }
}

pub(crate) fn convert_to_left_unit(
    ctx: &EvaluationContext,
    left: &CqlQuantity,
    right: &CqlQuantity,
) -> EvalResult<Decimal> {
    let left_unit = left.unit_or_default();
    let right_unit = right.unit_or_default();
    if left_unit == right_unit {
        return Ok(right.value);
    }
    if !ctx.units().comparable(left_unit, right_unit)? {
        return Err(EvalError::incompatible_units(left_unit, right_unit));
    }
    ctx.units().convert(&right.value, right_unit, left_unit)
}

fn multiply_units(left: Option<&str>, right: Option<&str>) -> Option<String> {
    match (normalize_unit(left), normalize_unit(right)) {
        (None, None) => None,
        (Some(u), None) | (None, Some(u)) => Some(u.to_string()),
        (Some(a), Some(b)) => Some(format!("{a}.{b}")),
    }
}

fn divide_units(left: Option<&str>, right: Option<&str>) -> Option<String> {
    match (normalize_unit(left), normalize_unit(right)) {
        (_, None) => normalize_unit(left).map(str::to_string),
        (None, Some(b)) => Some(format!("1/{b}")),
        (Some(a), Some(b)) => Some(format!("{a}/{b}")),
    }
}

fn normalize_unit(unit: Option<&str>) -> Option<&str> {
    match unit {
        None | Some("1") | Some("") => None,
        Some(u) => Some(u),
    }
}

/// CQL duration unit names and their UCUM spellings, mapped to the value
/// precision they step. Weeks step days with a multiplier.
fn duration_precision(unit: &str) -> Option<(DateTimePrecision, i64)> {
    match unit.trim() {
        "year" | "years" | "a" => Some((DateTimePrecision::Year, 1)),
        "month" | "months" | "mo" => Some((DateTimePrecision::Month, 1)),
        "week" | "weeks" | "wk" => Some((DateTimePrecision::Day, 7)),
        "day" | "days" | "d" => Some((DateTimePrecision::Day, 1)),
        "hour" | "hours" | "h" => Some((DateTimePrecision::Hour, 1)),
        "minute" | "minutes" | "min" => Some((DateTimePrecision::Minute, 1)),
        "second" | "seconds" | "s" => Some((DateTimePrecision::Second, 1)),
        "millisecond" | "milliseconds" | "ms" => Some((DateTimePrecision::Millisecond, 1)),
        _ => None,
    }
}

fn duration_amount(quantity: &CqlQuantity, sign: i64, op: &'static str) -> EvalResult<(DateTimePrecision, i64)> {
    let unit = quantity.unit.as_deref().unwrap_or("day");
    let (precision, multiplier) = duration_precision(unit)
        .ok_or_else(|| EvalError::invalid_unit(unit))?;
    let amount = quantity
        .value
        .trunc()
        .to_i64()
        .ok_or_else(|| EvalError::overflow(op))?;
    Ok((precision, amount * multiplier * sign))
}

fn add_quantity_to_date(date: &CqlDate, quantity: &CqlQuantity, sign: i64) -> EvalResult<CqlValue> {
    let (precision, amount) = duration_amount(quantity, sign, "Add")?;
    let result = match precision {
        DateTimePrecision::Year => {
            let years = i32::try_from(amount).map_err(|_| EvalError::overflow("Add"))?;
            date.add_years(years)?
        }
        DateTimePrecision::Month => date.add_months(amount)?,
        DateTimePrecision::Day => date.add_days(amount)?,
        DateTimePrecision::Hour => date.add_days(amount / 24)?,
        // Units finer than an hour cannot move a date
        _ => *date,
    };
    Ok(CqlValue::Date(result))
}

fn add_quantity_to_datetime(
    datetime: &CqlDateTime,
    quantity: &CqlQuantity,
    sign: i64,
) -> EvalResult<CqlValue> {
    let (precision, amount) = duration_amount(quantity, sign, "Add")?;
    Ok(CqlValue::DateTime(datetime.add_units(precision, amount)?))
}

fn add_quantity_to_time(time: &CqlTime, quantity: &CqlQuantity, sign: i64) -> EvalResult<CqlValue> {
    let (precision, amount) = duration_amount(quantity, sign, "Add")?;
    if !precision.is_time_precision() {
        return Err(EvalError::invalid_operand(
            "Add",
            format!("cannot add {precision}s to a Time"),
        ));
    }
    Ok(CqlValue::Time(time.add_units(precision, amount)?))
}

/// Uncertainty propagation: combine bounds pairwise. A missing bound stays
/// missing.
fn combine_uncertainties(
    ctx: &EvaluationContext,
    a: &CqlInterval,
    b: &CqlInterval,
    f: fn(&EvaluationContext, &CqlValue, &CqlValue) -> EvalResult<CqlValue>,
) -> EvalResult<CqlValue> {
    let combine = |x: Option<&CqlValue>, y: Option<&CqlValue>| -> EvalResult<Option<CqlValue>> {
        match (x, y) {
            (Some(x), Some(y)) => Ok(Some(f(ctx, x, y)?)),
            _ => Ok(None),
        }
    };
    let low = combine(a.low(), b.low())?;
    let high = combine(a.high(), b.high())?;
    Ok(CqlValue::Interval(CqlInterval::new(
        low,
        a.low_closed && b.low_closed,
        high,
        a.high_closed && b.high_closed,
    )))
}
