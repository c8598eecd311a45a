//! Comparison operators
//!
//! Equal, Equivalent, NotEqual, and the four orderings, all three-valued.
//! The helpers `cql_equal`, `cql_equivalent`, and `cql_compare` are the
//! single source of comparison semantics; membership, distinct, sorting,
//! and the interval algebra all route through them.
//!
//! Temporal operands compare through the precision-aware kernel, so a
//! comparison that cannot be decided at the shared precision yields null
//! rather than false. Quantities reconcile units first; a duration
//! uncertainty (an interval standing in for a scalar) compares against
//! points with the possible-range rules.

use std::cmp::Ordering;

use lumen_cql_types::{
    CqlInterval, CqlQuantity, CqlRatio, CqlType, CqlValue, TemporalCompare,
};

use crate::context::EvaluationContext;
use crate::error::{EvalError, EvalResult};
use crate::operators::interval::{interval_end, interval_start};
use crate::registry::OperatorRegistry;
use crate::units::canonical_eq;

pub(crate) fn register(registry: &mut OperatorRegistry) {
    registry.register_binary("Equal", CqlType::Any, CqlType::Any, CqlType::Boolean, equal);
    registry.register_binary("NotEqual", CqlType::Any, CqlType::Any, CqlType::Boolean, not_equal);
    registry.register_binary(
        "Equivalent",
        CqlType::Any,
        CqlType::Any,
        CqlType::Boolean,
        equivalent,
    );

    let orderable: &[(CqlType, CqlType)] = &[
        (CqlType::Integer, CqlType::Integer),
        (CqlType::Long, CqlType::Long),
        (CqlType::Decimal, CqlType::Decimal),
        (CqlType::String, CqlType::String),
        (CqlType::Date, CqlType::Date),
        (CqlType::DateTime, CqlType::DateTime),
        (CqlType::Date, CqlType::DateTime),
        (CqlType::DateTime, CqlType::Date),
        (CqlType::Time, CqlType::Time),
        (CqlType::Quantity, CqlType::Quantity),
        // Duration uncertainties compare like scalars
        (CqlType::interval(CqlType::Any), CqlType::Any),
        (CqlType::Any, CqlType::interval(CqlType::Any)),
    ];
    for (left, right) in orderable {
        registry.register_binary("Less", left.clone(), right.clone(), CqlType::Boolean, less);
        registry.register_binary("Greater", left.clone(), right.clone(), CqlType::Boolean, greater);
        registry.register_binary(
            "LessOrEqual",
            left.clone(),
            right.clone(),
            CqlType::Boolean,
            less_or_equal,
        );
        registry.register_binary(
            "GreaterOrEqual",
            left.clone(),
            right.clone(),
            CqlType::Boolean,
            greater_or_equal,
        );
    }
}

fn equal(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    Ok(cql_equal(ctx, left, right)?.map_or(CqlValue::Null, CqlValue::Boolean))
}

fn not_equal(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    Ok(cql_equal(ctx, left, right)?.map_or(CqlValue::Null, |eq| CqlValue::Boolean(!eq)))
}

fn equivalent(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ok(CqlValue::Boolean(true)),
        (true, false) | (false, true) => Ok(CqlValue::Boolean(false)),
        (false, false) => Ok(CqlValue::Boolean(cql_equivalent(ctx, left, right)?)),
    }
}

fn ordering_op(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
    decide: fn(Ordering) -> bool,
) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    Ok(cql_compare(ctx, left, right)?
        .map_or(CqlValue::Null, |ordering| CqlValue::Boolean(decide(ordering))))
}

fn less(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    ordering_op(ctx, left, right, Ordering::is_lt)
}

fn greater(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    ordering_op(ctx, left, right, Ordering::is_gt)
}

fn less_or_equal(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    ordering_op(ctx, left, right, Ordering::is_le)
}

fn greater_or_equal(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    ordering_op(ctx, left, right, Ordering::is_ge)
}

fn temporal_equal(outcome: TemporalCompare) -> Option<bool> {
    outcome.to_bool(&[TemporalCompare::Equal])
}

pub(crate) fn temporal_ordering(outcome: TemporalCompare) -> Option<Ordering> {
    match outcome {
        TemporalCompare::Before => Some(Ordering::Less),
        TemporalCompare::Equal => Some(Ordering::Equal),
        TemporalCompare::After => Some(Ordering::Greater),
        TemporalCompare::InsufficientPrecision | TemporalCompare::ComparedToNull => None,
    }
}

pub(crate) fn default_offset(ctx: &EvaluationContext) -> Option<i16> {
    ctx.now().timezone_offset
}

/// Value equality. `Some(true)` / `Some(false)` are decided outcomes;
/// `None` means the comparison cannot be decided (precision, or a null
/// inside a structure). Callers handle top-level nulls.
pub fn cql_equal(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<Option<bool>> {
    match (left, right) {
        (CqlValue::Boolean(a), CqlValue::Boolean(b)) => Ok(Some(a == b)),
        (CqlValue::Integer(a), CqlValue::Integer(b)) => Ok(Some(a == b)),
        (CqlValue::Long(a), CqlValue::Long(b)) => Ok(Some(a == b)),
        (CqlValue::Decimal(a), CqlValue::Decimal(b)) => Ok(Some(a == b)),
        (CqlValue::String(a), CqlValue::String(b)) => Ok(Some(a == b)),

        // Mixed numerics promote to the wider operand
        (CqlValue::Integer(_) | CqlValue::Long(_) | CqlValue::Decimal(_), _)
        | (_, CqlValue::Integer(_) | CqlValue::Long(_) | CqlValue::Decimal(_))
            if both_numeric(left, right) =>
        {
            let (a, b) = promote_to_decimal(left, right)?;
            Ok(Some(a == b))
        }

        (CqlValue::Date(a), CqlValue::Date(b)) => {
            Ok(temporal_equal(a.compare_with_precision(b, None)))
        }
        (CqlValue::DateTime(a), CqlValue::DateTime(b)) => Ok(temporal_equal(
            a.compare_with_precision(b, None, default_offset(ctx)),
        )),
        (CqlValue::Date(a), CqlValue::DateTime(b)) => Ok(temporal_equal(
            lumen_cql_types::CqlDateTime::from_date(*a).compare_with_precision(
                b,
                None,
                default_offset(ctx),
            ),
        )),
        (CqlValue::DateTime(a), CqlValue::Date(b)) => Ok(temporal_equal(
            a.compare_with_precision(
                &lumen_cql_types::CqlDateTime::from_date(*b),
                None,
                default_offset(ctx),
            ),
        )),
        (CqlValue::Time(a), CqlValue::Time(b)) => {
            Ok(temporal_equal(a.compare_with_precision(b, None)))
        }

        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => quantity_equal(ctx, a, b),

        (CqlValue::Ratio(a), CqlValue::Ratio(b)) => Ok(Some(
            a.numerator == b.numerator && a.denominator == b.denominator,
        )),

        // Code equality ignores display but not version
        (CqlValue::Code(a), CqlValue::Code(b)) => {
            Ok(Some(a.code == b.code && a.system == b.system && a.version == b.version))
        }
        (CqlValue::Concept(a), CqlValue::Concept(b)) => Ok(Some(a.codes == b.codes)),
        (CqlValue::CodeSystem(a), CqlValue::CodeSystem(b))
        | (CqlValue::ValueSet(a), CqlValue::ValueSet(b)) => {
            Ok(Some(a.id == b.id && a.version == b.version))
        }

        (CqlValue::List(a), CqlValue::List(b)) => {
            if a.elements.len() != b.elements.len() {
                return Ok(Some(false));
            }
            let mut undecided = false;
            for (elem_a, elem_b) in a.elements.iter().zip(&b.elements) {
                match (elem_a.is_null(), elem_b.is_null()) {
                    (true, true) => continue,
                    (true, false) | (false, true) => undecided = true,
                    (false, false) => match cql_equal(ctx, elem_a, elem_b)? {
                        Some(false) => return Ok(Some(false)),
                        Some(true) => {}
                        None => undecided = true,
                    },
                }
            }
            Ok(if undecided { None } else { Some(true) })
        }

        (CqlValue::Interval(a), CqlValue::Interval(b)) => interval_equal(ctx, a, b),

        (CqlValue::Tuple(a), CqlValue::Tuple(b)) => {
            if a.elements.len() != b.elements.len() {
                return Ok(Some(false));
            }
            let mut undecided = false;
            for (name, value_a) in &a.elements {
                let Some(value_b) = b.elements.get(name) else {
                    return Ok(Some(false));
                };
                match (value_a.is_null(), value_b.is_null()) {
                    (true, true) => continue,
                    (true, false) | (false, true) => undecided = true,
                    (false, false) => match cql_equal(ctx, value_a, value_b)? {
                        Some(false) => return Ok(Some(false)),
                        Some(true) => {}
                        None => undecided = true,
                    },
                }
            }
            Ok(if undecided { None } else { Some(true) })
        }

        (CqlValue::Resource(a), CqlValue::Resource(b)) => {
            Ok(Some(a.resource_type == b.resource_type && a.data == b.data))
        }

        // A duration uncertainty equals a point only when it has collapsed
        // to that point
        (CqlValue::Interval(uncertainty), point) | (point, CqlValue::Interval(uncertainty)) => {
            uncertainty_equal(ctx, uncertainty, point)
        }

        _ => Ok(Some(false)),
    }
}

/// Equivalence: decided for every input. Codes ignore version and display,
/// concepts overlap on any code, strings ignore case, and comparisons that
/// equality leaves undecided come out false.
pub fn cql_equivalent(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<bool> {
    match (left, right) {
        (CqlValue::Code(a), CqlValue::Code(b)) => Ok(a.is_equivalent(b)),
        (CqlValue::Concept(a), CqlValue::Concept(b)) => {
            Ok(a.codes.iter().any(|code| b.contains_equivalent(code)))
        }
        (CqlValue::Code(code), CqlValue::Concept(concept))
        | (CqlValue::Concept(concept), CqlValue::Code(code)) => {
            Ok(concept.contains_equivalent(code))
        }

        (CqlValue::String(a), CqlValue::String(b)) => {
            Ok(a.to_lowercase() == b.to_lowercase())
        }

        (CqlValue::Date(a), CqlValue::Date(b)) => {
            Ok(a.compare_with_precision(b, None) == TemporalCompare::Equal)
        }
        (CqlValue::DateTime(a), CqlValue::DateTime(b)) => Ok(
            a.compare_with_precision(b, None, default_offset(ctx)) == TemporalCompare::Equal,
        ),
        (CqlValue::Time(a), CqlValue::Time(b)) => {
            Ok(a.compare_with_precision(b, None) == TemporalCompare::Equal)
        }

        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => {
            Ok(quantity_equal(ctx, a, b)?.unwrap_or(false))
        }

        // Ratios are equivalent when they reduce to the same value
        (CqlValue::Ratio(a), CqlValue::Ratio(b)) => ratio_equivalent(ctx, a, b),

        (CqlValue::List(a), CqlValue::List(b)) => {
            if a.elements.len() != b.elements.len() {
                return Ok(false);
            }
            for (elem_a, elem_b) in a.elements.iter().zip(&b.elements) {
                match (elem_a.is_null(), elem_b.is_null()) {
                    (true, true) => continue,
                    (true, false) | (false, true) => return Ok(false),
                    (false, false) => {
                        if !cql_equivalent(ctx, elem_a, elem_b)? {
                            return Ok(false);
                        }
                    }
                }
            }
            Ok(true)
        }

        (CqlValue::Tuple(a), CqlValue::Tuple(b)) => {
            if a.elements.len() != b.elements.len() {
                return Ok(false);
            }
            for (name, value_a) in &a.elements {
                let Some(value_b) = b.elements.get(name) else {
                    return Ok(false);
                };
                match (value_a.is_null(), value_b.is_null()) {
                    (true, true) => continue,
                    (true, false) | (false, true) => return Ok(false),
                    (false, false) => {
                        if !cql_equivalent(ctx, value_a, value_b)? {
                            return Ok(false);
                        }
                    }
                }
            }
            Ok(true)
        }

        (CqlValue::Interval(a), CqlValue::Interval(b)) => {
            Ok(interval_equal(ctx, a, b)?.unwrap_or(false))
        }

        _ => Ok(cql_equal(ctx, left, right)?.unwrap_or(false)),
    }
}

/// Ordering comparison. `None` means undecidable: differing temporal
/// precision, a null interval bound, or an uncertainty straddling the
/// point.
pub fn cql_compare(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<Option<Ordering>> {
    // Uncertainties first, so interval-vs-point does not fall through to
    // the type mismatch arm
    if let (CqlValue::Interval(uncertainty), point) = (left, right) {
        if !matches!(right, CqlValue::Interval(_)) {
            return uncertainty_compare_point(ctx, uncertainty, point);
        }
    }
    if let (point, CqlValue::Interval(uncertainty)) = (left, right) {
        if !matches!(left, CqlValue::Interval(_)) {
            return Ok(uncertainty_compare_point(ctx, uncertainty, point)?.map(Ordering::reverse));
        }
    }

    match (left, right) {
        (CqlValue::Integer(a), CqlValue::Integer(b)) => Ok(Some(a.cmp(b))),
        (CqlValue::Long(a), CqlValue::Long(b)) => Ok(Some(a.cmp(b))),
        (CqlValue::Decimal(a), CqlValue::Decimal(b)) => Ok(Some(a.cmp(b))),
        (CqlValue::Integer(_) | CqlValue::Long(_) | CqlValue::Decimal(_), _)
        | (_, CqlValue::Integer(_) | CqlValue::Long(_) | CqlValue::Decimal(_))
            if both_numeric(left, right) =>
        {
            let (a, b) = promote_to_decimal(left, right)?;
            Ok(Some(a.cmp(&b)))
        }

        (CqlValue::String(a), CqlValue::String(b)) => Ok(Some(a.cmp(b))),

        (CqlValue::Date(a), CqlValue::Date(b)) => {
            Ok(temporal_ordering(a.compare_with_precision(b, None)))
        }
        (CqlValue::DateTime(a), CqlValue::DateTime(b)) => Ok(temporal_ordering(
            a.compare_with_precision(b, None, default_offset(ctx)),
        )),
        (CqlValue::Date(a), CqlValue::DateTime(b)) => Ok(temporal_ordering(
            lumen_cql_types::CqlDateTime::from_date(*a).compare_with_precision(
                b,
                None,
                default_offset(ctx),
            ),
        )),
        (CqlValue::DateTime(a), CqlValue::Date(b)) => Ok(temporal_ordering(
            a.compare_with_precision(
                &lumen_cql_types::CqlDateTime::from_date(*b),
                None,
                default_offset(ctx),
            ),
        )),
        (CqlValue::Time(a), CqlValue::Time(b)) => {
            Ok(temporal_ordering(a.compare_with_precision(b, None)))
        }

        (CqlValue::Quantity(a), CqlValue::Quantity(b)) => quantity_ordering(ctx, a, b),

        (CqlValue::Interval(a), CqlValue::Interval(b)) => uncertainty_compare_range(ctx, a, b),

        _ => Err(EvalError::type_mismatch(
            "orderable operands",
            format!("{}, {}", left.get_type(), right.get_type()),
        )),
    }
}

fn both_numeric(left: &CqlValue, right: &CqlValue) -> bool {
    let numeric =
        |v: &CqlValue| matches!(v, CqlValue::Integer(_) | CqlValue::Long(_) | CqlValue::Decimal(_));
    numeric(left) && numeric(right)
}

fn promote_to_decimal(
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<(rust_decimal::Decimal, rust_decimal::Decimal)> {
    match (left.as_decimal(), right.as_decimal()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::internal("numeric promotion on non-numeric value")),
    }
}

fn quantity_equal(
    ctx: &EvaluationContext,
    a: &CqlQuantity,
    b: &CqlQuantity,
) -> EvalResult<Option<bool>> {
    let unit_a = a.unit_or_default();
    let unit_b = b.unit_or_default();
    if unit_a == unit_b {
        return Ok(Some(a.value == b.value));
    }
    if !ctx.units().comparable(unit_a, unit_b)? {
        return Ok(Some(false));
    }
    let canon_a = ctx.units().to_canonical(&a.value, unit_a)?;
    let canon_b = ctx.units().to_canonical(&b.value, unit_b)?;
    Ok(Some(canonical_eq(canon_a, canon_b)))
}

fn quantity_ordering(
    ctx: &EvaluationContext,
    a: &CqlQuantity,
    b: &CqlQuantity,
) -> EvalResult<Option<Ordering>> {
    let unit_a = a.unit_or_default();
    let unit_b = b.unit_or_default();
    if unit_a == unit_b {
        return Ok(Some(a.value.cmp(&b.value)));
    }
    if !ctx.units().comparable(unit_a, unit_b)? {
        return Err(EvalError::incompatible_units(unit_a, unit_b));
    }
    let canon_a = ctx.units().to_canonical(&a.value, unit_a)?;
    let canon_b = ctx.units().to_canonical(&b.value, unit_b)?;
    if canonical_eq(canon_a, canon_b) {
        Ok(Some(Ordering::Equal))
    } else if canon_a < canon_b {
        Ok(Some(Ordering::Less))
    } else {
        Ok(Some(Ordering::Greater))
    }
}

fn ratio_equivalent(ctx: &EvaluationContext, a: &CqlRatio, b: &CqlRatio) -> EvalResult<bool> {
    let num_unit_a = a.numerator.unit_or_default();
    let num_unit_b = b.numerator.unit_or_default();
    let den_unit_a = a.denominator.unit_or_default();
    let den_unit_b = b.denominator.unit_or_default();
    if !ctx.units().comparable(num_unit_a, num_unit_b)?
        || !ctx.units().comparable(den_unit_a, den_unit_b)?
    {
        return Ok(false);
    }
    // a.num / a.den == b.num / b.den, cross-multiplied in canonical units
    let left = ctx.units().to_canonical(&a.numerator.value, num_unit_a)?
        * ctx.units().to_canonical(&b.denominator.value, den_unit_b)?;
    let right = ctx.units().to_canonical(&b.numerator.value, num_unit_b)?
        * ctx.units().to_canonical(&a.denominator.value, den_unit_a)?;
    Ok(canonical_eq(left, right))
}

/// Interval equality is defined on the effective starting and ending
/// points, so `Interval[1, 5]` equals `Interval[1, 6)`. An edge with no
/// effective point leaves the comparison undecided.
fn interval_equal(
    ctx: &EvaluationContext,
    a: &CqlInterval,
    b: &CqlInterval,
) -> EvalResult<Option<bool>> {
    let edge_equal = |x: &CqlValue, y: &CqlValue| -> EvalResult<Option<bool>> {
        if x.is_null() || y.is_null() {
            return Ok(None);
        }
        cql_equal(ctx, x, y)
    };
    match (
        edge_equal(&interval_start(a)?, &interval_start(b)?)?,
        edge_equal(&interval_end(a)?, &interval_end(b)?)?,
    ) {
        (Some(false), _) | (_, Some(false)) => Ok(Some(false)),
        (Some(true), Some(true)) => Ok(Some(true)),
        _ => Ok(None),
    }
}

fn uncertainty_equal(
    ctx: &EvaluationContext,
    uncertainty: &CqlInterval,
    point: &CqlValue,
) -> EvalResult<Option<bool>> {
    match uncertainty_compare_point(ctx, uncertainty, point)? {
        Some(Ordering::Equal) => Ok(Some(true)),
        Some(_) => Ok(Some(false)),
        None => Ok(None),
    }
}

/// Where the whole uncertainty range sits relative to a point: `Less` when
/// every possible value is below it, `Equal` only when the range has
/// collapsed onto it, otherwise undecided.
fn uncertainty_compare_point(
    ctx: &EvaluationContext,
    uncertainty: &CqlInterval,
    point: &CqlValue,
) -> EvalResult<Option<Ordering>> {
    let low = uncertainty.low();
    let high = uncertainty.high();

    if let (Some(low), Some(high)) = (low, high) {
        if cql_equal(ctx, low, high)? == Some(true) && cql_equal(ctx, low, point)? == Some(true) {
            return Ok(Some(Ordering::Equal));
        }
    }
    if let Some(high) = high {
        if cql_compare(ctx, high, point)? == Some(Ordering::Less) {
            return Ok(Some(Ordering::Less));
        }
    }
    if let Some(low) = low {
        if cql_compare(ctx, low, point)? == Some(Ordering::Greater) {
            return Ok(Some(Ordering::Greater));
        }
    }
    Ok(None)
}

/// Two uncertainty ranges order only when they do not overlap, or when
/// both have collapsed onto the same point.
fn uncertainty_compare_range(
    ctx: &EvaluationContext,
    a: &CqlInterval,
    b: &CqlInterval,
) -> EvalResult<Option<Ordering>> {
    if let (Some(a_low), Some(a_high), Some(b_low), Some(b_high)) =
        (a.low(), a.high(), b.low(), b.high())
    {
        if cql_equal(ctx, a_low, a_high)? == Some(true)
            && cql_equal(ctx, b_low, b_high)? == Some(true)
            && cql_equal(ctx, a_low, b_low)? == Some(true)
        {
            return Ok(Some(Ordering::Equal));
        }
    }
    if let (Some(a_high), Some(b_low)) = (a.high(), b.low()) {
        if cql_compare(ctx, a_high, b_low)? == Some(Ordering::Less) {
            return Ok(Some(Ordering::Less));
        }
    }
    if let (Some(a_low), Some(b_high)) = (a.low(), b.high()) {
        if cql_compare(ctx, a_low, b_high)? == Some(Ordering::Greater) {
            return Ok(Some(Ordering::Greater));
        }
    }
    Ok(None)
}
