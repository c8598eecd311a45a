//! Interval algebra
//!
//! Membership, relation, and combination operators over intervals of any
//! orderable point type. Two bound views are in play: membership tests
//! compare against the raw bounds with their closure flags, while the
//! relation and combination operators work on effective start/end points,
//! where an open bound steps to its successor or predecessor and an
//! unbounded closed end becomes the point type's sentinel. An unbounded
//! open end has no effective point; it surfaces as null and propagates.
//!
//! Three-valued combination follows one rule throughout: a definite false
//! on either side wins, both sides true is true, anything else is null.

use std::cmp::Ordering;

use lumen_cql_ast::{BeforeAfterExpression, IntervalExpression};
use lumen_cql_types::{
    CqlDate, CqlDateTime, CqlInterval, CqlList, CqlQuantity, CqlTime, CqlType, CqlValue,
    TemporalCompare,
};
use rust_decimal::Decimal;

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::arithmetic::{convert_to_left_unit, decimal_bound, step};
use crate::operators::comparison::cql_equal;
use crate::operators::datetime::{compare_points_at, point_same};
use crate::registry::OperatorRegistry;

pub(crate) fn register(registry: &mut OperatorRegistry) {
    let interval_any = CqlType::interval(CqlType::Any);
    let list_any = CqlType::list(CqlType::Any);

    registry.register_unary("Start", interval_any.clone(), CqlType::Any, start_of);
    registry.register_unary("End", interval_any.clone(), CqlType::Any, end_of);
    registry.register_unary("PointFrom", interval_any.clone(), CqlType::Any, point_from);
    registry.register_unary("Width", interval_any.clone(), CqlType::Any, width_of);
    registry.register_unary("Size", interval_any.clone(), CqlType::Any, size_of);
    registry.register_unary("Collapse", list_any.clone(), list_any, collapse);

    // A point on the right of Contains (or the left of In) is membership;
    // an interval is inclusion. One implementation serves both names.
    for name in ["Contains", "Includes"] {
        registry.register_binary(
            name,
            interval_any.clone(),
            CqlType::Any,
            CqlType::Boolean,
            contains,
        );
    }
    for name in ["In", "IncludedIn"] {
        registry.register_binary(
            name,
            CqlType::Any,
            interval_any.clone(),
            CqlType::Boolean,
            within,
        );
    }
    for name in ["ProperContains", "ProperIncludes"] {
        registry.register_binary(
            name,
            interval_any.clone(),
            CqlType::Any,
            CqlType::Boolean,
            proper_contains,
        );
    }
    for name in ["ProperIn", "ProperIncludedIn"] {
        registry.register_binary(
            name,
            CqlType::Any,
            interval_any.clone(),
            CqlType::Boolean,
            proper_within,
        );
    }

    let relations: &[(&str, crate::registry::BinaryOpFn)] = &[
        ("Meets", meets),
        ("MeetsBefore", meets_before),
        ("MeetsAfter", meets_after),
        ("Overlaps", overlaps),
        ("OverlapsBefore", overlaps_before),
        ("OverlapsAfter", overlaps_after),
        ("Starts", starts),
        ("Ends", ends),
    ];
    for &(name, op) in relations {
        registry.register_binary(
            name,
            interval_any.clone(),
            interval_any.clone(),
            CqlType::Boolean,
            op,
        );
    }

    let combinations: &[(&str, crate::registry::BinaryOpFn)] = &[
        ("Union", union_intervals),
        ("Intersect", intersect_intervals),
        ("Except", except_intervals),
    ];
    for &(name, op) in combinations {
        registry.register_binary(
            name,
            interval_any.clone(),
            interval_any.clone(),
            interval_any.clone(),
            op,
        );
    }
}

impl CqlEngine {
    pub(crate) fn eval_interval(
        &self,
        expr: &IntervalExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let low = match &expr.low {
            Some(low_expr) => self.evaluate(low_expr, ctx)?,
            None => CqlValue::Null,
        };
        let high = match &expr.high {
            Some(high_expr) => self.evaluate(high_expr, ctx)?,
            None => CqlValue::Null,
        };
        let low_closed = self.closure_flag(
            expr.low_closed_expression.as_deref(),
            expr.low_closed,
            ctx,
        )?;
        let high_closed = self.closure_flag(
            expr.high_closed_expression.as_deref(),
            expr.high_closed,
            ctx,
        )?;
        if !low.is_null() && !high.is_null() {
            let order = compare_points_at(ctx, &low, &high, None, "Interval")?;
            if order == TemporalCompare::After {
                return Err(EvalError::invalid_operand(
                    "Interval",
                    format!("low bound {low} is after high bound {high}"),
                ));
            }
        }
        Ok(CqlValue::Interval(CqlInterval::new(
            Some(low),
            low_closed,
            Some(high),
            high_closed,
        )))
    }

    fn closure_flag(
        &self,
        flag_expr: Option<&lumen_cql_ast::Expression>,
        flag: Option<bool>,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<bool> {
        let default = flag.unwrap_or(true);
        match flag_expr {
            None => Ok(default),
            Some(flag_expr) => match self.evaluate(flag_expr, ctx)? {
                CqlValue::Boolean(value) => Ok(value),
                CqlValue::Null => Ok(default),
                other => Err(EvalError::invalid_operand(
                    "Interval",
                    format!("closure flag must be Boolean, found {}", other.get_type()),
                )),
            },
        }
    }

    /// `Before` over points or intervals: the left edge under test is the
    /// end of the left operand and the start of the right one.
    pub(crate) fn eval_before(
        &self,
        expr: &BeforeAfterExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_operand_pair(&expr.operand, "Before", ctx)?;
        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }
        let left_edge = boundary_point(&left, true)?;
        let right_edge = boundary_point(&right, false)?;
        point_same(
            ctx,
            &left_edge,
            &right_edge,
            expr.precision,
            &[TemporalCompare::Before],
            "Before",
        )
    }

    pub(crate) fn eval_after(
        &self,
        expr: &BeforeAfterExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_operand_pair(&expr.operand, "After", ctx)?;
        if left.is_null() || right.is_null() {
            return Ok(CqlValue::Null);
        }
        let left_edge = boundary_point(&left, false)?;
        let right_edge = boundary_point(&right, true)?;
        point_same(
            ctx,
            &left_edge,
            &right_edge,
            expr.precision,
            &[TemporalCompare::After],
            "After",
        )
    }
}

/// An interval operand collapses to one of its effective edges; a point
/// stands for itself.
fn boundary_point(value: &CqlValue, take_end: bool) -> EvalResult<CqlValue> {
    match value {
        CqlValue::Interval(interval) => {
            if take_end {
                interval_end(interval)
            } else {
                interval_start(interval)
            }
        }
        other => Ok(other.clone()),
    }
}

/// Effective start: the low bound itself when closed, its successor when
/// open, the point type's minimum when unbounded-closed, and null when
/// unbounded-open.
pub(crate) fn interval_start(interval: &CqlInterval) -> EvalResult<CqlValue> {
    match interval.low() {
        Some(low) if interval.low_closed => Ok(low.clone()),
        Some(low) => step(low, 1, "Start"),
        None if interval.low_closed => point_sentinel(interval, false),
        None => Ok(CqlValue::Null),
    }
}

/// Effective end, mirroring [`interval_start`].
pub(crate) fn interval_end(interval: &CqlInterval) -> EvalResult<CqlValue> {
    match interval.high() {
        Some(high) if interval.high_closed => Ok(high.clone()),
        Some(high) => step(high, -1, "End"),
        None if interval.high_closed => point_sentinel(interval, true),
        None => Ok(CqlValue::Null),
    }
}

fn point_sentinel(interval: &CqlInterval, high: bool) -> EvalResult<CqlValue> {
    // A quantity sentinel borrows its unit from the opposite bound.
    let witness = if high {
        interval.low()
    } else {
        interval.high()
    };
    let sentinel = match &interval.point_type {
        CqlType::Integer => CqlValue::Integer(if high { i32::MAX } else { i32::MIN }),
        CqlType::Long => CqlValue::Long(if high { i64::MAX } else { i64::MIN }),
        CqlType::Decimal => CqlValue::Decimal(decimal_bound(high)?),
        CqlType::Quantity => {
            let unit = match witness {
                Some(CqlValue::Quantity(q)) => q.unit.clone(),
                _ => None,
            };
            CqlValue::Quantity(CqlQuantity {
                value: decimal_bound(high)?,
                unit,
            })
        }
        CqlType::Date => CqlValue::Date(if high {
            CqlDate::max_value()
        } else {
            CqlDate::min_value()
        }),
        CqlType::DateTime => CqlValue::DateTime(if high {
            CqlDateTime::max_value()
        } else {
            CqlDateTime::min_value()
        }),
        CqlType::Time => CqlValue::Time(if high {
            CqlTime::max_value()
        } else {
            CqlTime::min_value()
        }),
        _ => CqlValue::Null,
    };
    Ok(sentinel)
}

fn start_of(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Interval(interval) => interval_start(interval),
        other => Err(expected_interval("Start", other)),
    }
}

fn end_of(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Interval(interval) => interval_end(interval),
        other => Err(expected_interval("End", other)),
    }
}

/// The single point of a unit interval. Anything wider is a caller error.
fn point_from(ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let interval = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::Interval(interval) => interval,
        other => return Err(expected_interval("PointFrom", other)),
    };
    let start = interval_start(interval)?;
    let end = interval_end(interval)?;
    if start.is_null() || end.is_null() {
        return Err(EvalError::invalid_operand(
            "PointFrom",
            "operand is not a unit interval",
        ));
    }
    match cql_equal(ctx, &start, &end)? {
        Some(true) => Ok(start),
        _ => Err(EvalError::invalid_operand(
            "PointFrom",
            format!("{} is not a unit interval", CqlValue::Interval(interval.clone())),
        )),
    }
}

fn width_of(ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let interval = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::Interval(interval) => interval,
        other => return Err(expected_interval("Width", other)),
    };
    if interval.low().is_none() || interval.high().is_none() {
        return Ok(CqlValue::Null);
    }
    edge_distance(ctx, interval, "Width")
}

/// Width plus one point step, so `Size(Interval[1,5])` is `5`.
fn size_of(ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let interval = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::Interval(interval) => interval,
        other => return Err(expected_interval("Size", other)),
    };
    if interval.low().is_none() || interval.high().is_none() {
        return Ok(CqlValue::Null);
    }
    let width = edge_distance(ctx, interval, "Size")?;
    match width {
        CqlValue::Integer(w) => w
            .checked_add(1)
            .map(CqlValue::Integer)
            .ok_or_else(|| EvalError::overflow("Size")),
        CqlValue::Long(w) => w
            .checked_add(1)
            .map(CqlValue::Long)
            .ok_or_else(|| EvalError::overflow("Size")),
        CqlValue::Decimal(w) => w
            .checked_add(Decimal::new(1, 8))
            .map(CqlValue::Decimal)
            .ok_or_else(|| EvalError::overflow("Size")),
        CqlValue::Quantity(w) => w
            .value
            .checked_add(Decimal::new(1, 8))
            .map(|value| CqlValue::Quantity(CqlQuantity { value, unit: w.unit }))
            .ok_or_else(|| EvalError::overflow("Size")),
        other => Ok(other),
    }
}

/// Effective end minus effective start for the numeric point types.
fn edge_distance(
    ctx: &EvaluationContext,
    interval: &CqlInterval,
    operator: &'static str,
) -> EvalResult<CqlValue> {
    let start = interval_start(interval)?;
    let end = interval_end(interval)?;
    match (&start, &end) {
        (CqlValue::Integer(s), CqlValue::Integer(e)) => e
            .checked_sub(*s)
            .map(CqlValue::Integer)
            .ok_or_else(|| EvalError::overflow(operator)),
        (CqlValue::Long(s), CqlValue::Long(e)) => e
            .checked_sub(*s)
            .map(CqlValue::Long)
            .ok_or_else(|| EvalError::overflow(operator)),
        (CqlValue::Decimal(s), CqlValue::Decimal(e)) => e
            .checked_sub(*s)
            .map(CqlValue::Decimal)
            .ok_or_else(|| EvalError::overflow(operator)),
        (CqlValue::Quantity(s), CqlValue::Quantity(e)) => {
            let start_in_end_unit = convert_to_left_unit(ctx, e, s)?;
            let value = e
                .value
                .checked_sub(start_in_end_unit)
                .ok_or_else(|| EvalError::overflow(operator))?;
            Ok(CqlValue::Quantity(CqlQuantity {
                value,
                unit: e.unit.clone(),
            }))
        }
        _ => Err(EvalError::invalid_operand(
            operator,
            format!(
                "not defined for {} points",
                interval.point_type
            ),
        )),
    }
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// The membership decision table: each side resolves to satisfied,
/// violated, or unknown against the raw bound and its closure flag. A
/// definite violation wins, otherwise unknown poisons the result.
pub(crate) fn point_in_interval(
    ctx: &EvaluationContext,
    interval: &CqlInterval,
    point: &CqlValue,
) -> EvalResult<CqlValue> {
    if point.is_null() {
        return Ok(CqlValue::Null);
    }
    let low_side = match interval.low() {
        Some(low) => match compare_points_at(ctx, point, low, None, "In")? {
            TemporalCompare::After => Some(true),
            TemporalCompare::Equal => Some(interval.low_closed),
            TemporalCompare::Before => Some(false),
            TemporalCompare::InsufficientPrecision | TemporalCompare::ComparedToNull => None,
        },
        // An unbounded closed end is the sentinel, so every point passes.
        None if interval.low_closed => Some(true),
        None => None,
    };
    if low_side == Some(false) {
        return Ok(CqlValue::Boolean(false));
    }
    let high_side = match interval.high() {
        Some(high) => match compare_points_at(ctx, point, high, None, "In")? {
            TemporalCompare::Before => Some(true),
            TemporalCompare::Equal => Some(interval.high_closed),
            TemporalCompare::After => Some(false),
            TemporalCompare::InsufficientPrecision | TemporalCompare::ComparedToNull => None,
        },
        None if interval.high_closed => Some(true),
        None => None,
    };
    Ok(both_sides(low_side, high_side))
}

/// `container includes contained`, defined on effective edges:
/// `start(container) <= start(contained)` and
/// `end(contained) <= end(container)`.
fn interval_includes(
    ctx: &EvaluationContext,
    container: &CqlInterval,
    contained: &CqlInterval,
) -> EvalResult<CqlValue> {
    let low_side = edge_relation(
        ctx,
        &interval_start(container)?,
        &interval_start(contained)?,
        &[TemporalCompare::Before, TemporalCompare::Equal],
    )?;
    if low_side == Some(false) {
        return Ok(CqlValue::Boolean(false));
    }
    let high_side = edge_relation(
        ctx,
        &interval_end(contained)?,
        &interval_end(container)?,
        &[TemporalCompare::Before, TemporalCompare::Equal],
    )?;
    Ok(both_sides(low_side, high_side))
}

fn edge_relation(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
    true_on: &[TemporalCompare],
) -> EvalResult<Option<bool>> {
    Ok(compare_points_at(ctx, left, right, None, "Includes")?.to_bool(true_on))
}

fn contains(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let CqlValue::Interval(interval) = left else {
        return Err(expected_interval("Contains", left));
    };
    match right {
        CqlValue::Interval(contained) => interval_includes(ctx, interval, contained),
        point => point_in_interval(ctx, interval, point),
    }
}

fn within(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    contains(ctx, right, left)
}

fn proper_contains(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let CqlValue::Interval(interval) = left else {
        return Err(expected_interval("ProperContains", left));
    };
    match right {
        CqlValue::Interval(contained) => {
            let includes = interval_includes(ctx, interval, contained)?;
            if !matches!(includes, CqlValue::Boolean(true)) {
                return Ok(includes);
            }
            match cql_equal(
                ctx,
                &CqlValue::Interval(interval.clone()),
                &CqlValue::Interval(contained.clone()),
            )? {
                Some(equal) => Ok(CqlValue::Boolean(!equal)),
                None => Ok(CqlValue::Null),
            }
        }
        point => {
            let inside = point_in_interval(ctx, interval, point)?;
            if !matches!(inside, CqlValue::Boolean(true)) {
                return Ok(inside);
            }
            // Proper containment of a point fails only for the unit
            // interval on that point.
            let start = interval_start(interval)?;
            let end = interval_end(interval)?;
            match (cql_equal(ctx, &start, point)?, cql_equal(ctx, &end, point)?) {
                (Some(true), Some(true)) => Ok(CqlValue::Boolean(false)),
                (Some(_), Some(_)) => Ok(CqlValue::Boolean(true)),
                _ => Ok(CqlValue::Null),
            }
        }
    }
}

fn proper_within(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    proper_contains(ctx, right, left)
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// Four membership sub-checks, one per edge. Any true wins, else any null
/// wins, else false.
fn overlaps(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let checks = [
        point_in_interval(ctx, b, &interval_start(a)?)?,
        point_in_interval(ctx, b, &interval_end(a)?)?,
        point_in_interval(ctx, a, &interval_start(b)?)?,
        point_in_interval(ctx, a, &interval_end(b)?)?,
    ];
    if checks.iter().any(|c| matches!(c, CqlValue::Boolean(true))) {
        return Ok(CqlValue::Boolean(true));
    }
    if checks.iter().any(CqlValue::is_null) {
        return Ok(CqlValue::Null);
    }
    Ok(CqlValue::Boolean(false))
}

fn overlaps_before(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let overlap = overlaps(ctx, left, right)?;
    let starts_first = edge_relation(
        ctx,
        &interval_start(a)?,
        &interval_start(b)?,
        &[TemporalCompare::Before],
    )?;
    Ok(combine_and(overlap, starts_first))
}

fn overlaps_after(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let overlap = overlaps(ctx, left, right)?;
    let ends_last = edge_relation(
        ctx,
        &interval_end(a)?,
        &interval_end(b)?,
        &[TemporalCompare::After],
    )?;
    Ok(combine_and(overlap, ends_last))
}

/// Adjacency: the successor of the left end is the right start. An equal
/// edge means the intervals share a point, which is overlap, not meeting.
fn meets_before(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let end_a = interval_end(a)?;
    let start_b = interval_start(b)?;
    if end_a.is_null() || start_b.is_null() {
        return Ok(CqlValue::Null);
    }
    match compare_points_at(ctx, &end_a, &start_b, None, "MeetsBefore")? {
        TemporalCompare::Before => {
            let next = step(&end_a, 1, "MeetsBefore")?;
            match cql_equal(ctx, &next, &start_b)? {
                Some(adjacent) => Ok(CqlValue::Boolean(adjacent)),
                None => Ok(CqlValue::Null),
            }
        }
        TemporalCompare::Equal | TemporalCompare::After => Ok(CqlValue::Boolean(false)),
        _ => Ok(CqlValue::Null),
    }
}

fn meets_after(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    meets_before(ctx, right, left)
}

fn meets(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let before = meets_before(ctx, left, right)?;
    if matches!(before, CqlValue::Boolean(true)) {
        return Ok(before);
    }
    let after = meets_after(ctx, left, right)?;
    if matches!(after, CqlValue::Boolean(true)) {
        return Ok(after);
    }
    if before.is_null() || after.is_null() {
        return Ok(CqlValue::Null);
    }
    Ok(CqlValue::Boolean(false))
}

/// `a starts b`: same effective start, and `a` ends within `b`.
fn starts(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let same_start = edge_relation(
        ctx,
        &interval_start(a)?,
        &interval_start(b)?,
        &[TemporalCompare::Equal],
    )?;
    if same_start == Some(false) {
        return Ok(CqlValue::Boolean(false));
    }
    let ends_within = edge_relation(
        ctx,
        &interval_end(a)?,
        &interval_end(b)?,
        &[TemporalCompare::Before, TemporalCompare::Equal],
    )?;
    Ok(both_sides(same_start, ends_within))
}

fn ends(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let same_end = edge_relation(
        ctx,
        &interval_end(a)?,
        &interval_end(b)?,
        &[TemporalCompare::Equal],
    )?;
    if same_end == Some(false) {
        return Ok(CqlValue::Boolean(false));
    }
    let starts_within = edge_relation(
        ctx,
        &interval_start(a)?,
        &interval_start(b)?,
        &[TemporalCompare::After, TemporalCompare::Equal],
    )?;
    Ok(both_sides(same_end, starts_within))
}

// ---------------------------------------------------------------------------
// Combination
// ---------------------------------------------------------------------------

/// Union over overlapping or adjacent intervals; disjoint operands have no
/// single-interval union and yield null.
fn union_intervals(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let Some(edges) = Edges::resolve(a, b)? else {
        return Ok(CqlValue::Null);
    };
    if !matches!(overlaps(ctx, left, right)?, CqlValue::Boolean(true))
        && !matches!(meets(ctx, left, right)?, CqlValue::Boolean(true))
    {
        return Ok(CqlValue::Null);
    }
    let low = edges.min_start(ctx)?;
    let high = edges.max_end(ctx)?;
    Ok(CqlValue::Interval(CqlInterval::closed(low, high)))
}

fn intersect_intervals(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let Some(edges) = Edges::resolve(a, b)? else {
        return Ok(CqlValue::Null);
    };
    if !matches!(overlaps(ctx, left, right)?, CqlValue::Boolean(true)) {
        return Ok(CqlValue::Null);
    }
    let low = edges.max_start(ctx)?;
    let high = edges.min_end(ctx)?;
    Ok(CqlValue::Interval(CqlInterval::closed(low, high)))
}

/// The part of `a` outside `b`. The overlap must sit on one side of `a`:
/// splitting the middle out of an interval has no single-interval result.
fn except_intervals(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = interval_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let Some(edges) = Edges::resolve(a, b)? else {
        return Ok(CqlValue::Null);
    };
    if !matches!(overlaps(ctx, left, right)?, CqlValue::Boolean(true)) {
        return Ok(CqlValue::Interval(a.clone()));
    }
    let b_covers_low = edges.start_order(ctx)? != Some(Ordering::Less);
    let b_covers_high = edges.end_order(ctx)? != Some(Ordering::Greater);
    match (edges.start_order(ctx)?, edges.end_order(ctx)?) {
        (None, _) | (_, None) => Ok(CqlValue::Null),
        _ if b_covers_low && b_covers_high => Ok(CqlValue::Null),
        (Some(Ordering::Less), _) if !b_covers_high => {
            // b pokes out of the middle on neither side
            Ok(CqlValue::Null)
        }
        (Some(Ordering::Less), _) => {
            let high = step(&edges.b_start, -1, "Except")?;
            Ok(CqlValue::Interval(CqlInterval::closed(
                edges.a_start.clone(),
                high,
            )))
        }
        _ => {
            let low = step(&edges.b_end, 1, "Except")?;
            Ok(CqlValue::Interval(CqlInterval::closed(
                low,
                edges.a_end.clone(),
            )))
        }
    }
}

/// Both operands' effective edges, resolved once. `None` when any edge has
/// no effective point.
struct Edges {
    a_start: CqlValue,
    a_end: CqlValue,
    b_start: CqlValue,
    b_end: CqlValue,
}

impl Edges {
    fn resolve(a: &CqlInterval, b: &CqlInterval) -> EvalResult<Option<Edges>> {
        let edges = Edges {
            a_start: interval_start(a)?,
            a_end: interval_end(a)?,
            b_start: interval_start(b)?,
            b_end: interval_end(b)?,
        };
        if edges.a_start.is_null()
            || edges.a_end.is_null()
            || edges.b_start.is_null()
            || edges.b_end.is_null()
        {
            return Ok(None);
        }
        Ok(Some(edges))
    }

    /// Ordering of `a`'s start relative to `b`'s.
    fn start_order(&self, ctx: &EvaluationContext) -> EvalResult<Option<Ordering>> {
        ordering_of(ctx, &self.a_start, &self.b_start)
    }

    fn end_order(&self, ctx: &EvaluationContext) -> EvalResult<Option<Ordering>> {
        ordering_of(ctx, &self.a_end, &self.b_end)
    }

    fn min_start(&self, ctx: &EvaluationContext) -> EvalResult<CqlValue> {
        Ok(match self.start_order(ctx)? {
            Some(Ordering::Greater) => self.b_start.clone(),
            _ => self.a_start.clone(),
        })
    }

    fn max_start(&self, ctx: &EvaluationContext) -> EvalResult<CqlValue> {
        Ok(match self.start_order(ctx)? {
            Some(Ordering::Less) => self.b_start.clone(),
            _ => self.a_start.clone(),
        })
    }

    fn min_end(&self, ctx: &EvaluationContext) -> EvalResult<CqlValue> {
        Ok(match self.end_order(ctx)? {
            Some(Ordering::Greater) => self.b_end.clone(),
            _ => self.a_end.clone(),
        })
    }

    fn max_end(&self, ctx: &EvaluationContext) -> EvalResult<CqlValue> {
        Ok(match self.end_order(ctx)? {
            Some(Ordering::Less) => self.b_end.clone(),
            _ => self.a_end.clone(),
        })
    }
}

fn ordering_of(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<Option<Ordering>> {
    Ok(match compare_points_at(ctx, left, right, None, "Interval")? {
        TemporalCompare::Before => Some(Ordering::Less),
        TemporalCompare::Equal => Some(Ordering::Equal),
        TemporalCompare::After => Some(Ordering::Greater),
        _ => None,
    })
}

/// Sort by effective start, then a single left-to-right merge of anything
/// overlapping or adjacent. Null elements drop out; the survivors come
/// back closed-normalized.
fn collapse(ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let list = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::List(list) => list,
        other => {
            return Err(EvalError::invalid_operand(
                "Collapse",
                format!("expected List<Interval>, found {}", other.get_type()),
            ));
        }
    };
    let mut spans: Vec<(CqlValue, CqlValue)> = Vec::with_capacity(list.elements.len());
    let mut point_type = CqlType::Any;
    for element in &list.elements {
        match element {
            CqlValue::Null => {}
            CqlValue::Interval(interval) => {
                let start = interval_start(interval)?;
                let end = interval_end(interval)?;
                if start.is_null() || end.is_null() {
                    return Ok(CqlValue::Null);
                }
                if point_type == CqlType::Any {
                    point_type = interval.point_type.clone();
                }
                spans.push((start, end));
            }
            other => {
                return Err(EvalError::type_mismatch(
                    "Interval",
                    other.get_type().to_string(),
                ));
            }
        }
    }
    if spans.is_empty() {
        return Ok(CqlValue::List(CqlList::empty(CqlType::interval(point_type))));
    }

    let mut sort_error = None;
    spans.sort_by(|x, y| match ordering_of(ctx, &x.0, &y.0) {
        Ok(Some(order)) => order,
        Ok(None) => Ordering::Equal,
        Err(error) => {
            sort_error.get_or_insert(error);
            Ordering::Equal
        }
    });
    if let Some(error) = sort_error {
        return Err(error);
    }

    let mut merged: Vec<(CqlValue, CqlValue)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        if let Some(current) = merged.last_mut() {
            if joins(ctx, &current.1, &start)? {
                if ordering_of(ctx, &end, &current.1)? == Some(Ordering::Greater) {
                    current.1 = end;
                }
                continue;
            }
        }
        merged.push((start, end));
    }

    let elements = merged
        .into_iter()
        .map(|(start, end)| CqlValue::Interval(CqlInterval::closed(start, end)))
        .collect();
    Ok(CqlValue::List(CqlList::new(
        CqlType::interval(point_type),
        elements,
    )))
}

/// Whether the next span's start overlaps or is adjacent to the running
/// end. Only a definite yes merges.
fn joins(ctx: &EvaluationContext, end: &CqlValue, next_start: &CqlValue) -> EvalResult<bool> {
    match ordering_of(ctx, next_start, end)? {
        Some(Ordering::Less | Ordering::Equal) => Ok(true),
        Some(Ordering::Greater) => {
            let adjacent = step(end, 1, "Collapse")?;
            Ok(cql_equal(ctx, &adjacent, next_start)? == Some(true))
        }
        None => Ok(false),
    }
}

fn interval_pair<'a>(
    left: &'a CqlValue,
    right: &'a CqlValue,
) -> EvalResult<Option<(&'a CqlInterval, &'a CqlInterval)>> {
    match (left, right) {
        (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(None),
        (CqlValue::Interval(a), CqlValue::Interval(b)) => Ok(Some((a, b))),
        (CqlValue::Interval(_), other) | (other, _) => Err(expected_interval("Interval", other)),
    }
}

fn both_sides(low: Option<bool>, high: Option<bool>) -> CqlValue {
    match (low, high) {
        (Some(false), _) | (_, Some(false)) => CqlValue::Boolean(false),
        (Some(true), Some(true)) => CqlValue::Boolean(true),
        _ => CqlValue::Null,
    }
}

fn combine_and(left: CqlValue, right: Option<bool>) -> CqlValue {
    let left = match left {
        CqlValue::Boolean(b) => Some(b),
        _ => None,
    };
    both_sides(left, right)
}

fn expected_interval(operator: &'static str, found: &CqlValue) -> EvalError {
    EvalError::invalid_operand(
        operator,
        format!("expected Interval, found {}", found.get_type()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> EvaluationContext {
        EvaluationContext::at(CqlDateTime::parse("2024-01-15T12:00:00.000+00:00").unwrap())
    }

    fn ints(low: i32, high: i32) -> CqlInterval {
        CqlInterval::closed(CqlValue::Integer(low), CqlValue::Integer(high))
    }

    #[test]
    fn point_on_an_exclusive_edge_is_out() {
        let ctx = ctx();
        let interval = CqlInterval::closed_open(CqlValue::Integer(0), CqlValue::Integer(3));
        let result = point_in_interval(&ctx, &interval, &CqlValue::Integer(3)).unwrap();
        assert_eq!(result, CqlValue::Boolean(false));
        let result = point_in_interval(&ctx, &interval, &CqlValue::Integer(2)).unwrap();
        assert_eq!(result, CqlValue::Boolean(true));
    }

    #[test]
    fn unbounded_open_ends_cannot_decide_membership() {
        let ctx = ctx();
        let interval = CqlInterval::new(None, false, Some(CqlValue::Integer(5)), true);
        let result = point_in_interval(&ctx, &interval, &CqlValue::Integer(1)).unwrap();
        assert_eq!(result, CqlValue::Null);
        let closed = CqlInterval::new(None, true, Some(CqlValue::Integer(5)), true);
        let result = point_in_interval(&ctx, &closed, &CqlValue::Integer(1)).unwrap();
        assert_eq!(result, CqlValue::Boolean(true));
    }

    #[test]
    fn imprecise_dates_leave_membership_undecided() {
        let ctx = ctx();
        let interval = CqlInterval::closed(
            CqlValue::Date(CqlDate::parse("2020-01-10").unwrap()),
            CqlValue::Date(CqlDate::parse("2020-01-20").unwrap()),
        );
        let point = CqlValue::Date(CqlDate::parse("2020-01").unwrap());
        assert_eq!(point_in_interval(&ctx, &interval, &point).unwrap(), CqlValue::Null);
    }

    #[test]
    fn open_bounds_step_to_effective_points() {
        let interval = CqlInterval::open(CqlValue::Integer(1), CqlValue::Integer(5));
        assert_eq!(interval_start(&interval).unwrap(), CqlValue::Integer(2));
        assert_eq!(interval_end(&interval).unwrap(), CqlValue::Integer(4));
    }

    #[test]
    fn includes_honors_effective_edges() {
        let ctx = ctx();
        let container = CqlValue::Interval(ints(1, 5));
        let contained =
            CqlValue::Interval(CqlInterval::closed_open(CqlValue::Integer(1), CqlValue::Integer(6)));
        // [1,6) is [1,5] once the open edge steps back
        assert_eq!(
            contains(&ctx, &container, &contained).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(
            proper_contains(&ctx, &container, &contained).unwrap(),
            CqlValue::Boolean(false)
        );
    }

    #[test]
    fn overlap_checks_all_four_edges() {
        let ctx = ctx();
        let outer = CqlValue::Interval(ints(1, 10));
        let inner = CqlValue::Interval(ints(3, 4));
        assert_eq!(overlaps(&ctx, &outer, &inner).unwrap(), CqlValue::Boolean(true));
        let disjoint = CqlValue::Interval(ints(20, 30));
        assert_eq!(overlaps(&ctx, &outer, &disjoint).unwrap(), CqlValue::Boolean(false));
    }

    #[test]
    fn meets_requires_adjacency_without_overlap() {
        let ctx = ctx();
        let a = CqlValue::Interval(ints(1, 3));
        let b = CqlValue::Interval(ints(4, 6));
        assert_eq!(meets(&ctx, &a, &b).unwrap(), CqlValue::Boolean(true));
        let touching = CqlValue::Interval(ints(3, 6));
        assert_eq!(meets(&ctx, &a, &touching).unwrap(), CqlValue::Boolean(false));
    }

    #[test]
    fn left_overlap_split_keeps_the_leading_piece() {
        let ctx = ctx();
        let a = CqlValue::Interval(ints(1, 5));
        let b = CqlValue::Interval(ints(3, 10));
        let result = except_intervals(&ctx, &a, &b).unwrap();
        assert_eq!(result, CqlValue::Interval(ints(1, 2)));
    }

    #[test]
    fn except_cannot_split_the_middle_out() {
        let ctx = ctx();
        let a = CqlValue::Interval(ints(1, 10));
        let b = CqlValue::Interval(ints(4, 6));
        assert_eq!(except_intervals(&ctx, &a, &b).unwrap(), CqlValue::Null);
    }

    #[test]
    fn except_without_overlap_returns_the_source() {
        let ctx = ctx();
        let a = CqlValue::Interval(ints(1, 5));
        let b = CqlValue::Interval(ints(8, 10));
        assert_eq!(
            except_intervals(&ctx, &a, &b).unwrap(),
            CqlValue::Interval(ints(1, 5))
        );
    }

    #[test]
    fn intersect_takes_the_inner_edges() {
        let ctx = ctx();
        let a = CqlValue::Interval(ints(1, 5));
        let b = CqlValue::Interval(ints(3, 10));
        assert_eq!(
            intersect_intervals(&ctx, &a, &b).unwrap(),
            CqlValue::Interval(ints(3, 5))
        );
        let disjoint = CqlValue::Interval(ints(7, 10));
        assert_eq!(intersect_intervals(&ctx, &a, &disjoint).unwrap(), CqlValue::Null);
    }

    #[test]
    fn union_spans_adjacent_intervals() {
        let ctx = ctx();
        let a = CqlValue::Interval(ints(1, 3));
        let b = CqlValue::Interval(ints(4, 6));
        assert_eq!(
            union_intervals(&ctx, &a, &b).unwrap(),
            CqlValue::Interval(ints(1, 6))
        );
        let disjoint = CqlValue::Interval(ints(8, 9));
        assert_eq!(union_intervals(&ctx, &a, &disjoint).unwrap(), CqlValue::Null);
    }

    #[test]
    fn collapse_merges_adjacent_and_overlapping_runs() {
        let ctx = ctx();
        let list = CqlValue::List(CqlList::new(
            CqlType::interval(CqlType::Integer),
            vec![
                CqlValue::Interval(ints(4, 6)),
                CqlValue::Null,
                CqlValue::Interval(ints(1, 3)),
                CqlValue::Interval(ints(10, 12)),
            ],
        ));
        let result = collapse(&ctx, &list).unwrap();
        let expected = CqlValue::List(CqlList::new(
            CqlType::interval(CqlType::Integer),
            vec![CqlValue::Interval(ints(1, 6)), CqlValue::Interval(ints(10, 12))],
        ));
        assert_eq!(result, expected);
    }

    #[test]
    fn width_and_size_count_points() {
        let ctx = ctx();
        let interval = CqlValue::Interval(ints(1, 5));
        assert_eq!(width_of(&ctx, &interval).unwrap(), CqlValue::Integer(4));
        assert_eq!(size_of(&ctx, &interval).unwrap(), CqlValue::Integer(5));
        let unbounded = CqlValue::Interval(CqlInterval::new(
            None,
            true,
            Some(CqlValue::Integer(5)),
            true,
        ));
        assert_eq!(width_of(&ctx, &unbounded).unwrap(), CqlValue::Null);
    }

    #[test]
    fn point_from_wants_a_unit_interval() {
        let ctx = ctx();
        let unit = CqlValue::Interval(ints(3, 3));
        assert_eq!(point_from(&ctx, &unit).unwrap(), CqlValue::Integer(3));
        assert!(point_from(&ctx, &CqlValue::Interval(ints(1, 5))).is_err());
    }

    #[test]
    fn starts_and_ends_align_one_edge() {
        let ctx = ctx();
        let a = CqlValue::Interval(ints(1, 3));
        let b = CqlValue::Interval(ints(1, 10));
        assert_eq!(starts(&ctx, &a, &b).unwrap(), CqlValue::Boolean(true));
        assert_eq!(ends(&ctx, &a, &b).unwrap(), CqlValue::Boolean(false));
        let tail = CqlValue::Interval(ints(8, 10));
        assert_eq!(ends(&ctx, &tail, &b).unwrap(), CqlValue::Boolean(true));
    }
}
