//! Date and time operators
//!
//! Constructors, component extraction, and the precision-qualified
//! comparison family for Date, DateTime, and Time. Duration and difference
//! follow different regimes: `DifferenceBetween` counts boundary crossings
//! and rejects a requested precision finer than its operands carry, while
//! `DurationBetween` widens to an uncertainty interval instead.
//!
//! All instant math happens on chrono naive values after shifting by the
//! effective UTC offset, so operands in different timezones agree on the
//! elapsed period.

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use lumen_cql_ast::{
    DateExpression, DateTimeComponentFromExpression, DateTimeExpression,
    DifferenceBetweenExpression, DurationBetweenExpression, Expression, SameAsExpression,
    SameOrAfterExpression, SameOrBeforeExpression, TimeExpression,
};
use lumen_cql_types::{
    CqlDate, CqlDateTime, CqlInterval, CqlTime, CqlType, CqlValue, DateTimePrecision,
    TemporalCompare,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::comparison::{cql_compare, default_offset};
use crate::operators::interval::{interval_end, interval_start};
use crate::registry::OperatorRegistry;

pub(crate) fn register(registry: &mut OperatorRegistry) {
    registry.register_unary("DateFrom", CqlType::DateTime, CqlType::Date, date_from);
    registry.register_unary("TimeFrom", CqlType::DateTime, CqlType::Time, time_from);
    registry.register_unary(
        "TimezoneOffsetFrom",
        CqlType::DateTime,
        CqlType::Decimal,
        timezone_offset_from,
    );
}

fn date_from(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::DateTime(dt) => Ok(CqlValue::Date(dt.date())),
        other => Err(EvalError::invalid_operand(
            "DateFrom",
            format!("expected DateTime, found {}", other.get_type()),
        )),
    }
}

fn time_from(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::DateTime(dt) => Ok(dt.time().map_or(CqlValue::Null, CqlValue::Time)),
        other => Err(EvalError::invalid_operand(
            "TimeFrom",
            format!("expected DateTime, found {}", other.get_type()),
        )),
    }
}

// The offset surfaces as decimal hours, matching the constructor argument.
fn timezone_offset_from(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::DateTime(dt) => Ok(match dt.timezone_offset {
            Some(minutes) => {
                CqlValue::Decimal(Decimal::from(minutes) / Decimal::from(60))
            }
            None => CqlValue::Null,
        }),
        other => Err(EvalError::invalid_operand(
            "TimezoneOffsetFrom",
            format!("expected DateTime, found {}", other.get_type()),
        )),
    }
}

impl CqlEngine {
    pub(crate) fn eval_now(&self, ctx: &EvaluationContext) -> EvalResult<CqlValue> {
        Ok(CqlValue::DateTime(*ctx.now()))
    }

    pub(crate) fn eval_today(&self, ctx: &EvaluationContext) -> EvalResult<CqlValue> {
        Ok(CqlValue::Date(ctx.today()))
    }

    pub(crate) fn eval_time_of_day(&self, ctx: &EvaluationContext) -> EvalResult<CqlValue> {
        Ok(ctx.time_of_day().map_or(CqlValue::Null, CqlValue::Time))
    }

    /// Date constructor. A null component value poisons the whole result;
    /// an absent component narrows the precision.
    pub(crate) fn eval_date(
        &self,
        expr: &DateExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let year = match self.evaluate(&expr.year, ctx)? {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::Integer(value) => value,
            other => {
                return Err(EvalError::invalid_operand(
                    "Date",
                    format!("expected Integer component, found {}", other.get_type()),
                ));
            }
        };
        let components = [expr.month.as_deref(), expr.day.as_deref()];
        let mut parts = [None::<i32>; 2];
        for (slot, component) in parts.iter_mut().zip(components) {
            match self.constructor_component(component, "Date", ctx)? {
                Poisoned::Yes => return Ok(CqlValue::Null),
                Poisoned::No(value) => *slot = value,
            }
        }
        let [month, day] = parts;
        let date = CqlDate::new(
            year,
            narrow("Date", "month", month)?,
            narrow("Date", "day", day)?,
        )?;
        Ok(CqlValue::Date(date))
    }

    pub(crate) fn eval_date_time(
        &self,
        expr: &DateTimeExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let year = match self.evaluate(&expr.year, ctx)? {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::Integer(value) => value,
            other => {
                return Err(EvalError::invalid_operand(
                    "DateTime",
                    format!("expected Integer component, found {}", other.get_type()),
                ));
            }
        };
        let components = [
            expr.month.as_deref(),
            expr.day.as_deref(),
            expr.hour.as_deref(),
            expr.minute.as_deref(),
            expr.second.as_deref(),
            expr.millisecond.as_deref(),
        ];
        let mut parts = [None::<i32>; 6];
        for (slot, component) in parts.iter_mut().zip(components) {
            match self.constructor_component(component, "DateTime", ctx)? {
                Poisoned::Yes => return Ok(CqlValue::Null),
                Poisoned::No(value) => *slot = value,
            }
        }
        let [month, day, hour, minute, second, millisecond] = parts;
        let timezone_offset = match &expr.timezone_offset {
            Some(offset_expr) => match self.evaluate(offset_expr, ctx)? {
                CqlValue::Null => return Ok(CqlValue::Null),
                CqlValue::Decimal(hours) => Some(offset_minutes("DateTime", hours)?),
                CqlValue::Integer(hours) => Some(offset_minutes("DateTime", Decimal::from(hours))?),
                other => {
                    return Err(EvalError::invalid_operand(
                        "DateTime",
                        format!("expected Decimal offset, found {}", other.get_type()),
                    ));
                }
            },
            None => None,
        };
        let datetime = CqlDateTime::new(
            year,
            narrow("DateTime", "month", month)?,
            narrow("DateTime", "day", day)?,
            narrow("DateTime", "hour", hour)?,
            narrow("DateTime", "minute", minute)?,
            narrow("DateTime", "second", second)?,
            narrow("DateTime", "millisecond", millisecond)?,
            timezone_offset,
        )?;
        Ok(CqlValue::DateTime(datetime))
    }

    pub(crate) fn eval_time(
        &self,
        expr: &TimeExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let hour = match self.evaluate(&expr.hour, ctx)? {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::Integer(value) => value,
            other => {
                return Err(EvalError::invalid_operand(
                    "Time",
                    format!("expected Integer component, found {}", other.get_type()),
                ));
            }
        };
        let hour = u8::try_from(hour)
            .map_err(|_| EvalError::invalid_operand("Time", format!("hour {hour} out of range")))?;
        let components = [
            expr.minute.as_deref(),
            expr.second.as_deref(),
            expr.millisecond.as_deref(),
        ];
        let mut parts = [None::<i32>; 3];
        for (slot, component) in parts.iter_mut().zip(components) {
            match self.constructor_component(component, "Time", ctx)? {
                Poisoned::Yes => return Ok(CqlValue::Null),
                Poisoned::No(value) => *slot = value,
            }
        }
        let [minute, second, millisecond] = parts;
        let time = CqlTime::new(
            hour,
            narrow("Time", "minute", minute)?,
            narrow("Time", "second", second)?,
            narrow("Time", "millisecond", millisecond)?,
        )?;
        Ok(CqlValue::Time(time))
    }

    fn constructor_component(
        &self,
        component: Option<&Expression>,
        operator: &'static str,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<Poisoned> {
        let Some(component) = component else {
            return Ok(Poisoned::No(None));
        };
        match self.evaluate(component, ctx)? {
            CqlValue::Null => Ok(Poisoned::Yes),
            CqlValue::Integer(value) => Ok(Poisoned::No(Some(value))),
            other => Err(EvalError::invalid_operand(
                operator,
                format!("expected Integer component, found {}", other.get_type()),
            )),
        }
    }

    pub(crate) fn eval_date_time_component_from(
        &self,
        expr: &DateTimeComponentFromExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        if operand.is_null() {
            return Ok(CqlValue::Null);
        }
        let Some(precision) = expr.precision.value_precision() else {
            return Err(EvalError::invalid_operand(
                "DateTimeComponentFrom",
                "week is not an extractable component",
            ));
        };
        match &operand {
            CqlValue::Date(date) => date_component_of(date, precision),
            CqlValue::DateTime(dt) => datetime_component_of(dt, precision),
            CqlValue::Time(time) => time_component_of(time, precision),
            other => Err(EvalError::invalid_operand(
                "DateTimeComponentFrom",
                format!("expected a temporal value, found {}", other.get_type()),
            )),
        }
    }

    pub(crate) fn eval_duration_between(
        &self,
        expr: &DurationBetweenExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let (low, high) = self.eval_operand_pair(&expr.operand, "DurationBetween", ctx)?;
        let offset = default_offset(ctx);
        match (&low, &high) {
            (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
            (CqlValue::Date(a), CqlValue::Date(b)) => duration_between_datetimes(
                &CqlDateTime::from_date(*a),
                &CqlDateTime::from_date(*b),
                expr.precision,
                offset,
            ),
            (CqlValue::Date(a), CqlValue::DateTime(b)) => {
                duration_between_datetimes(&CqlDateTime::from_date(*a), b, expr.precision, offset)
            }
            (CqlValue::DateTime(a), CqlValue::Date(b)) => {
                duration_between_datetimes(a, &CqlDateTime::from_date(*b), expr.precision, offset)
            }
            (CqlValue::DateTime(a), CqlValue::DateTime(b)) => {
                duration_between_datetimes(a, b, expr.precision, offset)
            }
            (CqlValue::Time(a), CqlValue::Time(b)) => {
                duration_between_times(a, b, expr.precision)
            }
            _ => Err(EvalError::invalid_operand(
                "DurationBetween",
                format!(
                    "expected matching temporal operands, found {} and {}",
                    low.get_type(),
                    high.get_type()
                ),
            )),
        }
    }

    pub(crate) fn eval_difference_between(
        &self,
        expr: &DifferenceBetweenExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let (low, high) = self.eval_operand_pair(&expr.operand, "DifferenceBetween", ctx)?;
        let offset = default_offset(ctx);
        match (&low, &high) {
            (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
            (CqlValue::Date(a), CqlValue::Date(b)) => difference_between_datetimes(
                &CqlDateTime::from_date(*a),
                &CqlDateTime::from_date(*b),
                expr.precision,
                offset,
            ),
            (CqlValue::Date(a), CqlValue::DateTime(b)) => {
                difference_between_datetimes(&CqlDateTime::from_date(*a), b, expr.precision, offset)
            }
            (CqlValue::DateTime(a), CqlValue::Date(b)) => {
                difference_between_datetimes(a, &CqlDateTime::from_date(*b), expr.precision, offset)
            }
            (CqlValue::DateTime(a), CqlValue::DateTime(b)) => {
                difference_between_datetimes(a, b, expr.precision, offset)
            }
            (CqlValue::Time(a), CqlValue::Time(b)) => {
                difference_between_times(a, b, expr.precision)
            }
            _ => Err(EvalError::invalid_operand(
                "DifferenceBetween",
                format!(
                    "expected matching temporal operands, found {} and {}",
                    low.get_type(),
                    high.get_type()
                ),
            )),
        }
    }

    pub(crate) fn eval_same_as(
        &self,
        expr: &SameAsExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_operand_pair(&expr.operand, "SameAs", ctx)?;
        match (&left, &right) {
            (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
            (CqlValue::Interval(a), CqlValue::Interval(b)) => {
                let starts = point_same(
                    ctx,
                    &interval_start(a)?,
                    &interval_start(b)?,
                    expr.precision,
                    &[TemporalCompare::Equal],
                    "SameAs",
                )?;
                let ends = point_same(
                    ctx,
                    &interval_end(a)?,
                    &interval_end(b)?,
                    expr.precision,
                    &[TemporalCompare::Equal],
                    "SameAs",
                )?;
                Ok(both_true(starts, ends))
            }
            _ => point_same(
                ctx,
                &left,
                &right,
                expr.precision,
                &[TemporalCompare::Equal],
                "SameAs",
            ),
        }
    }

    /// For intervals this is `end of left same or before start of right`.
    pub(crate) fn eval_same_or_before(
        &self,
        expr: &SameOrBeforeExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_operand_pair(&expr.operand, "SameOrBefore", ctx)?;
        let true_on = [TemporalCompare::Before, TemporalCompare::Equal];
        match (&left, &right) {
            (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
            (CqlValue::Interval(a), CqlValue::Interval(b)) => point_same(
                ctx,
                &interval_end(a)?,
                &interval_start(b)?,
                expr.precision,
                &true_on,
                "SameOrBefore",
            ),
            _ => point_same(ctx, &left, &right, expr.precision, &true_on, "SameOrBefore"),
        }
    }

    pub(crate) fn eval_same_or_after(
        &self,
        expr: &SameOrAfterExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let (left, right) = self.eval_operand_pair(&expr.operand, "SameOrAfter", ctx)?;
        let true_on = [TemporalCompare::After, TemporalCompare::Equal];
        match (&left, &right) {
            (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
            (CqlValue::Interval(a), CqlValue::Interval(b)) => point_same(
                ctx,
                &interval_start(a)?,
                &interval_end(b)?,
                expr.precision,
                &true_on,
                "SameOrAfter",
            ),
            _ => point_same(ctx, &left, &right, expr.precision, &true_on, "SameOrAfter"),
        }
    }

    /// Two-element operand lists carried by the precision-qualified nodes.
    pub(crate) fn eval_operand_pair(
        &self,
        operands: &[Box<Expression>],
        operator: &'static str,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<(CqlValue, CqlValue)> {
        let [first, second] = operands else {
            return Err(EvalError::internal(format!(
                "{operator} expects two operands, found {}",
                operands.len()
            )));
        };
        let first = self.evaluate(first, ctx)?;
        let second = self.evaluate(second, ctx)?;
        Ok((first, second))
    }
}

/// Constructor component outcome: a null value poisons the whole
/// constructor, an absent expression just narrows the precision.
enum Poisoned {
    Yes,
    No(Option<i32>),
}

fn narrow<T: TryFrom<i32>>(
    operator: &'static str,
    component: &'static str,
    value: Option<i32>,
) -> EvalResult<Option<T>> {
    match value {
        None => Ok(None),
        Some(value) => match T::try_from(value) {
            Ok(narrowed) => Ok(Some(narrowed)),
            Err(_) => Err(EvalError::invalid_operand(
                operator,
                format!("{component} {value} out of range"),
            )),
        },
    }
}

fn offset_minutes(operator: &'static str, hours: Decimal) -> EvalResult<i16> {
    (hours * Decimal::from(60)).round().to_i16().ok_or_else(|| {
        EvalError::invalid_operand(operator, format!("timezone offset {hours} out of range"))
    })
}

fn date_component_of(date: &CqlDate, precision: DateTimePrecision) -> EvalResult<CqlValue> {
    let component = match precision {
        DateTimePrecision::Year => Some(date.year),
        DateTimePrecision::Month => date.month.map(i32::from),
        DateTimePrecision::Day => date.day.map(i32::from),
        _ => {
            return Err(EvalError::invalid_operand(
                "DateTimeComponentFrom",
                format!("{precision} is not a component of Date"),
            ));
        }
    };
    Ok(component.map_or(CqlValue::Null, CqlValue::Integer))
}

fn datetime_component_of(dt: &CqlDateTime, precision: DateTimePrecision) -> EvalResult<CqlValue> {
    let component = match precision {
        DateTimePrecision::Year => Some(dt.year),
        DateTimePrecision::Month => dt.month.map(i32::from),
        DateTimePrecision::Day => dt.day.map(i32::from),
        DateTimePrecision::Hour => dt.hour.map(i32::from),
        DateTimePrecision::Minute => dt.minute.map(i32::from),
        DateTimePrecision::Second => dt.second.map(i32::from),
        DateTimePrecision::Millisecond => dt.millisecond.map(i32::from),
    };
    Ok(component.map_or(CqlValue::Null, CqlValue::Integer))
}

fn time_component_of(time: &CqlTime, precision: DateTimePrecision) -> EvalResult<CqlValue> {
    let component = match precision {
        DateTimePrecision::Hour => Some(i32::from(time.hour)),
        DateTimePrecision::Minute => time.minute.map(i32::from),
        DateTimePrecision::Second => time.second.map(i32::from),
        DateTimePrecision::Millisecond => time.millisecond.map(i32::from),
        _ => {
            return Err(EvalError::invalid_operand(
                "DateTimeComponentFrom",
                format!("{precision} is not a component of Time"),
            ));
        }
    };
    Ok(component.map_or(CqlValue::Null, CqlValue::Integer))
}

/// Compare two point values under an optional precision qualifier.
///
/// Temporal pairs go through the component-walk kernel; everything else
/// falls back to the general ordering, mapped onto the same outcome set so
/// interval operators can treat bounds uniformly.
pub(crate) fn compare_points_at(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
    precision: Option<lumen_cql_ast::DateTimePrecision>,
    operator: &'static str,
) -> EvalResult<TemporalCompare> {
    let ceiling = match precision {
        None => None,
        Some(qualifier) => match qualifier.value_precision() {
            Some(value) => Some(value),
            None => {
                return Err(EvalError::invalid_operand(
                    operator,
                    "week is not a comparison precision",
                ));
            }
        },
    };
    let outcome = match (left, right) {
        (CqlValue::Null, _) | (_, CqlValue::Null) => TemporalCompare::ComparedToNull,
        (CqlValue::Date(a), CqlValue::Date(b)) => a.compare_with_precision(b, ceiling),
        (CqlValue::DateTime(a), CqlValue::DateTime(b)) => {
            a.compare_with_precision(b, ceiling, default_offset(ctx))
        }
        (CqlValue::Date(a), CqlValue::DateTime(b)) => {
            CqlDateTime::from_date(*a).compare_with_precision(b, ceiling, default_offset(ctx))
        }
        (CqlValue::DateTime(a), CqlValue::Date(b)) => {
            a.compare_with_precision(&CqlDateTime::from_date(*b), ceiling, default_offset(ctx))
        }
        (CqlValue::Time(a), CqlValue::Time(b)) => a.compare_with_precision(b, ceiling),
        _ => match cql_compare(ctx, left, right)? {
            Some(Ordering::Less) => TemporalCompare::Before,
            Some(Ordering::Equal) => TemporalCompare::Equal,
            Some(Ordering::Greater) => TemporalCompare::After,
            None => TemporalCompare::InsufficientPrecision,
        },
    };
    Ok(outcome)
}

pub(crate) fn point_same(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
    precision: Option<lumen_cql_ast::DateTimePrecision>,
    true_on: &[TemporalCompare],
    operator: &'static str,
) -> EvalResult<CqlValue> {
    let outcome = compare_points_at(ctx, left, right, precision, operator)?;
    Ok(outcome
        .to_bool(true_on)
        .map_or(CqlValue::Null, CqlValue::Boolean))
}

fn both_true(a: CqlValue, b: CqlValue) -> CqlValue {
    match (a, b) {
        (CqlValue::Boolean(false), _) | (_, CqlValue::Boolean(false)) => CqlValue::Boolean(false),
        (CqlValue::Boolean(true), CqlValue::Boolean(true)) => CqlValue::Boolean(true),
        _ => CqlValue::Null,
    }
}

// ---------------------------------------------------------------------------
// Duration and difference
// ---------------------------------------------------------------------------

pub(crate) fn duration_between_datetimes(
    a: &CqlDateTime,
    b: &CqlDateTime,
    precision: lumen_cql_ast::DateTimePrecision,
    default_offset: Option<i16>,
) -> EvalResult<CqlValue> {
    let source = a.precision().min(b.precision());
    let upper = whole_period(
        utc_anchor(a, default_offset),
        utc_anchor(b, default_offset),
        precision,
    );
    if source >= requested_floor(precision) {
        Ok(CqlValue::Integer(to_duration_int(upper, "DurationBetween")?))
    } else {
        uncertainty_interval(upper, "DurationBetween")
    }
}

fn duration_between_times(
    a: &CqlTime,
    b: &CqlTime,
    precision: lumen_cql_ast::DateTimePrecision,
) -> EvalResult<CqlValue> {
    let unit_ms = time_unit_millis(precision, "DurationBetween")?;
    let source = a.precision().min(b.precision());
    let upper = (b.to_millis() - a.to_millis()) / unit_ms;
    if source >= requested_floor(precision) {
        Ok(CqlValue::Integer(to_duration_int(upper, "DurationBetween")?))
    } else {
        uncertainty_interval(upper, "DurationBetween")
    }
}

fn difference_between_datetimes(
    a: &CqlDateTime,
    b: &CqlDateTime,
    precision: lumen_cql_ast::DateTimePrecision,
    default_offset: Option<i16>,
) -> EvalResult<CqlValue> {
    let source = a.precision().min(b.precision());
    let requested = requested_floor(precision);
    if source < requested {
        return Err(EvalError::invalid_operand(
            "DifferenceBetween",
            format!("requested precision {precision} is finer than the operands carry"),
        ));
    }
    let a = truncate_naive(utc_anchor(a, default_offset), requested);
    let b = truncate_naive(utc_anchor(b, default_offset), requested);
    Ok(CqlValue::Integer(to_duration_int(
        whole_period(a, b, precision),
        "DifferenceBetween",
    )?))
}

fn difference_between_times(
    a: &CqlTime,
    b: &CqlTime,
    precision: lumen_cql_ast::DateTimePrecision,
) -> EvalResult<CqlValue> {
    let unit_ms = time_unit_millis(precision, "DifferenceBetween")?;
    let source = a.precision().min(b.precision());
    let requested = requested_floor(precision);
    if source < requested {
        return Err(EvalError::invalid_operand(
            "DifferenceBetween",
            format!("requested precision {precision} is finer than the operands carry"),
        ));
    }
    let a = a.truncate_to(requested).to_millis();
    let b = b.truncate_to(requested).to_millis();
    Ok(CqlValue::Integer(to_duration_int(
        (b - a) / unit_ms,
        "DifferenceBetween",
    )?))
}

/// The component precision the requested duration unit needs; weeks count
/// in days.
fn requested_floor(precision: lumen_cql_ast::DateTimePrecision) -> DateTimePrecision {
    precision.value_precision().unwrap_or(DateTimePrecision::Day)
}

/// Operands too coarse for an exact count widen to a one-unit range. The
/// upper bound comes from counting between the two low-boundary anchors,
/// which fill the missing components identically on both sides.
fn uncertainty_interval(upper: i64, operator: &'static str) -> EvalResult<CqlValue> {
    let upper = to_duration_int(upper, operator)?;
    let lower = upper
        .checked_sub(1)
        .ok_or_else(|| EvalError::overflow(operator))?;
    Ok(CqlValue::Interval(CqlInterval::closed(
        CqlValue::Integer(lower),
        CqlValue::Integer(upper),
    )))
}

fn to_duration_int(value: i64, operator: &'static str) -> EvalResult<i32> {
    i32::try_from(value).map_err(|_| EvalError::overflow(operator))
}

fn time_unit_millis(
    precision: lumen_cql_ast::DateTimePrecision,
    operator: &'static str,
) -> EvalResult<i64> {
    use lumen_cql_ast::DateTimePrecision::*;
    match precision {
        Hour => Ok(3_600_000),
        Minute => Ok(60_000),
        Second => Ok(1_000),
        Millisecond => Ok(1),
        _ => Err(EvalError::invalid_operand(
            operator,
            format!("{precision} is not a Time precision"),
        )),
    }
}

/// The low-boundary expansion shifted to UTC. Absent offsets take the
/// evaluation default, so both operands of a pair land on the same clock.
fn utc_anchor(dt: &CqlDateTime, default_offset: Option<i16>) -> NaiveDateTime {
    let offset = dt.timezone_offset.or(default_offset).unwrap_or(0);
    dt.low_boundary().to_naive_datetime() - chrono::Duration::minutes(i64::from(offset))
}

fn whole_period(
    a: NaiveDateTime,
    b: NaiveDateTime,
    precision: lumen_cql_ast::DateTimePrecision,
) -> i64 {
    use lumen_cql_ast::DateTimePrecision::*;
    let delta = b - a;
    match precision {
        Year => whole_months(a, b) / 12,
        Month => whole_months(a, b),
        Week => delta.num_days() / 7,
        Day => delta.num_days(),
        Hour => delta.num_hours(),
        Minute => delta.num_minutes(),
        Second => delta.num_seconds(),
        Millisecond => delta.num_milliseconds(),
    }
}

/// Whole calendar months, truncated toward zero: the raw month distance,
/// stepped back one when the day-and-time of the target has not yet reached
/// the day-and-time of the anchor.
fn whole_months(a: NaiveDateTime, b: NaiveDateTime) -> i64 {
    let anchor = i64::from(a.year()) * 12 + i64::from(a.month0());
    let target = i64::from(b.year()) * 12 + i64::from(b.month0());
    let mut months = target - anchor;
    let a_in_month = (a.day(), a.time());
    let b_in_month = (b.day(), b.time());
    if months > 0 && b_in_month < a_in_month {
        months -= 1;
    } else if months < 0 && b_in_month > a_in_month {
        months += 1;
    }
    months
}

fn truncate_naive(value: NaiveDateTime, precision: DateTimePrecision) -> NaiveDateTime {
    use DateTimePrecision::*;
    let date = value.date();
    let time = value.time();
    let (month, day) = match precision {
        Year => (1, 1),
        Month => (date.month(), 1),
        _ => (date.month(), date.day()),
    };
    let (hour, minute, second, milli) = match precision {
        Year | Month | Day => (0, 0, 0, 0),
        Hour => (time.hour(), 0, 0, 0),
        Minute => (time.hour(), time.minute(), 0, 0),
        Second => (time.hour(), time.minute(), time.second(), 0),
        Millisecond => (
            time.hour(),
            time.minute(),
            time.second(),
            time.nanosecond() / 1_000_000,
        ),
    };
    NaiveDate::from_ymd_opt(date.year(), month, day)
        .and_then(|d| d.and_hms_milli_opt(hour, minute, second, milli))
        .unwrap_or(value)
}
