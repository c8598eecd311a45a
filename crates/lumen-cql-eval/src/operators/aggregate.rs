//! Aggregate operators
//!
//! Every aggregate skips null elements. Numeric aggregates fold with the
//! same checked addition and multiplication the arithmetic operators use,
//! so overflow and unit handling stay uniform; an empty or all-null source
//! is null. The statistical aggregates run through f64 and come back as
//! Decimal, which is how the measure-oriented engines do it.
//!
//! A null source counts as an empty one, which makes Count zero, AllTrue
//! vacuously true, and AnyTrue vacuously false without special casing.

use std::cmp::Ordering;

use lumen_cql_ast::AggregateExpression;
use lumen_cql_types::{CqlList, CqlQuantity, CqlType, CqlValue};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::arithmetic::{add, multiply};
use crate::operators::comparison::{cql_compare, cql_equal};
use crate::operators::list::property_key;
use crate::registry::{BinaryOpFn, OperatorRegistry};

pub(crate) fn register(registry: &mut OperatorRegistry) {
    registry.register_aggregate("Count", count);
    registry.register_aggregate("Sum", sum);
    registry.register_aggregate("Product", product);
    registry.register_aggregate("Min", min_of);
    registry.register_aggregate("Max", max_of);
    registry.register_aggregate("Avg", avg);
    registry.register_aggregate("GeometricMean", geometric_mean);
    registry.register_aggregate("Median", median);
    registry.register_aggregate("Mode", mode);
    registry.register_aggregate("Variance", variance);
    registry.register_aggregate("PopulationVariance", population_variance);
    registry.register_aggregate("StdDev", std_dev);
    registry.register_aggregate("PopulationStdDev", population_std_dev);
    registry.register_aggregate("AllTrue", all_true);
    registry.register_aggregate("AnyTrue", any_true);
}

impl CqlEngine {
    /// Materializes the aggregate source, applies the optional path
    /// projection, and hands the elements to the named aggregate.
    pub(crate) fn eval_aggregate(
        &self,
        name: &'static str,
        expr: &AggregateExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = match &expr.source {
            Some(source) => self.evaluate(source, ctx)?,
            None => CqlValue::Null,
        };
        let source = match &expr.path {
            Some(path) => project(source, path)?,
            None => source,
        };
        let implementation = self.registry().aggregate(name)?;
        match &source {
            CqlValue::Null => implementation(ctx, &[]),
            CqlValue::List(list) => implementation(ctx, &list.elements),
            single => implementation(ctx, std::slice::from_ref(single)),
        }
    }
}

fn project(source: CqlValue, path: &str) -> EvalResult<CqlValue> {
    match source {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::List(list) => {
            let mut projected = Vec::with_capacity(list.elements.len());
            for element in &list.elements {
                projected.push(property_key(element, path)?);
            }
            Ok(CqlValue::List(CqlList::new(CqlType::Any, projected)))
        }
        other => property_key(&other, path),
    }
}

fn count(_ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    let count = values.iter().filter(|v| !v.is_null()).count();
    Ok(CqlValue::Integer(count as i32))
}

fn sum(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    fold_numeric(ctx, values, "Sum", add)
}

fn product(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    fold_numeric(ctx, values, "Product", multiply)
}

fn fold_numeric(
    ctx: &EvaluationContext,
    values: &[CqlValue],
    operator: &'static str,
    op: BinaryOpFn,
) -> EvalResult<CqlValue> {
    let mut accumulator: Option<CqlValue> = None;
    for item in values {
        if item.is_null() {
            continue;
        }
        require_numeric(operator, item)?;
        accumulator = Some(match accumulator {
            None => item.clone(),
            Some(current) => op(ctx, &current, item)?,
        });
    }
    Ok(accumulator.unwrap_or(CqlValue::Null))
}

fn min_of(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    extreme(ctx, values, Ordering::Less)
}

fn max_of(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    extreme(ctx, values, Ordering::Greater)
}

/// Undecided orderings keep the earlier element.
fn extreme(
    ctx: &EvaluationContext,
    values: &[CqlValue],
    want: Ordering,
) -> EvalResult<CqlValue> {
    let mut best: Option<&CqlValue> = None;
    for item in values {
        if item.is_null() {
            continue;
        }
        best = Some(match best {
            None => item,
            Some(current) => match cql_compare(ctx, item, current)? {
                Some(order) if order == want => item,
                _ => current,
            },
        });
    }
    Ok(best.cloned().unwrap_or(CqlValue::Null))
}

fn avg(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    let total = sum(ctx, values)?;
    let count = values.iter().filter(|v| !v.is_null()).count();
    if total.is_null() || count == 0 {
        return Ok(CqlValue::Null);
    }
    let divisor = Decimal::from(count as i64);
    match total {
        CqlValue::Integer(s) => divide_decimal(Decimal::from(s), divisor).map(CqlValue::Decimal),
        CqlValue::Long(s) => divide_decimal(Decimal::from(s), divisor).map(CqlValue::Decimal),
        CqlValue::Decimal(s) => divide_decimal(s, divisor).map(CqlValue::Decimal),
        CqlValue::Quantity(q) => {
            let value = divide_decimal(q.value, divisor)?;
            Ok(CqlValue::Quantity(CqlQuantity {
                value,
                unit: q.unit,
            }))
        }
        other => Err(EvalError::type_mismatch(
            "numeric",
            other.get_type().to_string(),
        )),
    }
}

fn geometric_mean(_ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    let floats = float_values(values);
    if floats.is_empty() {
        return Ok(CqlValue::Null);
    }
    let product: f64 = floats.iter().product();
    let mean = product.powf(1.0 / floats.len() as f64);
    Ok(CqlValue::Decimal(
        Decimal::from_f64(mean).unwrap_or(Decimal::ZERO),
    ))
}

fn median(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    let mut sorted: Vec<&CqlValue> = values.iter().filter(|v| !v.is_null()).collect();
    if sorted.is_empty() {
        return Ok(CqlValue::Null);
    }
    let mut sort_error = None;
    sorted.sort_by(|a, b| match cql_compare(ctx, a, b) {
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
    let len = sorted.len();
    if len % 2 == 1 {
        return Ok(sorted[len / 2].clone());
    }
    let low = sorted[len / 2 - 1];
    let high = sorted[len / 2];
    match (low.as_decimal(), high.as_decimal()) {
        (Some(a), Some(b)) => {
            let middle = divide_decimal(
                a.checked_add(b).ok_or_else(|| EvalError::overflow("Median"))?,
                Decimal::from(2),
            )?;
            Ok(CqlValue::Decimal(middle))
        }
        // Non-numeric points have no midpoint; take the lower one
        _ => Ok(low.clone()),
    }
}

fn mode(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    let mut counts: Vec<(&CqlValue, usize)> = Vec::new();
    'element: for item in values {
        if item.is_null() {
            continue;
        }
        for (seen, count) in counts.iter_mut() {
            if cql_equal(ctx, seen, item)? == Some(true) {
                *count += 1;
                continue 'element;
            }
        }
        counts.push((item, 1));
    }
    let best = counts.iter().map(|(_, count)| *count).max().unwrap_or(0);
    Ok(counts
        .into_iter()
        .find(|(_, count)| *count == best)
        .map(|(value, _)| value.clone())
        .unwrap_or(CqlValue::Null))
}

fn variance(_ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    variance_impl(values, false)
}

fn population_variance(_ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    variance_impl(values, true)
}

fn variance_impl(values: &[CqlValue], population: bool) -> EvalResult<CqlValue> {
    let floats = float_values(values);
    let n = floats.len();
    // The sample estimator needs at least two points
    if n == 0 || (!population && n == 1) {
        return Ok(CqlValue::Null);
    }
    let mean = floats.iter().sum::<f64>() / n as f64;
    let sum_sq_diff: f64 = floats.iter().map(|x| (x - mean).powi(2)).sum();
    let denominator = if population { n } else { n - 1 } as f64;
    Ok(CqlValue::Decimal(
        Decimal::from_f64(sum_sq_diff / denominator).unwrap_or(Decimal::ZERO),
    ))
}

fn std_dev(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    root_of(variance(ctx, values)?)
}

fn population_std_dev(ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    root_of(population_variance(ctx, values)?)
}

fn root_of(variance: CqlValue) -> EvalResult<CqlValue> {
    match variance {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Decimal(v) => {
            let root = v.to_f64().map(f64::sqrt).unwrap_or(0.0);
            Ok(CqlValue::Decimal(
                Decimal::from_f64(root).unwrap_or(Decimal::ZERO),
            ))
        }
        other => Err(EvalError::type_mismatch(
            "Decimal",
            other.get_type().to_string(),
        )),
    }
}

fn all_true(_ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    for item in values {
        match item {
            CqlValue::Boolean(false) => return Ok(CqlValue::Boolean(false)),
            CqlValue::Boolean(true) | CqlValue::Null => {}
            other => {
                return Err(EvalError::type_mismatch(
                    "Boolean",
                    other.get_type().to_string(),
                ));
            }
        }
    }
    Ok(CqlValue::Boolean(true))
}

fn any_true(_ctx: &EvaluationContext, values: &[CqlValue]) -> EvalResult<CqlValue> {
    for item in values {
        match item {
            CqlValue::Boolean(true) => return Ok(CqlValue::Boolean(true)),
            CqlValue::Boolean(false) | CqlValue::Null => {}
            other => {
                return Err(EvalError::type_mismatch(
                    "Boolean",
                    other.get_type().to_string(),
                ));
            }
        }
    }
    Ok(CqlValue::Boolean(false))
}

fn require_numeric(operator: &'static str, value: &CqlValue) -> EvalResult<()> {
    match value {
        CqlValue::Integer(_)
        | CqlValue::Long(_)
        | CqlValue::Decimal(_)
        | CqlValue::Quantity(_) => Ok(()),
        other => Err(EvalError::invalid_operand(
            operator,
            format!("expected a numeric element, found {}", other.get_type()),
        )),
    }
}

fn float_values(values: &[CqlValue]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|v| match v {
            CqlValue::Integer(i) => Some(f64::from(*i)),
            CqlValue::Long(l) => Some(*l as f64),
            CqlValue::Decimal(d) => d.to_f64(),
            _ => None,
        })
        .collect()
}

fn divide_decimal(dividend: Decimal, divisor: Decimal) -> EvalResult<Decimal> {
    dividend
        .checked_div(divisor)
        .ok_or_else(|| EvalError::overflow("Avg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> EvaluationContext {
        EvaluationContext::new()
    }

    fn ints(values: &[i32]) -> Vec<CqlValue> {
        values.iter().copied().map(CqlValue::Integer).collect()
    }

    #[test]
    fn count_skips_nulls_and_is_zero_when_empty() {
        let ctx = ctx();
        let mut values = ints(&[1, 2]);
        values.push(CqlValue::Null);
        assert_eq!(count(&ctx, &values).unwrap(), CqlValue::Integer(2));
        assert_eq!(count(&ctx, &[]).unwrap(), CqlValue::Integer(0));
    }

    #[test]
    fn sum_promotes_mixed_numerics() {
        let ctx = ctx();
        let values = vec![
            CqlValue::Integer(1),
            CqlValue::Null,
            CqlValue::Decimal(Decimal::new(25, 1)),
        ];
        assert_eq!(
            sum(&ctx, &values).unwrap(),
            CqlValue::Decimal(Decimal::new(35, 1))
        );
        assert_eq!(sum(&ctx, &[]).unwrap(), CqlValue::Null);
        assert_eq!(sum(&ctx, &[CqlValue::Null]).unwrap(), CqlValue::Null);
    }

    #[test]
    fn sum_keeps_quantity_units() {
        let ctx = ctx();
        let values = vec![
            CqlValue::Quantity(CqlQuantity::new(Decimal::from(1), "mg")),
            CqlValue::Quantity(CqlQuantity::new(Decimal::from(2), "mg")),
        ];
        assert_eq!(
            sum(&ctx, &values).unwrap(),
            CqlValue::Quantity(CqlQuantity::new(Decimal::from(3), "mg"))
        );
    }

    #[test]
    fn sum_rejects_non_numeric_elements() {
        let ctx = ctx();
        let values = vec![CqlValue::Integer(1), CqlValue::String("two".into())];
        assert!(sum(&ctx, &values).is_err());
    }

    #[test]
    fn product_multiplies_non_null_elements() {
        let ctx = ctx();
        assert_eq!(
            product(&ctx, &ints(&[2, 3, 4])).unwrap(),
            CqlValue::Integer(24)
        );
        assert_eq!(product(&ctx, &[]).unwrap(), CqlValue::Null);
    }

    #[test]
    fn min_and_max_ignore_nulls() {
        let ctx = ctx();
        let mut values = ints(&[3, 1, 2]);
        values.insert(1, CqlValue::Null);
        assert_eq!(min_of(&ctx, &values).unwrap(), CqlValue::Integer(1));
        assert_eq!(max_of(&ctx, &values).unwrap(), CqlValue::Integer(3));
        assert_eq!(min_of(&ctx, &[CqlValue::Null]).unwrap(), CqlValue::Null);
    }

    #[test]
    fn avg_divides_by_the_non_null_count() {
        let ctx = ctx();
        let mut values = ints(&[1, 2, 3]);
        values.push(CqlValue::Null);
        assert_eq!(
            avg(&ctx, &values).unwrap(),
            CqlValue::Decimal(Decimal::from(2))
        );
        assert_eq!(avg(&ctx, &[]).unwrap(), CqlValue::Null);
    }

    #[test]
    fn median_averages_the_even_middle() {
        let ctx = ctx();
        assert_eq!(median(&ctx, &ints(&[3, 1, 2])).unwrap(), CqlValue::Integer(2));
        assert_eq!(
            median(&ctx, &ints(&[4, 1, 2, 3])).unwrap(),
            CqlValue::Decimal(Decimal::new(25, 1))
        );
        assert_eq!(median(&ctx, &[]).unwrap(), CqlValue::Null);
    }

    #[test]
    fn mode_takes_the_first_most_frequent() {
        let ctx = ctx();
        assert_eq!(
            mode(&ctx, &ints(&[1, 2, 2, 3, 3])).unwrap(),
            CqlValue::Integer(2)
        );
        assert_eq!(mode(&ctx, &[]).unwrap(), CqlValue::Null);
    }

    #[test]
    fn variance_uses_the_sample_denominator() {
        let ctx = ctx();
        assert_eq!(
            variance(&ctx, &ints(&[2, 4])).unwrap(),
            CqlValue::Decimal(Decimal::from(2))
        );
        assert_eq!(
            population_variance(&ctx, &ints(&[2, 4])).unwrap(),
            CqlValue::Decimal(Decimal::from(1))
        );
        // One point is not enough for the sample estimator
        assert_eq!(variance(&ctx, &ints(&[2])).unwrap(), CqlValue::Null);
        assert_eq!(
            population_std_dev(&ctx, &ints(&[2, 4])).unwrap(),
            CqlValue::Decimal(Decimal::from(1))
        );
    }

    #[test]
    fn geometric_mean_of_four_and_nine_is_six() {
        let ctx = ctx();
        let values = vec![CqlValue::Integer(4), CqlValue::Integer(9)];
        assert_eq!(
            geometric_mean(&ctx, &values).unwrap(),
            CqlValue::Decimal(Decimal::from(6))
        );
    }

    #[test]
    fn boolean_aggregates_are_vacuous_over_nothing() {
        let ctx = ctx();
        assert_eq!(all_true(&ctx, &[]).unwrap(), CqlValue::Boolean(true));
        assert_eq!(any_true(&ctx, &[]).unwrap(), CqlValue::Boolean(false));
        let mixed = vec![CqlValue::Boolean(true), CqlValue::Null];
        assert_eq!(all_true(&ctx, &mixed).unwrap(), CqlValue::Boolean(true));
        assert_eq!(any_true(&ctx, &mixed).unwrap(), CqlValue::Boolean(true));
        let with_false = vec![CqlValue::Boolean(true), CqlValue::Boolean(false)];
        assert_eq!(all_true(&ctx, &with_false).unwrap(), CqlValue::Boolean(false));
    }
}
