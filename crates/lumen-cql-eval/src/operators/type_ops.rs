//! Type inspection and conversion operators.
//!
//! `as` and `is` test runtime shape against a declared type, so an empty
//! list passes for any `List<T>`. The `To*` family converts between system
//! types; failed string parses yield null, and the `ConvertsTo*` probes
//! report whether the matching conversion would produce a value.

use lumen_cql_ast::{
    AsExpression, CanConvertExpression, ConvertExpression, IsExpression, TypeSpecifier,
};
use lumen_cql_types::{
    CqlConcept, CqlDate, CqlDateTime, CqlList, CqlQuantity, CqlRatio, CqlTime, CqlType, CqlValue,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::registry::{OperatorRegistry, UnaryOpFn};

pub(crate) fn register(registry: &mut OperatorRegistry) {
    registry.register_unary("ToBoolean", CqlType::Any, CqlType::Boolean, to_boolean);
    registry.register_unary("ToInteger", CqlType::Any, CqlType::Integer, to_integer);
    registry.register_unary("ToLong", CqlType::Any, CqlType::Long, to_long);
    registry.register_unary("ToDecimal", CqlType::Any, CqlType::Decimal, to_decimal);
    registry.register_unary("ToString", CqlType::Any, CqlType::String, to_string_value);
    registry.register_unary("ToDate", CqlType::Any, CqlType::Date, to_date);
    registry.register_unary("ToDateTime", CqlType::Any, CqlType::DateTime, to_datetime);
    registry.register_unary("ToTime", CqlType::Any, CqlType::Time, to_time);
    registry.register_unary("ToQuantity", CqlType::Any, CqlType::Quantity, to_quantity);
    registry.register_unary("ToRatio", CqlType::Any, CqlType::Ratio, to_ratio);
    registry.register_unary("ToConcept", CqlType::Any, CqlType::Concept, to_concept);
    registry.register_unary(
        "ToChars",
        CqlType::String,
        CqlType::list(CqlType::String),
        to_chars,
    );
    registry.register_unary("ToList", CqlType::Any, CqlType::list(CqlType::Any), to_list);

    for (name, probe) in [
        ("ConvertsToBoolean", converts_to_boolean as UnaryOpFn),
        ("ConvertsToInteger", converts_to_integer),
        ("ConvertsToLong", converts_to_long),
        ("ConvertsToDecimal", converts_to_decimal),
        ("ConvertsToString", converts_to_string),
        ("ConvertsToDate", converts_to_date),
        ("ConvertsToDateTime", converts_to_datetime),
        ("ConvertsToTime", converts_to_time),
        ("ConvertsToQuantity", converts_to_quantity),
        ("ConvertsToRatio", converts_to_ratio),
    ] {
        registry.register_unary(name, CqlType::Any, CqlType::Boolean, probe);
    }
}

impl CqlEngine {
    pub(crate) fn eval_as(
        &self,
        expr: &AsExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        let Some(target) = target_type(&expr.as_type_specifier, &expr.as_type) else {
            return Err(EvalError::internal("As expression carries no target type"));
        };
        if operand.is_null() {
            return Ok(CqlValue::Null);
        }
        if conforms_to(&operand, &target) {
            return Ok(operand);
        }
        if expr.strict.unwrap_or(false) {
            return Err(EvalError::cast_error(
                operand.get_type().to_string(),
                target.to_string(),
            ));
        }
        Ok(CqlValue::Null)
    }

    pub(crate) fn eval_is(
        &self,
        expr: &IsExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        let Some(target) = target_type(&expr.is_type_specifier, &expr.is_type) else {
            return Err(EvalError::internal("Is expression carries no target type"));
        };
        if operand.is_null() {
            return Ok(CqlValue::Boolean(false));
        }
        Ok(CqlValue::Boolean(conforms_to(&operand, &target)))
    }

    pub(crate) fn eval_convert(
        &self,
        expr: &ConvertExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        let Some(target) = target_type(&expr.to_type_specifier, &expr.to_type) else {
            return Err(EvalError::internal(
                "Convert expression carries no target type",
            ));
        };
        convert_to(ctx, &operand, &target)
    }

    pub(crate) fn eval_can_convert(
        &self,
        expr: &CanConvertExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        let Some(target) = target_type(&expr.to_type_specifier, &expr.to_type) else {
            return Err(EvalError::internal(
                "CanConvert expression carries no target type",
            ));
        };
        if operand.is_null() {
            return Ok(CqlValue::Boolean(true));
        }
        let convertible = matches!(convert_to(ctx, &operand, &target), Ok(value) if !value.is_null());
        Ok(CqlValue::Boolean(convertible))
    }
}

fn target_type(specifier: &Option<TypeSpecifier>, name: &Option<String>) -> Option<CqlType> {
    match specifier {
        Some(specifier) => Some(specifier.to_cql_type()),
        None => name.as_deref().map(CqlType::parse_qualified),
    }
}

/// Runtime conformance check behind `as` and `is`.
///
/// Lists are tested element by element so the inferred element type of a
/// literal never blocks a cast; an empty list conforms to every `List<T>`.
fn conforms_to(value: &CqlValue, target: &CqlType) -> bool {
    match (value, target) {
        (_, CqlType::Any) => true,
        (CqlValue::Null, _) => true,
        (CqlValue::List(list), CqlType::List(element)) => {
            list.elements.iter().all(|item| conforms_to(item, element))
        }
        (_, CqlType::Choice(alternatives)) => {
            alternatives.iter().any(|alt| conforms_to(value, alt))
        }
        _ => value.get_type().is_subtype_of(target),
    }
}

/// Dispatches `convert ... to T` to the conversion for `T`. Targets without
/// a conversion accept conforming values unchanged and reject the rest.
pub(crate) fn convert_to(
    ctx: &EvaluationContext,
    value: &CqlValue,
    target: &CqlType,
) -> EvalResult<CqlValue> {
    match target {
        CqlType::Boolean => to_boolean(ctx, value),
        CqlType::Integer => to_integer(ctx, value),
        CqlType::Long => to_long(ctx, value),
        CqlType::Decimal => to_decimal(ctx, value),
        CqlType::String => to_string_value(ctx, value),
        CqlType::Date => to_date(ctx, value),
        CqlType::DateTime => to_datetime(ctx, value),
        CqlType::Time => to_time(ctx, value),
        CqlType::Quantity => to_quantity(ctx, value),
        CqlType::Ratio => to_ratio(ctx, value),
        CqlType::Concept => to_concept(ctx, value),
        CqlType::List(_) => to_list(ctx, value),
        other => {
            if value.is_null() || conforms_to(value, other) {
                Ok(value.clone())
            } else {
                Err(EvalError::conversion_error(
                    value.get_type().to_string(),
                    other.to_string(),
                ))
            }
        }
    }
}

fn to_boolean(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Boolean(b) => CqlValue::Boolean(*b),
        CqlValue::Integer(1) | CqlValue::Long(1) => CqlValue::Boolean(true),
        CqlValue::Integer(0) | CqlValue::Long(0) => CqlValue::Boolean(false),
        CqlValue::Decimal(d) if *d == Decimal::ONE => CqlValue::Boolean(true),
        CqlValue::Decimal(d) if *d == Decimal::ZERO => CqlValue::Boolean(false),
        CqlValue::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => CqlValue::Boolean(true),
            "false" | "f" | "no" | "n" | "0" => CqlValue::Boolean(false),
            _ => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_integer(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Integer(i) => CqlValue::Integer(*i),
        CqlValue::Boolean(b) => CqlValue::Integer(i32::from(*b)),
        CqlValue::Long(l) => match i32::try_from(*l) {
            Ok(i) => CqlValue::Integer(i),
            Err(_) => CqlValue::Null,
        },
        CqlValue::Decimal(d) if d.is_integer() => match d.to_i32() {
            Some(i) => CqlValue::Integer(i),
            None => CqlValue::Null,
        },
        CqlValue::String(s) => match s.trim().parse::<i32>() {
            Ok(i) => CqlValue::Integer(i),
            Err(_) => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_long(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Long(l) => CqlValue::Long(*l),
        CqlValue::Integer(i) => CqlValue::Long(i64::from(*i)),
        CqlValue::Boolean(b) => CqlValue::Long(i64::from(*b)),
        CqlValue::Decimal(d) if d.is_integer() => match d.to_i64() {
            Some(l) => CqlValue::Long(l),
            None => CqlValue::Null,
        },
        CqlValue::String(s) => match s.trim().parse::<i64>() {
            Ok(l) => CqlValue::Long(l),
            Err(_) => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_decimal(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Decimal(d) => CqlValue::Decimal(*d),
        CqlValue::Integer(i) => CqlValue::Decimal(Decimal::from(*i)),
        CqlValue::Long(l) => CqlValue::Decimal(Decimal::from(*l)),
        CqlValue::Boolean(b) => {
            CqlValue::Decimal(if *b { Decimal::ONE } else { Decimal::ZERO })
        }
        CqlValue::Quantity(q) => CqlValue::Decimal(q.value),
        CqlValue::String(s) => match s.trim().parse::<Decimal>() {
            Ok(d) => CqlValue::Decimal(d),
            Err(_) => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

/// Renders the literal form of each type. Long drops the `L` suffix and
/// Decimal keeps a fractional part so `ToString(4.0)` stays `"4.0"`.
fn to_string_value(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let rendered = match value {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::String(s) => s.clone(),
        CqlValue::Boolean(b) => b.to_string(),
        CqlValue::Integer(i) => i.to_string(),
        CqlValue::Long(l) => l.to_string(),
        CqlValue::Decimal(d) => {
            let s = d.to_string();
            if s.contains('.') { s } else { format!("{s}.0") }
        }
        other => other.to_string(),
    };
    Ok(CqlValue::String(rendered))
}

fn to_date(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Date(d) => CqlValue::Date(*d),
        CqlValue::DateTime(dt) => CqlValue::Date(dt.date()),
        CqlValue::String(s) => match CqlDate::parse(s.trim()) {
            Ok(d) => CqlValue::Date(d),
            Err(_) => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_datetime(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::DateTime(dt) => CqlValue::DateTime(*dt),
        CqlValue::Date(d) => CqlValue::DateTime(CqlDateTime::from_date(*d)),
        CqlValue::String(s) => match CqlDateTime::parse(s.trim()) {
            Ok(dt) => CqlValue::DateTime(dt),
            Err(_) => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_time(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Time(t) => CqlValue::Time(*t),
        CqlValue::DateTime(dt) => match dt.time() {
            Some(t) => CqlValue::Time(t),
            None => CqlValue::Null,
        },
        CqlValue::String(s) => {
            let s = s.trim();
            let s = s
                .strip_prefix('T')
                .or_else(|| s.strip_prefix('t'))
                .unwrap_or(s);
            match CqlTime::parse(s) {
                Ok(t) => CqlValue::Time(t),
                Err(_) => CqlValue::Null,
            }
        }
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_quantity(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Quantity(q) => CqlValue::Quantity(q.clone()),
        CqlValue::Integer(i) => CqlValue::Quantity(CqlQuantity::unitless(Decimal::from(*i))),
        CqlValue::Long(l) => CqlValue::Quantity(CqlQuantity::unitless(Decimal::from(*l))),
        CqlValue::Decimal(d) => CqlValue::Quantity(CqlQuantity::unitless(*d)),
        CqlValue::String(s) => match parse_quantity(s) {
            Some(q) => CqlValue::Quantity(q),
            None => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

/// Accepts `<decimal>` or `<decimal> '<unit>'`; anything else is no quantity.
fn parse_quantity(text: &str) -> Option<CqlQuantity> {
    let text = text.trim();
    let (number, rest) = match text.find(char::is_whitespace) {
        Some(split) => (&text[..split], text[split..].trim_start()),
        None => (text, ""),
    };
    let value = number.parse::<Decimal>().ok()?;
    if rest.is_empty() {
        return Some(CqlQuantity::unitless(value));
    }
    let unit = rest.strip_prefix('\'')?.strip_suffix('\'')?;
    if unit.is_empty() {
        return None;
    }
    Some(CqlQuantity::new(value, unit))
}

fn to_ratio(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Ratio(r) => CqlValue::Ratio(r.clone()),
        CqlValue::String(s) => match parse_ratio(s) {
            Some(r) => CqlValue::Ratio(r),
            None => CqlValue::Null,
        },
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn parse_ratio(text: &str) -> Option<CqlRatio> {
    let (numerator, denominator) = text.split_once(':')?;
    let numerator = parse_quantity(numerator)?;
    let denominator = parse_quantity(denominator)?;
    Some(CqlRatio::new(numerator, denominator))
}

fn to_concept(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::Concept(c) => CqlValue::Concept(c.clone()),
        CqlValue::Code(c) => CqlValue::Concept(CqlConcept::from_code(c.clone())),
        CqlValue::List(list) => {
            let mut codes = Vec::with_capacity(list.elements.len());
            for element in &list.elements {
                match element {
                    CqlValue::Null => {}
                    CqlValue::Code(code) => codes.push(code.clone()),
                    _ => return Ok(CqlValue::Null),
                }
            }
            CqlValue::Concept(CqlConcept::new(codes, None))
        }
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_chars(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::Null,
        CqlValue::String(s) => {
            let chars = s
                .chars()
                .map(|c| CqlValue::String(c.to_string()))
                .collect();
            CqlValue::List(CqlList::new(CqlType::String, chars))
        }
        _ => CqlValue::Null,
    };
    Ok(result)
}

fn to_list(_ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    let result = match value {
        CqlValue::Null => CqlValue::List(CqlList::empty(CqlType::Any)),
        CqlValue::List(list) => CqlValue::List(list.clone()),
        single => CqlValue::List(CqlList::new(single.get_type(), vec![single.clone()])),
    };
    Ok(result)
}

/// Shared body of the `ConvertsTo*` probes. Null is convertible to
/// everything; a conversion error counts as not convertible.
fn probe(
    ctx: &EvaluationContext,
    value: &CqlValue,
    conversion: UnaryOpFn,
) -> EvalResult<CqlValue> {
    if value.is_null() {
        return Ok(CqlValue::Boolean(true));
    }
    let convertible = matches!(conversion(ctx, value), Ok(converted) if !converted.is_null());
    Ok(CqlValue::Boolean(convertible))
}

fn converts_to_boolean(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_boolean)
}

fn converts_to_integer(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_integer)
}

fn converts_to_long(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_long)
}

fn converts_to_decimal(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_decimal)
}

fn converts_to_string(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_string_value)
}

fn converts_to_date(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_date)
}

fn converts_to_datetime(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_datetime)
}

fn converts_to_time(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_time)
}

fn converts_to_quantity(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_quantity)
}

fn converts_to_ratio(ctx: &EvaluationContext, value: &CqlValue) -> EvalResult<CqlValue> {
    probe(ctx, value, to_ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> EvaluationContext {
        EvaluationContext::new()
    }

    #[test]
    fn string_parses_follow_cql_forms() {
        let ctx = ctx();
        assert_eq!(
            to_integer(&ctx, &CqlValue::string(" 42 ")).unwrap(),
            CqlValue::Integer(42)
        );
        assert_eq!(
            to_boolean(&ctx, &CqlValue::string("Yes")).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(
            to_decimal(&ctx, &CqlValue::string("-1.5")).unwrap(),
            CqlValue::Decimal(Decimal::new(-15, 1))
        );
        assert_eq!(
            to_integer(&ctx, &CqlValue::string("four")).unwrap(),
            CqlValue::Null
        );
        assert_eq!(
            to_integer(&ctx, &CqlValue::string("3000000000")).unwrap(),
            CqlValue::Null
        );
        assert_eq!(
            to_long(&ctx, &CqlValue::string("3000000000")).unwrap(),
            CqlValue::Long(3_000_000_000)
        );
    }

    #[test]
    fn to_string_renders_literal_syntax() {
        let ctx = ctx();
        assert_eq!(
            to_string_value(&ctx, &CqlValue::Long(5)).unwrap(),
            CqlValue::string("5")
        );
        assert_eq!(
            to_string_value(&ctx, &CqlValue::Decimal(Decimal::from(4))).unwrap(),
            CqlValue::string("4.0")
        );
        assert_eq!(
            to_string_value(&ctx, &CqlValue::quantity(Decimal::new(15, 1), "mg")).unwrap(),
            CqlValue::string("1.5 'mg'")
        );
        assert_eq!(
            to_string_value(&ctx, &CqlValue::Boolean(true)).unwrap(),
            CqlValue::string("true")
        );
    }

    #[test]
    fn quantity_strings_require_quoted_units() {
        let ctx = ctx();
        assert_eq!(
            to_quantity(&ctx, &CqlValue::string("5.5 'mg'")).unwrap(),
            CqlValue::quantity(Decimal::new(55, 1), "mg")
        );
        assert_eq!(
            to_quantity(&ctx, &CqlValue::string("5 mg")).unwrap(),
            CqlValue::Null
        );
        assert_eq!(
            to_quantity(&ctx, &CqlValue::string("7")).unwrap(),
            CqlValue::Quantity(CqlQuantity::unitless(Decimal::from(7)))
        );
    }

    #[test]
    fn ratio_strings_split_on_the_colon() {
        let ctx = ctx();
        let expected = CqlRatio::new(
            CqlQuantity::new(Decimal::ONE, "mg"),
            CqlQuantity::new(Decimal::from(2), "mL"),
        );
        assert_eq!(
            to_ratio(&ctx, &CqlValue::string("1 'mg':2 'mL'")).unwrap(),
            CqlValue::Ratio(expected)
        );
        assert_eq!(
            to_ratio(&ctx, &CqlValue::string("1-2")).unwrap(),
            CqlValue::Null
        );
    }

    #[test]
    fn datetime_strings_round_trip_through_the_types() {
        let ctx = ctx();
        let date = match to_date(&ctx, &CqlValue::string("2014-02-11")).unwrap() {
            CqlValue::Date(d) => d,
            other => panic!("expected a date, got {other}"),
        };
        assert_eq!(date.year, 2014);
        assert_eq!(date.month, Some(2));
        assert_eq!(date.day, Some(11));

        // Date strings do not admit a time portion.
        assert_eq!(
            to_date(&ctx, &CqlValue::string("2014-02-11T10:30")).unwrap(),
            CqlValue::Null
        );

        let promoted = to_datetime(&ctx, &CqlValue::Date(date)).unwrap();
        assert!(matches!(&promoted, CqlValue::DateTime(dt) if dt.year == 2014));

        let time = to_time(&ctx, &CqlValue::string("T10:30")).unwrap();
        assert!(matches!(&time, CqlValue::Time(t) if t.hour == 10 && t.minute == Some(30)));
    }

    #[test]
    fn converts_probes_report_nulls_as_convertible() {
        let ctx = ctx();
        assert_eq!(
            converts_to_integer(&ctx, &CqlValue::Null).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(
            converts_to_integer(&ctx, &CqlValue::string("12")).unwrap(),
            CqlValue::Boolean(true)
        );
        assert_eq!(
            converts_to_integer(&ctx, &CqlValue::string("twelve")).unwrap(),
            CqlValue::Boolean(false)
        );
        assert_eq!(
            converts_to_quantity(&ctx, &CqlValue::Integer(3)).unwrap(),
            CqlValue::Boolean(true)
        );
    }

    #[test]
    fn to_list_wraps_scalars() {
        let ctx = ctx();
        let wrapped = to_list(&ctx, &CqlValue::Integer(5)).unwrap();
        match &wrapped {
            CqlValue::List(list) => {
                assert_eq!(list.element_type, CqlType::Integer);
                assert_eq!(list.elements, vec![CqlValue::Integer(5)]);
            }
            other => panic!("expected a list, got {other}"),
        }

        let empty = to_list(&ctx, &CqlValue::Null).unwrap();
        assert!(matches!(&empty, CqlValue::List(list) if list.elements.is_empty()));

        let chars = to_chars(&ctx, &CqlValue::string("abc")).unwrap();
        match chars {
            CqlValue::List(list) => assert_eq!(
                list.elements,
                vec![
                    CqlValue::string("a"),
                    CqlValue::string("b"),
                    CqlValue::string("c"),
                ]
            ),
            other => panic!("expected a list, got {other}"),
        }
    }

    #[test]
    fn runtime_shape_decides_casts() {
        let ints = CqlValue::List(CqlList::new(
            CqlType::Any,
            vec![CqlValue::Integer(1), CqlValue::Integer(2)],
        ));
        assert!(conforms_to(&ints, &CqlType::list(CqlType::Integer)));

        let empty = CqlValue::List(CqlList::empty(CqlType::Any));
        assert!(conforms_to(&empty, &CqlType::list(CqlType::Integer)));

        let mixed = CqlValue::List(CqlList::new(
            CqlType::Any,
            vec![CqlValue::Integer(1), CqlValue::string("two")],
        ));
        assert!(!conforms_to(&mixed, &CqlType::list(CqlType::Integer)));
        assert!(conforms_to(&CqlValue::Integer(1), &CqlType::Decimal));
    }

    #[test]
    fn convert_rejects_unrelated_named_targets() {
        let ctx = ctx();
        let target = CqlType::named("Patient");
        let err = convert_to(&ctx, &CqlValue::Integer(1), &target).unwrap_err();
        assert!(!err.is_internal());

        assert_eq!(
            convert_to(&ctx, &CqlValue::string("12"), &CqlType::Integer).unwrap(),
            CqlValue::Integer(12)
        );
    }
}
