//! Property checks over the comparison kernel and the public operators.

use lumen_cql::types::{CqlDate, TemporalCompare};
use lumen_cql::{CqlEngine, CqlValue, EvaluationContext, Expression, Library};
use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;

fn evaluate(expression: serde_json::Value) -> CqlValue {
    let library: Library =
        serde_json::from_value(json!({"identifier": {"id": "Props"}})).unwrap();
    let expression: Expression = serde_json::from_value(expression).unwrap();
    let mut ctx = EvaluationContext::new();
    CqlEngine::new(library).evaluate(&expression, &mut ctx).unwrap()
}

fn int_lit(value: i32) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Integer",
        "value": value.to_string(),
    })
}

fn str_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}String",
        "value": value,
    })
}

fn unary(op: &str, operand: serde_json::Value) -> serde_json::Value {
    json!({"type": op, "operand": operand})
}

/// Dates at year, month, or day precision; day capped at 28 so every
/// combination is valid.
fn arb_date() -> impl Strategy<Value = CqlDate> {
    (1900i32..=2100, 1u8..=12, 1u8..=28, 0usize..3).prop_map(|(y, m, d, p)| {
        let text = match p {
            0 => format!("{y:04}"),
            1 => format!("{y:04}-{m:02}"),
            _ => format!("{y:04}-{m:02}-{d:02}"),
        };
        CqlDate::parse(&text).unwrap()
    })
}

proptest! {
    #[test]
    fn date_comparison_is_antisymmetric(a in arb_date(), b in arb_date()) {
        let forward = a.compare_with_precision(&b, None);
        let backward = b.compare_with_precision(&a, None);
        let expected = match forward {
            TemporalCompare::Before => TemporalCompare::After,
            TemporalCompare::After => TemporalCompare::Before,
            other => other,
        };
        prop_assert_eq!(backward, expected);
    }

    #[test]
    fn open_integer_bounds_step_inward(
        low in -1000i32..1000,
        span in 2i32..1000,
        low_closed: bool,
        high_closed: bool,
    ) {
        let high = low + span;
        let interval = json!({
            "type": "Interval",
            "low": int_lit(low),
            "lowClosed": low_closed,
            "high": int_lit(high),
            "highClosed": high_closed,
        });
        let start = evaluate(unary("Start", interval.clone()));
        let end = evaluate(unary("End", interval));
        prop_assert_eq!(start, CqlValue::Integer(low + i32::from(!low_closed)));
        prop_assert_eq!(end, CqlValue::Integer(high - i32::from(!high_closed)));
    }

    #[test]
    fn quantity_strings_round_trip(
        mantissa in -999_999i64..1_000_000,
        scale in 0u32..4,
        unit_index in 0usize..5,
    ) {
        let units = ["mg", "mL", "g", "m", "mm[Hg]"];
        let text = format!("{} '{}'", Decimal::new(mantissa, scale), units[unit_index]);
        let parsed = evaluate(unary("ToQuantity", str_lit(&text)));
        let reparsed = evaluate(unary(
            "ToQuantity",
            unary("ToString", unary("ToQuantity", str_lit(&text))),
        ));
        prop_assert_eq!(reparsed, parsed);
    }

    #[test]
    fn distinct_is_idempotent(
        values in proptest::collection::vec(proptest::option::of(-50i32..50), 0..24),
    ) {
        let elements: Vec<_> = values
            .iter()
            .map(|v| match v {
                Some(n) => int_lit(*n),
                None => json!({"type": "Null"}),
            })
            .collect();
        let once = evaluate(unary(
            "Distinct",
            json!({"type": "List", "element": elements.clone()}),
        ));
        let twice = evaluate(unary(
            "Distinct",
            unary("Distinct", json!({"type": "List", "element": elements})),
        ));
        prop_assert_eq!(once, twice);
    }
}
