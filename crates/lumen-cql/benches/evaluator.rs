//! Evaluator benchmarks using divan
//!
//! Expressions are deserialized once outside the timed section; each
//! iteration pays for dispatch, overload selection, and value construction.

use lumen_cql::{CqlEngine, EvaluationContext, Expression, Library};
use serde_json::json;

fn main() {
    divan::main();
}

fn engine() -> CqlEngine {
    let library: Library =
        serde_json::from_value(json!({"identifier": {"id": "Bench"}})).unwrap();
    CqlEngine::new(library)
}

fn expr(value: serde_json::Value) -> Expression {
    serde_json::from_value(value).unwrap()
}

fn int_lit(value: i64) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Integer",
        "value": value.to_string(),
    })
}

fn dec_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Decimal",
        "value": value,
    })
}

fn date_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Date",
        "value": value,
    })
}

fn binary(op: &str, left: serde_json::Value, right: serde_json::Value) -> serde_json::Value {
    json!({"type": op, "operand": [left, right]})
}

fn int_list(n: i64) -> serde_json::Value {
    let elements: Vec<_> = (1..=n).map(int_lit).collect();
    json!({"type": "List", "element": elements})
}

mod literals {
    use super::*;

    #[divan::bench]
    fn integer_literal(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(int_lit(42));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }

    #[divan::bench]
    fn decimal_literal(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(dec_lit("3.14159"));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }
}

mod arithmetic {
    use super::*;

    #[divan::bench]
    fn simple_addition(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(binary("Add", int_lit(1), int_lit(2)));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }

    #[divan::bench]
    fn mixed_promotion(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(binary("Add", int_lit(1), dec_lit("2.5")));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }

    #[divan::bench]
    fn complex_arithmetic(bencher: divan::Bencher) {
        let engine = engine();
        // (1 + 2) * 3 - 4 / 2
        let expr = expr(binary(
            "Subtract",
            binary("Multiply", binary("Add", int_lit(1), int_lit(2)), int_lit(3)),
            binary("Divide", int_lit(4), int_lit(2)),
        ));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }
}

mod comparisons {
    use super::*;

    #[divan::bench]
    fn integer_comparison(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(binary("Greater", int_lit(10), int_lit(5)));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }

    #[divan::bench]
    fn date_comparison(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(binary("Less", date_lit("2020-01-01"), date_lit("2024-06-15")));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }
}

mod intervals {
    use super::*;

    #[divan::bench]
    fn membership(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(binary(
            "In",
            int_lit(50),
            json!({
                "type": "Interval",
                "low": int_lit(0),
                "lowClosed": true,
                "high": int_lit(100),
                "highClosed": false,
            }),
        ));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }
}

mod queries {
    use super::*;

    #[divan::bench]
    fn filter_and_project(bencher: divan::Bencher) {
        let engine = engine();
        let expr = expr(json!({
            "type": "Query",
            "source": [{"alias": "X", "expression": int_list(100)}],
            "where": binary("Greater", json!({"type": "AliasRef", "name": "X"}), int_lit(50)),
            "return": {"expression": binary(
                "Multiply",
                json!({"type": "AliasRef", "name": "X"}),
                int_lit(2),
            )},
        }));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }
}

mod scaling {
    use super::*;

    #[divan::bench(args = [10, 50, 100, 200])]
    fn arithmetic_chain_scaling(bencher: divan::Bencher, n: usize) {
        let engine = engine();
        let mut chain = int_lit(1);
        for _ in 1..n {
            chain = binary("Add", chain, int_lit(1));
        }
        let expr = expr(chain);

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }

    #[divan::bench(args = [10, 50, 100, 500, 1000])]
    fn list_size_scaling(bencher: divan::Bencher, n: usize) {
        let engine = engine();
        let expr = expr(int_list(n as i64));

        bencher.bench_local(|| {
            let mut ctx = EvaluationContext::new();
            engine.evaluate(divan::black_box(&expr), &mut ctx)
        });
    }
}
