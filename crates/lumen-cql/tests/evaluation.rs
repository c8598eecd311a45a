//! End-to-end evaluation of ELM JSON libraries through the facade.

use std::sync::Arc;

use lumen_cql::eval::{InMemoryRetrieve, InMemoryTerminology};
use lumen_cql::types::{CqlCode, CqlInterval, CqlList, CqlResource};
use lumen_cql::{CqlEngine, CqlValue, EvaluationContext, Library};
use pretty_assertions::assert_eq;
use serde_json::json;

fn library(source: serde_json::Value) -> Library {
    serde_json::from_value(source).unwrap()
}

/// Wraps one expression in a single-definition library and evaluates it.
fn evaluate_single(expression: serde_json::Value) -> CqlValue {
    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Scenario"},
        "statements": {"def": [{"name": "Result", "expression": expression}]}
    })));
    let mut ctx = EvaluationContext::new();
    let result = engine.evaluate_library(&mut ctx).unwrap();
    result.value("Result").cloned().unwrap()
}

fn int_lit(value: i32) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Integer",
        "value": value.to_string(),
    })
}

fn date_lit(value: &str) -> serde_json::Value {
    json!({
        "type": "Literal",
        "valueType": "{urn:hl7-org:elm-types:r1}Date",
        "value": value,
    })
}

fn int_interval(low: i32, high: i32) -> serde_json::Value {
    json!({
        "type": "Interval",
        "low": int_lit(low),
        "lowClosed": true,
        "high": int_lit(high),
        "highClosed": true,
    })
}

fn closed(low: i32, high: i32) -> CqlValue {
    CqlValue::Interval(CqlInterval::closed(
        CqlValue::Integer(low),
        CqlValue::Integer(high),
    ))
}

#[test]
fn membership_excludes_the_open_end() {
    let value = evaluate_single(json!({
        "type": "In",
        "operand": [int_lit(3), {
            "type": "Interval",
            "low": int_lit(0),
            "lowClosed": true,
            "high": int_lit(3),
            "highClosed": false,
        }],
    }));
    assert_eq!(value, CqlValue::Boolean(false));
}

#[test]
fn interval_except_keeps_the_left_run() {
    let value = evaluate_single(json!({
        "type": "Except",
        "operand": [int_interval(1, 5), int_interval(3, 10)],
    }));
    assert_eq!(value, closed(1, 2));
}

#[test]
fn year_precision_duration_widens_to_a_range() {
    let value = evaluate_single(json!({
        "type": "DurationBetween",
        "operand": [date_lit("2020"), date_lit("2021")],
        "precision": "Month",
    }));
    assert_eq!(value, closed(11, 12));
}

#[test]
fn collapse_merges_meeting_intervals() {
    let value = evaluate_single(json!({
        "type": "Collapse",
        "operand": {"type": "List", "element": [int_interval(1, 3), int_interval(4, 6)]},
    }));
    assert_eq!(
        value,
        CqlValue::List(CqlList::from_values(vec![closed(1, 6)])),
    );
}

#[test]
fn queries_filter_and_project_in_source_order() {
    let value = evaluate_single(json!({
        "type": "Query",
        "source": [{"alias": "X", "expression": {
            "type": "List",
            "element": [int_lit(1), int_lit(2), int_lit(3)],
        }}],
        "where": {"type": "Greater", "operand": [
            {"type": "AliasRef", "name": "X"},
            int_lit(1),
        ]},
        "return": {"expression": {"type": "Multiply", "operand": [
            {"type": "AliasRef", "name": "X"},
            int_lit(2),
        ]}},
    }));
    assert_eq!(
        value,
        CqlValue::list(vec![CqlValue::Integer(4), CqlValue::Integer(6)]),
    );
}

#[test]
fn exists_rejects_incomplete_lists() {
    let with_null = evaluate_single(json!({
        "type": "Exists",
        "operand": {"type": "List", "element": [int_lit(1), {"type": "Null"}]},
    }));
    assert_eq!(with_null, CqlValue::Boolean(false));

    let empty = evaluate_single(json!({
        "type": "Exists",
        "operand": {"type": "List", "element": []},
    }));
    assert_eq!(empty, CqlValue::Boolean(false));
}

fn observation(id: &str, code: &str, effective: &str, value: i64) -> CqlValue {
    CqlValue::Resource(CqlResource::new(
        "Observation",
        json!({
            "resourceType": "Observation",
            "id": id,
            "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
            "effectiveDateTime": effective,
            "value": value,
        }),
    ))
}

/// A measurement-period screening library: parameterized retrieve with
/// terminology and date filters, a query over it, and an existence check.
#[test]
fn screening_library_end_to_end() {
    let provider = InMemoryRetrieve::new().with_resources(
        "Observation",
        vec![
            observation("o1", "8480-6", "2024-03-15", 150),
            observation("o2", "8480-6", "2023-06-01", 180),
            observation("o3", "1234-5", "2024-05-01", 200),
            observation("o4", "8480-6", "2024-06-01", 120),
        ],
    );
    let terminology = InMemoryTerminology::new()
        .with_value_set("vs-bp", vec![CqlCode::new("8480-6", "http://loinc.org")]);

    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Screening", "version": "1.0.0"},
        "parameters": {"def": [
            {"name": "MeasurementPeriod", "default": {
                "type": "Interval",
                "low": date_lit("2024-01-01"),
                "lowClosed": true,
                "high": date_lit("2024-12-31"),
                "highClosed": true,
            }},
        ]},
        "valueSets": {"def": [{"name": "Systolic BP", "id": "vs-bp"}]},
        "statements": {"def": [
            {"name": "Period Observations", "expression": {
                "type": "Retrieve",
                "dataType": "{http://hl7.org/fhir}Observation",
                "codeProperty": "code",
                "codes": {"type": "ValueSetRef", "name": "Systolic BP"},
                "dateProperty": "effectiveDateTime",
                "dateRange": {"type": "ParameterRef", "name": "MeasurementPeriod"},
            }},
            {"name": "High Readings", "expression": {
                "type": "Query",
                "source": [{"alias": "O", "expression": {
                    "type": "ExpressionRef", "name": "Period Observations",
                }}],
                "where": {"type": "Greater", "operand": [
                    {"type": "Property", "path": "value", "scope": "O"},
                    int_lit(140),
                ]},
                "return": {"expression": {"type": "Property", "path": "id", "scope": "O"}},
            }},
            {"name": "Has High Reading", "expression": {
                "type": "Exists",
                "operand": {"type": "ExpressionRef", "name": "High Readings"},
            }},
        ]}
    })));
    let mut ctx = EvaluationContext::new()
        .with_terminology(Arc::new(terminology))
        .with_retriever(Arc::new(provider));
    let result = engine.evaluate_library(&mut ctx).unwrap();

    // o2 falls outside the period, o3 is not a BP code.
    match result.value("Period Observations") {
        Some(CqlValue::List(list)) => assert_eq!(list.len(), 2),
        other => panic!("expected a list of observations, got {other:?}"),
    }
    assert_eq!(
        result.value("High Readings"),
        Some(&CqlValue::list(vec![CqlValue::string("o1")])),
    );
    assert_eq!(result.value("Has High Reading"), Some(&CqlValue::Boolean(true)));
}
