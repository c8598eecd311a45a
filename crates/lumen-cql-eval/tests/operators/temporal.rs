//! Date and time construction, arithmetic, durations, and same-as checks.

use lumen_cql_eval::EvaluationContext;
use lumen_cql_types::{CqlDate, CqlDateTime, CqlInterval, CqlValue};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::support::{binary, date_lit, datetime_lit, eval, eval_with, int_lit, null_lit, quantity};

fn date(text: &str) -> CqlValue {
    CqlValue::Date(CqlDate::parse(text).unwrap())
}

fn datetime(text: &str) -> CqlValue {
    CqlValue::DateTime(CqlDateTime::parse(text).unwrap())
}

#[test]
fn date_constructor_narrows_with_absent_components() {
    assert_eq!(
        eval(json!({"type": "Date", "year": int_lit(2024), "month": int_lit(3), "day": int_lit(15)})),
        date("2024-03-15"),
    );
    assert_eq!(eval(json!({"type": "Date", "year": int_lit(2024)})), date("2024"));
}

#[test]
fn null_components_poison_the_constructor() {
    assert_eq!(
        eval(json!({"type": "Date", "year": int_lit(2024), "month": null_lit()})),
        CqlValue::Null,
    );
}

#[test]
fn datetime_constructor_assembles_components() {
    assert_eq!(
        eval(json!({
            "type": "DateTime",
            "year": int_lit(2024),
            "month": int_lit(3),
            "day": int_lit(15),
            "hour": int_lit(10),
            "minute": int_lit(30),
        })),
        datetime("2024-03-15T10:30"),
    );
}

#[test]
fn adding_months_clamps_to_the_end_of_month() {
    assert_eq!(
        eval(binary("Add", date_lit("2024-01-31"), quantity(1.0, "month"))),
        date("2024-02-29"),
    );
}

#[test]
fn subtracting_hours_crosses_midnight() {
    assert_eq!(
        eval(binary(
            "Subtract",
            datetime_lit("2024-03-15T01:30:00+00:00"),
            quantity(2.0, "hours"),
        )),
        datetime("2024-03-14T23:30:00+00:00"),
    );
}

#[test]
fn duration_counts_whole_periods_but_difference_counts_boundaries() {
    let evening = datetime_lit("2020-03-14T23:59:00+00:00");
    let morning = datetime_lit("2020-03-15T00:01:00+00:00");
    assert_eq!(
        eval(json!({
            "type": "DurationBetween",
            "operand": [evening.clone(), morning.clone()],
            "precision": "Day",
        })),
        CqlValue::Integer(0),
    );
    assert_eq!(
        eval(json!({
            "type": "DifferenceBetween",
            "operand": [evening, morning],
            "precision": "Day",
        })),
        CqlValue::Integer(1),
    );
}

#[test]
fn duration_in_whole_years() {
    assert_eq!(
        eval(json!({
            "type": "DurationBetween",
            "operand": [date_lit("2020-01-01"), date_lit("2021-01-01")],
            "precision": "Year",
        })),
        CqlValue::Integer(1),
    );
}

#[test]
fn coarse_operands_widen_the_duration_to_an_interval() {
    assert_eq!(
        eval(json!({
            "type": "DurationBetween",
            "operand": [date_lit("2020"), date_lit("2021")],
            "precision": "Month",
        })),
        CqlValue::Interval(CqlInterval::closed(
            CqlValue::Integer(11),
            CqlValue::Integer(12),
        )),
    );
}

#[test]
fn same_as_honors_the_requested_precision() {
    assert_eq!(
        eval(json!({
            "type": "SameAs",
            "operand": [date_lit("2024-03-14"), date_lit("2024-03-20")],
            "precision": "Month",
        })),
        CqlValue::Boolean(true),
    );
    assert_eq!(
        eval(json!({
            "type": "SameAs",
            "operand": [date_lit("2024-03-14"), date_lit("2024-04-14")],
            "precision": "Month",
        })),
        CqlValue::Boolean(false),
    );
    // The left operand cannot answer at day precision.
    assert_eq!(
        eval(json!({
            "type": "SameAs",
            "operand": [date_lit("2024-03"), date_lit("2024-03-15")],
            "precision": "Day",
        })),
        CqlValue::Null,
    );
}

#[test]
fn component_extraction_reads_the_requested_field() {
    assert_eq!(
        eval(json!({
            "type": "DateTimeComponentFrom",
            "operand": datetime_lit("2024-03-15T10:30:00+00:00"),
            "precision": "Year",
        })),
        CqlValue::Integer(2024),
    );
}

#[test]
fn today_and_now_read_the_evaluation_clock() {
    let clock = CqlDateTime::parse("2024-06-15T10:30:00+00:00").unwrap();
    let mut ctx = EvaluationContext::at(clock);
    assert_eq!(eval_with(&mut ctx, json!({"type": "Today"})), date("2024-06-15"));
    assert_eq!(
        eval_with(&mut ctx, json!({"type": "Now"})),
        CqlValue::DateTime(clock),
    );
}
