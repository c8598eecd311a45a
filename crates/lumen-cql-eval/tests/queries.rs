//! Whole-library evaluation through the public API: definitions, parameters,
//! functions, includes, retrieval, messages, and tracing.

use std::sync::Arc;

use lumen_cql_ast::Library;
use lumen_cql_eval::{
    CqlEngine, EvaluationContext, InMemoryRetrieve, InMemoryTerminology, MessageSeverity,
    StaticLibraryResolver,
};
use lumen_cql_types::{CqlCode, CqlResource, CqlValue};
use pretty_assertions::assert_eq;
use serde_json::json;

fn library(source: serde_json::Value) -> Library {
    serde_json::from_value(source).unwrap()
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

fn observation(id: &str, code: &str, effective: &str) -> CqlValue {
    CqlValue::Resource(CqlResource::new(
        "Observation",
        json!({
            "resourceType": "Observation",
            "id": id,
            "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
            "effectiveDateTime": effective,
        }),
    ))
}

#[test]
fn library_results_keep_declaration_order_and_locators() {
    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Demo", "version": "2.1.0"},
        "statements": {"def": [
            {"name": "First", "expression": {
                "type": "Literal",
                "valueType": "{urn:hl7-org:elm-types:r1}Integer",
                "value": "1",
                "locator": "5:3-5:20",
            }},
            {"name": "Second", "expression": {
                "type": "Add", "operand": [int_lit(2), int_lit(3)],
            }},
        ]}
    })));
    let mut ctx = EvaluationContext::new();
    let result = engine.evaluate_library(&mut ctx).unwrap();

    assert_eq!(result.library, "Demo");
    assert_eq!(result.version.as_deref(), Some("2.1.0"));
    let names: Vec<_> = result.definitions.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["First", "Second"]);
    assert_eq!(result.value("Second"), Some(&CqlValue::Integer(5)));
    assert_eq!(result.definitions[0].locator.as_deref(), Some("5:3-5:20"));
    assert!(result.messages.is_empty());
    assert!(result.trace.is_none());
}

#[test]
fn private_definitions_evaluate_but_stay_out_of_results() {
    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Hidden"},
        "statements": {"def": [
            {"name": "Secret", "accessLevel": "Private", "expression": int_lit(21)},
            {"name": "Shown", "expression": {
                "type": "Multiply",
                "operand": [{"type": "ExpressionRef", "name": "Secret"}, int_lit(2)],
            }},
        ]}
    })));
    let mut ctx = EvaluationContext::new();
    let result = engine.evaluate_library(&mut ctx).unwrap();

    assert_eq!(result.value("Secret"), None);
    assert_eq!(result.value("Shown"), Some(&CqlValue::Integer(42)));
}

#[test]
fn parameters_prefer_supplied_values_over_defaults() {
    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Params"},
        "parameters": {"def": [
            {"name": "Threshold", "default": int_lit(5)},
            {"name": "Window", "default": int_lit(30)},
        ]},
        "statements": {"def": [
            {"name": "UsesThreshold", "expression": {"type": "ParameterRef", "name": "Threshold"}},
            {"name": "UsesWindow", "expression": {"type": "ParameterRef", "name": "Window"}},
        ]}
    })));
    let mut ctx = EvaluationContext::new().with_parameter("Threshold", CqlValue::Integer(12));
    let result = engine.evaluate_library(&mut ctx).unwrap();

    assert_eq!(result.value("UsesThreshold"), Some(&CqlValue::Integer(12)));
    assert_eq!(result.value("UsesWindow"), Some(&CqlValue::Integer(30)));
}

#[test]
fn functions_split_from_the_statement_array_and_apply() {
    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Fns"},
        "statements": {"def": [
            {"type": "FunctionDef", "name": "Scale",
             "operand": [{"name": "value"}, {"name": "factor"}],
             "expression": {"type": "Multiply", "operand": [
                 {"type": "OperandRef", "name": "value"},
                 {"type": "OperandRef", "name": "factor"},
             ]}},
            {"type": "ExpressionDef", "name": "Scaled",
             "expression": {"type": "FunctionRef", "name": "Scale",
                            "operand": [int_lit(6), int_lit(7)]}},
        ]}
    })));
    let mut ctx = EvaluationContext::new();
    let result = engine.evaluate_library(&mut ctx).unwrap();

    // The function itself is not a definition result.
    let names: Vec<_> = result.definitions.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["Scaled"]);
    assert_eq!(result.value("Scaled"), Some(&CqlValue::Integer(42)));
}

#[test]
fn included_definitions_resolve_by_local_alias() {
    let common = library(json!({
        "identifier": {"id": "CommonLib", "version": "1.0.0"},
        "statements": {"def": [
            {"name": "Base", "expression": int_lit(2)},
        ]}
    }));
    let resolver = StaticLibraryResolver::new().with_library(common);

    let main = library(json!({
        "identifier": {"id": "Main"},
        "includes": {"def": [
            {"localIdentifier": "Common", "path": "CommonLib", "version": "1.0.0"},
        ]},
        "statements": {"def": [
            {"name": "Derived", "expression": {"type": "Multiply", "operand": [
                {"type": "ExpressionRef", "libraryName": "Common", "name": "Base"},
                int_lit(21),
            ]}},
        ]}
    }));
    let engine = CqlEngine::with_resolver(main, &resolver).unwrap();
    let mut ctx = EvaluationContext::new();
    let result = engine.evaluate_library(&mut ctx).unwrap();

    assert_eq!(result.value("Derived"), Some(&CqlValue::Integer(42)));
}

#[test]
fn retrieves_filter_through_terminology_and_queries_project() {
    let provider = InMemoryRetrieve::new().with_resources(
        "Observation",
        vec![
            observation("r1", "8480-6", "2024-03-15"),
            observation("r2", "1234-5", "2024-06-01"),
            observation("r3", "8480-6", "2023-01-10"),
        ],
    );
    let terminology = InMemoryTerminology::new()
        .with_value_set("vs-bp", vec![CqlCode::new("8480-6", "http://loinc.org")]);

    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Retrieval"},
        "valueSets": {"def": [{"name": "BP", "id": "vs-bp"}]},
        "statements": {"def": [
            {"name": "SystolicIds", "expression": {
                "type": "Query",
                "source": [{"alias": "O", "expression": {
                    "type": "Retrieve",
                    "dataType": "{http://hl7.org/fhir}Observation",
                    "codeProperty": "code",
                    "codes": {"type": "ValueSetRef", "name": "BP"},
                }}],
                "return": {"expression": {"type": "Property", "path": "id", "scope": "O"}},
            }},
        ]}
    })));
    let mut ctx = EvaluationContext::new()
        .with_terminology(Arc::new(terminology))
        .with_retriever(Arc::new(provider));
    let result = engine.evaluate_library(&mut ctx).unwrap();

    assert_eq!(
        result.value("SystolicIds"),
        Some(&CqlValue::list(vec![
            CqlValue::string("r1"),
            CqlValue::string("r3"),
        ])),
    );
}

#[test]
fn triggered_messages_surface_in_the_result() {
    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Msgs"},
        "statements": {"def": [
            {"name": "Checked", "expression": {
                "type": "Message",
                "source": int_lit(4),
                "condition": {
                    "type": "Literal",
                    "valueType": "{urn:hl7-org:elm-types:r1}Boolean",
                    "value": "true",
                },
                "code": str_lit("low-count"),
                "severity": str_lit("Warning"),
                "message": str_lit("count below threshold"),
            }},
        ]}
    })));
    let mut ctx = EvaluationContext::new();
    let result = engine.evaluate_library(&mut ctx).unwrap();

    assert_eq!(result.value("Checked"), Some(&CqlValue::Integer(4)));
    assert_eq!(result.messages.len(), 1);
    let message = &result.messages[0];
    assert_eq!(message.severity, MessageSeverity::Warning);
    assert_eq!(message.code.as_deref(), Some("low-count"));
    assert_eq!(message.text, "count below threshold");
}

#[test]
fn tracing_collects_entries_when_enabled() {
    let engine = CqlEngine::new(library(json!({
        "identifier": {"id": "Traced"},
        "statements": {"def": [
            {"name": "Value", "expression": {
                "type": "Add", "operand": [int_lit(1), int_lit(2)],
            }},
        ]}
    })));
    let mut ctx = EvaluationContext::new().with_tracing();
    let result = engine.evaluate_library(&mut ctx).unwrap();

    assert_eq!(result.value("Value"), Some(&CqlValue::Integer(3)));
    let trace = result.trace.expect("tracing was enabled");
    assert!(trace.entries().iter().any(|entry| entry.kind == "Add"));
    assert!(trace.entries().iter().any(|entry| entry.kind == "Literal"));
}
