//! Data retrieval
//!
//! `Retrieve` expressions ask a [`RetrieveProvider`] for the candidate
//! resources of a data type; code and date range filtering is applied by
//! the engine afterwards, so providers only need to answer "everything of
//! this type for this context".

use std::collections::HashMap;

use lumen_cql_types::{CqlCode, CqlValue};

use crate::error::EvalResult;

/// Source of clinical data for `Retrieve` expressions.
pub trait RetrieveProvider: Send + Sync {
    /// Candidate resources of `data_type` for the active context value.
    fn retrieve(
        &self,
        context: Option<&str>,
        context_value: Option<&CqlValue>,
        data_type: &str,
        template_id: Option<&str>,
    ) -> EvalResult<Vec<CqlValue>>;
}

/// Resources held in memory, keyed by data type. Context is ignored; the
/// store is assumed to hold a single context's worth of data.
#[derive(Debug, Default)]
pub struct InMemoryRetrieve {
    resources: HashMap<String, Vec<CqlValue>>,
}

impl InMemoryRetrieve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(mut self, data_type: impl Into<String>, values: Vec<CqlValue>) -> Self {
        self.add_resources(data_type, values);
        self
    }

    pub fn add_resources(&mut self, data_type: impl Into<String>, values: Vec<CqlValue>) {
        self.resources.entry(data_type.into()).or_default().extend(values);
    }
}

impl RetrieveProvider for InMemoryRetrieve {
    fn retrieve(
        &self,
        _context: Option<&str>,
        _context_value: Option<&CqlValue>,
        data_type: &str,
        _template_id: Option<&str>,
    ) -> EvalResult<Vec<CqlValue>> {
        Ok(self.resources.get(data_type).cloned().unwrap_or_default())
    }
}

/// Flatten a value into the codes it carries, for code-filtered retrieves.
///
/// Tuple shapes cover resource properties that have not been lifted into
/// code values yet: a tuple with a `code` string reads as a coding, and a
/// tuple with a `coding` list reads as a codeable concept.
pub fn extract_codes(value: &CqlValue) -> Vec<CqlCode> {
    match value {
        CqlValue::Code(code) => vec![code.clone()],
        CqlValue::Concept(concept) => concept.codes.to_vec(),
        CqlValue::List(list) => list.elements.iter().flat_map(extract_codes).collect(),
        CqlValue::Tuple(tuple) => {
            if let Some(CqlValue::String(code)) = tuple.get("code") {
                vec![CqlCode {
                    code: code.clone(),
                    system: tuple_string(tuple.get("system")),
                    version: tuple_string(tuple.get("version")),
                    display: tuple_string(tuple.get("display")),
                }]
            } else if let Some(coding) = tuple.get("coding") {
                extract_codes(coding)
            } else {
                vec![]
            }
        }
        _ => vec![],
    }
}

fn tuple_string(value: Option<&CqlValue>) -> Option<String> {
    match value {
        Some(CqlValue::String(text)) => Some(text.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_cql_types::{CqlConcept, CqlTuple};

    #[test]
    fn in_memory_store_answers_by_type() {
        let provider = InMemoryRetrieve::new().with_resources(
            "Observation",
            vec![CqlValue::string("obs-1"), CqlValue::string("obs-2")],
        );

        let found = provider.retrieve(None, None, "Observation", None).unwrap();
        assert_eq!(found.len(), 2);

        let none = provider.retrieve(None, None, "Condition", None).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn codes_extract_from_tuple_shaped_properties() {
        let coding = CqlValue::Tuple(CqlTuple::from_elements([
            ("system", CqlValue::string("http://loinc.org")),
            ("code", CqlValue::string("8480-6")),
        ]));
        let concept = CqlValue::Tuple(CqlTuple::from_elements([
            ("coding", CqlValue::list(vec![coding])),
            ("text", CqlValue::string("Systolic BP")),
        ]));

        let codes = extract_codes(&concept);
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].code, "8480-6");
        assert_eq!(codes[0].system.as_deref(), Some("http://loinc.org"));
    }

    #[test]
    fn codes_flatten_from_concepts_and_lists() {
        let concept = CqlConcept::from_code(CqlCode::new("8480-6", "http://loinc.org"));
        let value = CqlValue::list(vec![
            CqlValue::Concept(concept),
            CqlValue::Code(CqlCode::new("8462-4", "http://loinc.org")),
        ]);

        let codes = extract_codes(&value);
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].code, "8480-6");
        assert_eq!(codes[1].code, "8462-4");
    }
}
