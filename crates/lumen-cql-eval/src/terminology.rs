//! Terminology services
//!
//! `InValueSet`, `InCodeSystem`, and value set expansion delegate to a
//! [`TerminologyProvider`]. The engine ships an in-memory provider for
//! tests and small deployments; real deployments implement the trait over
//! their terminology server.

use std::collections::HashMap;

use lumen_cql_types::{CqlCode, CqlVocabularyRef};

use crate::error::{EvalError, EvalResult};

/// Code membership and expansion service.
pub trait TerminologyProvider: Send + Sync {
    /// Whether `code` is a member of the referenced value set.
    fn in_value_set(&self, code: &CqlCode, value_set: &CqlVocabularyRef) -> EvalResult<bool>;

    /// All codes of the referenced value set.
    fn expand_value_set(&self, value_set: &CqlVocabularyRef) -> EvalResult<Vec<CqlCode>>;

    /// Whether `code` belongs to the referenced code system. The default
    /// compares the code's declared system against the reference id, which
    /// is sufficient without a terminology server.
    fn in_code_system(&self, code: &CqlCode, code_system: &CqlVocabularyRef) -> EvalResult<bool> {
        Ok(code.system.as_deref() == Some(code_system.id.as_str()))
    }
}

/// Value sets held as explicit code lists, keyed by id.
///
/// Lookups ignore the version of the reference; an entry per id is assumed
/// to be the resolved version.
#[derive(Debug, Default)]
pub struct InMemoryTerminology {
    value_sets: HashMap<String, Vec<CqlCode>>,
}

impl InMemoryTerminology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value_set(mut self, id: impl Into<String>, codes: Vec<CqlCode>) -> Self {
        self.add_value_set(id, codes);
        self
    }

    pub fn add_value_set(&mut self, id: impl Into<String>, codes: Vec<CqlCode>) {
        self.value_sets.insert(id.into(), codes);
    }

    fn codes(&self, value_set: &CqlVocabularyRef) -> EvalResult<&[CqlCode]> {
        self.value_sets
            .get(&value_set.id)
            .map(Vec::as_slice)
            .ok_or_else(|| EvalError::ValueSetNotFound {
                id: value_set.id.clone(),
            })
    }
}

impl TerminologyProvider for InMemoryTerminology {
    fn in_value_set(&self, code: &CqlCode, value_set: &CqlVocabularyRef) -> EvalResult<bool> {
        Ok(self.codes(value_set)?.iter().any(|c| c.is_equivalent(code)))
    }

    fn expand_value_set(&self, value_set: &CqlVocabularyRef) -> EvalResult<Vec<CqlCode>> {
        Ok(self.codes(value_set)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loinc(code: &str) -> CqlCode {
        CqlCode::new(code, "http://loinc.org")
    }

    #[test]
    fn membership_matches_on_code_and_system() {
        let provider = InMemoryTerminology::new()
            .with_value_set("http://example.org/vs/bp", vec![loinc("8480-6"), loinc("8462-4")]);
        let vs = CqlVocabularyRef::new("http://example.org/vs/bp");

        assert!(provider.in_value_set(&loinc("8480-6"), &vs).unwrap());
        assert!(!provider.in_value_set(&loinc("1234-5"), &vs).unwrap());

        let other_system = CqlCode::new("8480-6", "http://snomed.info/sct");
        assert!(!provider.in_value_set(&other_system, &vs).unwrap());
    }

    #[test]
    fn unknown_value_set_is_an_error() {
        let provider = InMemoryTerminology::new();
        let vs = CqlVocabularyRef::new("http://example.org/vs/missing");
        let err = provider.in_value_set(&loinc("8480-6"), &vs).unwrap_err();
        assert_eq!(
            err,
            EvalError::ValueSetNotFound {
                id: "http://example.org/vs/missing".to_string()
            }
        );
    }

    #[test]
    fn expansion_returns_the_stored_codes() {
        let provider = InMemoryTerminology::new()
            .with_value_set("http://example.org/vs/bp", vec![loinc("8480-6")]);
        let vs = CqlVocabularyRef::new("http://example.org/vs/bp");
        let codes = provider.expand_value_set(&vs).unwrap();
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].code, "8480-6");
    }

    #[test]
    fn code_system_membership_defaults_to_system_match() {
        let provider = InMemoryTerminology::new();
        let cs = CqlVocabularyRef::new("http://loinc.org");
        assert!(provider.in_code_system(&loinc("8480-6"), &cs).unwrap());

        let snomed = CqlCode::new("22298006", "http://snomed.info/sct");
        assert!(!provider.in_code_system(&snomed, &cs).unwrap());
    }
}
