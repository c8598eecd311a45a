//! Library evaluation results
//!
//! [`LibraryResult`] is the value side of a whole-library run: every
//! public definition with its value and source locator, plus the messages
//! and the optional trace the run produced. The context is left reusable;
//! the result owns what callers need for reporting.

use indexmap::IndexMap;

use lumen_cql_types::CqlValue;

use crate::context::EmittedMessage;
use crate::trace::EvalTrace;

/// One evaluated expression definition.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionResult {
    pub name: String,
    pub value: CqlValue,
    /// Source range of the defining expression, when the ELM carried one.
    pub locator: Option<String>,
}

/// Every public definition of a library, in declaration order.
#[derive(Debug, Clone)]
pub struct LibraryResult {
    /// Identifier of the evaluated library.
    pub library: String,
    pub version: Option<String>,
    pub definitions: Vec<DefinitionResult>,
    /// Messages the run emitted, oldest first.
    pub messages: Vec<EmittedMessage>,
    /// Node-by-node provenance, populated when tracing was enabled.
    pub trace: Option<EvalTrace>,
}

impl LibraryResult {
    /// The value of a definition by name.
    pub fn value(&self, name: &str) -> Option<&CqlValue> {
        self.definitions
            .iter()
            .find(|def| def.name == name)
            .map(|def| &def.value)
    }

    /// Definition values as a name-keyed map, in declaration order.
    pub fn into_values(self) -> IndexMap<String, CqlValue> {
        self.definitions
            .into_iter()
            .map(|def| (def.name, def.value))
            .collect()
    }
}
