//! Evaluation context
//!
//! All per-run state lives here: the fixed evaluation timestamp, supplied
//! parameter values, the active context value, the lexical scope stack for
//! queries and function calls, collected messages, and the collaborator
//! services. The engine itself stays immutable across runs; one context is
//! one evaluation.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use lumen_cql_types::{CqlDate, CqlDateTime, CqlTime, CqlValue};

use crate::error::{EvalError, EvalResult};
use crate::retrieve::{InMemoryRetrieve, RetrieveProvider};
use crate::terminology::{InMemoryTerminology, TerminologyProvider};
use crate::trace::EvalTrace;
use crate::units::{UcumConverter, UnitConverter};

/// Expression nesting bound. Deep enough for any translated library;
/// shallow enough to fail before the thread stack does.
pub const MAX_EVAL_DEPTH: usize = 512;

/// One lexical scope: query aliases, let bindings, function operands.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    bindings: HashMap<String, CqlValue>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(name: impl Into<String>, value: CqlValue) -> Self {
        let mut scope = Self::new();
        scope.bind(name, value);
        scope
    }

    pub fn bind(&mut self, name: impl Into<String>, value: CqlValue) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.bindings.get(name)
    }
}

/// Severity of an emitted `Message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Trace,
    Message,
    Warning,
    Error,
}

impl FromStr for MessageSeverity {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "message" => Ok(Self::Message),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(EvalError::invalid_operand(
                "Message",
                format!("unknown severity '{other}'"),
            )),
        }
    }
}

/// A message emitted during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedMessage {
    pub severity: MessageSeverity,
    pub code: Option<String>,
    pub text: String,
}

/// Mutable state for one evaluation run.
pub struct EvaluationContext {
    now: CqlDateTime,
    parameters: HashMap<String, CqlValue>,
    pub(crate) parameter_cache: HashMap<String, CqlValue>,
    pub(crate) definition_cache: HashMap<(String, String), CqlValue>,
    context_name: Option<String>,
    context_value: Option<CqlValue>,
    scopes: Vec<Scope>,
    pub(crate) depth: usize,
    messages: Vec<EmittedMessage>,
    trace: Option<EvalTrace>,
    terminology: Arc<dyn TerminologyProvider>,
    retriever: Arc<dyn RetrieveProvider>,
    units: Arc<dyn UnitConverter>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationContext {
    /// A context stamped with the current wall clock. The timestamp never
    /// changes afterwards; `Now()` is stable across one run.
    pub fn new() -> Self {
        Self::at(CqlDateTime::from_chrono(chrono::Local::now().fixed_offset()))
    }

    /// A context with an injected evaluation timestamp.
    pub fn at(now: CqlDateTime) -> Self {
        Self {
            now,
            parameters: HashMap::new(),
            parameter_cache: HashMap::new(),
            definition_cache: HashMap::new(),
            context_name: None,
            context_value: None,
            scopes: Vec::new(),
            depth: 0,
            messages: Vec::new(),
            trace: None,
            terminology: Arc::new(InMemoryTerminology::new()),
            retriever: Arc::new(InMemoryRetrieve::new()),
            units: Arc::new(UcumConverter),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: CqlValue) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn with_context_value(mut self, name: impl Into<String>, value: CqlValue) -> Self {
        self.context_name = Some(name.into());
        self.context_value = Some(value);
        self
    }

    pub fn with_terminology(mut self, provider: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = provider;
        self
    }

    pub fn with_retriever(mut self, provider: Arc<dyn RetrieveProvider>) -> Self {
        self.retriever = provider;
        self
    }

    pub fn with_units(mut self, converter: Arc<dyn UnitConverter>) -> Self {
        self.units = converter;
        self
    }

    /// Capture a per-node trace for this run.
    pub fn with_tracing(mut self) -> Self {
        self.trace = Some(EvalTrace::new());
        self
    }

    // --- fixed timestamp ---

    pub fn now(&self) -> &CqlDateTime {
        &self.now
    }

    pub fn today(&self) -> CqlDate {
        self.now.date()
    }

    pub fn time_of_day(&self) -> Option<CqlTime> {
        self.now.time()
    }

    // --- parameters and context ---

    pub fn set_parameter(&mut self, name: impl Into<String>, value: CqlValue) {
        self.parameters.insert(name.into(), value);
    }

    /// A parameter value supplied by the caller, if any. Declared defaults
    /// are the engine's concern.
    pub fn supplied_parameter(&self, name: &str) -> Option<&CqlValue> {
        self.parameters.get(name)
    }

    pub fn context_name(&self) -> Option<&str> {
        self.context_name.as_deref()
    }

    pub fn context_value(&self) -> Option<&CqlValue> {
        self.context_value.as_ref()
    }

    // --- scope stack ---

    /// Run `f` with `scope` pushed. The scope pops when `f` returns, on
    /// the error path included.
    pub fn with_scope<T>(&mut self, scope: Scope, f: impl FnOnce(&mut Self) -> T) -> T {
        self.scopes.push(scope);
        let result = f(self);
        self.scopes.pop();
        result
    }

    /// Bind a name in the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, value: CqlValue) {
        match self.scopes.last_mut() {
            Some(scope) => scope.bind(name, value),
            None => self.scopes.push(Scope::with(name, value)),
        }
    }

    /// Innermost binding for `name`, searching outward.
    pub fn lookup(&self, name: &str) -> Option<&CqlValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // --- depth guard ---

    pub(crate) fn enter(&mut self) -> EvalResult<()> {
        self.depth += 1;
        if self.depth > MAX_EVAL_DEPTH {
            self.depth -= 1;
            return Err(EvalError::RecursionLimit);
        }
        Ok(())
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // --- messages ---

    pub fn push_message(&mut self, message: EmittedMessage) {
        match message.severity {
            MessageSeverity::Trace => log::trace!("{}", message.text),
            MessageSeverity::Message => log::info!("{}", message.text),
            MessageSeverity::Warning => log::warn!("{}", message.text),
            MessageSeverity::Error => log::error!("{}", message.text),
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[EmittedMessage] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<EmittedMessage> {
        std::mem::take(&mut self.messages)
    }

    // --- trace ---

    pub fn tracing_enabled(&self) -> bool {
        self.trace.is_some()
    }

    pub(crate) fn trace_mut(&mut self) -> Option<&mut EvalTrace> {
        self.trace.as_mut()
    }

    pub fn trace(&self) -> Option<&EvalTrace> {
        self.trace.as_ref()
    }

    pub fn take_trace(&mut self) -> Option<EvalTrace> {
        self.trace.take()
    }

    // --- collaborators ---

    pub fn terminology(&self) -> &dyn TerminologyProvider {
        self.terminology.as_ref()
    }

    pub fn retriever(&self) -> &dyn RetrieveProvider {
        self.retriever.as_ref()
    }

    pub fn units(&self) -> &dyn UnitConverter {
        self.units.as_ref()
    }
}
