//! CQL expression evaluation
//!
//! This crate evaluates compiled CQL (Clinical Quality Language) libraries
//! in their ELM JSON form against in-memory data:
//!
//! - **Arithmetic**: Add, Subtract, Multiply, Divide, Power, Round, ...
//! - **Comparison**: Equal, Equivalent, Less, Greater, with three-valued
//!   null handling and precision-aware temporal comparison
//! - **Logical**: And, Or, Not, Xor, Implies over three-valued logic
//! - **Strings**: Concatenate, Split, Matches, ReplaceMatches, ...
//! - **Date/Time**: constructors, component extraction, DurationBetween,
//!   DifferenceBetween, SameAs and friends with precision ceilings
//! - **Intervals**: membership, Overlaps, Union, Except, Collapse, ...
//! - **Lists**: First, Last, IndexOf, Distinct, Flatten, Slice, ...
//! - **Aggregates**: Sum, Avg, Min, Max, Median, PopulationStdDev, ...
//! - **Queries**: multi-source iteration, let, with/without, where,
//!   return, aggregate, sort
//! - **Clinical**: retrieves, terminology membership, CalculateAge
//! - **Type operations**: As, Is, Convert and the ToXxx conversions
//!
//! # Example
//!
//! ```ignore
//! use lumen_cql_eval::{CqlEngine, EvaluationContext};
//!
//! let library = serde_json::from_str(elm_json)?;
//! let engine = CqlEngine::new(library);
//! let mut ctx = EvaluationContext::new();
//! let result = engine.evaluate_library(&mut ctx)?;
//! ```
//!
//! # Architecture
//!
//! [`CqlEngine`] owns the loaded libraries and dispatches every ELM node
//! either through the [`OperatorRegistry`] (generic unary/binary/n-ary
//! shapes) or to a dedicated method (nodes with their own shape).
//! [`EvaluationContext`] carries everything mutable during a run: the
//! evaluation timestamp, parameters, scopes, caches, emitted messages,
//! and the data/terminology/unit providers.

pub mod context;
pub mod engine;
pub mod error;
pub mod operators;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod result;
pub mod retrieve;
pub mod terminology;
pub mod trace;
pub mod units;

// Re-export main types
pub use context::{EmittedMessage, EvaluationContext, MessageSeverity, Scope};
pub use engine::CqlEngine;
pub use error::{EvalError, EvalResult};
pub use registry::OperatorRegistry;
pub use resolver::{LibraryResolver, StaticLibraryResolver};
pub use result::{DefinitionResult, LibraryResult};
pub use retrieve::{extract_codes, InMemoryRetrieve, RetrieveProvider};
pub use terminology::{InMemoryTerminology, TerminologyProvider};
pub use trace::{EvalTrace, TraceEntry};
pub use units::{UcumConverter, UnitConverter};

// Re-export commonly used operator helpers
pub use operators::comparison::{cql_compare, cql_equal, cql_equivalent};
