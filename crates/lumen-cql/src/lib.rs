//! Clinical Quality Language (CQL) evaluation for Rust
//!
//! This crate evaluates compiled CQL libraries in ELM JSON form:
//! - Typed ELM expression model with serde loading
//! - CQL runtime values: dates and times with partial precision, decimals,
//!   quantities with UCUM units, intervals, lists, tuples, clinical codes
//! - Three-valued logic, interval algebra, and the CQL operator library
//! - Queries over retrieved clinical resources with terminology filtering
//! - Per-definition results with locators, emitted messages, and an
//!   optional execution trace
//!
//! # Example
//!
//! ```ignore
//! use lumen_cql::{CqlEngine, EvaluationContext};
//!
//! let library = serde_json::from_str(elm_json)?;
//! let engine = CqlEngine::new(library);
//! let mut ctx = EvaluationContext::new();
//! let result = engine.evaluate_library(&mut ctx)?;
//!
//! for definition in &result.definitions {
//!     println!("{} = {}", definition.name, definition.value);
//! }
//! ```

// Re-export the member crates under stable module names
pub use lumen_cql_ast as ast;
pub use lumen_cql_eval as eval;
pub use lumen_cql_types as types;

// Convenience re-exports
pub use lumen_cql_ast::{Expression, Library};
pub use lumen_cql_eval::{
    CqlEngine, EvalError, EvalResult, EvaluationContext, LibraryResult,
};
pub use lumen_cql_types::CqlValue;
