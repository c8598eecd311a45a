//! ELM (Expression Logical Model) structures for compiled CQL libraries
//!
//! This crate defines the closed expression model the evaluator walks. The
//! structures deserialize from ELM JSON as produced by the reference
//! translator; fields the evaluator has no use for (narrative annotations,
//! signature hints) are ignored during deserialization.

pub mod model;

pub use model::*;
