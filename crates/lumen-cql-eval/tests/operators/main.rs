//! Operator behavior exercised through the full evaluation path.
//!
//! Every test here deserializes an ELM JSON fragment and runs it through
//! [`lumen_cql_eval::CqlEngine::evaluate`], so the dispatch table, the
//! overload registry, and the operator implementations are all on the hook.
//! Unit tests inside the operator modules cover the fine-grained edge
//! cases; this suite checks the seams between them.

mod support;

mod arithmetic;
mod collections;
mod comparison;
mod logical;
mod temporal;
