//! Operator implementations, organized by category:
//! - Arithmetic (Add, Divide, Round, boundaries)
//! - Comparison (Equal, Equivalent, orderings)
//! - Logical (three-valued And, Or, Not)
//! - String (Concatenate, Split, Matches)
//! - Date and time (component constructors, DurationBetween)
//! - Interval (membership, Allen relations, Collapse)
//! - List (membership, Sort, Distinct)
//! - Aggregates (Sum, Median, StdDev)
//! - Type operations (As, Is, the To* conversions)
//! - Clinical (terminology membership, CalculateAge)
//!
//! Operators on the generic unary/binary/n-ary node shapes live in each
//! module's `register` function and dispatch through the registry; nodes
//! with their own shape are methods on the engine.

pub mod arithmetic;
pub mod comparison;
pub mod logical;
pub mod string;
pub mod datetime;
pub mod interval;
pub mod list;
pub mod aggregate;
pub mod type_ops;
pub mod clinical;
