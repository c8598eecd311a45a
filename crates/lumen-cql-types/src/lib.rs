//! Runtime values and static types for CQL evaluation
//!
//! This crate provides the value substrate the evaluation engine operates on:
//!
//! - [`CqlValue`]: the tagged union over all CQL runtime values, with null as
//!   a distinguished state orthogonal to type
//! - [`CqlType`]: the static type descriptor hierarchy (System primitives,
//!   `List<T>`, `Interval<T>`, tuples, choice and named types)
//! - [`CqlDate`] / [`CqlDateTime`] / [`CqlTime`]: partial-precision temporal
//!   values with the precision-aware comparison kernel
//!
//! Values are immutable once constructed; composite values own their
//! elements. Temporal comparison yields [`TemporalCompare`], a five-outcome
//! result that distinguishes insufficient precision and null operands from
//! definite ordering.

pub mod temporal;
pub mod type_system;
pub mod value;

pub use temporal::{
    CqlDate, CqlDateTime, CqlTime, DateTimePrecision, TemporalCompare, ValueError, days_in_month,
};
pub use type_system::{CqlType, TupleTypeElement};
pub use value::{
    CqlCode, CqlConcept, CqlInterval, CqlList, CqlQuantity, CqlRatio, CqlResource, CqlTuple,
    CqlValue, CqlVocabularyRef,
};
