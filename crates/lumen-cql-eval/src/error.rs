//! Evaluation errors
//!
//! Errors fall into two classes. User errors describe problems in the
//! evaluated logic or its data: an undefined reference, an overflow, a
//! regex that does not parse. Internal errors mean the engine itself is
//! broken or the document is malformed in a way a translator would never
//! produce; their messages carry an `internal error:` prefix so they are
//! recognizable in logs regardless of where they surface.

use lumen_cql_types::{CqlType, ValueError};
use thiserror::Error;

/// Result type for evaluation operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised during evaluation of a CQL library.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// Operand type the operation cannot work with
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Operand value the operation cannot work with
    #[error("Invalid operand for {operator}: {message}")]
    InvalidOperand { operator: String, message: String },

    /// Arithmetic result outside the representable range
    #[error("Arithmetic overflow in {operation}")]
    Overflow { operation: String },

    /// Undefined expression reference
    #[error("Undefined expression: {name}")]
    UndefinedExpression { name: String },

    /// Undefined function reference, or no declared overload takes the
    /// supplied arguments
    #[error("Undefined function: {name}")]
    UndefinedFunction { name: String },

    /// Reference to a parameter the library does not declare
    #[error("Undefined parameter: {name}")]
    UndefinedParameter { name: String },

    /// Identifier not bound in any enclosing scope
    #[error("Undefined identifier: {name}")]
    UndefinedIdentifier { name: String },

    /// Reference to a library the engine has not loaded
    #[error("Undefined library: {name}")]
    UndefinedLibrary { name: String },

    /// Property access on a value without that property
    #[error("Invalid property '{property}' on type {type_name}")]
    InvalidProperty { property: String, type_name: String },

    /// Interval constructed with low above high
    #[error("Invalid interval: low bound exceeds high bound")]
    InvalidInterval,

    /// Pattern that does not parse as a regular expression
    #[error("Invalid regex pattern: {pattern}")]
    InvalidRegex { pattern: String },

    /// Quantity operation across incommensurable units
    #[error("Incompatible units: '{left}' and '{right}'")]
    IncompatibleUnits { left: String, right: String },

    /// Unit string that is not valid UCUM
    #[error("Invalid UCUM unit: '{unit}'")]
    InvalidUnit { unit: String },

    /// Date, time, or quantity value outside its representable range
    #[error("Invalid temporal value: {message}")]
    InvalidTemporal { message: String },

    /// Conversion between types that has no defined result
    #[error("Cannot convert {from_type} to {to_type}")]
    ConversionError { from_type: String, to_type: String },

    /// Strict cast whose operand has a different runtime type
    #[error("Cannot cast {from_type} to {to_type}")]
    CastError { from_type: String, to_type: String },

    /// Value set reference the terminology provider does not know
    #[error("Value set not found: {id}")]
    ValueSetNotFound { id: String },

    /// Code system reference the terminology provider does not know
    #[error("Code system not found: {id}")]
    CodeSystemNotFound { id: String },

    /// Failure reported by the terminology provider
    #[error("Terminology error: {message}")]
    TerminologyError { message: String },

    /// Failure reported by the data retrieval provider
    #[error("Retrieve error: {message}")]
    RetrieveError { message: String },

    /// Malformed query clause combination
    #[error("Query error: {message}")]
    QueryError { message: String },

    /// `Message` node evaluated with Error severity
    #[error("{message}")]
    MessageRaised {
        code: Option<String>,
        message: String,
    },

    /// Expression nesting beyond the engine's depth limit
    #[error("Maximum recursion depth exceeded")]
    RecursionLimit,

    /// No registered overload accepts the operand types. The registry is
    /// populated for every type combination a translated document can
    /// produce, so reaching this is an engine defect.
    #[error("internal error: no overload of {operator} accepts ({operands})")]
    NoOverload { operator: String, operands: String },

    /// Engine invariant violated
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EvalError {
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid_operand(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperand {
            operator: operator.into(),
            message: message.into(),
        }
    }

    pub fn overflow(operation: impl Into<String>) -> Self {
        Self::Overflow {
            operation: operation.into(),
        }
    }

    pub fn undefined_expression(name: impl Into<String>) -> Self {
        Self::UndefinedExpression { name: name.into() }
    }

    pub fn undefined_function(name: impl Into<String>) -> Self {
        Self::UndefinedFunction { name: name.into() }
    }

    pub fn undefined_parameter(name: impl Into<String>) -> Self {
        Self::UndefinedParameter { name: name.into() }
    }

    pub fn undefined_identifier(name: impl Into<String>) -> Self {
        Self::UndefinedIdentifier { name: name.into() }
    }

    pub fn undefined_library(name: impl Into<String>) -> Self {
        Self::UndefinedLibrary { name: name.into() }
    }

    pub fn invalid_property(property: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::InvalidProperty {
            property: property.into(),
            type_name: type_name.into(),
        }
    }

    pub fn invalid_regex(pattern: impl Into<String>) -> Self {
        Self::InvalidRegex {
            pattern: pattern.into(),
        }
    }

    pub fn incompatible_units(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::IncompatibleUnits {
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn invalid_unit(unit: impl Into<String>) -> Self {
        Self::InvalidUnit { unit: unit.into() }
    }

    pub fn conversion_error(from_type: impl Into<String>, to_type: impl Into<String>) -> Self {
        Self::ConversionError {
            from_type: from_type.into(),
            to_type: to_type.into(),
        }
    }

    pub fn cast_error(from_type: impl Into<String>, to_type: impl Into<String>) -> Self {
        Self::CastError {
            from_type: from_type.into(),
            to_type: to_type.into(),
        }
    }

    pub fn terminology(message: impl Into<String>) -> Self {
        Self::TerminologyError {
            message: message.into(),
        }
    }

    pub fn retrieve(message: impl Into<String>) -> Self {
        Self::RetrieveError {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryError {
            message: message.into(),
        }
    }

    pub fn no_overload(operator: impl Into<String>, operands: &[CqlType]) -> Self {
        let operands = operands
            .iter()
            .map(CqlType::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self::NoOverload {
            operator: operator.into(),
            operands,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error indicates an engine defect rather than a problem
    /// in the evaluated logic.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::NoOverload { .. } | Self::Internal { .. })
    }
}

impl From<ValueError> for EvalError {
    fn from(err: ValueError) -> Self {
        Self::InvalidTemporal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_carry_the_prefix() {
        let err = EvalError::internal("registry built twice");
        assert!(err.to_string().starts_with("internal error:"));
        assert!(err.is_internal());

        let err = EvalError::no_overload("Add", &[CqlType::String, CqlType::Integer]);
        assert_eq!(
            err.to_string(),
            "internal error: no overload of Add accepts (String, Integer)"
        );
        assert!(err.is_internal());
    }

    #[test]
    fn user_errors_do_not() {
        let err = EvalError::overflow("Add");
        assert!(!err.is_internal());
        assert!(!err.to_string().starts_with("internal error:"));

        let err = EvalError::undefined_expression("InlierCount");
        assert!(!err.is_internal());
    }

    #[test]
    fn value_errors_map_to_user_errors() {
        let err: EvalError = ValueError::OutOfRange("year 10000".to_string()).into();
        assert!(!err.is_internal());
    }
}
