//! Operator registry
//!
//! Operators sharing the generic unary/binary/n-ary node shapes dispatch
//! through this table instead of hand-written type matches in the engine.
//! The table is built once, before any evaluation, and never mutated
//! afterwards; every evaluation run reads the same registry.
//!
//! Lookup works on the operand types of the evaluated values. A signature
//! accepts an operand when the types are equal, when either side is `Any`
//! (null evaluates to `Any`), or when the operand is a subtype of the
//! declared type. Among accepting overloads the most exact one wins, with
//! registration order breaking ties. No accepting overload means the table
//! is missing a combination a translated document can produce, which is an
//! engine defect, not a problem in the evaluated logic.

use std::collections::HashMap;

use lumen_cql_types::{CqlType, CqlValue};
use once_cell::sync::Lazy;

use crate::context::EvaluationContext;
use crate::error::{EvalError, EvalResult};

/// Implementation of a unary operator.
pub type UnaryOpFn = fn(&EvaluationContext, &CqlValue) -> EvalResult<CqlValue>;

/// Implementation of a binary operator.
pub type BinaryOpFn = fn(&EvaluationContext, &CqlValue, &CqlValue) -> EvalResult<CqlValue>;

/// Implementation of an operator over an argument list.
pub type NaryOpFn = fn(&EvaluationContext, &[CqlValue]) -> EvalResult<CqlValue>;

/// Implementation of an aggregate over a materialized source list.
pub type AggregateOpFn = fn(&EvaluationContext, &[CqlValue]) -> EvalResult<CqlValue>;

/// Declared operand and result types of one overload.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSignature {
    pub operands: Vec<CqlType>,
    pub result: CqlType,
}

impl OperatorSignature {
    pub fn unary(operand: CqlType, result: CqlType) -> Self {
        Self {
            operands: vec![operand],
            result,
        }
    }

    pub fn binary(left: CqlType, right: CqlType, result: CqlType) -> Self {
        Self {
            operands: vec![left, right],
            result,
        }
    }

    fn accepts(&self, actual: &[CqlType]) -> bool {
        self.operands.len() == actual.len()
            && self
                .operands
                .iter()
                .zip(actual)
                .all(|(expected, actual)| position_accepts(expected, actual))
    }

    fn exactness(&self, actual: &[CqlType]) -> usize {
        self.operands
            .iter()
            .zip(actual)
            .map(|(expected, actual)| position_score(expected, actual))
            .sum()
    }
}

fn position_accepts(expected: &CqlType, actual: &CqlType) -> bool {
    if expected == actual {
        return true;
    }
    match (expected, actual) {
        (CqlType::Any, _) | (_, CqlType::Any) => true,
        (CqlType::List(e), CqlType::List(a)) | (CqlType::Interval(e), CqlType::Interval(a)) => {
            position_accepts(e, a)
        }
        _ => actual.is_subtype_of(expected),
    }
}

/// 2 for an exact type, 1 for a structural or promoted match, 0 for a
/// wildcard. Summed per overload to rank candidates.
fn position_score(expected: &CqlType, actual: &CqlType) -> usize {
    if expected == actual {
        2
    } else if matches!(
        (expected, actual),
        (CqlType::List(_), CqlType::List(_)) | (CqlType::Interval(_), CqlType::Interval(_))
    ) {
        1
    } else if matches!(expected, CqlType::Any) || matches!(actual, CqlType::Any) {
        0
    } else {
        1
    }
}

fn select<F: Copy>(overloads: &[(OperatorSignature, F)], actual: &[CqlType]) -> Option<F> {
    let mut best: Option<(usize, F)> = None;
    for (signature, implementation) in overloads {
        if !signature.accepts(actual) {
            continue;
        }
        let score = signature.exactness(actual);
        // Strict comparison keeps the earliest registration on ties
        match best {
            Some((best_score, _)) if best_score >= score => {}
            _ => best = Some((score, *implementation)),
        }
    }
    best.map(|(_, implementation)| implementation)
}

/// Dispatch table for the shared-shape operators.
pub struct OperatorRegistry {
    unary: HashMap<&'static str, Vec<(OperatorSignature, UnaryOpFn)>>,
    binary: HashMap<&'static str, Vec<(OperatorSignature, BinaryOpFn)>>,
    nary: HashMap<&'static str, NaryOpFn>,
    aggregate: HashMap<&'static str, AggregateOpFn>,
}

static GLOBAL: Lazy<OperatorRegistry> = Lazy::new(OperatorRegistry::standard);

impl OperatorRegistry {
    /// The shared registry with the full standard library registered.
    pub fn global() -> &'static OperatorRegistry {
        &GLOBAL
    }

    /// All standard operators.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        crate::operators::arithmetic::register(&mut registry);
        crate::operators::comparison::register(&mut registry);
        crate::operators::logical::register(&mut registry);
        crate::operators::string::register(&mut registry);
        crate::operators::datetime::register(&mut registry);
        crate::operators::interval::register(&mut registry);
        crate::operators::list::register(&mut registry);
        crate::operators::aggregate::register(&mut registry);
        crate::operators::type_ops::register(&mut registry);
        registry
    }

    pub fn empty() -> Self {
        Self {
            unary: HashMap::new(),
            binary: HashMap::new(),
            nary: HashMap::new(),
            aggregate: HashMap::new(),
        }
    }

    pub fn register_unary(
        &mut self,
        name: &'static str,
        operand: CqlType,
        result: CqlType,
        implementation: UnaryOpFn,
    ) {
        self.unary
            .entry(name)
            .or_default()
            .push((OperatorSignature::unary(operand, result), implementation));
    }

    pub fn register_binary(
        &mut self,
        name: &'static str,
        left: CqlType,
        right: CqlType,
        result: CqlType,
        implementation: BinaryOpFn,
    ) {
        self.binary
            .entry(name)
            .or_default()
            .push((OperatorSignature::binary(left, right, result), implementation));
    }

    pub fn register_nary(&mut self, name: &'static str, implementation: NaryOpFn) {
        self.nary.insert(name, implementation);
    }

    pub fn register_aggregate(&mut self, name: &'static str, implementation: AggregateOpFn) {
        self.aggregate.insert(name, implementation);
    }

    pub fn unary(&self, name: &str, operand: &CqlType) -> EvalResult<UnaryOpFn> {
        self.unary
            .get(name)
            .and_then(|overloads| select(overloads, std::slice::from_ref(operand)))
            .ok_or_else(|| EvalError::no_overload(name, std::slice::from_ref(operand)))
    }

    pub fn binary(&self, name: &str, left: &CqlType, right: &CqlType) -> EvalResult<BinaryOpFn> {
        let actual = [left.clone(), right.clone()];
        self.binary
            .get(name)
            .and_then(|overloads| select(overloads, &actual))
            .ok_or_else(|| EvalError::no_overload(name, &actual))
    }

    pub fn nary(&self, name: &str) -> EvalResult<NaryOpFn> {
        self.nary
            .get(name)
            .copied()
            .ok_or_else(|| EvalError::no_overload(name, &[]))
    }

    pub fn aggregate(&self, name: &str) -> EvalResult<AggregateOpFn> {
        self.aggregate
            .get(name)
            .copied()
            .ok_or_else(|| EvalError::no_overload(name, &[]))
    }

    /// Declared overloads for an operator name, across arities.
    pub fn overloads(&self, name: &str) -> Vec<&OperatorSignature> {
        let unary = self
            .unary
            .get(name)
            .into_iter()
            .flatten()
            .map(|(signature, _)| signature);
        let binary = self
            .binary
            .get(name)
            .into_iter()
            .flatten()
            .map(|(signature, _)| signature);
        unary.chain(binary).collect()
    }
}
