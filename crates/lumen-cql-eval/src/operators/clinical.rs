//! Clinical operators: terminology membership, age calculation, and the
//! Code, Concept, Quantity, and Ratio constructors.
//!
//! Membership tests go through the terminology provider. A bare String
//! code names no system, so against a value set it is matched on the
//! expansion, and against a code system the answer is unknown.

use lumen_cql_ast::{
    AnyInCodeSystemExpression, AnyInValueSetExpression, CalculateAgeAtExpression,
    CalculateAgeExpression, CodeLiteralExpression, CodeSystemRef, ConceptLiteralExpression,
    DateTimePrecision, Expression, InCodeSystemExpression, InValueSetExpression,
    QuantityExpression, RatioExpression, ValueSetRef,
};
use lumen_cql_types::{
    CqlCode, CqlConcept, CqlDateTime, CqlQuantity, CqlRatio, CqlValue, CqlVocabularyRef,
};

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::operators::comparison::default_offset;
use crate::operators::datetime::duration_between_datetimes;

impl CqlEngine {
    /// Code literal. The system reference resolves through the declaring
    /// library so the produced code carries the canonical URI, not the
    /// local name.
    pub(crate) fn eval_code_literal(&self, expr: &CodeLiteralExpression) -> EvalResult<CqlValue> {
        let system =
            self.resolve_code_system(expr.system.library_name.as_deref(), &expr.system.name)?;
        Ok(CqlValue::Code(CqlCode {
            code: expr.code.clone(),
            system: Some(system.id),
            version: system.version,
            display: expr.display.clone(),
        }))
    }

    pub(crate) fn eval_concept_literal(
        &self,
        expr: &ConceptLiteralExpression,
    ) -> EvalResult<CqlValue> {
        let mut codes = Vec::with_capacity(expr.code.len());
        for literal in &expr.code {
            let CqlValue::Code(code) = self.eval_code_literal(literal)? else {
                return Err(EvalError::internal("Code literal did not produce a Code"));
            };
            codes.push(code);
        }
        Ok(CqlValue::Concept(CqlConcept::new(
            codes,
            expr.display.clone(),
        )))
    }

    pub(crate) fn eval_quantity(&self, expr: &QuantityExpression) -> EvalResult<CqlValue> {
        Ok(CqlValue::Quantity(quantity_of(expr, "Quantity literal")?))
    }

    pub(crate) fn eval_ratio(&self, expr: &RatioExpression) -> EvalResult<CqlValue> {
        let numerator = quantity_of(&expr.numerator, "Ratio numerator")?;
        let denominator = quantity_of(&expr.denominator, "Ratio denominator")?;
        Ok(CqlValue::Ratio(CqlRatio::new(numerator, denominator)))
    }

    pub(crate) fn eval_in_code_system(
        &self,
        expr: &InCodeSystemExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.code, ctx)?;
        if operand.is_null() {
            return Ok(CqlValue::Null);
        }
        let system = self.code_system_target(
            expr.codesystem.as_ref(),
            expr.codesystem_expression.as_deref(),
            ctx,
        )?;
        code_system_membership(ctx, &operand, &system)
    }

    pub(crate) fn eval_any_in_code_system(
        &self,
        expr: &AnyInCodeSystemExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let codes = self.evaluate(&expr.codes, ctx)?;
        let system = self.code_system_target(
            expr.codesystem.as_ref(),
            expr.codesystem_expression.as_deref(),
            ctx,
        )?;
        any_membership(ctx, &codes, |ctx, code| {
            code_system_membership(ctx, code, &system)
        })
    }

    pub(crate) fn eval_in_value_set(
        &self,
        expr: &InValueSetExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.code, ctx)?;
        if operand.is_null() {
            return Ok(CqlValue::Null);
        }
        let value_set = self.value_set_target(
            expr.valueset.as_ref(),
            expr.valueset_expression.as_deref(),
            ctx,
        )?;
        value_set_membership(ctx, &operand, &value_set)
    }

    pub(crate) fn eval_any_in_value_set(
        &self,
        expr: &AnyInValueSetExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let codes = self.evaluate(&expr.codes, ctx)?;
        let value_set = self.value_set_target(
            expr.valueset.as_ref(),
            expr.valueset_expression.as_deref(),
            ctx,
        )?;
        any_membership(ctx, &codes, |ctx, code| {
            value_set_membership(ctx, code, &value_set)
        })
    }

    /// Age of a birthdate at the evaluation timestamp.
    pub(crate) fn eval_calculate_age(
        &self,
        expr: &CalculateAgeExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let birth = self.evaluate(&expr.operand, ctx)?;
        let as_of = match &birth {
            CqlValue::DateTime(_) => CqlValue::DateTime(*ctx.now()),
            _ => CqlValue::Date(ctx.today()),
        };
        age_between(
            &birth,
            &as_of,
            expr.precision,
            default_offset(ctx),
            "CalculateAge",
        )
    }

    pub(crate) fn eval_calculate_age_at(
        &self,
        expr: &CalculateAgeAtExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let [birth_expr, as_of_expr] = expr.operand.as_slice() else {
            return Err(EvalError::internal(
                "CalculateAgeAt takes a birthdate and an as-of point",
            ));
        };
        let birth = self.evaluate(birth_expr, ctx)?;
        let as_of = self.evaluate(as_of_expr, ctx)?;
        age_between(
            &birth,
            &as_of,
            expr.precision,
            default_offset(ctx),
            "CalculateAgeAt",
        )
    }

    fn code_system_target(
        &self,
        reference: Option<&CodeSystemRef>,
        expression: Option<&Expression>,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlVocabularyRef> {
        if let Some(expression) = expression {
            return match self.evaluate(expression, ctx)? {
                CqlValue::CodeSystem(vocabulary) => Ok(vocabulary),
                CqlValue::String(id) => Ok(CqlVocabularyRef::new(id)),
                other => Err(EvalError::type_mismatch(
                    "CodeSystem",
                    other.get_type().to_string(),
                )),
            };
        }
        match reference {
            Some(reference) => {
                self.resolve_code_system(reference.library_name.as_deref(), &reference.name)
            }
            None => Err(EvalError::internal("InCodeSystem names no code system")),
        }
    }

    fn value_set_target(
        &self,
        reference: Option<&ValueSetRef>,
        expression: Option<&Expression>,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlVocabularyRef> {
        if let Some(expression) = expression {
            return match self.evaluate(expression, ctx)? {
                CqlValue::ValueSet(vocabulary) => Ok(vocabulary),
                CqlValue::String(id) => Ok(CqlVocabularyRef::new(id)),
                other => Err(EvalError::type_mismatch(
                    "ValueSet",
                    other.get_type().to_string(),
                )),
            };
        }
        match reference {
            Some(reference) => {
                self.resolve_value_set(reference.library_name.as_deref(), &reference.name)
            }
            None => Err(EvalError::internal("InValueSet names no value set")),
        }
    }
}

fn quantity_of(expr: &QuantityExpression, role: &str) -> EvalResult<CqlQuantity> {
    let value = expr
        .value
        .ok_or_else(|| EvalError::internal(format!("{role} carries no value")))?;
    Ok(CqlQuantity {
        value,
        unit: expr.unit.clone(),
    })
}

fn code_system_membership(
    ctx: &EvaluationContext,
    operand: &CqlValue,
    system: &CqlVocabularyRef,
) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Code(code) => Ok(CqlValue::Boolean(
            ctx.terminology().in_code_system(code, system)?,
        )),
        CqlValue::Concept(concept) => {
            for code in &concept.codes {
                if ctx.terminology().in_code_system(code, system)? {
                    return Ok(CqlValue::Boolean(true));
                }
            }
            Ok(CqlValue::Boolean(false))
        }
        // A bare string names no system and a code system has no local
        // expansion to check it against.
        CqlValue::String(_) => Ok(CqlValue::Null),
        other => Err(EvalError::invalid_operand(
            "InCodeSystem",
            format!(
                "expected a String, Code, or Concept, found {}",
                other.get_type()
            ),
        )),
    }
}

fn value_set_membership(
    ctx: &EvaluationContext,
    operand: &CqlValue,
    value_set: &CqlVocabularyRef,
) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Code(code) => Ok(CqlValue::Boolean(
            ctx.terminology().in_value_set(code, value_set)?,
        )),
        CqlValue::Concept(concept) => {
            for code in &concept.codes {
                if ctx.terminology().in_value_set(code, value_set)? {
                    return Ok(CqlValue::Boolean(true));
                }
            }
            Ok(CqlValue::Boolean(false))
        }
        CqlValue::String(code) => {
            let expansion = ctx.terminology().expand_value_set(value_set)?;
            Ok(CqlValue::Boolean(
                expansion.iter().any(|c| c.code == *code),
            ))
        }
        other => Err(EvalError::invalid_operand(
            "InValueSet",
            format!(
                "expected a String, Code, or Concept, found {}",
                other.get_type()
            ),
        )),
    }
}

/// True when any non-null element tests as a member. A null or empty list
/// has none.
fn any_membership(
    ctx: &EvaluationContext,
    codes: &CqlValue,
    mut test: impl FnMut(&EvaluationContext, &CqlValue) -> EvalResult<CqlValue>,
) -> EvalResult<CqlValue> {
    let elements = match codes {
        CqlValue::Null => return Ok(CqlValue::Boolean(false)),
        CqlValue::List(list) => list.elements.as_slice(),
        single => std::slice::from_ref(single),
    };
    for element in elements {
        if element.is_null() {
            continue;
        }
        if test(ctx, element)? == CqlValue::Boolean(true) {
            return Ok(CqlValue::Boolean(true));
        }
    }
    Ok(CqlValue::Boolean(false))
}

fn age_between(
    birth: &CqlValue,
    as_of: &CqlValue,
    precision: DateTimePrecision,
    offset: Option<i16>,
    operator: &'static str,
) -> EvalResult<CqlValue> {
    match (birth, as_of) {
        (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(CqlValue::Null),
        (CqlValue::Date(b), CqlValue::Date(a)) => duration_between_datetimes(
            &CqlDateTime::from_date(*b),
            &CqlDateTime::from_date(*a),
            precision,
            offset,
        ),
        (CqlValue::Date(b), CqlValue::DateTime(a)) => {
            duration_between_datetimes(&CqlDateTime::from_date(*b), a, precision, offset)
        }
        (CqlValue::DateTime(b), CqlValue::Date(a)) => {
            duration_between_datetimes(b, &CqlDateTime::from_date(*a), precision, offset)
        }
        (CqlValue::DateTime(b), CqlValue::DateTime(a)) => {
            duration_between_datetimes(b, a, precision, offset)
        }
        _ => Err(EvalError::invalid_operand(
            operator,
            format!(
                "expected Date or DateTime operands, found {} and {}",
                birth.get_type(),
                as_of.get_type()
            ),
        )),
    }
}
