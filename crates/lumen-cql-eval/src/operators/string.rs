//! String operators
//!
//! Positions and lengths count characters, not bytes, so multi-byte text
//! behaves the way an author counting on screen expects. Out-of-range
//! indexes are null rather than errors; a pattern that is not a valid
//! regular expression is an error.

use lumen_cql_ast::{
    CombineExpression, LastPositionOfExpression, PositionOfExpression, SplitExpression,
    SplitOnMatchesExpression, SubstringExpression,
};
use lumen_cql_types::{CqlList, CqlType, CqlValue};
use regex::Regex;

use crate::context::EvaluationContext;
use crate::engine::CqlEngine;
use crate::error::{EvalError, EvalResult};
use crate::registry::OperatorRegistry;

pub(crate) fn register(registry: &mut OperatorRegistry) {
    registry.register_unary("Length", CqlType::String, CqlType::Integer, length);
    registry.register_unary("Upper", CqlType::String, CqlType::String, upper);
    registry.register_unary("Lower", CqlType::String, CqlType::String, lower);
    registry.register_binary("Indexer", CqlType::String, CqlType::Integer, CqlType::String, indexer);
    registry.register_binary(
        "StartsWith",
        CqlType::String,
        CqlType::String,
        CqlType::Boolean,
        starts_with,
    );
    registry.register_binary(
        "EndsWith",
        CqlType::String,
        CqlType::String,
        CqlType::Boolean,
        ends_with,
    );
    registry.register_binary(
        "Matches",
        CqlType::String,
        CqlType::String,
        CqlType::Boolean,
        matches_pattern,
    );
    registry.register_nary("Concatenate", concatenate);
    registry.register_nary("ReplaceMatches", replace_matches);
}

fn expect_string<'a>(value: &'a CqlValue, op: &'static str) -> EvalResult<&'a str> {
    match value {
        CqlValue::String(s) => Ok(s),
        other => Err(EvalError::invalid_operand(
            op,
            format!("expected String, found {}", other.get_type()),
        )),
    }
}

pub(crate) fn compile_regex(pattern: &str) -> EvalResult<Regex> {
    Regex::new(pattern).map_err(|_| EvalError::invalid_regex(pattern))
}

fn length(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    if operand.is_null() {
        return Ok(CqlValue::Null);
    }
    let s = expect_string(operand, "Length")?;
    Ok(CqlValue::Integer(s.chars().count() as i32))
}

fn upper(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    if operand.is_null() {
        return Ok(CqlValue::Null);
    }
    Ok(CqlValue::String(expect_string(operand, "Upper")?.to_uppercase()))
}

fn lower(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    if operand.is_null() {
        return Ok(CqlValue::Null);
    }
    Ok(CqlValue::String(expect_string(operand, "Lower")?.to_lowercase()))
}

fn indexer(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let s = expect_string(left, "Indexer")?;
    let index = match right {
        CqlValue::Integer(i) => *i,
        other => {
            return Err(EvalError::invalid_operand(
                "Indexer",
                format!("expected Integer index, found {}", other.get_type()),
            ));
        }
    };
    if index < 0 {
        return Ok(CqlValue::Null);
    }
    Ok(s.chars()
        .nth(index as usize)
        .map_or(CqlValue::Null, |c| CqlValue::String(c.to_string())))
}

fn starts_with(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let s = expect_string(left, "StartsWith")?;
    let prefix = expect_string(right, "StartsWith")?;
    Ok(CqlValue::Boolean(s.starts_with(prefix)))
}

fn ends_with(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let s = expect_string(left, "EndsWith")?;
    let suffix = expect_string(right, "EndsWith")?;
    Ok(CqlValue::Boolean(s.ends_with(suffix)))
}

fn matches_pattern(
    _ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let s = expect_string(left, "Matches")?;
    let pattern = expect_string(right, "Matches")?;
    Ok(CqlValue::Boolean(compile_regex(pattern)?.is_match(s)))
}

fn concatenate(_ctx: &EvaluationContext, operands: &[CqlValue]) -> EvalResult<CqlValue> {
    let mut result = String::new();
    for operand in operands {
        if operand.is_null() {
            return Ok(CqlValue::Null);
        }
        result.push_str(expect_string(operand, "Concatenate")?);
    }
    Ok(CqlValue::String(result))
}

fn replace_matches(_ctx: &EvaluationContext, operands: &[CqlValue]) -> EvalResult<CqlValue> {
    let [source, pattern, substitution] = operands else {
        return Err(EvalError::internal(format!(
            "ReplaceMatches expects 3 operands, found {}",
            operands.len()
        )));
    };
    if source.is_null() || pattern.is_null() || substitution.is_null() {
        return Ok(CqlValue::Null);
    }
    let s = expect_string(source, "ReplaceMatches")?;
    let pattern = expect_string(pattern, "ReplaceMatches")?;
    let substitution = expect_string(substitution, "ReplaceMatches")?;
    let regex = compile_regex(pattern)?;
    Ok(CqlValue::String(regex.replace_all(s, substitution).into_owned()))
}

/// 0-based character position of `needle` in `haystack`, `-1` if absent.
fn char_position(haystack: &str, needle: &str, from_end: bool) -> i32 {
    let byte_pos = if from_end {
        haystack.rfind(needle)
    } else {
        haystack.find(needle)
    };
    match byte_pos {
        Some(pos) => haystack[..pos].chars().count() as i32,
        None => -1,
    }
}

impl CqlEngine {
    pub(crate) fn eval_combine(
        &self,
        expr: &CombineExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        if source.is_null() {
            return Ok(CqlValue::Null);
        }
        let list = match source {
            CqlValue::List(list) => list,
            other => {
                return Err(EvalError::invalid_operand(
                    "Combine",
                    format!("expected List<String>, found {}", other.get_type()),
                ));
            }
        };
        let separator = match &expr.separator {
            Some(separator_expr) => match self.evaluate(separator_expr, ctx)? {
                CqlValue::Null => return Ok(CqlValue::Null),
                CqlValue::String(s) => s,
                other => {
                    return Err(EvalError::invalid_operand(
                        "Combine",
                        format!("expected String separator, found {}", other.get_type()),
                    ));
                }
            },
            None => String::new(),
        };
        // Null elements are skipped, not joined as empty strings
        let mut parts = Vec::with_capacity(list.elements.len());
        for element in &list.elements {
            match element {
                CqlValue::Null => {}
                CqlValue::String(s) => parts.push(s.as_str()),
                other => {
                    return Err(EvalError::invalid_operand(
                        "Combine",
                        format!("expected String element, found {}", other.get_type()),
                    ));
                }
            }
        }
        if parts.is_empty() {
            return Ok(CqlValue::Null);
        }
        Ok(CqlValue::String(parts.join(&separator)))
    }

    pub(crate) fn eval_split(
        &self,
        expr: &SplitExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.string_to_split, ctx)?;
        if source.is_null() {
            return Ok(CqlValue::Null);
        }
        let s = expect_string(&source, "Split")?;
        let separator = match &expr.separator {
            Some(separator_expr) => match self.evaluate(separator_expr, ctx)? {
                // A null separator leaves the string unsplit
                CqlValue::Null => {
                    return Ok(CqlValue::List(CqlList::new(
                        CqlType::String,
                        vec![CqlValue::string(s)],
                    )));
                }
                CqlValue::String(sep) => sep,
                other => {
                    return Err(EvalError::invalid_operand(
                        "Split",
                        format!("expected String separator, found {}", other.get_type()),
                    ));
                }
            },
            None => String::new(),
        };
        let parts: Vec<CqlValue> = s.split(separator.as_str()).map(CqlValue::string).collect();
        Ok(CqlValue::List(CqlList::new(CqlType::String, parts)))
    }

    pub(crate) fn eval_split_on_matches(
        &self,
        expr: &SplitOnMatchesExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.string_to_split, ctx)?;
        let pattern = self.evaluate(&expr.separator_pattern, ctx)?;
        if source.is_null() || pattern.is_null() {
            return Ok(CqlValue::Null);
        }
        let s = expect_string(&source, "SplitOnMatches")?;
        let pattern = expect_string(&pattern, "SplitOnMatches")?;
        let regex = compile_regex(pattern)?;
        let parts: Vec<CqlValue> = regex.split(s).map(CqlValue::string).collect();
        Ok(CqlValue::List(CqlList::new(CqlType::String, parts)))
    }

    pub(crate) fn eval_position_of(
        &self,
        expr: &PositionOfExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let pattern = self.evaluate(&expr.pattern, ctx)?;
        let string = self.evaluate(&expr.string, ctx)?;
        if pattern.is_null() || string.is_null() {
            return Ok(CqlValue::Null);
        }
        let needle = expect_string(&pattern, "PositionOf")?;
        let haystack = expect_string(&string, "PositionOf")?;
        Ok(CqlValue::Integer(char_position(haystack, needle, false)))
    }

    pub(crate) fn eval_last_position_of(
        &self,
        expr: &LastPositionOfExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let pattern = self.evaluate(&expr.pattern, ctx)?;
        let string = self.evaluate(&expr.string, ctx)?;
        if pattern.is_null() || string.is_null() {
            return Ok(CqlValue::Null);
        }
        let needle = expect_string(&pattern, "LastPositionOf")?;
        let haystack = expect_string(&string, "LastPositionOf")?;
        Ok(CqlValue::Integer(char_position(haystack, needle, true)))
    }

    pub(crate) fn eval_substring(
        &self,
        expr: &SubstringExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.string_to_sub, ctx)?;
        let start = self.evaluate(&expr.start_index, ctx)?;
        if source.is_null() || start.is_null() {
            return Ok(CqlValue::Null);
        }
        let s = expect_string(&source, "Substring")?;
        let start = match start {
            CqlValue::Integer(i) if i >= 0 => i as usize,
            CqlValue::Integer(_) => return Ok(CqlValue::Null),
            other => {
                return Err(EvalError::invalid_operand(
                    "Substring",
                    format!("expected Integer start index, found {}", other.get_type()),
                ));
            }
        };
        let chars: Vec<char> = s.chars().collect();
        if start >= chars.len() {
            return Ok(CqlValue::Null);
        }
        let slice = match &expr.length {
            Some(length_expr) => match self.evaluate(length_expr, ctx)? {
                CqlValue::Null => return Ok(CqlValue::Null),
                CqlValue::Integer(len) if len >= 0 => {
                    let end = (start + len as usize).min(chars.len());
                    &chars[start..end]
                }
                CqlValue::Integer(_) => return Ok(CqlValue::Null),
                other => {
                    return Err(EvalError::invalid_operand(
                        "Substring",
                        format!("expected Integer length, found {}", other.get_type()),
                    ));
                }
            },
            None => &chars[start..],
        };
        Ok(CqlValue::String(slice.iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> EvaluationContext {
        EvaluationContext::at(
            lumen_cql_types::CqlDateTime::parse("2024-01-15T12:00:00.000+00:00").unwrap(),
        )
    }

    fn s(text: &str) -> CqlValue {
        CqlValue::string(text)
    }

    #[test]
    fn length_counts_characters() {
        let ctx = ctx();
        assert_eq!(length(&ctx, &s("héllo")).unwrap(), CqlValue::Integer(5));
        assert_eq!(length(&ctx, &CqlValue::Null).unwrap(), CqlValue::Null);
    }

    #[test]
    fn indexer_is_null_out_of_range() {
        let ctx = ctx();
        assert_eq!(indexer(&ctx, &s("abc"), &CqlValue::integer(1)).unwrap(), s("b"));
        assert_eq!(indexer(&ctx, &s("abc"), &CqlValue::integer(3)).unwrap(), CqlValue::Null);
        assert_eq!(indexer(&ctx, &s("abc"), &CqlValue::Integer(-1)).unwrap(), CqlValue::Null);
    }

    #[test]
    fn concatenate_propagates_null() {
        let ctx = ctx();
        assert_eq!(
            concatenate(&ctx, &[s("ab"), s("cd")]).unwrap(),
            s("abcd")
        );
        assert_eq!(
            concatenate(&ctx, &[s("ab"), CqlValue::Null]).unwrap(),
            CqlValue::Null
        );
    }

    #[test]
    fn matches_rejects_bad_patterns() {
        let ctx = ctx();
        assert_eq!(
            matches_pattern(&ctx, &s("1234"), &s("\\d+")).unwrap(),
            CqlValue::Boolean(true)
        );
        let err = matches_pattern(&ctx, &s("x"), &s("(")).unwrap_err();
        assert!(!err.is_internal());
    }

    #[test]
    fn replace_matches_substitutes_all() {
        let ctx = ctx();
        assert_eq!(
            replace_matches(&ctx, &[s("a-b-c"), s("-"), s("+")]).unwrap(),
            s("a+b+c")
        );
    }

    #[test]
    fn position_counts_characters_not_bytes() {
        assert_eq!(char_position("naïve text", "text", false), 6);
        assert_eq!(char_position("abcabc", "bc", true), 4);
        assert_eq!(char_position("abc", "z", false), -1);
    }
}
