//! List operators
//!
//! Membership and the set-style algebra are defined by value equality and
//! run as linear scans; values are deliberately not hashable. Membership
//! follows one lattice: any matching element wins, otherwise any undecided
//! comparison (null element, insufficient precision) yields null, otherwise
//! false. `Exists` is stricter than emptiness: a null element anywhere in
//! the list voids existence.

use std::cmp::Ordering;

use lumen_cql_ast::{
    FirstLastExpression, IndexOfExpression, ListExpression, SliceExpression, SortByItem,
    SortDirection, SortExpression,
};
use lumen_cql_types::{CqlList, CqlType, CqlValue};

use crate::context::{EvaluationContext, Scope};
use crate::engine::{json_to_value, CqlEngine};
use crate::error::{EvalError, EvalResult};
use crate::operators::comparison::{cql_compare, cql_equal};
use crate::registry::OperatorRegistry;

pub(crate) fn register(registry: &mut OperatorRegistry) {
    let list_any = CqlType::list(CqlType::Any);

    registry.register_unary("Exists", list_any.clone(), CqlType::Boolean, exists);
    registry.register_unary("Flatten", list_any.clone(), list_any.clone(), flatten);
    registry.register_unary("Tail", list_any.clone(), list_any.clone(), tail);
    registry.register_unary("Distinct", list_any.clone(), list_any.clone(), distinct);
    registry.register_unary("SingletonFrom", list_any.clone(), CqlType::Any, singleton_from);
    registry.register_unary("Length", list_any.clone(), CqlType::Integer, length_of);
    registry.register_binary(
        "Indexer",
        list_any.clone(),
        CqlType::Integer,
        CqlType::Any,
        indexer,
    );

    for name in ["Contains", "Includes"] {
        registry.register_binary(name, list_any.clone(), CqlType::Any, CqlType::Boolean, contains);
    }
    for name in ["In", "IncludedIn"] {
        registry.register_binary(name, CqlType::Any, list_any.clone(), CqlType::Boolean, within);
    }
    for name in ["ProperContains", "ProperIncludes"] {
        registry.register_binary(
            name,
            list_any.clone(),
            CqlType::Any,
            CqlType::Boolean,
            proper_contains,
        );
    }
    for name in ["ProperIn", "ProperIncludedIn"] {
        registry.register_binary(
            name,
            CqlType::Any,
            list_any.clone(),
            CqlType::Boolean,
            proper_within,
        );
    }

    registry.register_binary(
        "Union",
        list_any.clone(),
        list_any.clone(),
        list_any.clone(),
        union_lists,
    );
    registry.register_binary(
        "Intersect",
        list_any.clone(),
        list_any.clone(),
        list_any.clone(),
        intersect_lists,
    );
    registry.register_binary("Except", list_any.clone(), list_any.clone(), list_any, except_lists);
}

impl CqlEngine {
    pub(crate) fn eval_list(
        &self,
        expr: &ListExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let mut elements = Vec::new();
        if let Some(element_exprs) = &expr.elements {
            elements.reserve(element_exprs.len());
            for element_expr in element_exprs {
                elements.push(self.evaluate(element_expr, ctx)?);
            }
        }
        // A declared type wins over inference, so empty and mixed lists
        // keep their translated element type.
        let list = match &expr.type_specifier {
            Some(specifier) => match specifier.to_cql_type() {
                CqlType::List(element_type) => CqlList::new(*element_type, elements),
                other => CqlList::new(other, elements),
            },
            None => CqlList::from_values(elements),
        };
        Ok(CqlValue::List(list))
    }

    pub(crate) fn eval_first(
        &self,
        expr: &FirstLastExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let list = match &source {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::List(list) => list,
            other => return Err(expected_list("First", other)),
        };
        match &expr.order_by {
            None => Ok(list.elements.first().cloned().unwrap_or(CqlValue::Null)),
            Some(path) => extreme_by_key(ctx, list, path, Ordering::Less),
        }
    }

    pub(crate) fn eval_last(
        &self,
        expr: &FirstLastExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let list = match &source {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::List(list) => list,
            other => return Err(expected_list("Last", other)),
        };
        match &expr.order_by {
            None => Ok(list.elements.last().cloned().unwrap_or(CqlValue::Null)),
            Some(path) => extreme_by_key(ctx, list, path, Ordering::Greater),
        }
    }

    pub(crate) fn eval_slice(
        &self,
        expr: &SliceExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let list = match &source {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::List(list) => list,
            other => return Err(expected_list("Slice", other)),
        };
        // A null start means the beginning, a null or absent end means the
        // whole remainder; indexes clamp rather than error.
        let start = match self.evaluate(&expr.start_index, ctx)? {
            CqlValue::Null => 0,
            CqlValue::Integer(index) => index.max(0) as usize,
            other => {
                return Err(EvalError::invalid_operand(
                    "Slice",
                    format!("start index must be Integer, found {}", other.get_type()),
                ));
            }
        };
        let end = match &expr.end_index {
            None => list.len(),
            Some(end_expr) => match self.evaluate(end_expr, ctx)? {
                CqlValue::Null => list.len(),
                CqlValue::Integer(index) => (index.max(0) as usize).min(list.len()),
                other => {
                    return Err(EvalError::invalid_operand(
                        "Slice",
                        format!("end index must be Integer, found {}", other.get_type()),
                    ));
                }
            },
        };
        if start >= end || start >= list.len() {
            return Ok(CqlValue::List(CqlList::empty(list.element_type.clone())));
        }
        Ok(CqlValue::List(CqlList::new(
            list.element_type.clone(),
            list.elements[start..end].to_vec(),
        )))
    }

    pub(crate) fn eval_index_of(
        &self,
        expr: &IndexOfExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let element = self.evaluate(&expr.element_to_find, ctx)?;
        if source.is_null() || element.is_null() {
            return Ok(CqlValue::Null);
        }
        let list = match &source {
            CqlValue::List(list) => list,
            other => return Err(expected_list("IndexOf", other)),
        };
        for (index, item) in list.iter().enumerate() {
            if !item.is_null() && cql_equal(ctx, item, &element)? == Some(true) {
                return Ok(CqlValue::Integer(index as i32));
            }
        }
        Ok(CqlValue::Integer(-1))
    }

    pub(crate) fn eval_sort(
        &self,
        expr: &SortExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let list = match source {
            CqlValue::Null => return Ok(CqlValue::Null),
            CqlValue::List(list) => list,
            other => return Err(expected_list("Sort", &other)),
        };
        let element_type = list.element_type.clone();
        let elements = self.sort_elements(list.elements, &expr.by, ctx)?;
        Ok(CqlValue::List(CqlList::new(element_type, elements)))
    }

    /// Stable multi-key sort, shared with query `sort by`. Keys are
    /// materialized first, one pass per element, so key expressions
    /// evaluate exactly once; nulls order before everything else and
    /// direction is applied per key.
    pub(crate) fn sort_elements(
        &self,
        elements: Vec<CqlValue>,
        by: &[SortByItem],
        ctx: &mut EvaluationContext,
    ) -> EvalResult<Vec<CqlValue>> {
        let directions: Vec<SortDirection> = if by.is_empty() {
            vec![SortDirection::Ascending]
        } else {
            by.iter().map(|item| item.direction).collect()
        };

        let mut keyed: Vec<(Vec<CqlValue>, CqlValue)> = Vec::with_capacity(elements.len());
        for element in elements {
            let keys = if by.is_empty() {
                vec![element.clone()]
            } else {
                let mut keys = Vec::with_capacity(by.len());
                for item in by {
                    keys.push(self.sort_key(&element, item, ctx)?);
                }
                keys
            };
            keyed.push((keys, element));
        }

        let ctx_ref: &EvaluationContext = ctx;
        let mut sort_error = None;
        keyed.sort_by(|(a, _), (b, _)| {
            compare_keys(ctx_ref, a, b, &directions, &mut sort_error)
        });
        if let Some(error) = sort_error {
            return Err(error);
        }

        Ok(keyed.into_iter().map(|(_, element)| element).collect())
    }

    fn sort_key(
        &self,
        element: &CqlValue,
        item: &SortByItem,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        if let Some(key_expr) = &item.sort_expression {
            return ctx.with_scope(Scope::with("$this", element.clone()), |ctx| {
                self.evaluate(key_expr, ctx)
            });
        }
        match &item.path {
            Some(path) => property_key(element, path),
            None => Ok(element.clone()),
        }
    }
}

pub(crate) fn property_key(element: &CqlValue, path: &str) -> EvalResult<CqlValue> {
    match element {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Tuple(tuple) => Ok(tuple.get(path).cloned().unwrap_or(CqlValue::Null)),
        CqlValue::Resource(resource) => Ok(resource
            .property(path)
            .map(json_to_value)
            .unwrap_or(CqlValue::Null)),
        other => Err(EvalError::invalid_property(
            path,
            other.get_type().to_string(),
        )),
    }
}

/// Null keys order lowest; otherwise defer to the value comparison.
fn key_order(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<Option<Ordering>> {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ok(Some(Ordering::Equal)),
        (true, false) => Ok(Some(Ordering::Less)),
        (false, true) => Ok(Some(Ordering::Greater)),
        (false, false) => cql_compare(ctx, left, right),
    }
}

fn compare_keys(
    ctx: &EvaluationContext,
    left: &[CqlValue],
    right: &[CqlValue],
    directions: &[SortDirection],
    stash: &mut Option<EvalError>,
) -> Ordering {
    for ((a, b), direction) in left.iter().zip(right).zip(directions) {
        let order = match key_order(ctx, a, b) {
            Ok(Some(order)) => order,
            Ok(None) => Ordering::Equal,
            Err(error) => {
                stash.get_or_insert(error);
                return Ordering::Equal;
            }
        };
        let order = if direction.is_descending() {
            order.reverse()
        } else {
            order
        };
        if order != Ordering::Equal {
            return order;
        }
    }
    Ordering::Equal
}

/// The element whose key sits at the `want` end of the ordering; ties and
/// undecided comparisons keep the earlier element.
fn extreme_by_key(
    ctx: &EvaluationContext,
    list: &CqlList,
    path: &str,
    want: Ordering,
) -> EvalResult<CqlValue> {
    let mut best: Option<(CqlValue, CqlValue)> = None;
    for element in &list.elements {
        let key = property_key(element, path)?;
        best = Some(match best {
            None => (key, element.clone()),
            Some((best_key, best_element)) => match key_order(ctx, &key, &best_key)? {
                Some(order) if order == want => (key, element.clone()),
                _ => (best_key, best_element),
            },
        });
    }
    Ok(best.map_or(CqlValue::Null, |(_, element)| element))
}

fn exists(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Boolean(false)),
        CqlValue::List(list) => Ok(CqlValue::Boolean(
            !list.is_empty() && !list.iter().any(CqlValue::is_null),
        )),
        other => Err(expected_list("Exists", other)),
    }
}

/// One level only; nested lists below the first survive as elements.
fn flatten(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let list = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::List(list) => list,
        other => return Err(expected_list("Flatten", other)),
    };
    let mut flat = Vec::with_capacity(list.len());
    for element in &list.elements {
        match element {
            CqlValue::List(inner) => flat.extend(inner.elements.iter().cloned()),
            CqlValue::Null => {}
            other => flat.push(other.clone()),
        }
    }
    let element_type = match &list.element_type {
        CqlType::List(inner) => (**inner).clone(),
        _ => CqlType::Any,
    };
    Ok(CqlValue::List(CqlList::new(element_type, flat)))
}

fn tail(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let list = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::List(list) => list,
        other => return Err(expected_list("Tail", other)),
    };
    let rest = list.elements.iter().skip(1).cloned().collect();
    Ok(CqlValue::List(CqlList::new(list.element_type.clone(), rest)))
}

fn distinct(ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let list = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::List(list) => list,
        other => return Err(expected_list("Distinct", other)),
    };
    let elements = distinct_values(ctx, &list.elements)?;
    Ok(CqlValue::List(CqlList::new(
        list.element_type.clone(),
        elements,
    )))
}

fn singleton_from(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    let list = match operand {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::List(list) => list,
        other => return Err(expected_list("SingletonFrom", other)),
    };
    match list.elements.as_slice() {
        [] => Ok(CqlValue::Null),
        [only] => Ok(only.clone()),
        _ => Err(EvalError::invalid_operand(
            "SingletonFrom",
            "list has more than one element",
        )),
    }
}

fn length_of(_ctx: &EvaluationContext, operand: &CqlValue) -> EvalResult<CqlValue> {
    match operand {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::List(list) => Ok(CqlValue::Integer(list.len() as i32)),
        other => Err(expected_list("Length", other)),
    }
}

fn indexer(_ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    if left.is_null() || right.is_null() {
        return Ok(CqlValue::Null);
    }
    let list = match left {
        CqlValue::List(list) => list,
        other => return Err(expected_list("Indexer", other)),
    };
    let CqlValue::Integer(index) = right else {
        return Err(EvalError::invalid_operand(
            "Indexer",
            format!("index must be Integer, found {}", right.get_type()),
        ));
    };
    if *index < 0 {
        return Ok(CqlValue::Null);
    }
    Ok(list.get(*index as usize).cloned().unwrap_or(CqlValue::Null))
}

/// The membership lattice over one list.
fn membership(
    ctx: &EvaluationContext,
    list: &CqlList,
    element: &CqlValue,
) -> EvalResult<CqlValue> {
    if element.is_null() {
        return Ok(if list.is_empty() {
            CqlValue::Boolean(false)
        } else {
            CqlValue::Null
        });
    }
    let mut undecided = false;
    for item in &list.elements {
        if item.is_null() {
            undecided = true;
            continue;
        }
        match cql_equal(ctx, item, element)? {
            Some(true) => return Ok(CqlValue::Boolean(true)),
            Some(false) => {}
            None => undecided = true,
        }
    }
    Ok(if undecided {
        CqlValue::Null
    } else {
        CqlValue::Boolean(false)
    })
}

/// Every element of `contained` must be a member of `container`; a
/// definite miss wins over doubt, and an empty `contained` is included
/// vacuously.
fn list_includes(
    ctx: &EvaluationContext,
    container: &CqlList,
    contained: &CqlList,
) -> EvalResult<CqlValue> {
    let mut undecided = false;
    for element in &contained.elements {
        match membership(ctx, container, element)? {
            CqlValue::Boolean(true) => {}
            CqlValue::Boolean(false) => return Ok(CqlValue::Boolean(false)),
            _ => undecided = true,
        }
    }
    Ok(if undecided {
        CqlValue::Null
    } else {
        CqlValue::Boolean(true)
    })
}

fn contains(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let list = match left {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::List(list) => list,
        other => return Err(expected_list("Contains", other)),
    };
    match right {
        CqlValue::List(contained) => list_includes(ctx, list, contained),
        element => membership(ctx, list, element),
    }
}

fn within(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    contains(ctx, right, left)
}

/// Proper inclusion is inclusion plus a strictly larger element count.
fn proper_contains(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let list = match left {
        CqlValue::Null => return Ok(CqlValue::Null),
        CqlValue::List(list) => list,
        other => return Err(expected_list("ProperContains", other)),
    };
    match right {
        CqlValue::List(contained) => match list_includes(ctx, list, contained)? {
            CqlValue::Boolean(true) => Ok(CqlValue::Boolean(list.len() > contained.len())),
            other => Ok(other),
        },
        element => match membership(ctx, list, element)? {
            CqlValue::Boolean(true) => Ok(CqlValue::Boolean(list.len() > 1)),
            other => Ok(other),
        },
    }
}

fn proper_within(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    proper_contains(ctx, right, left)
}

fn union_lists(ctx: &EvaluationContext, left: &CqlValue, right: &CqlValue) -> EvalResult<CqlValue> {
    let Some((a, b)) = list_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let mut combined = a.elements.clone();
    combined.extend(b.elements.iter().cloned());
    let elements = distinct_values(ctx, &combined)?;
    Ok(CqlValue::List(CqlList::new(
        a.element_type.common_supertype(&b.element_type),
        elements,
    )))
}

fn intersect_lists(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = list_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let mut kept = Vec::new();
    for element in &a.elements {
        if membership(ctx, b, element)? == CqlValue::Boolean(true) {
            kept.push(element.clone());
        }
    }
    let elements = distinct_values(ctx, &kept)?;
    Ok(CqlValue::List(CqlList::new(a.element_type.clone(), elements)))
}

/// Keeps the elements of the left list not definitely present in the
/// right one; doubtful membership keeps the element.
fn except_lists(
    ctx: &EvaluationContext,
    left: &CqlValue,
    right: &CqlValue,
) -> EvalResult<CqlValue> {
    let Some((a, b)) = list_pair(left, right)? else {
        return Ok(CqlValue::Null);
    };
    let mut kept = Vec::new();
    for element in &a.elements {
        if membership(ctx, b, element)? != CqlValue::Boolean(true) {
            kept.push(element.clone());
        }
    }
    let elements = distinct_values(ctx, &kept)?;
    Ok(CqlValue::List(CqlList::new(a.element_type.clone(), elements)))
}

/// First occurrence wins; multiple nulls collapse to one.
pub(crate) fn distinct_values(
    ctx: &EvaluationContext,
    elements: &[CqlValue],
) -> EvalResult<Vec<CqlValue>> {
    let mut kept: Vec<CqlValue> = Vec::new();
    let mut seen_null = false;
    for element in elements {
        if element.is_null() {
            if !seen_null {
                kept.push(CqlValue::Null);
                seen_null = true;
            }
            continue;
        }
        let mut duplicate = false;
        for seen in &kept {
            if !seen.is_null() && cql_equal(ctx, seen, element)? == Some(true) {
                duplicate = true;
                break;
            }
        }
        if !duplicate {
            kept.push(element.clone());
        }
    }
    Ok(kept)
}

fn list_pair<'a>(
    left: &'a CqlValue,
    right: &'a CqlValue,
) -> EvalResult<Option<(&'a CqlList, &'a CqlList)>> {
    match (left, right) {
        (CqlValue::Null, _) | (_, CqlValue::Null) => Ok(None),
        (CqlValue::List(a), CqlValue::List(b)) => Ok(Some((a, b))),
        (CqlValue::List(_), other) | (other, _) => Err(expected_list("List", other)),
    }
}

fn expected_list(operator: &'static str, found: &CqlValue) -> EvalError {
    EvalError::invalid_operand(
        operator,
        format!("expected List, found {}", found.get_type()),
    )
}
