//! Query and retrieve evaluation
//!
//! A query runs as a pipeline: sources expand into the cartesian product
//! of their elements, relationship and where clauses filter the
//! combinations, and the return (or aggregate) clause shapes the output
//! before distinct and sort apply. Every per-combination expression
//! evaluates inside a scope that binds the source aliases and the `let`
//! definitions.
//!
//! A retrieve asks the configured provider for the raw instances of a
//! data type; the code and date filters are applied here rather than by
//! the provider, so every data source sees the same filtering semantics.

use lumen_cql_ast::{
    AggregateClause, Expression, Query, RelationshipClause, Retrieve, ReturnClause,
};
use lumen_cql_types::{
    CqlCode, CqlDate, CqlDateTime, CqlInterval, CqlList, CqlTuple, CqlValue,
};

use crate::context::{EvaluationContext, Scope};
use crate::engine::{local_type_name, CqlEngine};
use crate::error::{EvalError, EvalResult};
use crate::operators::comparison::cql_equal;
use crate::operators::interval::point_in_interval;
use crate::operators::list::{distinct_values, property_key};
use crate::retrieve::extract_codes;

/// One row of the iteration space: each source alias paired with the
/// element it currently binds.
type Combination = Vec<(String, CqlValue)>;

impl CqlEngine {
    pub(crate) fn eval_query(
        &self,
        query: &Query,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let mut singular = false;
        let mut combinations: Vec<Combination> = vec![Vec::new()];
        for source in &query.source {
            let value = self.evaluate(&source.expression, ctx)?;
            if query.source.len() == 1 {
                if value.is_null() {
                    return Ok(CqlValue::Null);
                }
                singular = !matches!(value, CqlValue::List(_));
            }
            let elements = source_elements(value);
            let mut expanded = Vec::with_capacity(combinations.len() * elements.len());
            for combination in &combinations {
                for element in &elements {
                    let mut next = combination.clone();
                    next.push((source.alias.clone(), element.clone()));
                    expanded.push(next);
                }
            }
            combinations = expanded;
        }

        for relationship in query.relationship.iter().flatten() {
            combinations = self.apply_relationship(combinations, relationship, query, ctx)?;
        }

        if let Some(condition) = &query.where_clause {
            combinations = self.apply_where(combinations, condition, query, ctx)?;
        }

        if let Some(aggregate) = &query.aggregate {
            // A well-formed query carries at most one shaping clause.
            if query.return_clause.is_some() {
                return Err(EvalError::internal(
                    "query has both aggregate and return clauses",
                ));
            }
            return self.apply_aggregate(combinations, aggregate, query, ctx);
        }

        let mut results = match &query.return_clause {
            Some(clause) => self.apply_return(combinations, clause, query, ctx)?,
            None => default_projection(combinations, query.source.len() == 1),
        };

        // `return` is distinct unless the query says `return all`.
        if let Some(clause) = &query.return_clause {
            if clause.distinct.unwrap_or(true) {
                results = distinct_values(ctx, &results)?;
            }
        }

        if let Some(sort) = &query.sort {
            results = self.sort_elements(results, &sort.by, ctx)?;
        }

        if singular {
            return Ok(results.into_iter().next().unwrap_or(CqlValue::Null));
        }
        Ok(CqlValue::List(CqlList::from_values(results)))
    }

    /// `with` keeps a combination when any related element satisfies the
    /// condition, `without` when none does.
    fn apply_relationship(
        &self,
        combinations: Vec<Combination>,
        relationship: &RelationshipClause,
        query: &Query,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<Vec<Combination>> {
        let (source, alias, such_that, keep_on_match) = match relationship {
            RelationshipClause::With(with) => {
                (&with.expression, &with.alias, &with.such_that, true)
            }
            RelationshipClause::Without(without) => {
                (&without.expression, &without.alias, &without.such_that, false)
            }
        };
        let related = source_elements(self.evaluate(source, ctx)?);

        let mut kept = Vec::new();
        for combination in combinations {
            let matched = ctx.with_scope(alias_scope(&combination), |ctx| -> EvalResult<bool> {
                self.bind_lets(query, ctx)?;
                for element in &related {
                    ctx.bind(alias.as_str(), element.clone());
                    if self.evaluate(such_that, ctx)?.is_true() {
                        return Ok(true);
                    }
                }
                Ok(false)
            })?;
            if matched == keep_on_match {
                kept.push(combination);
            }
        }
        Ok(kept)
    }

    fn apply_where(
        &self,
        combinations: Vec<Combination>,
        condition: &Expression,
        query: &Query,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<Vec<Combination>> {
        let mut kept = Vec::new();
        for combination in combinations {
            let keep = ctx.with_scope(alias_scope(&combination), |ctx| -> EvalResult<bool> {
                self.bind_lets(query, ctx)?;
                Ok(self.evaluate(condition, ctx)?.is_true())
            })?;
            if keep {
                kept.push(combination);
            }
        }
        Ok(kept)
    }

    fn apply_return(
        &self,
        combinations: Vec<Combination>,
        clause: &ReturnClause,
        query: &Query,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<Vec<CqlValue>> {
        let mut results = Vec::with_capacity(combinations.len());
        for combination in combinations {
            let value = ctx.with_scope(alias_scope(&combination), |ctx| {
                self.bind_lets(query, ctx)?;
                self.evaluate(&clause.expression, ctx)
            })?;
            results.push(value);
        }
        Ok(results)
    }

    /// Fold the combinations into a single value. The accumulator starts
    /// from the `starting` expression (null when absent) and is rebound
    /// under the clause identifier for every combination.
    fn apply_aggregate(
        &self,
        combinations: Vec<Combination>,
        aggregate: &AggregateClause,
        query: &Query,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let combinations = if aggregate.distinct.unwrap_or(false) {
            distinct_combinations(ctx, combinations)?
        } else {
            combinations
        };

        let mut accumulator = match &aggregate.starting {
            Some(starting) => self.evaluate(starting, ctx)?,
            None => CqlValue::Null,
        };
        for combination in combinations {
            accumulator = ctx.with_scope(alias_scope(&combination), |ctx| {
                self.bind_lets(query, ctx)?;
                ctx.bind(aggregate.identifier.as_str(), accumulator.clone());
                self.evaluate(&aggregate.expression, ctx)
            })?;
        }
        Ok(accumulator)
    }

    /// Evaluate the query's `let` definitions into the current scope.
    /// Later definitions can reference earlier ones and the aliases.
    fn bind_lets(&self, query: &Query, ctx: &mut EvaluationContext) -> EvalResult<()> {
        for let_clause in query.let_clause.iter().flatten() {
            let value = self.evaluate(&let_clause.expression, ctx)?;
            ctx.bind(let_clause.identifier.as_str(), value);
        }
        Ok(())
    }

    pub(crate) fn eval_retrieve(
        &self,
        retrieve: &Retrieve,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let codes = match &retrieve.codes {
            Some(codes) => Some(self.evaluate(codes, ctx)?),
            None => None,
        };
        let date_range = match &retrieve.date_range {
            Some(range) => Some(self.evaluate(range, ctx)?),
            None => None,
        };

        let context = retrieve.context.as_deref().or_else(|| ctx.context_name());
        let candidates = ctx.retriever().retrieve(
            context,
            ctx.context_value(),
            local_type_name(&retrieve.data_type),
            retrieve.template_id.as_deref(),
        )?;

        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(filter) = &codes {
                if !code_property_matches(ctx, &candidate, retrieve.code_property.as_deref(), filter)? {
                    continue;
                }
            }
            if let Some(range) = &date_range {
                if !date_property_in_range(ctx, &candidate, retrieve.date_property.as_deref(), range)? {
                    continue;
                }
            }
            kept.push(candidate);
        }
        Ok(CqlValue::List(CqlList::from_values(kept)))
    }
}

fn source_elements(value: CqlValue) -> Vec<CqlValue> {
    match value {
        CqlValue::Null => Vec::new(),
        CqlValue::List(list) => list.elements,
        scalar => vec![scalar],
    }
}

fn alias_scope(combination: &Combination) -> Scope {
    let mut scope = Scope::new();
    for (alias, value) in combination {
        scope.bind(alias.clone(), value.clone());
    }
    scope
}

/// Shape the result rows when no return clause is given: the bare element
/// for a single source, a tuple of the aliased elements otherwise.
fn default_projection(combinations: Vec<Combination>, single_source: bool) -> Vec<CqlValue> {
    combinations
        .into_iter()
        .map(|combination| {
            if single_source {
                combination
                    .into_iter()
                    .next()
                    .map_or(CqlValue::Null, |(_, value)| value)
            } else {
                CqlValue::Tuple(CqlTuple::from_elements(combination))
            }
        })
        .collect()
}

fn distinct_combinations(
    ctx: &EvaluationContext,
    combinations: Vec<Combination>,
) -> EvalResult<Vec<Combination>> {
    let mut kept: Vec<Combination> = Vec::new();
    for combination in combinations {
        let mut duplicate = false;
        for seen in &kept {
            if combinations_equal(ctx, seen, &combination)? {
                duplicate = true;
                break;
            }
        }
        if !duplicate {
            kept.push(combination);
        }
    }
    Ok(kept)
}

fn combinations_equal(
    ctx: &EvaluationContext,
    a: &Combination,
    b: &Combination,
) -> EvalResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for ((_, left), (_, right)) in a.iter().zip(b) {
        if cql_equal(ctx, left, right)? != Some(true) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn code_property_matches(
    ctx: &EvaluationContext,
    candidate: &CqlValue,
    code_property: Option<&str>,
    filter: &CqlValue,
) -> EvalResult<bool> {
    let Some(property) = code_property else {
        // Nothing to test against; the filter keeps everything.
        return Ok(true);
    };
    let value = property_key(candidate, property)?;
    let instance_codes = extract_codes(&value);
    if instance_codes.is_empty() {
        return Ok(false);
    }
    match filter {
        CqlValue::ValueSet(value_set) => {
            for code in &instance_codes {
                if ctx.terminology().in_value_set(code, value_set)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        CqlValue::CodeSystem(system) => {
            for code in &instance_codes {
                if ctx.terminology().in_code_system(code, system)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        direct => {
            let filter_codes = extract_codes(direct);
            Ok(instance_codes
                .iter()
                .any(|code| filter_codes.iter().any(|wanted| codes_match(wanted, code))))
        }
    }
}

/// Retrieve code matching compares code and system; a filter code without
/// a system matches on the code alone.
fn codes_match(filter: &CqlCode, instance: &CqlCode) -> bool {
    if filter.code != instance.code {
        return false;
    }
    match &filter.system {
        Some(system) => instance.system.as_deref() == Some(system.as_str()),
        None => true,
    }
}

fn date_property_in_range(
    ctx: &EvaluationContext,
    candidate: &CqlValue,
    date_property: Option<&str>,
    range: &CqlValue,
) -> EvalResult<bool> {
    let Some(property) = date_property else {
        return Ok(true);
    };
    let value = temporal_filter_value(property_key(candidate, property)?);
    if value.is_null() {
        return Ok(false);
    }
    let exact;
    let interval = match range {
        CqlValue::Interval(interval) => interval,
        CqlValue::Null => return Ok(false),
        point => {
            exact = CqlInterval::closed(point.clone(), point.clone());
            &exact
        }
    };
    Ok(point_in_interval(ctx, interval, &value)? == CqlValue::Boolean(true))
}

/// Resource date fields usually arrive as strings; lift them into the
/// temporal value the range check expects.
fn temporal_filter_value(value: CqlValue) -> CqlValue {
    match value {
        CqlValue::String(text) => {
            if text.contains('T') {
                CqlDateTime::parse(&text)
                    .map(CqlValue::DateTime)
                    .unwrap_or(CqlValue::Null)
            } else {
                CqlDate::parse(&text)
                    .map(CqlValue::Date)
                    .unwrap_or(CqlValue::Null)
            }
        }
        other => other,
    }
}
