//! Expression evaluation
//!
//! [`CqlEngine`] walks a compiled library's expression trees. The engine
//! owns the static side of evaluation: the loaded libraries and the
//! operator registry. Everything mutable during a run (scopes, caches,
//! emitted messages, the clock) lives in [`EvaluationContext`], so one
//! engine can serve concurrent evaluations over separate contexts.
//!
//! Dispatch is a single exhaustive match. Operators on the generic
//! unary/binary/n-ary node shapes go through the registry by node name;
//! nodes with their own shape call the `eval_*` methods the operator
//! modules add to the engine. Cross-library references re-scope the
//! engine onto the included library, which is a handle copy, not a load.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use lumen_cql_ast::{
    AccessModifier, BinaryExpression, CaseExpression, CodeRef, CodeSystemRef, ConceptRef,
    Expression, ExpressionRef, FunctionRef, IfExpression, InstanceExpression, Library, Literal,
    MessageExpression, NaryExpression, ParameterRef, Property, TupleExpression, UnaryExpression,
    ValueSetRef,
};
use lumen_cql_types::{
    CqlCode, CqlConcept, CqlDate, CqlDateTime, CqlList, CqlQuantity, CqlRatio, CqlResource,
    CqlTime, CqlTuple, CqlType, CqlValue, CqlVocabularyRef,
};

use crate::context::{EmittedMessage, EvaluationContext, MessageSeverity, Scope};
use crate::error::{EvalError, EvalResult};
use crate::registry::OperatorRegistry;
use crate::resolver::LibraryResolver;
use crate::result::{DefinitionResult, LibraryResult};

/// Evaluator for one library and its transitive includes.
#[derive(Clone)]
pub struct CqlEngine {
    registry: &'static OperatorRegistry,
    /// Loaded libraries, keyed by the identifier includes reference them by.
    libraries: Arc<HashMap<String, Arc<Library>>>,
    /// The library unqualified references resolve against.
    current: Arc<Library>,
}

impl CqlEngine {
    /// An engine over a single library. References to included libraries
    /// fail until they are registered with [`CqlEngine::with_library`].
    pub fn new(library: Library) -> Self {
        let current = Arc::new(library);
        let mut libraries = HashMap::new();
        libraries.insert(current.identifier.id.clone(), Arc::clone(&current));
        Self {
            registry: OperatorRegistry::global(),
            libraries: Arc::new(libraries),
            current,
        }
    }

    /// An engine with the library's includes loaded transitively through
    /// `resolver`. Include cycles terminate; each library loads once.
    pub fn with_resolver(library: Library, resolver: &dyn LibraryResolver) -> EvalResult<Self> {
        let primary = Arc::new(library);
        let mut libraries = HashMap::new();
        libraries.insert(primary.identifier.id.clone(), Arc::clone(&primary));

        let mut pending = vec![Arc::clone(&primary)];
        while let Some(loaded) = pending.pop() {
            for include in loaded.includes.iter().flat_map(|defs| defs.defs.iter()) {
                if libraries.contains_key(&include.path) {
                    continue;
                }
                let resolved = resolver.resolve(&include.path, include.version.as_deref())?;
                libraries.insert(include.path.clone(), Arc::clone(&resolved));
                pending.push(resolved);
            }
        }

        Ok(Self {
            registry: OperatorRegistry::global(),
            libraries: Arc::new(libraries),
            current: primary,
        })
    }

    /// Register an included library directly, keyed by its identifier.
    pub fn with_library(mut self, library: Library) -> Self {
        let library = Arc::new(library);
        Arc::make_mut(&mut self.libraries).insert(library.identifier.id.clone(), library);
        self
    }

    /// Swap in a custom operator registry. The registry must outlive the
    /// engine, so non-global tables are typically leaked once per process.
    pub fn with_registry(mut self, registry: &'static OperatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The library unqualified references resolve against.
    pub fn library(&self) -> &Library {
        &self.current
    }

    pub fn registry(&self) -> &OperatorRegistry {
        self.registry
    }

    /// Evaluate every public expression definition, in declaration order.
    /// The first failing definition aborts the run; the result carries the
    /// messages and the optional trace out of the context.
    pub fn evaluate_library(&self, ctx: &mut EvaluationContext) -> EvalResult<LibraryResult> {
        log::debug!("evaluating library {}", self.current.identifier.id);
        let mut definitions = Vec::new();
        for def in self.current.expression_defs() {
            if def.access_level == Some(AccessModifier::Private) {
                continue;
            }
            log::debug!("evaluating definition {}", def.name);
            let value = self.eval_definition(&def.name, ctx)?;
            definitions.push(DefinitionResult {
                name: def.name.clone(),
                value,
                locator: def
                    .expression
                    .as_ref()
                    .and_then(|e| e.element().locator.clone()),
            });
        }
        Ok(LibraryResult {
            library: self.current.identifier.id.clone(),
            version: self.current.identifier.version.clone(),
            definitions,
            messages: ctx.messages().to_vec(),
            trace: ctx.take_trace(),
        })
    }

    /// Evaluate a single named definition. Results are cached on the
    /// context, so repeated calls pay the tree walk once.
    pub fn evaluate_expression(
        &self,
        name: &str,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        self.eval_definition(name, ctx)
    }

    /// Evaluate one expression tree against the context.
    pub fn evaluate(&self, expr: &Expression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        ctx.enter()?;
        let result = self.dispatch(expr, ctx);
        if ctx.tracing_enabled() {
            let outcome = match &result {
                Ok(value) => value.to_string(),
                Err(error) => error.to_string(),
            };
            let depth = ctx.depth.saturating_sub(1);
            if let Some(trace) = ctx.trace_mut() {
                trace.record(expr.kind_name(), expr.element().locator.as_deref(), outcome, depth);
            }
        }
        ctx.exit();
        result
    }

    /// Main evaluation dispatcher, one arm per ELM node type.
    fn dispatch(&self, expr: &Expression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match expr {
            // === Literals ===
            Expression::Null(_) => Ok(CqlValue::Null),
            Expression::Literal(lit) => self.eval_literal(lit),

            // === References ===
            Expression::ExpressionRef(r) => self.eval_expression_ref(r, ctx),
            Expression::FunctionRef(r) => self.eval_function_ref(r, ctx),
            Expression::ParameterRef(r) => self.eval_parameter_ref(r, ctx),
            Expression::OperandRef(r) => scope_value(ctx, &r.name),
            Expression::AliasRef(r) => scope_value(ctx, &r.name),
            Expression::QueryLetRef(r) => scope_value(ctx, &r.name),
            Expression::IdentifierRef(r) => scope_value(ctx, &r.name),
            Expression::Property(p) => self.eval_property(p, ctx),
            Expression::ValueSetRef(r) => self.eval_value_set_ref(r),
            Expression::CodeSystemRef(r) => self.eval_code_system_ref(r),
            Expression::CodeRef(r) => self.eval_code_ref(r),
            Expression::ConceptRef(r) => self.eval_concept_ref(r),

            // === Arithmetic ===
            Expression::Add(e) => self.eval_binary_op("Add", e, ctx),
            Expression::Subtract(e) => self.eval_binary_op("Subtract", e, ctx),
            Expression::Multiply(e) => self.eval_binary_op("Multiply", e, ctx),
            Expression::Divide(e) => self.eval_binary_op("Divide", e, ctx),
            Expression::TruncatedDivide(e) => self.eval_binary_op("TruncatedDivide", e, ctx),
            Expression::Modulo(e) => self.eval_binary_op("Modulo", e, ctx),
            Expression::Power(e) => self.eval_binary_op("Power", e, ctx),
            Expression::Log(e) => self.eval_binary_op("Log", e, ctx),
            Expression::Negate(e) => self.eval_unary_op("Negate", e, ctx),
            Expression::Abs(e) => self.eval_unary_op("Abs", e, ctx),
            Expression::Ceiling(e) => self.eval_unary_op("Ceiling", e, ctx),
            Expression::Floor(e) => self.eval_unary_op("Floor", e, ctx),
            Expression::Truncate(e) => self.eval_unary_op("Truncate", e, ctx),
            Expression::Round(e) => self.eval_round(e, ctx),
            Expression::Ln(e) => self.eval_unary_op("Ln", e, ctx),
            Expression::Exp(e) => self.eval_unary_op("Exp", e, ctx),
            Expression::Successor(e) => self.eval_unary_op("Successor", e, ctx),
            Expression::Predecessor(e) => self.eval_unary_op("Predecessor", e, ctx),
            Expression::MinValue(e) => self.eval_min_value(e),
            Expression::MaxValue(e) => self.eval_max_value(e),
            Expression::Precision(e) => self.eval_unary_op("Precision", e, ctx),
            Expression::LowBoundary(e) => self.eval_low_boundary(e, ctx),
            Expression::HighBoundary(e) => self.eval_high_boundary(e, ctx),

            // === Comparison ===
            Expression::Equal(e) => self.eval_binary_op("Equal", e, ctx),
            Expression::Equivalent(e) => self.eval_binary_op("Equivalent", e, ctx),
            Expression::NotEqual(e) => self.eval_binary_op("NotEqual", e, ctx),
            Expression::Less(e) => self.eval_binary_op("Less", e, ctx),
            Expression::Greater(e) => self.eval_binary_op("Greater", e, ctx),
            Expression::LessOrEqual(e) => self.eval_binary_op("LessOrEqual", e, ctx),
            Expression::GreaterOrEqual(e) => self.eval_binary_op("GreaterOrEqual", e, ctx),

            // === Logical ===
            Expression::And(e) => self.eval_binary_op("And", e, ctx),
            Expression::Or(e) => self.eval_binary_op("Or", e, ctx),
            Expression::Xor(e) => self.eval_binary_op("Xor", e, ctx),
            Expression::Implies(e) => self.eval_binary_op("Implies", e, ctx),
            Expression::Not(e) => self.eval_unary_op("Not", e, ctx),

            // === Nullological ===
            Expression::IsNull(e) => self.eval_unary_op("IsNull", e, ctx),
            Expression::IsTrue(e) => self.eval_unary_op("IsTrue", e, ctx),
            Expression::IsFalse(e) => self.eval_unary_op("IsFalse", e, ctx),
            Expression::Coalesce(e) => self.eval_coalesce(e, ctx),
            Expression::If(e) => self.eval_if(e, ctx),
            Expression::Case(e) => self.eval_case(e, ctx),

            // === String ===
            Expression::Concatenate(e) => self.eval_nary_op("Concatenate", &e.operand, ctx),
            Expression::Combine(e) => self.eval_combine(e, ctx),
            Expression::Split(e) => self.eval_split(e, ctx),
            Expression::SplitOnMatches(e) => self.eval_split_on_matches(e, ctx),
            Expression::Length(e) => self.eval_unary_op("Length", e, ctx),
            Expression::Upper(e) => self.eval_unary_op("Upper", e, ctx),
            Expression::Lower(e) => self.eval_unary_op("Lower", e, ctx),
            Expression::Indexer(e) => self.eval_binary_op("Indexer", e, ctx),
            Expression::PositionOf(e) => self.eval_position_of(e, ctx),
            Expression::LastPositionOf(e) => self.eval_last_position_of(e, ctx),
            Expression::Substring(e) => self.eval_substring(e, ctx),
            Expression::StartsWith(e) => self.eval_binary_op("StartsWith", e, ctx),
            Expression::EndsWith(e) => self.eval_binary_op("EndsWith", e, ctx),
            Expression::Matches(e) => self.eval_binary_op("Matches", e, ctx),
            Expression::ReplaceMatches(e) => self.eval_nary_op("ReplaceMatches", &e.operand, ctx),

            // === DateTime ===
            Expression::Now(_) => self.eval_now(ctx),
            Expression::Today(_) => self.eval_today(ctx),
            Expression::TimeOfDay(_) => self.eval_time_of_day(ctx),
            Expression::Date(e) => self.eval_date(e, ctx),
            Expression::DateTime(e) => self.eval_date_time(e, ctx),
            Expression::Time(e) => self.eval_time(e, ctx),
            Expression::DateFrom(e) => self.eval_unary_op("DateFrom", e, ctx),
            Expression::TimeFrom(e) => self.eval_unary_op("TimeFrom", e, ctx),
            Expression::TimezoneOffsetFrom(e) => self.eval_unary_op("TimezoneOffsetFrom", e, ctx),
            Expression::DateTimeComponentFrom(e) => self.eval_date_time_component_from(e, ctx),
            Expression::DurationBetween(e) => self.eval_duration_between(e, ctx),
            Expression::DifferenceBetween(e) => self.eval_difference_between(e, ctx),
            Expression::SameAs(e) => self.eval_same_as(e, ctx),
            Expression::SameOrBefore(e) => self.eval_same_or_before(e, ctx),
            Expression::SameOrAfter(e) => self.eval_same_or_after(e, ctx),

            // === Interval ===
            Expression::Interval(e) => self.eval_interval(e, ctx),
            Expression::Start(e) => self.eval_unary_op("Start", e, ctx),
            Expression::End(e) => self.eval_unary_op("End", e, ctx),
            Expression::PointFrom(e) => self.eval_unary_op("PointFrom", e, ctx),
            Expression::Width(e) => self.eval_unary_op("Width", e, ctx),
            Expression::Size(e) => self.eval_unary_op("Size", e, ctx),
            Expression::Contains(e) => self.eval_binary_op("Contains", e, ctx),
            Expression::In(e) => self.eval_binary_op("In", e, ctx),
            Expression::Includes(e) => self.eval_binary_op("Includes", e, ctx),
            Expression::IncludedIn(e) => self.eval_binary_op("IncludedIn", e, ctx),
            Expression::ProperContains(e) => self.eval_binary_op("ProperContains", e, ctx),
            Expression::ProperIn(e) => self.eval_binary_op("ProperIn", e, ctx),
            Expression::ProperIncludes(e) => self.eval_binary_op("ProperIncludes", e, ctx),
            Expression::ProperIncludedIn(e) => self.eval_binary_op("ProperIncludedIn", e, ctx),
            Expression::Before(e) => self.eval_before(e, ctx),
            Expression::After(e) => self.eval_after(e, ctx),
            Expression::Meets(e) => self.eval_binary_op("Meets", e, ctx),
            Expression::MeetsBefore(e) => self.eval_binary_op("MeetsBefore", e, ctx),
            Expression::MeetsAfter(e) => self.eval_binary_op("MeetsAfter", e, ctx),
            Expression::Overlaps(e) => self.eval_binary_op("Overlaps", e, ctx),
            Expression::OverlapsBefore(e) => self.eval_binary_op("OverlapsBefore", e, ctx),
            Expression::OverlapsAfter(e) => self.eval_binary_op("OverlapsAfter", e, ctx),
            Expression::Starts(e) => self.eval_binary_op("Starts", e, ctx),
            Expression::Ends(e) => self.eval_binary_op("Ends", e, ctx),
            Expression::Collapse(e) => self.eval_unary_op("Collapse", e, ctx),
            Expression::Union(e) => self.eval_binary_op("Union", e, ctx),
            Expression::Intersect(e) => self.eval_binary_op("Intersect", e, ctx),
            Expression::Except(e) => self.eval_binary_op("Except", e, ctx),

            // === List ===
            Expression::List(e) => self.eval_list(e, ctx),
            Expression::Exists(e) => self.eval_unary_op("Exists", e, ctx),
            Expression::First(e) => self.eval_first(e, ctx),
            Expression::Last(e) => self.eval_last(e, ctx),
            Expression::Slice(e) => self.eval_slice(e, ctx),
            Expression::IndexOf(e) => self.eval_index_of(e, ctx),
            Expression::Flatten(e) => self.eval_unary_op("Flatten", e, ctx),
            Expression::Tail(e) => self.eval_unary_op("Tail", e, ctx),
            Expression::Sort(e) => self.eval_sort(e, ctx),
            Expression::Distinct(e) => self.eval_unary_op("Distinct", e, ctx),
            Expression::SingletonFrom(e) => self.eval_unary_op("SingletonFrom", e, ctx),

            // === Aggregate ===
            Expression::Count(e) => self.eval_aggregate("Count", e, ctx),
            Expression::Sum(e) => self.eval_aggregate("Sum", e, ctx),
            Expression::Product(e) => self.eval_aggregate("Product", e, ctx),
            Expression::Min(e) => self.eval_aggregate("Min", e, ctx),
            Expression::Max(e) => self.eval_aggregate("Max", e, ctx),
            Expression::Avg(e) => self.eval_aggregate("Avg", e, ctx),
            Expression::GeometricMean(e) => self.eval_aggregate("GeometricMean", e, ctx),
            Expression::Median(e) => self.eval_aggregate("Median", e, ctx),
            Expression::Mode(e) => self.eval_aggregate("Mode", e, ctx),
            Expression::Variance(e) => self.eval_aggregate("Variance", e, ctx),
            Expression::StdDev(e) => self.eval_aggregate("StdDev", e, ctx),
            Expression::PopulationVariance(e) => self.eval_aggregate("PopulationVariance", e, ctx),
            Expression::PopulationStdDev(e) => self.eval_aggregate("PopulationStdDev", e, ctx),
            Expression::AllTrue(e) => self.eval_aggregate("AllTrue", e, ctx),
            Expression::AnyTrue(e) => self.eval_aggregate("AnyTrue", e, ctx),

            // === Type Operations ===
            Expression::As(e) => self.eval_as(e, ctx),
            Expression::Convert(e) => self.eval_convert(e, ctx),
            Expression::Is(e) => self.eval_is(e, ctx),
            Expression::CanConvert(e) => self.eval_can_convert(e, ctx),
            Expression::ToBoolean(e) => self.eval_unary_op("ToBoolean", e, ctx),
            Expression::ToChars(e) => self.eval_unary_op("ToChars", e, ctx),
            Expression::ToConcept(e) => self.eval_unary_op("ToConcept", e, ctx),
            Expression::ToDate(e) => self.eval_unary_op("ToDate", e, ctx),
            Expression::ToDateTime(e) => self.eval_unary_op("ToDateTime", e, ctx),
            Expression::ToDecimal(e) => self.eval_unary_op("ToDecimal", e, ctx),
            Expression::ToInteger(e) => self.eval_unary_op("ToInteger", e, ctx),
            Expression::ToLong(e) => self.eval_unary_op("ToLong", e, ctx),
            Expression::ToList(e) => self.eval_unary_op("ToList", e, ctx),
            Expression::ToQuantity(e) => self.eval_unary_op("ToQuantity", e, ctx),
            Expression::ToRatio(e) => self.eval_unary_op("ToRatio", e, ctx),
            Expression::ToString(e) => self.eval_unary_op("ToString", e, ctx),
            Expression::ToTime(e) => self.eval_unary_op("ToTime", e, ctx),
            Expression::ConvertsToBoolean(e) => self.eval_unary_op("ConvertsToBoolean", e, ctx),
            Expression::ConvertsToDate(e) => self.eval_unary_op("ConvertsToDate", e, ctx),
            Expression::ConvertsToDateTime(e) => self.eval_unary_op("ConvertsToDateTime", e, ctx),
            Expression::ConvertsToDecimal(e) => self.eval_unary_op("ConvertsToDecimal", e, ctx),
            Expression::ConvertsToInteger(e) => self.eval_unary_op("ConvertsToInteger", e, ctx),
            Expression::ConvertsToLong(e) => self.eval_unary_op("ConvertsToLong", e, ctx),
            Expression::ConvertsToQuantity(e) => self.eval_unary_op("ConvertsToQuantity", e, ctx),
            Expression::ConvertsToRatio(e) => self.eval_unary_op("ConvertsToRatio", e, ctx),
            Expression::ConvertsToString(e) => self.eval_unary_op("ConvertsToString", e, ctx),
            Expression::ConvertsToTime(e) => self.eval_unary_op("ConvertsToTime", e, ctx),

            // === Clinical ===
            Expression::Code(e) => self.eval_code_literal(e),
            Expression::Concept(e) => self.eval_concept_literal(e),
            Expression::Quantity(e) => self.eval_quantity(e),
            Expression::Ratio(e) => self.eval_ratio(e),
            Expression::InCodeSystem(e) => self.eval_in_code_system(e, ctx),
            Expression::AnyInCodeSystem(e) => self.eval_any_in_code_system(e, ctx),
            Expression::InValueSet(e) => self.eval_in_value_set(e, ctx),
            Expression::AnyInValueSet(e) => self.eval_any_in_value_set(e, ctx),
            Expression::CalculateAge(e) => self.eval_calculate_age(e, ctx),
            Expression::CalculateAgeAt(e) => self.eval_calculate_age_at(e, ctx),

            // === Query ===
            Expression::Query(q) => self.eval_query(q, ctx),
            Expression::Retrieve(r) => self.eval_retrieve(r, ctx),

            // === Tuple/Instance ===
            Expression::Tuple(e) => self.eval_tuple(e, ctx),
            Expression::Instance(e) => self.eval_instance(e, ctx),

            // === Message ===
            Expression::Message(e) => self.eval_message(e, ctx),
        }
    }

    fn eval_unary_op(
        &self,
        name: &'static str,
        expr: &UnaryExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let operand = self.evaluate(&expr.operand, ctx)?;
        let op = self.registry.unary(name, &operand.get_type())?;
        op(ctx, &operand)
    }

    fn eval_binary_op(
        &self,
        name: &'static str,
        expr: &BinaryExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let [left_expr, right_expr] = expr.operand.as_slice() else {
            return Err(EvalError::internal(format!("{name} expects two operands")));
        };
        let left = self.evaluate(left_expr, ctx)?;
        let right = self.evaluate(right_expr, ctx)?;
        let op = self.registry.binary(name, &left.get_type(), &right.get_type())?;
        op(ctx, &left, &right)
    }

    fn eval_nary_op(
        &self,
        name: &'static str,
        operands: &[Box<Expression>],
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let mut values = Vec::with_capacity(operands.len());
        for operand in operands {
            values.push(self.evaluate(operand, ctx)?);
        }
        let op = self.registry.nary(name)?;
        op(ctx, &values)
    }

    fn eval_literal(&self, literal: &Literal) -> EvalResult<CqlValue> {
        let Some(text) = &literal.value else {
            return Ok(CqlValue::Null);
        };
        match local_type_name(&literal.value_type) {
            "Boolean" => text
                .parse::<bool>()
                .map(CqlValue::Boolean)
                .map_err(|_| malformed_literal("Boolean", text)),
            "Integer" => text
                .parse::<i32>()
                .map(CqlValue::Integer)
                .map_err(|_| malformed_literal("Integer", text)),
            "Long" => text
                .trim_end_matches('L')
                .parse::<i64>()
                .map(CqlValue::Long)
                .map_err(|_| malformed_literal("Long", text)),
            "Decimal" => text
                .parse::<Decimal>()
                .map(CqlValue::Decimal)
                .map_err(|_| malformed_literal("Decimal", text)),
            "String" => Ok(CqlValue::string(text.clone())),
            "Date" => Ok(CqlValue::Date(CqlDate::parse(text)?)),
            "DateTime" => Ok(CqlValue::DateTime(CqlDateTime::parse(text)?)),
            "Time" => Ok(CqlValue::Time(CqlTime::parse(text)?)),
            other => Err(EvalError::internal(format!(
                "unsupported literal type {other}"
            ))),
        }
    }

    fn eval_expression_ref(
        &self,
        expr: &ExpressionRef,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        match expr.library_name.as_deref() {
            None => self.eval_definition(&expr.name, ctx),
            Some(alias) => {
                let engine = self.included_engine(alias)?;
                let visible = engine
                    .current
                    .expression_defs()
                    .find(|def| def.name == expr.name)
                    .is_some_and(|def| def.access_level != Some(AccessModifier::Private));
                if !visible {
                    return Err(EvalError::undefined_expression(expr.name.clone()));
                }
                engine.eval_definition(&expr.name, ctx)
            }
        }
    }

    fn eval_definition(&self, name: &str, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let key = (self.current.identifier.id.clone(), name.to_string());
        if let Some(cached) = ctx.definition_cache.get(&key) {
            return Ok(cached.clone());
        }
        let def = self
            .current
            .expression_defs()
            .find(|def| def.name == name)
            .ok_or_else(|| EvalError::undefined_expression(name))?;
        let body = def.expression.as_ref().ok_or_else(|| {
            EvalError::internal(format!("expression definition '{name}' has no body"))
        })?;
        let value = self.evaluate(body, ctx)?;
        ctx.definition_cache.insert(key, value.clone());
        Ok(value)
    }

    fn eval_function_ref(
        &self,
        expr: &FunctionRef,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        // Arguments evaluate in the calling library's scope, the body in
        // the defining library's.
        let mut arguments = Vec::new();
        for operand in expr.operand.iter().flatten() {
            arguments.push(self.evaluate(operand, ctx)?);
        }

        let engine = self.target_engine(expr.library_name.as_deref())?;
        let function = engine
            .current
            .function_defs()
            .find(|def| {
                def.name == expr.name
                    && def.operand.as_ref().map_or(0, Vec::len) == arguments.len()
                    && (expr.library_name.is_none()
                        || def.access_level != Some(AccessModifier::Private))
            })
            .ok_or_else(|| EvalError::undefined_function(expr.name.clone()))?;

        if function.external == Some(true) {
            return Err(EvalError::undefined_function(expr.name.clone()));
        }
        let body = function.expression.as_ref().ok_or_else(|| {
            EvalError::internal(format!("function definition '{}' has no body", expr.name))
        })?;

        let mut scope = Scope::new();
        for (operand, value) in function.operand.iter().flatten().zip(arguments) {
            scope.bind(operand.name.as_str(), value);
        }
        ctx.with_scope(scope, |ctx| engine.evaluate(body, ctx))
    }

    fn eval_parameter_ref(
        &self,
        expr: &ParameterRef,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let engine = self.target_engine(expr.library_name.as_deref())?;
        engine.parameter_value(&expr.name, ctx)
    }

    /// A supplied value wins over the declared default; a parameter with
    /// neither is null. Default expressions evaluate once per run.
    fn parameter_value(&self, name: &str, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        if let Some(supplied) = ctx.supplied_parameter(name) {
            return Ok(supplied.clone());
        }
        let key = format!("{}/{name}", self.current.identifier.id);
        if let Some(cached) = ctx.parameter_cache.get(&key) {
            return Ok(cached.clone());
        }
        let parameter = self
            .current
            .parameters
            .iter()
            .flat_map(|defs| defs.defs.iter())
            .find(|def| def.name == name)
            .ok_or_else(|| EvalError::undefined_parameter(name))?;
        let value = match &parameter.default_expr {
            Some(default) => self.evaluate(default, ctx)?,
            None => CqlValue::Null,
        };
        ctx.parameter_cache.insert(key, value.clone());
        Ok(value)
    }

    fn eval_value_set_ref(&self, expr: &ValueSetRef) -> EvalResult<CqlValue> {
        let vocabulary = self.resolve_value_set(expr.library_name.as_deref(), &expr.name)?;
        Ok(CqlValue::ValueSet(vocabulary))
    }

    fn eval_code_system_ref(&self, expr: &CodeSystemRef) -> EvalResult<CqlValue> {
        let vocabulary = self.resolve_code_system(expr.library_name.as_deref(), &expr.name)?;
        Ok(CqlValue::CodeSystem(vocabulary))
    }

    fn eval_code_ref(&self, expr: &CodeRef) -> EvalResult<CqlValue> {
        let engine = self.target_engine(expr.library_name.as_deref())?;
        let def = engine
            .current
            .codes
            .iter()
            .flat_map(|defs| defs.defs.iter())
            .find(|def| def.name == expr.name)
            .filter(|def| {
                expr.library_name.is_none() || def.access_level != Some(AccessModifier::Private)
            })
            .ok_or_else(|| EvalError::undefined_identifier(expr.name.clone()))?;
        let system = engine
            .resolve_code_system(def.code_system.library_name.as_deref(), &def.code_system.name)?;
        Ok(CqlValue::Code(CqlCode {
            code: def.id.clone(),
            system: Some(system.id),
            version: system.version,
            display: def.display.clone(),
        }))
    }

    fn eval_concept_ref(&self, expr: &ConceptRef) -> EvalResult<CqlValue> {
        let engine = self.target_engine(expr.library_name.as_deref())?;
        let def = engine
            .current
            .concepts
            .iter()
            .flat_map(|defs| defs.defs.iter())
            .find(|def| def.name == expr.name)
            .filter(|def| {
                expr.library_name.is_none() || def.access_level != Some(AccessModifier::Private)
            })
            .ok_or_else(|| EvalError::undefined_identifier(expr.name.clone()))?;
        let mut codes = Vec::with_capacity(def.code.len());
        for code_ref in &def.code {
            let CqlValue::Code(code) = engine.eval_code_ref(code_ref)? else {
                return Err(EvalError::internal("code reference did not yield a Code"));
            };
            codes.push(code);
        }
        Ok(CqlValue::Concept(CqlConcept::new(codes, def.display.clone())))
    }

    pub(crate) fn resolve_code_system(
        &self,
        library: Option<&str>,
        name: &str,
    ) -> EvalResult<CqlVocabularyRef> {
        let engine = self.target_engine(library)?;
        let def = engine
            .current
            .code_systems
            .iter()
            .flat_map(|defs| defs.defs.iter())
            .find(|def| def.name == name)
            .filter(|def| library.is_none() || def.access_level != Some(AccessModifier::Private))
            .ok_or_else(|| EvalError::CodeSystemNotFound {
                id: name.to_string(),
            })?;
        let mut vocabulary = CqlVocabularyRef::new(def.id.clone()).with_name(def.name.clone());
        if let Some(version) = &def.version {
            vocabulary = vocabulary.with_version(version.clone());
        }
        Ok(vocabulary)
    }

    pub(crate) fn resolve_value_set(
        &self,
        library: Option<&str>,
        name: &str,
    ) -> EvalResult<CqlVocabularyRef> {
        let engine = self.target_engine(library)?;
        let def = engine
            .current
            .value_sets
            .iter()
            .flat_map(|defs| defs.defs.iter())
            .find(|def| def.name == name)
            .filter(|def| library.is_none() || def.access_level != Some(AccessModifier::Private))
            .ok_or_else(|| EvalError::ValueSetNotFound {
                id: name.to_string(),
            })?;
        let mut vocabulary = CqlVocabularyRef::new(def.id.clone()).with_name(def.name.clone());
        if let Some(version) = &def.version {
            vocabulary = vocabulary.with_version(version.clone());
        }
        Ok(vocabulary)
    }

    /// The engine a possibly library-qualified reference resolves in.
    fn target_engine(&self, library: Option<&str>) -> EvalResult<CqlEngine> {
        match library {
            None => Ok(self.clone()),
            Some(alias) => self.included_engine(alias),
        }
    }

    /// Re-scope onto the library included under `alias`.
    fn included_engine(&self, alias: &str) -> EvalResult<CqlEngine> {
        let include = self
            .current
            .includes
            .iter()
            .flat_map(|defs| defs.defs.iter())
            .find(|include| include.local_identifier == alias)
            .ok_or_else(|| EvalError::undefined_library(alias))?;
        let library = self
            .libraries
            .get(&include.path)
            .ok_or_else(|| EvalError::undefined_library(include.path.clone()))?;
        Ok(CqlEngine {
            registry: self.registry,
            libraries: Arc::clone(&self.libraries),
            current: Arc::clone(library),
        })
    }

    fn eval_property(&self, expr: &Property, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let source = match (&expr.scope, &expr.source) {
            (Some(scope), _) => ctx
                .lookup(scope)
                .cloned()
                .ok_or_else(|| EvalError::undefined_identifier(scope.clone()))?,
            (None, Some(source)) => self.evaluate(source, ctx)?,
            (None, None) => {
                return Err(EvalError::internal("Property carries neither source nor scope"));
            }
        };
        property_of(&source, &expr.path)
    }

    fn eval_if(&self, expr: &IfExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let condition = self.evaluate(&expr.condition, ctx)?;
        // A null condition selects the else branch
        if condition.is_true() {
            self.evaluate(&expr.then, ctx)
        } else {
            self.evaluate(&expr.else_clause, ctx)
        }
    }

    fn eval_case(&self, expr: &CaseExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        match &expr.comparand {
            // Selected form: the comparand is matched against each when
            // using equivalence, so null comparands can still select.
            Some(comparand_expr) => {
                let comparand = self.evaluate(comparand_expr, ctx)?;
                for item in &expr.case_item {
                    let when = self.evaluate(&item.when, ctx)?;
                    let op = self
                        .registry
                        .binary("Equivalent", &comparand.get_type(), &when.get_type())?;
                    if op(ctx, &comparand, &when)?.is_true() {
                        return self.evaluate(&item.then, ctx);
                    }
                }
            }
            None => {
                for item in &expr.case_item {
                    if self.evaluate(&item.when, ctx)?.is_true() {
                        return self.evaluate(&item.then, ctx);
                    }
                }
            }
        }
        match &expr.else_clause {
            Some(else_clause) => self.evaluate(else_clause, ctx),
            None => Ok(CqlValue::Null),
        }
    }

    fn eval_coalesce(
        &self,
        expr: &NaryExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        // The single-operand form selects from a list's elements
        if let [operand] = expr.operand.as_slice() {
            let value = self.evaluate(operand, ctx)?;
            if let CqlValue::List(list) = value {
                let found = list.elements.into_iter().find(|element| !element.is_null());
                return Ok(found.unwrap_or(CqlValue::Null));
            }
            return Ok(value);
        }
        for operand in &expr.operand {
            let value = self.evaluate(operand, ctx)?;
            if !value.is_null() {
                return Ok(value);
            }
        }
        Ok(CqlValue::Null)
    }

    fn eval_tuple(&self, expr: &TupleExpression, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let mut tuple = CqlTuple::new();
        for element in expr.elements.iter().flatten() {
            let value = self.evaluate(&element.value, ctx)?;
            tuple.set(element.name.as_str(), value);
        }
        Ok(CqlValue::Tuple(tuple))
    }

    /// Instances of the system value types construct the typed value;
    /// anything else stays a structural tuple.
    fn eval_instance(
        &self,
        expr: &InstanceExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let mut tuple = CqlTuple::new();
        for element in expr.elements.iter().flatten() {
            let value = self.evaluate(&element.value, ctx)?;
            tuple.set(element.name.as_str(), value);
        }
        match local_type_name(&expr.class_type) {
            "Quantity" => {
                let value = tuple
                    .get("value")
                    .and_then(CqlValue::as_decimal)
                    .ok_or_else(|| {
                        EvalError::invalid_operand(
                            "Instance",
                            "Quantity instance needs a numeric value element",
                        )
                    })?;
                let unit = tuple.get("unit").and_then(CqlValue::as_string).map(str::to_string);
                Ok(CqlValue::Quantity(CqlQuantity { value, unit }))
            }
            "Code" => {
                let code = tuple
                    .get("code")
                    .and_then(CqlValue::as_string)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        EvalError::invalid_operand("Instance", "Code instance needs a code element")
                    })?;
                Ok(CqlValue::Code(CqlCode {
                    code,
                    system: tuple.get("system").and_then(CqlValue::as_string).map(str::to_string),
                    version: tuple.get("version").and_then(CqlValue::as_string).map(str::to_string),
                    display: tuple.get("display").and_then(CqlValue::as_string).map(str::to_string),
                }))
            }
            "Concept" => {
                let codes = match tuple.get("codes") {
                    Some(CqlValue::List(list)) => list
                        .elements
                        .iter()
                        .filter_map(|element| match element {
                            CqlValue::Code(code) => Some(code.clone()),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                let display = tuple.get("display").and_then(CqlValue::as_string).map(str::to_string);
                Ok(CqlValue::Concept(CqlConcept::new(codes, display)))
            }
            "Ratio" => {
                let numerator = tuple.get("numerator").and_then(CqlValue::as_quantity).cloned();
                let denominator =
                    tuple.get("denominator").and_then(CqlValue::as_quantity).cloned();
                match (numerator, denominator) {
                    (Some(numerator), Some(denominator)) => {
                        Ok(CqlValue::Ratio(CqlRatio::new(numerator, denominator)))
                    }
                    _ => Err(EvalError::invalid_operand(
                        "Instance",
                        "Ratio instance needs numerator and denominator quantities",
                    )),
                }
            }
            _ => Ok(CqlValue::Tuple(tuple)),
        }
    }

    /// `Message` passes its source through. When the condition holds the
    /// message is recorded on the context; Error severity aborts the run.
    fn eval_message(
        &self,
        expr: &MessageExpression,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<CqlValue> {
        let source = self.evaluate(&expr.source, ctx)?;
        let triggered = match &expr.condition {
            Some(condition) => self.evaluate(condition, ctx)?.is_true(),
            None => true,
        };
        if !triggered {
            return Ok(source);
        }

        let code = match &expr.code {
            Some(code) => self.evaluate(code, ctx)?.as_string().map(str::to_string),
            None => None,
        };
        let severity = match &expr.severity {
            Some(severity) => match self.evaluate(severity, ctx)?.as_string() {
                Some(text) => text.parse::<MessageSeverity>()?,
                None => MessageSeverity::Message,
            },
            None => MessageSeverity::Message,
        };
        let text = match &expr.message_expr {
            Some(message) => self
                .evaluate(message, ctx)?
                .as_string()
                .map(str::to_string)
                .unwrap_or_default(),
            None => String::new(),
        };

        ctx.push_message(EmittedMessage {
            severity,
            code: code.clone(),
            text: text.clone(),
        });
        if severity == MessageSeverity::Error {
            return Err(EvalError::MessageRaised { code, message: text });
        }
        Ok(source)
    }
}

/// Innermost scope binding for a name, for operand, alias, and let refs.
fn scope_value(ctx: &EvaluationContext, name: &str) -> EvalResult<CqlValue> {
    ctx.lookup(name)
        .cloned()
        .ok_or_else(|| EvalError::undefined_identifier(name))
}

/// Navigate one property step.
///
/// Tuples and resources answer by element name with null for absent
/// members; over a list the access projects per element. The structured
/// system types expose their public members by their model names.
fn property_of(value: &CqlValue, path: &str) -> EvalResult<CqlValue> {
    match value {
        CqlValue::Null => Ok(CqlValue::Null),
        CqlValue::Tuple(tuple) => Ok(tuple.get(path).cloned().unwrap_or(CqlValue::Null)),
        CqlValue::Resource(resource) => Ok(resource
            .property(path)
            .map(json_to_value)
            .unwrap_or(CqlValue::Null)),
        CqlValue::List(list) => {
            let mut projected = Vec::with_capacity(list.elements.len());
            for element in &list.elements {
                projected.push(property_of(element, path)?);
            }
            Ok(CqlValue::List(CqlList::from_values(projected)))
        }
        CqlValue::Quantity(quantity) => match path {
            "value" => Ok(CqlValue::Decimal(quantity.value)),
            "unit" => Ok(string_or_null(quantity.unit.clone())),
            _ => Err(EvalError::invalid_property(path, "Quantity")),
        },
        CqlValue::Code(code) => match path {
            "code" => Ok(CqlValue::string(code.code.clone())),
            "system" => Ok(string_or_null(code.system.clone())),
            "version" => Ok(string_or_null(code.version.clone())),
            "display" => Ok(string_or_null(code.display.clone())),
            _ => Err(EvalError::invalid_property(path, "Code")),
        },
        CqlValue::Concept(concept) => match path {
            "codes" => Ok(CqlValue::List(CqlList::new(
                CqlType::Code,
                concept.codes.iter().cloned().map(CqlValue::Code).collect(),
            ))),
            "display" => Ok(string_or_null(concept.display.clone())),
            _ => Err(EvalError::invalid_property(path, "Concept")),
        },
        CqlValue::Interval(interval) => match path {
            "low" => Ok(interval.low().cloned().unwrap_or(CqlValue::Null)),
            "high" => Ok(interval.high().cloned().unwrap_or(CqlValue::Null)),
            "lowClosed" => Ok(CqlValue::Boolean(interval.low_closed)),
            "highClosed" => Ok(CqlValue::Boolean(interval.high_closed)),
            _ => Err(EvalError::invalid_property(path, "Interval")),
        },
        other => Err(EvalError::invalid_property(
            path,
            other.get_type().to_string(),
        )),
    }
}

fn string_or_null(text: Option<String>) -> CqlValue {
    text.map(CqlValue::String).unwrap_or(CqlValue::Null)
}

/// Convert a JSON leaf from a resource into the CQL value it denotes.
/// Whole numbers become Integer (or Long past that range), other numbers
/// Decimal; nested objects become resources when they carry a
/// `resourceType` and tuples otherwise.
pub(crate) fn json_to_value(json: &serde_json::Value) -> CqlValue {
    match json {
        serde_json::Value::Null => CqlValue::Null,
        serde_json::Value::Bool(value) => CqlValue::Boolean(*value),
        serde_json::Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                i32::try_from(integer).map_or(CqlValue::Long(integer), CqlValue::Integer)
            } else if let Some(float) = number.as_f64() {
                Decimal::from_f64(float).map_or(CqlValue::Null, CqlValue::Decimal)
            } else {
                CqlValue::Null
            }
        }
        serde_json::Value::String(text) => temporal_or_string(text),
        serde_json::Value::Array(items) => {
            CqlValue::List(CqlList::from_values(items.iter().map(json_to_value).collect()))
        }
        serde_json::Value::Object(fields) => {
            match fields.get("resourceType").and_then(serde_json::Value::as_str) {
                Some(resource_type) => {
                    CqlValue::Resource(CqlResource::new(resource_type, json.clone()))
                }
                None => CqlValue::Tuple(CqlTuple::from_elements(
                    fields.iter().map(|(name, value)| (name.clone(), json_to_value(value))),
                )),
            }
        }
    }
}

/// Strings in full ISO-8601 date or datetime form surface as temporal
/// values, so retrieved data participates in date operators without model
/// info. Only the full `YYYY-MM-DD` prefix qualifies; shorter digit runs
/// (identifiers, codes) stay strings.
fn temporal_or_string(text: &str) -> CqlValue {
    let bytes = text.as_bytes();
    let date_shaped = bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit);
    if date_shaped {
        if bytes.len() == 10 {
            if let Ok(date) = CqlDate::parse(text) {
                return CqlValue::Date(date);
            }
        } else if bytes[10] == b'T' {
            if let Ok(datetime) = CqlDateTime::parse(text) {
                return CqlValue::DateTime(datetime);
            }
        }
    }
    CqlValue::string(text)
}

/// Strip the `{urn:...}` namespace a qualified ELM type name carries.
pub(crate) fn local_type_name(qualified: &str) -> &str {
    qualified.rsplit('}').next().unwrap_or(qualified)
}

fn malformed_literal(type_name: &str, text: &str) -> EvalError {
    EvalError::internal(format!("malformed {type_name} literal '{text}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine(library: serde_json::Value) -> CqlEngine {
        CqlEngine::new(serde_json::from_value(library).unwrap())
    }

    fn expr(expression: serde_json::Value) -> Expression {
        serde_json::from_value(expression).unwrap()
    }

    fn int_lit(value: i32) -> serde_json::Value {
        json!({
            "type": "Literal",
            "valueType": "{urn:hl7-org:elm-types:r1}Integer",
            "value": value.to_string(),
        })
    }

    fn empty_engine() -> CqlEngine {
        engine(json!({"identifier": {"id": "Scratch"}}))
    }

    #[test]
    fn literals_parse_by_their_qualified_type() {
        let engine = empty_engine();
        let mut ctx = EvaluationContext::new();

        let value = engine.evaluate(&expr(int_lit(42)), &mut ctx).unwrap();
        assert_eq!(value, CqlValue::integer(42));

        let value = engine
            .evaluate(
                &expr(json!({
                    "type": "Literal",
                    "valueType": "{urn:hl7-org:elm-types:r1}Decimal",
                    "value": "3.5",
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(value, CqlValue::decimal(Decimal::new(35, 1)));

        let value = engine
            .evaluate(
                &expr(json!({
                    "type": "Literal",
                    "valueType": "{urn:hl7-org:elm-types:r1}Date",
                    "value": "2024-06-15",
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(
            value,
            CqlValue::Date(CqlDate::new(2024, Some(6), Some(15)).unwrap())
        );

        let err = engine
            .evaluate(
                &expr(json!({
                    "type": "Literal",
                    "valueType": "{urn:hl7-org:elm-types:r1}Integer",
                    "value": "forty",
                })),
                &mut ctx,
            )
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn operators_dispatch_through_the_registry() {
        let engine = empty_engine();
        let mut ctx = EvaluationContext::new();

        let sum = engine
            .evaluate(
                &expr(json!({"type": "Add", "operand": [int_lit(1), int_lit(2)]})),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(sum, CqlValue::integer(3));

        let with_null = engine
            .evaluate(
                &expr(json!({"type": "Add", "operand": [int_lit(1), {"type": "Null"}]})),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(with_null, CqlValue::Null);

        let joined = engine
            .evaluate(
                &expr(json!({
                    "type": "Concatenate",
                    "operand": [
                        {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "ab"},
                        {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "cd"},
                    ],
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(joined, CqlValue::string("abcd"));
    }

    #[test]
    fn injected_registry_replaces_the_global_table() {
        let bare: &'static OperatorRegistry = Box::leak(Box::new(OperatorRegistry::empty()));
        let engine = empty_engine().with_registry(bare);
        let mut ctx = EvaluationContext::new();

        let err = engine
            .evaluate(
                &expr(json!({"type": "Add", "operand": [int_lit(1), int_lit(2)]})),
                &mut ctx,
            )
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn definitions_evaluate_in_order_and_cache() {
        let engine = engine(json!({
            "identifier": {"id": "Defs"},
            "statements": {"def": [
                {"name": "One", "expression": int_lit(1)},
                {"name": "Two", "expression": {
                    "type": "Add",
                    "operand": [{"type": "ExpressionRef", "name": "One"}, int_lit(1)],
                }},
                {"name": "Hidden", "accessLevel": "Private", "expression": int_lit(9)},
                {"name": "Exposed", "expression": {"type": "ExpressionRef", "name": "Hidden"}},
            ]},
        }));
        let mut ctx = EvaluationContext::new();

        let result = engine.evaluate_library(&mut ctx).unwrap();
        assert_eq!(result.library, "Defs");
        let values = result.into_values();
        assert_eq!(
            values.keys().collect::<Vec<_>>(),
            vec!["One", "Two", "Exposed"]
        );
        assert_eq!(values["Two"], CqlValue::integer(2));
        // Private defs are evaluable from inside the library
        assert_eq!(values["Exposed"], CqlValue::integer(9));

        let err = engine.evaluate_expression("Missing", &mut ctx).unwrap_err();
        assert_eq!(err, EvalError::undefined_expression("Missing"));
    }

    #[test]
    fn parameters_prefer_supplied_over_default() {
        let engine = engine(json!({
            "identifier": {"id": "Params"},
            "parameters": {"def": [
                {"name": "Threshold", "default": int_lit(5)},
                {"name": "Unset"},
            ]},
        }));

        let mut ctx = EvaluationContext::new();
        let threshold = engine
            .evaluate(&expr(json!({"type": "ParameterRef", "name": "Threshold"})), &mut ctx)
            .unwrap();
        assert_eq!(threshold, CqlValue::integer(5));
        let unset = engine
            .evaluate(&expr(json!({"type": "ParameterRef", "name": "Unset"})), &mut ctx)
            .unwrap();
        assert_eq!(unset, CqlValue::Null);

        let mut ctx = EvaluationContext::new().with_parameter("Threshold", CqlValue::integer(10));
        let threshold = engine
            .evaluate(&expr(json!({"type": "ParameterRef", "name": "Threshold"})), &mut ctx)
            .unwrap();
        assert_eq!(threshold, CqlValue::integer(10));

        let err = engine
            .evaluate(&expr(json!({"type": "ParameterRef", "name": "Nope"})), &mut ctx)
            .unwrap_err();
        assert_eq!(err, EvalError::undefined_parameter("Nope"));
    }

    #[test]
    fn functions_bind_operands_in_a_fresh_scope() {
        let engine = engine(json!({
            "identifier": {"id": "Funcs"},
            "statements": {
                "def": [],
                "functions": [{
                    "name": "Double",
                    "operand": [{"name": "x"}],
                    "expression": {
                        "type": "Multiply",
                        "operand": [{"type": "OperandRef", "name": "x"}, int_lit(2)],
                    },
                }],
            },
        }));
        let mut ctx = EvaluationContext::new();

        let doubled = engine
            .evaluate(
                &expr(json!({"type": "FunctionRef", "name": "Double", "operand": [int_lit(21)]})),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(doubled, CqlValue::integer(42));

        // Arity is part of resolution
        let err = engine
            .evaluate(&expr(json!({"type": "FunctionRef", "name": "Double"})), &mut ctx)
            .unwrap_err();
        assert_eq!(err, EvalError::undefined_function("Double"));
    }

    #[test]
    fn terminology_refs_resolve_to_canonical_identifiers() {
        let engine = engine(json!({
            "identifier": {"id": "Term"},
            "codeSystems": {"def": [
                {"name": "LOINC", "id": "http://loinc.org", "version": "2.77"},
            ]},
            "valueSets": {"def": [
                {"name": "BP Panel", "id": "http://example.org/vs/bp"},
            ]},
            "codes": {"def": [
                {"name": "Systolic BP", "id": "8480-6", "display": "Systolic blood pressure",
                 "codeSystem": {"name": "LOINC"}},
            ]},
            "concepts": {"def": [
                {"name": "BP", "display": "Blood pressure", "code": [
                    {"type": "CodeRef", "name": "Systolic BP"},
                ]},
            ]},
        }));
        let mut ctx = EvaluationContext::new();

        let code = engine
            .evaluate(&expr(json!({"type": "CodeRef", "name": "Systolic BP"})), &mut ctx)
            .unwrap();
        let CqlValue::Code(code) = code else { panic!("expected a code") };
        assert_eq!(code.code, "8480-6");
        assert_eq!(code.system.as_deref(), Some("http://loinc.org"));
        assert_eq!(code.version.as_deref(), Some("2.77"));

        let concept = engine
            .evaluate(&expr(json!({"type": "ConceptRef", "name": "BP"})), &mut ctx)
            .unwrap();
        let CqlValue::Concept(concept) = concept else { panic!("expected a concept") };
        assert_eq!(concept.codes.len(), 1);
        assert_eq!(concept.display.as_deref(), Some("Blood pressure"));

        let value_set = engine
            .evaluate(&expr(json!({"type": "ValueSetRef", "name": "BP Panel"})), &mut ctx)
            .unwrap();
        assert_eq!(
            value_set,
            CqlValue::ValueSet(
                CqlVocabularyRef::new("http://example.org/vs/bp").with_name("BP Panel")
            )
        );

        let err = engine
            .evaluate(&expr(json!({"type": "ValueSetRef", "name": "Missing"})), &mut ctx)
            .unwrap_err();
        assert_eq!(err, EvalError::ValueSetNotFound { id: "Missing".to_string() });
    }

    #[test]
    fn qualified_refs_reach_included_libraries_but_not_private_defs() {
        let engine = engine(json!({
            "identifier": {"id": "Main"},
            "includes": {"def": [
                {"localIdentifier": "Common", "path": "CommonLogic"},
            ]},
        }))
        .with_library(
            serde_json::from_value(json!({
                "identifier": {"id": "CommonLogic"},
                "statements": {"def": [
                    {"name": "Shared", "expression": int_lit(7)},
                    {"name": "Secret", "accessLevel": "Private", "expression": int_lit(8)},
                ]},
            }))
            .unwrap(),
        );
        let mut ctx = EvaluationContext::new();

        let shared = engine
            .evaluate(
                &expr(json!({"type": "ExpressionRef", "libraryName": "Common", "name": "Shared"})),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(shared, CqlValue::integer(7));

        let err = engine
            .evaluate(
                &expr(json!({"type": "ExpressionRef", "libraryName": "Common", "name": "Secret"})),
                &mut ctx,
            )
            .unwrap_err();
        assert_eq!(err, EvalError::undefined_expression("Secret"));

        let err = engine
            .evaluate(
                &expr(json!({"type": "ExpressionRef", "libraryName": "Nope", "name": "X"})),
                &mut ctx,
            )
            .unwrap_err();
        assert_eq!(err, EvalError::undefined_library("Nope"));
    }

    #[test]
    fn conditionals_take_the_null_path_to_else() {
        let engine = empty_engine();
        let mut ctx = EvaluationContext::new();

        let value = engine
            .evaluate(
                &expr(json!({
                    "type": "If",
                    "condition": {"type": "Null"},
                    "then": int_lit(1),
                    "else": int_lit(2),
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(value, CqlValue::integer(2));

        // Selected case matches on equivalence, so a null comparand can
        // still select a null when
        let value = engine
            .evaluate(
                &expr(json!({
                    "type": "Case",
                    "comparand": {"type": "Null"},
                    "caseItem": [
                        {"when": int_lit(1), "then": int_lit(10)},
                        {"when": {"type": "Null"}, "then": int_lit(20)},
                    ],
                    "else": int_lit(30),
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(value, CqlValue::integer(20));
    }

    #[test]
    fn coalesce_returns_the_first_present_value() {
        let engine = empty_engine();
        let mut ctx = EvaluationContext::new();

        let value = engine
            .evaluate(
                &expr(json!({
                    "type": "Coalesce",
                    "operand": [{"type": "Null"}, int_lit(4), int_lit(5)],
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(value, CqlValue::integer(4));

        // Single-operand form reaches into the list
        let value = engine
            .evaluate(
                &expr(json!({
                    "type": "Coalesce",
                    "operand": [{"type": "List", "element": [{"type": "Null"}, int_lit(6)]}],
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(value, CqlValue::integer(6));
    }

    #[test]
    fn tuples_and_instances_build_structured_values() {
        let engine = empty_engine();
        let mut ctx = EvaluationContext::new();

        let tuple = engine
            .evaluate(
                &expr(json!({
                    "type": "Tuple",
                    "element": [{"name": "id", "value": int_lit(1)}],
                })),
                &mut ctx,
            )
            .unwrap();
        let CqlValue::Tuple(tuple) = tuple else { panic!("expected a tuple") };
        assert_eq!(tuple.get("id"), Some(&CqlValue::integer(1)));

        let quantity = engine
            .evaluate(
                &expr(json!({
                    "type": "Instance",
                    "classType": "{urn:hl7-org:elm-types:r1}Quantity",
                    "element": [
                        {"name": "value", "value": {
                            "type": "Literal",
                            "valueType": "{urn:hl7-org:elm-types:r1}Decimal",
                            "value": "6.5",
                        }},
                        {"name": "unit", "value": {
                            "type": "Literal",
                            "valueType": "{urn:hl7-org:elm-types:r1}String",
                            "value": "mg",
                        }},
                    ],
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(
            quantity,
            CqlValue::Quantity(CqlQuantity::new(Decimal::new(65, 1), "mg"))
        );
    }

    #[test]
    fn property_steps_navigate_values_and_project_lists() {
        let quantity = CqlValue::Quantity(CqlQuantity::new(Decimal::new(120, 0), "mm[Hg]"));
        assert_eq!(
            property_of(&quantity, "value").unwrap(),
            CqlValue::Decimal(Decimal::new(120, 0))
        );

        let resource = CqlValue::Resource(CqlResource::new(
            "Patient",
            json!({"resourceType": "Patient", "id": "p1", "multipleBirthInteger": 2}),
        ));
        assert_eq!(property_of(&resource, "id").unwrap(), CqlValue::string("p1"));
        assert_eq!(
            property_of(&resource, "multipleBirthInteger").unwrap(),
            CqlValue::integer(2)
        );
        assert_eq!(property_of(&resource, "absent").unwrap(), CqlValue::Null);

        let tuples = CqlValue::list(vec![
            CqlValue::Tuple(CqlTuple::from_elements([("x", CqlValue::integer(1))])),
            CqlValue::Tuple(CqlTuple::from_elements([("y", CqlValue::integer(2))])),
        ]);
        assert_eq!(
            property_of(&tuples, "x").unwrap(),
            CqlValue::list(vec![CqlValue::integer(1), CqlValue::Null])
        );

        let err = property_of(&CqlValue::integer(3), "x").unwrap_err();
        assert_eq!(err, EvalError::invalid_property("x", "Integer"));
    }

    #[test]
    fn json_leaves_map_onto_cql_values() {
        assert_eq!(json_to_value(&json!(true)), CqlValue::boolean(true));
        assert_eq!(json_to_value(&json!(3)), CqlValue::integer(3));
        assert_eq!(json_to_value(&json!(5_000_000_000_i64)), CqlValue::long(5_000_000_000));
        assert_eq!(json_to_value(&json!(2.5)), CqlValue::decimal(Decimal::new(25, 1)));
        assert_eq!(json_to_value(&json!([1, 2])), CqlValue::list(vec![
            CqlValue::integer(1),
            CqlValue::integer(2),
        ]));

        let nested = json_to_value(&json!({"code": "8480-6"}));
        let CqlValue::Tuple(nested) = nested else { panic!("expected a tuple") };
        assert_eq!(nested.get("code"), Some(&CqlValue::string("8480-6")));

        let resource = json_to_value(&json!({"resourceType": "Observation", "id": "o1"}));
        assert!(matches!(resource, CqlValue::Resource(_)));

        // Full ISO-8601 strings lift to temporal values; shorter runs stay strings
        assert_eq!(
            json_to_value(&json!("2024-03-15")),
            CqlValue::Date(CqlDate::parse("2024-03-15").unwrap())
        );
        assert_eq!(
            json_to_value(&json!("2024-03-15T10:30:00Z")),
            CqlValue::DateTime(CqlDateTime::parse("2024-03-15T10:30:00Z").unwrap())
        );
        assert_eq!(json_to_value(&json!("2024-03")), CqlValue::string("2024-03"));
        assert_eq!(json_to_value(&json!("8480-6")), CqlValue::string("8480-6"));
    }

    #[test]
    fn messages_record_and_error_severity_aborts() {
        let engine = empty_engine();
        let mut ctx = EvaluationContext::new();

        let value = engine
            .evaluate(
                &expr(json!({
                    "type": "Message",
                    "source": int_lit(1),
                    "condition": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}Boolean", "value": "true"},
                    "code": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "W100"},
                    "severity": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "Warning"},
                    "message": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "check input"},
                })),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(value, CqlValue::integer(1));
        assert_eq!(ctx.messages().len(), 1);
        assert_eq!(ctx.messages()[0].severity, MessageSeverity::Warning);
        assert_eq!(ctx.messages()[0].code.as_deref(), Some("W100"));

        let err = engine
            .evaluate(
                &expr(json!({
                    "type": "Message",
                    "source": int_lit(1),
                    "severity": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "Error"},
                    "message": {"type": "Literal", "valueType": "{urn:hl7-org:elm-types:r1}String", "value": "boom"},
                })),
                &mut ctx,
            )
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::MessageRaised { code: None, message: "boom".to_string() }
        );
    }

    #[test]
    fn self_referential_definitions_hit_the_depth_limit() {
        let engine = engine(json!({
            "identifier": {"id": "Loop"},
            "statements": {"def": [
                {"name": "Forever", "expression": {"type": "ExpressionRef", "name": "Forever"}},
            ]},
        }));
        let mut ctx = EvaluationContext::new();

        let err = engine.evaluate_expression("Forever", &mut ctx).unwrap_err();
        assert_eq!(err, EvalError::RecursionLimit);
    }

    #[test]
    fn tracing_records_one_entry_per_node() {
        let engine = empty_engine();
        let mut ctx = EvaluationContext::new().with_tracing();

        engine
            .evaluate(
                &expr(json!({"type": "Add", "operand": [int_lit(1), int_lit(2)]})),
                &mut ctx,
            )
            .unwrap();

        let trace = ctx.take_trace().unwrap();
        let kinds: Vec<_> = trace.entries().iter().map(|entry| entry.kind).collect();
        // Completion order: operands first, then the Add
        assert_eq!(kinds, vec!["Literal", "Literal", "Add"]);
        assert_eq!(trace.entries()[2].outcome, "3");
        assert_eq!(trace.entries()[2].depth, 0);
        assert_eq!(trace.entries()[0].depth, 1);
    }
}
