//! ELM model per the HL7 ELM specification
//!
//! Every expression the evaluator can encounter is a variant of
//! [`Expression`]; there is no open extension point. The serde layout
//! matches ELM JSON: expressions are tagged with `type`, node fields are
//! camelCase, and unknown fields are skipped on input.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use lumen_cql_types::{CqlType, TupleTypeElement};

// ============================================================================
// Library Structure
// ============================================================================

/// Root element of a compiled CQL library.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub identifier: VersionedIdentifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_identifier: Option<VersionedIdentifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usings: Option<UsingDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includes: Option<IncludeDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ParameterDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_systems: Option<CodeSystemDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_sets: Option<ValueSetDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes: Option<CodeDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concepts: Option<ConceptDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<ContextDefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements: Option<Statements>,
}

impl Library {
    pub fn new(id: impl Into<String>, version: Option<String>) -> Self {
        Self {
            identifier: VersionedIdentifier {
                id: id.into(),
                system: None,
                version,
            },
            schema_identifier: Some(VersionedIdentifier {
                id: "urn:hl7-org:elm".to_string(),
                system: None,
                version: Some("r1".to_string()),
            }),
            usings: None,
            includes: None,
            parameters: None,
            code_systems: None,
            value_sets: None,
            codes: None,
            concepts: None,
            contexts: None,
            statements: None,
        }
    }

    /// All expression definitions, in declaration order.
    pub fn expression_defs(&self) -> impl Iterator<Item = &ExpressionDef> {
        self.statements.iter().flat_map(|s| s.defs.iter())
    }

    /// All function definitions, in declaration order.
    pub fn function_defs(&self) -> impl Iterator<Item = &FunctionDef> {
        self.statements.iter().flat_map(|s| s.functions.iter())
    }
}

/// Identifier plus optional version for libraries and schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedIdentifier {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// ELM wraps each definition list in a single-field object keyed "def".

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsingDefs {
    #[serde(rename = "def")]
    pub defs: Vec<UsingDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IncludeDefs {
    #[serde(rename = "def")]
    pub defs: Vec<IncludeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParameterDefs {
    #[serde(rename = "def")]
    pub defs: Vec<ParameterDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodeSystemDefs {
    #[serde(rename = "def")]
    pub defs: Vec<CodeSystemDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValueSetDefs {
    #[serde(rename = "def")]
    pub defs: Vec<ValueSetDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodeDefs {
    #[serde(rename = "def")]
    pub defs: Vec<CodeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConceptDefs {
    #[serde(rename = "def")]
    pub defs: Vec<ConceptDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextDefs {
    #[serde(rename = "def")]
    pub defs: Vec<ContextDef>,
}

/// Expression and function statements. ELM serializes both under `def`;
/// entries with a `FunctionDef` type land in `functions` after load.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Statements {
    #[serde(rename = "def")]
    pub defs: Vec<ExpressionDef>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub functions: Vec<FunctionDef>,
}

impl<'de> Deserialize<'de> for Statements {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize, Default)]
        struct Raw {
            #[serde(default)]
            def: Vec<serde_json::Value>,
            #[serde(default)]
            functions: Vec<FunctionDef>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let mut statements = Statements {
            defs: Vec::new(),
            functions: raw.functions,
        };
        for entry in raw.def {
            let tag = entry.get("type").and_then(serde_json::Value::as_str);
            if tag == Some("FunctionDef") {
                statements
                    .functions
                    .push(FunctionDef::deserialize(entry).map_err(serde::de::Error::custom)?);
            } else {
                statements
                    .defs
                    .push(ExpressionDef::deserialize(entry).map_err(serde::de::Error::custom)?);
            }
        }
        Ok(statements)
    }
}

// ============================================================================
// Definitions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsingDef {
    pub local_identifier: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeDef {
    pub local_identifier: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Externally supplied value, optionally with a default expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessModifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_type_specifier: Option<TypeSpecifier>,
    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_expr: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemDef {
    pub name: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessModifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetDef {
    pub name: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessModifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_system: Option<Vec<CodeSystemRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeDef {
    pub name: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessModifier>,
    pub code_system: CodeSystemRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessModifier>,
    pub code: Vec<CodeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDef {
    pub name: String,
}

/// Named expression statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessModifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type_specifier: Option<TypeSpecifier>,
}

/// User-defined function statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessModifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fluent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<Vec<OperandDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type_specifier: Option<TypeSpecifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperandDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand_type_specifier: Option<TypeSpecifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AccessModifier {
    Public,
    Private,
}

// ============================================================================
// Type Specifiers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TypeSpecifier {
    #[serde(rename = "NamedTypeSpecifier")]
    Named(NamedTypeSpecifier),
    #[serde(rename = "ListTypeSpecifier")]
    List(ListTypeSpecifier),
    #[serde(rename = "IntervalTypeSpecifier")]
    Interval(IntervalTypeSpecifier),
    #[serde(rename = "TupleTypeSpecifier")]
    Tuple(TupleTypeSpecifier),
    #[serde(rename = "ChoiceTypeSpecifier")]
    Choice(ChoiceTypeSpecifier),
}

impl TypeSpecifier {
    /// Resolve this specifier to the runtime type it denotes.
    pub fn to_cql_type(&self) -> CqlType {
        match self {
            Self::Named(named) => {
                let system = named
                    .namespace
                    .as_deref()
                    .is_none_or(|ns| ns == "System" || ns.starts_with("urn:hl7-org:elm-types"));
                if system {
                    CqlType::parse_qualified(&named.name)
                } else {
                    CqlType::Named {
                        namespace: named.namespace.clone(),
                        name: named.name.clone(),
                    }
                }
            }
            Self::List(list) => CqlType::List(Box::new(list.element_type.to_cql_type())),
            Self::Interval(interval) => {
                CqlType::Interval(Box::new(interval.point_type.to_cql_type()))
            }
            Self::Tuple(tuple) => CqlType::Tuple(
                tuple
                    .element
                    .iter()
                    .map(|e| TupleTypeElement {
                        name: e.name.clone(),
                        element_type: e
                            .element_type
                            .as_ref()
                            .map_or(CqlType::Any, |t| t.to_cql_type()),
                    })
                    .collect(),
            ),
            Self::Choice(choice) => {
                CqlType::Choice(choice.choice.iter().map(TypeSpecifier::to_cql_type).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedTypeSpecifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl NamedTypeSpecifier {
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            namespace: Some("System".to_string()),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTypeSpecifier {
    pub element_type: Box<TypeSpecifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalTypeSpecifier {
    pub point_type: Box<TypeSpecifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleTypeSpecifier {
    pub element: Vec<TupleElementDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TupleElementDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_type: Option<Box<TypeSpecifier>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceTypeSpecifier {
    pub choice: Vec<TypeSpecifier>,
}

// ============================================================================
// Base Element
// ============================================================================

/// Fields shared by every ELM node: the source locator and the translator's
/// static result type annotation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type_specifier: Option<TypeSpecifier>,
}

impl Element {
    /// The statically annotated result type, when the translator recorded
    /// one.
    pub fn static_type(&self) -> Option<CqlType> {
        if let Some(spec) = &self.result_type_specifier {
            return Some(spec.to_cql_type());
        }
        self.result_type_name
            .as_deref()
            .map(CqlType::parse_qualified)
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Every expression form the evaluator understands.
///
/// Adding a variant here forces the evaluator's dispatch match to account
/// for it; an ELM document using a `type` not listed fails at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expression {
    // Literals and references
    Null(NullLiteral),
    Literal(Literal),
    ExpressionRef(ExpressionRef),
    FunctionRef(FunctionRef),
    ParameterRef(ParameterRef),
    ValueSetRef(ValueSetRef),
    CodeSystemRef(CodeSystemRef),
    CodeRef(CodeRef),
    ConceptRef(ConceptRef),
    OperandRef(OperandRef),
    AliasRef(AliasRef),
    QueryLetRef(QueryLetRef),
    IdentifierRef(IdentifierRef),
    Property(Property),

    // Arithmetic
    Add(BinaryExpression),
    Subtract(BinaryExpression),
    Multiply(BinaryExpression),
    Divide(BinaryExpression),
    TruncatedDivide(BinaryExpression),
    Modulo(BinaryExpression),
    Ceiling(UnaryExpression),
    Floor(UnaryExpression),
    Truncate(UnaryExpression),
    Abs(UnaryExpression),
    Negate(UnaryExpression),
    Round(RoundExpression),
    Ln(UnaryExpression),
    Exp(UnaryExpression),
    Log(BinaryExpression),
    Power(BinaryExpression),
    Successor(UnaryExpression),
    Predecessor(UnaryExpression),
    MinValue(MinMaxValueExpression),
    MaxValue(MinMaxValueExpression),
    Precision(UnaryExpression),
    LowBoundary(BoundaryExpression),
    HighBoundary(BoundaryExpression),

    // Comparison
    Equal(BinaryExpression),
    Equivalent(BinaryExpression),
    NotEqual(BinaryExpression),
    Less(BinaryExpression),
    Greater(BinaryExpression),
    LessOrEqual(BinaryExpression),
    GreaterOrEqual(BinaryExpression),

    // Logical
    And(BinaryExpression),
    Or(BinaryExpression),
    Xor(BinaryExpression),
    Implies(BinaryExpression),
    Not(UnaryExpression),

    // Nullological and conditional
    IsNull(UnaryExpression),
    IsTrue(UnaryExpression),
    IsFalse(UnaryExpression),
    Coalesce(NaryExpression),
    If(IfExpression),
    Case(CaseExpression),

    // String
    Concatenate(NaryExpression),
    Combine(CombineExpression),
    Split(SplitExpression),
    SplitOnMatches(SplitOnMatchesExpression),
    Length(UnaryExpression),
    Upper(UnaryExpression),
    Lower(UnaryExpression),
    Indexer(BinaryExpression),
    PositionOf(PositionOfExpression),
    LastPositionOf(LastPositionOfExpression),
    Substring(SubstringExpression),
    StartsWith(BinaryExpression),
    EndsWith(BinaryExpression),
    Matches(BinaryExpression),
    ReplaceMatches(TernaryExpression),

    // Date and time
    Now(NowExpression),
    Today(TodayExpression),
    TimeOfDay(TimeOfDayExpression),
    Date(DateExpression),
    DateTime(DateTimeExpression),
    Time(TimeExpression),
    DateFrom(UnaryExpression),
    TimeFrom(UnaryExpression),
    TimezoneOffsetFrom(UnaryExpression),
    DateTimeComponentFrom(DateTimeComponentFromExpression),
    DurationBetween(DurationBetweenExpression),
    DifferenceBetween(DifferenceBetweenExpression),
    SameAs(SameAsExpression),
    SameOrBefore(SameOrBeforeExpression),
    SameOrAfter(SameOrAfterExpression),

    // Interval
    Interval(IntervalExpression),
    Start(UnaryExpression),
    End(UnaryExpression),
    PointFrom(UnaryExpression),
    Width(UnaryExpression),
    Size(UnaryExpression),
    Contains(BinaryExpression),
    In(BinaryExpression),
    Includes(BinaryExpression),
    IncludedIn(BinaryExpression),
    ProperContains(BinaryExpression),
    ProperIn(BinaryExpression),
    ProperIncludes(BinaryExpression),
    ProperIncludedIn(BinaryExpression),
    Before(BeforeAfterExpression),
    After(BeforeAfterExpression),
    Meets(BinaryExpression),
    MeetsBefore(BinaryExpression),
    MeetsAfter(BinaryExpression),
    Overlaps(BinaryExpression),
    OverlapsBefore(BinaryExpression),
    OverlapsAfter(BinaryExpression),
    Starts(BinaryExpression),
    Ends(BinaryExpression),
    Collapse(UnaryExpression),
    Union(BinaryExpression),
    Intersect(BinaryExpression),
    Except(BinaryExpression),

    // List
    List(ListExpression),
    Exists(UnaryExpression),
    First(FirstLastExpression),
    Last(FirstLastExpression),
    Slice(SliceExpression),
    IndexOf(IndexOfExpression),
    Flatten(UnaryExpression),
    Tail(UnaryExpression),
    Sort(SortExpression),
    Distinct(UnaryExpression),
    SingletonFrom(UnaryExpression),

    // Aggregate
    Count(AggregateExpression),
    Sum(AggregateExpression),
    Product(AggregateExpression),
    Min(AggregateExpression),
    Max(AggregateExpression),
    Avg(AggregateExpression),
    GeometricMean(AggregateExpression),
    Median(AggregateExpression),
    Mode(AggregateExpression),
    Variance(AggregateExpression),
    StdDev(AggregateExpression),
    PopulationVariance(AggregateExpression),
    PopulationStdDev(AggregateExpression),
    AllTrue(AggregateExpression),
    AnyTrue(AggregateExpression),

    // Type operations
    As(AsExpression),
    Convert(ConvertExpression),
    Is(IsExpression),
    CanConvert(CanConvertExpression),
    ToBoolean(UnaryExpression),
    ToChars(UnaryExpression),
    ToConcept(UnaryExpression),
    ToDate(UnaryExpression),
    ToDateTime(UnaryExpression),
    ToDecimal(UnaryExpression),
    ToInteger(UnaryExpression),
    ToLong(UnaryExpression),
    ToList(UnaryExpression),
    ToQuantity(UnaryExpression),
    ToRatio(UnaryExpression),
    ToString(UnaryExpression),
    ToTime(UnaryExpression),
    ConvertsToBoolean(UnaryExpression),
    ConvertsToDate(UnaryExpression),
    ConvertsToDateTime(UnaryExpression),
    ConvertsToDecimal(UnaryExpression),
    ConvertsToInteger(UnaryExpression),
    ConvertsToLong(UnaryExpression),
    ConvertsToQuantity(UnaryExpression),
    ConvertsToRatio(UnaryExpression),
    ConvertsToString(UnaryExpression),
    ConvertsToTime(UnaryExpression),

    // Clinical
    Code(CodeLiteralExpression),
    Concept(ConceptLiteralExpression),
    Quantity(QuantityExpression),
    Ratio(RatioExpression),
    InCodeSystem(InCodeSystemExpression),
    AnyInCodeSystem(AnyInCodeSystemExpression),
    InValueSet(InValueSetExpression),
    AnyInValueSet(AnyInValueSetExpression),
    CalculateAge(CalculateAgeExpression),
    CalculateAgeAt(CalculateAgeAtExpression),

    // Query
    Query(Query),
    Retrieve(Retrieve),

    // Structured values
    Tuple(TupleExpression),
    Instance(InstanceExpression),

    // Diagnostics
    Message(MessageExpression),
}

impl Expression {
    /// The shared base element of this node.
    pub fn element(&self) -> &Element {
        use Expression::*;
        match self {
            Null(e) => &e.element,
            Literal(e) => &e.element,
            ExpressionRef(e) => &e.element,
            FunctionRef(e) => &e.element,
            ParameterRef(e) => &e.element,
            ValueSetRef(e) => &e.element,
            CodeSystemRef(e) => &e.element,
            CodeRef(e) => &e.element,
            ConceptRef(e) => &e.element,
            OperandRef(e) => &e.element,
            AliasRef(e) => &e.element,
            QueryLetRef(e) => &e.element,
            IdentifierRef(e) => &e.element,
            Property(e) => &e.element,
            Ceiling(e) | Floor(e) | Truncate(e) | Abs(e) | Negate(e) | Ln(e) | Exp(e)
            | Successor(e) | Predecessor(e) | Precision(e) | Not(e) | IsNull(e) | IsTrue(e)
            | IsFalse(e) | Length(e) | Upper(e) | Lower(e) | DateFrom(e) | TimeFrom(e)
            | TimezoneOffsetFrom(e) | Start(e) | End(e) | PointFrom(e) | Width(e) | Size(e)
            | Collapse(e) | Exists(e) | Flatten(e) | Tail(e) | Distinct(e) | SingletonFrom(e)
            | ToBoolean(e) | ToChars(e) | ToConcept(e) | ToDate(e) | ToDateTime(e)
            | ToDecimal(e) | ToInteger(e) | ToLong(e) | ToList(e) | ToQuantity(e) | ToRatio(e)
            | ToString(e) | ToTime(e) | ConvertsToBoolean(e) | ConvertsToDate(e)
            | ConvertsToDateTime(e) | ConvertsToDecimal(e) | ConvertsToInteger(e)
            | ConvertsToLong(e) | ConvertsToQuantity(e) | ConvertsToRatio(e)
            | ConvertsToString(e) | ConvertsToTime(e) => &e.element,
            Add(e) | Subtract(e) | Multiply(e) | Divide(e) | TruncatedDivide(e) | Modulo(e)
            | Log(e) | Power(e) | Equal(e) | Equivalent(e) | NotEqual(e) | Less(e)
            | Greater(e) | LessOrEqual(e) | GreaterOrEqual(e) | And(e) | Or(e) | Xor(e)
            | Implies(e) | Indexer(e) | StartsWith(e) | EndsWith(e) | Matches(e)
            | Contains(e) | In(e) | Includes(e) | IncludedIn(e) | ProperContains(e)
            | ProperIn(e) | ProperIncludes(e) | ProperIncludedIn(e) | Meets(e)
            | MeetsBefore(e) | MeetsAfter(e) | Overlaps(e) | OverlapsBefore(e)
            | OverlapsAfter(e) | Starts(e) | Ends(e) | Union(e) | Intersect(e) | Except(e) => {
                &e.element
            }
            Before(e) | After(e) => &e.element,
            ReplaceMatches(e) => &e.element,
            Coalesce(e) | Concatenate(e) => &e.element,
            If(e) => &e.element,
            Case(e) => &e.element,
            Round(e) => &e.element,
            MinValue(e) | MaxValue(e) => &e.element,
            LowBoundary(e) | HighBoundary(e) => &e.element,
            Combine(e) => &e.element,
            Split(e) => &e.element,
            SplitOnMatches(e) => &e.element,
            PositionOf(e) => &e.element,
            LastPositionOf(e) => &e.element,
            Substring(e) => &e.element,
            Now(e) => &e.element,
            Today(e) => &e.element,
            TimeOfDay(e) => &e.element,
            Date(e) => &e.element,
            DateTime(e) => &e.element,
            Time(e) => &e.element,
            DateTimeComponentFrom(e) => &e.element,
            DurationBetween(e) => &e.element,
            DifferenceBetween(e) => &e.element,
            SameAs(e) => &e.element,
            SameOrBefore(e) => &e.element,
            SameOrAfter(e) => &e.element,
            Interval(e) => &e.element,
            List(e) => &e.element,
            First(e) | Last(e) => &e.element,
            Slice(e) => &e.element,
            IndexOf(e) => &e.element,
            Sort(e) => &e.element,
            Count(e) | Sum(e) | Product(e) | Min(e) | Max(e) | Avg(e) | GeometricMean(e)
            | Median(e) | Mode(e) | Variance(e) | StdDev(e) | PopulationVariance(e)
            | PopulationStdDev(e) | AllTrue(e) | AnyTrue(e) => &e.element,
            As(e) => &e.element,
            Convert(e) => &e.element,
            Is(e) => &e.element,
            CanConvert(e) => &e.element,
            Code(e) => &e.element,
            Concept(e) => &e.element,
            Quantity(e) => &e.element,
            Ratio(e) => &e.element,
            InCodeSystem(e) => &e.element,
            AnyInCodeSystem(e) => &e.element,
            InValueSet(e) => &e.element,
            AnyInValueSet(e) => &e.element,
            CalculateAge(e) => &e.element,
            CalculateAgeAt(e) => &e.element,
            Query(e) => &e.element,
            Retrieve(e) => &e.element,
            Tuple(e) => &e.element,
            Instance(e) => &e.element,
            Message(e) => &e.element,
        }
    }

    /// The ELM node name, as written in the serialized `type` tag.
    pub fn kind_name(&self) -> &'static str {
        use Expression::*;
        match self {
            Null(_) => "Null",
            Literal(_) => "Literal",
            ExpressionRef(_) => "ExpressionRef",
            FunctionRef(_) => "FunctionRef",
            ParameterRef(_) => "ParameterRef",
            ValueSetRef(_) => "ValueSetRef",
            CodeSystemRef(_) => "CodeSystemRef",
            CodeRef(_) => "CodeRef",
            ConceptRef(_) => "ConceptRef",
            OperandRef(_) => "OperandRef",
            AliasRef(_) => "AliasRef",
            QueryLetRef(_) => "QueryLetRef",
            IdentifierRef(_) => "IdentifierRef",
            Property(_) => "Property",
            Add(_) => "Add",
            Subtract(_) => "Subtract",
            Multiply(_) => "Multiply",
            Divide(_) => "Divide",
            TruncatedDivide(_) => "TruncatedDivide",
            Modulo(_) => "Modulo",
            Ceiling(_) => "Ceiling",
            Floor(_) => "Floor",
            Truncate(_) => "Truncate",
            Abs(_) => "Abs",
            Negate(_) => "Negate",
            Round(_) => "Round",
            Ln(_) => "Ln",
            Exp(_) => "Exp",
            Log(_) => "Log",
            Power(_) => "Power",
            Successor(_) => "Successor",
            Predecessor(_) => "Predecessor",
            MinValue(_) => "MinValue",
            MaxValue(_) => "MaxValue",
            Precision(_) => "Precision",
            LowBoundary(_) => "LowBoundary",
            HighBoundary(_) => "HighBoundary",
            Equal(_) => "Equal",
            Equivalent(_) => "Equivalent",
            NotEqual(_) => "NotEqual",
            Less(_) => "Less",
            Greater(_) => "Greater",
            LessOrEqual(_) => "LessOrEqual",
            GreaterOrEqual(_) => "GreaterOrEqual",
            And(_) => "And",
            Or(_) => "Or",
            Xor(_) => "Xor",
            Implies(_) => "Implies",
            Not(_) => "Not",
            IsNull(_) => "IsNull",
            IsTrue(_) => "IsTrue",
            IsFalse(_) => "IsFalse",
            Coalesce(_) => "Coalesce",
            If(_) => "If",
            Case(_) => "Case",
            Concatenate(_) => "Concatenate",
            Combine(_) => "Combine",
            Split(_) => "Split",
            SplitOnMatches(_) => "SplitOnMatches",
            Length(_) => "Length",
            Upper(_) => "Upper",
            Lower(_) => "Lower",
            Indexer(_) => "Indexer",
            PositionOf(_) => "PositionOf",
            LastPositionOf(_) => "LastPositionOf",
            Substring(_) => "Substring",
            StartsWith(_) => "StartsWith",
            EndsWith(_) => "EndsWith",
            Matches(_) => "Matches",
            ReplaceMatches(_) => "ReplaceMatches",
            Now(_) => "Now",
            Today(_) => "Today",
            TimeOfDay(_) => "TimeOfDay",
            Date(_) => "Date",
            DateTime(_) => "DateTime",
            Time(_) => "Time",
            DateFrom(_) => "DateFrom",
            TimeFrom(_) => "TimeFrom",
            TimezoneOffsetFrom(_) => "TimezoneOffsetFrom",
            DateTimeComponentFrom(_) => "DateTimeComponentFrom",
            DurationBetween(_) => "DurationBetween",
            DifferenceBetween(_) => "DifferenceBetween",
            SameAs(_) => "SameAs",
            SameOrBefore(_) => "SameOrBefore",
            SameOrAfter(_) => "SameOrAfter",
            Interval(_) => "Interval",
            Start(_) => "Start",
            End(_) => "End",
            PointFrom(_) => "PointFrom",
            Width(_) => "Width",
            Size(_) => "Size",
            Contains(_) => "Contains",
            In(_) => "In",
            Includes(_) => "Includes",
            IncludedIn(_) => "IncludedIn",
            ProperContains(_) => "ProperContains",
            ProperIn(_) => "ProperIn",
            ProperIncludes(_) => "ProperIncludes",
            ProperIncludedIn(_) => "ProperIncludedIn",
            Before(_) => "Before",
            After(_) => "After",
            Meets(_) => "Meets",
            MeetsBefore(_) => "MeetsBefore",
            MeetsAfter(_) => "MeetsAfter",
            Overlaps(_) => "Overlaps",
            OverlapsBefore(_) => "OverlapsBefore",
            OverlapsAfter(_) => "OverlapsAfter",
            Starts(_) => "Starts",
            Ends(_) => "Ends",
            Collapse(_) => "Collapse",
            Union(_) => "Union",
            Intersect(_) => "Intersect",
            Except(_) => "Except",
            List(_) => "List",
            Exists(_) => "Exists",
            First(_) => "First",
            Last(_) => "Last",
            Slice(_) => "Slice",
            IndexOf(_) => "IndexOf",
            Flatten(_) => "Flatten",
            Tail(_) => "Tail",
            Sort(_) => "Sort",
            Distinct(_) => "Distinct",
            SingletonFrom(_) => "SingletonFrom",
            Count(_) => "Count",
            Sum(_) => "Sum",
            Product(_) => "Product",
            Min(_) => "Min",
            Max(_) => "Max",
            Avg(_) => "Avg",
            GeometricMean(_) => "GeometricMean",
            Median(_) => "Median",
            Mode(_) => "Mode",
            Variance(_) => "Variance",
            StdDev(_) => "StdDev",
            PopulationVariance(_) => "PopulationVariance",
            PopulationStdDev(_) => "PopulationStdDev",
            AllTrue(_) => "AllTrue",
            AnyTrue(_) => "AnyTrue",
            As(_) => "As",
            Convert(_) => "Convert",
            Is(_) => "Is",
            CanConvert(_) => "CanConvert",
            ToBoolean(_) => "ToBoolean",
            ToChars(_) => "ToChars",
            ToConcept(_) => "ToConcept",
            ToDate(_) => "ToDate",
            ToDateTime(_) => "ToDateTime",
            ToDecimal(_) => "ToDecimal",
            ToInteger(_) => "ToInteger",
            ToLong(_) => "ToLong",
            ToList(_) => "ToList",
            ToQuantity(_) => "ToQuantity",
            ToRatio(_) => "ToRatio",
            ToString(_) => "ToString",
            ToTime(_) => "ToTime",
            ConvertsToBoolean(_) => "ConvertsToBoolean",
            ConvertsToDate(_) => "ConvertsToDate",
            ConvertsToDateTime(_) => "ConvertsToDateTime",
            ConvertsToDecimal(_) => "ConvertsToDecimal",
            ConvertsToInteger(_) => "ConvertsToInteger",
            ConvertsToLong(_) => "ConvertsToLong",
            ConvertsToQuantity(_) => "ConvertsToQuantity",
            ConvertsToRatio(_) => "ConvertsToRatio",
            ConvertsToString(_) => "ConvertsToString",
            ConvertsToTime(_) => "ConvertsToTime",
            Code(_) => "Code",
            Concept(_) => "Concept",
            Quantity(_) => "Quantity",
            Ratio(_) => "Ratio",
            InCodeSystem(_) => "InCodeSystem",
            AnyInCodeSystem(_) => "AnyInCodeSystem",
            InValueSet(_) => "InValueSet",
            AnyInValueSet(_) => "AnyInValueSet",
            CalculateAge(_) => "CalculateAge",
            CalculateAgeAt(_) => "CalculateAgeAt",
            Query(_) => "Query",
            Retrieve(_) => "Retrieve",
            Tuple(_) => "Tuple",
            Instance(_) => "Instance",
            Message(_) => "Message",
        }
    }

    /// The statically known result type: the translator's annotation when
    /// present, otherwise what the node form itself implies. `None` means
    /// the type is only known at runtime.
    pub fn static_type(&self) -> Option<CqlType> {
        if let Some(annotated) = self.element().static_type() {
            return Some(annotated);
        }
        match self {
            Self::Null(_) => Some(CqlType::Any),
            Self::Literal(lit) => Some(CqlType::parse_qualified(&lit.value_type)),
            Self::Quantity(_) => Some(CqlType::Quantity),
            Self::Ratio(_) => Some(CqlType::Ratio),
            Self::Code(_) => Some(CqlType::Code),
            Self::Concept(_) => Some(CqlType::Concept),
            Self::Date(_) | Self::Today(_) => Some(CqlType::Date),
            Self::DateTime(_) | Self::Now(_) => Some(CqlType::DateTime),
            Self::Time(_) | Self::TimeOfDay(_) => Some(CqlType::Time),
            Self::List(list) => list.type_specifier.as_ref().map(|spec| match spec.to_cql_type()
            {
                t @ CqlType::List(_) => t,
                element => CqlType::List(Box::new(element)),
            }),
            _ => None,
        }
    }
}

// ============================================================================
// Literals and References
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NullLiteral {
    #[serde(flatten)]
    pub element: Element,
}

/// Scalar literal carried as its source text plus a qualified type name
/// such as `{urn:hl7-org:elm-types:r1}Integer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Literal {
    #[serde(flatten)]
    pub element: Element,
    pub value_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<Vec<Box<Expression>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
}

/// Reference to a function operand from inside the function body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperandRef {
    #[serde(flatten)]
    pub element: Element,
    pub name: String,
}

/// Reference to a query source alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasRef {
    #[serde(flatten)]
    pub element: Element,
    pub name: String,
}

/// Reference to a query `let` binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLetRef {
    #[serde(flatten)]
    pub element: Element,
    pub name: String,
}

/// Unresolved identifier; the evaluator looks it up through the scope
/// stack at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierRef {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
    pub name: String,
}

/// Property access on a source expression or a named scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Expression>>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

// ============================================================================
// Shared Expression Shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnaryExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TernaryExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaryExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfExpression {
    #[serde(flatten)]
    pub element: Element,
    pub condition: Box<Expression>,
    pub then: Box<Expression>,
    #[serde(rename = "else")]
    pub else_clause: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseExpression {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparand: Option<Box<Expression>>,
    pub case_item: Vec<CaseItem>,
    #[serde(rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_clause: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseItem {
    pub when: Box<Expression>,
    pub then: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<Box<Expression>>,
}

/// MinValue and MaxValue name the type whose extreme is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinMaxValueExpression {
    #[serde(flatten)]
    pub element: Element,
    pub value_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<Box<Expression>>,
}

// ============================================================================
// String Operations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombineExpression {
    #[serde(flatten)]
    pub element: Element,
    pub source: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitExpression {
    #[serde(flatten)]
    pub element: Element,
    pub string_to_split: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOnMatchesExpression {
    #[serde(flatten)]
    pub element: Element,
    pub string_to_split: Box<Expression>,
    pub separator_pattern: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionOfExpression {
    #[serde(flatten)]
    pub element: Element,
    pub pattern: Box<Expression>,
    pub string: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPositionOfExpression {
    #[serde(flatten)]
    pub element: Element,
    pub pattern: Box<Expression>,
    pub string: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstringExpression {
    #[serde(flatten)]
    pub element: Element,
    pub string_to_sub: Box<Expression>,
    pub start_index: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<Box<Expression>>,
}

// ============================================================================
// Date and Time Operations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NowExpression {
    #[serde(flatten)]
    pub element: Element,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TodayExpression {
    #[serde(flatten)]
    pub element: Element,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeOfDayExpression {
    #[serde(flatten)]
    pub element: Element,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateExpression {
    #[serde(flatten)]
    pub element: Element,
    pub year: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeExpression {
    #[serde(flatten)]
    pub element: Element,
    pub year: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub millisecond: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone_offset: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeExpression {
    #[serde(flatten)]
    pub element: Element,
    pub hour: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub millisecond: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeComponentFromExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    pub precision: DateTimePrecision,
}

/// Precision argument carried by temporal operators. Week is a valid
/// duration unit but not a component precision, so conversion to the value
/// side is partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DateTimePrecision {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl DateTimePrecision {
    /// The matching component precision; `None` for Week.
    pub fn value_precision(self) -> Option<lumen_cql_types::DateTimePrecision> {
        use lumen_cql_types::DateTimePrecision as Value;
        match self {
            Self::Year => Some(Value::Year),
            Self::Month => Some(Value::Month),
            Self::Week => None,
            Self::Day => Some(Value::Day),
            Self::Hour => Some(Value::Hour),
            Self::Minute => Some(Value::Minute),
            Self::Second => Some(Value::Second),
            Self::Millisecond => Some(Value::Millisecond),
        }
    }
}

impl std::fmt::Display for DateTimePrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Week => "week",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Millisecond => "millisecond",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationBetweenExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
    pub precision: DateTimePrecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferenceBetweenExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
    pub precision: DateTimePrecision,
}

/// `Before` and `After` over points or intervals. The precision qualifier
/// only applies to point comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeAfterExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<DateTimePrecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SameAsExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<DateTimePrecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SameOrBeforeExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<DateTimePrecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SameOrAfterExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<DateTimePrecision>,
}

// ============================================================================
// Interval and List Construction
// ============================================================================

/// Interval constructor. Closed flags may be static booleans or
/// expressions; both spellings occur in translated output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalExpression {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_closed_expression: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_closed_expression: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_closed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_closed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExpression {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_specifier: Option<TypeSpecifier>,
    #[serde(rename = "element", skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<Box<Expression>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstLastExpression {
    #[serde(flatten)]
    pub element: Element,
    pub source: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceExpression {
    #[serde(flatten)]
    pub element: Element,
    pub source: Box<Expression>,
    pub start_index: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOfExpression {
    #[serde(flatten)]
    pub element: Element,
    pub source: Box<Expression>,
    #[serde(rename = "element")]
    pub element_to_find: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortExpression {
    #[serde(flatten)]
    pub element: Element,
    pub source: Box<Expression>,
    pub by: Vec<SortByItem>,
}

/// One sort key. `path` sorts by a column of the element; `sort_expression`
/// sorts by an expression over `$this`; neither sorts by the element itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortByItem {
    pub direction: SortDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "expression", skip_serializing_if = "Option::is_none")]
    pub sort_expression: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "ascending")]
    Ascending,
    #[serde(rename = "desc")]
    Desc,
    #[serde(rename = "descending")]
    Descending,
}

impl SortDirection {
    pub fn is_descending(self) -> bool {
        matches!(self, Self::Desc | Self::Descending)
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Shared shape of the aggregate operators. `path` projects a property of
/// each source element before aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateExpression {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ============================================================================
// Type Operations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_type_specifier: Option<TypeSpecifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_type_specifier: Option<TypeSpecifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_type_specifier: Option<TypeSpecifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanConvertExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_type_specifier: Option<TypeSpecifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_type: Option<String>,
}

// ============================================================================
// Clinical Operations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLiteralExpression {
    #[serde(flatten)]
    pub element: Element,
    pub system: CodeSystemRef,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptLiteralExpression {
    #[serde(flatten)]
    pub element: Element,
    pub code: Vec<CodeLiteralExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityExpression {
    #[serde(flatten)]
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioExpression {
    #[serde(flatten)]
    pub element: Element,
    pub numerator: Box<QuantityExpression>,
    pub denominator: Box<QuantityExpression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InCodeSystemExpression {
    #[serde(flatten)]
    pub element: Element,
    pub code: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codesystem: Option<CodeSystemRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codesystem_expression: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InValueSetExpression {
    #[serde(flatten)]
    pub element: Element,
    pub code: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valueset: Option<ValueSetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valueset_expression: Option<Box<Expression>>,
}

/// Membership test for a whole list of codes at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyInCodeSystemExpression {
    #[serde(flatten)]
    pub element: Element,
    pub codes: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codesystem: Option<CodeSystemRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codesystem_expression: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyInValueSetExpression {
    #[serde(flatten)]
    pub element: Element,
    pub codes: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valueset: Option<ValueSetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valueset_expression: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateAgeExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Box<Expression>,
    pub precision: DateTimePrecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateAgeAtExpression {
    #[serde(flatten)]
    pub element: Element,
    pub operand: Vec<Box<Expression>>,
    pub precision: DateTimePrecision,
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(flatten)]
    pub element: Element,
    pub source: Vec<AliasedQuerySource>,
    #[serde(rename = "let", skip_serializing_if = "Option::is_none")]
    pub let_clause: Option<Vec<LetClause>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Vec<RelationshipClause>>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Box<Expression>>,
    #[serde(rename = "return", skip_serializing_if = "Option::is_none")]
    pub return_clause: Option<ReturnClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortClause>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasedQuerySource {
    pub expression: Box<Expression>,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetClause {
    pub identifier: String,
    pub expression: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelationshipClause {
    With(WithClause),
    Without(WithoutClause),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithClause {
    pub expression: Box<Expression>,
    pub alias: String,
    pub such_that: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithoutClause {
    pub expression: Box<Expression>,
    pub alias: String,
    pub such_that: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnClause {
    pub expression: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct: Option<bool>,
}

/// Fold over the query iterations: `identifier` names the accumulator,
/// `starting` seeds it, `expression` produces the next value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateClause {
    pub identifier: String,
    pub expression: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortClause {
    pub by: Vec<SortByItem>,
}

/// Data source request against the retrieval provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retrieve {
    #[serde(flatten)]
    pub element: Element,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

// ============================================================================
// Structured Values
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TupleExpression {
    #[serde(flatten)]
    pub element: Element,
    #[serde(rename = "element", skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<TupleElementExpression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TupleElementExpression {
    pub name: String,
    pub value: Box<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceExpression {
    #[serde(flatten)]
    pub element: Element,
    pub class_type: String,
    #[serde(rename = "element", skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<InstanceElementExpression>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceElementExpression {
    pub name: String,
    pub value: Box<Expression>,
}

// ============================================================================
// Message
// ============================================================================

/// Runtime diagnostic: passes `source` through, emitting `message` at
/// `severity` when `condition` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageExpression {
    #[serde(flatten)]
    pub element: Element,
    pub source: Box<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Box<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Box<Expression>>,
    #[serde(rename = "message", skip_serializing_if = "Option::is_none")]
    pub message_expr: Option<Box<Expression>>,
}
