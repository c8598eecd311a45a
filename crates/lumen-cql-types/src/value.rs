//! Runtime representation of CQL values
//!
//! [`CqlValue`] is the closed union every operator consumes and produces.
//! Null is an ordinary member of the union rather than an `Option` wrapper,
//! because almost every operator has defined behavior for null operands and
//! threading `Option` through each of them would bury that logic.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

use crate::temporal::{CqlDate, CqlDateTime, CqlTime};
use crate::type_system::{CqlType, TupleTypeElement};

/// A CQL runtime value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CqlValue {
    /// Missing or unknown
    Null,
    Boolean(bool),
    /// 32-bit Integer
    Integer(i32),
    /// 64-bit Long
    Long(i64),
    Decimal(Decimal),
    String(String),

    Date(CqlDate),
    DateTime(CqlDateTime),
    Time(CqlTime),

    /// Measurement with an optional UCUM unit
    Quantity(CqlQuantity),
    Ratio(CqlRatio),
    Code(CqlCode),
    Concept(CqlConcept),
    /// Reference to a code system definition
    CodeSystem(CqlVocabularyRef),
    /// Reference to a value set definition
    ValueSet(CqlVocabularyRef),

    List(CqlList),
    Interval(CqlInterval),
    Tuple(CqlTuple),
    /// A structured clinical resource backed by its JSON form
    Resource(CqlResource),
}

impl CqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Self::Boolean(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Self::Boolean(false))
    }

    /// The runtime type of this value. Null reports [`CqlType::Any`].
    pub fn get_type(&self) -> CqlType {
        match self {
            Self::Null => CqlType::Any,
            Self::Boolean(_) => CqlType::Boolean,
            Self::Integer(_) => CqlType::Integer,
            Self::Long(_) => CqlType::Long,
            Self::Decimal(_) => CqlType::Decimal,
            Self::String(_) => CqlType::String,
            Self::Date(_) => CqlType::Date,
            Self::DateTime(_) => CqlType::DateTime,
            Self::Time(_) => CqlType::Time,
            Self::Quantity(_) => CqlType::Quantity,
            Self::Ratio(_) => CqlType::Ratio,
            Self::Code(_) => CqlType::Code,
            Self::Concept(_) => CqlType::Concept,
            Self::CodeSystem(_) => CqlType::CodeSystem,
            Self::ValueSet(_) => CqlType::ValueSet,
            Self::List(list) => CqlType::List(Box::new(list.element_type.clone())),
            Self::Interval(interval) => CqlType::Interval(Box::new(interval.point_type.clone())),
            Self::Tuple(tuple) => CqlType::Tuple(
                tuple
                    .elements
                    .iter()
                    .map(|(name, value)| TupleTypeElement {
                        name: name.clone(),
                        element_type: value.get_type(),
                    })
                    .collect(),
            ),
            Self::Resource(resource) => CqlType::Named {
                namespace: None,
                name: resource.resource_type.clone(),
            },
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Long value, promoting Integer.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(l) => Some(*l),
            Self::Integer(i) => Some(i64::from(*i)),
            _ => None,
        }
    }

    /// Decimal value, promoting Integer and Long.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            Self::Long(l) => Some(Decimal::from(*l)),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_quantity(&self) -> Option<&CqlQuantity> {
        match self {
            Self::Quantity(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&CqlCode> {
        match self {
            Self::Code(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&CqlList> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_interval(&self) -> Option<&CqlInterval> {
        match self {
            Self::Interval(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&CqlTuple> {
        match self {
            Self::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::Boolean(value)
    }

    pub fn integer(value: i32) -> Self {
        Self::Integer(value)
    }

    pub fn long(value: i64) -> Self {
        Self::Long(value)
    }

    pub fn decimal(value: Decimal) -> Self {
        Self::Decimal(value)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn quantity(value: Decimal, unit: impl Into<String>) -> Self {
        Self::Quantity(CqlQuantity::new(value, unit))
    }

    pub fn list(elements: Vec<CqlValue>) -> Self {
        Self::List(CqlList::from_values(elements))
    }
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}L"),
            Self::Decimal(d) => {
                let s = d.to_string();
                if s.contains('.') {
                    write!(f, "{s}")
                } else {
                    write!(f, "{s}.0")
                }
            }
            Self::String(s) => {
                write!(f, "'")?;
                for c in s.chars() {
                    match c {
                        '\'' => write!(f, "\\u0027")?,
                        '"' => write!(f, "\\u0022")?,
                        _ => write!(f, "{c}")?,
                    }
                }
                write!(f, "'")
            }
            Self::Date(d) => write!(f, "@{d}"),
            Self::DateTime(dt) => write!(f, "@{dt}"),
            Self::Time(t) => write!(f, "@T{t}"),
            Self::Quantity(q) => write!(f, "{q}"),
            Self::Ratio(r) => write!(f, "{r}"),
            Self::Code(c) => write!(f, "{c}"),
            Self::Concept(c) => write!(f, "{c}"),
            Self::CodeSystem(v) => write!(f, "CodeSystem '{}'", v.id),
            Self::ValueSet(v) => write!(f, "ValueSet '{}'", v.id),
            Self::List(l) => write!(f, "{l}"),
            Self::Interval(i) => write!(f, "{i}"),
            Self::Tuple(t) => write!(f, "{t}"),
            Self::Resource(r) => write!(f, "{}", r.resource_type),
        }
    }
}

impl PartialEq for CqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Quantity(a), Self::Quantity(b)) => a == b,
            (Self::Ratio(a), Self::Ratio(b)) => a == b,
            (Self::Code(a), Self::Code(b)) => a == b,
            (Self::Concept(a), Self::Concept(b)) => a == b,
            (Self::CodeSystem(a), Self::CodeSystem(b)) => a == b,
            (Self::ValueSet(a), Self::ValueSet(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Interval(a), Self::Interval(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Resource(a), Self::Resource(b)) => a == b,
            // Cross-type numeric equality
            (Self::Integer(a), Self::Long(b)) => i64::from(*a) == *b,
            (Self::Long(a), Self::Integer(b)) => *a == i64::from(*b),
            (Self::Integer(a), Self::Decimal(b)) => Decimal::from(*a) == *b,
            (Self::Decimal(a), Self::Integer(b)) => *a == Decimal::from(*b),
            (Self::Long(a), Self::Decimal(b)) => Decimal::from(*a) == *b,
            (Self::Decimal(a), Self::Long(b)) => *a == Decimal::from(*b),
            _ => false,
        }
    }
}

impl Eq for CqlValue {}

// ============================================================================
// Clinical Types
// ============================================================================

/// Measurement with an optional UCUM unit. A missing unit means the default
/// unit `'1'`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CqlQuantity {
    pub value: Decimal,
    /// UCUM unit string such as `mg` or `m/s`
    pub unit: Option<String>,
}

impl CqlQuantity {
    pub fn new(value: Decimal, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: Some(unit.into()),
        }
    }

    pub fn unitless(value: Decimal) -> Self {
        Self { value, unit: None }
    }

    /// The unit to use for comparison, defaulting to `'1'`.
    pub fn unit_or_default(&self) -> &str {
        self.unit.as_deref().unwrap_or("1")
    }
}

impl PartialEq for CqlQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.unit_or_default() == other.unit_or_default()
    }
}

impl Eq for CqlQuantity {}

impl PartialOrd for CqlQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.unit_or_default() == other.unit_or_default() {
            self.value.partial_cmp(&other.value)
        } else {
            None
        }
    }
}

impl fmt::Display for CqlQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.value.to_string();
        if s.contains('.') {
            write!(f, "{s}")?;
        } else {
            write!(f, "{s}.0")?;
        }
        write!(f, " '{}'", self.unit_or_default())
    }
}

/// Ratio of two quantities, such as `1 'mg' : 2 'mL'`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CqlRatio {
    pub numerator: CqlQuantity,
    pub denominator: CqlQuantity,
}

impl CqlRatio {
    pub fn new(numerator: CqlQuantity, denominator: CqlQuantity) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

impl fmt::Display for CqlRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.numerator, self.denominator)
    }
}

/// A code drawn from a terminology system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlCode {
    pub code: String,
    /// Code system URI; clinical data sometimes omits it
    pub system: Option<String>,
    pub version: Option<String>,
    pub display: Option<String>,
}

impl CqlCode {
    pub fn new(code: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            system: Some(system.into()),
            version: None,
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Same code and system; version and display are ignored.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.code == other.code && self.system == other.system
    }
}

impl fmt::Display for CqlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code '{}'", self.code)?;
        if let Some(system) = &self.system {
            write!(f, " from \"{system}\"")?;
        }
        if let Some(display) = &self.display {
            write!(f, " display '{display}'")?;
        }
        Ok(())
    }
}

/// A concept: codes from different systems naming the same idea.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CqlConcept {
    pub codes: SmallVec<[CqlCode; 2]>,
    pub display: Option<String>,
}

impl CqlConcept {
    pub fn new(codes: impl IntoIterator<Item = CqlCode>, display: Option<String>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
            display,
        }
    }

    pub fn from_code(code: CqlCode) -> Self {
        let display = code.display.clone();
        Self {
            codes: smallvec::smallvec![code],
            display,
        }
    }

    pub fn contains_equivalent(&self, code: &CqlCode) -> bool {
        self.codes.iter().any(|c| c.is_equivalent(code))
    }
}

impl fmt::Display for CqlConcept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Concept {{")?;
        for (i, code) in self.codes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{code}")?;
        }
        write!(f, "}}")?;
        if let Some(display) = &self.display {
            write!(f, " display '{display}'")?;
        }
        Ok(())
    }
}

/// Reference to a code system or value set definition. Carried at runtime so
/// membership tests can reach the terminology service with the declared
/// identity rather than an expanded code list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlVocabularyRef {
    /// Canonical identifier (URI)
    pub id: String,
    pub version: Option<String>,
    /// Local name in the declaring library
    pub name: Option<String>,
}

impl CqlVocabularyRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            name: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ============================================================================
// Collection Types
// ============================================================================

/// Ordered collection, possibly with duplicates and nulls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CqlList {
    pub element_type: CqlType,
    pub elements: Vec<CqlValue>,
}

impl CqlList {
    pub fn new(element_type: CqlType, elements: Vec<CqlValue>) -> Self {
        Self {
            element_type,
            elements,
        }
    }

    pub fn empty(element_type: CqlType) -> Self {
        Self {
            element_type,
            elements: Vec::new(),
        }
    }

    /// Build a list inferring the element type as the common supertype of
    /// the non-null elements. An empty or all-null list is `List<Any>`.
    pub fn from_values(elements: Vec<CqlValue>) -> Self {
        let element_type = elements
            .iter()
            .filter(|v| !v.is_null())
            .map(CqlValue::get_type)
            .reduce(|a, b| a.common_supertype(&b))
            .unwrap_or(CqlType::Any);
        Self {
            element_type,
            elements,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn get(&self, index: usize) -> Option<&CqlValue> {
        self.elements.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CqlValue> {
        self.elements.iter()
    }
}

impl PartialEq for CqlList {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl Eq for CqlList {}

impl fmt::Display for CqlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, elem) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{elem}")?;
        }
        write!(f, "}}")
    }
}

/// Contiguous range over an ordered point type.
///
/// A missing bound is unbounded when its closed flag is set and unknown when
/// the flag is clear. Construction normalizes an explicit null bound to
/// `None` so there is a single representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CqlInterval {
    pub point_type: CqlType,
    pub low: Option<Box<CqlValue>>,
    pub low_closed: bool,
    pub high: Option<Box<CqlValue>>,
    pub high_closed: bool,
}

impl CqlInterval {
    pub fn new(
        low: Option<CqlValue>,
        low_closed: bool,
        high: Option<CqlValue>,
        high_closed: bool,
    ) -> Self {
        let low = low.filter(|v| !v.is_null());
        let high = high.filter(|v| !v.is_null());
        let point_type = low
            .as_ref()
            .or(high.as_ref())
            .map_or(CqlType::Any, CqlValue::get_type);
        Self {
            point_type,
            low: low.map(Box::new),
            low_closed,
            high: high.map(Box::new),
            high_closed,
        }
    }

    pub fn closed(low: CqlValue, high: CqlValue) -> Self {
        Self::new(Some(low), true, Some(high), true)
    }

    pub fn closed_open(low: CqlValue, high: CqlValue) -> Self {
        Self::new(Some(low), true, Some(high), false)
    }

    pub fn open(low: CqlValue, high: CqlValue) -> Self {
        Self::new(Some(low), false, Some(high), false)
    }

    pub fn open_closed(low: CqlValue, high: CqlValue) -> Self {
        Self::new(Some(low), false, Some(high), true)
    }

    pub fn low(&self) -> Option<&CqlValue> {
        self.low.as_deref()
    }

    pub fn high(&self) -> Option<&CqlValue> {
        self.high.as_deref()
    }
}

impl PartialEq for CqlInterval {
    fn eq(&self, other: &Self) -> bool {
        self.low == other.low
            && self.low_closed == other.low_closed
            && self.high == other.high
            && self.high_closed == other.high_closed
    }
}

impl Eq for CqlInterval {}

impl fmt::Display for CqlInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interval{}", if self.low_closed { '[' } else { '(' })?;
        match &self.low {
            Some(l) => write!(f, "{l}")?,
            None => write!(f, "null")?,
        }
        write!(f, ", ")?;
        match &self.high {
            Some(h) => write!(f, "{h}")?,
            None => write!(f, "null")?,
        }
        write!(f, "{}", if self.high_closed { ']' } else { ')' })
    }
}

/// Record with named elements in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CqlTuple {
    pub elements: IndexMap<String, CqlValue>,
}

impl CqlTuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(
        elements: impl IntoIterator<Item = (impl Into<String>, CqlValue)>,
    ) -> Self {
        Self {
            elements: elements.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.elements.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: CqlValue) {
        self.elements.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CqlValue)> {
        self.elements.iter()
    }
}

impl PartialEq for CqlTuple {
    fn eq(&self, other: &Self) -> bool {
        if self.elements.len() != other.elements.len() {
            return false;
        }
        self.elements
            .iter()
            .all(|(k, v)| other.elements.get(k) == Some(v))
    }
}

impl Eq for CqlTuple {}

impl fmt::Display for CqlTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tuple {{")?;
        for (i, (name, value)) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// A clinical resource kept in its JSON form. Property access and type
/// filtering happen in the evaluator, which also decides how JSON leaves
/// map onto CQL values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CqlResource {
    pub resource_type: String,
    pub data: serde_json::Value,
}

impl CqlResource {
    pub fn new(resource_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            data,
        }
    }

    /// The resource `id` field when present.
    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(serde_json::Value::as_str)
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }
}
