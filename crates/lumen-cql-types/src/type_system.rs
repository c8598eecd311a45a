//! Static type descriptors for CQL values
//!
//! [`CqlType`] covers the System primitives, the temporal and clinical types,
//! the structured types (`List<T>`, `Interval<T>`, tuples, choice types) and
//! named external record types. The evaluator uses these descriptors for
//! overload resolution, so equality and the subtype lattice here define what
//! "the same signature" means at dispatch time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A static CQL type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CqlType {
    /// Supertype of every type; also the static type of an unannotated null.
    Any,

    // Primitives
    Boolean,
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    Long,
    /// Fixed-point decimal (28 significant digits, 8 decimal places in CQL)
    Decimal,
    String,

    // Temporal
    Date,
    DateTime,
    Time,

    // Clinical
    Quantity,
    Ratio,
    Code,
    Concept,
    /// Supertype of CodeSystem and ValueSet
    Vocabulary,
    CodeSystem,
    ValueSet,

    // Structured
    #[serde(rename = "List")]
    List(Box<CqlType>),
    #[serde(rename = "Interval")]
    Interval(Box<CqlType>),
    #[serde(rename = "Tuple")]
    Tuple(Vec<TupleTypeElement>),
    #[serde(rename = "Choice")]
    Choice(Vec<CqlType>),

    /// Named external record type, e.g. `FHIR.Observation`
    #[serde(rename = "NamedType")]
    Named {
        namespace: Option<String>,
        name: String,
    },
}

/// A named element of a tuple type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleTypeElement {
    pub name: String,
    pub element_type: CqlType,
}

impl CqlType {
    pub fn list(element_type: CqlType) -> Self {
        Self::List(Box::new(element_type))
    }

    pub fn interval(point_type: CqlType) -> Self {
        Self::Interval(Box::new(point_type))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn qualified(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Named {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Long | Self::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::DateTime | Self::Time)
    }

    /// Types that support ordering comparisons (and interval point use).
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            Self::Integer
                | Self::Long
                | Self::Decimal
                | Self::String
                | Self::Date
                | Self::DateTime
                | Self::Time
                | Self::Quantity
        )
    }

    /// The simple name of the type, without namespace or type arguments.
    pub fn name(&self) -> &str {
        match self {
            Self::Any => "Any",
            Self::Boolean => "Boolean",
            Self::Integer => "Integer",
            Self::Long => "Long",
            Self::Decimal => "Decimal",
            Self::String => "String",
            Self::Date => "Date",
            Self::DateTime => "DateTime",
            Self::Time => "Time",
            Self::Quantity => "Quantity",
            Self::Ratio => "Ratio",
            Self::Code => "Code",
            Self::Concept => "Concept",
            Self::Vocabulary => "Vocabulary",
            Self::CodeSystem => "CodeSystem",
            Self::ValueSet => "ValueSet",
            Self::List(_) => "List",
            Self::Interval(_) => "Interval",
            Self::Tuple(_) => "Tuple",
            Self::Choice(_) => "Choice",
            Self::Named { name, .. } => name,
        }
    }

    /// Element type of a list, point type of an interval.
    pub fn element_type(&self) -> Option<&CqlType> {
        match self {
            Self::List(elem) | Self::Interval(elem) => Some(elem),
            _ => None,
        }
    }

    /// Whether `self` is a subtype of `other` (reflexive).
    ///
    /// The lattice: every type is a subtype of `Any`; Integer < Long <
    /// Decimal; CodeSystem and ValueSet are subtypes of Vocabulary; lists and
    /// intervals are covariant in their element type; a type is a subtype of
    /// a choice when it is a subtype of any alternative.
    pub fn is_subtype_of(&self, other: &CqlType) -> bool {
        if self == other || other.is_any() {
            return true;
        }
        match (self, other) {
            (Self::Integer, Self::Long | Self::Decimal) => true,
            (Self::Long, Self::Decimal) => true,
            (Self::CodeSystem | Self::ValueSet, Self::Vocabulary) => true,
            (Self::List(a), Self::List(b)) => a.is_subtype_of(b),
            (Self::Interval(a), Self::Interval(b)) => a.is_subtype_of(b),
            (_, Self::Choice(alternatives)) => {
                alternatives.iter().any(|alt| self.is_subtype_of(alt))
            }
            (Self::Choice(alternatives), _) => {
                alternatives.iter().all(|alt| alt.is_subtype_of(other))
            }
            _ => false,
        }
    }

    /// The least common supertype of two types, `Any` when unrelated.
    pub fn common_supertype(&self, other: &CqlType) -> CqlType {
        if self == other {
            return self.clone();
        }
        if self.is_subtype_of(other) {
            return other.clone();
        }
        if other.is_subtype_of(self) {
            return self.clone();
        }
        match (self, other) {
            (Self::List(a), Self::List(b)) => Self::list(a.common_supertype(b)),
            (Self::Interval(a), Self::Interval(b)) => Self::interval(a.common_supertype(b)),
            _ => Self::Any,
        }
    }

    /// Parse a type name as it appears in ELM annotations.
    ///
    /// Accepts `{urn:hl7-org:elm-types:r1}Integer`, `System.Integer`, plain
    /// `Integer`, and `List<...>` / `Interval<...>` forms. Unknown names map
    /// to named types (`FHIR.Observation` keeps its namespace).
    pub fn parse_qualified(name: &str) -> CqlType {
        let name = name.trim();
        // Strip the ELM URN namespace wrapper
        let name = match (name.strip_prefix('{'), name.find('}')) {
            (Some(_), Some(end)) => &name[end + 1..],
            _ => name,
        };
        if let Some(inner) = name.strip_prefix("List<").and_then(|s| s.strip_suffix('>')) {
            return Self::list(Self::parse_qualified(inner));
        }
        if let Some(inner) = name
            .strip_prefix("Interval<")
            .and_then(|s| s.strip_suffix('>'))
        {
            return Self::interval(Self::parse_qualified(inner));
        }
        let (namespace, simple) = match name.split_once('.') {
            Some((ns, rest)) => (Some(ns), rest),
            None => (None, name),
        };
        if namespace.is_none() || namespace == Some("System") {
            match simple {
                "Any" => return Self::Any,
                "Boolean" => return Self::Boolean,
                "Integer" => return Self::Integer,
                "Long" => return Self::Long,
                "Decimal" => return Self::Decimal,
                "String" => return Self::String,
                "Date" => return Self::Date,
                "DateTime" => return Self::DateTime,
                "Time" => return Self::Time,
                "Quantity" => return Self::Quantity,
                "Ratio" => return Self::Ratio,
                "Code" => return Self::Code,
                "Concept" => return Self::Concept,
                "Vocabulary" => return Self::Vocabulary,
                "CodeSystem" => return Self::CodeSystem,
                "ValueSet" => return Self::ValueSet,
                _ => {}
            }
        }
        match namespace {
            Some(ns) => Self::qualified(ns, simple),
            None => Self::named(simple),
        }
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(elem) => write!(f, "List<{elem}>"),
            Self::Interval(point) => write!(f, "Interval<{point}>"),
            Self::Tuple(elements) => {
                write!(f, "Tuple {{ ")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", e.name, e.element_type)?;
                }
                write!(f, " }}")
            }
            Self::Choice(types) => {
                write!(f, "Choice<")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ">")
            }
            Self::Named {
                namespace: Some(ns),
                name,
            } => write!(f, "{ns}.{name}"),
            Self::Named {
                namespace: None,
                name,
            } => write!(f, "{name}"),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_subtyping() {
        assert!(CqlType::Integer.is_subtype_of(&CqlType::Long));
        assert!(CqlType::Integer.is_subtype_of(&CqlType::Decimal));
        assert!(CqlType::Long.is_subtype_of(&CqlType::Decimal));
        assert!(!CqlType::Decimal.is_subtype_of(&CqlType::Integer));
        assert!(CqlType::Decimal.is_subtype_of(&CqlType::Any));
    }

    #[test]
    fn collection_covariance() {
        let ints = CqlType::list(CqlType::Integer);
        let decimals = CqlType::list(CqlType::Decimal);
        let anys = CqlType::list(CqlType::Any);
        assert!(ints.is_subtype_of(&decimals));
        assert!(ints.is_subtype_of(&anys));
        assert!(!anys.is_subtype_of(&ints));
        assert!(
            CqlType::interval(CqlType::Integer).is_subtype_of(&CqlType::interval(CqlType::Any))
        );
    }

    #[test]
    fn choice_membership() {
        let choice = CqlType::Choice(vec![CqlType::Integer, CqlType::String]);
        assert!(CqlType::Integer.is_subtype_of(&choice));
        assert!(CqlType::String.is_subtype_of(&choice));
        assert!(!CqlType::Boolean.is_subtype_of(&choice));
    }

    #[test]
    fn common_supertypes() {
        assert_eq!(
            CqlType::Integer.common_supertype(&CqlType::Decimal),
            CqlType::Decimal
        );
        assert_eq!(
            CqlType::Integer.common_supertype(&CqlType::String),
            CqlType::Any
        );
        assert_eq!(
            CqlType::list(CqlType::Integer).common_supertype(&CqlType::list(CqlType::String)),
            CqlType::list(CqlType::Any)
        );
    }

    #[test]
    fn parse_qualified_names() {
        assert_eq!(
            CqlType::parse_qualified("{urn:hl7-org:elm-types:r1}Integer"),
            CqlType::Integer
        );
        assert_eq!(CqlType::parse_qualified("System.DateTime"), CqlType::DateTime);
        assert_eq!(CqlType::parse_qualified("Decimal"), CqlType::Decimal);
        assert_eq!(
            CqlType::parse_qualified("List<System.Integer>"),
            CqlType::list(CqlType::Integer)
        );
        assert_eq!(
            CqlType::parse_qualified("Interval<Date>"),
            CqlType::interval(CqlType::Date)
        );
        assert_eq!(
            CqlType::parse_qualified("FHIR.Observation"),
            CqlType::qualified("FHIR", "Observation")
        );
    }

    #[test]
    fn display_round_trip() {
        assert_eq!(CqlType::list(CqlType::Integer).to_string(), "List<Integer>");
        assert_eq!(
            CqlType::interval(CqlType::DateTime).to_string(),
            "Interval<DateTime>"
        );
        assert_eq!(CqlType::qualified("FHIR", "Patient").to_string(), "FHIR.Patient");
    }
}
