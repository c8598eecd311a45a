//! Quantity unit reconciliation
//!
//! Arithmetic and comparison across quantities with different units go
//! through the [`UnitConverter`] seam. The default implementation is backed
//! by the UCUM library; a stub can be swapped in where UCUM semantics are
//! not wanted.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::error::{EvalError, EvalResult};

/// Relative tolerance for comparisons after canonical-unit conversion.
/// Conversion factors are floating point, so exact equality is too strict.
pub const CANONICAL_EPSILON: f64 = 1e-10;

/// Unit reconciliation service for quantity operations.
pub trait UnitConverter: Send + Sync {
    /// Whether two units measure the same dimension.
    fn comparable(&self, left: &str, right: &str) -> EvalResult<bool>;

    /// Factor that scales a value in `unit` to the canonical unit of its
    /// dimension.
    fn canonical_factor(&self, unit: &str) -> EvalResult<f64>;

    /// Convert a value from one unit to another of the same dimension.
    fn convert(&self, value: &Decimal, from: &str, to: &str) -> EvalResult<Decimal> {
        if from == to {
            return Ok(*value);
        }
        if !self.comparable(from, to)? {
            return Err(EvalError::incompatible_units(from, to));
        }
        let factor = self.canonical_factor(from)? / self.canonical_factor(to)?;
        let converted = value.to_f64().unwrap_or(0.0) * factor;
        Decimal::from_f64(converted)
            .ok_or_else(|| EvalError::invalid_operand("unit conversion", "result out of range"))
    }

    /// A value scaled into canonical units, for cross-unit comparison.
    fn to_canonical(&self, value: &Decimal, unit: &str) -> EvalResult<f64> {
        Ok(value.to_f64().unwrap_or(0.0) * self.canonical_factor(unit)?)
    }
}

/// UCUM-backed converter.
#[derive(Debug, Default, Clone, Copy)]
pub struct UcumConverter;

impl UnitConverter for UcumConverter {
    fn comparable(&self, left: &str, right: &str) -> EvalResult<bool> {
        octofhir_ucum::is_comparable(left, right).map_err(|_| {
            if octofhir_ucum::get_canonical_units(left).is_err() {
                EvalError::invalid_unit(left)
            } else {
                EvalError::invalid_unit(right)
            }
        })
    }

    fn canonical_factor(&self, unit: &str) -> EvalResult<f64> {
        octofhir_ucum::get_canonical_units(unit)
            .map(|canonical| canonical.factor)
            .map_err(|_| EvalError::invalid_unit(unit))
    }
}

/// Compare two canonical magnitudes with tolerance.
pub(crate) fn canonical_eq(a: f64, b: f64) -> bool {
    let epsilon = CANONICAL_EPSILON * (a.abs() + b.abs()).max(1.0);
    (a - b).abs() < epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mass_units_are_comparable() {
        let units = UcumConverter;
        assert!(units.comparable("mg", "g").unwrap());
        assert!(!units.comparable("mg", "m").unwrap());
    }

    #[test]
    fn converts_within_a_dimension() {
        let units = UcumConverter;
        let grams = units
            .convert(&Decimal::from(1000), "mg", "g")
            .unwrap();
        assert_eq!(grams.round_dp(9), Decimal::from(1));
    }

    #[test]
    fn rejects_cross_dimension_conversion() {
        let units = UcumConverter;
        let err = units.convert(&Decimal::from(1), "mg", "m").unwrap_err();
        assert_eq!(
            err,
            EvalError::incompatible_units("mg", "m")
        );
    }

    #[test]
    fn rejects_malformed_units() {
        let units = UcumConverter;
        assert!(units.canonical_factor("not-a-unit").is_err());
    }

    #[test]
    fn canonical_comparison_tolerates_float_noise() {
        assert!(canonical_eq(1.0, 1.0 + 1e-13));
        assert!(!canonical_eq(1.0, 1.001));
    }
}
