// Fixed-point money amounts (tenths of a unit).

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MoneyError {
    #[error("amount must be a finite number, got {0}")]
    NotFinite(f64),

    #[error("amount must be a multiple of 0.1, got {0}")]
    TooPrecise(f64),

    #[error("amount {0} is out of range")]
    OutOfRange(f64),
}

/// A monetary amount stored as an exact number of tenths.
///
/// Budgets, base prices, bids and increments all use this type so that
/// repeated `+0.5` bids never drift. Serializes as a decimal number of units
/// (`8.5`), which is also how the config files spell amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_tenths(tenths: i64) -> Self {
        Money(tenths)
    }

    pub const fn from_units(units: i64) -> Self {
        Money(units * 10)
    }

    pub const fn tenths(self) -> i64 {
        self.0
    }

    pub fn as_units(self) -> f64 {
        self.0 as f64 / 10.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `self * n` for whole counts (e.g. one unit per open roster slot).
    pub fn times(self, n: usize) -> Money {
        Money(self.0 * n as i64)
    }
}

impl TryFrom<f64> for Money {
    type Error = MoneyError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(MoneyError::NotFinite(value));
        }
        let scaled = value * 10.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return Err(MoneyError::TooPrecise(value));
        }
        if rounded.abs() > i64::MAX as f64 / 2.0 {
            return Err(MoneyError::OutOfRange(value));
        }
        Ok(Money(rounded as i64))
    }
}

impl From<Money> for f64 {
    fn from(m: Money) -> f64 {
        m.as_units()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_half_units_exactly() {
        let m = Money::try_from(0.5).unwrap();
        assert_eq!(m.tenths(), 5);
        let total: Money = std::iter::repeat(m).take(7).sum();
        assert_eq!(total, Money::try_from(3.5).unwrap());
    }

    #[test]
    fn rejects_sub_tenth_precision() {
        assert_eq!(Money::try_from(1.25), Err(MoneyError::TooPrecise(1.25)));
    }

    #[test]
    fn rejects_non_finite() {
        assert!(matches!(Money::try_from(f64::NAN), Err(MoneyError::NotFinite(_))));
        assert!(matches!(
            Money::try_from(f64::INFINITY),
            Err(MoneyError::NotFinite(_))
        ));
    }

    #[test]
    fn display_keeps_one_decimal() {
        assert_eq!(Money::from_units(8).to_string(), "8.0");
        assert_eq!(Money::from_tenths(55).to_string(), "5.5");
        assert_eq!(Money::from_tenths(-15).to_string(), "-1.5");
    }

    #[test]
    fn serde_uses_decimal_units() {
        let json = serde_json::to_string(&Money::from_tenths(85)).unwrap();
        assert_eq!(json, "8.5");
        let back: Money = serde_json::from_str("100").unwrap();
        assert_eq!(back, Money::from_units(100));
        assert!(serde_json::from_str::<Money>("0.05").is_err());
    }

    #[test]
    fn times_scales_by_count() {
        assert_eq!(Money::from_units(1).times(15), Money::from_units(15));
    }
}
