//! Signed fixed-point values for margins, prices and position sizes.
//!
//! All comparisons go through the derived total ordering, so `<`, `>` and
//! `==` can be used directly on [`PreciseInt`] values.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Largest positive exponent accepted by [`PreciseInt::from_decimal`].
const MAX_EXPONENT: i32 = 18;

/// Largest negative exponent (decimal scale) supported by the backing decimal.
const MAX_SCALE: u32 = 28;

/// Signed decimal fixed-point number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreciseInt(Decimal);

impl PreciseInt {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    /// Build `mantissa * 10^exponent`.
    ///
    /// The exponent is clamped to `[-28, 18]`.
    pub fn from_decimal(mantissa: i64, exponent: i32) -> Self {
        if exponent >= 0 {
            let factor = Decimal::from(10u64.pow(exponent.min(MAX_EXPONENT) as u32));
            Self(Decimal::from(mantissa).saturating_mul(factor))
        } else {
            Self(Decimal::new(mantissa, exponent.unsigned_abs().min(MAX_SCALE)))
        }
    }

    /// Underlying decimal value.
    #[inline]
    pub fn value(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Division returning `None` on a zero divisor or overflow.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        self.0.checked_div(rhs.0).map(Self)
    }

    /// Addition returning `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Addition clamped to the representable range.
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl From<Decimal> for PreciseInt {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for PreciseInt {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<i32> for PreciseInt {
    fn from(value: i32) -> Self {
        Self(Decimal::from(value))
    }
}

impl Add for PreciseInt {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for PreciseInt {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

/// Saturates at the representable range instead of overflowing.
impl Sum for PreciseInt {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl<'a> Sum<&'a PreciseInt> for PreciseInt {
    fn sum<I: Iterator<Item = &'a PreciseInt>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for PreciseInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.normalize(), f)
    }
}

impl FromStr for PreciseInt {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_decimal() {
        assert_eq!(PreciseInt::from_decimal(10, -2).value(), dec!(0.10));
        assert_eq!(PreciseInt::from_decimal(1, 0), PreciseInt::ONE);
        assert_eq!(PreciseInt::from_decimal(3, 2).value(), dec!(300));
        assert_eq!(PreciseInt::from_decimal(-25, -1).value(), dec!(-2.5));
    }

    #[test]
    fn test_total_ordering() {
        let a = PreciseInt::from_decimal(102, -2);
        let b = PreciseInt::ONE;
        assert!(a > b);
        assert!(b < a);
        // 1.00 and 1 compare equal regardless of scale
        assert_eq!(PreciseInt::from_decimal(100, -2), PreciseInt::ONE);
        assert_eq!(
            PreciseInt::from_decimal(100, -2).cmp(&PreciseInt::ONE),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn test_checked_div() {
        let required = PreciseInt::from(92);
        let available = PreciseInt::from(100);
        assert_eq!(
            required.checked_div(available),
            Some(PreciseInt::from_decimal(92, -2))
        );
        assert_eq!(required.checked_div(PreciseInt::ZERO), None);
    }

    #[test]
    fn test_sum_and_sign() {
        let values = [PreciseInt::from(5), PreciseInt::from(-7), PreciseInt::from_decimal(5, -1)];
        let total: PreciseInt = values.iter().sum();
        assert_eq!(total, PreciseInt::from_decimal(-15, -1));
        assert!(total.is_negative());
        assert!(!PreciseInt::ZERO.is_negative());
    }

    #[test]
    fn test_overflowing_addition() {
        let max = PreciseInt::from(Decimal::MAX);
        assert_eq!(max.checked_add(PreciseInt::ONE), None);
        assert_eq!(max.saturating_add(PreciseInt::ONE), max);
        assert_eq!(
            PreciseInt::ONE.checked_add(PreciseInt::ONE),
            Some(PreciseInt::from(2))
        );

        let total: PreciseInt = [max, max, PreciseInt::from(-1)].iter().sum();
        assert!(total > PreciseInt::ZERO);
    }

    #[test]
    fn test_parse_and_display() {
        let value: PreciseInt = "12.500".parse().unwrap();
        assert_eq!(value.to_string(), "12.5");
        assert!("not-a-number".parse::<PreciseInt>().is_err());
    }

    #[test]
    fn test_serde_accepts_strings_and_numbers() {
        let from_str: PreciseInt = serde_json::from_str("\"95.25\"").unwrap();
        let from_num: PreciseInt = serde_json::from_str("95").unwrap();
        assert_eq!(from_str, PreciseInt::from_decimal(9525, -2));
        assert_eq!(from_num, PreciseInt::from(95));
    }
}
