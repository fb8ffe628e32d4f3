//! Monetary amounts in minor currency units.
//!
//! All settlement math is integer math over the currency's minor unit (cents
//! for a 2-decimal currency). Floating point never touches an amount; where a
//! division is needed (tax rates), the quotient is rounded half-to-even so
//! repeated settlement runs carry no systematic bias.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A monetary amount in minor units (signed: refunds and corrections exist).
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Create from minor units (e.g. cents).
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Create from a whole major-unit amount (e.g. `from_major(600)` = 600.00).
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Money(major * 100)
    }

    /// The raw minor-unit value.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checked addition; overflow is a domain invariant failure.
    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("monetary amount overflow"))
    }

    /// Checked subtraction; overflow is a domain invariant failure.
    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("monetary amount overflow"))
    }

    /// Multiply by a quantity (checked).
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("line amount overflow"))
    }

    /// Compute `self * numer / denom`, rounding the quotient half-to-even.
    ///
    /// Intermediate math widens to i128, so any representable `Money` times a
    /// basis-point rate cannot overflow.
    pub fn mul_div_half_even(self, numer: i64, denom: i64) -> DomainResult<Money> {
        if denom <= 0 {
            return Err(DomainError::invariant("division by non-positive denominator"));
        }
        let scaled = (self.0 as i128) * (numer as i128);
        let rounded = div_half_even(scaled, denom as i128);
        i64::try_from(rounded)
            .map(Money)
            .map_err(|_| DomainError::invariant("monetary amount overflow"))
    }
}

/// Integer division rounding half-to-even (banker's rounding). `d` must be > 0.
fn div_half_even(n: i128, d: i128) -> i128 {
    let negative = n < 0;
    let n = n.abs();
    let q = n / d;
    let r = n % d;
    let q = match (2 * r).cmp(&d) {
        core::cmp::Ordering::Less => q,
        core::cmp::Ordering::Greater => q + 1,
        core::cmp::Ordering::Equal => {
            if q % 2 == 0 {
                q
            } else {
                q + 1
            }
        }
    };
    if negative { -q } else { q }
}

impl ValueObject for Money {}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_minor_units() {
        assert_eq!(Money::from_minor(1099).to_string(), "10.99");
        assert_eq!(Money::from_minor(500).to_string(), "5.00");
        assert_eq!(Money::from_minor(-550).to_string(), "-5.50");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn from_major_scales_to_minor() {
        assert_eq!(Money::from_major(600).minor(), 60_000);
    }

    #[test]
    fn half_even_rounds_ties_to_even_quotient() {
        // 2.5 -> 2, 3.5 -> 4 (denominator 10, numerator 1: value/10)
        assert_eq!(Money::from_minor(25).mul_div_half_even(1, 10).unwrap().minor(), 2);
        assert_eq!(Money::from_minor(35).mul_div_half_even(1, 10).unwrap().minor(), 4);
        // Non-tie cases round to nearest.
        assert_eq!(Money::from_minor(24).mul_div_half_even(1, 10).unwrap().minor(), 2);
        assert_eq!(Money::from_minor(26).mul_div_half_even(1, 10).unwrap().minor(), 3);
    }

    #[test]
    fn half_even_handles_negative_amounts() {
        assert_eq!(
            Money::from_minor(-25).mul_div_half_even(1, 10).unwrap().minor(),
            -2
        );
    }

    #[test]
    fn checked_arithmetic_detects_overflow() {
        let max = Money::from_minor(i64::MAX);
        assert!(max.checked_add(Money::from_minor(1)).is_err());
        assert!(max.times(2).is_err());
    }

    #[test]
    fn sixteen_percent_of_two_hundred_is_exact() {
        // 200.00 at 16% (1600 bps): no rounding involved.
        let net = Money::from_major(200);
        let tax = net.mul_div_half_even(1600, 10_000).unwrap();
        assert_eq!(tax, Money::from_major(32));
    }
}
