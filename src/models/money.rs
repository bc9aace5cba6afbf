//! Fixed-point currency amounts.
//!
//! Every amount in the system is an integer count of minor units (cents for
//! KES). Percentages are expressed in basis points and rounded half-up to the
//! nearest minor unit.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Minor units per major currency unit
pub const MINOR_UNITS: i64 = 100;

/// Basis points in 100%
pub const BPS_DENOMINATOR: i64 = 10_000;

/// An amount of money in minor currency units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Build from minor units (cents)
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Build from whole currency units
    pub const fn from_major(major: i64) -> Self {
        Money(major * MINOR_UNITS)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Apply a rate in basis points, rounding half away from zero to the
    /// nearest minor unit.
    pub fn apply_bps(self, bps: i64) -> Money {
        let product = i128::from(self.0) * i128::from(bps);
        let denom = i128::from(BPS_DENOMINATOR);
        let half = denom / 2;
        let rounded = if product >= 0 {
            (product + half) / denom
        } else {
            (product - half) / denom
        };
        Money(rounded as i64)
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = MINOR_UNITS as u64;
        write!(f, "{}{}.{:02}", sign, abs / unit, abs % unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_major(820).to_string(), "820.00");
        assert_eq!(Money::from_minor(2080).to_string(), "20.80");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-150).to_string(), "-1.50");
    }

    #[test]
    fn test_apply_bps_rounds_half_up() {
        // 8% of 0.06 = 0.0048 -> 0.00
        assert_eq!(Money::from_minor(6).apply_bps(800), Money::from_minor(0));
        // 8% of 0.07 = 0.0056 -> 0.01
        assert_eq!(Money::from_minor(7).apply_bps(800), Money::from_minor(1));
        // 50% of 0.01 = 0.005 -> 0.01
        assert_eq!(Money::from_minor(1).apply_bps(5_000), Money::from_minor(1));
        assert_eq!(Money::from_major(1000).apply_bps(800), Money::from_major(80));
    }

    #[test]
    fn test_serde_is_minor_units() {
        let json = serde_json::to_string(&Money::from_major(12)).unwrap();
        assert_eq!(json, "1200");
        let back: Money = serde_json::from_str("1200").unwrap();
        assert_eq!(back, Money::from_major(12));
    }
}
