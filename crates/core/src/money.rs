//! Fixed-point money.
//!
//! Amounts are stored in minor units (e.g. cents) to keep arithmetic exact;
//! order amounts are snapshotted at creation and never recomputed.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A monetary amount in minor currency units.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Unit price × quantity, checked.
    ///
    /// Overflow is a hard error: an order amount that cannot be represented
    /// must never be silently wrapped into a plausible-looking figure.
    pub fn checked_mul_qty(self, qty: i64) -> Result<Money, CoreError> {
        self.0
            .checked_mul(qty)
            .map(Money)
            .ok_or_else(|| CoreError::amount_overflow(format!("{} x {}", self.0, qty)))
    }

    pub fn checked_add(self, other: Money) -> Result<Money, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| CoreError::amount_overflow(format!("{} + {}", self.0, other.0)))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplies_by_quantity() {
        let unit = Money::from_minor(1_999);
        assert_eq!(unit.checked_mul_qty(25).unwrap(), Money::from_minor(49_975));
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(Money::from_minor(i64::MAX).checked_mul_qty(2).is_err());
    }

    #[test]
    fn displays_minor_units() {
        assert_eq!(Money::from_minor(1_050).to_string(), "10.50");
        assert_eq!(Money::from_minor(-7).to_string(), "-0.07");
    }
}
