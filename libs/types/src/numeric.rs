//! Fixed-point scaled integer amounts for prices and money
//!
//! Every balance, price, margin, and PnL value in the engine is an integer
//! scaled by a fixed decimal count. All arithmetic stays in `i128`; division
//! rounds half away from zero. `rust_decimal` is used only to render values
//! for human-facing payloads, never to compute with.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 10^exp as i128.
///
/// # Panics
/// Panics on overflow (exp > 38), which no configured decimal count reaches.
pub fn pow10(exp: u32) -> i128 {
    10i128.pow(exp)
}

/// Integer division rounding half away from zero.
///
/// Matches the rounding the engine applies everywhere a scaled quotient is
/// materialized (liquidation offsets, PnL, rescaling).
pub fn rounded_div(num: i128, den: i128) -> i128 {
    debug_assert!(den != 0, "division by zero");
    let quotient = (num.abs() + den.abs() / 2) / den.abs();
    if (num >= 0) == (den > 0) {
        quotient
    } else {
        -quotient
    }
}

/// A fixed-point amount: raw integer value plus its decimal count.
///
/// `raw = 1_234_500, decimals = 4` represents `123.4500`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScaledAmount {
    raw: i128,
    decimals: u32,
}

impl ScaledAmount {
    /// Create from a raw scaled integer and its decimal count.
    pub fn new(raw: i128, decimals: u32) -> Self {
        Self { raw, decimals }
    }

    /// Zero at the given scale.
    pub fn zero(decimals: u32) -> Self {
        Self { raw: 0, decimals }
    }

    /// Convert a human-readable value at the ingestion boundary.
    ///
    /// The wire carries human numbers (e.g. a margin of `100.5`); they are
    /// scaled and rounded here, once, and every computation after this point
    /// is exact integer arithmetic. Returns `None` for non-finite input or
    /// values that do not fit the scale.
    pub fn from_f64(value: f64, decimals: u32) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * pow10(decimals) as f64).round();
        if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Self {
            raw: scaled as i128,
            decimals,
        })
    }

    pub fn raw(&self) -> i128 {
        self.raw
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    pub fn is_negative(&self) -> bool {
        self.raw < 0
    }

    /// Re-express this amount at a different decimal count.
    ///
    /// Scaling up is exact; scaling down rounds half away from zero.
    pub fn rescale(&self, decimals: u32) -> Self {
        if decimals == self.decimals {
            *self
        } else if decimals > self.decimals {
            Self {
                raw: self.raw * pow10(decimals - self.decimals),
                decimals,
            }
        } else {
            Self {
                raw: rounded_div(self.raw, pow10(self.decimals - decimals)),
                decimals,
            }
        }
    }

    /// Align two amounts to a common scale (the larger decimal count).
    ///
    /// Returns the two raw values and the shared decimal count.
    pub fn align(a: Self, b: Self) -> (i128, i128, u32) {
        let decimals = a.decimals.max(b.decimals);
        (a.rescale(decimals).raw, b.rescale(decimals).raw, decimals)
    }

    /// Add an amount at the same scale.
    ///
    /// # Panics
    /// Debug-asserts scale agreement; alignment is the caller's job.
    pub fn checked_add(&self, other: Self) -> Option<Self> {
        debug_assert_eq!(self.decimals, other.decimals, "scale mismatch");
        self.raw.checked_add(other.raw).map(|raw| Self {
            raw,
            decimals: self.decimals,
        })
    }

    /// Subtract an amount at the same scale.
    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        debug_assert_eq!(self.decimals, other.decimals, "scale mismatch");
        self.raw.checked_sub(other.raw).map(|raw| Self {
            raw,
            decimals: self.decimals,
        })
    }

    /// Render as a decimal for human-facing payloads.
    pub fn as_decimal(&self) -> Decimal {
        Decimal::try_from_i128_with_scale(self.raw, self.decimals)
            .expect("scaled amount fits a 96-bit decimal")
    }
}

impl fmt::Display for ScaledAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_decimal())
    }
}
