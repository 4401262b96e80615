//! Risk math — liquidation levels and realized PnL
//!
//! Deterministic integer calculations shared by the command processor and
//! the trigger-close path. Leverage uses the ×10 integer encoding
//! (10..=1000 for 1.0x..100.0x) everywhere.

use types::numeric::{rounded_div, ScaledAmount};
use types::position::Direction;

/// Liquidation price for a leveraged position.
///
/// LONG:  `entry − entry/actual_leverage`
/// SHORT: `entry + entry/actual_leverage`
///
/// With the ×10 leverage encoding the offset is computed exactly as
/// `round(entry × 10 / leverage)`.
pub fn liquidation_price(
    direction: Direction,
    entry_price: ScaledAmount,
    leverage: u32,
) -> ScaledAmount {
    debug_assert!(leverage > 0);
    let offset = rounded_div(entry_price.raw() * 10, leverage as i128);
    let raw = match direction {
        Direction::LONG => entry_price.raw() - offset,
        Direction::SHORT => entry_price.raw() + offset,
    };
    ScaledAmount::new(raw, entry_price.decimals())
}

/// Realized PnL at the margin's scale.
///
/// `pnl = ((exit − entry) / entry) × direction_sign × margin × actual_leverage`
///
/// Entry and exit are aligned to a common scale first; the quotient is
/// materialized once, rounded half away from zero, at the margin scale.
pub fn realized_pnl(
    direction: Direction,
    entry_price: ScaledAmount,
    exit_price: ScaledAmount,
    margin: ScaledAmount,
    leverage: u32,
) -> ScaledAmount {
    let (entry_raw, exit_raw, _) = ScaledAmount::align(entry_price, exit_price);
    debug_assert!(entry_raw > 0, "entry price must be positive");

    let numerator = (exit_raw - entry_raw) * direction.sign() * margin.raw() * leverage as i128;
    let denominator = entry_raw * 10;
    ScaledAmount::new(rounded_div(numerator, denominator), margin.decimals())
}

/// Cash returned to the owner at closure: margin plus PnL, floored at zero.
///
/// A trigger firing past the liquidation level can at most consume the
/// whole margin; the ledger never goes negative.
pub fn margin_returned(margin: ScaledAmount, pnl: ScaledAmount) -> ScaledAmount {
    let raw = (margin.raw() + pnl.raw()).max(0);
    ScaledAmount::new(raw, margin.decimals())
}
