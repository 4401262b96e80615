//! Position lifecycle types
//!
//! A position moves OPEN → exactly one terminal state and is immutable once
//! closed except for the exit fields, which are set exactly once at closure.

use crate::ids::{AssetId, OwnerId, PositionId};
use crate::numeric::ScaledAmount;
use serde::{Deserialize, Serialize};

/// Leverage field encoding: integer ×10, so 10..=1000 means 1.0x..100.0x.
pub const MIN_LEVERAGE: u32 = 10;
pub const MAX_LEVERAGE: u32 = 1000;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Long position - profit when price increases
    LONG,
    /// Short position - profit when price decreases
    SHORT,
}

impl Direction {
    /// PnL sign multiplier: +1 for LONG, -1 for SHORT.
    pub fn sign(&self) -> i128 {
        match self {
            Direction::LONG => 1,
            Direction::SHORT => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::LONG => "LONG",
            Direction::SHORT => "SHORT",
        }
    }
}

/// Position status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
    StopLoss,
    TakeProfit,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Liquidated => "LIQUIDATED",
            PositionStatus::StopLoss => "STOP_LOSS",
            PositionStatus::TakeProfit => "TAKE_PROFIT",
        }
    }
}

/// Kind of automatic trigger registered for a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Liquidation,
    StopLoss,
    TakeProfit,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Liquidation => "liquidation",
            TriggerKind::StopLoss => "stop_loss",
            TriggerKind::TakeProfit => "take_profit",
        }
    }

    /// Terminal status a position takes when this trigger fires.
    pub fn closing_status(&self) -> PositionStatus {
        match self {
            TriggerKind::Liquidation => PositionStatus::Liquidated,
            TriggerKind::StopLoss => PositionStatus::StopLoss,
            TriggerKind::TakeProfit => PositionStatus::TakeProfit,
        }
    }
}

/// A bilateral leveraged position against the price oracle.
///
/// Margin and PnL are at the cash-asset scale; prices carry their own
/// decimal counts. The liquidation price is present only for leveraged
/// positions (leverage > 10, i.e. above 1.0x).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner: OwnerId,
    pub asset: AssetId,
    pub direction: Direction,
    pub margin: ScaledAmount,
    /// Integer ×10 encoding: 10..=1000 represents 1.0x..100.0x.
    pub leverage: u32,
    pub entry_price: ScaledAmount,
    pub liquidation_price: Option<ScaledAmount>,
    pub stop_loss_price: Option<ScaledAmount>,
    pub take_profit_price: Option<ScaledAmount>,
    pub exit_price: Option<ScaledAmount>,
    /// Realized PnL at the cash scale; zero while open.
    pub pnl: ScaledAmount,
    pub status: PositionStatus,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

impl Position {
    /// Open a new position. Exit fields start empty, PnL starts at zero.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: PositionId,
        owner: OwnerId,
        asset: AssetId,
        direction: Direction,
        margin: ScaledAmount,
        leverage: u32,
        entry_price: ScaledAmount,
        liquidation_price: Option<ScaledAmount>,
        stop_loss_price: Option<ScaledAmount>,
        take_profit_price: Option<ScaledAmount>,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            owner,
            asset,
            direction,
            margin,
            leverage,
            entry_price,
            liquidation_price,
            stop_loss_price,
            take_profit_price,
            exit_price: None,
            pnl: ScaledAmount::zero(margin.decimals()),
            status: PositionStatus::Open,
            created_at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Whether the position carries leverage above 1.0x (and therefore a
    /// liquidation level).
    pub fn is_leveraged(&self) -> bool {
        self.leverage > MIN_LEVERAGE
    }

    /// Record closure. Sets the exit fields exactly once.
    ///
    /// # Panics
    /// Debug-asserts the position is still open; the state machine never
    /// closes a position twice.
    pub fn close(
        &mut self,
        status: PositionStatus,
        exit_price: ScaledAmount,
        pnl: ScaledAmount,
        closed_at: i64,
    ) {
        debug_assert!(self.is_open(), "position closed twice");
        debug_assert!(status.is_terminal());
        self.status = status;
        self.exit_price = Some(exit_price);
        self.pnl = pnl;
        self.closed_at = Some(closed_at);
    }
}
