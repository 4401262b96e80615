//! Wire message schemas
//!
//! Everything that crosses the stream boundary: the inbound command
//! envelope and its per-command payloads, the outbound response, the price
//! tick batch, and lifecycle events. Payloads are validated here, at the
//! ingestion boundary, before they reach the state machine.
//!
//! Stream entries are flat string-field maps; structured payloads travel as
//! JSON strings inside a single field (`tradeData` for commands, `data` for
//! price batches).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use types::errors::EngineError;
use types::ids::PositionId;
use types::position::{Direction, TriggerKind};

// ── Inbound commands ────────────────────────────────────────────────

/// Raw command envelope as read off the command stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub order_id: String,
    pub command: String,
    pub owner: String,
    pub trade_data: Option<String>,
    pub timestamp: Option<i64>,
}

impl CommandEnvelope {
    /// Parse the flat field map of a stream entry.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, EngineError> {
        let required = |key: &str| {
            fields
                .get(key)
                .cloned()
                .ok_or_else(|| EngineError::Validation(format!("missing field: {}", key)))
        };
        Ok(Self {
            order_id: required("orderId")?,
            command: required("command")?,
            owner: required("owner")?,
            trade_data: fields.get("tradeData").cloned(),
            timestamp: fields.get("timestamp").and_then(|t| t.parse().ok()),
        })
    }

    /// Field map for publishing (used by tests and local tooling).
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("orderId".to_string(), self.order_id.clone());
        fields.insert("command".to_string(), self.command.clone());
        fields.insert("owner".to_string(), self.owner.clone());
        if let Some(data) = &self.trade_data {
            fields.insert("tradeData".to_string(), data.clone());
        }
        if let Some(ts) = self.timestamp {
            fields.insert("timestamp".to_string(), ts.to_string());
        }
        fields
    }
}

/// Trade parameters for CREATE_TRADE.
///
/// Margin and trigger prices arrive as human-readable numbers and are
/// scaled to integers immediately after validation. A fractional leverage
/// fails deserialization outright (the field is integral).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTradeRequest {
    pub asset: String,
    pub direction: Direction,
    pub margin: f64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<f64>,
}

fn default_leverage() -> u32 {
    types::position::MIN_LEVERAGE
}

/// Close parameters for CLOSE_TRADE.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTradeRequest {
    pub trade_id: String,
}

impl CloseTradeRequest {
    /// Parse the trade id into a position id.
    pub fn position_id(&self) -> Result<PositionId, EngineError> {
        PositionId::parse(&self.trade_id)
            .ok_or_else(|| EngineError::Validation(format!("invalid tradeId: {}", self.trade_id)))
    }
}

/// A fully parsed engine command.
#[derive(Debug, Clone)]
pub enum Command {
    GetBalance,
    GetUsdBalance,
    CreateAccount,
    CreateTrade(CreateTradeRequest),
    CloseTrade(CloseTradeRequest),
    DeleteUser,
}

impl Command {
    /// Parse the command name plus its optional `tradeData` payload.
    ///
    /// Malformed payloads are rejected here, before any state is touched.
    pub fn parse(name: &str, trade_data: Option<&str>) -> Result<Self, EngineError> {
        match name {
            "GET_BALANCE" => Ok(Command::GetBalance),
            "GET_USD_BALANCE" => Ok(Command::GetUsdBalance),
            "CREATE_ACCOUNT" => Ok(Command::CreateAccount),
            "DELETE_USER" => Ok(Command::DeleteUser),
            "CREATE_TRADE" => {
                let data = trade_data.ok_or_else(|| {
                    EngineError::Validation("CREATE_TRADE requires tradeData".to_string())
                })?;
                let request: CreateTradeRequest = serde_json::from_str(data)
                    .map_err(|e| EngineError::Validation(format!("invalid tradeData: {}", e)))?;
                Ok(Command::CreateTrade(request))
            }
            "CLOSE_TRADE" => {
                let data = trade_data.ok_or_else(|| {
                    EngineError::Validation("CLOSE_TRADE requires tradeData".to_string())
                })?;
                let request: CloseTradeRequest = serde_json::from_str(data)
                    .map_err(|e| EngineError::Validation(format!("invalid tradeData: {}", e)))?;
                Ok(Command::CloseTrade(request))
            }
            other => Err(EngineError::Validation(format!(
                "Invalid command: {}",
                other
            ))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Command::GetBalance => "GET_BALANCE",
            Command::GetUsdBalance => "GET_USD_BALANCE",
            Command::CreateAccount => "CREATE_ACCOUNT",
            Command::CreateTrade(_) => "CREATE_TRADE",
            Command::CloseTrade(_) => "CLOSE_TRADE",
            Command::DeleteUser => "DELETE_USER",
        }
    }
}

// ── Outbound responses ──────────────────────────────────────────────

/// Response status on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
        }
    }
}

/// Result of executing one command, before correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub status: ResponseStatus,
    pub message: String,
    pub data: Option<Value>,
}

impl CommandResult {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(err: &EngineError) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: err.to_string(),
            data: Some(serde_json::json!({ "error": err.code() })),
        }
    }
}

/// A correlated response ready for the response stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: ResponseStatus,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: i64,
}

impl OrderResponse {
    pub fn new(order_id: impl Into<String>, result: CommandResult, timestamp: i64) -> Self {
        Self {
            order_id: order_id.into(),
            status: result.status,
            message: result.message,
            data: result.data,
            timestamp,
        }
    }

    /// Flat field map for publishing. `data` is a JSON string; absent data
    /// publishes as JSON `null`.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("orderId".to_string(), self.order_id.clone());
        fields.insert("status".to_string(), self.status.as_str().to_string());
        fields.insert(
            "data".to_string(),
            self.data
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "null".to_string()),
        );
        fields.insert("message".to_string(), self.message.clone());
        fields.insert("timestamp".to_string(), self.timestamp.to_string());
        fields
    }
}

// ── Price ticks ─────────────────────────────────────────────────────

/// One price entry inside a tick batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub asset: String,
    /// Scaled integer price.
    pub price: i64,
    /// Decimal count of `price`.
    pub decimals: u32,
}

/// A batch of price updates as read off the price stream.
///
/// The canonical encoding is a `data` field holding a JSON array of
/// [`PriceUpdate`] entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBatch {
    pub updates: Vec<PriceUpdate>,
}

impl PriceBatch {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, EngineError> {
        let data = fields
            .get("data")
            .ok_or_else(|| EngineError::Validation("missing field: data".to_string()))?;
        let updates: Vec<PriceUpdate> = serde_json::from_str(data)
            .map_err(|e| EngineError::Validation(format!("invalid price batch: {}", e)))?;
        Ok(Self { updates })
    }

    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "data".to_string(),
            serde_json::to_string(&self.updates).unwrap_or_else(|_| "[]".to_string()),
        );
        fields
    }
}

// ── Lifecycle events ────────────────────────────────────────────────

/// Outbound lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TradeLiquidated,
    TradeStopLoss,
    TradeTakeProfit,
    TradeClosed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TradeLiquidated => "TRADE_LIQUIDATED",
            EventType::TradeStopLoss => "TRADE_STOP_LOSS",
            EventType::TradeTakeProfit => "TRADE_TAKE_PROFIT",
            EventType::TradeClosed => "TRADE_CLOSED",
        }
    }

    /// Event type announced when a given trigger fires.
    pub fn for_trigger(kind: TriggerKind) -> Self {
        match kind {
            TriggerKind::Liquidation => EventType::TradeLiquidated,
            TriggerKind::StopLoss => EventType::TradeStopLoss,
            TriggerKind::TakeProfit => EventType::TradeTakeProfit,
        }
    }
}

/// A position-closure announcement for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub event_type: EventType,
    pub position_id: String,
    pub owner: String,
    pub asset: String,
    /// Realized PnL as a decimal string.
    pub pnl: String,
    /// Cash returned to the owner as a decimal string.
    pub margin_returned: String,
    /// Close price as a decimal string.
    pub close_price: String,
    /// What caused the closure: a trigger kind, "manual", or "user_deleted".
    pub trigger_type: String,
    pub timestamp: i64,
}

impl LifecycleEvent {
    /// Flat field map for publishing.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("eventType".to_string(), self.event_type.as_str().to_string());
        fields.insert("positionId".to_string(), self.position_id.clone());
        fields.insert("owner".to_string(), self.owner.clone());
        fields.insert("asset".to_string(), self.asset.clone());
        fields.insert("pnl".to_string(), self.pnl.clone());
        fields.insert("marginReturned".to_string(), self.margin_returned.clone());
        fields.insert("closePrice".to_string(), self.close_price.clone());
        fields.insert("triggerType".to_string(), self.trigger_type.clone());
        fields.insert("timestamp".to_string(), self.timestamp.to_string());
        fields
    }
}
