//! Command processor — the engine's state machine
//!
//! Validates and executes account and trade commands against the ledger,
//! position book, trigger index, and price cache. Each command runs inside
//! one state lock scope; a failed command leaves no partial mutation
//! behind. The shared close path here is also what the price loop applies
//! when a trigger fires.

use crate::config::EngineConfig;
use crate::messages::{
    Command, CommandResult, CreateTradeRequest, EventType, LifecycleEvent,
};
use crate::risk;
use crate::state::EngineState;
use serde_json::{json, Value};
use tracing::warn;
use types::errors::EngineError;
use types::ids::{AssetId, OwnerId, PositionId};
use types::numeric::ScaledAmount;
use types::position::{Position, PositionStatus, TriggerKind, MAX_LEVERAGE, MIN_LEVERAGE};

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit CLOSE_TRADE by the owner.
    Manual,
    /// Forced closure during DELETE_USER.
    UserDeleted,
    /// An automatic trigger fired.
    Trigger(TriggerKind),
}

impl CloseReason {
    fn status(&self) -> PositionStatus {
        match self {
            CloseReason::Manual | CloseReason::UserDeleted => PositionStatus::Closed,
            CloseReason::Trigger(kind) => kind.closing_status(),
        }
    }

    fn event_type(&self) -> EventType {
        match self {
            CloseReason::Manual | CloseReason::UserDeleted => EventType::TradeClosed,
            CloseReason::Trigger(kind) => EventType::for_trigger(*kind),
        }
    }

    fn trigger_label(&self) -> &'static str {
        match self {
            CloseReason::Manual => "manual",
            CloseReason::UserDeleted => "user_deleted",
            CloseReason::Trigger(kind) => kind.as_str(),
        }
    }
}

/// Everything a closure produced: the final position, its realized PnL,
/// the cash returned, and the lifecycle event to publish.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub position: Position,
    pub pnl: ScaledAmount,
    pub returned: ScaledAmount,
    pub event: LifecycleEvent,
}

/// Close an open position at the given price and settle the ledger.
///
/// The ledger credit happens first; only then does the position move to the
/// closed set and its trigger entries get removed, so a failed credit
/// leaves everything untouched.
pub fn close_position(
    state: &mut EngineState,
    id: PositionId,
    close_price: ScaledAmount,
    reason: CloseReason,
    now: i64,
) -> Result<CloseOutcome, EngineError> {
    let position = state
        .book
        .get_open(&id)
        .ok_or_else(|| EngineError::NotFound(format!("Position not found: {}", id)))?;

    let pnl = risk::realized_pnl(
        position.direction,
        position.entry_price,
        close_price,
        position.margin,
        position.leverage,
    );
    let returned = risk::margin_returned(position.margin, pnl);
    let owner = position.owner.clone();

    let cash_asset = state.ledger.cash_asset().clone();
    state.ledger.credit(&owner, &cash_asset, returned)?;

    let Some(mut position) = state.book.remove_open(&id) else {
        return Err(EngineError::Internal(format!(
            "open position vanished mid-close: {}",
            id
        )));
    };
    state.triggers.remove_position(&position);
    position.close(reason.status(), close_price, pnl, now);

    let event = LifecycleEvent {
        event_type: reason.event_type(),
        position_id: position.id.to_string(),
        owner: owner.to_string(),
        asset: position.asset.to_string(),
        pnl: pnl.to_string(),
        margin_returned: returned.to_string(),
        close_price: close_price.to_string(),
        trigger_type: reason.trigger_label().to_string(),
        timestamp: now,
    };

    state.book.insert_closed(position.clone());
    Ok(CloseOutcome {
        position,
        pnl,
        returned,
        event,
    })
}

/// Execute one parsed command.
///
/// Returns the response payload plus any lifecycle events the command
/// produced. Errors never leave partial state behind.
pub fn execute(
    state: &mut EngineState,
    config: &EngineConfig,
    owner: &OwnerId,
    command: &Command,
    now: i64,
) -> (CommandResult, Vec<LifecycleEvent>) {
    let outcome = match command {
        Command::GetBalance => handle_get_balance(state, owner),
        Command::GetUsdBalance => handle_get_usd_balance(state, owner),
        Command::CreateAccount => handle_create_account(state, owner),
        Command::CreateTrade(request) => handle_create_trade(state, config, owner, request, now),
        Command::CloseTrade(request) => request
            .position_id()
            .and_then(|id| handle_close_trade(state, owner, id, now)),
        Command::DeleteUser => handle_delete_user(state, owner, now),
    };

    match outcome {
        Ok((message, data, events)) => (CommandResult::success(message, data), events),
        Err(err) => {
            warn!(
                command = command.label(),
                owner = %owner,
                error = %err,
                "command rejected"
            );
            (CommandResult::error(&err), Vec::new())
        }
    }
}

type HandlerResult = Result<(String, Value, Vec<LifecycleEvent>), EngineError>;

fn handle_get_balance(state: &EngineState, owner: &OwnerId) -> HandlerResult {
    let account = state
        .ledger
        .get(owner)
        .ok_or_else(|| EngineError::NotFound("User balance not found".to_string()))?;

    let balances: Value = account
        .balances
        .iter()
        .map(|(asset, amount)| (asset.to_string(), json!(amount.to_string())))
        .collect::<serde_json::Map<String, Value>>()
        .into();

    Ok((
        "Balance retrieved successfully".to_string(),
        json!({ "owner": owner.as_str(), "balances": balances }),
        Vec::new(),
    ))
}

fn handle_get_usd_balance(state: &EngineState, owner: &OwnerId) -> HandlerResult {
    // Zero for unknown owners: a read-only projection, not an error.
    let balance = state.ledger.cash_balance(owner);
    Ok((
        "USD balance retrieved successfully".to_string(),
        json!({ "owner": owner.as_str(), "usdBalance": balance.to_string() }),
        Vec::new(),
    ))
}

fn handle_create_account(state: &mut EngineState, owner: &OwnerId) -> HandlerResult {
    let account = state.ledger.create_account(owner)?;
    let assets: Vec<String> = account.balances.keys().map(|a| a.to_string()).collect();
    let seeded = state.ledger.cash_balance(owner);
    Ok((
        "Account created successfully".to_string(),
        json!({
            "owner": owner.as_str(),
            "initialCashBalance": seeded.to_string(),
            "assets": assets,
        }),
        Vec::new(),
    ))
}

fn handle_create_trade(
    state: &mut EngineState,
    config: &EngineConfig,
    owner: &OwnerId,
    request: &CreateTradeRequest,
    now: i64,
) -> HandlerResult {
    if !state.ledger.exists(owner) {
        return Err(EngineError::NotFound(format!("Account not found: {}", owner)));
    }

    if !(MIN_LEVERAGE..=MAX_LEVERAGE).contains(&request.leverage) {
        return Err(EngineError::Validation(format!(
            "leverage must be between {} and {} (representing 1.0x to 100.0x)",
            MIN_LEVERAGE, MAX_LEVERAGE
        )));
    }
    if request.margin <= 0.0 {
        return Err(EngineError::Validation("margin must be > 0".to_string()));
    }
    if let Some(stop_loss) = request.stop_loss_price {
        if stop_loss <= 0.0 {
            return Err(EngineError::Validation(
                "stopLossPrice must be a positive number".to_string(),
            ));
        }
    }
    if let Some(take_profit) = request.take_profit_price {
        if take_profit <= 0.0 {
            return Err(EngineError::Validation(
                "takeProfitPrice must be a positive number".to_string(),
            ));
        }
    }

    let asset = AssetId::new(request.asset.clone());
    let entry_price = state.prices.get(&asset).ok_or(EngineError::NoPrice {
        asset: asset.to_string(),
    })?;

    let margin = ScaledAmount::from_f64(request.margin, config.cash_decimals)
        .filter(|m| m.raw() > 0)
        .ok_or_else(|| EngineError::Validation("margin is not a valid amount".to_string()))?;

    let scale_trigger = |value: f64, name: &str| {
        ScaledAmount::from_f64(value, entry_price.decimals())
            .filter(|p| p.raw() > 0)
            .ok_or_else(|| EngineError::Validation(format!("{} is not a valid price", name)))
    };
    let stop_loss_price = request
        .stop_loss_price
        .map(|p| scale_trigger(p, "stopLossPrice"))
        .transpose()?;
    let take_profit_price = request
        .take_profit_price
        .map(|p| scale_trigger(p, "takeProfitPrice"))
        .transpose()?;

    // Margin is locked only after every validation has passed.
    state.ledger.debit(owner, &config.cash_asset, margin)?;

    let liquidation_price = (request.leverage > MIN_LEVERAGE)
        .then(|| risk::liquidation_price(request.direction, entry_price, request.leverage));

    let position = Position::open(
        PositionId::new(),
        owner.clone(),
        asset,
        request.direction,
        margin,
        request.leverage,
        entry_price,
        liquidation_price,
        stop_loss_price,
        take_profit_price,
        now,
    );

    state.triggers.register(&position);
    let data = json!({
        "tradeId": position.id.to_string(),
        "asset": position.asset.to_string(),
        "direction": position.direction.as_str(),
        "margin": margin.to_string(),
        "leverage": position.leverage,
        "entryPrice": entry_price.to_string(),
        "liquidationPrice": liquidation_price.map(|p| p.to_string()),
        "stopLossPrice": stop_loss_price.map(|p| p.to_string()),
        "takeProfitPrice": take_profit_price.map(|p| p.to_string()),
    });
    state.book.insert_open(position)?;

    Ok(("Trade created successfully".to_string(), data, Vec::new()))
}

fn handle_close_trade(
    state: &mut EngineState,
    owner: &OwnerId,
    id: PositionId,
    now: i64,
) -> HandlerResult {
    let position = state
        .book
        .get_open(&id)
        .ok_or_else(|| EngineError::NotFound(format!("Position not found: {}", id)))?;
    if &position.owner != owner {
        // Not this requester's position; indistinguishable from unknown.
        return Err(EngineError::NotFound(format!("Position not found: {}", id)));
    }

    let close_price = state
        .prices
        .get(&position.asset)
        .ok_or(EngineError::NoPrice {
            asset: position.asset.to_string(),
        })?;

    let outcome = close_position(state, id, close_price, CloseReason::Manual, now)?;
    let data = json!({
        "tradeId": outcome.position.id.to_string(),
        "status": outcome.position.status.as_str(),
        "exitPrice": close_price.to_string(),
        "pnl": outcome.pnl.to_string(),
        "marginReturned": outcome.returned.to_string(),
    });
    Ok((
        "Trade closed successfully".to_string(),
        data,
        vec![outcome.event.clone()],
    ))
}

fn handle_delete_user(state: &mut EngineState, owner: &OwnerId, now: i64) -> HandlerResult {
    if !state.ledger.exists(owner) {
        return Err(EngineError::NotFound(format!("Account not found: {}", owner)));
    }

    // All-or-nothing: every open position must be priceable before any
    // closure runs.
    let open_ids = state.book.open_ids_for(owner);
    for id in &open_ids {
        let position = state
            .book
            .get_open(id)
            .ok_or_else(|| EngineError::Internal(format!("owner index out of sync: {}", id)))?;
        if state.prices.get(&position.asset).is_none() {
            return Err(EngineError::NoPrice {
                asset: position.asset.to_string(),
            });
        }
    }

    let cash_decimals = state.ledger.cash_balance(owner).decimals();
    let mut total_returned = ScaledAmount::zero(cash_decimals);
    let mut events = Vec::with_capacity(open_ids.len());
    for id in &open_ids {
        let close_price = state
            .book
            .get_open(id)
            .and_then(|position| state.prices.get(&position.asset))
            .ok_or_else(|| EngineError::Internal(format!("price vanished mid-delete: {}", id)))?;
        let outcome = close_position(state, *id, close_price, CloseReason::UserDeleted, now)?;
        total_returned = total_returned
            .checked_add(outcome.returned)
            .ok_or_else(|| EngineError::Internal("returned funds overflow".to_string()))?;
        events.push(outcome.event);
    }

    state.ledger.delete_account(owner)?;
    state.book.remove_owner(owner);

    Ok((
        "User deleted successfully".to_string(),
        json!({
            "owner": owner.as_str(),
            "positionsClosed": open_ids.len(),
            "totalReturned": total_returned.to_string(),
        }),
        events,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CloseTradeRequest;
    use types::position::Direction;

    const NOW: i64 = 1_700_000_000_000;

    fn setup() -> (EngineState, EngineConfig, OwnerId) {
        let config = EngineConfig::default();
        let mut state = EngineState::new(&config);
        let owner = OwnerId::new("alice@example.com");
        state.ledger.create_account(&owner).unwrap();
        state.prices.set(
            AssetId::new("BTC_USDC"),
            ScaledAmount::new(500_000_000, 4), // 50000.0000
        );
        (state, config, owner)
    }

    fn create_trade(
        state: &mut EngineState,
        config: &EngineConfig,
        owner: &OwnerId,
        request: CreateTradeRequest,
    ) -> CommandResult {
        let (result, _) = execute(state, config, owner, &Command::CreateTrade(request), NOW);
        result
    }

    fn basic_trade(leverage: u32) -> CreateTradeRequest {
        CreateTradeRequest {
            asset: "BTC_USDC".to_string(),
            direction: Direction::LONG,
            margin: 100.0,
            leverage,
            stop_loss_price: None,
            take_profit_price: None,
        }
    }

    fn trade_id(result: &CommandResult) -> PositionId {
        let id = result.data.as_ref().unwrap()["tradeId"].as_str().unwrap();
        PositionId::parse(id).unwrap()
    }

    // ── account commands ──

    #[test]
    fn test_create_account_and_get_balance() {
        let config = EngineConfig::default();
        let mut state = EngineState::new(&config);
        let owner = OwnerId::new("bob@example.com");

        let (result, _) = execute(&mut state, &config, &owner, &Command::CreateAccount, NOW);
        assert_eq!(result.status, crate::messages::ResponseStatus::Success);
        assert_eq!(
            result.data.unwrap()["initialCashBalance"],
            json!("5000.0000")
        );

        let (result, _) = execute(&mut state, &config, &owner, &Command::GetBalance, NOW);
        assert_eq!(result.data.unwrap()["balances"]["USD"], json!("5000.0000"));
    }

    #[test]
    fn test_create_account_twice_errors() {
        let config = EngineConfig::default();
        let mut state = EngineState::new(&config);
        let owner = OwnerId::new("bob@example.com");
        execute(&mut state, &config, &owner, &Command::CreateAccount, NOW);
        let (result, _) = execute(&mut state, &config, &owner, &Command::CreateAccount, NOW);
        assert_eq!(result.status, crate::messages::ResponseStatus::Error);
        assert_eq!(result.data.unwrap()["error"], json!("VALIDATION_ERROR"));
    }

    #[test]
    fn test_get_usd_balance_unknown_owner_is_zero() {
        let config = EngineConfig::default();
        let mut state = EngineState::new(&config);
        let owner = OwnerId::new("nobody@example.com");
        let (result, _) = execute(&mut state, &config, &owner, &Command::GetUsdBalance, NOW);
        assert_eq!(result.status, crate::messages::ResponseStatus::Success);
        assert_eq!(result.data.unwrap()["usdBalance"], json!("0.0000"));
    }

    #[test]
    fn test_get_balance_unknown_owner_errors() {
        let config = EngineConfig::default();
        let mut state = EngineState::new(&config);
        let owner = OwnerId::new("nobody@example.com");
        let (result, _) = execute(&mut state, &config, &owner, &Command::GetBalance, NOW);
        assert_eq!(result.data.unwrap()["error"], json!("NOT_FOUND"));
    }

    // ── CREATE_TRADE ──

    #[test]
    fn test_create_trade_debits_margin_and_registers_triggers() {
        let (mut state, config, owner) = setup();
        let result = create_trade(&mut state, &config, &owner, basic_trade(1000));
        assert_eq!(result.status, crate::messages::ResponseStatus::Success);

        // 5000 − 100 margin
        assert_eq!(state.ledger.cash_balance(&owner).raw(), 49_000_000);
        assert_eq!(state.book.open_count(), 1);
        // Leveraged position → liquidation trigger registered
        assert_eq!(state.triggers.entry_count(), 1);

        let data = result.data.unwrap();
        assert_eq!(data["entryPrice"], json!("50000.0000"));
        // 100.0x long: 50000 − 50000/100 = 49500
        assert_eq!(data["liquidationPrice"], json!("49500.0000"));
    }

    #[test]
    fn test_create_trade_short_liquidation_price() {
        let (mut state, config, owner) = setup();
        let mut request = basic_trade(1000);
        request.direction = Direction::SHORT;
        let result = create_trade(&mut state, &config, &owner, request);
        assert_eq!(
            result.data.unwrap()["liquidationPrice"],
            json!("50500.0000")
        );
    }

    #[test]
    fn test_create_trade_1x_has_no_liquidation() {
        let (mut state, config, owner) = setup();
        let result = create_trade(&mut state, &config, &owner, basic_trade(10));
        let data = result.data.unwrap();
        assert_eq!(data["liquidationPrice"], Value::Null);
        assert_eq!(state.triggers.entry_count(), 0);
    }

    #[test]
    fn test_leverage_bounds() {
        let (mut state, config, owner) = setup();
        // Boundary values accepted
        for leverage in [10, 1000] {
            let result = create_trade(&mut state, &config, &owner, basic_trade(leverage));
            assert_eq!(
                result.status,
                crate::messages::ResponseStatus::Success,
                "leverage {} should be accepted",
                leverage
            );
        }
        // Out-of-range rejected
        for leverage in [9, 1001] {
            let result = create_trade(&mut state, &config, &owner, basic_trade(leverage));
            assert_eq!(result.data.unwrap()["error"], json!("VALIDATION_ERROR"));
        }
    }

    #[test]
    fn test_create_trade_rejects_nonpositive_margin() {
        let (mut state, config, owner) = setup();
        let mut request = basic_trade(100);
        request.margin = 0.0;
        let result = create_trade(&mut state, &config, &owner, request);
        assert_eq!(result.data.unwrap()["error"], json!("VALIDATION_ERROR"));
        // No debit happened
        assert_eq!(state.ledger.cash_balance(&owner).raw(), 50_000_000);
    }

    #[test]
    fn test_create_trade_insufficient_balance() {
        let (mut state, config, owner) = setup();
        let mut request = basic_trade(100);
        request.margin = 6000.0; // seed is 5000
        let result = create_trade(&mut state, &config, &owner, request);
        assert_eq!(
            result.data.unwrap()["error"],
            json!("INSUFFICIENT_BALANCE")
        );
        assert_eq!(state.ledger.cash_balance(&owner).raw(), 50_000_000);
        assert_eq!(state.book.open_count(), 0);
    }

    #[test]
    fn test_create_trade_no_price() {
        let (mut state, config, owner) = setup();
        let mut request = basic_trade(100);
        request.asset = "ETH_USDC".to_string();
        let result = create_trade(&mut state, &config, &owner, request);
        assert_eq!(result.data.unwrap()["error"], json!("NO_PRICE"));
    }

    #[test]
    fn test_create_trade_unknown_account() {
        let (mut state, config, _) = setup();
        let stranger = OwnerId::new("stranger@example.com");
        let result = create_trade(&mut state, &config, &stranger, basic_trade(100));
        assert_eq!(result.data.unwrap()["error"], json!("NOT_FOUND"));
    }

    #[test]
    fn test_create_trade_scales_stop_loss_to_entry_decimals() {
        let (mut state, config, owner) = setup();
        let mut request = basic_trade(100);
        request.stop_loss_price = Some(49_000.0);
        request.take_profit_price = Some(52_000.0);
        let result = create_trade(&mut state, &config, &owner, request);
        let data = result.data.unwrap();
        assert_eq!(data["stopLossPrice"], json!("49000.0000"));
        assert_eq!(data["takeProfitPrice"], json!("52000.0000"));
        // liquidation + stop loss + take profit
        assert_eq!(state.triggers.entry_count(), 3);
    }

    // ── CLOSE_TRADE ──

    #[test]
    fn test_close_trade_nets_to_pnl_exactly() {
        let (mut state, config, owner) = setup();
        let before = state.ledger.cash_balance(&owner).raw();
        let result = create_trade(&mut state, &config, &owner, basic_trade(100));
        let id = trade_id(&result);

        // Price rises 2%: 50000 → 51000
        state
            .prices
            .set(AssetId::new("BTC_USDC"), ScaledAmount::new(510_000_000, 4));

        let close = Command::CloseTrade(CloseTradeRequest {
            trade_id: id.to_string(),
        });
        let (result, events) = execute(&mut state, &config, &owner, &close, NOW + 1);
        assert_eq!(result.status, crate::messages::ResponseStatus::Success);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::TradeClosed);
        assert_eq!(events[0].trigger_type, "manual");

        // pnl = 2% × 100 × 10 = 20.0000; net change equals pnl exactly
        let after = state.ledger.cash_balance(&owner).raw();
        assert_eq!(after - before, 200_000);
        assert_eq!(state.book.open_count(), 0);
        assert_eq!(state.book.closed_count(), 1);
        assert_eq!(state.triggers.entry_count(), 0);
    }

    #[test]
    fn test_close_trade_flat_price_is_zero_sum() {
        let (mut state, config, owner) = setup();
        let before = state.ledger.cash_balance(&owner).raw();
        let result = create_trade(&mut state, &config, &owner, basic_trade(1000));
        let id = trade_id(&result);

        let close = Command::CloseTrade(CloseTradeRequest {
            trade_id: id.to_string(),
        });
        let (result, _) = execute(&mut state, &config, &owner, &close, NOW + 1);
        assert_eq!(result.status, crate::messages::ResponseStatus::Success);
        assert_eq!(state.ledger.cash_balance(&owner).raw(), before);
    }

    #[test]
    fn test_close_trade_wrong_owner_reports_not_found() {
        let (mut state, config, owner) = setup();
        let result = create_trade(&mut state, &config, &owner, basic_trade(100));
        let id = trade_id(&result);

        let mallory = OwnerId::new("mallory@example.com");
        state.ledger.create_account(&mallory).unwrap();
        let close = Command::CloseTrade(CloseTradeRequest {
            trade_id: id.to_string(),
        });
        let (result, _) = execute(&mut state, &config, &mallory, &close, NOW + 1);
        assert_eq!(result.data.unwrap()["error"], json!("NOT_FOUND"));
        // Still open, still triggered
        assert_eq!(state.book.open_count(), 1);
    }

    #[test]
    fn test_close_trade_unknown_id() {
        let (mut state, config, owner) = setup();
        let close = Command::CloseTrade(CloseTradeRequest {
            trade_id: PositionId::new().to_string(),
        });
        let (result, _) = execute(&mut state, &config, &owner, &close, NOW);
        assert_eq!(result.data.unwrap()["error"], json!("NOT_FOUND"));
    }

    #[test]
    fn test_close_trade_malformed_id() {
        let (mut state, config, owner) = setup();
        let close = Command::CloseTrade(CloseTradeRequest {
            trade_id: "not-a-uuid".to_string(),
        });
        let (result, _) = execute(&mut state, &config, &owner, &close, NOW);
        assert_eq!(result.data.unwrap()["error"], json!("VALIDATION_ERROR"));
    }

    // ── DELETE_USER ──

    #[test]
    fn test_delete_user_force_closes_everything() {
        let (mut state, config, owner) = setup();
        create_trade(&mut state, &config, &owner, basic_trade(100));
        let mut short = basic_trade(100);
        short.direction = Direction::SHORT;
        short.margin = 50.0;
        create_trade(&mut state, &config, &owner, short);
        assert_eq!(state.book.open_count(), 2);

        let (result, events) = execute(&mut state, &config, &owner, &Command::DeleteUser, NOW + 1);
        assert_eq!(result.status, crate::messages::ResponseStatus::Success);
        let data = result.data.unwrap();
        assert_eq!(data["positionsClosed"], json!(2));
        // Flat price: both margins come back in full
        assert_eq!(data["totalReturned"], json!("150.0000"));

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.trigger_type == "user_deleted"));
        assert_eq!(state.book.open_count(), 0);
        assert_eq!(state.triggers.entry_count(), 0);
        assert!(state.ledger.get(&owner).is_none());
        assert!(state.book.owner_positions(&owner).is_empty());
    }

    #[test]
    fn test_delete_user_twice_reports_not_found() {
        let (mut state, config, owner) = setup();
        execute(&mut state, &config, &owner, &Command::DeleteUser, NOW);
        let (result, _) = execute(&mut state, &config, &owner, &Command::DeleteUser, NOW + 1);
        assert_eq!(result.data.unwrap()["error"], json!("NOT_FOUND"));
    }

    #[test]
    fn test_delete_user_without_price_is_all_or_nothing() {
        let (mut state, config, owner) = setup();
        create_trade(&mut state, &config, &owner, basic_trade(100));

        // Second position on an asset that then loses its price
        state
            .prices
            .set(AssetId::new("ETH_USDC"), ScaledAmount::new(3_000_000_000, 6));
        let mut eth = basic_trade(100);
        eth.asset = "ETH_USDC".to_string();
        create_trade(&mut state, &config, &owner, eth);

        // Rebuild the cache without ETH to simulate a feed gap after restart
        state.prices = crate::price::PriceCache::new();
        state
            .prices
            .set(AssetId::new("BTC_USDC"), ScaledAmount::new(500_000_000, 4));

        let (result, events) = execute(&mut state, &config, &owner, &Command::DeleteUser, NOW + 1);
        assert_eq!(result.data.unwrap()["error"], json!("NO_PRICE"));
        assert!(events.is_empty());
        // Nothing was closed or deleted
        assert_eq!(state.book.open_count(), 2);
        assert!(state.ledger.get(&owner).is_some());
    }

    // ── trigger-close path ──

    #[test]
    fn test_close_position_liquidation_consumes_margin() {
        let (mut state, config, owner) = setup();
        let result = create_trade(&mut state, &config, &owner, basic_trade(1000));
        let id = trade_id(&result);
        let balance_after_open = state.ledger.cash_balance(&owner).raw();

        // Liquidation level for 100.0x long from 50000 is 49500
        let outcome = close_position(
            &mut state,
            id,
            ScaledAmount::new(495_000_000, 4),
            CloseReason::Trigger(TriggerKind::Liquidation),
            NOW + 1,
        )
        .unwrap();

        assert_eq!(outcome.position.status, PositionStatus::Liquidated);
        assert_eq!(outcome.pnl.raw(), -1_000_000);
        assert!(outcome.returned.is_zero());
        assert_eq!(outcome.event.event_type, EventType::TradeLiquidated);
        // Nothing came back
        assert_eq!(state.ledger.cash_balance(&owner).raw(), balance_after_open);
        assert_eq!(state.triggers.entries_for(&id), 0);
    }

    #[test]
    fn test_close_position_twice_fails() {
        let (mut state, config, owner) = setup();
        let result = create_trade(&mut state, &config, &owner, basic_trade(100));
        let id = trade_id(&result);
        let price = ScaledAmount::new(500_000_000, 4);

        close_position(&mut state, id, price, CloseReason::Manual, NOW).unwrap();
        let err = close_position(&mut state, id, price, CloseReason::Manual, NOW).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
