//! Engine state — the single mutable unit
//!
//! Ledger, position book, trigger index, and price cache live together
//! behind one mutex. The lock scope is one whole command or one whole price
//! tick; the snapshot timer clones a consistent view inside the same lock.
//! Nothing else touches these maps directly, which preserves the
//! single-writer serializability the engine's invariants assume.

use crate::book::PositionBook;
use crate::config::EngineConfig;
use crate::ledger::Ledger;
use crate::price::PriceCache;
use crate::triggers::TriggerIndex;
use std::sync::{Arc, Mutex};
use types::numeric::ScaledAmount;

/// All mutable engine state.
#[derive(Debug)]
pub struct EngineState {
    pub ledger: Ledger,
    pub book: PositionBook,
    pub triggers: TriggerIndex,
    pub prices: PriceCache,
}

impl EngineState {
    /// Fresh state from configuration (clean start).
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ledger: Ledger::new(
                config.cash_asset.clone(),
                ScaledAmount::new(config.seed_balance, config.cash_decimals),
            ),
            book: PositionBook::new(),
            triggers: TriggerIndex::new(config.profiles.clone(), config.default_precision_exp),
            prices: PriceCache::new(),
        }
    }
}

/// Shared handle to the engine state.
///
/// A plain `std::sync::Mutex`: the guard is never held across an await
/// point, and every critical section is short (one command or one tick).
pub type SharedState = Arc<Mutex<EngineState>>;

/// Wrap state for sharing between the ingest loops and the snapshot timer.
pub fn shared(state: EngineState) -> SharedState {
    Arc::new(Mutex::new(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_is_empty() {
        let state = EngineState::new(&EngineConfig::default());
        assert_eq!(state.ledger.account_count(), 0);
        assert_eq!(state.book.open_count(), 0);
        assert_eq!(state.triggers.entry_count(), 0);
        assert!(state.prices.is_empty());
    }
}
