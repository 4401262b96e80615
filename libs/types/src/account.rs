//! User balance types
//!
//! A user owns one balance per asset, stored as a scaled integer. No
//! mutating operation may drive a balance negative.

use crate::errors::EngineError;
use crate::ids::{AssetId, OwnerId};
use crate::numeric::ScaledAmount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-user balances keyed by asset.
///
/// Keys use `BTreeMap` so every serialization of the same balances is
/// byte-identical, keeping snapshot checksums stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBalance {
    pub owner: OwnerId,
    pub balances: BTreeMap<AssetId, ScaledAmount>,
}

impl UserBalance {
    /// Create an empty balance record for an owner.
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            balances: BTreeMap::new(),
        }
    }

    /// Balance for an asset, if one exists.
    pub fn balance(&self, asset: &AssetId) -> Option<ScaledAmount> {
        self.balances.get(asset).copied()
    }

    /// Set a balance outright (seeding, recovery).
    pub fn set_balance(&mut self, asset: AssetId, amount: ScaledAmount) {
        self.balances.insert(asset, amount);
    }

    /// Credit an asset balance. Creates the asset entry if absent.
    ///
    /// The amount's scale must match an existing entry's scale; decimal
    /// alignment is the caller's responsibility.
    pub fn credit(&mut self, asset: &AssetId, amount: ScaledAmount) -> Result<(), EngineError> {
        if amount.is_negative() {
            return Err(EngineError::Internal(
                "credit amount must be non-negative".to_string(),
            ));
        }
        match self.balances.get_mut(asset) {
            Some(existing) => {
                if existing.decimals() != amount.decimals() {
                    return Err(EngineError::Internal(format!(
                        "scale mismatch crediting {}: {} vs {}",
                        asset,
                        existing.decimals(),
                        amount.decimals()
                    )));
                }
                *existing = existing.checked_add(amount).ok_or_else(|| {
                    EngineError::Internal(format!("balance overflow crediting {}", asset))
                })?;
            }
            None => {
                self.balances.insert(asset.clone(), amount);
            }
        }
        Ok(())
    }

    /// Debit an asset balance. Fails without mutation if the result would
    /// go negative or the asset has no balance.
    pub fn debit(&mut self, asset: &AssetId, amount: ScaledAmount) -> Result<(), EngineError> {
        if amount.is_negative() {
            return Err(EngineError::Internal(
                "debit amount must be non-negative".to_string(),
            ));
        }
        let existing = self.balances.get_mut(asset).ok_or_else(|| {
            EngineError::InsufficientBalance {
                asset: asset.to_string(),
                required: amount.to_string(),
                available: "0".to_string(),
            }
        })?;
        if existing.decimals() != amount.decimals() {
            return Err(EngineError::Internal(format!(
                "scale mismatch debiting {}: {} vs {}",
                asset,
                existing.decimals(),
                amount.decimals()
            )));
        }
        if existing.raw() < amount.raw() {
            return Err(EngineError::InsufficientBalance {
                asset: asset.to_string(),
                required: amount.to_string(),
                available: existing.to_string(),
            });
        }
        *existing = existing
            .checked_sub(amount)
            .ok_or_else(|| EngineError::Internal(format!("balance underflow debiting {}", asset)))?;
        Ok(())
    }

    /// Check the no-negative-balance invariant across all assets.
    pub fn is_consistent(&self) -> bool {
        self.balances.values().all(|b| !b.is_negative())
    }
}
