//! Ledger — authoritative per-user cash store
//!
//! Accounts are keyed by owner; each holds one scaled integer balance per
//! asset. Every mutation either completes exactly or leaves the ledger
//! untouched, and no operation can drive a balance negative.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::errors::EngineError;
use types::ids::{AssetId, OwnerId};
use types::numeric::ScaledAmount;

/// The authoritative cash store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    accounts: BTreeMap<OwnerId, types::account::UserBalance>,
    cash_asset: AssetId,
    seed_balance: ScaledAmount,
}

impl Ledger {
    /// Create an empty ledger seeding new accounts with the given cash
    /// balance.
    pub fn new(cash_asset: AssetId, seed_balance: ScaledAmount) -> Self {
        Self {
            accounts: BTreeMap::new(),
            cash_asset,
            seed_balance,
        }
    }

    /// Create an account seeded with the default cash balance.
    ///
    /// Fails if the owner already has an account.
    pub fn create_account(
        &mut self,
        owner: &OwnerId,
    ) -> Result<&types::account::UserBalance, EngineError> {
        if self.accounts.contains_key(owner) {
            return Err(EngineError::Validation("Account already exists".to_string()));
        }
        let mut balance = types::account::UserBalance::new(owner.clone());
        balance.set_balance(self.cash_asset.clone(), self.seed_balance);
        self.accounts.insert(owner.clone(), balance);
        Ok(&self.accounts[owner])
    }

    /// Look up an account.
    pub fn get(&self, owner: &OwnerId) -> Option<&types::account::UserBalance> {
        self.accounts.get(owner)
    }

    /// Whether an account exists.
    pub fn exists(&self, owner: &OwnerId) -> bool {
        self.accounts.contains_key(owner)
    }

    /// Cash balance for an owner; zero if the owner or asset is unknown.
    pub fn cash_balance(&self, owner: &OwnerId) -> ScaledAmount {
        self.accounts
            .get(owner)
            .and_then(|account| account.balance(&self.cash_asset))
            .unwrap_or_else(|| ScaledAmount::zero(self.seed_balance.decimals()))
    }

    /// Debit an account. Fails without mutation if the account is unknown
    /// or the balance would go negative.
    pub fn debit(
        &mut self,
        owner: &OwnerId,
        asset: &AssetId,
        amount: ScaledAmount,
    ) -> Result<(), EngineError> {
        let account = self
            .accounts
            .get_mut(owner)
            .ok_or_else(|| EngineError::NotFound(format!("Account not found: {}", owner)))?;
        account.debit(asset, amount)
    }

    /// Credit an account. Fails if the account is unknown.
    pub fn credit(
        &mut self,
        owner: &OwnerId,
        asset: &AssetId,
        amount: ScaledAmount,
    ) -> Result<(), EngineError> {
        let account = self
            .accounts
            .get_mut(owner)
            .ok_or_else(|| EngineError::NotFound(format!("Account not found: {}", owner)))?;
        account.credit(asset, amount)
    }

    /// Remove an account outright, returning its final balances.
    pub fn delete_account(
        &mut self,
        owner: &OwnerId,
    ) -> Result<types::account::UserBalance, EngineError> {
        self.accounts
            .remove(owner)
            .ok_or_else(|| EngineError::NotFound(format!("Account not found: {}", owner)))
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// The configured cash asset.
    pub fn cash_asset(&self) -> &AssetId {
        &self.cash_asset
    }

    /// Clone the account map for snapshot serialization.
    pub fn export(&self) -> BTreeMap<OwnerId, types::account::UserBalance> {
        self.accounts.clone()
    }

    /// Replace the account map from a snapshot.
    pub fn restore(&mut self, accounts: BTreeMap<OwnerId, types::account::UserBalance>) {
        self.accounts = accounts;
    }
}
