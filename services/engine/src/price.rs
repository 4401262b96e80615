//! Price cache — latest price per asset
//!
//! Ephemeral state fed by the market stream. Deliberately excluded from
//! snapshots: after a restart it refills from the live feed within one
//! batch interval.

use std::collections::BTreeMap;
use types::ids::AssetId;
use types::numeric::ScaledAmount;

/// Latest observed price per asset, each with its own decimal scale.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    prices: BTreeMap<AssetId, ScaledAmount>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest price for an asset, if any tick has arrived.
    pub fn get(&self, asset: &AssetId) -> Option<ScaledAmount> {
        self.prices.get(asset).copied()
    }

    /// Record the latest price for an asset.
    pub fn set(&mut self, asset: AssetId, price: ScaledAmount) {
        self.prices.insert(asset, price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let mut cache = PriceCache::new();
        let btc = AssetId::new("BTC_USDC");
        assert!(cache.get(&btc).is_none());

        cache.set(btc.clone(), ScaledAmount::new(500_000_000, 4));
        assert_eq!(cache.get(&btc).unwrap().raw(), 500_000_000);

        // Later tick overwrites
        cache.set(btc.clone(), ScaledAmount::new(510_000_000, 4));
        assert_eq!(cache.get(&btc).unwrap().raw(), 510_000_000);
        assert_eq!(cache.len(), 1);
    }
}
