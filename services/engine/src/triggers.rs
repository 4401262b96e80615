//! Trigger index — liquidation / stop-loss / take-profit detection
//!
//! Per asset, two price-bucketed maps (one per direction) hold the trigger
//! levels of every open position. A price tick quantizes to a bucket key and
//! crossed entries are found with a range scan over the ordered keys instead
//! of a walk over all open positions:
//!
//! - long side: every bucket key ≥ tick key has been crossed (price fell to
//!   or through a long's exit level)
//! - short side: every bucket key ≤ tick key has been crossed (price rose to
//!   or through a short's exit level)
//!
//! Buckets are `BTreeMap` so range scans are cheap and serialization order
//! is deterministic. Empty buckets are pruned on removal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::ids::{AssetId, PositionId};
use types::numeric::{pow10, rounded_div, ScaledAmount};
use types::position::{Position, TriggerKind};

/// Price quantization profile for one asset.
///
/// A real price maps to bucket key `round(price / precision)` where
/// `precision = 10^-precision_exp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationProfile {
    /// Lower bound of the expected price range.
    pub min: i64,
    /// Upper bound of the expected price range.
    pub max: i64,
    /// Precision exponent: 4 means buckets of 0.0001.
    pub precision_exp: u32,
}

impl QuantizationProfile {
    pub fn new(min: i64, max: i64, precision_exp: u32) -> Self {
        Self {
            min,
            max,
            precision_exp,
        }
    }

    /// Quantize a scaled price to its integer bucket key.
    ///
    /// Computed entirely in integer space:
    /// `round(raw × 10^precision_exp / 10^price_decimals)`.
    pub fn bucket_key(&self, price: ScaledAmount) -> i64 {
        let num = price.raw() * pow10(self.precision_exp);
        let den = pow10(price.decimals());
        rounded_div(num, den) as i64
    }
}

/// One registered trigger level for a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEntry {
    pub position_id: PositionId,
    pub kind: TriggerKind,
    pub trigger_price: ScaledAmount,
}

/// A crossed trigger found during detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerHit {
    pub position_id: PositionId,
    pub kind: TriggerKind,
}

/// Long-side and short-side buckets for one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetTriggers {
    pub long: BTreeMap<i64, Vec<TriggerEntry>>,
    pub short: BTreeMap<i64, Vec<TriggerEntry>>,
}

impl AssetTriggers {
    fn is_empty(&self) -> bool {
        self.long.is_empty() && self.short.is_empty()
    }

    fn entry_count(&self) -> usize {
        self.long.values().map(Vec::len).sum::<usize>()
            + self.short.values().map(Vec::len).sum::<usize>()
    }
}

/// The trigger index across all assets.
///
/// Quantization profiles are configuration, not state: snapshots carry only
/// the bucket maps, and profiles are re-supplied on restore.
#[derive(Debug, Clone)]
pub struct TriggerIndex {
    assets: BTreeMap<AssetId, AssetTriggers>,
    profiles: BTreeMap<AssetId, QuantizationProfile>,
    default_precision_exp: u32,
}

impl TriggerIndex {
    pub fn new(
        profiles: BTreeMap<AssetId, QuantizationProfile>,
        default_precision_exp: u32,
    ) -> Self {
        Self {
            assets: BTreeMap::new(),
            profiles,
            default_precision_exp,
        }
    }

    fn profile(&self, asset: &AssetId) -> QuantizationProfile {
        self.profiles
            .get(asset)
            .copied()
            .unwrap_or(QuantizationProfile::new(
                0,
                i64::MAX,
                self.default_precision_exp,
            ))
    }

    /// Register every configured trigger of an open position: the
    /// liquidation level for leveraged positions, plus stop-loss and
    /// take-profit when supplied. Entries land on the side matching the
    /// position's own direction.
    pub fn register(&mut self, position: &Position) {
        let mut levels: Vec<(TriggerKind, ScaledAmount)> = Vec::new();
        if let Some(liquidation) = position.liquidation_price {
            levels.push((TriggerKind::Liquidation, liquidation));
        }
        if let Some(stop_loss) = position.stop_loss_price {
            levels.push((TriggerKind::StopLoss, stop_loss));
        }
        if let Some(take_profit) = position.take_profit_price {
            levels.push((TriggerKind::TakeProfit, take_profit));
        }
        if levels.is_empty() {
            return;
        }

        let profile = self.profile(&position.asset);
        let asset_triggers = self.assets.entry(position.asset.clone()).or_default();
        for (kind, price) in levels {
            let key = profile.bucket_key(price);
            let bucket = match position.direction {
                types::position::Direction::LONG => asset_triggers.long.entry(key).or_default(),
                types::position::Direction::SHORT => asset_triggers.short.entry(key).or_default(),
            };
            bucket.push(TriggerEntry {
                position_id: position.id,
                kind,
                trigger_price: price,
            });
        }
    }

    /// Remove every entry belonging to a position, pruning empty buckets.
    ///
    /// Removal is keyed by the position's stored trigger prices, so it is
    /// exact: entries of other positions sharing a bucket are untouched.
    pub fn remove_position(&mut self, position: &Position) {
        let profile = self.profile(&position.asset);
        let Some(asset_triggers) = self.assets.get_mut(&position.asset) else {
            return;
        };

        let side = match position.direction {
            types::position::Direction::LONG => &mut asset_triggers.long,
            types::position::Direction::SHORT => &mut asset_triggers.short,
        };

        for price in [
            position.liquidation_price,
            position.stop_loss_price,
            position.take_profit_price,
        ]
        .into_iter()
        .flatten()
        {
            let key = profile.bucket_key(price);
            if let Some(bucket) = side.get_mut(&key) {
                bucket.retain(|entry| entry.position_id != position.id);
                if bucket.is_empty() {
                    side.remove(&key);
                }
            }
        }

        if asset_triggers.is_empty() {
            self.assets.remove(&position.asset);
        }
    }

    /// Find every trigger crossed by a price tick for an asset.
    ///
    /// Hits are returned in bucket-key order per side (long side first);
    /// the caller is responsible for skipping positions already closed by an
    /// earlier hit in the same tick.
    pub fn detect(&self, asset: &AssetId, tick_price: ScaledAmount) -> Vec<TriggerHit> {
        let Some(asset_triggers) = self.assets.get(asset) else {
            return Vec::new();
        };
        let key = self.profile(asset).bucket_key(tick_price);

        let mut hits = Vec::new();
        // Price fell to or through a long's exit level.
        for entries in asset_triggers.long.range(key..).map(|(_, v)| v) {
            for entry in entries {
                hits.push(TriggerHit {
                    position_id: entry.position_id,
                    kind: entry.kind,
                });
            }
        }
        // Price rose to or through a short's exit level.
        for entries in asset_triggers.short.range(..=key).map(|(_, v)| v) {
            for entry in entries {
                hits.push(TriggerHit {
                    position_id: entry.position_id,
                    kind: entry.kind,
                });
            }
        }
        hits
    }

    /// Total registered trigger entries across all assets.
    pub fn entry_count(&self) -> usize {
        self.assets.values().map(AssetTriggers::entry_count).sum()
    }

    /// Number of entries referencing a position (0 once closed).
    pub fn entries_for(&self, position_id: &PositionId) -> usize {
        self.assets
            .values()
            .flat_map(|a| a.long.values().chain(a.short.values()))
            .flatten()
            .filter(|entry| &entry.position_id == position_id)
            .count()
    }

    /// Clone the bucket maps for snapshot serialization.
    pub fn export(&self) -> BTreeMap<AssetId, AssetTriggers> {
        self.assets.clone()
    }

    /// Replace the bucket maps from a snapshot.
    pub fn restore(&mut self, assets: BTreeMap<AssetId, AssetTriggers>) {
        self.assets = assets;
    }
}
