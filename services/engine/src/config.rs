//! Engine configuration
//!
//! Stream names, consumer identity, snapshot policy, cash seeding, and
//! per-asset quantization profiles. Values come from defaults with
//! environment overrides; nothing here is hot-reloaded.

use crate::triggers::QuantizationProfile;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use types::ids::AssetId;

/// Engine service configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Inbound command stream.
    pub command_stream: String,
    /// Inbound price-tick stream.
    pub price_stream: String,
    /// Outbound command-response stream.
    pub response_stream: String,
    /// Outbound lifecycle-event stream.
    pub event_stream: String,

    /// Consumer group for the order loop.
    pub order_group: String,
    /// Consumer group for the price loop.
    pub price_group: String,
    /// Consumer name within each group.
    pub consumer_name: String,

    /// Max messages per stream read.
    pub read_count: usize,
    /// Blocking wait for a stream read.
    pub read_block: Duration,
    /// Backoff after a transport-level error.
    pub retry_backoff: Duration,

    /// Directory for snapshot files.
    pub snapshot_dir: PathBuf,
    /// Interval between snapshots.
    pub snapshot_interval: Duration,
    /// Number of snapshot files retained.
    pub snapshot_retention: usize,

    /// Cash asset every account is seeded with.
    pub cash_asset: AssetId,
    /// Decimal count of the cash asset.
    pub cash_decimals: u32,
    /// Seed balance (raw, at `cash_decimals`) granted on account creation.
    pub seed_balance: i128,

    /// Per-asset trigger quantization profiles.
    pub profiles: BTreeMap<AssetId, QuantizationProfile>,
    /// Precision exponent used for assets without a profile.
    pub default_precision_exp: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            AssetId::new("BTC_USDC"),
            QuantizationProfile::new(0, 100_000, 4),
        );
        profiles.insert(
            AssetId::new("ETH_USDC"),
            QuantizationProfile::new(0, 10_000, 6),
        );
        profiles.insert(
            AssetId::new("SOL_USDC"),
            QuantizationProfile::new(0, 1_000, 6),
        );

        Self {
            command_stream: "engine-commands".to_string(),
            price_stream: "price-updates".to_string(),
            response_stream: "engine-responses".to_string(),
            event_stream: "engine-events".to_string(),
            order_group: "engine-orders".to_string(),
            price_group: "engine-price".to_string(),
            consumer_name: "engine-1".to_string(),
            read_count: 10,
            read_block: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(1),
            snapshot_dir: PathBuf::from("snapshots"),
            snapshot_interval: Duration::from_secs(5),
            snapshot_retention: 10,
            cash_asset: AssetId::new("USD"),
            cash_decimals: 4,
            seed_balance: 5_000 * 10_000, // 5000.0000
            profiles,
            default_precision_exp: 6,
        }
    }
}

impl EngineConfig {
    /// Build the configuration from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("ENGINE_SNAPSHOT_DIR") {
            config.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_u64("ENGINE_SNAPSHOT_INTERVAL_SECS") {
            config.snapshot_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("ENGINE_SNAPSHOT_RETENTION") {
            config.snapshot_retention = n as usize;
        }
        if let Ok(name) = env::var("ENGINE_CONSUMER_NAME") {
            config.consumer_name = name;
        }
        if let Some(millis) = env_u64("ENGINE_READ_BLOCK_MILLIS") {
            config.read_block = Duration::from_millis(millis);
        }

        config
    }

    /// Quantization profile for an asset, falling back to the default
    /// precision over an unbounded range.
    pub fn profile(&self, asset: &AssetId) -> QuantizationProfile {
        self.profiles
            .get(asset)
            .copied()
            .unwrap_or(QuantizationProfile::new(
                0,
                i64::MAX,
                self.default_precision_exp,
            ))
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.cash_asset.as_str(), "USD");
        assert_eq!(config.seed_balance, 50_000_000);
        assert_eq!(config.snapshot_retention, 10);
        assert_eq!(config.read_count, 10);
    }

    #[test]
    fn test_known_asset_profile() {
        let config = EngineConfig::default();
        let profile = config.profile(&AssetId::new("BTC_USDC"));
        assert_eq!(profile.precision_exp, 4);
    }

    #[test]
    fn test_unknown_asset_falls_back_to_default_precision() {
        let config = EngineConfig::default();
        let profile = config.profile(&AssetId::new("DOGE_USDC"));
        assert_eq!(profile.precision_exp, config.default_precision_exp);
    }
}
