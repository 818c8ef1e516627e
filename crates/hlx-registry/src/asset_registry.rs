//! Per-asset constraint registry.
//!
//! Static metadata (from config) and exchange metadata (from `meta`) are
//! merged into one `AssetMetadata` per coin. `resolve` turns that plus a
//! live reference price into an `AssetSpec` whose minimum size satisfies the
//! exchange minimum notional at that price.

use crate::error::{RegistryError, RegistryResult};
use dashmap::DashMap;
use hlx_core::{AssetId, AssetSpec, Price, ReferencePrice, MAX_PERP_DECIMALS, MAX_SIG_FIGS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Universe entry from the `meta` info request.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPerpSpec {
    pub name: String,
    #[serde(rename = "szDecimals")]
    pub sz_decimals: u32,
    #[serde(rename = "maxLeverage")]
    pub max_leverage: u32,
    #[serde(rename = "onlyIsolated", default)]
    pub only_isolated: bool,
    #[serde(rename = "isDelisted", default)]
    pub is_delisted: bool,
}

/// Operator-supplied asset settings. Any field left out is filled from
/// exchange metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAssetConfig {
    pub coin: String,
    #[serde(default)]
    pub tick_size: Option<Decimal>,
    #[serde(default)]
    pub sz_decimals: Option<u32>,
    #[serde(default)]
    pub max_leverage: Option<u32>,
    #[serde(default)]
    pub asset_index: Option<u32>,
}

/// Registry tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Exchange minimum order value in quote currency.
    #[serde(default = "default_min_notional")]
    pub min_notional: Decimal,
    /// Reference price move (percent) that forces a recompute within a cycle.
    #[serde(default = "default_drift_threshold_pct")]
    pub drift_threshold_pct: Decimal,
}

fn default_min_notional() -> Decimal {
    Decimal::TEN
}

fn default_drift_threshold_pct() -> Decimal {
    Decimal::ONE
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_notional: default_min_notional(),
            drift_threshold_pct: default_drift_threshold_pct(),
        }
    }
}

/// Price-independent facts about one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    pub coin: String,
    pub asset: AssetId,
    pub tick_size: Price,
    pub sz_decimals: u32,
    pub max_leverage: u32,
    pub only_isolated: bool,
}

impl AssetMetadata {
    /// Finest tick the price-decimal rule allows for this precision.
    fn default_tick(sz_decimals: u32) -> Price {
        Price::new(Decimal::new(1, MAX_PERP_DECIMALS.saturating_sub(sz_decimals)))
    }
}

/// Asset spec registry.
pub struct AssetSpecRegistry {
    config: RegistryConfig,
    statics: HashMap<String, StaticAssetConfig>,
    metadata: DashMap<String, AssetMetadata>,
    /// Specs resolved during the current cycle.
    resolved: DashMap<String, AssetSpec>,
}

impl AssetSpecRegistry {
    pub fn new(config: RegistryConfig, statics: Vec<StaticAssetConfig>) -> Self {
        let statics: HashMap<_, _> = statics
            .into_iter()
            .map(|s| (s.coin.to_ascii_uppercase(), s))
            .collect();

        let registry = Self {
            config,
            statics,
            metadata: DashMap::new(),
            resolved: DashMap::new(),
        };
        // Fully specified static assets are usable without exchange metadata.
        for s in registry.statics.values() {
            if let (Some(idx), Some(sz), Some(lev)) = (s.asset_index, s.sz_decimals, s.max_leverage) {
                registry.metadata.insert(
                    s.coin.to_ascii_uppercase(),
                    AssetMetadata {
                        coin: s.coin.to_ascii_uppercase(),
                        asset: AssetId::new(idx),
                        tick_size: s
                            .tick_size
                            .map(Price::new)
                            .unwrap_or_else(|| AssetMetadata::default_tick(sz)),
                        sz_decimals: sz,
                        max_leverage: lev,
                        only_isolated: false,
                    },
                );
            }
        }
        registry
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Merge the exchange universe. Universe position is the asset id.
    ///
    /// When static assets are configured, only those coins are registered.
    /// Static values take precedence over exchange values.
    pub fn load_exchange_meta(&self, universe: &[RawPerpSpec]) -> usize {
        let mut loaded = 0;
        for (idx, raw) in universe.iter().enumerate() {
            let coin = raw.name.to_ascii_uppercase();
            if raw.is_delisted {
                if self.metadata.remove(&coin).is_some() {
                    warn!(coin = %coin, "Asset delisted, removed from registry");
                }
                continue;
            }
            let overrides = match self.statics.get(&coin) {
                Some(s) => s.clone(),
                None if self.statics.is_empty() => StaticAssetConfig::default(),
                None => continue,
            };
            let sz_decimals = overrides.sz_decimals.unwrap_or(raw.sz_decimals);
            let meta = AssetMetadata {
                coin: coin.clone(),
                asset: AssetId::new(overrides.asset_index.unwrap_or(idx as u32)),
                tick_size: overrides
                    .tick_size
                    .map(Price::new)
                    .unwrap_or_else(|| AssetMetadata::default_tick(sz_decimals)),
                sz_decimals,
                max_leverage: overrides.max_leverage.unwrap_or(raw.max_leverage),
                only_isolated: raw.only_isolated,
            };
            if let Some(prev) = self.metadata.insert(coin.clone(), meta.clone()) {
                if prev != meta {
                    info!(coin = %coin, ?prev, new = ?meta, "Asset metadata changed");
                    self.resolved.remove(&coin);
                }
            }
            loaded += 1;
        }
        info!(loaded, universe = universe.len(), "Loaded exchange metadata");
        loaded
    }

    /// Drop every resolved spec so the next `resolve` recomputes from the
    /// fresh reference price.
    pub fn begin_cycle(&self) {
        self.resolved.clear();
    }

    pub fn metadata(&self, coin: &str) -> Option<AssetMetadata> {
        self.metadata
            .get(&coin.to_ascii_uppercase())
            .map(|m| m.clone())
    }

    pub fn coins(&self) -> Vec<String> {
        let mut coins: Vec<String> = self.metadata.iter().map(|e| e.key().clone()).collect();
        coins.sort();
        coins
    }

    /// Resolve the spec for `coin` at `reference`.
    ///
    /// A spec resolved earlier in the cycle is reused only while the price
    /// stays within the drift threshold and its minimum size still clears
    /// the minimum notional at the new price.
    pub fn resolve(&self, coin: &str, reference: &ReferencePrice) -> RegistryResult<AssetSpec> {
        let key = coin.to_ascii_uppercase();
        let meta = self
            .metadata(&key)
            .ok_or_else(|| RegistryError::UnsupportedAsset(key.clone()))?;

        let price = reference.price;
        if !price.is_positive() {
            return Err(RegistryError::InvalidReferencePrice {
                coin: key,
                price: price.to_string(),
            });
        }

        if let Some(cached) = self.resolved.get(&key) {
            let drift = price.deviation_pct(cached.reference_price);
            let still_valid = drift.is_some_and(|d| d <= self.config.drift_threshold_pct)
                && cached.min_order_size.notional(price) >= self.config.min_notional;
            if still_valid {
                return Ok(cached.clone());
            }
            debug!(coin = %key, ?drift, "Reference price drifted, recomputing spec");
        }

        let min_order_size = AssetSpec::min_size_for(self.config.min_notional, price, meta.sz_decimals);
        let spec = AssetSpec {
            coin: meta.coin,
            asset: meta.asset,
            tick_size: meta.tick_size,
            sz_decimals: meta.sz_decimals,
            min_order_size,
            min_notional: self.config.min_notional,
            max_leverage: meta.max_leverage,
            max_sig_figs: MAX_SIG_FIGS,
            reference_price: price,
        };
        debug!(
            coin = %key,
            reference = %price,
            min_size = %min_order_size,
            tick = %spec.tick_size,
            "Resolved asset spec"
        );
        self.resolved.insert(key, spec.clone());
        Ok(spec)
    }
}
