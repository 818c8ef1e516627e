//! Pipeline inputs and outputs: reference prices, account snapshots and
//! the normalized order handed to the signer.

use crate::{AssetId, ClientOrderId, OrderSide, Price, Size, TimeInForce};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exchange reference (mark) price for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePrice {
    pub coin: String,
    pub price: Price,
    /// When the source produced the value.
    pub timestamp: DateTime<Utc>,
}

impl ReferencePrice {
    pub fn new(coin: impl Into<String>, price: Price, timestamp: DateTime<Utc>) -> Self {
        Self {
            coin: coin.into(),
            price,
            timestamp,
        }
    }

    /// Age relative to `now` in milliseconds (zero if stamped in the future).
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_milliseconds().max(0)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_ms: i64) -> bool {
        self.age_ms(now) > max_age_ms
    }
}

/// Open position on one asset. `size` is signed: negative is short.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub coin: String,
    pub size: Size,
    pub entry_price: Option<Price>,
    pub leverage: Option<u32>,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    /// Side that reduces this position to zero.
    pub fn closing_side(&self) -> Option<OrderSide> {
        if self.size.is_zero() {
            None
        } else if self.size.is_positive() {
            Some(OrderSide::Sell)
        } else {
            Some(OrderSide::Buy)
        }
    }
}

/// Snapshot of collateral and open positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Collateral available for new margin (exchange `withdrawable`).
    pub available_margin: Decimal,
    pub account_value: Decimal,
    pub total_margin_used: Decimal,
    pub positions: HashMap<String, Position>,
}

impl AccountState {
    pub fn position(&self, coin: &str) -> Option<&Position> {
        self.positions.get(coin).filter(|p| !p.is_flat())
    }
}

/// Quantized, constraint-satisfying order skeleton.
///
/// `price` is tick-aligned and within the deviation band, `size` is at the
/// asset's size precision and (unless reduce-only) at or above the minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub coin: String,
    pub asset: AssetId,
    pub side: OrderSide,
    pub size: Size,
    pub price: Price,
    pub leverage: u32,
    /// `size * price / leverage`, before any safety buffer.
    pub required_margin: Decimal,
    pub reduce_only: bool,
    pub tif: TimeInForce,
    pub cloid: ClientOrderId,
}

impl NormalizedOrder {
    pub fn notional(&self) -> Decimal {
        self.size.notional(self.price)
    }

    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn position(size: Decimal) -> Position {
        Position {
            coin: "ETH".to_string(),
            size: Size::new(size),
            entry_price: None,
            leverage: None,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_reference_price_staleness() {
        let now = Utc::now();
        let rp = ReferencePrice::new("BTC", Price::new(dec!(65000)), now - Duration::seconds(3));
        assert!(!rp.is_stale(now, 5_000));
        assert!(rp.is_stale(now, 2_000));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let now = Utc::now();
        let rp = ReferencePrice::new("BTC", Price::new(dec!(1)), now + Duration::seconds(1));
        assert_eq!(rp.age_ms(now), 0);
    }

    #[test]
    fn test_closing_side() {
        assert_eq!(position(dec!(0.5)).closing_side(), Some(OrderSide::Sell));
        assert_eq!(position(dec!(-2)).closing_side(), Some(OrderSide::Buy));
        assert_eq!(position(dec!(0)).closing_side(), None);
    }

    #[test]
    fn test_flat_positions_are_hidden() {
        let mut state = AccountState::default();
        state.positions.insert("ETH".to_string(), position(dec!(0)));
        assert!(state.position("ETH").is_none());
        state.positions.insert("ETH".to_string(), position(dec!(1)));
        assert!(state.position("ETH").is_some());
    }
}
