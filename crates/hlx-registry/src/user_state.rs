//! clearinghouseState wire types.
//!
//! Endpoint: POST /info with `{"type": "clearinghouseState", "user": "<address>"}`.
//! All numeric fields arrive as strings.

use crate::error::{RegistryError, RegistryResult};
use hlx_core::{AccountState, Position, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Margin summary block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarginSummary {
    #[serde(rename = "accountValue")]
    pub account_value: String,
    #[serde(rename = "totalNtlPos")]
    pub total_notional_position: String,
    #[serde(rename = "totalRawUsd", default)]
    pub total_raw_usd: Option<String>,
    #[serde(rename = "totalMarginUsed")]
    pub total_margin_used: String,
}

/// clearinghouseState response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClearinghouseStateResponse {
    #[serde(rename = "marginSummary")]
    pub margin_summary: Option<MarginSummary>,
    #[serde(rename = "crossMarginSummary")]
    pub cross_margin_summary: Option<MarginSummary>,
    /// Collateral free for new margin.
    pub withdrawable: Option<String>,
    #[serde(rename = "assetPositions", default)]
    pub asset_positions: Vec<AssetPositionEntry>,
    /// Server time in milliseconds.
    pub time: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetPositionEntry {
    pub position: AssetPositionData,
    /// "oneWay" for perps.
    #[serde(rename = "type")]
    pub position_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetPositionData {
    pub coin: String,
    /// Signed size: positive long, negative short.
    pub szi: String,
    #[serde(rename = "entryPx")]
    pub entry_px: Option<String>,
    #[serde(rename = "positionValue")]
    pub position_value: Option<String>,
    #[serde(rename = "unrealizedPnl")]
    pub unrealized_pnl: Option<String>,
    pub leverage: Option<LeverageInfo>,
    #[serde(rename = "marginUsed")]
    pub margin_used: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeverageInfo {
    /// "cross" or "isolated".
    #[serde(rename = "type")]
    pub leverage_type: Option<String>,
    pub value: Option<u32>,
}

fn parse_decimal(field: &str, raw: &str) -> RegistryResult<Decimal> {
    raw.parse()
        .map_err(|e| RegistryError::ParseError(format!("{field}={raw:?}: {e}")))
}

fn parse_optional(field: &str, raw: Option<&String>) -> RegistryResult<Option<Decimal>> {
    raw.map(|s| parse_decimal(field, s)).transpose()
}

impl AssetPositionData {
    pub fn to_position(&self) -> RegistryResult<Position> {
        Ok(Position {
            coin: self.coin.clone(),
            size: Size::new(parse_decimal("szi", &self.szi)?),
            entry_price: parse_optional("entryPx", self.entry_px.as_ref())?.map(Price::new),
            leverage: self.leverage.as_ref().and_then(|l| l.value),
            unrealized_pnl: parse_optional("unrealizedPnl", self.unrealized_pnl.as_ref())?
                .unwrap_or_default(),
        })
    }
}

impl ClearinghouseStateResponse {
    /// Convert into the pipeline's account snapshot.
    ///
    /// Available margin is `withdrawable`; a response without it is an error
    /// rather than a zero balance.
    pub fn to_account_state(&self) -> RegistryResult<AccountState> {
        let withdrawable = self
            .withdrawable
            .as_deref()
            .ok_or_else(|| RegistryError::ParseError("withdrawable missing".to_string()))?;
        let available_margin = parse_decimal("withdrawable", withdrawable)?;

        let (account_value, total_margin_used) = match &self.margin_summary {
            Some(m) => (
                parse_decimal("accountValue", &m.account_value)?,
                parse_decimal("totalMarginUsed", &m.total_margin_used)?,
            ),
            None => (Decimal::ZERO, Decimal::ZERO),
        };

        let mut positions = HashMap::new();
        for entry in &self.asset_positions {
            let position = entry.position.to_position()?;
            if !position.is_flat() {
                positions.insert(position.coin.clone(), position);
            }
        }

        Ok(AccountState {
            available_margin,
            account_value,
            total_margin_used,
            positions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"{
        "marginSummary": {"accountValue": "4.50", "totalNtlPos": "10.50",
                          "totalRawUsd": "4.50", "totalMarginUsed": "1.05"},
        "crossMarginSummary": {"accountValue": "4.50", "totalNtlPos": "10.50",
                               "totalRawUsd": "4.50", "totalMarginUsed": "1.05"},
        "withdrawable": "3.45",
        "assetPositions": [
            {"type": "oneWay", "position": {"coin": "ADA", "szi": "16.0", "entryPx": "0.656",
             "positionValue": "10.50", "unrealizedPnl": "0.02",
             "leverage": {"type": "cross", "value": 10}, "marginUsed": "1.05"}},
            {"type": "oneWay", "position": {"coin": "ETH", "szi": "-0.01", "entryPx": null,
             "leverage": {"type": "isolated", "value": 3}}},
            {"type": "oneWay", "position": {"coin": "BTC", "szi": "0.0"}}
        ],
        "time": 1769339470576
    }"#;

    #[test]
    fn test_parse_clearinghouse_state() {
        let state: ClearinghouseStateResponse = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(state.time, Some(1769339470576));
        assert_eq!(state.asset_positions.len(), 3);

        let account = state.to_account_state().unwrap();
        assert_eq!(account.available_margin, dec!(3.45));
        assert_eq!(account.account_value, dec!(4.50));
        assert_eq!(account.total_margin_used, dec!(1.05));
        assert_eq!(account.positions.len(), 2);

        let ada = account.position("ADA").unwrap();
        assert_eq!(ada.size.inner(), dec!(16));
        assert_eq!(ada.leverage, Some(10));
        assert_eq!(ada.entry_price, Some(Price::new(dec!(0.656))));

        let eth = account.position("ETH").unwrap();
        assert!(eth.size.inner() < Decimal::ZERO);
        assert_eq!(eth.unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_missing_withdrawable_is_error() {
        let state: ClearinghouseStateResponse =
            serde_json::from_str(r#"{"assetPositions": []}"#).unwrap();
        assert!(matches!(
            state.to_account_state(),
            Err(RegistryError::ParseError(_))
        ));
    }

    #[test]
    fn test_bad_number_is_error() {
        let state: ClearinghouseStateResponse =
            serde_json::from_str(r#"{"withdrawable": "lots"}"#).unwrap();
        assert!(state.to_account_state().is_err());
    }
}
