//! Asset identification and per-asset exchange constraints.
//!
//! An `AssetSpec` captures everything the exchange enforces numerically for
//! one perpetual: price tick, size precision, leverage cap and the minimum
//! order size that satisfies the minimum notional at the current price.

use crate::{Price, Size};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum significant figures accepted in a non-integer price.
pub const MAX_SIG_FIGS: u32 = 5;

/// Perp prices may carry at most `MAX_PERP_DECIMALS - sz_decimals` decimals.
pub const MAX_PERP_DECIMALS: u32 = 6;

/// Exchange asset index (position in the perp universe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u32);

impl AssetId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved constraints for one asset at one reference price.
///
/// `min_order_size` is only meaningful together with `reference_price`:
/// it was derived from it and must be recomputed when the price moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Coin symbol (e.g., "BTC").
    pub coin: String,

    /// Exchange asset index used on the wire.
    pub asset: AssetId,

    /// Smallest price increment.
    pub tick_size: Price,

    /// Size precision (szDecimals).
    pub sz_decimals: u32,

    /// Smallest size whose notional meets the exchange minimum.
    pub min_order_size: Size,

    /// Minimum order value in quote currency.
    pub min_notional: Decimal,

    /// Leverage cap for this asset.
    pub max_leverage: u32,

    /// Significant figure limit for prices.
    pub max_sig_figs: u32,

    /// Price the minimum size was computed against.
    pub reference_price: Price,
}

impl AssetSpec {
    /// Decimal places allowed in a price for this asset.
    pub fn max_price_decimals(&self) -> u32 {
        MAX_PERP_DECIMALS.saturating_sub(self.sz_decimals)
    }

    /// Smallest size at `sz_decimals` precision with `size * price >= min_notional`.
    pub fn min_size_for(min_notional: Decimal, price: Price, sz_decimals: u32) -> Size {
        if !price.is_positive() {
            return Size::ZERO;
        }
        let step = Decimal::new(1, sz_decimals);
        let Some(raw) = min_notional.checked_div(price.inner()) else {
            return Size::new(Decimal::MAX);
        };
        let mut size = Size::new(raw).ceil_to_decimals(sz_decimals);
        // Division is exact to 28 digits; nudge up if the tail was lost.
        while size.notional(price) < min_notional {
            size = Size::new(size.inner() + step);
        }
        size
    }

    /// Align a price to everything the exchange checks.
    ///
    /// Nearest tick first, then the significant-figure and decimal limits
    /// (both truncating), then floor back onto the tick grid. Applying it
    /// to an already aligned price returns the same price. `None` when the
    /// price is too large to express in ticks.
    pub fn align_price(&self, price: Price) -> Option<Price> {
        let nearest = price.round_to_tick(self.tick_size)?;
        let sig = truncate_to_sig_figs(nearest.inner(), self.max_sig_figs);
        let dec = truncate_to_decimals(sig, self.max_price_decimals());
        Price::new(dec).floor_to_tick(self.tick_size)
    }

    /// Truncate a size to this asset's precision.
    pub fn align_size(&self, size: Size) -> Size {
        size.floor_to_decimals(self.sz_decimals)
    }

    /// Wire representation of a price (no trailing zeros).
    pub fn format_price(&self, price: Price) -> String {
        format_decimal(price.inner())
    }

    /// Wire representation of a size (no trailing zeros).
    pub fn format_size(&self, size: Size) -> String {
        format_decimal(size.inner())
    }
}

/// Canonical decimal string: trailing zeros stripped, "0" for zero.
pub fn format_decimal(value: Decimal) -> String {
    if value.is_zero() {
        return "0".to_string();
    }
    value.normalize().to_string()
}

/// Truncate to N significant figures. Integers are always allowed whole.
fn truncate_to_sig_figs(value: Decimal, max_sig_figs: u32) -> Decimal {
    if value.is_zero() || value.fract().is_zero() {
        return value;
    }
    let abs = value.abs();
    let int_digits = if abs >= Decimal::ONE {
        abs.trunc().to_string().len() as u32
    } else {
        0
    };
    let decimals = if int_digits > 0 {
        max_sig_figs.saturating_sub(int_digits)
    } else {
        // Leading zeros after the point do not count as significant.
        let mut leading = 0u32;
        let mut scaled = abs;
        while scaled < Decimal::ONE / Decimal::TEN && leading < 27 {
            scaled *= Decimal::TEN;
            leading += 1;
        }
        leading + max_sig_figs
    };
    truncate_to_decimals(value, decimals)
}

fn truncate_to_decimals(value: Decimal, decimals: u32) -> Decimal {
    value
        .round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
        .normalize()
}
