//! Intent → exchange-valid order.
//!
//! Pure functions of (intent, asset spec, reference price): no I/O, no
//! clocks. The price is aligned to everything the exchange checks and must
//! land inside the deviation band around the exchange's own reference; a
//! price outside the band is rejected, never clamped.

use hlx_core::{
    AssetSpec, ClientOrderId, NormalizedOrder, OrderSide, Position, Price, ReferencePrice, Size,
    TimeInForce, TradeAction, TradeIntent,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Largest allowed |price - reference| / reference, percent.
    #[serde(default = "default_max_deviation_pct")]
    pub max_deviation_pct: Decimal,
    /// Aggressiveness of the derived price for intents without a limit.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: Decimal,
    #[serde(default)]
    pub tif: TimeInForce,
}

fn default_max_deviation_pct() -> Decimal {
    dec!(95)
}

fn default_slippage_bps() -> Decimal {
    dec!(50)
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_deviation_pct: default_max_deviation_pct(),
            slippage_bps: default_slippage_bps(),
            tif: TimeInForce::default(),
        }
    }
}

type NormalizeResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone, Default)]
pub struct SizeAndPriceNormalizer {
    config: NormalizerConfig,
}

impl SizeAndPriceNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize a buy or sell intent.
    pub fn normalize(
        &self,
        intent: &TradeIntent,
        spec: &AssetSpec,
        reference: &ReferencePrice,
        cloid: ClientOrderId,
    ) -> NormalizeResult<NormalizedOrder> {
        let side = intent.action.opening_side().ok_or_else(|| {
            ValidationError::InvalidIntent(format!(
                "{}: {} does not open an order",
                intent.coin, intent.action
            ))
        })?;
        check_asset(&intent.coin, spec, reference)?;
        check_leverage(intent, spec)?;

        let price = self.order_price(intent.limit_price, side, spec, reference)?;
        let size = opening_size(intent, spec, price)?;

        let order = NormalizedOrder {
            coin: spec.coin.clone(),
            asset: spec.asset,
            side,
            size,
            price,
            leverage: intent.leverage,
            required_margin: required_margin(&spec.coin, size, price, intent.leverage)?,
            reduce_only: false,
            tif: self.config.tif,
            cloid,
        };
        debug!(
            coin = %order.coin,
            side = %order.side,
            requested = %intent.requested_size,
            size = %order.size,
            price = %order.price,
            reference = %reference.price,
            required_margin = %order.required_margin,
            "Normalized order"
        );
        Ok(order)
    }

    /// Normalize a close-position intent against the open `position`.
    ///
    /// Full size, opposite side, reduce-only. No minimum-size floor and no
    /// margin requirement.
    pub fn normalize_close(
        &self,
        intent: &TradeIntent,
        spec: &AssetSpec,
        reference: &ReferencePrice,
        position: Option<&Position>,
        cloid: ClientOrderId,
    ) -> NormalizeResult<NormalizedOrder> {
        if intent.action != TradeAction::ClosePosition {
            return Err(ValidationError::InvalidIntent(format!(
                "{}: {} is not a close",
                intent.coin, intent.action
            )));
        }
        check_asset(&intent.coin, spec, reference)?;

        let position = position.filter(|p| !p.is_flat());
        let (position, side) = match position.and_then(|p| p.closing_side().map(|s| (p, s))) {
            Some(found) => found,
            None => return Err(ValidationError::NoPositionToClose(intent.coin.clone())),
        };

        let size = position.size.abs().floor_to_decimals(spec.sz_decimals);
        if !size.is_positive() {
            return Err(ValidationError::SizeBelowMinimum {
                coin: intent.coin.clone(),
                size: position.size.abs().inner(),
                min: Decimal::new(1, spec.sz_decimals),
            });
        }

        let price = self.order_price(intent.limit_price, side, spec, reference)?;
        let order = NormalizedOrder {
            coin: spec.coin.clone(),
            asset: spec.asset,
            side,
            size,
            price,
            leverage: position.leverage.unwrap_or(intent.leverage),
            required_margin: Decimal::ZERO,
            reduce_only: true,
            tif: self.config.tif,
            cloid,
        };
        debug!(
            coin = %order.coin,
            side = %order.side,
            size = %order.size,
            price = %order.price,
            "Normalized close"
        );
        Ok(order)
    }

    /// Run an already normalized order through the same rules. A valid
    /// order comes back unchanged.
    pub fn renormalize(
        &self,
        order: &NormalizedOrder,
        spec: &AssetSpec,
        reference: &ReferencePrice,
    ) -> NormalizeResult<NormalizedOrder> {
        let price = self.order_price(Some(order.price), order.side, spec, reference)?;
        let size = if order.reduce_only {
            order.size.floor_to_decimals(spec.sz_decimals)
        } else {
            floor_with_minimum(&order.coin, order.size, spec, price)?
        };
        let required_margin = if order.reduce_only {
            Decimal::ZERO
        } else {
            required_margin(&order.coin, size, price, order.leverage.max(1))?
        };
        Ok(NormalizedOrder {
            size,
            price,
            required_margin,
            ..order.clone()
        })
    }

    /// Explicit limit or reference moved by slippage, then aligned and
    /// band-checked.
    fn order_price(
        &self,
        limit: Option<Price>,
        side: OrderSide,
        spec: &AssetSpec,
        reference: &ReferencePrice,
    ) -> NormalizeResult<Price> {
        let raw = match limit {
            Some(p) => p,
            None => {
                let bps = if side.is_buy() {
                    self.config.slippage_bps
                } else {
                    -self.config.slippage_bps
                };
                reference.price.offset_bps(bps)
            }
        };
        let price = spec.align_price(raw).ok_or_else(|| {
            ValidationError::InvalidIntent(format!(
                "{}: price {raw} cannot be placed on tick {}",
                spec.coin, spec.tick_size
            ))
        })?;

        if reference.price.is_zero() {
            return Err(ValidationError::InvalidAsset(format!(
                "{}: zero reference price",
                spec.coin
            )));
        }
        // Only an overflowing ratio leaves no deviation here; treat it as unbounded.
        let deviation = price.deviation_pct(reference.price).unwrap_or(Decimal::MAX);
        if deviation > self.config.max_deviation_pct || !price.is_positive() {
            return Err(ValidationError::PriceOutOfBand {
                coin: spec.coin.clone(),
                price: price.inner(),
                reference: reference.price.inner(),
                deviation_pct: deviation,
                max_pct: self.config.max_deviation_pct,
            });
        }
        Ok(price)
    }
}

fn check_asset(coin: &str, spec: &AssetSpec, reference: &ReferencePrice) -> NormalizeResult<()> {
    if !spec.coin.eq_ignore_ascii_case(coin) || !reference.coin.eq_ignore_ascii_case(coin) {
        return Err(ValidationError::InvalidAsset(format!(
            "{coin}: spec is for {}, reference for {}",
            spec.coin, reference.coin
        )));
    }
    if !spec.tick_size.is_positive() {
        return Err(ValidationError::InvalidAsset(format!(
            "{coin}: non-positive tick size {}",
            spec.tick_size
        )));
    }
    Ok(())
}

fn check_leverage(intent: &TradeIntent, spec: &AssetSpec) -> NormalizeResult<()> {
    if intent.leverage == 0 {
        return Err(ValidationError::InvalidIntent(format!(
            "{}: zero leverage",
            intent.coin
        )));
    }
    if intent.leverage > spec.max_leverage {
        return Err(ValidationError::LeverageAboveCap {
            coin: intent.coin.clone(),
            requested: intent.leverage,
            cap: spec.max_leverage,
        });
    }
    Ok(())
}

/// Notional over leverage, rejected when the notional does not fit.
fn required_margin(coin: &str, size: Size, price: Price, leverage: u32) -> NormalizeResult<Decimal> {
    let notional = size.checked_notional(price).ok_or_else(|| {
        ValidationError::InvalidIntent(format!("{coin}: notional of {size} @ {price} overflows"))
    })?;
    Ok(notional / Decimal::from(leverage))
}

/// `max(requested, minimum)` floored to size precision.
fn opening_size(intent: &TradeIntent, spec: &AssetSpec, price: Price) -> NormalizeResult<Size> {
    floor_with_minimum(&intent.coin, intent.requested_size, spec, price)
}

fn floor_with_minimum(
    coin: &str,
    requested: Size,
    spec: &AssetSpec,
    price: Price,
) -> NormalizeResult<Size> {
    // The spec minimum was derived at the reference; the order price may be
    // lower, so the notional floor is re-applied at the order price.
    let at_price = AssetSpec::min_size_for(spec.min_notional, price, spec.sz_decimals);
    let minimum = if at_price.inner() > spec.min_order_size.inner() {
        at_price
    } else {
        spec.min_order_size
    };
    let floored = if requested.inner() > minimum.inner() {
        requested
    } else {
        minimum
    }
    .floor_to_decimals(spec.sz_decimals);

    if !floored.is_positive() || floored.inner() < minimum.inner() {
        error!(
            coin,
            requested = %requested,
            minimum = %minimum,
            floored = %floored,
            "Size below minimum after flooring"
        );
        return Err(ValidationError::SizeBelowMinimum {
            coin: coin.to_string(),
            size: floored.inner(),
            min: minimum.inner(),
        });
    }
    Ok(floored)
}
