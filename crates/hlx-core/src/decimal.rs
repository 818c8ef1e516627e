//! Precision-safe decimal types for order math.
//!
//! Every quantity that reaches the wire passes through `rust_decimal`;
//! binary floating point never touches a price or a size.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Align to the nearest multiple of `tick_size` (half away from zero).
    ///
    /// `None` when the tick count does not fit in a `Decimal`.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Option<Self> {
        if tick_size.is_zero() {
            return Some(*self);
        }
        let ticks = self
            .0
            .checked_div(tick_size.0)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Some(Self(ticks.checked_mul(tick_size.0)?.normalize()))
    }

    /// Align down to a multiple of `tick_size`. `None` on overflow.
    #[inline]
    pub fn floor_to_tick(&self, tick_size: Price) -> Option<Self> {
        if tick_size.is_zero() {
            return Some(*self);
        }
        let ticks = self.0.checked_div(tick_size.0)?.floor();
        Some(Self(ticks.checked_mul(tick_size.0)?.normalize()))
    }

    /// True when the price is an exact multiple of `tick_size`.
    #[inline]
    pub fn is_tick_aligned(&self, tick_size: Price) -> bool {
        if tick_size.is_zero() {
            return true;
        }
        self.0.checked_rem(tick_size.0).is_some_and(|r| r.is_zero())
    }

    /// Absolute deviation from `reference`, as a percentage of `reference`.
    ///
    /// `None` for a zero reference or when the ratio overflows.
    #[inline]
    pub fn deviation_pct(&self, reference: Price) -> Option<Decimal> {
        if reference.is_zero() {
            return None;
        }
        let pct = self
            .0
            .checked_sub(reference.0)?
            .checked_div(reference.0)?
            .checked_mul(Decimal::ONE_HUNDRED)?;
        Some(pct.abs())
    }

    /// Move the price by `bps` basis points (positive = up).
    #[inline]
    pub fn offset_bps(&self, bps: Decimal) -> Self {
        Self(self.0.saturating_mul(Decimal::ONE + bps / Decimal::from(10_000)))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Order or position size in asset units.
///
/// Position sizes are signed (negative = short); order sizes never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Truncate toward zero at `decimals` places.
    #[inline]
    pub fn floor_to_decimals(&self, decimals: u32) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
                .normalize(),
        )
    }

    /// Round away from zero at `decimals` places.
    #[inline]
    pub fn ceil_to_decimals(&self, decimals: u32) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(decimals, RoundingStrategy::AwayFromZero)
                .normalize(),
        )
    }

    /// Notional value: size * price, saturating at `Decimal::MAX`.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0.saturating_mul(price.0)
    }

    /// Notional value, `None` when it does not fit in a `Decimal`.
    #[inline]
    pub fn checked_notional(&self, price: Price) -> Option<Decimal> {
        self.0.checked_mul(price.0)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Size {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}
