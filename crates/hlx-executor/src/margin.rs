//! Pre-submission margin check.
//!
//! Read-then-act against a fresh account snapshot. Under concurrent
//! submissions two orders may both pass against the same balance; the
//! exchange's own margin check is authoritative and its rejection is
//! terminal.

use hlx_core::{AccountState, NormalizedOrder};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExecutorError, ExecutorResult};

/// What to do when account state cannot be read before an attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountUnavailablePolicy {
    /// Surface `AccountUnavailable` immediately.
    #[default]
    FailFast,
    /// Count the attempt as a transient failure; the retry budget bounds it.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginConfig {
    /// Extra margin required on top of `size * price / leverage`, percent.
    #[serde(default = "default_safety_buffer_pct")]
    pub safety_buffer_pct: Decimal,
    #[serde(default)]
    pub on_account_unavailable: AccountUnavailablePolicy,
}

fn default_safety_buffer_pct() -> Decimal {
    dec!(5)
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            safety_buffer_pct: default_safety_buffer_pct(),
            on_account_unavailable: AccountUnavailablePolicy::default(),
        }
    }
}

impl MarginConfig {
    /// Buffer must be strictly positive.
    pub fn validate(&self) -> Result<(), String> {
        if self.safety_buffer_pct <= Decimal::ZERO {
            return Err(format!(
                "margin.safety_buffer_pct must be > 0, got {}",
                self.safety_buffer_pct
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarginValidator {
    config: MarginConfig,
}

impl MarginValidator {
    pub fn new(config: MarginConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarginConfig {
        &self.config
    }

    /// Margin needed for `order` including the safety buffer.
    pub fn required_with_buffer(&self, order: &NormalizedOrder) -> Decimal {
        order.required_margin * (Decimal::ONE + self.config.safety_buffer_pct / Decimal::ONE_HUNDRED)
    }

    /// Check `order` against `account`. Reduce-only orders free margin and
    /// always pass.
    pub fn validate(&self, order: &NormalizedOrder, account: &AccountState) -> ExecutorResult<()> {
        if order.reduce_only {
            return Ok(());
        }

        let required = self.required_with_buffer(order);
        if required > account.available_margin {
            warn!(
                coin = %order.coin,
                required = %required,
                available = %account.available_margin,
                "Insufficient margin"
            );
            return Err(ExecutorError::InsufficientMargin {
                coin: order.coin.clone(),
                required,
                available: account.available_margin,
            });
        }

        debug!(
            coin = %order.coin,
            required = %required,
            available = %account.available_margin,
            "Margin check passed"
        );
        Ok(())
    }

    /// Error to surface when the account snapshot could not be fetched.
    pub fn unavailable(&self, reason: impl Into<String>) -> ExecutorError {
        ExecutorError::AccountUnavailable {
            reason: reason.into(),
            retryable: self.config.on_account_unavailable == AccountUnavailablePolicy::Retry,
        }
    }
}
