//! Read-side collaborators of the pipeline.
//!
//! Both are fetched fresh for every use; neither is cached across
//! submissions because each feeds a check the exchange will repeat.

use std::collections::HashMap;

use chrono::Utc;
use hlx_core::{AccountState, Price, ReferencePrice};
use parking_lot::RwLock;
use thiserror::Error;

use crate::sender::BoxFuture;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The source does not know this coin at all.
    #[error("Unknown coin: {0}")]
    UnknownCoin(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Exchange reference price for a coin.
pub trait ReferencePriceSource: Send + Sync {
    fn reference_price<'a>(&'a self, coin: &'a str) -> BoxFuture<'a, Result<ReferencePrice, SourceError>>;
}

/// Account collateral and positions for the trading address.
pub trait AccountStateSource: Send + Sync {
    fn account_state(&self) -> BoxFuture<'_, Result<AccountState, SourceError>>;
}

/// In-memory prices. `set_price` stamps the value with the current time.
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    prices: RwLock<HashMap<String, ReferencePrice>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, coin: &str, price: Price) {
        self.insert(ReferencePrice::new(coin, price, Utc::now()));
    }

    pub fn insert(&self, reference: ReferencePrice) {
        self.prices.write().insert(reference.coin.clone(), reference);
    }
}

impl ReferencePriceSource for StaticPriceSource {
    fn reference_price<'a>(&'a self, coin: &'a str) -> BoxFuture<'a, Result<ReferencePrice, SourceError>> {
        let found = self
            .prices
            .read()
            .get(coin)
            .cloned()
            .ok_or_else(|| SourceError::UnknownCoin(coin.to_string()));
        Box::pin(async move { found })
    }
}

/// In-memory account snapshot. `set_unavailable` makes reads fail until the
/// next `set_state`.
#[derive(Debug)]
pub struct StaticAccountSource {
    state: RwLock<Result<AccountState, SourceError>>,
}

impl Default for StaticAccountSource {
    fn default() -> Self {
        Self::new(AccountState::default())
    }
}

impl StaticAccountSource {
    pub fn new(state: AccountState) -> Self {
        Self {
            state: RwLock::new(Ok(state)),
        }
    }

    pub fn set_state(&self, state: AccountState) {
        *self.state.write() = Ok(state);
    }

    pub fn set_unavailable(&self, reason: &str) {
        *self.state.write() = Err(SourceError::Unavailable(reason.to_string()));
    }
}

impl AccountStateSource for StaticAccountSource {
    fn account_state(&self) -> BoxFuture<'_, Result<AccountState, SourceError>> {
        let snapshot = self.state.read().clone();
        Box::pin(async move { snapshot })
    }
}
