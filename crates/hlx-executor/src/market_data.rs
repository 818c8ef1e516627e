//! Info-endpoint adapter for the pipeline's read ports.
//!
//! Reference prices are the exchange's mark prices. Account reads also
//! resync the nonce clock when the exchange reports its own time.

use std::sync::Arc;

use hlx_core::{AccountState, ReferencePrice};
use hlx_registry::{InfoClient, RegistryError};
use tracing::warn;

use crate::nonce::NonceManager;
use crate::ports::{AccountStateSource, ReferencePriceSource, SourceError};
use crate::sender::BoxFuture;

pub struct InfoMarketData {
    client: Arc<InfoClient>,
    user: String,
    nonces: Option<Arc<NonceManager>>,
}

impl InfoMarketData {
    /// `user` is the address whose margin and positions are read
    /// (the vault when trading for one).
    pub fn new(client: Arc<InfoClient>, user: impl Into<String>) -> Self {
        Self {
            client,
            user: user.into(),
            nonces: None,
        }
    }

    pub fn with_nonce_sync(mut self, nonces: Arc<NonceManager>) -> Self {
        self.nonces = Some(nonces);
        self
    }

    async fn fetch_reference(&self, coin: &str) -> Result<ReferencePrice, SourceError> {
        let mut prices = self
            .client
            .fetch_reference_prices()
            .await
            .map_err(source_error)?;
        prices
            .remove(coin)
            .ok_or_else(|| SourceError::UnknownCoin(coin.to_string()))
    }

    async fn fetch_account(&self) -> Result<AccountState, SourceError> {
        let state = self
            .client
            .fetch_clearinghouse_state(&self.user)
            .await
            .map_err(source_error)?;

        if let (Some(server_time), Some(nonces)) = (state.time, &self.nonces) {
            if let Err(e) = nonces.sync_with_server(server_time) {
                warn!(error = %e, "Skipping nonce clock sync");
            }
        }

        state.to_account_state().map_err(source_error)
    }
}

fn source_error(e: RegistryError) -> SourceError {
    SourceError::Unavailable(e.to_string())
}

impl ReferencePriceSource for InfoMarketData {
    fn reference_price<'a>(&'a self, coin: &'a str) -> BoxFuture<'a, Result<ReferencePrice, SourceError>> {
        Box::pin(self.fetch_reference(coin))
    }
}

impl AccountStateSource for InfoMarketData {
    fn account_state(&self) -> BoxFuture<'_, Result<AccountState, SourceError>> {
        Box::pin(self.fetch_account())
    }
}
