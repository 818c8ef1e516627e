//! Per-asset leverage coordination.
//!
//! Leverage is an account-level setting per asset, so it has to be in place
//! before an order relies on it. The coordinator remembers only what the
//! exchange confirmed in the current cycle: state goes to `Unknown` before
//! every update call and to `Set` only after confirmation, so a failed or
//! cancelled call never leaves a stale confirmation behind.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hlx_telemetry::Metrics;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::sender::{BoxFuture, DynExchangeSender, ExchangeRequest, ExchangeResponse};
use crate::signer::OrderSigner;

/// Leverage known for one asset in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeverageState {
    #[default]
    Unknown,
    Set(u32),
}

/// Performs the actual leverage update.
pub trait LeverageGateway: Send + Sync {
    /// Resolves to `Err(reason)` when the exchange did not confirm.
    fn update_leverage(
        &self,
        asset: u32,
        coin: &str,
        leverage: u32,
    ) -> BoxFuture<'_, Result<(), String>>;

    /// Whether leverage is set in cross margin mode.
    fn is_cross(&self) -> bool {
        true
    }
}

/// Signs and posts `updateLeverage` actions.
pub struct ExchangeLeverageGateway {
    signer: Arc<OrderSigner>,
    sender: DynExchangeSender,
    is_cross: bool,
    request_timeout: Duration,
}

impl ExchangeLeverageGateway {
    pub fn new(
        signer: Arc<OrderSigner>,
        sender: DynExchangeSender,
        is_cross: bool,
        request_timeout: Duration,
    ) -> Self {
        Self {
            signer,
            sender,
            is_cross,
            request_timeout,
        }
    }

    async fn update(&self, asset: u32, coin: &str, leverage: u32) -> Result<(), String> {
        let signed = self
            .signer
            .sign_update_leverage(asset, self.is_cross, leverage)
            .await
            .map_err(|e| e.to_string())?;
        let request = ExchangeRequest::from_signed(&signed);

        let reply = tokio::time::timeout(self.request_timeout, self.sender.post(request))
            .await
            .map_err(|_| "leverage update timed out".to_string())?
            .map_err(|e| e.to_string())?;

        match reply {
            ExchangeResponse::Ok(_) => {
                debug!(coin, leverage, nonce = signed.nonce, "Leverage update confirmed");
                Ok(())
            }
            ExchangeResponse::Err(message) => Err(message),
        }
    }
}

impl LeverageGateway for ExchangeLeverageGateway {
    fn update_leverage(
        &self,
        asset: u32,
        coin: &str,
        leverage: u32,
    ) -> BoxFuture<'_, Result<(), String>> {
        let coin = coin.to_string();
        Box::pin(async move { self.update(asset, &coin, leverage).await })
    }

    fn is_cross(&self) -> bool {
        self.is_cross
    }
}

pub struct LeverageCoordinator {
    gateway: Arc<dyn LeverageGateway>,
    states: DashMap<String, Arc<Mutex<LeverageState>>>,
}

impl LeverageCoordinator {
    pub fn new(gateway: Arc<dyn LeverageGateway>) -> Self {
        Self {
            gateway,
            states: DashMap::new(),
        }
    }

    fn slot(&self, coin: &str) -> Arc<Mutex<LeverageState>> {
        self.states
            .entry(coin.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LeverageState::Unknown)))
            .clone()
    }

    /// Make sure `coin` is at `leverage`, calling the exchange only when the
    /// confirmed value differs. Calls for the same asset are serialized.
    pub async fn ensure_leverage(&self, asset: u32, coin: &str, leverage: u32) -> ExecutorResult<()> {
        let slot = self.slot(coin);
        let mut state = slot.lock().await;

        if *state == LeverageState::Set(leverage) {
            Metrics::leverage_ensure(coin, "cached");
            return Ok(());
        }

        *state = LeverageState::Unknown;
        match self.gateway.update_leverage(asset, coin, leverage).await {
            Ok(()) => {
                *state = LeverageState::Set(leverage);
                Metrics::leverage_ensure(coin, "updated");
                info!(coin, leverage, "Leverage set");
                Ok(())
            }
            Err(reason) => {
                Metrics::leverage_ensure(coin, "failed");
                warn!(coin, leverage, reason = %reason, "Leverage update failed");
                Err(ExecutorError::LeverageSetup {
                    coin: coin.to_string(),
                    leverage,
                    reason,
                })
            }
        }
    }

    pub async fn state(&self, coin: &str) -> LeverageState {
        let slot = self.states.get(coin).map(|s| s.clone());
        match slot {
            Some(slot) => *slot.lock().await,
            None => LeverageState::Unknown,
        }
    }

    pub fn is_cross(&self) -> bool {
        self.gateway.is_cross()
    }

    /// Forget all confirmations; called at the start of every cycle.
    pub fn begin_cycle(&self) {
        self.states.clear();
    }
}
