//! Main application orchestration.
//!
//! Wires the pipeline from configuration and drives decision cycles:
//! - exchange metadata preflight
//! - per-cycle metadata refresh and intent loading
//! - cycle summary and metrics dump
//! - Ctrl-C cancels the in-flight cycle

use crate::config::{AppConfig, MarginMode, OperatingMode};
use crate::cycle::{run_cycle, CycleSummary};
use crate::error::{AppError, AppResult};
use crate::intents::{FileIntentSource, IntentSource};
use alloy::primitives::Address;
use hlx_executor::{
    DryRunSender, DynExchangeSender, ExchangeLeverageGateway, HttpExchangeSender, InfoMarketData,
    KeyManager, LeverageCoordinator, NonceManager, OrderPipeline, OrderSigner, SubmissionExecutor,
};
use hlx_registry::{AssetSpecRegistry, InfoClient};
use hlx_telemetry::Metrics;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn parse_address(field: &str, raw: &str) -> AppResult<Address> {
    Address::from_str(raw).map_err(|e| AppError::Config(format!("{field}: {e}")))
}

/// Main application.
pub struct Application {
    config: AppConfig,
    info: Arc<InfoClient>,
    registry: Arc<AssetSpecRegistry>,
    pipeline: Arc<OrderPipeline>,
    intents: Arc<dyn IntentSource>,
    cancel: CancellationToken,
}

impl Application {
    /// Build every collaborator from `config`. Loads the signing key.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let exchange = &config.exchange;

        let expected_signer = exchange
            .signer_address
            .as_deref()
            .map(|a| parse_address("exchange.signer_address", a))
            .transpose()?;
        let vault = exchange
            .vault_address
            .as_deref()
            .map(|a| parse_address("exchange.vault_address", a))
            .transpose()?;

        let keys = Arc::new(KeyManager::load(&config.key.source(), expected_signer)?);
        let signer_address = keys.address();
        let account = match (&exchange.account_address, vault) {
            (Some(a), _) => parse_address("exchange.account_address", a)?,
            (None, Some(v)) => v,
            (None, None) => signer_address,
        };

        let nonces = Arc::new(NonceManager::with_system_clock());
        let signer = Arc::new(
            OrderSigner::new(keys, nonces.clone(), exchange.is_mainnet)
                .with_vault(vault)
                .with_expiry(exchange.expires_after_ms),
        );

        let sender: DynExchangeSender = match config.mode {
            OperatingMode::Observation => Arc::new(DryRunSender::new()),
            OperatingMode::Trading => Arc::new(HttpExchangeSender::new(
                exchange.exchange_url.clone(),
                exchange.request_timeout(),
            )?),
        };

        let info = Arc::new(InfoClient::new(exchange.info_url.clone(), exchange.request_timeout())?);
        let market_data = Arc::new(
            InfoMarketData::new(info.clone(), account.to_string().to_ascii_lowercase())
                .with_nonce_sync(nonces),
        );

        let registry = Arc::new(AssetSpecRegistry::new(
            config.normalizer.registry.clone(),
            config.assets.clone(),
        ));

        let gateway = ExchangeLeverageGateway::new(
            signer.clone(),
            sender.clone(),
            exchange.margin_mode == MarginMode::Cross,
            config.retry.request_timeout(),
        );
        let leverage = Arc::new(LeverageCoordinator::new(Arc::new(gateway)));
        let submitter = SubmissionExecutor::new(signer, sender, config.retry.clone());

        let pipeline = OrderPipeline::new(
            registry.clone(),
            market_data.clone(),
            market_data,
            leverage,
            submitter,
        )
        .with_normalizer(config.normalizer.pricing.clone())
        .with_margin(config.margin.clone())
        .with_config(config.intents.pipeline_config());

        let intents = Arc::new(FileIntentSource::new(config.cycle.intents_file.clone()));

        info!(
            mode = ?config.mode,
            mainnet = exchange.is_mainnet,
            signer = %signer_address,
            account = %account,
            vault = ?vault,
            "Application initialized"
        );

        Ok(Self {
            config,
            info,
            registry,
            pipeline: Arc::new(pipeline),
            intents,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the intent source (the default reads `cycle.intents_file`).
    pub fn with_intent_source(mut self, intents: Arc<dyn IntentSource>) -> Self {
        self.intents = intents;
        self
    }

    /// Token that stops the application when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load exchange metadata and make sure every configured asset resolved.
    pub async fn run_preflight(&self) -> AppResult<()> {
        let universe = self
            .info
            .fetch_meta()
            .await
            .map_err(|e| AppError::Preflight(format!("Failed to fetch meta: {e}")))?;
        let loaded = self.registry.load_exchange_meta(&universe);

        let missing: Vec<&str> = self
            .config
            .assets
            .iter()
            .map(|a| a.coin.as_str())
            .filter(|c| self.registry.metadata(c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Preflight(format!(
                "Configured assets unknown to the exchange: {}",
                missing.join(", ")
            )));
        }

        info!(loaded, coins = ?self.registry.coins(), "Preflight complete");
        Ok(())
    }

    async fn refresh_metadata(&self) {
        match self.info.fetch_meta().await {
            Ok(universe) => {
                self.registry.load_exchange_meta(&universe);
            }
            Err(e) => warn!(error = %e, "Metadata refresh failed, keeping previous"),
        }
    }

    /// Run one cycle: refresh metadata, load intents, process them.
    pub async fn run_once(&self) -> AppResult<CycleSummary> {
        self.refresh_metadata().await;
        let batch = self.intents.load(&self.config.intents.limits)?;
        info!(intents = batch.len(), "Cycle started");

        let summary = run_cycle(&self.pipeline, batch).await;
        summary.log();
        match Metrics::encode_text() {
            Ok(text) => debug!(metrics = %text, "Metrics snapshot"),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }
        Ok(summary)
    }

    /// Run cycles until cancelled (or once with `cycle.single_cycle`).
    pub async fn run(self) -> AppResult<()> {
        let interval = Duration::from_secs(self.config.cycle.interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        info!(
            interval_secs = interval.as_secs(),
            single_cycle = self.config.cycle.single_cycle,
            "Starting cycle loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => break,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    self.cancel.cancel();
                    break;
                }
            }

            tokio::select! {
                result = self.run_once() => {
                    if let Err(e) = result {
                        error!(error = %e, "Cycle failed");
                    }
                }
                _ = self.cancel.cancelled() => {
                    warn!("Cycle cancelled");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Shutdown signal received, cancelling in-flight cycle");
                    self.cancel.cancel();
                    break;
                }
            }

            if self.config.cycle.single_cycle {
                break;
            }
        }

        info!("Shutting down");
        Ok(())
    }
}
