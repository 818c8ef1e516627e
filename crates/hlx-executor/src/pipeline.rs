//! Intent → normalized → signed → submitted.
//!
//! `process_intent` is the single entry point. Work for one asset is
//! serialized by a per-asset lock; different assets proceed concurrently
//! and only share the nonce counter and the sender.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use hlx_core::{ClientOrderId, IntentLimits, NormalizedOrder, TradeAction, TradeIntent};
use hlx_registry::AssetSpecRegistry;
use hlx_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult, ValidationError};
use crate::leverage::LeverageCoordinator;
use crate::margin::{MarginConfig, MarginValidator};
use crate::normalizer::{NormalizerConfig, SizeAndPriceNormalizer};
use crate::ports::{AccountStateSource, ReferencePriceSource, SourceError};
use crate::sender::BoxFuture;
use crate::submission::{PreSubmitCheck, SubmissionExecutor, SubmissionReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Reference prices older than this are refused.
    #[serde(default = "default_max_reference_age_ms")]
    pub max_reference_age_ms: i64,
    #[serde(default)]
    pub intent_limits: IntentLimits,
}

fn default_max_reference_age_ms() -> i64 {
    10_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_reference_age_ms: default_max_reference_age_ms(),
            intent_limits: IntentLimits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentOutcome {
    /// `hold`: nothing was read, signed or sent.
    Held,
    Submitted(SubmissionReport),
}

impl IntentOutcome {
    pub fn report(&self) -> Option<&SubmissionReport> {
        match self {
            Self::Held => None,
            Self::Submitted(report) => Some(report),
        }
    }
}

pub struct OrderPipeline {
    registry: Arc<AssetSpecRegistry>,
    prices: Arc<dyn ReferencePriceSource>,
    accounts: Arc<dyn AccountStateSource>,
    normalizer: SizeAndPriceNormalizer,
    margin: MarginValidator,
    leverage: Arc<LeverageCoordinator>,
    submitter: SubmissionExecutor,
    config: PipelineConfig,
    asset_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl OrderPipeline {
    pub fn new(
        registry: Arc<AssetSpecRegistry>,
        prices: Arc<dyn ReferencePriceSource>,
        accounts: Arc<dyn AccountStateSource>,
        leverage: Arc<LeverageCoordinator>,
        submitter: SubmissionExecutor,
    ) -> Self {
        Self {
            registry,
            prices,
            accounts,
            normalizer: SizeAndPriceNormalizer::default(),
            margin: MarginValidator::default(),
            leverage,
            submitter,
            config: PipelineConfig::default(),
            asset_locks: DashMap::new(),
        }
    }

    pub fn with_normalizer(mut self, config: NormalizerConfig) -> Self {
        self.normalizer = SizeAndPriceNormalizer::new(config);
        self
    }

    pub fn with_margin(mut self, config: MarginConfig) -> Self {
        self.margin = MarginValidator::new(config);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<AssetSpecRegistry> {
        &self.registry
    }

    pub fn leverage(&self) -> &Arc<LeverageCoordinator> {
        &self.leverage
    }

    /// Start a decision cycle: resolved specs and leverage confirmations
    /// from the previous cycle are dropped.
    pub fn begin_cycle(&self) {
        self.registry.begin_cycle();
        self.leverage.begin_cycle();
        debug!("Pipeline cycle started");
    }

    fn asset_lock(&self, coin: &str) -> Arc<Mutex<()>> {
        self.asset_locks
            .entry(coin.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one intent to a terminal outcome.
    pub async fn process_intent(&self, intent: &TradeIntent) -> ExecutorResult<IntentOutcome> {
        Metrics::intent_received(&intent.coin, intent.action.as_str());
        if intent.action == TradeAction::Hold {
            debug!(coin = %intent.coin, "Hold, nothing to do");
            return Ok(IntentOutcome::Held);
        }

        let result = self.run(intent).await;
        if let Err(e) = &result {
            Metrics::intent_rejected(&intent.coin, e.kind());
            warn!(coin = %intent.coin, action = %intent.action, error = %e, "Intent not submitted");
        }
        result.map(IntentOutcome::Submitted)
    }

    async fn run(&self, intent: &TradeIntent) -> ExecutorResult<SubmissionReport> {
        intent
            .check_bounds(&self.config.intent_limits)
            .map_err(ValidationError::from)?;

        let lock = self.asset_lock(&intent.coin);
        let _guard = lock.lock().await;

        let reference = self
            .prices
            .reference_price(&intent.coin)
            .await
            .map_err(|e| match e {
                SourceError::UnknownCoin(c) => ValidationError::UnsupportedAsset(c).into(),
                SourceError::Unavailable(reason) => ExecutorError::MarketData {
                    coin: intent.coin.clone(),
                    reason,
                },
            })?;
        let age_ms = reference.age_ms(Utc::now());
        if age_ms > self.config.max_reference_age_ms {
            return Err(ValidationError::StaleReferencePrice {
                coin: intent.coin.clone(),
                age_ms,
                max_age_ms: self.config.max_reference_age_ms,
            }
            .into());
        }

        let spec = self
            .registry
            .resolve(&intent.coin, &reference)
            .map_err(|e| ExecutorError::from_registry(&intent.coin, e))?;

        let cloid = ClientOrderId::new();
        let order = if intent.action == TradeAction::ClosePosition {
            let account = self
                .accounts
                .account_state()
                .await
                .map_err(|e| self.margin.unavailable(e.to_string()))?;
            self.normalizer
                .normalize_close(intent, &spec, &reference, account.position(&spec.coin), cloid)?
        } else {
            self.check_margin_mode(&spec.coin)?;
            self.normalizer.normalize(intent, &spec, &reference, cloid)?
        };

        info!(
            coin = %order.coin,
            side = %order.side,
            size = %order.size,
            price = %order.price,
            leverage = order.leverage,
            reduce_only = order.reduce_only,
            cloid = %order.cloid,
            confidence = %intent.confidence,
            rationale = %intent.rationale,
            "Submitting intent"
        );
        self.submitter.submit(&order, self).await
    }

    /// Opening in cross mode on an isolated-only asset would fail at the
    /// leverage update; refuse before anything is signed.
    fn check_margin_mode(&self, coin: &str) -> ExecutorResult<()> {
        let only_isolated = self
            .registry
            .metadata(coin)
            .is_some_and(|m| m.only_isolated);
        if only_isolated && self.leverage.is_cross() {
            return Err(ValidationError::IsolatedOnly(coin.to_string()).into());
        }
        Ok(())
    }

    async fn check_before_attempt(&self, order: &NormalizedOrder) -> ExecutorResult<()> {
        // Closing frees margin and keeps the position's existing leverage.
        if order.reduce_only {
            return Ok(());
        }

        let account = self
            .accounts
            .account_state()
            .await
            .map_err(|e| self.margin.unavailable(e.to_string()))?;
        self.margin.validate(order, &account)?;

        self.leverage
            .ensure_leverage(order.asset.index(), &order.coin, order.leverage)
            .await
    }
}

impl PreSubmitCheck for OrderPipeline {
    fn before_attempt<'a>(
        &'a self,
        order: &'a NormalizedOrder,
        _attempt: u32,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(self.check_before_attempt(order))
    }
}
