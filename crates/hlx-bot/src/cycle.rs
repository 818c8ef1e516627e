//! One decision cycle.
//!
//! Intents are grouped by coin. Coins run concurrently; intents for the
//! same coin run in arrival order.

use std::collections::BTreeMap;

use futures_util::future::join_all;
use hlx_core::TradeIntent;
use hlx_executor::{IntentOutcome, OrderPipeline, SubmissionResult};
use tracing::{info, warn};

use crate::intents::IntentBatch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedOrder {
    pub coin: String,
    pub cloid: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedIntent {
    /// `None` when the record never became an intent.
    pub coin: Option<String>,
    pub reason: String,
}

/// What a cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub executed: Vec<ExecutedOrder>,
    pub held: Vec<String>,
    pub failed: Vec<FailedIntent>,
}

impl CycleSummary {
    pub fn total(&self) -> usize {
        self.executed.len() + self.held.len() + self.failed.len()
    }

    fn record(&mut self, intent: &TradeIntent, outcome: Result<IntentOutcome, String>) {
        match outcome {
            Ok(IntentOutcome::Held) => self.held.push(intent.coin.clone()),
            Ok(IntentOutcome::Submitted(report)) => match report.result {
                SubmissionResult::Accepted(_) => self.executed.push(ExecutedOrder {
                    coin: report.coin,
                    cloid: report.cloid.to_string(),
                    attempts: report.attempts,
                }),
                other => self.failed.push(FailedIntent {
                    coin: Some(intent.coin.clone()),
                    reason: format!("{other:?}"),
                }),
            },
            Err(reason) => self.failed.push(FailedIntent {
                coin: Some(intent.coin.clone()),
                reason,
            }),
        }
    }

    pub fn log(&self) {
        info!(
            executed = self.executed.len(),
            held = self.held.len(),
            failed = self.failed.len(),
            "Cycle summary"
        );
        for order in &self.executed {
            info!(coin = %order.coin, cloid = %order.cloid, attempts = order.attempts, "Executed");
        }
        for failure in &self.failed {
            warn!(
                coin = failure.coin.as_deref().unwrap_or("-"),
                reason = %failure.reason,
                "Failed"
            );
        }
    }
}

/// Run every intent in `batch` through `pipeline`.
pub async fn run_cycle(pipeline: &OrderPipeline, batch: IntentBatch) -> CycleSummary {
    pipeline.begin_cycle();

    let mut summary = CycleSummary::default();
    let mut by_coin: BTreeMap<String, Vec<TradeIntent>> = BTreeMap::new();
    for entry in batch {
        match entry {
            Ok(intent) => by_coin.entry(intent.coin.clone()).or_default().push(intent),
            Err(e) => summary.failed.push(FailedIntent {
                coin: None,
                reason: e.to_string(),
            }),
        }
    }

    let per_coin = by_coin.into_values().map(|intents| async move {
        let mut results = Vec::with_capacity(intents.len());
        for intent in intents {
            let outcome = pipeline
                .process_intent(&intent)
                .await
                .map_err(|e| e.to_string());
            results.push((intent, outcome));
        }
        results
    });

    for (intent, outcome) in join_all(per_coin).await.into_iter().flatten() {
        summary.record(&intent, outcome);
    }
    summary
}
