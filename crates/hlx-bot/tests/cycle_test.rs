//! Cycle driver against an in-memory pipeline.

use std::sync::Arc;
use std::time::Duration;

use hlx_bot::{run_cycle, IntentSource, StaticIntentSource};
use hlx_core::{AccountState, IntentLimits, Price};
use hlx_executor::{
    ExchangeLeverageGateway, ExchangeResponse, FixedClock, KeyManager, LeverageCoordinator,
    MockExchangeSender, NonceManager, OrderPipeline, OrderSigner, RetryPolicy, StaticAccountSource,
    StaticPriceSource, SubmissionExecutor,
};
use hlx_registry::{AssetSpecRegistry, RegistryConfig, StaticAssetConfig};
use rust_decimal_macros::dec;

const TEST_PRIVATE_KEY: [u8; 32] = [
    0xac, 0x09, 0x74, 0xbe, 0xc3, 0x9a, 0x17, 0xe3, 0x6b, 0xa4, 0xa6, 0xb4, 0xd2, 0x38, 0xff, 0x94,
    0x4b, 0xac, 0xb4, 0x78, 0xcb, 0xed, 0x5e, 0xfc, 0xae, 0x78, 0x4d, 0x7b, 0xf4, 0xf2, 0xff, 0x80,
];

fn asset(coin: &str, index: u32, sz_decimals: u32) -> StaticAssetConfig {
    StaticAssetConfig {
        coin: coin.to_string(),
        tick_size: None,
        sz_decimals: Some(sz_decimals),
        max_leverage: Some(10),
        asset_index: Some(index),
    }
}

fn pipeline(sender: Arc<MockExchangeSender>) -> OrderPipeline {
    let keys = Arc::new(KeyManager::from_bytes(&TEST_PRIVATE_KEY, None).unwrap());
    let nonces = Arc::new(NonceManager::new(Arc::new(FixedClock::new(1_769_339_470_576))));
    let signer = Arc::new(OrderSigner::new(keys, nonces, false));

    let registry = Arc::new(AssetSpecRegistry::new(
        RegistryConfig::default(),
        vec![asset("ADA", 65, 0), asset("ETH", 1, 4), asset("SOL", 5, 2)],
    ));
    let prices = Arc::new(StaticPriceSource::new());
    prices.set_price("ADA", Price::new(dec!(0.656)));
    prices.set_price("ETH", Price::new(dec!(3200)));
    prices.set_price("SOL", Price::new(dec!(150)));
    let accounts = Arc::new(StaticAccountSource::new(AccountState {
        available_margin: dec!(500),
        ..Default::default()
    }));

    let gateway = ExchangeLeverageGateway::new(signer.clone(), sender.clone(), true, Duration::from_secs(1));
    let leverage = Arc::new(LeverageCoordinator::new(Arc::new(gateway)));
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 1,
        request_timeout_ms: 1_000,
    };
    let submitter = SubmissionExecutor::new(signer, sender, policy);
    OrderPipeline::new(registry, prices, accounts, leverage, submitter)
}

const INTENTS: &str = r#"Model output:
[
  {"coin": "ADA", "action": "buy", "size": 1, "leverage": 5, "confidence": 0.8, "reasoning": "breakout", "limit_price": 0.656},
  {"coin": "ETH", "action": "hold", "confidence": 0.4, "reasoning": "chop"},
  {"coin": "SOL", "action": "sell", "size": 0.1, "leverage": 3, "confidence": 0.7, "reasoning": "fade"},
  {"coin": "BTC", "action": "increase_position", "size": 1, "leverage": 3, "confidence": 0.9},
  {"coin": "ADA", "action": "close_position", "confidence": 0.9}
]"#;

#[tokio::test]
async fn summary_counts_every_record() {
    let sender = Arc::new(MockExchangeSender::new());
    let pipeline = pipeline(sender.clone());
    let batch = StaticIntentSource::new(INTENTS)
        .load(&IntentLimits::default())
        .unwrap();

    let summary = run_cycle(&pipeline, batch).await;

    assert_eq!(summary.total(), 5);
    let executed: Vec<&str> = summary.executed.iter().map(|e| e.coin.as_str()).collect();
    assert!(executed.contains(&"ADA"));
    assert!(executed.contains(&"SOL"));
    assert_eq!(summary.held, vec!["ETH".to_string()]);

    // Unknown action never becomes an intent; close without a position fails.
    assert_eq!(summary.failed.len(), 2);
    assert!(summary.failed.iter().any(|f| f.coin.is_none()));
    assert!(summary
        .failed
        .iter()
        .any(|f| f.coin.as_deref() == Some("ADA") && f.reason.contains("no open position")));

    assert_eq!(sender.order_requests().len(), 2);
}

#[tokio::test]
async fn exchange_rejection_is_reported_as_failure() {
    let sender = Arc::new(MockExchangeSender::new());
    sender.push_reply(Ok(ExchangeResponse::order_error(
        "Order has invalid size.",
    )));
    let pipeline = pipeline(sender.clone());
    let batch = StaticIntentSource::new(
        r#"[{"coin": "ADA", "action": "buy", "size": 16, "leverage": 5, "confidence": 0.8, "limit_price": "0.656"}]"#,
    )
    .load(&IntentLimits::default())
    .unwrap();

    let summary = run_cycle(&pipeline, batch).await;
    assert!(summary.executed.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].reason.contains("Order has invalid size."));
}

#[tokio::test]
async fn each_cycle_reconfirms_leverage() {
    let sender = Arc::new(MockExchangeSender::new());
    let pipeline = pipeline(sender.clone());
    let source = StaticIntentSource::new(
        r#"[{"coin": "ADA", "action": "buy", "size": 16, "leverage": 5, "confidence": 0.8}]"#,
    );

    for _ in 0..2 {
        let batch = source.load(&IntentLimits::default()).unwrap();
        let summary = run_cycle(&pipeline, batch).await;
        assert_eq!(summary.executed.len(), 1);
    }
    assert_eq!(sender.leverage_requests().len(), 2);
}
