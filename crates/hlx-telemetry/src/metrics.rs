//! Prometheus metrics for the order pipeline.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A failure means a
//! duplicate metric name, which is a programming error that should crash
//! at first use rather than silently drop data.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, TextEncoder,
};

/// Intents received, by action.
pub static INTENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("hlx_intents_total", "Trade intents processed", &["coin", "action"])
        .unwrap()
});

/// Intents stopped before submission, by error kind.
pub static INTENT_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlx_intent_rejected_total",
        "Intents rejected before reaching the exchange",
        &["coin", "kind"]
    )
    .unwrap()
});

/// Terminal submission outcomes.
pub static SUBMISSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlx_submissions_total",
        "Order submissions by terminal outcome",
        &["coin", "outcome"]
    )
    .unwrap()
});

/// Transient failures that led to a retry.
pub static SUBMISSION_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlx_submission_retries_total",
        "Submission attempts that failed transiently",
        &["coin", "cause"]
    )
    .unwrap()
});

/// Attempts needed per terminal submission.
pub static SUBMISSION_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hlx_submission_attempts",
        "Attempts per submission",
        &["outcome"],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0]
    )
    .unwrap()
});

/// Leverage coordinator activity.
pub static LEVERAGE_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlx_leverage_updates_total",
        "Leverage ensure calls by result (cached/updated/failed)",
        &["coin", "result"]
    )
    .unwrap()
});

/// Nonces handed out.
pub static NONCES_ISSUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("hlx_nonces_issued_total", "Nonces issued by the signer").unwrap()
});

/// Last measured offset between exchange and local clock.
pub static SERVER_TIME_OFFSET_MS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "hlx_server_time_offset_ms",
        "Exchange time minus local time in milliseconds"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn intent_received(coin: &str, action: &str) {
        INTENTS_TOTAL.with_label_values(&[coin, action]).inc();
    }

    pub fn intent_rejected(coin: &str, kind: &str) {
        INTENT_REJECTED_TOTAL.with_label_values(&[coin, kind]).inc();
    }

    /// Record a terminal submission outcome and the attempts it took.
    pub fn submission_finished(coin: &str, outcome: &str, attempts: u32) {
        SUBMISSIONS_TOTAL.with_label_values(&[coin, outcome]).inc();
        SUBMISSION_ATTEMPTS
            .with_label_values(&[outcome])
            .observe(f64::from(attempts));
    }

    pub fn submission_retry(coin: &str, cause: &str) {
        SUBMISSION_RETRIES_TOTAL.with_label_values(&[coin, cause]).inc();
    }

    pub fn leverage_ensure(coin: &str, result: &str) {
        LEVERAGE_UPDATES_TOTAL.with_label_values(&[coin, result]).inc();
    }

    pub fn nonce_issued() {
        NONCES_ISSUED_TOTAL.inc();
    }

    pub fn server_time_offset(offset_ms: i64) {
        SERVER_TIME_OFFSET_MS.set(offset_ms as f64);
    }

    /// Render the default registry in Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
