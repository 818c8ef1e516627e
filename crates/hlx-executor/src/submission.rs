//! Order submission with classification and bounded retries.
//!
//! Each order moves through `Pending → Attempting(n) → {Accepted, Rejected,
//! Exhausted, Aborted}`. Every attempt re-runs the pre-submit checks, signs the same
//! logical order (same client order id) with a fresh nonce, and posts it
//! once. Only transient failures loop.

use std::sync::Arc;
use std::time::Duration;

use hlx_core::{ClientOrderId, NormalizedOrder};
use hlx_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::sender::{
    BoxFuture, DynExchangeSender, ExchangeRequest, ExchangeResponse, OrderStatus, TransportError,
};
use crate::signer::{OrderSigner, SignedOrder};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Applied to every network call; expiry counts as a transient failure.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Exponential backoff after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)` capped at `max_delay_ms`, plus up to half a
    /// base delay of jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let jitter_span = self.base_delay_ms / 2;
        let jitter = if jitter_span == 0 {
            0
        } else {
            rand_jitter() % (jitter_span + 1)
        };
        Duration::from_millis(delay + jitter)
    }
}

fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0)
}

/// Where a submission stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Attempting(u32),
    Accepted,
    Rejected,
    Exhausted,
    /// Stopped by a local error after something was posted.
    Aborted,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Rejected | Self::Exhausted | Self::Aborted
        )
    }
}

/// What the exchange said when it accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillInfo {
    Resting {
        oid: u64,
    },
    Filled {
        oid: u64,
        total_sz: String,
        avg_px: String,
    },
    Acknowledged,
    /// The exchange reported the client order id as already used after an
    /// attempt whose outcome was unknown: that earlier attempt landed.
    DuplicateOfEarlierAttempt {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientCause {
    Transport(TransportError),
    /// Exchange `err` that a fresh attempt can clear (nonce window).
    Exchange(String),
    AccountUnavailable(String),
}

impl TransientCause {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.label(),
            Self::Exchange(_) => "exchange",
            Self::AccountUnavailable(_) => "account_unavailable",
        }
    }

    /// Whether the order may have reached the book.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_ambiguous())
    }
}

impl std::fmt::Display for TransientCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Exchange(m) => write!(f, "exchange: {m}"),
            Self::AccountUnavailable(m) => write!(f, "account unavailable: {m}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Terminal exchange verdict, verbatim.
    Exchange(String),
    RetriesExhausted { attempts: u32, last: TransientCause },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Accepted(FillInfo),
    Rejected(RejectReason),
    /// Never terminal; feeds the retry loop.
    TransientFailure(TransientCause),
}

impl SubmissionResult {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::Rejected(RejectReason::Exchange(_)) => "rejected",
            Self::Rejected(RejectReason::RetriesExhausted { .. }) => "exhausted",
            Self::TransientFailure(_) => "transient",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Terminal outcome plus the audit trail of how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub coin: String,
    pub cloid: ClientOrderId,
    pub result: SubmissionResult,
    pub attempts: u32,
    /// One entry per signed attempt, in order.
    pub nonces: Vec<u64>,
    pub transitions: Vec<SubmissionState>,
    /// An attempt ended in a way that may have left the order on the book.
    pub possibly_live: bool,
}

impl SubmissionReport {
    pub fn final_state(&self) -> SubmissionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SubmissionState::Pending)
    }
}

/// Runs before every attempt. An error that is retryable consumes the
/// attempt as a transient failure; any other error ends the submission.
pub trait PreSubmitCheck: Send + Sync {
    fn before_attempt<'a>(
        &'a self,
        order: &'a NormalizedOrder,
        attempt: u32,
    ) -> BoxFuture<'a, ExecutorResult<()>>;
}

/// Check that always passes.
pub struct NoChecks;

impl PreSubmitCheck for NoChecks {
    fn before_attempt<'a>(
        &'a self,
        _order: &'a NormalizedOrder,
        _attempt: u32,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

fn is_duplicate_cloid(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("duplicate") && lower.contains("cloid")
}

/// Map one attempt's outcome onto a `SubmissionResult`.
///
/// `earlier_ambiguous` is true when a previous attempt for the same client
/// order id may have reached the exchange.
pub fn classify(
    outcome: Result<ExchangeResponse, TransportError>,
    earlier_ambiguous: bool,
) -> SubmissionResult {
    let response = match outcome {
        Ok(r) => r,
        Err(e) if e.is_transient() => {
            return SubmissionResult::TransientFailure(TransientCause::Transport(e))
        }
        Err(e) => return SubmissionResult::Rejected(RejectReason::Exchange(e.to_string())),
    };

    match &response {
        ExchangeResponse::Err(message) if message.to_ascii_lowercase().contains("nonce") => {
            SubmissionResult::TransientFailure(TransientCause::Exchange(message.clone()))
        }
        ExchangeResponse::Err(message) => {
            SubmissionResult::Rejected(RejectReason::Exchange(message.clone()))
        }
        ExchangeResponse::Ok(_) => match response.statuses().into_iter().next() {
            Some(OrderStatus::Resting { oid }) => SubmissionResult::Accepted(FillInfo::Resting { oid }),
            Some(OrderStatus::Filled {
                oid,
                total_sz,
                avg_px,
            }) => SubmissionResult::Accepted(FillInfo::Filled {
                oid,
                total_sz,
                avg_px,
            }),
            Some(OrderStatus::Error(message)) if earlier_ambiguous && is_duplicate_cloid(&message) => {
                SubmissionResult::Accepted(FillInfo::DuplicateOfEarlierAttempt { message })
            }
            Some(OrderStatus::Error(message)) => {
                SubmissionResult::Rejected(RejectReason::Exchange(message))
            }
            None => SubmissionResult::Accepted(FillInfo::Acknowledged),
        },
    }
}

pub struct SubmissionExecutor {
    signer: Arc<OrderSigner>,
    sender: DynExchangeSender,
    policy: RetryPolicy,
}

impl SubmissionExecutor {
    pub fn new(signer: Arc<OrderSigner>, sender: DynExchangeSender, policy: RetryPolicy) -> Self {
        Self {
            signer,
            sender,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn signer(&self) -> &Arc<OrderSigner> {
        &self.signer
    }

    /// Post one signed order under the per-call timeout and classify it.
    pub async fn send_once(&self, signed: &SignedOrder, earlier_ambiguous: bool) -> SubmissionResult {
        let request = ExchangeRequest::from_signed(&signed.signed);
        let outcome = match tokio::time::timeout(self.policy.request_timeout(), self.sender.post(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout),
        };
        classify(outcome, earlier_ambiguous)
    }

    /// Drive `order` to a terminal state.
    ///
    /// Errors from signing or from a non-retryable pre-submit check are
    /// returned as `Err`; everything the exchange decided is in the report.
    /// Once an attempt has been posted such an error comes back as
    /// `SubmissionAborted` carrying the partial report.
    pub async fn submit(
        &self,
        order: &NormalizedOrder,
        checks: &dyn PreSubmitCheck,
    ) -> ExecutorResult<SubmissionReport> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut report = SubmissionReport {
            coin: order.coin.clone(),
            cloid: order.cloid.clone(),
            result: SubmissionResult::TransientFailure(TransientCause::Exchange(
                "not attempted".to_string(),
            )),
            attempts: 0,
            nonces: Vec::new(),
            transitions: vec![SubmissionState::Pending],
            possibly_live: false,
        };

        for attempt in 1..=max_attempts {
            report.attempts = attempt;
            report.transitions.push(SubmissionState::Attempting(attempt));

            let result = match checks.before_attempt(order, attempt).await {
                Ok(()) => {
                    let signed = match self.signer.sign_order(order).await {
                        Ok(signed) => signed,
                        Err(e) => return Err(self.abort(report, e.into())),
                    };
                    report.nonces.push(signed.nonce());
                    debug!(
                        coin = %order.coin,
                        cloid = %order.cloid,
                        attempt,
                        nonce = signed.nonce(),
                        "Submitting order"
                    );
                    self.send_once(&signed, report.possibly_live).await
                }
                Err(e) if e.is_retryable() => {
                    SubmissionResult::TransientFailure(TransientCause::AccountUnavailable(e.to_string()))
                }
                Err(e) => return Err(self.abort(report, e)),
            };

            match result {
                SubmissionResult::TransientFailure(cause) => {
                    report.possibly_live |= cause.is_ambiguous();
                    Metrics::submission_retry(&order.coin, cause.label());
                    warn!(
                        coin = %order.coin,
                        cloid = %order.cloid,
                        attempt,
                        max_attempts,
                        cause = %cause,
                        "Transient submission failure"
                    );
                    report.result = SubmissionResult::TransientFailure(cause);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
                terminal => {
                    report.transitions.push(if terminal.is_accepted() {
                        SubmissionState::Accepted
                    } else {
                        SubmissionState::Rejected
                    });
                    report.result = terminal;
                    return Ok(self.finish(report));
                }
            }
        }

        let last = match std::mem::replace(
            &mut report.result,
            SubmissionResult::Accepted(FillInfo::Acknowledged),
        ) {
            SubmissionResult::TransientFailure(cause) => cause,
            other => TransientCause::Exchange(format!("{other:?}")),
        };
        report.result = SubmissionResult::Rejected(RejectReason::RetriesExhausted {
            attempts: report.attempts,
            last,
        });
        report.transitions.push(SubmissionState::Exhausted);
        Ok(self.finish(report))
    }

    /// Bare `cause` before anything was posted, otherwise the cause wrapped
    /// together with the partial report.
    fn abort(&self, mut report: SubmissionReport, cause: ExecutorError) -> ExecutorError {
        if report.nonces.is_empty() {
            return cause;
        }
        report.transitions.push(SubmissionState::Aborted);
        Metrics::submission_finished(&report.coin, "aborted", report.attempts);
        error!(
            coin = %report.coin,
            cloid = %report.cloid,
            attempts = report.attempts,
            possibly_live = report.possibly_live,
            error = %cause,
            "Submission aborted after posting"
        );
        ExecutorError::SubmissionAborted {
            report: Box::new(report),
            cause: Box::new(cause),
        }
    }

    fn finish(&self, report: SubmissionReport) -> SubmissionReport {
        Metrics::submission_finished(&report.coin, report.result.label(), report.attempts);
        match &report.result {
            SubmissionResult::Accepted(fill) => info!(
                coin = %report.coin,
                cloid = %report.cloid,
                attempts = report.attempts,
                fill = ?fill,
                "Order accepted"
            ),
            other => warn!(
                coin = %report.coin,
                cloid = %report.cloid,
                attempts = report.attempts,
                result = ?other,
                "Order not accepted"
            ),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 500,
            ..Default::default()
        };
        let ms = |a| policy.backoff(a).as_millis() as u64;
        assert!((100..=150).contains(&ms(1)));
        assert!((200..=250).contains(&ms(2)));
        assert!((400..=450).contains(&ms(3)));
        assert!((500..=550).contains(&ms(4)));
        assert!((500..=550).contains(&ms(30)));
    }

    #[test]
    fn test_classify_accepts() {
        assert_eq!(
            classify(Ok(ExchangeResponse::resting(9)), false),
            SubmissionResult::Accepted(FillInfo::Resting { oid: 9 })
        );
        assert!(matches!(
            classify(Ok(ExchangeResponse::filled(9, "16", "0.656")), false),
            SubmissionResult::Accepted(FillInfo::Filled { .. })
        ));
    }

    #[test]
    fn test_classify_terminal_rejections_keep_reason() {
        let msg = "Order price cannot be more than 95% away from the reference price";
        assert_eq!(
            classify(Ok(ExchangeResponse::order_error(msg)), false),
            SubmissionResult::Rejected(RejectReason::Exchange(msg.to_string()))
        );
        assert_eq!(
            classify(Ok(ExchangeResponse::err("User or API Wallet does not exist.")), false),
            SubmissionResult::Rejected(RejectReason::Exchange(
                "User or API Wallet does not exist.".to_string()
            ))
        );
        assert!(matches!(
            classify(
                Err(TransportError::Client {
                    status: 422,
                    body: "bad".into()
                }),
                false
            ),
            SubmissionResult::Rejected(_)
        ));
    }

    #[test]
    fn test_classify_transients() {
        for e in [
            TransportError::Timeout,
            TransportError::Network("reset".into()),
            TransportError::RateLimited("slow down".into()),
            TransportError::Server {
                status: 503,
                body: String::new(),
            },
        ] {
            assert!(matches!(
                classify(Err(e), false),
                SubmissionResult::TransientFailure(TransientCause::Transport(_))
            ));
        }
        assert!(matches!(
            classify(Ok(ExchangeResponse::err("Invalid nonce: duplicate nonce")), false),
            SubmissionResult::TransientFailure(TransientCause::Exchange(_))
        ));
    }

    #[test]
    fn test_duplicate_cloid_after_ambiguous_attempt_is_accept() {
        let reply = || Ok(ExchangeResponse::order_error("Duplicate cloid for order"));
        assert!(matches!(
            classify(reply(), true),
            SubmissionResult::Accepted(FillInfo::DuplicateOfEarlierAttempt { .. })
        ));
        assert!(matches!(classify(reply(), false), SubmissionResult::Rejected(_)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SubmissionState::Pending.is_terminal());
        assert!(!SubmissionState::Attempting(3).is_terminal());
        assert!(SubmissionState::Exhausted.is_terminal());
    }
}
