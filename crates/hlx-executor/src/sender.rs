//! Transport for signed actions.
//!
//! `ExchangeSender` separates signing from delivery so the submission state
//! machine can be driven against the real endpoint, a dry-run logger, or a
//! scripted mock.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::signer::{Action, ActionSignature, SignedAction};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// POST /exchange body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRequest {
    pub action: Action,
    pub nonce: u64,
    pub signature: ActionSignature,
    #[serde(rename = "vaultAddress")]
    pub vault_address: Option<String>,
    #[serde(rename = "expiresAfter", skip_serializing_if = "Option::is_none")]
    pub expires_after: Option<u64>,
}

impl ExchangeRequest {
    pub fn from_signed(signed: &SignedAction) -> Self {
        Self {
            action: signed.action.clone(),
            nonce: signed.nonce,
            signature: signed.signature.clone(),
            vault_address: signed
                .vault_address
                .map(|a| format!("0x{}", hex::encode(a.as_slice()))),
            expires_after: signed.expires_after,
        }
    }

    pub fn is_order(&self) -> bool {
        matches!(self.action, Action::Order(_))
    }

    /// Client order id of the first order, if this is an order action.
    pub fn cloid(&self) -> Option<&str> {
        match &self.action {
            Action::Order(o) => o.orders.first().and_then(|w| w.cloid.as_deref()),
            Action::UpdateLeverage(_) => None,
        }
    }
}

/// Exchange reply: `{"status":"ok","response":{...}}` or
/// `{"status":"err","response":"message"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "response", rename_all = "lowercase")]
pub enum ExchangeResponse {
    Ok(ResponseDetails),
    Err(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDetails {
    /// "order" or "default".
    #[serde(rename = "type")]
    pub response_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// One entry of the `statuses` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Resting {
        oid: u64,
    },
    Filled {
        oid: u64,
        total_sz: String,
        avg_px: String,
    },
    Error(String),
}

impl ExchangeResponse {
    pub fn resting(oid: u64) -> Self {
        Self::order_statuses(vec![json!({"resting": {"oid": oid}})])
    }

    pub fn filled(oid: u64, total_sz: &str, avg_px: &str) -> Self {
        Self::order_statuses(vec![
            json!({"filled": {"totalSz": total_sz, "avgPx": avg_px, "oid": oid}}),
        ])
    }

    pub fn order_error(message: &str) -> Self {
        Self::order_statuses(vec![json!({"error": message})])
    }

    /// Plain acknowledgement, as returned for leverage updates.
    pub fn acknowledged() -> Self {
        Self::Ok(ResponseDetails {
            response_type: "default".to_string(),
            data: Value::Null,
        })
    }

    pub fn err(message: &str) -> Self {
        Self::Err(message.to_string())
    }

    fn order_statuses(statuses: Vec<Value>) -> Self {
        Self::Ok(ResponseDetails {
            response_type: "order".to_string(),
            data: json!({ "statuses": statuses }),
        })
    }

    /// Parse `data.statuses`. Unknown entries are logged and skipped.
    pub fn statuses(&self) -> Vec<OrderStatus> {
        let Self::Ok(details) = self else {
            return Vec::new();
        };
        let Some(Value::Array(entries)) = details.data.get("statuses") else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(oid) = entry
                .get("resting")
                .and_then(|r| r.get("oid"))
                .and_then(Value::as_u64)
            {
                out.push(OrderStatus::Resting { oid });
            } else if let Some(filled) = entry.get("filled") {
                let text = |key: &str| {
                    filled
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or("0")
                        .to_string()
                };
                out.push(OrderStatus::Filled {
                    oid: filled.get("oid").and_then(Value::as_u64).unwrap_or(0),
                    total_sz: text("totalSz"),
                    avg_px: text("avgPx"),
                });
            } else if let Some(error) = entry.get("error") {
                let message = error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                out.push(OrderStatus::Error(message));
            } else {
                warn!(status = %entry, "Unknown order status format");
            }
        }
        out
    }
}

/// Delivery failure, before any exchange verdict was read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    /// Status line arrived but the body could not be read.
    #[error("response {status} lost while reading body: {reason}")]
    ResponseLost { status: u16, reason: String },
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Client { .. })
    }

    /// Whether the request may have reached the exchange and been acted on.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Server { .. } | Self::Decode(_) | Self::ResponseLost { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::RateLimited(_) => "rate_limited",
            Self::Server { .. } => "server",
            Self::Client { .. } => "client",
            Self::Decode(_) => "decode",
            Self::ResponseLost { .. } => "response_lost",
        }
    }

    fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited(body),
            500..=599 => Self::Server { status, body },
            _ => Self::Client { status, body },
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

pub trait ExchangeSender: Send + Sync {
    fn post(&self, request: ExchangeRequest)
        -> BoxFuture<'_, Result<ExchangeResponse, TransportError>>;
}

pub type DynExchangeSender = Arc<dyn ExchangeSender>;

// =============================================================================
// HTTP
// =============================================================================

/// Posts to the exchange endpoint.
pub struct HttpExchangeSender {
    client: Client,
    exchange_url: String,
}

impl HttpExchangeSender {
    pub fn new(exchange_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            exchange_url: exchange_url.into(),
        })
    }

    async fn send(&self, request: ExchangeRequest) -> Result<ExchangeResponse, TransportError> {
        let response = self
            .client
            .post(&self.exchange_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        // The request was delivered; losing the body leaves the outcome unknown.
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::ResponseLost {
                status: status.as_u16(),
                reason: e.to_string(),
            })?;
        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16(), body));
        }
        debug!(nonce = request.nonce, status = status.as_u16(), "Exchange responded");
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(format!("{e}: {body}")))
    }
}

impl ExchangeSender for HttpExchangeSender {
    fn post(
        &self,
        request: ExchangeRequest,
    ) -> BoxFuture<'_, Result<ExchangeResponse, TransportError>> {
        Box::pin(self.send(request))
    }
}

// =============================================================================
// Dry run
// =============================================================================

/// Logs the canonical payload and answers as if the exchange accepted it.
/// Used in observation mode; nothing leaves the process.
#[derive(Debug, Default)]
pub struct DryRunSender {
    posted: AtomicU64,
}

impl DryRunSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }
}

impl ExchangeSender for DryRunSender {
    fn post(
        &self,
        request: ExchangeRequest,
    ) -> BoxFuture<'_, Result<ExchangeResponse, TransportError>> {
        Box::pin(async move {
            self.posted.fetch_add(1, Ordering::Relaxed);
            let payload = serde_json::to_string(&request)
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            info!(
                action = request.action.kind(),
                nonce = request.nonce,
                payload = %payload,
                "[DRY RUN] Signed action not transmitted"
            );
            Ok(if request.is_order() {
                ExchangeResponse::resting(0)
            } else {
                ExchangeResponse::acknowledged()
            })
        })
    }
}

// =============================================================================
// Mock
// =============================================================================

/// Scripted sender for tests.
///
/// Replies are consumed in order; once the script is empty, orders rest
/// with increasing oids and other actions are acknowledged.
#[derive(Debug, Default)]
pub struct MockExchangeSender {
    requests: Mutex<Vec<ExchangeRequest>>,
    script: Mutex<VecDeque<Result<ExchangeResponse, TransportError>>>,
    leverage_script: Mutex<VecDeque<Result<ExchangeResponse, TransportError>>>,
    delay: Mutex<Option<Duration>>,
    next_oid: AtomicU64,
}

impl MockExchangeSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next order post.
    pub fn push_reply(&self, reply: Result<ExchangeResponse, TransportError>) {
        self.script.lock().push_back(reply);
    }

    /// Queue a reply for the next leverage update.
    pub fn push_leverage_reply(&self, reply: Result<ExchangeResponse, TransportError>) {
        self.leverage_script.lock().push_back(reply);
    }

    /// Hold every reply back for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self) -> Vec<ExchangeRequest> {
        self.requests.lock().clone()
    }

    pub fn order_requests(&self) -> Vec<ExchangeRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.is_order())
            .cloned()
            .collect()
    }

    pub fn leverage_requests(&self) -> Vec<ExchangeRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| !r.is_order())
            .cloned()
            .collect()
    }

    fn next_reply(&self, is_order: bool) -> Result<ExchangeResponse, TransportError> {
        let scripted = if is_order {
            self.script.lock().pop_front()
        } else {
            self.leverage_script.lock().pop_front()
        };
        scripted.unwrap_or_else(|| {
            Ok(if is_order {
                ExchangeResponse::resting(self.next_oid.fetch_add(1, Ordering::Relaxed) + 1)
            } else {
                ExchangeResponse::acknowledged()
            })
        })
    }
}

impl ExchangeSender for MockExchangeSender {
    fn post(
        &self,
        request: ExchangeRequest,
    ) -> BoxFuture<'_, Result<ExchangeResponse, TransportError>> {
        Box::pin(async move {
            let is_order = request.is_order();
            self.requests.lock().push(request);
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.next_reply(is_order)
        })
    }
}
