//! Executor error types.
//!
//! Everything a caller can see from `process_intent` that is not a
//! `SubmissionResult`. Validation failures are never retried; the cycle
//! driver decides whether to skip the asset or abort.

use crate::nonce::NonceError;
use crate::signer::{KeyError, SignerError};
use crate::submission::SubmissionReport;
use hlx_core::CoreError;
use hlx_registry::RegistryError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Intent or order violates exchange or local policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("{coin}: size {size} below minimum {min}")]
    SizeBelowMinimum {
        coin: String,
        size: Decimal,
        min: Decimal,
    },

    #[error("{coin}: price {price} deviates {deviation_pct}% from reference {reference} (max {max_pct}%)")]
    PriceOutOfBand {
        coin: String,
        price: Decimal,
        reference: Decimal,
        deviation_pct: Decimal,
        max_pct: Decimal,
    },

    #[error("{coin}: leverage {requested}x above asset cap {cap}x")]
    LeverageAboveCap {
        coin: String,
        requested: u32,
        cap: u32,
    },

    #[error("Leverage {value}x outside [{min}, {max}]")]
    LeverageOutOfRange { value: u32, min: u32, max: u32 },

    #[error("Confidence {0} outside allowed range")]
    ConfidenceOutOfRange(String),

    #[error("{coin}: reference price is {age_ms}ms old (max {max_age_ms}ms)")]
    StaleReferencePrice {
        coin: String,
        age_ms: i64,
        max_age_ms: i64,
    },

    #[error("{0}: no open position to close")]
    NoPositionToClose(String),

    #[error("{0}: asset only trades isolated margin, account is cross")]
    IsolatedOnly(String),

    #[error("Invalid intent: {0}")]
    InvalidIntent(String),
}

impl ValidationError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedAsset(_) => "unsupported_asset",
            Self::InvalidAsset(_) => "invalid_asset",
            Self::SizeBelowMinimum { .. } => "size_below_minimum",
            Self::PriceOutOfBand { .. } => "price_out_of_band",
            Self::LeverageAboveCap { .. } => "leverage_above_cap",
            Self::LeverageOutOfRange { .. } => "leverage_out_of_range",
            Self::ConfidenceOutOfRange(_) => "confidence_out_of_range",
            Self::StaleReferencePrice { .. } => "stale_reference_price",
            Self::NoPositionToClose(_) => "no_position",
            Self::IsolatedOnly(_) => "isolated_only",
            Self::InvalidIntent(_) => "invalid_intent",
        }
    }
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::LeverageOutOfRange { value, min, max } => {
                Self::LeverageOutOfRange { value, min, max }
            }
            CoreError::ConfidenceOutOfRange(c) => Self::ConfidenceOutOfRange(c),
            other => Self::InvalidIntent(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{coin}: insufficient margin: required {required}, available {available}")]
    InsufficientMargin {
        coin: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("{coin}: leverage setup to {leverage}x failed: {reason}")]
    LeverageSetup {
        coin: String,
        leverage: u32,
        reason: String,
    },

    /// Account state could not be read. `retryable` reflects the configured
    /// policy, not the nature of the failure.
    #[error("Account state unavailable: {reason}")]
    AccountUnavailable { reason: String, retryable: bool },

    #[error("Market data unavailable for {coin}: {reason}")]
    MarketData { coin: String, reason: String },

    #[error("Signing failed: {0}")]
    Signing(#[from] SignerError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),

    #[error("Transport setup failed: {0}")]
    Transport(String),

    /// Submission stopped after at least one attempt was posted. The report
    /// keeps the nonces used and whether an earlier attempt may be live.
    #[error(
        "{}: submission aborted after {} attempt(s) (possibly live: {}): {cause}",
        .report.coin,
        .report.attempts,
        .report.possibly_live
    )]
    SubmissionAborted {
        report: Box<SubmissionReport>,
        cause: Box<ExecutorError>,
    },
}

impl ExecutorError {
    /// Short label for metrics and cycle summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(v) => v.kind(),
            Self::InsufficientMargin { .. } => "insufficient_margin",
            Self::LeverageSetup { .. } => "leverage_setup",
            Self::AccountUnavailable { .. } => "account_unavailable",
            Self::MarketData { .. } => "market_data",
            Self::Signing(_) => "signing",
            Self::Key(_) => "key",
            Self::Nonce(_) => "nonce",
            Self::Transport(_) => "transport",
            Self::SubmissionAborted { .. } => "submission_aborted",
        }
    }

    /// Whether a submission attempt that hit this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AccountUnavailable { retryable: true, .. })
    }

    /// Map a registry failure for `coin` into the pipeline taxonomy.
    pub fn from_registry(coin: &str, e: RegistryError) -> Self {
        match e {
            RegistryError::UnsupportedAsset(c) => ValidationError::UnsupportedAsset(c).into(),
            RegistryError::InvalidReferencePrice { coin, price } => {
                ValidationError::InvalidAsset(format!("{coin}: reference price {price}")).into()
            }
            other => Self::MarketData {
                coin: coin.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
