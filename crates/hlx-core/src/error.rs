//! Error types for hlx-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Unknown action: {0:?}")]
    UnknownAction(String),

    #[error("Leverage {value} outside [{min}, {max}]")]
    LeverageOutOfRange { value: u32, min: u32, max: u32 },

    #[error("Confidence {0} outside allowed range")]
    ConfidenceOutOfRange(String),

    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(String),
}

impl From<rust_decimal::Error> for CoreError {
    fn from(e: rust_decimal::Error) -> Self {
        Self::DecimalParse(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
