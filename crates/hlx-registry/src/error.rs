//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// No tick/leverage metadata is known for the asset.
    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("Invalid reference price for {coin}: {price}")]
    InvalidReferencePrice { coin: String, price: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RegistryError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::HttpClient(_) | Self::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::HttpClient(e.to_string())
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
