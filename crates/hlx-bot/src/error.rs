//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(#[from] hlx_registry::RegistryError),

    #[error("Executor error: {0}")]
    Executor(#[from] hlx_executor::ExecutorError),

    #[error("Key error: {0}")]
    Key(#[from] hlx_executor::KeyError),

    #[error("Transport error: {0}")]
    Transport(#[from] hlx_executor::TransportError),

    #[error("Intent error: {0}")]
    Intent(#[from] hlx_core::CoreError),

    #[error("Preflight error: {0}")]
    Preflight(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
