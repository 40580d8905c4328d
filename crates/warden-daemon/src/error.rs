//! Daemon error types

use thiserror::Error;
use warden_engine::EngineError;
use warden_store::StoreError;

/// Daemon error types
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// HTTP client setup error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        DaemonError::Config(e.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
