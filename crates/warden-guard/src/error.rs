//! Error types for warden-guard

use thiserror::Error;

/// Result type for guard operations
pub type GuardResult<T> = Result<T, GuardError>;

/// Guard configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    /// Threshold bounds are inverted or the default lies outside them.
    #[error("invalid bounds for {name}: min={min}, default={default}, max={max}")]
    InvalidBounds {
        name: &'static str,
        min: f64,
        default: f64,
        max: f64,
    },

    #[error("invalid guard configuration: {0}")]
    InvalidConfig(String),
}
