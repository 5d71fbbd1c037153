//! Error types for sxm-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid side: {0}")]
    InvalidSide(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
