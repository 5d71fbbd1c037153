//! Error types for the quoting engine.

use thiserror::Error;

/// Quoting engine errors.
#[derive(Debug, Error)]
pub enum MakerError {
    /// Configuration violates an ordering or positivity requirement.
    /// Fatal at startup.
    #[error("Config invariant violated: {0}")]
    ConfigInvariant(String),
}

pub type MakerResult<T> = Result<T, MakerError>;
