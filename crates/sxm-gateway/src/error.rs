//! Venue error types.

use sxm_core::FailureKind;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VenueError {
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Rate limited")]
    RateLimited,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),
}

impl VenueError {
    /// Classification used by the quoting engine.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) | Self::RateLimited | Self::Transport(_) => FailureKind::Transient,
            Self::Rejected(_) => FailureKind::Rejected,
            Self::UnknownOrder(_) => FailureKind::UnknownOrder,
        }
    }

    /// Outcome at the venue is unknown and the call may be retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Transport(_) => "transport",
            Self::Rejected(_) => "rejected",
            Self::UnknownOrder(_) => "unknown_order",
        }
    }
}

pub type VenueResult<T> = Result<T, VenueError>;
