//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid maker configuration: {0}")]
    Maker(#[from] sxm_mm::MakerError),

    #[error("Feed error: {0}")]
    Feed(#[from] sxm_feed::FeedError),

    #[error("Venue error: {0}")]
    Venue(#[from] sxm_gateway::VenueError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sxm_telemetry::TelemetryError),

    #[error("Shutdown timed out with {remaining} order(s) unconfirmed")]
    ShutdownTimeout { remaining: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
