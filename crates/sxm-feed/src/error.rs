//! Price feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("No message received for {0}ms")]
    Stale(u64),

    #[error("Price receiver dropped")]
    ChannelClosed,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
