//! Mark price feed for the sxm maker bot.
//!
//! Provides a WebSocket price subscription with:
//! - Automatic reconnection with exponential backoff
//! - Subscription restore after every reconnect
//! - Stale-stream detection
//! - Channel-based delivery of `PriceSample`s

pub mod connection;
pub mod error;
pub mod parser;

pub use connection::{FeedConfig, FeedConnection, FeedState};
pub use error::{FeedError, FeedResult};
pub use parser::{parse_price_message, subscribe_message};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
