//! Price feed connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential
//! backoff, and subscription restore after reconnection. Consumers see a
//! continuous stream of `PriceSample`s with gaps during outages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sxm_core::PriceSample;
use sxm_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FeedError, FeedResult};
use crate::parser::{parse_price_message, subscribe_message};

/// Price feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// WebSocket URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum consecutive reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Upper bound of the random jitter added to each backoff delay.
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,
    /// Reconnect when no frame arrives for this long.
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            stale_timeout_ms: default_stale_timeout_ms(),
        }
    }
}

fn default_url() -> String {
    "wss://perps.standx.com/ws-stream/v1".to_string()
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}
fn default_reconnect_jitter_ms() -> u64 {
    1000
}
fn default_stale_timeout_ms() -> u64 {
    30_000
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// WebSocket price feed.
pub struct FeedConnection {
    config: FeedConfig,
    symbol: String,
    state: Arc<RwLock<FeedState>>,
    price_tx: mpsc::Sender<PriceSample>,
    /// Consecutive failed attempts since the last successful connect.
    reconnect_count: Arc<RwLock<u32>>,
    /// Reconnects over the lifetime of the feed.
    total_reconnects: AtomicU64,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl FeedConnection {
    pub fn new(
        config: FeedConfig,
        symbol: impl Into<String>,
        price_tx: mpsc::Sender<PriceSample>,
    ) -> Self {
        Self {
            config,
            symbol: symbol.into(),
            state: Arc::new(RwLock::new(FeedState::Disconnected)),
            price_tx,
            reconnect_count: Arc::new(RwLock::new(0)),
            total_reconnects: AtomicU64::new(0),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    pub fn reconnect_count(&self) -> u32 {
        *self.reconnect_count.read()
    }

    pub fn total_reconnects(&self) -> u64 {
        self.total_reconnects.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!("Price feed shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Token that stops the feed when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Connect and stream prices until shutdown, reconnecting on failure.
    ///
    /// Returns an error only when `max_reconnect_attempts` is exhausted or the
    /// price receiver has been dropped.
    pub async fn run(&self) -> FeedResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting feed loop");
                self.set_state(FeedState::Disconnected);
                return Ok(());
            }

            self.set_state(FeedState::Connecting);

            let reason = match self.try_connect().await {
                Ok(()) => {
                    info!("Price feed connection closed");
                    "closed"
                }
                Err(FeedError::ChannelClosed) => {
                    self.set_state(FeedState::Disconnected);
                    return Err(FeedError::ChannelClosed);
                }
                Err(FeedError::Stale(ms)) => {
                    warn!(stale_ms = ms, "Price feed stale");
                    "stale"
                }
                Err(e) => {
                    error!(error = %e, "Price feed connection error");
                    "error"
                }
            };

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.set_state(FeedState::Disconnected);
                return Ok(());
            }

            // A session that delivered data resets the attempt counter.
            if *self.reconnect_count.read() == 0 {
                attempt = 0;
            }
            attempt += 1;
            *self.reconnect_count.write() = attempt;
            self.total_reconnects.fetch_add(1, Ordering::Relaxed);
            Metrics::feed_reconnect(reason);

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                self.set_state(FeedState::Disconnected);
                return Err(FeedError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            self.set_state(FeedState::Reconnecting);

            let delay = self.calculate_backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting price feed");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.set_state(FeedState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> FeedResult<()> {
        info!(url = %self.config.url, symbol = %self.symbol, "Connecting price feed");

        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        self.set_state(FeedState::Connected);
        info!("Price feed connected");

        // Restore subscription on every (re)connect
        write
            .send(Message::Text(subscribe_message(&self.symbol)))
            .await?;
        debug!(symbol = %self.symbol, "Subscribed to price channel");

        let stale = Duration::from_millis(self.config.stale_timeout_ms);

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in feed loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    self.set_state(FeedState::Disconnected);
                    return Ok(());
                }

                msg = tokio::time::timeout(stale, read.next()) => {
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(_) => return Err(FeedError::Stale(self.config.stale_timeout_ms)),
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason): (u16, String) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Price feed closed by server");
                            return Err(FeedError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            warn!("Price feed stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) -> FeedResult<()> {
        let received_at_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        match parse_price_message(text, &self.symbol, received_at_ms) {
            Ok(Some(sample)) => {
                // First sample of a session marks the connection healthy.
                *self.reconnect_count.write() = 0;
                if self.price_tx.send(sample).await.is_err() {
                    warn!("Price receiver dropped");
                    return Err(FeedError::ChannelClosed);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Discarding malformed price message");
            }
        }
        Ok(())
    }

    fn set_state(&self, state: FeedState) {
        let prev = std::mem::replace(&mut *self.state.write(), state);
        if prev == state {
            return;
        }
        if state == FeedState::Connected {
            Metrics::feed_connected();
        } else if prev == FeedState::Connected {
            Metrics::feed_disconnected();
        }
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        Duration::from_millis(delay + rand_jitter(self.config.reconnect_jitter_ms))
    }
}

/// Random jitter in `[0, max_ms)`.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % max_ms
}
