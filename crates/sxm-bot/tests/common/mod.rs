//! Shared harness for supervisor integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sxm_bot::{AppConfig, AppResult, QuoteStatus, ShutdownReport, Supervisor};
use sxm_core::{OrderEvent, OrderId, Price, PriceSample, Side, Size};
use sxm_gateway::{MockGateway, OpenOrder};
use sxm_mm::{LifecycleState, MakerConfig};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Thresholds 20 / 10 / 40 bps, 5 s window, 5 bps calm threshold.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::new("BTC-USD");
    config.maker = MakerConfig {
        order_distance_bps: dec!(20),
        cancel_distance_bps: dec!(10),
        rebalance_distance_bps: dec!(40),
        order_size: dec!(0.001),
        max_position: dec!(0.01),
        ..MakerConfig::default()
    };
    config.gateway.order_timeout_ms = 500;
    config.supervisor.shutdown_timeout_ms = 2_000;
    // Fills are injected by hand; the mock position would overwrite them.
    config.supervisor.position_resync_secs = 0;
    config
}

pub struct Harness {
    pub gateway: Arc<MockGateway>,
    pub prices: mpsc::Sender<PriceSample>,
    pub events: mpsc::Sender<OrderEvent>,
    pub status: watch::Receiver<QuoteStatus>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<AppResult<ShutdownReport>>,
}

impl Harness {
    pub fn start(config: AppConfig) -> Self {
        Self::start_with(config, Arc::new(MockGateway::new()))
    }

    pub fn start_with(config: AppConfig, gateway: Arc<MockGateway>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (prices_tx, prices_rx) = mpsc::channel(256);

        let supervisor = Supervisor::new(&config, gateway.clone(), (events_tx.clone(), events_rx))
            .expect("valid config");
        let status = supervisor.status();
        let shutdown = supervisor.shutdown_token();
        let handle = tokio::spawn(supervisor.run(prices_rx));

        Self {
            gateway,
            prices: prices_tx,
            events: events_tx,
            status,
            shutdown,
            handle,
        }
    }

    pub async fn tick(&self, timestamp_ms: u64, mark: Decimal) {
        self.prices
            .send(PriceSample::new(timestamp_ms, Price::new(mark)))
            .await
            .expect("supervisor running");
    }

    /// Two identical ticks: enough samples for a calm verdict.
    pub async fn warm_up(&self, mark: Decimal) {
        self.tick(1_000, mark).await;
        self.tick(1_100, mark).await;
    }

    pub async fn wait_for(&mut self, f: impl FnMut(&QuoteStatus) -> bool) -> QuoteStatus {
        let status = tokio::time::timeout(Duration::from_secs(5), self.status.wait_for(f))
            .await
            .expect("status condition not reached in time")
            .expect("supervisor stopped");
        *status
    }

    pub async fn wait_both(&mut self, state: LifecycleState) -> QuoteStatus {
        self.wait_for(|s| s.bid == state && s.ask == state).await
    }

    /// Venue id of the open order on `side`.
    pub fn open_order_id(&self, side: Side) -> OrderId {
        self.gateway
            .get_open_orders()
            .into_iter()
            .find(|o| o.side == side)
            .map(|o| o.order_id)
            .expect("open order on side")
    }

    pub async fn stop(self) -> AppResult<ShutdownReport> {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("supervisor did not stop")
            .expect("supervisor task panicked")
    }
}

/// A 0.001 order the venue reports as open.
pub fn open_order(id: &str, side: Side, price: Decimal) -> OpenOrder {
    OpenOrder {
        order_id: OrderId::new(id),
        side,
        price: Price::new(price),
        size: Size::new(dec!(0.001)),
    }
}

/// Give the loop a moment to process anything already queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
