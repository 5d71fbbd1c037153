//! Run loop wiring price feed, quote engine and execution gateway.
//!
//! The loop is the only owner of the `QuoteEngine`. Venue calls run in
//! spawned tasks bounded by `order_timeout_ms` and report back through the
//! same event channel the venue uses for fills, so a slow call never
//! blocks tick processing for the other side.

use std::collections::HashSet;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sxm_core::{OrderEvent, OrderId, Price, PriceSample, Side};
use sxm_gateway::{DynGateway, ExecutionGateway, PlaceRequest, VenueError, VenueResult};
use sxm_mm::{LifecycleState, OrderAction, QuoteEngine};
use sxm_telemetry::{Alerter, Metrics, Priority};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, SupervisorConfig};
use crate::error::{AppError, AppResult};

/// Snapshot of the quoting state, published after every loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteStatus {
    pub bid: LifecycleState,
    pub ask: LifecycleState,
    pub net_position: Decimal,
}

impl QuoteStatus {
    pub fn state(&self, side: Side) -> LifecycleState {
        match side {
            Side::Bid => self.bid,
            Side::Ask => self.ask,
        }
    }
}

impl Default for QuoteStatus {
    fn default() -> Self {
        Self {
            bid: LifecycleState::Absent,
            ask: LifecycleState::Absent,
            net_position: Decimal::ZERO,
        }
    }
}

/// Outcome of a clean shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Cancels confirmed during the drain.
    pub cancelled: usize,
    /// Orders the post-drain sweep found and cancelled.
    pub swept: usize,
}

/// Why a venue position query was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionQuery {
    Resync,
    ForceFlat,
}

/// Venue position and the engine's fill count when the query was sent.
#[derive(Debug, Clone, Copy)]
struct PositionSnapshot {
    query: PositionQuery,
    net: Decimal,
    fill_count: u64,
}

#[derive(Debug, Default)]
struct SweepOutcome {
    cancelled: usize,
    /// Ids the venue no longer has.
    gone: HashSet<OrderId>,
}

/// Quoting supervisor for one instrument.
pub struct Supervisor {
    engine: QuoteEngine,
    gateway: DynGateway,
    config: SupervisorConfig,
    order_timeout: Duration,
    events_tx: mpsc::Sender<OrderEvent>,
    events_rx: mpsc::Receiver<OrderEvent>,
    position_tx: mpsc::Sender<PositionSnapshot>,
    position_rx: mpsc::Receiver<PositionSnapshot>,
    /// Venue position seen once, with the fill count at that query.
    pending_resync: Option<(Decimal, u64)>,
    marks: watch::Sender<Option<Price>>,
    status: watch::Sender<QuoteStatus>,
    alerter: Alerter,
    shutdown: CancellationToken,
    /// Receipt time of the last accepted tick.
    last_tick_at: Option<Instant>,
}

impl Supervisor {
    /// Create a supervisor.
    ///
    /// `events` is the channel on which the gateway delivers asynchronous
    /// notifications; the supervisor also posts call results to it.
    pub fn new(
        config: &AppConfig,
        gateway: DynGateway,
        events: (mpsc::Sender<OrderEvent>, mpsc::Receiver<OrderEvent>),
    ) -> AppResult<Self> {
        config.validate()?;

        let engine = QuoteEngine::new(config.maker.clone())
            .with_shutdown_cancel_attempts(config.supervisor.shutdown_cancel_attempts);
        let (events_tx, events_rx) = events;
        let (position_tx, position_rx) = mpsc::channel(4);
        let (marks, _) = watch::channel(None);
        let (status, _) = watch::channel(QuoteStatus::default());

        Ok(Self {
            engine,
            gateway,
            config: config.supervisor.clone(),
            order_timeout: Duration::from_millis(config.gateway.order_timeout_ms),
            events_tx,
            events_rx,
            position_tx,
            position_rx,
            pending_resync: None,
            marks,
            status,
            alerter: Alerter::disabled(),
            shutdown: CancellationToken::new(),
            last_tick_at: None,
        })
    }

    /// Attach a failure alerter.
    pub fn with_alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = alerter;
        self
    }

    /// Use an externally owned shutdown token.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that starts the shutdown drain when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Latest mark price, for in-process venues that match against it.
    pub fn marks(&self) -> watch::Receiver<Option<Price>> {
        self.marks.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<QuoteStatus> {
        self.status.subscribe()
    }

    pub fn engine(&self) -> &QuoteEngine {
        &self.engine
    }

    /// Reconcile with the venue, quote until shutdown or the price stream
    /// ends, then drain.
    pub async fn run(mut self, mut prices: mpsc::Receiver<PriceSample>) -> AppResult<ShutdownReport> {
        info!(gateway = self.gateway.name(), "Starting supervisor");
        if let Err(e) = self.reconcile().await {
            error!(error = %e, "Startup reconciliation failed, draining adopted orders");
            if let Err(drain_err) = self.drain().await {
                error!(error = %drain_err, "Drain after failed reconciliation incomplete");
            }
            return Err(e);
        }
        self.publish_status();

        let mut idle = interval_secs(self.config.idle_eval_secs);
        let mut resync = interval_secs(self.config.position_resync_secs);
        let mut flat_check = interval_secs(self.config.force_flat_check_secs);

        info!("Entering main quoting loop");
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }

                sample = prices.recv() => match sample {
                    Some(sample) => self.handle_tick(sample),
                    None => {
                        warn!("Price stream ended, shutting down");
                        break;
                    }
                },

                Some(snapshot) = self.position_rx.recv() => match snapshot.query {
                    PositionQuery::Resync => self.apply_resync(snapshot),
                    PositionQuery::ForceFlat => self.force_flat(snapshot.net),
                },

                () = maybe_tick(&mut idle) => {
                    self.idle_reevaluate();
                }

                () = maybe_tick(&mut resync) => {
                    self.spawn_position_query(PositionQuery::Resync);
                }

                () = maybe_tick(&mut flat_check) => {
                    self.spawn_position_query(PositionQuery::ForceFlat);
                }
            }
            self.publish_status();
        }

        self.drain().await
    }

    // ------------------------------------------------------------------
    // Loop handlers
    // ------------------------------------------------------------------

    fn handle_tick(&mut self, sample: PriceSample) {
        Metrics::price_tick();
        self.last_tick_at = Some(Instant::now());
        self.marks.send_replace(Some(sample.mark_price));

        let actions = self.engine.on_price_tick(sample);
        Metrics::volatility(
            self.engine
                .volatility()
                .volatility_bps()
                .and_then(|v| v.to_f64()),
        );
        self.dispatch(actions);
    }

    fn handle_event(&mut self, event: OrderEvent) {
        match &event {
            OrderEvent::PlaceFailed {
                side, kind, detail, ..
            } => {
                self.alerter.spawn(
                    "Quote placement failed",
                    format!("{side} place failed ({kind}): {detail}"),
                    Priority::Normal,
                );
            }
            OrderEvent::CancelFailed {
                side,
                order_id,
                kind,
                detail,
            } => {
                self.alerter.spawn(
                    "Quote cancel failed",
                    format!("{side} cancel of {order_id} failed ({kind}): {detail}"),
                    Priority::High,
                );
            }
            OrderEvent::CloseFailed { side, kind, detail } => {
                self.alerter.spawn(
                    "Force-flat failed",
                    format!("{side} reduce-only close failed ({kind}): {detail}"),
                    Priority::High,
                );
            }
            _ => {}
        }

        let is_fill = matches!(event, OrderEvent::Filled { .. });
        let actions = self.engine.on_order_event(event);
        if is_fill {
            Metrics::net_position(self.engine.guard().net_size().to_f64().unwrap_or_default());
        }
        self.dispatch(actions);
    }

    /// Re-evaluate with the last sample when the feed has been quiet.
    fn idle_reevaluate(&mut self) {
        let (Some(last_at), Some(sample)) = (self.last_tick_at, self.engine.last_sample().copied())
        else {
            return;
        };
        let idle_for = last_at.elapsed();
        if idle_for < Duration::from_secs(self.config.idle_eval_secs) {
            return;
        }

        // Stay on the feed's clock: last sample time plus time since receipt.
        let now_ms = sample.timestamp_ms + idle_for.as_millis() as u64;
        debug!(idle_ms = idle_for.as_millis() as u64, "No tick, re-evaluating");
        let actions = self.engine.reevaluate(now_ms);
        self.dispatch(actions);
    }

    fn spawn_position_query(&self, query: PositionQuery) {
        let gateway = self.gateway.clone();
        let tx = self.position_tx.clone();
        let timeout = self.order_timeout;
        let fill_count = self.engine.guard().fill_count();
        tokio::spawn(async move {
            match call_with_timeout(timeout, gateway.position()).await {
                Ok(net) => {
                    let snapshot = PositionSnapshot {
                        query,
                        net,
                        fill_count,
                    };
                    if tx.send(snapshot).await.is_err() {
                        debug!("Supervisor gone, dropping position snapshot");
                    }
                }
                Err(e) => {
                    Metrics::venue_error("position", e.label());
                    warn!(error = %e, ?query, "Position query failed");
                }
            }
        });
    }

    /// Overwrite the tracked position once two snapshots in a row report the
    /// same venue value with no fill and no request in flight around them.
    ///
    /// A single snapshot can include a fill whose event is still queued, or
    /// miss one whose event was already applied.
    fn apply_resync(&mut self, snapshot: PositionSnapshot) {
        let fill_count = self.engine.guard().fill_count();
        let settled = snapshot.fill_count == fill_count
            && Side::BOTH.iter().all(|side| {
                matches!(
                    self.engine.state(*side),
                    LifecycleState::Absent | LifecycleState::Resting
                )
            });
        if !settled {
            debug!(venue = %snapshot.net, "Position snapshot raced fills or requests, discarding");
            self.pending_resync = None;
            return;
        }

        let tracked = self.engine.guard().net_size();
        if snapshot.net == tracked {
            self.pending_resync = None;
            return;
        }
        if self.pending_resync != Some((snapshot.net, fill_count)) {
            debug!(
                venue = %snapshot.net,
                tracked = %tracked,
                "Venue position differs, waiting for confirmation"
            );
            self.pending_resync = Some((snapshot.net, fill_count));
            return;
        }

        self.pending_resync = None;
        if self.engine.sync_position(snapshot.net) {
            Metrics::position_resync();
        }
        Metrics::net_position(snapshot.net.to_f64().unwrap_or_default());
    }

    fn force_flat(&mut self, venue_net: Decimal) {
        if venue_net.is_zero() {
            debug!("Force-flat check: venue position flat");
            return;
        }
        let actions = self.engine.force_flat(venue_net);
        if actions
            .iter()
            .any(|action| matches!(action, OrderAction::Close { .. }))
        {
            Metrics::force_flat();
            self.alerter.spawn(
                "Force-flat",
                format!("Closing venue position {venue_net} with a reduce-only order"),
                Priority::High,
            );
        }
        self.dispatch(actions);
    }

    fn record_transitions(&mut self) {
        for transition in self.engine.drain_transitions() {
            Metrics::transition(
                transition.side.as_str(),
                transition.from.as_str(),
                transition.to.as_str(),
            );
        }
    }

    /// Execute actions in background tasks; results come back as events.
    fn dispatch(&mut self, actions: Vec<OrderAction>) {
        self.record_transitions();

        for action in actions {
            let gateway = self.gateway.clone();
            let tx = self.events_tx.clone();
            let timeout = self.order_timeout;
            tokio::spawn(async move {
                let event = execute_action(gateway.as_ref(), action, timeout).await;
                if tx.send(event).await.is_err() {
                    debug!("Supervisor gone, dropping order result");
                }
            });
        }
    }

    fn publish_status(&self) {
        let status = QuoteStatus {
            bid: self.engine.state(Side::Bid),
            ask: self.engine.state(Side::Ask),
            net_position: self.engine.guard().net_size(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    // ------------------------------------------------------------------
    // Startup / shutdown
    // ------------------------------------------------------------------

    /// Seed position and adopt venue orders so that each side owns at most
    /// one live order before the first tick.
    async fn reconcile(&mut self) -> AppResult<()> {
        let net = call_with_timeout(self.order_timeout, self.gateway.position()).await?;
        self.engine.sync_position(net);
        Metrics::net_position(net.to_f64().unwrap_or_default());

        let open = call_with_timeout(self.order_timeout, self.gateway.open_orders()).await?;
        info!(net_position = %net, open_orders = open.len(), "Reconciled with venue");

        for order in open {
            if self
                .engine
                .adopt(order.side, order.order_id.clone(), order.price, order.size)
            {
                continue;
            }
            warn!(
                side = %order.side,
                order_id = %order.order_id,
                "Extra open order on side, cancelling"
            );
            match call_with_timeout(self.order_timeout, self.gateway.cancel(order.order_id.clone()))
                .await
            {
                Ok(()) | Err(VenueError::UnknownOrder(_)) => {}
                Err(e) => {
                    error!(order_id = %order.order_id, error = %e, "Failed to cancel extra order");
                    return Err(e.into());
                }
            }
        }
        self.record_transitions();
        Ok(())
    }

    /// Cancel everything and wait for confirmations, bounded by
    /// `shutdown_timeout_ms`.
    async fn drain(mut self) -> AppResult<ShutdownReport> {
        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();

        let actions = self.engine.shutdown();
        info!(
            cancels = actions.len(),
            live = self.engine.live_order_ids().len(),
            "Draining quotes"
        );
        self.dispatch(actions);
        self.publish_status();

        let mut timed_out = false;
        while !self.is_drained() {
            tokio::select! {
                event = self.events_rx.recv() => {
                    let Some(event) = event else { break };
                    if matches!(event, OrderEvent::CancelAcked { .. }) {
                        report.cancelled += 1;
                    }
                    self.handle_event(event);
                    self.publish_status();
                }
                () = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let mut remaining = self.engine.live_order_ids();
        if self.config.sweep_on_shutdown {
            let sweep = self.sweep().await;
            report.swept = sweep.cancelled;
            remaining.retain(|id| !sweep.gone.contains(id));
        }

        if timed_out && remaining.is_empty() {
            warn!(
                swept = report.swept,
                timeout_ms = self.config.shutdown_timeout_ms,
                "Drain timed out, sweep removed every remaining order"
            );
        } else if timed_out {
            error!(
                remaining = remaining.len(),
                timeout_ms = self.config.shutdown_timeout_ms,
                "CRITICAL: shutdown timed out before all cancels were confirmed"
            );
            self.alerter
                .send(
                    "Shutdown timeout",
                    &format!("{} order(s) unconfirmed: {:?}", remaining.len(), remaining),
                    Priority::Critical,
                )
                .await;
            return Err(AppError::ShutdownTimeout {
                remaining: remaining.len(),
            });
        }

        info!(
            cancelled = report.cancelled,
            swept = report.swept,
            "Shutdown complete"
        );
        Ok(report)
    }

    fn is_drained(&self) -> bool {
        self.engine.is_flat() && self.engine.live_order_ids().is_empty()
    }

    /// Cancel anything the venue still lists as open. Best effort.
    async fn sweep(&self) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let open = match call_with_timeout(self.order_timeout, self.gateway.open_orders()).await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "Shutdown sweep could not list open orders");
                return outcome;
            }
        };

        for order in open {
            let id = order.order_id.clone();
            match call_with_timeout(self.order_timeout, self.gateway.cancel(id.clone())).await {
                Ok(()) => {
                    warn!(order_id = %id, side = %order.side, "Swept leftover order");
                    outcome.cancelled += 1;
                    outcome.gone.insert(id);
                }
                Err(VenueError::UnknownOrder(_)) => {
                    outcome.gone.insert(id);
                }
                Err(e) => {
                    error!(order_id = %id, error = %e, "Sweep cancel failed");
                }
            }
        }
        outcome
    }
}

/// Run one order action against the venue and turn the outcome into an event.
pub async fn execute_action(
    gateway: &dyn ExecutionGateway,
    action: OrderAction,
    timeout: Duration,
) -> OrderEvent {
    let started = Instant::now();
    match action {
        OrderAction::Place {
            side,
            client_id,
            price,
            size,
        } => {
            let request = PlaceRequest {
                side,
                client_id: client_id.clone(),
                price,
                size,
            };
            let result = call_with_timeout(timeout, gateway.place(request)).await;
            record_latency("place", &result, started);

            match result {
                Ok(order_id) => {
                    debug!(side = %side, client_id = %client_id, order_id = %order_id, "Place acked");
                    OrderEvent::PlaceAcked {
                        side,
                        client_id,
                        order_id,
                    }
                }
                Err(e) => {
                    warn!(side = %side, client_id = %client_id, error = %e, "Place failed");
                    OrderEvent::PlaceFailed {
                        side,
                        client_id,
                        kind: e.kind(),
                        detail: e.to_string(),
                    }
                }
            }
        }
        OrderAction::Cancel { side, order_id } => {
            let result = call_with_timeout(timeout, gateway.cancel(order_id.clone())).await;
            record_latency("cancel", &result, started);

            match result {
                Ok(()) => OrderEvent::CancelAcked { side, order_id },
                Err(e) => {
                    warn!(side = %side, order_id = %order_id, error = %e, "Cancel failed");
                    OrderEvent::CancelFailed {
                        side,
                        order_id,
                        kind: e.kind(),
                        detail: e.to_string(),
                    }
                }
            }
        }
        OrderAction::Close { side, size } => {
            let result = call_with_timeout(timeout, gateway.close_position(side, size)).await;
            record_latency("close", &result, started);

            match result {
                Ok(order_id) => {
                    info!(side = %side, size = %size, order_id = %order_id, "Reduce-only close sent");
                    OrderEvent::CloseAcked { side, order_id }
                }
                Err(e) => {
                    error!(side = %side, size = %size, error = %e, "Reduce-only close failed");
                    OrderEvent::CloseFailed {
                        side,
                        kind: e.kind(),
                        detail: e.to_string(),
                    }
                }
            }
        }
    }
}

/// Await a venue call, mapping an elapsed timeout to `VenueError::Timeout`.
async fn call_with_timeout<T>(
    timeout: Duration,
    call: impl std::future::Future<Output = VenueResult<T>>,
) -> VenueResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(VenueError::Timeout(timeout.as_millis() as u64)),
    }
}

fn record_latency<T>(action: &str, result: &VenueResult<T>, started: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => {
            Metrics::venue_error(action, e.label());
            e.label()
        }
    };
    Metrics::order_latency(action, outcome, started.elapsed().as_secs_f64() * 1000.0);
}

fn interval_secs(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn maybe_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sxm_core::{ClientOrderId, FailureKind, OrderId, Size};
    use sxm_gateway::MockGateway;

    fn place_action() -> OrderAction {
        OrderAction::Place {
            side: Side::Bid,
            client_id: ClientOrderId::new(Side::Bid),
            price: Price::new(dec!(49900)),
            size: Size::new(dec!(0.001)),
        }
    }

    #[tokio::test]
    async fn test_execute_place_ack() {
        let gateway = MockGateway::new();
        let event = execute_action(&gateway, place_action(), Duration::from_secs(1)).await;

        match event {
            OrderEvent::PlaceAcked { side, order_id, .. } => {
                assert_eq!(side, Side::Bid);
                assert_eq!(order_id.as_str(), "ord-1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_place_timeout_is_transient_failure() {
        let gateway = MockGateway::new();
        gateway.set_place_delay(Some(Duration::from_secs(5)));

        let event = execute_action(&gateway, place_action(), Duration::from_millis(100)).await;

        match event {
            OrderEvent::PlaceFailed { kind, .. } => assert_eq!(kind, FailureKind::Transient),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_cancel_unknown_order() {
        let gateway = MockGateway::new();
        gateway.push_cancel_result(Err(VenueError::UnknownOrder("gone".to_string())));

        let event = execute_action(
            &gateway,
            OrderAction::Cancel {
                side: Side::Ask,
                order_id: OrderId::new("ord-9"),
            },
            Duration::from_secs(1),
        )
        .await;

        match event {
            OrderEvent::CancelFailed { kind, .. } => assert_eq!(kind, FailureKind::UnknownOrder),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_close_reports_outcome() {
        let gateway = MockGateway::new();
        gateway.set_position(dec!(0.002));
        let close = OrderAction::Close {
            side: Side::Ask,
            size: Size::new(dec!(0.002)),
        };

        let event = execute_action(&gateway, close.clone(), Duration::from_secs(1)).await;
        assert!(matches!(event, OrderEvent::CloseAcked { side: Side::Ask, .. }));

        gateway.push_close_result(Err(VenueError::Rejected("reduce-only".to_string())));
        let event = execute_action(&gateway, close, Duration::from_secs(1)).await;
        match event {
            OrderEvent::CloseFailed { kind, .. } => assert_eq!(kind, FailureKind::Rejected),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_interval_never_fires() {
        let mut none = interval_secs(0);
        let fired = tokio::time::timeout(Duration::from_secs(60), maybe_tick(&mut none)).await;
        assert!(fired.is_err());

        let mut some = interval_secs(1);
        let fired = tokio::time::timeout(Duration::from_secs(2), maybe_tick(&mut some)).await;
        assert!(fired.is_ok());
    }
}
