//! Per-side quote lifecycle state machine.
//!
//! Each side owns at most one `QuoteOrder` and moves through
//! `Absent → Placing → Resting → Cancelling → Absent`. A side with a
//! request in flight (`Placing` / `Cancelling`) ignores ticks, so there is
//! never more than one outstanding request or live venue order per side.
//!
//! The engine never talks to the venue. It returns `OrderAction`s and
//! expects the outcome back as `OrderEvent`s.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use rust_decimal::Decimal;
use sxm_core::{ClientOrderId, FailureKind, OrderEvent, OrderId, Price, PriceSample, Side, Size};
use tracing::{debug, info, warn};

use crate::config::MakerConfig;
use crate::guard::PositionGuard;
use crate::pricing::{distance_bps, target_price};
use crate::volatility::VolatilityGate;

/// Cancel attempts per order once shutdown has started.
const DEFAULT_SHUTDOWN_CANCEL_ATTEMPTS: u32 = 3;

/// Finished order ids remembered so their late notifications are ignored.
const RETIRED_ID_CAPACITY: usize = 256;

/// Unmatched terminal notifications held while a placement is in flight.
const EARLY_TERMINAL_CAPACITY: usize = 64;

/// Lifecycle state of one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Absent,
    Placing,
    Resting,
    Cancelling,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Placing => "placing",
            Self::Resting => "resting",
            Self::Cancelling => "cancelling",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The quote currently owned by a side.
#[derive(Debug, Clone)]
pub struct QuoteOrder {
    pub side: Side,
    /// Client order ID of the placement.
    pub client_id: ClientOrderId,
    pub target_price: Price,
    pub size: Size,
    /// Venue order ID (set on ack).
    pub order_id: Option<OrderId>,
    pub state: LifecycleState,
    /// Sample timestamp at which the placement was decided (0 when adopted).
    pub placed_at_ms: u64,
    /// Cumulative filled size.
    pub filled: Size,
    /// Cancel requests issued for this order.
    pub cancel_attempts: u32,
}

/// Action the engine wants executed against the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAction {
    Place {
        side: Side,
        client_id: ClientOrderId,
        price: Price,
        size: Size,
    },
    Cancel {
        side: Side,
        order_id: OrderId,
    },
    /// Reduce-only market order on `side` closing `size` of the position.
    Close {
        side: Side,
        size: Size,
    },
}

impl OrderAction {
    pub fn side(&self) -> Side {
        match self {
            Self::Place { side, .. } | Self::Cancel { side, .. } | Self::Close { side, .. } => {
                *side
            }
        }
    }
}

/// A recorded lifecycle transition (for metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub side: Side,
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Insertion-ordered id set that forgets its oldest entry past `capacity`.
#[derive(Debug)]
struct RecentIds {
    ids: HashSet<OrderId>,
    order: VecDeque<OrderId>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn insert(&mut self, id: OrderId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id);
    }

    fn contains(&self, id: &OrderId) -> bool {
        self.ids.contains(id)
    }

    fn remove(&mut self, id: &OrderId) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.order.retain(|o| o != id);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Quoting decision engine for a single instrument.
#[derive(Debug)]
pub struct QuoteEngine {
    config: MakerConfig,
    gate: VolatilityGate,
    guard: PositionGuard,
    bid: Option<QuoteOrder>,
    ask: Option<QuoteOrder>,
    /// Last accepted sample.
    last_sample: Option<PriceSample>,
    /// Set by `shutdown`; no placements afterwards.
    shutting_down: bool,
    max_shutdown_cancel_attempts: u32,
    /// Live orders not owned by any side that we asked the venue to cancel.
    orphans: HashSet<OrderId>,
    /// Terminal notifications that arrived before the placement ack.
    early_terminal: RecentIds,
    /// Orders the engine has finished with.
    retired: RecentIds,
    /// A force-flat close is in flight; no placements until it resolves.
    flattening: bool,
    transitions: Vec<Transition>,
}

impl QuoteEngine {
    /// Create a new engine. `config` is expected to have passed `validate`.
    pub fn new(config: MakerConfig) -> Self {
        let gate = VolatilityGate::new(
            config.volatility_window_ms(),
            config.volatility_threshold_bps,
        );
        let guard = PositionGuard::new(config.order_size, config.max_position, config.guard_mode);
        Self {
            config,
            gate,
            guard,
            bid: None,
            ask: None,
            last_sample: None,
            shutting_down: false,
            max_shutdown_cancel_attempts: DEFAULT_SHUTDOWN_CANCEL_ATTEMPTS,
            orphans: HashSet::new(),
            early_terminal: RecentIds::new(EARLY_TERMINAL_CAPACITY),
            retired: RecentIds::new(RETIRED_ID_CAPACITY),
            flattening: false,
            transitions: Vec::new(),
        }
    }

    /// Override the number of cancel attempts per order during shutdown.
    pub fn with_shutdown_cancel_attempts(mut self, attempts: u32) -> Self {
        self.max_shutdown_cancel_attempts = attempts.max(1);
        self
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// Process a price tick and evaluate both sides.
    ///
    /// Samples older than the newest one seen are dropped without evaluation.
    pub fn on_price_tick(&mut self, sample: PriceSample) -> Vec<OrderAction> {
        if !self.gate.observe(sample) {
            return Vec::new();
        }
        self.last_sample = Some(sample);
        self.evaluate(sample.mark_price, sample.timestamp_ms)
    }

    /// Re-run the evaluation with the last sample when no tick has arrived.
    pub fn reevaluate(&mut self, now_ms: u64) -> Vec<OrderAction> {
        self.gate.advance(now_ms);
        match self.last_sample {
            Some(sample) => self.evaluate(sample.mark_price, now_ms),
            None => Vec::new(),
        }
    }

    /// Apply an order-state change reported by the venue or the executor.
    pub fn on_order_event(&mut self, event: OrderEvent) -> Vec<OrderAction> {
        debug!(event = event.kind(), order_id = ?event.order_id(), "Order event");
        match event {
            OrderEvent::PlaceAcked {
                side,
                client_id,
                order_id,
            } => self.on_place_acked(side, client_id, order_id),
            OrderEvent::PlaceFailed {
                side,
                client_id,
                kind,
                detail,
            } => {
                self.on_place_failed(side, &client_id, kind, &detail);
                Vec::new()
            }
            OrderEvent::CancelAcked { side, order_id } => {
                self.on_cancel_acked(side, &order_id);
                Vec::new()
            }
            OrderEvent::CancelFailed {
                side,
                order_id,
                kind,
                detail,
            } => self.on_cancel_failed(side, order_id, kind, &detail),
            OrderEvent::Filled {
                order_id,
                side,
                price,
                size,
                leaves,
            } => {
                self.on_filled(order_id, side, price, size, leaves);
                Vec::new()
            }
            OrderEvent::Cancelled { order_id } => {
                self.on_removed(order_id, "cancelled by venue");
                Vec::new()
            }
            OrderEvent::Rejected { order_id, reason } => {
                warn!(order_id = %order_id, reason = %reason, "Order rejected by venue");
                self.on_removed(order_id, "rejected by venue");
                Vec::new()
            }
            OrderEvent::CloseAcked { side, order_id } => {
                info!(side = %side, order_id = %order_id, "Force-flat close accepted");
                self.flattening = false;
                self.retired.insert(order_id);
                Vec::new()
            }
            OrderEvent::CloseFailed { side, kind, detail } => {
                warn!(side = %side, kind = %kind, detail = %detail, "Force-flat close failed");
                self.flattening = false;
                Vec::new()
            }
        }
    }

    /// Stop placing and cancel every resting order.
    ///
    /// Sides still `Placing` are cancelled as soon as their ack arrives;
    /// sides already `Cancelling` keep their in-flight request.
    pub fn shutdown(&mut self) -> Vec<OrderAction> {
        if !self.shutting_down {
            info!("Quote engine shutting down, cancelling outstanding quotes");
        }
        self.shutting_down = true;
        self.cancel_resting("shutdown")
    }

    /// Cancel resting quotes and close a non-zero venue position with a
    /// reduce-only market order.
    ///
    /// `venue_net` is the position the venue reports. Placements stay
    /// blocked until the close outcome arrives, and only one close is ever
    /// in flight.
    pub fn force_flat(&mut self, venue_net: Decimal) -> Vec<OrderAction> {
        if venue_net.is_zero() || self.shutting_down {
            return Vec::new();
        }
        warn!(
            venue_net = %venue_net,
            tracked_net = %self.guard.net_size(),
            "Force-flat triggered"
        );

        let mut actions = self.cancel_resting("force flat");
        if self.flattening {
            debug!("Close already in flight");
            return actions;
        }
        self.flattening = true;

        let holding = if venue_net.is_sign_positive() {
            Side::Bid
        } else {
            Side::Ask
        };
        actions.push(OrderAction::Close {
            side: holding.opposite(),
            size: Size::new(venue_net.abs()),
        });
        actions
    }

    /// Adopt an order found on the venue at startup as this side's quote.
    ///
    /// Returns `false` when the side already owns an order.
    pub fn adopt(&mut self, side: Side, order_id: OrderId, price: Price, size: Size) -> bool {
        if self.slot(side).is_some() {
            return false;
        }
        info!(side = %side, order_id = %order_id, price = %price, size = %size, "Adopted open order");
        let client_id = ClientOrderId::from_string(format!("adopted-{}", order_id));
        *self.slot_mut(side) = Some(QuoteOrder {
            side,
            client_id,
            target_price: price,
            size,
            order_id: Some(order_id),
            state: LifecycleState::Resting,
            placed_at_ms: 0,
            filled: Size::ZERO,
            cancel_attempts: 0,
        });
        self.record(side, LifecycleState::Absent, LifecycleState::Resting);
        true
    }

    /// Overwrite the tracked net position with the venue's value.
    pub fn sync_position(&mut self, net_size: Decimal) -> bool {
        self.guard.sync(net_size)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn state(&self, side: Side) -> LifecycleState {
        self.slot(side)
            .as_ref()
            .map(|o| o.state)
            .unwrap_or(LifecycleState::Absent)
    }

    pub fn order(&self, side: Side) -> Option<&QuoteOrder> {
        self.slot(side).as_ref()
    }

    /// Both sides are `Absent`.
    pub fn is_flat(&self) -> bool {
        self.bid.is_none() && self.ask.is_none()
    }

    pub fn is_flattening(&self) -> bool {
        self.flattening
    }

    /// Venue ids of every order the engine still considers live.
    pub fn live_order_ids(&self) -> Vec<OrderId> {
        Side::BOTH
            .iter()
            .filter_map(|side| self.slot(*side).as_ref())
            .filter_map(|o| o.order_id.clone())
            .chain(self.orphans.iter().cloned())
            .collect()
    }

    pub fn guard(&self) -> &PositionGuard {
        &self.guard
    }

    pub fn volatility(&self) -> &VolatilityGate {
        &self.gate
    }

    pub fn config(&self) -> &MakerConfig {
        &self.config
    }

    pub fn last_sample(&self) -> Option<&PriceSample> {
        self.last_sample.as_ref()
    }

    /// Take the transitions recorded since the last call.
    pub fn drain_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    fn evaluate(&mut self, mark: Price, now_ms: u64) -> Vec<OrderAction> {
        if !mark.is_positive() {
            warn!(mark = %mark, "Ignoring non-positive mark price");
            return Vec::new();
        }
        if self.shutting_down {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for side in Side::BOTH {
            if let Some(action) = self.evaluate_side(side, mark, now_ms) {
                actions.push(action);
            }
        }
        actions
    }

    fn evaluate_side(&mut self, side: Side, mark: Price, now_ms: u64) -> Option<OrderAction> {
        match self.state(side) {
            LifecycleState::Absent if self.flattening => None,
            LifecycleState::Absent => self.try_place(side, mark, now_ms),
            LifecycleState::Resting => {
                let order = self.slot(side).as_ref()?;
                let distance = distance_bps(order.target_price, mark)?;
                let too_close = distance <= self.config.cancel_distance_bps;
                let too_far = distance >= self.config.rebalance_distance_bps;
                if !(too_close || too_far) {
                    return None;
                }
                let reason = if too_close { "approach" } else { "rebalance" };
                debug!(
                    side = %side,
                    target = %order.target_price,
                    mark = %mark,
                    distance_bps = %distance.round_dp(4),
                    age_ms = now_ms.saturating_sub(order.placed_at_ms),
                    reason,
                    "Quote out of band"
                );
                self.start_cancel(side, reason)
            }
            LifecycleState::Placing | LifecycleState::Cancelling => None,
        }
    }

    fn try_place(&mut self, side: Side, mark: Price, now_ms: u64) -> Option<OrderAction> {
        if !self.gate.is_calm() {
            return None;
        }
        if !self.guard.permits(side) {
            debug!(side = %side, net = %self.guard.net_size(), "Position guard denies side");
            return None;
        }

        let price = target_price(mark, side, &self.config);
        if !price.is_positive() {
            return None;
        }
        let size = Size::new(self.config.order_size);
        let client_id = ClientOrderId::new(side);

        info!(
            side = %side,
            client_id = %client_id,
            price = %price,
            size = %size,
            mark = %mark,
            "Placing quote"
        );

        *self.slot_mut(side) = Some(QuoteOrder {
            side,
            client_id: client_id.clone(),
            target_price: price,
            size,
            order_id: None,
            state: LifecycleState::Placing,
            placed_at_ms: now_ms,
            filled: Size::ZERO,
            cancel_attempts: 0,
        });
        self.record(side, LifecycleState::Absent, LifecycleState::Placing);

        Some(OrderAction::Place {
            side,
            client_id,
            price,
            size,
        })
    }

    fn cancel_resting(&mut self, reason: &str) -> Vec<OrderAction> {
        let mut actions = Vec::new();
        for side in Side::BOTH {
            if self.state(side) == LifecycleState::Resting {
                if let Some(action) = self.start_cancel(side, reason) {
                    actions.push(action);
                }
            }
        }
        actions
    }

    /// Move a `Resting` side to `Cancelling` and build the cancel action.
    fn start_cancel(&mut self, side: Side, reason: &str) -> Option<OrderAction> {
        let order = self.slot_mut(side).as_mut()?;
        let order_id = order.order_id.clone()?;
        let from = order.state;
        order.state = LifecycleState::Cancelling;
        order.cancel_attempts += 1;

        info!(side = %side, order_id = %order_id, reason, "Cancelling quote");
        self.record(side, from, LifecycleState::Cancelling);
        Some(OrderAction::Cancel { side, order_id })
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    fn on_place_acked(
        &mut self,
        side: Side,
        client_id: ClientOrderId,
        order_id: OrderId,
    ) -> Vec<OrderAction> {
        let matches = self
            .slot(side)
            .as_ref()
            .map(|o| o.state == LifecycleState::Placing && o.client_id == client_id)
            .unwrap_or(false);

        if !matches {
            // Live on the venue but not owned by the side: cancel it.
            warn!(
                side = %side,
                client_id = %client_id,
                order_id = %order_id,
                "Ack for a placement the side no longer owns, cancelling"
            );
            if self.early_terminal.remove(&order_id) {
                self.retired.insert(order_id);
                return Vec::new();
            }
            self.orphans.insert(order_id.clone());
            return vec![OrderAction::Cancel { side, order_id }];
        }

        if self.early_terminal.remove(&order_id) {
            debug!(side = %side, order_id = %order_id, "Order already terminal at ack");
            *self.slot_mut(side) = None;
            self.retired.insert(order_id);
            self.record(side, LifecycleState::Placing, LifecycleState::Absent);
            return Vec::new();
        }

        if let Some(order) = self.slot_mut(side).as_mut() {
            order.order_id = Some(order_id.clone());
            order.state = LifecycleState::Resting;
        }
        info!(side = %side, order_id = %order_id, "Quote resting");
        self.record(side, LifecycleState::Placing, LifecycleState::Resting);

        if self.shutting_down {
            return self.start_cancel(side, "shutdown").into_iter().collect();
        }
        Vec::new()
    }

    fn on_place_failed(
        &mut self,
        side: Side,
        client_id: &ClientOrderId,
        kind: FailureKind,
        detail: &str,
    ) {
        let matches = self
            .slot(side)
            .as_ref()
            .map(|o| o.state == LifecycleState::Placing && &o.client_id == client_id)
            .unwrap_or(false);
        if !matches {
            debug!(side = %side, client_id = %client_id, "Ignoring stale place failure");
            return;
        }

        warn!(
            side = %side,
            client_id = %client_id,
            kind = %kind,
            detail,
            "Placement failed"
        );
        *self.slot_mut(side) = None;
        self.record(side, LifecycleState::Placing, LifecycleState::Absent);
    }

    fn on_cancel_acked(&mut self, side: Side, order_id: &OrderId) {
        if self.owns(side, order_id) {
            let from = self.state(side);
            self.clear_slot(side);
            info!(side = %side, order_id = %order_id, "Quote cancelled");
            self.record(side, from, LifecycleState::Absent);
        } else if self.orphans.remove(order_id) {
            self.retired.insert(order_id.clone());
            debug!(order_id = %order_id, "Orphan order cancelled");
        } else {
            debug!(side = %side, order_id = %order_id, "Ignoring cancel ack for unowned order");
        }
    }

    fn on_cancel_failed(
        &mut self,
        side: Side,
        order_id: OrderId,
        kind: FailureKind,
        detail: &str,
    ) -> Vec<OrderAction> {
        if self.orphans.remove(&order_id) {
            warn!(order_id = %order_id, kind = %kind, detail, "Orphan cancel failed");
            if kind == FailureKind::UnknownOrder {
                self.retired.insert(order_id);
            }
            return Vec::new();
        }
        if !self.owns(side, &order_id) || self.state(side) != LifecycleState::Cancelling {
            debug!(side = %side, order_id = %order_id, "Ignoring cancel failure for unowned order");
            return Vec::new();
        }

        if kind == FailureKind::UnknownOrder {
            // The venue no longer has the order: treat as gone.
            info!(side = %side, order_id = %order_id, detail, "Cancel target unknown to venue");
            self.clear_slot(side);
            self.record(side, LifecycleState::Cancelling, LifecycleState::Absent);
            return Vec::new();
        }

        warn!(side = %side, order_id = %order_id, kind = %kind, detail, "Cancel failed");
        let attempts = match self.slot_mut(side).as_mut() {
            Some(order) => {
                order.state = LifecycleState::Resting;
                order.cancel_attempts
            }
            None => return Vec::new(),
        };
        self.record(side, LifecycleState::Cancelling, LifecycleState::Resting);

        if self.shutting_down && attempts < self.max_shutdown_cancel_attempts {
            return self.start_cancel(side, "shutdown retry").into_iter().collect();
        }
        Vec::new()
    }

    fn on_filled(&mut self, order_id: OrderId, side: Side, price: Price, size: Size, leaves: Size) {
        self.guard.update(side, size);
        info!(
            side = %side,
            order_id = %order_id,
            price = %price,
            size = %size,
            leaves = %leaves,
            net = %self.guard.net_size(),
            "Fill"
        );

        if self.owns(side, &order_id) {
            let from = self.state(side);
            if leaves.is_zero() {
                self.clear_slot(side);
                self.record(side, from, LifecycleState::Absent);
            } else if let Some(order) = self.slot_mut(side).as_mut() {
                order.filled = order.filled + size;
            }
            return;
        }

        if !leaves.is_zero() || self.retired.contains(&order_id) {
            return;
        }
        if self.orphans.remove(&order_id) {
            self.retired.insert(order_id);
        } else if self.state(side) == LifecycleState::Placing {
            self.early_terminal.insert(order_id);
        }
    }

    /// Exogenous removal (venue cancel or reject).
    fn on_removed(&mut self, order_id: OrderId, reason: &str) {
        if self.retired.contains(&order_id) {
            debug!(order_id = %order_id, reason, "Removal of finished order");
            return;
        }
        if self.orphans.remove(&order_id) {
            self.retired.insert(order_id);
            return;
        }
        for side in Side::BOTH {
            if self.owns(side, &order_id) {
                let from = self.state(side);
                self.clear_slot(side);
                info!(side = %side, order_id = %order_id, reason, "Quote removed");
                self.record(side, from, LifecycleState::Absent);
                return;
            }
        }
        if Side::BOTH
            .iter()
            .any(|side| self.state(*side) == LifecycleState::Placing)
        {
            self.early_terminal.insert(order_id);
        } else {
            debug!(order_id = %order_id, reason, "Ignoring removal of unowned order");
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn slot(&self, side: Side) -> &Option<QuoteOrder> {
        match side {
            Side::Bid => &self.bid,
            Side::Ask => &self.ask,
        }
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<QuoteOrder> {
        match side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        }
    }

    /// Empty the side, remembering its venue id as finished.
    fn clear_slot(&mut self, side: Side) {
        if let Some(id) = self.slot_mut(side).take().and_then(|o| o.order_id) {
            self.retired.insert(id);
        }
    }

    fn owns(&self, side: Side, order_id: &OrderId) -> bool {
        self.slot(side)
            .as_ref()
            .and_then(|o| o.order_id.as_ref())
            .map(|id| id == order_id)
            .unwrap_or(false)
    }

    fn record(&mut self, side: Side, from: LifecycleState, to: LifecycleState) {
        debug!(side = %side, from = %from, to = %to, "Lifecycle transition");
        self.transitions.push(Transition { side, from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> MakerConfig {
        MakerConfig {
            order_distance_bps: dec!(20),
            cancel_distance_bps: dec!(10),
            rebalance_distance_bps: dec!(40),
            order_size: dec!(0.001),
            max_position: dec!(0.01),
            volatility_window_secs: 5,
            volatility_threshold_bps: dec!(5),
            ..Default::default()
        }
    }

    fn tick(ts: u64, px: Decimal) -> PriceSample {
        PriceSample::new(ts, Price::new(px))
    }

    /// Two calm ticks at `px`, returning the placements from the second.
    fn warm_up(engine: &mut QuoteEngine, px: Decimal) -> Vec<OrderAction> {
        assert!(engine.on_price_tick(tick(1_000, px)).is_empty());
        engine.on_price_tick(tick(2_000, px))
    }

    fn ack_all(engine: &mut QuoteEngine, actions: &[OrderAction]) {
        for (i, action) in actions.iter().enumerate() {
            if let OrderAction::Place {
                side, client_id, ..
            } = action
            {
                engine.on_order_event(OrderEvent::PlaceAcked {
                    side: *side,
                    client_id: client_id.clone(),
                    order_id: OrderId::new(format!("ord-{}", i + 1)),
                });
            }
        }
    }

    fn resting_engine(config: MakerConfig) -> QuoteEngine {
        let mut engine = QuoteEngine::new(config);
        let actions = warm_up(&mut engine, dec!(50000));
        ack_all(&mut engine, &actions);
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
        assert_eq!(engine.state(Side::Ask), LifecycleState::Resting);
        engine
    }

    fn order_id(engine: &QuoteEngine, side: Side) -> OrderId {
        engine
            .order(side)
            .and_then(|o| o.order_id.clone())
            .expect("side has an order id")
    }

    #[test]
    fn test_initial_quotes_after_calm_window() {
        let mut engine = QuoteEngine::new(test_config());
        let actions = warm_up(&mut engine, dec!(50000));

        assert_eq!(actions.len(), 2);
        match &actions[0] {
            OrderAction::Place { side, price, size, .. } => {
                assert_eq!(*side, Side::Bid);
                assert_eq!(price.inner(), dec!(49900));
                assert_eq!(size.inner(), dec!(0.001));
            }
            other => panic!("Expected bid placement, got {:?}", other),
        }
        match &actions[1] {
            OrderAction::Place { side, price, .. } => {
                assert_eq!(*side, Side::Ask);
                assert_eq!(price.inner(), dec!(50100));
            }
            other => panic!("Expected ask placement, got {:?}", other),
        }
        assert_eq!(engine.state(Side::Bid), LifecycleState::Placing);
        assert_eq!(engine.state(Side::Ask), LifecycleState::Placing);

        ack_all(&mut engine, &actions);
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
        assert_eq!(engine.state(Side::Ask), LifecycleState::Resting);
    }

    #[test]
    fn test_repeated_ticks_are_idempotent() {
        let mut engine = QuoteEngine::new(test_config());
        let actions = warm_up(&mut engine, dec!(50000));
        assert_eq!(actions.len(), 2);

        // Pending placements: no new actions
        assert!(engine.on_price_tick(tick(2_000, dec!(50000))).is_empty());
        assert!(engine.on_price_tick(tick(2_100, dec!(50000))).is_empty());

        ack_all(&mut engine, &actions);
        // Resting within band: still nothing
        for ts in [2_200, 2_300, 2_400] {
            assert!(engine.on_price_tick(tick(ts, dec!(50000))).is_empty());
        }
    }

    #[test]
    fn test_not_calm_blocks_placement() {
        let mut engine = QuoteEngine::new(test_config());
        engine.on_price_tick(tick(1_000, dec!(50000)));
        // 100 / 50100 ≈ 20 bps range > 5
        let actions = engine.on_price_tick(tick(2_000, dec!(50100)));
        assert!(actions.is_empty());
        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);
        assert_eq!(engine.state(Side::Ask), LifecycleState::Absent);

        // Calm again once the spike leaves the window
        let actions = engine.on_price_tick(tick(6_500, dec!(50100)));
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_guard_denial_blocks_side() {
        let config = MakerConfig {
            max_position: dec!(0.001),
            ..test_config()
        };
        let mut engine = QuoteEngine::new(config);
        engine.sync_position(dec!(0.001));

        let actions = warm_up(&mut engine, dec!(50000));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].side(), Side::Ask);
        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);
    }

    #[test]
    fn test_approach_cancels_bid_only() {
        let mut engine = resting_engine(test_config());
        let bid_id = order_id(&engine, Side::Bid);

        // Bid: 45 / 49945 ≈ 9.01 bps ≤ 10. Ask: 155 / 49945 ≈ 31 bps < 40.
        let actions = engine.on_price_tick(tick(3_000, dec!(49945)));
        assert_eq!(
            actions,
            vec![OrderAction::Cancel {
                side: Side::Bid,
                order_id: bid_id.clone()
            }]
        );
        assert_eq!(engine.state(Side::Bid), LifecycleState::Cancelling);
        assert_eq!(engine.state(Side::Ask), LifecycleState::Resting);

        // Further ticks while cancelling are no-ops for the bid
        assert!(engine.on_price_tick(tick(3_100, dec!(49944))).is_empty());

        engine.on_order_event(OrderEvent::CancelAcked {
            side: Side::Bid,
            order_id: bid_id,
        });
        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);
        assert_eq!(engine.state(Side::Ask), LifecycleState::Resting);
    }

    #[test]
    fn test_mark_just_outside_cancel_band_holds() {
        let mut engine = resting_engine(test_config());
        // 55 / 49955 ≈ 11 bps > 10
        assert!(engine.on_price_tick(tick(3_000, dec!(49955))).is_empty());
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
    }

    #[test]
    fn test_cancel_and_rebalance_thresholds() {
        let config = MakerConfig {
            order_distance_bps: dec!(20),
            cancel_distance_bps: dec!(10),
            rebalance_distance_bps: dec!(30),
            volatility_threshold_bps: dec!(100),
            ..test_config()
        };

        // Approach: ask 100.20 vs mark 100.10 → ≈ 9.99 bps
        let mut engine = QuoteEngine::new(config.clone());
        let actions = warm_up(&mut engine, dec!(100));
        ack_all(&mut engine, &actions);
        assert_eq!(engine.order(Side::Ask).map(|o| o.target_price.inner()), Some(dec!(100.20)));

        assert!(engine.on_price_tick(tick(3_000, dec!(100.05))).is_empty());
        let actions = engine.on_price_tick(tick(4_000, dec!(100.10)));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].side(), Side::Ask);

        // Depart: ask 100.20 vs mark 99.90 → ≈ 30.03 bps
        let mut engine = QuoteEngine::new(config);
        let actions = warm_up(&mut engine, dec!(100));
        ack_all(&mut engine, &actions);
        let actions = engine.on_price_tick(tick(3_000, dec!(99.90)));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].side(), Side::Ask);
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
    }

    #[test]
    fn test_fill_at_cap_denies_bid_permits_ask() {
        let config = MakerConfig {
            max_position: dec!(0.001),
            ..test_config()
        };
        let mut engine = resting_engine(config);
        let bid_id = order_id(&engine, Side::Bid);
        let ask_id = order_id(&engine, Side::Ask);

        engine.on_order_event(OrderEvent::Filled {
            order_id: bid_id,
            side: Side::Bid,
            price: Price::new(dec!(49900)),
            size: Size::new(dec!(0.001)),
            leaves: Size::ZERO,
        });
        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);
        assert_eq!(engine.guard().net_size(), dec!(0.001));

        // Bid stays absent at the cap
        assert!(engine.on_price_tick(tick(3_000, dec!(50000))).is_empty());
        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);

        // Ask is still allowed to be re-placed
        engine.on_order_event(OrderEvent::Cancelled { order_id: ask_id });
        let actions = engine.on_price_tick(tick(3_100, dec!(50000)));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].side(), Side::Ask);
    }

    #[test]
    fn test_partial_fill_keeps_resting() {
        let mut engine = resting_engine(test_config());
        let ask_id = order_id(&engine, Side::Ask);

        engine.on_order_event(OrderEvent::Filled {
            order_id: ask_id.clone(),
            side: Side::Ask,
            price: Price::new(dec!(50100)),
            size: Size::new(dec!(0.0004)),
            leaves: Size::new(dec!(0.0006)),
        });
        assert_eq!(engine.state(Side::Ask), LifecycleState::Resting);
        assert_eq!(engine.guard().net_size(), dec!(-0.0004));
        assert_eq!(engine.order(Side::Ask).map(|o| o.filled.inner()), Some(dec!(0.0004)));

        engine.on_order_event(OrderEvent::Filled {
            order_id: ask_id,
            side: Side::Ask,
            price: Price::new(dec!(50100)),
            size: Size::new(dec!(0.0006)),
            leaves: Size::ZERO,
        });
        assert_eq!(engine.state(Side::Ask), LifecycleState::Absent);
        assert_eq!(engine.guard().net_size(), dec!(-0.001));
    }

    #[test]
    fn test_place_failure_returns_to_absent() {
        let mut engine = QuoteEngine::new(test_config());
        let actions = warm_up(&mut engine, dec!(50000));

        if let OrderAction::Place { side, client_id, .. } = &actions[0] {
            engine.on_order_event(OrderEvent::PlaceFailed {
                side: *side,
                client_id: client_id.clone(),
                kind: FailureKind::Rejected,
                detail: "post-only would cross".to_string(),
            });
        }
        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);
        assert_eq!(engine.state(Side::Ask), LifecycleState::Placing);

        // Next tick re-places the bid only
        let actions = engine.on_price_tick(tick(2_500, dec!(50000)));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].side(), Side::Bid);
    }

    #[test]
    fn test_transient_cancel_failure_retried_on_next_tick() {
        let mut engine = resting_engine(test_config());
        let bid_id = order_id(&engine, Side::Bid);

        engine.on_price_tick(tick(3_000, dec!(49945)));
        let retry = engine.on_order_event(OrderEvent::CancelFailed {
            side: Side::Bid,
            order_id: bid_id.clone(),
            kind: FailureKind::Transient,
            detail: "timeout".to_string(),
        });
        assert!(retry.is_empty());
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);

        let actions = engine.on_price_tick(tick(3_100, dec!(49945)));
        assert_eq!(
            actions,
            vec![OrderAction::Cancel {
                side: Side::Bid,
                order_id: bid_id
            }]
        );
        assert_eq!(engine.order(Side::Bid).map(|o| o.cancel_attempts), Some(2));
    }

    #[test]
    fn test_unknown_order_on_cancel_is_gone() {
        let mut engine = resting_engine(test_config());
        let bid_id = order_id(&engine, Side::Bid);

        engine.on_price_tick(tick(3_000, dec!(49945)));
        engine.on_order_event(OrderEvent::CancelFailed {
            side: Side::Bid,
            order_id: bid_id,
            kind: FailureKind::UnknownOrder,
            detail: "order not found".to_string(),
        });
        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);
    }

    #[test]
    fn test_late_events_for_unowned_orders_ignored() {
        let mut engine = resting_engine(test_config());
        let bid_id = order_id(&engine, Side::Bid);

        engine.on_order_event(OrderEvent::CancelAcked {
            side: Side::Bid,
            order_id: OrderId::from("stale-1"),
        });
        engine.on_order_event(OrderEvent::Cancelled {
            order_id: OrderId::from("stale-2"),
        });
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
        assert_eq!(order_id(&engine, Side::Bid), bid_id);

        // Fills for unowned ids still move the position
        engine.on_order_event(OrderEvent::Filled {
            order_id: OrderId::from("stale-3"),
            side: Side::Bid,
            price: Price::new(dec!(49900)),
            size: Size::new(dec!(0.001)),
            leaves: Size::ZERO,
        });
        assert_eq!(engine.guard().net_size(), dec!(0.001));
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
    }

    #[test]
    fn test_out_of_order_tick_skipped() {
        let mut engine = resting_engine(test_config());
        // Would cancel the bid if evaluated
        assert!(engine.on_price_tick(tick(1_500, dec!(49945))).is_empty());
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
    }

    #[test]
    fn test_fill_before_ack() {
        let mut engine = QuoteEngine::new(test_config());
        let actions = warm_up(&mut engine, dec!(50000));

        let (side, client_id) = match &actions[0] {
            OrderAction::Place { side, client_id, .. } => (*side, client_id.clone()),
            other => panic!("Expected placement, got {:?}", other),
        };
        engine.on_order_event(OrderEvent::Filled {
            order_id: OrderId::from("ord-9"),
            side,
            price: Price::new(dec!(49900)),
            size: Size::new(dec!(0.001)),
            leaves: Size::ZERO,
        });
        engine.on_order_event(OrderEvent::PlaceAcked {
            side,
            client_id,
            order_id: OrderId::from("ord-9"),
        });

        assert_eq!(engine.state(Side::Bid), LifecycleState::Absent);
        assert_eq!(engine.guard().net_size(), dec!(0.001));
    }

    #[test]
    fn test_unmatched_ack_is_cancelled() {
        let mut engine = QuoteEngine::new(test_config());
        let actions = engine.on_order_event(OrderEvent::PlaceAcked {
            side: Side::Ask,
            client_id: ClientOrderId::new(Side::Ask),
            order_id: OrderId::from("ghost"),
        });
        assert_eq!(
            actions,
            vec![OrderAction::Cancel {
                side: Side::Ask,
                order_id: OrderId::from("ghost")
            }]
        );
        assert_eq!(engine.state(Side::Ask), LifecycleState::Absent);
        assert_eq!(engine.live_order_ids(), vec![OrderId::from("ghost")]);

        engine.on_order_event(OrderEvent::CancelAcked {
            side: Side::Ask,
            order_id: OrderId::from("ghost"),
        });
        assert!(engine.live_order_ids().is_empty());
    }

    #[test]
    fn test_shutdown_cancels_both_and_waits() {
        let mut engine = resting_engine(test_config());
        let bid_id = order_id(&engine, Side::Bid);
        let ask_id = order_id(&engine, Side::Ask);

        let actions = engine.shutdown();
        assert_eq!(actions.len(), 2);
        assert!(!engine.is_flat());

        // No placements after shutdown
        assert!(engine.on_price_tick(tick(3_000, dec!(50000))).is_empty());

        engine.on_order_event(OrderEvent::CancelAcked {
            side: Side::Bid,
            order_id: bid_id,
        });
        assert!(!engine.is_flat());
        engine.on_order_event(OrderEvent::CancelAcked {
            side: Side::Ask,
            order_id: ask_id,
        });
        assert!(engine.is_flat());
    }

    #[test]
    fn test_shutdown_cancels_placing_on_ack() {
        let mut engine = QuoteEngine::new(test_config());
        let actions = warm_up(&mut engine, dec!(50000));

        assert!(engine.shutdown().is_empty());

        if let OrderAction::Place { side, client_id, .. } = &actions[0] {
            let follow = engine.on_order_event(OrderEvent::PlaceAcked {
                side: *side,
                client_id: client_id.clone(),
                order_id: OrderId::from("ord-1"),
            });
            assert_eq!(
                follow,
                vec![OrderAction::Cancel {
                    side: Side::Bid,
                    order_id: OrderId::from("ord-1")
                }]
            );
        }
        assert_eq!(engine.state(Side::Bid), LifecycleState::Cancelling);
    }

    #[test]
    fn test_shutdown_cancel_retry_is_bounded() {
        let mut engine = resting_engine(test_config()).with_shutdown_cancel_attempts(2);
        let bid_id = order_id(&engine, Side::Bid);
        engine.shutdown();

        let failed = || OrderEvent::CancelFailed {
            side: Side::Bid,
            order_id: bid_id.clone(),
            kind: FailureKind::Transient,
            detail: "timeout".to_string(),
        };

        assert_eq!(engine.on_order_event(failed()).len(), 1);
        assert!(engine.on_order_event(failed()).is_empty());
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
    }

    #[test]
    fn test_adopt_and_transitions() {
        let mut engine = QuoteEngine::new(test_config());
        assert!(engine.adopt(
            Side::Bid,
            OrderId::from("venue-1"),
            Price::new(dec!(49900)),
            Size::new(dec!(0.001))
        ));
        assert!(!engine.adopt(
            Side::Bid,
            OrderId::from("venue-2"),
            Price::new(dec!(49800)),
            Size::new(dec!(0.001))
        ));
        assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);

        let transitions = engine.drain_transitions();
        assert_eq!(
            transitions,
            vec![Transition {
                side: Side::Bid,
                from: LifecycleState::Absent,
                to: LifecycleState::Resting
            }]
        );
        assert!(engine.drain_transitions().is_empty());
    }

    #[test]
    fn test_late_cancel_notifications_do_not_accumulate() {
        let config = MakerConfig {
            rebalance_distance_bps: dec!(10000),
            volatility_threshold_bps: dec!(1000),
            ..test_config()
        };
        let mut engine = resting_engine(config);
        let mut ts = 3_000;

        for i in 0..100 {
            let old_id = order_id(&engine, Side::Bid);
            let target = engine
                .order(Side::Bid)
                .map(|o| o.target_price.inner())
                .expect("bid resting");
            // ≈ 9 bps above the bid
            let mark = (target * dec!(1.0009)).round_dp(2);

            ts += 1_000;
            let actions = engine.on_price_tick(tick(ts, mark));
            assert_eq!(
                actions,
                vec![OrderAction::Cancel {
                    side: Side::Bid,
                    order_id: old_id.clone()
                }]
            );
            engine.on_order_event(OrderEvent::CancelAcked {
                side: Side::Bid,
                order_id: old_id.clone(),
            });

            ts += 1_000;
            let actions = engine.on_price_tick(tick(ts, mark));
            let client_id = match actions.as_slice() {
                [OrderAction::Place {
                    side: Side::Bid,
                    client_id,
                    ..
                }] => client_id.clone(),
                other => panic!("Expected bid placement, got {:?}", other),
            };

            // Venue notification for the cancel we asked for, while the bid is placing
            engine.on_order_event(OrderEvent::Cancelled { order_id: old_id });
            engine.on_order_event(OrderEvent::PlaceAcked {
                side: Side::Bid,
                client_id,
                order_id: OrderId::new(format!("bid-{}", i)),
            });
            assert_eq!(engine.state(Side::Bid), LifecycleState::Resting);
        }

        assert_eq!(engine.early_terminal.len(), 0);
        assert!(engine.retired.len() <= RETIRED_ID_CAPACITY);
    }

    #[test]
    fn test_unmatched_removals_are_bounded() {
        let mut engine = QuoteEngine::new(test_config());
        assert_eq!(warm_up(&mut engine, dec!(50000)).len(), 2);

        for i in 0..1_000 {
            engine.on_order_event(OrderEvent::Cancelled {
                order_id: OrderId::new(format!("foreign-{}", i)),
            });
        }
        assert_eq!(engine.early_terminal.len(), EARLY_TERMINAL_CAPACITY);
    }

    #[test]
    fn test_recent_ids_forget_oldest() {
        let mut ids = RecentIds::new(2);
        ids.insert(OrderId::from("a"));
        ids.insert(OrderId::from("b"));
        ids.insert(OrderId::from("a"));
        ids.insert(OrderId::from("c"));

        assert!(!ids.contains(&OrderId::from("a")));
        assert!(ids.contains(&OrderId::from("b")));
        assert!(ids.contains(&OrderId::from("c")));

        assert!(ids.remove(&OrderId::from("b")));
        assert!(!ids.remove(&OrderId::from("b")));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_force_flat_cancels_quotes_and_closes() {
        let mut engine = resting_engine(test_config());
        engine.sync_position(dec!(0.002));
        let bid_id = order_id(&engine, Side::Bid);
        let ask_id = order_id(&engine, Side::Ask);

        let actions = engine.force_flat(dec!(0.002));
        assert_eq!(
            actions,
            vec![
                OrderAction::Cancel {
                    side: Side::Bid,
                    order_id: bid_id.clone()
                },
                OrderAction::Cancel {
                    side: Side::Ask,
                    order_id: ask_id.clone()
                },
                OrderAction::Close {
                    side: Side::Ask,
                    size: Size::new(dec!(0.002))
                },
            ]
        );
        assert!(engine.is_flattening());

        engine.on_order_event(OrderEvent::CancelAcked {
            side: Side::Bid,
            order_id: bid_id,
        });
        engine.on_order_event(OrderEvent::CancelAcked {
            side: Side::Ask,
            order_id: ask_id,
        });

        // Nothing placed and no second close while the first is in flight
        assert!(engine.on_price_tick(tick(3_000, dec!(50000))).is_empty());
        assert!(engine.force_flat(dec!(0.002)).is_empty());

        engine.on_order_event(OrderEvent::CloseAcked {
            side: Side::Ask,
            order_id: OrderId::from("close-1"),
        });
        assert!(!engine.is_flattening());
        assert_eq!(engine.on_price_tick(tick(3_100, dec!(50000))).len(), 2);

        // Close fill lands while both sides are placing
        engine.on_order_event(OrderEvent::Filled {
            order_id: OrderId::from("close-1"),
            side: Side::Ask,
            price: Price::new(dec!(50000)),
            size: Size::new(dec!(0.002)),
            leaves: Size::ZERO,
        });
        assert!(engine.guard().net_size().is_zero());
        assert_eq!(engine.early_terminal.len(), 0);
    }

    #[test]
    fn test_force_flat_short_and_flat_positions() {
        let mut engine = QuoteEngine::new(test_config());
        assert!(engine.force_flat(Decimal::ZERO).is_empty());
        assert!(!engine.is_flattening());

        let actions = engine.force_flat(dec!(-0.003));
        assert_eq!(
            actions,
            vec![OrderAction::Close {
                side: Side::Bid,
                size: Size::new(dec!(0.003))
            }]
        );

        engine.on_order_event(OrderEvent::CloseFailed {
            side: Side::Bid,
            kind: FailureKind::Rejected,
            detail: "reduce-only".to_string(),
        });
        assert!(!engine.is_flattening());
        assert_eq!(engine.force_flat(dec!(-0.003)).len(), 1);
    }

    #[test]
    fn test_reevaluate_uses_last_sample() {
        let mut engine = resting_engine(test_config());
        let bid_id = order_id(&engine, Side::Bid);

        engine.on_price_tick(tick(3_000, dec!(49945)));
        engine.on_order_event(OrderEvent::CancelFailed {
            side: Side::Bid,
            order_id: bid_id.clone(),
            kind: FailureKind::Transient,
            detail: "rate limited".to_string(),
        });

        let actions = engine.reevaluate(8_000);
        assert_eq!(
            actions,
            vec![OrderAction::Cancel {
                side: Side::Bid,
                order_id: bid_id
            }]
        );
    }
}
