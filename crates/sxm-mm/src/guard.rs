//! Net position tracking and the hard position cap.

use rust_decimal::Decimal;
use sxm_core::{Side, Size};
use tracing::{debug, warn};

use crate::config::GuardMode;

/// Tracks net position and decides which sides may add exposure.
///
/// Mutated only by confirmed fills (`update`) and explicit venue resyncs
/// (`sync`). Price ticks never touch it.
#[derive(Debug, Clone)]
pub struct PositionGuard {
    /// Net position (positive = long, negative = short).
    net_size: Decimal,
    /// Size a new quote would add.
    order_size: Decimal,
    /// Absolute cap on net position.
    max_position: Decimal,
    mode: GuardMode,
    /// Total number of fills processed.
    fill_count: u64,
}

impl PositionGuard {
    pub fn new(order_size: Decimal, max_position: Decimal, mode: GuardMode) -> Self {
        Self {
            net_size: Decimal::ZERO,
            order_size,
            max_position,
            mode,
            fill_count: 0,
        }
    }

    /// Apply a confirmed fill.
    pub fn update(&mut self, side: Side, size: Size) {
        let before = self.net_size;
        self.net_size += side.sign() * size.inner();
        self.fill_count += 1;

        debug!(
            side = %side,
            size = %size,
            before = %before,
            after = %self.net_size,
            "Position updated from fill"
        );

        if self.is_breached() {
            warn!(
                net = %self.net_size,
                max = %self.max_position,
                "Position cap exceeded"
            );
        }
    }

    /// Overwrite the net position with the venue's view.
    ///
    /// Returns `true` when the value changed.
    pub fn sync(&mut self, net_size: Decimal) -> bool {
        if net_size == self.net_size {
            return false;
        }
        warn!(
            tracked = %self.net_size,
            venue = %net_size,
            "Position resynced from venue"
        );
        self.net_size = net_size;
        true
    }

    /// Whether a new quote on `side` is allowed.
    ///
    /// Bid: `net + order_size <= max`. Ask: `net - order_size >= -max`.
    /// In `HaltBoth` mode both sides are denied once `|net| > max`.
    pub fn permits(&self, side: Side) -> bool {
        if self.mode == GuardMode::HaltBoth && self.is_breached() {
            return false;
        }
        match side {
            Side::Bid => self.net_size + self.order_size <= self.max_position,
            Side::Ask => self.net_size - self.order_size >= -self.max_position,
        }
    }

    /// `|net| > max_position`.
    pub fn is_breached(&self) -> bool {
        self.net_size.abs() > self.max_position
    }

    pub fn net_size(&self) -> Decimal {
        self.net_size
    }

    pub fn fill_count(&self) -> u64 {
        self.fill_count
    }

    pub fn max_position(&self) -> Decimal {
        self.max_position
    }
}
