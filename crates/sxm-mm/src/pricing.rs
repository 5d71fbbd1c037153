//! Quote price calculation.
//!
//! Target prices sit `order_distance_bps` away from the mark: below it for
//! bids, above it for asks. Tick alignment always rounds away from the mark.

use rust_decimal::Decimal;

use sxm_core::{Price, Side, BPS_DIVISOR};

use crate::config::MakerConfig;

/// Upper bound for `order_distance_bps` (a bid at 100% below the mark is zero).
pub const MAX_DISTANCE_BPS: Decimal = BPS_DIVISOR;

/// Compute the target price of a new quote.
///
/// # Arguments
/// * `mark` - Current mark price
/// * `side` - Quote side
/// * `config` - Maker configuration (distance and optional tick size)
pub fn target_price(mark: Price, side: Side, config: &MakerConfig) -> Price {
    let offset = config.order_distance_bps / BPS_DIVISOR;
    let raw = match side {
        Side::Bid => mark * (Decimal::ONE - offset),
        Side::Ask => mark * (Decimal::ONE + offset),
    };

    match (config.tick_size, side) {
        (Some(tick), Side::Bid) => raw.floor_to_tick(tick),
        (Some(tick), Side::Ask) => raw.ceil_to_tick(tick),
        (None, _) => raw,
    }
}

/// Distance between a quote and the mark, in bps of the mark.
///
/// `None` when the mark is zero.
pub fn distance_bps(target: Price, mark: Price) -> Option<Decimal> {
    target.distance_bps(mark)
}
