//! Mark price observations.

use serde::{Deserialize, Serialize};

use crate::Price;

/// A single timestamped mark price observation.
///
/// Produced by the price feed and consumed by the volatility gate and
/// the quote engine. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Observation time (Unix milliseconds).
    pub timestamp_ms: u64,
    /// Mark price at that time.
    pub mark_price: Price,
}

impl PriceSample {
    pub fn new(timestamp_ms: u64, mark_price: Price) -> Self {
        Self {
            timestamp_ms,
            mark_price,
        }
    }
}
