//! Sliding-window volatility gate.
//!
//! Keeps the mark prices observed in the last `window_ms` and reports the
//! market as calm when `(max - min) / latest × 10000` stays within the
//! configured threshold.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use sxm_core::{PriceSample, BPS_DIVISOR};
use tracing::trace;

/// Volatility gate over a time-bounded window of samples.
#[derive(Debug)]
pub struct VolatilityGate {
    /// Samples ordered by timestamp (oldest at front).
    samples: VecDeque<PriceSample>,
    /// Window length in milliseconds.
    window_ms: u64,
    /// Calm threshold in bps.
    threshold_bps: Decimal,
}

impl VolatilityGate {
    pub fn new(window_ms: u64, threshold_bps: Decimal) -> Self {
        Self {
            samples: VecDeque::new(),
            window_ms,
            threshold_bps,
        }
    }

    /// Record a sample and evict everything older than the window.
    ///
    /// Returns `false` and leaves the window untouched when the sample is
    /// older than the newest one already recorded.
    pub fn observe(&mut self, sample: PriceSample) -> bool {
        if let Some(newest) = self.samples.back() {
            if sample.timestamp_ms < newest.timestamp_ms {
                trace!(
                    ts = sample.timestamp_ms,
                    newest = newest.timestamp_ms,
                    "Dropping out-of-order sample"
                );
                return false;
            }
        }
        self.samples.push_back(sample);
        self.evict(sample.timestamp_ms);
        true
    }

    /// Evict samples that fell out of the window as of `now_ms`.
    ///
    /// Used when no tick has arrived for a while.
    pub fn advance(&mut self, now_ms: u64) {
        self.evict(now_ms);
    }

    fn evict(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(front) = self.samples.front() {
            if front.timestamp_ms < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Price range of the window in bps of the latest price.
    ///
    /// `None` with fewer than two samples or a zero latest price.
    pub fn volatility_bps(&self) -> Option<Decimal> {
        if self.samples.len() < 2 {
            return None;
        }
        let latest = self.samples.back()?.mark_price.inner();
        if latest.is_zero() {
            return None;
        }

        let mut min = latest;
        let mut max = latest;
        for s in &self.samples {
            let p = s.mark_price.inner();
            min = min.min(p);
            max = max.max(p);
        }

        Some((max - min) / latest * BPS_DIVISOR)
    }

    /// Whether the market is calm enough to place new quotes.
    pub fn is_calm(&self) -> bool {
        match self.volatility_bps() {
            Some(bps) => bps <= self.threshold_bps,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
