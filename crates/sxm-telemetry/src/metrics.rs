//! Prometheus metrics for the sxm maker bot.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Price feed connection state (1 = connected).
pub static FEED_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("sxm_feed_connected", "Price feed connection state (1=connected)").unwrap()
});

/// Total price feed reconnection attempts.
pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sxm_feed_reconnect_total",
        "Total price feed reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Total price ticks consumed by the engine.
pub static PRICE_TICKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("sxm_price_ticks_total", "Total price ticks processed").unwrap()
});

/// Place/cancel call latency in milliseconds.
/// Labels: action (place/cancel), outcome (ok/timeout/rate_limited/...)
pub static ORDER_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sxm_order_latency_ms",
        "Order management call latency in milliseconds",
        &["action", "outcome"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Quote lifecycle transitions.
pub static TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sxm_quote_transitions_total",
        "Quote lifecycle transitions",
        &["side", "from", "to"]
    )
    .unwrap()
});

/// Venue errors by action and kind.
pub static VENUE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sxm_venue_errors_total",
        "Venue call failures",
        &["action", "kind"]
    )
    .unwrap()
});

/// Current window volatility in bps (-1 when undefined).
pub static VOLATILITY_BPS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("sxm_volatility_bps", "Price range of the volatility window in bps").unwrap()
});

/// Current net position.
pub static NET_POSITION: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("sxm_net_position", "Net position in base units").unwrap()
});

/// Position overwritten from the venue.
pub static POSITION_RESYNC_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sxm_position_resync_total",
        "Times the tracked position disagreed with the venue"
    )
    .unwrap()
});

/// Force-flat closes sent.
pub static FORCE_FLAT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sxm_force_flat_total",
        "Reduce-only closes sent by the force-flat check"
    )
    .unwrap()
});

/// Metrics helper for recording events.
pub struct Metrics;

impl Metrics {
    /// Record feed connected.
    pub fn feed_connected() {
        FEED_CONNECTED.set(1.0);
    }

    /// Record feed disconnected.
    pub fn feed_disconnected() {
        FEED_CONNECTED.set(0.0);
    }

    /// Record feed reconnection.
    pub fn feed_reconnect(reason: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn price_tick() {
        PRICE_TICKS_TOTAL.inc();
    }

    /// Record a place/cancel call and its outcome.
    pub fn order_latency(action: &str, outcome: &str, latency_ms: f64) {
        ORDER_LATENCY_MS
            .with_label_values(&[action, outcome])
            .observe(latency_ms);
    }

    pub fn transition(side: &str, from: &str, to: &str) {
        TRANSITIONS_TOTAL.with_label_values(&[side, from, to]).inc();
    }

    pub fn venue_error(action: &str, kind: &str) {
        VENUE_ERRORS_TOTAL.with_label_values(&[action, kind]).inc();
    }

    /// Set window volatility. `None` (not enough samples) is exported as -1.
    pub fn volatility(bps: Option<f64>) {
        VOLATILITY_BPS.set(bps.unwrap_or(-1.0));
    }

    pub fn net_position(net: f64) {
        NET_POSITION.set(net);
    }

    pub fn position_resync() {
        POSITION_RESYNC_TOTAL.inc();
    }

    pub fn force_flat() {
        FORCE_FLAT_TOTAL.inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
