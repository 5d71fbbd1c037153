//! Maker quoting configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{MakerError, MakerResult};

/// How the position guard reacts once the cap is exceeded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// Once |net| exceeds max_position, deny both sides.
    #[default]
    HaltBoth,
    /// Only apply the per-side cap formulas.
    Asymmetric,
}

/// Maker quoting configuration.
///
/// Loaded once at startup and never mutated. `validate` must pass before
/// the engine is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerConfig {
    /// Distance of a new quote from the mark in basis points.
    #[serde(default = "default_order_distance_bps")]
    pub order_distance_bps: Decimal,

    /// A resting quote this close to the mark (bps) is cancelled before it can fill.
    #[serde(default = "default_cancel_distance_bps")]
    pub cancel_distance_bps: Decimal,

    /// A resting quote this far from the mark (bps) is cancelled and re-placed.
    #[serde(default = "default_rebalance_distance_bps")]
    pub rebalance_distance_bps: Decimal,

    /// Size of every quote in base units.
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,

    /// Absolute cap on net position in base units.
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,

    /// Length of the volatility window in seconds.
    #[serde(default = "default_volatility_window_secs")]
    pub volatility_window_secs: u64,

    /// Maximum price range (bps of latest) inside the window to count as calm.
    #[serde(default = "default_volatility_threshold_bps")]
    pub volatility_threshold_bps: Decimal,

    /// Price increment of the instrument. Unset = no alignment.
    #[serde(default)]
    pub tick_size: Option<Decimal>,

    /// Guard behaviour past the position cap.
    #[serde(default)]
    pub guard_mode: GuardMode,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            order_distance_bps: default_order_distance_bps(),
            cancel_distance_bps: default_cancel_distance_bps(),
            rebalance_distance_bps: default_rebalance_distance_bps(),
            order_size: default_order_size(),
            max_position: default_max_position(),
            volatility_window_secs: default_volatility_window_secs(),
            volatility_threshold_bps: default_volatility_threshold_bps(),
            tick_size: None,
            guard_mode: GuardMode::default(),
        }
    }
}

impl MakerConfig {
    /// Volatility window in milliseconds.
    pub fn volatility_window_ms(&self) -> u64 {
        self.volatility_window_secs.saturating_mul(1000)
    }

    /// Check the startup invariants.
    ///
    /// `cancel_distance_bps < order_distance_bps < rebalance_distance_bps`,
    /// positive sizes, a non-empty window and a non-negative threshold.
    pub fn validate(&self) -> MakerResult<()> {
        if self.cancel_distance_bps.is_sign_negative() {
            return Err(MakerError::ConfigInvariant(format!(
                "cancel_distance_bps must be >= 0 (got {})",
                self.cancel_distance_bps
            )));
        }
        if self.cancel_distance_bps >= self.order_distance_bps {
            return Err(MakerError::ConfigInvariant(format!(
                "cancel_distance_bps ({}) must be < order_distance_bps ({})",
                self.cancel_distance_bps, self.order_distance_bps
            )));
        }
        if self.order_distance_bps >= self.rebalance_distance_bps {
            return Err(MakerError::ConfigInvariant(format!(
                "order_distance_bps ({}) must be < rebalance_distance_bps ({})",
                self.order_distance_bps, self.rebalance_distance_bps
            )));
        }
        if self.order_distance_bps >= crate::pricing::MAX_DISTANCE_BPS {
            return Err(MakerError::ConfigInvariant(format!(
                "order_distance_bps ({}) must be < 10000",
                self.order_distance_bps
            )));
        }
        if !is_positive(self.order_size) {
            return Err(MakerError::ConfigInvariant(format!(
                "order_size must be > 0 (got {})",
                self.order_size
            )));
        }
        if !is_positive(self.max_position) {
            return Err(MakerError::ConfigInvariant(format!(
                "max_position must be > 0 (got {})",
                self.max_position
            )));
        }
        if self.volatility_window_secs == 0 {
            return Err(MakerError::ConfigInvariant(
                "volatility_window_secs must be > 0".to_string(),
            ));
        }
        if self.volatility_threshold_bps.is_sign_negative() {
            return Err(MakerError::ConfigInvariant(format!(
                "volatility_threshold_bps must be >= 0 (got {})",
                self.volatility_threshold_bps
            )));
        }
        if let Some(tick) = self.tick_size {
            if !is_positive(tick) {
                return Err(MakerError::ConfigInvariant(format!(
                    "tick_size must be > 0 when set (got {})",
                    tick
                )));
            }
        }
        Ok(())
    }
}

fn is_positive(value: Decimal) -> bool {
    value.is_sign_positive() && !value.is_zero()
}

fn default_order_distance_bps() -> Decimal {
    Decimal::from(10)
}
fn default_cancel_distance_bps() -> Decimal {
    Decimal::from(5)
}
fn default_rebalance_distance_bps() -> Decimal {
    Decimal::from(20)
}
fn default_order_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}
fn default_max_position() -> Decimal {
    Decimal::new(1, 2) // 0.01
}
fn default_volatility_window_secs() -> u64 {
    5
}
fn default_volatility_threshold_bps() -> Decimal {
    Decimal::from(5)
}
