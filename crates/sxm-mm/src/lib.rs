//! Quoting decision engine for the sxm maker bot.
//!
//! Keeps one bid and one ask resting near the mark price, cancels them
//! before they get close enough to fill and replaces them when the
//! market moves away.
//!
//! # Architecture
//!
//! ```text
//! PriceSample → QuoteEngine.on_price_tick()
//!                ├─ VolatilityGate: calm enough to quote?
//!                ├─ PositionGuard: side permitted by the position cap?
//!                └─ OrderAction: place / cancel per side
//!                     ↓
//!                Supervisor → ExecutionGateway
//!                     ↓
//!                OrderEvent → QuoteEngine.on_order_event()
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod pricing;
pub mod quote_engine;
pub mod volatility;

pub use config::{GuardMode, MakerConfig};
pub use error::{MakerError, MakerResult};
pub use guard::PositionGuard;
pub use pricing::{distance_bps, target_price};
pub use quote_engine::{LifecycleState, OrderAction, QuoteEngine, QuoteOrder, Transition};
pub use volatility::VolatilityGate;
