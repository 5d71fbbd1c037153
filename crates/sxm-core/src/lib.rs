//! Core domain types for the sxm maker bot.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Side`: Quote side (bid / ask)
//! - `OrderId`, `ClientOrderId`: Venue and client order identifiers
//! - `PriceSample`: Timestamped mark price observation
//! - `OrderEvent`: Order-state changes reported back by the venue

pub mod decimal;
pub mod error;
pub mod event;
pub mod order;
pub mod sample;

pub use decimal::{Price, Size, BPS_DIVISOR};
pub use error::{CoreError, Result};
pub use event::{FailureKind, OrderEvent};
pub use order::{ClientOrderId, OrderId, Side};
pub use sample::PriceSample;
