//! Order-state changes reported back to the quoting engine.
//!
//! Two families of events exist:
//! - request outcomes (`PlaceAcked`, `PlaceFailed`, `CancelAcked`, `CancelFailed`,
//!   `CloseAcked`, `CloseFailed`), produced by whoever executed the call;
//! - venue notifications (`Filled`, `Cancelled`, `Rejected`), which may arrive
//!   at any time and are keyed by the venue order id only.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ClientOrderId, OrderId, Price, Side, Size};

/// Classification of a failed order-management call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, rate limit or transport error. Outcome at the venue is unknown.
    Transient,
    /// The venue refused the request.
    Rejected,
    /// The venue does not know the order (already filled or cancelled).
    UnknownOrder,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Rejected => "rejected",
            Self::UnknownOrder => "unknown_order",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event fed into `QuoteEngine::on_order_event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    /// Placement accepted; the venue assigned `order_id`.
    PlaceAcked {
        side: Side,
        client_id: ClientOrderId,
        order_id: OrderId,
    },
    /// Placement failed before any order id was assigned.
    PlaceFailed {
        side: Side,
        client_id: ClientOrderId,
        kind: FailureKind,
        detail: String,
    },
    /// Cancel request confirmed by the venue.
    CancelAcked { side: Side, order_id: OrderId },
    /// Cancel request failed.
    CancelFailed {
        side: Side,
        order_id: OrderId,
        kind: FailureKind,
        detail: String,
    },
    /// Execution against one of our orders. `leaves` is the remaining open size.
    Filled {
        order_id: OrderId,
        side: Side,
        price: Price,
        size: Size,
        leaves: Size,
    },
    /// Order removed by the venue without a request from us.
    Cancelled { order_id: OrderId },
    /// Order rejected by the venue after it was acknowledged.
    Rejected { order_id: OrderId, reason: String },
    /// Reduce-only close accepted. Its executions arrive as `Filled`.
    CloseAcked { side: Side, order_id: OrderId },
    /// Reduce-only close failed.
    CloseFailed {
        side: Side,
        kind: FailureKind,
        detail: String,
    },
}

impl OrderEvent {
    /// Venue order id the event refers to, if any.
    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::PlaceAcked { order_id, .. }
            | Self::CancelAcked { order_id, .. }
            | Self::CancelFailed { order_id, .. }
            | Self::Filled { order_id, .. }
            | Self::Cancelled { order_id }
            | Self::Rejected { order_id, .. }
            | Self::CloseAcked { order_id, .. } => Some(order_id),
            Self::PlaceFailed { .. } | Self::CloseFailed { .. } => None,
        }
    }

    /// Short name used as a log / metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlaceAcked { .. } => "place_acked",
            Self::PlaceFailed { .. } => "place_failed",
            Self::CancelAcked { .. } => "cancel_acked",
            Self::CancelFailed { .. } => "cancel_failed",
            Self::Filled { .. } => "filled",
            Self::Cancelled { .. } => "cancelled",
            Self::Rejected { .. } => "rejected",
            Self::CloseAcked { .. } => "close_acked",
            Self::CloseFailed { .. } => "close_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_id_accessor() {
        let filled = OrderEvent::Filled {
            order_id: OrderId::from("ord-1"),
            side: Side::Bid,
            price: Price::new(dec!(49900)),
            size: Size::new(dec!(0.001)),
            leaves: Size::ZERO,
        };
        assert_eq!(filled.order_id().map(|id| id.as_str()), Some("ord-1"));

        let failed = OrderEvent::PlaceFailed {
            side: Side::Ask,
            client_id: ClientOrderId::new(Side::Ask),
            kind: FailureKind::Transient,
            detail: "timeout".to_string(),
        };
        assert!(failed.order_id().is_none());
        assert_eq!(failed.kind(), "place_failed");
    }

    #[test]
    fn test_event_serde_tagged() {
        let event = OrderEvent::Cancelled {
            order_id: OrderId::from("ord-7"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"cancelled","order_id":"ord-7"}"#);
    }
}
