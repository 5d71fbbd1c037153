//! Order-related types and identifiers.
//!
//! Provides the quote side and the client/venue order identifiers
//! used to correlate requests with venue notifications.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Quote side: bid (buy) or ask (sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Both sides, bid first. Evaluation order is always this one.
    pub const BOTH: [Side; 2] = [Side::Bid, Side::Ask];

    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Bid => Self::Ask,
            Self::Ask => Self::Bid,
        }
    }

    /// Returns +1 for bid, -1 for ask (for position calculations).
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Bid => Decimal::ONE,
            Self::Ask => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = CoreError;

    /// Accepts both quote naming (`bid`/`ask`) and venue naming (`buy`/`sell`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bid" | "buy" => Ok(Self::Bid),
            "ask" | "sell" => Ok(Self::Ask),
            other => Err(CoreError::InvalidSide(other.to_string())),
        }
    }
}

/// Venue-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Client order ID for request correlation.
///
/// Every placement carries a fresh id so that acknowledgements can be
/// matched to the request that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `mm-{side}-{uuid_short}`
    pub fn new(side: Side) -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(format!("mm-{}-{}", side, &simple[..8]))
    }

    /// Create from an existing string (for parsing venue responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.opposite(), Side::Bid);
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Bid.sign(), dec!(1));
        assert_eq!(Side::Ask.sign(), dec!(-1));
    }

    #[test]
    fn test_side_parse_venue_names() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Bid);
        assert_eq!("SELL".parse::<Side>().unwrap(), Side::Ask);
        assert_eq!("ask".parse::<Side>().unwrap(), Side::Ask);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_side_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Bid).unwrap(), "\"bid\"");
    }

    #[test]
    fn test_client_order_id_unique() {
        let id1 = ClientOrderId::new(Side::Bid);
        let id2 = ClientOrderId::new(Side::Bid);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_client_order_id_format() {
        let id = ClientOrderId::new(Side::Ask);
        assert!(id.as_str().starts_with("mm-ask-"));
        assert_eq!(id.as_str().len(), "mm-ask-".len() + 8);
    }
}
