//! Price channel message parsing.
//!
//! Expected shape:
//!
//! ```json
//! {"channel":"price","symbol":"BTC-USD","data":{"mark_price":"50000.1","time":"2025-01-01T00:00:00Z"}}
//! ```
//!
//! `mark_price` may be a string or a number. `time` may be an RFC3339
//! string or Unix milliseconds; when absent the receive time is used.
//! Messages on other channels are ignored.

use std::str::FromStr;

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use sxm_core::{Price, PriceSample};

use crate::error::{FeedError, FeedResult};

const PRICE_CHANNEL: &str = "price";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    mark_price: NumOrStr,
    #[serde(default)]
    time: Option<TimeField>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Str(String),
    Num(serde_json::Number),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeField {
    Millis(u64),
    Text(String),
}

/// Build the subscription request for `symbol`.
pub fn subscribe_message(symbol: &str) -> String {
    serde_json::json!({
        "subscribe": { "channel": PRICE_CHANNEL, "symbol": symbol }
    })
    .to_string()
}

/// Parse one text frame.
///
/// Returns `Ok(None)` for frames that are not price updates for `symbol`.
pub fn parse_price_message(
    text: &str,
    symbol: &str,
    received_at_ms: u64,
) -> FeedResult<Option<PriceSample>> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        // Non-object frames (acks, plain text pings) are not price updates
        Err(_) if !text.trim_start().starts_with('{') => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if envelope.channel.as_deref() != Some(PRICE_CHANNEL) {
        return Ok(None);
    }
    let data: PriceData = match envelope.data {
        Some(value) => serde_json::from_value(value)?,
        None => return Ok(None),
    };

    let msg_symbol = data.symbol.as_deref().or(envelope.symbol.as_deref());
    if let Some(s) = msg_symbol {
        if s != symbol {
            return Ok(None);
        }
    }

    let mark = match &data.mark_price {
        NumOrStr::Str(s) => Decimal::from_str(s.trim()),
        NumOrStr::Num(n) => Decimal::from_str(&n.to_string()),
    }
    .map_err(|e| FeedError::ParseError(format!("mark_price: {e}")))?;

    if mark <= Decimal::ZERO {
        return Err(FeedError::ParseError(format!(
            "non-positive mark_price {mark}"
        )));
    }

    let timestamp_ms = match data.time {
        Some(TimeField::Millis(ms)) => ms,
        Some(TimeField::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.timestamp_millis().max(0) as u64)
            .map_err(|e| FeedError::ParseError(format!("time {s:?}: {e}")))?,
        None => received_at_ms,
    };

    Ok(Some(PriceSample::new(timestamp_ms, Price::new(mark))))
}
