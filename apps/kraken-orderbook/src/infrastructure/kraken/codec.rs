//! Kraken Codec and Message Classifier
//!
//! Decodes WebSocket text frames and classifies the JSON into one
//! [`InboundMessage`] variant by structure. Classification never fails:
//! anything that does not match a known shape is `Unrecognized`. Only text
//! that is not JSON at all is a [`CodecError`].
//!
//! # Book Payload Shape
//!
//! ```json
//! {"channel":"book","type":"snapshot","data":[{
//!   "symbol":"BTC/USD",
//!   "bids":[{"price":45283.5,"qty":0.1}],
//!   "asks":[{"price":45285.2,"qty":0.0015}],
//!   "checksum":974947235,
//!   "timestamp":"2023-10-06T17:35:55.440295Z"
//! }]}
//! ```
//!
//! Only the first element of `data` is classified. Prices and quantities
//! are read from the number's literal text, so no binary float is involved.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::messages::{DEFAULT_SUBSCRIPTION_ERROR, InboundMessage, StatusKind};
use crate::domain::book::{BookLevel, BookUpdate};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON codec for the Kraken v2 feed.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode and classify a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error only if the text is not valid JSON.
    pub fn decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(classify(&value))
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classify a decoded payload by structure.
#[must_use]
pub fn classify(value: &Value) -> InboundMessage {
    let Some(object) = value.as_object() else {
        return InboundMessage::Unrecognized;
    };

    if let Some(method) = str_field(object, "method") {
        return classify_method(method, object);
    }
    if let Some(event) = str_field(object, "event") {
        return classify_event(event, object);
    }
    if let Some(channel) = str_field(object, "channel") {
        return classify_channel(channel, object);
    }
    InboundMessage::Unrecognized
}

fn classify_method(method: &str, object: &Map<String, Value>) -> InboundMessage {
    if method != "subscribe" {
        return InboundMessage::Unrecognized;
    }

    match object.get("success").and_then(Value::as_bool) {
        Some(true) => {
            let result = object.get("result").and_then(Value::as_object);
            InboundMessage::SubscriptionAck {
                symbol: result
                    .and_then(|r| str_field(r, "symbol"))
                    .map(str::to_string),
                depth: result.and_then(|r| r.get("depth")).and_then(Value::as_u64),
            }
        }
        Some(false) => subscription_error(str_field(object, "error")),
        None => InboundMessage::Unrecognized,
    }
}

fn classify_event(event: &str, object: &Map<String, Value>) -> InboundMessage {
    match event {
        "systemStatus" => {
            str_field(object, "status").map_or(InboundMessage::Unrecognized, |status| {
                InboundMessage::ConnectionStatus(StatusKind::System {
                    status: status.to_string(),
                    version: str_field(object, "version").map(str::to_string),
                })
            })
        }
        "heartbeat" => InboundMessage::ConnectionStatus(StatusKind::Heartbeat),
        "subscriptionStatus" => match str_field(object, "status") {
            Some("subscribed") => InboundMessage::SubscriptionAck {
                symbol: str_field(object, "pair").map(str::to_string),
                depth: None,
            },
            Some("error") => subscription_error(str_field(object, "errorMessage")),
            _ => InboundMessage::Unrecognized,
        },
        _ => InboundMessage::Unrecognized,
    }
}

fn classify_channel(channel: &str, object: &Map<String, Value>) -> InboundMessage {
    match channel {
        "heartbeat" => InboundMessage::ConnectionStatus(StatusKind::Heartbeat),
        "status" => first_data(object)
            .and_then(|data| {
                str_field(data, "system").map(|status| StatusKind::System {
                    status: status.to_string(),
                    version: str_field(data, "version").map(str::to_string),
                })
            })
            .map_or(InboundMessage::Unrecognized, InboundMessage::ConnectionStatus),
        "book" => classify_book(object),
        _ => InboundMessage::Unrecognized,
    }
}

fn classify_book(object: &Map<String, Value>) -> InboundMessage {
    let Some(update) = first_data(object).and_then(parse_book_payload) else {
        return InboundMessage::Unrecognized;
    };
    match str_field(object, "type") {
        Some("snapshot") => InboundMessage::BookSnapshot(update),
        Some("update") => InboundMessage::BookDelta(update),
        _ => InboundMessage::Unrecognized,
    }
}

fn subscription_error(reason: Option<&str>) -> InboundMessage {
    InboundMessage::SubscriptionError {
        reason: reason
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_SUBSCRIPTION_ERROR)
            .to_string(),
    }
}

// =============================================================================
// Field Parsing
// =============================================================================

fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

fn first_data(object: &Map<String, Value>) -> Option<&Map<String, Value>> {
    object
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(Value::as_object)
}

fn parse_book_payload(data: &Map<String, Value>) -> Option<BookUpdate> {
    let symbol = str_field(data, "symbol")?;
    let bids = parse_levels(data.get("bids")?)?;
    let asks = parse_levels(data.get("asks")?)?;

    let checksum = match data.get("checksum") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_u64().and_then(|c| u32::try_from(c).ok())?),
    };

    let timestamp = match data.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Some(_) => return None,
    };

    Some(BookUpdate {
        symbol: symbol.to_string(),
        bids,
        asks,
        checksum,
        timestamp,
    })
}

/// Every entry must be a valid level for the array to be valid.
fn parse_levels(value: &Value) -> Option<Vec<BookLevel>> {
    value.as_array()?.iter().map(parse_level).collect()
}

fn parse_level(value: &Value) -> Option<BookLevel> {
    let entry = value.as_object()?;
    let price = parse_decimal(entry.get("price")?)?;
    let qty = parse_decimal(entry.get("qty")?)?;
    Some(BookLevel::new(price, qty))
}

/// Exact non-negative decimal from a JSON number or decimal string.
fn parse_decimal(value: &Value) -> Option<Decimal> {
    let parsed = match value {
        Value::Number(number) => decimal_from_literal(&number.to_string()),
        Value::String(text) => decimal_from_literal(text),
        _ => None,
    }?;
    (parsed >= Decimal::ZERO).then(|| parsed.normalize())
}

fn decimal_from_literal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn decode(text: &str) -> InboundMessage {
        JsonCodec::new().decode(text).unwrap()
    }

    fn d(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn book_update(text: &str) -> BookUpdate {
        match decode(text) {
            InboundMessage::BookSnapshot(update) | InboundMessage::BookDelta(update) => update,
            other => panic!("expected book message, got {other:?}"),
        }
    }

    #[test]
    fn classifies_snapshot() {
        let message = decode(
            r#"{"channel":"book","type":"snapshot","data":[{"symbol":"BTC/USD",
                "bids":[{"price":100,"qty":2},{"price":99,"qty":1}],
                "asks":[{"price":101,"qty":3}],"checksum":974947235}]}"#,
        );
        let InboundMessage::BookSnapshot(update) = message else {
            panic!("expected snapshot, got {message:?}");
        };
        assert_eq!(update.symbol, "BTC/USD");
        assert_eq!(update.bids, vec![
            BookLevel::new(d("100"), d("2")),
            BookLevel::new(d("99"), d("1")),
        ]);
        assert_eq!(update.checksum, Some(974_947_235));
        assert_eq!(update.timestamp, None);
    }

    #[test]
    fn classifies_update_with_timestamp() {
        let message = decode(
            r#"{"channel":"book","type":"update","data":[{"symbol":"ETH/USD",
                "bids":[{"price":1650.12,"qty":0}],"asks":[],
                "checksum":1,"timestamp":"2023-10-06T17:35:55.440295Z"}]}"#,
        );
        let InboundMessage::BookDelta(update) = message else {
            panic!("expected delta, got {message:?}");
        };
        assert_eq!(update.bids, vec![BookLevel::new(d("1650.12"), Decimal::ZERO)]);
        assert!(update.asks.is_empty());
        assert!(update.timestamp.is_some());
    }

    #[test]
    fn prices_keep_exact_literal() {
        let update = book_update(
            r#"{"channel":"book","type":"update","data":[{"symbol":"BTC/USD",
                "bids":[{"price":0.1,"qty":0.30000000000000004}],"asks":[]}]}"#,
        );
        assert_eq!(update.bids[0].price, d("0.1"));
        assert_eq!(update.bids[0].qty, d("0.30000000000000004"));
    }

    #[test]
    fn equivalent_price_spellings_normalize_equal() {
        let update = book_update(
            r#"{"channel":"book","type":"update","data":[{"symbol":"BTC/USD",
                "bids":[{"price":100.10,"qty":1},{"price":"100.1","qty":1},{"price":1.001e2,"qty":1}],
                "asks":[]}]}"#,
        );
        assert_eq!(update.bids[0].price, update.bids[1].price);
        assert_eq!(update.bids[1].price, update.bids[2].price);
    }

    #[test]
    fn unparseable_timestamp_is_absent() {
        let update = book_update(
            r#"{"channel":"book","type":"update","data":[{"symbol":"BTC/USD",
                "bids":[],"asks":[],"timestamp":"yesterday"}]}"#,
        );
        assert_eq!(update.timestamp, None);
    }

    #[test_case(r#"[{"price":-1,"qty":1}]"# ; "negative price")]
    #[test_case(r#"[{"price":1,"qty":-0.5}]"# ; "negative qty")]
    #[test_case(r#"[{"price":"abc","qty":1}]"# ; "non numeric string")]
    #[test_case(r#"[{"price":1}]"# ; "missing qty")]
    #[test_case(r#"[{"price":1,"qty":1},{"price":true,"qty":1}]"# ; "one bad entry")]
    #[test_case(r#"[[1,1]]"# ; "array entry")]
    #[test_case(r#"{"price":1,"qty":1}"# ; "not an array")]
    fn invalid_levels_make_message_unrecognized(bids: &str) {
        let text = format!(
            r#"{{"channel":"book","type":"snapshot","data":[{{"symbol":"BTC/USD","bids":{bids},"asks":[]}}]}}"#
        );
        assert_eq!(decode(&text), InboundMessage::Unrecognized);
    }

    #[test_case(r#"{"channel":"book","type":"snapshot","data":[]}"# ; "empty data")]
    #[test_case(r#"{"channel":"book","type":"snapshot"}"# ; "missing data")]
    #[test_case(r#"{"channel":"book","type":"snapshot","data":[{"symbol":"BTC/USD","bids":[]}]}"# ; "missing asks")]
    #[test_case(r#"{"channel":"book","type":"snapshot","data":[{"bids":[],"asks":[]}]}"# ; "missing symbol")]
    #[test_case(r#"{"channel":"book","type":"trade","data":[{"symbol":"BTC/USD","bids":[],"asks":[]}]}"# ; "unknown kind")]
    #[test_case(r#"{"channel":"book","data":[{"symbol":"BTC/USD","bids":[],"asks":[]}]}"# ; "missing kind")]
    #[test_case(r#"{"channel":"book","type":"update","data":[{"symbol":"BTC/USD","bids":[],"asks":[],"checksum":-4}]}"# ; "negative checksum")]
    #[test_case(r#"{"channel":"book","type":"update","data":[{"symbol":"BTC/USD","bids":[],"asks":[],"checksum":"12"}]}"# ; "string checksum")]
    #[test_case(r#"{"channel":"book","type":"update","data":[{"symbol":"BTC/USD","bids":[],"asks":[],"timestamp":5}]}"# ; "numeric timestamp")]
    #[test_case(r#"{"method":"pong"}"# ; "pong")]
    #[test_case(r#"{"method":"unsubscribe","success":true}"# ; "unsubscribe ack")]
    #[test_case(r#"{"channel":"ticker","type":"update","data":[]}"# ; "other channel")]
    #[test_case(r#"[1,2,3]"# ; "top level array")]
    #[test_case(r#""hello""# ; "bare string")]
    #[test_case(r#"{}"# ; "empty object")]
    fn unrecognized_shapes(text: &str) {
        assert_eq!(decode(text), InboundMessage::Unrecognized);
    }

    #[test]
    fn classifies_status_channel() {
        let message = decode(
            r#"{"channel":"status","type":"update","data":[{"api_version":"v2",
                "connection_id":123,"system":"online","version":"2.0.0"}]}"#,
        );
        assert_eq!(
            message,
            InboundMessage::ConnectionStatus(StatusKind::System {
                status: "online".into(),
                version: Some("2.0.0".into()),
            })
        );
    }

    #[test]
    fn classifies_legacy_system_status() {
        let message = decode(r#"{"event":"systemStatus","status":"online","version":"1.9.0","connectionID":1}"#);
        assert!(matches!(
            message,
            InboundMessage::ConnectionStatus(StatusKind::System { ref status, .. }) if status == "online"
        ));
    }

    #[test_case(r#"{"channel":"heartbeat"}"# ; "v2 channel")]
    #[test_case(r#"{"event":"heartbeat"}"# ; "legacy event")]
    fn classifies_heartbeat(text: &str) {
        assert_eq!(decode(text), InboundMessage::ConnectionStatus(StatusKind::Heartbeat));
    }

    #[test]
    fn classifies_subscription_ack() {
        let message = decode(
            r#"{"method":"subscribe","result":{"channel":"book","depth":10,
                "snapshot":true,"symbol":"BTC/USD","warnings":[]},"success":true,
                "time_in":"2023-09-25T09:04:31.742599Z","time_out":"2023-09-25T09:04:31.742648Z"}"#,
        );
        assert_eq!(
            message,
            InboundMessage::SubscriptionAck {
                symbol: Some("BTC/USD".into()),
                depth: Some(10),
            }
        );
        assert!(matches!(
            decode(r#"{"event":"subscriptionStatus","status":"subscribed","pair":"XBT/USD"}"#),
            InboundMessage::SubscriptionAck { .. }
        ));
    }

    #[test_case(r#"{"method":"subscribe","success":false,"error":"Currency pair not supported"}"#, "Currency pair not supported" ; "v2 with reason")]
    #[test_case(r#"{"method":"subscribe","success":false}"#, "Subscription failed" ; "v2 without reason")]
    #[test_case(r#"{"event":"subscriptionStatus","status":"error","errorMessage":"Depth not supported"}"#, "Depth not supported" ; "legacy with reason")]
    #[test_case(r#"{"event":"subscriptionStatus","status":"error"}"#, "Subscription failed" ; "legacy without reason")]
    fn classifies_subscription_error(text: &str, reason: &str) {
        assert_eq!(
            decode(text),
            InboundMessage::SubscriptionError {
                reason: reason.to_string()
            }
        );
    }

    #[test]
    fn non_json_is_codec_error() {
        let result = JsonCodec::new().decode("not json {");
        assert!(matches!(result, Err(CodecError::Json(_))));
    }
}
