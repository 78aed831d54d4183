//! Kraken WebSocket v2 Message Types
//!
//! Outbound request types and the closed set of classified inbound messages.
//!
//! # Inbound Classifications
//!
//! - `ConnectionStatus`: system status events and channel heartbeats
//! - `SubscriptionAck`: the feed accepted a subscribe request
//! - `SubscriptionError`: the feed rejected a subscribe request
//! - `BookSnapshot` / `BookDelta`: book channel payloads
//! - `Unrecognized`: anything else, including malformed book messages
//!
//! # References
//!
//! - [Book channel](https://docs.kraken.com/api/docs/websocket-v2/book)
//! - [Status channel](https://docs.kraken.com/api/docs/websocket-v2/status)

use serde::Serialize;

use crate::domain::book::BookUpdate;
use crate::domain::instrument::{Depth, Instrument};

/// Public v2 endpoint.
pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Reason reported when a rejection carries none.
pub const DEFAULT_SUBSCRIPTION_ERROR: &str = "Subscription failed";

// =============================================================================
// Outbound
// =============================================================================

/// Parameters of a book channel subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSubscription {
    /// Always `book`.
    pub channel: &'static str,
    /// Feed-spelled symbols.
    pub symbol: Vec<String>,
    /// Levels per side.
    pub depth: u16,
    /// Request an initial snapshot.
    pub snapshot: bool,
}

/// `{"method":"subscribe","params":{...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Always `subscribe`.
    pub method: &'static str,
    /// Subscription parameters.
    pub params: BookSubscription,
}

impl SubscribeRequest {
    /// Book subscription with snapshot for one instrument.
    #[must_use]
    pub fn book(instrument: Instrument, depth: Depth) -> Self {
        Self {
            method: "subscribe",
            params: BookSubscription {
                channel: "book",
                symbol: vec![instrument.feed_symbol()],
                depth: depth.levels(),
                snapshot: true,
            },
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// What a connection status message reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    /// Channel heartbeat.
    Heartbeat,
    /// Exchange system status (`online`, `maintenance`, ...).
    System {
        /// Status text.
        status: String,
        /// Server version, when reported.
        version: Option<String>,
    },
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Connection or system status.
    ConnectionStatus(StatusKind),
    /// Subscription accepted.
    SubscriptionAck {
        /// Subscribed symbol, when echoed.
        symbol: Option<String>,
        /// Subscribed depth, when echoed.
        depth: Option<u64>,
    },
    /// Subscription rejected.
    SubscriptionError {
        /// Reason given by the feed.
        reason: String,
    },
    /// Full book replacement.
    BookSnapshot(BookUpdate),
    /// Incremental book change.
    BookDelta(BookUpdate),
    /// Anything else.
    Unrecognized,
}
