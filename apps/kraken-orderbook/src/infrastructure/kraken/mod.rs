//! Kraken WebSocket Adapter
//!
//! Implements the book feed for Kraken's public WebSocket v2 API:
//!
//! - **Codec**: JSON decoding and structural message classification
//! - **Client**: connection lifecycle, subscription, reconnect, heartbeat
//! - **Throttle**: delta delivery rate limiting

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod throttle;

pub use client::{BookStreamClient, BookStreamConfig, StreamClientError};
pub use codec::{CodecError, JsonCodec, classify};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use messages::{InboundMessage, KRAKEN_WS_URL, StatusKind, SubscribeRequest};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use throttle::{DeltaThrottle, Offer};
