//! Port Interfaces
//!
//! Defines the interfaces (ports) the session orchestrator depends on,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BookFeed`: starts and stops the book stream for an instrument/depth
//! - `Clock`: wall-clock milliseconds for ladder and history timestamps
//!
//! ## Feed Events (Inbound)
//!
//! A `BookFeed` delivers `FeedEnvelope`s on a channel. Each envelope is
//! tagged with the generation returned by the `connect` call that produced
//! it, so events from a superseded connection can be told apart.

use serde::Serialize;

use crate::domain::book::{BookUpdate, Millis};
use crate::domain::instrument::{Depth, Instrument};

// =============================================================================
// Connection State
// =============================================================================

/// Stream connection lifecycle.
///
/// ```text
/// Disconnected → Connecting → Subscribing → Streaming
///                    ↑                          │
///                    └──── Reconnecting ◄───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none pending.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, subscribe request being sent.
    Subscribing,
    /// Subscribed and receiving book messages.
    Streaming,
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff wait before the attempt.
        delay_ms: u64,
    },
}

impl ConnectionState {
    /// Whether book messages are flowing.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Short label for logs and health output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Reconnecting { .. } => "reconnecting",
        }
    }
}

// =============================================================================
// Stream Errors
// =============================================================================

/// Errors a `BookFeed` reports to the orchestrator.
///
/// None of these are returned from a call; they arrive as feed events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Inbound payload could not be decoded. The connection stays open.
    #[error("parse error: {0}")]
    Parse(String),

    /// The feed rejected the subscription. The connection stays open.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Socket-level failure; the client is reconnecting.
    #[error("transport error: {0}")]
    Transport(String),

    /// Reconnect attempts exhausted; the client has stopped.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    ReconnectExhausted(u32),
}

impl StreamError {
    /// Whether the client has stopped and must be reconnected explicitly.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted(_))
    }

    /// Metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Subscription(_) => "subscription",
            Self::Transport(_) => "transport",
            Self::ReconnectExhausted(_) => "reconnect_exhausted",
        }
    }
}

// =============================================================================
// Feed Events
// =============================================================================

/// An event produced by a `BookFeed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The connection moved to a new state.
    State(ConnectionState),
    /// Full book replacement.
    Snapshot(BookUpdate),
    /// Incremental book change (possibly several coalesced).
    Delta(BookUpdate),
    /// A reported error.
    Error(StreamError),
}

/// A feed event tagged with the connection generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEnvelope {
    /// Value returned by the `BookFeed::connect` call for this connection.
    pub generation: u64,
    /// The event.
    pub event: FeedEvent,
}

impl FeedEnvelope {
    /// Wrap an event.
    #[must_use]
    pub const fn new(generation: u64, event: FeedEvent) -> Self {
        Self { generation, event }
    }
}

// =============================================================================
// Driven Ports
// =============================================================================

/// Starts and stops the book stream.
///
/// Events are delivered out of band (see [`FeedEnvelope`]); both methods
/// return immediately.
#[cfg_attr(test, mockall::automock)]
pub trait BookFeed: Send {
    /// Start streaming `instrument` at `depth`, replacing any active
    /// connection. Returns the generation tag of the new connection.
    fn connect(&mut self, instrument: Instrument, depth: Depth) -> u64;

    /// Stop streaming without reconnecting. Safe to call in any state.
    fn disconnect(&mut self);
}

/// Wall-clock source.
pub trait Clock: Send {
    /// Current time in Unix epoch milliseconds.
    fn now_millis(&self) -> Millis;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        chrono::Utc::now().timestamp_millis()
    }
}
