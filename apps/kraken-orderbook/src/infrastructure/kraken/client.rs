//! Book Stream Client
//!
//! Connects to Kraken's public WebSocket v2 endpoint, subscribes to the book
//! channel for one instrument and forwards classified book messages to the
//! session as [`FeedEnvelope`]s.
//!
//! # Stream URL
//!
//! - Production: `wss://ws.kraken.com/v2`
//!
//! # Connection Lifecycle
//!
//! Each [`BookFeed::connect`] spawns one connection task under a child of
//! the client's cancellation token and tags everything it emits with a new
//! generation. The task owns the socket, the reconnect backoff, the
//! heartbeat monitor and the delta throttle, so cancelling the token stops
//! all of them at once.
//!
//! ```text
//! Connecting → Subscribing → Streaming ──error──► Reconnecting{k} ─┐
//!     ▲                                                            │
//!     └──────────────────── sleep(base × k) ◄──────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use super::messages::{InboundMessage, KRAKEN_WS_URL, StatusKind, SubscribeRequest};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::throttle::{DEFAULT_THROTTLE_WINDOW, DeltaThrottle, Offer};
use crate::application::ports::{BookFeed, ConnectionState, FeedEnvelope, FeedEvent, StreamError};
use crate::domain::instrument::{Depth, Instrument};
use crate::infrastructure::metrics::{self, MessageKind};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection did not open in time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No frame arrived within the heartbeat timeout.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the book stream client.
#[derive(Debug, Clone)]
pub struct BookStreamConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Delta delivery window.
    pub throttle_window: Duration,
}

impl BookStreamConfig {
    /// Create a configuration with default policies.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            throttle_window: DEFAULT_THROTTLE_WINDOW,
        }
    }

    /// Create configuration from `BookConfig`.
    #[must_use]
    pub fn from_book_config(config: &crate::BookConfig) -> Self {
        Self {
            url: config.ws_url.clone(),
            reconnect: ReconnectConfig::from_book_config(config),
            heartbeat: HeartbeatConfig::from_book_config(config),
            connect_timeout: config.connect_timeout,
            throttle_window: config.delta_throttle,
        }
    }
}

impl Default for BookStreamConfig {
    fn default() -> Self {
        Self::new(KRAKEN_WS_URL)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Kraken book stream client.
///
/// Manages the connection lifecycle including:
/// - Subscription at the requested depth
/// - Heartbeat monitoring
/// - Automatic reconnection with linear backoff
/// - Delta throttling
pub struct BookStreamClient {
    config: Arc<BookStreamConfig>,
    event_tx: mpsc::Sender<FeedEnvelope>,
    cancel: CancellationToken,
    generation: u64,
    active: Option<CancellationToken>,
}

impl BookStreamClient {
    /// Create a new client. Nothing connects until [`BookFeed::connect`].
    #[must_use]
    pub fn new(
        config: BookStreamConfig,
        event_tx: mpsc::Sender<FeedEnvelope>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            event_tx,
            cancel,
            generation: 0,
            active: None,
        }
    }

    /// Whether a connection task is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Generation of the most recent connection.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl BookFeed for BookStreamClient {
    fn connect(&mut self, instrument: Instrument, depth: Depth) -> u64 {
        self.disconnect();
        self.generation += 1;

        let cancel = self.cancel.child_token();
        let connection = Connection {
            config: Arc::clone(&self.config),
            codec: JsonCodec::new(),
            instrument,
            depth,
            generation: self.generation,
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(connection.run());

        self.active = Some(cancel);
        self.generation
    }

    fn disconnect(&mut self) {
        if let Some(token) = self.active.take() {
            tracing::debug!(generation = self.generation, "Cancelling book connection");
            token.cancel();
        }
    }
}

impl Drop for BookStreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// One generation of the stream: connect, subscribe, stream, reconnect.
struct Connection {
    config: Arc<BookStreamConfig>,
    codec: JsonCodec,
    instrument: Instrument,
    depth: Depth,
    generation: u64,
    event_tx: mpsc::Sender<FeedEnvelope>,
    cancel: CancellationToken,
}

impl Connection {
    /// Run until cancelled or reconnect attempts are exhausted.
    async fn run(self) {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(generation = self.generation, "Book connection cancelled");
                return;
            }

            self.emit(FeedEvent::State(ConnectionState::Connecting)).await;

            match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!(generation = self.generation, "Book connection closed");
                    return;
                }
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    tracing::warn!(
                        error = %e,
                        generation = self.generation,
                        "Book connection error"
                    );
                    self.report(StreamError::Transport(e.to_string())).await;

                    if let Some(delay) = reconnect_policy.next_delay() {
                        let attempt = reconnect_policy.attempt_count();
                        tracing::info!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Reconnecting to book stream"
                        );
                        metrics::record_reconnect();

                        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                        self.emit(FeedEvent::State(ConnectionState::Reconnecting {
                            attempt,
                            delay_ms,
                        }))
                        .await;

                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                tracing::debug!("Book connection cancelled during reconnect delay");
                                return;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        let attempts = reconnect_policy.max_attempts();
                        tracing::error!(attempts, "Giving up on book stream");
                        self.emit(FeedEvent::State(ConnectionState::Disconnected)).await;
                        self.report(StreamError::ReconnectExhausted(attempts)).await;
                        return;
                    }
                }
            }
        }
    }

    /// Connect, subscribe and stream until error or cancellation.
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamClientError> {
        tracing::info!(
            url = %self.config.url,
            instrument = %self.instrument,
            depth = %self.depth,
            "Connecting to book stream"
        );

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result
                .map_err(|_| StreamClientError::ConnectTimeout(self.config.connect_timeout))??,
        };

        let (mut write, mut read) = ws_stream.split();

        self.emit(FeedEvent::State(ConnectionState::Subscribing)).await;
        let request = SubscribeRequest::book(self.instrument, self.depth);
        let json = self.codec.encode(&request)?;
        tracing::debug!(
            symbol = ?request.params.symbol,
            depth = request.params.depth,
            "Sending subscribe request"
        );
        write.send(Message::Text(json.into())).await?;

        reconnect_policy.reset();
        self.emit(FeedEvent::State(ConnectionState::Streaming)).await;

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat.clone());
        let tick_every = heartbeat.tick_interval();
        let mut ping = tokio::time::interval_at(Instant::now() + tick_every, tick_every);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut throttle = DeltaThrottle::new(self.config.throttle_window);

        loop {
            let flush_at = throttle.deadline();
            let flush_sleep = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now));

            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = flush_sleep, if flush_at.is_some() => {
                    if let Some(delta) = throttle.flush() {
                        self.emit(FeedEvent::Delta(delta)).await;
                    }
                }
                _ = ping.tick() => {
                    match heartbeat.on_tick() {
                        HeartbeatAction::Idle => {}
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        HeartbeatAction::Timeout => {
                            let timeout = heartbeat.pong_timeout();
                            return Err(StreamClientError::HeartbeatTimeout(timeout));
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(frame)) => {
                            heartbeat.record_activity();
                            match frame {
                                Message::Text(text) => {
                                    self.handle_text_message(&text, &mut throttle).await;
                                }
                                Message::Ping(data) => {
                                    write.send(Message::Pong(data)).await?;
                                }
                                Message::Close(_) => {
                                    tracing::info!("Server sent close frame");
                                    return Err(StreamClientError::ConnectionClosed);
                                }
                                _ => {}
                            }
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Classify a text frame and forward what the session needs.
    async fn handle_text_message(&self, text: &str, throttle: &mut DeltaThrottle) {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode book stream message");
                self.report(StreamError::Parse(e.to_string())).await;
                return;
            }
        };

        match message {
            InboundMessage::ConnectionStatus(status) => {
                metrics::record_message_received(MessageKind::Status);
                match status {
                    StatusKind::Heartbeat => tracing::trace!("Channel heartbeat"),
                    StatusKind::System { status, version } => {
                        tracing::info!(status = %status, version = ?version, "Exchange status");
                    }
                }
            }
            InboundMessage::SubscriptionAck { symbol, depth } => {
                metrics::record_message_received(MessageKind::Ack);
                tracing::info!(symbol = ?symbol, depth = ?depth, "Subscription confirmed");
            }
            InboundMessage::SubscriptionError { reason } => {
                metrics::record_message_received(MessageKind::SubscriptionError);
                tracing::warn!(reason = %reason, "Subscription rejected");
                self.report(StreamError::Subscription(reason)).await;
            }
            InboundMessage::BookSnapshot(update) => {
                metrics::record_message_received(MessageKind::Snapshot);
                if throttle.discard_pending() {
                    tracing::trace!("Snapshot superseded pending delta");
                }
                self.emit(FeedEvent::Snapshot(update)).await;
            }
            InboundMessage::BookDelta(update) => {
                metrics::record_message_received(MessageKind::Delta);
                match throttle.offer(update) {
                    Offer::Deliver(delta) => self.emit(FeedEvent::Delta(delta)).await,
                    Offer::Held => tracing::trace!("Delta held for throttle window"),
                    Offer::Coalesced => metrics::record_delta_coalesced(),
                }
            }
            InboundMessage::Unrecognized => {
                metrics::record_message_received(MessageKind::Unrecognized);
                tracing::debug!(len = text.len(), "Ignoring unrecognized message");
            }
        }
    }

    async fn report(&self, error: StreamError) {
        metrics::record_stream_error(error.kind());
        self.emit(FeedEvent::Error(error)).await;
    }

    /// Send an event unless this generation has been cancelled.
    async fn emit(&self, event: FeedEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let envelope = FeedEnvelope::new(self.generation, event);
        if self.event_tx.send(envelope).await.is_err() {
            tracing::debug!("Feed event channel closed, stopping connection");
            self.cancel.cancel();
        }
    }
}
