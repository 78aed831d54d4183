//! Session Orchestrator
//!
//! Owns the current instrument/depth selection, the Book Ledger, the live
//! ladder view, the history buffer and the live/replay mode. Every mutation
//! goes through the methods here; the runtime serializes calls to them.
//!
//! # Live and Replay
//!
//! Feed messages always update the ledger and the live view. The mode only
//! decides what [`Session::view`] exposes: the live view in `Live`, the
//! history entry under the cursor in `Replay`.
//!
//! # Stale Messages
//!
//! Changing instrument or depth restarts the stream. Book messages still in
//! flight for the old subscription are dropped by instrument matching; state
//! changes and errors are dropped by connection generation.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::application::ports::{
    BookFeed, Clock, ConnectionState, FeedEnvelope, FeedEvent, StreamError, SystemClock,
};
use crate::domain::book::{
    BookUpdate, LadderSnapshot, Ledger, Millis, PriceLevel, cumulative, mark_touched,
};
use crate::domain::history::{DEFAULT_HISTORY_CAPACITY, HistoryBuffer};
use crate::domain::instrument::{Depth, Instrument};
use crate::infrastructure::metrics::{self, MessageKind};

/// Default minimum spacing between history captures.
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// Settings and View
// =============================================================================

/// Startup parameters for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Initially selected instrument.
    pub instrument: Instrument,
    /// Initially selected depth.
    pub depth: Depth,
    /// Maximum number of history captures kept.
    pub history_capacity: usize,
    /// Minimum wall-clock spacing between history captures.
    pub capture_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            instrument: Instrument::default(),
            depth: Depth::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
        }
    }
}

/// Which ladder consumers observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// The ladder follows the feed.
    #[default]
    Live,
    /// The ladder is pinned to a history capture.
    Replay,
}

/// Read-only state handed to consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionView {
    /// Selected instrument.
    pub instrument: Instrument,
    /// Selected depth.
    pub depth: Depth,
    /// Live or replay.
    pub mode: Mode,
    /// Exposed bids, best first.
    pub bids: Vec<PriceLevel>,
    /// Exposed asks, best first.
    pub asks: Vec<PriceLevel>,
    /// Best ask minus best bid of the exposed ladder.
    pub spread: Option<Decimal>,
    /// Running bid size totals.
    pub cumulative_bids: Vec<Decimal>,
    /// Running ask size totals.
    pub cumulative_asks: Vec<Decimal>,
    /// Number of history captures.
    pub history_len: usize,
    /// Replay cursor.
    pub cursor: usize,
    /// Capture time of the pinned snapshot while replaying.
    pub replay_timestamp: Option<Millis>,
    /// Whether the feed is streaming.
    pub connected: bool,
    /// Feed connection state.
    pub connection: ConnectionState,
    /// Waiting for a snapshot after a reset.
    pub loading: bool,
    /// Last surfaced error.
    pub error: Option<String>,
}

impl SessionView {
    /// Best bid and best ask prices of the exposed ladder.
    #[must_use]
    pub fn top_of_book(&self) -> (Option<Decimal>, Option<Decimal>) {
        (
            self.bids.first().map(|level| level.price),
            self.asks.first().map(|level| level.price),
        )
    }
}

// =============================================================================
// Session
// =============================================================================

/// The Session Orchestrator.
pub struct Session<F, C = SystemClock> {
    feed: F,
    clock: C,
    capture_interval: Millis,

    instrument: Instrument,
    depth: Depth,
    mode: Mode,

    ledger: Ledger,
    live: LadderSnapshot,
    frozen: Option<LadderSnapshot>,
    pin_next_snapshot: bool,
    history: HistoryBuffer,
    last_capture: Option<Millis>,

    generation: Option<u64>,
    subscribed_depth: Option<Depth>,
    connection: ConnectionState,
    capturing: bool,
    ever_connected: bool,
    loading: bool,
    last_error: Option<String>,
}

impl<F: BookFeed, C: Clock> Session<F, C> {
    /// Create a session with an inactive feed and empty book.
    #[must_use]
    pub fn new(feed: F, clock: C, settings: SessionSettings) -> Self {
        let now = clock.now_millis();
        Self {
            feed,
            clock,
            capture_interval: i64::try_from(settings.capture_interval.as_millis())
                .unwrap_or(i64::MAX),
            instrument: settings.instrument,
            depth: settings.depth,
            mode: Mode::Live,
            ledger: Ledger::new(),
            live: LadderSnapshot::empty(now),
            frozen: None,
            pin_next_snapshot: false,
            history: HistoryBuffer::new(settings.history_capacity),
            last_capture: None,
            generation: None,
            subscribed_depth: None,
            connection: ConnectionState::Disconnected,
            capturing: false,
            ever_connected: false,
            loading: false,
            last_error: None,
        }
    }

    /// Selected instrument.
    #[must_use]
    pub const fn instrument(&self) -> Instrument {
        self.instrument
    }

    /// Selected depth.
    #[must_use]
    pub const fn depth(&self) -> Depth {
        self.depth
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the feed is connected, connecting or waiting to reconnect.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.generation.is_some()
    }

    /// Feed connection state.
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// The authoritative ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The live materialized ladder, regardless of mode.
    #[must_use]
    pub const fn live_ladder(&self) -> &LadderSnapshot {
        &self.live
    }

    /// Captured history.
    #[must_use]
    pub const fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Last surfaced error.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Select a new instrument.
    ///
    /// Clears the ledger and history. An active stream is restarted for the
    /// new instrument; an inactive one is left unconnected. Replay stays
    /// pinned: to an empty ladder until the next snapshot, then to that
    /// snapshot.
    pub fn set_instrument(&mut self, instrument: Instrument) {
        tracing::info!(from = %self.instrument, to = %instrument, "Changing instrument");
        self.instrument = instrument;
        self.reset_book();
        self.history.clear();
        self.last_capture = None;
        metrics::set_history_length(0);

        if self.is_active() {
            self.start_stream();
        } else {
            self.loading = false;
        }
    }

    /// Select a new depth.
    ///
    /// In replay only the capture under the cursor is truncated. In live mode
    /// an active stream is resubscribed at the new depth and the ladder shows
    /// loading until the new snapshot arrives.
    pub fn set_depth(&mut self, depth: Depth) {
        tracing::info!(from = %self.depth, to = %depth, mode = ?self.mode, "Changing depth");
        self.depth = depth;

        match self.mode {
            Mode::Replay => {
                self.history.truncate_current(depth.as_usize());
                if let Some(frozen) = self.frozen.as_mut() {
                    frozen.truncate(depth.as_usize());
                }
            }
            Mode::Live if self.is_active() => {
                self.reset_book();
                self.start_stream();
            }
            Mode::Live => {
                self.rematerialize();
                self.loading = false;
            }
        }
    }

    /// Start the stream for the current selection.
    ///
    /// Does nothing while the stream is already active.
    pub fn connect(&mut self) {
        if self.is_active() {
            tracing::debug!(
                state = self.connection.as_str(),
                "Connect ignored, stream already active"
            );
            return;
        }
        self.loading = self.ledger.is_empty();
        self.start_stream();
    }

    /// Stop the stream and history capture. The last ladder stays exposed.
    pub fn disconnect(&mut self) {
        if self.generation.take().is_some() {
            tracing::info!(instrument = %self.instrument, "Disconnecting book stream");
            self.feed.disconnect();
        }
        self.subscribed_depth = None;
        self.connection = ConnectionState::Disconnected;
        self.capturing = false;
        self.loading = false;
        metrics::set_connected(false);
    }

    /// Switch between live and replay.
    pub fn set_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Live => {
                self.mode = Mode::Live;
                self.frozen = None;
                self.pin_next_snapshot = false;
                self.history.seek_latest();

                if self.is_active() && self.subscribed_depth != Some(self.depth) {
                    self.reset_book();
                    self.start_stream();
                } else {
                    self.rematerialize();
                }
            }
            Mode::Replay => {
                if self.mode == Mode::Replay {
                    return;
                }
                self.mode = Mode::Replay;
                self.history.seek_latest();
                self.frozen = Some(self.live.clone());
            }
        }
        tracing::debug!(mode = ?self.mode, cursor = self.history.cursor(), "Mode changed");
    }

    /// Pin the exposed ladder to a history capture, entering replay if
    /// needed. The index is clamped to the buffer; returns the cursor.
    pub fn set_index(&mut self, index: usize) -> usize {
        if self.mode != Mode::Replay {
            self.set_mode(Mode::Replay);
        }
        self.history.seek(index)
    }

    /// Forget the last surfaced error.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Stop everything ahead of teardown.
    pub fn shutdown(&mut self) {
        self.disconnect();
    }

    // -------------------------------------------------------------------------
    // Feed Events
    // -------------------------------------------------------------------------

    /// Dispatch one feed event.
    pub fn handle_feed_event(&mut self, envelope: FeedEnvelope) {
        let FeedEnvelope { generation, event } = envelope;
        match event {
            FeedEvent::Snapshot(update) => self.on_snapshot(&update),
            FeedEvent::Delta(update) => self.on_delta(&update),
            FeedEvent::State(state) if self.is_current(generation) => self.on_state(state),
            FeedEvent::Error(error) if self.is_current(generation) => self.on_error(error),
            FeedEvent::State(_) | FeedEvent::Error(_) => {
                tracing::debug!(
                    generation,
                    current = ?self.generation,
                    "Ignoring event from stale connection"
                );
            }
        }
    }

    /// Replace the ledger from a snapshot for the selected instrument.
    pub fn on_snapshot(&mut self, update: &BookUpdate) {
        if !self.accepts(update, MessageKind::Snapshot) {
            return;
        }

        let now = self.clock.now_millis();
        self.ledger.apply_snapshot(&update.bids, &update.asks);
        self.live = self
            .ledger
            .materialize(self.depth.as_usize(), Some(&self.live), now);
        self.loading = false;

        if self.pin_next_snapshot && self.mode == Mode::Replay {
            self.frozen = Some(self.live.clone());
            self.pin_next_snapshot = false;
        }

        tracing::debug!(
            symbol = %update.symbol,
            bids = self.live.bids.len(),
            asks = self.live.asks.len(),
            "Snapshot applied"
        );

        if self.mode == Mode::Live {
            self.capture_history();
        }
    }

    /// Apply a delta for the selected instrument and mark touched levels.
    pub fn on_delta(&mut self, update: &BookUpdate) {
        if !self.accepts(update, MessageKind::Delta) {
            return;
        }

        let started = Instant::now();
        let now = self.clock.now_millis();
        self.ledger.apply_delta(&update.bids, &update.asks);

        let mut view = self
            .ledger
            .materialize(self.depth.as_usize(), Some(&self.live), now);
        mark_touched(&mut view.bids, &update.bids, now);
        mark_touched(&mut view.asks, &update.asks, now);
        self.live = view;

        metrics::record_delta_apply_duration(started.elapsed());
    }

    /// Fixed-interval timer firing. Captures while streaming in live mode.
    pub fn on_capture_tick(&mut self) -> bool {
        if !self.capturing || !self.connection.is_streaming() {
            return false;
        }
        self.capture_history()
    }

    /// Append the live ladder to history.
    ///
    /// Does nothing outside live mode, while either side is empty, or within
    /// the capture interval of the previous capture. Returns whether a
    /// capture was taken.
    pub fn capture_history(&mut self) -> bool {
        if self.mode != Mode::Live || !self.live.is_two_sided() {
            return false;
        }

        let now = self.clock.now_millis();
        if self
            .last_capture
            .is_some_and(|last| now - last < self.capture_interval)
        {
            return false;
        }

        let mut snapshot = self.live.clone();
        snapshot.timestamp = now;
        let (recorded, evicted) = self.history.push(snapshot);
        self.history.seek_latest();
        self.last_capture = Some(now);

        tracing::trace!(
            timestamp = recorded,
            evicted,
            len = self.history.len(),
            "History captured"
        );
        metrics::record_history_capture(self.history.len());
        true
    }

    /// Build the read-only view.
    #[must_use]
    pub fn view(&self) -> SessionView {
        let (ladder, replay_timestamp) = self.exposed();
        SessionView {
            instrument: self.instrument,
            depth: self.depth,
            mode: self.mode,
            bids: ladder.bids.clone(),
            asks: ladder.asks.clone(),
            spread: ladder.spread(),
            cumulative_bids: cumulative(&ladder.bids),
            cumulative_asks: cumulative(&ladder.asks),
            history_len: self.history.len(),
            cursor: self.history.cursor(),
            replay_timestamp,
            connected: self.connection.is_streaming(),
            connection: self.connection,
            loading: self.loading,
            error: self.last_error.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn exposed(&self) -> (&LadderSnapshot, Option<Millis>) {
        match self.mode {
            Mode::Live => (&self.live, None),
            Mode::Replay => self.history.current().map_or_else(
                || (self.frozen.as_ref().unwrap_or(&self.live), None),
                |capture| (capture, Some(capture.timestamp)),
            ),
        }
    }

    fn accepts(&self, update: &BookUpdate, kind: MessageKind) -> bool {
        if self.instrument.matches_feed_symbol(&update.symbol) {
            return true;
        }
        tracing::debug!(
            symbol = %update.symbol,
            current = %self.instrument,
            kind = kind.as_str(),
            "Ignoring book message for another instrument"
        );
        metrics::record_message_ignored(kind);
        false
    }

    const fn is_current(&self, generation: u64) -> bool {
        matches!(self.generation, Some(current) if current == generation)
    }

    fn start_stream(&mut self) {
        if self.generation.is_some() {
            self.feed.disconnect();
        }
        let generation = self.feed.connect(self.instrument, self.depth);
        tracing::info!(
            instrument = %self.instrument,
            depth = %self.depth,
            generation,
            "Starting book stream"
        );
        self.generation = Some(generation);
        self.subscribed_depth = Some(self.depth);
        self.connection = ConnectionState::Connecting;
        self.capturing = true;
        metrics::set_connected(false);
    }

    fn reset_book(&mut self) {
        self.ledger.clear();
        self.live = LadderSnapshot::empty(self.clock.now_millis());
        self.loading = true;

        let replaying = self.mode == Mode::Replay;
        self.frozen = replaying.then(|| self.live.clone());
        self.pin_next_snapshot = replaying;
    }

    fn rematerialize(&mut self) {
        let now = self.clock.now_millis();
        self.live = self
            .ledger
            .materialize(self.depth.as_usize(), Some(&self.live), now);
    }

    fn on_state(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Streaming => {
                tracing::info!(
                    instrument = %self.instrument,
                    depth = %self.depth,
                    "Book stream connected"
                );
                self.ever_connected = true;
                self.last_error = None;
            }
            ConnectionState::Reconnecting { attempt, delay_ms } => {
                tracing::info!(attempt, delay_ms, "Book stream reconnecting");
            }
            _ => tracing::debug!(state = state.as_str(), "Book stream state"),
        }
        self.connection = state;
        metrics::set_connected(state.is_streaming());
    }

    fn on_error(&mut self, error: StreamError) {
        if error.is_fatal() {
            tracing::warn!(%error, "Book stream stopped");
            self.generation = None;
            self.subscribed_depth = None;
            self.connection = ConnectionState::Disconnected;
            self.capturing = false;
            self.loading = false;
            self.last_error = Some(error.to_string());
            metrics::set_connected(false);
            return;
        }

        if !self.ever_connected {
            tracing::debug!(%error, "Suppressing error before first connection");
            return;
        }

        tracing::warn!(%error, "Book stream error");
        self.last_error = Some(error.to_string());
    }
}
