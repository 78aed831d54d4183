//! Prometheus Metrics Module
//!
//! Exposes order book pipeline metrics via Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: Inbound feed messages by classification, deltas coalesced
//!   by the throttle, book messages ignored for instrument mismatch
//! - **Connection**: Connected flag, reconnect attempts, stream errors
//! - **History**: Captures taken and current buffer length
//! - **Latency**: Time to apply a delta and rematerialize the ladder
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (for example when a
/// different global recorder is already set).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Message counters
    describe_counter!(
        "kraken_book_messages_received_total",
        "Total messages received from the Kraken feed by classification"
    );
    describe_counter!(
        "kraken_book_deltas_coalesced_total",
        "Deltas merged into a pending delta by the throttle"
    );
    describe_counter!(
        "kraken_book_messages_ignored_total",
        "Book messages ignored because the instrument did not match"
    );

    // Connection
    describe_gauge!(
        "kraken_book_connected",
        "Whether the book stream is currently streaming (1) or not (0)"
    );
    describe_counter!(
        "kraken_book_stream_errors_total",
        "Stream errors by kind"
    );
    describe_counter!(
        "kraken_book_reconnects_total",
        "Total WebSocket reconnection attempts"
    );

    // History
    describe_counter!(
        "kraken_book_history_captures_total",
        "Ladder snapshots captured into history"
    );
    describe_gauge!(
        "kraken_book_history_length",
        "Number of ladder snapshots currently held in history"
    );

    // Latency histograms
    describe_histogram!(
        "kraken_book_delta_apply_seconds",
        "Time to apply a delta to the ledger and rematerialize the ladder"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound message classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Connection or system status, including channel heartbeats.
    Status,
    /// Subscription acknowledgement.
    Ack,
    /// Subscription rejected.
    SubscriptionError,
    /// Full book snapshot.
    Snapshot,
    /// Incremental book update.
    Delta,
    /// Anything else.
    Unrecognized,
}

impl MessageKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Ack => "ack",
            Self::SubscriptionError => "subscription_error",
            Self::Snapshot => "snapshot",
            Self::Delta => "delta",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Record a message received from the feed.
pub fn record_message_received(kind: MessageKind) {
    counter!(
        "kraken_book_messages_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a delta merged into the pending throttled delta.
pub fn record_delta_coalesced() {
    counter!("kraken_book_deltas_coalesced_total").increment(1);
}

/// Record a book message ignored for instrument mismatch.
pub fn record_message_ignored(kind: MessageKind) {
    counter!(
        "kraken_book_messages_ignored_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Update the connected flag.
pub fn set_connected(connected: bool) {
    gauge!("kraken_book_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a stream error.
pub fn record_stream_error(kind: &'static str) {
    counter!(
        "kraken_book_stream_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a WebSocket reconnection attempt.
pub fn record_reconnect() {
    counter!("kraken_book_reconnects_total").increment(1);
}

/// Record a history capture and the resulting buffer length.
#[allow(clippy::cast_precision_loss)]
pub fn record_history_capture(length: usize) {
    counter!("kraken_book_history_captures_total").increment(1);
    gauge!("kraken_book_history_length").set(length as f64);
}

/// Update the history length gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_history_length(length: usize) {
    gauge!("kraken_book_history_length").set(length as f64);
}

/// Record how long a delta took to apply.
pub fn record_delta_apply_duration(duration: Duration) {
    histogram!("kraken_book_delta_apply_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
