#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::significant_drop_tightening,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Kraken Order Book - Live Ladder with History Replay
//!
//! Subscribes to Kraken's public WebSocket v2 `book` channel for one
//! instrument, maintains an exact-decimal price ladder from snapshots and
//! incremental updates, and keeps a bounded history of ladder captures that
//! can be scrubbed back through while the live book keeps updating.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core book logic with no I/O
//!   - `instrument`: Supported instruments, depths, symbol mapping
//!   - `book`: The ledger and materialized ladder snapshots
//!   - `history`: Bounded capture buffer with a replay cursor
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The book feed interface, feed events, connection states
//!   - `services`: Session orchestration and its event loop
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kraken`: WebSocket client, message classifier, throttle
//!   - `config`: Environment configuration
//!   - `health`: Health check and ladder HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus and tracing setup
//!
//! # Data Flow
//!
//! ```text
//! Kraken WS ──► Classifier ──► Throttle ──► mpsc ──► SessionRuntime ──► watch ──► consumers
//!                                                        ▲
//!                                    commands ───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core book types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::book::{BookLevel, BookUpdate, LadderSnapshot, Ledger, PriceLevel};
pub use domain::history::HistoryBuffer;
pub use domain::instrument::{Depth, Instrument, InstrumentError};

// Application
pub use application::ports::{BookFeed, ConnectionState, FeedEnvelope, FeedEvent, StreamError};
pub use application::services::{
    Mode, Session, SessionCommand, SessionHandle, SessionRuntime, SessionSettings, SessionView,
};

// Infrastructure config
pub use infrastructure::config::{BookConfig, ConfigError};

// Kraken adapter
pub use infrastructure::kraken::{BookStreamClient, BookStreamConfig, InboundMessage, classify};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
