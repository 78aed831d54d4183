//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, the current ladder, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (streaming)
//! - `GET /ladder` - Current session view as JSON
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ConnectionState;
use crate::application::services::{Mode, SessionView};
use crate::domain::instrument::{Depth, Instrument};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Book session status.
    pub book: BookStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming with no surfaced error.
    Healthy,
    /// Connecting, reconnecting, loading, or streaming with an error.
    Degraded,
    /// Not connected.
    Unhealthy,
}

/// Session summary.
#[derive(Debug, Clone, Serialize)]
pub struct BookStatus {
    /// Selected instrument.
    pub instrument: Instrument,
    /// Selected depth.
    pub depth: Depth,
    /// Live or replay.
    pub mode: Mode,
    /// Connection state name.
    pub state: &'static str,
    /// Whether the feed is streaming.
    pub connected: bool,
    /// Number of history captures.
    pub history_len: usize,
    /// Replay cursor.
    pub cursor: usize,
    /// Last surfaced error.
    pub last_error: Option<String>,
}

impl From<&SessionView> for BookStatus {
    fn from(view: &SessionView) -> Self {
        Self {
            instrument: view.instrument,
            depth: view.depth,
            mode: view.mode,
            state: view.connection.as_str(),
            connected: view.connected,
            history_len: view.history_len,
            cursor: view.cursor,
            last_error: view.error.clone(),
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    view: watch::Receiver<SessionView>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, view: watch::Receiver<SessionView>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            view,
        }
    }

    fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/ladder", get(ladder_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.view.borrow().connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn ladder_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.snapshot())
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let view = state.snapshot();
    HealthResponse {
        status: determine_health_status(&view),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        book: BookStatus::from(&view),
    }
}

fn determine_health_status(view: &SessionView) -> HealthStatus {
    match view.connection {
        ConnectionState::Streaming if view.error.is_none() && !view.loading => {
            HealthStatus::Healthy
        }
        ConnectionState::Disconnected => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(connection: ConnectionState, error: Option<&str>) -> SessionView {
        SessionView {
            connected: connection.is_streaming(),
            connection,
            error: error.map(str::to_string),
            ..SessionView::default()
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(serde_json::to_string(&HealthStatus::Healthy).unwrap(), "\"healthy\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Unhealthy).unwrap(), "\"unhealthy\"");
    }

    #[test]
    fn streaming_is_healthy() {
        let status = determine_health_status(&view(ConnectionState::Streaming, None));
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn surfaced_error_degrades() {
        let status = determine_health_status(&view(ConnectionState::Streaming, Some("boom")));
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn waiting_for_snapshot_degrades() {
        let mut loading = view(ConnectionState::Streaming, None);
        loading.loading = true;
        assert_eq!(determine_health_status(&loading), HealthStatus::Degraded);
    }

    #[test]
    fn reconnecting_degrades() {
        let state = ConnectionState::Reconnecting {
            attempt: 2,
            delay_ms: 2000,
        };
        assert_eq!(determine_health_status(&view(state, None)), HealthStatus::Degraded);
    }

    #[test]
    fn disconnected_is_unhealthy() {
        let status = determine_health_status(&view(ConnectionState::Disconnected, None));
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn book_status_reflects_view() {
        let mut session_view = view(ConnectionState::Streaming, None);
        session_view.mode = Mode::Replay;
        session_view.history_len = 7;
        session_view.cursor = 3;

        let status = BookStatus::from(&session_view);
        assert_eq!(status.state, "streaming");
        assert_eq!(status.mode, Mode::Replay);
        assert_eq!(status.history_len, 7);
        assert_eq!(status.cursor, 3);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["instrument"], "XBT/USD");
    }
}
