//! Kraken Order Book Binary
//!
//! Streams one instrument's order book, keeps replay history, and serves
//! the current ladder over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kraken-orderbook
//! ```
//!
//! # Environment Variables
//!
//! - `KRAKEN_WS_URL`: WebSocket endpoint (default: <wss://ws.kraken.com/v2>)
//! - `BOOK_INSTRUMENT`: instrument to stream (default: XBT/USD)
//! - `BOOK_DEPTH`: 10 | 25 | 100 | 500 | 1000 (default: 10)
//! - `BOOK_HISTORY_CAPACITY`: history captures kept (default: 1000)
//! - `BOOK_HEALTH_PORT`: health/ladder HTTP port, 0 disables (default: 8083)
//! - `BOOK_AUTO_CONNECT`: connect at startup (default: true)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `kraken_orderbook=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kraken_orderbook::application::ports::SystemClock;
use kraken_orderbook::infrastructure::health::{HealthServer, HealthServerState};
use kraken_orderbook::infrastructure::telemetry;
use kraken_orderbook::{
    BookConfig, BookStreamClient, BookStreamConfig, Session, SessionRuntime, SessionView,
    init_metrics,
};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Minimum spacing between ladder log lines.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Kraken order book");

    let _metrics_handle = init_metrics().context("failed to initialize metrics")?;

    let config = BookConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
    let client = BookStreamClient::new(
        BookStreamConfig::from_book_config(&config),
        event_tx,
        shutdown_token.child_token(),
    );
    let session = Session::new(client, SystemClock, config.session_settings());
    let (runtime, handle) = SessionRuntime::new(
        session,
        event_rx,
        config.capture_tick,
        shutdown_token.child_token(),
    );
    let runtime_task = tokio::spawn(runtime.run());

    if config.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            handle.subscribe(),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tokio::spawn(log_ladder(handle.subscribe(), shutdown_token.clone()));

    if config.auto_connect {
        handle.connect().await?;
    }

    tracing::info!("Order book ready");

    await_shutdown(shutdown_token).await;

    drop(handle);
    if let Err(e) = runtime_task.await {
        tracing::error!(error = %e, "Session runtime panicked");
    }

    tracing::info!("Order book stopped");
    Ok(())
}

/// Log a one-line ladder summary whenever the view changes, at most once per
/// [`SUMMARY_INTERVAL`].
async fn log_ladder(mut view: watch::Receiver<SessionView>, cancel: CancellationToken) {
    let mut last_state = None;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = view.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let current = view.borrow_and_update().clone();
        let state = current.connection.as_str();
        if last_state != Some(state) {
            tracing::info!(state, error = ?current.error, "Connection state changed");
            last_state = Some(state);
        }

        let (best_bid, best_ask) = current.top_of_book();
        tracing::info!(
            instrument = %current.instrument,
            mode = ?current.mode,
            best_bid = ?best_bid,
            best_ask = ?best_ask,
            spread = ?current.spread,
            levels = current.bids.len().max(current.asks.len()),
            history = current.history_len,
            cursor = current.cursor,
            "Ladder"
        );

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(SUMMARY_INTERVAL) => {}
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BookConfig) {
    tracing::info!(
        instrument = %config.instrument,
        depth = %config.depth,
        history_capacity = config.history_capacity,
        health_port = config.health_port,
        auto_connect = config.auto_connect,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.ws_url,
        delta_throttle_ms = config.delta_throttle.as_millis(),
        capture_interval_ms = config.capture_interval.as_millis(),
        max_reconnect_attempts = config.max_reconnect_attempts,
        "Stream settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
