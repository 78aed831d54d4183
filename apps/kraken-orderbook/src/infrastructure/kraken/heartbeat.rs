//! Heartbeat Monitor
//!
//! Tracks WebSocket liveness for the connection loop. The loop calls
//! [`HeartbeatMonitor::on_tick`] every [`HeartbeatMonitor::tick_interval`];
//! the monitor asks for a ping every `ping_interval` and any inbound frame
//! counts as activity. Once a ping is outstanding and nothing has arrived for
//! `pong_timeout`, the connection is considered dead. Detection lags the
//! timeout by at most one tick.

use std::time::Duration;

use tokio::time::Instant;

/// Shortest ping period and the liveness check cadence.
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for heartbeat behavior.
///
/// `pong_timeout` should exceed `ping_interval`, otherwise a quiet but healthy
/// connection can time out before its ping is answered.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence, with a ping outstanding, before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `BookConfig`.
    #[must_use]
    pub const fn from_book_config(config: &crate::BookConfig) -> Self {
        Self {
            ping_interval: config.heartbeat_interval,
            pong_timeout: config.heartbeat_timeout,
        }
    }
}

/// What the connection loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due.
    Idle,
    /// Send a ping frame.
    SendPing,
    /// Heartbeat timeout occurred, connection should be restarted.
    Timeout,
}

/// Per-connection liveness state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_activity: Instant,
    last_ping: Instant,
    waiting_since: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Create a monitor for a freshly opened connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            last_activity: now,
            last_ping: now,
            waiting_since: None,
        }
    }

    /// Ping period, never shorter than one second.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        self.config.ping_interval.max(CHECK_INTERVAL)
    }

    /// How often the connection loop should call [`Self::on_tick`].
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.ping_interval().min(CHECK_INTERVAL)
    }

    /// Configured timeout.
    #[must_use]
    pub const fn pong_timeout(&self) -> Duration {
        self.config.pong_timeout
    }

    /// Record that a frame arrived.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.waiting_since = None;
    }

    /// Check if we're currently waiting for a response to a ping.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.waiting_since.is_some()
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Decide what to do on a tick.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        let silence = self.time_since_activity();
        if self.is_waiting() && silence > self.config.pong_timeout {
            tracing::warn!(
                silence_secs = silence.as_secs(),
                timeout_secs = self.config.pong_timeout.as_secs(),
                "Heartbeat timeout detected"
            );
            return HeartbeatAction::Timeout;
        }

        if self.last_ping.elapsed() < self.ping_interval() {
            return HeartbeatAction::Idle;
        }

        let now = Instant::now();
        self.last_ping = now;
        self.waiting_since.get_or_insert(now);
        HeartbeatAction::SendPing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatConfig::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
        ))
    }

    /// Advance one tick at a time until the monitor asks for something.
    async fn next_action(monitor: &mut HeartbeatMonitor) -> (HeartbeatAction, Duration) {
        let mut waited = Duration::ZERO;
        loop {
            tokio::time::advance(monitor.tick_interval()).await;
            waited += monitor.tick_interval();
            match monitor.on_tick() {
                HeartbeatAction::Idle => {}
                action => return (action, waited),
            }
        }
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ping_interval_is_clamped() {
        let monitor = HeartbeatMonitor::new(HeartbeatConfig::new(Duration::ZERO, Duration::ZERO));
        assert_eq!(monitor.ping_interval(), Duration::from_secs(1));
        assert_eq!(monitor.tick_interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn pings_once_per_interval() {
        let mut monitor = monitor();
        assert_eq!(monitor.on_tick(), HeartbeatAction::Idle);
        assert!(!monitor.is_waiting());

        let (action, waited) = next_action(&mut monitor).await;
        assert_eq!(action, HeartbeatAction::SendPing);
        assert_eq!(waited, Duration::from_secs(30));
        assert!(monitor.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_clears_outstanding_ping() {
        let mut monitor = monitor();
        next_action(&mut monitor).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        monitor.record_activity();

        assert!(!monitor.is_waiting());
        assert_eq!(monitor.time_since_activity(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out_shortly_after_timeout() {
        let mut monitor = monitor();

        let (first, _) = next_action(&mut monitor).await;
        assert_eq!(first, HeartbeatAction::SendPing);
        let (second, _) = next_action(&mut monitor).await;
        assert_eq!(second, HeartbeatAction::SendPing, "still within timeout");
        let (third, _) = next_action(&mut monitor).await;
        assert_eq!(third, HeartbeatAction::Timeout);

        let silence = monitor.time_since_activity();
        assert!(silence > Duration::from_secs(60));
        assert!(silence <= Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_traffic_never_times_out() {
        let mut monitor = monitor();
        for _ in 0..200 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert_ne!(monitor.on_tick(), HeartbeatAction::Timeout);
            monitor.record_activity();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn answered_ping_keeps_quiet_connection_alive() {
        let mut monitor = monitor();
        for _ in 0..5 {
            let (action, _) = next_action(&mut monitor).await;
            assert_eq!(action, HeartbeatAction::SendPing);
            monitor.record_activity();
        }
    }
}
