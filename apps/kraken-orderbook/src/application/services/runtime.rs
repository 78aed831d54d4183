//! Session Runtime
//!
//! The single logical actor that owns a [`Session`]. Commands from
//! [`SessionHandle`]s, feed events and the fixed-interval capture timer are
//! funneled into one `select!` loop and applied strictly one at a time.
//! After every step the resulting [`SessionView`] is published on a watch
//! channel.
//!
//! # Shutdown
//!
//! The loop ends when the cancellation token fires or every
//! `SessionHandle` has been dropped. Either way the session disconnects
//! its feed before the task returns.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::session::{Mode, Session, SessionView};
use crate::application::ports::{BookFeed, Clock, FeedEnvelope};
use crate::domain::instrument::{Depth, Instrument};

/// Capacity of the command queue.
const COMMAND_BUFFER: usize = 64;

/// A request to mutate the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Select an instrument.
    SetInstrument(Instrument),
    /// Select a depth.
    SetDepth(Depth),
    /// Start the stream.
    Connect,
    /// Stop the stream.
    Disconnect,
    /// Switch between live and replay.
    SetMode(Mode),
    /// Pin replay to a history index.
    SetIndex(usize),
    /// Forget the last error.
    ClearError,
}

/// The session runtime has stopped and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session runtime has stopped")]
pub struct SessionClosed;

// =============================================================================
// Handle
// =============================================================================

/// Command surface and read-only view of a running session.
///
/// Cloneable; the runtime stops once every clone is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Queue a command.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.commands.send(command).await.map_err(|_| SessionClosed)
    }

    /// Select an instrument.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn set_instrument(&self, instrument: Instrument) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SetInstrument(instrument)).await
    }

    /// Select a depth.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn set_depth(&self, depth: Depth) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SetDepth(depth)).await
    }

    /// Start the stream.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn connect(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Connect).await
    }

    /// Stop the stream.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn disconnect(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::Disconnect).await
    }

    /// Switch between live and replay.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn set_mode(&self, mode: Mode) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SetMode(mode)).await
    }

    /// Pin replay to a history index.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn set_index(&self, index: usize) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SetIndex(index)).await
    }

    /// Forget the last error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the runtime has stopped.
    pub async fn clear_error(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::ClearError).await
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// A receiver that is notified whenever the view changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Serialized event loop around a [`Session`].
pub struct SessionRuntime<F, C> {
    session: Session<F, C>,
    feed_events: mpsc::Receiver<FeedEnvelope>,
    commands: mpsc::Receiver<SessionCommand>,
    view_tx: watch::Sender<SessionView>,
    capture_tick: Duration,
    cancel: CancellationToken,
}

impl<F, C> SessionRuntime<F, C>
where
    F: BookFeed + 'static,
    C: Clock + 'static,
{
    /// Wrap a session.
    ///
    /// `feed_events` is the receiving end of the channel the session's feed
    /// publishes on. `capture_tick` is the period of the history capture
    /// timer.
    #[must_use]
    pub fn new(
        session: Session<F, C>,
        feed_events: mpsc::Receiver<FeedEnvelope>,
        capture_tick: Duration,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(session.view());

        let runtime = Self {
            session,
            feed_events,
            commands,
            view_tx,
            capture_tick: capture_tick.max(Duration::from_millis(1)),
            cancel,
        };
        let handle = SessionHandle {
            commands: command_tx,
            view: view_rx,
        };
        (runtime, handle)
    }

    /// Run until cancelled or every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.capture_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            instrument = %self.session.instrument(),
            depth = %self.session.depth(),
            "Session runtime started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::info!("Session runtime cancelled");
                    break;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!("All session handles dropped");
                        break;
                    };
                    self.apply(command);
                }
                Some(envelope) = self.feed_events.recv() => {
                    self.session.handle_feed_event(envelope);
                }
                _ = ticker.tick() => {
                    if !self.session.on_capture_tick() {
                        continue;
                    }
                }
            }
            self.publish();
        }

        self.session.shutdown();
        self.publish();
        tracing::info!("Session runtime stopped");
    }

    fn apply(&mut self, command: SessionCommand) {
        tracing::debug!(?command, "Applying session command");
        match command {
            SessionCommand::SetInstrument(instrument) => self.session.set_instrument(instrument),
            SessionCommand::SetDepth(depth) => self.session.set_depth(depth),
            SessionCommand::Connect => self.session.connect(),
            SessionCommand::Disconnect => self.session.disconnect(),
            SessionCommand::SetMode(mode) => self.session.set_mode(mode),
            SessionCommand::SetIndex(index) => {
                self.session.set_index(index);
            }
            SessionCommand::ClearError => self.session.clear_error(),
        }
    }

    fn publish(&self) {
        let next = self.session.view();
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
