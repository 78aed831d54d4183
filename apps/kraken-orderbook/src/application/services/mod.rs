//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Session`: instrument/depth selection, live vs. replay mode, ledger and
//!   history ownership
//! - `SessionRuntime`: the single consumer that feeds commands, feed events
//!   and capture ticks into a `Session` one at a time
//! - `SessionHandle`: the command surface and read-only view for consumers

pub mod runtime;
pub mod session;

pub use runtime::{SessionClosed, SessionCommand, SessionHandle, SessionRuntime};
pub use session::{Mode, Session, SessionSettings, SessionView};
