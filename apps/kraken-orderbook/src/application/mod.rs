//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the session orchestrator and the port interfaces
//! that define how it drives the book feed.

/// Port interfaces for external systems (book feed, clock).
pub mod ports;

/// Session orchestration and its serialized event loop.
pub mod services;
