//! Domain Layer - Order book types and reconciliation logic.
//!
//! Pure data structures with no I/O: the supported instruments and depths,
//! the Book Ledger with its materialized ladder views, and the bounded
//! history buffer used for replay.

/// Supported instruments, depths and feed-symbol normalization.
pub mod instrument;

/// Book Ledger, price levels and ladder snapshots.
pub mod book;

/// Bounded ladder history with a replay cursor.
pub mod history;
