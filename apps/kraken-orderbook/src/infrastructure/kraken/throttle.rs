//! Delta Throttle
//!
//! Limits delta delivery to one per window. A delta arriving more than one
//! window after the last delivery passes straight through; otherwise it is
//! held as the single pending delta until the window closes. Deltas that
//! arrive while one is pending are merged into it, later entries replacing
//! earlier ones for the same price, so the flushed delta leaves the ledger
//! exactly as applying each one in turn would.

use std::time::Duration;

use tokio::time::Instant;

use crate::domain::book::BookUpdate;

/// Default delivery window.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(50);

/// Outcome of offering a delta to the throttle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// Deliver this delta now.
    Deliver(BookUpdate),
    /// Held as the pending delta.
    Held,
    /// Merged into the pending delta.
    Coalesced,
}

/// Per-connection delta rate limiter.
#[derive(Debug)]
pub struct DeltaThrottle {
    window: Duration,
    last_delivery: Option<Instant>,
    pending: Option<BookUpdate>,
}

impl DeltaThrottle {
    /// Create a throttle with the given window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_delivery: None,
            pending: None,
        }
    }

    /// Offer a delta that just arrived.
    pub fn offer(&mut self, delta: BookUpdate) -> Offer {
        if let Some(pending) = self.pending.as_mut() {
            pending.merge(delta);
            return Offer::Coalesced;
        }

        let now = Instant::now();
        match self.last_delivery {
            Some(last) if now.duration_since(last) < self.window => {
                self.pending = Some(delta);
                Offer::Held
            }
            _ => {
                self.last_delivery = Some(now);
                Offer::Deliver(delta)
            }
        }
    }

    /// When the pending delta is due, if there is one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        self.last_delivery.map(|last| last + self.window)
    }

    /// Take the pending delta for delivery at the window boundary.
    pub fn flush(&mut self) -> Option<BookUpdate> {
        let pending = self.pending.take()?;
        self.last_delivery = Some(Instant::now());
        Some(pending)
    }

    /// Drop the pending delta. Returns whether one was held.
    pub fn discard_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Whether a delta is held.
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Default for DeltaThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::BookLevel;
    use rust_decimal::Decimal;

    fn delta(price: i64, qty: i64) -> BookUpdate {
        BookUpdate::new(
            "BTC/USD",
            vec![BookLevel::new(Decimal::from(price), Decimal::from(qty))],
            vec![],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_delta_passes_through() {
        let mut throttle = DeltaThrottle::default();
        assert_eq!(throttle.offer(delta(100, 1)), Offer::Deliver(delta(100, 1)));
        assert!(throttle.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delta_inside_window_is_held_until_boundary() {
        let mut throttle = DeltaThrottle::default();
        let start = Instant::now();
        throttle.offer(delta(100, 1));

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(throttle.offer(delta(100, 2)), Offer::Held);
        assert_eq!(throttle.deadline(), Some(start + DEFAULT_THROTTLE_WINDOW));

        assert_eq!(throttle.flush(), Some(delta(100, 2)));
        assert!(!throttle.has_pending());
        assert!(throttle.flush().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn later_deltas_merge_into_pending() {
        let mut throttle = DeltaThrottle::default();
        throttle.offer(delta(100, 1));
        throttle.offer(delta(99, 3));
        assert_eq!(throttle.offer(delta(100, 0)), Offer::Coalesced);
        assert_eq!(throttle.offer(delta(99, 4)), Offer::Coalesced);

        let flushed = throttle.flush().unwrap();
        assert_eq!(
            flushed.bids,
            vec![
                BookLevel::new(Decimal::from(99), Decimal::from(4)),
                BookLevel::new(Decimal::from(100), Decimal::ZERO),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delta_after_window_passes_through() {
        let mut throttle = DeltaThrottle::default();
        throttle.offer(delta(100, 1));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(matches!(throttle.offer(delta(100, 2)), Offer::Deliver(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_restarts_window() {
        let mut throttle = DeltaThrottle::default();
        throttle.offer(delta(100, 1));
        throttle.offer(delta(100, 2));

        tokio::time::advance(Duration::from_millis(50)).await;
        throttle.flush();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(throttle.offer(delta(100, 3)), Offer::Held);
    }

    #[tokio::test(start_paused = true)]
    async fn discard_drops_pending() {
        let mut throttle = DeltaThrottle::default();
        throttle.offer(delta(100, 1));
        throttle.offer(delta(100, 2));
        assert!(throttle.discard_pending());
        assert!(throttle.deadline().is_none());
        assert!(!throttle.discard_pending());
    }
}
