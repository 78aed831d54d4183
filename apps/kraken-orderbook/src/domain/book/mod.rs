//! Book Ledger
//!
//! The authoritative price → size state for one instrument and the
//! materialized, depth-limited ladder views derived from it.
//!
//! # Keys
//!
//! Prices are exact [`Decimal`] values normalized once when a level enters
//! the ledger, so `100.10`, `100.1` and `1.001e2` all address the same
//! level. A size of zero (or below) never occupies a key.
//!
//! # Timestamps
//!
//! Timestamps are Unix epoch milliseconds. [`Ledger::materialize`] carries a
//! level's `last_updated` forward from the previous view while the level's
//! size is unchanged, which lets consumers highlight only levels that moved.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Unix epoch milliseconds.
pub type Millis = i64;

// =============================================================================
// Wire-independent Update Types
// =============================================================================

/// One price level as reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    /// Level price.
    pub price: Decimal,
    /// Quantity at the price; zero removes the level.
    pub qty: Decimal,
}

impl BookLevel {
    /// Create a level.
    #[must_use]
    pub const fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price, qty }
    }
}

/// A snapshot or delta payload for a single instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookUpdate {
    /// Symbol in feed spelling.
    pub symbol: String,
    /// Bid-side levels in wire order.
    pub bids: Vec<BookLevel>,
    /// Ask-side levels in wire order.
    pub asks: Vec<BookLevel>,
    /// Feed checksum, accepted but not verified.
    pub checksum: Option<u32>,
    /// Exchange timestamp (present on updates only).
    pub timestamp: Option<DateTime<Utc>>,
}

impl BookUpdate {
    /// Create an update with no checksum or timestamp.
    #[must_use]
    pub fn new(symbol: impl Into<String>, bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        Self {
            symbol: symbol.into(),
            bids,
            asks,
            checksum: None,
            timestamp: None,
        }
    }

    /// Fold a later update into this one.
    ///
    /// The result has the same effect on a ledger as applying `self` and then
    /// `later`: an entry for a price already present is replaced in place,
    /// other entries are appended.
    pub fn merge(&mut self, later: Self) {
        merge_side(&mut self.bids, later.bids);
        merge_side(&mut self.asks, later.asks);
        self.checksum = later.checksum;
        if later.timestamp.is_some() {
            self.timestamp = later.timestamp;
        }
    }
}

fn merge_side(into: &mut Vec<BookLevel>, later: Vec<BookLevel>) {
    if later.is_empty() {
        return;
    }
    let mut index: HashMap<Decimal, usize> = into
        .iter()
        .enumerate()
        .map(|(i, level)| (level.price, i))
        .collect();

    for level in later {
        match index.entry(level.price) {
            Entry::Occupied(slot) => into[*slot.get()].qty = level.qty,
            Entry::Vacant(slot) => {
                slot.insert(into.len());
                into.push(level);
            }
        }
    }
}

// =============================================================================
// Materialized Views
// =============================================================================

/// One rung of a materialized ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Size at the price.
    pub size: Decimal,
    /// When the level last changed, in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Millis>,
}

impl PriceLevel {
    /// Create a level with no change timestamp.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self {
            price,
            size,
            last_updated: None,
        }
    }
}

/// A sorted, depth-limited view of both sides of the book.
///
/// Bids are ordered by descending price, asks by ascending price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LadderSnapshot {
    /// When the view was produced, in epoch milliseconds.
    pub timestamp: Millis,
    /// Bid side, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask side, best first.
    pub asks: Vec<PriceLevel>,
}

impl LadderSnapshot {
    /// An empty ladder at the given time.
    #[must_use]
    pub const fn empty(timestamp: Millis) -> Self {
        Self {
            timestamp,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Whether both sides have at least one level.
    #[must_use]
    pub fn is_two_sided(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Whether both sides are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Drop levels beyond `depth` on each side.
    pub fn truncate(&mut self, depth: usize) {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        spread(&self.bids, &self.asks)
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Buy side.
    Bid,
    /// Sell side.
    Ask,
}

/// Authoritative price → size state for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl Ledger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both sides wholesale.
    ///
    /// Levels with zero or negative size are dropped. Applying the same
    /// snapshot twice yields the same ledger.
    pub fn apply_snapshot(&mut self, bids: &[BookLevel], asks: &[BookLevel]) {
        self.bids = side_from_snapshot(bids);
        self.asks = side_from_snapshot(asks);
    }

    /// Apply incremental changes in arrival order.
    ///
    /// A zero (or negative) size removes the price; anything else upserts it.
    pub fn apply_delta(&mut self, bids: &[BookLevel], asks: &[BookLevel]) {
        apply_side_delta(&mut self.bids, bids);
        apply_side_delta(&mut self.asks, asks);
    }

    /// Remove every level.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Whether both sides are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Number of levels on a side.
    #[must_use]
    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    /// Size at a price, if the level exists.
    #[must_use]
    pub fn size_at(&self, side: Side, price: Decimal) -> Option<Decimal> {
        self.side(side).get(&price.normalize()).copied()
    }

    /// Highest bid price.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Lowest ask price.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    const fn side(&self, side: Side) -> &BTreeMap<Decimal, Decimal> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Produce a sorted view limited to `depth` levels per side.
    ///
    /// A level keeps the `last_updated` it had in `previous` when its size is
    /// unchanged; new or resized levels are stamped with `now`.
    #[must_use]
    pub fn materialize(
        &self,
        depth: usize,
        previous: Option<&LadderSnapshot>,
        now: Millis,
    ) -> LadderSnapshot {
        let previous_bids = previous.map(|p| timestamp_index(&p.bids)).unwrap_or_default();
        let previous_asks = previous.map(|p| timestamp_index(&p.asks)).unwrap_or_default();

        let bids = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(price, size)| stamp(*price, *size, &previous_bids, now))
            .collect();

        let asks = self
            .asks
            .iter()
            .take(depth)
            .map(|(price, size)| stamp(*price, *size, &previous_asks, now))
            .collect();

        LadderSnapshot {
            timestamp: now,
            bids,
            asks,
        }
    }
}

fn side_from_snapshot(levels: &[BookLevel]) -> BTreeMap<Decimal, Decimal> {
    levels
        .iter()
        .filter(|level| level.qty > Decimal::ZERO)
        .map(|level| (level.price.normalize(), level.qty))
        .collect()
}

fn apply_side_delta(side: &mut BTreeMap<Decimal, Decimal>, levels: &[BookLevel]) {
    for level in levels {
        let price = level.price.normalize();
        if level.qty > Decimal::ZERO {
            side.insert(price, level.qty);
        } else {
            side.remove(&price);
        }
    }
}

fn timestamp_index(levels: &[PriceLevel]) -> HashMap<Decimal, (Decimal, Millis)> {
    levels
        .iter()
        .filter_map(|level| {
            level
                .last_updated
                .map(|ts| (level.price, (level.size, ts)))
        })
        .collect()
}

fn stamp(
    price: Decimal,
    size: Decimal,
    previous: &HashMap<Decimal, (Decimal, Millis)>,
    now: Millis,
) -> PriceLevel {
    let last_updated = match previous.get(&price) {
        Some((previous_size, ts)) if *previous_size == size => *ts,
        _ => now,
    };
    PriceLevel {
        price,
        size,
        last_updated: Some(last_updated),
    }
}

// =============================================================================
// View Helpers
// =============================================================================

/// Stamp every level whose price the feed reported in `touched` with `now`.
///
/// Levels are marked even when the reported size equals the previous one.
pub fn mark_touched(levels: &mut [PriceLevel], touched: &[BookLevel], now: Millis) {
    if touched.is_empty() {
        return;
    }
    let prices: HashSet<Decimal> = touched.iter().map(|level| level.price.normalize()).collect();
    for level in levels.iter_mut().filter(|level| prices.contains(&level.price)) {
        level.last_updated = Some(now);
    }
}

/// Running sum of sizes in list order.
#[must_use]
pub fn cumulative(levels: &[PriceLevel]) -> Vec<Decimal> {
    levels
        .iter()
        .scan(Decimal::ZERO, |total, level| {
            *total += level.size;
            Some(*total)
        })
        .collect()
}

/// Best ask price minus best bid price, or `None` if either side is empty.
#[must_use]
pub fn spread(bids: &[PriceLevel], asks: &[PriceLevel]) -> Option<Decimal> {
    let best_bid = bids.first()?;
    let best_ask = asks.first()?;
    Some(best_ask.price - best_bid.price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn lvl(price: &str, qty: &str) -> BookLevel {
        BookLevel::new(d(price), d(qty))
    }

    fn pairs(levels: &[PriceLevel]) -> Vec<(Decimal, Decimal)> {
        levels.iter().map(|l| (l.price, l.size)).collect()
    }

    fn reference_ledger() -> Ledger {
        let mut ledger = Ledger::new();
        ledger.apply_snapshot(&[lvl("100", "2"), lvl("99", "1")], &[lvl("101", "3")]);
        ledger
    }

    #[test]
    fn snapshot_materializes_sorted_sides() {
        let view = reference_ledger().materialize(10, None, 1_000);

        assert_eq!(pairs(&view.bids), vec![(d("100"), d("2")), (d("99"), d("1"))]);
        assert_eq!(pairs(&view.asks), vec![(d("101"), d("3"))]);
        assert_eq!(view.spread(), Some(d("1")));
        assert_eq!(cumulative(&view.bids), vec![d("2"), d("3")]);
        assert_eq!(view.timestamp, 1_000);
    }

    #[test]
    fn zero_delta_removes_level() {
        let mut ledger = reference_ledger();
        ledger.apply_delta(&[lvl("99", "0")], &[]);

        let view = ledger.materialize(10, None, 1_000);
        assert_eq!(pairs(&view.bids), vec![(d("100"), d("2"))]);
        assert_eq!(ledger.size_at(Side::Bid, d("99")), None);
    }

    #[test]
    fn zero_delta_for_absent_price_is_noop() {
        let mut ledger = reference_ledger();
        let before = ledger.clone();
        ledger.apply_delta(&[lvl("42", "0")], &[lvl("500", "0")]);
        assert_eq!(ledger, before);
    }

    #[test]
    fn delta_upserts_levels() {
        let mut ledger = reference_ledger();
        ledger.apply_delta(&[lvl("100", "5"), lvl("98", "4")], &[lvl("102", "1")]);

        assert_eq!(ledger.size_at(Side::Bid, d("100")), Some(d("5")));
        assert_eq!(ledger.size_at(Side::Bid, d("98")), Some(d("4")));
        assert_eq!(ledger.len(Side::Ask), 2);
        assert_eq!(ledger.best_bid(), Some(d("100")));
        assert_eq!(ledger.best_ask(), Some(d("101")));
    }

    #[test]
    fn snapshot_drops_non_positive_sizes() {
        let mut ledger = Ledger::new();
        ledger.apply_snapshot(&[lvl("100", "0"), lvl("99", "1")], &[lvl("101", "-1")]);

        assert_eq!(ledger.len(Side::Bid), 1);
        assert_eq!(ledger.len(Side::Ask), 0);
    }

    #[test]
    fn snapshot_replaces_previous_state() {
        let mut ledger = reference_ledger();
        ledger.apply_snapshot(&[lvl("50", "1")], &[lvl("51", "1")]);

        assert_eq!(ledger.best_bid(), Some(d("50")));
        assert_eq!(ledger.size_at(Side::Bid, d("100")), None);
    }

    #[test]
    fn snapshot_is_idempotent() {
        let bids = [lvl("100", "2"), lvl("99", "1")];
        let asks = [lvl("101", "3")];

        let mut once = Ledger::new();
        once.apply_snapshot(&bids, &asks);
        let mut twice = once.clone();
        twice.apply_snapshot(&bids, &asks);

        assert_eq!(once, twice);
    }

    #[test]
    fn equal_prices_share_a_key_regardless_of_representation() {
        let mut ledger = Ledger::new();
        ledger.apply_snapshot(&[lvl("100.10", "1")], &[]);
        ledger.apply_delta(&[lvl("100.1", "7")], &[]);

        assert_eq!(ledger.len(Side::Bid), 1);
        assert_eq!(ledger.size_at(Side::Bid, d("100.100")), Some(d("7")));

        ledger.apply_delta(&[lvl("100.1000", "0")], &[]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn materialize_limits_depth() {
        let bids: Vec<_> = (1..=20).map(|p| lvl(&p.to_string(), "1")).collect();
        let asks: Vec<_> = (21..=40).map(|p| lvl(&p.to_string(), "1")).collect();
        let mut ledger = Ledger::new();
        ledger.apply_snapshot(&bids, &asks);

        let view = ledger.materialize(5, None, 0);
        assert_eq!(view.bids.len(), 5);
        assert_eq!(view.asks.len(), 5);
        assert_eq!(view.bids[0].price, d("20"));
        assert_eq!(view.asks[0].price, d("21"));
    }

    #[test]
    fn unchanged_levels_keep_timestamp() {
        let mut ledger = reference_ledger();
        let first = ledger.materialize(10, None, 1_000);

        ledger.apply_delta(&[lvl("99", "4")], &[]);
        let second = ledger.materialize(10, Some(&first), 2_000);

        assert_eq!(second.bids[0].last_updated, Some(1_000), "100 untouched");
        assert_eq!(second.bids[1].last_updated, Some(2_000), "99 resized");
        assert_eq!(second.asks[0].last_updated, Some(1_000), "101 untouched");
    }

    #[test]
    fn levels_without_previous_timestamp_are_stamped() {
        let ledger = reference_ledger();
        let previous = LadderSnapshot {
            timestamp: 0,
            bids: vec![PriceLevel::new(d("100"), d("2"))],
            asks: vec![],
        };
        let view = ledger.materialize(10, Some(&previous), 5_000);
        assert_eq!(view.bids[0].last_updated, Some(5_000));
    }

    #[test]
    fn mark_touched_refreshes_reported_prices() {
        let mut ledger = reference_ledger();
        let first = ledger.materialize(10, None, 1_000);

        // Same size as before: materialize alone would keep the old stamp.
        let delta = [lvl("100.0", "2")];
        ledger.apply_delta(&delta, &[]);
        let mut second = ledger.materialize(10, Some(&first), 2_000);
        assert_eq!(second.bids[0].last_updated, Some(1_000));

        mark_touched(&mut second.bids, &delta, 2_000);
        assert_eq!(second.bids[0].last_updated, Some(2_000));
        assert_eq!(second.bids[1].last_updated, Some(1_000));
    }

    #[test]
    fn spread_absent_when_side_empty() {
        let bids = vec![PriceLevel::new(d("100"), d("1"))];
        assert_eq!(spread(&bids, &[]), None);
        assert_eq!(spread(&[], &bids), None);
    }

    #[test]
    fn cumulative_of_empty_is_empty() {
        assert!(cumulative(&[]).is_empty());
    }

    #[test]
    fn merge_replaces_same_price_and_appends_new() {
        let mut first = BookUpdate::new("BTC/USD", vec![lvl("100", "1"), lvl("99", "2")], vec![]);
        let second = BookUpdate::new("BTC/USD", vec![lvl("99", "0"), lvl("98", "5")], vec![lvl("101", "1")]);
        first.merge(second);

        assert_eq!(first.bids, vec![lvl("100", "1"), lvl("99", "0"), lvl("98", "5")]);
        assert_eq!(first.asks, vec![lvl("101", "1")]);
    }

    #[test]
    fn merged_delta_matches_sequential_application() {
        let base = reference_ledger();
        let a = BookUpdate::new("BTC/USD", vec![lvl("99", "0"), lvl("97", "1")], vec![lvl("101", "9")]);
        let b = BookUpdate::new("BTC/USD", vec![lvl("99", "3")], vec![lvl("101", "0")]);

        let mut sequential = base.clone();
        sequential.apply_delta(&a.bids, &a.asks);
        sequential.apply_delta(&b.bids, &b.asks);

        let mut merged = a;
        merged.merge(b);
        let mut coalesced = base;
        coalesced.apply_delta(&merged.bids, &merged.asks);

        assert_eq!(sequential, coalesced);
    }

    #[test]
    fn merge_updates_last_entry_for_repeated_price() {
        let mut first = BookUpdate::new("BTC/USD", vec![lvl("99", "1"), lvl("99", "2")], vec![]);
        first.merge(BookUpdate::new("BTC/USD", vec![lvl("99.0", "4")], vec![]));

        let mut ledger = reference_ledger();
        ledger.apply_delta(&first.bids, &first.asks);
        assert_eq!(ledger.size_at(Side::Bid, d("99")), Some(d("4")));
    }

    #[test]
    fn merging_large_bursts_keeps_one_entry_per_price() {
        let levels = |qty: &str| -> Vec<BookLevel> {
            (0..1000).map(|p| lvl(&(10_000 - p).to_string(), qty)).collect()
        };
        let mut pending = BookUpdate::new("BTC/USD", levels("1"), vec![]);
        for qty in ["2", "3", "4"] {
            pending.merge(BookUpdate::new("BTC/USD", levels(qty), vec![]));
        }

        assert_eq!(pending.bids.len(), 1000);
        assert!(pending.bids.iter().all(|level| level.qty == d("4")));
    }

    #[test]
    fn truncate_trims_both_sides() {
        let mut view = reference_ledger().materialize(10, None, 0);
        view.truncate(1);
        assert_eq!(view.bids.len(), 1);
        assert_eq!(view.asks.len(), 1);
        assert!(view.is_two_sided());
    }
}
