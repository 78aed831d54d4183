//! Instruments and Depths
//!
//! The fixed set of tradable pairs and subscription depths known at startup,
//! plus the symbol spelling translation between internal and feed names.
//!
//! # Symbol Spelling
//!
//! Bitcoin pairs are named `XBT/...` internally while the v2 feed spells them
//! `BTC/...`. Translation is a substitution of the base-asset prefix only:
//!
//! ```text
//! internal  XBT/USD  ──normalize_for_feed──►  BTC/USD  feed
//! internal  XBT/USD  ◄──normalize_from_feed──  BTC/USD  feed
//! ```

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Internal spelling of the bitcoin base-asset prefix.
pub const PAIR_PREFIX_XBT: &str = "XBT/";

/// Feed spelling of the bitcoin base-asset prefix.
pub const PAIR_PREFIX_BTC: &str = "BTC/";

// =============================================================================
// Symbol Normalization
// =============================================================================

/// Translate a feed symbol to the internal spelling.
///
/// Only a leading `BTC/` is rewritten; every other symbol is returned as-is.
#[must_use]
pub fn normalize_from_feed(symbol: &str) -> Cow<'_, str> {
    symbol.strip_prefix(PAIR_PREFIX_BTC).map_or(Cow::Borrowed(symbol), |rest| {
        Cow::Owned(format!("{PAIR_PREFIX_XBT}{rest}"))
    })
}

/// Translate an internal symbol to the feed spelling.
///
/// Only a leading `XBT/` is rewritten; every other symbol is returned as-is.
#[must_use]
pub fn normalize_for_feed(symbol: &str) -> Cow<'_, str> {
    symbol.strip_prefix(PAIR_PREFIX_XBT).map_or(Cow::Borrowed(symbol), |rest| {
        Cow::Owned(format!("{PAIR_PREFIX_BTC}{rest}"))
    })
}

// =============================================================================
// Instrument
// =============================================================================

/// A supported trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Instrument {
    /// Bitcoin / US dollar.
    #[default]
    XbtUsd,
    /// Ether / US dollar.
    EthUsd,
    /// Solana / euro.
    SolEur,
    /// Cardano / US dollar.
    AdaUsd,
    /// Polkadot / US dollar.
    DotUsd,
    /// Polygon / US dollar.
    MaticUsd,
}

impl Instrument {
    /// Every supported instrument, in selector order.
    pub const ALL: [Self; 6] = [
        Self::XbtUsd,
        Self::EthUsd,
        Self::SolEur,
        Self::AdaUsd,
        Self::DotUsd,
        Self::MaticUsd,
    ];

    /// Internal symbol spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::XbtUsd => "XBT/USD",
            Self::EthUsd => "ETH/USD",
            Self::SolEur => "SOL/EUR",
            Self::AdaUsd => "ADA/USD",
            Self::DotUsd => "DOT/USD",
            Self::MaticUsd => "MATIC/USD",
        }
    }

    /// Symbol spelling used in outbound subscribe requests.
    #[must_use]
    pub fn feed_symbol(&self) -> String {
        normalize_for_feed(self.as_str()).into_owned()
    }

    /// Whether a symbol received from the feed refers to this instrument.
    #[must_use]
    pub fn matches_feed_symbol(&self, symbol: &str) -> bool {
        normalize_from_feed(symbol) == self.as_str()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = InstrumentError;

    /// Parses either spelling (`XBT/USD` or `BTC/USD`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let internal = normalize_from_feed(&upper);
        Self::ALL
            .into_iter()
            .find(|instrument| instrument.as_str() == internal)
            .ok_or_else(|| InstrumentError::UnknownInstrument(s.to_string()))
    }
}

impl Serialize for Instrument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// =============================================================================
// Depth
// =============================================================================

/// A supported book subscription depth (levels per side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Depth {
    /// 10 levels.
    #[default]
    D10,
    /// 25 levels.
    D25,
    /// 100 levels.
    D100,
    /// 500 levels.
    D500,
    /// 1000 levels.
    D1000,
}

impl Depth {
    /// Every supported depth, ascending.
    pub const ALL: [Self; 5] = [Self::D10, Self::D25, Self::D100, Self::D500, Self::D1000];

    /// Number of levels per side.
    #[must_use]
    pub const fn levels(&self) -> u16 {
        match self {
            Self::D10 => 10,
            Self::D25 => 25,
            Self::D100 => 100,
            Self::D500 => 500,
            Self::D1000 => 1000,
        }
    }

    /// Number of levels per side, for slicing.
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.levels() as usize
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.levels())
    }
}

impl TryFrom<u32> for Depth {
    type Error = InstrumentError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|depth| u32::from(depth.levels()) == value)
            .ok_or(InstrumentError::UnsupportedDepth(value))
    }
}

impl FromStr for Depth {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| InstrumentError::InvalidDepth(s.to_string()))?;
        Self::try_from(value)
    }
}

impl Serialize for Depth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.levels())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors parsing instruments and depths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentError {
    /// Symbol is not in the supported set.
    #[error("unsupported instrument: {0}")]
    UnknownInstrument(String),
    /// Depth is numeric but not in the supported set.
    #[error("unsupported depth: {0}")]
    UnsupportedDepth(u32),
    /// Depth is not a number.
    #[error("invalid depth: {0}")]
    InvalidDepth(String),
}
